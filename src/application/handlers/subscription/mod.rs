//! Subscription handlers - panel webhook synchronization.

mod sync_panel_event;

pub use sync_panel_event::{
    PanelNoticePolicy, SyncPanelEventCommand, SyncPanelEventHandler, SyncPanelEventResult,
};
