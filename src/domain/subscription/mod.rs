//! Subscription domain - provisioning state synchronized with the panel.

mod aggregate;
mod panel_event;
mod status;
mod transitions;

pub use aggregate::{snapshot_cutoff, Subscription, SubscriptionPatch};
pub use panel_event::{
    bandwidth_percent, device_name, user_lookups, AdminEvent, DeviceEventKind, NoticeCategory,
    PanelEnvelope, PanelEvent, UserEventKind, UserLookup,
};
pub use status::SubscriptionStatus;
pub use transitions::{
    bytes_to_gb, bytes_to_gb_2dp, is_client_link, is_subscription_url, plan_user_event,
    snapshot_patch, PanelUserFields, PanelUserStatus,
};

#[cfg(test)]
pub(crate) use aggregate::test_support;
