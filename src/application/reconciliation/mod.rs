//! Background reconciliation jobs.
//!
//! - `PaymentSweep` - polls processors for unsettled intents, expires lapsed ones
//! - `PanelSync` - periodic full sync of subscription state from the panel

mod panel_sync;
mod payment_sweep;

pub use panel_sync::{PanelSync, PanelSyncConfig, PanelSyncReport, DEFAULT_SYNC_GUARD_SECS};
pub use payment_sweep::{PaymentSweep, PaymentSweepConfig, SweepReport};
