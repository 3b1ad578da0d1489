//! Side-effect pipeline - post-settlement work that can never undo a settlement.
//!
//! Stages, in order:
//! 1. `BalanceCreditStage` - credits the deposit to the user's balance
//! 2. `ReferralRewardStage` - commission for the referring user
//! 3. `PromoTierStage` - lifetime-deposit tier upgrade
//! 4. `UserNotifyStage` / `AdminNotifyStage` - notifications
//! 5. `CartResumeStage` - completes a cart suspended for insufficient funds

mod pipeline;
mod stages;

pub use pipeline::{
    PipelineReport, RetryPolicy, SideEffectError, SideEffectPipeline, SideEffectStage,
    SpawningDispatcher, StageStatus,
};
pub use stages::{
    AdminNotifyStage, BalanceCreditStage, CartResumeStage, PromoTierStage, ReferralRewardStage,
    UserNotifyStage,
};
