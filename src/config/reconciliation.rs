//! Background reconciliation configuration

use serde::Deserialize;
use std::time::Duration;

use crate::application::reconciliation::{PanelSyncConfig, PaymentSweepConfig};

use super::error::ValidationError;

/// Payment sweep and panel sync schedules
#[derive(Debug, Clone, Deserialize)]
pub struct ReconciliationConfig {
    #[serde(default = "default_on")]
    pub sweep_enabled: bool,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Minimum intent age before the sweep polls it
    #[serde(default = "default_grace_period")]
    pub grace_period_secs: u64,

    #[serde(default = "default_batch_size")]
    pub batch_size: i64,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,

    /// Minimum age of an uncredited deposit before the sweep replays its credit
    #[serde(default = "default_credit_recovery_after")]
    pub credit_recovery_after_secs: u64,

    #[serde(default = "default_on")]
    pub panel_sync_enabled: bool,

    #[serde(default = "default_panel_sync_interval")]
    pub panel_sync_interval_secs: u64,

    #[serde(default = "default_panel_page_size")]
    pub panel_sync_page_size: i64,
}

impl ReconciliationConfig {
    pub fn sweep(&self) -> PaymentSweepConfig {
        PaymentSweepConfig {
            interval: Duration::from_secs(self.sweep_interval_secs),
            grace_period: Duration::from_secs(self.grace_period_secs),
            batch_size: self.batch_size,
            concurrency: self.concurrency,
            poll_timeout: Duration::from_secs(self.poll_timeout_secs),
            credit_recovery_after: Duration::from_secs(self.credit_recovery_after_secs),
        }
    }

    pub fn panel_sync(&self, guard_secs: i64) -> PanelSyncConfig {
        PanelSyncConfig {
            interval: Duration::from_secs(self.panel_sync_interval_secs),
            page_size: self.panel_sync_page_size,
            guard_secs,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.sweep_interval_secs == 0 {
            return Err(ValidationError::MustBePositive("reconciliation.sweep_interval_secs"));
        }
        if self.batch_size <= 0 {
            return Err(ValidationError::MustBePositive("reconciliation.batch_size"));
        }
        if self.concurrency == 0 {
            return Err(ValidationError::MustBePositive("reconciliation.concurrency"));
        }
        if self.poll_timeout_secs == 0 {
            return Err(ValidationError::MustBePositive("reconciliation.poll_timeout_secs"));
        }
        if self.panel_sync_interval_secs == 0 {
            return Err(ValidationError::MustBePositive(
                "reconciliation.panel_sync_interval_secs",
            ));
        }
        if self.panel_sync_page_size <= 0 {
            return Err(ValidationError::MustBePositive("reconciliation.panel_sync_page_size"));
        }
        Ok(())
    }
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            sweep_enabled: true,
            sweep_interval_secs: default_sweep_interval(),
            grace_period_secs: default_grace_period(),
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            poll_timeout_secs: default_poll_timeout(),
            credit_recovery_after_secs: default_credit_recovery_after(),
            panel_sync_enabled: true,
            panel_sync_interval_secs: default_panel_sync_interval(),
            panel_sync_page_size: default_panel_page_size(),
        }
    }
}

fn default_on() -> bool {
    true
}

fn default_sweep_interval() -> u64 {
    30
}

fn default_grace_period() -> u64 {
    60
}

fn default_batch_size() -> i64 {
    100
}

fn default_concurrency() -> usize {
    8
}

fn default_poll_timeout() -> u64 {
    10
}

fn default_credit_recovery_after() -> u64 {
    300
}

fn default_panel_sync_interval() -> u64 {
    300
}

fn default_panel_page_size() -> i64 {
    200
}
