//! SideEffectPipeline - ordered, failure-isolated post-settlement stages.
//!
//! Stages run in registration order. Each is retried on error with linear
//! backoff, and a panicking stage is caught and treated as a failure. No
//! outcome here can touch the already committed settlement.

use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::domain::foundation::DomainError;
use crate::ports::{SettledPayment, SettlementListener};

#[derive(Debug, Error)]
pub enum SideEffectError {
    #[error("Store error: {0}")]
    Store(#[from] DomainError),

    #[error("Collaborator error: {0}")]
    Collaborator(String),

    #[error("Stage panicked: {0}")]
    Panicked(String),
}

/// One post-settlement action.
#[async_trait]
pub trait SideEffectStage: Send + Sync {
    /// Stable name used in logs.
    fn name(&self) -> &'static str;

    /// Must be safe to run again after a failed attempt.
    async fn run(&self, payment: &SettledPayment) -> Result<(), SideEffectError>;

    /// Whether [`SideEffectPipeline::replay`] runs this stage. Stages whose
    /// effect cannot be deduplicated downstream return false.
    fn replayable(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay before attempt `n + 1` is `backoff * n`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageStatus {
    Succeeded { attempts: u32 },
    Failed { attempts: u32, error: String },
}

/// Per-stage results of one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub stages: Vec<(&'static str, StageStatus)>,
}

impl PipelineReport {
    pub fn failed(&self) -> Vec<&'static str> {
        self.stages
            .iter()
            .filter(|(_, s)| matches!(s, StageStatus::Failed { .. }))
            .map(|(name, _)| *name)
            .collect()
    }
}

pub struct SideEffectPipeline {
    stages: Vec<Arc<dyn SideEffectStage>>,
    retry: RetryPolicy,
}

impl SideEffectPipeline {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            stages: Vec::new(),
            retry,
        }
    }

    pub fn with_stage(mut self, stage: Arc<dyn SideEffectStage>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Runs every stage in order. Never fails.
    pub async fn execute(&self, payment: &SettledPayment) -> PipelineReport {
        self.run_stages(payment, false).await
    }

    /// Runs only the replayable stages, for settlements whose first run may
    /// have been lost.
    pub async fn replay(&self, payment: &SettledPayment) -> PipelineReport {
        self.run_stages(payment, true).await
    }

    async fn run_stages(&self, payment: &SettledPayment, replay: bool) -> PipelineReport {
        let mut report = PipelineReport::default();
        for stage in self.stages.iter().filter(|s| !replay || s.replayable()) {
            let status = self.run_stage(stage.as_ref(), payment).await;
            report.stages.push((stage.name(), status));
        }
        report
    }

    async fn run_stage(&self, stage: &dyn SideEffectStage, payment: &SettledPayment) -> StageStatus {
        let order_id = payment.intent.order_id.as_str();
        let max_attempts = self.retry.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            let result = AssertUnwindSafe(stage.run(payment))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(SideEffectError::Panicked(panic_message(panic))));

            match result {
                Ok(()) => {
                    debug!(order_id, stage = stage.name(), attempt, "Side effect completed");
                    return StageStatus::Succeeded { attempts: attempt };
                }
                Err(err) => {
                    warn!(order_id, stage = stage.name(), attempt, error = %err, "Side effect attempt failed");
                    last_error = err.to_string();
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(self.retry.backoff * attempt).await;
            }
        }

        error!(
            order_id,
            stage = stage.name(),
            attempts = max_attempts,
            error = %last_error,
            "Side effect gave up"
        );
        StageStatus::Failed {
            attempts: max_attempts,
            error: last_error,
        }
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Settlement listener that runs the pipeline on a spawned task.
///
/// Spawned runs are tracked so shutdown can wait for them with [`drain`].
/// Clones share the same task set.
///
/// [`drain`]: SpawningDispatcher::drain
#[derive(Clone)]
pub struct SpawningDispatcher {
    pipeline: Arc<SideEffectPipeline>,
    tasks: Arc<Mutex<JoinSet<()>>>,
}

impl SpawningDispatcher {
    pub fn new(pipeline: Arc<SideEffectPipeline>) -> Self {
        Self {
            pipeline,
            tasks: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    /// Pipeline runs not yet finished.
    pub fn in_flight(&self) -> usize {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        while tasks.try_join_next().is_some() {}
        tasks.len()
    }

    /// Waits for every dispatched run, up to `timeout`.
    ///
    /// Returns false if runs were still going when the deadline passed. Those
    /// runs are aborted; the payment sweep recovers their balance credits.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let mut tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        if tasks.is_empty() {
            return true;
        }
        info!(in_flight = tasks.len(), "Waiting for side-effect pipelines");
        let finished = tokio::time::timeout(timeout, async {
            while tasks.join_next().await.is_some() {}
        })
        .await
        .is_ok();
        if !finished {
            warn!(aborted = tasks.len(), "Side-effect pipelines still running at shutdown");
        }
        finished
    }
}

impl SettlementListener for SpawningDispatcher {
    fn on_settled(&self, payment: SettledPayment) {
        let pipeline = self.pipeline.clone();
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            let report = pipeline.execute(&payment).await;
            let failed = report.failed();
            if !failed.is_empty() {
                warn!(
                    order_id = payment.intent.order_id.as_str(),
                    failed = ?failed,
                    "Side effects finished with failures"
                );
            }
        });
    }
}
