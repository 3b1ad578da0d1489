//! PaymentSweep - scheduled reconciliation of unsettled payment intents.
//!
//! Each cycle:
//! 1. Polls every unsettled intent older than the grace period and not yet
//!    expired, feeding results into the same [`SettlementEngine`] webhooks use
//! 2. Marks intents past expiry as `expired`
//! 3. With credit recovery wired, replays the side-effect pipeline for
//!    completed deposits whose balance credit never landed (the process
//!    stopped between commit and the credit stage, or the stage gave up)
//!
//! ## Configuration
//!
//! | Setting | Default | Description |
//! |---------|---------|-------------|
//! | `interval` | 30s | Time between sweeps |
//! | `grace_period` | 60s | Minimum intent age before it is polled |
//! | `batch_size` | 100 | Max intents polled per sweep |
//! | `concurrency` | 8 | Parallel processor polls |
//! | `poll_timeout` | 10s | Deadline for one processor poll |
//! | `credit_recovery_after` | 300s | Minimum deposit age before its credit is replayed |

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::application::handlers::settlement::SettlementEngine;
use crate::application::side_effects::SideEffectPipeline;
use crate::domain::foundation::{DomainError, Timestamp};
use crate::domain::settlement::{LedgerTransaction, PaymentIntent, SettlementOutcome, Trigger};
use crate::ports::{
    GatewayRegistry, LedgerRepository, PaymentIntentStore, PollError, SettledPayment, StatusLookup,
};

#[derive(Debug, Clone)]
pub struct PaymentSweepConfig {
    pub interval: Duration,
    pub grace_period: Duration,
    pub batch_size: i64,
    pub concurrency: usize,
    pub poll_timeout: Duration,
    pub credit_recovery_after: Duration,
}

impl Default for PaymentSweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            grace_period: Duration::from_secs(60),
            batch_size: 100,
            concurrency: 8,
            poll_timeout: Duration::from_secs(10),
            credit_recovery_after: Duration::from_secs(300),
        }
    }
}

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub polled: usize,
    pub finalized: usize,
    pub already_settled: usize,
    pub rejected: usize,
    pub unresolved: usize,
    pub failed: usize,
    pub expired: usize,
    /// Deposits whose balance credit was replayed successfully.
    pub recovered: usize,
}

enum PollResult {
    Applied(SettlementOutcome),
    Unresolved,
    Failed,
}

struct CreditRecovery {
    ledger: Arc<dyn LedgerRepository>,
    pipeline: Arc<SideEffectPipeline>,
}

pub struct PaymentSweep {
    store: Arc<dyn PaymentIntentStore>,
    gateways: GatewayRegistry,
    engine: Arc<SettlementEngine>,
    config: PaymentSweepConfig,
    recovery: Option<CreditRecovery>,
}

impl PaymentSweep {
    pub fn new(
        store: Arc<dyn PaymentIntentStore>,
        gateways: GatewayRegistry,
        engine: Arc<SettlementEngine>,
        config: PaymentSweepConfig,
    ) -> Self {
        Self {
            store,
            gateways,
            engine,
            config,
            recovery: None,
        }
    }

    /// Enables replay of lost balance credits through `pipeline`.
    pub fn with_credit_recovery(
        mut self,
        ledger: Arc<dyn LedgerRepository>,
        pipeline: Arc<SideEffectPipeline>,
    ) -> Self {
        self.recovery = Some(CreditRecovery { ledger, pipeline });
        self
    }

    /// Runs sweeps until the shutdown signal flips to true.
    ///
    /// A failed sweep is logged and retried on the next tick.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = time::interval(self.config.interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Payment sweep stopped");
                        return;
                    }
                }
                _ = interval.tick() => {
                    match self.sweep_once().await {
                        Ok(report) if report != SweepReport::default() => {
                            info!(
                                polled = report.polled,
                                finalized = report.finalized,
                                expired = report.expired,
                                recovered = report.recovered,
                                failed = report.failed,
                                "Payment sweep finished"
                            );
                        }
                        Ok(_) => {}
                        Err(err) => error!(error = %err, "Payment sweep failed"),
                    }
                }
            }
        }
    }

    /// Runs one sweep.
    pub async fn sweep_once(&self) -> Result<SweepReport, DomainError> {
        let now = Timestamp::now();
        let grace = i64::try_from(self.config.grace_period.as_secs()).unwrap_or(i64::MAX);
        let candidates = self
            .store
            .list_reconcilable(now.minus_secs(grace), now, self.config.batch_size)
            .await?;

        let mut report = SweepReport {
            polled: candidates.len(),
            ..SweepReport::default()
        };

        let results: Vec<PollResult> = stream::iter(candidates)
            .map(|intent| async move { self.reconcile(&intent).await })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        for result in results {
            match result {
                PollResult::Applied(SettlementOutcome::Finalized { .. }) => report.finalized += 1,
                PollResult::Applied(SettlementOutcome::AlreadySettled) => report.already_settled += 1,
                PollResult::Applied(SettlementOutcome::Rejected(_)) => report.rejected += 1,
                PollResult::Applied(_) | PollResult::Unresolved => report.unresolved += 1,
                PollResult::Failed => report.failed += 1,
            }
        }

        let expired = self.store.expire_overdue(now, self.config.batch_size).await?;
        for order_id in &expired {
            info!(order_id = order_id.as_str(), "Payment intent expired");
        }
        report.expired = expired.len();

        if let Some(recovery) = &self.recovery {
            report.recovered = self.recover_credits(recovery, now).await?;
        }

        Ok(report)
    }

    async fn recover_credits(&self, recovery: &CreditRecovery, now: Timestamp) -> Result<usize, DomainError> {
        let after = i64::try_from(self.config.credit_recovery_after.as_secs()).unwrap_or(i64::MAX);
        let deposits = recovery
            .ledger
            .list_uncredited_deposits(now.minus_secs(after), self.config.batch_size)
            .await?;

        let mut recovered = 0;
        for transaction in deposits {
            if self.replay_deposit(recovery, transaction).await? {
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    async fn replay_deposit(
        &self,
        recovery: &CreditRecovery,
        transaction: LedgerTransaction,
    ) -> Result<bool, DomainError> {
        let transaction_id = transaction.id.to_string();
        let Some(order_id) = transaction.order_id.clone() else {
            warn!(transaction_id = %transaction_id, "Uncredited deposit has no order id");
            return Ok(false);
        };
        let Some(intent) = self.store.find(&order_id).await? else {
            warn!(order_id = order_id.as_str(), "Uncredited deposit has no payment intent");
            return Ok(false);
        };

        warn!(
            order_id = order_id.as_str(),
            transaction_id = %transaction_id,
            "Replaying side effects for uncredited deposit"
        );
        let payment = SettledPayment {
            intent,
            transaction,
            trigger: Trigger::Poll,
        };
        let report = recovery.pipeline.replay(&payment).await;
        Ok(report.failed().is_empty())
    }

    async fn reconcile(&self, intent: &PaymentIntent) -> PollResult {
        let order_id = intent.order_id.as_str();
        let processor = intent.processor.slug();
        let Some(gateway) = self.gateways.get(intent.processor) else {
            debug!(order_id, processor, "No adapter configured for pending intent");
            return PollResult::Unresolved;
        };

        let lookup = StatusLookup {
            order_id: intent.order_id.clone(),
            external_ref: intent.external_ref.clone(),
            currency: intent.currency,
        };
        let polled = time::timeout(self.config.poll_timeout, gateway.poll_status(&lookup)).await;
        let event = match polled {
            Ok(Ok(event)) => event,
            Ok(Err(PollError::NotFound)) => {
                debug!(order_id, processor, "Processor has no record yet");
                return PollResult::Unresolved;
            }
            Ok(Err(PollError::Transient(reason))) => {
                warn!(order_id, processor, reason = %reason, "Status poll failed");
                return PollResult::Failed;
            }
            Err(_) => {
                warn!(order_id, processor, "Status poll timed out");
                return PollResult::Failed;
            }
        };

        match self.engine.settle(&event, Trigger::Poll).await {
            Ok(outcome) => PollResult::Applied(outcome),
            Err(err) => {
                error!(order_id, processor, error = %err, "Settlement from poll failed");
                PollResult::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{InMemoryPaymentStore, MockGateway, RecordingListener};
    use crate::application::side_effects::{BalanceCreditStage, RetryPolicy};
    use crate::domain::foundation::{Currency, OrderId, UserId};
    use crate::domain::settlement::{
        IntentMetadata, IntentStatus, LedgerTransaction, PaymentState, Processor, SettlementEvent,
        TolerancePolicy,
    };
    use crate::ports::{CommitResult, UserAccount};

    struct Fixture {
        store: Arc<InMemoryPaymentStore>,
        gateway: Arc<MockGateway>,
        sweep: PaymentSweep,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryPaymentStore::new());
        let gateway = Arc::new(MockGateway::new(Processor::CloudPayments));
        let engine = Arc::new(SettlementEngine::new(
            store.clone(),
            TolerancePolicy::new(),
            Arc::new(RecordingListener::new()),
        ));
        let sweep = PaymentSweep::new(
            store.clone(),
            GatewayRegistry::new().with(gateway.clone()),
            engine,
            PaymentSweepConfig::default(),
        );
        Fixture {
            store,
            gateway,
            sweep,
        }
    }

    async fn pending(store: &InMemoryPaymentStore, order: &str, age_secs: i64, ttl_secs: i64) -> OrderId {
        let created = Timestamp::now().minus_secs(age_secs);
        let mut intent = PaymentIntent::open(
            OrderId::new(order).unwrap(),
            Processor::CloudPayments,
            UserId::new(1),
            30_000,
            Currency::Rub,
            ttl_secs,
            IntentMetadata::balance_topup(UserId::new(1), "", "ru"),
            created,
        )
        .unwrap();
        intent.mark_pending(None, "https://pay".into(), created).unwrap();
        store.insert(&intent).await.unwrap();
        intent.order_id
    }

    fn completed(order_id: &OrderId) -> SettlementEvent {
        SettlementEvent::verified(
            Processor::CloudPayments,
            order_id.clone(),
            Some("tx-100".into()),
            30_000,
            Currency::Rub,
            "Completed",
            PaymentState::Paid,
        )
    }

    #[tokio::test]
    async fn sweep_settles_intents_confirmed_by_poll() {
        let f = fixture();
        let order = pending(&f.store, "c1_aaaaaa", 120, 3600).await;
        f.gateway.set_poll(order.clone(), Ok(completed(&order)));

        let report = f.sweep.sweep_once().await.unwrap();

        assert_eq!(report.polled, 1);
        assert_eq!(report.finalized, 1);
        assert_eq!(f.store.intent(&order).unwrap().status, IntentStatus::Settled);
    }

    #[tokio::test]
    async fn sweep_skips_intents_inside_grace_period() {
        let f = fixture();
        let order = pending(&f.store, "c1_bbbbbb", 5, 3600).await;
        f.gateway.set_poll(order.clone(), Ok(completed(&order)));

        let report = f.sweep.sweep_once().await.unwrap();

        assert_eq!(report.polled, 0);
        assert_eq!(f.gateway.poll_calls(), 0);
    }

    #[tokio::test]
    async fn sweep_expires_overdue_intents() {
        let f = fixture();
        let order = pending(&f.store, "c1_cccccc", 600, 300).await;

        let report = f.sweep.sweep_once().await.unwrap();

        assert_eq!(report.expired, 1);
        assert_eq!(report.polled, 0);
        assert_eq!(f.store.intent(&order).unwrap().status, IntentStatus::Expired);
    }

    #[tokio::test]
    async fn transient_poll_failure_is_counted_and_left_pending() {
        let f = fixture();
        let order = pending(&f.store, "c1_dddddd", 120, 3600).await;
        f.gateway
            .set_poll(order.clone(), Err(PollError::Transient("502".into())));

        let report = f.sweep.sweep_once().await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(f.store.intent(&order).unwrap().status, IntentStatus::Pending);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let f = fixture();
        let (tx, rx) = watch::channel(false);
        let sweep = Arc::new(f.sweep);
        let task = tokio::spawn({
            let sweep = sweep.clone();
            async move { sweep.run(rx).await }
        });

        tx.send(true).unwrap();
        time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
    }

    fn recovering(f: Fixture) -> (Arc<InMemoryPaymentStore>, PaymentSweep) {
        let pipeline = SideEffectPipeline::new(RetryPolicy {
            max_attempts: 1,
            backoff: Duration::from_millis(1),
        })
        .with_stage(Arc::new(BalanceCreditStage::new(f.store.clone())));
        let sweep = f.sweep.with_credit_recovery(f.store.clone(), Arc::new(pipeline));
        (f.store, sweep)
    }

    fn account(id: i64) -> UserAccount {
        UserAccount {
            id: UserId::new(id),
            telegram_id: None,
            email: None,
            language: "ru".to_string(),
            balance_minor: 0,
            has_made_first_topup: false,
            referred_by: None,
            promo_tier: None,
        }
    }

    /// Commits a deposit without running any side effect, as if the process
    /// stopped right after the settlement transaction.
    async fn settled_without_credit(store: &InMemoryPaymentStore, order: &str, age_secs: i64) -> OrderId {
        let order_id = pending(store, order, age_secs + 60, 3600).await;
        let intent = store.intent(&order_id).unwrap();
        let settled_at = Timestamp::now().minus_secs(age_secs);
        let transaction = LedgerTransaction::deposit(&intent, &completed(&order_id), settled_at);
        let result = store
            .commit_settlement(&order_id, &transaction, Some("tx-100"), settled_at)
            .await
            .unwrap();
        assert_eq!(result, CommitResult::Committed);
        order_id
    }

    #[tokio::test]
    async fn sweep_replays_balance_credit_lost_after_commit() {
        let (store, sweep) = recovering(fixture());
        store.add_user(account(1));
        settled_without_credit(&store, "c1_eeeeee", 900).await;
        assert_eq!(store.user(UserId::new(1)).unwrap().balance_minor, 0);

        let first = sweep.sweep_once().await.unwrap();
        let second = sweep.sweep_once().await.unwrap();

        assert_eq!(first.recovered, 1);
        assert_eq!(second.recovered, 0);
        let user = store.user(UserId::new(1)).unwrap();
        assert_eq!(user.balance_minor, 30_000);
        assert!(user.has_made_first_topup);
    }

    #[tokio::test]
    async fn recent_deposits_are_left_to_their_own_pipeline_run() {
        let (store, sweep) = recovering(fixture());
        store.add_user(account(1));
        settled_without_credit(&store, "c1_ffffff", 10).await;

        let report = sweep.sweep_once().await.unwrap();

        assert_eq!(report.recovered, 0);
        assert_eq!(store.user(UserId::new(1)).unwrap().balance_minor, 0);
    }
}
