use crate::database::error::DatabaseError;
use crate::database::repository::Transaction;
use crate::services::payment_orchestrator::{PaymentOrchestrator, SettlementState};
use chrono::{Duration as ChronoDuration, Utc};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ReconciliationConfig {
    /// How often the sweep runs.
    pub interval: Duration,
    /// Transactions the gateway reported as still in progress are looked up
    /// again once their last report is this old.
    pub pending_after: Duration,
    /// PENDING checkouts older than this are expired; in-progress gateway
    /// reports older than this are no longer looked up.
    pub abandon_after: Duration,
    pub batch_size: i64,
    /// Gateway lookups in flight at once.
    pub concurrency: usize,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            pending_after: Duration::from_secs(15 * 60),
            abandon_after: Duration::from_secs(24 * 60 * 60),
            batch_size: 100,
            concurrency: 4,
        }
    }
}

impl ReconciliationConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.interval = Duration::from_secs(
            std::env::var("RECONCILE_INTERVAL_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(cfg.interval.as_secs()),
        );
        cfg.pending_after = Duration::from_secs(
            std::env::var("RECONCILE_PENDING_AFTER_MINUTES")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(|m| m * 60)
                .unwrap_or(cfg.pending_after.as_secs()),
        );
        cfg.abandon_after = Duration::from_secs(
            std::env::var("RECONCILE_ABANDON_AFTER_HOURS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(|h| h * 60 * 60)
                .unwrap_or(cfg.abandon_after.as_secs()),
        );
        cfg.batch_size = std::env::var("RECONCILE_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(cfg.batch_size);
        cfg.concurrency = std::env::var("RECONCILE_CONCURRENCY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(cfg.concurrency);
        cfg
    }
}

/// Counts from one sweep, logged at the end of every cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub queried: usize,
    pub expired: usize,
    pub resettled: usize,
    pub failed: usize,
}

enum Work {
    /// APPROVED without a payment record.
    Resettle(Transaction),
    /// PENDING past `abandon_after`.
    Expire(Transaction),
    /// Last gateway report was provisional.
    Query(Transaction),
}

enum Action {
    Queried,
    Expired,
    Resettled,
    Skipped,
    Failed,
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

pub struct ReconciliationWorker {
    orchestrator: Arc<PaymentOrchestrator>,
    config: ReconciliationConfig,
}

impl ReconciliationWorker {
    pub fn new(orchestrator: Arc<PaymentOrchestrator>, config: ReconciliationConfig) -> Self {
        Self {
            orchestrator,
            config,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            pending_after_secs = self.config.pending_after.as_secs(),
            abandon_after_secs = self.config.abandon_after.as_secs(),
            batch_size = self.config.batch_size,
            concurrency = self.config.concurrency,
            "payment reconciliation worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("payment reconciliation worker stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.interval) => {
                    match self.sweep().await {
                        Ok(report) => info!(
                            queried = report.queried,
                            expired = report.expired,
                            resettled = report.resettled,
                            failed = report.failed,
                            "reconciliation sweep finished"
                        ),
                        Err(e) => warn!(error = %e, "reconciliation sweep failed"),
                    }
                }
            }
        }

        info!("payment reconciliation worker stopped");
    }

    /// One pass: re-settle APPROVED transactions without a payment record,
    /// look up transactions the gateway last reported as in progress, expire
    /// abandoned checkouts.
    pub async fn sweep(&self) -> Result<SweepReport, DatabaseError> {
        let stores = self.orchestrator.stores();
        let now = Utc::now();
        let pending_cutoff = now - to_chrono(self.config.pending_after);
        let abandon_cutoff = now - to_chrono(self.config.abandon_after);
        let batch = self.config.batch_size;

        let mut work: Vec<Work> = stores
            .transactions
            .find_unsettled_approved(batch)
            .await?
            .into_iter()
            .map(Work::Resettle)
            .collect();
        work.extend(
            stores
                .transactions
                .find_awaiting_gateway(pending_cutoff, abandon_cutoff, batch)
                .await?
                .into_iter()
                .map(Work::Query),
        );
        work.extend(
            stores
                .transactions
                .find_stale_pending(abandon_cutoff, batch)
                .await?
                .into_iter()
                .map(Work::Expire),
        );

        let actions: Vec<Action> = stream::iter(work)
            .map(|item| self.reconcile_one(item))
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await;

        let mut report = SweepReport::default();
        for action in actions {
            match action {
                Action::Queried => report.queried += 1,
                Action::Expired => report.expired += 1,
                Action::Resettled => report.resettled += 1,
                Action::Failed => report.failed += 1,
                Action::Skipped => {}
            }
        }
        Ok(report)
    }

    async fn reconcile_one(&self, work: Work) -> Action {
        match work {
            Work::Expire(tx) => match self.orchestrator.expire_abandoned(&tx).await {
                Ok(true) => Action::Expired,
                Ok(false) => Action::Skipped,
                Err(e) => {
                    warn!(reference = %tx.reference, error = %e, "failed to expire checkout");
                    Action::Failed
                }
            },
            Work::Resettle(tx) => match self.orchestrator.reconcile(&tx.reference).await {
                Ok(result) => match result.settlement {
                    SettlementState::Credited => Action::Resettled,
                    SettlementState::Failed => Action::Failed,
                    _ => Action::Skipped,
                },
                Err(e) => {
                    warn!(reference = %tx.reference, error = %e, "re-settlement failed");
                    Action::Failed
                }
            },
            Work::Query(tx) => match self.orchestrator.reconcile(&tx.reference).await {
                Ok(result) => {
                    debug!(
                        reference = %tx.reference,
                        status = %result.transaction.status,
                        settlement = ?result.settlement,
                        "gateway status looked up"
                    );
                    Action::Queried
                }
                Err(e) => {
                    warn!(reference = %tx.reference, error = %e, "gateway status lookup failed");
                    Action::Failed
                }
            },
        }
    }
}

fn to_chrono(duration: Duration) -> ChronoDuration {
    ChronoDuration::from_std(duration).unwrap_or_else(|_| ChronoDuration::zero())
}
