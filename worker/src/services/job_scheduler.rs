use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicU64, Ordering},
};
use std::time::Duration as StdDuration;

use anyhow::Result;
use chrono::{DateTime, Duration, Timelike, Utc};
use crates::domain::{
    repositories::{jobs::JobRepository, webhooks::BillingWebhookRepository},
    value_objects::sync::SyncResult,
};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::config_model::Scheduler as SchedulerConfig;
use crate::usecases::process_jobs::{PendingJobProcessor, SubscriptionSyncer};

/// Terminal jobs older than this are pruned by the daily maintenance run.
const JOB_RETENTION_DAYS: i64 = 30;

/// Processed-webhook ledger rows older than this are pruned. Long enough to
/// outlive any provider redelivery window.
const WEBHOOK_RETENTION_DAYS: i64 = 90;

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_sync: Option<SyncResult>,
}

#[derive(Default)]
struct SchedulerState {
    last_tick_at: Option<DateTime<Utc>>,
    last_sync_at: Option<DateTime<Utc>>,
    last_sync: Option<SyncResult>,
}

/// Drives the two periodic duties of the worker: the pending-job tick and
/// the daily full reconciliation with retention pruning.
pub struct JobScheduler {
    processor: Arc<dyn PendingJobProcessor>,
    syncer: Arc<dyn SubscriptionSyncer>,
    job_repo: Arc<dyn JobRepository + Send + Sync>,
    webhook_repo: Arc<dyn BillingWebhookRepository + Send + Sync>,
    config: SchedulerConfig,
    running: Arc<AtomicBool>,
    // Bumped on every start so loops spawned by an earlier start exit even
    // when a stop/start pair lands within one of their sleep intervals.
    generation: Arc<AtomicU64>,
    state: Arc<Mutex<SchedulerState>>,
}

impl JobScheduler {
    pub fn new(
        processor: Arc<dyn PendingJobProcessor>,
        syncer: Arc<dyn SubscriptionSyncer>,
        job_repo: Arc<dyn JobRepository + Send + Sync>,
        webhook_repo: Arc<dyn BillingWebhookRepository + Send + Sync>,
        config: SchedulerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            processor,
            syncer,
            job_repo,
            webhook_repo,
            config,
            running: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
            state: Arc::new(Mutex::new(SchedulerState::default())),
        })
    }

    /// Spawns the tick and daily-sync loops. Returns false when the
    /// scheduler is already running so a second caller cannot double it.
    pub fn start(self: &Arc<Self>) -> bool {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("scheduler: start requested but already running");
            return false;
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        info!(
            job_interval_secs = self.config.job_interval_secs,
            daily_sync_hour_utc = self.config.daily_sync_hour_utc,
            generation,
            "scheduler: starting"
        );

        let tick = Arc::clone(self);
        tokio::spawn(async move {
            let interval = StdDuration::from_secs(tick.config.job_interval_secs.max(1));
            while tick.loop_active(generation) {
                tick.run_tick().await;
                tokio::time::sleep(interval).await;
            }
            info!(generation, "scheduler: job tick loop stopped");
        });

        let daily = Arc::clone(self);
        tokio::spawn(async move {
            while daily.loop_active(generation) {
                let wait = until_next_daily_run(Utc::now(), daily.config.daily_sync_hour_utc);
                tokio::time::sleep(wait).await;
                if !daily.loop_active(generation) {
                    break;
                }
                if let Err(err) = daily.run_daily_sync().await {
                    error!(sync_error = ?err, "scheduler: daily reconciliation failed");
                }
            }
            info!(generation, "scheduler: daily sync loop stopped");
        });

        true
    }

    /// A loop keeps going only while the scheduler is running AND no newer
    /// start has superseded it.
    fn loop_active(&self, generation: u64) -> bool {
        self.running.load(Ordering::SeqCst) && self.generation.load(Ordering::SeqCst) == generation
    }

    /// Signals both loops to exit after their current iteration.
    pub fn stop(&self) -> bool {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        if was_running {
            info!("scheduler: stop requested");
        } else {
            warn!("scheduler: stop requested but not running");
        }
        was_running
    }

    pub fn status(&self) -> SchedulerStatus {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        SchedulerStatus {
            running: self.running.load(Ordering::SeqCst),
            last_tick_at: state.last_tick_at,
            last_sync_at: state.last_sync_at,
            last_sync: state.last_sync.clone(),
        }
    }

    async fn run_tick(&self) {
        match self.processor.process_pending_jobs().await {
            Ok(0) => {}
            Ok(processed) => info!(processed, "scheduler: tick processed jobs"),
            Err(err) => error!(tick_error = ?err, "scheduler: tick failed"),
        }

        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.last_tick_at = Some(Utc::now());
    }

    /// Full reconciliation plus retention pruning. Also the body of the
    /// manual ops trigger.
    pub async fn run_daily_sync(&self) -> Result<SyncResult> {
        info!("scheduler: starting full reconciliation");
        let result = self.syncer.run_full_sync().await?;

        info!(
            total_subscriptions = result.total_subscriptions,
            synced_count = result.synced_count,
            discrepancies_found = result.discrepancies_found,
            errors_count = result.errors_count,
            grace_period_expired = result.grace_period_expired,
            "scheduler: full reconciliation finished"
        );

        {
            let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
            state.last_sync_at = Some(Utc::now());
            state.last_sync = Some(result.clone());
        }

        self.prune_retention().await;

        Ok(result)
    }

    async fn prune_retention(&self) {
        let now = Utc::now();

        match self
            .job_repo
            .delete_expired(now - Duration::days(JOB_RETENTION_DAYS))
            .await
        {
            Ok(0) => {}
            Ok(deleted) => info!(deleted, "scheduler: pruned terminal jobs"),
            Err(err) => error!(db_error = ?err, "scheduler: failed to prune jobs"),
        }

        match self
            .webhook_repo
            .delete_expired(now - Duration::days(WEBHOOK_RETENTION_DAYS))
            .await
        {
            Ok(0) => {}
            Ok(deleted) => info!(deleted, "scheduler: pruned processed webhooks"),
            Err(err) => error!(db_error = ?err, "scheduler: failed to prune processed webhooks"),
        }
    }
}

/// Time until the next occurrence of `hour_utc:00:00`. Runs tomorrow when
/// today's slot has already passed.
fn until_next_daily_run(now: DateTime<Utc>, hour_utc: u32) -> StdDuration {
    let hour_utc = hour_utc.min(23);
    let today_run = now
        .with_hour(hour_utc)
        .and_then(|t| t.with_minute(0))
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now);

    let next = if today_run > now {
        today_run
    } else {
        today_run + Duration::days(1)
    };

    (next - now).to_std().unwrap_or(StdDuration::from_secs(60))
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;
    use chrono::TimeZone;
    use crates::domain::repositories::{
        jobs::MockJobRepository, webhooks::MockBillingWebhookRepository,
    };

    use super::*;
    use crate::usecases::process_jobs::{MockPendingJobProcessor, MockSubscriptionSyncer};

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            job_interval_secs: 60,
            daily_sync_hour_utc: 2,
        }
    }

    fn scheduler_with(
        processor: MockPendingJobProcessor,
        syncer: MockSubscriptionSyncer,
        job_repo: MockJobRepository,
        webhook_repo: MockBillingWebhookRepository,
    ) -> Arc<JobScheduler> {
        JobScheduler::new(
            Arc::new(processor),
            Arc::new(syncer),
            Arc::new(job_repo),
            Arc::new(webhook_repo),
            config(),
        )
    }

    #[tokio::test]
    async fn start_is_single_flight() {
        let mut processor = MockPendingJobProcessor::new();
        processor.expect_process_pending_jobs().returning(|| Ok(0));

        let scheduler = scheduler_with(
            processor,
            MockSubscriptionSyncer::new(),
            MockJobRepository::new(),
            MockBillingWebhookRepository::new(),
        );

        assert!(scheduler.start());
        assert!(!scheduler.start());
        assert!(scheduler.status().running);

        assert!(scheduler.stop());
        assert!(!scheduler.stop());
        assert!(!scheduler.status().running);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_within_sleep_interval_does_not_duplicate_loops() {
        let ticks = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let mut processor = MockPendingJobProcessor::new();
        processor.expect_process_pending_jobs().returning(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(0)
        });

        // Permissive: the daily loop may fire during the simulated window
        // depending on the wall clock.
        let mut syncer = MockSubscriptionSyncer::new();
        syncer
            .expect_run_full_sync()
            .returning(|| Ok(SyncResult::default()));
        let mut job_repo = MockJobRepository::new();
        job_repo
            .expect_delete_expired()
            .returning(|_| Box::pin(async { Ok(0) }));
        let mut webhook_repo = MockBillingWebhookRepository::new();
        webhook_repo
            .expect_delete_expired()
            .returning(|_| Box::pin(async { Ok(0) }));

        let scheduler = JobScheduler::new(
            Arc::new(processor),
            Arc::new(syncer),
            Arc::new(job_repo),
            Arc::new(webhook_repo),
            SchedulerConfig {
                job_interval_secs: 1,
                daily_sync_hour_utc: 2,
            },
        );

        assert!(scheduler.start());
        tokio::time::sleep(StdDuration::from_millis(10)).await;

        // Stop and restart while the first tick loop is still asleep. The
        // first loop must exit on wake instead of resuming alongside the
        // second one.
        assert!(scheduler.stop());
        assert!(scheduler.start());
        tokio::time::sleep(StdDuration::from_millis(3050)).await;
        scheduler.stop();

        // One tick from the first start plus ticks at ~0s/1s/2s/3s from the
        // second. A resurrected first loop would roughly double this.
        let observed = ticks.load(Ordering::SeqCst);
        assert!(
            (2..=5).contains(&observed),
            "expected a single live tick loop, observed {observed} ticks"
        );
    }

    #[tokio::test]
    async fn daily_sync_records_report_and_prunes_retention() {
        let mut syncer = MockSubscriptionSyncer::new();
        syncer.expect_run_full_sync().times(1).returning(|| {
            Ok(SyncResult {
                total_subscriptions: 4,
                synced_count: 4,
                discrepancies_found: 1,
                ..SyncResult::default()
            })
        });

        let mut job_repo = MockJobRepository::new();
        job_repo
            .expect_delete_expired()
            .withf(|cutoff| {
                let age = Utc::now() - *cutoff;
                age > Duration::days(29) && age < Duration::days(31)
            })
            .times(1)
            .returning(|_| Box::pin(async { Ok(7) }));

        let mut webhook_repo = MockBillingWebhookRepository::new();
        webhook_repo
            .expect_delete_expired()
            .withf(|cutoff| {
                let age = Utc::now() - *cutoff;
                age > Duration::days(89) && age < Duration::days(91)
            })
            .times(1)
            .returning(|_| Box::pin(async { Ok(2) }));

        let scheduler = scheduler_with(
            MockPendingJobProcessor::new(),
            syncer,
            job_repo,
            webhook_repo,
        );

        let result = scheduler.run_daily_sync().await.unwrap();
        assert_eq!(result.discrepancies_found, 1);

        let status = scheduler.status();
        assert!(status.last_sync_at.is_some());
        assert_eq!(status.last_sync.unwrap().total_subscriptions, 4);
    }

    #[tokio::test]
    async fn daily_sync_failure_leaves_no_report() {
        let mut syncer = MockSubscriptionSyncer::new();
        syncer
            .expect_run_full_sync()
            .returning(|| Err(anyhow!("database unavailable")));

        let scheduler = scheduler_with(
            MockPendingJobProcessor::new(),
            syncer,
            MockJobRepository::new(),
            MockBillingWebhookRepository::new(),
        );

        assert!(scheduler.run_daily_sync().await.is_err());
        assert!(scheduler.status().last_sync.is_none());
    }

    #[test]
    fn next_daily_run_is_later_today_or_tomorrow() {
        let before = Utc.with_ymd_and_hms(2025, 6, 1, 1, 30, 0).unwrap();
        assert_eq!(
            until_next_daily_run(before, 2),
            StdDuration::from_secs(30 * 60)
        );

        let after = Utc.with_ymd_and_hms(2025, 6, 1, 2, 0, 1).unwrap();
        assert_eq!(
            until_next_daily_run(after, 2),
            StdDuration::from_secs(24 * 60 * 60 - 1)
        );
    }
}
