//! # Automatic Closing Scheduler
//!
//! Closes every active register once a day, leaving the records pending
//! for an operator to confirm.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   ┌──────┐  timer / run_now   ┌─────────┐   all registers   ┌─────────┐│
//! │   │ idle │ ─────────────────► │ running │ ────────────────► │completed││
//! │   └──────┘                    └─────────┘    processed      └────┬────┘│
//! │                                    ▲                             │     │
//! │                                    └──── next trigger ───────────┘     │
//! │                                                                         │
//! │  running:                                                              │
//! │    totals_for_today ─► empty? ─► completed, nothing written            │
//! │         │                                                              │
//! │         ▼ one task per register, concurrently                          │
//! │    attempt 1 ─► persistence error ─► wait ─► attempt 2 ─► ... ─► max   │
//! │         │                                                              │
//! │         ▼                                                              │
//! │    succeeded | skipped (already has a record today) | failed           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The timer and [`SchedulerHandle::run_now`] share [`ClosingScheduler::execute`].
//! Runs never overlap; a second trigger waits for the first to finish.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{error, info, warn};

use crate::closing::{ClosingEngine, ClosingTrigger};
use crate::config::TillConfig;
use crate::error::{SyncError, SyncResult};
use crate::schedule::DailySchedule;
use till_core::{ClosingOutcome, ClosingStatus, RegisterTotals};

// =============================================================================
// Backend
// =============================================================================

/// What the scheduler needs from the ledger.
#[async_trait]
pub trait ClosingBackend: Send + Sync + 'static {
    async fn totals_for_today(&self, now: DateTime<Utc>) -> SyncResult<Vec<RegisterTotals>>;

    /// Writes an `automatic-pending` record unless the register already
    /// has one today.
    async fn create_automatic_closing(
        &self,
        totals: &RegisterTotals,
        now: DateTime<Utc>,
    ) -> SyncResult<ClosingOutcome>;
}

#[async_trait]
impl ClosingBackend for ClosingEngine {
    async fn totals_for_today(&self, now: DateTime<Utc>) -> SyncResult<Vec<RegisterTotals>> {
        self.aggregator().totals_for_today(now).await
    }

    async fn create_automatic_closing(
        &self,
        totals: &RegisterTotals,
        now: DateTime<Utc>,
    ) -> SyncResult<ClosingOutcome> {
        self.create_closing(
            totals,
            None,
            ClosingStatus::AutomaticPending,
            ClosingTrigger::Automatic,
            now,
        )
        .await
    }
}

// =============================================================================
// State & Summary
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Idle,
    Running,
    Completed,
}

/// A register left unclosed after its attempts ran out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisterFailure {
    pub register_id: i64,
    pub attempts: u32,
    pub reason: String,
}

/// Outcome of one scheduler run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Registers that got a new pending record.
    pub succeeded: Vec<i64>,
    /// Registers that already had a record today.
    pub skipped: Vec<i64>,
    pub failed: Vec<RegisterFailure>,
}

impl RunSummary {
    fn empty(started_at: DateTime<Utc>) -> Self {
        RunSummary {
            started_at,
            finished_at: Utc::now(),
            succeeded: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

enum RegisterResult {
    Succeeded(i64),
    Skipped(i64),
    Failed(RegisterFailure),
}

// =============================================================================
// Options
// =============================================================================

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub schedule: DailySchedule,
    pub timezone: Tz,
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl SchedulerOptions {
    pub fn from_config(config: &TillConfig) -> SyncResult<Self> {
        Ok(SchedulerOptions {
            schedule: config.schedule()?,
            timezone: config.timezone()?,
            max_attempts: config.closing.max_attempts.max(1),
            retry_delay: config.closing.retry_delay(),
        })
    }
}

// =============================================================================
// Scheduler
// =============================================================================

/// Daily automatic closing of every active register.
#[derive(Clone)]
pub struct ClosingScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    backend: Arc<dyn ClosingBackend>,
    options: SchedulerOptions,
    state: watch::Sender<SchedulerState>,
    last_summary: RwLock<Option<RunSummary>>,
    run_lock: Mutex<()>,
}

impl ClosingScheduler {
    pub fn new(backend: Arc<dyn ClosingBackend>, options: SchedulerOptions) -> Self {
        let (state, _) = watch::channel(SchedulerState::Idle);
        ClosingScheduler {
            inner: Arc::new(SchedulerInner {
                backend,
                options,
                state,
                last_summary: RwLock::new(None),
                run_lock: Mutex::new(()),
            }),
        }
    }

    /// Spawns the daily timer and returns a handle.
    pub fn start(self) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let timer = self.clone();

        tokio::spawn(async move {
            let options = &timer.inner.options;
            info!(schedule = %options.schedule, timezone = %options.timezone, "Closing scheduler started");

            loop {
                let now = Utc::now();
                let next = options.schedule.next_after(now, options.timezone);
                let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
                info!(next = %next, "Next automatic closing scheduled");

                tokio::select! {
                    _ = tokio::time::sleep(wait) => {
                        if let Err(e) = timer.execute(Utc::now()).await {
                            error!(?e, "Automatic closing run failed");
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }

            info!("Closing scheduler stopped");
        });

        SchedulerHandle {
            scheduler: self,
            shutdown_tx,
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.inner.state.borrow()
    }

    pub async fn last_summary(&self) -> Option<RunSummary> {
        self.inner.last_summary.read().await.clone()
    }

    /// One full run: aggregate, then close each register with retries.
    pub async fn execute(&self, now: DateTime<Utc>) -> SyncResult<RunSummary> {
        let _running = self.inner.run_lock.lock().await;
        self.inner.state.send_replace(SchedulerState::Running);
        let started_at = Utc::now();
        info!(%now, "Automatic closing run started");

        let totals = match self.totals_with_retry(now).await {
            Ok(totals) => totals,
            Err(e) => {
                self.inner.state.send_replace(SchedulerState::Completed);
                return Err(e);
            }
        };

        let summary = if totals.is_empty() {
            info!("No register activity today, nothing to close");
            RunSummary::empty(started_at)
        } else {
            let results = join_all(totals.iter().map(|t| self.close_with_retry(t, now))).await;
            let mut summary = RunSummary::empty(started_at);
            for result in results {
                match result {
                    RegisterResult::Succeeded(register_id) => summary.succeeded.push(register_id),
                    RegisterResult::Skipped(register_id) => summary.skipped.push(register_id),
                    RegisterResult::Failed(failure) => summary.failed.push(failure),
                }
            }
            summary.finished_at = Utc::now();
            summary
        };

        info!(
            succeeded = summary.succeeded.len(),
            skipped = summary.skipped.len(),
            failed = summary.failed.len(),
            "Automatic closing run completed"
        );
        for failure in &summary.failed {
            warn!(
                register_id = failure.register_id,
                attempts = failure.attempts,
                reason = %failure.reason,
                "Register left unclosed"
            );
        }

        *self.inner.last_summary.write().await = Some(summary.clone());
        self.inner.state.send_replace(SchedulerState::Completed);
        Ok(summary)
    }

    async fn totals_with_retry(&self, now: DateTime<Utc>) -> SyncResult<Vec<RegisterTotals>> {
        let options = &self.inner.options;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.inner.backend.totals_for_today(now).await {
                Ok(totals) => return Ok(totals),
                Err(e) if e.is_retryable() && attempt < options.max_attempts => {
                    warn!(attempt, ?e, "Totals query failed, retrying");
                    tokio::time::sleep(options.retry_delay).await;
                }
                Err(e) => {
                    error!(attempt, ?e, "Totals query failed");
                    return Err(e);
                }
            }
        }
    }

    async fn close_with_retry(&self, totals: &RegisterTotals, now: DateTime<Utc>) -> RegisterResult {
        let options = &self.inner.options;
        let register_id = totals.register_id;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.inner.backend.create_automatic_closing(totals, now).await {
                Ok(ClosingOutcome::Created(_)) => return RegisterResult::Succeeded(register_id),
                Ok(ClosingOutcome::Skipped { .. }) => return RegisterResult::Skipped(register_id),
                Err(e) if e.is_retryable() && attempt < options.max_attempts => {
                    warn!(register_id, attempt, ?e, "Closing failed, retrying");
                    tokio::time::sleep(options.retry_delay).await;
                }
                Err(e) => {
                    error!(register_id, attempt, ?e, "Closing failed");
                    return RegisterResult::Failed(RegisterFailure {
                        register_id,
                        attempts: attempt,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Handle to a started scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    scheduler: ClosingScheduler,
    shutdown_tx: mpsc::Sender<()>,
}

impl SchedulerHandle {
    /// Runs immediately, through the same path as the timer.
    pub async fn run_now(&self) -> SyncResult<RunSummary> {
        self.scheduler.execute(Utc::now()).await
    }

    pub fn state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    pub async fn last_summary(&self) -> Option<RunSummary> {
        self.scheduler.last_summary().await
    }

    /// Stops the timer. A run in progress finishes.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ChannelError("Scheduler shutdown channel closed".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::RegisterTotalsAggregator;
    use crate::testing::{at, Ledger};
    use chrono_tz::America::Argentina::Cordoba;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use till_core::{ClosingRecord, CoreError, NewPayment};

    /// Backend failing a set number of times per register.
    #[derive(Default)]
    struct FlakyBackend {
        registers: Vec<i64>,
        failures: StdMutex<HashMap<i64, u32>>,
        rejected: Vec<i64>,
        calls: StdMutex<HashMap<i64, u32>>,
    }

    impl FlakyBackend {
        fn new(registers: &[i64]) -> Self {
            FlakyBackend {
                registers: registers.to_vec(),
                ..Default::default()
            }
        }

        fn failing(self, register_id: i64, times: u32) -> Self {
            self.failures.lock().unwrap().insert(register_id, times);
            self
        }

        fn rejecting(mut self, register_id: i64) -> Self {
            self.rejected.push(register_id);
            self
        }

        fn calls(&self, register_id: i64) -> u32 {
            self.calls.lock().unwrap().get(&register_id).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl ClosingBackend for FlakyBackend {
        async fn totals_for_today(&self, _now: DateTime<Utc>) -> SyncResult<Vec<RegisterTotals>> {
            Ok(self.registers.iter().map(|id| RegisterTotals::empty(*id)).collect())
        }

        async fn create_automatic_closing(
            &self,
            totals: &RegisterTotals,
            now: DateTime<Utc>,
        ) -> SyncResult<ClosingOutcome> {
            let id = totals.register_id;
            *self.calls.lock().unwrap().entry(id).or_insert(0) += 1;

            if self.rejected.contains(&id) {
                return Err(SyncError::Domain(CoreError::ClosingAlreadyClosed(id)));
            }
            {
                let mut failures = self.failures.lock().unwrap();
                if let Some(left) = failures.get_mut(&id) {
                    if *left > 0 {
                        *left -= 1;
                        return Err(SyncError::Persistence("database is locked".into()));
                    }
                }
            }
            Ok(ClosingOutcome::Created(ClosingRecord {
                id: id * 100,
                register_id: id,
                operator_id: None,
                created_at: now,
                closed_at: None,
                total_sales_cents: 0,
                collected_cents: 0,
                cash_cents: 0,
                credit_account_cents: 0,
                expenses_cents: 0,
                net_cash_income_cents: 0,
                status: ClosingStatus::AutomaticPending,
                breakdown: vec![],
            }))
        }
    }

    fn options() -> SchedulerOptions {
        SchedulerOptions {
            schedule: DailySchedule::new(23, 59).unwrap(),
            timezone: Cordoba,
            max_attempts: 3,
            retry_delay: Duration::from_millis(2000),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_bounded_and_per_register() {
        let backend = Arc::new(FlakyBackend::new(&[1, 2, 3]).failing(2, 2).failing(3, 10));
        let scheduler = ClosingScheduler::new(backend.clone(), options());
        assert_eq!(scheduler.state(), SchedulerState::Idle);

        let started = tokio::time::Instant::now();
        let summary = scheduler.execute(Utc::now()).await.unwrap();

        assert_eq!(summary.succeeded, vec![1, 2]);
        assert!(summary.skipped.is_empty());
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].register_id, 3);
        assert_eq!(summary.failed[0].attempts, 3);
        assert!(summary.failed[0].reason.contains("database is locked"));

        assert_eq!(backend.calls(1), 1);
        assert_eq!(backend.calls(2), 3);
        assert_eq!(backend.calls(3), 3);
        // Registers wait in parallel: two delays, not four.
        assert!(started.elapsed() < Duration::from_millis(4500));
        assert_eq!(scheduler.state(), SchedulerState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rule_violations_are_not_retried() {
        let backend = Arc::new(FlakyBackend::new(&[4]).rejecting(4));
        let scheduler = ClosingScheduler::new(backend.clone(), options());

        let summary = scheduler.execute(Utc::now()).await.unwrap();
        assert_eq!(summary.failed[0].attempts, 1);
        assert_eq!(backend.calls(4), 1);
    }

    #[tokio::test]
    async fn test_no_activity_writes_nothing() {
        let backend = Arc::new(FlakyBackend::new(&[]));
        let scheduler = ClosingScheduler::new(backend, options());

        let summary = scheduler.execute(Utc::now()).await.unwrap();
        assert!(summary.succeeded.is_empty() && summary.skipped.is_empty() && !summary.has_failures());
        assert_eq!(scheduler.last_summary().await, Some(summary));
    }

    #[tokio::test]
    async fn test_second_run_same_day_skips() {
        let ledger = Ledger::new().await;
        ledger
            .db
            .payments()
            .record(
                &NewPayment {
                    sale_id: None,
                    amount_cents: 800,
                    method_id: ledger.cash,
                    register_id: ledger.register,
                    business_id: ledger.business,
                },
                at(10, 0),
            )
            .await
            .unwrap();

        let aggregator = RegisterTotalsAggregator::new(ledger.db.clone(), "efectivo");
        let engine = ClosingEngine::new(ledger.db.clone(), aggregator);
        let scheduler = ClosingScheduler::new(Arc::new(engine), options());

        let first = scheduler.execute(at(23, 59)).await.unwrap();
        assert_eq!(first.succeeded, vec![ledger.register]);
        // The idle register was never attempted.
        assert!(!first.skipped.contains(&ledger.other_register));
        assert!(first.failed.is_empty());

        let second = scheduler.execute(at(23, 59)).await.unwrap();
        assert!(second.succeeded.is_empty());
        assert_eq!(second.skipped, vec![ledger.register]);

        let records = ledger.db.closings().list_for_register(ledger.register, 10).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, ClosingStatus::AutomaticPending);
        assert_eq!(records[0].cash_cents, 800);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_run_now_and_timer() {
        let backend = Arc::new(FlakyBackend::new(&[7]));
        let handle = ClosingScheduler::new(backend.clone(), options()).start();

        let summary = handle.run_now().await.unwrap();
        assert_eq!(summary.succeeded, vec![7]);
        assert_eq!(handle.state(), SchedulerState::Completed);

        // The daily trigger fires within a day of virtual time.
        tokio::time::sleep(Duration::from_secs(24 * 60 * 60 + 60)).await;
        assert!(backend.calls(7) >= 2);
        assert!(handle.last_summary().await.is_some());

        handle.shutdown().await.unwrap();
    }

    #[test]
    fn test_options_from_config() {
        let mut config = TillConfig::default();
        config.closing.schedule = "15 22 * * *".into();
        config.closing.retry_delay_ms = 500;
        let options = SchedulerOptions::from_config(&config).unwrap();
        assert_eq!(options.schedule, DailySchedule::new(22, 15).unwrap());
        assert_eq!(options.retry_delay, Duration::from_millis(500));
        assert_eq!(options.max_attempts, 3);
    }
}
