//! Reminder scheduler: decides when to remind, runs the fan-out and reports on it.
//!
//! Idle → Running when a tick hits the weekly occurrence (or on a manual
//! trigger), Running → Idle once every dispatch has been joined. At most one
//! run is active per scheduler instance; a trigger that arrives meanwhile is
//! rejected, never queued.
//!
//! Runs execute on tasks owned by the scheduler, not by whoever asked for
//! them: a dropped caller never loses a run or its report.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use snackbell_core::config::SnackBellConfig;
use snackbell_core::error::{Result, SnackBellError};
use snackbell_core::traits::{EligibilityQuery, PushTransport, SubscriberRegistry};
use snackbell_core::types::{DeliveryOutcome, DeliveryStatus};

use crate::compose::NotificationComposer;
use crate::deadline::{self, Schedule};
use crate::dispatch::{FanOut, PushDispatcher};

/// How many run reports are kept in memory.
pub const HISTORY_LIMIT: usize = 20;

/// What started a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunTrigger {
    Scheduled { occurrence: DateTime<Utc> },
    Manual { requested_by: Option<String> },
}

/// Summary of one reminder run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub trigger: RunTrigger,
    /// The "now" the run was evaluated at.
    pub started_at: DateTime<Utc>,
    /// Wall clock when the last dispatch was joined.
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub eligible: usize,
    pub delivered: usize,
    pub expired: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Candidates for deregistration. Sorted.
    pub expired_ids: Vec<String>,
    pub failures: Vec<DeliveryOutcome>,
    pub skipped_ids: Vec<String>,
    /// Set when the run was cancelled before every subscriber was dispatched to.
    pub partial: bool,
}

impl RunReport {
    fn build(
        trigger: RunTrigger,
        started_at: DateTime<Utc>,
        period: (DateTime<Utc>, DateTime<Utc>),
        eligible: usize,
        fan_out: FanOut,
        elapsed: std::time::Duration,
    ) -> Self {
        let mut delivered = 0;
        let mut expired_ids = Vec::new();
        let mut failures = Vec::new();
        for outcome in fan_out.outcomes {
            match outcome.status {
                DeliveryStatus::Delivered => delivered += 1,
                DeliveryStatus::Expired => expired_ids.push(outcome.subscriber_id),
                DeliveryStatus::Failed => failures.push(outcome),
            }
        }
        expired_ids.sort();
        failures.sort_by(|a, b| a.subscriber_id.cmp(&b.subscriber_id));

        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            trigger,
            started_at,
            finished_at: Utc::now(),
            duration_ms: elapsed.as_millis() as u64,
            period_start: period.0,
            period_end: period.1,
            eligible,
            delivered,
            expired: expired_ids.len(),
            failed: failures.len(),
            skipped: fan_out.skipped.len(),
            partial: !fan_out.skipped.is_empty(),
            expired_ids,
            failures,
            skipped_ids: fan_out.skipped,
        }
    }
}

/// Result of checking one tick against the schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickDecision {
    Due { occurrence: DateTime<Utc> },
    /// The occurrence in the window was already handled by an earlier tick.
    AlreadyFired { occurrence: DateTime<Utc> },
    NotDue { next: DateTime<Utc> },
}

/// Holds the "run active" flag; clears it on drop, whatever path the run took.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// The reminder scheduler.
pub struct ReminderScheduler {
    schedule: Schedule,
    tolerance: Duration,
    composer: NotificationComposer,
    dispatcher: PushDispatcher,
    eligibility: Arc<dyn EligibilityQuery>,
    registry: Option<Arc<dyn SubscriberRegistry>>,
    auto_deregister: bool,
    running: AtomicBool,
    last_fired: Mutex<Option<DateTime<Utc>>>,
    history: Mutex<VecDeque<RunReport>>,
    shutdown: CancellationToken,
    /// Every run task, so shutdown can wait for their reports.
    runs: TaskTracker,
}

impl ReminderScheduler {
    /// Scheduler with default copy and a two-minute tolerance.
    pub fn new(
        schedule: Schedule,
        eligibility: Arc<dyn EligibilityQuery>,
        dispatcher: PushDispatcher,
    ) -> Self {
        Self {
            schedule,
            tolerance: Duration::seconds(120),
            composer: NotificationComposer::default(),
            dispatcher,
            eligibility,
            registry: None,
            auto_deregister: false,
            running: AtomicBool::new(false),
            last_fired: Mutex::new(None),
            history: Mutex::new(VecDeque::with_capacity(HISTORY_LIMIT)),
            shutdown: CancellationToken::new(),
            runs: TaskTracker::new(),
        }
    }

    /// Wire everything from config.
    pub fn from_config(
        config: &SnackBellConfig,
        eligibility: Arc<dyn EligibilityQuery>,
        registry: Option<Arc<dyn SubscriberRegistry>>,
        transport: Arc<dyn PushTransport>,
    ) -> Result<Self> {
        config.validate()?;
        let schedule = Schedule::from_config(&config.reminder)?;
        let dispatcher = PushDispatcher::new(transport, config.reminder.concurrency);
        let mut scheduler = Self::new(schedule, eligibility, dispatcher)
            .with_composer(NotificationComposer::new(config.notification.clone()))
            .with_tolerance(Duration::seconds(config.reminder.tolerance_secs() as i64));
        if let Some(registry) = registry {
            scheduler = scheduler.with_registry(registry, config.reminder.auto_deregister);
        }
        Ok(scheduler)
    }

    pub fn with_composer(mut self, composer: NotificationComposer) -> Self {
        self.composer = composer;
        self
    }

    pub fn with_tolerance(mut self, tolerance: Duration) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Registry used for deregistering expired endpoints; `auto` does it after each run.
    pub fn with_registry(mut self, registry: Arc<dyn SubscriberRegistry>, auto: bool) -> Self {
        self.registry = Some(registry);
        self.auto_deregister = auto;
        self
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn next_occurrence(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        deadline::next_occurrence(now, &self.schedule)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop the loop and cut short any fan-out in progress.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait until every run task has finished and recorded its report.
    pub async fn drain(&self) {
        // wait() only resolves once the tracker is closed
        self.runs.close();
        self.runs.wait().await;
        self.runs.reopen();
    }

    /// Does this tick hit the schedule?
    pub fn check_tick(&self, now: DateTime<Utc>) -> TickDecision {
        match deadline::due_occurrence(now, self.tolerance, &self.schedule) {
            Some(occurrence) if self.last_fired() == Some(occurrence) => {
                TickDecision::AlreadyFired { occurrence }
            }
            Some(occurrence) => TickDecision::Due { occurrence },
            None => TickDecision::NotDue {
                next: self.next_occurrence(now),
            },
        }
    }

    /// Periodic path. Only logs problems; returns the report when a run happened.
    pub async fn on_tick(&self, now: DateTime<Utc>) -> Option<RunReport> {
        let occurrence = match self.check_tick(now) {
            TickDecision::Due { occurrence } => occurrence,
            TickDecision::AlreadyFired { occurrence } => {
                tracing::debug!("Reminder for {} already sent", occurrence.to_rfc3339());
                return None;
            }
            TickDecision::NotDue { next } => {
                tracing::trace!("Tick {}: next reminder {}", now.to_rfc3339(), next.to_rfc3339());
                return None;
            }
        };

        tracing::info!("🔔 Weekly reminder due ({})", self.schedule);
        match self.execute(now, RunTrigger::Scheduled { occurrence }).await {
            Ok(report) => Some(report),
            Err(SnackBellError::ConcurrentRunRejected) => {
                tracing::warn!("⏭️ Tick dropped, a reminder run is already in progress");
                None
            }
            Err(e) => {
                tracing::error!("❌ Scheduled reminder run failed: {e}");
                None
            }
        }
    }

    /// Manual trigger: skips the schedule check, still honours the single-run guard.
    pub async fn run_reminders(self: &Arc<Self>, now: Option<DateTime<Utc>>) -> Result<RunReport> {
        self.run_manual(now, None).await
    }

    /// Manual trigger with the operator recorded in the report.
    ///
    /// The run happens on its own tracked task. Dropping the returned future
    /// only stops waiting for it; the run completes and lands in [`history`].
    ///
    /// [`history`]: ReminderScheduler::history
    pub async fn run_manual(
        self: &Arc<Self>,
        now: Option<DateTime<Utc>>,
        requested_by: Option<String>,
    ) -> Result<RunReport> {
        if let Some(who) = &requested_by {
            tracing::info!("👤 Manual reminder run requested by {who}");
        }
        let now = now.unwrap_or_else(Utc::now);
        let trigger = RunTrigger::Manual { requested_by };
        let scheduler = Arc::clone(self);
        self.runs
            .spawn(async move { scheduler.execute(now, trigger).await })
            .await
            .map_err(|e| SnackBellError::RunAborted(e.to_string()))?
    }

    async fn execute(&self, now: DateTime<Utc>, trigger: RunTrigger) -> Result<RunReport> {
        if self.shutdown.is_cancelled() {
            return Err(SnackBellError::Cancelled);
        }
        let Some(_guard) = RunGuard::acquire(&self.running) else {
            return Err(SnackBellError::ConcurrentRunRejected);
        };
        if let RunTrigger::Scheduled { occurrence } = &trigger {
            self.set_last_fired(*occurrence);
        }

        let clock = std::time::Instant::now();
        let period = deadline::selection_window(now, &self.schedule);

        let subscribers = self
            .eligibility
            .find_unselected(period.0, period.1)
            .await
            .map_err(|e| match e {
                SnackBellError::EligibilityQuery(_) => e,
                other => SnackBellError::EligibilityQuery(other.to_string()),
            })?;
        let eligible = subscribers.len();
        tracing::info!("🔍 Found {eligible} subscriber(s) without a selection");

        let payload = Arc::new(self.composer.compose(now));
        let fan_out = self
            .dispatcher
            .dispatch_all(subscribers, payload, &self.shutdown)
            .await;

        let report = RunReport::build(trigger, now, period, eligible, fan_out, clock.elapsed());
        tracing::info!(
            "📣 Reminder run {} done: {} delivered, {} expired, {} failed{}",
            report.run_id,
            report.delivered,
            report.expired,
            report.failed,
            if report.partial { " (partial)" } else { "" }
        );

        if self.auto_deregister && !report.expired_ids.is_empty() {
            if let Err(e) = self.deregister_expired(&report.expired_ids).await {
                tracing::warn!("⚠️ Failed to deregister expired endpoints: {e}");
            }
        }

        self.record(report.clone());
        Ok(report)
    }

    /// Clear the stored endpoints of the given subscribers. Returns how many were known.
    pub async fn deregister_expired(&self, subscriber_ids: &[String]) -> Result<usize> {
        let registry = self.registry.as_ref().ok_or_else(|| {
            SnackBellError::Config("no subscriber registry configured".into())
        })?;
        let mut removed = 0;
        for id in subscriber_ids {
            if registry.deregister_endpoint(id).await? {
                removed += 1;
            }
        }
        tracing::info!("🧹 Deregistered {removed} expired push endpoint(s)");
        Ok(removed)
    }

    /// Recent run reports, oldest first.
    pub fn history(&self) -> Vec<RunReport> {
        self.history
            .lock()
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn last_report(&self) -> Option<RunReport> {
        self.history.lock().ok().and_then(|h| h.back().cloned())
    }

    fn record(&self, report: RunReport) {
        if let Ok(mut history) = self.history.lock() {
            history.push_back(report);
            // Ring buffer: keep the last HISTORY_LIMIT
            while history.len() > HISTORY_LIMIT {
                history.pop_front();
            }
        }
    }

    fn last_fired(&self) -> Option<DateTime<Utc>> {
        self.last_fired.lock().ok().and_then(|g| *g)
    }

    fn set_last_fired(&self, occurrence: DateTime<Utc>) {
        if let Ok(mut last) = self.last_fired.lock() {
            *last = Some(occurrence);
        }
    }
}

/// Tick loop. Each tick runs on its own tracked task so a slow fan-out never
/// delays the next tick; overlapping ticks hit the run guard instead.
/// Returns when the scheduler is shut down and every in-flight run has
/// recorded its (possibly partial) report.
pub async fn spawn_scheduler(scheduler: Arc<ReminderScheduler>, tick_every: std::time::Duration) {
    tracing::info!(
        "⏰ Reminder scheduler started ({}, check every {}s, next {})",
        scheduler.schedule(),
        tick_every.as_secs(),
        scheduler.next_occurrence(Utc::now()).to_rfc3339()
    );

    let shutdown = scheduler.shutdown_token();
    let mut interval = tokio::time::interval(tick_every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                let ticked = Arc::clone(&scheduler);
                scheduler.runs.spawn(async move {
                    ticked.on_tick(Utc::now()).await;
                });
            }
        }
    }

    if !scheduler.runs.is_empty() {
        tracing::info!("⏳ Waiting for {} reminder task(s) to finish", scheduler.runs.len());
    }
    scheduler.drain().await;
    tracing::info!("🛑 Reminder scheduler stopped");
}
