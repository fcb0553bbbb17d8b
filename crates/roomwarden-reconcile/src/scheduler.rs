//! Reconciliation scheduler — one periodic tokio task per scan job.
//!
//! Architecture:
//! - Each registered job gets its own task driven by `tokio::time::interval`
//!   at the interval the job reported at registration
//! - Missed ticks are skipped, and a job's task awaits each run before the
//!   next tick, so one job never overlaps with itself
//! - Every run is spawned and its `JoinHandle` awaited: errors and panics
//!   stop at that boundary and land in the job's `JobState`
//! - `stop()` flips a watch channel; tasks exit at their next wait point

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use roomwarden_core::Clock;

use crate::scan::ScanError;
use crate::types::{JobState, JobStatus, ScanReport};

// ─────────────────────────────────────────────
// ScanJob trait
// ─────────────────────────────────────────────

/// A unit of periodic work the scheduler can drive.
#[async_trait]
pub trait ScanJob: Send + Sync {
    /// Unique job name (e.g. "room-instance-scan").
    fn name(&self) -> &str;

    /// Period between runs. Read once, at registration.
    fn interval(&self) -> Duration;

    async fn run(&self) -> Result<ScanReport, ScanError>;
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("unknown job '{0}'")]
    UnknownJob(String),
}

// ─────────────────────────────────────────────
// Job slots
// ─────────────────────────────────────────────

struct JobSlot {
    name: String,
    interval: Duration,
    job: Arc<dyn ScanJob>,
    state: Mutex<JobState>,
    running: AtomicBool,
}

/// Clears the running flag when a run ends, however it ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl JobSlot {
    /// Run the job once through the failure boundary.
    async fn execute(&self, clock: &dyn Clock) -> JobState {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!(job = %self.name, "job still running, invocation skipped");
            let mut state = self.state.lock().await;
            state.last_status = Some(JobStatus::Skipped);
            state.last_run_at = Some(clock.now());
            return state.clone();
        }
        let _guard = RunningGuard(&self.running);

        debug!(job = %self.name, "executing job");
        let job = self.job.clone();
        let result = tokio::spawn(async move { job.run().await }).await;

        let mut state = self.state.lock().await;
        state.last_run_at = Some(clock.now());
        state.runs += 1;

        match result {
            Ok(Ok(report)) => {
                state.last_status = Some(JobStatus::Ok);
                state.last_error = None;
                state.last_report = Some(report);
            }
            Ok(Err(e)) => {
                error!(job = %self.name, error = %e, "job failed");
                state.last_status = Some(JobStatus::Error);
                state.last_error = Some(e.to_string());
            }
            Err(join_err) => {
                let message = if join_err.is_panic() {
                    format!("panicked: {}", panic_message(join_err.into_panic()))
                } else {
                    "cancelled".to_string()
                };
                error!(job = %self.name, error = %message, "job aborted");
                state.last_status = Some(JobStatus::Error);
                state.last_error = Some(message);
            }
        }
        state.clone()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ─────────────────────────────────────────────
// Scheduler
// ─────────────────────────────────────────────

/// Owns the periodic job tasks.
pub struct Scheduler {
    slots: Vec<Arc<JobSlot>>,
    clock: Arc<dyn Clock>,
    /// `true` once stop was requested.
    stop_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            slots: Vec::new(),
            clock,
            stop_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Register a job. A job with the same name is replaced.
    pub fn register(&mut self, job: Arc<dyn ScanJob>) {
        let name = job.name().to_string();
        let interval = job.interval();
        if let Some(pos) = self.slots.iter().position(|s| s.name == name) {
            warn!(job = %name, "replacing job with the same name");
            self.slots.remove(pos);
        }
        info!(job = %name, interval_s = interval.as_secs(), "registered job");
        self.slots.push(Arc::new(JobSlot {
            name,
            interval,
            job,
            state: Mutex::new(JobState::default()),
            running: AtomicBool::new(false),
        }));
    }

    /// Registered job names, in registration order.
    pub fn job_names(&self) -> Vec<String> {
        self.slots.iter().map(|s| s.name.clone()).collect()
    }

    pub fn interval_of(&self, name: &str) -> Option<Duration> {
        self.slot(name).map(|s| s.interval)
    }

    fn slot(&self, name: &str) -> Option<&Arc<JobSlot>> {
        self.slots.iter().find(|s| s.name == name)
    }

    /// Spawn one task per job. The first run of each job happens at once.
    pub async fn start(&self) {
        let mut handles = self.handles.lock().await;
        if !handles.is_empty() {
            warn!("scheduler already started");
            return;
        }

        for slot in &self.slots {
            let slot = slot.clone();
            let clock = self.clock.clone();
            let stop_rx = self.stop_tx.subscribe();
            handles.push(tokio::spawn(job_loop(slot, clock, stop_rx)));
        }
        info!(jobs = handles.len(), "scheduler started");
    }

    /// Run a job right now through the same failure boundary.
    ///
    /// Returns `Skipped` state if the job is already running.
    pub async fn run_now(&self, name: &str) -> Result<JobState, SchedulerError> {
        let slot = self
            .slot(name)
            .ok_or_else(|| SchedulerError::UnknownJob(name.to_string()))?;
        Ok(slot.execute(self.clock.as_ref()).await)
    }

    pub async fn state(&self, name: &str) -> Option<JobState> {
        let slot = self.slot(name)?;
        let state = slot.state.lock().await.clone();
        Some(state)
    }

    /// Every job's state, in registration order.
    pub async fn states(&self) -> Vec<(String, JobState)> {
        let mut out = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            out.push((slot.name.clone(), slot.state.lock().await.clone()));
        }
        out
    }

    /// Signal every job task to exit and wait for them.
    ///
    /// A run in progress finishes (and commits) before its task exits.
    pub async fn stop(&self) {
        info!("stopping scheduler");
        self.stop_tx.send_replace(true);

        let handles: Vec<JoinHandle<()>> = self.handles.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "job task ended abnormally");
            }
        }
    }
}

/// Periodic loop for one job.
async fn job_loop(slot: Arc<JobSlot>, clock: Arc<dyn Clock>, mut stop_rx: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(slot.interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        if *stop_rx.borrow() {
            break;
        }
        tokio::select! {
            _ = ticker.tick() => {
                let state = slot.execute(clock.as_ref()).await;
                if let Some(report) = state.last_report.filter(|_| state.last_status == Some(JobStatus::Ok)) {
                    debug!(job = %slot.name, report = %report, "job run finished");
                }
            }
            changed = stop_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    debug!(job = %slot.name, "job task exited");
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use roomwarden_core::{ManualClock, RegistryError};
    use std::sync::atomic::AtomicUsize;

    #[derive(Clone, Copy)]
    enum Behaviour {
        Succeed,
        Fail,
        Panic,
        Sleep(Duration),
    }

    struct TestJob {
        name: &'static str,
        interval: Duration,
        behaviour: Behaviour,
        runs: Arc<AtomicUsize>,
        active: Arc<AtomicUsize>,
        max_active: Arc<AtomicUsize>,
    }

    impl TestJob {
        fn new(name: &'static str, secs: u64, behaviour: Behaviour) -> Self {
            Self {
                name,
                interval: Duration::from_secs(secs),
                behaviour,
                runs: Arc::new(AtomicUsize::new(0)),
                active: Arc::new(AtomicUsize::new(0)),
                max_active: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl ScanJob for TestJob {
        fn name(&self) -> &str {
            self.name
        }

        fn interval(&self) -> Duration {
            self.interval
        }

        async fn run(&self) -> Result<ScanReport, ScanError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now_active, Ordering::SeqCst);

            let result = match self.behaviour {
                Behaviour::Succeed => Ok(ScanReport {
                    seen: 1,
                    ..Default::default()
                }),
                Behaviour::Fail => Err(ScanError::Commit(RegistryError::Invalid("disk full".into()))),
                Behaviour::Panic => {
                    self.active.fetch_sub(1, Ordering::SeqCst);
                    panic!("job exploded")
                }
                Behaviour::Sleep(d) => {
                    tokio::time::sleep(d).await;
                    Ok(ScanReport::default())
                }
            };
            self.active.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    fn scheduler() -> Scheduler {
        Scheduler::new(Arc::new(ManualClock::new(chrono::Utc::now())))
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_runs_on_interval() {
        let job = TestJob::new("tick", 60, Behaviour::Succeed);
        let runs = job.runs.clone();
        let mut sched = scheduler();
        sched.register(Arc::new(job));
        sched.start().await;

        tokio::time::sleep(Duration::from_secs(125)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);

        let state = sched.state("tick").await.unwrap();
        assert_eq!(state.runs, 3);
        assert_eq!(state.last_status, Some(JobStatus::Ok));
        assert_eq!(state.last_report.unwrap().seen, 1);
        sched.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_recorded_and_scheduling_continues() {
        let job = TestJob::new("failing", 10, Behaviour::Fail);
        let runs = job.runs.clone();
        let mut sched = scheduler();
        sched.register(Arc::new(job));
        sched.start().await;

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);

        let state = sched.state("failing").await.unwrap();
        assert_eq!(state.last_status, Some(JobStatus::Error));
        assert!(state.last_error.unwrap().contains("disk full"));
        sched.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_is_contained() {
        let job = TestJob::new("panicky", 10, Behaviour::Panic);
        let runs = job.runs.clone();
        let mut sched = scheduler();
        sched.register(Arc::new(job));
        sched.start().await;

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        let state = sched.state("panicky").await.unwrap();
        assert_eq!(state.last_status, Some(JobStatus::Error));
        assert!(state.last_error.unwrap().contains("job exploded"));
        sched.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_job_never_overlaps() {
        let job = TestJob::new("slow", 10, Behaviour::Sleep(Duration::from_secs(35)));
        let max_active = job.max_active.clone();
        let runs = job.runs.clone();
        let mut sched = scheduler();
        sched.register(Arc::new(job));
        sched.start().await;

        tokio::time::sleep(Duration::from_secs(200)).await;
        assert_eq!(max_active.load(Ordering::SeqCst), 1);
        assert!(runs.load(Ordering::SeqCst) >= 2);
        sched.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_now_skips_when_running() {
        let mut sched = scheduler();
        sched.register(Arc::new(TestJob::new("slow", 3600, Behaviour::Sleep(Duration::from_secs(30)))));
        let sched = Arc::new(sched);

        let first = {
            let sched = sched.clone();
            tokio::spawn(async move { sched.run_now("slow").await })
        };
        tokio::task::yield_now().await;

        let second = sched.run_now("slow").await.unwrap();
        assert_eq!(second.last_status, Some(JobStatus::Skipped));

        let first = first.await.unwrap().unwrap();
        assert_eq!(first.last_status, Some(JobStatus::Ok));
        assert_eq!(first.runs, 1);
    }

    #[tokio::test]
    async fn test_run_now_unknown_job() {
        let sched = scheduler();
        assert!(matches!(
            sched.run_now("nope").await,
            Err(SchedulerError::UnknownJob(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_jobs_run_independently() {
        let fast = TestJob::new("fast", 10, Behaviour::Succeed);
        let slow = TestJob::new("slow", 100, Behaviour::Succeed);
        let (fast_runs, slow_runs) = (fast.runs.clone(), slow.runs.clone());
        let mut sched = scheduler();
        sched.register(Arc::new(fast));
        sched.register(Arc::new(slow));
        sched.start().await;

        tokio::time::sleep(Duration::from_secs(55)).await;
        assert_eq!(fast_runs.load(Ordering::SeqCst), 6);
        assert_eq!(slow_runs.load(Ordering::SeqCst), 1);
        assert_eq!(sched.job_names(), vec!["fast", "slow"]);
        sched.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_tasks() {
        let job = TestJob::new("tick", 10, Behaviour::Succeed);
        let runs = job.runs.clone();
        let mut sched = scheduler();
        sched.register(Arc::new(job));
        sched.start().await;

        tokio::time::sleep(Duration::from_secs(5)).await;
        sched.stop().await;
        let after_stop = runs.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(runs.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn test_register_replaces_same_name() {
        let mut sched = scheduler();
        sched.register(Arc::new(TestJob::new("a", 10, Behaviour::Succeed)));
        sched.register(Arc::new(TestJob::new("a", 20, Behaviour::Succeed)));
        assert_eq!(sched.job_names(), vec!["a"]);
        assert_eq!(sched.interval_of("a"), Some(Duration::from_secs(20)));
    }
}
