use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry as MapEntry, DashMap};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::{
    error::{Result, SchedulerError},
    job::{Job, JobContext, JobError, JobHandler},
    schedule::{next_run_after, parse_schedule},
    types::{JobInfo, JobStatus, Trigger},
};

/// Polling cadence of the trigger loop.
const TICK: Duration = Duration::from_secs(1);

/// Mutable runtime state of a registered job.
struct RunState {
    next_run_at: Option<DateTime<Utc>>,
    last_run_at: Option<DateTime<Utc>>,
    last_status: JobStatus,
    last_error: Option<String>,
    run_count: u64,
}

/// A job admitted to the active registry.
struct Registered {
    /// Registration order, used to keep `get_jobs` stable.
    seq: u64,
    name: String,
    description: String,
    expression: String,
    schedule: cron::Schedule,
    handler: Arc<dyn JobHandler>,
    running: AtomicBool,
    state: Mutex<RunState>,
}

impl Registered {
    fn is_due(&self, now: DateTime<Utc>) -> bool {
        let state = self.state.lock().unwrap();
        state.next_run_at.is_some_and(|next| next <= now)
    }

    fn advance(&self, now: DateTime<Utc>) {
        let mut state = self.state.lock().unwrap();
        state.next_run_at = next_run_after(&self.schedule, now);
    }

    fn info(&self) -> JobInfo {
        let state = self.state.lock().unwrap();
        JobInfo {
            name: self.name.clone(),
            description: self.description.clone(),
            schedule: self.expression.clone(),
            enabled: true,
            next_run_at: state.next_run_at,
            last_run_at: state.last_run_at,
            last_status: state.last_status,
            last_error: state.last_error.clone(),
            run_count: state.run_count,
            running: self.running.load(Ordering::Acquire),
        }
    }
}

/// Holds a job's `running` flag for the lifetime of one execution.
struct RunningGuard(Arc<Registered>);

impl RunningGuard {
    fn acquire(job: &Arc<Registered>) -> Option<Self> {
        job.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(Arc::clone(job)))
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::Release);
    }
}

/// Result of awaiting a [`StopHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every in-flight execution finished before the timeout.
    Drained,
    /// The timeout elapsed; in-flight jobs were asked to cancel.
    TimedOut,
}

/// Returned by [`Scheduler::stop`]; await [`StopHandle::wait`] to drain.
#[must_use = "a StopHandle does nothing unless waited on"]
pub struct StopHandle {
    tracker: TaskTracker,
    job_cancel: CancellationToken,
    timeout: Duration,
}

impl StopHandle {
    /// Wait for in-flight executions, bounded by the drain timeout.
    pub async fn wait(self) -> DrainOutcome {
        match tokio::time::timeout(self.timeout, self.tracker.wait()).await {
            Ok(()) => {
                info!("scheduler drained");
                DrainOutcome::Drained
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    in_flight = self.tracker.len(),
                    "drain timeout elapsed, cancelling in-flight jobs"
                );
                self.job_cancel.cancel();
                DrainOutcome::TimedOut
            }
        }
    }
}

/// In-memory job registry plus the background trigger loop.
///
/// Every execution runs on its own tracked tokio task, so `stop` can drain
/// them and a manual run outlives a caller that stops waiting for it.
/// A job never runs twice concurrently: a trigger that fires while the
/// previous run is still going is skipped.
pub struct Scheduler {
    jobs: DashMap<String, Arc<Registered>>,
    seq: AtomicU64,
    started: AtomicBool,
    /// Stops the trigger loop and rejects new manual runs.
    shutdown: CancellationToken,
    /// Handed to every execution; fired only when draining times out.
    job_cancel: CancellationToken,
    tracker: TaskTracker,
    drain_timeout: Duration,
}

impl Scheduler {
    pub fn new(drain_timeout: Duration) -> Self {
        Self {
            jobs: DashMap::new(),
            seq: AtomicU64::new(0),
            started: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            job_cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            drain_timeout,
        }
    }

    /// Register a job.
    ///
    /// The schedule is parsed first; on failure nothing is registered.
    /// Disabled jobs are accepted and dropped: they never show up in
    /// [`Scheduler::get_jobs`] and never fire.
    pub fn add_job(&self, job: Job) -> Result<()> {
        let schedule = parse_schedule(&job.schedule)?;

        if !job.enabled {
            info!(job = %job.name, "job disabled, not scheduling");
            return Ok(());
        }

        let next_run_at = next_run_after(&schedule, Utc::now());
        match self.jobs.entry(job.name.clone()) {
            MapEntry::Occupied(_) => Err(SchedulerError::DuplicateJob { name: job.name }),
            MapEntry::Vacant(slot) => {
                info!(
                    job = %job.name,
                    schedule = %job.schedule,
                    next_run_at = ?next_run_at,
                    "job registered"
                );
                slot.insert(Arc::new(Registered {
                    seq: self.seq.fetch_add(1, Ordering::Relaxed),
                    name: job.name,
                    description: job.description,
                    expression: job.schedule,
                    schedule,
                    handler: job.handler,
                    running: AtomicBool::new(false),
                    state: Mutex::new(RunState {
                        next_run_at,
                        last_run_at: None,
                        last_status: JobStatus::Idle,
                        last_error: None,
                        run_count: 0,
                    }),
                }));
                Ok(())
            }
        }
    }

    /// Snapshot of every active job, in registration order.
    pub fn get_jobs(&self) -> Vec<JobInfo> {
        let mut jobs: Vec<Arc<Registered>> =
            self.jobs.iter().map(|e| Arc::clone(e.value())).collect();
        jobs.sort_by_key(|j| j.seq);
        jobs.iter().map(|j| j.info()).collect()
    }

    /// Run a job immediately and wait for it to finish.
    ///
    /// The run is not queued onto the schedule and does not move
    /// `next_run_at`. The job's own terminal error is returned as
    /// [`SchedulerError::JobFailed`].
    pub async fn run_job_now(&self, name: &str) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(SchedulerError::ShuttingDown);
        }

        let job = self
            .jobs
            .get(name)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| SchedulerError::JobNotFound {
                name: name.to_string(),
            })?;

        let guard = RunningGuard::acquire(&job).ok_or_else(|| {
            SchedulerError::JobAlreadyRunning {
                name: name.to_string(),
            }
        })?;

        // Owned by the tracker, so dropping the caller does not abort the run.
        let result = match self.spawn_execution(job, Trigger::Manual, guard).await {
            Ok(result) => result,
            Err(e) => Err(JobError::Failed(anyhow::Error::new(e))),
        };

        result.map_err(|source| SchedulerError::JobFailed {
            name: name.to_string(),
            source,
        })
    }

    /// Spawn the trigger loop. Calling it again is a no-op.
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::AcqRel) {
            warn!("scheduler already started");
            return;
        }
        let this = Arc::clone(self);
        self.tracker.spawn(async move { this.run().await });
    }

    /// Stop firing new runs and return a handle that drains in-flight ones.
    pub fn stop(&self) -> StopHandle {
        info!(jobs = self.jobs.len(), "scheduler stopping");
        self.shutdown.cancel();
        self.tracker.close();
        StopHandle {
            tracker: self.tracker.clone(),
            job_cancel: self.job_cancel.clone(),
            timeout: self.drain_timeout,
        }
    }

    async fn run(&self) {
        info!(jobs = self.jobs.len(), "scheduler started");
        let mut interval = tokio::time::interval(TICK);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => self.tick(Utc::now()),
                _ = self.shutdown.cancelled() => {
                    info!("scheduler loop shutting down");
                    break;
                }
            }
        }
    }

    /// Spawn every job whose `next_run_at` is at or before `now`.
    fn tick(&self, now: DateTime<Utc>) {
        let due: Vec<Arc<Registered>> = self
            .jobs
            .iter()
            .filter(|e| e.value().is_due(now))
            .map(|e| Arc::clone(e.value()))
            .collect();

        for job in due {
            // Advance first so a slow run cannot fire twice for one slot.
            job.advance(now);

            let Some(guard) = RunningGuard::acquire(&job) else {
                warn!(job = %job.name, "previous run still in progress, skipping trigger");
                continue;
            };

            // Outcome is recorded on the job state.
            drop(self.spawn_execution(job, Trigger::Scheduled, guard));
        }
    }

    /// Run one execution on its own tracked task. The `running` guard is
    /// released once the outcome, including a panic, is recorded.
    fn spawn_execution(
        &self,
        job: Arc<Registered>,
        trigger: Trigger,
        guard: RunningGuard,
    ) -> JoinHandle<std::result::Result<(), JobError>> {
        let run = self.tracker.spawn(execute(
            Arc::clone(&job),
            trigger,
            self.job_cancel.clone(),
        ));
        self.tracker.spawn(async move {
            let result = match run.await {
                Ok(result) => result,
                Err(e) => Err(record_panic(&job, e)),
            };
            drop(guard);
            result
        })
    }
}

/// Record a handler that panicked (or was aborted) as a failed run.
fn record_panic(job: &Registered, join_error: JoinError) -> JobError {
    let mut state = job.state.lock().unwrap();
    state.run_count += 1;
    state.last_status = JobStatus::Failed;
    state.last_error = Some(format!("job panicked: {join_error}"));
    error!(job = %job.name, error = %join_error, "job panicked");
    JobError::Failed(anyhow::anyhow!("job panicked: {join_error}"))
}

/// Run one execution and record its outcome on the job state.
async fn execute(
    job: Arc<Registered>,
    trigger: Trigger,
    cancel: CancellationToken,
) -> std::result::Result<(), JobError> {
    let ctx = JobContext::new(&job.name, trigger, cancel.child_token());
    let started_at = Utc::now();
    {
        let mut state = job.state.lock().unwrap();
        state.last_run_at = Some(started_at);
        state.last_status = JobStatus::Running;
    }

    info!(job = %job.name, run_id = %ctx.run_id, %trigger, "job started");
    let result = job.handler.execute(&ctx).await;
    let elapsed_ms = (Utc::now() - started_at).num_milliseconds();

    let mut state = job.state.lock().unwrap();
    state.run_count += 1;
    match &result {
        Ok(()) => {
            state.last_status = JobStatus::Succeeded;
            state.last_error = None;
            info!(job = %job.name, run_id = %ctx.run_id, elapsed_ms, "job succeeded");
        }
        Err(JobError::Cancelled) => {
            state.last_status = JobStatus::Cancelled;
            state.last_error = Some(JobError::Cancelled.to_string());
            warn!(job = %job.name, run_id = %ctx.run_id, elapsed_ms, "job cancelled");
        }
        Err(e) => {
            state.last_status = JobStatus::Failed;
            state.last_error = Some(format!("{e:#}"));
            error!(job = %job.name, run_id = %ctx.run_id, elapsed_ms, error = %e, "job failed");
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::job_fn;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    fn scheduler() -> Arc<Scheduler> {
        Arc::new(Scheduler::new(Duration::from_secs(5)))
    }

    fn noop_job(name: &str, schedule: &str) -> Job {
        Job::new(name, schedule, job_fn(|_ctx| async { Ok(()) }))
            .with_description(&format!("{name} description"))
    }

    #[test]
    fn get_jobs_lists_every_enabled_job_in_order() {
        let s = scheduler();
        s.add_job(noop_job("generate", "0 3 * * *")).unwrap();
        s.add_job(noop_job("cleanup", "0 4 * * Sun")).unwrap();
        s.add_job(noop_job("warmup", "*/5 * * * *")).unwrap();

        let jobs = s.get_jobs();
        let names: Vec<_> = jobs.iter().map(|j| j.name.as_str()).collect();
        assert_eq!(names, ["generate", "cleanup", "warmup"]);
        assert_eq!(jobs[1].description, "cleanup description");
        assert_eq!(jobs[1].schedule, "0 4 * * Sun");
        assert!(jobs.iter().all(|j| j.enabled && j.next_run_at.is_some()));
        assert!(jobs.iter().all(|j| j.last_status == JobStatus::Idle));
    }

    #[test]
    fn disabled_job_is_accepted_but_not_listed() {
        let s = scheduler();
        s.add_job(noop_job("off", "0 3 * * *").with_enabled(false))
            .unwrap();
        assert!(s.get_jobs().is_empty());
    }

    #[test]
    fn invalid_schedule_leaves_registry_unchanged() {
        let s = scheduler();
        s.add_job(noop_job("ok", "0 3 * * *")).unwrap();
        let before = s.get_jobs().len();

        let err = s.add_job(noop_job("bad", "every tuesday")).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidSchedule { .. }));
        assert_eq!(s.get_jobs().len(), before);
    }

    #[test]
    fn invalid_schedule_is_rejected_even_when_disabled() {
        let s = scheduler();
        let err = s
            .add_job(noop_job("bad", "nope").with_enabled(false))
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidSchedule { .. }));
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let s = scheduler();
        s.add_job(noop_job("generate", "0 3 * * *")).unwrap();
        let err = s.add_job(noop_job("generate", "0 5 * * *")).unwrap_err();
        assert!(matches!(err, SchedulerError::DuplicateJob { .. }));
        assert_eq!(s.get_jobs()[0].schedule, "0 3 * * *");
    }

    #[tokio::test]
    async fn run_unknown_job_returns_not_found() {
        let s = scheduler();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        s.add_job(Job::new(
            "known",
            "0 3 * * *",
            job_fn(move |_ctx| {
                let flag = Arc::clone(&flag);
                async move {
                    flag.store(true, Ordering::SeqCst);
                    Ok(())
                }
            }),
        ))
        .unwrap();

        let err = s.run_job_now("unregistered-name").await.unwrap_err();
        assert!(matches!(err, SchedulerError::JobNotFound { .. }));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn run_known_job_executes_once_synchronously() {
        let s = scheduler();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        s.add_job(Job::new(
            "known",
            "0 3 * * *",
            job_fn(move |_ctx| {
                let counter = Arc::clone(&counter);
                async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        ))
        .unwrap();
        let next_before = s.get_jobs()[0].next_run_at;

        s.run_job_now("known").await.unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        let info = &s.get_jobs()[0];
        assert_eq!(info.last_status, JobStatus::Succeeded);
        assert_eq!(info.run_count, 1);
        assert!(info.last_run_at.is_some());
        assert!(!info.running);
        assert_eq!(info.next_run_at, next_before);
    }

    #[tokio::test]
    async fn failing_job_is_recorded_and_surfaced() {
        let s = scheduler();
        s.add_job(Job::new(
            "broken",
            "0 3 * * *",
            job_fn(|_ctx| async {
                Err(JobError::Failed(anyhow::anyhow!("purge failed: disk full")))
            }),
        ))
        .unwrap();

        let err = s.run_job_now("broken").await.unwrap_err();
        assert!(matches!(err, SchedulerError::JobFailed { .. }));

        let info = &s.get_jobs()[0];
        assert_eq!(info.last_status, JobStatus::Failed);
        assert!(info.last_error.as_deref().unwrap().contains("disk full"));
    }

    #[tokio::test]
    async fn overlapping_manual_run_is_rejected() {
        let s = scheduler();
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let (st, rl) = (Arc::clone(&started), Arc::clone(&release));
        s.add_job(Job::new(
            "slow",
            "0 3 * * *",
            job_fn(move |_ctx| {
                let (st, rl) = (Arc::clone(&st), Arc::clone(&rl));
                async move {
                    st.notify_one();
                    rl.notified().await;
                    Ok(())
                }
            }),
        ))
        .unwrap();

        let first = {
            let s = Arc::clone(&s);
            tokio::spawn(async move { s.run_job_now("slow").await })
        };
        started.notified().await;
        assert!(s.get_jobs()[0].running);

        let err = s.run_job_now("slow").await.unwrap_err();
        assert!(matches!(err, SchedulerError::JobAlreadyRunning { .. }));

        release.notify_one();
        first.await.unwrap().unwrap();
        assert_eq!(s.get_jobs()[0].run_count, 1);
    }

    #[tokio::test]
    async fn manual_run_survives_dropped_caller() {
        let s = scheduler();
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let (st, rl) = (Arc::clone(&started), Arc::clone(&release));
        s.add_job(Job::new(
            "slow",
            "0 3 * * *",
            job_fn(move |_ctx| {
                let (st, rl) = (Arc::clone(&st), Arc::clone(&rl));
                async move {
                    st.notify_one();
                    rl.notified().await;
                    Ok(())
                }
            }),
        ))
        .unwrap();

        let caller = {
            let s = Arc::clone(&s);
            tokio::spawn(async move { s.run_job_now("slow").await })
        };
        started.notified().await;
        caller.abort();
        assert!(caller.await.unwrap_err().is_cancelled());

        // the run keeps its slot until it actually finishes
        let info = &s.get_jobs()[0];
        assert!(info.running);
        assert_eq!(info.last_status, JobStatus::Running);

        release.notify_one();
        assert_eq!(s.stop().wait().await, DrainOutcome::Drained);
        let info = &s.get_jobs()[0];
        assert!(!info.running);
        assert_eq!(info.last_status, JobStatus::Succeeded);
        assert_eq!(info.run_count, 1);
    }

    #[tokio::test]
    async fn panicking_job_is_recorded_as_failed() {
        let s = scheduler();
        s.add_job(Job::new(
            "explodes",
            "0 3 * * *",
            job_fn(|ctx| async move {
                if !ctx.is_cancelled() {
                    panic!("boom");
                }
                Ok(())
            }),
        ))
        .unwrap();

        let err = s.run_job_now("explodes").await.unwrap_err();
        assert!(matches!(err, SchedulerError::JobFailed { .. }));

        let info = &s.get_jobs()[0];
        assert!(!info.running);
        assert_eq!(info.last_status, JobStatus::Failed);
        assert_eq!(info.run_count, 1);
        assert!(info.last_error.as_deref().unwrap().contains("panicked"));

        // the slot is free again
        let err = s.run_job_now("explodes").await.unwrap_err();
        assert!(matches!(err, SchedulerError::JobFailed { .. }));
        assert_eq!(s.get_jobs()[0].run_count, 2);
    }

    #[tokio::test]
    async fn tick_fires_due_jobs_and_skips_overlaps() {
        let s = scheduler();
        let count = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Notify::new());
        let (counter, rl) = (Arc::clone(&count), Arc::clone(&release));
        s.add_job(Job::new(
            "minutely",
            "* * * * *",
            job_fn(move |_ctx| {
                let (counter, rl) = (Arc::clone(&counter), Arc::clone(&rl));
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    rl.notified().await;
                    Ok(())
                }
            }),
        ))
        .unwrap();

        let later = Utc::now() + chrono::Duration::minutes(2);
        s.tick(later);
        // let the spawned run start
        while count.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        let next = s.get_jobs()[0].next_run_at.unwrap();
        assert!(next > later);

        // due again, but the first run is still holding the slot
        s.tick(later + chrono::Duration::minutes(5));
        tokio::task::yield_now().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        release.notify_one();
        assert_eq!(s.stop().wait().await, DrainOutcome::Drained);
        assert_eq!(s.get_jobs()[0].last_status, JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn stop_without_jobs_completes_quickly() {
        let s = scheduler();
        s.start();
        let outcome = tokio::time::timeout(Duration::from_secs(2), s.stop().wait())
            .await
            .expect("stop handle should complete");
        assert_eq!(outcome, DrainOutcome::Drained);
    }

    #[tokio::test]
    async fn stop_waits_for_in_flight_manual_run() {
        let s = scheduler();
        let started = Arc::new(Notify::new());
        let finished = Arc::new(AtomicBool::new(false));
        let (st, done) = (Arc::clone(&started), Arc::clone(&finished));
        s.add_job(Job::new(
            "slow",
            "0 3 * * *",
            job_fn(move |_ctx| {
                let (st, done) = (Arc::clone(&st), Arc::clone(&done));
                async move {
                    st.notify_one();
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    done.store(true, Ordering::SeqCst);
                    Ok(())
                }
            }),
        ))
        .unwrap();
        s.start();

        let manual = {
            let s = Arc::clone(&s);
            tokio::spawn(async move { s.run_job_now("slow").await })
        };
        started.notified().await;

        let outcome = s.stop().wait().await;
        assert_eq!(outcome, DrainOutcome::Drained);
        assert!(finished.load(Ordering::SeqCst));
        manual.await.unwrap().unwrap();

        let err = s.run_job_now("slow").await.unwrap_err();
        assert!(matches!(err, SchedulerError::ShuttingDown));
    }

    #[tokio::test]
    async fn drain_timeout_cancels_in_flight_jobs() {
        let s = Arc::new(Scheduler::new(Duration::from_millis(50)));
        let started = Arc::new(Notify::new());
        let st = Arc::clone(&started);
        s.add_job(Job::new(
            "stubborn",
            "0 3 * * *",
            job_fn(move |ctx| {
                let st = Arc::clone(&st);
                async move {
                    st.notify_one();
                    ctx.cancelled().await;
                    Err(JobError::Cancelled)
                }
            }),
        ))
        .unwrap();

        let manual = {
            let s = Arc::clone(&s);
            tokio::spawn(async move { s.run_job_now("stubborn").await })
        };
        started.notified().await;

        assert_eq!(s.stop().wait().await, DrainOutcome::TimedOut);
        let err = manual.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::JobFailed {
                source: JobError::Cancelled,
                ..
            }
        ));
        assert_eq!(s.get_jobs()[0].last_status, JobStatus::Cancelled);
    }
}
