use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration as StdDuration;

use lunacron_core::config::{SchedulerConfig, DEFAULT_TIMER_SLICE_SECS};
use lunacron_core::{LunarPhase, MeeusOracle, PhaseOracle, SYNODIC_MONTH_MS};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use crate::{
    clock::{Clock, SystemClock},
    error::{Result, SchedulerError},
    schedule::compute_next_execution,
    timer::{self, TimerHandle},
    types::{Job, JobCallback, JobRequest, JobSnapshot},
};

/// Lunar-phase job scheduler.
///
/// Keeps every registered job sorted by its next execution instant and holds
/// at most one live timer, armed for the earliest job. When that timer fires
/// the job's callback runs, finished jobs are pruned, the fired job is
/// rescheduled and the timer is armed again for whichever job is now first.
///
/// `Scheduler` is a cheap handle; clones share the same registry. Callbacks
/// run without the internal lock held, so they may call back into the
/// scheduler (register, remove, stop, …).
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    oracle: Arc<dyn PhaseOracle>,
    clock: Arc<dyn Clock>,
    timer_slice: StdDuration,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    jobs: Vec<Job>,
    active: bool,
    /// Set while a callback runs; arming is deferred to the end of the fire.
    firing: bool,
    timer: Option<ArmedTimer>,
    runtime: Option<Handle>,
    next_job_id: u64,
    next_token: u64,
}

struct ArmedTimer {
    /// Distinguishes this timer from earlier, cancelled ones whose task may
    /// still wake up.
    token: u64,
    job_id: u64,
    handle: TimerHandle,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(timer) = state.timer.take() {
            timer.handle.cancel();
        }
    }
}

/// Builder for [`Scheduler`]. Defaults: [`MeeusOracle`], [`SystemClock`],
/// one-day timer slices.
pub struct SchedulerBuilder {
    oracle: Arc<dyn PhaseOracle>,
    clock: Arc<dyn Clock>,
    timer_slice: StdDuration,
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self {
            oracle: Arc::new(MeeusOracle::new()),
            clock: Arc::new(SystemClock),
            timer_slice: StdDuration::from_secs(DEFAULT_TIMER_SLICE_SECS),
        }
    }
}

impl SchedulerBuilder {
    pub fn oracle(mut self, oracle: impl PhaseOracle + 'static) -> Self {
        self.oracle = Arc::new(oracle);
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Longest single sleep of the underlying timer.
    pub fn timer_slice(mut self, slice: StdDuration) -> Self {
        self.timer_slice = slice;
        self
    }

    /// Apply the `[scheduler]` section of the daemon config.
    pub fn config(self, config: &SchedulerConfig) -> Self {
        self.timer_slice(StdDuration::from_secs(config.timer_slice_secs))
    }

    pub fn build(self) -> Scheduler {
        Scheduler {
            inner: Arc::new(Inner {
                oracle: self.oracle,
                clock: self.clock,
                timer_slice: self.timer_slice,
                state: Mutex::new(State::default()),
            }),
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::default()
    }

    /// Begin dispatching. Must be called from within a Tokio runtime; the
    /// runtime is remembered and used for every timer this scheduler arms.
    ///
    /// Calling `start` on a running scheduler is a no-op.
    pub fn start(&self) {
        let mut state = self.state();
        if state.runtime.is_none() {
            match Handle::try_current() {
                Ok(handle) => state.runtime = Some(handle),
                Err(_) => {
                    error!("scheduler start requested outside a Tokio runtime; staying idle");
                    return;
                }
            }
        }
        if !state.active {
            info!(jobs = state.jobs.len(), "scheduler started");
        }
        state.active = true;
        self.arm(&mut state);
    }

    /// Halt dispatching. Registered jobs are kept; a callback already
    /// running is not interrupted. Idempotent.
    pub fn stop(&self) {
        let mut state = self.state();
        if let Some(timer) = state.timer.take() {
            timer.handle.cancel();
        }
        if state.active {
            info!("scheduler stopped");
        }
        state.active = false;
    }

    /// Stop and drop every registered job without firing any of them.
    pub fn shutdown(&self) {
        self.stop();
        let mut state = self.state();
        let dropped = state.jobs.len();
        state.jobs.clear();
        info!(dropped, "scheduler shut down");
    }

    /// Register a job, replacing any job with the same (case-insensitive) name.
    ///
    /// Returns `Ok(None)` without touching the registry when the phase name
    /// is not recognised; that case is logged rather than returned as an
    /// error so a typo cannot take down a long-running process.
    pub fn register(&self, request: JobRequest) -> Result<Option<JobSnapshot>> {
        let name = normalize_name(&request.name);
        if name.is_empty() {
            return Err(SchedulerError::MissingArgument("name"));
        }
        if request.phase.trim().is_empty() {
            return Err(SchedulerError::MissingArgument("phase"));
        }

        let phase: LunarPhase = match request.phase.parse() {
            Ok(phase) => phase,
            Err(e) => {
                warn!(job = %name, "job not registered: {e}");
                return Ok(None);
            }
        };

        let offset_ms = request.offset.num_milliseconds();
        if offset_ms <= -SYNODIC_MONTH_MS {
            return Err(SchedulerError::OffsetOutOfRange {
                offset_ms,
                floor_ms: -SYNODIC_MONTH_MS,
            });
        }

        // Computed before touching the registry so a rejected replacement
        // leaves the existing job in place.
        let now = self.inner.clock.now();
        let next_execution =
            compute_next_execution(self.inner.oracle.as_ref(), now, phase, request.offset)
                .ok_or(SchedulerError::ExecutionOutOfRange { offset_ms })?;

        let mut state = self.state();
        if self.remove_locked(&mut state, &name).is_some() {
            debug!(job = %name, "replacing existing job");
        }

        let id = state.next_job_id;
        state.next_job_id += 1;
        let job = Job {
            id,
            name,
            phase,
            offset: request.offset,
            repeat: request.repeat,
            executed_count: 0,
            next_execution,
            registered_at: now,
            last_executed_at: None,
            callback: request.callback,
        };
        let snapshot = job.snapshot();
        state.jobs.push(job);
        sort_jobs(&mut state.jobs);

        info!(
            job = %snapshot.name,
            %phase,
            offset_ms,
            repeat = i64::from(snapshot.repeat),
            next = %next_execution,
            "job registered"
        );

        // The new job may now be earlier than the one the timer is waiting for.
        let armed_is_stale = match (&state.timer, state.jobs.first()) {
            (Some(timer), Some(first)) => timer.job_id != first.id,
            _ => false,
        };
        if armed_is_stale {
            if let Some(timer) = state.timer.take() {
                timer.handle.cancel();
            }
        }
        self.arm(&mut state);

        Ok(Some(snapshot))
    }

    /// Remove a job by name. Returns `false` if no such job exists.
    ///
    /// Removing the job the timer is armed for cancels that timer and arms
    /// one for the next job straight away.
    pub fn remove(&self, name: &str) -> bool {
        let name = normalize_name(name);
        let mut state = self.state();
        match self.remove_locked(&mut state, &name) {
            Some(job) => {
                info!(job = %job.name, runs = job.executed_count, "job removed");
                self.arm(&mut state);
                true
            }
            None => false,
        }
    }

    /// Copies of every registered job, earliest first.
    pub fn list_scheduled(&self) -> Vec<JobSnapshot> {
        self.state().jobs.iter().map(Job::snapshot).collect()
    }

    pub fn get(&self, name: &str) -> Option<JobSnapshot> {
        let name = normalize_name(name);
        self.state()
            .jobs
            .iter()
            .find(|j| j.name == name)
            .map(Job::snapshot)
    }

    pub fn is_active(&self) -> bool {
        self.state().active
    }

    /// True while a timer is outstanding.
    pub fn is_armed(&self) -> bool {
        self.state().timer.is_some()
    }

    /// Name of the job the live timer is armed for.
    pub fn armed_job(&self) -> Option<String> {
        let state = self.state();
        let timer = state.timer.as_ref()?;
        state
            .jobs
            .iter()
            .find(|j| j.id == timer.job_id)
            .map(|j| j.name.clone())
    }

    // --- private helpers ---------------------------------------------------

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take `name` out of the registry, cancelling the timer if it was armed
    /// for that job. The caller decides when to re-arm.
    fn remove_locked(&self, state: &mut State, name: &str) -> Option<Job> {
        let pos = state.jobs.iter().position(|j| j.name == name)?;
        let job = state.jobs.remove(pos);
        if state.timer.as_ref().is_some_and(|t| t.job_id == job.id) {
            if let Some(timer) = state.timer.take() {
                timer.handle.cancel();
                debug!(job = %job.name, "armed timer cancelled");
            }
        }
        Some(job)
    }

    /// Arm a timer for the earliest job, unless inactive, firing, already
    /// armed, or empty.
    fn arm(&self, state: &mut State) {
        if !state.active || state.firing || state.timer.is_some() {
            return;
        }
        let Some(runtime) = state.runtime.clone() else {
            return;
        };
        sort_jobs(&mut state.jobs);
        let Some(first) = state.jobs.first() else {
            debug!("no jobs to arm");
            return;
        };

        let job_id = first.id;
        let at = first.next_execution;
        let delay = (at - self.inner.clock.now())
            .to_std()
            .unwrap_or(StdDuration::ZERO);
        debug!(
            job = %first.name,
            %at,
            delay_ms = delay.as_millis() as u64,
            "timer armed"
        );

        let token = state.next_token;
        state.next_token += 1;

        let weak = Arc::downgrade(&self.inner);
        let handle = timer::schedule_once(&runtime, delay, self.inner.timer_slice, move || {
            if let Some(inner) = weak.upgrade() {
                Scheduler { inner }.fire(token);
            }
        });

        state.timer = Some(ArmedTimer {
            token,
            job_id,
            handle,
        });
    }

    /// Timer callback: run the armed job and re-arm.
    fn fire(&self, token: u64) {
        let (job_id, snapshot, callback) = {
            let mut state = self.state();

            // Clear the handle before the callback runs so the callback sees
            // an unarmed scheduler. A token mismatch means this timer was
            // cancelled after its task had already woken.
            let armed = match state.timer.take() {
                Some(timer) if timer.token == token => timer,
                other => {
                    state.timer = other;
                    return;
                }
            };

            let now = self.inner.clock.now();
            let Some(pos) = state.jobs.iter().position(|j| j.id == armed.job_id) else {
                self.arm(&mut state);
                return;
            };
            let job = &mut state.jobs[pos];
            job.executed_count += 1;
            job.last_executed_at = Some(now);
            let snapshot = job.snapshot();
            let callback = Arc::clone(&job.callback);
            state.firing = true;
            (armed.job_id, snapshot, callback)
        };

        info!(job = %snapshot.name, run = snapshot.executed_count, "executing job");
        invoke(callback.as_ref(), &snapshot);

        let mut state = self.state();
        state.firing = false;
        prune_finished(&mut state.jobs);

        if let Some(pos) = state.jobs.iter().position(|j| j.id == job_id) {
            // Never earlier than the instant that just fired, even if the
            // wall clock has stepped back since the timer was armed.
            let job = &state.jobs[pos];
            let reference = self.inner.clock.now().max(job.next_execution);
            let oracle = self.inner.oracle.as_ref();
            match compute_next_execution(oracle, reference, job.phase, job.offset) {
                Some(at) => {
                    let job = &mut state.jobs[pos];
                    job.next_execution = at;
                    debug!(job = %job.name, next = %at, "job rescheduled");
                }
                None => {
                    let job = state.jobs.remove(pos);
                    warn!(job = %job.name, "next execution out of range; job dropped");
                }
            }
        }
        sort_jobs(&mut state.jobs);
        self.arm(&mut state);
    }
}

fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Stable, so equal instants keep their relative order between sorts.
fn sort_jobs(jobs: &mut [Job]) {
    jobs.sort_by_key(|j| j.next_execution);
}

fn prune_finished(jobs: &mut Vec<Job>) {
    jobs.retain(|j| {
        if j.is_finished() {
            info!(job = %j.name, runs = j.executed_count, "job finished");
            false
        } else {
            true
        }
    });
}

/// Run a callback, containing both returned errors and panics.
fn invoke(callback: &dyn JobCallback, job: &JobSnapshot) {
    match catch_unwind(AssertUnwindSafe(|| callback.call(job))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(job = %job.name, error = %e, "job execution failed"),
        Err(panic) => warn!(
            job = %job.name,
            panic = panic_message(panic.as_ref()),
            "job callback panicked"
        ),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
