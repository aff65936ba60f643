//! End-to-end scheduler behaviour on a paused Tokio clock.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use lunacron_core::synodic_month;
use lunacron_scheduler::{
    CallbackError, Clock, JobRequest, JobSnapshot, LunarPhase, PhaseOracle, Repeat, Scheduler,
    TokioClock,
};

mod common;

use common::GridOracle;

const START: &str = "2024-01-01T00:00:00Z";
const NEW_MOON: &str = "2024-01-11T12:00:00Z";

fn utc(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

fn grid() -> GridOracle {
    GridOracle {
        epoch: utc(NEW_MOON),
    }
}

fn phase_at(phase: LunarPhase, cycle: i32) -> DateTime<Utc> {
    grid().next_phase(utc(START), phase) + synodic_month() * cycle
}

struct Harness {
    scheduler: Scheduler,
    clock: TokioClock,
}

impl Harness {
    fn new() -> Self {
        let clock = TokioClock::starting_at(utc(START));
        let scheduler = Scheduler::builder()
            .oracle(grid())
            .clock(clock)
            .timer_slice(StdDuration::from_secs(6 * 3600))
            .build();
        Self { scheduler, clock }
    }

    /// Let paused time run until `at` (plus `margin_ms`, which may be negative).
    async fn run_until(&self, at: DateTime<Utc>, margin_ms: i64) {
        let target = at + Duration::milliseconds(margin_ms);
        if let Ok(wait) = (target - self.clock.now()).to_std() {
            tokio::time::sleep(wait).await;
        }
    }
}

type Callback = Box<dyn Fn(&JobSnapshot) -> Result<(), CallbackError> + Send + Sync>;

fn counter() -> (Arc<AtomicU32>, impl Fn(&JobSnapshot) -> Result<(), CallbackError> + Send + Sync)
{
    let hits = Arc::new(AtomicU32::new(0));
    let h = Arc::clone(&hits);
    (hits, move |_: &JobSnapshot| {
        h.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
}

fn count(hits: &AtomicU32) -> u32 {
    hits.load(Ordering::SeqCst)
}

#[tokio::test(start_paused = true)]
async fn repeat_zero_fires_exactly_once() {
    let h = Harness::new();
    let (hits, cb) = counter();
    h.scheduler
        .register(JobRequest::new("j", LunarPhase::New, cb).with_repeat(0))
        .unwrap();
    h.scheduler.start();
    assert_eq!(h.scheduler.armed_job().as_deref(), Some("j"));

    let t = phase_at(LunarPhase::New, 0);
    h.run_until(t, -1000).await;
    assert_eq!(count(&hits), 0);

    h.run_until(t, 1000).await;
    assert_eq!(count(&hits), 1);
    assert!(h.scheduler.list_scheduled().is_empty());
    assert!(!h.scheduler.is_armed());

    h.run_until(phase_at(LunarPhase::New, 3), 1000).await;
    assert_eq!(count(&hits), 1);
}

#[tokio::test(start_paused = true)]
async fn repeat_n_fires_n_plus_one_times() {
    let h = Harness::new();
    let (hits, cb) = counter();
    h.scheduler
        .register(JobRequest::new("j", LunarPhase::Full, cb).with_repeat(2))
        .unwrap();
    h.scheduler.start();

    h.run_until(phase_at(LunarPhase::Full, 1), 1000).await;
    assert_eq!(count(&hits), 2);
    let job = h.scheduler.get("j").unwrap();
    assert_eq!(job.executed_count, 2);
    assert_eq!(job.next_execution, phase_at(LunarPhase::Full, 2));

    h.run_until(phase_at(LunarPhase::Full, 5), 1000).await;
    assert_eq!(count(&hits), 3);
    assert!(h.scheduler.get("j").is_none());
}

#[tokio::test(start_paused = true)]
async fn unlimited_job_keeps_firing_every_cycle() {
    let h = Harness::new();
    let (hits, cb) = counter();
    h.scheduler
        .register(JobRequest::new("forever", LunarPhase::LastQuarter, cb))
        .unwrap();
    h.scheduler.start();

    h.run_until(phase_at(LunarPhase::LastQuarter, 4), 1000).await;
    assert_eq!(count(&hits), 5);

    let job = h.scheduler.get("forever").unwrap();
    assert_eq!(job.repeat, Repeat::Unlimited);
    assert_eq!(job.executed_count, 5);
    assert_eq!(job.next_execution, phase_at(LunarPhase::LastQuarter, 5));
    assert!(h.scheduler.is_armed());
}

#[tokio::test(start_paused = true)]
async fn negative_offset_fires_before_phase() {
    let h = Harness::new();
    let (hits, cb) = counter();
    let job = h
        .scheduler
        .register(
            JobRequest::new("eve", "first_quarter", cb)
                .with_offset(-Duration::days(1))
                .with_repeat(0),
        )
        .unwrap()
        .unwrap();

    let quarter = phase_at(LunarPhase::FirstQuarter, 0);
    assert_eq!(job.next_execution, quarter - Duration::days(1));

    h.scheduler.start();
    h.run_until(quarter - Duration::days(1), 1000).await;
    assert_eq!(count(&hits), 1);
    assert!(h.clock.now() < quarter);
}

#[tokio::test(start_paused = true)]
async fn offset_reaching_into_past_moves_to_next_cycle() {
    let h = Harness::new();
    let job = h
        .scheduler
        .register(JobRequest::new("early", LunarPhase::New, |_| Ok(())).with_offset_days(-15.0))
        .unwrap()
        .unwrap();

    // The first new moon is ten and a half days out, so a fifteen day lead
    // would land in the past.
    assert_eq!(
        job.next_execution,
        phase_at(LunarPhase::New, 1) - Duration::days(15)
    );
    assert!(job.next_execution > utc(START));
}

#[tokio::test(start_paused = true)]
async fn removing_armed_job_arms_next() {
    let h = Harness::new();
    let (a_hits, a) = counter();
    let (b_hits, b) = counter();
    h.scheduler.register(JobRequest::new("a", LunarPhase::New, a)).unwrap();
    h.scheduler.register(JobRequest::new("b", LunarPhase::Full, b)).unwrap();
    h.scheduler.start();
    assert_eq!(h.scheduler.armed_job().as_deref(), Some("a"));

    assert!(h.scheduler.remove("A"));
    assert_eq!(h.scheduler.armed_job().as_deref(), Some("b"));

    h.run_until(phase_at(LunarPhase::Full, 0), 1000).await;
    assert_eq!(count(&a_hits), 0);
    assert_eq!(count(&b_hits), 1);
}

#[tokio::test(start_paused = true)]
async fn registering_earlier_job_retargets_timer() {
    let h = Harness::new();
    let (late_hits, late) = counter();
    let (early_hits, early) = counter();
    h.scheduler
        .register(JobRequest::new("late", LunarPhase::Full, late))
        .unwrap();
    h.scheduler.start();
    assert_eq!(h.scheduler.armed_job().as_deref(), Some("late"));

    h.scheduler
        .register(JobRequest::new("early", LunarPhase::New, early))
        .unwrap();
    assert_eq!(h.scheduler.armed_job().as_deref(), Some("early"));

    h.run_until(phase_at(LunarPhase::New, 0), 1000).await;
    assert_eq!(count(&early_hits), 1);
    assert_eq!(count(&late_hits), 0);
    assert_eq!(h.scheduler.armed_job().as_deref(), Some("late"));
}

#[tokio::test(start_paused = true)]
async fn replacing_armed_job_retargets_timer() {
    let h = Harness::new();
    let (old_hits, old) = counter();
    let (new_hits, new) = counter();
    let (b_hits, b) = counter();
    h.scheduler.register(JobRequest::new("a", LunarPhase::New, old)).unwrap();
    h.scheduler
        .register(JobRequest::new("b", LunarPhase::FirstQuarter, b))
        .unwrap();
    h.scheduler.start();
    assert_eq!(h.scheduler.armed_job().as_deref(), Some("a"));

    h.scheduler.register(JobRequest::new("a", LunarPhase::Full, new)).unwrap();
    assert_eq!(h.scheduler.armed_job().as_deref(), Some("b"));
    let names: Vec<String> = h
        .scheduler
        .list_scheduled()
        .into_iter()
        .map(|j| j.name)
        .collect();
    assert_eq!(names, vec!["b".to_string(), "a".to_string()]);

    h.run_until(phase_at(LunarPhase::Full, 0), 1000).await;
    assert_eq!(count(&old_hits), 0);
    assert_eq!(count(&b_hits), 1);
    assert_eq!(count(&new_hits), 1);
}

#[tokio::test(start_paused = true)]
async fn repeated_start_never_doubles_timers() {
    let h = Harness::new();
    let (hits, cb) = counter();
    h.scheduler.register(JobRequest::new("j", LunarPhase::New, cb)).unwrap();

    h.scheduler.start();
    h.scheduler.start();
    h.scheduler.stop();
    assert!(!h.scheduler.is_armed());
    h.scheduler.start();
    h.scheduler.start();
    assert!(h.scheduler.is_armed());

    h.run_until(phase_at(LunarPhase::New, 0), 1000).await;
    assert_eq!(count(&hits), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_keeps_jobs_and_start_catches_up() {
    let h = Harness::new();
    let (hits, cb) = counter();
    h.scheduler.register(JobRequest::new("j", LunarPhase::New, cb)).unwrap();
    h.scheduler.start();
    h.scheduler.stop();
    h.scheduler.stop();
    assert!(!h.scheduler.is_active());

    let t = phase_at(LunarPhase::New, 0);
    h.run_until(t, 1000).await;
    assert_eq!(count(&hits), 0);
    assert_eq!(h.scheduler.list_scheduled().len(), 1);

    // Overdue job fires as soon as dispatching resumes.
    h.scheduler.start();
    tokio::time::sleep(StdDuration::from_millis(10)).await;
    assert_eq!(count(&hits), 1);
    assert_eq!(
        h.scheduler.get("j").unwrap().next_execution,
        phase_at(LunarPhase::New, 1)
    );
}

#[tokio::test(start_paused = true)]
async fn failing_callbacks_do_not_disturb_other_jobs() {
    let h = Harness::new();
    let (good_hits, good) = counter();
    let err_hits = Arc::new(AtomicU32::new(0));
    let e = Arc::clone(&err_hits);

    h.scheduler
        .register(
            JobRequest::new("errs", LunarPhase::New, move |_| {
                e.fetch_add(1, Ordering::SeqCst);
                Err("boom".into())
            })
            .with_repeat(1),
        )
        .unwrap();
    h.scheduler
        .register(JobRequest::new("panics", LunarPhase::New, |_| panic!("kaboom")).with_repeat(1))
        .unwrap();
    h.scheduler.register(JobRequest::new("good", LunarPhase::Full, good)).unwrap();
    h.scheduler.start();

    h.run_until(phase_at(LunarPhase::New, 0), 1000).await;
    let panics = h.scheduler.get("panics").unwrap();
    assert_eq!(panics.executed_count, 1);
    assert_eq!(panics.next_execution, phase_at(LunarPhase::New, 1));

    h.run_until(phase_at(LunarPhase::Full, 1), 1000).await;
    assert_eq!(count(&err_hits), 2);
    assert_eq!(count(&good_hits), 2);
    assert!(h.scheduler.get("errs").is_none());
    assert!(h.scheduler.get("panics").is_none());
    assert!(h.scheduler.is_armed());
}

#[tokio::test(start_paused = true)]
async fn callback_sees_incremented_snapshot() {
    let h = Harness::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    h.scheduler
        .register(
            JobRequest::new("j", LunarPhase::New, move |job| {
                s.lock().unwrap().push((job.name.clone(), job.executed_count));
                Ok(())
            })
            .with_repeat(1),
        )
        .unwrap();
    h.scheduler.start();

    h.run_until(phase_at(LunarPhase::New, 1), 1000).await;
    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen, vec![("j".to_string(), 1), ("j".to_string(), 2)]);
}

#[tokio::test(start_paused = true)]
async fn callback_may_mutate_registry() {
    let h = Harness::new();
    let (b_hits, b) = counter();
    let (c_hits, c) = counter();
    let c: Callback = Box::new(c);
    let c = Arc::new(Mutex::new(Some(c)));

    let sched = h.scheduler.clone();
    h.scheduler
        .register(
            JobRequest::new("a", LunarPhase::New, move |_| {
                sched.remove("b");
                if let Some(cb) = c.lock().unwrap().take() {
                    sched.register(JobRequest::new("c", LunarPhase::Full, cb).with_repeat(0))?;
                }
                Ok(())
            })
            .with_repeat(0),
        )
        .unwrap();
    h.scheduler
        .register(JobRequest::new("b", LunarPhase::FirstQuarter, b))
        .unwrap();
    h.scheduler.start();

    h.run_until(phase_at(LunarPhase::New, 0), 1000).await;
    let names: Vec<String> = h
        .scheduler
        .list_scheduled()
        .into_iter()
        .map(|j| j.name)
        .collect();
    assert_eq!(names, vec!["c".to_string()]);
    assert_eq!(h.scheduler.armed_job().as_deref(), Some("c"));

    h.run_until(phase_at(LunarPhase::Full, 0), 1000).await;
    assert_eq!(count(&b_hits), 0);
    assert_eq!(count(&c_hits), 1);
    assert!(!h.scheduler.is_armed());
}

#[tokio::test(start_paused = true)]
async fn shutdown_clears_registry_without_firing() {
    let h = Harness::new();
    let (hits, cb) = counter();
    h.scheduler.register(JobRequest::new("j", LunarPhase::New, cb)).unwrap();
    h.scheduler.start();
    h.scheduler.shutdown();

    assert!(h.scheduler.list_scheduled().is_empty());
    assert!(!h.scheduler.is_armed());
    h.run_until(phase_at(LunarPhase::New, 1), 1000).await;
    assert_eq!(count(&hits), 0);
}

#[tokio::test(start_paused = true)]
async fn schedulers_are_isolated() {
    let first = Harness::new();
    let second = Harness::new();
    first
        .scheduler
        .register(JobRequest::new("j", LunarPhase::New, |_| Ok(())))
        .unwrap();

    assert_eq!(first.scheduler.list_scheduled().len(), 1);
    assert!(second.scheduler.list_scheduled().is_empty());
}

/// Wall clock that jumps back by `back` once it passes `after`, as an NTP
/// correction would.
struct SteppedBackClock {
    inner: TokioClock,
    after: DateTime<Utc>,
    back: Duration,
}

impl Clock for SteppedBackClock {
    fn now(&self) -> DateTime<Utc> {
        let t = self.inner.now();
        if t >= self.after {
            t - self.back
        } else {
            t
        }
    }
}

#[tokio::test(start_paused = true)]
async fn clock_stepping_back_does_not_refire_same_phase() {
    let tokio_clock = TokioClock::starting_at(utc(START));
    let scheduler = Scheduler::builder()
        .oracle(grid())
        .clock(SteppedBackClock {
            inner: tokio_clock,
            after: utc(START) + Duration::hours(1),
            back: Duration::seconds(2),
        })
        .timer_slice(StdDuration::from_secs(6 * 3600))
        .build();
    let (hits, cb) = counter();
    scheduler.register(JobRequest::new("j", LunarPhase::New, cb)).unwrap();
    scheduler.start();

    let until = phase_at(LunarPhase::New, 0) + Duration::days(1);
    tokio::time::sleep((until - tokio_clock.now()).to_std().unwrap()).await;

    assert_eq!(count(&hits), 1);
    assert_eq!(
        scheduler.get("j").unwrap().next_execution,
        phase_at(LunarPhase::New, 1)
    );
}
