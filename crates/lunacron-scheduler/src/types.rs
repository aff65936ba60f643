use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use lunacron_core::LunarPhase;
use serde::{Deserialize, Serialize};

/// How many times a job fires after its first run.
///
/// Serialises as the integer form callers configure: `-1` for unlimited,
/// `n >= 0` for `n` repeats (so `0` fires exactly once).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum Repeat {
    #[default]
    Unlimited,
    Times(u32),
}

impl Repeat {
    /// True once a job with this budget has fired `executed` times and must
    /// not fire again.
    pub fn is_exhausted(self, executed: u32) -> bool {
        match self {
            Repeat::Unlimited => false,
            Repeat::Times(n) => executed > n,
        }
    }
}

impl From<i64> for Repeat {
    fn from(n: i64) -> Self {
        if n < 0 {
            Repeat::Unlimited
        } else {
            Repeat::Times(u32::try_from(n).unwrap_or(u32::MAX))
        }
    }
}

impl From<i32> for Repeat {
    fn from(n: i32) -> Self {
        Repeat::from(i64::from(n))
    }
}

impl From<Repeat> for i64 {
    fn from(r: Repeat) -> Self {
        match r {
            Repeat::Unlimited => -1,
            Repeat::Times(n) => n as i64,
        }
    }
}

/// Error type a callback may return. Returned errors are logged, not retried.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Invoked when a job fires.
///
/// Receives a snapshot taken after `executed_count` was incremented. Panics
/// and returned errors are contained by the scheduler.
pub trait JobCallback: Send + Sync {
    fn call(&self, job: &JobSnapshot) -> Result<(), CallbackError>;
}

impl<F> JobCallback for F
where
    F: Fn(&JobSnapshot) -> Result<(), CallbackError> + Send + Sync,
{
    fn call(&self, job: &JobSnapshot) -> Result<(), CallbackError> {
        self(job)
    }
}

/// Read-only copy of a job's state, handed to callbacks and listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSnapshot {
    /// Normalised (lowercase) job name.
    pub name: String,
    pub phase: LunarPhase,
    /// Signed offset from the phase instant, in milliseconds.
    pub offset_ms: i64,
    pub repeat: Repeat,
    /// Number of times the job has fired, including the current run.
    pub executed_count: u32,
    pub next_execution: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
    pub last_executed_at: Option<DateTime<Utc>>,
}

impl JobSnapshot {
    pub fn offset(&self) -> Duration {
        Duration::milliseconds(self.offset_ms)
    }
}

/// Everything needed to register a job.
///
/// ```ignore
/// let request = JobRequest::new("harvest", "FULL", |job| {
///     tracing::info!(job = %job.name, "harvest time");
///     Ok(())
/// })
/// .with_offset_days(-1.0)
/// .with_repeat(2);
/// ```
pub struct JobRequest {
    pub(crate) name: String,
    pub(crate) phase: String,
    pub(crate) offset: Duration,
    pub(crate) repeat: Repeat,
    pub(crate) callback: Arc<dyn JobCallback>,
}

impl JobRequest {
    /// `phase` is matched case-insensitively against [`lunacron_core::LUNAR_PHASES`];
    /// a [`LunarPhase`] value works too.
    pub fn new<F>(name: impl Into<String>, phase: impl ToString, callback: F) -> Self
    where
        F: Fn(&JobSnapshot) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        Self::with_handler(name, phase, Arc::new(callback))
    }

    /// Like [`JobRequest::new`] for callbacks implemented as a type.
    pub fn with_handler(
        name: impl Into<String>,
        phase: impl ToString,
        callback: Arc<dyn JobCallback>,
    ) -> Self {
        Self {
            name: name.into(),
            phase: phase.to_string(),
            offset: Duration::zero(),
            repeat: Repeat::Unlimited,
            callback,
        }
    }

    pub fn with_offset(mut self, offset: Duration) -> Self {
        self.offset = offset;
        self
    }

    /// Adds `days` (fractional, may be negative) to the offset.
    pub fn with_offset_days(mut self, days: f64) -> Self {
        self.offset = add_millis(self.offset, days * 86_400_000.0);
        self
    }

    /// Adds `hours` (fractional, may be negative) to the offset.
    pub fn with_offset_hours(mut self, hours: f64) -> Self {
        self.offset = add_millis(self.offset, hours * 3_600_000.0);
        self
    }

    pub fn with_repeat(mut self, repeat: impl Into<Repeat>) -> Self {
        self.repeat = repeat.into();
        self
    }
}

/// `offset + ms`, saturating at the bounds of [`Duration`].
fn add_millis(offset: Duration, ms: f64) -> Duration {
    let total = offset.num_milliseconds() as f64 + ms.round();
    Duration::try_milliseconds(total as i64).unwrap_or(if total < 0.0 {
        Duration::MIN
    } else {
        Duration::MAX
    })
}

impl std::fmt::Debug for JobRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRequest")
            .field("name", &self.name)
            .field("phase", &self.phase)
            .field("offset", &self.offset)
            .field("repeat", &self.repeat)
            .finish_non_exhaustive()
    }
}

/// A registered job as held by the scheduler.
pub(crate) struct Job {
    pub id: u64,
    pub name: String,
    pub phase: LunarPhase,
    pub offset: Duration,
    pub repeat: Repeat,
    pub executed_count: u32,
    pub next_execution: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
    pub last_executed_at: Option<DateTime<Utc>>,
    pub callback: Arc<dyn JobCallback>,
}

impl Job {
    pub fn is_finished(&self) -> bool {
        self.repeat.is_exhausted(self.executed_count)
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            name: self.name.clone(),
            phase: self.phase,
            offset_ms: self.offset.num_milliseconds(),
            repeat: self.repeat,
            executed_count: self.executed_count,
            next_execution: self.next_execution,
            registered_at: self.registered_at,
            last_executed_at: self.last_executed_at,
        }
    }
}
