use thiserror::Error;

/// Errors returned when a job cannot be registered.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    /// A required registration argument was empty.
    #[error("Missing argument: {0}")]
    MissingArgument(&'static str),

    /// The offset reaches back a full synodic month or more, so the job
    /// could never be placed after its phase.
    #[error("Offset {offset_ms}ms must be greater than {floor_ms}ms")]
    OffsetOutOfRange { offset_ms: i64, floor_ms: i64 },

    /// Phase instant plus offset falls outside the range of `DateTime<Utc>`.
    #[error("Offset {offset_ms}ms puts the next execution out of range")]
    ExecutionOutOfRange { offset_ms: i64 },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
