//! `lunacron-scheduler` — run callbacks relative to lunar phases.
//!
//! # Overview
//!
//! Jobs name a [`LunarPhase`], a signed offset and a repeat budget. The
//! [`Scheduler`] asks a [`PhaseOracle`] for the next occurrence of each
//! job's phase, applies the offset, and keeps a single Tokio timer armed for
//! whichever job is due first.
//!
//! | Repeat          | Runs                          |
//! |-----------------|-------------------------------|
//! | `Unlimited` (-1)| every cycle until removed     |
//! | `Times(0)`      | once                          |
//! | `Times(n)`      | `n + 1` times                 |
//!
//! Offsets must be greater than minus one synodic month.

pub mod clock;
pub mod engine;
pub mod error;
pub mod schedule;
pub mod timer;
pub mod types;

#[cfg(test)]
#[path = "../tests/common/mod.rs"]
mod test_support;

pub use clock::{Clock, SystemClock, TokioClock};
pub use engine::{Scheduler, SchedulerBuilder};
pub use error::{Result, SchedulerError};
pub use lunacron_core::{LunarPhase, PhaseOracle, LUNAR_PHASES};
pub use types::{CallbackError, JobCallback, JobRequest, JobSnapshot, Repeat};
