//! `lunacron-core` — shared types for lunar-phase scheduling.
//!
//! Holds the [`LunarPhase`] vocabulary, the [`PhaseOracle`] seam with its
//! default [`MeeusOracle`] implementation, and the daemon configuration.

pub mod config;
pub mod ephemeris;
pub mod error;
pub mod phase;

pub use ephemeris::{MeeusOracle, PhaseOracle};
pub use error::{CoreError, Result};
pub use phase::{synodic_month, LunarPhase, LUNAR_PHASES, SYNODIC_MONTH_MS};
