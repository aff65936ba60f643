use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Mean length of a synodic month (29.53058868 days) in milliseconds.
pub const SYNODIC_MONTH_MS: i64 = 2_551_442_862;

/// The synodic month as a `chrono::Duration`.
pub fn synodic_month() -> Duration {
    Duration::milliseconds(SYNODIC_MONTH_MS)
}

/// The four principal phases of the moon, in cycle order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LunarPhase {
    New,
    FirstQuarter,
    Full,
    LastQuarter,
}

/// Recognised phase names and the phase each one maps to.
pub const LUNAR_PHASES: [(&str, LunarPhase); 4] = [
    ("NEW", LunarPhase::New),
    ("FIRST_QUARTER", LunarPhase::FirstQuarter),
    ("FULL", LunarPhase::Full),
    ("LAST_QUARTER", LunarPhase::LastQuarter),
];

impl LunarPhase {
    pub const ALL: [LunarPhase; 4] = [
        LunarPhase::New,
        LunarPhase::FirstQuarter,
        LunarPhase::Full,
        LunarPhase::LastQuarter,
    ];

    /// Position in the cycle: 0 = new … 3 = last quarter.
    pub fn index(self) -> usize {
        match self {
            LunarPhase::New => 0,
            LunarPhase::FirstQuarter => 1,
            LunarPhase::Full => 2,
            LunarPhase::LastQuarter => 3,
        }
    }

    /// Fraction of a lunation at which this phase occurs.
    pub fn cycle_fraction(self) -> f64 {
        self.index() as f64 * 0.25
    }

    pub fn as_str(self) -> &'static str {
        LUNAR_PHASES[self.index()].0
    }
}

impl std::fmt::Display for LunarPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LunarPhase {
    type Err = CoreError;

    /// Case-insensitive; `-` and spaces are accepted in place of `_`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        LUNAR_PHASES
            .iter()
            .find(|(name, _)| *name == normalized)
            .map(|(_, phase)| *phase)
            .ok_or_else(|| CoreError::UnknownPhase(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("full".parse::<LunarPhase>().unwrap(), LunarPhase::Full);
        assert_eq!(
            "First_Quarter".parse::<LunarPhase>().unwrap(),
            LunarPhase::FirstQuarter
        );
        assert_eq!(
            "last-quarter".parse::<LunarPhase>().unwrap(),
            LunarPhase::LastQuarter
        );
    }

    #[test]
    fn parse_unknown_phase_returns_err() {
        assert!("gibbous".parse::<LunarPhase>().is_err());
        assert!("".parse::<LunarPhase>().is_err());
    }

    #[test]
    fn display_matches_mapping() {
        for (name, phase) in LUNAR_PHASES {
            assert_eq!(phase.to_string(), name);
            assert_eq!(name.parse::<LunarPhase>().unwrap(), phase);
        }
    }

    #[test]
    fn synodic_month_is_about_29_and_a_half_days() {
        let days = synodic_month().num_milliseconds() as f64 / 86_400_000.0;
        assert!((days - 29.53058868).abs() < 1e-8);
    }
}
