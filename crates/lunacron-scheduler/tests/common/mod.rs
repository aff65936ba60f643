//! Test fakes shared by the unit and integration tests.

use chrono::{DateTime, Utc};
use lunacron_core::{synodic_month, LunarPhase, PhaseOracle};

/// Phases on a fixed grid: NEW at `epoch + n * month`, other phases a
/// quarter month apart.
pub struct GridOracle {
    pub epoch: DateTime<Utc>,
}

impl PhaseOracle for GridOracle {
    fn next_phase(&self, reference: DateTime<Utc>, phase: LunarPhase) -> DateTime<Utc> {
        let month = synodic_month().num_milliseconds();
        let first = self.epoch.timestamp_millis() + month * phase.index() as i64 / 4;
        let target = reference.timestamp_millis() + 1;
        let mut at = first + (target - first).div_euclid(month) * month;
        if at < target {
            at += month;
        }
        DateTime::from_timestamp_millis(at).unwrap()
    }
}
