use chrono::{DateTime, Duration, Utc};
use lunacron_core::{synodic_month, LunarPhase, PhaseOracle};
use tracing::warn;

/// Compute the next instant strictly after `now` at which a job targeting
/// `phase` with `offset` should fire.
///
/// A negative offset can pull the candidate behind `now` (the phase is
/// close, the offset reaches further back). In that case the lookup is
/// repeated once from `now + synodic month`. Offsets are bounded above
/// `-synodic month` at registration, so one retry is enough under a sane
/// oracle; if it is not, the inconsistency is logged and the retried
/// instant is returned anyway.
///
/// Returns `None` when the offset pushes the instant past the range
/// `DateTime<Utc>` can represent.
pub fn compute_next_execution(
    oracle: &dyn PhaseOracle,
    now: DateTime<Utc>,
    phase: LunarPhase,
    offset: Duration,
) -> Option<DateTime<Utc>> {
    let candidate = oracle.next_phase(now, phase).checked_add_signed(offset)?;
    if candidate > now {
        return Some(candidate);
    }

    let retry_from = now.checked_add_signed(synodic_month())?;
    let retried = oracle.next_phase(retry_from, phase).checked_add_signed(offset)?;
    if retried <= now {
        warn!(
            %phase,
            offset_ms = offset.num_milliseconds(),
            %now,
            next = %retried,
            "computed execution time is not in the future; oracle and clock disagree"
        );
    }
    Some(retried)
}
