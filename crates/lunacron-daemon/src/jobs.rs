use chrono::{DateTime, Utc};
use lunacron_core::config::JobConfig;
use lunacron_core::{LunarPhase, PhaseOracle};
use lunacron_scheduler::{JobRequest, Scheduler};
use tracing::{info, warn};

/// Register every configured job. Bad entries are logged and skipped so one
/// typo does not keep the rest from running. Returns how many were added.
pub fn register_configured(scheduler: &Scheduler, jobs: &[JobConfig]) -> usize {
    let mut registered = 0;
    for cfg in jobs {
        let message = cfg.message.clone();
        let request = JobRequest::new(cfg.name.as_str(), cfg.phase.as_str(), move |job| {
            info!(
                job = %job.name,
                phase = %job.phase,
                run = job.executed_count,
                message = message.as_deref().unwrap_or(""),
                "lunar job fired"
            );
            Ok(())
        })
        .with_offset_days(cfg.offset_days)
        .with_offset_hours(cfg.offset_hours)
        .with_repeat(cfg.repeat);

        match scheduler.register(request) {
            Ok(Some(_)) => registered += 1,
            Ok(None) => {}
            Err(e) => warn!(job = %cfg.name, "skipping job: {e}"),
        }
    }
    registered
}

/// The next `count` phase events after `from`, in time order. Stops early
/// if the oracle stops moving forward.
pub fn upcoming_phases(
    oracle: &dyn PhaseOracle,
    from: DateTime<Utc>,
    count: usize,
) -> Vec<(LunarPhase, DateTime<Utc>)> {
    let mut events = Vec::new();
    let mut cursor = from;
    while events.len() < count {
        let Some(next) = LunarPhase::ALL
            .iter()
            .map(|&phase| (phase, oracle.next_phase(cursor, phase)))
            .min_by_key(|(_, at)| *at)
        else {
            break;
        };
        if next.1 <= cursor {
            break;
        }
        cursor = next.1;
        events.push(next);
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use lunacron_core::MeeusOracle;

    fn job(name: &str, phase: &str, offset_days: f64) -> JobConfig {
        JobConfig {
            name: name.to_string(),
            phase: phase.to_string(),
            offset_days,
            offset_hours: 0.0,
            repeat: -1,
            message: None,
        }
    }

    #[test]
    fn invalid_entries_are_skipped() {
        let scheduler = Scheduler::new();
        let jobs = vec![
            job("plant", "new", 0.0),
            job("typo", "gibous", 0.0),
            job("too-early", "full", -40.0),
            job("harvest", "FULL", -1.0),
            job("far-future", "full", 1e12),
        ];

        assert_eq!(register_configured(&scheduler, &jobs), 2);
        let mut names: Vec<String> = scheduler
            .list_scheduled()
            .into_iter()
            .map(|j| j.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["harvest".to_string(), "plant".to_string()]);
    }

    #[test]
    fn upcoming_phases_cycle_in_order() {
        let from: DateTime<Utc> = "2024-01-10T00:00:00Z".parse().unwrap();
        let events = upcoming_phases(&MeeusOracle::new(), from, 6);

        let phases: Vec<LunarPhase> = events.iter().map(|(p, _)| *p).collect();
        assert_eq!(
            phases,
            vec![
                LunarPhase::New,
                LunarPhase::FirstQuarter,
                LunarPhase::Full,
                LunarPhase::LastQuarter,
                LunarPhase::New,
                LunarPhase::FirstQuarter,
            ]
        );
        assert!(events.windows(2).all(|w| w[0].1 < w[1].1));
    }

    #[test]
    fn huge_count_stops_when_oracle_stalls() {
        struct Stalled(DateTime<Utc>);
        impl PhaseOracle for Stalled {
            fn next_phase(&self, _: DateTime<Utc>, _: LunarPhase) -> DateTime<Utc> {
                self.0
            }
        }

        let from: DateTime<Utc> = "2024-01-10T00:00:00Z".parse().unwrap();
        let at: DateTime<Utc> = "2024-01-11T11:57:00Z".parse().unwrap();
        let events = upcoming_phases(&Stalled(at), from, usize::MAX);
        assert_eq!(events, vec![(LunarPhase::New, at)]);
    }
}
