use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_TIMER_SLICE_SECS: u64 = 24 * 60 * 60; // re-check the deadline at least daily

/// Top-level config (lunacron.toml + LUNACRON_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LunacronConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Jobs registered by the daemon at startup.
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Longest single sleep the timer performs before re-checking its
    /// deadline. Multi-week delays are chained from slices of this length.
    #[serde(default = "default_timer_slice_secs")]
    pub timer_slice_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timer_slice_secs: default_timer_slice_secs(),
        }
    }
}

/// A job declared in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub name: String,
    /// Phase name, e.g. "FULL" or "first_quarter".
    pub phase: String,
    /// Days relative to the phase; negative fires before it.
    #[serde(default)]
    pub offset_days: f64,
    /// Hours relative to the phase, added to `offset_days`.
    #[serde(default)]
    pub offset_hours: f64,
    /// -1 = forever, 0 = once, N = N repeats after the first run.
    #[serde(default = "default_repeat")]
    pub repeat: i64,
    /// Logged when the job fires.
    pub message: Option<String>,
}

fn default_timer_slice_secs() -> u64 {
    DEFAULT_TIMER_SLICE_SECS
}
fn default_repeat() -> i64 {
    -1
}

impl LunacronConfig {
    /// Load config from a TOML file with LUNACRON_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.lunacron/lunacron.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);
        debug!(path = %path, exists = std::path::Path::new(&path).exists(), "loading config");

        Self::figment(&path)
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))
    }

    fn figment(path: &str) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("LUNACRON_").split("__"))
    }
}

pub fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.lunacron/lunacron.toml", home)
}
