use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Whether availability windows gate reservations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WindowPolicy {
    /// Only reservation overlap matters.
    #[default]
    Ignore,
    /// A reservation must also lie inside the union of the car's windows.
    RequireCoverage,
}

/// Knobs the engine itself consumes.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on waiting for a car's write lock before answering `Busy`.
    pub lock_timeout: Duration,
    pub window_policy: WindowPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(2000),
            window_policy: WindowPolicy::Ignore,
        }
    }
}

/// Process configuration, read from `CARBOOK_*` environment variables.
/// Unset or unparseable values fall back to defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub compact_threshold: u64,
    pub compact_interval: Duration,
    pub retry_attempts: usize,
    pub engine: EngineConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            compact_threshold: 1000,
            compact_interval: Duration::from_secs(30),
            retry_attempts: 3,
            engine: EngineConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the environment, or a map in tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let lock_timeout = parse_var(&lookup, "CARBOOK_LOCK_TIMEOUT_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.engine.lock_timeout);
        let require_window: bool = parse_var(&lookup, "CARBOOK_REQUIRE_WINDOW").unwrap_or(false);

        Self {
            data_dir: lookup("CARBOOK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            metrics_port: parse_var(&lookup, "CARBOOK_METRICS_PORT"),
            compact_threshold: parse_var(&lookup, "CARBOOK_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            compact_interval: parse_var(&lookup, "CARBOOK_COMPACT_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.compact_interval),
            retry_attempts: parse_var(&lookup, "CARBOOK_RETRY_ATTEMPTS").unwrap_or(defaults.retry_attempts),
            engine: EngineConfig {
                lock_timeout,
                window_policy: if require_window {
                    WindowPolicy::RequireCoverage
                } else {
                    WindowPolicy::Ignore
                },
            },
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("carbook.wal")
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse().ok())
}
