use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::layout::DEFAULT_GRANULARITY;
use crate::model::Minutes;

const WAL_FILE_NAME: &str = "slotgrid.wal";

/// Engine settings read from `SLOTGRID_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub granularity_minutes: Minutes,
    /// WAL appends after which the compactor rewrites the log.
    pub compact_threshold: u64,
    pub compact_interval: Duration,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            granularity_minutes: DEFAULT_GRANULARITY,
            compact_threshold: 1000,
            compact_interval: Duration::from_secs(60),
            metrics_port: None,
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("ignoring unparseable {key}={raw:?}");
            None
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Missing or unparseable values
    /// keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            data_dir: lookup("SLOTGRID_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            granularity_minutes: parsed(&lookup, "SLOTGRID_GRANULARITY_MINUTES")
                .unwrap_or(defaults.granularity_minutes),
            compact_threshold: parsed(&lookup, "SLOTGRID_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            compact_interval: parsed(&lookup, "SLOTGRID_COMPACT_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.compact_interval),
            metrics_port: parsed(&lookup, "SLOTGRID_METRICS_PORT"),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(WAL_FILE_NAME)
    }
}
