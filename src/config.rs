use std::path::PathBuf;

const DEFAULT_DATA_DIR: &str = "./data";
const DEFAULT_COMPACT_THRESHOLD: u64 = 1000;

/// Process configuration for `fleetd`, read from `FLEETBOOK_*` variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    /// WAL appends since the last compaction that trigger a rewrite.
    pub compact_threshold: u64,
    /// Username of the first administrator, created only on an empty store.
    pub bootstrap_admin: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            metrics_port: None,
            compact_threshold: DEFAULT_COMPACT_THRESHOLD,
            bootstrap_admin: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparsable numbers fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            data_dir: lookup("FLEETBOOK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            metrics_port: lookup("FLEETBOOK_METRICS_PORT").and_then(|s| s.parse().ok()),
            compact_threshold: lookup("FLEETBOOK_COMPACT_THRESHOLD")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.compact_threshold),
            bootstrap_admin: lookup("FLEETBOOK_BOOTSTRAP_ADMIN")
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("fleet.wal")
    }
}
