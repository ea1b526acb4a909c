use std::path::PathBuf;
use std::time::Duration;

/// Engine configuration. `from_env` reads `INNKEEP_*` variables so embedders
/// can run unconfigured in development.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding the WAL.
    pub data_dir: PathBuf,
    /// Rewrite the WAL once this many frames accumulate. 0 disables the
    /// background compactor.
    pub compact_threshold: u64,
    /// Per-call timeout for best-effort collaborators (invoice, mail, audit).
    pub collaborator_timeout: Duration,
    /// Prometheus exporter port, if any.
    pub metrics_port: Option<u16>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            compact_threshold: 10_000,
            collaborator_timeout: Duration::from_secs(5),
            metrics_port: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            data_dir: std::env::var("INNKEEP_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            compact_threshold: std::env::var("INNKEEP_COMPACT_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.compact_threshold),
            collaborator_timeout: std::env::var("INNKEEP_COLLABORATOR_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.collaborator_timeout),
            metrics_port: std::env::var("INNKEEP_METRICS_PORT")
                .ok()
                .and_then(|s| s.parse().ok()),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("innkeep.wal")
    }
}
