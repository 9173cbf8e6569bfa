use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tfdb_storage::DEFAULT_CHUNK_SIZE;

/// Runtime configuration for a `tfdb` process: where the database lives,
/// how it's opened, and the knobs from the concurrency model's
/// cancellation/backpressure rules. Defaults come from an optional TOML
/// file; CLI flags layered on top always win.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub db_dir: PathBuf,
    pub chunk_size: usize,
    pub verify_hash_on_open: bool,
    pub max_queue_size: usize,
    pub max_retries: u32,
    #[serde(with = "duration_secs")]
    pub operation_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_dir: PathBuf::from("./tfdb-data"),
            chunk_size: DEFAULT_CHUNK_SIZE,
            verify_hash_on_open: true,
            max_queue_size: 1024,
            max_retries: 3,
            operation_timeout: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Loads defaults from `path` if it exists, otherwise falls back to
    /// `Config::default()`.
    pub fn load(path: Option<&std::path::Path>) -> eyre::Result<Self> {
        let Some(path) = path else {
            return Ok(Config::default());
        };

        if !path.exists() {
            return Ok(Config::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let config = toml::from_str(&contents)?;
        Ok(config)
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_sane() {
        let config = Config::default();
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert!(config.verify_hash_on_open);
    }

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let config = Config::load(Some(std::path::Path::new("/nonexistent/tfdb.toml"))).unwrap();
        assert_eq!(config.db_dir, Config::default().db_dir);
    }
}
