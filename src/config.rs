use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::matcher::DEFAULT_THRESHOLD;
use crate::storage::write_atomic;

pub static CONFIG_PATH: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACEGATE_CONFIG_PATH").unwrap_or("/usr/local/etc/facegate/config.toml"))
});

pub static DATA_DIR: Lazy<&'static Path> =
    Lazy::new(|| Path::new(option_env!("FACEGATE_DATA_DIR").unwrap_or("/var/lib/facegate")));

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Match scores strictly above this are accepted.
    pub threshold: f32,
    pub listen: String,
    pub data_dir: PathBuf,
    /// In-progress enrollments older than this are discarded.
    pub enrollment_ttl_secs: u64,
    /// Outbound frames buffered per relay peer.
    pub relay_queue: usize,
    pub relay_send_timeout_ms: u64,
    /// Base URL of the capture device, e.g. `http://192.168.18.16`.
    pub device_url: Option<String>,
    pub device_timeout_secs: u64,
    /// Mirror recognition results to `results.jsonl` in the data dir.
    pub audit_file: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            listen: "0.0.0.0:8000".to_string(),
            data_dir: DATA_DIR.to_path_buf(),
            enrollment_ttl_secs: 300,
            relay_queue: 64,
            relay_send_timeout_ms: 2000,
            device_url: None,
            device_timeout_secs: 5,
            audit_file: true,
        }
    }
}

impl Config {
    pub fn enrollment_ttl(&self) -> Duration {
        Duration::from_secs(self.enrollment_ttl_secs)
    }

    pub fn relay_send_timeout(&self) -> Duration {
        Duration::from_millis(self.relay_send_timeout_ms)
    }

    pub fn device_timeout(&self) -> Duration {
        Duration::from_secs(self.device_timeout_secs)
    }

    pub fn audit_path(&self) -> Option<PathBuf> {
        self.audit_file.then(|| self.data_dir.join("results.jsonl"))
    }

    /// Reject values the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !(-1.0..=1.0).contains(&self.threshold) {
            bail!("threshold {} is outside [-1, 1]", self.threshold);
        }
        if self.relay_queue == 0 {
            bail!("relay_queue must be at least 1");
        }
        if let Some(url) = &self.device_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                bail!("device_url '{}' must start with http:// or https://", url);
            }
        }
        Ok(())
    }
}

/// Missing file means defaults; anything unreadable or invalid is an error.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Config::default()),
        Err(e) => {
            return Err(e).with_context(|| format!("reading config at {}", path.display()))
        }
    };
    let cfg: Config =
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    cfg.validate()?;
    let data = toml::to_string_pretty(cfg)?;
    write_atomic(path, data.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(cfg.threshold, 0.6);
        assert_eq!(cfg.relay_queue, 64);
        assert!(cfg.device_url.is_none());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "threshold = 0.72\ndevice_url = \"http://10.0.0.5\"\n").unwrap();

        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.threshold, 0.72);
        assert_eq!(cfg.device_url.as_deref(), Some("http://10.0.0.5"));
        assert_eq!(cfg.enrollment_ttl(), Duration::from_secs(300));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");
        let cfg = Config {
            listen: "127.0.0.1:9000".into(),
            audit_file: false,
            ..Config::default()
        };
        save_config(&cfg, Some(&path)).unwrap();

        let loaded = load_config(Some(&path)).unwrap();
        assert_eq!(loaded.listen, "127.0.0.1:9000");
        assert!(loaded.audit_path().is_none());
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        for body in [
            "threshold = 1.5",
            "relay_queue = 0",
            "device_url = \"192.168.18.16\"",
        ] {
            std::fs::write(&path, body).unwrap();
            assert!(load_config(Some(&path)).is_err(), "accepted: {body}");
        }

        let bad = Config {
            threshold: -2.0,
            ..Config::default()
        };
        assert!(save_config(&bad, Some(&path)).is_err());
    }

    #[test]
    fn test_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "threshold = \"high\"").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }
}
