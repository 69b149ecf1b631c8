use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::cadapter::client::PoolConfig;
use crate::chuck::DEFAULT_CHUNK_SIZE;

/// Mount settings, from YAML and/or command-line flags.
///
/// `host`, `port`, `username` and `password` address a networked store.
/// The `gridfuse` binary only ships the local directory store, so
/// [`MountConfig::validate`] refuses them rather than ignoring them.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub db: String,
    // collection prefix: `<prefix>.files` / `<prefix>.chunks`
    pub prefix: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub chunk_size: u64,
    pub pool_size: usize,
    pub data_dir: Option<PathBuf>,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            db: "test".to_string(),
            prefix: "fs".to_string(),
            username: None,
            password: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            pool_size: 8,
            data_dir: None,
        }
    }
}

impl MountConfig {
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            capacity: self.pool_size,
        }
    }

    /// Where the directory-backed store keeps its collections.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .or_else(|| dirs::data_dir().map(|d| d.join("gridfuse")))
            .unwrap_or_else(|| PathBuf::from(".gridfuse"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            bail!("chunk_size must be greater than zero");
        }
        if self.pool_size == 0 {
            bail!("pool_size must be greater than zero");
        }
        if self.db.is_empty() || self.prefix.is_empty() {
            bail!("db and prefix must not be empty");
        }
        if self.host.is_some() || self.port.is_some() {
            bail!(
                "host/port select a networked store, which this build does not include; \
                 the local directory store is configured with data_dir"
            );
        }
        if self.username.is_some() || self.password.is_some() {
            bail!("the local directory store does not authenticate; remove username/password");
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<MountConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    let cfg: MountConfig = serde_yaml::from_str(&content).context("Failed to parse YAML config")?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let cfg = MountConfig::default();
        assert_eq!(cfg.db, "test");
        assert_eq!(cfg.prefix, "fs");
        assert_eq!(cfg.chunk_size, 262_144);
        assert_eq!(cfg.pool_config().capacity, 8);
        cfg.validate().unwrap();
    }

    #[test]
    fn test_load_partial_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gridfuse.yaml");
        fs::write(
            &path,
            "prefix: media\nchunk_size: 1024\ndata_dir: /srv/gridfuse\n",
        )
        .unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.prefix, "media");
        assert_eq!(cfg.db, "test");
        assert_eq!(cfg.chunk_size, 1024);
        assert_eq!(cfg.data_dir(), PathBuf::from("/srv/gridfuse"));
        cfg.validate().unwrap();
    }

    #[test]
    fn test_missing_file_is_error() {
        let err = load_config(Path::new("/nonexistent/gridfuse.yaml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config"));
    }

    #[test]
    fn test_validate_rejects_zero_chunk() {
        let cfg = MountConfig {
            chunk_size: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_network_settings_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gridfuse.yaml");
        fs::write(&path, "host: db.internal\nport: 27017\n").unwrap();
        let cfg = load_config(&path).unwrap();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("networked store"));

        let cfg = MountConfig {
            username: Some("alice".into()),
            ..Default::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("does not authenticate"));
    }
}
