//! peerdrop configuration management.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/peerdrop/peerdrop.toml`
//! - Windows: `%APPDATA%/peerdrop/peerdrop.toml`

use std::path::{Path, PathBuf};

use peerdrop_link::TransferConfig;
use serde::{Deserialize, Serialize};

/// peerdrop configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Address `listen` binds to.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Directory received files are saved into.
    #[serde(default = "default_out_dir")]
    pub out_dir: PathBuf,

    /// Settings applied to every transfer.
    #[serde(default)]
    pub transfer: TransferConfig,
}

fn default_bind() -> String {
    "0.0.0.0:9420".into()
}

fn default_out_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            out_dir: default_out_dir(),
            transfer: TransferConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from disk, or creates a default if not found.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path()?)
    }

    fn load_from(path: &Path) -> anyhow::Result<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str::<Config>(&content)?
        } else {
            let config = Config::default();
            config.save_to(path)?;
            config
        };
        config.transfer.validate()?;
        Ok(config)
    }

    fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("peerdrop")
            .join("peerdrop.toml"))
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("peerdrop").join("peerdrop.toml"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        Ok(PathBuf::from("/tmp/peerdrop/peerdrop.toml"))
    }
}
