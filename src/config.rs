use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// How far the library may modify JPEG files when storing metadata.
///
/// The policy is passed explicitly into every read and write; it also changes
/// the precedence applied while reading (see [`crate::merge`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WritePolicy {
    /// Never touch the file. Writes are a no-op.
    NoChanges,
    /// Rewrite the XMP packet only. EXIF merely fills gaps on read.
    #[default]
    XmlOnly,
    /// Rewrite XMP and EXIF. EXIF is authoritative for title, comment and subject.
    XmlAndExif,
}

impl WritePolicy {
    /// Map the legacy integer store option (0, 1, 2) to a policy.
    /// Unknown values fall back to the most restrictive level.
    pub fn from_store_option(option: i32) -> Self {
        match option {
            1 => Self::XmlOnly,
            2 => Self::XmlAndExif,
            _ => Self::NoChanges,
        }
    }

    /// Whether any modification of the JPEG is allowed.
    pub fn allows_jpeg_changes(self) -> bool {
        self != Self::NoChanges
    }

    /// Whether the binary EXIF block may be modified.
    pub fn allows_exif_changes(self) -> bool {
        self == Self::XmlAndExif
    }
}

/// Top-level configuration for eyephoto-meta.
///
/// # Loading
///
/// ```rust,no_run
/// use eyephoto_meta::config::{Config, WritePolicy};
///
/// // From a JSON file
/// let config = Config::load(Some("config.json".as_ref())).unwrap();
///
/// // Or use defaults and customize
/// let mut config = Config::default();
/// config.write_policy = WritePolicy::XmlAndExif;
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Which metadata stores may be rewritten.
    #[serde(default)]
    pub write_policy: WritePolicy,
    /// Optional path to a log file (CLI only).
    #[serde(default)]
    pub log_file: Option<String>,
}

impl Config {
    /// Resolve the config file path, in the same directory as the executable.
    pub fn config_path() -> Result<PathBuf> {
        let exe_path = std::env::current_exe().context("Failed to get executable path")?;
        let exe_dir = exe_path
            .parent()
            .context("Failed to get executable directory")?;
        Ok(exe_dir.join("config.json"))
    }

    /// Load config from the given path, or from the default location.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        if !config_path.exists() {
            log::warn!(
                "Config file not found at {}. Using defaults.",
                config_path.display()
            );
            return Ok(Self::default());
        }

        let contents =
            std::fs::read_to_string(&config_path).context("Failed to read config file")?;
        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Save config to the given path, or to the default location.
    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_path, contents).context("Failed to write config file")?;
        log::info!("Config saved to {}", config_path.display());
        Ok(())
    }
}
