use std::collections::HashMap;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read the config file ({path}): {reason}")]
    FailedToReadConfig { path: String, reason: String },

    #[error("Failed to parse the config: {0}")]
    FailedToParseConfig(String),

    #[error("Failed to serialize the config back to TOML: {0}")]
    FailedToSerializeConfig(String),

    #[error("'host_path' must be an absolute path, got '{0}'")]
    HostPathNotAbsolute(String),

    #[error("'host_path' ({0}) does not exist or is not a directory")]
    HostPathNotFound(String),

    #[error("'bitrate' must be one of 128, 192, 256, 320; got {0}")]
    InvalidBitrate(u32),

    #[error("'format' must be one of mp3, flac, m4a, wav; got '{0}'")]
    InvalidFormat(String),

    #[error("'concurrency' must be between 1 and 10; got {0}")]
    InvalidConcurrency(u32),

    #[error("'selected_playlists' must select at least one of song/artist/album for playlist '{0}'")]
    PlaylistHasNoFlagsSet(String),

    #[error("'sync_interval_minutes' must be greater than zero")]
    InvalidSyncInterval,

    #[error("'server_bind_addr' is not a valid socket address: {0}")]
    InvalidBindAddr(String),

    #[error(transparent)]
    PathTemplate(#[from] crate::services::path_template::PathTemplateError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Mp3,
    Flac,
    M4a,
    Wav,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct PlaylistFlags {
    #[serde(default)]
    pub song: bool,
    #[serde(default)]
    pub artist: bool,
    #[serde(default)]
    pub album: bool,
}

impl PlaylistFlags {
    fn any_set(&self) -> bool {
        self.song || self.artist || self.album
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host_path: PathBuf,
    pub bitrate: u32,
    pub format: AudioFormat,
    pub concurrency: u32,
    pub path_template: String,
    pub use_strict_matching: bool,
    pub selected_playlists: HashMap<String, PlaylistFlags>,
    #[serde(default = "default_sync_interval_minutes")]
    pub sync_interval_minutes: u32,
    #[serde(default = "default_server_bind_addr")]
    pub server_bind_addr: String,
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

fn default_sync_interval_minutes() -> u32 {
    15
}

fn default_server_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./data/orchestrator.db")
}

impl Config {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let config_str = fs::read_to_string(path).map_err(|err| ConfigError::FailedToReadConfig {
            path: path.to_string(),
            reason: err.to_string(),
        })?;

        let config: Config =
            toml::from_str(&config_str).map_err(|err| ConfigError::FailedToParseConfig(err.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|err| ConfigError::FailedToSerializeConfig(err.to_string()))
    }

    pub fn save_to_file(&self, path: &str) -> Result<(), ConfigError> {
        let rendered = self.to_toml_string()?;
        fs::write(path, rendered).map_err(|err| ConfigError::FailedToReadConfig {
            path: path.to_string(),
            reason: err.to_string(),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.host_path.is_absolute() {
            return Err(ConfigError::HostPathNotAbsolute(self.host_path.to_string_lossy().to_string()));
        }

        let is_dir = fs::metadata(&self.host_path).map(|meta| meta.is_dir()).unwrap_or(false);
        if !is_dir {
            return Err(ConfigError::HostPathNotFound(self.host_path.to_string_lossy().to_string()));
        }

        if !matches!(self.bitrate, 128 | 192 | 256 | 320) {
            return Err(ConfigError::InvalidBitrate(self.bitrate));
        }

        if !(1..=10).contains(&self.concurrency) {
            return Err(ConfigError::InvalidConcurrency(self.concurrency));
        }

        crate::services::path_template::validate_user_template(&self.path_template)?;

        for (playlist_id, flags) in &self.selected_playlists {
            if !flags.any_set() {
                return Err(ConfigError::PlaylistHasNoFlagsSet(playlist_id.clone()));
            }
        }

        if self.sync_interval_minutes == 0 {
            return Err(ConfigError::InvalidSyncInterval);
        }

        self.server_bind_addr
            .parse::<SocketAddr>()
            .map_err(|err| ConfigError::InvalidBindAddr(err.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Returns a config with `host_path` pointing at a real, freshly created
    /// directory. The `TempDir` must be kept alive by the caller for as long as
    /// the config is validated — dropping it removes the directory.
    fn base_config() -> (tempfile::TempDir, Config) {
        let dir = tempfile::tempdir().unwrap();
        let mut selected_playlists = HashMap::new();
        selected_playlists.insert(
            "pl1".to_string(),
            PlaylistFlags { song: true, artist: false, album: false },
        );

        let config = Config {
            host_path: dir.path().to_path_buf(),
            bitrate: 320,
            format: AudioFormat::Mp3,
            concurrency: 2,
            path_template: "{artist}/{album}/{title}.{ext}".to_string(),
            use_strict_matching: true,
            selected_playlists,
            sync_interval_minutes: 15,
            server_bind_addr: "127.0.0.1:8080".to_string(),
            database_path: PathBuf::from("./data/orchestrator.db"),
        };
        (dir, config)
    }

    #[test]
    fn valid_config_passes_validation() {
        let (_dir, config) = base_config();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn relative_host_path_is_rejected() {
        let (_dir, mut config) = base_config();
        config.host_path = PathBuf::from("music");
        assert!(matches!(config.validate(), Err(ConfigError::HostPathNotAbsolute(_))));
    }

    #[test]
    fn missing_host_path_is_rejected() {
        let (dir, mut config) = base_config();
        config.host_path = dir.path().join("does-not-exist");
        assert!(matches!(config.validate(), Err(ConfigError::HostPathNotFound(_))));
    }

    #[test]
    fn host_path_pointing_at_a_file_is_rejected() {
        let (dir, mut config) = base_config();
        let file_path = dir.path().join("not-a-directory");
        fs::write(&file_path, b"not a directory").unwrap();
        config.host_path = file_path;
        assert!(matches!(config.validate(), Err(ConfigError::HostPathNotFound(_))));
    }

    #[test]
    fn bad_bitrate_is_rejected() {
        let (_dir, mut config) = base_config();
        config.bitrate = 96;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidBitrate(96))));
    }

    #[test]
    fn playlist_with_no_flags_is_rejected() {
        let (_dir, mut config) = base_config();
        config
            .selected_playlists
            .insert("pl2".to_string(), PlaylistFlags::default());
        assert!(matches!(config.validate(), Err(ConfigError::PlaylistHasNoFlagsSet(_))));
    }

    #[test]
    fn bad_bind_addr_is_rejected() {
        let (_dir, mut config) = base_config();
        config.server_bind_addr = "not-an-addr".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidBindAddr(_))));
    }
}
