use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_player_url")]
    pub player_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_use_mirrors")]
    pub use_mirrors: bool,
    #[serde(default = "default_mirror_instances")]
    pub mirror_instances: Vec<String>,
    #[serde(default = "default_mirror_index_url")]
    pub mirror_index_url: String,
    #[serde(default = "default_mirror_timeout_secs")]
    pub mirror_timeout_secs: u64,
    #[serde(default = "default_mirror_refresh_secs")]
    pub mirror_refresh_secs: u64,
    #[serde(default = "default_target_bitrate_bps")]
    pub target_bitrate_bps: u64,
    #[serde(default = "default_preferred_codecs")]
    pub preferred_codecs: Vec<String>,
    #[serde(default = "default_expiry_secs")]
    pub default_expiry_secs: i64,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    #[serde(default = "default_cache_safety_margin_secs")]
    pub cache_safety_margin_secs: i64,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_advance_delay_ms")]
    pub advance_delay_ms: u64,
    #[serde(default = "default_restart_threshold_secs")]
    pub restart_threshold_secs: f64,
    #[serde(default = "default_seek_step_secs")]
    pub seek_step_secs: f64,
    #[serde(default = "default_relay_allowed_hosts")]
    pub relay_allowed_hosts: Vec<String>,
    #[serde(default = "default_relay_timeout_secs")]
    pub relay_timeout_secs: u64,
    #[serde(default = "default_volume")]
    pub volume: f32,
    #[serde(default)]
    pub muted: bool,
}

fn default_player_url() -> String {
    "https://www.youtube.com/youtubei/v1/player".to_string()
}

fn default_request_timeout_secs() -> u64 {
    8
}

fn default_use_mirrors() -> bool {
    true
}

fn default_mirror_instances() -> Vec<String> {
    vec![
        "https://api.piped.private.coffee".to_string(),
        "https://pipedapi.kavin.rocks".to_string(),
        "https://pipedapi.adminforge.de".to_string(),
    ]
}

fn default_mirror_index_url() -> String {
    "https://piped-instances.kavin.rocks/".to_string()
}

fn default_mirror_timeout_secs() -> u64 {
    10
}

fn default_mirror_refresh_secs() -> u64 {
    30 * 60
}

fn default_target_bitrate_bps() -> u64 {
    128_000
}

fn default_preferred_codecs() -> Vec<String> {
    vec!["mp4a.40.2".to_string()]
}

fn default_expiry_secs() -> i64 {
    6 * 60 * 60
}

fn default_cache_capacity() -> usize {
    100
}

fn default_cache_safety_margin_secs() -> i64 {
    60
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_advance_delay_ms() -> u64 {
    1000
}

fn default_restart_threshold_secs() -> f64 {
    3.0
}

fn default_seek_step_secs() -> f64 {
    10.0
}

fn default_relay_allowed_hosts() -> Vec<String> {
    vec!["googlevideo.com".to_string()]
}

fn default_relay_timeout_secs() -> u64 {
    9
}

fn default_volume() -> f32 {
    1.0
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            player_url: default_player_url(),
            request_timeout_secs: default_request_timeout_secs(),
            use_mirrors: default_use_mirrors(),
            mirror_instances: default_mirror_instances(),
            mirror_index_url: default_mirror_index_url(),
            mirror_timeout_secs: default_mirror_timeout_secs(),
            mirror_refresh_secs: default_mirror_refresh_secs(),
            target_bitrate_bps: default_target_bitrate_bps(),
            preferred_codecs: default_preferred_codecs(),
            default_expiry_secs: default_expiry_secs(),
            cache_capacity: default_cache_capacity(),
            cache_safety_margin_secs: default_cache_safety_margin_secs(),
            failure_threshold: default_failure_threshold(),
            advance_delay_ms: default_advance_delay_ms(),
            restart_threshold_secs: default_restart_threshold_secs(),
            seek_step_secs: default_seek_step_secs(),
            relay_allowed_hosts: default_relay_allowed_hosts(),
            relay_timeout_secs: default_relay_timeout_secs(),
            volume: default_volume(),
            muted: false,
        }
    }
}

impl AppConfig {
    pub fn config_dir() -> AppResult<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| AppError::Config("Cannot find home directory".into()))?;
        Ok(home.join(".ytbg"))
    }

    pub fn config_path() -> AppResult<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    pub fn history_path() -> AppResult<PathBuf> {
        Ok(Self::config_dir()?.join("history.json"))
    }

    pub fn load() -> AppResult<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> AppResult<Self> {
        if !path.exists() {
            return Err(AppError::Config(format!(
                "Config file not found at {}",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the config file, writing defaults on first launch.
    pub fn load_or_default() -> Self {
        match Self::config_path() {
            Ok(path) => Self::load_or_default_from(&path),
            Err(e) => {
                log::warn!("[config] {}. Using defaults.", e);
                Self::default()
            }
        }
    }

    /// Defaults are only written when no file exists; a broken file is left
    /// for the user to fix.
    pub fn load_or_default_from(path: &Path) -> Self {
        if !path.exists() {
            let default_config = Self::default();
            if let Err(e) = default_config.save_to(path) {
                log::error!("[config] Failed to save default config: {}", e);
            }
            return default_config;
        }
        Self::load_from(path).unwrap_or_else(|e| {
            log::error!(
                "[config] Ignoring {}: {}. Using defaults.",
                path.display(),
                e
            );
            Self::default()
        })
    }

    pub fn save(&self) -> AppResult<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> AppResult<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.request_timeout_secs == 0 {
            return Err(AppError::Config("request_timeout_secs must be > 0".into()));
        }
        if self.failure_threshold == 0 {
            return Err(AppError::Config("failure_threshold must be > 0".into()));
        }
        if self.cache_capacity == 0 {
            return Err(AppError::Config("cache_capacity must be > 0".into()));
        }
        url::Url::parse(&self.player_url)
            .map_err(|e| AppError::Config(format!("player_url: {}", e)))?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn mirror_timeout(&self) -> Duration {
        Duration::from_secs(self.mirror_timeout_secs)
    }

    pub fn relay_timeout(&self) -> Duration {
        Duration::from_secs(self.relay_timeout_secs)
    }
}
