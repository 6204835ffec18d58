use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{PennyError, Result};

pub const DB_FILE: &str = "penny.db";
pub const STATE_FILE: &str = "processed_files.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub data_dir: String,
    #[serde(default)]
    pub suggester: SuggesterSettings,
    #[serde(default)]
    pub keep_session_artifacts: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggesterSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub models: ProfileModels,
}

/// One model per suggestion profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileModels {
    #[serde(default = "default_extraction_model")]
    pub extraction: String,
    #[serde(default = "default_organizer_model")]
    pub organizer: String,
    #[serde(default = "default_categorization_model")]
    pub categorization: String,
}

fn default_true() -> bool {
    true
}

fn default_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_extraction_model() -> String {
    "phi3.5:3.8b-mini-instruct-q4_K_M".to_string()
}

fn default_organizer_model() -> String {
    "gemma2:2b-instruct-q4_K_M".to_string()
}

fn default_categorization_model() -> String {
    "gemma2:2b-instruct-q4_K_M".to_string()
}

impl Default for ProfileModels {
    fn default() -> Self {
        Self {
            extraction: default_extraction_model(),
            organizer: default_organizer_model(),
            categorization: default_categorization_model(),
        }
    }
}

impl Default for SuggesterSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            url: default_url(),
            timeout_secs: default_timeout_secs(),
            models: ProfileModels::default(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir().to_string_lossy().to_string(),
            suggester: SuggesterSettings::default(),
            keep_session_artifacts: false,
        }
    }
}

impl Settings {
    pub fn data_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_path().join(DB_FILE)
    }

    pub fn inbox_dir(&self) -> PathBuf {
        self.data_path().join("inbox")
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.data_path().join("sessions")
    }

    pub fn state_path(&self) -> PathBuf {
        self.data_path().join(STATE_FILE)
    }

    /// Environment overrides for the suggester endpoint and models.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    fn apply_env_from(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(url) = get("OLLAMA_URL").filter(|v| !v.is_empty()) {
            self.suggester.url = url;
        }
        let models = &mut self.suggester.models;
        for (key, slot) in [
            ("PENNY_EXTRACTION_MODEL", &mut models.extraction),
            ("PENNY_ORGANIZER_MODEL", &mut models.organizer),
            ("PENNY_CATEGORIZATION_MODEL", &mut models.categorization),
        ] {
            if let Some(v) = get(key).filter(|v| !v.is_empty()) {
                *slot = v;
            }
        }
    }
}

fn config_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("PENNY_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("penny")
}

fn settings_path() -> PathBuf {
    config_dir().join("settings.json")
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Documents")
        .join("penny")
}

pub fn load_settings() -> Settings {
    let path = settings_path();
    let mut settings = if path.exists() {
        let content = std::fs::read_to_string(&path).unwrap_or_default();
        serde_json::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "Unreadable settings, using defaults");
            Settings::default()
        })
    } else {
        Settings::default()
    };
    settings.apply_env();
    settings
}

pub fn save_settings(settings: &Settings) -> Result<()> {
    let dir = config_dir();
    std::fs::create_dir_all(&dir)?;
    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| PennyError::Settings(e.to_string()))?;
    std::fs::write(settings_path(), format!("{json}\n"))?;
    Ok(())
}

pub fn shellexpand_path(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| PathBuf::from(path))
        .to_string_lossy()
        .to_string()
}
