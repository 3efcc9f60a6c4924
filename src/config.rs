use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::imaging::chroma_key::DEFAULT_KEYING_TIMEOUT;
use crate::pipeline::gemini::GeminiConfig;
use crate::session::store::DEFAULT_SNAPSHOT_MAX_BYTES;

pub const DEFAULT_BIND: &str = "127.0.0.1:8790";
pub const DEFAULT_DB_PATH: &str = "var/backend/session.db";
pub const SETTINGS_FILE: &str = "config/editor.settings.toml";
/// Request body cap. Images arrive base64-encoded inside JSON, so this sits
/// well above the largest photo a user is expected to upload.
pub const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("failed to read editor settings '{path}': {message}")]
    ReadFile { path: String, message: String },
    #[error("failed to parse editor settings TOML '{path}': {message}")]
    ParseToml { path: String, message: String },
    #[error("setting '{key}' must be {expected}, got '{value}'")]
    InvalidValue {
        key: &'static str,
        expected: &'static str,
        value: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditorConfig {
    pub bind: String,
    pub max_body_bytes: usize,
    pub db_path: PathBuf,
    pub snapshot_max_bytes: usize,
    pub keying_timeout: Duration,
    pub gemini: GeminiConfig,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            bind: String::from(DEFAULT_BIND),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            snapshot_max_bytes: DEFAULT_SNAPSHOT_MAX_BYTES,
            keying_timeout: DEFAULT_KEYING_TIMEOUT,
            gemini: GeminiConfig::default(),
        }
    }
}

/// Optional `config/editor.settings.toml`. Secrets are never read from it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SettingsOverlay {
    pub server: ServerSettings,
    pub storage: StorageSettings,
    pub gemini: GeminiSettings,
    pub imaging: ImagingSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: Option<String>,
    pub max_body_bytes: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub db_path: Option<String>,
    pub snapshot_max_bytes: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GeminiSettings {
    pub api_base_url: Option<String>,
    pub analysis_model: Option<String>,
    pub image_model: Option<String>,
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ImagingSettings {
    pub keying_timeout_secs: Option<u64>,
}

impl EditorConfig {
    /// Environment first, then `<app_root>/.env`, then the settings file,
    /// then defaults. Relative database paths resolve against `app_root`.
    pub fn resolve(app_root: &Path) -> Result<Self, ConfigError> {
        let dotenv = load_dotenv_map(app_root)?;
        let settings = load_settings_overlay(app_root.join(SETTINGS_FILE).as_path())?;
        Self::from_sources(
            app_root,
            |key| {
                std::env::var(key)
                    .ok()
                    .or_else(|| dotenv.get(key).cloned())
            },
            &settings,
        )
    }

    pub fn from_sources(
        app_root: &Path,
        lookup: impl Fn(&str) -> Option<String>,
        settings: &SettingsOverlay,
    ) -> Result<Self, ConfigError> {
        let lookup = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = GeminiConfig::default();

        let bind = lookup("THUMB_EDITOR_BIND")
            .or_else(|| settings.server.bind.clone())
            .unwrap_or_else(|| String::from(DEFAULT_BIND));

        let max_body_bytes = match lookup("THUMB_EDITOR_MAX_BODY_BYTES") {
            Some(raw) => parse_number("THUMB_EDITOR_MAX_BODY_BYTES", raw.as_str())?,
            None => settings
                .server
                .max_body_bytes
                .unwrap_or(DEFAULT_MAX_BODY_BYTES),
        };

        let db_raw = lookup("THUMB_EDITOR_DB")
            .or_else(|| settings.storage.db_path.clone())
            .unwrap_or_else(|| String::from(DEFAULT_DB_PATH));
        let db_candidate = PathBuf::from(db_raw);
        let db_path = if db_candidate.is_absolute() {
            db_candidate
        } else {
            app_root.join(db_candidate)
        };

        let snapshot_max_bytes = match lookup("THUMB_EDITOR_SNAPSHOT_MAX_BYTES") {
            Some(raw) => parse_number("THUMB_EDITOR_SNAPSHOT_MAX_BYTES", raw.as_str())?,
            None => settings
                .storage
                .snapshot_max_bytes
                .unwrap_or(DEFAULT_SNAPSHOT_MAX_BYTES),
        };

        let keying_timeout = match lookup("THUMB_EDITOR_KEYING_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(parse_number(
                "THUMB_EDITOR_KEYING_TIMEOUT_SECS",
                raw.as_str(),
            )?),
            None => settings
                .imaging
                .keying_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_KEYING_TIMEOUT),
        };

        let request_timeout = match lookup("THUMB_EDITOR_REQUEST_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(parse_number(
                "THUMB_EDITOR_REQUEST_TIMEOUT_SECS",
                raw.as_str(),
            )?),
            None => settings
                .gemini
                .request_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
        };

        let gemini = GeminiConfig {
            api_key: lookup("GEMINI_API_KEY").or_else(|| lookup("API_KEY")),
            api_base_url: lookup("GEMINI_API_BASE_URL")
                .or_else(|| settings.gemini.api_base_url.clone())
                .unwrap_or(defaults.api_base_url),
            analysis_model: lookup("GEMINI_ANALYSIS_MODEL")
                .or_else(|| settings.gemini.analysis_model.clone())
                .unwrap_or(defaults.analysis_model),
            image_model: lookup("GEMINI_IMAGE_MODEL")
                .or_else(|| settings.gemini.image_model.clone())
                .unwrap_or(defaults.image_model),
            request_timeout,
        };

        Ok(Self {
            bind,
            max_body_bytes,
            db_path,
            snapshot_max_bytes,
            keying_timeout,
            gemini,
        })
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.parse::<T>().map_err(|_| ConfigError::InvalidValue {
        key,
        expected: "a non-negative integer",
        value: raw.to_string(),
    })
}

pub fn load_settings_overlay(path: &Path) -> Result<SettingsOverlay, ConfigError> {
    if !path.exists() {
        return Ok(SettingsOverlay::default());
    }
    let raw = fs::read_to_string(path).map_err(|error| ConfigError::ReadFile {
        path: path.display().to_string(),
        message: error.to_string(),
    })?;
    toml::from_str::<SettingsOverlay>(raw.as_str()).map_err(|error| ConfigError::ParseToml {
        path: path.display().to_string(),
        message: error.to_string(),
    })
}

pub fn load_dotenv_map(app_root: &Path) -> Result<HashMap<String, String>, ConfigError> {
    let path = app_root.join(".env");
    if !path.is_file() {
        return Ok(HashMap::new());
    }
    let raw = fs::read_to_string(path.as_path()).map_err(|error| ConfigError::ReadFile {
        path: path.display().to_string(),
        message: error.to_string(),
    })?;
    Ok(parse_dotenv_content(raw.as_str()))
}

pub fn parse_dotenv_content(raw: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for line in raw.lines() {
        let mut value = line.trim();
        if value.is_empty() || value.starts_with('#') {
            continue;
        }
        if let Some(rest) = value.strip_prefix("export ") {
            value = rest.trim_start();
        }
        let Some((key_raw, value_raw)) = value.split_once('=') else {
            continue;
        };
        let key = key_raw.trim();
        if key.is_empty() {
            continue;
        }
        let mut parsed = value_raw.trim().to_string();
        if parsed.len() >= 2
            && ((parsed.starts_with('"') && parsed.ends_with('"'))
                || (parsed.starts_with('\'') && parsed.ends_with('\'')))
        {
            parsed = parsed[1..parsed.len() - 1].to_string();
        } else if let Some((before_comment, _)) = parsed.split_once(" #") {
            parsed = before_comment.trim_end().to_string();
        }
        out.insert(key.to_string(), parsed);
    }
    out
}
