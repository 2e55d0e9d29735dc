//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across threads.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;

// ---------------------------------------------------------------------------
// TranscriptionConfig
// ---------------------------------------------------------------------------

/// Settings for the live transcription session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// Language hint passed to the speech engine as a BCP-47 tag
    /// (e.g. `"en-US"`, `"zh-CN"`).
    pub language: String,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            language: "en-US".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// SyncConfig
// ---------------------------------------------------------------------------

/// Settings for the note sync engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Name of the remote note collection.
    pub collection: String,
    /// Maximum seconds to wait for a note creation call before surfacing a
    /// timeout error.
    pub write_timeout_secs: u64,
    /// Tolerance window, in seconds, when matching an optimistic pending
    /// write against a confirmed note by owner and text. A same-owner,
    /// same-text note from another device inside this window retires the
    /// local pending entry; the confirmed copy wins either way.
    pub correlation_window_secs: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            collection: "notes".into(),
            write_timeout_secs: 15,
            correlation_window_secs: 300,
        }
    }
}

// ---------------------------------------------------------------------------
// TransformConfig
// ---------------------------------------------------------------------------

/// Settings for the AI text-transform endpoints (rewrite / translate /
/// summarize).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformConfig {
    /// Base URL the endpoint names are appended to
    /// (`{base_url}/rewrite`, `{base_url}/translate`, `{base_url}/summarize`).
    pub base_url: String,
    /// API key — `None` when the endpoint requires no authentication.
    pub api_key: Option<String>,
    /// Maximum seconds to wait for a transform response (the whole streamed
    /// body, not just the first byte) before timing out.
    pub timeout_secs: u64,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api/openai".into(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use voice_notes::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
///
/// // Modify and save
/// // config.save().unwrap();
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Live transcription settings.
    pub transcription: TranscriptionConfig,
    /// Note sync engine settings.
    pub sync: SyncConfig,
    /// AI transform endpoint settings.
    pub transform: TransformConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet
    /// (first-run scenario) so callers never need to special-case a missing
    /// file.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns `true` when no `settings.toml` file exists yet.
    pub fn is_first_run() -> bool {
        !AppPaths::new().settings_file.exists()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
