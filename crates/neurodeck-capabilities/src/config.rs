//! Settings for the standard capability set.
//!
//! Behavioral settings (capture region, voice, file paths, queue sizing) come
//! from an optional TOML file. Credentials come exclusively from environment
//! variables so they never land in a config file that might be synced off the
//! device; the binary loads a `.env` file into the environment first.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use neurodeck_engine::DispatcherConfig;

/// Settings file probed in the working directory when no explicit path is
/// supplied.
pub const DEFAULT_SETTINGS_FILE: &str = "neurodeck.toml";

/// Errors raised while loading settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// The settings file could not be read.
    #[error("failed to read settings file `{}`: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The settings file is not valid TOML for this schema.
    #[error("failed to parse settings file `{}`: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Top-level settings, one section per adapter plus dispatcher tuning.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Screen capture region and output directory.
    pub capture: CaptureSettings,
    /// Vision model endpoint and sampling.
    pub vision: VisionSettings,
    /// Text-to-speech voice and limits.
    pub speech: SpeechSettings,
    /// Append-only journal location.
    pub journal: JournalSettings,
    /// Pending queue and deadline tuning.
    pub dispatcher: DispatcherSettings,
    /// Service credentials, never serialized.
    #[serde(skip)]
    pub credentials: Credentials,
}

impl Settings {
    /// Load settings from `path`, or from [`DEFAULT_SETTINGS_FILE`] if it
    /// exists, or fall back to defaults. Credentials are overlaid from the
    /// environment in every case.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = Path::new(DEFAULT_SETTINGS_FILE);
                if default.exists() {
                    Self::from_file(default)?
                } else {
                    Self::default()
                }
            }
        };
        settings.credentials = Credentials::from_env();
        Ok(settings)
    }

    /// Parse a settings file. Missing sections and fields keep their
    /// defaults.
    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Pixel rectangle of the screen region the wearable overlay occupies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureRegion {
    pub top: u32,
    pub left: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for CaptureRegion {
    fn default() -> Self {
        // The overlay window the deck projects into.
        Self {
            top: 140,
            left: 25,
            width: 400,
            height: 600,
        }
    }
}

/// Screen capture adapter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Region of the screen to grab.
    pub region: CaptureRegion,
    /// Directory snapshots are written into.
    pub shots_dir: PathBuf,
    /// Seconds allowed for the capture command to finish.
    pub timeout_secs: u64,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            region: CaptureRegion::default(),
            shots_dir: PathBuf::from("shots"),
            timeout_secs: 10,
        }
    }
}

/// Vision analysis adapter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionSettings {
    /// Chat-completions endpoint that accepts image content parts.
    pub endpoint: String,
    /// Model identifier sent with each request.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Seconds allowed for one analysis round trip.
    pub request_timeout_secs: u64,
}

impl Default for VisionSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://api.cohere.com/v2/chat".to_string(),
            model: "command-a-vision-07-2025".to_string(),
            temperature: 0.3,
            request_timeout_secs: 30,
        }
    }
}

/// Text-to-speech adapter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechSettings {
    /// Voice passed to the platform synthesizer where it supports one.
    pub voice: String,
    /// Seconds allowed for one spoken line.
    pub timeout_secs: u64,
}

impl Default for SpeechSettings {
    fn default() -> Self {
        Self {
            voice: "Alex".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Journal adapter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalSettings {
    /// JSON-lines file every workflow run appends one record to.
    pub path: PathBuf,
}

impl Default for JournalSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("workflow_log.jsonl"),
        }
    }
}

/// Dispatcher tuning, mapped onto the engine's [`DispatcherConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherSettings {
    /// Pending signals held while a workflow runs before new ones are
    /// dropped.
    pub queue_capacity: usize,
    /// Seconds a queued signal may wait before it is flagged as stale.
    pub soft_deadline_secs: u64,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 8,
            soft_deadline_secs: 60,
        }
    }
}

impl DispatcherSettings {
    /// The engine-level configuration this section maps to.
    pub fn to_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            queue_capacity: self.queue_capacity,
            soft_deadline: Duration::from_secs(self.soft_deadline_secs),
        }
    }
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Service credentials read from the environment. Every field is optional;
/// adapters that need a missing credential fail their own invocations with an
/// auth error instead of blocking startup.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    /// Bearer key for the vision endpoint (`COHERE_API_KEY`).
    pub cohere_api_key: Option<String>,
    /// Optional geolocation token (`IPINFO_TOKEN`).
    pub ipinfo_token: Option<String>,
    /// SMS account identifier (`TWILIO_ACCOUNT_SID`).
    pub twilio_account_sid: Option<String>,
    /// SMS auth token (`TWILIO_AUTH_TOKEN`).
    pub twilio_auth_token: Option<String>,
    /// Sender number for outbound SMS (`TWILIO_PHONE_NUMBER`).
    pub twilio_phone_number: Option<String>,
    /// Default destination for alerts and check-ins (`EMERGENCY_CONTACT`).
    pub emergency_contact: Option<String>,
}

impl Credentials {
    /// Read the credential set from process environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the credential set through the given variable lookup. Blank
    /// values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        Self {
            cohere_api_key: read("COHERE_API_KEY"),
            ipinfo_token: read("IPINFO_TOKEN"),
            twilio_account_sid: read("TWILIO_ACCOUNT_SID"),
            twilio_auth_token: read("TWILIO_AUTH_TOKEN"),
            twilio_phone_number: read("TWILIO_PHONE_NUMBER"),
            emergency_contact: read("EMERGENCY_CONTACT"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_the_deck_overlay() {
        let settings = Settings::default();
        assert_eq!(
            settings.capture.region,
            CaptureRegion {
                top: 140,
                left: 25,
                width: 400,
                height: 600
            }
        );
        assert_eq!(settings.speech.voice, "Alex");
        assert_eq!(settings.journal.path, PathBuf::from("workflow_log.jsonl"));
        assert_eq!(settings.dispatcher.queue_capacity, 8);
        assert_eq!(settings.dispatcher.soft_deadline_secs, 60);
    }

    #[test]
    fn partial_file_keeps_unnamed_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("neurodeck.toml");
        std::fs::write(
            &path,
            r#"
[capture]
region = { top = 100, left = 0, width = 800, height = 600 }
shots_dir = "/tmp/shots"

[speech]
voice = "Samantha"

[dispatcher]
queue_capacity = 3
"#,
        )
        .unwrap();

        let settings = Settings::from_file(&path).unwrap();
        assert_eq!(settings.capture.region.width, 800);
        assert_eq!(settings.capture.shots_dir, PathBuf::from("/tmp/shots"));
        assert_eq!(settings.capture.timeout_secs, 10);
        assert_eq!(settings.speech.voice, "Samantha");
        assert_eq!(settings.dispatcher.queue_capacity, 3);
        assert_eq!(settings.dispatcher.soft_deadline_secs, 60);
        assert_eq!(settings.vision.model, "command-a-vision-07-2025");
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[capture\nregion = oops").unwrap();

        let err = Settings::from_file(&path).unwrap_err();
        assert!(matches!(err, SettingsError::Parse { .. }));
    }

    #[test]
    fn missing_explicit_file_is_a_read_error() {
        let err = Settings::from_file(Path::new("/nonexistent/neurodeck.toml")).unwrap_err();
        assert!(matches!(err, SettingsError::Read { .. }));
    }

    #[test]
    fn credentials_trim_and_drop_blank_values() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("COHERE_API_KEY", "  key-123  "),
            ("TWILIO_ACCOUNT_SID", ""),
            ("EMERGENCY_CONTACT", "+15550001111"),
        ]);
        let credentials = Credentials::from_lookup(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(credentials.cohere_api_key.as_deref(), Some("key-123"));
        assert_eq!(credentials.twilio_account_sid, None);
        assert_eq!(credentials.twilio_auth_token, None);
        assert_eq!(
            credentials.emergency_contact.as_deref(),
            Some("+15550001111")
        );
    }

    #[test]
    fn dispatcher_section_maps_to_engine_config() {
        let section = DispatcherSettings {
            queue_capacity: 4,
            soft_deadline_secs: 90,
        };
        let config = section.to_config();
        assert_eq!(config.queue_capacity, 4);
        assert_eq!(config.soft_deadline, Duration::from_secs(90));
    }
}
