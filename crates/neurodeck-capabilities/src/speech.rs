//! Speech adapter -- spoken feedback through whichever synthesizer the host
//! actually has.
//!
//! Tries a platform-ordered chain of command-line engines (`say` with the
//! configured voice on macOS, then `espeak`, then `flite`) and reports which
//! one played the line. A host with no working engine yields an
//! `Unavailable` error rather than a panic; the workflows that speak treat
//! that as a degraded step.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, warn};

use neurodeck_engine::{Capability, CapabilityError, CapabilityResult, SPEECH_CAPABILITY};

use crate::config::SpeechSettings;

/// One command-line text-to-speech engine.
#[derive(Debug, Clone)]
pub struct TtsEngine {
    /// Program to run.
    program: String,
    /// Arguments placed before the text.
    args: Vec<String>,
}

impl TtsEngine {
    /// Describe an engine as a program plus its fixed arguments.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// The engine's program name.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Run the engine on `text`, bounded by `timeout`.
    async fn speak(&self, text: &str, timeout: Duration) -> Result<(), String> {
        let child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg(text)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("failed to start `{}`: {e}", self.program))?;

        // On timeout the child is dropped and killed via kill_on_drop(true).
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) if output.status.success() => Ok(()),
            Ok(Ok(output)) => Err(format!("`{}` exited with {}", self.program, output.status)),
            Ok(Err(e)) => Err(format!("`{}` failed: {e}", self.program)),
            Err(_) => Err(format!(
                "`{}` did not finish within {}s",
                self.program,
                timeout.as_secs()
            )),
        }
    }
}

/// Speech capability backed by a fallback chain of engines.
pub struct SpeechSynthesizer {
    engines: Vec<TtsEngine>,
    timeout: Duration,
}

impl SpeechSynthesizer {
    /// Create the platform-default engine chain for the configured voice.
    pub fn new(settings: &SpeechSettings) -> Self {
        Self::with_engines(
            default_engines(&settings.voice),
            Duration::from_secs(settings.timeout_secs),
        )
    }

    /// Create a synthesizer over an explicit engine chain.
    pub fn with_engines(engines: Vec<TtsEngine>, timeout: Duration) -> Self {
        Self { engines, timeout }
    }
}

/// Engine chain for this platform, best option first.
fn default_engines(voice: &str) -> Vec<TtsEngine> {
    if cfg!(target_os = "macos") {
        vec![
            TtsEngine::new("say", vec!["-v".to_string(), voice.to_string()]),
            TtsEngine::new("espeak", Vec::new()),
        ]
    } else {
        vec![
            TtsEngine::new("espeak", Vec::new()),
            TtsEngine::new("flite", vec!["-t".to_string()]),
        ]
    }
}

/// Strip shell metacharacters and flatten control characters before the text
/// reaches a child process argument list.
fn sanitize(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(c, '`' | '$'))
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect::<String>()
        .trim()
        .to_string()
}

#[async_trait]
impl Capability for SpeechSynthesizer {
    fn name(&self) -> &str {
        SPEECH_CAPABILITY
    }

    async fn invoke(&self, request: Value) -> CapabilityResult {
        let text = request
            .get("text")
            .and_then(Value::as_str)
            .ok_or_else(|| CapabilityError::InvalidRequest {
                reason: "missing required string field `text`".into(),
            })?;

        let clean = sanitize(text);
        if clean.is_empty() {
            return Err(CapabilityError::InvalidRequest {
                reason: "text is empty after sanitization".into(),
            });
        }

        debug!(chars = clean.len(), "speaking");

        let mut last_failure = "no speech engines configured".to_string();
        for engine in &self.engines {
            match engine.speak(&clean, self.timeout).await {
                Ok(()) => {
                    return Ok(json!({
                        "spoken": true,
                        "engine": engine.program(),
                    }));
                }
                Err(reason) => {
                    warn!(engine = %engine.program(), %reason, "speech engine failed, trying next");
                    last_failure = reason;
                }
            }
        }

        Err(CapabilityError::Unavailable {
            reason: format!("no speech engine could play the line ({last_failure})"),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
