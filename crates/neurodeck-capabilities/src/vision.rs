//! Vision adapter -- image understanding over a chat endpoint that accepts
//! image content parts.
//!
//! The captured overlay region is sent base64-encoded inside a single user
//! message. The standing prompt makes the model pick one task (solve,
//! translate, or describe) and answer tersely enough to be spoken aloud; a
//! step can override it with a `task_hint`.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};
use tracing::{debug, info};
use url::Url;

use neurodeck_engine::{Capability, CapabilityError, CapabilityResult};

use crate::config::VisionSettings;

/// Standing task prompt used when a step supplies no hint.
const SNAPSHOT_PROMPT: &str = "\
You are a compact multimodal assistant used in a real-time Snapshot tool.

Select ONE best task:

1) Math: solve and return only the final answer. If there are multiple parts, list each on its own line as (a), (b), ...
2) Translation: detect language and return the full English translation only. No extra commentary.
3) Image understanding: explain what the image shows and clarify likely confusing elements. If the image contains text or equations, transcribe the relevant parts and, if applicable, solve or translate them.

Rules:
- Be concise (ideally ≤ 3 sentences unless multiple sub-answers are required).
- No preamble, no markdown, no apologies, no chain-of-thought.
- Preserve technical symbols, numbers, and proper nouns.
- For math: include units; avoid unnecessary rounding; if assumptions are required, state them in one short sentence at the end.
- For translation: output the translated text only.
- For image: prioritize what the user likely cares about (main subjects, relationships, actions, anomalies, UI labels). Include one brief clarification note only if ambiguity would mislead.

Output format:
- Math → just the final answer (and label parts if needed).
- Translation → just the English translation.
- Image → 1–3 concise sentences (add a single 'Note: ...' line only if essential).";

/// Vision analysis capability.
pub struct VisionAnalyzer {
    endpoint: String,
    model: String,
    temperature: f32,
    api_key: Option<String>,
    http: reqwest::Client,
}

impl VisionAnalyzer {
    /// Create an analyzer from its settings section and an optional API key.
    pub fn new(settings: &VisionSettings, api_key: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("Neurodeck/0.1")
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            endpoint: settings.endpoint.clone(),
            model: settings.model.clone(),
            temperature: settings.temperature,
            api_key,
            http,
        }
    }

    fn bearer_key(&self) -> Result<&str, CapabilityError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| CapabilityError::Auth {
                reason: "COHERE_API_KEY is not configured".into(),
            })
    }

    /// Chat request carrying the prompt and the image as one user message.
    fn chat_body(&self, prompt: &str, data_uri: &str) -> Value {
        json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": prompt},
                    {"type": "image_url", "image_url": {"url": data_uri}},
                ],
            }],
        })
    }
}

/// The prompt a request asks for: its trimmed `task_hint`, or the standing
/// snapshot prompt.
fn prompt_for(request: &Value) -> &str {
    request
        .get("task_hint")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|hint| !hint.is_empty())
        .unwrap_or(SNAPSHOT_PROMPT)
}

/// Encode raw image bytes as the JPEG data URI the endpoint accepts.
fn image_data_uri(bytes: &[u8]) -> String {
    format!("data:image/jpeg;base64,{}", STANDARD.encode(bytes))
}

/// Pull the answer text out of a chat response body.
fn extract_text(body: &Value) -> Result<String, CapabilityError> {
    body.pointer("/message/content/0/text")
        .and_then(Value::as_str)
        .map(|text| text.trim().to_string())
        .ok_or_else(|| CapabilityError::MalformedResponse {
            reason: "chat response carries no message text".into(),
        })
}

#[async_trait]
impl Capability for VisionAnalyzer {
    fn name(&self) -> &str {
        "vision"
    }

    async fn invoke(&self, request: Value) -> CapabilityResult {
        let image_path = request
            .get("image_path")
            .and_then(Value::as_str)
            .ok_or_else(|| CapabilityError::InvalidRequest {
                reason: "missing required string field `image_path`".into(),
            })?;
        let prompt = prompt_for(&request);
        let key = self.bearer_key()?;

        let endpoint = Url::parse(&self.endpoint).map_err(|e| CapabilityError::Unavailable {
            reason: format!("invalid vision endpoint `{}`: {e}", self.endpoint),
        })?;

        let bytes = tokio::fs::read(image_path)
            .await
            .map_err(|e| CapabilityError::InvalidRequest {
                reason: format!("cannot read image `{image_path}`: {e}"),
            })?;

        debug!(model = %self.model, image_bytes = bytes.len(), "requesting vision analysis");

        let response = self
            .http
            .post(endpoint)
            .bearer_auth(key)
            .json(&self.chat_body(prompt, &image_data_uri(&bytes)))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CapabilityError::Transport {
                        reason: "vision request timed out".into(),
                    }
                } else {
                    CapabilityError::Transport {
                        reason: format!("vision request failed: {e}"),
                    }
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(CapabilityError::Auth {
                reason: format!("vision endpoint rejected the API key ({status})"),
            });
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(CapabilityError::Transport {
                reason: "vision endpoint rate limit exceeded".into(),
            });
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(CapabilityError::Transport {
                reason: format!("vision endpoint answered {status}: {}", detail.trim()),
            });
        }

        let body: Value =
            response
                .json()
                .await
                .map_err(|e| CapabilityError::MalformedResponse {
                    reason: format!("vision response is not JSON: {e}"),
                })?;

        let text = extract_text(&body)?;
        info!(chars = text.len(), "vision analysis received");
        Ok(json!({ "text": text }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
