//! Phrase selector -- random pick from the built-in comfort phrase lists.
//!
//! The stress-relief workflow draws a calming activity and an affirmation
//! from fixed lists so the spoken lines stay reviewed and predictable. Lists
//! are addressed by name; asking for one that does not exist is a request
//! error, not a silent empty pick.

use async_trait::async_trait;
use rand::seq::SliceRandom;
use serde_json::{Value, json};
use tracing::debug;

use neurodeck_engine::{Capability, CapabilityError, CapabilityResult};

/// Name of the calming-activity list.
pub const CALMING_LIST: &str = "calming";

/// Name of the affirmation list.
pub const AFFIRMATION_LIST: &str = "affirmation";

/// Calming activities announced before the breathing exercise.
const CALMING_ACTIVITIES: &[&str] = &[
    "Playing your favorite calm playlist",
    "Starting guided breathing exercise",
    "Playing nature sounds",
    "Starting meditation session",
    "Playing lo-fi music",
];

/// Affirmations spoken at the end of the stress-relief routine.
const AFFIRMATIONS: &[&str] = &[
    "You are strong and capable of handling whatever comes your way.",
    "This feeling is temporary. You have overcome challenges before and you will again.",
    "Take it one breath at a time. You've got this.",
    "You are exactly where you need to be right now.",
    "Your mental health matters. It's okay to take a moment for yourself.",
];

/// Phrase selection capability.
#[derive(Debug, Default)]
pub struct PhraseSelector;

impl PhraseSelector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Capability for PhraseSelector {
    fn name(&self) -> &str {
        "select_phrase"
    }

    async fn invoke(&self, request: Value) -> CapabilityResult {
        let list = request
            .get("list")
            .and_then(Value::as_str)
            .ok_or_else(|| CapabilityError::InvalidRequest {
                reason: "missing required string field `list`".into(),
            })?;

        let phrases = match list {
            CALMING_LIST => CALMING_ACTIVITIES,
            AFFIRMATION_LIST => AFFIRMATIONS,
            other => {
                return Err(CapabilityError::InvalidRequest {
                    reason: format!("unknown phrase list `{other}`"),
                });
            }
        };

        // ThreadRng is not Send; keep it scoped away from the await machinery.
        let text = {
            let mut rng = rand::thread_rng();
            phrases.choose(&mut rng).copied().unwrap_or_default()
        };

        debug!(list, "phrase selected");

        Ok(json!({
            "text": text,
            "list": list,
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn calming_pick_comes_from_the_calming_list() {
        let selector = PhraseSelector::new();
        let payload = selector
            .invoke(json!({"list": CALMING_LIST}))
            .await
            .unwrap();

        let text = payload["text"].as_str().unwrap();
        assert!(CALMING_ACTIVITIES.contains(&text));
        assert_eq!(payload["list"], CALMING_LIST);
    }

    #[tokio::test]
    async fn affirmation_pick_comes_from_the_affirmation_list() {
        let selector = PhraseSelector::new();
        let payload = selector
            .invoke(json!({"list": AFFIRMATION_LIST}))
            .await
            .unwrap();

        let text = payload["text"].as_str().unwrap();
        assert!(AFFIRMATIONS.contains(&text));
    }

    #[tokio::test]
    async fn unknown_list_is_rejected() {
        let selector = PhraseSelector::new();
        let err = selector
            .invoke(json!({"list": "jokes"}))
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn missing_list_is_rejected() {
        let selector = PhraseSelector::new();
        let err = selector.invoke(json!({})).await.unwrap_err();
        assert!(matches!(err, CapabilityError::InvalidRequest { .. }));
    }
}
