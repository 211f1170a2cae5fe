//! Workflow definition registry.
//!
//! A [`WorkflowDefinition`] is an ordered pipeline of [`StepSpec`]s, each
//! naming a capability, a request template, a timeout, and a failure policy.
//! The registry is built once at startup, validated, and read-only from then
//! on; a validation failure is the one fatal startup condition in the
//! system.
//!
//! Request templates may reference prior step payloads with `{{key}}` or
//! `{{key.field}}` placeholders, resolved against the workflow context at
//! execution time (see [`crate::executor::StepContext`]).

use std::collections::HashMap;
use std::time::Duration;

use serde_json::{Value, json};

use crate::error::{EngineError, Result};
use crate::executor::{SIGNAL_CONTEXT_KEY, TRAIL_CONTEXT_KEY};
use crate::signal::SignalClass;

/// Default text sent by the `MESSAGE` workflow when no override is supplied.
pub const DEFAULT_MESSAGE: &str = "Hi! Just checking in. Hope you're doing well!";

/// Opening line of the `STRESS_RELIEF` workflow.
const ACKNOWLEDGE_LINE: &str =
    "I've detected that you might be feeling stressed. Let me help you relax.";

/// Guided breathing script spoken mid-way through `STRESS_RELIEF`.
const BREATHING_SCRIPT: &str = "Let's do a quick breathing exercise. \
     Breathe in slowly for 4 counts. \
     Hold for 4 counts. \
     Breathe out slowly for 6 counts. \
     Repeat this cycle 3 times.";

/// Announcement spoken when the `EMERGENCY` workflow starts.
const EMERGENCY_ANNOUNCEMENT: &str = "Emergency workflow activated. Capturing screenshot, \
     getting your location and alerting emergency contact.";

/// SOS message template; `fix` is the geolocation payload and `analysis`
/// the vision payload published by the preceding steps.
const SOS_BODY: &str = "\u{1f6a8} SOS ALERT \u{1f6a8}\nLocation: {{fix.lat}},{{fix.lon}}\nCity: {{fix.city}}, {{fix.region}}, {{fix.country}}\nTime: {{fix.timestamp}}\nIP: {{fix.ip}}\nContext: {{analysis.text}}";

/// Human/speech form of a workflow token: `STRESS_RELIEF` -> `Stress relief`.
pub fn spoken_name(token: &str) -> String {
    let lowered = token.trim().to_lowercase().replace('_', " ");
    let mut chars = lowered.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => lowered,
    }
}

// ---------------------------------------------------------------------------
// Definition types
// ---------------------------------------------------------------------------

/// What a step failure does to the rest of the workflow.
#[derive(Debug, Clone)]
pub enum FailurePolicy {
    /// The failure aborts the workflow; remaining steps do not run.
    Abort,
    /// The failure is recorded and the workflow proceeds.
    Continue,
    /// The failure is absorbed; this payload is published in place of the
    /// step's output so downstream steps still have a value to consume.
    Substitute(Value),
}

/// One step of a workflow pipeline.
#[derive(Debug, Clone)]
pub struct StepSpec {
    /// Step name, unique within the workflow.
    pub name: String,
    /// Name of the capability this step invokes.
    pub capability: String,
    /// JSON request template, rendered against the workflow context.
    pub request: Value,
    /// Per-step timeout enforced by the executor.
    pub timeout: Duration,
    /// What this step's failure does to the rest of the workflow.
    pub policy: FailurePolicy,
    /// Context key under which the step's payload is published.
    pub publish_as: String,
}

impl StepSpec {
    /// Create a step with the default timeout (10s), `Continue` policy, and
    /// a publish key equal to the step name.
    pub fn new(name: impl Into<String>, capability: impl Into<String>, request: Value) -> Self {
        let name = name.into();
        Self {
            publish_as: name.clone(),
            name,
            capability: capability.into(),
            request,
            timeout: Duration::from_secs(10),
            policy: FailurePolicy::Continue,
        }
    }

    /// Set the per-step timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the failure policy.
    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the context key the step publishes its payload under.
    pub fn publishes(mut self, key: impl Into<String>) -> Self {
        self.publish_as = key.into();
        self
    }
}

/// A complete, immutable workflow definition.
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    /// Exact signal token this definition answers to.
    pub token: String,
    /// One-line description for listings.
    pub description: String,
    /// Line spoken when the workflow starts executing.
    pub announcement: String,
    /// Scheduling class; `Emergency` bypasses the bounded queue.
    pub class: SignalClass,
    /// Ordered pipeline.
    pub steps: Vec<StepSpec>,
}

impl WorkflowDefinition {
    /// Create a normal-class definition with a generic start announcement.
    pub fn new(
        token: impl Into<String>,
        description: impl Into<String>,
        steps: Vec<StepSpec>,
    ) -> Self {
        let token = token.into();
        Self {
            announcement: format!("{} workflow activated", spoken_name(&token)),
            token,
            description: description.into(),
            class: SignalClass::Normal,
            steps,
        }
    }

    /// Override the start announcement.
    pub fn with_announcement(mut self, announcement: impl Into<String>) -> Self {
        self.announcement = announcement.into();
        self
    }

    /// Set the scheduling class.
    pub fn with_class(mut self, class: SignalClass) -> Self {
        self.class = class;
        self
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Static token-to-definition mapping, validated at construction.
pub struct WorkflowRegistry {
    definitions: HashMap<String, WorkflowDefinition>,
}

impl WorkflowRegistry {
    /// Build the registry of the four built-in workflows.
    pub fn builtin() -> Result<Self> {
        Self::from_definitions(builtin_definitions())
    }

    /// Build a registry from the given definitions, validating each one.
    ///
    /// Validation failure here means the process cannot safely serve any
    /// signal; callers are expected to treat it as fatal.
    pub fn from_definitions(definitions: Vec<WorkflowDefinition>) -> Result<Self> {
        let mut map = HashMap::with_capacity(definitions.len());
        for definition in definitions {
            Self::validate(&definition)?;
            let token = definition.token.clone();
            if map.insert(token.clone(), definition).is_some() {
                return Err(EngineError::InvalidDefinition {
                    workflow: token,
                    reason: "duplicate workflow token".into(),
                });
            }
        }
        Ok(Self { definitions: map })
    }

    /// Exact-match lookup of a trimmed signal token.
    pub fn resolve(&self, token: &str) -> Option<&WorkflowDefinition> {
        self.definitions.get(token)
    }

    /// All definitions, sorted by token for stable listings.
    pub fn definitions(&self) -> Vec<&WorkflowDefinition> {
        let mut all: Vec<&WorkflowDefinition> = self.definitions.values().collect();
        all.sort_by(|a, b| a.token.cmp(&b.token));
        all
    }

    fn validate(definition: &WorkflowDefinition) -> Result<()> {
        let invalid = |reason: String| EngineError::InvalidDefinition {
            workflow: definition.token.clone(),
            reason,
        };

        if definition.token.trim().is_empty() {
            return Err(invalid("empty workflow token".into()));
        }
        if definition.token != definition.token.trim() {
            return Err(invalid("workflow token has surrounding whitespace".into()));
        }
        if definition.steps.is_empty() {
            return Err(invalid("definition has no steps".into()));
        }

        let mut published = std::collections::HashSet::new();
        for (index, step) in definition.steps.iter().enumerate() {
            if step.name.trim().is_empty() {
                return Err(invalid(format!("step {index} has an empty name")));
            }
            if step.capability.trim().is_empty() {
                return Err(invalid(format!("step `{}` names no capability", step.name)));
            }
            if step.timeout.is_zero() {
                return Err(invalid(format!("step `{}` has a zero timeout", step.name)));
            }
            if step.publish_as.trim().is_empty() {
                return Err(invalid(format!("step `{}` has an empty publish key", step.name)));
            }
            if step.publish_as == SIGNAL_CONTEXT_KEY || step.publish_as == TRAIL_CONTEXT_KEY {
                return Err(invalid(format!(
                    "step `{}` publishes under reserved key `{}`",
                    step.name, step.publish_as
                )));
            }
            if !published.insert(step.publish_as.clone()) {
                return Err(invalid(format!(
                    "duplicate publish key `{}`",
                    step.publish_as
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Built-in definitions
// ---------------------------------------------------------------------------

fn builtin_definitions() -> Vec<WorkflowDefinition> {
    vec![
        emergency_definition(),
        snapshot_definition(),
        message_definition(),
        stress_relief_definition(),
    ]
}

/// SOS pipeline: screenshot for context, best-effort vision description,
/// location fix, SMS alert, journal entry.  Nothing after the capture may
/// block the alert from going out, hence no `Abort` policies.
fn emergency_definition() -> WorkflowDefinition {
    let sentinel_fix = json!({
        "lat": 0.0,
        "lon": 0.0,
        "ip": "unknown",
        "city": "unknown",
        "region": "unknown",
        "country": "unknown",
        "timestamp": "unknown",
    });

    WorkflowDefinition::new(
        "EMERGENCY",
        "SOS alert with screenshot context, location fix, and SMS notification",
        vec![
            StepSpec::new("capture", "capture", json!({"label": "emergency_screenshot"}))
                .publishes("shot"),
            StepSpec::new(
                "analyze",
                "vision",
                json!({
                    "image_path": "{{shot.path}}",
                    "task_hint": "Describe what is on the screen in one or two short sentences for an emergency responder.",
                }),
            )
            .with_timeout(Duration::from_secs(30))
            .with_policy(FailurePolicy::Substitute(json!({"text": "analysis unavailable"})))
            .publishes("analysis"),
            StepSpec::new("locate", "geolocate", json!({}))
                .with_timeout(Duration::from_secs(8))
                .with_policy(FailurePolicy::Substitute(sentinel_fix))
                .publishes("fix"),
            StepSpec::new("alert", "notify", json!({"body": SOS_BODY}))
                .with_timeout(Duration::from_secs(15))
                .publishes("delivery"),
            StepSpec::new("log", "journal", json!({"record": "{{trail}}"}))
                .with_timeout(Duration::from_secs(5))
                .publishes("journal_entry"),
        ],
    )
    .with_class(SignalClass::Emergency)
    .with_announcement(EMERGENCY_ANNOUNCEMENT)
}

/// Reading-assist pipeline: capture the configured region, analyze it, and
/// speak the answer.  Capture and analysis are the point of this workflow,
/// so both abort on failure.
fn snapshot_definition() -> WorkflowDefinition {
    WorkflowDefinition::new(
        "SNAPSHOT",
        "Capture the reading region, analyze it, and speak the answer",
        vec![
            StepSpec::new("capture", "capture", json!({"label": "screenshot"}))
                .with_policy(FailurePolicy::Abort)
                .publishes("shot"),
            StepSpec::new("analyze", "vision", json!({"image_path": "{{shot.path}}"}))
                .with_timeout(Duration::from_secs(30))
                .with_policy(FailurePolicy::Abort)
                .publishes("analysis"),
            StepSpec::new("speak_result", "speak", json!({"text": "{{analysis.text}}"}))
                .with_timeout(Duration::from_secs(45))
                .publishes("speech"),
        ],
    )
}

/// Check-in pipeline: announce, send the fixed message, journal it.
fn message_definition() -> WorkflowDefinition {
    WorkflowDefinition::new(
        "MESSAGE",
        "Send the check-in message to the configured contact",
        vec![
            StepSpec::new(
                "announce",
                "speak",
                json!({"text": format!("Sending message: {DEFAULT_MESSAGE}")}),
            )
            .with_timeout(Duration::from_secs(45))
            .publishes("announced"),
            StepSpec::new("send", "notify", json!({"body": DEFAULT_MESSAGE}))
                .with_timeout(Duration::from_secs(15))
                .publishes("delivery"),
            StepSpec::new("log", "journal", json!({"record": "{{trail}}"}))
                .with_timeout(Duration::from_secs(5))
                .publishes("journal_entry"),
        ],
    )
}

/// Calming pipeline: acknowledge, pick a calming activity, guide breathing,
/// pick and speak an affirmation, journal the session.
fn stress_relief_definition() -> WorkflowDefinition {
    WorkflowDefinition::new(
        "STRESS_RELIEF",
        "Guided calming sequence with breathing exercise and affirmation",
        vec![
            StepSpec::new("acknowledge", "speak", json!({"text": ACKNOWLEDGE_LINE}))
                .with_timeout(Duration::from_secs(45))
                .publishes("ack"),
            StepSpec::new("pick_calming", "select_phrase", json!({"list": "calming"}))
                .with_timeout(Duration::from_secs(5))
                .publishes("calming"),
            StepSpec::new("breathing", "speak", json!({"text": BREATHING_SCRIPT}))
                .with_timeout(Duration::from_secs(45))
                .publishes("breath"),
            StepSpec::new("pick_affirmation", "select_phrase", json!({"list": "affirmation"}))
                .with_timeout(Duration::from_secs(5))
                .publishes("affirmation"),
            StepSpec::new("speak_affirmation", "speak", json!({"text": "{{affirmation.text}}"}))
                .with_timeout(Duration::from_secs(45))
                .publishes("spoken"),
            StepSpec::new("log", "journal", json!({"record": "{{trail}}"}))
                .with_timeout(Duration::from_secs(5))
                .publishes("journal_entry"),
        ],
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registers_four_workflows() {
        let registry = WorkflowRegistry::builtin().unwrap();
        let tokens: Vec<&str> = registry
            .definitions()
            .iter()
            .map(|d| d.token.as_str())
            .collect();
        assert_eq!(tokens, vec!["EMERGENCY", "MESSAGE", "SNAPSHOT", "STRESS_RELIEF"]);
    }

    #[test]
    fn builtin_step_counts_match_pipelines() {
        let registry = WorkflowRegistry::builtin().unwrap();
        assert_eq!(registry.resolve("EMERGENCY").unwrap().steps.len(), 5);
        assert_eq!(registry.resolve("SNAPSHOT").unwrap().steps.len(), 3);
        assert_eq!(registry.resolve("MESSAGE").unwrap().steps.len(), 3);
        assert_eq!(registry.resolve("STRESS_RELIEF").unwrap().steps.len(), 6);
    }

    #[test]
    fn only_emergency_is_emergency_class() {
        let registry = WorkflowRegistry::builtin().unwrap();
        for definition in registry.definitions() {
            let expected = if definition.token == "EMERGENCY" {
                SignalClass::Emergency
            } else {
                SignalClass::Normal
            };
            assert_eq!(definition.class, expected, "{}", definition.token);
        }
    }

    #[test]
    fn unknown_token_resolves_none() {
        let registry = WorkflowRegistry::builtin().unwrap();
        assert!(registry.resolve("COFFEE").is_none());
        assert!(registry.resolve("emergency").is_none());
        assert!(registry.resolve("").is_none());
    }

    #[test]
    fn empty_pipeline_is_rejected() {
        let result =
            WorkflowRegistry::from_definitions(vec![WorkflowDefinition::new("X", "empty", vec![])]);
        assert!(matches!(
            result,
            Err(EngineError::InvalidDefinition { .. })
        ));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let definition = WorkflowDefinition::new(
            "X",
            "bad timeout",
            vec![
                StepSpec::new("a", "speak", json!({"text": "hi"}))
                    .with_timeout(Duration::ZERO),
            ],
        );
        let result = WorkflowRegistry::from_definitions(vec![definition]);
        assert!(result.is_err());
    }

    #[test]
    fn duplicate_publish_key_is_rejected() {
        let definition = WorkflowDefinition::new(
            "X",
            "duplicate keys",
            vec![
                StepSpec::new("a", "speak", json!({})).publishes("out"),
                StepSpec::new("b", "speak", json!({})).publishes("out"),
            ],
        );
        let result = WorkflowRegistry::from_definitions(vec![definition]);
        assert!(result.is_err());
    }

    #[test]
    fn reserved_publish_key_is_rejected() {
        let definition = WorkflowDefinition::new(
            "X",
            "reserved key",
            vec![StepSpec::new("a", "speak", json!({})).publishes("trail")],
        );
        let result = WorkflowRegistry::from_definitions(vec![definition]);
        assert!(result.is_err());
    }

    #[test]
    fn duplicate_token_is_rejected() {
        let make = || {
            WorkflowDefinition::new(
                "X",
                "dup",
                vec![StepSpec::new("a", "speak", json!({}))],
            )
        };
        let result = WorkflowRegistry::from_definitions(vec![make(), make()]);
        assert!(result.is_err());
    }

    #[test]
    fn spoken_name_humanizes_tokens() {
        assert_eq!(spoken_name("EMERGENCY"), "Emergency");
        assert_eq!(spoken_name("STRESS_RELIEF"), "Stress relief");
        assert_eq!(spoken_name(""), "");
    }
}
