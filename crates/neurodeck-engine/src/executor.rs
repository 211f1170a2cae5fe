//! Step executor.
//!
//! Runs a single [`StepSpec`] against its capability: renders the request
//! template from the accumulated workflow context, enforces the step's
//! timeout, and applies its failure policy.  Failures never escape as
//! errors — they become [`StepOutcome`]s, and only an `Abort`-policy failure
//! stops the pipeline.
//!
//! # Request templates
//!
//! String values in a request template may reference prior step payloads:
//!
//! - `"{{shot.path}}"` — a string consisting of exactly one placeholder is
//!   replaced by the referenced value itself, preserving its JSON type.
//! - `"Location: {{fix.lat}},{{fix.lon}}"` — embedded placeholders are
//!   rendered as text (strings verbatim, other values as compact JSON).
//! - A reference that resolves to nothing renders as `"unavailable"` and is
//!   logged; the step still runs so its own failure handling can decide
//!   what that means.

use std::sync::Arc;
use std::time::Instant;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::capability::CapabilitySet;
use crate::outcome::{FailureReason, StepOutcome};
use crate::registry::{FailurePolicy, StepSpec};

/// Context key holding the triggering signal's metadata.
pub const SIGNAL_CONTEXT_KEY: &str = "signal";

/// Context key holding the invocation trail recorded so far, refreshed
/// before each step so journal steps can persist it.
pub const TRAIL_CONTEXT_KEY: &str = "trail";

/// Placeholder rendering for references that resolve to nothing.
const UNAVAILABLE: &str = "unavailable";

// ---------------------------------------------------------------------------
// Step context
// ---------------------------------------------------------------------------

/// Accumulated payload map for one workflow invocation.
///
/// Read-only append: each step may read any prior payload by its publish
/// key and adds exactly one new named payload of its own.
#[derive(Debug, Default)]
pub struct StepContext {
    payloads: Map<String, Value>,
}

impl StepContext {
    /// Create an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a payload under the given key, replacing any previous value.
    pub fn insert(&mut self, key: impl Into<String>, payload: Value) {
        self.payloads.insert(key.into(), payload);
    }

    /// Look up a payload by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payloads.get(key)
    }

    /// Resolve a dotted reference (`key` or `key.field.subfield`) against
    /// the published payloads.
    pub fn resolve(&self, reference: &str) -> Option<&Value> {
        let mut parts = reference.split('.');
        let mut current = self.payloads.get(parts.next()?)?;
        for part in parts {
            current = current.get(part)?;
        }
        Some(current)
    }

    /// Render a request template, substituting `{{reference}}` placeholders.
    pub fn render(&self, template: &Value) -> Value {
        match template {
            Value::String(text) => self.render_text(text),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(key, value)| (key.clone(), self.render(value)))
                    .collect(),
            ),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.render(v)).collect()),
            other => other.clone(),
        }
    }

    fn render_text(&self, text: &str) -> Value {
        // A string that is exactly one placeholder substitutes the referenced
        // value itself, so non-string payloads survive templating intact.
        if let Some(reference) = exact_placeholder(text) {
            return match self.resolve(reference) {
                Some(value) => value.clone(),
                None => {
                    warn!(reference, "context reference resolved to nothing");
                    Value::String(UNAVAILABLE.to_string())
                }
            };
        }

        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find("}}") {
                Some(end) => {
                    out.push_str(&self.reference_text(after[..end].trim()));
                    rest = &after[end + 2..];
                }
                None => {
                    // Unbalanced braces are copied through verbatim.
                    out.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        Value::String(out)
    }

    fn reference_text(&self, reference: &str) -> String {
        match self.resolve(reference) {
            Some(Value::String(text)) => text.clone(),
            Some(Value::Null) | None => {
                warn!(reference, "context reference resolved to nothing");
                UNAVAILABLE.to_string()
            }
            Some(other) => other.to_string(),
        }
    }
}

fn exact_placeholder(text: &str) -> Option<&str> {
    let inner = text.strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner.trim())
}

// ---------------------------------------------------------------------------
// Step flow
// ---------------------------------------------------------------------------

/// How the workflow continues after a step.
#[derive(Debug)]
pub enum StepFlow {
    /// The pipeline proceeds to the next step.
    Proceed(StepOutcome),
    /// An `Abort`-policy step failed; the pipeline stops here.
    Abort(StepOutcome),
}

impl StepFlow {
    /// The outcome carried by either variant.
    pub fn outcome(&self) -> &StepOutcome {
        match self {
            Self::Proceed(outcome) | Self::Abort(outcome) => outcome,
        }
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Runs single steps against the injected capability set.
pub struct StepExecutor {
    capabilities: Arc<CapabilitySet>,
}

impl StepExecutor {
    /// Create an executor over the given capability set.
    #[must_use]
    pub fn new(capabilities: Arc<CapabilitySet>) -> Self {
        Self { capabilities }
    }

    /// Run one step: render its request, invoke the capability under the
    /// step's timeout, publish the payload, and apply the failure policy.
    ///
    /// Never retries; retry is a capability-adapter concern.
    pub async fn run(&self, spec: &StepSpec, ctx: &mut StepContext) -> StepFlow {
        let request = ctx.render(&spec.request);
        debug!(step = %spec.name, capability = %spec.capability, "running step");

        let started = Instant::now();
        let Some(capability) = self.capabilities.get(&spec.capability) else {
            // Construction-time validation makes this unreachable for
            // registered workflows; kept as a recorded failure, not a panic.
            return self.absorb_failure(
                spec,
                ctx,
                FailureReason::StepTransport,
                format!("capability `{}` is not registered", spec.capability),
                started.elapsed(),
            );
        };

        let call = tokio::time::timeout(spec.timeout, capability.invoke(request)).await;
        let elapsed = started.elapsed();

        match call {
            Ok(Ok(payload)) => {
                debug!(
                    step = %spec.name,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "step completed"
                );
                ctx.insert(&spec.publish_as, payload.clone());
                StepFlow::Proceed(StepOutcome::ok(&spec.name, payload, elapsed))
            }
            Ok(Err(err)) => self.absorb_failure(
                spec,
                ctx,
                FailureReason::StepTransport,
                err.to_string(),
                elapsed,
            ),
            Err(_) => self.absorb_failure(
                spec,
                ctx,
                FailureReason::StepTimeout,
                format!("step exceeded its {}ms timeout", spec.timeout.as_millis()),
                elapsed,
            ),
        }
    }

    fn absorb_failure(
        &self,
        spec: &StepSpec,
        ctx: &mut StepContext,
        reason: FailureReason,
        detail: String,
        elapsed: std::time::Duration,
    ) -> StepFlow {
        match &spec.policy {
            FailurePolicy::Abort => {
                warn!(step = %spec.name, %reason, detail = %detail, "step failed; aborting workflow");
                StepFlow::Abort(StepOutcome::failed(&spec.name, reason, detail, elapsed))
            }
            FailurePolicy::Continue => {
                warn!(step = %spec.name, %reason, detail = %detail, "step failed; continuing");
                StepFlow::Proceed(StepOutcome::failed(&spec.name, reason, detail, elapsed))
            }
            FailurePolicy::Substitute(substitute) => {
                warn!(
                    step = %spec.name,
                    %reason,
                    detail = %detail,
                    "step failed; publishing substitute payload"
                );
                ctx.insert(&spec.publish_as, substitute.clone());
                StepFlow::Proceed(StepOutcome::skipped(&spec.name, substitute.clone(), elapsed))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
