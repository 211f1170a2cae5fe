//! Workflow engine.
//!
//! Executes a workflow definition's steps strictly in order via the
//! [`StepExecutor`], aggregates the per-step trail into a
//! [`WorkflowResult`], and guarantees exactly one journal record per
//! invocation.  The engine is invoked only while the dispatcher holds the
//! execution slot; it has no knowledge of queueing or slot arbitration.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::capability::{CapabilitySet, JOURNAL_CAPABILITY};
use crate::executor::{SIGNAL_CONTEXT_KEY, StepContext, StepExecutor, StepFlow, TRAIL_CONTEXT_KEY};
use crate::outcome::{RunStatus, StepOutcome, StepStatus, WorkflowResult};
use crate::registry::{WorkflowDefinition, spoken_name};
use crate::signal::Signal;

/// Elapsed time past which a finished run is logged as slow.  Observability
/// only; never enforced as an abort.
const DEFAULT_SOFT_DEADLINE: Duration = Duration::from_secs(60);

/// Sequential step runner producing the uniform invocation record.
pub struct WorkflowEngine {
    executor: StepExecutor,
    capabilities: Arc<CapabilitySet>,
    soft_deadline: Duration,
}

impl WorkflowEngine {
    /// Create an engine over the given capability set.
    #[must_use]
    pub fn new(capabilities: Arc<CapabilitySet>) -> Self {
        Self {
            executor: StepExecutor::new(Arc::clone(&capabilities)),
            capabilities,
            soft_deadline: DEFAULT_SOFT_DEADLINE,
        }
    }

    /// Set the soft deadline used for slow-run logging.
    pub fn with_soft_deadline(mut self, soft_deadline: Duration) -> Self {
        self.soft_deadline = soft_deadline;
        self
    }

    /// Execute a workflow for the given signal.
    ///
    /// Always returns a [`WorkflowResult`]; a degraded or aborted run is a
    /// normal return value.  The context is seeded with the signal's
    /// metadata, and the invocation trail recorded so far is refreshed
    /// before each step so journal steps can persist it.
    pub async fn execute(&self, definition: &WorkflowDefinition, signal: &Signal) -> WorkflowResult {
        let started_at = Utc::now();
        let started = Instant::now();

        info!(
            workflow = %definition.token,
            invocation_id = %signal.invocation_id,
            steps = definition.steps.len(),
            "starting workflow execution"
        );

        let mut ctx = StepContext::new();
        ctx.insert(
            SIGNAL_CONTEXT_KEY,
            json!({
                "token": signal.token,
                "invocation_id": signal.invocation_id,
                "received_at": signal.received_at,
            }),
        );

        let mut outcomes: Vec<StepOutcome> = Vec::with_capacity(definition.steps.len());
        let mut aborted = false;
        let mut journaled = false;

        for spec in &definition.steps {
            ctx.insert(
                TRAIL_CONTEXT_KEY,
                trail_record(definition, signal, started_at, &outcomes),
            );
            if spec.capability == JOURNAL_CAPABILITY {
                // The journal step is this invocation's one write attempt;
                // the engine must not write a second record after it.
                journaled = true;
            }
            match self.executor.run(spec, &mut ctx).await {
                StepFlow::Proceed(outcome) => outcomes.push(outcome),
                StepFlow::Abort(outcome) => {
                    outcomes.push(outcome);
                    aborted = true;
                    break;
                }
            }
        }

        let status = if aborted {
            RunStatus::Aborted
        } else if outcomes.iter().any(StepOutcome::is_degraded) {
            RunStatus::CompletedWithDegradation
        } else {
            RunStatus::Completed
        };

        let reason = match status {
            RunStatus::Aborted => outcomes.last().and_then(|outcome| match &outcome.status {
                StepStatus::Failed { reason, .. } => Some(*reason),
                _ => None,
            }),
            _ => None,
        };

        let summary = match status {
            RunStatus::Aborted => {
                format!("Error occurred in {} workflow", spoken_name(&definition.token))
            }
            _ => summary_text(&outcomes).unwrap_or_else(|| {
                format!("{} workflow completed", spoken_name(&definition.token))
            }),
        };

        let elapsed = started.elapsed();
        if elapsed > self.soft_deadline {
            warn!(
                workflow = %definition.token,
                elapsed_ms = elapsed.as_millis() as u64,
                deadline_ms = self.soft_deadline.as_millis() as u64,
                "workflow exceeded its soft deadline"
            );
        }

        let result = WorkflowResult {
            workflow: definition.token.clone(),
            invocation_id: signal.invocation_id,
            started_at,
            finished_at: Utc::now(),
            status,
            reason,
            summary,
            outcomes,
        };

        info!(
            workflow = %result.workflow,
            invocation_id = %result.invocation_id,
            status = ?result.status,
            elapsed_ms = elapsed.as_millis() as u64,
            "workflow execution complete"
        );

        if !journaled {
            self.write_closing_record(&result).await;
        }

        result
    }

    /// Closing journal write for invocations whose pipeline did not reach a
    /// journal step (none defined, or cut off by an abort).
    async fn write_closing_record(&self, result: &WorkflowResult) {
        let Some(journal) = self.capabilities.get(JOURNAL_CAPABILITY) else {
            warn!(
                workflow = %result.workflow,
                "journal capability missing; invocation record dropped"
            );
            return;
        };
        let record = match serde_json::to_value(result) {
            Ok(record) => record,
            Err(err) => {
                warn!(
                    workflow = %result.workflow,
                    error = %err,
                    "invocation record not serializable"
                );
                return;
            }
        };
        if let Err(err) = journal.invoke(json!({"record": record})).await {
            warn!(workflow = %result.workflow, error = %err, "journal write failed");
        }
    }
}

/// The running invocation trail published under the `trail` context key.
fn trail_record(
    definition: &WorkflowDefinition,
    signal: &Signal,
    started_at: DateTime<Utc>,
    outcomes: &[StepOutcome],
) -> Value {
    json!({
        "workflow": definition.token,
        "invocation_id": signal.invocation_id,
        "started_at": started_at,
        "recorded_at": Utc::now(),
        "outcomes": outcomes,
    })
}

/// The user-facing line for a finished run: the most recent successful
/// payload that carries text (a string payload, or an object with a `text`
/// field).
fn summary_text(outcomes: &[StepOutcome]) -> Option<String> {
    outcomes.iter().rev().find_map(|outcome| match &outcome.status {
        StepStatus::Ok { payload } => payload_text(payload),
        _ => None,
    })
}

fn payload_text(payload: &Value) -> Option<String> {
    match payload {
        Value::String(text) if !text.trim().is_empty() => Some(text.clone()),
        Value::Object(map) => map
            .get("text")
            .and_then(Value::as_str)
            .filter(|text| !text.trim().is_empty())
            .map(str::to_owned),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
