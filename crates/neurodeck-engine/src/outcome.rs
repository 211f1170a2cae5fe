//! Result and record model.
//!
//! Every dispatch — whether the workflow ran, degraded, aborted, or never
//! started — produces exactly one [`WorkflowResult`]: the uniform, auditable
//! record the journal persists and the caller receives.  Per-step detail
//! lives in the ordered [`StepOutcome`] trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Failure taxonomy
// ---------------------------------------------------------------------------

/// Why a step or a whole invocation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The signal token matched no registered workflow.
    UnknownSignal,
    /// The pending queue was full and the signal was dropped.
    QueueOverflow,
    /// The step's capability call exceeded its declared timeout.
    StepTimeout,
    /// The capability reported an auth, network, or malformed-response
    /// failure.
    StepTransport,
    /// The signal was cancelled by the caller while still queued.
    Cancelled,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownSignal => write!(f, "unknown_signal"),
            Self::QueueOverflow => write!(f, "queue_overflow"),
            Self::StepTimeout => write!(f, "step_timeout"),
            Self::StepTransport => write!(f, "step_transport"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

// ---------------------------------------------------------------------------
// Step outcomes
// ---------------------------------------------------------------------------

/// Terminal state of a single executed step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StepStatus {
    /// The capability call succeeded; its payload was published to context.
    Ok { payload: Value },
    /// The capability call failed and the step's policy recorded it.
    Failed { reason: FailureReason, detail: String },
    /// The capability call failed and the step's `Substitute` policy
    /// published this default payload in its place.
    Skipped { substitute: Value },
}

/// What happened to one step of a workflow invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    /// The step's name from its spec.
    pub step: String,
    /// Terminal status with payload or failure detail.
    pub status: StepStatus,
    /// Wall-clock duration of the capability call, in milliseconds.
    pub elapsed_ms: u64,
}

impl StepOutcome {
    /// A successful step.
    pub fn ok(step: impl Into<String>, payload: Value, elapsed: std::time::Duration) -> Self {
        Self {
            step: step.into(),
            status: StepStatus::Ok { payload },
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    /// A failed step recorded under a `Continue` or `Abort` policy.
    pub fn failed(
        step: impl Into<String>,
        reason: FailureReason,
        detail: impl Into<String>,
        elapsed: std::time::Duration,
    ) -> Self {
        Self {
            step: step.into(),
            status: StepStatus::Failed {
                reason,
                detail: detail.into(),
            },
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    /// A failed step absorbed by a `Substitute` policy.
    pub fn skipped(step: impl Into<String>, substitute: Value, elapsed: std::time::Duration) -> Self {
        Self {
            step: step.into(),
            status: StepStatus::Skipped { substitute },
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    /// Whether this outcome degrades the overall run status.
    pub fn is_degraded(&self) -> bool {
        matches!(
            self.status,
            StepStatus::Failed { .. } | StepStatus::Skipped { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// Workflow results
// ---------------------------------------------------------------------------

/// Overall status of a workflow invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every step succeeded.
    Completed,
    /// At least one `Continue` or `Substitute` step failed, but the
    /// pipeline ran to the end.
    CompletedWithDegradation,
    /// An `Abort`-policy step failed, the signal was rejected before
    /// running, or the run was cancelled.
    Aborted,
}

/// The uniform record produced for every dispatched signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResult {
    /// The workflow token that was requested (verbatim, even when unknown).
    pub workflow: String,
    /// The invocation id of the signal that triggered this run.
    pub invocation_id: Uuid,
    /// When execution (or rejection) began.
    pub started_at: DateTime<Utc>,
    /// When the result was sealed.
    pub finished_at: DateTime<Utc>,
    /// Overall status.
    pub status: RunStatus,
    /// Set when the invocation was rejected or aborted with a classifiable
    /// cause; `None` for completed and degraded runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    /// User-facing summary line, spoken by the dispatcher on completion.
    pub summary: String,
    /// Per-step trail in execution order.  Empty for rejections; shorter
    /// than the definition when an abort cut the pipeline short.
    pub outcomes: Vec<StepOutcome>,
}

impl WorkflowResult {
    /// Build the record for a signal that never reached the engine: unknown
    /// token, queue overflow, or cancellation while queued.
    pub fn rejected(
        token: impl Into<String>,
        invocation_id: Uuid,
        reason: FailureReason,
        summary: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            workflow: token.into(),
            invocation_id,
            started_at: now,
            finished_at: now,
            status: RunStatus::Aborted,
            reason: Some(reason),
            summary: summary.into(),
            outcomes: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn step_outcome_constructors_classify_degradation() {
        let ok = StepOutcome::ok("capture", json!({"path": "/tmp/x.jpg"}), Duration::ZERO);
        assert!(!ok.is_degraded());

        let failed = StepOutcome::failed(
            "alert",
            FailureReason::StepTransport,
            "connection refused",
            Duration::from_millis(12),
        );
        assert!(failed.is_degraded());

        let skipped = StepOutcome::skipped("analyze", json!({"text": "analysis unavailable"}), Duration::ZERO);
        assert!(skipped.is_degraded());
    }

    #[test]
    fn result_serializes_with_snake_case_states() {
        let result = WorkflowResult {
            workflow: "SNAPSHOT".into(),
            invocation_id: Uuid::now_v7(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            status: RunStatus::CompletedWithDegradation,
            reason: None,
            summary: "done".into(),
            outcomes: vec![StepOutcome::failed(
                "analyze",
                FailureReason::StepTimeout,
                "exceeded 30s",
                Duration::from_secs(30),
            )],
        };

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["status"], "completed_with_degradation");
        assert_eq!(value["outcomes"][0]["status"]["state"], "failed");
        assert_eq!(value["outcomes"][0]["status"]["reason"], "step_timeout");
        assert!(value.get("reason").is_none());
    }

    #[test]
    fn rejected_result_has_no_outcomes() {
        let result = WorkflowResult::rejected(
            "NOPE",
            Uuid::now_v7(),
            FailureReason::UnknownSignal,
            "Unknown workflow requested",
        );
        assert_eq!(result.status, RunStatus::Aborted);
        assert_eq!(result.reason, Some(FailureReason::UnknownSignal));
        assert!(result.outcomes.is_empty());
        assert_eq!(result.started_at, result.finished_at);
    }
}
