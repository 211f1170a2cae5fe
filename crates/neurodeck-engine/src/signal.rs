//! Trigger signals.
//!
//! A [`Signal`] is the engine's only input: an opaque token naming the
//! requested workflow, reduced upstream from the EEG classifier before it
//! reaches this system.  The engine never inspects raw sensor data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Scheduling class of a workflow, decided by its definition rather than by
/// the sender.  Emergency-class signals bypass the bounded pending queue and
/// are always served before normal-class backlog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalClass {
    /// Default class; subject to queue capacity and FIFO ordering.
    Normal,
    /// Exempt from queue capacity; served ahead of all normal-class signals.
    Emergency,
}

impl std::fmt::Display for SignalClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Emergency => write!(f, "emergency"),
        }
    }
}

/// An incoming trigger signal.
///
/// The token is trimmed on construction; matching against the registry is
/// exact and case-sensitive.  Each signal carries a time-ordered invocation
/// id (UUID v7) that also serves as its dispatch ticket id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    /// Unique, time-ordered invocation identifier.
    pub invocation_id: Uuid,
    /// The workflow token this signal requests (e.g. `EMERGENCY`).
    pub token: String,
    /// When the signal arrived at the dispatcher boundary.
    pub received_at: DateTime<Utc>,
}

impl Signal {
    /// Create a signal for the given token, stamping arrival time and id.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            invocation_id: Uuid::now_v7(),
            token: token.into().trim().to_string(),
            received_at: Utc::now(),
        }
    }

    /// Whether the token is empty after trimming.  Empty signals are always
    /// rejected as unknown.
    pub fn is_blank(&self) -> bool {
        self.token.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
