//! Engine error types.
//!
//! All engine subsystems surface errors through [`EngineError`], the single
//! error type returned by every public API in this crate.  Each variant
//! carries enough context for callers to decide how to handle the failure
//! without inspecting opaque strings.
//!
//! Note that a workflow run that degrades or aborts is *not* an error: it is
//! a normal [`crate::outcome::WorkflowResult`].  `EngineError` covers the
//! conditions under which no result can be produced at all (bad definitions,
//! missing capabilities, a shut-down dispatcher).

use uuid::Uuid;

/// Unified error type for the neurodeck engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    // -- Registry errors ----------------------------------------------------
    /// A workflow definition failed validation at load time.  This is the
    /// only fatal startup condition: the dispatcher cannot safely serve any
    /// signal without a valid registry.
    #[error("invalid workflow definition `{workflow}`: {reason}")]
    InvalidDefinition { workflow: String, reason: String },

    // -- Dispatcher errors --------------------------------------------------
    /// A workflow definition names a capability that is not registered in
    /// the injected capability set.
    #[error("workflow `{workflow}` references unregistered capability `{capability}`")]
    MissingCapability { workflow: String, capability: String },

    /// The dispatcher's spoken/journaled feedback channel requires this
    /// capability, but it is not registered.
    #[error("feedback capability `{capability}` is not registered")]
    MissingFeedbackCapability { capability: String },

    /// The dispatcher has been shut down and will not accept new signals.
    #[error("dispatcher is shut down")]
    DispatcherShutdown,

    /// The referenced ticket does not exist in the dispatcher.
    #[error("ticket not found: {ticket_id}")]
    TicketNotFound {
        /// The [`Uuid`] that was looked up.
        ticket_id: Uuid,
    },

    /// The ticket has already started, finished, or been cancelled and
    /// cannot be transitioned to the requested state.
    #[error("invalid ticket state transition for {ticket_id}: {reason}")]
    InvalidTicketState { ticket_id: Uuid, reason: String },

    // -- Generic ------------------------------------------------------------
    /// Catch-all for unexpected internal errors that don't fit a specific
    /// variant.  Prefer a typed variant whenever possible.
    #[error("internal engine error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the engine crate.
pub type Result<T> = std::result::Result<T, EngineError>;
