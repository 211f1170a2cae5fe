//! Neurodeck engine.
//!
//! This crate provides the core services of the Neurodeck assistive
//! dispatcher:
//!
//! - **[`dispatcher`]** -- Class-aware signal dispatcher built on
//!   [`crossbeam::queue::SegQueue`] lanes, a single-permit execution slot,
//!   and tokio-driven async execution.
//! - **[`engine`]** -- Sequential workflow engine that turns a definition
//!   plus a signal into a uniform [`outcome::WorkflowResult`].
//! - **[`executor`]** -- Single-step runner: request templating, per-step
//!   timeouts, and failure-policy handling.
//! - **[`registry`]** -- Validated workflow definitions, including the four
//!   built-in pipelines.
//! - **[`capability`]** -- The adapter trait every side-effecting backend
//!   implements, and the set the engine draws from.
//! - **[`error`]** -- Unified engine error types via [`thiserror`].
//!
//! All public types are `Send + Sync` and designed for use within a
//! multi-threaded tokio runtime.  Fallible *runs* are not errors here: a
//! degraded or aborted workflow still yields a `WorkflowResult`; the error
//! type covers misconfiguration and ticket misuse only.

pub mod capability;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod executor;
pub mod outcome;
pub mod registry;
pub mod signal;

// Re-export the most commonly used types at the crate root for convenience.
pub use capability::{
    Capability, CapabilityError, CapabilityResult, CapabilitySet, JOURNAL_CAPABILITY,
    SPEECH_CAPABILITY,
};
pub use dispatcher::{Dispatcher, DispatcherConfig, Ticket, TicketId, TicketInfo, TicketState};
pub use engine::WorkflowEngine;
pub use error::{EngineError, Result};
pub use outcome::{FailureReason, RunStatus, StepOutcome, StepStatus, WorkflowResult};
pub use registry::{
    DEFAULT_MESSAGE, FailurePolicy, StepSpec, WorkflowDefinition, WorkflowRegistry, spoken_name,
};
pub use signal::{Signal, SignalClass};
