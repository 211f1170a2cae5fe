//! Capability interface and registry.
//!
//! Every external collaborator the engine calls — screen capture, vision
//! inference, geolocation, SMS notification, speech synthesis, the journal,
//! and the offline phrase selector — is modeled as a [`Capability`]: one
//! bounded-latency operation taking and returning JSON.  The engine owns the
//! timeout (declared per step) and the failure policy; the capability owns
//! the mechanics of its single call.
//!
//! Capabilities are injected into the dispatcher as an immutable
//! [`CapabilitySet`] built at startup, never looked up from ambient state.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

/// Name of the journal capability; the engine performs its closing write and
/// the dispatcher records rejections through it.
pub const JOURNAL_CAPABILITY: &str = "journal";

/// Name of the speech capability the dispatcher uses for spoken feedback.
pub const SPEECH_CAPABILITY: &str = "speak";

/// Error reported by a capability invocation.
///
/// The step executor folds every variant into the workflow-level transport
/// failure reason; the variants exist so adapters can log and report what
/// actually went wrong.
#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    /// The backing device, command, or service is not available at all.
    #[error("capability unavailable: {reason}")]
    Unavailable { reason: String },

    /// Credentials are missing or were rejected.
    #[error("authentication failed: {reason}")]
    Auth { reason: String },

    /// A network or process-level failure occurred while calling the
    /// backing service.
    #[error("transport error: {reason}")]
    Transport { reason: String },

    /// The backing service answered, but the response could not be parsed.
    #[error("malformed response: {reason}")]
    MalformedResponse { reason: String },

    /// The request payload is missing required fields or carries the wrong
    /// types.
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// A local file or device operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type returned by capability invocations.
pub type CapabilityResult = std::result::Result<Value, CapabilityError>;

/// The universal capability interface.
///
/// Implementations must be `Send + Sync`; one instance is shared across the
/// dispatcher worker and any direct engine users.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Stable name that workflow step specs reference (e.g. `capture`).
    fn name(&self) -> &str;

    /// Execute the capability's single operation.
    ///
    /// The request is the step's rendered JSON template; the success payload
    /// is published into the workflow context under the step's publish key.
    async fn invoke(&self, request: Value) -> CapabilityResult;
}

/// Immutable name-to-capability map injected into the dispatcher.
pub struct CapabilitySet {
    capabilities: HashMap<String, Arc<dyn Capability>>,
}

impl CapabilitySet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            capabilities: HashMap::new(),
        }
    }

    /// Register a capability under its own name.  Re-registering a name
    /// replaces the previous entry.
    pub fn with_capability(mut self, capability: Arc<dyn Capability>) -> Self {
        let name = capability.name().to_string();
        if self.capabilities.insert(name.clone(), capability).is_some() {
            tracing::debug!(capability = %name, "capability replaced in set");
        }
        self
    }

    /// Look up a capability by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Capability>> {
        self.capabilities.get(name)
    }

    /// Whether a capability with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.capabilities.contains_key(name)
    }

    /// Sorted list of registered capability names, for logs and errors.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.capabilities.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for CapabilitySet {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
