//! Signal dispatcher.
//!
//! The dispatcher accepts [`Signal`] submissions, enqueues them into a pair
//! of class-partitioned [`crossbeam::queue::SegQueue`]s, and drives execution
//! via a background tokio task that serves one workflow at a time through a
//! single execution slot.
//!
//! # Class model
//!
//! Two lanes are maintained.  The background worker drains **emergency**
//! before **normal**, so an emergency signal only ever waits for the run that
//! already holds the slot.  The normal lane is bounded; signals arriving
//! while it is full are rejected immediately rather than silently dropped.
//! Emergency signals are exempt from the bound.
//!
//! # Ticket lifecycle
//!
//! ```text
//! Queued  -->  Running  -->  Finished
//!         \->  Cancelled
//!
//! Rejected   (terminal at submission: unknown token or full queue)
//! ```
//!
//! Cancellation is only possible while a ticket is still queued.  Once the
//! worker picks a signal up it runs to its recorded result.
//!
//! Every submission, accepted or not, resolves its ticket with a
//! [`WorkflowResult`] and leaves exactly one journal record.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam::queue::SegQueue;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{Notify, Semaphore, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::capability::{CapabilitySet, JOURNAL_CAPABILITY, SPEECH_CAPABILITY};
use crate::engine::WorkflowEngine;
use crate::error::{EngineError, Result};
use crate::outcome::{FailureReason, WorkflowResult};
use crate::registry::{WorkflowDefinition, WorkflowRegistry, spoken_name};
use crate::signal::{Signal, SignalClass};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Unique, time-ordered ticket identifier.  A ticket id is the invocation id
/// of the signal it tracks.
pub type TicketId = Uuid;

/// Lifecycle state of a submitted signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketState {
    /// Sitting in a lane, waiting for the worker and the execution slot.
    Queued,
    /// Currently holding the execution slot.
    Running,
    /// Result recorded and delivered.
    Finished,
    /// Cancelled by the caller while still queued.
    Cancelled,
    /// Refused at submission; never entered a lane.
    Rejected,
}

/// Metadata snapshot of a ticket visible to external callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketInfo {
    pub id: TicketId,
    pub token: String,
    pub class: SignalClass,
    pub state: TicketState,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Handle for one submitted signal.
///
/// Rejected submissions resolve immediately; accepted ones resolve when the
/// worker finishes (or the ticket is cancelled).
pub struct Ticket {
    id: TicketId,
    receiver: oneshot::Receiver<WorkflowResult>,
}

impl Ticket {
    /// The ticket id, usable with [`Dispatcher::status`] and
    /// [`Dispatcher::cancel`].
    #[must_use]
    pub fn id(&self) -> TicketId {
        self.id
    }

    /// Wait for the final [`WorkflowResult`] of this submission.
    pub async fn wait(self) -> Result<WorkflowResult> {
        self.receiver.await.map_err(|_| {
            EngineError::Internal("dispatcher dropped before delivering a result".to_string())
        })
    }
}

/// Dispatcher tuning knobs.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Most normal-class signals allowed to wait in the lane at once.
    /// Emergency-class signals are exempt.
    pub queue_capacity: usize,
    /// Elapsed time past which a run is logged as slow.  Never enforced.
    pub soft_deadline: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 8,
            soft_deadline: Duration::from_secs(60),
        }
    }
}

struct TicketEntry {
    info: TicketInfo,
    /// Present until the result is delivered (or the ticket is rejected,
    /// which delivers through the returned [`Ticket`] directly).
    reply: Option<oneshot::Sender<WorkflowResult>>,
}

const LANE_EMERGENCY: usize = 0;
const LANE_NORMAL: usize = 1;

fn lane_for(class: SignalClass) -> usize {
    match class {
        SignalClass::Emergency => LANE_EMERGENCY,
        SignalClass::Normal => LANE_NORMAL,
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Lock-free, class-aware signal dispatcher.
///
/// Cheaply cloneable (`Arc`-backed) and safe to share across threads and
/// async tasks.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    registry: WorkflowRegistry,
    capabilities: Arc<CapabilitySet>,
    engine: WorkflowEngine,

    /// One lock-free queue per signal class.
    lanes: [SegQueue<Signal>; 2],

    /// Authoritative ticket metadata.  Updated atomically via `DashMap`.
    tickets: DashMap<TicketId, TicketEntry>,

    /// Wakes the background worker when new work arrives.
    notify: Notify,

    /// The single execution slot.  Holding the permit is what "running"
    /// means; it is released before the completion line is spoken so speech
    /// never delays the next signal.
    slot: Arc<Semaphore>,

    queue_capacity: usize,

    /// When `true` the dispatcher will not accept new signals.
    shutdown: std::sync::atomic::AtomicBool,
}

impl Dispatcher {
    /// Create a dispatcher **without** starting the background worker.
    ///
    /// Fails when a registered workflow references a capability that is not
    /// in `capabilities`, or when the `speak`/`journal` capabilities the
    /// dispatcher itself depends on are missing.  Call [`Dispatcher::start`]
    /// to spawn the worker onto the tokio runtime.
    pub fn new(
        registry: WorkflowRegistry,
        capabilities: Arc<CapabilitySet>,
        config: DispatcherConfig,
    ) -> Result<Self> {
        for definition in registry.definitions() {
            for step in &definition.steps {
                if !capabilities.contains(&step.capability) {
                    return Err(EngineError::MissingCapability {
                        workflow: definition.token.clone(),
                        capability: step.capability.clone(),
                    });
                }
            }
        }
        for required in [SPEECH_CAPABILITY, JOURNAL_CAPABILITY] {
            if !capabilities.contains(required) {
                return Err(EngineError::MissingFeedbackCapability {
                    capability: required.to_string(),
                });
            }
        }

        let engine = WorkflowEngine::new(Arc::clone(&capabilities))
            .with_soft_deadline(config.soft_deadline);

        Ok(Self {
            inner: Arc::new(DispatcherInner {
                registry,
                capabilities,
                engine,
                lanes: [SegQueue::new(), SegQueue::new()],
                tickets: DashMap::new(),
                notify: Notify::new(),
                slot: Arc::new(Semaphore::new(1)),
                queue_capacity: config.queue_capacity,
                shutdown: std::sync::atomic::AtomicBool::new(false),
            }),
        })
    }

    /// Spawn the background worker that drains the lanes and runs workflows.
    ///
    /// Returns a [`JoinHandle`] that resolves when the dispatcher is shut
    /// down and the lanes are drained.
    pub fn start(&self) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tracing::info!("dispatcher worker started");
            Self::worker_loop(&inner).await;
            tracing::info!("dispatcher worker stopped");
        })
    }

    /// Submit a signal for dispatch.
    ///
    /// Unknown tokens and normal-class signals that find the lane full are
    /// rejected here: their ticket resolves immediately with an `Aborted`
    /// result, after the rejection has been spoken and journaled.  No
    /// workflow step runs for a rejected signal.
    pub async fn submit(&self, signal: Signal) -> Result<Ticket> {
        if self
            .inner
            .shutdown
            .load(std::sync::atomic::Ordering::Acquire)
        {
            return Err(EngineError::DispatcherShutdown);
        }

        let Some(definition) = self.inner.registry.resolve(&signal.token) else {
            tracing::warn!(
                invocation_id = %signal.invocation_id,
                token = %signal.token,
                "signal token matches no workflow"
            );
            let result = WorkflowResult::rejected(
                &signal.token,
                signal.invocation_id,
                FailureReason::UnknownSignal,
                "Unknown workflow requested",
            );
            return self.reject(&signal, SignalClass::Normal, result).await;
        };
        let class = definition.class;

        if class == SignalClass::Normal
            && self.inner.lanes[LANE_NORMAL].len() >= self.inner.queue_capacity
        {
            tracing::warn!(
                invocation_id = %signal.invocation_id,
                token = %signal.token,
                capacity = self.inner.queue_capacity,
                "pending lane full, dropping signal"
            );
            let summary = format!(
                "{} request dropped, the dispatcher is busy",
                spoken_name(&signal.token)
            );
            let result = WorkflowResult::rejected(
                &signal.token,
                signal.invocation_id,
                FailureReason::QueueOverflow,
                summary,
            );
            return self.reject(&signal, class, result).await;
        }

        let (tx, rx) = oneshot::channel();
        let id = signal.invocation_id;
        self.inner.tickets.insert(
            id,
            TicketEntry {
                info: TicketInfo {
                    id,
                    token: signal.token.clone(),
                    class,
                    state: TicketState::Queued,
                    submitted_at: signal.received_at,
                    started_at: None,
                    finished_at: None,
                },
                reply: Some(tx),
            },
        );

        tracing::debug!(ticket_id = %id, token = %signal.token, %class, "signal queued");

        self.inner.lanes[lane_for(class)].push(signal);
        self.inner.notify.notify_one();

        Ok(Ticket { id, receiver: rx })
    }

    /// Submit a signal and wait for its result.
    pub async fn dispatch(&self, signal: Signal) -> Result<WorkflowResult> {
        self.submit(signal).await?.wait().await
    }

    /// Cancel a ticket that has not yet started running.
    ///
    /// The ticket resolves with an `Aborted` result carrying the
    /// `cancelled` reason, spoken and journaled like any other outcome.
    /// Tickets that are already `Running`, `Finished`, `Cancelled`, or
    /// `Rejected` cannot be cancelled.
    pub async fn cancel(&self, ticket_id: TicketId) -> Result<()> {
        let (token, reply) = {
            let mut entry = self
                .inner
                .tickets
                .get_mut(&ticket_id)
                .ok_or(EngineError::TicketNotFound { ticket_id })?;

            match entry.info.state {
                TicketState::Queued => {
                    entry.info.state = TicketState::Cancelled;
                    entry.info.finished_at = Some(Utc::now());
                    (entry.info.token.clone(), entry.reply.take())
                }
                other => {
                    return Err(EngineError::InvalidTicketState {
                        ticket_id,
                        reason: format!("cannot cancel a ticket in state {other:?}"),
                    });
                }
            }
            // The map guard is released here; the lane entry stays behind
            // and the worker skips it on pickup.
        };

        tracing::info!(ticket_id = %ticket_id, token = %token, "queued signal cancelled");

        let result = WorkflowResult::rejected(
            &token,
            ticket_id,
            FailureReason::Cancelled,
            format!("{} request cancelled", spoken_name(&token)),
        );
        self.inner.speak_line(&result.summary).await;
        self.inner.journal_record(&result).await;
        if let Some(reply) = reply {
            let _ = reply.send(result);
        }
        Ok(())
    }

    /// Query the current state of a ticket.
    pub fn status(&self, ticket_id: TicketId) -> Result<TicketInfo> {
        self.inner
            .tickets
            .get(&ticket_id)
            .map(|entry| entry.info.clone())
            .ok_or(EngineError::TicketNotFound { ticket_id })
    }

    /// Signal the dispatcher to stop accepting new signals.  The background
    /// worker drains what is already queued, then exits.
    pub fn shutdown(&self) {
        tracing::info!("dispatcher shutdown requested");
        self.inner
            .shutdown
            .store(true, std::sync::atomic::Ordering::Release);
        self.inner.notify.notify_one();
    }

    // -- Private helpers ----------------------------------------------------

    /// Record, announce, and resolve a submission that never enters a lane.
    async fn reject(
        &self,
        signal: &Signal,
        class: SignalClass,
        result: WorkflowResult,
    ) -> Result<Ticket> {
        let (tx, rx) = oneshot::channel();
        self.inner.tickets.insert(
            signal.invocation_id,
            TicketEntry {
                info: TicketInfo {
                    id: signal.invocation_id,
                    token: signal.token.clone(),
                    class,
                    state: TicketState::Rejected,
                    submitted_at: signal.received_at,
                    started_at: None,
                    finished_at: Some(Utc::now()),
                },
                reply: None,
            },
        );

        self.inner.speak_line(&result.summary).await;
        self.inner.journal_record(&result).await;

        // The receiver is still in scope, so delivery cannot fail.
        let _ = tx.send(result);
        Ok(Ticket {
            id: signal.invocation_id,
            receiver: rx,
        })
    }

    /// Background worker loop.
    async fn worker_loop(inner: &Arc<DispatcherInner>) {
        loop {
            // Emergency lane first, always.
            let next = inner.lanes[LANE_EMERGENCY]
                .pop()
                .or_else(|| inner.lanes[LANE_NORMAL].pop());

            match next {
                Some(signal) => Self::serve(inner, signal).await,
                None => {
                    if inner
                        .shutdown
                        .load(std::sync::atomic::Ordering::Acquire)
                    {
                        break;
                    }
                    // Park until notified, then loop back so anything that
                    // raced in alongside a shutdown request still drains.
                    inner.notify.notified().await;
                }
            }
        }
    }

    /// Run one dequeued signal through the execution slot.
    async fn serve(inner: &Arc<DispatcherInner>, signal: Signal) {
        let ticket_id = signal.invocation_id;

        // Cancelled while queued: the lane entry is stale, skip it.
        let still_queued = inner
            .tickets
            .get(&ticket_id)
            .map(|entry| entry.info.state == TicketState::Queued)
            .unwrap_or(false);
        if !still_queued {
            tracing::debug!(ticket_id = %ticket_id, "skipping cancelled or removed ticket");
            return;
        }

        let Some(definition) = inner.registry.resolve(&signal.token) else {
            // Submission only queues resolvable tokens and the registry is
            // immutable after construction.
            tracing::error!(ticket_id = %ticket_id, token = %signal.token, "queued token no longer resolves");
            return;
        };
        let definition = definition.clone();

        let started_at = Utc::now();
        if let Some(mut entry) = inner.tickets.get_mut(&ticket_id) {
            entry.info.state = TicketState::Running;
            entry.info.started_at = Some(started_at);
        }

        // The slot permit is the run: everything from the opening
        // announcement through the recorded result happens while holding it.
        let permit = match Arc::clone(&inner.slot).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                // The semaphore is never closed.
                tracing::error!(ticket_id = %ticket_id, "execution slot closed");
                return;
            }
        };

        tracing::info!(
            ticket_id = %ticket_id,
            workflow = %definition.token,
            class = %definition.class,
            "workflow running"
        );
        inner.speak_line(&definition.announcement).await;

        // The engine runs on its own task so a panicking capability tears
        // down the run, not the dispatcher.
        let engine_inner = Arc::clone(inner);
        let engine_definition = definition.clone();
        let engine_signal = signal.clone();
        let run = tokio::spawn(async move {
            engine_inner
                .engine
                .execute(&engine_definition, &engine_signal)
                .await
        });

        let result = match run.await {
            Ok(result) => result,
            Err(err) => {
                tracing::error!(
                    ticket_id = %ticket_id,
                    workflow = %definition.token,
                    error = %err,
                    "workflow task crashed"
                );
                let crashed = crashed_result(&definition, ticket_id, started_at);
                // The engine died before it could journal anything.
                inner.journal_record(&crashed).await;
                crashed
            }
        };

        // Result recorded; free the slot before speaking so the completion
        // line never delays the next signal.
        drop(permit);

        inner.speak_line(&result.summary).await;
        Self::resolve(inner, ticket_id, result);
    }

    /// Mark a ticket finished and deliver its result.
    fn resolve(inner: &Arc<DispatcherInner>, ticket_id: TicketId, result: WorkflowResult) {
        let reply = match inner.tickets.get_mut(&ticket_id) {
            Some(mut entry) => {
                entry.info.state = TicketState::Finished;
                entry.info.finished_at = Some(Utc::now());
                entry.reply.take()
            }
            None => None,
        };

        tracing::info!(
            ticket_id = %ticket_id,
            workflow = %result.workflow,
            status = ?result.status,
            "workflow finished"
        );

        if let Some(reply) = reply {
            if reply.send(result).is_err() {
                tracing::debug!(ticket_id = %ticket_id, "result receiver dropped before delivery");
            }
        }
    }
}

impl DispatcherInner {
    /// Best-effort spoken feedback.  A failed speech call is logged and
    /// absorbed; it never changes a workflow result.
    async fn speak_line(&self, text: &str) {
        let Some(speech) = self.capabilities.get(SPEECH_CAPABILITY) else {
            // Construction requires the capability; unreachable.
            tracing::warn!("speech capability missing");
            return;
        };
        if let Err(err) = speech.invoke(json!({ "text": text })).await {
            tracing::warn!(error = %err, "spoken feedback failed");
        }
    }

    /// Journal write for results produced outside the engine (rejections,
    /// cancellations, crashed runs).  Failures are logged, never retried.
    async fn journal_record(&self, result: &WorkflowResult) {
        let Some(journal) = self.capabilities.get(JOURNAL_CAPABILITY) else {
            tracing::warn!(workflow = %result.workflow, "journal capability missing; record dropped");
            return;
        };
        let record = match serde_json::to_value(result) {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(workflow = %result.workflow, error = %err, "record not serializable");
                return;
            }
        };
        if let Err(err) = journal.invoke(json!({ "record": record })).await {
            tracing::warn!(workflow = %result.workflow, error = %err, "journal write failed");
        }
    }
}

/// Result for a run whose engine task panicked.  No failure reason fits a
/// crash; the record carries the generic error summary.
fn crashed_result(
    definition: &WorkflowDefinition,
    invocation_id: TicketId,
    started_at: DateTime<Utc>,
) -> WorkflowResult {
    WorkflowResult {
        workflow: definition.token.clone(),
        invocation_id,
        started_at,
        finished_at: Utc::now(),
        status: crate::outcome::RunStatus::Aborted,
        reason: None,
        summary: format!(
            "Error occurred in {} workflow",
            spoken_name(&definition.token)
        ),
        outcomes: Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
