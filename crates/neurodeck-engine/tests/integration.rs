//! Integration tests for the neurodeck-engine crate.
//!
//! These tests exercise the dispatcher, workflow engine, and step executor
//! as integrated subsystems against the four built-in workflows, with every
//! capability replaced by a recording stub.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{Value, json};

use neurodeck_engine::{
    Capability, CapabilityError, CapabilityResult, CapabilitySet, Dispatcher, DispatcherConfig,
    FailureReason, RunStatus, Signal, StepStatus, TicketState, WorkflowRegistry,
};

// ═══════════════════════════════════════════════════════════════════════
//  Recording capability stubs
// ═══════════════════════════════════════════════════════════════════════

/// Capability stand-in that records every request and call interval.
#[derive(Clone)]
struct Recorder {
    name: &'static str,
    payload: Value,
    delay: Duration,
    fail: bool,
    calls: Arc<AtomicU32>,
    requests: Arc<Mutex<Vec<Value>>>,
    spans: Arc<Mutex<Vec<(Instant, Instant)>>>,
}

impl Recorder {
    fn new(name: &'static str, payload: Value) -> Self {
        Self {
            name,
            payload,
            delay: Duration::ZERO,
            fail: false,
            calls: Arc::new(AtomicU32::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
            spans: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn requests(&self) -> Vec<Value> {
        self.requests.lock().unwrap().clone()
    }

    fn spans(&self) -> Vec<(Instant, Instant)> {
        self.spans.lock().unwrap().clone()
    }
}

#[async_trait]
impl Capability for Recorder {
    fn name(&self) -> &str {
        self.name
    }

    async fn invoke(&self, request: Value) -> CapabilityResult {
        let started = Instant::now();
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.spans.lock().unwrap().push((started, Instant::now()));
        if self.fail {
            return Err(CapabilityError::Transport {
                reason: "injected failure".into(),
            });
        }
        Ok(self.payload.clone())
    }
}

/// The full capability roster the built-in workflows need, with healthy
/// defaults and per-test failure/latency injection.
struct Harness {
    capture: Recorder,
    vision: Recorder,
    geolocate: Recorder,
    notify: Recorder,
    speak: Recorder,
    journal: Recorder,
    phrases: Recorder,
}

impl Harness {
    fn healthy() -> Self {
        Self {
            capture: Recorder::new(
                "capture",
                json!({"path": "/tmp/snapshot_20250101_120000.jpg", "captured_at": "2025-01-01T12:00:00Z"}),
            ),
            vision: Recorder::new("vision", json!({"text": "a person sitting at a desk"})),
            geolocate: Recorder::new(
                "geolocate",
                json!({
                    "lat": 37.77493,
                    "lon": -122.41942,
                    "city": "San Francisco",
                    "region": "California",
                    "country": "US",
                    "ip": "203.0.113.7",
                    "timestamp": "2025-01-01 12:00:00",
                }),
            ),
            notify: Recorder::new("notify", json!({"delivery_id": "SM123"})),
            speak: Recorder::new("speak", json!({"spoken": true, "engine": "say"})),
            journal: Recorder::new("journal", json!({"written": true, "path": "workflow_log.jsonl"})),
            phrases: Recorder::new(
                "select_phrase",
                json!({"text": "I am handling this moment with strength", "list": "affirmation"}),
            ),
        }
    }

    fn with_failing_vision(mut self) -> Self {
        self.vision = self.vision.failing();
        self
    }

    fn with_failing_geolocate(mut self) -> Self {
        self.geolocate = self.geolocate.failing();
        self
    }

    fn with_slow_capture(mut self, delay: Duration) -> Self {
        self.capture = self.capture.delayed(delay);
        self
    }

    fn with_slow_vision(mut self, delay: Duration) -> Self {
        self.vision = self.vision.delayed(delay);
        self
    }

    fn set(&self) -> Arc<CapabilitySet> {
        Arc::new(
            CapabilitySet::new()
                .with_capability(Arc::new(self.capture.clone()))
                .with_capability(Arc::new(self.vision.clone()))
                .with_capability(Arc::new(self.geolocate.clone()))
                .with_capability(Arc::new(self.notify.clone()))
                .with_capability(Arc::new(self.speak.clone()))
                .with_capability(Arc::new(self.journal.clone()))
                .with_capability(Arc::new(self.phrases.clone())),
        )
    }

    fn dispatcher(&self) -> Dispatcher {
        self.dispatcher_with(DispatcherConfig::default())
    }

    fn dispatcher_with(&self, config: DispatcherConfig) -> Dispatcher {
        let registry = WorkflowRegistry::builtin().unwrap();
        Dispatcher::new(registry, self.set(), config).unwrap()
    }

    /// Calls made against pipeline capabilities, excluding the speech and
    /// journal feedback the dispatcher itself produces.
    fn pipeline_calls(&self) -> u32 {
        self.capture.calls()
            + self.vision.calls()
            + self.geolocate.calls()
            + self.notify.calls()
            + self.phrases.calls()
    }

    fn spoken_texts(&self) -> Vec<String> {
        self.speak
            .requests()
            .iter()
            .filter_map(|request| request["text"].as_str().map(str::to_owned))
            .collect()
    }

    fn journal_workflows(&self) -> Vec<String> {
        self.journal
            .requests()
            .iter()
            .filter_map(|request| request["record"]["workflow"].as_str().map(str::to_owned))
            .collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Dispatch basics
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn known_signals_resolve_with_full_step_trails() {
    let harness = Harness::healthy();
    let dispatcher = harness.dispatcher();
    let handle = dispatcher.start();

    for (token, steps) in [
        ("EMERGENCY", 5),
        ("SNAPSHOT", 3),
        ("MESSAGE", 3),
        ("STRESS_RELIEF", 6),
    ] {
        let result = dispatcher.dispatch(Signal::new(token)).await.unwrap();
        assert_eq!(result.status, RunStatus::Completed, "{token}");
        assert_eq!(result.outcomes.len(), steps, "{token}");
        assert_eq!(result.workflow, token);
    }

    dispatcher.shutdown();
    handle.await.unwrap();
}

#[tokio::test]
async fn step_outcomes_keep_declared_order() {
    let harness = Harness::healthy();
    let dispatcher = harness.dispatcher();
    let handle = dispatcher.start();

    let result = dispatcher.dispatch(Signal::new("EMERGENCY")).await.unwrap();
    let names: Vec<&str> = result.outcomes.iter().map(|o| o.step.as_str()).collect();
    assert_eq!(names, vec!["capture", "analyze", "locate", "alert", "log"]);

    dispatcher.shutdown();
    handle.await.unwrap();
}

#[tokio::test]
async fn unknown_signal_is_rejected_without_touching_the_pipeline() {
    let harness = Harness::healthy();
    let dispatcher = harness.dispatcher();
    // No worker: rejection must resolve without one.

    let result = dispatcher.dispatch(Signal::new("MAKE_COFFEE")).await.unwrap();

    assert_eq!(result.status, RunStatus::Aborted);
    assert_eq!(result.reason, Some(FailureReason::UnknownSignal));
    assert_eq!(result.summary, "Unknown workflow requested");
    assert!(result.outcomes.is_empty());

    // No pipeline capability ran; the user still got one spoken line and
    // one journal record.
    assert_eq!(harness.pipeline_calls(), 0);
    assert_eq!(harness.speak.calls(), 1);
    assert_eq!(harness.journal.calls(), 1);
}

// ═══════════════════════════════════════════════════════════════════════
//  Slot arbitration
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn execution_slot_never_overlaps_concurrent_runs() {
    let harness = Harness::healthy()
        .with_slow_capture(Duration::from_millis(50))
        .with_slow_vision(Duration::from_millis(20));
    let dispatcher = harness.dispatcher();
    let handle = dispatcher.start();

    let first = dispatcher.submit(Signal::new("SNAPSHOT")).await.unwrap();
    let second = dispatcher.submit(Signal::new("SNAPSHOT")).await.unwrap();

    let r1 = first.wait().await.unwrap();
    let r2 = second.wait().await.unwrap();
    assert_eq!(r1.status, RunStatus::Completed);
    assert_eq!(r2.status, RunStatus::Completed);

    // The second run's capture may not begin until the first run's guarded
    // steps have all finished.
    let capture_spans = harness.capture.spans();
    let vision_spans = harness.vision.spans();
    assert_eq!(capture_spans.len(), 2);
    assert_eq!(vision_spans.len(), 2);
    assert!(capture_spans[0].1 <= capture_spans[1].0);
    assert!(vision_spans[0].1 <= capture_spans[1].0);

    dispatcher.shutdown();
    handle.await.unwrap();
}

#[tokio::test]
async fn emergency_signal_preempts_queued_normal_signals() {
    let harness = Harness::healthy();
    let dispatcher = harness.dispatcher();

    // Queue everything first, start the worker after, so ordering is
    // deterministic.
    let message = dispatcher.submit(Signal::new("MESSAGE")).await.unwrap();
    let snapshot = dispatcher.submit(Signal::new("SNAPSHOT")).await.unwrap();
    let emergency = dispatcher.submit(Signal::new("EMERGENCY")).await.unwrap();

    let handle = dispatcher.start();

    assert_eq!(emergency.wait().await.unwrap().status, RunStatus::Completed);
    assert_eq!(message.wait().await.unwrap().status, RunStatus::Completed);
    assert_eq!(snapshot.wait().await.unwrap().status, RunStatus::Completed);

    // One journal write per run, in service order: the emergency jumped the
    // backlog, then the normal lane drained FIFO.
    assert_eq!(
        harness.journal_workflows(),
        vec!["EMERGENCY", "MESSAGE", "SNAPSHOT"]
    );

    dispatcher.shutdown();
    handle.await.unwrap();
}

#[tokio::test]
async fn emergency_signals_are_exempt_from_queue_capacity() {
    let harness = Harness::healthy();
    let config = DispatcherConfig {
        queue_capacity: 1,
        ..DispatcherConfig::default()
    };
    let dispatcher = harness.dispatcher_with(config);
    // Worker not started yet: the first submission fills the one-slot lane.

    let message = dispatcher.submit(Signal::new("MESSAGE")).await.unwrap();

    let overflowed = dispatcher.dispatch(Signal::new("SNAPSHOT")).await.unwrap();
    assert_eq!(overflowed.status, RunStatus::Aborted);
    assert_eq!(overflowed.reason, Some(FailureReason::QueueOverflow));

    let emergency = dispatcher.submit(Signal::new("EMERGENCY")).await.unwrap();
    assert_eq!(
        dispatcher.status(emergency.id()).unwrap().state,
        TicketState::Queued
    );

    let handle = dispatcher.start();
    assert_eq!(emergency.wait().await.unwrap().status, RunStatus::Completed);
    assert_eq!(message.wait().await.unwrap().status, RunStatus::Completed);

    dispatcher.shutdown();
    handle.await.unwrap();
}

#[tokio::test]
async fn cancelled_ticket_is_skipped_by_the_worker() {
    let harness = Harness::healthy();
    let dispatcher = harness.dispatcher();

    let first = dispatcher.submit(Signal::new("MESSAGE")).await.unwrap();
    let second = dispatcher.submit(Signal::new("MESSAGE")).await.unwrap();

    dispatcher.cancel(first.id()).await.unwrap();

    let handle = dispatcher.start();

    let cancelled = first.wait().await.unwrap();
    assert_eq!(cancelled.status, RunStatus::Aborted);
    assert_eq!(cancelled.reason, Some(FailureReason::Cancelled));

    let ran = second.wait().await.unwrap();
    assert_eq!(ran.status, RunStatus::Completed);

    // Only the surviving submission reached the notifier.
    assert_eq!(harness.notify.calls(), 1);

    dispatcher.shutdown();
    handle.await.unwrap();
}

// ═══════════════════════════════════════════════════════════════════════
//  Failure policies
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn emergency_vision_failure_still_alerts_with_substitute_text() {
    let harness = Harness::healthy().with_failing_vision();
    let dispatcher = harness.dispatcher();
    let handle = dispatcher.start();

    let result = dispatcher.dispatch(Signal::new("EMERGENCY")).await.unwrap();

    assert_eq!(result.status, RunStatus::CompletedWithDegradation);
    assert_eq!(result.outcomes.len(), 5);
    let analyze = result.outcomes.iter().find(|o| o.step == "analyze").unwrap();
    assert!(matches!(analyze.status, StepStatus::Skipped { .. }));

    // The alert went out carrying the substitute analysis text.
    assert_eq!(harness.notify.calls(), 1);
    let body = harness.notify.requests()[0]["body"]
        .as_str()
        .unwrap()
        .to_owned();
    assert!(body.contains("analysis unavailable"), "body: {body}");

    dispatcher.shutdown();
    handle.await.unwrap();
}

#[tokio::test]
async fn snapshot_vision_failure_aborts_without_speaking_a_result() {
    let harness = Harness::healthy().with_failing_vision();
    let dispatcher = harness.dispatcher();
    let handle = dispatcher.start();

    let result = dispatcher.dispatch(Signal::new("SNAPSHOT")).await.unwrap();

    assert_eq!(result.status, RunStatus::Aborted);
    assert_eq!(result.reason, Some(FailureReason::StepTransport));
    assert_eq!(result.outcomes.len(), 2);
    assert_eq!(result.summary, "Error occurred in Snapshot workflow");

    // Start announcement, then the error line.  Never a result payload.
    let spoken = harness.spoken_texts();
    assert_eq!(
        spoken,
        vec![
            "Snapshot workflow activated".to_owned(),
            "Error occurred in Snapshot workflow".to_owned(),
        ]
    );

    dispatcher.shutdown();
    handle.await.unwrap();
}

#[tokio::test]
async fn geolocate_failure_degrades_to_sentinel_location() {
    let harness = Harness::healthy().with_failing_geolocate();
    let dispatcher = harness.dispatcher();
    let handle = dispatcher.start();

    let result = dispatcher.dispatch(Signal::new("EMERGENCY")).await.unwrap();

    assert_eq!(result.status, RunStatus::CompletedWithDegradation);
    let locate = result.outcomes.iter().find(|o| o.step == "locate").unwrap();
    assert!(matches!(locate.status, StepStatus::Skipped { .. }));

    // The alert still went out, addressed with the unknown-location
    // sentinel rather than a propagated error.
    let body = harness.notify.requests()[0]["body"]
        .as_str()
        .unwrap()
        .to_owned();
    assert!(body.contains("Location: 0.0,0.0"), "body: {body}");
    assert!(body.contains("City: unknown, unknown, unknown"), "body: {body}");

    dispatcher.shutdown();
    handle.await.unwrap();
}

// ═══════════════════════════════════════════════════════════════════════
//  Feedback guarantees
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn every_dispatch_writes_exactly_one_journal_record() {
    // Completed.
    let harness = Harness::healthy();
    let dispatcher = harness.dispatcher();
    let handle = dispatcher.start();
    let result = dispatcher.dispatch(Signal::new("MESSAGE")).await.unwrap();
    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(harness.journal.calls(), 1);
    dispatcher.shutdown();
    handle.await.unwrap();

    // Completed with degradation.
    let harness = Harness::healthy().with_failing_geolocate();
    let dispatcher = harness.dispatcher();
    let handle = dispatcher.start();
    let result = dispatcher.dispatch(Signal::new("EMERGENCY")).await.unwrap();
    assert_eq!(result.status, RunStatus::CompletedWithDegradation);
    assert_eq!(harness.journal.calls(), 1);
    dispatcher.shutdown();
    handle.await.unwrap();

    // Aborted mid-pipeline: the definition has no journal step and the run
    // never reached one, so the engine writes the closing record.
    let harness = Harness::healthy().with_failing_vision();
    let dispatcher = harness.dispatcher();
    let handle = dispatcher.start();
    let result = dispatcher.dispatch(Signal::new("SNAPSHOT")).await.unwrap();
    assert_eq!(result.status, RunStatus::Aborted);
    assert_eq!(harness.journal.calls(), 1);
    dispatcher.shutdown();
    handle.await.unwrap();

    // Rejected: unknown token.
    let harness = Harness::healthy();
    let dispatcher = harness.dispatcher();
    let result = dispatcher.dispatch(Signal::new("MAKE_COFFEE")).await.unwrap();
    assert_eq!(result.reason, Some(FailureReason::UnknownSignal));
    assert_eq!(harness.journal.calls(), 1);

    // Rejected: queue overflow.
    let harness = Harness::healthy();
    let config = DispatcherConfig {
        queue_capacity: 1,
        ..DispatcherConfig::default()
    };
    let dispatcher = harness.dispatcher_with(config);
    let _queued = dispatcher.submit(Signal::new("MESSAGE")).await.unwrap();
    let result = dispatcher.dispatch(Signal::new("SNAPSHOT")).await.unwrap();
    assert_eq!(result.reason, Some(FailureReason::QueueOverflow));
    assert_eq!(harness.journal.calls(), 1);
}

#[tokio::test]
async fn snapshot_summary_is_the_analysis_text_and_is_spoken() {
    let harness = Harness::healthy();
    let dispatcher = harness.dispatcher();
    let handle = dispatcher.start();

    let result = dispatcher.dispatch(Signal::new("SNAPSHOT")).await.unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.summary, "a person sitting at a desk");

    // Announcement, the speak_result step, then the completion line.
    let spoken = harness.spoken_texts();
    assert_eq!(spoken.len(), 3);
    assert_eq!(spoken[0], "Snapshot workflow activated");
    assert_eq!(spoken[1], "a person sitting at a desk");
    assert_eq!(spoken[2], "a person sitting at a desk");

    dispatcher.shutdown();
    handle.await.unwrap();
}

#[tokio::test]
async fn stress_relief_speaks_the_full_script() {
    let harness = Harness::healthy();
    let dispatcher = harness.dispatcher();
    let handle = dispatcher.start();

    let result = dispatcher
        .dispatch(Signal::new("STRESS_RELIEF"))
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.outcomes.len(), 6);
    assert_eq!(harness.phrases.calls(), 2);

    let spoken = harness.spoken_texts();
    assert_eq!(spoken.len(), 5);
    assert_eq!(spoken[0], "Stress relief workflow activated");
    assert!(spoken[1].starts_with("I've detected that you might be feeling stressed"));
    assert!(spoken[2].starts_with("Let's do a quick breathing exercise"));
    assert_eq!(spoken[3], "I am handling this moment with strength");
    // The affirmation doubles as the completion summary.
    assert_eq!(spoken[4], "I am handling this moment with strength");

    dispatcher.shutdown();
    handle.await.unwrap();
}
