//! The per-page engine object.
//!
//! One instance per injected page context, holding every piece of state
//! the capture paths share: settings, the lifecycle controller, the
//! stream tap, the enricher and its map cache, bounded recent-record
//! rings, and the outbound telemetry port. Capture entry points return
//! `()` and degrade internally; the page must never observe a failure.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use error_enrich::{Enricher, ErrorRecord, HostPage};
use pagelens_core_types::{
    now_ms, BoundedRing, ConnectionId, Direction, Envelope, EnvelopeKind,
};
use pagelens_sanitize::{
    is_sensitive_field, serialize, PageValue, ScrubEngine, REDACTED_MARKER,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use stream_tap::{StreamPayload, StreamTap};
use tokio::sync::mpsc;
use tracing::debug;

use crate::host::InstallHooks;
use crate::lifecycle::{BufferCaps, LifecycleController, Phase};
use crate::ports::{CommandRequest, CommandServer, TelemetryPort};
use crate::settings::{Settings, SettingsHandle};

/// What the engine can do for the relay, published with the phase-1
/// lifecycle envelope.
const CAPABILITIES: [&str; 6] = [
    "console",
    "network",
    "stream",
    "error",
    "interaction",
    "performance",
];

/// One finished network call, success or failure.
#[derive(Clone, Debug)]
pub struct NetworkCapture {
    pub method: String,
    pub url: String,
    pub status: Option<u16>,
    pub duration_ms: Option<u64>,
    pub request_body: Option<String>,
    pub response_body: Option<String>,
    pub error: Option<String>,
}

/// Stream lifecycle and frame events as the page-side hook reports them.
#[derive(Clone, Debug)]
pub enum StreamObservation {
    Opened {
        id: ConnectionId,
        url: String,
    },
    Message {
        id: ConnectionId,
        direction: Direction,
        payload: StreamPayload,
    },
    Errored {
        id: ConnectionId,
    },
    Closed {
        id: ConnectionId,
        code: Option<u16>,
        reason: Option<String>,
    },
}

#[derive(Clone, Debug)]
pub struct InteractionCapture {
    pub kind: String,
    pub target: String,
    pub value: Option<String>,
    pub field_name: Option<String>,
    pub input_type: Option<String>,
    pub autocomplete: Option<String>,
}

#[derive(Clone, Debug)]
pub struct PerfSample {
    pub metric: String,
    pub value: f64,
    pub detail: Option<Value>,
}

#[derive(Default)]
struct Totals {
    console: AtomicU64,
    network: AtomicU64,
    interactions: AtomicU64,
    errors: AtomicU64,
    performance: AtomicU64,
}

pub struct LensEngine {
    settings: SettingsHandle,
    lifecycle: Arc<LifecycleController>,
    tap: StreamTap,
    enricher: Arc<Enricher>,
    scrub: ScrubEngine,
    port: TelemetryPort,
    caps: Mutex<BufferCaps>,
    console_ring: Mutex<BoundedRing<Value>>,
    network_ring: Mutex<BoundedRing<Value>>,
    interaction_ring: Mutex<BoundedRing<Value>>,
    stream_ring: Mutex<BoundedRing<Value>>,
    totals: Totals,
}

impl LensEngine {
    /// Builds the engine and runs phase 1 on the spot. Must be called on
    /// the host runtime: with deferral enabled, the phase-2 timers spawn
    /// onto it. The receiver is the relay's end of the telemetry stream.
    pub fn new<H>(
        host: Arc<H>,
        settings: Settings,
        sink_capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Envelope>)
    where
        H: HostPage + InstallHooks + 'static,
    {
        let hooks: Arc<dyn InstallHooks> = host.clone();
        let page: Arc<dyn HostPage> = host;
        let defer = settings.defer_heavy_install;
        let caps = BufferCaps::default();
        let (port, receiver) = TelemetryPort::new(sink_capacity);
        let lifecycle = Arc::new(LifecycleController::new(hooks));

        let engine = Arc::new(Self {
            settings: SettingsHandle::new(settings),
            lifecycle: Arc::clone(&lifecycle),
            tap: StreamTap::new(),
            enricher: Arc::new(Enricher::new(page)),
            scrub: ScrubEngine::builtin(),
            port,
            caps: Mutex::new(caps),
            console_ring: Mutex::new(BoundedRing::new(caps.console_entries)),
            network_ring: Mutex::new(BoundedRing::new(caps.network_bodies)),
            interaction_ring: Mutex::new(BoundedRing::new(caps.interactions)),
            stream_ring: Mutex::new(BoundedRing::new(caps.stream_events)),
            totals: Totals::default(),
        });

        lifecycle.install_phase1(defer);
        engine.port.emit(Envelope::new(
            EnvelopeKind::Lifecycle,
            json!({
                "event": "installed",
                "phase": engine.lifecycle.phase(),
                "capabilities": CAPABILITIES,
                "injectedAt": engine.lifecycle.injected_at_ms(),
            }),
        ));
        (engine, receiver)
    }

    pub fn phase(&self) -> Phase {
        self.lifecycle.phase()
    }

    /// Feeds the deferred-install schedule.
    pub fn notify_page_loaded(&self) {
        self.lifecycle.notify_page_loaded();
    }

    pub fn record_console(&self, level: &str, args: Vec<PageValue>) {
        if !self.heavy_ready() {
            return;
        }
        self.totals.console.fetch_add(1, Ordering::Relaxed);
        let scrub_on = self.settings.current().enable_scrub;
        let rendered: Vec<Value> = args
            .iter()
            .map(|arg| {
                let value = serialize(arg);
                if scrub_on {
                    self.scrub_value(value)
                } else {
                    value
                }
            })
            .collect();
        let payload = json!({ "level": level, "args": rendered, "ts": now_ms() });
        self.console_ring.lock().push(payload.clone());
        self.port.emit(Envelope::new(EnvelopeKind::Console, payload));
    }

    pub fn record_network(&self, capture: NetworkCapture) {
        if !self.heavy_ready() {
            return;
        }
        self.totals.network.fetch_add(1, Ordering::Relaxed);
        let settings = self.settings.current();
        let bodies_on = settings.capture_network_bodies && self.caps.lock().capture_bodies;
        let mut payload = json!({
            "method": capture.method,
            "url": capture.url,
            "status": capture.status,
            "durationMs": capture.duration_ms,
            "error": capture.error,
            "ts": now_ms(),
        });
        if bodies_on {
            if let Some(body) = capture.request_body {
                payload["requestBody"] = self.bounded_body(&body, settings.enable_scrub);
            }
            if let Some(body) = capture.response_body {
                payload["responseBody"] = self.bounded_body(&body, settings.enable_scrub);
            }
        }
        self.network_ring.lock().push(payload.clone());
        self.port.emit(Envelope::new(EnvelopeKind::Network, payload));
    }

    pub fn record_stream(&self, observation: StreamObservation) {
        if !self.heavy_ready() {
            return;
        }
        match observation {
            StreamObservation::Opened { id, url } => {
                self.tap.open(id.clone(), url.clone());
                self.emit_stream(json!({ "id": id, "url": url, "event": "open" }));
            }
            StreamObservation::Message {
                id,
                direction,
                payload,
            } => {
                let settings = self.settings.current();
                match self.tap.message(&id, direction, &payload, settings.mode) {
                    Ok(Some(record)) => {
                        let data = if settings.enable_scrub {
                            self.scrub.scrub(&record.data)
                        } else {
                            record.data
                        };
                        self.emit_stream(json!({
                            "id": id,
                            "url": record.url,
                            "event": "message",
                            "direction": record.direction,
                            "data": data,
                            "size": record.size,
                            "truncated": record.truncated,
                            "schemaChange": record.schema_change,
                        }));
                    }
                    Ok(None) => {}
                    Err(err) => {
                        debug!(target: "pagelens", %err, "dropping frame for unknown connection");
                    }
                }
            }
            StreamObservation::Errored { id } => match self.tap.mark_error(&id) {
                Ok(url) => self.emit_stream(json!({ "id": id, "url": url, "event": "error" })),
                Err(err) => debug!(target: "pagelens", %err, "error event for unknown connection"),
            },
            StreamObservation::Closed { id, code, reason } => {
                match self.tap.close(&id, code, reason) {
                    Ok(summary) => self.emit_stream(json!({
                        "id": summary.id,
                        "url": summary.url,
                        "event": "close",
                        "code": summary.code,
                        "reason": summary.reason,
                    })),
                    Err(err) => {
                        debug!(target: "pagelens", %err, "close event for unknown connection");
                    }
                }
            }
        }
    }

    /// Hands the record to the enricher off the capture path; the
    /// enriched envelope leaves whenever the pipeline settles.
    pub fn record_exception(self: &Arc<Self>, record: ErrorRecord) {
        if !self.heavy_ready() {
            return;
        }
        self.totals.errors.fetch_add(1, Ordering::Relaxed);
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let include_state = engine.settings.current().enable_state_snapshot;
            let enriched = engine.enricher.enrich(record, include_state).await;
            match serde_json::to_value(&enriched) {
                Ok(payload) => engine.port.emit(Envelope::new(EnvelopeKind::Error, payload)),
                Err(err) => debug!(target: "pagelens", %err, "enriched record not serializable"),
            }
        });
    }

    pub fn record_interaction(&self, capture: InteractionCapture) {
        if !self.heavy_ready() {
            return;
        }
        self.totals.interactions.fetch_add(1, Ordering::Relaxed);
        let sensitive = is_sensitive_field(
            capture.field_name.as_deref().unwrap_or(""),
            capture.input_type.as_deref(),
            capture.autocomplete.as_deref(),
        );
        let value = capture.value.map(|value| {
            if sensitive {
                REDACTED_MARKER.to_string()
            } else if self.settings.current().enable_scrub {
                self.scrub.scrub(&value)
            } else {
                value
            }
        });
        let payload = json!({
            "kind": capture.kind,
            "target": capture.target,
            "value": value,
            "ts": now_ms(),
        });
        self.interaction_ring.lock().push(payload.clone());
        self.port.emit(Envelope::new(EnvelopeKind::Interaction, payload));
    }

    /// Performance observers are a phase-1 capability; this entry is open
    /// as soon as the engine exists.
    pub fn record_performance(&self, sample: PerfSample) {
        if self.lifecycle.phase() == Phase::Uninstalled {
            return;
        }
        self.totals.performance.fetch_add(1, Ordering::Relaxed);
        self.port.emit(Envelope::new(
            EnvelopeKind::Performance,
            json!({
                "metric": sample.metric,
                "value": sample.value,
                "detail": sample.detail,
                "ts": now_ms(),
            }),
        ));
    }

    /// Runs the governor over the current caps and resizes the rings when
    /// it shrank anything.
    pub fn apply_memory_footprint(&self, footprint_bytes: u64) {
        let next = {
            let mut caps = self.caps.lock();
            let next = caps.degraded(footprint_bytes);
            if next == *caps {
                return;
            }
            *caps = next;
            next
        };
        self.console_ring.lock().set_capacity(next.console_entries);
        self.network_ring.lock().set_capacity(next.network_bodies);
        self.interaction_ring.lock().set_capacity(next.interactions);
        self.stream_ring.lock().set_capacity(next.stream_events);
        debug!(
            target: "pagelens",
            footprint_bytes,
            capture_bodies = next.capture_bodies,
            "buffer caps degraded under memory pressure"
        );
    }

    pub fn apply_settings(&self, patch: &serde_json::Map<String, Value>) -> bool {
        self.settings.apply_patch(patch)
    }

    /// Serves the correlated command port until the client side goes
    /// away. Meant to be spawned once next to the engine.
    pub async fn serve_commands(self: Arc<Self>, mut server: CommandServer) {
        while let Some((request, responder)) = server.next().await {
            responder.send(self.handle_command(&request));
        }
    }

    /// Clears rings, tap state and the source-map cache. Monotonic totals
    /// survive so the relay can tell a reset from a restart.
    pub fn reset(&self) {
        self.tap.reset();
        self.enricher.clear_cache();
        self.console_ring.lock().clear();
        self.network_ring.lock().clear();
        self.interaction_ring.lock().clear();
        self.stream_ring.lock().clear();
        debug!(target: "pagelens", "engine state reset");
    }

    /// Cancels pending lifecycle work. Already-installed hooks stay; the
    /// page is never un-wrapped.
    pub fn shutdown(&self) {
        self.lifecycle.shutdown();
    }

    pub fn telemetry_dropped(&self) -> u64 {
        self.port.dropped()
    }

    fn handle_command(&self, request: &CommandRequest) -> Result<Value, String> {
        match request.name.as_str() {
            "status" => Ok(self.status_payload()),
            "snapshot" => Ok(self.snapshot_payload()),
            "applySettings" => {
                let Some(patch) = request.params.as_object() else {
                    return Err("applySettings expects an object of options".to_string());
                };
                let changed = self.apply_settings(patch);
                Ok(json!({ "changed": changed, "revision": self.settings.revision() }))
            }
            "reset" => {
                self.reset();
                Ok(json!({ "ok": true }))
            }
            other => Err(format!("unknown command: {other}")),
        }
    }

    fn status_payload(&self) -> Value {
        json!({
            "phase": self.lifecycle.phase(),
            "injectedAt": self.lifecycle.injected_at_ms(),
            "installedAt": self.lifecycle.installed_at_ms(),
            "settingsRevision": self.settings.revision(),
            "mode": self.settings.current().mode,
            "caps": *self.caps.lock(),
            "telemetryDropped": self.port.dropped(),
            "totals": {
                "console": self.totals.console.load(Ordering::Relaxed),
                "network": self.totals.network.load(Ordering::Relaxed),
                "interactions": self.totals.interactions.load(Ordering::Relaxed),
                "errors": self.totals.errors.load(Ordering::Relaxed),
                "performance": self.totals.performance.load(Ordering::Relaxed),
            },
            "streams": self.tap.status(),
        })
    }

    fn snapshot_payload(&self) -> Value {
        json!({
            "console": self.console_ring.lock().snapshot(),
            "network": self.network_ring.lock().snapshot(),
            "interactions": self.interaction_ring.lock().snapshot(),
            "streamMessages": self.stream_ring.lock().snapshot(),
        })
    }

    fn emit_stream(&self, payload: Value) {
        if payload["event"] == "message" {
            self.stream_ring.lock().push(payload.clone());
        }
        self.port.emit(Envelope::new(EnvelopeKind::Stream, payload));
    }

    fn heavy_ready(&self) -> bool {
        self.lifecycle.phase() == Phase::Phase2
    }

    fn bounded_body(&self, body: &str, scrub_on: bool) -> Value {
        let (text, truncated) = stream_tap::truncate_text(body, BODY_BYTE_LIMIT);
        let text = if scrub_on { self.scrub.scrub(&text) } else { text };
        if truncated {
            json!({ "text": text, "truncated": true })
        } else {
            Value::String(text)
        }
    }

    fn scrub_value(&self, value: Value) -> Value {
        match value {
            Value::String(text) => Value::String(self.scrub.scrub(&text)),
            Value::Array(items) => {
                Value::Array(items.into_iter().map(|item| self.scrub_value(item)).collect())
            }
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(key, item)| (key, self.scrub_value(item)))
                    .collect(),
            ),
            other => other,
        }
    }
}

/// Request/response bodies kept per call before truncation.
const BODY_BYTE_LIMIT: usize = 10_240;
