//! PageLens telemetry engine
//!
//! In-page capture runtime: bounded serialization and scrubbing, adaptive
//! stream sampling, time-boxed error enrichment and a two-phase install
//! lifecycle, all behind one per-page engine object.

pub mod engine;
pub mod host;
pub mod lifecycle;
pub mod ports;
pub mod settings;

// Re-export commonly used types for embedders
pub use engine::{
    InteractionCapture, LensEngine, NetworkCapture, PerfSample, StreamObservation,
};
pub use host::{HostPage, InstallHooks};
pub use lifecycle::{BufferCaps, LifecycleController, Phase};
pub use ports::{
    command_channel, CommandClient, CommandRequest, CommandServer, PortError, Responder,
    TelemetryPort,
};
pub use settings::{Settings, SettingsHandle};

pub use error_enrich::{AiContext, EnrichOptions, Enricher, ErrorRecord};
pub use pagelens_core_types::{
    CaptureMode, ConnectionId, Direction, Envelope, EnvelopeKind, RequestId,
};
pub use pagelens_sanitize::{PageValue, ScrubEngine, ScrubRule};
pub use stream_tap::{StreamPayload, StreamTap, TapStatus};
