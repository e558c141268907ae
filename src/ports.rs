//! The two seams to the out-of-scope relay: a fire-and-forget telemetry
//! stream going out, and a correlated request/response command port coming
//! in.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use pagelens_core_types::{Envelope, RequestId};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

#[derive(Debug, Error)]
pub enum PortError {
    #[error("command timed out")]
    Timeout,
    #[error("command channel closed")]
    Closed,
    #[error("{0}")]
    Rejected(String),
}

/// Outbound envelope stream. `emit` never waits: when the relay lags,
/// the envelope is dropped and counted. Loss under pressure is the
/// contract here, not a bug.
pub struct TelemetryPort {
    tx: mpsc::Sender<Envelope>,
    dropped: AtomicU64,
}

impl TelemetryPort {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    pub fn emit(&self, envelope: Envelope) {
        match self.tx.try_send(envelope) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(envelope)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(target: "pagelens", kind = ?envelope.kind, "relay lagging, dropped envelope");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
pub struct CommandRequest {
    pub id: RequestId,
    pub name: String,
    pub params: Value,
}

struct CommandEnvelope {
    request: CommandRequest,
    responder: oneshot::Sender<Result<Value, String>>,
}

pub fn command_channel(capacity: usize) -> (CommandClient, CommandServer) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (CommandClient { tx }, CommandServer { rx })
}

#[derive(Clone)]
pub struct CommandClient {
    tx: mpsc::Sender<CommandEnvelope>,
}

impl CommandClient {
    /// Sends one named command and awaits its single correlated reply.
    pub async fn request(
        &self,
        name: &str,
        params: Value,
        deadline: Duration,
    ) -> Result<Value, PortError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        let envelope = CommandEnvelope {
            request: CommandRequest {
                id: RequestId::new(),
                name: name.to_string(),
                params,
            },
            responder: resp_tx,
        };
        self.tx
            .send(envelope)
            .await
            .map_err(|_| PortError::Closed)?;
        match tokio::time::timeout(deadline, resp_rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(message))) => Err(PortError::Rejected(message)),
            Ok(Err(_)) => Err(PortError::Closed),
            Err(_) => Err(PortError::Timeout),
        }
    }
}

pub struct CommandServer {
    rx: mpsc::Receiver<CommandEnvelope>,
}

impl CommandServer {
    pub async fn next(&mut self) -> Option<(CommandRequest, Responder)> {
        let envelope = self.rx.recv().await?;
        let id = envelope.request.id.clone();
        Some((
            envelope.request,
            Responder {
                id,
                tx: envelope.responder,
            },
        ))
    }
}

/// Consumed by [`Responder::send`], so a request can never be answered
/// twice.
pub struct Responder {
    id: RequestId,
    tx: oneshot::Sender<Result<Value, String>>,
}

impl Responder {
    pub fn request_id(&self) -> &RequestId {
        &self.id
    }

    pub fn send(self, result: Result<Value, String>) {
        if self.tx.send(result).is_err() {
            debug!(target: "pagelens", id = %self.id, "command reply had no listener");
        }
    }
}
