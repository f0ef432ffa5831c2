use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use chrono::Utc;
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::HubError;
use crate::models::{DeviceData, DeviceState, HandshakeParams};
use crate::registry::{ConnectionHandle, Outbound, CLOSE_POLICY};
use crate::state::AppState;

/// How long a closing session waits for its writer to flush.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Identity a device presents when it connects.
#[derive(Clone, Debug, PartialEq)]
pub struct Handshake {
    pub device_id: String,
    pub device_type: String,
}

impl Handshake {
    pub fn from_params(params: HandshakeParams) -> Result<Self, HubError> {
        Ok(Self {
            device_id: required(params.device_id, "device_id")?,
            device_type: required(params.device_type, "device_type")?,
        })
    }
}

/// Ids are opaque: whitespace only counts as missing, otherwise the value is kept as sent.
fn required(value: Option<String>, name: &str) -> Result<String, HubError> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(HubError::BadHandshake(format!("{name} is required"))),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    Connecting,
    Active,
    Closed,
}

enum WriterExit {
    Drained,
    CloseSent,
    Failed(String),
}

/// One connected device: reads its frames, records its state, runs dispatch.
pub struct DeviceSession {
    state: AppState,
    handle: ConnectionHandle,
    phase: SessionPhase,
    frames_stored: u64,
    frames_dropped: u64,
}

impl DeviceSession {
    pub fn new(state: AppState, handshake: Handshake) -> (Self, mpsc::Receiver<Outbound>) {
        let (handle, outbound) = ConnectionHandle::new(
            state.registry.next_conn_id(),
            handshake.device_id,
            handshake.device_type,
            state.config.send_buffer,
        );
        let session = Self {
            state,
            handle,
            phase: SessionPhase::Connecting,
            frames_stored: 0,
            frames_dropped: 0,
        };
        (session, outbound)
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// Connecting -> Active. Registers this session's handle.
    pub async fn activate(&mut self) -> Result<(), HubError> {
        if self.phase != SessionPhase::Connecting {
            return Err(HubError::TransportFailure(format!(
                "session {} cannot activate from {:?}",
                self.handle.conn_id(),
                self.phase
            )));
        }
        self.state.registry.register(self.handle.clone()).await?;
        // Retained state from an earlier connection now belongs to this one.
        self.state
            .store
            .mark_live(self.handle.device_id(), self.handle.conn_id())
            .await;
        self.phase = SessionPhase::Active;
        info!(
            event = "device_connected",
            device_id = %self.handle.device_id(),
            device_type = %self.handle.device_type(),
            conn_id = self.handle.conn_id()
        );
        Ok(())
    }

    /// Decode one frame, store it and run dispatch. Malformed frames change nothing.
    pub async fn ingest(&mut self, raw: &str) -> Result<DeviceState, HubError> {
        if self.phase != SessionPhase::Active {
            return Err(HubError::TransportFailure(format!(
                "session {} is not active",
                self.handle.conn_id()
            )));
        }

        let data = match DeviceData::parse(raw) {
            Ok(data) => data,
            Err(err) => {
                self.frames_dropped += 1;
                debug!(
                    event = "malformed_frame",
                    device_id = %self.handle.device_id(),
                    error = %err
                );
                return Err(err);
            }
        };

        let update = DeviceState {
            device_id: self.handle.device_id().to_string(),
            device_type: self.handle.device_type().to_string(),
            last_seen: Utc::now(),
            data,
        };
        let stored = self.state.store.put(update, self.handle.conn_id()).await;
        self.frames_stored += 1;
        debug!(
            event = "device_update",
            device_id = %stored.device_id,
            keys = stored.data.len()
        );

        self.state
            .dispatch
            .dispatch(&self.handle, &self.state.registry, &stored)
            .await;
        Ok(stored)
    }

    /// Read-loop entry: a malformed frame is dropped (already logged) and the loop goes on.
    async fn ingest_frame(&mut self, raw: &str) {
        match self.ingest(raw).await {
            Ok(_) | Err(HubError::MalformedFrame(_)) => {}
            Err(err) => warn!(
                event = "ingest_failed",
                device_id = %self.handle.device_id(),
                error = %err
            ),
        }
    }

    /// Any phase -> Closed. Only the current registration is removed and marked offline.
    pub async fn close(&mut self, reason: &str) {
        let was_active = self.phase == SessionPhase::Active;
        self.phase = SessionPhase::Closed;
        if !was_active {
            return;
        }

        let device_id = self.handle.device_id();
        let unregistered = self
            .state
            .registry
            .unregister(device_id, self.handle.conn_id())
            .await;
        if unregistered {
            self.state
                .store
                .mark_offline(device_id, self.handle.conn_id())
                .await;
        }
        info!(
            event = "device_disconnected",
            device_id = %device_id,
            conn_id = self.handle.conn_id(),
            reason = reason,
            superseded = !unregistered,
            frames_stored = self.frames_stored,
            frames_dropped = self.frames_dropped
        );
    }

    /// Drive the session over an upgraded socket until the transport ends.
    pub async fn serve(state: AppState, handshake: Handshake, socket: WebSocket) {
        let (session, outbound) = Self::new(state, handshake);
        session.run(socket, outbound).await;
    }

    pub async fn run(mut self, socket: WebSocket, outbound: mpsc::Receiver<Outbound>) {
        let (sink, mut stream) = socket.split();
        let mut writer = tokio::spawn(write_loop(sink, outbound));
        let mut writer_finished = false;

        if let Err(err) = self.activate().await {
            warn!(
                event = "device_rejected",
                device_id = %self.handle.device_id(),
                error = %err
            );
            self.handle.close(CLOSE_POLICY, "duplicate device");
            self.close("rejected").await;
            drain_writer(writer, self.handle).await;
            return;
        }

        let reason = loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.ingest_frame(&text).await,
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => self.ingest_frame(&text).await,
                        Err(_) => {
                            self.frames_dropped += 1;
                            debug!(
                                event = "malformed_frame",
                                device_id = %self.handle.device_id(),
                                error = "binary frame is not utf-8"
                            );
                        }
                    },
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => break "peer_closed",
                    Some(Err(err)) => {
                        let err = HubError::TransportFailure(err.to_string());
                        warn!(event = "read_error", device_id = %self.handle.device_id(), error = %err);
                        break "read_error";
                    }
                },
                _ = self.handle.closed() => break "superseded",
                exit = &mut writer => {
                    writer_finished = true;
                    match exit {
                        Ok(WriterExit::Failed(err)) => {
                            let err = HubError::TransportFailure(err);
                            warn!(event = "write_error", device_id = %self.handle.device_id(), error = %err);
                            break "write_error";
                        }
                        Ok(WriterExit::CloseSent) => break "closed_by_hub",
                        Ok(WriterExit::Drained) | Err(_) => break "writer_stopped",
                    }
                }
            }
        };

        self.close(reason).await;
        if !writer_finished {
            drain_writer(writer, self.handle).await;
        }
    }
}

async fn drain_writer(writer: tokio::task::JoinHandle<WriterExit>, handle: ConnectionHandle) {
    // The writer stops once every sender is gone; ours is the last one held here.
    drop(handle);
    let abort = writer.abort_handle();
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
        abort.abort();
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Outbound>,
) -> WriterExit {
    while let Some(item) = outbound.recv().await {
        match item {
            Outbound::Message(message) => {
                let text = match serde_json::to_string(&message) {
                    Ok(text) => text,
                    Err(err) => {
                        warn!(event = "encode_error", kind = %message.kind, error = %err);
                        continue;
                    }
                };
                if let Err(err) = sink.send(Message::Text(text)).await {
                    return WriterExit::Failed(err.to_string());
                }
            }
            Outbound::Close { code, reason } => {
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code,
                        reason: reason.into(),
                    })))
                    .await;
                return WriterExit::CloseSent;
            }
        }
    }
    WriterExit::Drained
}
