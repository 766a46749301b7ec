//! [`sync_session::Transport`] implemented over an Axum WebSocket. The sink
//! half is driven by a dedicated writer task fed through an unbounded
//! channel so `send_text`/`send_binary` can stay `&self` and be called
//! concurrently; the stream half only ever has one reader (the Session's
//! receive loop) so a plain async mutex is enough for it.

use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex};

use sync_core::config::{HEARTBEAT_INTERVAL_SECS, MAX_PAYLOAD_BYTES};
use sync_session::{InboundFrame, Result, SessionError, Transport};

pub struct AxumTransport {
    outbound: mpsc::UnboundedSender<Message>,
    inbound: Mutex<SplitStream<WebSocket>>,
}

impl AxumTransport {
    /// Split `socket`, spawn the writer task, and hand back the transport
    /// plus a handle the caller can await to know when the writer has
    /// drained and exited. The writer also ticks a WS ping on its own
    /// schedule so an idle connection with nothing to sync still gets
    /// checked for liveness.
    pub fn spawn(socket: WebSocket) -> (std::sync::Arc<Self>, tokio::task::JoinHandle<()>) {
        let (mut sink, stream) = socket.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

        let writer = tokio::spawn(async move {
            let mut heartbeat = tokio::time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
            heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    message = rx.recv() => {
                        let Some(message) = message else { break };
                        if sink.send(message).await.is_err() {
                            break;
                        }
                    }
                    _ = heartbeat.tick() => {
                        if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                            break;
                        }
                    }
                }
            }
            let _ = sink.close().await;
        });

        let transport = std::sync::Arc::new(Self {
            outbound: tx,
            inbound: Mutex::new(stream),
        });
        (transport, writer)
    }
}

#[async_trait]
impl Transport for AxumTransport {
    async fn send_text(&self, text: String) -> Result<()> {
        self.outbound
            .send(Message::Text(text.into()))
            .map_err(|e| SessionError::Transport(e.to_string()))
    }

    async fn send_binary(&self, bytes: Vec<u8>) -> Result<()> {
        self.outbound
            .send(Message::Binary(bytes.into()))
            .map_err(|e| SessionError::Transport(e.to_string()))
    }

    async fn recv(&self) -> Result<Option<InboundFrame>> {
        let mut stream = self.inbound.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    if text.len() > MAX_PAYLOAD_BYTES {
                        tracing::warn!(len = text.len(), "oversized text frame, dropping connection");
                        return Ok(None);
                    }
                    return Ok(Some(InboundFrame::Text(text.to_string())));
                }
                Some(Ok(Message::Binary(bytes))) => {
                    if bytes.len() > MAX_PAYLOAD_BYTES {
                        tracing::warn!(len = bytes.len(), "oversized binary frame, dropping connection");
                        return Ok(None);
                    }
                    return Ok(Some(InboundFrame::Binary(bytes.to_vec())));
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Err(err)) => return Err(SessionError::Transport(err.to_string())),
            }
        }
    }

    async fn close(&self) -> Result<()> {
        let _ = self.outbound.send(Message::Close(None));
        Ok(())
    }
}
