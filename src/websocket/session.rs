//! Connection Session
//!
//! Adapts one WebSocket to the hub's queue model with two tasks:
//!
//! - the **inbound pump** reads frames under a read deadline and hands text
//!   frames to the gateway;
//! - the **outbound pump** drains the connection's queue, writing each frame
//!   under a write deadline, and sends heartbeat pings in between.
//!
//! Whichever pump stops first ends the session, and the connection is
//! unregistered. Unregistering closes the queue, which is how the outbound
//! pump learns to send a close frame and stop.
//!
//! The pumps are generic over the sink and stream halves so they can run on
//! top of an axum `WebSocket` or an in-memory channel.

use axum::extract::ws::{close_code, CloseFrame, Message as WsMessage};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;

use super::gateway::{GatewayError, MessageGateway};
use super::heartbeat::{Heartbeat, HeartbeatConfig, ReadDeadline};
use super::hub::{ConnectionId, OutboundReceiver};
use super::messages::error_notice;

/// Per-connection limits
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Largest inbound frame accepted, in bytes
    pub max_frame_bytes: usize,
    pub heartbeat: HeartbeatConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: 512,
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

/// Reasons a session ends abnormally
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("WebSocket error: {0}")]
    Transport(String),

    #[error("No pong within {0:?}")]
    ReadTimeout(Duration),

    #[error("Write did not complete within {0:?}")]
    WriteTimeout(Duration),

    #[error("Frame of {size} bytes exceeds limit of {limit}")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("{0}")]
    Malformed(String),
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Close reason sent when the hub drops a connection before its join completes
pub const JOIN_OVERFLOW_REASON: &str = "Backlog overflow, try again";

/// One attached client
pub struct Session {
    id: ConnectionId,
    gateway: Arc<MessageGateway>,
    config: SessionConfig,
}

impl Session {
    pub fn new(gateway: Arc<MessageGateway>, config: SessionConfig) -> Self {
        Self {
            id: ConnectionId::new(),
            gateway,
            config,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Attach to the hub and pump frames until either side stops
    pub async fn run<W, R, E>(self, mut sink: W, stream: R)
    where
        W: Sink<WsMessage> + Unpin + Send + 'static,
        W::Error: Display,
        R: Stream<Item = Result<WsMessage, E>> + Unpin + Send + 'static,
        E: Display + Send + 'static,
    {
        let id = self.id;
        let hub = self.gateway.hub().clone();
        let (outbound_tx, outbound_rx) = hub.outbound_queue();

        let heartbeat = self.config.heartbeat;

        let Some(backlog) = self.gateway.attach(id, outbound_tx).await else {
            tracing::warn!(connection_id = %id, "Connection dropped while joining");
            let frame = WsMessage::Close(Some(CloseFrame {
                code: close_code::AGAIN,
                reason: JOIN_OVERFLOW_REASON.into(),
            }));
            let _ = write_frame(&mut sink, frame, heartbeat.write_wait).await;
            let _ = timeout(heartbeat.write_wait, sink.close()).await;
            return;
        };
        tracing::debug!(
            connection_id = %id,
            backlog,
            reclaim_after = ?heartbeat.reclaim_bound(),
            "Backlog queued"
        );

        let mut send_task = tokio::spawn(outbound_pump(id, outbound_rx, sink, heartbeat));
        let mut recv_task = tokio::spawn(inbound_pump(
            id,
            stream,
            Arc::clone(&self.gateway),
            self.config.max_frame_bytes,
            heartbeat.pong_wait,
        ));

        tokio::select! {
            result = &mut send_task => {
                recv_task.abort();
                log_end(id, "outbound", result);
                hub.unregister(id).await;
            }
            result = &mut recv_task => {
                log_end(id, "inbound", result);
                // Closing the queue lets the outbound pump flush and send a close frame
                hub.unregister(id).await;
                match timeout(heartbeat.write_wait, &mut send_task).await {
                    Ok(result) => log_end(id, "outbound", result),
                    Err(_) => {
                        tracing::debug!(connection_id = %id, "Outbound pump did not finish, aborting");
                        send_task.abort();
                    }
                }
            }
        }
    }
}

fn log_end(id: ConnectionId, pump: &str, result: Result<SessionResult<()>, tokio::task::JoinError>) {
    match result {
        Ok(Ok(())) => tracing::debug!(connection_id = %id, pump, "Pump finished"),
        Ok(Err(e)) => tracing::debug!(connection_id = %id, pump, error = %e, "Pump failed"),
        Err(e) if e.is_cancelled() => {}
        Err(e) => tracing::error!(connection_id = %id, pump, error = %e, "Pump panicked"),
    }
}

async fn inbound_pump<R, E>(
    id: ConnectionId,
    mut stream: R,
    gateway: Arc<MessageGateway>,
    max_frame_bytes: usize,
    pong_wait: Duration,
) -> SessionResult<()>
where
    R: Stream<Item = Result<WsMessage, E>> + Unpin,
    E: Display,
{
    let mut deadline = ReadDeadline::new(pong_wait);

    loop {
        let frame = match deadline.read(stream.next()).await {
            Err(_) => return Err(SessionError::ReadTimeout(pong_wait)),
            Ok(None) => {
                tracing::debug!(connection_id = %id, "WebSocket stream ended");
                return Ok(());
            }
            Ok(Some(Err(e))) => return Err(SessionError::Transport(e.to_string())),
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            WsMessage::Text(text) => {
                if text.len() > max_frame_bytes {
                    return Err(SessionError::FrameTooLarge {
                        size: text.len(),
                        limit: max_frame_bytes,
                    });
                }
                handle_text(id, &gateway, &text).await?;
            }
            WsMessage::Binary(data) => {
                if data.len() > max_frame_bytes {
                    return Err(SessionError::FrameTooLarge {
                        size: data.len(),
                        limit: max_frame_bytes,
                    });
                }
                gateway
                    .hub()
                    .send_to(id, &error_notice("Binary messages not supported"))
                    .await;
            }
            WsMessage::Pong(_) => deadline.extend(),
            WsMessage::Ping(_) => {
                // Axum answers pings itself
            }
            WsMessage::Close(_) => {
                tracing::debug!(connection_id = %id, "Client requested close");
                return Ok(());
            }
        }
    }
}

async fn handle_text(id: ConnectionId, gateway: &MessageGateway, text: &str) -> SessionResult<()> {
    match gateway.accept(text).await {
        Ok(message) => {
            tracing::trace!(connection_id = %id, message_id = %message.id, "Message accepted");
            Ok(())
        }
        Err(GatewayError::Validation(e)) if e.closes_connection() => {
            gateway.hub().send_to(id, &error_notice(&e)).await;
            Err(SessionError::Malformed(e.to_string()))
        }
        Err(GatewayError::Validation(e)) => {
            tracing::debug!(connection_id = %id, error = %e, "Rejected message");
            gateway.hub().send_to(id, &error_notice(&e)).await;
            Ok(())
        }
        Err(e @ GatewayError::Persistence(_)) => {
            gateway.hub().send_to(id, &error_notice(&e)).await;
            Ok(())
        }
    }
}

async fn outbound_pump<W>(
    id: ConnectionId,
    mut queue: OutboundReceiver,
    mut sink: W,
    heartbeat: HeartbeatConfig,
) -> SessionResult<()>
where
    W: Sink<WsMessage> + Unpin,
    W::Error: Display,
{
    let mut ticker = Heartbeat::new(heartbeat.ping_period);

    loop {
        tokio::select! {
            next = queue.recv() => match next {
                Some(payload) => {
                    write_frame(&mut sink, WsMessage::Text(payload.to_string()), heartbeat.write_wait).await?;
                }
                None => {
                    // The hub closed our queue
                    tracing::debug!(connection_id = %id, "Outbound queue closed, sending close frame");
                    let _ = write_frame(&mut sink, WsMessage::Close(None), heartbeat.write_wait).await;
                    let _ = timeout(heartbeat.write_wait, sink.close()).await;
                    return Ok(());
                }
            },
            () = ticker.tick() => {
                tracing::trace!(connection_id = %id, "Sending ping");
                write_frame(&mut sink, Heartbeat::ping_frame(), heartbeat.write_wait).await?;
            }
        }
    }
}

async fn write_frame<W>(sink: &mut W, frame: WsMessage, write_wait: Duration) -> SessionResult<()>
where
    W: Sink<WsMessage> + Unpin,
    W::Error: Display,
{
    match timeout(write_wait, sink.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(SessionError::Transport(e.to_string())),
        Err(_) => Err(SessionError::WriteTimeout(write_wait)),
    }
}
