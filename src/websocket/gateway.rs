//! Message Gateway
//!
//! Sits between a connection's inbound pump and the hub. Every accepted
//! message is validated, stamped with an id and a server timestamp,
//! persisted, and only then broadcast.
//!
//! The gateway also attaches new connections. Attaching is a two-phase join:
//! the connection enters the hub in a joining state where live traffic is
//! held, the backlog is read from the store, and the hub then enqueues the
//! backlog followed by whatever was held that the backlog did not already
//! contain. Since the join happens before the backlog read and every
//! broadcast happens after its own save, a message racing the join is
//! delivered exactly once.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::Deserialize;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use uuid::Uuid;

use super::hub::{ConnectionHub, ConnectionId, Envelope, OutboundSender};
use super::messages::ClientMessage;
use crate::storage::{Message, MessageStore, StoreError};

/// What to do with a message the store refused
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistFailurePolicy {
    /// Drop it: nothing unrecorded is shown to other clients
    #[default]
    Durability,
    /// Broadcast it anyway
    Availability,
}

impl FromStr for PersistFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "durability" => Ok(Self::Durability),
            "availability" => Ok(Self::Availability),
            other => Err(format!("unknown persist failure policy: {}", other)),
        }
    }
}

/// Gateway limits and policies
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Messages replayed to a joining connection
    pub backlog_limit: usize,
    /// Maximum content length in bytes
    pub max_content_bytes: usize,
    /// Maximum `type` length in bytes
    pub max_kind_bytes: usize,
    /// Maximum sender length in bytes
    pub max_sender_bytes: usize,
    pub persist_failure_policy: PersistFailurePolicy,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            backlog_limit: 50,
            max_content_bytes: 400,
            max_kind_bytes: 20,
            max_sender_bytes: 255,
            persist_failure_policy: PersistFailurePolicy::Durability,
        }
    }
}

/// Why an inbound message was rejected
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid message format: {0}")]
    Malformed(String),

    #[error("Field '{0}' is required")]
    MissingField(&'static str),

    #[error("Field '{field}' is {len} bytes, limit is {max}")]
    TooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },
}

impl ValidationError {
    /// Unparseable framing ends the connection; a bad shape only drops the message
    pub fn closes_connection(&self) -> bool {
        matches!(self, ValidationError::Malformed(_))
    }
}

/// Errors returned by [`MessageGateway::accept`]
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("Message could not be saved: {0}")]
    Persistence(#[from] StoreError),
}

/// Validates, persists and broadcasts inbound messages
pub struct MessageGateway {
    store: Arc<dyn MessageStore>,
    hub: ConnectionHub,
    config: GatewayConfig,
    last_stamp: Mutex<DateTime<Utc>>,
}

impl MessageGateway {
    pub fn new(store: Arc<dyn MessageStore>, hub: ConnectionHub, config: GatewayConfig) -> Self {
        Self {
            store,
            hub,
            config,
            last_stamp: Mutex::new(DateTime::<Utc>::MIN_UTC),
        }
    }

    pub fn hub(&self) -> &ConnectionHub {
        &self.hub
    }

    /// Next acceptance timestamp, strictly after the previous one
    ///
    /// Truncated to microseconds, the resolution the store keeps.
    fn stamp(&self) -> DateTime<Utc> {
        let now = Utc::now().trunc_subsecs(6);
        let mut last = self
            .last_stamp
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let next = if now > *last {
            now
        } else {
            *last + Duration::microseconds(1)
        };
        *last = next;
        next
    }

    fn check_field(
        &self,
        field: &'static str,
        value: Option<String>,
        max: usize,
    ) -> Result<String, ValidationError> {
        let value = value
            .filter(|v| !v.trim().is_empty())
            .ok_or(ValidationError::MissingField(field))?;

        if value.len() > max {
            return Err(ValidationError::TooLong {
                field,
                len: value.len(),
                max,
            });
        }

        Ok(value)
    }

    /// Parse and validate a raw frame into a stamped message
    pub fn validate(&self, raw: &str) -> Result<Message, ValidationError> {
        let client = ClientMessage::parse(raw).map_err(|e| ValidationError::Malformed(e.to_string()))?;

        let kind = self.check_field("type", client.kind, self.config.max_kind_bytes)?;
        let content = self.check_field("content", client.content, self.config.max_content_bytes)?;
        let sender = self.check_field("sender", client.sender, self.config.max_sender_bytes)?;

        Ok(Message {
            id: Uuid::new_v4(),
            kind,
            content,
            sender,
            timestamp: self.stamp(),
        })
    }

    /// Validate, persist and broadcast one inbound message
    pub async fn accept(&self, raw: &str) -> Result<Message, GatewayError> {
        let message = self.validate(raw)?;

        if let Err(e) = self.store.save(&message).await {
            tracing::error!(
                message_id = %message.id,
                sender = %message.sender,
                error = %e,
                "Failed to persist message"
            );

            match self.config.persist_failure_policy {
                PersistFailurePolicy::Durability => return Err(GatewayError::Persistence(e)),
                PersistFailurePolicy::Availability => {
                    tracing::warn!(message_id = %message.id, "Broadcasting unpersisted message");
                }
            }
        }

        let recipients = self.hub.broadcast(&message).await;
        tracing::debug!(
            message_id = %message.id,
            kind = %message.kind,
            recipients,
            "Accepted message"
        );

        Ok(message)
    }

    /// Join a new connection and queue its backlog ahead of live traffic
    ///
    /// Returns the number of backlog messages queued, or `None` if the
    /// connection was dropped before the join completed.
    pub async fn attach(&self, id: ConnectionId, outbound: OutboundSender) -> Option<usize> {
        self.hub.join(id, outbound).await;

        // A backlog larger than the queue would evict every joiner
        let limit = self.config.backlog_limit.min(self.hub.outbound_capacity());
        let backlog = if limit == 0 {
            Vec::new()
        } else {
            match self.store.recent_messages(limit).await {
                Ok(messages) => messages,
                Err(e) => {
                    tracing::error!(connection_id = %id, error = %e, "Failed to load backlog");
                    Vec::new()
                }
            }
        };

        let envelopes: Vec<Envelope> = backlog
            .iter()
            .filter_map(|m| match Envelope::from_message(m) {
                Ok(envelope) => Some(envelope),
                Err(e) => {
                    tracing::error!(message_id = %m.id, error = %e, "Failed to serialize backlog message");
                    None
                }
            })
            .collect();
        let count = envelopes.len();

        self.hub.complete_join(id, envelopes).await.then_some(count)
    }
}
