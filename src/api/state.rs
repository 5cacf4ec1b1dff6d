//! Application State
//!
//! Shared state accessible by all API handlers.
//! Wrapped in Arc for thread-safe sharing across async tasks.

use crate::config::Config;
use crate::storage::MessageStore;
use crate::websocket::{ConnectionHub, MessageGateway, SessionConfig};
use std::sync::Arc;
use std::time::Instant;

/// Shared application state for all handlers
#[derive(Clone)]
pub struct AppState {
    /// Message store backing the gateway
    pub store: Arc<dyn MessageStore>,
    /// Coordinator handle for live connections
    pub hub: ConnectionHub,
    /// Validates, persists and broadcasts inbound messages
    pub gateway: Arc<MessageGateway>,
    /// Limits applied to each WebSocket session
    pub session_config: SessionConfig,
    /// Server start time for uptime tracking
    pub start_time: Instant,
}

impl AppState {
    /// Wire a hub and gateway around `store` using `config`
    ///
    /// Must be called inside a Tokio runtime, since the hub spawns its
    /// coordinator task.
    pub fn new(store: Arc<dyn MessageStore>, config: &Config) -> Self {
        let hub = ConnectionHub::new(config.hub_config());
        let gateway = Arc::new(MessageGateway::new(
            Arc::clone(&store),
            hub.clone(),
            config.gateway_config(),
        ));

        Self {
            store,
            hub,
            gateway,
            session_config: config.session_config(),
            start_time: Instant::now(),
        }
    }

    /// Get server uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
