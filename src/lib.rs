//! # Murmur
//!
//! Real-time message fan-out over WebSocket. Every message a client sends is
//! validated, stamped, stored and delivered to every connected client. New
//! clients first receive the most recent stored messages.
//!
//! ## Modules
//!
//! - [`storage`]: Message type and the SQLite / in-memory stores
//! - [`websocket`]: Connection hub, gateway, sessions and heartbeats
//! - [`api`]: HTTP server with Axum
//! - [`config`]: TOML and environment configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use murmur::storage::MemoryMessageStore;
//! use murmur::websocket::{ConnectionHub, GatewayConfig, HubConfig, MessageGateway};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let hub = ConnectionHub::new(HubConfig::default());
//!     let gateway = MessageGateway::new(
//!         Arc::new(MemoryMessageStore::default()),
//!         hub.clone(),
//!         GatewayConfig::default(),
//!     );
//!
//!     let message = gateway
//!         .accept(r#"{"type":"chat","content":"hello","sender":"alice"}"#)
//!         .await?;
//!     println!("{} at {}", message.content, message.timestamp);
//!
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod storage;
pub mod websocket;

pub use storage::{
    MemoryMessageStore, Message, MessageStore, SqliteMessageStore, StoreError, StoreResult,
};

pub use api::{build_router, serve, ApiError, AppState};

pub use websocket::{
    ConnectionHub, ConnectionId, GatewayError, HubConfig, MessageGateway, Session, SessionConfig,
    websocket_handler,
};

pub use config::{Config, ConfigError, LoggingConfig};
