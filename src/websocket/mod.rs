//! WebSocket Fan-Out
//!
//! Every message a client sends is validated, stored and then delivered to
//! every connected client, the sender included.
//!
//! ## Architecture
//!
//! - **ConnectionHub**: Coordinator task owning the registry of live connections
//! - **MessageGateway**: Validates, stamps and persists inbound messages, then broadcasts them
//! - **Session**: Per-connection inbound and outbound pumps
//! - **Heartbeat**: Ping ticker and read deadline used by the pumps
//! - **Handler**: Axum upgrade entry point
//!
//! ## Example
//!
//! ```javascript
//! // Browser
//! const ws = new WebSocket('ws://localhost:8080/ws');
//!
//! ws.onopen = () => {
//!   ws.send(JSON.stringify({type: 'chat', content: 'hello', sender: 'alice'}));
//! };
//!
//! ws.onmessage = (event) => {
//!   const msg = JSON.parse(event.data);
//!   console.log(msg.sender, msg.content, msg.timestamp);
//! };
//! ```

mod gateway;
mod handler;
mod heartbeat;
mod hub;
mod messages;
mod session;

pub use gateway::{GatewayConfig, GatewayError, MessageGateway, PersistFailurePolicy, ValidationError};
pub use handler::websocket_handler;
pub use heartbeat::{Heartbeat, HeartbeatConfig, ReadDeadline};
pub use hub::{
    ConnectionHub, ConnectionId, Envelope, HubConfig, HubStats, OutboundReceiver, OutboundSender,
    Payload,
};
pub use messages::{error_notice, ClientMessage, ERROR_KIND};
pub use session::{Session, SessionConfig, SessionError, SessionResult};
