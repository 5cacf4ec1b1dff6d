//! WebSocket Connection Hub
//!
//! Owns the registry of live connections and fans accepted messages out to
//! them. All state lives inside one coordinator task; `ConnectionHub` is a
//! cheap handle that sends commands to it, so register, unregister and
//! broadcast are linearized without any lock around the registry.
//!
//! Every connection has its own bounded outbound queue. The hub only ever
//! `try_send`s into it: a full queue means the consumer is too slow, and that
//! connection is evicted on the spot instead of stalling everyone else.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::mem;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::storage::Message;

/// A serialized frame, shared by every connection it is delivered to
pub type Payload = Arc<str>;

/// Sending half of a connection's outbound queue
pub type OutboundSender = mpsc::Sender<Payload>;

/// Receiving half of a connection's outbound queue
pub type OutboundReceiver = mpsc::Receiver<Payload>;

/// Unique identifier for a WebSocket connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Configuration for the connection hub
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of each connection's outbound queue
    pub outbound_capacity: usize,
    /// Capacity of the coordinator's command queue
    pub command_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 256,
            command_capacity: 1024,
        }
    }
}

/// A message ready for fan-out: its id plus the serialized frame
#[derive(Debug, Clone)]
pub struct Envelope {
    pub message_id: Uuid,
    pub payload: Payload,
}

impl Envelope {
    pub fn from_message(message: &Message) -> Result<Self, serde_json::Error> {
        Ok(Self {
            message_id: message.id,
            payload: serde_json::to_string(message)?.into(),
        })
    }
}

/// Point-in-time counters reported by the coordinator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Connections receiving live traffic
    pub live: usize,
    /// Connections still waiting for their backlog
    pub joining: usize,
    /// Broadcasts processed since start
    pub broadcasts: u64,
    /// Individual frames enqueued since start
    pub delivered: u64,
    /// Connections dropped because their queue was full or closed
    pub evictions: u64,
}

enum SlotState {
    Live,
    /// Live traffic is held here until the backlog has been enqueued
    Joining { pending: Vec<Envelope> },
}

struct Slot {
    outbound: OutboundSender,
    state: SlotState,
}

enum HubCommand {
    Register {
        id: ConnectionId,
        outbound: OutboundSender,
        done: oneshot::Sender<()>,
    },
    Join {
        id: ConnectionId,
        outbound: OutboundSender,
        done: oneshot::Sender<()>,
    },
    CompleteJoin {
        id: ConnectionId,
        backlog: Vec<Envelope>,
        done: oneshot::Sender<bool>,
    },
    Unregister {
        id: ConnectionId,
        done: oneshot::Sender<bool>,
    },
    Broadcast {
        envelope: Envelope,
        done: oneshot::Sender<usize>,
    },
    SendTo {
        id: ConnectionId,
        payload: Payload,
        done: oneshot::Sender<bool>,
    },
    Contains {
        id: ConnectionId,
        reply: oneshot::Sender<bool>,
    },
    Stats {
        reply: oneshot::Sender<HubStats>,
    },
}

/// Registry state, only ever touched by the coordinator task
struct Registry {
    slots: HashMap<ConnectionId, Slot>,
    outbound_capacity: usize,
    broadcasts: u64,
    delivered: u64,
    evictions: u64,
}

impl Registry {
    fn new(outbound_capacity: usize) -> Self {
        Self {
            slots: HashMap::new(),
            outbound_capacity,
            broadcasts: 0,
            delivered: 0,
            evictions: 0,
        }
    }

    fn apply(&mut self, command: HubCommand) {
        // A dropped reply receiver only means the caller stopped waiting
        match command {
            HubCommand::Register { id, outbound, done } => {
                self.insert(id, outbound, SlotState::Live);
                tracing::info!(connection_id = %id, "WebSocket connected");
                let _ = done.send(());
            }
            HubCommand::Join { id, outbound, done } => {
                self.insert(id, outbound, SlotState::Joining { pending: Vec::new() });
                tracing::debug!(connection_id = %id, "WebSocket joining");
                let _ = done.send(());
            }
            HubCommand::CompleteJoin { id, backlog, done } => {
                let _ = done.send(self.complete_join(id, backlog));
            }
            HubCommand::Unregister { id, done } => {
                let _ = done.send(self.unregister(id));
            }
            HubCommand::Broadcast { envelope, done } => {
                let _ = done.send(self.broadcast(&envelope));
            }
            HubCommand::SendTo { id, payload, done } => {
                let _ = done.send(self.send_to(id, payload));
            }
            HubCommand::Contains { id, reply } => {
                let _ = reply.send(self.slots.contains_key(&id));
            }
            HubCommand::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
        }
    }

    fn insert(&mut self, id: ConnectionId, outbound: OutboundSender, state: SlotState) {
        if self.slots.insert(id, Slot { outbound, state }).is_some() {
            // The replaced sender is dropped here, closing the old queue
            tracing::warn!(connection_id = %id, "Connection registered twice, replacing old queue");
        }
    }

    fn unregister(&mut self, id: ConnectionId) -> bool {
        // Dropping the slot drops the only sender, which closes the queue
        let removed = self.slots.remove(&id).is_some();
        if removed {
            tracing::info!(connection_id = %id, "WebSocket disconnected");
        }
        removed
    }

    fn evict(&mut self, id: ConnectionId, reason: &str) {
        if self.slots.remove(&id).is_some() {
            self.evictions += 1;
            tracing::warn!(connection_id = %id, reason, "Evicting connection");
        }
    }

    fn broadcast(&mut self, envelope: &Envelope) -> usize {
        self.broadcasts += 1;

        let mut delivered = 0;
        let mut failed = Vec::new();

        for (id, slot) in self.slots.iter_mut() {
            match &mut slot.state {
                SlotState::Live => match slot.outbound.try_send(Arc::clone(&envelope.payload)) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => failed.push((*id, "outbound queue full")),
                    Err(TrySendError::Closed(_)) => failed.push((*id, "outbound queue closed")),
                },
                SlotState::Joining { pending } => {
                    if pending.len() >= self.outbound_capacity {
                        failed.push((*id, "join buffer full"));
                    } else {
                        pending.push(envelope.clone());
                    }
                }
            }
        }

        for (id, reason) in failed {
            self.evict(id, reason);
        }

        self.delivered += delivered as u64;
        tracing::trace!(
            message_id = %envelope.message_id,
            recipients = delivered,
            "Broadcast message"
        );
        delivered
    }

    fn complete_join(&mut self, id: ConnectionId, backlog: Vec<Envelope>) -> bool {
        let Some(slot) = self.slots.get_mut(&id) else {
            // Unregistered while the backlog was being fetched
            return false;
        };

        let pending = match mem::replace(&mut slot.state, SlotState::Live) {
            SlotState::Joining { pending } => pending,
            SlotState::Live => return true,
        };

        let replayed: HashSet<Uuid> = backlog.iter().map(|e| e.message_id).collect();
        let backlog_len = backlog.len();
        let mut sent = 0u64;
        let mut failure = None;

        let queued = backlog
            .into_iter()
            .chain(pending.into_iter().filter(|e| !replayed.contains(&e.message_id)));

        for envelope in queued {
            match slot.outbound.try_send(envelope.payload) {
                Ok(()) => sent += 1,
                Err(TrySendError::Full(_)) => {
                    failure = Some("outbound queue full during join");
                    break;
                }
                Err(TrySendError::Closed(_)) => {
                    failure = Some("outbound queue closed during join");
                    break;
                }
            }
        }

        self.delivered += sent;

        if let Some(reason) = failure {
            self.evict(id, reason);
            return false;
        }

        tracing::info!(
            connection_id = %id,
            backlog = backlog_len,
            held = sent as usize - backlog_len,
            "WebSocket joined"
        );
        true
    }

    fn send_to(&mut self, id: ConnectionId, payload: Payload) -> bool {
        let Some(slot) = self.slots.get(&id) else {
            return false;
        };

        match slot.outbound.try_send(payload) {
            Ok(()) => {
                self.delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                self.evict(id, "outbound queue full");
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.evict(id, "outbound queue closed");
                false
            }
        }
    }

    fn stats(&self) -> HubStats {
        let joining = self
            .slots
            .values()
            .filter(|s| matches!(s.state, SlotState::Joining { .. }))
            .count();

        HubStats {
            live: self.slots.len() - joining,
            joining,
            broadcasts: self.broadcasts,
            delivered: self.delivered,
            evictions: self.evictions,
        }
    }
}

async fn run_coordinator(mut registry: Registry, mut commands: mpsc::Receiver<HubCommand>) {
    while let Some(command) = commands.recv().await {
        registry.apply(command);
    }

    tracing::debug!(
        remaining = registry.slots.len(),
        "Hub coordinator stopped, closing remaining queues"
    );
}

/// Handle to the hub coordinator
///
/// Cloning is cheap; every clone talks to the same coordinator. The
/// coordinator stops once the last handle is dropped, closing every queue
/// still registered.
#[derive(Clone)]
pub struct ConnectionHub {
    commands: mpsc::Sender<HubCommand>,
    outbound_capacity: usize,
}

impl ConnectionHub {
    /// Create a new connection hub and spawn its coordinator
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: HubConfig) -> Self {
        let outbound_capacity = config.outbound_capacity.max(1);
        let (commands, receiver) = mpsc::channel(config.command_capacity.max(1));

        tokio::spawn(run_coordinator(Registry::new(outbound_capacity), receiver));

        Self {
            commands,
            outbound_capacity,
        }
    }

    /// Capacity of every outbound queue this hub hands out
    pub fn outbound_capacity(&self) -> usize {
        self.outbound_capacity
    }

    /// A fresh outbound queue sized for this hub
    pub fn outbound_queue(&self) -> (OutboundSender, OutboundReceiver) {
        mpsc::channel(self.outbound_capacity)
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> HubCommand) -> Option<T> {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(command(tx)).await.is_err() {
            tracing::warn!("Hub coordinator is not running");
            return None;
        }
        rx.await.ok()
    }

    /// Register a connection for live traffic
    ///
    /// The connection is a broadcast target once this returns.
    pub async fn register(&self, id: ConnectionId, outbound: OutboundSender) {
        self.request(|done| HubCommand::Register { id, outbound, done })
            .await;
    }

    /// Register a connection whose live traffic is held until [`complete_join`]
    ///
    /// [`complete_join`]: ConnectionHub::complete_join
    pub async fn join(&self, id: ConnectionId, outbound: OutboundSender) {
        self.request(|done| HubCommand::Join { id, outbound, done })
            .await;
    }

    /// Enqueue `backlog`, then any held live traffic not already in it, and
    /// switch the connection to live delivery
    ///
    /// Returns false if the connection is gone or overflowed while joining.
    pub async fn complete_join(&self, id: ConnectionId, backlog: Vec<Envelope>) -> bool {
        self.request(|done| HubCommand::CompleteJoin { id, backlog, done })
            .await
            .unwrap_or(false)
    }

    /// Remove a connection and close its outbound queue
    ///
    /// Idempotent: returns whether this call removed anything.
    pub async fn unregister(&self, id: ConnectionId) -> bool {
        self.request(|done| HubCommand::Unregister { id, done })
            .await
            .unwrap_or(false)
    }

    /// Fan a message out to every registered connection
    ///
    /// Returns the number of live queues it was enqueued on.
    pub async fn broadcast(&self, message: &Message) -> usize {
        match Envelope::from_message(message) {
            Ok(envelope) => self.broadcast_envelope(envelope).await,
            Err(e) => {
                tracing::error!(message_id = %message.id, error = %e, "Failed to serialize message");
                0
            }
        }
    }

    /// Fan out an already serialized message
    pub async fn broadcast_envelope(&self, envelope: Envelope) -> usize {
        self.request(|done| HubCommand::Broadcast { envelope, done })
            .await
            .unwrap_or(0)
    }

    /// Send a message directly to a specific connection
    pub async fn send_to(&self, id: ConnectionId, message: &Message) -> bool {
        let payload: Payload = match serde_json::to_string(message) {
            Ok(text) => text.into(),
            Err(e) => {
                tracing::error!(connection_id = %id, error = %e, "Failed to serialize message");
                return false;
            }
        };

        self.request(|done| HubCommand::SendTo { id, payload, done })
            .await
            .unwrap_or(false)
    }

    /// Whether the connection is currently registered
    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.request(|reply| HubCommand::Contains { id, reply })
            .await
            .unwrap_or(false)
    }

    /// Current counters
    pub async fn stats(&self) -> HubStats {
        self.request(|reply| HubCommand::Stats { reply })
            .await
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hub_with_capacity(outbound_capacity: usize) -> ConnectionHub {
        ConnectionHub::new(HubConfig {
            outbound_capacity,
            command_capacity: 64,
        })
    }

    async fn registered(hub: &ConnectionHub) -> usize {
        let stats = hub.stats().await;
        stats.live + stats.joining
    }

    fn chat(content: &str) -> Message {
        Message::new("chat", content, "tester")
    }

    fn content_of(payload: &Payload) -> String {
        let msg: Message = serde_json::from_str(payload).unwrap();
        msg.content
    }

    #[test]
    fn test_default_config() {
        let config = HubConfig::default();
        assert_eq!(config.outbound_capacity, 256);
        assert_eq!(config.command_capacity, 1024);
    }

    #[tokio::test]
    async fn test_register_unregister() {
        let hub = hub_with_capacity(8);
        let (tx, _rx) = hub.outbound_queue();
        let id = ConnectionId::new();

        hub.register(id, tx).await;
        assert!(hub.contains(id).await);
        assert_eq!(registered(&hub).await, 1);

        assert!(hub.unregister(id).await);
        assert!(!hub.contains(id).await);
        assert_eq!(registered(&hub).await, 0);
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let hub = hub_with_capacity(8);
        let (tx, mut rx) = hub.outbound_queue();
        let id = ConnectionId::new();

        hub.register(id, tx).await;
        assert!(hub.unregister(id).await);
        assert!(!hub.unregister(id).await);
        assert!(!hub.unregister(ConnectionId::new()).await);

        // Queue closed exactly once, nothing left in it
        assert!(rx.recv().await.is_none());
        assert_eq!(hub.stats().await.evictions, 0);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_connection_in_order() {
        let hub = hub_with_capacity(8);
        let mut receivers = Vec::new();

        for _ in 0..3 {
            let (tx, rx) = hub.outbound_queue();
            hub.register(ConnectionId::new(), tx).await;
            receivers.push(rx);
        }

        assert_eq!(hub.broadcast(&chat("one")).await, 3);
        assert_eq!(hub.broadcast(&chat("two")).await, 3);

        for rx in receivers.iter_mut() {
            assert_eq!(content_of(&rx.recv().await.unwrap()), "one");
            assert_eq!(content_of(&rx.recv().await.unwrap()), "two");
            assert!(rx.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn test_unregistered_connection_gets_nothing() {
        let hub = hub_with_capacity(8);
        let (tx_a, mut rx_a) = hub.outbound_queue();
        let (tx_b, mut rx_b) = hub.outbound_queue();
        let a = ConnectionId::new();

        hub.register(a, tx_a).await;
        hub.register(ConnectionId::new(), tx_b).await;
        hub.unregister(a).await;

        assert_eq!(hub.broadcast(&chat("after")).await, 1);
        assert!(rx_a.recv().await.is_none());
        assert_eq!(content_of(&rx_b.recv().await.unwrap()), "after");
    }

    #[tokio::test]
    async fn test_full_queue_evicts_only_slow_consumer() {
        let hub = hub_with_capacity(2);
        let (slow_tx, mut slow_rx) = hub.outbound_queue();
        let (fast_tx, mut fast_rx) = hub.outbound_queue();
        let slow = ConnectionId::new();
        let fast = ConnectionId::new();

        hub.register(slow, slow_tx).await;
        hub.register(fast, fast_tx).await;

        for i in 0..3 {
            hub.broadcast(&chat(&format!("m{}", i))).await;
            // The fast consumer keeps up
            assert_eq!(content_of(&fast_rx.recv().await.unwrap()), format!("m{}", i));
        }

        assert!(!hub.contains(slow).await);
        assert!(hub.contains(fast).await);
        assert_eq!(hub.stats().await.evictions, 1);

        // What was queued before eviction is still drained, then the queue ends
        assert_eq!(content_of(&slow_rx.recv().await.unwrap()), "m0");
        assert_eq!(content_of(&slow_rx.recv().await.unwrap()), "m1");
        assert!(slow_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_closed_queue_is_evicted() {
        let hub = hub_with_capacity(4);
        let (tx, rx) = hub.outbound_queue();
        let id = ConnectionId::new();

        hub.register(id, tx).await;
        drop(rx);

        assert_eq!(hub.broadcast(&chat("nobody home")).await, 0);
        assert!(!hub.contains(id).await);
    }

    #[tokio::test]
    async fn test_send_to_single_connection() {
        let hub = hub_with_capacity(4);
        let (tx_a, mut rx_a) = hub.outbound_queue();
        let (tx_b, mut rx_b) = hub.outbound_queue();
        let a = ConnectionId::new();

        hub.register(a, tx_a).await;
        hub.register(ConnectionId::new(), tx_b).await;

        assert!(hub.send_to(a, &Message::notice("error", "only you")).await);
        assert_eq!(content_of(&rx_a.recv().await.unwrap()), "only you");
        assert!(rx_b.try_recv().is_err());

        assert!(!hub.send_to(ConnectionId::new(), &chat("lost")).await);
    }

    #[tokio::test]
    async fn test_join_holds_live_traffic_until_backlog_is_sent() {
        let hub = hub_with_capacity(16);
        let (tx, mut rx) = hub.outbound_queue();
        let id = ConnectionId::new();

        let old = chat("old");
        let racing = chat("racing");
        let fresh = chat("fresh");

        hub.join(id, tx).await;
        // Delivered nowhere yet, but held for the joiner
        assert_eq!(hub.broadcast(&racing).await, 0);
        assert_eq!(hub.broadcast(&fresh).await, 0);
        assert!(rx.try_recv().is_err());
        assert_eq!(hub.stats().await.joining, 1);

        // The backlog snapshot already contains `racing`
        let backlog = vec![
            Envelope::from_message(&old).unwrap(),
            Envelope::from_message(&racing).unwrap(),
        ];
        assert!(hub.complete_join(id, backlog).await);

        let received: Vec<String> = [
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
        ]
        .iter()
        .map(content_of)
        .collect();
        assert_eq!(received, vec!["old", "racing", "fresh"]);
        assert!(rx.try_recv().is_err());

        let stats = hub.stats().await;
        assert_eq!(stats.live, 1);
        assert_eq!(stats.joining, 0);
    }

    #[tokio::test]
    async fn test_complete_join_after_unregister_is_noop() {
        let hub = hub_with_capacity(4);
        let (tx, _rx) = hub.outbound_queue();
        let id = ConnectionId::new();

        hub.join(id, tx).await;
        hub.unregister(id).await;

        assert!(!hub.complete_join(id, Vec::new()).await);
        assert!(!hub.contains(id).await);
    }

    #[tokio::test]
    async fn test_join_buffer_overflow_evicts() {
        let hub = hub_with_capacity(2);
        let (tx, _rx) = hub.outbound_queue();
        let id = ConnectionId::new();

        hub.join(id, tx).await;
        for i in 0..3 {
            hub.broadcast(&chat(&format!("m{}", i))).await;
        }

        assert!(!hub.contains(id).await);
        assert!(!hub.complete_join(id, Vec::new()).await);
    }

    #[tokio::test]
    async fn test_concurrent_register_unregister_settles() {
        // Room for every broadcast, so nothing is evicted
        let hub = hub_with_capacity(128);
        let mut tasks = Vec::new();

        for i in 0..64 {
            let hub = hub.clone();
            tasks.push(tokio::spawn(async move {
                let (tx, rx) = hub.outbound_queue();
                let id = ConnectionId::new();
                hub.register(id, tx).await;
                hub.broadcast(&chat("noise")).await;
                if i % 2 == 0 {
                    hub.unregister(id).await;
                    hub.unregister(id).await;
                }
                (i, id, rx)
            }));
        }

        let mut kept = Vec::new();
        for task in tasks {
            kept.push(task.await.unwrap());
        }

        for (i, id, _) in &kept {
            assert_eq!(hub.contains(*id).await, i % 2 == 1, "connection {}", i);
        }
        assert_eq!(registered(&hub).await, 32);
        assert_eq!(hub.stats().await.evictions, 0);
    }

    #[tokio::test]
    async fn test_join_and_register_log_differently() {
        use std::io::Write;
        use std::sync::Mutex;

        #[derive(Clone, Default)]
        struct Capture(Arc<Mutex<Vec<u8>>>);

        impl Write for Capture {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }

            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let capture = Capture::default();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .finish();
        // The coordinator runs on this thread under the current-thread runtime
        let _guard = tracing::subscriber::set_default(subscriber);

        let hub = hub_with_capacity(4);
        let (tx, _rx) = hub.outbound_queue();
        hub.register(ConnectionId::new(), tx).await;
        let (tx, _rx2) = hub.outbound_queue();
        let joiner = ConnectionId::new();
        hub.join(joiner, tx).await;
        assert!(hub.complete_join(joiner, Vec::new()).await);

        let logs = String::from_utf8(capture.0.lock().unwrap().clone()).unwrap();
        assert_eq!(logs.matches("WebSocket connected").count(), 1);
        assert_eq!(logs.matches("WebSocket joined").count(), 1);
    }

    #[tokio::test]
    async fn test_reregister_replaces_queue() {
        let hub = hub_with_capacity(4);
        let (old_tx, mut old_rx) = hub.outbound_queue();
        let (new_tx, mut new_rx) = hub.outbound_queue();
        let id = ConnectionId::new();

        hub.register(id, old_tx).await;
        hub.register(id, new_tx).await;

        assert_eq!(registered(&hub).await, 1);
        assert!(old_rx.recv().await.is_none());

        hub.broadcast(&chat("hi")).await;
        assert_eq!(content_of(&new_rx.recv().await.unwrap()), "hi");
    }
}
