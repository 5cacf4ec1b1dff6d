//! In-memory message store
//!
//! Keeps at most `capacity` messages ordered by timestamp. Nothing survives a
//! restart; used with `storage.backend = "memory"` and in tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use super::{Message, MessageStore, StoreError, StoreResult};

/// Bounded in-memory store
#[derive(Debug)]
pub struct MemoryMessageStore {
    messages: Mutex<VecDeque<Message>>,
    capacity: usize,
}

impl MemoryMessageStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            messages: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }
}

impl Default for MemoryMessageStore {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn save(&self, message: &Message) -> StoreResult<()> {
        let mut messages = self
            .messages
            .lock()
            .map_err(|_| StoreError::Unavailable("message buffer lock poisoned".to_string()))?;

        // Appends are almost always in order, so search from the back
        let pos = messages
            .iter()
            .rposition(|m| m.timestamp <= message.timestamp)
            .map(|i| i + 1)
            .unwrap_or(0);
        messages.insert(pos, message.clone());

        while messages.len() > self.capacity {
            messages.pop_front();
        }

        Ok(())
    }

    async fn recent_messages(&self, limit: usize) -> StoreResult<Vec<Message>> {
        let messages = self
            .messages
            .lock()
            .map_err(|_| StoreError::Unavailable("message buffer lock poisoned".to_string()))?;

        let skip = messages.len().saturating_sub(limit);
        Ok(messages.iter().skip(skip).cloned().collect())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn test_recent_returns_tail_oldest_first() {
        let store = MemoryMessageStore::new(10);
        let base = Utc::now();

        for i in 0..5 {
            let msg = Message::with_timestamp("chat", format!("m{}", i), "a", base + Duration::seconds(i));
            store.save(&msg).await.unwrap();
        }

        let recent = store.recent_messages(2).await.unwrap();
        let contents: Vec<_> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m3", "m4"]);
    }

    #[tokio::test]
    async fn test_out_of_order_save_is_sorted() {
        let store = MemoryMessageStore::new(10);
        let base = Utc::now();

        store
            .save(&Message::with_timestamp("chat", "late", "a", base + Duration::seconds(2)))
            .await
            .unwrap();
        store
            .save(&Message::with_timestamp("chat", "early", "a", base))
            .await
            .unwrap();

        let recent = store.recent_messages(10).await.unwrap();
        assert_eq!(recent[0].content, "early");
        assert_eq!(recent[1].content, "late");
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let store = MemoryMessageStore::new(3);
        let base = Utc::now();

        for i in 0..5 {
            let msg = Message::with_timestamp("chat", format!("m{}", i), "a", base + Duration::seconds(i));
            store.save(&msg).await.unwrap();
        }

        let recent = store.recent_messages(10).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].content, "m2");
    }
}
