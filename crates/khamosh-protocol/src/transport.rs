//! Publish/subscribe seam over topics.

use std::future::Future;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::ProtocolError;

/// A payload delivered on a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Fire-and-forget message transport keyed by topic.
///
/// Delivery may be delayed, reordered or lost; the messaging layer copes.
pub trait Transport: Send + Sync {
    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<(), ProtocolError>> + Send;
}

/// In-process topic bus. Subscribers register a topic prefix and receive a
/// copy of every payload published under it.
#[derive(Default)]
pub struct MemoryBus {
    subscribers: Mutex<Vec<(String, mpsc::UnboundedSender<Delivery>)>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, topic_prefix: &str) -> mpsc::UnboundedReceiver<Delivery> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push((topic_prefix.to_string(), tx));
        tracing::debug!(prefix = topic_prefix, "subscribed");
        rx
    }

    fn deliver(&self, topic: &str, payload: Vec<u8>) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|(_, tx)| !tx.is_closed());

        let mut delivered = 0;
        for (prefix, tx) in subscribers.iter() {
            if topic.starts_with(prefix.as_str())
                && tx
                    .send(Delivery {
                        topic: topic.to_string(),
                        payload: payload.clone(),
                    })
                    .is_ok()
            {
                delivered += 1;
            }
        }
        delivered
    }
}

impl Transport for MemoryBus {
    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<(), ProtocolError>> + Send {
        let len = payload.len();
        let delivered = self.deliver(topic, payload);
        if delivered == 0 {
            tracing::debug!(topic, "no subscriber, payload dropped");
        } else {
            tracing::trace!(topic, payload_len = len, delivered, "published");
        }
        std::future::ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_by_prefix() {
        let bus = MemoryBus::new();
        let mut bob = bus.subscribe("/k/bob/");
        let mut carol = bus.subscribe("/k/carol/");

        bus.publish("/k/bob/alice", b"hi".to_vec()).await.unwrap();

        let delivery = bob.recv().await.unwrap();
        assert_eq!(delivery.topic, "/k/bob/alice");
        assert_eq!(delivery.payload, b"hi");
        assert!(carol.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropped_subscribers_are_pruned() {
        let bus = MemoryBus::new();
        drop(bus.subscribe("/k/bob/"));
        bus.publish("/k/bob/alice", vec![1]).await.unwrap();
        assert!(bus.subscribers.lock().is_empty());
    }
}
