//! In-process message bus: one broadcast channel per topic.
//! Delivery is at-least-once per live subscriber; a subscriber that falls
//! more than `capacity` messages behind skips the oldest ones.

use tokio::sync::broadcast;

/// A named broadcast topic carrying payloads of type `T`.
pub struct Topic<T> {
    name: &'static str,
    tx: broadcast::Sender<T>,
}

impl<T: Clone + Send + 'static> Topic<T> {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { name, tx }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Publish to every current subscriber. Returns how many received it.
    pub fn publish(&self, message: T) -> usize {
        match self.tx.send(message) {
            Ok(n) => n,
            Err(_) => {
                tracing::trace!("📭 [{}] published with no subscriber", self.name);
                0
            }
        }
    }

    pub fn subscribe(&self) -> Subscription<T> {
        Subscription {
            topic: self.name,
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Receiving side of a [`Topic`].
pub struct Subscription<T> {
    topic: &'static str,
    rx: broadcast::Receiver<T>,
}

impl<T: Clone> Subscription<T> {
    /// Next message, or `None` once the topic is gone.
    pub async fn next(&mut self) -> Option<T> {
        loop {
            match self.rx.recv().await {
                Ok(msg) => return Some(msg),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("⚠️ [{}] subscriber lagged, skipped {} events", self.topic, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking poll, used by tests.
    pub fn try_next(&mut self) -> Option<T> {
        loop {
            match self.rx.try_recv() {
                Ok(msg) => return Some(msg),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    pub fn topic(&self) -> &'static str {
        self.topic
    }
}
