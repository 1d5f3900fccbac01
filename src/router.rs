//! Fan-out router: one upstream TS byte source, N HTTP subscribers, bounded
//! per-subscriber queues with drop-on-full.
//!
//! HTTP transport mechanics are out of scope here; this module only owns
//! the in-process multiplexing between one upstream byte stream and many
//! subscriber queues. Uses per-subscriber bounded mpsc with a non-blocking
//! `try_send` drop policy rather than a broadcast channel, since a full
//! subscriber must never slow down the others.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::errors::RouterError;
use crate::metrics::RuntimeMetrics;

/// Per-subscriber queue handle. Owned exclusively by the HTTP handler
/// serving it; the router holds only the sending half.
pub type SubscriberQueue = mpsc::Receiver<Bytes>;

struct Subscriber {
    sender: mpsc::Sender<Bytes>,
    dropped_chunks: Arc<AtomicUsize>,
}

/// Per-channel TS multiplexer.
pub struct FanoutRouter {
    queue_depth: usize,
    subscribers: RwLock<HashMap<Uuid, Subscriber>>,
    subscriber_count: AtomicUsize,
    metrics: Option<(Uuid, Arc<RuntimeMetrics>)>,
}

impl FanoutRouter {
    pub fn new(queue_depth: usize) -> Self {
        Self {
            queue_depth,
            subscribers: RwLock::new(HashMap::new()),
            subscriber_count: AtomicUsize::new(0),
            metrics: None,
        }
    }

    /// Same as [`Self::new`], but drops are additionally reported to the
    /// process-wide metrics counters under `channel_id`.
    pub fn new_with_metrics(queue_depth: usize, channel_id: Uuid, metrics: Arc<RuntimeMetrics>) -> Self {
        Self {
            queue_depth,
            subscribers: RwLock::new(HashMap::new()),
            subscriber_count: AtomicUsize::new(0),
            metrics: Some((channel_id, metrics)),
        }
    }

    pub async fn subscribe(&self, subscriber_id: Uuid) -> SubscriberQueue {
        let (tx, rx) = mpsc::channel(self.queue_depth);
        self.subscribers.write().await.insert(
            subscriber_id,
            Subscriber {
                sender: tx,
                dropped_chunks: Arc::new(AtomicUsize::new(0)),
            },
        );
        self.subscriber_count.fetch_add(1, Ordering::SeqCst);
        rx
    }

    pub async fn unsubscribe(&self, subscriber_id: Uuid) {
        if self.subscribers.write().await.remove(&subscriber_id).is_some() {
            self.subscriber_count.fetch_sub(1, Ordering::SeqCst);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriber_count.load(Ordering::SeqCst)
    }

    pub async fn dropped_chunks_for(&self, subscriber_id: Uuid) -> usize {
        self.subscribers
            .read()
            .await
            .get(&subscriber_id)
            .map(|s| s.dropped_chunks.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Delivers one upstream chunk to every current subscriber
    /// non-blockingly. A full queue drops the chunk for that subscriber and
    /// increments its drop counter; other subscribers are unaffected.
    /// Complete chunks are dropped whole, never split mid-chunk, to
    /// preserve TS framing.
    pub async fn deliver(&self, chunk: Bytes) -> Result<(), RouterError> {
        let subscribers = self.subscribers.read().await;
        if subscribers.is_empty() {
            return Ok(());
        }
        for (subscriber_id, subscriber) in subscribers.iter() {
            if let Err(mpsc::error::TrySendError::Full(_)) = subscriber.sender.try_send(chunk.clone()) {
                subscriber.dropped_chunks.fetch_add(1, Ordering::SeqCst);
                tracing::debug!(subscriber = %subscriber_id, "dropped chunk: queue full");
                if let Some((channel_id, metrics)) = &self.metrics {
                    metrics.record_dropped_chunks(*channel_id, *subscriber_id, 1);
                }
            }
        }
        Ok(())
    }

    /// Drives delivery from an upstream byte source until it closes, then
    /// closes out all subscriber queues after draining whatever is still
    /// buffered in them (closing the sender side is enough — receivers
    /// observe `None` only after their buffered items are consumed).
    pub async fn serve(&self, mut upstream: mpsc::Receiver<Bytes>) -> Result<(), RouterError> {
        while let Some(chunk) = upstream.recv().await {
            self.deliver(chunk).await?;
        }
        self.subscribers.write().await.clear();
        self.subscriber_count.store(0, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn slow_subscriber_drops_without_affecting_healthy_one() {
        let router = FanoutRouter::new(2);
        let slow_id = Uuid::new_v4();
        let healthy_id = Uuid::new_v4();
        let mut slow_rx = router.subscribe(slow_id).await;
        let mut healthy_rx = router.subscribe(healthy_id).await;

        for i in 0..5u8 {
            router.deliver(Bytes::from(vec![i])).await.unwrap();
        }

        assert!(router.dropped_chunks_for(slow_id).await > 0);

        // Healthy subscriber that drains promptly sees no drops for its own
        // queue depth's worth of traffic.
        let mut received = Vec::new();
        while let Ok(chunk) = healthy_rx.try_recv() {
            received.push(chunk);
        }
        assert!(!received.is_empty());

        // Drain slow receiver so the channel doesn't leak in the test.
        while slow_rx.try_recv().is_ok() {}
    }

    #[tokio::test]
    async fn subscriber_count_tracks_subscribe_and_unsubscribe() {
        let router = FanoutRouter::new(4);
        assert_eq!(router.subscriber_count(), 0);
        let id = Uuid::new_v4();
        let _rx = router.subscribe(id).await;
        assert_eq!(router.subscriber_count(), 1);
        router.unsubscribe(id).await;
        assert_eq!(router.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn deliver_preserves_order_within_a_subscriber() {
        let router = FanoutRouter::new(16);
        let id = Uuid::new_v4();
        let mut rx = router.subscribe(id).await;
        for i in 0..8u8 {
            router.deliver(Bytes::from(vec![i])).await.unwrap();
        }
        let mut received = Vec::new();
        for _ in 0..8 {
            received.push(rx.recv().await.unwrap()[0]);
        }
        assert_eq!(received, (0..8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn serve_closes_subscriber_queues_on_upstream_close() {
        let router = Arc::new(FanoutRouter::new(4));
        let id = Uuid::new_v4();
        let mut rx = router.subscribe(id).await;
        let (tx, upstream_rx) = mpsc::channel(4);
        tx.send(Bytes::from_static(b"abc")).await.unwrap();
        drop(tx);

        router.serve(upstream_rx).await.unwrap();
        assert_eq!(rx.recv().await, Some(Bytes::from_static(b"abc")));
        assert_eq!(rx.recv().await, None);
        assert_eq!(router.subscriber_count(), 0);
    }
}
