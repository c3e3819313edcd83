use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;
use tradedesk_core::{TradeEvent, TradeEventSink};

/// Fans trade events out to in-process subscribers (websocket feeds, notifiers).
///
/// Publishing with no subscribers is not an error.
#[derive(Clone)]
pub struct BroadcastEventSink {
    tx: broadcast::Sender<TradeEvent>,
}

impl BroadcastEventSink {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TradeEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastEventSink {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl TradeEventSink for BroadcastEventSink {
    async fn publish(&self, event: &TradeEvent) -> Result<()> {
        let _ = self.tx.send(event.clone());
        Ok(())
    }
}

/// Publishes to every inner sink; one failing sink does not starve the rest.
#[derive(Clone, Default)]
pub struct CompositeEventSink {
    sinks: Vec<Arc<dyn TradeEventSink>>,
}

impl CompositeEventSink {
    #[must_use]
    pub fn new(sinks: Vec<Arc<dyn TradeEventSink>>) -> Self {
        Self { sinks }
    }

    #[must_use]
    pub fn with(mut self, sink: Arc<dyn TradeEventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

#[async_trait]
impl TradeEventSink for CompositeEventSink {
    async fn publish(&self, event: &TradeEvent) -> Result<()> {
        let mut failures = Vec::new();
        for sink in &self.sinks {
            if let Err(e) = sink.publish(event).await {
                failures.push(e.to_string());
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            anyhow::bail!(
                "{} of {} sinks failed: {}",
                failures.len(),
                self.sinks.len(),
                failures.join("; ")
            )
        }
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEventSink;

#[async_trait]
impl TradeEventSink for NullEventSink {
    async fn publish(&self, _event: &TradeEvent) -> Result<()> {
        Ok(())
    }
}
