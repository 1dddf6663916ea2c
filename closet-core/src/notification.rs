use async_trait::async_trait;
use closet_shared::DomainEvent;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::CoreResult;

/// Fire-and-forget emission used by the engine. Implementations must not block
/// and must never report failure to the caller.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: DomainEvent);
}

/// Downstream transport the outbox drains into (message broker, log, ...).
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn deliver(&self, event: &DomainEvent) -> CoreResult<()>;
}

/// Bounded in-process outbox. `notify` only enqueues; a dispatcher task drains
/// the queue into an `EventSink`, so sink outages never reach the caller.
#[derive(Clone)]
pub struct OutboxNotifier {
    tx: mpsc::Sender<DomainEvent>,
}

impl OutboxNotifier {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<DomainEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl Notifier for OutboxNotifier {
    fn notify(&self, event: DomainEvent) {
        if let Err(e) = self.tx.try_send(event) {
            warn!("Dropping notification, outbox unavailable: {}", e);
        }
    }
}

/// Drain the outbox until every sender is dropped.
pub async fn run_dispatcher(mut rx: mpsc::Receiver<DomainEvent>, sink: Arc<dyn EventSink>) {
    info!("Notification dispatcher started");
    while let Some(event) = rx.recv().await {
        if let Err(e) = sink.deliver(&event).await {
            error!("Failed to deliver {} event {}: {}", event.topic(), event.key(), e);
        }
    }
    info!("Notification dispatcher stopped");
}

/// Sink that only writes events to the log.
pub struct LogSink;

#[async_trait]
impl EventSink for LogSink {
    async fn deliver(&self, event: &DomainEvent) -> CoreResult<()> {
        let payload = serde_json::to_string(event).unwrap_or_default();
        info!(topic = event.topic(), key = %event.key(), "{}", payload);
        Ok(())
    }
}

/// Keeps every event in memory. Used by tests and local runs.
#[derive(Default)]
pub struct MemoryNotifier {
    events: Mutex<Vec<DomainEvent>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, event: DomainEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CoreError;
    use closet_shared::Money;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct FlakySink {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl EventSink for FlakySink {
        async fn deliver(&self, _event: &DomainEvent) -> CoreResult<()> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                return Err(CoreError::InternalError("broker down".to_string()));
            }
            Ok(())
        }
    }

    fn sample_event() -> DomainEvent {
        DomainEvent::PayoutRequested {
            payout_id: Uuid::new_v4(),
            provider_id: Uuid::new_v4(),
            amount: Money::from_cents(500),
            timestamp: 0,
        }
    }

    #[tokio::test]
    async fn test_dispatcher_survives_sink_failures() {
        let (notifier, rx) = OutboxNotifier::channel(8);
        let sink = Arc::new(FlakySink { attempts: AtomicUsize::new(0) });

        notifier.notify(sample_event());
        notifier.notify(sample_event());
        drop(notifier);

        run_dispatcher(rx, sink.clone()).await;
        assert_eq!(sink.attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_full_outbox_drops_without_panicking() {
        let (notifier, _rx) = OutboxNotifier::channel(1);
        notifier.notify(sample_event());
        notifier.notify(sample_event());
    }

    #[test]
    fn test_memory_notifier_records() {
        let notifier = MemoryNotifier::new();
        notifier.notify(sample_event());
        assert_eq!(notifier.events().len(), 1);
    }
}
