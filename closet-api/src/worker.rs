use closet_core::{run_dispatcher, EventSink};
use closet_order::PaymentOrchestrator;
use closet_shared::DomainEvent;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info};

/// Periodically fail payments that were never completed at the gateway.
pub fn spawn_stale_transaction_sweeper(
    payments: Arc<PaymentOrchestrator>,
    ttl: chrono::Duration,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Stale transaction sweeper started, ttl {}s", ttl.num_seconds());
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match payments.expire_stale_transactions(ttl).await {
                Ok(0) => {}
                Ok(expired) => info!("Sweeper expired {} transaction(s)", expired),
                Err(e) => error!("Stale transaction sweep failed: {}", e),
            }
        }
    })
}

/// Drain the notification outbox into `sink` on its own task.
pub fn spawn_notification_dispatcher(rx: mpsc::Receiver<DomainEvent>, sink: Arc<dyn EventSink>) -> JoinHandle<()> {
    tokio::spawn(run_dispatcher(rx, sink))
}

#[cfg(test)]
mod tests {
    use super::*;
    use closet_core::{MemoryNotifier, OutboxNotifier};
    use closet_core::{CoreResult, GatewaySettings, SignedUrlGateway};
    use closet_order::{MemoryStore, Transaction};
    use closet_shared::Money;
    use std::sync::Mutex;
    use uuid::Uuid;

    struct CollectingSink(Mutex<Vec<String>>);

    #[async_trait::async_trait]
    impl EventSink for CollectingSink {
        async fn deliver(&self, event: &DomainEvent) -> CoreResult<()> {
            self.0.lock().unwrap().push(event.topic().to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_sweeper_expires_old_transactions() {
        let store = MemoryStore::new();
        let mut txn = Transaction::new(Uuid::new_v4(), vec![Uuid::new_v4()], Money::from_cents(5000), None);
        txn.created_at = chrono::Utc::now() - chrono::Duration::hours(2);
        closet_order::TransactionRepository::create_transaction(&store, &txn).await.unwrap();

        let gateway = SignedUrlGateway::new(GatewaySettings {
            merchant_code: "TEST".to_string(),
            hash_secret: "worker-secret".to_string(),
            payment_url: "https://pay.example/vpcpay.html".to_string(),
            return_url: "https://closet.example/return".to_string(),
            currency: "VND".to_string(),
            locale: "vn".to_string(),
        });
        let payments = Arc::new(PaymentOrchestrator::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(gateway),
            Arc::new(MemoryNotifier::new()),
        ));

        let handle = spawn_stale_transaction_sweeper(payments, chrono::Duration::minutes(15), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        let stored = store.get_transaction(txn.id).await.unwrap();
        assert_eq!(stored.status, closet_order::TransactionStatus::Failed);
    }

    #[tokio::test]
    async fn test_dispatcher_drains_outbox() {
        let (notifier, rx) = OutboxNotifier::channel(8);
        let sink = Arc::new(CollectingSink(Mutex::new(Vec::new())));
        let handle = spawn_notification_dispatcher(rx, sink.clone());

        closet_core::Notifier::notify(
            &notifier,
            DomainEvent::PayoutRequested {
                payout_id: Uuid::new_v4(),
                provider_id: Uuid::new_v4(),
                amount: Money::from_cents(100),
                timestamp: 0,
            },
        );
        drop(notifier);
        handle.await.unwrap();

        assert_eq!(sink.0.lock().unwrap().len(), 1);
    }
}
