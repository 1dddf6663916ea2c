use crate::money::Money;
use uuid::Uuid;

/// Outbound notification payloads. Consumers treat these as fire-and-forget.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DomainEvent {
    OrderPlaced {
        order_id: Uuid,
        customer_id: Uuid,
        provider_id: Uuid,
        total: Money,
        timestamp: i64,
    },
    OrderStatusChanged {
        order_id: Uuid,
        customer_id: Uuid,
        provider_id: Uuid,
        from: String,
        to: String,
        timestamp: i64,
    },
    PaymentCompleted {
        transaction_id: Uuid,
        reference: String,
        order_ids: Vec<Uuid>,
        amount: Money,
        timestamp: i64,
    },
    PaymentFailed {
        transaction_id: Uuid,
        reference: String,
        reason: String,
        timestamp: i64,
    },
    ViolationsRecorded {
        order_id: Uuid,
        provider_id: Uuid,
        violation_ids: Vec<Uuid>,
        total_penalty: Money,
        timestamp: i64,
    },
    DepositSettled {
        order_id: Uuid,
        customer_id: Uuid,
        refundable: Money,
        withheld: Money,
        timestamp: i64,
    },
    PayoutRequested {
        payout_id: Uuid,
        provider_id: Uuid,
        amount: Money,
        timestamp: i64,
    },
    PayoutResolved {
        payout_id: Uuid,
        provider_id: Uuid,
        status: String,
        timestamp: i64,
    },
}

impl DomainEvent {
    /// Topic the event is published on.
    pub fn topic(&self) -> &'static str {
        match self {
            DomainEvent::OrderPlaced { .. } | DomainEvent::OrderStatusChanged { .. } => "closet.orders",
            DomainEvent::PaymentCompleted { .. } | DomainEvent::PaymentFailed { .. } => "closet.payments",
            DomainEvent::ViolationsRecorded { .. } | DomainEvent::DepositSettled { .. } => "closet.deposits",
            DomainEvent::PayoutRequested { .. } | DomainEvent::PayoutResolved { .. } => "closet.payouts",
        }
    }

    /// Partition key; events about the same aggregate stay ordered.
    pub fn key(&self) -> String {
        match self {
            DomainEvent::OrderPlaced { order_id, .. }
            | DomainEvent::OrderStatusChanged { order_id, .. }
            | DomainEvent::ViolationsRecorded { order_id, .. }
            | DomainEvent::DepositSettled { order_id, .. } => order_id.to_string(),
            DomainEvent::PaymentCompleted { reference, .. } | DomainEvent::PaymentFailed { reference, .. } => {
                reference.clone()
            }
            DomainEvent::PayoutRequested { provider_id, .. } | DomainEvent::PayoutResolved { provider_id, .. } => {
                provider_id.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = DomainEvent::PayoutRequested {
            payout_id: Uuid::nil(),
            provider_id: Uuid::nil(),
            amount: Money::from_cents(1000),
            timestamp: 0,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "PAYOUT_REQUESTED");
        assert_eq!(event.topic(), "closet.payouts");
        assert_eq!(event.key(), Uuid::nil().to_string());
    }
}
