use chrono::{DateTime, NaiveDate, Utc};
use closet_catalog::{ProductQuote, TransactionKind};
use closet_shared::{Money, Percentage, Redacted, RentalWindow};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Actors
// ============================================================================

/// Who is asking for an operation. Ownership checks are made against this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Customer(Uuid),
    Provider(Uuid),
    Staff(Uuid),
}

// ============================================================================
// Cart
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CartItem {
    pub id: Uuid,
    pub product_id: Uuid,
    pub quantity: u32,
    pub kind: TransactionKind,
    pub rental_start: Option<NaiveDate>,
    pub rental_end: Option<NaiveDate>,
    pub added_at: DateTime<Utc>,
}

impl CartItem {
    pub fn new(product_id: Uuid, quantity: u32, kind: TransactionKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            product_id,
            quantity,
            kind,
            rental_start: None,
            rental_end: None,
            added_at: Utc::now(),
        }
    }
}

/// One per customer. Emptied, never deleted, by checkout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cart {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub items: Vec<CartItem>,
    pub updated_at: DateTime<Utc>,
}

impl Cart {
    pub fn new(customer_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            customer_id,
            items: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn add_item(&mut self, item: CartItem) {
        self.items.push(item);
        self.updated_at = Utc::now();
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

// ============================================================================
// Order
// ============================================================================

/// Order status in the fulfillment lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Approved,
    InTransit,
    InUse,
    Returning,
    Returned,
    ReturnedWithIssue,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Approved => "APPROVED",
            OrderStatus::InTransit => "IN_TRANSIT",
            OrderStatus::InUse => "IN_USE",
            OrderStatus::Returning => "RETURNING",
            OrderStatus::Returned => "RETURNED",
            OrderStatus::ReturnedWithIssue => "RETURNED_WITH_ISSUE",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Returned | OrderStatus::ReturnedWithIssue | OrderStatus::Cancelled)
    }

    /// Fulfillment finished and the goods are back with the provider.
    pub fn is_fulfilled(&self) -> bool {
        matches!(self, OrderStatus::Returned | OrderStatus::ReturnedWithIssue)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "PENDING" => OrderStatus::Pending,
            "APPROVED" => OrderStatus::Approved,
            "IN_TRANSIT" => OrderStatus::InTransit,
            "IN_USE" => OrderStatus::InUse,
            "RETURNING" => OrderStatus::Returning,
            "RETURNED" => OrderStatus::Returned,
            "RETURNED_WITH_ISSUE" => OrderStatus::ReturnedWithIssue,
            "CANCELLED" => OrderStatus::Cancelled,
            other => return Err(format!("Unknown order status: {}", other)),
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundStatus {
    #[default]
    NotRequired,
    Pending,
}

impl RefundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundStatus::NotRequired => "NOT_REQUIRED",
            RefundStatus::Pending => "PENDING",
        }
    }
}

impl FromStr for RefundStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NOT_REQUIRED" => Ok(RefundStatus::NotRequired),
            "PENDING" => Ok(RefundStatus::Pending),
            other => Err(format!("Unknown refund status: {}", other)),
        }
    }
}

/// Shipping contact captured at checkout. Never updated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContactSnapshot {
    pub full_name: String,
    pub phone: Redacted<String>,
    pub email: Option<Redacted<String>>,
    pub address: Redacted<String>,
}

/// Lifecycle timestamps, one per status the order can enter.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OrderTimeline {
    pub approved_at: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub returning_at: Option<DateTime<Utc>>,
    pub returned_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// Outcome of deposit settlement, written once.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct DepositSettlement {
    pub refunded: Money,
    pub withheld: Money,
    pub settled_at: DateTime<Utc>,
}

/// A provider-scoped agreement produced by checkout
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub provider_id: Uuid,
    pub status: OrderStatus,
    pub items: Vec<OrderItem>,
    pub subtotal: Money,
    pub discount_amount: Money,
    pub discount_code: Option<String>,
    pub total_deposit: Money,
    pub rental_window: Option<RentalWindow>,
    pub contact: ContactSnapshot,
    pub note: Option<String>,
    pub timeline: OrderTimeline,
    pub refund_status: RefundStatus,
    pub deposit_settlement: Option<DepositSettlement>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Build a pending order around already-priced items.
    pub fn new(
        customer_id: Uuid,
        provider_id: Uuid,
        contact: ContactSnapshot,
        rental_window: Option<RentalWindow>,
        note: Option<String>,
        lines: Vec<OrderLine>,
    ) -> Self {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let items: Vec<OrderItem> = lines.into_iter().map(|line| OrderItem::from_line(id, line)).collect();

        let subtotal = items.iter().map(OrderItem::line_total).sum();
        let total_deposit = items.iter().map(OrderItem::total_deposit).sum();

        Self {
            id,
            customer_id,
            provider_id,
            status: OrderStatus::Pending,
            items,
            subtotal,
            discount_amount: Money::ZERO,
            discount_code: None,
            total_deposit,
            rental_window,
            contact,
            note,
            timeline: OrderTimeline::default(),
            refund_status: RefundStatus::NotRequired,
            deposit_settlement: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Subtotal less discount. Deposits are held separately.
    pub fn total_amount(&self) -> Money {
        self.subtotal.saturating_sub(self.discount_amount)
    }

    pub fn apply_discount(&mut self, code: &str, amount: Money) {
        self.discount_code = Some(code.to_string());
        self.discount_amount = if amount > self.subtotal { self.subtotal } else { amount };
    }

    /// Move to `status` and stamp the matching timeline field.
    pub fn mark_status(&mut self, status: OrderStatus, at: DateTime<Utc>) {
        let slot = match status {
            OrderStatus::Pending => None,
            OrderStatus::Approved => Some(&mut self.timeline.approved_at),
            OrderStatus::InTransit => Some(&mut self.timeline.shipped_at),
            OrderStatus::InUse => Some(&mut self.timeline.delivered_at),
            OrderStatus::Returning => Some(&mut self.timeline.returning_at),
            OrderStatus::Returned | OrderStatus::ReturnedWithIssue => Some(&mut self.timeline.returned_at),
            OrderStatus::Cancelled => Some(&mut self.timeline.cancelled_at),
        };
        if let Some(slot) = slot {
            *slot = Some(at);
        }
        self.status = status;
        self.updated_at = at;
    }

    pub fn item(&self, item_id: Uuid) -> Option<&OrderItem> {
        self.items.iter().find(|i| i.id == item_id)
    }

    /// Provider revenue from the goods themselves: line totals less frozen commission.
    pub fn provider_earnings(&self) -> Money {
        self.items.iter().map(OrderItem::provider_earning).sum()
    }

    pub fn commission_total(&self) -> Money {
        self.items.iter().map(|i| i.commission_amount).sum()
    }

    pub fn is_deposit_settled(&self) -> bool {
        self.deposit_settlement.is_some()
    }
}

/// A priced cart line on its way into an order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderLine {
    pub product_id: Uuid,
    pub product_name: String,
    pub kind: TransactionKind,
    pub quantity: u32,
    pub quote: ProductQuote,
}

/// A product snapshot inside an order. Prices are frozen at checkout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub kind: TransactionKind,
    pub quantity: u32,
    pub unit_price: Money,
    pub deposit_per_unit: Money,
    pub commission_rate: Percentage,
    pub commission_amount: Money,
    pub created_at: DateTime<Utc>,
}

impl OrderItem {
    pub fn from_line(order_id: Uuid, line: OrderLine) -> Self {
        let quote = line.quote;
        let line_total = quote.unit_price.times(line.quantity);
        Self {
            id: Uuid::new_v4(),
            order_id,
            product_id: line.product_id,
            product_name: line.product_name,
            kind: line.kind,
            quantity: line.quantity,
            unit_price: quote.unit_price,
            deposit_per_unit: quote.deposit_per_unit,
            commission_rate: quote.commission_rate,
            commission_amount: quote.commission_rate.of(line_total),
            created_at: Utc::now(),
        }
    }

    pub fn line_total(&self) -> Money {
        self.unit_price.times(self.quantity)
    }

    /// Upper bound for the cumulative penalties on this line.
    pub fn total_deposit(&self) -> Money {
        self.deposit_per_unit.times(self.quantity)
    }

    pub fn provider_earning(&self) -> Money {
        self.line_total().saturating_sub(self.commission_amount)
    }
}

// ============================================================================
// Payment transactions
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Initiated,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Initiated => "INITIATED",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Failed => "FAILED",
        }
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INITIATED" => Ok(TransactionStatus::Initiated),
            "COMPLETED" => Ok(TransactionStatus::Completed),
            "FAILED" => Ok(TransactionStatus::Failed),
            other => Err(format!("Unknown transaction status: {}", other)),
        }
    }
}

/// One payment attempt, possibly covering several orders.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub id: Uuid,
    pub reference: String,
    pub customer_id: Uuid,
    pub order_ids: Vec<Uuid>,
    pub amount: Money,
    pub status: TransactionStatus,
    pub note: Option<String>,
    pub gateway_response_code: Option<String>,
    pub gateway_transaction_no: Option<String>,
    /// Orders paid for by this transaction that were no longer pending when
    /// the payment landed. They are not linked as paid and need a refund.
    pub skipped_order_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    pub fn new(customer_id: Uuid, order_ids: Vec<Uuid>, amount: Money, note: Option<String>) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            reference: id.simple().to_string().to_uppercase(),
            customer_id,
            order_ids,
            amount,
            status: TransactionStatus::Initiated,
            note,
            gateway_response_code: None,
            gateway_transaction_no: None,
            skipped_order_ids: Vec::new(),
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Orders this transaction actually paid for.
    pub fn paid_order_ids(&self) -> impl Iterator<Item = &Uuid> {
        self.order_ids.iter().filter(|id| !self.skipped_order_ids.contains(id))
    }
}

/// How a callback (or the expiry sweep) closes a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionResolution {
    Completed {
        response_code: String,
        gateway_transaction_no: Option<String>,
    },
    Failed {
        response_code: String,
    },
}

/// What a successful finalization changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinalizeReport {
    pub promoted: Vec<Uuid>,
    pub skipped: Vec<Uuid>,
}

// ============================================================================
// Violations
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationType {
    Damage,
    Stain,
    Lost,
    LateReturn,
    MissingAccessory,
    Other,
}

impl ViolationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationType::Damage => "DAMAGE",
            ViolationType::Stain => "STAIN",
            ViolationType::Lost => "LOST",
            ViolationType::LateReturn => "LATE_RETURN",
            ViolationType::MissingAccessory => "MISSING_ACCESSORY",
            ViolationType::Other => "OTHER",
        }
    }
}

impl FromStr for ViolationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "DAMAGE" => ViolationType::Damage,
            "STAIN" => ViolationType::Stain,
            "LOST" => ViolationType::Lost,
            "LATE_RETURN" => ViolationType::LateReturn,
            "MISSING_ACCESSORY" => ViolationType::MissingAccessory,
            "OTHER" => ViolationType::Other,
            other => return Err(format!("Unknown violation type: {}", other)),
        })
    }
}

/// A provider-recorded problem with a returned rental line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RentalViolation {
    pub id: Uuid,
    pub order_id: Uuid,
    pub order_item_id: Uuid,
    pub provider_id: Uuid,
    pub violation_type: ViolationType,
    pub description: String,
    /// Set when the penalty was requested as a share of the line deposit.
    pub penalty_percentage: Option<Percentage>,
    /// Effective penalty, always resolved to an amount.
    pub penalty_amount: Money,
    pub evidence: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Payouts
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BankAccount {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub bank_name: String,
    pub account_holder: String,
    pub account_number: Redacted<String>,
    pub is_primary: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayoutStatus {
    Pending,
    Completed,
    Rejected,
}

impl PayoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutStatus::Pending => "PENDING",
            PayoutStatus::Completed => "COMPLETED",
            PayoutStatus::Rejected => "REJECTED",
        }
    }
}

impl FromStr for PayoutStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(PayoutStatus::Pending),
            "COMPLETED" => Ok(PayoutStatus::Completed),
            "REJECTED" => Ok(PayoutStatus::Rejected),
            other => Err(format!("Unknown payout status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Payout {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub bank_account_id: Uuid,
    pub amount: Money,
    pub status: PayoutStatus,
    pub note: Option<String>,
    pub rejection_reason: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Payout {
    pub fn new(provider_id: Uuid, bank_account_id: Uuid, amount: Money, note: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider_id,
            bank_account_id,
            amount,
            status: PayoutStatus::Pending,
            note,
            rejection_reason: None,
            requested_at: Utc::now(),
            resolved_at: None,
        }
    }
}
