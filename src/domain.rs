//! Order and payment lifecycle rules. Statuses are stored as text columns;
//! these enums own the canonical strings and the legal transitions so the
//! handlers never compare raw strings.

use crate::core::app_error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OrderStatus::Pending),
            "processing" => Some(OrderStatus::Processing),
            "shipped" => Some(OrderStatus::Shipped),
            "delivered" => Some(OrderStatus::Delivered),
            "cancelled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }

    /// Whether `next` is a legal single step from `self`. Cancellation is
    /// only reachable from the two pre-shipment states.
    pub fn can_transition(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Cancelled)
                | (Processing, Shipped)
                | (Processing, Cancelled)
                | (Shipped, Delivered)
        )
    }

    pub fn cancellable(&self) -> bool {
        self.can_transition(OrderStatus::Cancelled)
    }

    fn rank(&self) -> u8 {
        match self {
            OrderStatus::Pending => 0,
            OrderStatus::Processing => 1,
            OrderStatus::Shipped => 2,
            OrderStatus::Delivered => 3,
            OrderStatus::Cancelled => u8::MAX,
        }
    }
}

/// Where an order lands when one of its payments is confirmed. Confirmation
/// never moves an order backwards and never resurrects a cancelled one.
pub fn advance_on_payment(
    current: OrderStatus,
    provider: PaymentProvider,
) -> Result<OrderStatus, AppError> {
    if current == OrderStatus::Cancelled {
        return Err(AppError::BadRequest(
            "Cannot confirm a payment on a cancelled order".into(),
        ));
    }
    let target = provider.paid_order_status();
    Ok(if target.rank() > current.rank() {
        target
    } else {
        current
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Refunded => "REFUNDED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(PaymentStatus::Pending),
            "PAID" => Some(PaymentStatus::Paid),
            "FAILED" => Some(PaymentStatus::Failed),
            "REFUNDED" => Some(PaymentStatus::Refunded),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentProvider {
    Stripe,
    Cod,
    BankTransfer,
}

impl PaymentProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentProvider::Stripe => "STRIPE",
            PaymentProvider::Cod => "COD",
            PaymentProvider::BankTransfer => "BANK_TRANSFER",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "STRIPE" => Some(PaymentProvider::Stripe),
            "COD" => Some(PaymentProvider::Cod),
            "BANK_TRANSFER" => Some(PaymentProvider::BankTransfer),
            _ => None,
        }
    }

    /// Where confirming a payment moves the parent order. COD settles at the
    /// doorstep, so completion means the order was delivered; everything
    /// else confirms before fulfilment starts.
    pub fn paid_order_status(&self) -> OrderStatus {
        match self {
            PaymentProvider::Cod => OrderStatus::Delivered,
            PaymentProvider::Stripe | PaymentProvider::BankTransfer => OrderStatus::Processing,
        }
    }
}

/// The checkout-facing payment method, as submitted by the storefront.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentMethod {
    Cod,
    BankTransfer,
    Card,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cod => "cod",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Card => "card",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cod" => Some(PaymentMethod::Cod),
            "bank_transfer" => Some(PaymentMethod::BankTransfer),
            "card" => Some(PaymentMethod::Card),
            _ => None,
        }
    }

    pub fn provider(&self) -> PaymentProvider {
        match self {
            PaymentMethod::Cod => PaymentProvider::Cod,
            PaymentMethod::BankTransfer => PaymentProvider::BankTransfer,
            PaymentMethod::Card => PaymentProvider::Stripe,
        }
    }

    /// Static instruction text returned on payment creation. Card payments
    /// get their instructions from the gateway instead.
    pub fn instructions(&self) -> Option<&'static str> {
        match self {
            PaymentMethod::Cod => Some(
                "Pay the courier in cash on delivery. Please have the exact amount ready.",
            ),
            PaymentMethod::BankTransfer => Some(
                "Transfer the order total to account 1234-5678-90 (Shoply Ltd), \
                 quoting your order number as the reference. Your order ships once \
                 an administrator confirms the transfer.",
            ),
            PaymentMethod::Card => None,
        }
    }
}

/// Vendor moderation state. Only approved vendors may list products.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VendorStatus {
    Pending,
    Approved,
    Rejected,
}

impl VendorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VendorStatus::Pending => "pending",
            VendorStatus::Approved => "approved",
            VendorStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(VendorStatus::Pending),
            "approved" => Some(VendorStatus::Approved),
            "rejected" => Some(VendorStatus::Rejected),
            _ => None,
        }
    }
}

/// Order total over `(unit_price, quantity)` snapshots.
pub fn order_total(items: impl IntoIterator<Item = (f32, i32)>) -> f32 {
    items
        .into_iter()
        .map(|(unit_price, quantity)| unit_price * quantity as f32)
        .sum()
}

/// Parse a stored status column, mapping corruption to an internal error
/// rather than a 4xx.
pub fn stored_order_status(s: &str) -> Result<OrderStatus, AppError> {
    OrderStatus::parse(s)
        .ok_or_else(|| AppError::Other(anyhow::anyhow!("Unknown order status in DB: {s}")))
}

pub fn stored_payment_status(s: &str) -> Result<PaymentStatus, AppError> {
    PaymentStatus::parse(s)
        .ok_or_else(|| AppError::Other(anyhow::anyhow!("Unknown payment status in DB: {s}")))
}

pub fn stored_payment_provider(s: &str) -> Result<PaymentProvider, AppError> {
    PaymentProvider::parse(s)
        .ok_or_else(|| AppError::Other(anyhow::anyhow!("Unknown payment provider in DB: {s}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_status_happy_path() {
        use OrderStatus::*;
        assert!(Pending.can_transition(Processing));
        assert!(Processing.can_transition(Shipped));
        assert!(Shipped.can_transition(Delivered));
    }

    #[test]
    fn cancellation_only_before_shipment() {
        use OrderStatus::*;
        assert!(Pending.cancellable());
        assert!(Processing.cancellable());
        assert!(!Shipped.cancellable());
        assert!(!Delivered.cancellable());
        assert!(!Cancelled.cancellable());
    }

    #[test]
    fn no_backwards_or_skipping_transitions() {
        use OrderStatus::*;
        assert!(!Pending.can_transition(Shipped));
        assert!(!Pending.can_transition(Delivered));
        assert!(!Shipped.can_transition(Processing));
        assert!(!Cancelled.can_transition(Pending));
        assert!(!Delivered.can_transition(Cancelled));
    }

    #[test]
    fn status_strings_round_trip() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Processing,
            OrderStatus::Shipped,
            OrderStatus::Delivered,
            OrderStatus::Cancelled,
        ] {
            assert_eq!(OrderStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OrderStatus::parse("PENDING"), None);
    }

    #[test]
    fn method_maps_to_provider() {
        assert_eq!(PaymentMethod::Cod.provider(), PaymentProvider::Cod);
        assert_eq!(
            PaymentMethod::BankTransfer.provider(),
            PaymentProvider::BankTransfer
        );
        assert_eq!(PaymentMethod::Card.provider(), PaymentProvider::Stripe);
    }

    #[test]
    fn confirmation_advances_order_by_provider() {
        assert_eq!(
            PaymentProvider::Cod.paid_order_status(),
            OrderStatus::Delivered
        );
        assert_eq!(
            PaymentProvider::BankTransfer.paid_order_status(),
            OrderStatus::Processing
        );
        assert_eq!(
            PaymentProvider::Stripe.paid_order_status(),
            OrderStatus::Processing
        );
    }

    #[test]
    fn payment_confirmation_never_moves_backwards() {
        use OrderStatus::*;
        use PaymentProvider::*;

        assert_eq!(advance_on_payment(Pending, BankTransfer).unwrap(), Processing);
        assert_eq!(advance_on_payment(Pending, Cod).unwrap(), Delivered);
        assert_eq!(advance_on_payment(Shipped, Cod).unwrap(), Delivered);
        // A bank transfer confirmed late must not demote a shipped order.
        assert_eq!(advance_on_payment(Shipped, BankTransfer).unwrap(), Shipped);
        assert!(advance_on_payment(Cancelled, Cod).is_err());
    }

    #[test]
    fn offline_methods_have_instructions() {
        assert!(PaymentMethod::Cod.instructions().is_some());
        assert!(PaymentMethod::BankTransfer.instructions().is_some());
        assert!(PaymentMethod::Card.instructions().is_none());
    }

    #[test]
    fn total_sums_line_subtotals() {
        let total = order_total([(19.99, 3)]);
        assert!((total - 59.97).abs() < 1e-4);

        let total = order_total([(10.0, 2), (5.5, 1)]);
        assert!((total - 25.5).abs() < 1e-4);

        assert_eq!(order_total([]), 0.0);
    }
}
