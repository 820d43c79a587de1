use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Payment status, driven by provider webhooks after the initial
/// optimistic `Pending` row is written at purchase time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl FromStr for PaymentStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "completed" => Ok(PaymentStatus::Completed),
            "failed" => Ok(PaymentStatus::Failed),
            "refunded" => Ok(PaymentStatus::Refunded),
            _ => Err(()),
        }
    }
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

/// One row per purchase attempt. `amount` is the authoritative price
/// snapshot (post-discount) and is never recomputed from the live course.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    pub user_id: String,
    pub course_id: String,
    pub provider: String,
    /// Provider payment-intent id (pi_xxx). Refund lookups key on this.
    pub provider_payment_id: Option<String>,
    pub amount: f64,
    pub currency: String,
    /// Normalized coupon code applied at checkout, if any.
    pub coupon_code: Option<String>,
    pub status: PaymentStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug)]
pub struct CreatePayment {
    pub user_id: String,
    pub course_id: String,
    pub provider: String,
    pub provider_payment_id: Option<String>,
    pub amount: f64,
    pub currency: String,
    pub coupon_code: Option<String>,
}

/// Raw provider event persisted for audit; the (provider, event_id) unique
/// key doubles as webhook replay prevention.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookEventRecord {
    pub id: String,
    pub provider: String,
    pub event_id: String,
    pub event_type: String,
    pub payload: String,
    pub created_at: i64,
}
