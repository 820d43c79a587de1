//! Payment provider integration.
//!
//! The gateway is a trait so handlers depend on the capability, not on a
//! concrete HTTP client. The server wires in [`StripeClient`]; tests wire
//! in a mock. The client is constructed explicitly at startup and injected
//! through application state.

mod stripe;

pub use stripe::*;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;

pub const PROVIDER_STRIPE: &str = "stripe";

/// A provider-side payment for a single course purchase.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentIntent {
    pub id: String,
    pub status: String,
    pub amount_cents: i64,
    pub currency: String,
    pub client_secret: Option<String>,
    /// Buyer id from provider metadata, used for ownership cross-checks.
    pub user_id: Option<String>,
    pub course_id: Option<String>,
}

/// A provider-side refund against a payment.
#[derive(Debug, Clone, Serialize)]
pub struct RefundInfo {
    pub id: String,
    pub status: String,
    pub amount_cents: i64,
}

/// A provider-side recurring subscription.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderSubscription {
    pub id: String,
    pub status: String,
    pub cancel_at_period_end: bool,
    pub current_period_end: Option<i64>,
}

/// Operations the checkout and subscription flows need from a payment
/// provider. Metadata carries our user and course ids so webhook events
/// can be correlated back to local records.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_payment_intent(
        &self,
        amount_cents: i64,
        currency: &str,
        user_id: &str,
        course_id: &str,
    ) -> Result<PaymentIntent>;

    async fn retrieve_payment_intent(&self, intent_id: &str) -> Result<PaymentIntent>;

    /// Refunds recorded against a payment intent, most recent first.
    async fn list_refunds(&self, intent_id: &str) -> Result<Vec<RefundInfo>>;

    async fn retrieve_subscription(&self, subscription_id: &str) -> Result<ProviderSubscription>;

    /// Deferred cancellation: flag the subscription to end at period close.
    async fn cancel_subscription_at_period_end(
        &self,
        subscription_id: &str,
    ) -> Result<ProviderSubscription>;

    /// Immediate cancellation. Callers enforce the refund precondition.
    async fn cancel_subscription_now(&self, subscription_id: &str) -> Result<ProviderSubscription>;

    /// Verify a webhook body against its signature header. `Ok(false)` is a
    /// verifiable-but-wrong signature; malformed headers are an error.
    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> Result<bool>;
}
