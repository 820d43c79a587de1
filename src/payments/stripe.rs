use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{msg, AppError, Result};

use super::{PaymentGateway, PaymentIntent, ProviderSubscription, RefundInfo};

type HmacSha256 = Hmac<Sha256>;

const API_BASE: &str = "https://api.stripe.com/v1";

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
}

#[derive(Debug, Clone)]
pub struct StripeClient {
    client: Client,
    secret_key: String,
    webhook_secret: String,
}

#[derive(Debug, Deserialize)]
struct PaymentIntentResponse {
    id: String,
    status: String,
    amount: i64,
    currency: String,
    client_secret: Option<String>,
    metadata: Option<StripeMetadata>,
}

impl From<PaymentIntentResponse> for PaymentIntent {
    fn from(r: PaymentIntentResponse) -> Self {
        let (user_id, course_id) = r
            .metadata
            .map(|m| (m.user_id, m.course_id))
            .unwrap_or((None, None));
        PaymentIntent {
            id: r.id,
            status: r.status,
            amount_cents: r.amount,
            currency: r.currency,
            client_secret: r.client_secret,
            user_id,
            course_id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RefundResponse {
    id: String,
    status: String,
    amount: i64,
}

#[derive(Debug, Deserialize)]
struct RefundListResponse {
    data: Vec<RefundResponse>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionResponse {
    id: String,
    status: String,
    cancel_at_period_end: bool,
    current_period_end: Option<i64>,
}

impl From<SubscriptionResponse> for ProviderSubscription {
    fn from(r: SubscriptionResponse) -> Self {
        ProviderSubscription {
            id: r.id,
            status: r.status,
            cancel_at_period_end: r.cancel_at_period_end,
            current_period_end: r.current_period_end,
        }
    }
}

impl StripeClient {
    pub fn new(config: &StripeConfig) -> Self {
        Self {
            client: Client::new(),
            secret_key: config.secret_key.clone(),
            webhook_secret: config.webhook_secret.clone(),
        }
    }

    async fn post_form<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        form: &[(String, String)],
    ) -> Result<T> {
        let response = self
            .client
            .post(format!("{}{}", API_BASE, path))
            .basic_auth(&self.secret_key, None::<&str>)
            .form(form)
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("Stripe API error: {}", e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream(format!("Stripe API error: {}", error_text)));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("Failed to parse Stripe response: {}", e)))
    }

    async fn get<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T> {
        let response = self
            .client
            .get(format!("{}{}", API_BASE, path))
            .basic_auth(&self.secret_key, None::<&str>)
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("Stripe API error: {}", e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream(format!("Stripe API error: {}", error_text)));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("Failed to parse Stripe response: {}", e)))
    }

    /// Maximum age of a webhook timestamp before it's rejected (in seconds).
    /// Stripe recommends 300 seconds (5 minutes).
    const WEBHOOK_TIMESTAMP_TOLERANCE_SECS: i64 = 300;

    fn verify_signature_impl(&self, payload: &[u8], signature: &str) -> Result<bool> {
        // Stripe signature format: t=timestamp,v1=signature
        let parts: Vec<&str> = signature.split(',').collect();

        let mut timestamp = None;
        let mut sig_v1 = None;

        for part in parts {
            if let Some(t) = part.strip_prefix("t=") {
                timestamp = Some(t);
            } else if let Some(s) = part.strip_prefix("v1=") {
                sig_v1 = Some(s);
            }
        }

        let timestamp_str =
            timestamp.ok_or_else(|| AppError::BadRequest(msg::INVALID_SIGNATURE_FORMAT.into()))?;
        let sig_v1 =
            sig_v1.ok_or_else(|| AppError::BadRequest(msg::INVALID_SIGNATURE_FORMAT.into()))?;

        // Parse and validate timestamp to prevent replay attacks.
        let timestamp: i64 = timestamp_str
            .parse()
            .map_err(|_| AppError::BadRequest(msg::INVALID_TIMESTAMP_IN_SIGNATURE.into()))?;

        let now = chrono::Utc::now().timestamp();
        let age = now - timestamp;

        if age > Self::WEBHOOK_TIMESTAMP_TOLERANCE_SECS {
            tracing::warn!(
                "Stripe webhook rejected: timestamp too old (age={}s, max={}s)",
                age,
                Self::WEBHOOK_TIMESTAMP_TOLERANCE_SECS
            );
            return Ok(false);
        }

        // Also reject timestamps from the future (clock skew tolerance: 60 seconds)
        if age < -60 {
            tracing::warn!(
                "Stripe webhook rejected: timestamp in the future (age={}s)",
                age
            );
            return Ok(false);
        }

        let signed_payload = format!("{}.{}", timestamp_str, String::from_utf8_lossy(payload));

        let mut mac = HmacSha256::new_from_slice(self.webhook_secret.as_bytes())
            .map_err(|_| AppError::Internal(msg::INVALID_WEBHOOK_SECRET.into()))?;
        mac.update(signed_payload.as_bytes());
        let expected = hex::encode(mac.finalize().into_bytes());

        // Constant-time comparison; length is not secret (always 64 hex
        // chars for SHA-256), so the length check doesn't need to be.
        let expected_bytes = expected.as_bytes();
        let provided_bytes = sig_v1.as_bytes();

        if expected_bytes.len() != provided_bytes.len() {
            return Ok(false);
        }

        Ok(expected_bytes.ct_eq(provided_bytes).into())
    }
}

#[async_trait]
impl PaymentGateway for StripeClient {
    async fn create_payment_intent(
        &self,
        amount_cents: i64,
        currency: &str,
        user_id: &str,
        course_id: &str,
    ) -> Result<PaymentIntent> {
        let form = [
            ("amount".to_string(), amount_cents.to_string()),
            ("currency".to_string(), currency.to_string()),
            ("metadata[user_id]".to_string(), user_id.to_string()),
            ("metadata[course_id]".to_string(), course_id.to_string()),
        ];
        let intent: PaymentIntentResponse = self.post_form("/payment_intents", &form).await?;
        Ok(intent.into())
    }

    async fn retrieve_payment_intent(&self, intent_id: &str) -> Result<PaymentIntent> {
        let intent: PaymentIntentResponse =
            self.get(&format!("/payment_intents/{}", intent_id)).await?;
        Ok(intent.into())
    }

    async fn list_refunds(&self, intent_id: &str) -> Result<Vec<RefundInfo>> {
        let refunds: RefundListResponse = self
            .get(&format!("/refunds?payment_intent={}", intent_id))
            .await?;
        Ok(refunds
            .data
            .into_iter()
            .map(|r| RefundInfo {
                id: r.id,
                status: r.status,
                amount_cents: r.amount,
            })
            .collect())
    }

    async fn retrieve_subscription(&self, subscription_id: &str) -> Result<ProviderSubscription> {
        let sub: SubscriptionResponse =
            self.get(&format!("/subscriptions/{}", subscription_id)).await?;
        Ok(sub.into())
    }

    async fn cancel_subscription_at_period_end(
        &self,
        subscription_id: &str,
    ) -> Result<ProviderSubscription> {
        let form = [("cancel_at_period_end".to_string(), "true".to_string())];
        let sub: SubscriptionResponse = self
            .post_form(&format!("/subscriptions/{}", subscription_id), &form)
            .await?;
        Ok(sub.into())
    }

    async fn cancel_subscription_now(&self, subscription_id: &str) -> Result<ProviderSubscription> {
        let response = self
            .client
            .delete(format!("{}/subscriptions/{}", API_BASE, subscription_id))
            .basic_auth(&self.secret_key, None::<&str>)
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("Stripe API error: {}", e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream(format!("Stripe API error: {}", error_text)));
        }

        let sub: SubscriptionResponse = response
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("Failed to parse Stripe response: {}", e)))?;
        Ok(sub.into())
    }

    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> Result<bool> {
        self.verify_signature_impl(payload, signature)
    }
}

// ============ Webhook event payloads ============

/// Generic Stripe webhook event - object is parsed based on event_type
#[derive(Debug, Deserialize)]
pub struct StripeWebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

// ============ payment_intent.succeeded / payment_intent.payment_failed ============

#[derive(Debug, Deserialize)]
pub struct StripePaymentIntentEvent {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct StripeMetadata {
    pub user_id: Option<String>,
    pub course_id: Option<String>,
}

// ============ charge.refunded ============

#[derive(Debug, Deserialize)]
pub struct StripeChargeEvent {
    pub id: String,
    pub payment_intent: Option<String>,
    /// False for partial refunds; the reconciler only acts on full ones.
    pub refunded: bool,
}

// ============ customer.subscription.updated / .deleted ============

#[derive(Debug, Deserialize)]
pub struct StripeSubscriptionEvent {
    pub id: String,
    pub status: String,
    pub cancel_at_period_end: Option<bool>,
    pub current_period_end: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use hmac::Mac;

    fn client() -> StripeClient {
        StripeClient::new(&StripeConfig {
            secret_key: "sk_test_123".to_string(),
            webhook_secret: "whsec_test".to_string(),
        })
    }

    fn sign(secret: &str, timestamp: i64, payload: &[u8]) -> String {
        let signed = format!("{}.{}", timestamp, String::from_utf8_lossy(payload));
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(signed.as_bytes());
        format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn accepts_valid_signature() {
        let client = client();
        let payload = br#"{"id":"evt_1"}"#;
        let sig = sign("whsec_test", chrono::Utc::now().timestamp(), payload);
        assert!(client.verify_webhook_signature(payload, &sig).unwrap());
    }

    #[test]
    fn rejects_wrong_secret() {
        let client = client();
        let payload = br#"{"id":"evt_1"}"#;
        let sig = sign("whsec_other", chrono::Utc::now().timestamp(), payload);
        assert!(!client.verify_webhook_signature(payload, &sig).unwrap());
    }

    #[test]
    fn rejects_stale_timestamp() {
        let client = client();
        let payload = br#"{"id":"evt_1"}"#;
        let sig = sign("whsec_test", chrono::Utc::now().timestamp() - 600, payload);
        assert!(!client.verify_webhook_signature(payload, &sig).unwrap());
    }

    #[test]
    fn rejects_future_timestamp() {
        let client = client();
        let payload = br#"{"id":"evt_1"}"#;
        let sig = sign("whsec_test", chrono::Utc::now().timestamp() + 300, payload);
        assert!(!client.verify_webhook_signature(payload, &sig).unwrap());
    }

    #[test]
    fn rejects_malformed_header() {
        let client = client();
        let err = client
            .verify_webhook_signature(b"{}", "not-a-signature")
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn rejects_tampered_payload() {
        let client = client();
        let sig = sign("whsec_test", chrono::Utc::now().timestamp(), br#"{"id":"evt_1"}"#);
        assert!(!client
            .verify_webhook_signature(br#"{"id":"evt_2"}"#, &sig)
            .unwrap());
    }
}
