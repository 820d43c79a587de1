use serde::{Deserialize, Serialize};

/// One-to-one with a payment that has a provider subscription id.
/// Mutated by the cancel/retrieve endpoints and by webhook reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub payment_id: String,
    pub user_id: String,
    pub provider_subscription_id: String,
    pub active: bool,
    /// Deferred cancellation: subscription stays active until period end.
    pub cancel_at_period_end: bool,
    pub current_period_end: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug)]
pub struct CreateSubscription {
    pub payment_id: String,
    pub user_id: String,
    pub provider_subscription_id: String,
    pub current_period_end: Option<i64>,
}
