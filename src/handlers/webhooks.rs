//! Webhook reconciliation.
//!
//! Provider events are the ground truth for payment outcomes. Each event
//! is processed atomically: replay prevention (recording the event id) and
//! the resulting state change commit together or not at all, so provider
//! retries behave correctly after a partial failure.
//!
//! Purchases grant enrollment optimistically, so a failed payment must
//! revoke the enrollment here; that revocation is the other half of the
//! optimistic grant.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use rusqlite::Connection;
use tracing::{error, info, warn};

use crate::db::{queries, AppState};
use crate::models::PaymentStatus;
use crate::payments::{
    StripeChargeEvent, StripePaymentIntentEvent, StripeSubscriptionEvent, StripeWebhookEvent,
    PROVIDER_STRIPE,
};

pub type WebhookResult = (StatusCode, &'static str);

/// Outcome of an atomic reconciliation step.
pub enum ReconcileOutcome {
    Processed,
    /// Event id was already recorded; nothing changed.
    AlreadyProcessed,
    /// No local record matches the provider's reference. Acknowledged so
    /// the provider stops retrying.
    Unmatched,
}

fn db_error(e: impl std::fmt::Display) -> WebhookResult {
    error!("Database error: {}", e);
    (StatusCode::INTERNAL_SERVER_ERROR, "Database error")
}

/// Record the event id inside `tx`; Ok(false) means replay.
fn claim_event(
    tx: &Connection,
    event_id: &str,
    event_type: &str,
    payload: &str,
) -> Result<bool, WebhookResult> {
    queries::try_record_webhook_event(tx, PROVIDER_STRIPE, event_id, event_type, payload)
        .map_err(db_error)
}

/// payment_intent.succeeded: confirm the optimistic grant.
pub fn process_payment_succeeded(
    conn: &mut Connection,
    event_id: &str,
    payload: &str,
    intent_id: &str,
) -> Result<ReconcileOutcome, WebhookResult> {
    let tx = conn.transaction().map_err(db_error)?;

    if !claim_event(&tx, event_id, "payment_intent.succeeded", payload)? {
        return Ok(ReconcileOutcome::AlreadyProcessed);
    }

    let payment =
        match queries::get_payment_by_provider_payment_id(&tx, PROVIDER_STRIPE, intent_id)
            .map_err(db_error)?
        {
            Some(p) => p,
            None => {
                warn!(intent_id, "payment_intent.succeeded for unknown payment");
                tx.commit().map_err(db_error)?;
                return Ok(ReconcileOutcome::Unmatched);
            }
        };

    queries::set_payment_status(&tx, &payment.id, PaymentStatus::Completed).map_err(db_error)?;
    tx.commit().map_err(db_error)?;

    info!(payment_id = %payment.id, intent_id, "payment confirmed");
    Ok(ReconcileOutcome::Processed)
}

/// payment_intent.payment_failed: mark the payment failed and revoke the
/// optimistically granted enrollment.
pub fn process_payment_failed(
    conn: &mut Connection,
    event_id: &str,
    payload: &str,
    intent_id: &str,
) -> Result<ReconcileOutcome, WebhookResult> {
    let tx = conn.transaction().map_err(db_error)?;

    if !claim_event(&tx, event_id, "payment_intent.payment_failed", payload)? {
        return Ok(ReconcileOutcome::AlreadyProcessed);
    }

    let payment =
        match queries::get_payment_by_provider_payment_id(&tx, PROVIDER_STRIPE, intent_id)
            .map_err(db_error)?
        {
            Some(p) => p,
            None => {
                warn!(intent_id, "payment_intent.payment_failed for unknown payment");
                tx.commit().map_err(db_error)?;
                return Ok(ReconcileOutcome::Unmatched);
            }
        };

    queries::set_payment_status(&tx, &payment.id, PaymentStatus::Failed).map_err(db_error)?;

    if let Some(enrollment) =
        queries::get_enrollment_by_payment(&tx, &payment.id).map_err(db_error)?
    {
        queries::delete_enrollment(&tx, &enrollment.id).map_err(db_error)?;
        info!(
            payment_id = %payment.id,
            enrollment_id = %enrollment.id,
            "enrollment revoked after payment failure"
        );
    }

    tx.commit().map_err(db_error)?;
    Ok(ReconcileOutcome::Processed)
}

/// charge.refunded: mark the payment refunded. Enrollment is left in
/// place; access removal after a refund goes through subscription
/// cancellation or support tooling, not silently here.
pub fn process_charge_refunded(
    conn: &mut Connection,
    event_id: &str,
    payload: &str,
    intent_id: &str,
) -> Result<ReconcileOutcome, WebhookResult> {
    let tx = conn.transaction().map_err(db_error)?;

    if !claim_event(&tx, event_id, "charge.refunded", payload)? {
        return Ok(ReconcileOutcome::AlreadyProcessed);
    }

    let payment =
        match queries::get_payment_by_provider_payment_id(&tx, PROVIDER_STRIPE, intent_id)
            .map_err(db_error)?
        {
            Some(p) => p,
            None => {
                warn!(intent_id, "charge.refunded for unknown payment");
                tx.commit().map_err(db_error)?;
                return Ok(ReconcileOutcome::Unmatched);
            }
        };

    queries::set_payment_status(&tx, &payment.id, PaymentStatus::Refunded).map_err(db_error)?;
    tx.commit().map_err(db_error)?;

    info!(payment_id = %payment.id, intent_id, "payment marked refunded");
    Ok(ReconcileOutcome::Processed)
}

/// customer.subscription.updated: sync period-end and the deferred-cancel
/// flag from the provider's view.
pub fn process_subscription_updated(
    conn: &mut Connection,
    event_id: &str,
    payload: &str,
    event: &StripeSubscriptionEvent,
) -> Result<ReconcileOutcome, WebhookResult> {
    let tx = conn.transaction().map_err(db_error)?;

    if !claim_event(&tx, event_id, "customer.subscription.updated", payload)? {
        return Ok(ReconcileOutcome::AlreadyProcessed);
    }

    let sub = match queries::get_subscription_by_provider_id(&tx, &event.id).map_err(db_error)? {
        Some(s) => s,
        None => {
            warn!(provider_subscription_id = %event.id, "subscription event for unknown subscription");
            tx.commit().map_err(db_error)?;
            return Ok(ReconcileOutcome::Unmatched);
        }
    };

    queries::sync_subscription(
        &tx,
        &sub.id,
        event.cancel_at_period_end.unwrap_or(sub.cancel_at_period_end),
        event.current_period_end.or(sub.current_period_end),
    )
    .map_err(db_error)?;
    tx.commit().map_err(db_error)?;

    Ok(ReconcileOutcome::Processed)
}

/// customer.subscription.deleted: the subscription ended at the provider;
/// deactivate locally.
pub fn process_subscription_deleted(
    conn: &mut Connection,
    event_id: &str,
    payload: &str,
    event: &StripeSubscriptionEvent,
) -> Result<ReconcileOutcome, WebhookResult> {
    let tx = conn.transaction().map_err(db_error)?;

    if !claim_event(&tx, event_id, "customer.subscription.deleted", payload)? {
        return Ok(ReconcileOutcome::AlreadyProcessed);
    }

    let sub = match queries::get_subscription_by_provider_id(&tx, &event.id).map_err(db_error)? {
        Some(s) => s,
        None => {
            warn!(provider_subscription_id = %event.id, "subscription event for unknown subscription");
            tx.commit().map_err(db_error)?;
            return Ok(ReconcileOutcome::Unmatched);
        }
    };

    queries::deactivate_subscription(&tx, &sub.id).map_err(db_error)?;
    tx.commit().map_err(db_error)?;

    info!(subscription_id = %sub.id, "subscription deactivated by provider event");
    Ok(ReconcileOutcome::Processed)
}

fn outcome_response(outcome: ReconcileOutcome) -> WebhookResult {
    match outcome {
        ReconcileOutcome::Processed => (StatusCode::OK, "OK"),
        ReconcileOutcome::AlreadyProcessed => (StatusCode::OK, "Already processed"),
        ReconcileOutcome::Unmatched => (StatusCode::OK, "No matching record"),
    }
}

fn parse_object<T: serde::de::DeserializeOwned>(
    object: &serde_json::Value,
) -> Result<T, WebhookResult> {
    serde_json::from_value(object.clone())
        .map_err(|_| (StatusCode::BAD_REQUEST, "Malformed event object"))
}

pub async fn stripe(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> WebhookResult {
    let signature = match headers.get("stripe-signature").and_then(|v| v.to_str().ok()) {
        Some(s) => s.to_string(),
        None => return (StatusCode::BAD_REQUEST, "Missing signature header"),
    };

    match state.gateway.verify_webhook_signature(&body, &signature) {
        Ok(true) => {}
        Ok(false) => return (StatusCode::UNAUTHORIZED, "Invalid signature"),
        Err(_) => return (StatusCode::BAD_REQUEST, "Invalid signature format"),
    }

    let event: StripeWebhookEvent = match serde_json::from_slice(&body) {
        Ok(e) => e,
        Err(_) => return (StatusCode::BAD_REQUEST, "Malformed event"),
    };
    let payload = String::from_utf8_lossy(&body).into_owned();

    let mut conn = match state.db.get() {
        Ok(c) => c,
        Err(e) => return db_error(e),
    };

    let result = match event.event_type.as_str() {
        "payment_intent.succeeded" => {
            parse_object::<StripePaymentIntentEvent>(&event.data.object).and_then(|intent| {
                process_payment_succeeded(&mut conn, &event.id, &payload, &intent.id)
            })
        }
        "payment_intent.payment_failed" => {
            parse_object::<StripePaymentIntentEvent>(&event.data.object).and_then(|intent| {
                process_payment_failed(&mut conn, &event.id, &payload, &intent.id)
            })
        }
        "charge.refunded" => match parse_object::<StripeChargeEvent>(&event.data.object) {
            // Partial refunds carry refunded=false and change nothing.
            Ok(charge) if !charge.refunded => return (StatusCode::OK, "Event ignored"),
            Ok(charge) => match charge.payment_intent {
                Some(ref intent_id) => {
                    process_charge_refunded(&mut conn, &event.id, &payload, intent_id)
                }
                None => {
                    warn!(charge_id = %charge.id, "charge.refunded without payment_intent");
                    Ok(ReconcileOutcome::Unmatched)
                }
            },
            Err(e) => Err(e),
        },
        "customer.subscription.updated" => parse_object::<StripeSubscriptionEvent>(
            &event.data.object,
        )
        .and_then(|sub| process_subscription_updated(&mut conn, &event.id, &payload, &sub)),
        "customer.subscription.deleted" => parse_object::<StripeSubscriptionEvent>(
            &event.data.object,
        )
        .and_then(|sub| process_subscription_deleted(&mut conn, &event.id, &payload, &sub)),
        _ => return (StatusCode::OK, "Event ignored"),
    };

    match result {
        Ok(outcome) => outcome_response(outcome),
        Err(e) => e,
    }
}
