use axum::extract::State;
use axum::Extension;
use serde::{Deserialize, Serialize};

use crate::db::{queries, AppState};
use crate::error::{msg, AppError, OptionExt, Result};
use crate::extractors::{Json, Query};
use crate::models::User;
use crate::payments::RefundInfo;

#[derive(Debug, Deserialize)]
pub struct RefundDetailsQuery {
    pub payment_intent_id: String,
}

#[derive(Debug, Serialize)]
pub struct RefundDetailsResponse {
    pub payment_intent_id: String,
    pub refunded: bool,
    pub refunds: Vec<RefundInfo>,
}

/// Refund details for a payment intent the caller owns. Ownership is
/// cross-checked against provider metadata, not just our own rows, so a
/// guessed intent id for someone else's payment never leaks data.
pub async fn refund_details(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(query): Query<RefundDetailsQuery>,
) -> Result<Json<RefundDetailsResponse>> {
    {
        let conn = state.db.get()?;
        let payment = queries::get_payment_by_provider_payment_id(
            &conn,
            crate::payments::PROVIDER_STRIPE,
            &query.payment_intent_id,
        )?
        .or_not_found(msg::PAYMENT_NOT_FOUND)?;
        if payment.user_id != user.id {
            return Err(AppError::Forbidden(msg::NOT_PAYMENT_OWNER.into()));
        }
    }

    let intent = state
        .gateway
        .retrieve_payment_intent(&query.payment_intent_id)
        .await?;
    if intent.user_id.as_deref() != Some(user.id.as_str()) {
        return Err(AppError::Forbidden(msg::NOT_PAYMENT_OWNER.into()));
    }

    let refunds = state.gateway.list_refunds(&query.payment_intent_id).await?;
    let refunded = refunds.iter().any(|r| r.status == "succeeded");

    Ok(Json(RefundDetailsResponse {
        payment_intent_id: query.payment_intent_id,
        refunded,
        refunds,
    }))
}
