use axum::extract::State;
use axum::Extension;
use serde::Serialize;
use tracing::warn;

use crate::db::{queries, AppState};
use crate::entitlements::{self, CancelMode};
use crate::error::{msg, OptionExt, Result};
use crate::extractors::Json;
use crate::models::{Subscription, User};
use crate::payments::ProviderSubscription;

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub message: String,
    pub subscription: Subscription,
}

/// Deferred cancellation: stays active until period end.
pub async fn cancel(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<CancelResponse>> {
    let subscription =
        entitlements::cancel_subscription(&state, &user, CancelMode::Deferred).await?;
    Ok(Json(CancelResponse {
        message: "Subscription will cancel at period end".to_string(),
        subscription,
    }))
}

/// Immediate cancellation; requires the backing payment to be refunded.
pub async fn cancel_now(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<CancelResponse>> {
    let subscription =
        entitlements::cancel_subscription(&state, &user, CancelMode::Immediate).await?;
    Ok(Json(CancelResponse {
        message: "Subscription cancelled".to_string(),
        subscription,
    }))
}

#[derive(Debug, Serialize)]
pub struct RetrieveResponse {
    pub subscription: Subscription,
    /// Live provider view; absent when the provider call fails (local
    /// state is still authoritative for access control).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderSubscription>,
}

/// Merge the local record with the provider's live view.
pub async fn retrieve(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<RetrieveResponse>> {
    let mut subscription = {
        let conn = state.db.get()?;
        queries::get_active_subscription_for_user(&conn, &user.id)?
            .or_not_found(msg::SUBSCRIPTION_NOT_FOUND)?
    };

    let provider = match state
        .gateway
        .retrieve_subscription(&subscription.provider_subscription_id)
        .await
    {
        Ok(p) => Some(p),
        Err(err) => {
            warn!(
                subscription_id = %subscription.id,
                error = %err,
                "provider subscription fetch failed, returning local state only"
            );
            None
        }
    };

    // Opportunistic sync when the provider view disagrees with ours; the
    // response reflects the synced row, not the stale read.
    if let Some(ref p) = provider {
        if p.cancel_at_period_end != subscription.cancel_at_period_end
            || p.current_period_end != subscription.current_period_end
        {
            let conn = state.db.get()?;
            queries::sync_subscription(
                &conn,
                &subscription.id,
                p.cancel_at_period_end,
                p.current_period_end,
            )?;
            subscription = queries::get_subscription_by_provider_id(
                &conn,
                &subscription.provider_subscription_id,
            )?
            .or_not_found(msg::SUBSCRIPTION_NOT_FOUND)?;
        }
    }

    Ok(Json(RetrieveResponse { subscription, provider }))
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub active: bool,
    pub cancel_at_period_end: bool,
    pub current_period_end: Option<i64>,
}

/// Lightweight local-only billing status.
pub async fn status(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<StatusResponse>> {
    let conn = state.db.get()?;
    let subscription = queries::get_active_subscription_for_user(&conn, &user.id)?;

    Ok(Json(match subscription {
        Some(sub) => StatusResponse {
            active: sub.active,
            cancel_at_period_end: sub.cancel_at_period_end,
            current_period_end: sub.current_period_end,
        },
        None => StatusResponse {
            active: false,
            cancel_at_period_end: false,
            current_period_end: None,
        },
    }))
}
