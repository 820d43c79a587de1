use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::coupons::{self, CouponResolution};
use crate::db::{queries, AppState};
use crate::error::{AppError, Result};
use crate::extractors::Json;
use crate::models::{Coupon, CreateCoupon};

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount_percentage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Pre-checkout coupon validation. Always 200; invalid codes are a
/// negative result, not an error.
pub async fn validate(
    State(state): State<AppState>,
    Json(request): Json<ValidateRequest>,
) -> Result<Json<ValidateResponse>> {
    let conn = state.db.get()?;

    let response = match coupons::resolve(&conn, Some(&request.code)) {
        Some(CouponResolution::Valid { code, discount_percentage }) => ValidateResponse {
            valid: true,
            code: Some(code),
            discount_percentage: Some(discount_percentage),
            message: None,
        },
        Some(CouponResolution::Invalid { message }) => ValidateResponse {
            valid: false,
            code: None,
            discount_percentage: None,
            message: Some(message),
        },
        None => ValidateResponse {
            valid: false,
            code: None,
            discount_percentage: None,
            message: Some("No coupon code provided".to_string()),
        },
    };
    Ok(Json(response))
}

/// Admin: create a coupon. Discount must be within [0, 100]; duplicate
/// codes surface as a conflict from the unique constraint.
pub async fn create(
    State(state): State<AppState>,
    Json(request): Json<CreateCoupon>,
) -> Result<(axum::http::StatusCode, Json<Coupon>)> {
    if request.code.trim().is_empty() {
        return Err(AppError::BadRequest("Coupon code is required".into()));
    }
    if !coupons::valid_discount(request.discount_percentage) {
        return Err(AppError::BadRequest(
            "Discount percentage must be between 0 and 100".into(),
        ));
    }

    let conn = state.db.get()?;
    let coupon = queries::create_coupon(&conn, &request)?;
    Ok((axum::http::StatusCode::CREATED, Json(coupon)))
}
