//! HTTP surface, grouped by resource.
//!
//! Three tiers: public (catalog, coupon validation, webhooks), session
//! (purchase, progress, billing), admin (authoring).

pub mod coupons;
pub mod courses;
pub mod lessons;
pub mod payments;
pub mod subscriptions;
pub mod webhooks;

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};

use crate::db::AppState;
use crate::middleware::{require_admin, require_session};

pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .route("/api/courses", get(courses::list))
        .route("/api/courses/{id}", get(courses::get))
        .route("/api/coupons/validate", post(coupons::validate))
        .route("/api/webhooks/stripe", post(webhooks::stripe));

    let session = Router::new()
        .route("/api/courses/{id}/purchase", post(courses::purchase))
        .route("/api/lessons/{id}/complete", post(lessons::complete))
        .route("/api/subscriptions/cancel", post(subscriptions::cancel))
        .route("/api/subscriptions/cancel-now", post(subscriptions::cancel_now))
        .route("/api/subscriptions/retrieve", get(subscriptions::retrieve))
        .route("/api/subscriptions/status", get(subscriptions::status))
        .route("/api/payments/refund-details", get(payments::refund_details))
        .layer(from_fn_with_state(state.clone(), require_session));

    let admin = Router::new()
        .route("/api/admin/courses", post(courses::create))
        .route("/api/admin/coupons", post(coupons::create))
        .layer(axum::middleware::from_fn(require_admin))
        .layer(from_fn_with_state(state.clone(), require_session));

    Router::new()
        .merge(public)
        .merge(session)
        .merge(admin)
        .with_state(state)
}
