//! Enrollment lifecycle: purchase, lesson progress, and subscription
//! cancellation.
//!
//! Purchases grant access optimistically: the enrollment row is created as
//! soon as the provider accepts the payment intent, and revoked later by
//! webhook reconciliation if the payment ultimately fails. The
//! `UNIQUE(user_id, course_id)` constraint is the sole arbiter of double
//! purchases; the existence pre-check only exists for a friendly message.

use rusqlite::Connection;
use tracing::{info, warn};

use crate::coupons::{self, CouponResolution};
use crate::db::{queries, AppState};
use crate::error::{msg, AppError, OptionExt, Result};
use crate::models::{CreatePayment, Enrollment, Payment, Subscription, User};
use crate::payments::PROVIDER_STRIPE;
use crate::pricing;

pub struct PurchaseOutcome {
    pub payment: Payment,
    pub enrollment: Enrollment,
    pub coupon: Option<CouponResolution>,
    /// Provider client secret for the frontend to confirm the payment.
    pub client_secret: Option<String>,
}

/// Purchase a course: resolve the coupon, snapshot the price, register the
/// intent with the provider, then create the payment row and enrollment
/// together in one transaction.
pub async fn purchase(
    state: &AppState,
    user: &User,
    course_id: &str,
    coupon_code: Option<&str>,
) -> Result<PurchaseOutcome> {
    let course;
    let coupon;
    let amount;
    {
        let conn = state.db.get()?;

        course = queries::get_course_by_id(&conn, course_id)?
            .or_not_found(msg::COURSE_NOT_FOUND)?;
        if !course.published {
            return Err(AppError::BadRequest(msg::COURSE_NOT_PUBLISHED.into()));
        }

        if queries::get_enrollment(&conn, &user.id, course_id)?.is_some() {
            return Err(AppError::Conflict(msg::ALREADY_ENROLLED.into()));
        }

        coupon = coupons::resolve(&conn, coupon_code);
        let discount = coupon.as_ref().and_then(|c| c.discount());
        amount = pricing::checkout_price(course.price, discount, state.sitewide_discount);
        // Connection goes back to the pool before the provider round trip.
    }

    let intent = state
        .gateway
        .create_payment_intent(
            pricing::to_cents(amount),
            &state.currency,
            &user.id,
            course_id,
        )
        .await?;

    let mut conn = state.db.get()?;
    let tx = conn.transaction()?;

    let payment = queries::create_payment(
        &tx,
        &CreatePayment {
            user_id: user.id.clone(),
            course_id: course_id.to_string(),
            provider: PROVIDER_STRIPE.to_string(),
            provider_payment_id: Some(intent.id.clone()),
            amount,
            currency: state.currency.clone(),
            coupon_code: coupon.as_ref().and_then(|c| c.code()).map(String::from),
        },
    )?;

    // Optimistic grant. A concurrent purchase that slipped past the
    // pre-check dies here on the unique constraint and surfaces as 409.
    let enrollment = queries::create_enrollment(&tx, &user.id, course_id, &payment.id)?;

    tx.commit()?;

    info!(
        user_id = %user.id,
        course_id,
        payment_id = %payment.id,
        amount,
        "course purchased, enrollment granted"
    );

    Ok(PurchaseOutcome {
        payment,
        enrollment,
        coupon,
        client_secret: intent.client_secret,
    })
}

#[derive(Debug)]
pub struct CompletionOutcome {
    pub enrollment: Enrollment,
    /// True when this call found the lesson already completed and changed
    /// nothing.
    pub already_completed: bool,
    pub completed_lessons: i64,
    pub total_lessons: i64,
}

/// Mark a lesson complete and recompute enrollment progress.
///
/// Idempotent: completing an already-completed lesson changes nothing.
/// Progress is a percentage derived from the completion count;
/// `completed_at` is set the first time progress reaches exactly 100 and
/// never cleared afterwards.
pub fn complete_lesson(
    conn: &mut Connection,
    user: &User,
    course_id: &str,
    lesson_id: &str,
) -> Result<CompletionOutcome> {
    let enrollment = queries::get_enrollment(conn, &user.id, course_id)?
        .ok_or_else(|| AppError::Forbidden(msg::NOT_ENROLLED.into()))?;

    let lesson = queries::get_lesson_by_id(conn, lesson_id)?
        .or_not_found(msg::LESSON_NOT_FOUND)?;
    if lesson.course_id != course_id {
        return Err(AppError::NotFound(msg::LESSON_NOT_FOUND.into()));
    }

    let tx = conn.transaction()?;

    let total = queries::count_lessons(&tx, course_id)?;

    if queries::lesson_completion_exists(&tx, &enrollment.id, lesson_id)? {
        let done = queries::count_lesson_completions(&tx, &enrollment.id)?;
        return Ok(CompletionOutcome {
            enrollment,
            already_completed: true,
            completed_lessons: done,
            total_lessons: total,
        });
    }
    queries::create_lesson_completion(&tx, &enrollment.id, lesson_id)?;

    let done = queries::count_lesson_completions(&tx, &enrollment.id)?;
    let progress = if total == 0 {
        0.0
    } else {
        pricing::round2(done as f64 / total as f64 * 100.0)
    };

    let completed_at = if progress == 100.0 {
        enrollment
            .completed_at
            .or_else(|| Some(chrono::Utc::now().timestamp()))
    } else {
        enrollment.completed_at
    };

    queries::update_enrollment_progress(&tx, &enrollment.id, progress, completed_at)?;
    tx.commit()?;

    let enrollment = queries::get_enrollment_by_id(conn, &enrollment.id)?
        .or_not_found(msg::NOT_ENROLLED)?;

    Ok(CompletionOutcome {
        enrollment,
        already_completed: false,
        completed_lessons: done,
        total_lessons: total,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelMode {
    /// Flag the subscription to lapse at the end of the paid period.
    Deferred,
    /// Terminate immediately; requires the backing payment to be refunded.
    Immediate,
}

/// Cancel the user's active subscription.
///
/// Deferred cancellation always succeeds for an active subscription.
/// Immediate cancellation first verifies the refund precondition: the
/// backing payment must already be refunded locally, or the provider must
/// report a succeeded refund for it (in which case the local row is
/// brought up to date before proceeding).
///
/// Local state is the source of truth for access control: the local
/// mutation is applied first, and a provider-side cancellation failure is
/// logged without rolling it back. Reconciliation catches up via webhooks.
pub async fn cancel_subscription(
    state: &AppState,
    user: &User,
    mode: CancelMode,
) -> Result<Subscription> {
    let sub;
    let payment;
    {
        let conn = state.db.get()?;
        sub = queries::get_active_subscription_for_user(&conn, &user.id)?
            .or_not_found(msg::SUBSCRIPTION_NOT_FOUND)?;
        payment = queries::get_payment_by_id(&conn, &sub.payment_id)?
            .or_not_found(msg::PAYMENT_NOT_FOUND)?;
    }

    match mode {
        CancelMode::Deferred => {
            {
                let conn = state.db.get()?;
                queries::set_cancel_at_period_end(&conn, &sub.id, true)?;
            }

            match state
                .gateway
                .cancel_subscription_at_period_end(&sub.provider_subscription_id)
                .await
            {
                Ok(provider_sub) => info!(
                    subscription_id = %sub.id,
                    period_end = ?provider_sub.current_period_end,
                    "subscription flagged to cancel at period end"
                ),
                Err(err) => warn!(
                    subscription_id = %sub.id,
                    error = %err,
                    "provider deferred cancellation failed, local flag stands"
                ),
            }

            let conn = state.db.get()?;
            queries::get_active_subscription_for_user(&conn, &user.id)?
                .or_not_found(msg::SUBSCRIPTION_NOT_FOUND)
        }
        CancelMode::Immediate => {
            let refunded = if payment.status == crate::models::PaymentStatus::Refunded {
                true
            } else if let Some(intent_id) = payment.provider_payment_id.as_deref() {
                let refunds = state.gateway.list_refunds(intent_id).await?;
                refunds.iter().any(|r| r.status == "succeeded")
            } else {
                false
            };

            if !refunded {
                return Err(AppError::BadRequest(msg::PAYMENT_NOT_REFUNDED.into()));
            }

            {
                let conn = state.db.get()?;
                if payment.status != crate::models::PaymentStatus::Refunded {
                    // Provider knew about the refund before we did.
                    queries::set_payment_status(
                        &conn,
                        &payment.id,
                        crate::models::PaymentStatus::Refunded,
                    )?;
                }
                queries::deactivate_subscription(&conn, &sub.id)?;
            }

            match state
                .gateway
                .cancel_subscription_now(&sub.provider_subscription_id)
                .await
            {
                Ok(_) => info!(subscription_id = %sub.id, "subscription cancelled immediately"),
                Err(err) => warn!(
                    subscription_id = %sub.id,
                    error = %err,
                    "provider immediate cancellation failed, local deactivation stands"
                ),
            }

            let conn = state.db.get()?;
            queries::get_subscription_by_provider_id(&conn, &sub.provider_subscription_id)?
                .or_not_found(msg::SUBSCRIPTION_NOT_FOUND)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use crate::models::{CreateCourse, CreateUser};

    fn setup() -> (Connection, User, String) {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();

        let user = queries::create_user(
            &conn,
            &CreateUser {
                email: "learner@example.com".to_string(),
                name: "Learner".to_string(),
                admin: false,
            },
        )
        .unwrap();

        let course = queries::create_course(
            &conn,
            &CreateCourse {
                title: "Intro".to_string(),
                description: None,
                price: 50.0,
                published: true,
                lessons: vec!["One".into(), "Two".into(), "Three".into()],
            },
        )
        .unwrap();

        let payment = queries::create_payment(
            &conn,
            &CreatePayment {
                user_id: user.id.clone(),
                course_id: course.course.id.clone(),
                provider: PROVIDER_STRIPE.to_string(),
                provider_payment_id: Some("pi_test".to_string()),
                amount: 50.0,
                currency: "usd".to_string(),
                coupon_code: None,
            },
        )
        .unwrap();
        queries::create_enrollment(&conn, &user.id, &course.course.id, &payment.id).unwrap();

        (conn, user, course.course.id)
    }

    #[test]
    fn progress_advances_per_lesson_and_completes_at_full() {
        let (mut conn, user, course_id) = setup();
        let lessons = queries::list_lessons(&conn, &course_id).unwrap();

        let out = complete_lesson(&mut conn, &user, &course_id, &lessons[0].id).unwrap();
        assert_eq!(out.enrollment.progress, 33.33);
        assert!(out.enrollment.completed_at.is_none());

        let out = complete_lesson(&mut conn, &user, &course_id, &lessons[1].id).unwrap();
        assert_eq!(out.enrollment.progress, 66.67);
        assert!(out.enrollment.completed_at.is_none());

        let out = complete_lesson(&mut conn, &user, &course_id, &lessons[2].id).unwrap();
        assert_eq!(out.enrollment.progress, 100.0);
        assert!(out.enrollment.completed_at.is_some());
        assert_eq!(out.completed_lessons, 3);
        assert_eq!(out.total_lessons, 3);
    }

    #[test]
    fn completing_a_lesson_twice_is_a_noop() {
        let (mut conn, user, course_id) = setup();
        let lessons = queries::list_lessons(&conn, &course_id).unwrap();

        let first = complete_lesson(&mut conn, &user, &course_id, &lessons[0].id).unwrap();
        assert!(!first.already_completed);

        let second = complete_lesson(&mut conn, &user, &course_id, &lessons[0].id).unwrap();
        assert!(second.already_completed);
        assert_eq!(second.completed_lessons, 1);

        let count =
            queries::count_lesson_completions(&conn, &first.enrollment.id).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn completed_at_survives_later_recomputes() {
        let (mut conn, user, course_id) = setup();
        let lessons = queries::list_lessons(&conn, &course_id).unwrap();

        for lesson in &lessons {
            complete_lesson(&mut conn, &user, &course_id, &lesson.id).unwrap();
        }
        let done = complete_lesson(&mut conn, &user, &course_id, &lessons[0].id).unwrap();
        assert!(done.enrollment.completed_at.is_some());
        assert_eq!(done.enrollment.progress, 100.0);
    }

    #[test]
    fn lesson_from_another_course_is_not_found() {
        let (mut conn, user, course_id) = setup();
        let other = queries::create_course(
            &conn,
            &CreateCourse {
                title: "Other".to_string(),
                description: None,
                price: 10.0,
                published: true,
                lessons: vec!["X".into()],
            },
        )
        .unwrap();

        let err = complete_lesson(&mut conn, &user, &course_id, &other.lessons[0].id)
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn unenrolled_user_is_forbidden() {
        let (mut conn, _user, course_id) = setup();
        let stranger = queries::create_user(
            &conn,
            &CreateUser {
                email: "stranger@example.com".to_string(),
                name: "Stranger".to_string(),
                admin: false,
            },
        )
        .unwrap();
        let lessons = queries::list_lessons(&conn, &course_id).unwrap();

        let err = complete_lesson(&mut conn, &stranger, &course_id, &lessons[0].id)
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }
}
