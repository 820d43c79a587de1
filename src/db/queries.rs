use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

use super::from_row::{
    query_all, query_one, COUPON_COLS, COURSE_COLS, ENROLLMENT_COLS, LESSON_COLS,
    PAYMENT_COLS, SUBSCRIPTION_COLS, USER_COLS, WEBHOOK_EVENT_COLS,
};

fn now() -> i64 {
    Utc::now().timestamp()
}

fn gen_id() -> String {
    Uuid::new_v4().to_string()
}

/// Hash a session token for storage; raw tokens never touch the database.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Generate an opaque bearer token for dev seeding and tests.
pub fn generate_session_token() -> String {
    format!("ch_{}", Uuid::new_v4().simple())
}

// ============ Users & Sessions ============

pub fn create_user(conn: &Connection, input: &CreateUser) -> Result<User> {
    let id = gen_id();
    let now = now();
    let email = input.email.trim().to_lowercase();
    let role = if input.admin { UserRole::Admin } else { UserRole::User };

    conn.execute(
        "INSERT INTO users (id, email, name, role, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![&id, &email, &input.name, role.as_str(), now, now],
    )?;

    Ok(User {
        id,
        email,
        name: input.name.clone(),
        role,
        billing_customer_id: None,
        created_at: now,
        updated_at: now,
    })
}

/// Create a session for a user, returning the raw bearer token.
/// Tokens expire after `ttl_secs`.
pub fn create_session(conn: &Connection, user_id: &str, ttl_secs: i64) -> Result<String> {
    let token = generate_session_token();
    let now = now();
    conn.execute(
        "INSERT INTO sessions (id, user_id, token_hash, created_at, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![gen_id(), user_id, hash_token(&token), now, now + ttl_secs],
    )?;
    Ok(token)
}

/// Resolve a bearer token to its user. Expired sessions resolve to None.
pub fn get_user_by_session_token(conn: &Connection, token: &str) -> Result<Option<User>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM users u
             JOIN sessions s ON s.user_id = u.id
             WHERE s.token_hash = ?1 AND s.expires_at > ?2",
            USER_COLS
                .split(", ")
                .map(|c| format!("u.{}", c))
                .collect::<Vec<_>>()
                .join(", ")
        ),
        &[&hash_token(token), &now()],
    )
}

// ============ Courses & Lessons ============

pub fn create_course(conn: &Connection, input: &CreateCourse) -> Result<CourseWithLessons> {
    let id = gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO courses (id, title, description, price, published, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            &id,
            &input.title,
            &input.description,
            input.price,
            input.published as i32,
            now,
            now
        ],
    )?;

    let mut lessons = Vec::with_capacity(input.lessons.len());
    for (i, title) in input.lessons.iter().enumerate() {
        let lesson_id = gen_id();
        let position = (i + 1) as i32;
        conn.execute(
            "INSERT INTO lessons (id, course_id, title, position, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![&lesson_id, &id, title, position, now],
        )?;
        lessons.push(Lesson {
            id: lesson_id,
            course_id: id.clone(),
            title: title.clone(),
            position,
            created_at: now,
        });
    }

    Ok(CourseWithLessons {
        course: Course {
            id,
            title: input.title.clone(),
            description: input.description.clone(),
            price: input.price,
            published: input.published,
            created_at: now,
            updated_at: now,
        },
        lessons,
    })
}

pub fn get_course_by_id(conn: &Connection, id: &str) -> Result<Option<Course>> {
    query_one(
        conn,
        &format!("SELECT {} FROM courses WHERE id = ?1", COURSE_COLS),
        &[&id],
    )
}

pub fn list_published_courses(conn: &Connection) -> Result<Vec<Course>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM courses WHERE published = 1 ORDER BY created_at DESC",
            COURSE_COLS
        ),
        &[],
    )
}

pub fn list_lessons(conn: &Connection, course_id: &str) -> Result<Vec<Lesson>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM lessons WHERE course_id = ?1 ORDER BY position",
            LESSON_COLS
        ),
        &[&course_id],
    )
}

pub fn get_lesson_by_id(conn: &Connection, id: &str) -> Result<Option<Lesson>> {
    query_one(
        conn,
        &format!("SELECT {} FROM lessons WHERE id = ?1", LESSON_COLS),
        &[&id],
    )
}

pub fn count_lessons(conn: &Connection, course_id: &str) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM lessons WHERE course_id = ?1",
        params![course_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

// ============ Coupons ============

pub fn create_coupon(conn: &Connection, input: &CreateCoupon) -> Result<Coupon> {
    let id = gen_id();
    let now = now();
    let code = input.code.trim().to_uppercase();

    conn.execute(
        "INSERT INTO coupons (id, code, discount_percentage, active, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![&id, &code, input.discount_percentage, input.active as i32, now],
    )?;

    Ok(Coupon {
        id,
        code,
        discount_percentage: input.discount_percentage,
        active: input.active,
        created_at: now,
    })
}

/// Case-insensitive exact lookup; the caller passes an already-normalized
/// (trimmed, uppercased) code. Inactive coupons do not resolve.
pub fn get_active_coupon_by_code(conn: &Connection, code: &str) -> Result<Option<Coupon>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM coupons WHERE code = ?1 AND active = 1",
            COUPON_COLS
        ),
        &[&code],
    )
}

// ============ Payments ============

pub fn create_payment(conn: &Connection, input: &CreatePayment) -> Result<Payment> {
    let id = gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO payments (id, user_id, course_id, provider, provider_payment_id,
                               amount, currency, coupon_code, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'pending', ?9, ?10)",
        params![
            &id,
            &input.user_id,
            &input.course_id,
            &input.provider,
            &input.provider_payment_id,
            input.amount,
            &input.currency,
            &input.coupon_code,
            now,
            now
        ],
    )?;

    Ok(Payment {
        id,
        user_id: input.user_id.clone(),
        course_id: input.course_id.clone(),
        provider: input.provider.clone(),
        provider_payment_id: input.provider_payment_id.clone(),
        amount: input.amount,
        currency: input.currency.clone(),
        coupon_code: input.coupon_code.clone(),
        status: PaymentStatus::Pending,
        created_at: now,
        updated_at: now,
    })
}

pub fn get_payment_by_id(conn: &Connection, id: &str) -> Result<Option<Payment>> {
    query_one(
        conn,
        &format!("SELECT {} FROM payments WHERE id = ?1", PAYMENT_COLS),
        &[&id],
    )
}

pub fn get_payment_by_provider_payment_id(
    conn: &Connection,
    provider: &str,
    provider_payment_id: &str,
) -> Result<Option<Payment>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM payments WHERE provider = ?1 AND provider_payment_id = ?2",
            PAYMENT_COLS
        ),
        &[&provider, &provider_payment_id],
    )
}

pub fn set_payment_status(conn: &Connection, id: &str, status: PaymentStatus) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE payments SET status = ?1, updated_at = ?2 WHERE id = ?3",
        params![status.as_str(), now(), id],
    )?;
    Ok(affected > 0)
}

// ============ Enrollments ============

pub fn create_enrollment(
    conn: &Connection,
    user_id: &str,
    course_id: &str,
    payment_id: &str,
) -> Result<Enrollment> {
    let id = gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO enrollments (id, user_id, course_id, payment_id, progress, created_at)
         VALUES (?1, ?2, ?3, ?4, 0, ?5)",
        params![&id, user_id, course_id, payment_id, now],
    )?;

    Ok(Enrollment {
        id,
        user_id: user_id.to_string(),
        course_id: course_id.to_string(),
        payment_id: payment_id.to_string(),
        progress: 0.0,
        last_accessed_at: None,
        completed_at: None,
        created_at: now,
    })
}

pub fn get_enrollment(
    conn: &Connection,
    user_id: &str,
    course_id: &str,
) -> Result<Option<Enrollment>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM enrollments WHERE user_id = ?1 AND course_id = ?2",
            ENROLLMENT_COLS
        ),
        &[&user_id, &course_id],
    )
}

pub fn get_enrollment_by_id(conn: &Connection, id: &str) -> Result<Option<Enrollment>> {
    query_one(
        conn,
        &format!("SELECT {} FROM enrollments WHERE id = ?1", ENROLLMENT_COLS),
        &[&id],
    )
}

pub fn get_enrollment_by_payment(conn: &Connection, payment_id: &str) -> Result<Option<Enrollment>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM enrollments WHERE payment_id = ?1",
            ENROLLMENT_COLS
        ),
        &[&payment_id],
    )
}

/// Revoke an optimistically granted enrollment (webhook-driven, on payment
/// failure). Lesson completions cascade.
pub fn delete_enrollment(conn: &Connection, id: &str) -> Result<bool> {
    let affected = conn.execute("DELETE FROM enrollments WHERE id = ?1", params![id])?;
    Ok(affected > 0)
}

/// Write a recomputed progress value. Last write wins under concurrent
/// completions of different lessons; no optimistic locking.
pub fn update_enrollment_progress(
    conn: &Connection,
    id: &str,
    progress: f64,
    completed_at: Option<i64>,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE enrollments SET progress = ?1, completed_at = ?2, last_accessed_at = ?3
         WHERE id = ?4",
        params![progress, completed_at, now(), id],
    )?;
    Ok(affected > 0)
}

pub fn count_enrollments_for_user(conn: &Connection, user_id: &str) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM enrollments WHERE user_id = ?1",
        params![user_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

// ============ Lesson Completions ============

pub fn lesson_completion_exists(
    conn: &Connection,
    enrollment_id: &str,
    lesson_id: &str,
) -> Result<bool> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM lesson_completions WHERE enrollment_id = ?1 AND lesson_id = ?2",
            params![enrollment_id, lesson_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(existing.is_some())
}

pub fn create_lesson_completion(
    conn: &Connection,
    enrollment_id: &str,
    lesson_id: &str,
) -> Result<LessonCompletion> {
    let id = gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO lesson_completions (id, enrollment_id, lesson_id, completed_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![&id, enrollment_id, lesson_id, now],
    )?;

    Ok(LessonCompletion {
        id,
        enrollment_id: enrollment_id.to_string(),
        lesson_id: lesson_id.to_string(),
        completed_at: now,
    })
}

pub fn count_lesson_completions(conn: &Connection, enrollment_id: &str) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM lesson_completions WHERE enrollment_id = ?1",
        params![enrollment_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

// ============ Subscriptions ============

pub fn create_subscription(conn: &Connection, input: &CreateSubscription) -> Result<Subscription> {
    let id = gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO subscriptions (id, payment_id, user_id, provider_subscription_id,
                                    active, cancel_at_period_end, current_period_end,
                                    created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 1, 0, ?5, ?6, ?7)",
        params![
            &id,
            &input.payment_id,
            &input.user_id,
            &input.provider_subscription_id,
            input.current_period_end,
            now,
            now
        ],
    )?;

    Ok(Subscription {
        id,
        payment_id: input.payment_id.clone(),
        user_id: input.user_id.clone(),
        provider_subscription_id: input.provider_subscription_id.clone(),
        active: true,
        cancel_at_period_end: false,
        current_period_end: input.current_period_end,
        created_at: now,
        updated_at: now,
    })
}

/// The user's most recent active subscription, if any.
pub fn get_active_subscription_for_user(
    conn: &Connection,
    user_id: &str,
) -> Result<Option<Subscription>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM subscriptions WHERE user_id = ?1 AND active = 1
             ORDER BY created_at DESC LIMIT 1",
            SUBSCRIPTION_COLS
        ),
        &[&user_id],
    )
}

pub fn get_subscription_by_provider_id(
    conn: &Connection,
    provider_subscription_id: &str,
) -> Result<Option<Subscription>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM subscriptions WHERE provider_subscription_id = ?1",
            SUBSCRIPTION_COLS
        ),
        &[&provider_subscription_id],
    )
}

/// Deferred cancellation: the subscription stays active until period end.
pub fn set_cancel_at_period_end(conn: &Connection, id: &str, value: bool) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE subscriptions SET cancel_at_period_end = ?1, updated_at = ?2 WHERE id = ?3",
        params![value as i32, now(), id],
    )?;
    Ok(affected > 0)
}

/// Bring the local row in line with provider-reported state.
pub fn sync_subscription(
    conn: &Connection,
    id: &str,
    cancel_at_period_end: bool,
    current_period_end: Option<i64>,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE subscriptions SET cancel_at_period_end = ?1, current_period_end = ?2,
                updated_at = ?3 WHERE id = ?4",
        params![cancel_at_period_end as i32, current_period_end, now(), id],
    )?;
    Ok(affected > 0)
}

/// Immediate deactivation, bypassing period-end semantics.
pub fn deactivate_subscription(conn: &Connection, id: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE subscriptions SET active = 0, updated_at = ?1 WHERE id = ?2",
        params![now(), id],
    )?;
    Ok(affected > 0)
}

// ============ Webhook Events ============

/// Record a provider event for audit. Returns false if this (provider,
/// event_id) pair was already recorded - the replay-prevention path.
pub fn try_record_webhook_event(
    conn: &Connection,
    provider: &str,
    event_id: &str,
    event_type: &str,
    payload: &str,
) -> Result<bool> {
    let affected = conn.execute(
        "INSERT OR IGNORE INTO webhook_events (id, provider, event_id, event_type, payload, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![gen_id(), provider, event_id, event_type, payload, now()],
    )?;
    Ok(affected > 0)
}

pub fn list_webhook_events(conn: &Connection, provider: &str) -> Result<Vec<WebhookEventRecord>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM webhook_events WHERE provider = ?1 ORDER BY created_at DESC",
            WEBHOOK_EVENT_COLS
        ),
        &[&provider],
    )
}
