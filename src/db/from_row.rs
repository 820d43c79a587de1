//! Row mapping trait and helpers for reducing boilerplate in queries.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::*;

/// Parse a string column into an enum type, converting parse errors to
/// rusqlite errors instead of panicking on unexpected stored values.
fn parse_enum<T: std::str::FromStr>(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<T> {
    row.get::<_, String>(col)?.parse::<T>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
    })
}

/// Trait for constructing a type from a database row.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const USER_COLS: &str =
    "id, email, name, role, billing_customer_id, created_at, updated_at";

pub const COURSE_COLS: &str =
    "id, title, description, price, published, created_at, updated_at";

pub const LESSON_COLS: &str = "id, course_id, title, position, created_at";

pub const COUPON_COLS: &str = "id, code, discount_percentage, active, created_at";

pub const PAYMENT_COLS: &str = "id, user_id, course_id, provider, provider_payment_id, \
     amount, currency, coupon_code, status, created_at, updated_at";

pub const ENROLLMENT_COLS: &str = "id, user_id, course_id, payment_id, progress, \
     last_accessed_at, completed_at, created_at";

pub const SUBSCRIPTION_COLS: &str = "id, payment_id, user_id, provider_subscription_id, \
     active, cancel_at_period_end, current_period_end, created_at, updated_at";

pub const WEBHOOK_EVENT_COLS: &str = "id, provider, event_id, event_type, payload, created_at";

// ============ FromRow Implementations ============

impl FromRow for User {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(User {
            id: row.get(0)?,
            email: row.get(1)?,
            name: row.get(2)?,
            role: parse_enum(row, 3, "role")?,
            billing_customer_id: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }
}

impl FromRow for Course {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Course {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            price: row.get(3)?,
            published: row.get::<_, i32>(4)? != 0,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }
}

impl FromRow for Lesson {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Lesson {
            id: row.get(0)?,
            course_id: row.get(1)?,
            title: row.get(2)?,
            position: row.get(3)?,
            created_at: row.get(4)?,
        })
    }
}

impl FromRow for Coupon {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Coupon {
            id: row.get(0)?,
            code: row.get(1)?,
            discount_percentage: row.get(2)?,
            active: row.get::<_, i32>(3)? != 0,
            created_at: row.get(4)?,
        })
    }
}

impl FromRow for Payment {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Payment {
            id: row.get(0)?,
            user_id: row.get(1)?,
            course_id: row.get(2)?,
            provider: row.get(3)?,
            provider_payment_id: row.get(4)?,
            amount: row.get(5)?,
            currency: row.get(6)?,
            coupon_code: row.get(7)?,
            status: parse_enum(row, 8, "status")?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }
}

impl FromRow for Enrollment {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Enrollment {
            id: row.get(0)?,
            user_id: row.get(1)?,
            course_id: row.get(2)?,
            payment_id: row.get(3)?,
            progress: row.get(4)?,
            last_accessed_at: row.get(5)?,
            completed_at: row.get(6)?,
            created_at: row.get(7)?,
        })
    }
}

impl FromRow for Subscription {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Subscription {
            id: row.get(0)?,
            payment_id: row.get(1)?,
            user_id: row.get(2)?,
            provider_subscription_id: row.get(3)?,
            active: row.get::<_, i32>(4)? != 0,
            cancel_at_period_end: row.get::<_, i32>(5)? != 0,
            current_period_end: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }
}

impl FromRow for WebhookEventRecord {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(WebhookEventRecord {
            id: row.get(0)?,
            provider: row.get(1)?,
            event_id: row.get(2)?,
            event_type: row.get(3)?,
            payload: row.get(4)?,
            created_at: row.get(5)?,
        })
    }
}
