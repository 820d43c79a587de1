//! Coupon resolution for checkout.
//!
//! Codes are normalized (trimmed, uppercased) before lookup so coupon codes
//! are case-insensitive. Lookup failures are fail-open: a database error
//! during coupon resolution degrades to "no discount" rather than blocking
//! the purchase, but is logged at error level while a genuinely unknown
//! code is only a debug event.

use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, error};

use crate::db::queries;

/// Built-in demo promotion, honored independently of the coupons table.
pub const DEMO_CODE: &str = "DEMO60";
pub const DEMO_DISCOUNT: f64 = 60.0;

/// Outcome of resolving a code the buyer supplied at checkout.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CouponResolution {
    Valid { code: String, discount_percentage: f64 },
    Invalid { message: String },
}

impl CouponResolution {
    pub fn discount(&self) -> Option<f64> {
        match self {
            CouponResolution::Valid { discount_percentage, .. } => Some(*discount_percentage),
            CouponResolution::Invalid { .. } => None,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            CouponResolution::Valid { code, .. } => Some(code),
            CouponResolution::Invalid { .. } => None,
        }
    }
}

/// Distinguishes "the code does not exist" from "we could not check",
/// so the two degrade identically for the buyer but log differently.
enum CouponLookup {
    Found { code: String, discount_percentage: f64 },
    NotFound,
    LookupFailed,
}

pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Validate a discount percentage for coupon authoring.
pub fn valid_discount(pct: f64) -> bool {
    pct.is_finite() && (0.0..=100.0).contains(&pct)
}

fn lookup(conn: &Connection, code: &str) -> CouponLookup {
    if code == DEMO_CODE {
        return CouponLookup::Found {
            code: code.to_string(),
            discount_percentage: DEMO_DISCOUNT,
        };
    }
    match queries::get_active_coupon_by_code(conn, code) {
        Ok(Some(coupon)) => CouponLookup::Found {
            code: coupon.code,
            discount_percentage: coupon.discount_percentage,
        },
        Ok(None) => CouponLookup::NotFound,
        Err(err) => {
            error!(code, error = %err, "coupon lookup failed, proceeding without discount");
            CouponLookup::LookupFailed
        }
    }
}

/// Resolve an optional buyer-supplied code. Blank input means no coupon
/// was attempted and resolves to no discount without an Invalid marker.
pub fn resolve(conn: &Connection, raw: Option<&str>) -> Option<CouponResolution> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    let code = normalize_code(raw);
    match lookup(conn, &code) {
        CouponLookup::Found { code, discount_percentage } => {
            Some(CouponResolution::Valid { code, discount_percentage })
        }
        CouponLookup::NotFound => {
            debug!(code, "unknown or inactive coupon code");
            Some(CouponResolution::Invalid {
                message: "Invalid coupon code".to_string(),
            })
        }
        CouponLookup::LookupFailed => Some(CouponResolution::Invalid {
            message: "Invalid coupon code".to_string(),
        }),
    }
}
