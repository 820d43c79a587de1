//! Price computation for checkout.
//!
//! All amounts are major currency units (dollars). The charged amount is
//! computed once at checkout and snapshotted onto the payment row; it is
//! never recomputed from the live course price afterwards.

/// Round to two decimal places, half away from zero at the cent boundary.
pub fn round2(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// Apply a percentage discount to a base price. Results are clamped to
/// zero so an over-100% discount can never produce a negative charge.
pub fn discounted_price(base: f64, discount_percentage: f64) -> f64 {
    let discounted = base * (1.0 - discount_percentage / 100.0);
    round2(discounted.max(0.0))
}

/// Final checkout price given an optional coupon discount and the optional
/// sitewide promotion. The two never stack: a valid coupon always takes
/// precedence over the sitewide promotion.
pub fn checkout_price(
    base: f64,
    coupon_discount: Option<f64>,
    sitewide_discount: Option<f64>,
) -> f64 {
    match coupon_discount.or(sitewide_discount) {
        Some(pct) => discounted_price(base, pct),
        None => round2(base),
    }
}

/// Convert a major-unit amount to provider minor units (cents).
pub fn to_cents(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}
