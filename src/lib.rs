//! CourseHub - checkout and entitlement backend for an online course
//! marketplace.
//!
//! This library provides coupon validation, price computation, enrollment
//! and subscription state management, the payment-provider adapter, and
//! webhook-driven reconciliation, plus the HTTP handlers exposing them.

pub mod config;
pub mod coupons;
pub mod db;
pub mod entitlements;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod payments;
pub mod pricing;
