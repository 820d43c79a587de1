//! Test utilities and fixtures for CourseHub integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use serde_json::Value;
use tower::util::ServiceExt;

pub use coursehub::db::{init_db, queries, AppState, DbPool};
pub use coursehub::error::{AppError, Result};
pub use coursehub::models::*;
pub use coursehub::payments::{
    PaymentGateway, PaymentIntent, ProviderSubscription, RefundInfo, PROVIDER_STRIPE,
};

/// Signature value the mock gateway accepts.
pub const TEST_SIGNATURE: &str = "test-signature";

/// Payment gateway double: records created intents, serves configured
/// refunds, and accepts exactly one signature value.
pub struct MockGateway {
    intents: Mutex<Vec<PaymentIntent>>,
    refunds: Mutex<Vec<RefundInfo>>,
    cancel_at_period_end: AtomicBool,
    counter: AtomicU64,
    pub fail_provider: AtomicBool,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            intents: Mutex::new(Vec::new()),
            refunds: Mutex::new(Vec::new()),
            cancel_at_period_end: AtomicBool::new(false),
            counter: AtomicU64::new(0),
            fail_provider: AtomicBool::new(false),
        }
    }

    pub fn add_refund(&self, status: &str, amount_cents: i64) {
        self.refunds.lock().unwrap().push(RefundInfo {
            id: format!("re_mock_{}", self.counter.fetch_add(1, Ordering::SeqCst)),
            status: status.to_string(),
            amount_cents,
        });
    }

    pub fn created_intents(&self) -> Vec<PaymentIntent> {
        self.intents.lock().unwrap().clone()
    }

    fn check_available(&self) -> Result<()> {
        if self.fail_provider.load(Ordering::SeqCst) {
            return Err(AppError::Upstream("mock provider down".into()));
        }
        Ok(())
    }

    fn subscription(&self, id: &str, status: &str) -> ProviderSubscription {
        ProviderSubscription {
            id: id.to_string(),
            status: status.to_string(),
            cancel_at_period_end: self.cancel_at_period_end.load(Ordering::SeqCst),
            current_period_end: Some(chrono::Utc::now().timestamp() + 30 * 86400),
        }
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_payment_intent(
        &self,
        amount_cents: i64,
        currency: &str,
        user_id: &str,
        course_id: &str,
    ) -> Result<PaymentIntent> {
        self.check_available()?;
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let intent = PaymentIntent {
            id: format!("pi_mock_{}", n),
            status: "requires_confirmation".to_string(),
            amount_cents,
            currency: currency.to_string(),
            client_secret: Some(format!("pi_mock_{}_secret", n)),
            user_id: Some(user_id.to_string()),
            course_id: Some(course_id.to_string()),
        };
        self.intents.lock().unwrap().push(intent.clone());
        Ok(intent)
    }

    async fn retrieve_payment_intent(&self, intent_id: &str) -> Result<PaymentIntent> {
        self.check_available()?;
        self.intents
            .lock()
            .unwrap()
            .iter()
            .find(|i| i.id == intent_id)
            .cloned()
            .ok_or_else(|| AppError::Upstream("no such payment intent".into()))
    }

    async fn list_refunds(&self, _intent_id: &str) -> Result<Vec<RefundInfo>> {
        self.check_available()?;
        Ok(self.refunds.lock().unwrap().clone())
    }

    async fn retrieve_subscription(&self, subscription_id: &str) -> Result<ProviderSubscription> {
        self.check_available()?;
        Ok(self.subscription(subscription_id, "active"))
    }

    async fn cancel_subscription_at_period_end(
        &self,
        subscription_id: &str,
    ) -> Result<ProviderSubscription> {
        self.check_available()?;
        self.cancel_at_period_end.store(true, Ordering::SeqCst);
        Ok(self.subscription(subscription_id, "active"))
    }

    async fn cancel_subscription_now(&self, subscription_id: &str) -> Result<ProviderSubscription> {
        self.check_available()?;
        Ok(self.subscription(subscription_id, "canceled"))
    }

    fn verify_webhook_signature(&self, _payload: &[u8], signature: &str) -> Result<bool> {
        Ok(signature == TEST_SIGNATURE)
    }
}

/// Create an in-memory test database with schema initialized
pub fn setup_test_db() -> Connection {
    let conn = Connection::open_in_memory().expect("Failed to create in-memory database");
    init_db(&conn).expect("Failed to initialize schema");
    conn
}

/// AppState over a single-connection in-memory pool and a mock gateway.
/// One connection so every request sees the same database.
pub fn create_test_app_state() -> (AppState, Arc<MockGateway>) {
    create_test_app_state_with(None)
}

pub fn create_test_app_state_with(sitewide_discount: Option<f64>) -> (AppState, Arc<MockGateway>) {
    let manager = SqliteConnectionManager::memory();
    let pool: DbPool = Pool::builder().max_size(1).build(manager).unwrap();
    {
        let conn = pool.get().unwrap();
        init_db(&conn).unwrap();
    }

    let gateway = Arc::new(MockGateway::new());
    let state = AppState {
        db: pool,
        gateway: gateway.clone(),
        currency: "usd".to_string(),
        sitewide_discount,
    };
    (state, gateway)
}

pub fn test_app(state: AppState) -> Router {
    coursehub::handlers::router(state)
}

/// Create a user plus a live session token.
pub fn create_test_user(conn: &Connection, email: &str, admin: bool) -> (User, String) {
    let user = queries::create_user(
        conn,
        &CreateUser {
            email: email.to_string(),
            name: format!("Test {}", email),
            admin,
        },
    )
    .expect("Failed to create test user");
    let token = queries::create_session(conn, &user.id, 3600).expect("Failed to create session");
    (user, token)
}

pub fn create_test_course(
    conn: &Connection,
    title: &str,
    price: f64,
    published: bool,
    lessons: &[&str],
) -> CourseWithLessons {
    queries::create_course(
        conn,
        &CreateCourse {
            title: title.to_string(),
            description: None,
            price,
            published,
            lessons: lessons.iter().map(|l| l.to_string()).collect(),
        },
    )
    .expect("Failed to create test course")
}

pub fn create_test_coupon(conn: &Connection, code: &str, pct: f64, active: bool) -> Coupon {
    queries::create_coupon(
        conn,
        &CreateCoupon {
            code: code.to_string(),
            discount_percentage: pct,
            active,
        },
    )
    .expect("Failed to create test coupon")
}

/// Enroll a user directly at the database level, returning the payment
/// and enrollment rows.
pub fn enroll(
    conn: &Connection,
    user: &User,
    course_id: &str,
    amount: f64,
    intent_id: &str,
) -> (Payment, Enrollment) {
    let payment = queries::create_payment(
        conn,
        &CreatePayment {
            user_id: user.id.clone(),
            course_id: course_id.to_string(),
            provider: PROVIDER_STRIPE.to_string(),
            provider_payment_id: Some(intent_id.to_string()),
            amount,
            currency: "usd".to_string(),
            coupon_code: None,
        },
    )
    .expect("Failed to create test payment");
    let enrollment = queries::create_enrollment(conn, &user.id, course_id, &payment.id)
        .expect("Failed to create test enrollment");
    (payment, enrollment)
}

pub fn create_test_subscription(
    conn: &Connection,
    user: &User,
    payment_id: &str,
    provider_subscription_id: &str,
) -> Subscription {
    queries::create_subscription(
        conn,
        &CreateSubscription {
            payment_id: payment_id.to_string(),
            user_id: user.id.clone(),
            provider_subscription_id: provider_subscription_id.to_string(),
            current_period_end: Some(chrono::Utc::now().timestamp() + 30 * 86400),
        },
    )
    .expect("Failed to create test subscription")
}

// ============ Request helpers ============

pub async fn request(
    app: Router,
    method: &str,
    path: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(path);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::String(
            String::from_utf8_lossy(&bytes).into_owned(),
        ))
    };
    (status, json)
}

/// Deliver a webhook event with the accepted test signature.
pub async fn deliver_webhook(app: Router, event: &Value) -> (StatusCode, String) {
    deliver_webhook_signed(app, event, TEST_SIGNATURE).await
}

pub async fn deliver_webhook_signed(
    app: Router,
    event: &Value,
    signature: &str,
) -> (StatusCode, String) {
    let request = Request::builder()
        .method("POST")
        .uri("/api/webhooks/stripe")
        .header("stripe-signature", signature)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(event.to_string()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8_lossy(&bytes).into_owned())
}
