mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::*;

fn intent_event(event_id: &str, event_type: &str, intent_id: &str) -> serde_json::Value {
    json!({
        "id": event_id,
        "type": event_type,
        "data": {
            "object": {
                "id": intent_id
            }
        }
    })
}

#[tokio::test]
async fn rejects_a_bad_signature() {
    let (state, _gateway) = create_test_app_state();
    let app = test_app(state);

    let event = intent_event("evt_1", "payment_intent.succeeded", "pi_x");
    let (status, _) = deliver_webhook_signed(app, &event, "wrong").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn rejects_a_missing_signature_header() {
    let (state, _gateway) = create_test_app_state();
    let app = test_app(state);

    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/api/webhooks/stripe")
        .body(axum::body::Body::from("{}"))
        .unwrap();
    let response = tower::util::ServiceExt::oneshot(app, request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn payment_succeeded_confirms_the_pending_payment() {
    let (state, _gateway) = create_test_app_state();
    let payment_id = {
        let conn = state.db.get().unwrap();
        let (user, _) = create_test_user(&conn, "buyer@example.com", false);
        let course = create_test_course(&conn, "Rust 101", 10.0, true, &["a"]);
        enroll(&conn, &user, &course.course.id, 10.0, "pi_ok").0.id
    };
    let app = test_app(state.clone());

    let event = intent_event("evt_ok_1", "payment_intent.succeeded", "pi_ok");
    let (status, body) = deliver_webhook(app, &event).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "OK");

    let conn = state.db.get().unwrap();
    let payment = queries::get_payment_by_id(&conn, &payment_id).unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Completed);
}

#[tokio::test]
async fn replayed_events_change_nothing() {
    let (state, _gateway) = create_test_app_state();
    let payment_id = {
        let conn = state.db.get().unwrap();
        let (user, _) = create_test_user(&conn, "buyer@example.com", false);
        let course = create_test_course(&conn, "Rust 101", 10.0, true, &["a"]);
        enroll(&conn, &user, &course.course.id, 10.0, "pi_replay").0.id
    };
    let app = test_app(state.clone());

    let event = intent_event("evt_dup", "payment_intent.succeeded", "pi_replay");
    let (_, first) = deliver_webhook(app.clone(), &event).await;
    assert_eq!(first, "OK");

    // Flip the status back so a replay that incorrectly re-processes
    // would be observable.
    {
        let conn = state.db.get().unwrap();
        queries::set_payment_status(&conn, &payment_id, PaymentStatus::Pending).unwrap();
    }

    let (status, second) = deliver_webhook(app, &event).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second, "Already processed");

    let conn = state.db.get().unwrap();
    let payment = queries::get_payment_by_id(&conn, &payment_id).unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
}

#[tokio::test]
async fn payment_failure_revokes_the_optimistic_enrollment() {
    let (state, _gateway) = create_test_app_state();
    let (user_id, course_id, payment_id) = {
        let conn = state.db.get().unwrap();
        let (user, _) = create_test_user(&conn, "buyer@example.com", false);
        let course = create_test_course(&conn, "Rust 101", 10.0, true, &["a"]);
        let (payment, _) = enroll(&conn, &user, &course.course.id, 10.0, "pi_fail");
        (user.id, course.course.id, payment.id)
    };
    let app = test_app(state.clone());

    let event = intent_event("evt_fail_1", "payment_intent.payment_failed", "pi_fail");
    let (status, _) = deliver_webhook(app, &event).await;
    assert_eq!(status, StatusCode::OK);

    let conn = state.db.get().unwrap();
    let payment = queries::get_payment_by_id(&conn, &payment_id).unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Failed);
    assert!(queries::get_enrollment(&conn, &user_id, &course_id)
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn charge_refunded_marks_the_payment() {
    let (state, _gateway) = create_test_app_state();
    let payment_id = {
        let conn = state.db.get().unwrap();
        let (user, _) = create_test_user(&conn, "buyer@example.com", false);
        let course = create_test_course(&conn, "Rust 101", 10.0, true, &["a"]);
        enroll(&conn, &user, &course.course.id, 10.0, "pi_refund").0.id
    };
    let app = test_app(state.clone());

    let event = json!({
        "id": "evt_refund_1",
        "type": "charge.refunded",
        "data": {
            "object": {
                "id": "ch_1",
                "payment_intent": "pi_refund",
                "refunded": true
            }
        }
    });
    let (status, _) = deliver_webhook(app, &event).await;
    assert_eq!(status, StatusCode::OK);

    let conn = state.db.get().unwrap();
    let payment = queries::get_payment_by_id(&conn, &payment_id).unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Refunded);
}

#[tokio::test]
async fn partial_refund_leaves_the_payment_untouched() {
    let (state, _gateway) = create_test_app_state();
    let payment_id = {
        let conn = state.db.get().unwrap();
        let (user, _) = create_test_user(&conn, "buyer@example.com", false);
        let course = create_test_course(&conn, "Rust 101", 10.0, true, &["a"]);
        enroll(&conn, &user, &course.course.id, 10.0, "pi_partial").0.id
    };
    let app = test_app(state.clone());

    let event = json!({
        "id": "evt_partial_1",
        "type": "charge.refunded",
        "data": {
            "object": {
                "id": "ch_2",
                "payment_intent": "pi_partial",
                "refunded": false
            }
        }
    });
    let (status, body) = deliver_webhook(app, &event).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Event ignored");

    let conn = state.db.get().unwrap();
    let payment = queries::get_payment_by_id(&conn, &payment_id).unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
}

#[tokio::test]
async fn subscription_deleted_deactivates_locally() {
    let (state, _gateway) = create_test_app_state();
    {
        let conn = state.db.get().unwrap();
        let (user, _) = create_test_user(&conn, "subscriber@example.com", false);
        let course = create_test_course(&conn, "Plan", 30.0, true, &["a"]);
        let (payment, _) = enroll(&conn, &user, &course.course.id, 30.0, "pi_sub");
        create_test_subscription(&conn, &user, &payment.id, "sub_gone");
    }
    let app = test_app(state.clone());

    let event = json!({
        "id": "evt_sub_del",
        "type": "customer.subscription.deleted",
        "data": {
            "object": {
                "id": "sub_gone",
                "status": "canceled",
                "cancel_at_period_end": false,
                "current_period_end": null
            }
        }
    });
    let (status, _) = deliver_webhook(app, &event).await;
    assert_eq!(status, StatusCode::OK);

    let conn = state.db.get().unwrap();
    let sub = queries::get_subscription_by_provider_id(&conn, "sub_gone")
        .unwrap()
        .unwrap();
    assert!(!sub.active);
}

#[tokio::test]
async fn subscription_update_syncs_the_cancel_flag() {
    let (state, _gateway) = create_test_app_state();
    {
        let conn = state.db.get().unwrap();
        let (user, _) = create_test_user(&conn, "subscriber@example.com", false);
        let course = create_test_course(&conn, "Plan", 30.0, true, &["a"]);
        let (payment, _) = enroll(&conn, &user, &course.course.id, 30.0, "pi_sub2");
        create_test_subscription(&conn, &user, &payment.id, "sub_upd");
    }
    let app = test_app(state.clone());

    let event = json!({
        "id": "evt_sub_upd",
        "type": "customer.subscription.updated",
        "data": {
            "object": {
                "id": "sub_upd",
                "status": "active",
                "cancel_at_period_end": true,
                "current_period_end": 2000000000
            }
        }
    });
    let (status, _) = deliver_webhook(app, &event).await;
    assert_eq!(status, StatusCode::OK);

    let conn = state.db.get().unwrap();
    let sub = queries::get_subscription_by_provider_id(&conn, "sub_upd")
        .unwrap()
        .unwrap();
    assert!(sub.cancel_at_period_end);
    assert_eq!(sub.current_period_end, Some(2000000000));
    assert!(sub.active);
}

#[tokio::test]
async fn unknown_event_types_are_acknowledged_and_ignored() {
    let (state, _gateway) = create_test_app_state();
    let app = test_app(state);

    let event = json!({
        "id": "evt_other",
        "type": "invoice.finalized",
        "data": {"object": {}}
    });
    let (status, body) = deliver_webhook(app, &event).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Event ignored");
}

#[tokio::test]
async fn events_for_unknown_payments_are_acknowledged() {
    let (state, _gateway) = create_test_app_state();
    let app = test_app(state.clone());

    let event = intent_event("evt_orphan", "payment_intent.succeeded", "pi_nobody");
    let (status, body) = deliver_webhook(app, &event).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "No matching record");

    // Still recorded for audit.
    let conn = state.db.get().unwrap();
    let events = queries::list_webhook_events(&conn, PROVIDER_STRIPE).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_id, "evt_orphan");
}
