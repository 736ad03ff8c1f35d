use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use booking_dispatch::api::rest::router;
use booking_dispatch::state::AppState;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

fn setup() -> (axum::Router, Arc<AppState>) {
    let state = Arc::new(AppState::new(1024, 10));
    (router(state.clone()), state)
}

fn owner_id() -> String {
    "11111111-1111-1111-1111-111111111111".to_string()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-actor-id", owner_id())
        .header("x-actor-role", "owner")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn anonymous_json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn create_carwash(app: &axum::Router, max_cars_per_slot: u32) -> Value {
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/carwashes",
            json!({
                "name": "Sparkle Wash",
                "location": { "lat": 41.0082, "lng": 28.9784 },
                "max_cars_per_slot": max_cars_per_slot,
                "service_radius_km": 10.0
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}

async fn create_online_worker(app: &axum::Router, carwash_id: &str) -> String {
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/workers",
            json!({ "carwash_id": carwash_id, "name": "Mehmet" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let worker = body_json(response).await;
    let id = worker["id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(json_request(
            "PATCH",
            &format!("/workers/{id}/status"),
            json!({ "status": "Online" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    id
}

fn tomorrow_at_ten() -> String {
    let base = (Utc::now() + Duration::days(1))
        .date_naive()
        .and_hms_opt(10, 0, 0)
        .unwrap()
        .and_utc();
    base.to_rfc3339()
}

async fn create_slot_booking(app: &axum::Router, carwash_id: &str) -> axum::response::Response {
    app.clone()
        .oneshot(json_request(
            "POST",
            "/bookings",
            json!({
                "customer_id": Uuid::new_v4(),
                "car_id": Uuid::new_v4(),
                "carwash_id": carwash_id,
                "scheduled_at": tomorrow_at_ten(),
                "total_amount": 350.0,
                "booking_type": "slot"
            }),
        ))
        .await
        .unwrap()
}

async fn create_home_booking(app: &axum::Router, carwash_id: &str) -> Value {
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/bookings",
            json!({
                "customer_id": Uuid::new_v4(),
                "car_id": Uuid::new_v4(),
                "carwash_id": carwash_id,
                "scheduled_at": tomorrow_at_ten(),
                "total_amount": 500.0,
                "booking_type": "home",
                "location": { "lat": 41.0151, "lng": 28.9795 },
                "address_note": "blue gate, second floor"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}

async fn set_status(
    app: &axum::Router,
    booking_id: &str,
    target: &str,
    code: Option<&str>,
) -> axum::response::Response {
    let mut body = json!({ "target_status": target });
    if let Some(code) = code {
        body["verification_code"] = json!(code);
    }
    app.clone()
        .oneshot(json_request(
            "POST",
            &format!("/bookings/{booking_id}/status"),
            body,
        ))
        .await
        .unwrap()
}

#[tokio::test]
async fn health_returns_ok() {
    let (app, _state) = setup();
    let response = app.oneshot(get_request("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["carwashes"], 0);
    assert_eq!(body["bookings"], 0);
    assert_eq!(body["tracking_sessions"], 0);
}

#[tokio::test]
async fn metrics_returns_prometheus_format() {
    let (app, _state) = setup();
    let response = app.oneshot(get_request("/metrics")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.contains("text/plain"));

    let body = body_string(response).await;
    assert!(body.contains("slots_occupied"));
    assert!(body.contains("tracking_sessions_active"));
}

#[tokio::test]
async fn create_booking_requires_actor_headers() {
    let (app, _state) = setup();
    let carwash = create_carwash(&app, 2).await;

    let response = app
        .oneshot(anonymous_json_request(
            "POST",
            "/bookings",
            json!({
                "customer_id": Uuid::new_v4(),
                "car_id": Uuid::new_v4(),
                "carwash_id": carwash["id"],
                "scheduled_at": tomorrow_at_ten(),
                "total_amount": 350.0,
                "booking_type": "slot"
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn slot_booking_admission_respects_capacity() {
    let (app, _state) = setup();
    let carwash = create_carwash(&app, 1).await;
    let carwash_id = carwash["id"].as_str().unwrap();

    let first = create_slot_booking(&app, carwash_id).await;
    assert_eq!(first.status(), StatusCode::OK);
    let first = body_json(first).await;
    assert_eq!(first["status"], "pending");
    assert_eq!(first["booking_type"], "slot");

    let second = create_slot_booking(&app, carwash_id).await;
    assert_eq!(second.status(), StatusCode::CONFLICT);
    let body = body_json(second).await;
    assert_eq!(body["code"], "capacity_exceeded");

    // Cancelling the first booking frees the window for a retry.
    let cancel = set_status(&app, first["id"].as_str().unwrap(), "cancelled", None).await;
    assert_eq!(cancel.status(), StatusCode::OK);

    let retry = create_slot_booking(&app, carwash_id).await;
    assert_eq!(retry.status(), StatusCode::OK);
}

#[tokio::test]
async fn cancelling_twice_does_not_free_extra_capacity() {
    let (app, _state) = setup();
    let carwash = create_carwash(&app, 1).await;
    let carwash_id = carwash["id"].as_str().unwrap();

    let booking = body_json(create_slot_booking(&app, carwash_id).await).await;
    let booking_id = booking["id"].as_str().unwrap();

    assert_eq!(
        set_status(&app, booking_id, "cancelled", None).await.status(),
        StatusCode::OK
    );
    // The duplicate cancel is a conflict, and the reservation is only
    // released once.
    assert_eq!(
        set_status(&app, booking_id, "cancelled", None).await.status(),
        StatusCode::CONFLICT
    );

    let again = create_slot_booking(&app, carwash_id).await;
    assert_eq!(again.status(), StatusCode::OK);
    let blocked = create_slot_booking(&app, carwash_id).await;
    assert_eq!(blocked.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn availability_reflects_reservations() {
    let (app, _state) = setup();
    let carwash = create_carwash(&app, 2).await;
    let carwash_id = carwash["id"].as_str().unwrap();

    let booking = body_json(create_slot_booking(&app, carwash_id).await).await;
    let date = (Utc::now() + Duration::days(1)).date_naive();

    let response = app
        .clone()
        .oneshot(get_request(&format!(
            "/carwashes/{carwash_id}/availability?date={date}"
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let windows = body["windows"].as_array().unwrap();
    // 09:00-18:00 at 30 minutes is 18 windows.
    assert_eq!(windows.len(), 18);

    let ten = windows
        .iter()
        .find(|w| w["window_start"].as_str().unwrap().contains("10:00:00"))
        .unwrap();
    assert_eq!(ten["remaining"], 1);

    let eleven = windows
        .iter()
        .find(|w| w["window_start"].as_str().unwrap().contains("11:00:00"))
        .unwrap();
    assert_eq!(eleven["remaining"], 2);

    // Cancelling restores the window.
    set_status(&app, booking["id"].as_str().unwrap(), "cancelled", None).await;
    let response = app
        .oneshot(get_request(&format!(
            "/carwashes/{carwash_id}/availability?date={date}"
        )))
        .await
        .unwrap();
    let body = body_json(response).await;
    let ten = body["windows"]
        .as_array()
        .unwrap()
        .iter()
        .find(|w| w["window_start"].as_str().unwrap().contains("10:00:00"))
        .unwrap()
        .clone();
    assert_eq!(ten["remaining"], 2);
}

#[tokio::test]
async fn slot_booking_cannot_go_en_route() {
    let (app, _state) = setup();
    let carwash = create_carwash(&app, 2).await;
    let carwash_id = carwash["id"].as_str().unwrap();

    let booking = body_json(create_slot_booking(&app, carwash_id).await).await;
    let booking_id = booking["id"].as_str().unwrap();

    assert_eq!(
        set_status(&app, booking_id, "confirmed", None).await.status(),
        StatusCode::OK
    );

    let response = set_status(&app, booking_id, "en_route", None).await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert_eq!(body["code"], "precondition_failed");

    // The slot path closes directly.
    let response = set_status(&app, booking_id, "completed", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "completed");
}

#[tokio::test]
async fn duplicate_confirm_is_a_state_conflict() {
    let (app, _state) = setup();
    let carwash = create_carwash(&app, 2).await;
    let carwash_id = carwash["id"].as_str().unwrap();

    let booking = body_json(create_slot_booking(&app, carwash_id).await).await;
    let booking_id = booking["id"].as_str().unwrap();

    let first = set_status(&app, booking_id, "confirmed", None).await;
    let second = set_status(&app, booking_id, "confirmed", None).await;

    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(second.status(), StatusCode::CONFLICT);
    let body = body_json(second).await;
    assert_eq!(body["code"], "state_conflict");
}

#[tokio::test]
async fn stale_version_is_rejected() {
    let (app, _state) = setup();
    let carwash = create_carwash(&app, 2).await;
    let carwash_id = carwash["id"].as_str().unwrap();

    let booking = body_json(create_slot_booking(&app, carwash_id).await).await;
    let booking_id = booking["id"].as_str().unwrap();

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/bookings/{booking_id}/status"),
            json!({ "target_status": "confirmed", "expected_version": 99 }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["code"], "state_conflict");
}

#[tokio::test]
async fn home_booking_outside_service_radius_is_rejected() {
    let (app, _state) = setup();
    let carwash = create_carwash(&app, 2).await;
    let carwash_id = carwash["id"].as_str().unwrap();

    let response = app
        .oneshot(json_request(
            "POST",
            "/bookings",
            json!({
                "customer_id": Uuid::new_v4(),
                "car_id": Uuid::new_v4(),
                "carwash_id": carwash_id,
                "scheduled_at": tomorrow_at_ten(),
                "total_amount": 500.0,
                "booking_type": "home",
                // Ankara, roughly 350 km from the Istanbul station.
                "location": { "lat": 39.9334, "lng": 32.8597 }
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn start_trip_requires_assigned_worker() {
    let (app, _state) = setup();
    let carwash = create_carwash(&app, 2).await;
    let carwash_id = carwash["id"].as_str().unwrap();

    let booking = create_home_booking(&app, carwash_id).await;
    let booking_id = booking["id"].as_str().unwrap();

    assert_eq!(
        set_status(&app, booking_id, "confirmed", None).await.status(),
        StatusCode::OK
    );

    let response = set_status(&app, booking_id, "en_route", None).await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert_eq!(body["code"], "precondition_failed");
}

#[tokio::test]
async fn full_home_service_flow_with_trust_handshake() {
    let (app, _state) = setup();
    let carwash = create_carwash(&app, 2).await;
    let carwash_id = carwash["id"].as_str().unwrap();
    let worker_id = create_online_worker(&app, carwash_id).await;

    let booking = create_home_booking(&app, carwash_id).await;
    let booking_id = booking["id"].as_str().unwrap();
    assert_eq!(booking["booking_type"], "home");
    assert!(booking["worker_id"].is_null());

    // Accepting a home booking mints the verification code.
    let confirm = set_status(&app, booking_id, "confirmed", None).await;
    assert_eq!(confirm.status(), StatusCode::OK);
    let confirmed = body_json(confirm).await;
    let code = confirmed["verification_code"].as_str().unwrap().to_string();
    assert_eq!(code.len(), 4);

    // The code is visible on the booking until it is consumed.
    let fetched = body_json(
        app.clone()
            .oneshot(get_request(&format!("/bookings/{booking_id}")))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(fetched["verification_code"], code.as_str());

    let assign = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/bookings/{booking_id}/assign"),
            json!({ "worker_id": worker_id }),
        ))
        .await
        .unwrap();
    assert_eq!(assign.status(), StatusCode::OK);
    let assignment = body_json(assign).await;
    assert_eq!(assignment["status"], "active");

    let start = set_status(&app, booking_id, "en_route", None).await;
    assert_eq!(start.status(), StatusCode::OK);
    let started = body_json(start).await;
    assert_eq!(started["status"], "en_route");
    let session = started["tracking_session"].as_str().unwrap().to_string();

    // Worker pushes a position sample against the live session.
    let push = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/bookings/{booking_id}/location"),
            json!({ "session": session, "lat": 41.01, "lng": 28.98 }),
        ))
        .await
        .unwrap();
    assert_eq!(push.status(), StatusCode::ACCEPTED);
    assert_eq!(body_json(push).await["accepted"], true);

    // A wrong code leaves the booking en route.
    let wrong = if code == "1111" { "2222" } else { "1111" };
    let failed = set_status(&app, booking_id, "completed", Some(wrong)).await;
    assert_eq!(failed.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(failed).await;
    assert_eq!(body["code"], "invalid_verification_code");

    let still_en_route = body_json(
        app.clone()
            .oneshot(get_request(&format!("/bookings/{booking_id}")))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(still_en_route["status"], "en_route");

    // The right code completes the job and consumes the code.
    let done = set_status(&app, booking_id, "completed", Some(&code)).await;
    assert_eq!(done.status(), StatusCode::OK);
    let completed = body_json(done).await;
    assert_eq!(completed["status"], "completed");

    let after = body_json(
        app.clone()
            .oneshot(get_request(&format!("/bookings/{booking_id}")))
            .await
            .unwrap(),
    )
    .await;
    assert!(after["verification_code"].is_null());

    // The closed session drops further samples.
    let push = app
        .oneshot(json_request(
            "POST",
            &format!("/bookings/{booking_id}/location"),
            json!({ "session": session, "lat": 41.02, "lng": 28.99 }),
        ))
        .await
        .unwrap();
    assert_eq!(body_json(push).await["accepted"], false);
}

#[tokio::test]
async fn worker_exclusivity_is_enforced() {
    let (app, _state) = setup();
    let carwash = create_carwash(&app, 2).await;
    let carwash_id = carwash["id"].as_str().unwrap();
    let worker_id = create_online_worker(&app, carwash_id).await;

    let first = create_home_booking(&app, carwash_id).await;
    let second = create_home_booking(&app, carwash_id).await;
    let first_id = first["id"].as_str().unwrap();
    let second_id = second["id"].as_str().unwrap();

    set_status(&app, first_id, "confirmed", None).await;
    set_status(&app, second_id, "confirmed", None).await;

    let assign = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/bookings/{first_id}/assign"),
            json!({ "worker_id": worker_id }),
        ))
        .await
        .unwrap();
    assert_eq!(assign.status(), StatusCode::OK);

    let conflict = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/bookings/{second_id}/assign"),
            json!({ "worker_id": worker_id }),
        ))
        .await
        .unwrap();
    assert_eq!(conflict.status(), StatusCode::CONFLICT);
    let body = body_json(conflict).await;
    assert_eq!(body["code"], "assignment_conflict");

    // Cancelling the first booking frees the worker.
    set_status(&app, first_id, "cancelled", None).await;
    let retry = app
        .oneshot(json_request(
            "POST",
            &format!("/bookings/{second_id}/assign"),
            json!({ "worker_id": worker_id }),
        ))
        .await
        .unwrap();
    assert_eq!(retry.status(), StatusCode::OK);
}

#[tokio::test]
async fn worker_from_another_carwash_is_rejected() {
    let (app, _state) = setup();
    let carwash = create_carwash(&app, 2).await;
    let other = create_carwash(&app, 2).await;
    let carwash_id = carwash["id"].as_str().unwrap();
    let foreign_worker = create_online_worker(&app, other["id"].as_str().unwrap()).await;

    let booking = create_home_booking(&app, carwash_id).await;
    let booking_id = booking["id"].as_str().unwrap();
    set_status(&app, booking_id, "confirmed", None).await;

    let response = app
        .oneshot(json_request(
            "POST",
            &format!("/bookings/{booking_id}/assign"),
            json!({ "worker_id": foreign_worker }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cancelling_en_route_booking_tears_down_tracking() {
    let (app, state) = setup();
    let carwash = create_carwash(&app, 2).await;
    let carwash_id = carwash["id"].as_str().unwrap();
    let worker_id = create_online_worker(&app, carwash_id).await;

    let booking = create_home_booking(&app, carwash_id).await;
    let booking_id = booking["id"].as_str().unwrap();

    set_status(&app, booking_id, "confirmed", None).await;
    app.clone()
        .oneshot(json_request(
            "POST",
            &format!("/bookings/{booking_id}/assign"),
            json!({ "worker_id": worker_id }),
        ))
        .await
        .unwrap();
    let started = body_json(set_status(&app, booking_id, "en_route", None).await).await;
    let session = started["tracking_session"].as_str().unwrap().to_string();
    assert_eq!(state.tracking.active_sessions(), 1);

    let cancel = set_status(&app, booking_id, "cancelled", None).await;
    assert_eq!(cancel.status(), StatusCode::OK);
    let cancelled = body_json(cancel).await;
    assert_eq!(cancelled["cancelled"]["stage"], "en_route");
    assert_eq!(state.tracking.active_sessions(), 0);

    let push = app
        .oneshot(json_request(
            "POST",
            &format!("/bookings/{booking_id}/location"),
            json!({ "session": session, "lat": 41.0, "lng": 29.0 }),
        ))
        .await
        .unwrap();
    assert_eq!(body_json(push).await["accepted"], false);
}

#[tokio::test]
async fn verification_code_is_scoped_to_its_booking() {
    let (app, state) = setup();
    let carwash = create_carwash(&app, 2).await;
    let carwash_id = carwash["id"].as_str().unwrap();

    let first = create_home_booking(&app, carwash_id).await;
    let second = create_home_booking(&app, carwash_id).await;
    let first_id = first["id"].as_str().unwrap();
    let second_id = second["id"].as_str().unwrap();

    let first_code = body_json(set_status(&app, first_id, "confirmed", None).await).await
        ["verification_code"]
        .as_str()
        .unwrap()
        .to_string();
    set_status(&app, second_id, "confirmed", None).await;

    let first_worker = create_online_worker(&app, carwash_id).await;
    let second_worker = create_online_worker(&app, carwash_id).await;
    for (id, worker) in [(first_id, &first_worker), (second_id, &second_worker)] {
        app.clone()
            .oneshot(json_request(
                "POST",
                &format!("/bookings/{id}/assign"),
                json!({ "worker_id": worker }),
            ))
            .await
            .unwrap();
        set_status(&app, id, "en_route", None).await;
    }

    // First booking's code never closes the second booking, no matter what
    // the second booking's own code happens to be.
    let second_code = state
        .handshake
        .peek(second_id.parse().unwrap())
        .expect("second booking has a live code");
    if second_code != first_code {
        let response = set_status(&app, second_id, "completed", Some(&first_code)).await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    let response = set_status(&app, second_id, "completed", Some(&second_code)).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn concurrent_slot_bookings_never_exceed_capacity() {
    let (app, _state) = setup();
    let carwash = create_carwash(&app, 3).await;
    let carwash_id = carwash["id"].as_str().unwrap().to_string();

    let mut handles = Vec::new();
    for _ in 0..12 {
        let app = app.clone();
        let carwash_id = carwash_id.clone();
        handles.push(tokio::spawn(async move {
            create_slot_booking(&app, &carwash_id).await.status()
        }));
    }

    let mut admitted = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            StatusCode::OK => admitted += 1,
            StatusCode::CONFLICT => rejected += 1,
            other => panic!("unexpected status {other}"),
        }
    }

    assert_eq!(admitted, 3);
    assert_eq!(rejected, 9);
}

#[tokio::test]
async fn get_nonexistent_booking_returns_404() {
    let (app, _state) = setup();
    let fake_id = "00000000-0000-0000-0000-000000000000";
    let response = app
        .oneshot(get_request(&format!("/bookings/{fake_id}")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn carwash_booking_listing_is_a_snapshot() {
    let (app, _state) = setup();
    let carwash = create_carwash(&app, 5).await;
    let carwash_id = carwash["id"].as_str().unwrap();

    create_slot_booking(&app, carwash_id).await;
    create_home_booking(&app, carwash_id).await;

    let response = app
        .oneshot(get_request(&format!("/carwashes/{carwash_id}/bookings")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body.as_array().unwrap().len(), 2);
}
