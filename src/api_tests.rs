// src/api_tests.rs

#[cfg(test)]
mod tests {
    use crate::api::{router, AppState, BatchResponse, ErrorBody, HealthResponse};
    use crate::clock::FixedClock;
    use crate::model::{Request, RequestId, RequestStatus};
    use crate::reconciler::QuotaEngine;
    use crate::store::InMemoryStore;
    use axum::{
        body::Body,
        http::{Method, Request as HttpRequest, StatusCode},
        Router,
    };
    use chrono::{Duration, NaiveDateTime};
    use http_body_util::BodyExt;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use serde::de::DeserializeOwned;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn setup_app(start_date_time_str: &str) -> (Router, FixedClock) {
        let now = NaiveDateTime::parse_from_str(start_date_time_str, "%Y-%m-%d %H:%M:%S")
            .expect("Invalid datetime format in test");
        let clock = FixedClock::new(now);
        let engine = Arc::new(QuotaEngine::new(Arc::new(InMemoryStore::new())));
        let state = AppState {
            engine,
            clock: Arc::new(clock.clone()),
        };
        (router(state), clock)
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
        let builder = HttpRequest::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, bytes.to_vec())
    }

    fn parse<T: DeserializeOwned>(bytes: &[u8]) -> T {
        serde_json::from_slice(bytes).expect("Unexpected response body")
    }

    fn decimal(value: &Value) -> Decimal {
        serde_json::from_value(value.clone()).expect("Not a decimal")
    }

    async fn create_permission(app: &Router, emp: &str, date: &str, start: &str, end: &str) -> (StatusCode, Vec<u8>) {
        send(
            app,
            Method::POST,
            "/api/permissions",
            Some(json!({
                "employee_id": emp,
                "month": "March-2026",
                "date": date,
                "start_time": start,
                "end_time": end,
            })),
        )
        .await
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (app, _) = setup_app("2026-03-02 08:00:00");
        let (status, body) = send(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(parse::<HealthResponse>(&body).status, "ok");
    }

    #[tokio::test]
    async fn permission_request_books_and_shows_in_stats() {
        let (app, _) = setup_app("2026-03-02 08:00:00");
        let (status, body) = create_permission(&app, "E1", "2026-03-09", "09:00", "09:30").await;
        assert_eq!(status, StatusCode::CREATED);
        let request: Request = parse(&body);
        assert_eq!(request.status, RequestStatus::Pending);
        assert_eq!(request.amount, dec!(30));

        let (status, body) = send(&app, Method::GET, "/api/ledgers/E1/march-2026/permission", None).await;
        assert_eq!(status, StatusCode::OK);
        let stats: Value = parse(&body);
        assert_eq!(stats["month"], "March-2026");
        assert_eq!(decimal(&stats["taken"]), dec!(30));
        assert_eq!(decimal(&stats["remaining"]), dec!(150));
        assert_eq!(stats["clock"]["taken"], "00:30");
        assert_eq!(stats["clock"]["remaining"], "02:30");

        let (status, body) = send(&app, Method::GET, &format!("/api/requests/{}", request.id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(parse::<Request>(&body), request);
    }

    #[tokio::test]
    async fn validation_failure_maps_to_bad_request_with_code() {
        let (app, _) = setup_app("2026-03-02 08:00:00");
        let (status, body) = create_permission(&app, "E1", "2026-03-09", "09:00", "09:05").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(parse::<ErrorBody>(&body).code, "DURATION_TOO_SHORT");

        let (status, body) = send(&app, Method::GET, "/api/ledgers/E1/Marzo-2026/wfh", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(parse::<ErrorBody>(&body).code, "MALFORMED_MONTH");

        let (status, body) = send(&app, Method::GET, "/api/ledgers/E1/March-2026/sick_days", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(parse::<ErrorBody>(&body).code, "BAD_REQUEST");
    }

    #[tokio::test]
    async fn duplicate_and_missing_requests_map_to_conflict_and_not_found() {
        let (app, _) = setup_app("2026-03-02 08:00:00");
        create_permission(&app, "E1", "2026-03-09", "09:00", "09:30").await;
        let (status, body) = create_permission(&app, "E1", "2026-03-09", "09:00", "10:00").await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(parse::<ErrorBody>(&body).code, "DUPLICATE_REQUEST");

        let (status, body) = send(&app, Method::GET, "/api/requests/77", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(parse::<ErrorBody>(&body).code, "NOT_FOUND");
    }

    #[tokio::test]
    async fn wfh_create_edit_and_cancel_round_trip() {
        let (app, clock) = setup_app("2026-03-02 08:00:00");
        let (status, body) = send(
            &app,
            Method::POST,
            "/api/wfh",
            Some(json!({
                "employee_id": "E1",
                "month": "March-2026",
                "start_date": "2026-03-16",
                "end_date": "2026-03-17",
                "session": "FULL_DAY",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let request: Request = parse(&body);
        assert_eq!(request.amount, dec!(2));

        let (status, body) = send(
            &app,
            Method::PUT,
            &format!("/api/wfh/{}", request.id),
            Some(json!({
                "start_date": "2026-03-16",
                "end_date": "2026-03-19",
                "session": "full_day",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(parse::<Request>(&body).amount, dec!(4));

        clock.advance(Duration::days(1));
        let (status, body) = send(
            &app,
            Method::POST,
            &format!("/api/requests/{}/cancel", request.id),
            Some(json!({ "actor_id": "E1" })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let cancelled: Request = parse(&body);
        assert_eq!(cancelled.status, RequestStatus::Cancelled);

        let (_, body) = send(&app, Method::GET, "/api/ledgers/E1/March-2026/wfh", None).await;
        let stats: Value = parse(&body);
        assert_eq!(decimal(&stats["taken"]), dec!(0));
        assert_eq!(decimal(&stats["remaining"]), dec!(4));
        assert!(stats.get("clock").is_none());
    }

    #[tokio::test]
    async fn editing_after_window_is_a_conflict() {
        let (app, clock) = setup_app("2026-03-02 09:00:00");
        let (_, body) = create_permission(&app, "E1", "2026-03-02", "15:00", "15:30").await;
        let request: Request = parse(&body);

        clock.advance(Duration::minutes(11));
        let (status, body) = send(
            &app,
            Method::PUT,
            &format!("/api/permissions/{}", request.id),
            Some(json!({ "date": "2026-03-02", "start_time": "15:00", "end_time": "16:00" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(parse::<ErrorBody>(&body).code, "EDIT_WINDOW_EXPIRED");
    }

    #[tokio::test]
    async fn batch_reject_reports_per_request_outcomes() {
        let (app, _) = setup_app("2026-03-02 08:00:00");
        let (_, body) = create_permission(&app, "E1", "2026-03-09", "09:00", "10:00").await;
        let first: Request = parse(&body);
        let (_, body) = create_permission(&app, "E2", "2026-03-09", "09:00", "10:00").await;
        let second: Request = parse(&body);

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/requests/reject",
            Some(json!({ "ids": [first.id, second.id, 999], "actor_id": "MGR" })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let outcome: BatchResponse = parse(&body);
        assert_eq!(outcome.succeeded.len(), 2);
        assert!(outcome
            .succeeded
            .iter()
            .all(|r| r.status == RequestStatus::Rejected));
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].request_id, RequestId(999));
        assert_eq!(outcome.failed[0].code, "NOT_FOUND");

        let (_, body) = send(&app, Method::GET, "/api/employees/E1/requests", None).await;
        let listed: Vec<Request> = parse(&body);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].decided_by.as_deref(), Some("MGR"));
    }
}
