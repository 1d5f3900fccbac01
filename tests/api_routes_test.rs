use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use retrovue_runtime::clock::SystemClock;
use retrovue_runtime::config::{Config, DatabaseConfig};
use retrovue_runtime::database::Database;
use retrovue_runtime::director::StaticDirector;
use retrovue_runtime::metrics::RuntimeMetrics;
use retrovue_runtime::orchestrator::TimerMode;
use retrovue_runtime::registry::SessionRegistry;
use retrovue_runtime::schedule::SqlGridProvider;
use retrovue_runtime::web::{router_for_test, AppState, ProducerBackend};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

/// Builds an `AppState` against a fresh in-memory database with one seeded
/// channel, and the in-memory mock producer backend. No HTTP listener is
/// bound; the router is driven directly with `tower::ServiceExt::oneshot`.
async fn test_state() -> (AppState, Uuid) {
    let database = Database::new(&DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        max_connections: None,
    })
    .await
    .expect("open in-memory database");
    database.migrate().await.expect("apply migrations");

    let channel_id = Uuid::new_v4();
    let plan_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO channels (id, name, grid_block_minutes, grid_offset_minutes, broadcast_day_start) \
         VALUES (?, ?, 30, 0, '00:00')",
    )
    .bind(channel_id.to_string())
    .bind("Test Channel")
    .execute(database.pool())
    .await
    .expect("seed channel row");

    sqlx::query("INSERT INTO plans (id, channel_id, name, priority, is_active) VALUES (?, ?, 'Default', 0, 1)")
        .bind(plan_id.to_string())
        .bind(channel_id.to_string())
        .execute(database.pool())
        .await
        .expect("seed plan row");

    // Spans the whole broadcast day so the seeded channel always has a
    // current program regardless of wall-clock time.
    sqlx::query(
        "INSERT INTO programs (id, plan_id, start_time, duration_min, content_type, content_ref) \
         VALUES (?, ?, '00:00', 1440, 'content', 'all-day.mov')",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(plan_id.to_string())
    .execute(database.pool())
    .await
    .expect("seed program row");

    let database = Arc::new(database);
    let clock = Arc::new(SystemClock::new());
    let schedule_provider = Arc::new(SqlGridProvider::new((*database).clone()));
    let director = Arc::new(StaticDirector::new());
    let metrics = Arc::new(RuntimeMetrics::new());
    let config = Config::default();

    let registry = Arc::new(SessionRegistry::new(
        clock,
        schedule_provider,
        director,
        config.scheduling.clone(),
        config.router.queue_depth,
        TimerMode::Spawned,
        Arc::clone(&metrics),
    ));

    let state = AppState {
        database,
        registry,
        metrics,
        producer_backend: ProducerBackend::Mock,
        base_url: "http://localhost:8080".to_string(),
    };
    (state, channel_id)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_check_reports_ok() {
    let (state, _) = test_state().await;
    let app = router_for_test(state);

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn liveness_check_is_always_ok() {
    let (state, _) = test_state().await;
    let app = router_for_test(state);

    let response = app
        .oneshot(Request::builder().uri("/live").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn readiness_check_round_trips_the_database() {
    let (state, _) = test_state().await;
    let app = router_for_test(state);

    let response = app
        .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["ready"], true);
}

#[tokio::test]
async fn channel_list_m3u_contains_the_seeded_channel() {
    let (state, channel_id) = test_state().await;
    let app = router_for_test(state);

    let response = app
        .oneshot(Request::builder().uri("/channellist.m3u").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(axum::http::header::CONTENT_TYPE).unwrap(),
        "application/vnd.apple.mpegurl"
    );
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(body.starts_with("#EXTM3U\n"));
    assert!(body.contains(&format!("/channel/{channel_id}.ts")));
}

#[tokio::test]
async fn list_channels_json_reports_the_seeded_channel_as_not_live() {
    let (state, channel_id) = test_state().await;
    let app = router_for_test(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/channels")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let channels = json["channels"].as_array().unwrap();
    assert_eq!(channels.len(), 1);
    assert_eq!(channels[0]["id"], channel_id.to_string());
    assert_eq!(channels[0]["live"], false);
    assert_eq!(channels[0]["viewer_count"], 0);
    assert_eq!(json["metrics"]["switches_issued"], 0);
}

#[tokio::test]
async fn stream_channel_rejects_an_unknown_channel_file() {
    let (state, _) = test_state().await;
    let app = router_for_test(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/channel/{}.ts", Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    // The channel id is well-formed but has no seeded row, so there is no
    // schedule data and the producer never starts.
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn stream_channel_rejects_a_malformed_channel_file() {
    let (state, _) = test_state().await;
    let app = router_for_test(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/channel/not-a-uuid.ts")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn stream_channel_starts_a_session_for_a_seeded_channel() {
    let (state, channel_id) = test_state().await;
    let app = router_for_test(state.clone());

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/channel/{channel_id}.ts"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(axum::http::header::CONTENT_TYPE).unwrap(),
        "video/mp2t"
    );
    assert_eq!(
        response.headers().get(axum::http::header::CACHE_CONTROL).unwrap(),
        "no-cache, no-store, must-revalidate"
    );

    let session = state.registry.get(channel_id).await.expect("session created on demand");
    assert_eq!(session.channel_id(), channel_id);
}
