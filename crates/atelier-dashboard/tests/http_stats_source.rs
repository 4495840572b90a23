use std::sync::Arc;
use std::time::Duration;

use atelier_config::DashboardConfig;
use atelier_dashboard::{AdminDashboard, HttpStatsSource, NotificationStore, StatsSource};
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn stats_body(users: i64) -> serde_json::Value {
    json!({
        "total_users": users,
        "users_by_role": {"client": users - 1, "admin": 1},
        "total_applications": 4,
        "applications_by_status": {"new": 3, "completed": 1},
        "total_products": 2,
        "active_products": 2,
        "total_reviews": 1,
        "pending_reviews": 0,
        "generated_at": "2025-06-01T08:00:00Z"
    })
}

#[tokio::test]
async fn fetches_typed_stats_with_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/admin/stats"))
        .and(header("authorization", "Bearer admin-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(stats_body(6)))
        .expect(1)
        .mount(&server)
        .await;

    let source = HttpStatsSource::new(&format!("{}/", server.uri()), Some("admin-token".into()))
        .expect("client should build");
    let stats = source.fetch_stats().await.expect("stats should parse");

    assert_eq!(stats.total_users, 6);
    assert_eq!(stats.applications_by_status.get("new"), Some(&3));
    assert_eq!(stats.open_applications(), 3);
}

#[tokio::test]
async fn server_error_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/admin/stats"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let config = DashboardConfig {
        api_base_url: server.uri(),
        ..DashboardConfig::default()
    };
    let source = HttpStatsSource::from_config(&config).unwrap();
    let err = source.fetch_stats().await.unwrap_err();
    assert!(err.to_string().contains("stats endpoint returned error"));
}

#[tokio::test]
async fn payload_with_wrong_shape_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/admin/stats"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"users": []}})))
        .mount(&server)
        .await;

    let source = HttpStatsSource::new(&server.uri(), None).unwrap();
    let err = source.fetch_stats().await.unwrap_err();
    assert!(err.to_string().contains("invalid stats payload"));
}

#[tokio::test]
async fn dashboard_keeps_stats_when_endpoint_goes_down() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/admin/stats"))
        .respond_with(ResponseTemplate::new(200).set_body_json(stats_body(9)))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/admin/stats"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let source = Arc::new(HttpStatsSource::new(&server.uri(), None).unwrap());
    let dashboard = AdminDashboard::new(NotificationStore::new(Duration::from_secs(5), 10), source);

    dashboard.refresh_stats().await.unwrap();
    assert!(dashboard.refresh_stats().await.is_err());
    assert_eq!(dashboard.stats().unwrap().total_users, 9);
    assert!(dashboard.notifications().is_empty());
}

#[tokio::test]
async fn dashboard_from_config_polls_the_configured_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/admin/stats"))
        .and(header("authorization", "Bearer dash-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(stats_body(4)))
        .expect(1..)
        .mount(&server)
        .await;

    let config = DashboardConfig {
        api_base_url: server.uri(),
        api_token: Some("dash-token".into()),
        stats_poll_interval_secs: 60,
        ..DashboardConfig::default()
    };
    let dashboard = Arc::new(AdminDashboard::from_config(&config).unwrap());
    assert_eq!(dashboard.poll_interval(), Duration::from_secs(60));

    let poller = dashboard.spawn_stats_poller();
    for _ in 0..50 {
        if dashboard.stats().is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    poller.abort();

    assert_eq!(dashboard.stats().unwrap().total_users, 4);
}
