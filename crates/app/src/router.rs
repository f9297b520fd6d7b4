use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;

use registrar_registry::SessionPool;
use registrar_storage::Database;
use registrar_util::AdminRoster;

use crate::{admin, domains, listings, profile, reports, requests, telemetry};

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    storage: Database,
    secret: Arc<[u8]>,
    roster: AdminRoster,
    registry: SessionPool,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl AppState {
    pub fn new(
        metrics: PrometheusHandle,
        storage: Database,
        secret: Arc<[u8]>,
        roster: AdminRoster,
        registry: SessionPool,
    ) -> Self {
        Self {
            metrics,
            storage,
            secret,
            roster,
            registry,
            clock: Arc::new(Utc::now),
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn storage(&self) -> &Database {
        &self.storage
    }

    pub fn secret(&self) -> Arc<[u8]> {
        self.secret.clone()
    }

    pub fn roster(&self) -> &AdminRoster {
        &self.roster
    }

    pub fn registry(&self) -> &SessionPool {
        &self.registry
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/api/v1/login", post(profile::login))
        .route("/api/v1/domains", get(listings::domains))
        .route(
            "/api/v1/domains/:id/nameservers",
            post(domains::update_nameservers),
        )
        .route(
            "/api/v1/domain-requests",
            get(listings::domain_requests).post(requests::create),
        )
        .route("/api/v1/domain-requests/:id/submit", post(requests::submit))
        .route(
            "/api/v1/domain-requests/:id/withdraw",
            post(requests::withdraw),
        )
        .route("/admin/domain-requests", get(admin::list_requests))
        .route(
            "/admin/domain-requests/:id/investigator",
            post(admin::assign_investigator),
        )
        .route("/admin/domain-requests/:id/in-review", post(admin::in_review))
        .route(
            "/admin/domain-requests/:id/action-needed",
            post(admin::action_needed),
        )
        .route("/admin/domain-requests/:id/approve", post(admin::approve))
        .route("/admin/domain-requests/:id/reject", post(admin::reject))
        .route(
            "/admin/domain-requests/:id/reject-with-prejudice",
            post(admin::reject_with_prejudice),
        )
        .route("/admin/domains/:id/hold", post(admin::hold))
        .route("/admin/domains/:id/unhold", post(admin::unhold))
        .route("/admin/domains/:id/delete", post(admin::delete))
        .route("/reports/domain-growth.csv", get(reports::domain_growth))
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = telemetry::render_metrics(state.metrics());
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
        .body(Body::from(body))
        .unwrap()
}


#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    #[tokio::test]
    async fn healthz_returns_ok() {
        let app = app_router(testing::setup_state().await);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_exports_build_info() {
        let app = app_router(testing::setup_state().await);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::OK);
        let collected = response
            .into_body()
            .collect()
            .await
            .expect("body should read");
        let body = String::from_utf8(collected.to_bytes().to_vec()).expect("utf-8");
        assert!(body.contains("app_build_info"));
        assert!(body.contains("app_uptime_seconds"));
    }

    #[tokio::test]
    async fn unauthenticated_listing_is_rejected() {
        let app = app_router(testing::setup_state().await);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/domains")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
