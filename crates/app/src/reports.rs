use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::Response,
};
use tracing::error;

use registrar_core::types::Domain;

use crate::auth::admin_caller;
use crate::problem::ProblemResponse;
use crate::router::AppState;

/// Domain growth report: one CSV row per domain ever registered,
/// including deleted ones. Analysts may download it.
pub async fn domain_growth(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ProblemResponse> {
    admin_caller(&state, &headers, false)?;

    let domains = state.storage().domains().list_all().await.map_err(|err| {
        error!(stage = "reports", error = %err, "failed to load domains for report");
        ProblemResponse::internal("failed to build the report")
    })?;

    let csv = render_domain_growth(&domains);
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/csv")
        .header(
            header::CONTENT_DISPOSITION,
            "attachment; filename=\"domain-growth.csv\"",
        )
        .body(Body::from(csv))
        .unwrap())
}

fn render_domain_growth(domains: &[Domain]) -> String {
    let mut out = String::from("Domain name,State,Expiration date,First ready,Created at\n");
    for domain in domains {
        let expiration = domain
            .expiration_date
            .map(|date| date.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        let first_ready = domain
            .first_ready_at
            .map(|at| at.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        out.push_str(&format!(
            "{},{},{},{},{}\n",
            domain.name,
            domain.state.display(),
            expiration,
            first_ready,
            domain.created_at.format("%Y-%m-%d"),
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use chrono::{NaiveDate, TimeZone, Utc};
    use http_body_util::BodyExt;
    use tower::ServiceExt;
    use uuid::Uuid;

    use registrar_core::types::DomainState;
    use registrar_storage::NewDomain;
    use registrar_util::AdminRoster;

    use crate::auth::testing::sign;
    use crate::auth::{HEADER_IDENTITY_SIGNATURE, HEADER_IDENTITY_SUB};
    use crate::router::testing::{state_with_registry, TEST_SECRET};
    use crate::router::app_router;

    #[test]
    fn report_rows_carry_the_expected_columns() {
        let created = Utc.with_ymd_and_hms(2025, 7, 1, 12, 0, 0).unwrap();
        let domains = vec![Domain {
            id: Uuid::new_v4(),
            name: "liberty.gov".to_string(),
            state: DomainState::Ready,
            expiration_date: NaiveDate::from_ymd_opt(2027, 8, 6),
            first_ready_at: Some(created),
            created_at: created,
            updated_at: created,
        }];

        let csv = render_domain_growth(&domains);
        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some("Domain name,State,Expiration date,First ready,Created at")
        );
        assert_eq!(
            lines.next(),
            Some("liberty.gov,Ready,2027-08-06,2025-07-01,2025-07-01")
        );
    }

    #[tokio::test]
    async fn report_download_is_gated_and_typed() {
        let roster = AdminRoster::new(Vec::new(), vec!["analyst-1".to_string()]);
        let state = state_with_registry("http://127.0.0.1:9/registry/", roster).await;

        let mut tx = state.storage().begin().await.expect("begin");
        state
            .storage()
            .domains()
            .insert(
                &mut tx,
                &NewDomain {
                    id: Uuid::new_v4(),
                    name: "liberty.gov",
                    state: DomainState::Ready,
                    expiration_date: None,
                    created_at: Utc::now(),
                },
            )
            .await
            .expect("insert domain");
        tx.commit().await.expect("commit");

        let request = |subject: &str| {
            Request::builder()
                .uri("/reports/domain-growth.csv")
                .header(HEADER_IDENTITY_SUB, subject)
                .header(
                    HEADER_IDENTITY_SIGNATURE,
                    sign(TEST_SECRET, subject.as_bytes()),
                )
                .body(Body::empty())
                .unwrap()
        };

        let response = app_router(state.clone())
            .oneshot(request("nobody"))
            .await
            .expect("handler should respond");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app_router(state)
            .oneshot(request("analyst-1"))
            .await
            .expect("handler should respond");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok()),
            Some("text/csv")
        );
        let body = response
            .into_body()
            .collect()
            .await
            .expect("body should read")
            .to_bytes();
        let text = String::from_utf8(body.to_vec()).expect("utf-8");
        assert!(text.starts_with("Domain name,State,"));
        assert!(text.contains("liberty.gov,Ready"));
    }
}
