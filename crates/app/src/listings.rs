use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use metrics::counter;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::error;

use registrar_core::types::{Domain, DomainRequest, DomainRequestStatus};
use registrar_storage::{
    DomainListParams, DomainSortKey, RequestListParams, RequestSortKey, SortOrder,
};

use crate::auth::caller_user;
use crate::problem::ProblemResponse;
use crate::router::AppState;

const DEFAULT_PER_PAGE: u32 = 10;
const MAX_PER_PAGE: u32 = 100;

/// Query string shared by the listing endpoints.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub per_page: Option<u32>,
    #[serde(default)]
    pub sort_by: Option<String>,
    #[serde(default)]
    pub order: Option<String>,
}

impl ListQuery {
    fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    fn per_page(&self) -> u32 {
        self.per_page
            .unwrap_or(DEFAULT_PER_PAGE)
            .clamp(1, MAX_PER_PAGE)
    }
}

fn parse_order(raw: Option<&str>) -> Result<SortOrder, ProblemResponse> {
    match raw {
        None | Some("asc") => Ok(SortOrder::Ascending),
        Some("desc") => Ok(SortOrder::Descending),
        Some(other) => Err(ProblemResponse::new(
            StatusCode::BAD_REQUEST,
            "invalid_order",
            format!("order must be 'asc' or 'desc' (got {other})"),
        )),
    }
}

fn parse_domain_sort(raw: Option<&str>) -> Result<DomainSortKey, ProblemResponse> {
    match raw {
        None | Some("name") => Ok(DomainSortKey::Name),
        Some("state") => Ok(DomainSortKey::State),
        Some("expiration_date") => Ok(DomainSortKey::ExpirationDate),
        Some("created_at") => Ok(DomainSortKey::CreatedAt),
        Some(other) => Err(ProblemResponse::new(
            StatusCode::BAD_REQUEST,
            "invalid_sort",
            format!("unsupported sort key: {other}"),
        )),
    }
}

pub(crate) fn parse_request_sort(raw: Option<&str>) -> Result<RequestSortKey, ProblemResponse> {
    match raw {
        None | Some("created_at") => Ok(RequestSortKey::CreatedAt),
        Some("requested_domain") => Ok(RequestSortKey::RequestedDomain),
        Some("status") => Ok(RequestSortKey::Status),
        Some("last_submitted_date") => Ok(RequestSortKey::LastSubmittedDate),
        Some(other) => Err(ProblemResponse::new(
            StatusCode::BAD_REQUEST,
            "invalid_sort",
            format!("unsupported sort key: {other}"),
        )),
    }
}

/// Lists the caller's domains with the pagination envelope the portal
/// tables consume.
pub async fn domains(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ProblemResponse> {
    let user = caller_user(&state, &headers).await?;
    let params = DomainListParams {
        sort: parse_domain_sort(query.sort_by.as_deref())?,
        order: parse_order(query.order.as_deref())?,
        page: query.page(),
        per_page: query.per_page(),
    };

    let page = state
        .storage()
        .domains()
        .list_for_user(user.id, &params)
        .await
        .map_err(|err| {
            error!(stage = "listings", error = %err, "failed to list domains");
            ProblemResponse::internal("failed to list domains")
        })?;
    counter!("api_list_requests_total", "kind" => "domains").increment(1);

    let rows: Vec<Value> = page.rows.iter().map(domain_json).collect();
    Ok(Json(json!({
        "domains": rows,
        "page": page.page,
        "num_pages": page.num_pages,
        "has_previous": page.has_previous(),
        "has_next": page.has_next(),
        "total": page.total,
    })))
}

/// Lists the caller's domain requests.
pub async fn domain_requests(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ProblemResponse> {
    let user = caller_user(&state, &headers).await?;
    let params = RequestListParams {
        sort: parse_request_sort(query.sort_by.as_deref())?,
        order: parse_order(query.order.as_deref())?,
        page: query.page(),
        per_page: query.per_page(),
    };

    let page = state
        .storage()
        .domain_requests()
        .list_for_creator(user.id, &params)
        .await
        .map_err(|err| {
            error!(stage = "listings", error = %err, "failed to list domain requests");
            ProblemResponse::internal("failed to list domain requests")
        })?;
    counter!("api_list_requests_total", "kind" => "domain_requests").increment(1);

    let rows: Vec<Value> = page.rows.iter().map(request_json).collect();
    Ok(Json(json!({
        "domain_requests": rows,
        "page": page.page,
        "num_pages": page.num_pages,
        "has_previous": page.has_previous(),
        "has_next": page.has_next(),
        "total": page.total,
    })))
}

pub(crate) fn domain_json(domain: &Domain) -> Value {
    let view_only = domain.state.is_view_only();
    json!({
        "id": domain.id,
        "name": domain.name,
        "expiration_date": domain.expiration_date,
        "state": domain.state.as_str(),
        "state_display": domain.state.display(),
        "state_help_text": domain.state.help_text(),
        "action_url": format!("/domain/{}", domain.id),
        "action_label": if view_only { "View" } else { "Manage" },
        "svg_icon": if view_only { "visibility" } else { "settings" },
    })
}

pub(crate) fn request_json(request: &DomainRequest) -> Value {
    let action_label = match request.status {
        DomainRequestStatus::Started | DomainRequestStatus::ActionNeeded => "Edit",
        DomainRequestStatus::Submitted | DomainRequestStatus::InReview => "Manage",
        _ => "View",
    };
    json!({
        "id": request.id,
        "requested_domain": request.requested_domain,
        "status": request.status.as_str(),
        "status_display": request.status.display(),
        "created_at": request.created_at,
        "first_submitted_date": request.first_submitted_date,
        "last_submitted_date": request.last_submitted_date,
        "is_withdrawable": request.is_withdrawable(),
        "action_url": format!("/domain-request/{}", request.id),
        "action_label": action_label,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use chrono::Utc;
    use http_body_util::BodyExt;
    use tower::ServiceExt;
    use uuid::Uuid;

    use registrar_core::types::{DomainRole, DomainState, IdentityClaims, VerificationType};
    use registrar_storage::{Database, NewDomain, NewUser};

    use crate::auth::testing::sign;
    use crate::auth::{HEADER_IDENTITY_SIGNATURE, HEADER_IDENTITY_SUB};
    use crate::router::testing::{setup_state, TEST_SECRET};
    use crate::router::{app_router, AppState};

    fn signed_get(uri: &str, subject: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(HEADER_IDENTITY_SUB, subject)
            .header(HEADER_IDENTITY_SIGNATURE, sign(TEST_SECRET, subject.as_bytes()))
            .body(Body::empty())
            .unwrap()
    }

    async fn insert_user(db: &Database, subject: &str) -> Uuid {
        let id = Uuid::new_v4();
        let claims = IdentityClaims {
            subject: subject.to_string(),
            email: format!("{subject}@example.gov"),
            given_name: "First".to_string(),
            family_name: "Last".to_string(),
            phone: None,
        };
        let mut tx = db.begin().await.expect("begin");
        db.users()
            .insert(
                &mut tx,
                &NewUser {
                    id,
                    claims: &claims,
                    verification_type: VerificationType::Regular,
                    created_at: Utc::now(),
                },
            )
            .await
            .expect("insert user");
        tx.commit().await.expect("commit");
        id
    }

    async fn insert_owned_domain(db: &Database, user_id: Uuid, name: &str, state: DomainState) {
        let domain_id = Uuid::new_v4();
        let mut tx = db.begin().await.expect("begin");
        db.domains()
            .insert(
                &mut tx,
                &NewDomain {
                    id: domain_id,
                    name,
                    state,
                    expiration_date: None,
                    created_at: Utc::now(),
                },
            )
            .await
            .expect("insert domain");
        db.domain_roles()
            .grant(&mut tx, user_id, domain_id, DomainRole::Manager, Utc::now())
            .await
            .expect("grant role");
        tx.commit().await.expect("commit");
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body should read")
            .to_bytes();
        serde_json::from_slice(&bytes).expect("json body")
    }

    async fn get_json(state: &AppState, uri: &str, subject: &str) -> (StatusCode, Value) {
        let response = app_router(state.clone())
            .oneshot(signed_get(uri, subject))
            .await
            .expect("handler should respond");
        let status = response.status();
        (status, body_json(response).await)
    }

    #[tokio::test]
    async fn domain_listing_pages_and_flags_view_only_rows() {
        let state = setup_state().await;
        let user_id = insert_user(state.storage(), "sub-1").await;
        insert_owned_domain(state.storage(), user_id, "alpha.gov", DomainState::Ready).await;
        insert_owned_domain(state.storage(), user_id, "bravo.gov", DomainState::OnHold).await;
        insert_owned_domain(state.storage(), user_id, "charlie.gov", DomainState::Ready).await;

        let (status, body) =
            get_json(&state, "/api/v1/domains?per_page=2&sort_by=name", "sub-1").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 3);
        assert_eq!(body["num_pages"], 2);
        assert_eq!(body["has_next"], true);
        assert_eq!(body["has_previous"], false);
        let rows = body["domains"].as_array().expect("rows");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["name"], "alpha.gov");
        assert_eq!(rows[0]["action_label"], "Manage");
        assert_eq!(rows[0]["svg_icon"], "settings");
        assert_eq!(rows[1]["name"], "bravo.gov");
        assert_eq!(rows[1]["action_label"], "View");
        assert_eq!(rows[1]["svg_icon"], "visibility");
    }

    #[tokio::test]
    async fn domain_listing_rejects_unknown_sort_keys() {
        let state = setup_state().await;
        insert_user(state.storage(), "sub-1").await;

        let (status, body) = get_json(&state, "/api/v1/domains?sort_by=rowid", "sub-1").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["type"], "invalid_sort");
    }

    #[tokio::test]
    async fn request_listing_shows_only_the_callers_requests() {
        let state = setup_state().await;
        let mine = insert_user(state.storage(), "sub-1").await;
        let other = insert_user(state.storage(), "sub-2").await;

        let mut tx = state.storage().begin().await.expect("begin");
        for (creator, name) in [(mine, "mine.gov"), (other, "other.gov")] {
            state
                .storage()
                .domain_requests()
                .insert(
                    &mut tx,
                    &registrar_storage::NewDomainRequest {
                        id: Uuid::new_v4(),
                        creator_id: creator,
                        requested_domain: Some(name),
                        generic_org_type: None,
                        is_election_board: None,
                        organization_type: None,
                        created_at: Utc::now(),
                    },
                )
                .await
                .expect("insert request");
        }
        tx.commit().await.expect("commit");

        let (status, body) = get_json(&state, "/api/v1/domain-requests", "sub-1").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 1);
        let rows = body["domain_requests"].as_array().expect("rows");
        assert_eq!(rows[0]["requested_domain"], "mine.gov");
        assert_eq!(rows[0]["status"], "started");
        assert_eq!(rows[0]["action_label"], "Edit");
        assert_eq!(rows[0]["is_withdrawable"], false);
    }
}
