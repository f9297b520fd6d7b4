use std::str::FromStr;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use metrics::counter;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info};
use uuid::Uuid;

use registrar_core::lifecycle::{self, DomainStateError, RequestAction};
use registrar_core::types::{ActionNeededReason, Domain, DomainRequestStatus, RejectionReason};
use registrar_storage::{RequestListParams, SortOrder};

use crate::auth::admin_caller;
use crate::listings::{domain_json, parse_request_sort, request_json};
use crate::problem::ProblemResponse;
use crate::requests::{execute_transition, fetch_request, transition_problem};
use crate::router::AppState;

/// Query string for the admin request listing.
#[derive(Debug, Deserialize)]
pub struct AdminListQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub per_page: Option<u32>,
    #[serde(default)]
    pub sort_by: Option<String>,
    #[serde(default)]
    pub order: Option<String>,
}

/// Lists every domain request, with per-status totals. Analysts may
/// read this view.
pub async fn list_requests(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AdminListQuery>,
) -> Result<Json<Value>, ProblemResponse> {
    let (_, role) = admin_caller(&state, &headers, false)?;

    let status = query
        .status
        .as_deref()
        .map(|value| {
            DomainRequestStatus::from_str(value).map_err(|_| {
                ProblemResponse::new(
                    StatusCode::BAD_REQUEST,
                    "invalid_status",
                    format!("unsupported status filter: {value}"),
                )
            })
        })
        .transpose()?;
    let order = match query.order.as_deref() {
        None | Some("asc") => SortOrder::Ascending,
        Some("desc") => SortOrder::Descending,
        Some(other) => {
            return Err(ProblemResponse::new(
                StatusCode::BAD_REQUEST,
                "invalid_order",
                format!("order must be 'asc' or 'desc' (got {other})"),
            ))
        }
    };
    let params = RequestListParams {
        sort: parse_request_sort(query.sort_by.as_deref())?,
        order,
        page: query.page.unwrap_or(1).max(1),
        per_page: query.per_page.unwrap_or(10).clamp(1, 100),
    };

    let repo = state.storage().domain_requests();
    let page = repo.list_all(status, &params).await.map_err(|err| {
        error!(stage = "admin", error = %err, "failed to list domain requests");
        ProblemResponse::internal("failed to list domain requests")
    })?;
    let counts = repo.count_by_status().await.map_err(|err| {
        error!(stage = "admin", error = %err, "failed to count domain requests");
        ProblemResponse::internal("failed to count domain requests")
    })?;
    counter!("api_list_requests_total", "kind" => "admin_requests").increment(1);

    let rows: Vec<Value> = page.rows.iter().map(request_json).collect();
    let status_counts: Vec<Value> = counts
        .iter()
        .map(|entry| json!({ "status": entry.status, "count": entry.count }))
        .collect();
    Ok(Json(json!({
        "domain_requests": rows,
        "status_counts": status_counts,
        "viewer_role": role.as_str(),
        "page": page.page,
        "num_pages": page.num_pages,
        "has_previous": page.has_previous(),
        "has_next": page.has_next(),
        "total": page.total,
    })))
}

/// Body for assigning an investigator.
#[derive(Debug, Deserialize)]
pub struct AssignInvestigatorBody {
    pub investigator_id: Option<Uuid>,
}

/// Assigns (or clears) the investigator on a request.
pub async fn assign_investigator(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<AssignInvestigatorBody>,
) -> Result<Json<Value>, ProblemResponse> {
    admin_caller(&state, &headers, true)?;
    let request = fetch_request(&state, id).await?;

    if let Some(investigator_id) = body.investigator_id {
        let exists = state
            .storage()
            .users()
            .fetch(investigator_id)
            .await
            .map_err(|err| {
                error!(stage = "admin", error = %err, "failed to load investigator");
                ProblemResponse::internal("failed to load investigator")
            })?
            .is_some();
        if !exists {
            return Err(ProblemResponse::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "unknown_investigator",
                "no user exists with that id",
            ));
        }
    }

    let storage = state.storage();
    let mut tx = storage.begin().await.map_err(|err| {
        error!(stage = "admin", error = %err, "database error");
        ProblemResponse::internal("database error")
    })?;
    storage
        .domain_requests()
        .assign_investigator(&mut tx, request.id, body.investigator_id, state.now())
        .await
        .map_err(|err| {
            error!(stage = "admin", error = %err, "failed to assign investigator");
            ProblemResponse::internal("failed to assign investigator")
        })?;
    tx.commit().await.map_err(|err| {
        error!(stage = "admin", error = %err, "database error");
        ProblemResponse::internal("database error")
    })?;

    let updated = fetch_request(&state, id).await?;
    Ok(Json(request_json(&updated)))
}

/// Moves a request into review.
pub async fn in_review(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ProblemResponse> {
    admin_transition(&state, &headers, id, RequestAction::InReview).await
}

/// Body carrying the action-needed reason.
#[derive(Debug, Deserialize)]
pub struct ActionNeededBody {
    pub reason: String,
}

/// Sends a request back to the applicant.
pub async fn action_needed(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<ActionNeededBody>,
) -> Result<Json<Value>, ProblemResponse> {
    let reason = ActionNeededReason::from_str(&body.reason).map_err(|_| {
        ProblemResponse::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "invalid_reason",
            format!("unsupported action-needed reason: {}", body.reason),
        )
    })?;
    admin_transition(&state, &headers, id, RequestAction::ActionNeeded(reason)).await
}

/// Approves a request, provisioning its domain.
pub async fn approve(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ProblemResponse> {
    admin_transition(&state, &headers, id, RequestAction::Approve).await
}

/// Body carrying the rejection reason.
#[derive(Debug, Deserialize)]
pub struct RejectBody {
    pub reason: String,
}

/// Rejects a request.
pub async fn reject(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<RejectBody>,
) -> Result<Json<Value>, ProblemResponse> {
    let reason = RejectionReason::from_str(&body.reason).map_err(|_| {
        ProblemResponse::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "invalid_reason",
            format!("unsupported rejection reason: {}", body.reason),
        )
    })?;
    admin_transition(&state, &headers, id, RequestAction::Reject(reason)).await
}

/// Marks the applicant ineligible and restricts their account.
pub async fn reject_with_prejudice(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ProblemResponse> {
    admin_transition(&state, &headers, id, RequestAction::RejectWithPrejudice).await
}

async fn admin_transition(
    state: &AppState,
    headers: &HeaderMap,
    id: Uuid,
    action: RequestAction,
) -> Result<Json<Value>, ProblemResponse> {
    let (subject, _) = admin_caller(state, headers, true)?;
    let request = fetch_request(state, id).await?;

    let updated = execute_transition(state, request, action)
        .await
        .map_err(transition_problem)?;
    info!(stage = "admin", request = %id, admin = %subject, status = %updated.status, "admin transition applied");
    Ok(Json(request_json(&updated)))
}

/// Places a client hold on a domain.
pub async fn hold(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ProblemResponse> {
    domain_operation(&state, &headers, id, DomainOperation::Hold).await
}

/// Releases a client hold.
pub async fn unhold(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ProblemResponse> {
    domain_operation(&state, &headers, id, DomainOperation::Unhold).await
}

/// Removes a domain from the registry; the row is kept in the deleted
/// state for the record.
pub async fn delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ProblemResponse> {
    domain_operation(&state, &headers, id, DomainOperation::Delete).await
}

#[derive(Debug, Clone, Copy)]
enum DomainOperation {
    Hold,
    Unhold,
    Delete,
}

async fn domain_operation(
    state: &AppState,
    headers: &HeaderMap,
    id: Uuid,
    operation: DomainOperation,
) -> Result<Json<Value>, ProblemResponse> {
    let (subject, _) = admin_caller(state, headers, true)?;

    let domain: Domain = state
        .storage()
        .domains()
        .fetch(id)
        .await
        .map_err(|err| {
            error!(stage = "admin", error = %err, "failed to load domain");
            ProblemResponse::internal("failed to load domain")
        })?
        .ok_or_else(|| ProblemResponse::not_found("no such domain"))?;

    let next_state = match operation {
        DomainOperation::Hold => lifecycle::place_client_hold(domain.state),
        DomainOperation::Unhold => lifecycle::revert_client_hold(domain.state),
        DomainOperation::Delete => lifecycle::delete_domain(domain.state),
    }
    .map_err(|err: DomainStateError| {
        ProblemResponse::new(StatusCode::CONFLICT, "invalid_domain_state", err.to_string())
    })?;

    let leased = state
        .registry()
        .acquire()
        .await
        .map_err(|err| ProblemResponse::registry_unavailable(err.to_string()))?;
    let client = state.registry().client();
    let call = match operation {
        DomainOperation::Hold => client.place_client_hold(leased.session(), &domain.name).await,
        DomainOperation::Unhold => {
            client
                .remove_client_hold(leased.session(), &domain.name)
                .await
        }
        DomainOperation::Delete => client.delete_domain(leased.session(), &domain.name).await,
    };
    if let Err(err) = call {
        leased.discard();
        return Err(ProblemResponse::registry_unavailable(err.to_string()));
    }

    let storage = state.storage();
    let mut tx = storage.begin().await.map_err(|err| {
        error!(stage = "admin", error = %err, "database error");
        ProblemResponse::internal("database error")
    })?;
    storage
        .domains()
        .update_state(&mut tx, domain.id, next_state, state.now())
        .await
        .map_err(|err| {
            error!(stage = "admin", error = %err, "failed to update domain state");
            ProblemResponse::internal("failed to update domain state")
        })?;
    tx.commit().await.map_err(|err| {
        error!(stage = "admin", error = %err, "database error");
        ProblemResponse::internal("database error")
    })?;

    let updated = Domain {
        state: next_state,
        ..domain
    };
    info!(
        stage = "admin",
        domain = %updated.name,
        state = next_state.as_str(),
        admin = %subject,
        "registry state changed"
    );
    Ok(Json(domain_json(&updated)))
}
