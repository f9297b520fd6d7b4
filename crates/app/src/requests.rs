use std::str::FromStr;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use metrics::counter;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

use registrar_core::lifecycle::{
    plan_transition, RequestAction, TransitionContext, TransitionEffect, TransitionError,
};
use registrar_core::orgtype::{self, OrgTypeFields};
use registrar_core::types::{
    DomainRequest, DomainRole, DomainState, GenericOrgType, OrganizationType,
};
use registrar_registry::{PoolError, RegistryError};
use registrar_storage::{
    DomainError, NewDomain, NewDomainRequest, RequestError, RoleError, UserError,
};

use crate::auth::caller_user;
use crate::listings::request_json;
use crate::problem::ProblemResponse;
use crate::router::AppState;

/// Body accepted when opening a domain request.
#[derive(Debug, Deserialize)]
pub struct CreateRequestBody {
    #[serde(default)]
    pub requested_domain: Option<String>,
    #[serde(default)]
    pub generic_org_type: Option<String>,
    #[serde(default)]
    pub is_election_board: Option<bool>,
    #[serde(default)]
    pub organization_type: Option<String>,
}

/// Opens a new request in the started status.
pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateRequestBody>,
) -> Result<(StatusCode, Json<Value>), ProblemResponse> {
    let user = caller_user(&state, &headers).await?;
    if user.is_restricted {
        return Err(ProblemResponse::new(
            StatusCode::FORBIDDEN,
            "restricted",
            "this account may not open domain requests",
        ));
    }

    let generic_org_type = parse_enum::<GenericOrgType>(body.generic_org_type.as_deref(), "generic_org_type")?;
    let organization_type =
        parse_enum::<OrganizationType>(body.organization_type.as_deref(), "organization_type")?;
    let mut fields = OrgTypeFields {
        generic_org_type,
        is_election_board: body.is_election_board,
        organization_type,
    };
    orgtype::synchronize(&mut fields, None).map_err(|err| {
        ProblemResponse::new(StatusCode::UNPROCESSABLE_ENTITY, "conflicting_org_type", err.to_string())
    })?;

    let id = Uuid::new_v4();
    let now = state.now();
    let storage = state.storage();
    let mut tx = storage.begin().await.map_err(internal_db)?;
    storage
        .domain_requests()
        .insert(
            &mut tx,
            &NewDomainRequest {
                id,
                creator_id: user.id,
                requested_domain: body.requested_domain.as_deref(),
                generic_org_type: fields.generic_org_type,
                is_election_board: fields.is_election_board,
                organization_type: fields.organization_type,
                created_at: now,
            },
        )
        .await
        .map_err(|err| {
            error!(stage = "lifecycle", error = %err, "failed to create domain request");
            ProblemResponse::internal("failed to create domain request")
        })?;
    tx.commit().await.map_err(internal_db)?;

    let request = fetch_request(&state, id).await?;
    info!(stage = "lifecycle", request = %id, user = %user.id, "domain request opened");
    Ok((StatusCode::CREATED, Json(request_json(&request))))
}

/// Submits the caller's request for review.
pub async fn submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ProblemResponse> {
    creator_transition(&state, &headers, id, RequestAction::Submit).await
}

/// Withdraws the caller's request.
pub async fn withdraw(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ProblemResponse> {
    creator_transition(&state, &headers, id, RequestAction::Withdraw).await
}

async fn creator_transition(
    state: &AppState,
    headers: &HeaderMap,
    id: Uuid,
    action: RequestAction,
) -> Result<Json<Value>, ProblemResponse> {
    let user = caller_user(state, headers).await?;
    let request = fetch_request(state, id).await?;
    if request.creator_id != user.id {
        return Err(ProblemResponse::new(
            StatusCode::FORBIDDEN,
            "not_the_creator",
            "only the request creator may do this",
        ));
    }

    let updated = execute_transition(state, request, action)
        .await
        .map_err(transition_problem)?;
    Ok(Json(request_json(&updated)))
}

pub(crate) async fn fetch_request(
    state: &AppState,
    id: Uuid,
) -> Result<DomainRequest, ProblemResponse> {
    state
        .storage()
        .domain_requests()
        .fetch(id)
        .await
        .map_err(|err| {
            error!(stage = "lifecycle", error = %err, "failed to load domain request");
            ProblemResponse::internal("failed to load domain request")
        })?
        .ok_or_else(|| ProblemResponse::not_found("no such domain request"))
}

fn parse_enum<T: FromStr>(
    raw: Option<&str>,
    field: &'static str,
) -> Result<Option<T>, ProblemResponse> {
    raw.map(|value| {
        T::from_str(value).map_err(|_| {
            ProblemResponse::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "invalid_value",
                format!("unsupported value for {field}: {value}"),
            )
        })
    })
    .transpose()
}

fn internal_db(err: sqlx::Error) -> ProblemResponse {
    error!(stage = "lifecycle", error = %err, "database error");
    ProblemResponse::internal("database error")
}

/// Errors raised while applying a lifecycle transition.
#[derive(Debug, Error)]
pub enum TransitionFailure {
    #[error(transparent)]
    Rule(#[from] TransitionError),
    #[error("session pool error: {0}")]
    Pool(PoolError),
    #[error("registry error: {0}")]
    Registry(RegistryError),
    #[error("user repository error: {0}")]
    User(#[from] UserError),
    #[error("domain repository error: {0}")]
    Domain(#[from] DomainError),
    #[error("role repository error: {0}")]
    Role(#[from] RoleError),
    #[error("request repository error: {0}")]
    Request(#[from] RequestError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Maps a transition failure onto the problem surface.
pub(crate) fn transition_problem(failure: TransitionFailure) -> ProblemResponse {
    match failure {
        TransitionFailure::Rule(err) => {
            let (status, problem_type) = match &err {
                TransitionError::NotPermitted { .. } => {
                    (StatusCode::CONFLICT, "transition_not_permitted")
                }
                TransitionError::MissingRequestedDomain
                | TransitionError::InvalidDomainName(_) => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "invalid_domain_name")
                }
                TransitionError::MissingInvestigator | TransitionError::InvestigatorNotStaff => {
                    (StatusCode::CONFLICT, "investigator_required")
                }
                TransitionError::DomainStillActive => (StatusCode::CONFLICT, "domain_still_active"),
                TransitionError::DomainInUse(_) => (StatusCode::CONFLICT, "domain_in_use"),
                TransitionError::CreatorRestricted => (StatusCode::FORBIDDEN, "restricted"),
            };
            ProblemResponse::new(status, problem_type, err.to_string())
        }
        TransitionFailure::Pool(err) => ProblemResponse::registry_unavailable(err.to_string()),
        TransitionFailure::Registry(err) => ProblemResponse::registry_unavailable(err.to_string()),
        other => {
            error!(stage = "lifecycle", error = %other, "transition failed");
            ProblemResponse::internal("failed to apply the transition")
        }
    }
}

/// Plans and applies one lifecycle action: resolves the guard context,
/// runs the pure state machine, then persists the status change and its
/// side effects in a single transaction. Registry calls happen before
/// the rows they describe are written.
pub(crate) async fn execute_transition(
    state: &AppState,
    mut request: DomainRequest,
    action: RequestAction,
) -> Result<DomainRequest, TransitionFailure> {
    let storage = state.storage();
    let users = storage.users();
    let domains = storage.domains();

    let investigator_is_staff = match request.investigator_id {
        Some(id) => users.fetch(id).await?.map(|user| user.is_staff),
        None => None,
    };
    let approved_domain_is_active = match request.approved_domain_id {
        Some(id) => domains
            .fetch(id)
            .await?
            .map(|domain| domain.state.is_active())
            .unwrap_or(false),
        None => false,
    };
    let creator_is_restricted = users
        .fetch(request.creator_id)
        .await?
        .map(|user| user.is_restricted)
        .unwrap_or(false);
    let requested_domain_taken = match (&action, request.requested_domain.as_deref()) {
        (RequestAction::Approve, Some(name)) => domains.live_name_exists(name).await?,
        _ => false,
    };

    let ctx = TransitionContext {
        investigator_is_staff,
        approved_domain_is_active,
        requested_domain_taken,
        creator_is_restricted,
    };
    let plan = plan_transition(&request, &action, ctx)?;

    let now = state.now();
    let mut tx = storage.begin().await?;
    request.status = plan.target;

    for effect in plan.effects {
        match effect {
            TransitionEffect::RecordSubmissionDates => {
                let today = now.date_naive();
                if request.first_submitted_date.is_none() {
                    request.first_submitted_date = Some(today);
                }
                request.last_submitted_date = Some(today);
            }
            TransitionEffect::ClearRejectionReason => request.rejection_reason = None,
            TransitionEffect::ClearActionNeededReason => request.action_needed_reason = None,
            TransitionEffect::SetRejectionReason(reason) => {
                request.rejection_reason = Some(reason);
            }
            TransitionEffect::SetActionNeededReason(reason) => {
                request.action_needed_reason = Some(reason);
            }
            TransitionEffect::ProvisionDomain { name } => {
                let leased = state
                    .registry()
                    .acquire()
                    .await
                    .map_err(TransitionFailure::Pool)?;
                let registered = match state
                    .registry()
                    .client()
                    .create_domain(leased.session(), &name)
                    .await
                {
                    Ok(domain) => domain,
                    Err(err) => {
                        leased.discard();
                        return Err(TransitionFailure::Registry(err));
                    }
                };

                let domain_id = Uuid::new_v4();
                domains
                    .insert(
                        &mut tx,
                        &NewDomain {
                            id: domain_id,
                            name: &name,
                            state: DomainState::Unknown,
                            expiration_date: registered.expiration_date,
                            created_at: now,
                        },
                    )
                    .await?;
                storage
                    .domain_roles()
                    .grant(&mut tx, request.creator_id, domain_id, DomainRole::Manager, now)
                    .await?;
                request.approved_domain_id = Some(domain_id);
            }
            TransitionEffect::TeardownApprovedDomain => {
                if let Some(domain_id) = request.approved_domain_id.take() {
                    if let Some(domain) = domains.fetch(domain_id).await? {
                        let leased = state
                            .registry()
                            .acquire()
                            .await
                            .map_err(TransitionFailure::Pool)?;
                        if let Err(err) = state
                            .registry()
                            .client()
                            .delete_domain(leased.session(), &domain.name)
                            .await
                        {
                            leased.discard();
                            return Err(TransitionFailure::Registry(err));
                        }
                        domains.delete(&mut tx, domain_id).await?;
                    }
                }
            }
            TransitionEffect::RestrictCreator => {
                users.restrict(&mut tx, request.creator_id, now).await?;
            }
        }
    }

    storage.domain_requests().update(&mut tx, &request, now).await?;
    tx.commit().await?;

    counter!("domain_request_transitions_total", "target" => request.status.as_str()).increment(1);
    info!(
        stage = "lifecycle",
        request = %request.id,
        status = %request.status,
        action = action.as_str(),
        "status change applied"
    );

    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use chrono::Utc;
    use http_body_util::BodyExt;
    use serde_json::json;
    use tower::ServiceExt;

    use registrar_core::types::{IdentityClaims, VerificationType};
    use registrar_storage::{Database, NewUser};

    use crate::auth::testing::sign;
    use crate::auth::{HEADER_IDENTITY_SIGNATURE, HEADER_IDENTITY_SUB};
    use crate::router::testing::{setup_state, TEST_SECRET};
    use crate::router::{app_router, AppState};

    async fn insert_user(db: &Database, subject: &str, restricted: bool) -> Uuid {
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
        if restricted {
            db.users()
                .restrict(&mut tx, id, Utc::now())
                .await
                .expect("restrict");
        }
        tx.commit().await.expect("commit");
        id
    }

    async fn send_json(
        state: &AppState,
        method: &str,
        uri: &str,
        subject: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let payload = body
            .map(|value| serde_json::to_vec(&value).expect("serialize body"))
            .unwrap_or_else(|| b"{}".to_vec());
        let response = app_router(state.clone())
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header("content-type", "application/json")
                    .header(HEADER_IDENTITY_SUB, subject)
                    .header(
                        HEADER_IDENTITY_SIGNATURE,
                        sign(TEST_SECRET, subject.as_bytes()),
                    )
                    .body(Body::from(payload))
                    .unwrap(),
            )
            .await
            .expect("handler should respond");

        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body should read")
            .to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn create_submit_withdraw_round_trip() {
        let state = setup_state().await;
        insert_user(state.storage(), "sub-1", false).await;

        let (status, created) = send_json(
            &state,
            "POST",
            "/api/v1/domain-requests",
            "sub-1",
            Some(json!({
                "requested_domain": "city-of-liberty.gov",
                "generic_org_type": "city",
                "is_election_board": true,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["status"], "started");
        let id = created["id"].as_str().expect("id").to_string();

        let (status, submitted) = send_json(
            &state,
            "POST",
            &format!("/api/v1/domain-requests/{id}/submit"),
            "sub-1",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(submitted["status"], "submitted");
        assert!(submitted["first_submitted_date"].is_string());
        assert_eq!(submitted["is_withdrawable"], true);

        let (status, withdrawn) = send_json(
            &state,
            "POST",
            &format!("/api/v1/domain-requests/{id}/withdraw"),
            "sub-1",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(withdrawn["status"], "withdrawn");

        // A withdrawn request can be submitted again.
        let (status, resubmitted) = send_json(
            &state,
            "POST",
            &format!("/api/v1/domain-requests/{id}/submit"),
            "sub-1",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resubmitted["status"], "submitted");
    }

    #[tokio::test]
    async fn submit_rejects_invalid_domain_names() {
        let state = setup_state().await;
        insert_user(state.storage(), "sub-1", false).await;

        let (_, created) = send_json(
            &state,
            "POST",
            "/api/v1/domain-requests",
            "sub-1",
            Some(json!({ "requested_domain": "not a domain" })),
        )
        .await;
        let id = created["id"].as_str().expect("id").to_string();

        let (status, body) = send_json(
            &state,
            "POST",
            &format!("/api/v1/domain-requests/{id}/submit"),
            "sub-1",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["type"], "invalid_domain_name");
    }

    #[tokio::test]
    async fn restricted_users_cannot_open_requests() {
        let state = setup_state().await;
        insert_user(state.storage(), "sub-1", true).await;

        let (status, body) = send_json(
            &state,
            "POST",
            "/api/v1/domain-requests",
            "sub-1",
            Some(json!({ "requested_domain": "liberty.gov" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["type"], "restricted");
    }

    #[tokio::test]
    async fn conflicting_org_type_values_are_rejected() {
        let state = setup_state().await;
        insert_user(state.storage(), "sub-1", false).await;

        let (status, body) = send_json(
            &state,
            "POST",
            "/api/v1/domain-requests",
            "sub-1",
            Some(json!({
                "requested_domain": "liberty.gov",
                "generic_org_type": "city",
                "organization_type": "county_election",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["type"], "conflicting_org_type");
    }

    #[tokio::test]
    async fn only_the_creator_may_submit() {
        let state = setup_state().await;
        insert_user(state.storage(), "sub-1", false).await;
        insert_user(state.storage(), "sub-2", false).await;

        let (_, created) = send_json(
            &state,
            "POST",
            "/api/v1/domain-requests",
            "sub-1",
            Some(json!({ "requested_domain": "liberty.gov" })),
        )
        .await;
        let id = created["id"].as_str().expect("id").to_string();

        let (status, body) = send_json(
            &state,
            "POST",
            &format!("/api/v1/domain-requests/{id}/submit"),
            "sub-2",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["type"], "not_the_creator");
    }
}
