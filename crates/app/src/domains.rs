use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info};
use uuid::Uuid;

use registrar_core::lifecycle::nameservers_updated;
use registrar_core::types::Domain;

use crate::auth::caller_user;
use crate::listings::domain_json;
use crate::problem::ProblemResponse;
use crate::router::AppState;

/// Body carrying the full replacement nameserver set.
#[derive(Debug, Deserialize)]
pub struct NameserversBody {
    pub hosts: Vec<String>,
}

/// Replaces the nameservers for a domain the caller manages. The
/// registry state follows the host count: a populated set makes the
/// domain ready, an empty one sends it back to DNS-needed.
pub async fn update_nameservers(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<NameserversBody>,
) -> Result<Json<Value>, ProblemResponse> {
    let user = caller_user(&state, &headers).await?;

    let domain = state
        .storage()
        .domains()
        .fetch(id)
        .await
        .map_err(|err| {
            error!(stage = "domains", error = %err, "failed to load domain");
            ProblemResponse::internal("failed to load domain")
        })?
        .ok_or_else(|| ProblemResponse::not_found("no such domain"))?;

    let manages = state
        .storage()
        .domain_roles()
        .exists(user.id, domain.id)
        .await
        .map_err(|err| {
            error!(stage = "domains", error = %err, "failed to check domain role");
            ProblemResponse::internal("failed to check domain role")
        })?;
    if !manages {
        return Err(ProblemResponse::new(
            StatusCode::FORBIDDEN,
            "not_a_manager",
            "only a manager of this domain may edit its nameservers",
        ));
    }

    let next_state = nameservers_updated(domain.state, body.hosts.len()).map_err(|err| {
        ProblemResponse::new(StatusCode::CONFLICT, "invalid_domain_state", err.to_string())
    })?;

    let leased = state
        .registry()
        .acquire()
        .await
        .map_err(|err| ProblemResponse::registry_unavailable(err.to_string()))?;
    if let Err(err) = state
        .registry()
        .client()
        .update_nameservers(leased.session(), &domain.name, &body.hosts)
        .await
    {
        leased.discard();
        return Err(ProblemResponse::registry_unavailable(err.to_string()));
    }

    let storage = state.storage();
    let mut tx = storage.begin().await.map_err(|err| {
        error!(stage = "domains", error = %err, "database error");
        ProblemResponse::internal("database error")
    })?;
    storage
        .domains()
        .update_state(&mut tx, domain.id, next_state, state.now())
        .await
        .map_err(|err| {
            error!(stage = "domains", error = %err, "failed to update domain state");
            ProblemResponse::internal("failed to update domain state")
        })?;
    tx.commit().await.map_err(|err| {
        error!(stage = "domains", error = %err, "database error");
        ProblemResponse::internal("database error")
    })?;

    info!(
        stage = "domains",
        domain = %domain.name,
        hosts = body.hosts.len(),
        state = next_state.as_str(),
        "nameservers replaced"
    );
    Ok(Json(domain_json(&Domain {
        state: next_state,
        ..domain
    })))
}
