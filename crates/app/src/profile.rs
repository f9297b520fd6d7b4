use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use metrics::counter;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use registrar_core::reconcile::{LoginKind, ReconcileAction, Reconciliation};
use registrar_core::types::{Contact, IdentityClaims, User, VerificationType};
use registrar_storage::{ContactError, NewContact, NewUser, UserError};

use crate::auth::{verify_signature, HEADER_IDENTITY_SIGNATURE};
use crate::problem::ProblemResponse;
use crate::router::AppState;

/// Response returned after a successful login.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user: User,
    pub contact: Contact,
    pub created: bool,
}

/// Accepts verified identity-provider claims, upserts the user and
/// reconciles the contact table.
///
/// The body is the claims JSON; the fronting proxy signs it into the
/// `X-Identity-Signature` header after completing the login flow.
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<LoginResponse>, ProblemResponse> {
    let signature = headers
        .get(HEADER_IDENTITY_SIGNATURE)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            ProblemResponse::new(
                StatusCode::UNAUTHORIZED,
                "missing_signature",
                "X-Identity-Signature header is required",
            )
        })?;

    if let Err(err) = verify_signature(&state.secret(), &body, signature) {
        counter!("login_total", "result" => "invalid_signature").increment(1);
        return Err(ProblemResponse::new(
            StatusCode::UNAUTHORIZED,
            "invalid_signature",
            err,
        ));
    }

    let claims: IdentityClaims = serde_json::from_slice(&body).map_err(|err| {
        ProblemResponse::new(
            StatusCode::BAD_REQUEST,
            "invalid_claims",
            format!("failed to parse claims: {err}"),
        )
    })?;
    if claims.subject.is_empty() || claims.email.is_empty() {
        return Err(ProblemResponse::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "invalid_claims",
            "subject and email claims must be present",
        ));
    }

    let outcome = sync_login(&state, &claims).await.map_err(|err| {
        counter!("login_total", "result" => "error").increment(1);
        error!(stage = "profile", error = %err, "login synchronization failed");
        ProblemResponse::internal("failed to synchronize the user profile")
    })?;

    let result = if outcome.created { "created" } else { "updated" };
    counter!("login_total", "result" => result).increment(1);
    info!(
        stage = "profile",
        user = %outcome.user.id,
        contact = outcome.contact.id,
        result,
        "login processed"
    );

    Ok(Json(outcome))
}

/// Errors raised while synchronizing a login.
#[derive(Debug, Error)]
pub enum LoginError {
    #[error("user repository error: {0}")]
    User(#[from] UserError),
    #[error("contact repository error: {0}")]
    Contact(#[from] ContactError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("record vanished mid-login: {0}")]
    Vanished(&'static str),
}

/// Upserts the user from the claims and applies the reconciliation rule
/// inside one transaction.
async fn sync_login(state: &AppState, claims: &IdentityClaims) -> Result<LoginResponse, LoginError> {
    let storage = state.storage();
    let users = storage.users();
    let contacts = storage.contacts();
    let now = state.now();

    let existing = users.fetch_by_subject(&claims.subject).await?;
    let kind = if existing.is_some() {
        LoginKind::ReturningLogin
    } else {
        LoginKind::FirstLogin
    };

    let candidates = match &existing {
        None => contacts.find_by_email(&claims.email).await?,
        Some(user) => contacts
            .fetch_for_user(user.id)
            .await?
            .into_iter()
            .collect(),
    };
    let outcome = Reconciliation::evaluate(kind, claims, &candidates);
    if let Some(warning) = &outcome.warning {
        counter!("contact_duplicate_matches_total").increment(1);
        warn!(stage = "profile", subject = %claims.subject, "{warning}");
    }

    let mut tx = storage.begin().await?;

    let user_id = match &existing {
        None => {
            let id = Uuid::new_v4();
            users
                .insert(
                    &mut tx,
                    &NewUser {
                        id,
                        claims,
                        verification_type: VerificationType::Regular,
                        created_at: now,
                    },
                )
                .await?;
            id
        }
        Some(user) => {
            users
                .apply_claim_updates(&mut tx, user.id, claims, now)
                .await?;
            user.id
        }
    };

    let contact_id = match &outcome.action {
        ReconcileAction::CreateContact(values) => {
            contacts
                .insert(
                    &mut tx,
                    &NewContact {
                        user_id: Some(user_id),
                        first_name: &values.first_name,
                        last_name: &values.last_name,
                        email: &values.email,
                        phone: values.phone.as_deref(),
                        created_at: now,
                    },
                )
                .await?
        }
        ReconcileAction::LinkExisting { contact_id, .. } => {
            contacts.link_user(&mut tx, *contact_id, user_id, now).await?;
            *contact_id
        }
        ReconcileAction::LeaveLinked { contact_id } => *contact_id,
    };

    tx.commit().await?;
    counter!("contact_reconcile_total", "action" => outcome.action.metric_kind()).increment(1);

    let user = users
        .fetch(user_id)
        .await?
        .ok_or(LoginError::Vanished("user"))?;
    let contact = contacts
        .fetch(contact_id)
        .await?
        .ok_or(LoginError::Vanished("contact"))?;

    Ok(LoginResponse {
        user,
        contact,
        created: matches!(kind, LoginKind::FirstLogin),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use chrono::Utc;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::auth::testing::sign;
    use crate::router::testing::{setup_state, TEST_SECRET};
    use crate::router::{app_router, AppState};

    fn claims_body(subject: &str, email: &str, given: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "subject": subject,
            "email": email,
            "given_name": given,
            "family_name": "Last",
            "phone": "202-555-0133",
        }))
        .expect("serialize claims")
    }

    async fn post_login(state: &AppState, body: Vec<u8>) -> (StatusCode, Value) {
        let signature = sign(TEST_SECRET, &body);
        let response = app_router(state.clone())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/login")
                    .header("content-type", "application/json")
                    .header(HEADER_IDENTITY_SIGNATURE, signature)
                    .body(Body::from(body))
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

    async fn contact_count(state: &AppState) -> i64 {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM contacts")
            .fetch_one(state.storage().pool())
            .await
            .expect("count contacts");
        row.0
    }

    #[tokio::test]
    async fn first_login_creates_user_and_contact_from_claims() {
        let state = setup_state().await;
        let (status, body) =
            post_login(&state, claims_body("sub-1", "signal@example.gov", "First")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["created"], Value::Bool(true));
        assert_eq!(body["contact"]["first_name"], "First");
        assert_eq!(body["contact"]["email"], "signal@example.gov");
        assert_eq!(body["contact"]["phone"], "202-555-0133");
        assert_eq!(contact_count(&state).await, 1);
    }

    #[tokio::test]
    async fn first_login_links_matching_contact_without_copying() {
        let state = setup_state().await;

        let mut tx = state.storage().begin().await.expect("begin");
        state
            .storage()
            .contacts()
            .insert(
                &mut tx,
                &NewContact {
                    user_id: None,
                    first_name: "Preferred",
                    last_name: "Name",
                    email: "signal@example.gov",
                    phone: Some("202-555-0134"),
                    created_at: Utc::now(),
                },
            )
            .await
            .expect("insert contact");
        tx.commit().await.expect("commit");

        let (status, body) =
            post_login(&state, claims_body("sub-1", "signal@example.gov", "First")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["contact"]["first_name"], "Preferred");
        assert_eq!(body["contact"]["phone"], "202-555-0134");
        assert_eq!(contact_count(&state).await, 1, "no new contact is created");
    }

    #[tokio::test]
    async fn first_login_with_duplicate_contacts_links_the_lowest_id() {
        let state = setup_state().await;

        let mut tx = state.storage().begin().await.expect("begin");
        let mut ids = Vec::new();
        for _ in 0..2 {
            let id = state
                .storage()
                .contacts()
                .insert(
                    &mut tx,
                    &NewContact {
                        user_id: None,
                        first_name: "Front",
                        last_name: "Desk",
                        email: "signal@example.gov",
                        phone: None,
                        created_at: Utc::now(),
                    },
                )
                .await
                .expect("insert contact");
            ids.push(id);
        }
        tx.commit().await.expect("commit");

        let (status, body) =
            post_login(&state, claims_body("sub-1", "signal@example.gov", "First")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["contact"]["id"], json!(ids[0]));
        assert_eq!(contact_count(&state).await, 2, "duplicates stay in place");
    }

    #[tokio::test]
    async fn repeat_login_updates_the_user_but_never_the_contact() {
        let state = setup_state().await;
        let (status, first) =
            post_login(&state, claims_body("sub-1", "signal@example.gov", "First")).await;
        assert_eq!(status, StatusCode::OK);

        let (status, second) = post_login(
            &state,
            claims_body("sub-1", "renamed@example.gov", "Renamed"),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(second["created"], Value::Bool(false));
        assert_eq!(second["user"]["email"], "renamed@example.gov");
        assert_eq!(second["user"]["first_name"], "Renamed");
        // Every contact field still carries the values from creation.
        assert_eq!(second["contact"]["email"], "signal@example.gov");
        assert_eq!(second["contact"]["first_name"], "First");
        assert_eq!(second["contact"]["last_name"], "Last");
        assert_eq!(second["contact"]["phone"], "202-555-0133");
        assert_eq!(second["contact"]["id"], first["contact"]["id"]);
        assert_eq!(contact_count(&state).await, 1);
    }

    #[tokio::test]
    async fn repeat_login_recreates_a_deleted_contact() {
        let state = setup_state().await;
        let (status, _) =
            post_login(&state, claims_body("sub-1", "signal@example.gov", "First")).await;
        assert_eq!(status, StatusCode::OK);

        sqlx::query("DELETE FROM contacts")
            .execute(state.storage().pool())
            .await
            .expect("delete contacts");

        let (status, body) =
            post_login(&state, claims_body("sub-1", "signal@example.gov", "First")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["contact"]["email"], "signal@example.gov");
        assert_eq!(contact_count(&state).await, 1);
    }

    #[tokio::test]
    async fn tampered_body_is_rejected() {
        let state = setup_state().await;
        let body = claims_body("sub-1", "signal@example.gov", "First");
        let signature = sign(TEST_SECRET, b"different-body");

        let response = app_router(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/login")
                    .header("content-type", "application/json")
                    .header(HEADER_IDENTITY_SIGNATURE, signature)
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
