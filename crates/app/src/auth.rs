use axum::http::{HeaderMap, StatusCode};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::error;

use registrar_core::types::User;
use registrar_util::AdminRole;

use crate::problem::ProblemResponse;
use crate::router::AppState;

/// Identity-provider subject asserted by the fronting proxy.
pub const HEADER_IDENTITY_SUB: &str = "X-Identity-Sub";
/// HMAC-SHA256 signature over the asserted value (or the request body
/// on login), hex encoded with a `sha256=` prefix.
pub const HEADER_IDENTITY_SIGNATURE: &str = "X-Identity-Signature";

/// Verifies a signed assertion in constant time.
pub fn verify_signature(secret: &[u8], message: &[u8], provided: &str) -> Result<(), String> {
    let hex_part = provided
        .strip_prefix("sha256=")
        .ok_or_else(|| "signature must start with 'sha256='".to_string())?;
    let provided_bytes =
        hex::decode(hex_part).map_err(|_| "signature is not valid hex".to_string())?;

    let mut mac = Hmac::<Sha256>::new_from_slice(secret)
        .map_err(|_| "failed to initialize signature verifier".to_string())?;
    mac.update(message);
    let expected = mac.finalize().into_bytes();
    let expected_bytes: &[u8] = expected.as_ref();

    if expected_bytes.ct_eq(provided_bytes.as_slice()).into() {
        Ok(())
    } else {
        Err("signature mismatch".to_string())
    }
}

/// Extracts and verifies the caller's identity-provider subject.
pub fn caller_subject(state: &AppState, headers: &HeaderMap) -> Result<String, ProblemResponse> {
    let subject = headers
        .get(HEADER_IDENTITY_SUB)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            ProblemResponse::new(
                StatusCode::UNAUTHORIZED,
                "missing_identity",
                "X-Identity-Sub header is required",
            )
        })?;
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

    verify_signature(&state.secret(), subject.as_bytes(), signature)
        .map_err(|err| ProblemResponse::new(StatusCode::UNAUTHORIZED, "invalid_signature", err))?;

    Ok(subject.to_string())
}

/// Resolves the caller to an existing user account.
pub async fn caller_user(state: &AppState, headers: &HeaderMap) -> Result<User, ProblemResponse> {
    let subject = caller_subject(state, headers)?;
    state
        .storage()
        .users()
        .fetch_by_subject(&subject)
        .await
        .map_err(|err| {
            error!(stage = "auth", error = %err, "failed to load caller account");
            ProblemResponse::internal("failed to load caller account")
        })?
        .ok_or_else(|| {
            ProblemResponse::new(
                StatusCode::UNAUTHORIZED,
                "unknown_user",
                "no account exists for this identity; log in first",
            )
        })
}

/// Resolves the caller against the admin allow-lists.
///
/// Analysts may read; mutating operations require full access.
pub fn admin_caller(
    state: &AppState,
    headers: &HeaderMap,
    needs_manage: bool,
) -> Result<(String, AdminRole), ProblemResponse> {
    let subject = caller_subject(state, headers)?;
    let role = state.roster().role_for(&subject).ok_or_else(|| {
        ProblemResponse::new(
            StatusCode::FORBIDDEN,
            "not_an_admin",
            "this identity is not on an admin allow-list",
        )
    })?;

    if needs_manage && !role.can_manage() {
        return Err(ProblemResponse::new(
            StatusCode::FORBIDDEN,
            "analyst_read_only",
            "this operation requires full admin access",
        ));
    }

    Ok((subject, role))
}

#[cfg(test)]
pub(crate) mod testing {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    /// Produces the signature header value accepted by `verify_signature`.
    pub fn sign(secret: &[u8], message: &[u8]) -> String {
        let mut mac =
            Hmac::<Sha256>::new_from_slice(secret).expect("hmac accepts any key length");
        mac.update(message);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }
}
