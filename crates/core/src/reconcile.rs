use serde_json::{json, Value};

use crate::types::{Contact, IdentityClaims};

/// Whether the login created the user record or found an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginKind {
    FirstLogin,
    ReturningLogin,
}

/// Contact values copied from identity-provider claims when a new
/// contact has to be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContactValues {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
}

impl NewContactValues {
    fn from_claims(claims: &IdentityClaims) -> Self {
        Self {
            first_name: claims.given_name.clone(),
            last_name: claims.family_name.clone(),
            email: claims.email.clone(),
            phone: claims.phone.clone(),
        }
    }
}

/// Action the caller must perform to reconcile the user with the
/// contact table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileAction {
    /// No contact matched; create one from the claims and link it.
    CreateContact(NewContactValues),
    /// Link the existing contact as-is. Its field values are preserved.
    LinkExisting {
        contact_id: i64,
        /// Remaining matches sharing the email, reported for the warning.
        duplicate_ids: Vec<i64>,
    },
    /// Returning login with the link already in place; the contact is
    /// never touched.
    LeaveLinked { contact_id: i64 },
}

impl ReconcileAction {
    /// Returns the metrics label associated with the action.
    pub fn metric_kind(&self) -> &'static str {
        match self {
            Self::CreateContact(_) => "create",
            Self::LinkExisting { .. } => "link",
            Self::LeaveLinked { .. } => "noop",
        }
    }
}

/// Result of evaluating the reconciliation rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub action: ReconcileAction,
    /// Warning to log when several contacts shared the email address.
    pub warning: Option<String>,
}

impl ReconcileOutcome {
    /// Returns a redacted JSON representation suitable for logging.
    pub fn redacted(&self) -> Value {
        match &self.action {
            ReconcileAction::CreateContact(_) => json!({ "action": "create" }),
            ReconcileAction::LinkExisting {
                contact_id,
                duplicate_ids,
            } => json!({
                "action": "link",
                "contact_id": contact_id,
                "duplicates": duplicate_ids.len(),
            }),
            ReconcileAction::LeaveLinked { contact_id } => json!({
                "action": "noop",
                "contact_id": contact_id,
            }),
        }
    }
}

/// Pure decision procedure linking users and contacts.
///
/// A first time registrant may have been invited, so the caller looks up
/// contacts matching the claimed email and this rule associates one.
/// When nothing matches, a contact is created from the claims. On
/// returning logins claim updates apply to the user record only; an
/// existing contact is never mutated.
pub struct Reconciliation;

impl Reconciliation {
    /// Evaluates the rule for one login.
    ///
    /// `candidates` are the contacts found by the caller: matches on the
    /// claimed email for a first login, the currently linked contact (if
    /// any) for a returning one. Matches are considered in ascending id
    /// order so repeated logins pick the same record.
    pub fn evaluate(
        kind: LoginKind,
        claims: &IdentityClaims,
        candidates: &[Contact],
    ) -> ReconcileOutcome {
        let mut ordered: Vec<&Contact> = candidates.iter().collect();
        ordered.sort_by_key(|contact| contact.id);

        let Some(first) = ordered.first() else {
            // Covers both a brand new registrant and a returning user
            // whose contact row was removed out from under them.
            return ReconcileOutcome {
                action: ReconcileAction::CreateContact(NewContactValues::from_claims(claims)),
                warning: None,
            };
        };

        match kind {
            LoginKind::FirstLogin => {
                let duplicate_ids: Vec<i64> =
                    ordered.iter().skip(1).map(|contact| contact.id).collect();
                let warning = if duplicate_ids.is_empty() {
                    None
                } else {
                    Some(format!(
                        "There are multiple contacts with the same email address. \
                         Picking contact #{} and leaving {:?} unlinked.",
                        first.id, duplicate_ids
                    ))
                };
                ReconcileOutcome {
                    action: ReconcileAction::LinkExisting {
                        contact_id: first.id,
                        duplicate_ids,
                    },
                    warning,
                }
            }
            LoginKind::ReturningLogin => ReconcileOutcome {
                action: ReconcileAction::LeaveLinked {
                    contact_id: first.id,
                },
                warning: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn claims() -> IdentityClaims {
        IdentityClaims {
            subject: "subject-1".to_string(),
            email: "signal@example.gov".to_string(),
            given_name: "First".to_string(),
            family_name: "Last".to_string(),
            phone: Some("202-555-0133".to_string()),
        }
    }

    fn contact(id: i64) -> Contact {
        Contact {
            id,
            user_id: None,
            first_name: "One".to_string(),
            last_name: "Two".to_string(),
            email: "signal@example.gov".to_string(),
            phone: Some("202-555-0134".to_string()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn first_login_without_match_creates_contact_from_claims() {
        let outcome = Reconciliation::evaluate(LoginKind::FirstLogin, &claims(), &[]);

        match outcome.action {
            ReconcileAction::CreateContact(values) => {
                assert_eq!(values.first_name, "First");
                assert_eq!(values.last_name, "Last");
                assert_eq!(values.email, "signal@example.gov");
                assert_eq!(values.phone.as_deref(), Some("202-555-0133"));
            }
            other => panic!("expected create, got {other:?}"),
        }
        assert!(outcome.warning.is_none());
    }

    #[test]
    fn first_login_with_single_match_links_without_copying() {
        let outcome = Reconciliation::evaluate(LoginKind::FirstLogin, &claims(), &[contact(7)]);

        assert_eq!(
            outcome.action,
            ReconcileAction::LinkExisting {
                contact_id: 7,
                duplicate_ids: Vec::new(),
            }
        );
        assert!(outcome.warning.is_none());
    }

    #[test]
    fn first_login_with_multiple_matches_links_lowest_id_and_warns() {
        let outcome = Reconciliation::evaluate(
            LoginKind::FirstLogin,
            &claims(),
            &[contact(9), contact(3), contact(5)],
        );

        match &outcome.action {
            ReconcileAction::LinkExisting {
                contact_id,
                duplicate_ids,
            } => {
                assert_eq!(*contact_id, 3);
                assert_eq!(duplicate_ids, &vec![5, 9]);
            }
            other => panic!("expected link, got {other:?}"),
        }
        let warning = outcome.warning.expect("duplicates should warn");
        assert!(warning.contains("#3"));
    }

    #[test]
    fn returning_login_with_contact_leaves_it_alone() {
        let outcome = Reconciliation::evaluate(LoginKind::ReturningLogin, &claims(), &[contact(4)]);

        assert_eq!(
            outcome.action,
            ReconcileAction::LeaveLinked { contact_id: 4 }
        );
        assert_eq!(outcome.action.metric_kind(), "noop");
    }

    #[test]
    fn returning_login_without_contact_recreates_it() {
        let outcome = Reconciliation::evaluate(LoginKind::ReturningLogin, &claims(), &[]);

        assert!(matches!(
            outcome.action,
            ReconcileAction::CreateContact(_)
        ));
    }
}
