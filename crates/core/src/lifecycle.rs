use thiserror::Error;

use crate::types::{
    ActionNeededReason, DomainRequest, DomainRequestStatus, DomainState, RejectionReason,
};

/// Action requested against a domain request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestAction {
    Submit,
    InReview,
    ActionNeeded(ActionNeededReason),
    Approve,
    Withdraw,
    Reject(RejectionReason),
    RejectWithPrejudice,
}

impl RequestAction {
    /// Returns the metrics/log label for the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::InReview => "in_review",
            Self::ActionNeeded(_) => "action_needed",
            Self::Approve => "approve",
            Self::Withdraw => "withdraw",
            Self::Reject(_) => "reject",
            Self::RejectWithPrejudice => "reject_with_prejudice",
        }
    }
}

/// Facts the caller resolves before planning a transition.
///
/// Guards that need storage or registry lookups are inputs here so the
/// state machine itself stays pure.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransitionContext {
    /// `None` when no investigator is assigned.
    pub investigator_is_staff: Option<bool>,
    /// Whether the previously approved domain is serving or on hold.
    pub approved_domain_is_active: bool,
    /// Whether a live domain already claims the requested name.
    pub requested_domain_taken: bool,
    pub creator_is_restricted: bool,
}

/// Side effect the executor must apply alongside the status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionEffect {
    /// Stamp first/last submitted dates.
    RecordSubmissionDates,
    ClearRejectionReason,
    ClearActionNeededReason,
    SetRejectionReason(RejectionReason),
    SetActionNeededReason(ActionNeededReason),
    /// Register the domain, copy request data over, grant the creator
    /// the manager role.
    ProvisionDomain { name: String },
    /// Delete the previously approved domain and everything hanging off
    /// it.
    TeardownApprovedDomain,
    /// Flag the creator so they can no longer submit or edit requests.
    RestrictCreator,
}

/// Planned outcome of a lifecycle action: the new status plus the side
/// effects to apply in the same transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionPlan {
    pub target: DomainRequestStatus,
    pub effects: Vec<TransitionEffect>,
}

/// Errors raised while planning a transition.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("cannot {action} a request in status '{from}'")]
    NotPermitted {
        from: DomainRequestStatus,
        action: &'static str,
    },
    #[error("requested domain is missing")]
    MissingRequestedDomain,
    #[error("requested domain is not a valid domain name: {0}")]
    InvalidDomainName(String),
    #[error("no investigator is assigned to the request")]
    MissingInvestigator,
    #[error("assigned investigator is not a staff account")]
    InvestigatorNotStaff,
    #[error("approved domain is still active on the registry")]
    DomainStillActive,
    #[error("a live domain already uses the name {0}")]
    DomainInUse(String),
    #[error("request creator is restricted")]
    CreatorRestricted,
}

/// Plans a lifecycle action for a request.
///
/// The returned plan has not been applied; the caller persists the
/// status change and effects together.
pub fn plan_transition(
    request: &DomainRequest,
    action: &RequestAction,
    ctx: TransitionContext,
) -> Result<TransitionPlan, TransitionError> {
    use DomainRequestStatus as S;

    let from = request.status;
    match action {
        RequestAction::Submit => {
            require_source(
                from,
                &[S::Started, S::InReview, S::ActionNeeded, S::Withdrawn],
                "submit",
            )?;
            if ctx.creator_is_restricted {
                return Err(TransitionError::CreatorRestricted);
            }
            let name = request
                .requested_domain
                .as_deref()
                .ok_or(TransitionError::MissingRequestedDomain)?;
            if !is_valid_domain_name(name) {
                return Err(TransitionError::InvalidDomainName(name.to_string()));
            }
            Ok(TransitionPlan {
                target: S::Submitted,
                effects: vec![TransitionEffect::RecordSubmissionDates],
            })
        }
        RequestAction::InReview => {
            require_source(
                from,
                &[
                    S::Submitted,
                    S::ActionNeeded,
                    S::Approved,
                    S::Rejected,
                    S::Ineligible,
                ],
                "review",
            )?;
            require_review_guards(ctx)?;
            Ok(TransitionPlan {
                target: S::InReview,
                effects: leaving_effects(from),
            })
        }
        RequestAction::ActionNeeded(reason) => {
            require_source(
                from,
                &[S::InReview, S::Approved, S::Rejected, S::Ineligible],
                "send back",
            )?;
            require_review_guards(ctx)?;
            let mut effects = leaving_effects(from);
            effects.push(TransitionEffect::SetActionNeededReason(*reason));
            Ok(TransitionPlan {
                target: S::ActionNeeded,
                effects,
            })
        }
        RequestAction::Approve => {
            require_source(
                from,
                &[S::Submitted, S::InReview, S::ActionNeeded, S::Rejected],
                "approve",
            )?;
            require_investigator(ctx)?;
            let name = request
                .requested_domain
                .as_deref()
                .ok_or(TransitionError::MissingRequestedDomain)?;
            if ctx.requested_domain_taken {
                return Err(TransitionError::DomainInUse(name.to_string()));
            }
            let mut effects = leaving_effects(from);
            effects.push(TransitionEffect::ProvisionDomain {
                name: name.to_string(),
            });
            Ok(TransitionPlan {
                target: S::Approved,
                effects,
            })
        }
        RequestAction::Withdraw => {
            require_source(from, &[S::Submitted, S::InReview, S::ActionNeeded], "withdraw")?;
            Ok(TransitionPlan {
                target: S::Withdrawn,
                effects: Vec::new(),
            })
        }
        RequestAction::Reject(reason) => {
            require_source(from, &[S::InReview, S::ActionNeeded, S::Approved], "reject")?;
            require_review_guards(ctx)?;
            let mut effects = leaving_effects(from);
            effects.push(TransitionEffect::SetRejectionReason(*reason));
            Ok(TransitionPlan {
                target: S::Rejected,
                effects,
            })
        }
        RequestAction::RejectWithPrejudice => {
            require_source(
                from,
                &[S::InReview, S::ActionNeeded, S::Approved, S::Rejected],
                "reject with prejudice",
            )?;
            require_review_guards(ctx)?;
            let mut effects = leaving_effects(from);
            effects.push(TransitionEffect::RestrictCreator);
            Ok(TransitionPlan {
                target: S::Ineligible,
                effects,
            })
        }
    }
}

fn require_source(
    from: DomainRequestStatus,
    sources: &[DomainRequestStatus],
    action: &'static str,
) -> Result<(), TransitionError> {
    if sources.contains(&from) {
        Ok(())
    } else {
        Err(TransitionError::NotPermitted { from, action })
    }
}

fn require_investigator(ctx: TransitionContext) -> Result<(), TransitionError> {
    match ctx.investigator_is_staff {
        None => Err(TransitionError::MissingInvestigator),
        Some(false) => Err(TransitionError::InvestigatorNotStaff),
        Some(true) => Ok(()),
    }
}

fn require_review_guards(ctx: TransitionContext) -> Result<(), TransitionError> {
    if ctx.approved_domain_is_active {
        return Err(TransitionError::DomainStillActive);
    }
    require_investigator(ctx)
}

/// Cleanup owed when moving away from the given status: tear down an
/// approved domain, drop a stale rejection or action-needed reason.
fn leaving_effects(from: DomainRequestStatus) -> Vec<TransitionEffect> {
    match from {
        DomainRequestStatus::Approved => vec![TransitionEffect::TeardownApprovedDomain],
        DomainRequestStatus::Rejected => vec![TransitionEffect::ClearRejectionReason],
        DomainRequestStatus::ActionNeeded => vec![TransitionEffect::ClearActionNeededReason],
        _ => Vec::new(),
    }
}

/// Checks whether a string could be a registrable .gov domain name:
/// one label of letters, digits and interior hyphens, up to 63 octets.
pub fn is_valid_domain_name(value: &str) -> bool {
    let Some(label) = value.strip_suffix(".gov") else {
        return false;
    };
    if label.is_empty() || label.len() > 63 {
        return false;
    }
    if label.starts_with('-') || label.ends_with('-') {
        return false;
    }
    label
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Errors raised by registry-state transitions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainStateError {
    #[error("cannot {op} a domain in state '{state}'", op = .operation, state = .from.as_str())]
    InvalidTransition {
        from: DomainState,
        operation: &'static str,
    },
}

/// Places a client hold on a serving domain.
pub fn place_client_hold(state: DomainState) -> Result<DomainState, DomainStateError> {
    match state {
        DomainState::Ready => Ok(DomainState::OnHold),
        from => Err(DomainStateError::InvalidTransition {
            from,
            operation: "hold",
        }),
    }
}

/// Releases a client hold, returning the domain to service.
pub fn revert_client_hold(state: DomainState) -> Result<DomainState, DomainStateError> {
    match state {
        DomainState::OnHold => Ok(DomainState::Ready),
        from => Err(DomainStateError::InvalidTransition {
            from,
            operation: "release",
        }),
    }
}

/// Removes the domain from the registry. Serving domains must be held
/// first.
pub fn delete_domain(state: DomainState) -> Result<DomainState, DomainStateError> {
    match state {
        DomainState::OnHold | DomainState::DnsNeeded | DomainState::Unknown => {
            Ok(DomainState::Deleted)
        }
        from => Err(DomainStateError::InvalidTransition {
            from,
            operation: "delete",
        }),
    }
}

/// Recomputes the state after a nameserver update.
pub fn nameservers_updated(
    state: DomainState,
    host_count: usize,
) -> Result<DomainState, DomainStateError> {
    match (state, host_count) {
        (DomainState::Unknown | DomainState::DnsNeeded, 0) => Ok(DomainState::DnsNeeded),
        (DomainState::Unknown | DomainState::DnsNeeded, _) => Ok(DomainState::Ready),
        (DomainState::Ready, 0) => Ok(DomainState::DnsNeeded),
        (DomainState::Ready, _) => Ok(DomainState::Ready),
        (from, _) => Err(DomainStateError::InvalidTransition {
            from,
            operation: "update nameservers",
        }),
    }
}
