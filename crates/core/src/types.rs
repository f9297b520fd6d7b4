use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Profile claims asserted by the identity provider on login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// Stable unique identifier issued by the identity provider.
    pub subject: String,
    pub email: String,
    #[serde(default)]
    pub given_name: String,
    #[serde(default)]
    pub family_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// How the user's identity was verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationType {
    Regular,
    Grandfathered,
    VerifiedByStaff,
    Invited,
}

impl VerificationType {
    /// Returns the canonical database representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Regular => "regular",
            Self::Grandfathered => "grandfathered",
            Self::VerifiedByStaff => "verified_by_staff",
            Self::Invited => "invited",
        }
    }
}

impl FromStr for VerificationType {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "regular" => Ok(Self::Regular),
            "grandfathered" => Ok(Self::Grandfathered),
            "verified_by_staff" => Ok(Self::VerifiedByStaff),
            "invited" => Ok(Self::Invited),
            _ => Err(()),
        }
    }
}

/// Account record for someone who has logged in through the identity provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub idp_subject: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub verification_type: VerificationType,
    pub is_staff: bool,
    pub is_restricted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Contact record, optionally linked 1:1 to a user.
///
/// Contact values are independent of the user's claims after linking; a
/// person can prefer a different display name or phone for registry
/// paperwork than the one their login carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Registry-side state of a provisioned domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainState {
    Unknown,
    DnsNeeded,
    Ready,
    OnHold,
    Deleted,
}

impl DomainState {
    /// Returns the canonical database representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::DnsNeeded => "dns needed",
            Self::Ready => "ready",
            Self::OnHold => "on hold",
            Self::Deleted => "deleted",
        }
    }

    /// Human-readable label shown in listings.
    pub fn display(self) -> &'static str {
        match self {
            Self::Unknown | Self::DnsNeeded => "DNS needed",
            Self::Ready => "Ready",
            Self::OnHold => "On hold",
            Self::Deleted => "Deleted",
        }
    }

    /// A domain counts as active once it is serving or administratively held.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Ready | Self::OnHold)
    }

    /// Held and deleted domains can only be viewed, not managed.
    pub fn is_view_only(self) -> bool {
        matches!(self, Self::OnHold | Self::Deleted)
    }

    /// Help text surfaced next to the state in listings.
    pub fn help_text(self) -> &'static str {
        match self {
            Self::Unknown | Self::DnsNeeded => {
                "Before this domain can be used, you'll need to add name server addresses."
            }
            Self::Ready => "This domain has name servers and is ready for use.",
            Self::OnHold => {
                "This domain is administratively paused, so it can't be edited and won't resolve in DNS."
            }
            Self::Deleted => "This domain has been removed and isn't publicly available.",
        }
    }
}

impl FromStr for DomainState {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "unknown" => Ok(Self::Unknown),
            "dns needed" => Ok(Self::DnsNeeded),
            "ready" => Ok(Self::Ready),
            "on hold" => Ok(Self::OnHold),
            "deleted" => Ok(Self::Deleted),
            _ => Err(()),
        }
    }
}

/// A domain registered through this registrar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    pub id: Uuid,
    pub name: String,
    pub state: DomainState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_ready_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Review status of a domain request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainRequestStatus {
    Started,
    Submitted,
    InReview,
    ActionNeeded,
    Approved,
    Withdrawn,
    Rejected,
    Ineligible,
}

impl DomainRequestStatus {
    /// Returns the canonical database representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Submitted => "submitted",
            Self::InReview => "in review",
            Self::ActionNeeded => "action needed",
            Self::Approved => "approved",
            Self::Withdrawn => "withdrawn",
            Self::Rejected => "rejected",
            Self::Ineligible => "ineligible",
        }
    }

    /// Human-readable label shown in listings.
    pub fn display(self) -> &'static str {
        match self {
            Self::Started => "Started",
            Self::Submitted => "Submitted",
            Self::InReview => "In review",
            Self::ActionNeeded => "Action needed",
            Self::Approved => "Approved",
            Self::Withdrawn => "Withdrawn",
            Self::Rejected => "Rejected",
            Self::Ineligible => "Ineligible",
        }
    }
}

impl FromStr for DomainRequestStatus {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "started" => Ok(Self::Started),
            "submitted" => Ok(Self::Submitted),
            "in review" => Ok(Self::InReview),
            "action needed" => Ok(Self::ActionNeeded),
            "approved" => Ok(Self::Approved),
            "withdrawn" => Ok(Self::Withdrawn),
            "rejected" => Ok(Self::Rejected),
            "ineligible" => Ok(Self::Ineligible),
            _ => Err(()),
        }
    }
}

impl fmt::Display for DomainRequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason recorded when a request is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    DomainPurpose,
    Requestor,
    SecondDomainReasoning,
    ContactsOrOrganizationLegitimacy,
    OrganizationEligibility,
    NamingRequirements,
    Other,
}

impl RejectionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DomainPurpose => "purpose_not_met",
            Self::Requestor => "requestor_not_eligible",
            Self::SecondDomainReasoning => "second_domain_reasoning",
            Self::ContactsOrOrganizationLegitimacy => "contacts_or_organization_legitimacy",
            Self::OrganizationEligibility => "organization_eligibility",
            Self::NamingRequirements => "naming_not_met",
            Self::Other => "other",
        }
    }
}

impl FromStr for RejectionReason {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "purpose_not_met" => Ok(Self::DomainPurpose),
            "requestor_not_eligible" => Ok(Self::Requestor),
            "second_domain_reasoning" => Ok(Self::SecondDomainReasoning),
            "contacts_or_organization_legitimacy" => Ok(Self::ContactsOrOrganizationLegitimacy),
            "organization_eligibility" => Ok(Self::OrganizationEligibility),
            "naming_not_met" => Ok(Self::NamingRequirements),
            "other" => Ok(Self::Other),
            _ => Err(()),
        }
    }
}

/// Reason recorded when a request is sent back for more work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionNeededReason {
    EligibilityUnclear,
    QuestionableSeniorOfficial,
    AlreadyHasDomains,
    BadName,
    Other,
}

impl ActionNeededReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EligibilityUnclear => "eligibility_unclear",
            Self::QuestionableSeniorOfficial => "questionable_senior_official",
            Self::AlreadyHasDomains => "already_has_domains",
            Self::BadName => "bad_name",
            Self::Other => "other",
        }
    }
}

impl FromStr for ActionNeededReason {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "eligibility_unclear" => Ok(Self::EligibilityUnclear),
            "questionable_senior_official" => Ok(Self::QuestionableSeniorOfficial),
            "already_has_domains" => Ok(Self::AlreadyHasDomains),
            "bad_name" => Ok(Self::BadName),
            "other" => Ok(Self::Other),
            _ => Err(()),
        }
    }
}

/// Organization category a request is filed under, before the election
/// dimension is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenericOrgType {
    City,
    County,
    Federal,
    Interstate,
    SchoolDistrict,
    SpecialDistrict,
    StateOrTerritory,
    Tribal,
}

impl GenericOrgType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::City => "city",
            Self::County => "county",
            Self::Federal => "federal",
            Self::Interstate => "interstate",
            Self::SchoolDistrict => "school_district",
            Self::SpecialDistrict => "special_district",
            Self::StateOrTerritory => "state_or_territory",
            Self::Tribal => "tribal",
        }
    }
}

impl FromStr for GenericOrgType {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "city" => Ok(Self::City),
            "county" => Ok(Self::County),
            "federal" => Ok(Self::Federal),
            "interstate" => Ok(Self::Interstate),
            "school_district" => Ok(Self::SchoolDistrict),
            "special_district" => Ok(Self::SpecialDistrict),
            "state_or_territory" => Ok(Self::StateOrTerritory),
            "tribal" => Ok(Self::Tribal),
            _ => Err(()),
        }
    }
}

/// Organization type as recorded on the request: the generic type plus,
/// where applicable, its election-office variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrganizationType {
    City,
    CityElection,
    County,
    CountyElection,
    Federal,
    Interstate,
    SchoolDistrict,
    SpecialDistrict,
    SpecialDistrictElection,
    StateOrTerritory,
    StateOrTerritoryElection,
    Tribal,
    TribalElection,
}

impl OrganizationType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::City => "city",
            Self::CityElection => "city_election",
            Self::County => "county",
            Self::CountyElection => "county_election",
            Self::Federal => "federal",
            Self::Interstate => "interstate",
            Self::SchoolDistrict => "school_district",
            Self::SpecialDistrict => "special_district",
            Self::SpecialDistrictElection => "special_district_election",
            Self::StateOrTerritory => "state_or_territory",
            Self::StateOrTerritoryElection => "state_or_territory_election",
            Self::Tribal => "tribal",
            Self::TribalElection => "tribal_election",
        }
    }
}

impl FromStr for OrganizationType {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "city" => Ok(Self::City),
            "city_election" => Ok(Self::CityElection),
            "county" => Ok(Self::County),
            "county_election" => Ok(Self::CountyElection),
            "federal" => Ok(Self::Federal),
            "interstate" => Ok(Self::Interstate),
            "school_district" => Ok(Self::SchoolDistrict),
            "special_district" => Ok(Self::SpecialDistrict),
            "special_district_election" => Ok(Self::SpecialDistrictElection),
            "state_or_territory" => Ok(Self::StateOrTerritory),
            "state_or_territory_election" => Ok(Self::StateOrTerritoryElection),
            "tribal" => Ok(Self::Tribal),
            "tribal_election" => Ok(Self::TribalElection),
            _ => Err(()),
        }
    }
}

/// A domain request moving through review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainRequest {
    pub id: Uuid,
    pub creator_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_domain: Option<String>,
    pub status: DomainRequestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generic_org_type: Option<GenericOrgType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_election_board: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_type: Option<OrganizationType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub investigator_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<RejectionReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_needed_reason: Option<ActionNeededReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_submitted_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_submitted_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_domain_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DomainRequest {
    /// Whether the applicant can still withdraw the request.
    pub fn is_withdrawable(&self) -> bool {
        matches!(
            self.status,
            DomainRequestStatus::Submitted
                | DomainRequestStatus::InReview
                | DomainRequestStatus::ActionNeeded
        )
    }
}

/// Role a user holds on a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainRole {
    Manager,
}

impl DomainRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manager => "manager",
        }
    }
}
