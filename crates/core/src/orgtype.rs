use thiserror::Error;

use crate::types::{GenericOrgType, OrganizationType};

/// The three fields that together describe an organization:
/// `organization_type` is constituted from `generic_org_type` and
/// `is_election_board` and must be kept in step with them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OrgTypeFields {
    pub generic_org_type: Option<GenericOrgType>,
    pub is_election_board: Option<bool>,
    pub organization_type: Option<OrganizationType>,
}

/// Errors raised while synchronizing organization-type fields.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrgTypeError {
    #[error(
        "cannot set organization_type and generic_org_type simultaneously \
         when their values do not match"
    )]
    ConflictingValues,
    #[error("cannot update organization_type and generic_org_type simultaneously")]
    ConflictingUpdate,
}

/// Returns the `*_election` variant for a generic org type, or `None`
/// for the types where an election office is not possible (federal,
/// interstate, school district).
pub fn election_variant(generic: GenericOrgType) -> Option<OrganizationType> {
    match generic {
        GenericOrgType::City => Some(OrganizationType::CityElection),
        GenericOrgType::County => Some(OrganizationType::CountyElection),
        GenericOrgType::SpecialDistrict => Some(OrganizationType::SpecialDistrictElection),
        GenericOrgType::StateOrTerritory => Some(OrganizationType::StateOrTerritoryElection),
        GenericOrgType::Tribal => Some(OrganizationType::TribalElection),
        GenericOrgType::Federal | GenericOrgType::Interstate | GenericOrgType::SchoolDistrict => {
            None
        }
    }
}

/// Returns the organization type that mirrors a generic org type.
pub fn base_variant(generic: GenericOrgType) -> OrganizationType {
    match generic {
        GenericOrgType::City => OrganizationType::City,
        GenericOrgType::County => OrganizationType::County,
        GenericOrgType::Federal => OrganizationType::Federal,
        GenericOrgType::Interstate => OrganizationType::Interstate,
        GenericOrgType::SchoolDistrict => OrganizationType::SchoolDistrict,
        GenericOrgType::SpecialDistrict => OrganizationType::SpecialDistrict,
        GenericOrgType::StateOrTerritory => OrganizationType::StateOrTerritory,
        GenericOrgType::Tribal => OrganizationType::Tribal,
    }
}

/// Splits an organization type into its generic type and election flag.
pub fn decompose(org: OrganizationType) -> (GenericOrgType, bool) {
    match org {
        OrganizationType::City => (GenericOrgType::City, false),
        OrganizationType::CityElection => (GenericOrgType::City, true),
        OrganizationType::County => (GenericOrgType::County, false),
        OrganizationType::CountyElection => (GenericOrgType::County, true),
        OrganizationType::Federal => (GenericOrgType::Federal, false),
        OrganizationType::Interstate => (GenericOrgType::Interstate, false),
        OrganizationType::SchoolDistrict => (GenericOrgType::SchoolDistrict, false),
        OrganizationType::SpecialDistrict => (GenericOrgType::SpecialDistrict, false),
        OrganizationType::SpecialDistrictElection => (GenericOrgType::SpecialDistrict, true),
        OrganizationType::StateOrTerritory => (GenericOrgType::StateOrTerritory, false),
        OrganizationType::StateOrTerritoryElection => (GenericOrgType::StateOrTerritory, true),
        OrganizationType::Tribal => (GenericOrgType::Tribal, false),
        OrganizationType::TribalElection => (GenericOrgType::Tribal, true),
    }
}

fn compose(generic: GenericOrgType, election: bool) -> OrganizationType {
    if election {
        election_variant(generic).unwrap_or_else(|| base_variant(generic))
    } else {
        base_variant(generic)
    }
}

/// Brings the three fields back in step before a save.
///
/// For a new record (`previous` is `None`) whichever side is populated
/// drives the other; populating both with contradictory values is an
/// error. For an update, the side that changed drives the other, and
/// changing both sides at once is an error.
pub fn synchronize(
    current: &mut OrgTypeFields,
    previous: Option<&OrgTypeFields>,
) -> Result<(), OrgTypeError> {
    let Some(previous) = previous else {
        return synchronize_new(current);
    };

    let generic_changed = current.generic_org_type != previous.generic_org_type;
    let election_changed = current.is_election_board != previous.is_election_board;
    let org_changed = current.organization_type != previous.organization_type;

    if org_changed && (generic_changed || election_changed) {
        return Err(OrgTypeError::ConflictingUpdate);
    }
    if !org_changed && !generic_changed && !election_changed {
        return Ok(());
    }

    if generic_changed || election_changed {
        update_org_from_generic(current);
    } else {
        update_generic_from_org(current);
    }
    Ok(())
}

fn synchronize_new(current: &mut OrgTypeFields) -> Result<(), OrgTypeError> {
    match (current.organization_type, current.generic_org_type) {
        (Some(org), Some(generic)) => {
            // Fixture-style records may arrive fully populated; all
            // three values have to agree.
            let expected = compose(generic, current.is_election_board.unwrap_or(false));
            if org != expected {
                return Err(OrgTypeError::ConflictingValues);
            }
            Ok(())
        }
        (None, Some(_)) => {
            update_org_from_generic(current);
            Ok(())
        }
        (Some(_), None) => {
            update_generic_from_org(current);
            Ok(())
        }
        (None, None) => Ok(()),
    }
}

fn update_org_from_generic(fields: &mut OrgTypeFields) {
    fields.organization_type = fields
        .generic_org_type
        .map(|generic| compose(generic, fields.is_election_board.unwrap_or(false)));
}

fn update_generic_from_org(fields: &mut OrgTypeFields) {
    match fields.organization_type {
        Some(org) => {
            let (generic, election) = decompose(org);
            fields.generic_org_type = Some(generic);
            fields.is_election_board = Some(election);
        }
        None => {
            fields.generic_org_type = None;
            fields.is_election_board = None;
        }
    }
}
