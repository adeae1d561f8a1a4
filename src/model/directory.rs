//! Read-only solicitor directory: jurisdictions, coverage firms, solicitors.

use serde::{Deserialize, Serialize};

/// Identifier of a jurisdiction (a location a firm declares coverage for).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JurisdictionId(pub i64);

impl std::fmt::Display for JurisdictionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FirmId(pub i64);

impl std::fmt::Display for FirmId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SolicitorId(pub i64);

impl std::fmt::Display for SolicitorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A law firm providing coverage for one jurisdiction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Firm {
    pub id: FirmId,
    pub name: String,
    pub jurisdiction: JurisdictionId,
}

/// A solicitor employed by a coverage firm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solicitor {
    pub id: SolicitorId,
    pub firm_id: FirmId,
    pub address: String,
    pub active: bool,
    /// Finished onboarding and may receive work.
    pub onboarded: bool,
}

impl Solicitor {
    pub fn is_eligible(&self) -> bool {
        self.active && self.onboarded
    }
}

/// Projection of an eligible solicitor used to build a rotation chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub solicitor_id: SolicitorId,
    pub address: String,
}

impl From<&Solicitor> for Candidate {
    fn from(s: &Solicitor) -> Self {
        Self {
            solicitor_id: s.id,
            address: s.address.clone(),
        }
    }
}
