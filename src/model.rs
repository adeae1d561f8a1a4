//! Core data model.
//!
//! A work item is a legal search that needs a solicitor. Its rotation chain
//! is the ordered list of assignment attempts, one per eligible candidate.

pub mod attempt;
pub mod directory;
pub mod work;

pub use attempt::{ActiveFlagRow, AssignmentAttempt, AttemptId};
pub use directory::{Candidate, Firm, FirmId, JurisdictionId, Solicitor, SolicitorId};
pub use work::{NewWorkItem, RequestKind, Status, WorkItem, WorkItemId};
