//! Acting Roles
//!
//! Closed set of actors that may drive an application forward. Role
//! checks are always exact variant matches against the policy table,
//! never string matching on display names.

use serde::{Deserialize, Serialize};

use crate::position::PositionType;

/// Who is requesting a transition.
///
/// Assistant Engineer desks are per position grade, so that variant
/// carries the grade its holder is responsible for; an AE may only act on
/// applications of their own grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Role {
    Applicant,
    JuniorEngineer,
    AssistantEngineer { position: PositionType },
    ExecutiveEngineer,
    CityEngineer,
    Clerk,
    /// Internal automation: payment-gateway callbacks, the certificate
    /// worker, and auto-forward hops.
    System,
}

impl Role {
    /// Stable label for history entries and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Applicant => "applicant",
            Self::JuniorEngineer => "junior_engineer",
            Self::AssistantEngineer { .. } => "assistant_engineer",
            Self::ExecutiveEngineer => "executive_engineer",
            Self::CityEngineer => "city_engineer",
            Self::Clerk => "clerk",
            Self::System => "system",
        }
    }

    /// True for the approval-chain officer roles.
    pub fn is_officer(&self) -> bool {
        matches!(
            self,
            Self::JuniorEngineer
                | Self::AssistantEngineer { .. }
                | Self::ExecutiveEngineer
                | Self::CityEngineer
                | Self::Clerk
        )
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels() {
        let ae = Role::AssistantEngineer {
            position: PositionType::Architect,
        };
        assert_eq!(ae.label(), "assistant_engineer");
        assert_eq!(Role::System.label(), "system");
    }

    #[test]
    fn test_officer_classification() {
        assert!(Role::Clerk.is_officer());
        assert!(!Role::Applicant.is_officer());
        assert!(!Role::System.is_officer());
    }

    #[test]
    fn test_ae_carries_position_scope() {
        let a = Role::AssistantEngineer {
            position: PositionType::Architect,
        };
        let b = Role::AssistantEngineer {
            position: PositionType::Supervisor1,
        };
        assert_ne!(a, b);
    }
}
