//! Position Grades
//!
//! The professional position a licence application is for. Fixed at
//! creation; drives the fee amount and the applicant document set.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::document::DocumentType;

/// Licensable position grades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionType {
    Architect,
    LicenceEngineer,
    StructuralEngineer,
    Supervisor1,
    Supervisor2,
}

impl PositionType {
    pub const ALL: [Self; 5] = [
        Self::Architect,
        Self::LicenceEngineer,
        Self::StructuralEngineer,
        Self::Supervisor1,
        Self::Supervisor2,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Architect => "architect",
            Self::LicenceEngineer => "licence_engineer",
            Self::StructuralEngineer => "structural_engineer",
            Self::Supervisor1 => "supervisor1",
            Self::Supervisor2 => "supervisor2",
        }
    }

    /// Licence fee in INR. Architects are registered with the Council of
    /// Architecture and pay no municipal fee, which is why their
    /// applications bypass the payment gate entirely.
    pub fn fee(&self) -> Decimal {
        match self {
            Self::Architect => Decimal::ZERO,
            Self::LicenceEngineer => Decimal::new(2500, 0),
            Self::StructuralEngineer => Decimal::new(2500, 0),
            Self::Supervisor1 => Decimal::new(1500, 0),
            Self::Supervisor2 => Decimal::new(1000, 0),
        }
    }

    pub fn has_fee(&self) -> bool {
        self.fee() != Decimal::ZERO
    }

    /// Documents the applicant must upload for this grade.
    pub fn required_documents(&self) -> &'static [DocumentType] {
        use DocumentType::*;
        match self {
            // COA registration certificate instead of a tax receipt trail.
            Self::Architect => &[
                Pan,
                Aadhar,
                Degree,
                Marksheet,
                ExperienceCertificate,
                CoaCertificate,
                SelfDeclaration,
                ProfilePicture,
            ],
            Self::StructuralEngineer => &[
                Pan,
                Aadhar,
                Degree,
                Marksheet,
                ExperienceCertificate,
                CoaCertificate,
                PropertyTaxReceipt,
                SelfDeclaration,
                ProfilePicture,
            ],
            Self::LicenceEngineer | Self::Supervisor1 | Self::Supervisor2 => &[
                Pan,
                Aadhar,
                Degree,
                Marksheet,
                ExperienceCertificate,
                PropertyTaxReceipt,
                SelfDeclaration,
                ProfilePicture,
            ],
        }
    }
}

impl std::fmt::Display for PositionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown position type: {0}")]
pub struct UnknownPositionType(pub String);

impl FromStr for PositionType {
    type Err = UnknownPositionType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| UnknownPositionType(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_architect_is_fee_free() {
        for position in PositionType::ALL {
            assert_eq!(
                position.has_fee(),
                position != PositionType::Architect,
                "{position}"
            );
        }
    }

    #[test]
    fn test_required_documents_per_grade() {
        assert!(PositionType::Architect
            .required_documents()
            .contains(&DocumentType::CoaCertificate));
        assert!(!PositionType::LicenceEngineer
            .required_documents()
            .contains(&DocumentType::CoaCertificate));
        for position in PositionType::ALL {
            assert!(position.required_documents().contains(&DocumentType::Pan));
            assert!(!position
                .required_documents()
                .iter()
                .any(|d| d.is_system_generated()));
        }
    }

    #[test]
    fn test_name_roundtrip() {
        for position in PositionType::ALL {
            assert_eq!(position.as_str().parse::<PositionType>().unwrap(), position);
        }
    }
}
