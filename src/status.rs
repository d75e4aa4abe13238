//! Application Lifecycle Status
//!
//! The single authoritative workflow position of an application. External
//! callers (dashboards, notification templates) branch on the numeric
//! codes, so the enum-to-code mapping is stable and documented here:
//!
//! | code | status                  | code | status                  |
//! |------|-------------------------|------|-------------------------|
//! | 1    | draft                   | 12   | payment_pending         |
//! | 2    | submitted               | 13   | paid                    |
//! | 3    | je_pending              | 14   | clerk_pending           |
//! | 4    | appointment_scheduled   | 15   | clerk_approved          |
//! | 5    | je_verified             | 16   | ee_stage2_pending       |
//! | 6    | ae_pending              | 17   | ee_stage2_signed        |
//! | 7    | ae_signed               | 18   | ce_stage2_pending       |
//! | 8    | ee_stage1_pending       | 19   | ce_stage2_signed        |
//! | 9    | ee_stage1_signed        | 20   | approved                |
//! | 10   | ce_stage1_pending       | 37   | rejected                |
//! | 11   | ce_stage1_signed        |      |                         |
//!
//! Codes 1–20 follow the forward chain; 37 is the historical code for
//! rejection and is kept as-is so existing callers keep working.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Current lifecycle state of an application.
///
/// Serialized as its stable integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum ApplicationStatus {
    Draft,
    Submitted,
    JePending,
    AppointmentScheduled,
    JeVerified,
    AePending,
    AeSigned,
    EeStage1Pending,
    EeStage1Signed,
    CeStage1Pending,
    CeStage1Signed,
    PaymentPending,
    Paid,
    ClerkPending,
    ClerkApproved,
    EeStage2Pending,
    EeStage2Signed,
    CeStage2Pending,
    CeStage2Signed,
    Approved,
    Rejected,
}

/// Which signing pass an OTP signature belongs to.
///
/// EE and CE sign twice in the lifecycle; the pass is always derived from
/// the current status, never supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SigningStage {
    /// Recommendation/review pass (AE, EE stage 1, CE stage 1).
    Stage1,
    /// Final certificate pass (EE stage 2, CE stage 2).
    Stage2,
}

impl ApplicationStatus {
    /// All states, in chain order (rejected last).
    pub const ALL: [Self; 21] = [
        Self::Draft,
        Self::Submitted,
        Self::JePending,
        Self::AppointmentScheduled,
        Self::JeVerified,
        Self::AePending,
        Self::AeSigned,
        Self::EeStage1Pending,
        Self::EeStage1Signed,
        Self::CeStage1Pending,
        Self::CeStage1Signed,
        Self::PaymentPending,
        Self::Paid,
        Self::ClerkPending,
        Self::ClerkApproved,
        Self::EeStage2Pending,
        Self::EeStage2Signed,
        Self::CeStage2Pending,
        Self::CeStage2Signed,
        Self::Approved,
        Self::Rejected,
    ];

    /// Stable integer code (see module table).
    pub fn code(&self) -> i32 {
        match self {
            Self::Draft => 1,
            Self::Submitted => 2,
            Self::JePending => 3,
            Self::AppointmentScheduled => 4,
            Self::JeVerified => 5,
            Self::AePending => 6,
            Self::AeSigned => 7,
            Self::EeStage1Pending => 8,
            Self::EeStage1Signed => 9,
            Self::CeStage1Pending => 10,
            Self::CeStage1Signed => 11,
            Self::PaymentPending => 12,
            Self::Paid => 13,
            Self::ClerkPending => 14,
            Self::ClerkApproved => 15,
            Self::EeStage2Pending => 16,
            Self::EeStage2Signed => 17,
            Self::CeStage2Pending => 18,
            Self::CeStage2Signed => 19,
            Self::Approved => 20,
            Self::Rejected => 37,
        }
    }

    /// Resolve a stable integer code back to a status.
    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.code() == code)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Submitted => "submitted",
            Self::JePending => "je_pending",
            Self::AppointmentScheduled => "appointment_scheduled",
            Self::JeVerified => "je_verified",
            Self::AePending => "ae_pending",
            Self::AeSigned => "ae_signed",
            Self::EeStage1Pending => "ee_stage1_pending",
            Self::EeStage1Signed => "ee_stage1_signed",
            Self::CeStage1Pending => "ce_stage1_pending",
            Self::CeStage1Signed => "ce_stage1_signed",
            Self::PaymentPending => "payment_pending",
            Self::Paid => "paid",
            Self::ClerkPending => "clerk_pending",
            Self::ClerkApproved => "clerk_approved",
            Self::EeStage2Pending => "ee_stage2_pending",
            Self::EeStage2Signed => "ee_stage2_signed",
            Self::CeStage2Pending => "ce_stage2_pending",
            Self::CeStage2Signed => "ce_stage2_signed",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    /// States the engine forwards out of automatically, in the same call
    /// that entered them. Never user-visible as a resting state.
    pub fn is_auto_forward(&self) -> bool {
        matches!(
            self,
            Self::Submitted
                | Self::JeVerified
                | Self::AeSigned
                | Self::EeStage1Signed
                | Self::CeStage1Signed
                | Self::Paid
                | Self::ClerkApproved
                | Self::EeStage2Signed
                | Self::CeStage2Signed
        )
    }

    /// States waiting on a human (or gateway) action.
    pub fn is_actionable(&self) -> bool {
        matches!(
            self,
            Self::Draft
                | Self::JePending
                | Self::AppointmentScheduled
                | Self::AePending
                | Self::EeStage1Pending
                | Self::CeStage1Pending
                | Self::PaymentPending
                | Self::ClerkPending
                | Self::EeStage2Pending
                | Self::CeStage2Pending
                | Self::Rejected
        )
    }

    /// Terminal success. Rejected is not terminal: the applicant may
    /// resubmit out of it.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved)
    }

    /// Which signing pass a pending signature state belongs to, if any.
    pub fn signing_stage(&self) -> Option<SigningStage> {
        match self {
            Self::AePending | Self::EeStage1Pending | Self::CeStage1Pending => {
                Some(SigningStage::Stage1)
            }
            Self::EeStage2Pending | Self::CeStage2Pending => Some(SigningStage::Stage2),
            _ => None,
        }
    }
}

impl From<ApplicationStatus> for i32 {
    fn from(status: ApplicationStatus) -> Self {
        status.code()
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown status code: {0}")]
pub struct UnknownStatusCode(pub i32);

impl TryFrom<i32> for ApplicationStatus {
    type Error = UnknownStatusCode;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        Self::from_code(code).ok_or(UnknownStatusCode(code))
    }
}

impl std::fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown status name: {0}")]
pub struct UnknownStatusName(pub String);

impl FromStr for ApplicationStatus {
    type Err = UnknownStatusName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| UnknownStatusName(s.to_string()))
    }
}
