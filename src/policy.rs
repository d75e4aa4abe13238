//! Role Policy
//!
//! One lookup table answers both guard questions: which actor a given
//! status waits on, and which actions that status admits. Both a wrong
//! role and a wrong action for the current status fail the same way, so a
//! rejected caller cannot probe who else could act.

use serde::{Deserialize, Serialize};

use crate::record::ApplicationRecord;
use crate::role::Role;
use crate::status::ApplicationStatus;
use crate::WorkflowError;

/// The action kinds a transition request can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    SaveDraft,
    Submit,
    ScheduleAppointment,
    RescheduleAppointment,
    VerifyDocuments,
    GenerateOtp,
    VerifyAndSign,
    InitiatePayment,
    ConfirmPayment,
    Approve,
    Reject,
    Resubmit,
}

/// Actions admitted by a status. Empty for auto-forward and terminal
/// states: nothing rests there for anyone to act on.
pub fn allowed_actions(status: ApplicationStatus) -> &'static [ActionKind] {
    use ActionKind::*;
    use ApplicationStatus::*;
    match status {
        Draft => &[SaveDraft, Submit],
        JePending => &[ScheduleAppointment, Reject],
        AppointmentScheduled => &[RescheduleAppointment, VerifyDocuments, Reject],
        AePending | EeStage1Pending | CeStage1Pending | EeStage2Pending | CeStage2Pending => {
            &[GenerateOtp, VerifyAndSign, Reject]
        }
        PaymentPending => &[InitiatePayment, ConfirmPayment],
        ClerkPending => &[Approve, Reject],
        Rejected => &[Resubmit],
        Submitted | JeVerified | AeSigned | EeStage1Signed | CeStage1Signed | Paid
        | ClerkApproved | EeStage2Signed | CeStage2Signed | Approved => &[],
    }
}

/// Whether `role` is the actor the record's current status waits on.
pub fn actor_matches(role: &Role, record: &ApplicationRecord) -> bool {
    use ApplicationStatus::*;
    match record.status {
        Draft | Rejected => matches!(role, Role::Applicant),
        JePending | AppointmentScheduled => matches!(role, Role::JuniorEngineer),
        AePending => {
            matches!(role, Role::AssistantEngineer { position } if *position == record.position)
        }
        EeStage1Pending | EeStage2Pending => matches!(role, Role::ExecutiveEngineer),
        CeStage1Pending | CeStage2Pending => matches!(role, Role::CityEngineer),
        PaymentPending => matches!(role, Role::Applicant | Role::System),
        ClerkPending => matches!(role, Role::Clerk),
        Submitted | JeVerified | AeSigned | EeStage1Signed | CeStage1Signed | Paid
        | ClerkApproved | EeStage2Signed | CeStage2Signed | Approved => false,
    }
}

/// Guard a transition request: the action must be admitted by the current
/// status and the actor must be the status's designated role.
pub fn ensure(role: &Role, record: &ApplicationRecord, action: ActionKind) -> Result<(), WorkflowError> {
    if !allowed_actions(record.status).contains(&action) {
        return Err(WorkflowError::Authorization);
    }
    if !actor_matches(role, record) {
        return Err(WorkflowError::Authorization);
    }
    Ok(())
}

/// Statuses a role's work queue is built from.
pub fn actionable_statuses(role: &Role) -> &'static [ApplicationStatus] {
    use ApplicationStatus::*;
    match role {
        Role::Applicant => &[Draft, PaymentPending, Rejected],
        Role::JuniorEngineer => &[JePending, AppointmentScheduled],
        Role::AssistantEngineer { .. } => &[AePending],
        Role::ExecutiveEngineer => &[EeStage1Pending, EeStage2Pending],
        Role::CityEngineer => &[CeStage1Pending, CeStage2Pending],
        Role::Clerk => &[ClerkPending],
        Role::System => &[],
    }
}
