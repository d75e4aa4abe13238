//! Licence Application Workflow Engine
//!
//! Core lifecycle logic for municipal professional-licence applications:
//! applicants register for a position grade, upload supporting documents,
//! and the application moves through a fixed approval chain
//! (Junior Engineer → Assistant Engineer → Executive Engineer →
//! City Engineer → Clerk) with appointment-gated document verification,
//! OTP-gated digital signatures, a fee payment gate, and asynchronous
//! certificate issuance.
//!
//! The crate is transport-agnostic: a UI or HTTP layer calls
//! [`WorkflowEngine::apply`] (or the per-action wrappers) and renders the
//! returned state. Persistence, document rendering, and notification
//! delivery are traits so deployments can swap backends.

pub mod appointment;
pub mod certificate;
pub mod content_store;
pub mod docgen;
pub mod document;
pub mod engine;
pub mod memory;
pub mod notify;
pub mod otp;
#[cfg(feature = "database")]
pub mod pg;
pub mod policy;
pub mod position;
pub mod record;
pub mod role;
pub mod status;
pub mod store;

pub use appointment::{Appointment, Reschedule, RescheduleRequest, ScheduleRequest};
pub use certificate::CertificateWorker;
pub use content_store::{ContentStore, ContentStoreError, InMemoryContentStore, LocalContentStore};
pub use docgen::{DocumentGenerator, GeneratedDocument, GeneratedKind, PlainTextGenerator};
pub use document::{ContentHandle, DocumentRef, DocumentType};
pub use engine::{
    Action, ApplicationView, CertificateStatus, DocumentUpload, EngineConfig, OtpDelivery,
    SideEffect, TransitionOutcome, WorkflowEngine,
};
pub use memory::InMemoryStore;
pub use notify::{NoopNotifier, Notifier, NotifierEvent, NotifyError, RecordingNotifier};
pub use otp::{OtpCheck, OtpSession, SignerRole};
#[cfg(feature = "database")]
pub use pg::PgStore;
pub use policy::ActionKind;
pub use position::PositionType;
pub use record::{
    Address, ApplicantProfile, ApplicationRecord, CertificateInfo, DraftUpdate, Experience,
    NewApplication, PaymentInfo, Qualification, RejectionRecord, StatusChange,
};
pub use role::Role;
pub use status::{ApplicationStatus, SigningStage};
pub use store::{CertificateJob, StoreError, WorkflowStore};

use uuid::Uuid;

/// Errors returned by workflow operations.
///
/// Every failure is reported to the caller as one of these; a failed
/// operation never partially applies (the record status and its documents
/// are only persisted together, after all guards pass).
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// Wrong role/state pairing. Deliberately carries no hint of which
    /// role could act on the current state.
    #[error("not permitted")]
    Authorization,

    /// A required field is missing or malformed.
    #[error("validation failed for '{field}': {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    /// Missing, expired, mismatched, already-consumed, or attempt-capped
    /// one-time code. A single message for all of these so repeated probing
    /// learns nothing about the session.
    #[error("invalid or expired one-time code")]
    InvalidOtp,

    #[error("{0} not found")]
    NotFound(Resource),

    /// A concurrent transition raced this one and the precondition no
    /// longer holds. The caller should reload and retry.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A collaborator (store, document generator, delivery channel) failed.
    #[error("{service} failure: {message}")]
    ExternalService {
        service: &'static str,
        message: String,
    },
}

impl WorkflowError {
    /// Shorthand for a field-level validation failure.
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }
}

/// Identifies the missing entity in a [`WorkflowError::NotFound`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Application(Uuid),
    Appointment(Uuid),
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Application(id) => write!(f, "application {id}"),
            Self::Appointment(id) => write!(f, "appointment {id}"),
        }
    }
}

/// Trim a required text field, rejecting empty values.
pub(crate) fn required_trimmed(
    field: &'static str,
    value: &str,
) -> Result<String, WorkflowError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(WorkflowError::validation(field, "must not be empty"));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_trimmed() {
        assert_eq!(required_trimmed("place", "  Ward Office ").unwrap(), "Ward Office");
        assert!(matches!(
            required_trimmed("place", "   "),
            Err(WorkflowError::Validation { field: "place", .. })
        ));
    }

    #[test]
    fn test_authorization_message_does_not_leak_roles() {
        let err = WorkflowError::Authorization;
        assert_eq!(err.to_string(), "not permitted");
    }
}
