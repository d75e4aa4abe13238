//! Storage Abstraction
//!
//! Persistence seam for the workflow engine. Implementations must make
//! two operations atomic: the version-checked application save (so racing
//! transitions cannot both win) and OTP consumption (so a leaked code
//! cannot be spent twice).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::appointment::Appointment;
use crate::otp::{OtpSession, SignerRole};
use crate::record::ApplicationRecord;
use crate::status::ApplicationStatus;
use crate::{Resource, WorkflowError};

/// Error type for store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("application not found: {0}")]
    ApplicationNotFound(Uuid),

    #[error("appointment not found: {0}")]
    AppointmentNotFound(Uuid),

    /// The record changed since it was loaded; the save was not applied.
    #[error("version conflict for application {0}")]
    VersionConflict(Uuid),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "database")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<StoreError> for WorkflowError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ApplicationNotFound(id) => Self::NotFound(Resource::Application(id)),
            StoreError::AppointmentNotFound(id) => Self::NotFound(Resource::Appointment(id)),
            StoreError::VersionConflict(id) => {
                Self::Conflict(format!("application {id} was modified concurrently"))
            }
            other => Self::ExternalService {
                service: "store",
                message: other.to_string(),
            },
        }
    }
}

/// A queued certificate-generation job. At most one per application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateJob {
    pub application_id: Uuid,
    pub queued_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// Persistence for application records and their sub-resources.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    // ── Applications ──────────────────────────────────────────────────

    async fn insert_application(&self, record: &ApplicationRecord) -> Result<(), StoreError>;

    async fn load_application(&self, id: Uuid) -> Result<ApplicationRecord, StoreError>;

    /// Persist the record if its stored version still matches
    /// `record.version`; bumps the version on success. A stale record
    /// fails with [`StoreError::VersionConflict`] and changes nothing.
    async fn save_application(&self, record: &mut ApplicationRecord) -> Result<(), StoreError>;

    async fn list_by_status(
        &self,
        statuses: &[ApplicationStatus],
    ) -> Result<Vec<ApplicationRecord>, StoreError>;

    /// Allocate the next human-readable application number.
    async fn next_application_number(&self) -> Result<String, StoreError>;

    // ── Appointments (one active per application) ─────────────────────

    async fn upsert_appointment(&self, appointment: &Appointment) -> Result<(), StoreError>;

    async fn appointment_for_application(
        &self,
        application_id: Uuid,
    ) -> Result<Option<Appointment>, StoreError>;

    async fn load_appointment(&self, appointment_id: Uuid) -> Result<Appointment, StoreError>;

    /// Remove the active appointment, if any. Idempotent.
    async fn remove_appointment(&self, application_id: Uuid) -> Result<(), StoreError>;

    // ── OTP sessions (one active per application + signer) ────────────

    /// Store a session, replacing any active one for the same
    /// (application, signer) pair.
    async fn put_otp_session(&self, session: &OtpSession) -> Result<(), StoreError>;

    async fn active_otp_session(
        &self,
        application_id: Uuid,
        signer: SignerRole,
    ) -> Result<Option<OtpSession>, StoreError>;

    /// Atomically mark the session consumed iff it is not already.
    /// Returns whether this call won the consumption.
    async fn consume_otp_session(
        &self,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Count a failed verification attempt; returns the new total.
    /// Unknown sessions count as zero (the session raced away).
    async fn record_otp_failure(&self, session_id: Uuid) -> Result<u32, StoreError>;

    /// Drop all sessions for an application (rejection cleanup).
    async fn remove_otp_sessions(&self, application_id: Uuid) -> Result<(), StoreError>;

    // ── Certificate issuance queue ────────────────────────────────────

    /// Queue certificate generation. Idempotent per application.
    async fn enqueue_certificate_job(
        &self,
        application_id: Uuid,
        queued_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Claim the next job for processing, if any.
    async fn claim_certificate_job(&self) -> Result<Option<CertificateJob>, StoreError>;

    /// Return a claimed job to the queue after a failure.
    async fn requeue_certificate_job(
        &self,
        job: &CertificateJob,
        error: &str,
    ) -> Result<(), StoreError>;

    /// Drop a claimed job after success (or after giving up).
    async fn complete_certificate_job(&self, application_id: Uuid) -> Result<(), StoreError>;
}
