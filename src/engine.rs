//! Workflow Engine
//!
//! Validates and applies lifecycle transitions. Every request passes the
//! same gate order: record exists → actor authorized for the current
//! status and action → payload valid → execute. Reaching an auto-forward
//! state immediately advances again in the same call, so callers always
//! land on a human-visible resting state; every hop is recorded in the
//! record's history.
//!
//! Status, documents, payment, and history persist together through one
//! version-checked save; a raced transition fails with a conflict and
//! applies nothing to the record.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::appointment::{Appointment, RescheduleRequest, ScheduleRequest};
use crate::docgen::{DocumentGenerator, GeneratedKind};
use crate::document::{ContentHandle, DocumentRef, DocumentType};
use crate::notify::Notifier;
use crate::otp::{OtpCheck, OtpSession, SignerRole};
use crate::policy::{self, ActionKind};
use crate::position::PositionType;
use crate::record::{
    ApplicationRecord, DraftUpdate, NewApplication, PaymentInfo, RejectionRecord,
};
use crate::role::Role;
use crate::status::{ApplicationStatus, SigningStage};
use crate::store::WorkflowStore;
use crate::{required_trimmed, WorkflowError};

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long an issued one-time code stays valid.
    pub otp_ttl: Duration,
    /// Failed verification attempts before a session is invalidated.
    pub otp_max_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            otp_ttl: Duration::minutes(10),
            otp_max_attempts: 5,
        }
    }
}

/// A transition request payload.
#[derive(Debug, Clone)]
pub enum Action {
    Submit,
    ScheduleAppointment(ScheduleRequest),
    RescheduleAppointment(RescheduleRequest),
    VerifyDocuments { comments: Option<String> },
    GenerateOtp,
    VerifyAndSign { otp: String, comments: Option<String> },
    InitiatePayment,
    ConfirmPayment { gateway_reference: String },
    Approve { comments: Option<String> },
    Reject { comments: String },
    Resubmit,
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Submit => ActionKind::Submit,
            Self::ScheduleAppointment(_) => ActionKind::ScheduleAppointment,
            Self::RescheduleAppointment(_) => ActionKind::RescheduleAppointment,
            Self::VerifyDocuments { .. } => ActionKind::VerifyDocuments,
            Self::GenerateOtp => ActionKind::GenerateOtp,
            Self::VerifyAndSign { .. } => ActionKind::VerifyAndSign,
            Self::InitiatePayment => ActionKind::InitiatePayment,
            Self::ConfirmPayment { .. } => ActionKind::ConfirmPayment,
            Self::Approve { .. } => ActionKind::Approve,
            Self::Reject { .. } => ActionKind::Reject,
            Self::Resubmit => ActionKind::Resubmit,
        }
    }
}

/// Deterministic side effects of an applied transition, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum SideEffect {
    ApplicationNumberAssigned {
        number: String,
    },
    AppointmentScheduled {
        appointment_id: Uuid,
        review_at: DateTime<Utc>,
    },
    AppointmentRescheduled {
        appointment_id: Uuid,
        review_at: DateTime<Utc>,
    },
    DocumentsVerified {
        count: usize,
    },
    OtpIssued {
        session_id: Uuid,
        signer: SignerRole,
        expires_at: DateTime<Utc>,
    },
    DocumentGenerated {
        doc_type: DocumentType,
        document_id: Uuid,
    },
    PaymentRecorded {
        amount: Decimal,
        gateway_reference: String,
    },
    Rejected {
        stage: ApplicationStatus,
    },
    Resubmitted,
    Forwarded {
        from: ApplicationStatus,
        to: ApplicationStatus,
    },
    CertificateQueued,
}

/// Result of a successfully applied transition.
#[derive(Debug, Clone, Serialize)]
pub struct TransitionOutcome {
    pub status: ApplicationStatus,
    pub effects: Vec<SideEffect>,
}

/// Delivery confirmation for an issued one-time code. Never carries the
/// code itself; that travels only through the notification channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OtpDelivery {
    pub session_id: Uuid,
    pub signer: SignerRole,
    pub expires_at: DateTime<Utc>,
}

/// Upload payload: the bytes already live in the document store, the
/// engine records the typed reference.
#[derive(Debug, Clone)]
pub struct DocumentUpload {
    pub doc_type: DocumentType,
    pub file_name: String,
    pub size_bytes: u64,
    pub handle: ContentHandle,
}

/// Denormalized read view of one application.
#[derive(Debug, Clone, Serialize)]
pub struct ApplicationView {
    pub record: ApplicationRecord,
    pub appointment: Option<Appointment>,
}

/// Poll result for asynchronous certificate issuance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CertificateStatus {
    pub exists: bool,
    pub certificate_id: Option<Uuid>,
    pub generated_at: Option<DateTime<Utc>>,
}

/// Deferred applicant notifications, sent after the record is saved.
enum Notice {
    Scheduled(Appointment),
    Rescheduled { appointment: Appointment, reason: String },
    Rejected(RejectionRecord),
}

/// The application workflow engine.
pub struct WorkflowEngine {
    store: Arc<dyn WorkflowStore>,
    notifier: Arc<dyn Notifier>,
    generator: Arc<dyn DocumentGenerator>,
    config: EngineConfig,
}

impl WorkflowEngine {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        notifier: Arc<dyn Notifier>,
        generator: Arc<dyn DocumentGenerator>,
    ) -> Self {
        Self::with_config(store, notifier, generator, EngineConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn WorkflowStore>,
        notifier: Arc<dyn Notifier>,
        generator: Arc<dyn DocumentGenerator>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            generator,
            config,
        }
    }

    // ── Queries ───────────────────────────────────────────────────────

    /// Full denormalized view of one application.
    pub async fn get_application(&self, id: Uuid) -> Result<ApplicationView, WorkflowError> {
        let record = self.store.load_application(id).await?;
        let appointment = self.store.appointment_for_application(id).await?;
        Ok(ApplicationView {
            record,
            appointment,
        })
    }

    /// Applications waiting on the given role, optionally narrowed to one
    /// position grade.
    pub async fn get_pending_applications(
        &self,
        actor: &Role,
        position: Option<PositionType>,
    ) -> Result<Vec<ApplicationRecord>, WorkflowError> {
        let statuses = policy::actionable_statuses(actor);
        let mut records = self.store.list_by_status(statuses).await?;
        if let Role::AssistantEngineer { position: scope } = actor {
            records.retain(|r| r.position == *scope);
        }
        if let Some(position) = position {
            records.retain(|r| r.position == position);
        }
        Ok(records)
    }

    /// Poll certificate issuance. Generation runs asynchronously after
    /// terminal approval; callers poll rather than assume availability.
    pub async fn certificate_status(&self, id: Uuid) -> Result<CertificateStatus, WorkflowError> {
        let record = self.store.load_application(id).await?;
        Ok(match record.certificate {
            Some(certificate) => CertificateStatus {
                exists: true,
                certificate_id: Some(certificate.certificate_id),
                generated_at: Some(certificate.generated_at),
            },
            None => CertificateStatus {
                exists: false,
                certificate_id: None,
                generated_at: None,
            },
        })
    }

    // ── Draft lifecycle ───────────────────────────────────────────────

    /// Create a new draft application.
    pub async fn create_draft(
        &self,
        new: NewApplication,
    ) -> Result<ApplicationRecord, WorkflowError> {
        let record = ApplicationRecord::new_draft(new);
        self.store.insert_application(&record).await?;
        info!(application_id = %record.id, position = %record.position, "draft created");
        Ok(record)
    }

    /// Update draft fields. Only the applicant, only while in draft.
    pub async fn save_draft(
        &self,
        id: Uuid,
        update: DraftUpdate,
        actor: &Role,
    ) -> Result<ApplicationRecord, WorkflowError> {
        let mut record = self.store.load_application(id).await?;
        policy::ensure(actor, &record, ActionKind::SaveDraft)?;

        if let Some(applicant) = update.applicant {
            record.applicant = applicant;
        }
        if let Some(local_address) = update.local_address {
            record.local_address = local_address;
        }
        if let Some(permanent_address) = update.permanent_address {
            record.permanent_address = permanent_address;
        }
        if let Some(qualifications) = update.qualifications {
            record.qualifications = qualifications;
        }
        if let Some(experiences) = update.experiences {
            record.experiences = experiences;
        }

        self.store.save_application(&mut record).await?;
        Ok(record)
    }

    /// Record an uploaded document reference. Allowed to the applicant
    /// while the record is editable (draft, or rejected pending rework).
    pub async fn upload_document(
        &self,
        id: Uuid,
        upload: DocumentUpload,
        actor: &Role,
    ) -> Result<DocumentRef, WorkflowError> {
        let mut record = self.store.load_application(id).await?;
        if !matches!(actor, Role::Applicant)
            || !matches!(
                record.status,
                ApplicationStatus::Draft | ApplicationStatus::Rejected
            )
        {
            return Err(WorkflowError::Authorization);
        }
        if upload.doc_type.is_system_generated() {
            return Err(WorkflowError::validation(
                "doc_type",
                format!("{} is generated by the system", upload.doc_type),
            ));
        }
        let file_name = required_trimmed("file_name", &upload.file_name)?;

        let doc = DocumentRef::new(upload.doc_type, file_name, upload.size_bytes, upload.handle);
        record.upsert_document(doc.clone());
        self.store.save_application(&mut record).await?;
        debug!(application_id = %id, doc_type = %doc.doc_type, "document attached");
        Ok(doc)
    }

    // ── Transitions ───────────────────────────────────────────────────

    /// Validate and apply one transition request.
    pub async fn apply(
        &self,
        id: Uuid,
        action: Action,
        actor: &Role,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let mut record = self.store.load_application(id).await?;

        // A duplicate gateway confirmation for an already-paid application
        // is a no-op, not an error, regardless of where the record has
        // moved since.
        if let Action::ConfirmPayment { .. } = &action {
            if record.is_paid() && matches!(actor, Role::Applicant | Role::System) {
                debug!(application_id = %id, "duplicate payment confirmation ignored");
                return Ok(TransitionOutcome {
                    status: record.status,
                    effects: Vec::new(),
                });
            }
        }

        policy::ensure(actor, &record, action.kind())?;

        let mut effects = Vec::new();
        let mut notices = Vec::new();
        // Appointment reschedules and OTP issuance touch sub-resources
        // only; everything else goes through the version-checked save.
        let mut dirty = true;

        match action {
            Action::Submit => {
                Self::validate_submission(&record)?;
                if record.application_number.is_none() {
                    let number = self.store.next_application_number().await?;
                    effects.push(SideEffect::ApplicationNumberAssigned {
                        number: number.clone(),
                    });
                    record.application_number = Some(number);
                }
                record.set_status(ApplicationStatus::Submitted, actor.label(), None);
            }

            Action::ScheduleAppointment(request) => {
                let request = request.validated(Utc::now())?;
                let appointment = Appointment::schedule(record.id, request);
                self.store.upsert_appointment(&appointment).await?;
                record.set_status(ApplicationStatus::AppointmentScheduled, actor.label(), None);
                effects.push(SideEffect::AppointmentScheduled {
                    appointment_id: appointment.appointment_id,
                    review_at: appointment.review_at,
                });
                notices.push(Notice::Scheduled(appointment));
            }

            Action::RescheduleAppointment(request) => {
                dirty = false;
                let request = request.validated(Utc::now())?;
                let mut appointment = self
                    .store
                    .appointment_for_application(record.id)
                    .await?
                    .ok_or_else(|| {
                        WorkflowError::Conflict("no active appointment for application".to_string())
                    })?;
                let reason = request.reason.clone();
                appointment.reschedule(request);
                self.store.upsert_appointment(&appointment).await?;
                effects.push(SideEffect::AppointmentRescheduled {
                    appointment_id: appointment.appointment_id,
                    review_at: appointment.review_at,
                });
                notices.push(Notice::Rescheduled {
                    appointment,
                    reason,
                });
            }

            Action::VerifyDocuments { comments } => {
                let appointment = self
                    .store
                    .appointment_for_application(record.id)
                    .await?
                    .ok_or_else(|| {
                        WorkflowError::Conflict("no active appointment for application".to_string())
                    })?;
                let mut count = 0usize;
                for doc in &mut record.documents {
                    if !doc.doc_type.is_system_generated() && !doc.verified {
                        doc.verified = true;
                        count += 1;
                    }
                }
                // The appointment's purpose is served; it is no longer
                // actionable once the record moves past the JE stage.
                self.store.remove_appointment(record.id).await?;
                debug!(
                    application_id = %record.id,
                    appointment_id = %appointment.appointment_id,
                    count,
                    "documents verified"
                );
                record.set_status(
                    ApplicationStatus::JeVerified,
                    actor.label(),
                    normalize_comments(comments),
                );
                effects.push(SideEffect::DocumentsVerified { count });
            }

            Action::GenerateOtp => {
                dirty = false;
                let delivery = self.issue_otp(&record, actor).await?;
                effects.push(SideEffect::OtpIssued {
                    session_id: delivery.session_id,
                    signer: delivery.signer,
                    expires_at: delivery.expires_at,
                });
            }

            Action::VerifyAndSign { otp, comments } => {
                self.verify_and_consume_otp(&record, actor, &otp).await?;
                let kind = match record.status.signing_stage() {
                    Some(SigningStage::Stage1) => GeneratedKind::RecommendationForm,
                    Some(SigningStage::Stage2) => GeneratedKind::LicenseCertificate,
                    None => return Err(WorkflowError::Authorization),
                };
                let doc = self.render_document(kind, &record).await?;
                effects.push(SideEffect::DocumentGenerated {
                    doc_type: doc.doc_type,
                    document_id: doc.document_id,
                });
                record.upsert_document(doc);

                let signed = match record.status {
                    ApplicationStatus::AePending => ApplicationStatus::AeSigned,
                    ApplicationStatus::EeStage1Pending => ApplicationStatus::EeStage1Signed,
                    ApplicationStatus::CeStage1Pending => ApplicationStatus::CeStage1Signed,
                    ApplicationStatus::EeStage2Pending => ApplicationStatus::EeStage2Signed,
                    ApplicationStatus::CeStage2Pending => ApplicationStatus::CeStage2Signed,
                    _ => return Err(WorkflowError::Authorization),
                };
                record.set_status(signed, actor.label(), normalize_comments(comments));
            }

            Action::InitiatePayment => {
                if record.document(DocumentType::PaymentChallan).is_none() {
                    let doc = self
                        .render_document(GeneratedKind::PaymentChallan, &record)
                        .await?;
                    effects.push(SideEffect::DocumentGenerated {
                        doc_type: doc.doc_type,
                        document_id: doc.document_id,
                    });
                    record.upsert_document(doc);
                }
            }

            Action::ConfirmPayment { gateway_reference } => {
                let gateway_reference =
                    required_trimmed("gateway_reference", &gateway_reference)?;
                // Gateway callbacks may arrive without a prior initiation.
                if record.document(DocumentType::PaymentChallan).is_none() {
                    let doc = self
                        .render_document(GeneratedKind::PaymentChallan, &record)
                        .await?;
                    effects.push(SideEffect::DocumentGenerated {
                        doc_type: doc.doc_type,
                        document_id: doc.document_id,
                    });
                    record.upsert_document(doc);
                }
                let amount = record.fee();
                record.payment = Some(PaymentInfo {
                    amount,
                    gateway_reference: gateway_reference.clone(),
                    paid_at: Utc::now(),
                });
                record.set_status(ApplicationStatus::Paid, actor.label(), None);
                effects.push(SideEffect::PaymentRecorded {
                    amount,
                    gateway_reference,
                });
            }

            Action::Approve { comments } => {
                record.set_status(
                    ApplicationStatus::ClerkApproved,
                    actor.label(),
                    normalize_comments(comments),
                );
            }

            Action::Reject { comments } => {
                let comments = required_trimmed("comments", &comments)?;
                let rejection = RejectionRecord {
                    stage: record.status,
                    rejected_by: actor.label().to_string(),
                    comments: comments.clone(),
                    rejected_at: Utc::now(),
                };
                record.rejection = Some(rejection.clone());
                record.set_status(ApplicationStatus::Rejected, actor.label(), Some(comments));
                // Nothing in flight survives a rejection.
                self.store.remove_appointment(record.id).await?;
                self.store.remove_otp_sessions(record.id).await?;
                effects.push(SideEffect::Rejected {
                    stage: rejection.stage,
                });
                notices.push(Notice::Rejected(rejection));
            }

            Action::Resubmit => {
                Self::validate_submission(&record)?;
                record.rejection = None;
                // Full restart: earlier sign-offs are void, so verified
                // flags reset and stage-generated documents go; payment
                // and its challan persist.
                for doc in &mut record.documents {
                    if !doc.doc_type.is_system_generated() {
                        doc.verified = false;
                    }
                }
                record.remove_documents_of_type(DocumentType::RecommendationForm);
                record.remove_documents_of_type(DocumentType::LicenseCertificate);
                record.certificate_requested_at = None;
                record.certificate = None;
                record.set_status(ApplicationStatus::Submitted, actor.label(), None);
                effects.push(SideEffect::Resubmitted);
            }
        }

        if dirty {
            let reached_approved = self.auto_forward(&mut record, &mut effects);
            self.store.save_application(&mut record).await?;
            info!(
                application_id = %record.id,
                status = %record.status,
                actor = %actor,
                "transition applied"
            );
            if reached_approved {
                if let Err(e) = self
                    .store
                    .enqueue_certificate_job(record.id, Utc::now())
                    .await
                {
                    warn!(
                        application_id = %record.id,
                        error = %e,
                        "failed to queue certificate generation"
                    );
                }
            }
        }

        self.send_notices(&record, notices).await;

        Ok(TransitionOutcome {
            status: record.status,
            effects,
        })
    }

    // ── Per-action wrappers ───────────────────────────────────────────

    pub async fn submit(&self, id: Uuid, actor: &Role) -> Result<TransitionOutcome, WorkflowError> {
        self.apply(id, Action::Submit, actor).await
    }

    pub async fn schedule_appointment(
        &self,
        id: Uuid,
        request: ScheduleRequest,
        actor: &Role,
    ) -> Result<TransitionOutcome, WorkflowError> {
        self.apply(id, Action::ScheduleAppointment(request), actor).await
    }

    /// Reschedule by appointment id, resolving it to its application.
    pub async fn reschedule_appointment(
        &self,
        appointment_id: Uuid,
        request: RescheduleRequest,
        actor: &Role,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let appointment = self.store.load_appointment(appointment_id).await?;
        self.apply(
            appointment.application_id,
            Action::RescheduleAppointment(request),
            actor,
        )
        .await
    }

    pub async fn verify_documents(
        &self,
        id: Uuid,
        comments: Option<String>,
        actor: &Role,
    ) -> Result<TransitionOutcome, WorkflowError> {
        self.apply(id, Action::VerifyDocuments { comments }, actor).await
    }

    /// Issue a signing code for the acting role, replacing any earlier
    /// session. Returns the delivery confirmation, never the code.
    pub async fn generate_otp(
        &self,
        id: Uuid,
        actor: &Role,
    ) -> Result<OtpDelivery, WorkflowError> {
        let outcome = self.apply(id, Action::GenerateOtp, actor).await?;
        outcome
            .effects
            .into_iter()
            .find_map(|effect| match effect {
                SideEffect::OtpIssued {
                    session_id,
                    signer,
                    expires_at,
                } => Some(OtpDelivery {
                    session_id,
                    signer,
                    expires_at,
                }),
                _ => None,
            })
            .ok_or(WorkflowError::ExternalService {
                service: "otp",
                message: "issuance produced no delivery confirmation".to_string(),
            })
    }

    pub async fn verify_and_sign(
        &self,
        id: Uuid,
        otp: impl Into<String>,
        comments: Option<String>,
        actor: &Role,
    ) -> Result<TransitionOutcome, WorkflowError> {
        self.apply(
            id,
            Action::VerifyAndSign {
                otp: otp.into(),
                comments,
            },
            actor,
        )
        .await
    }

    pub async fn initiate_payment(
        &self,
        id: Uuid,
        actor: &Role,
    ) -> Result<TransitionOutcome, WorkflowError> {
        self.apply(id, Action::InitiatePayment, actor).await
    }

    pub async fn confirm_payment(
        &self,
        id: Uuid,
        gateway_reference: impl Into<String>,
        actor: &Role,
    ) -> Result<TransitionOutcome, WorkflowError> {
        self.apply(
            id,
            Action::ConfirmPayment {
                gateway_reference: gateway_reference.into(),
            },
            actor,
        )
        .await
    }

    pub async fn approve(
        &self,
        id: Uuid,
        comments: Option<String>,
        actor: &Role,
    ) -> Result<TransitionOutcome, WorkflowError> {
        self.apply(id, Action::Approve { comments }, actor).await
    }

    pub async fn reject(
        &self,
        id: Uuid,
        comments: impl Into<String>,
        actor: &Role,
    ) -> Result<TransitionOutcome, WorkflowError> {
        self.apply(
            id,
            Action::Reject {
                comments: comments.into(),
            },
            actor,
        )
        .await
    }

    pub async fn resubmit(
        &self,
        id: Uuid,
        actor: &Role,
    ) -> Result<TransitionOutcome, WorkflowError> {
        self.apply(id, Action::Resubmit, actor).await
    }

    // ── Internals ─────────────────────────────────────────────────────

    fn validate_submission(record: &ApplicationRecord) -> Result<(), WorkflowError> {
        required_trimmed("full_name", &record.applicant.full_name)?;
        required_trimmed("pan", &record.applicant.pan)?;
        required_trimmed("aadhar", &record.applicant.aadhar)?;
        if record
            .position
            .required_documents()
            .contains(&DocumentType::CoaCertificate)
        {
            required_trimmed(
                "coa_number",
                record.applicant.coa_number.as_deref().unwrap_or(""),
            )?;
        }
        let missing = record.missing_documents();
        if !missing.is_empty() {
            return Err(WorkflowError::validation(
                "documents",
                format!(
                    "missing required documents: {}",
                    missing
                        .iter()
                        .map(|d| d.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            ));
        }
        Ok(())
    }

    async fn issue_otp(
        &self,
        record: &ApplicationRecord,
        actor: &Role,
    ) -> Result<OtpDelivery, WorkflowError> {
        let signer = SignerRole::from_role(actor).ok_or(WorkflowError::Authorization)?;
        let (session, code) = OtpSession::issue(
            record.id,
            signer,
            self.config.otp_ttl,
            self.config.otp_max_attempts,
        );
        self.store.put_otp_session(&session).await?;

        // The caller needs a delivery confirmation, so a channel failure
        // fails the request; the stored session just expires unused.
        self.notifier
            .otp_code(record, signer, &code, session.expires_at)
            .await
            .map_err(|e| WorkflowError::ExternalService {
                service: "notification",
                message: e.to_string(),
            })?;

        info!(
            application_id = %record.id,
            %signer,
            session_id = %session.session_id,
            "one-time code issued"
        );
        Ok(OtpDelivery {
            session_id: session.session_id,
            signer,
            expires_at: session.expires_at,
        })
    }

    /// Check the submitted code and atomically consume the session.
    async fn verify_and_consume_otp(
        &self,
        record: &ApplicationRecord,
        actor: &Role,
        otp: &str,
    ) -> Result<(), WorkflowError> {
        let signer = SignerRole::from_role(actor).ok_or(WorkflowError::Authorization)?;
        let now = Utc::now();
        let session = self
            .store
            .active_otp_session(record.id, signer)
            .await?
            .ok_or(WorkflowError::InvalidOtp)?;

        match session.check(otp, now) {
            OtpCheck::Valid => {}
            OtpCheck::Mismatch => {
                let attempts = self.store.record_otp_failure(session.session_id).await?;
                warn!(
                    application_id = %record.id,
                    %signer,
                    attempts,
                    "one-time code mismatch"
                );
                return Err(WorkflowError::InvalidOtp);
            }
            OtpCheck::Unusable => return Err(WorkflowError::InvalidOtp),
        }

        // Single-winner consumption: a concurrent verify with the same
        // code loses here.
        if !self
            .store
            .consume_otp_session(session.session_id, now)
            .await?
        {
            return Err(WorkflowError::InvalidOtp);
        }
        Ok(())
    }

    async fn render_document(
        &self,
        kind: GeneratedKind,
        record: &ApplicationRecord,
    ) -> Result<DocumentRef, WorkflowError> {
        let generated = self.generator.render(kind, record).await.map_err(|e| {
            WorkflowError::ExternalService {
                service: "document generation",
                message: e.to_string(),
            }
        })?;
        let mut doc = DocumentRef::new(
            kind.document_type(),
            generated.file_name,
            generated.size_bytes,
            generated.handle,
        );
        doc.verified = true;
        Ok(doc)
    }

    /// Advance through auto-forward states until a resting state. Returns
    /// whether terminal approval was reached.
    fn auto_forward(
        &self,
        record: &mut ApplicationRecord,
        effects: &mut Vec<SideEffect>,
    ) -> bool {
        let mut reached_approved = false;
        while let Some(next) = auto_forward_target(record) {
            let from = record.status;
            record.set_status(next, Role::System.label(), None);
            debug!(application_id = %record.id, %from, to = %next, "auto-forward");
            effects.push(SideEffect::Forwarded { from, to: next });
            if next == ApplicationStatus::Approved {
                record.certificate_requested_at = Some(Utc::now());
                effects.push(SideEffect::CertificateQueued);
                reached_approved = true;
            }
        }
        reached_approved
    }

    async fn send_notices(&self, record: &ApplicationRecord, notices: Vec<Notice>) {
        for notice in notices {
            let result = match &notice {
                Notice::Scheduled(appointment) => {
                    self.notifier.appointment_scheduled(record, appointment).await
                }
                Notice::Rescheduled { appointment, reason } => {
                    self.notifier
                        .appointment_rescheduled(record, appointment, reason)
                        .await
                }
                Notice::Rejected(rejection) => {
                    self.notifier.application_rejected(record, rejection).await
                }
            };
            if let Err(e) = result {
                // Notification delivery never fails a committed transition.
                warn!(application_id = %record.id, error = %e, "notification delivery failed");
            }
        }
    }
}

/// Where an auto-forward state hands off to next. The payment gate is the
/// one data-dependent hop: fee-free grades and already-paid resubmissions
/// go straight to the clerk.
fn auto_forward_target(record: &ApplicationRecord) -> Option<ApplicationStatus> {
    use ApplicationStatus::*;
    match record.status {
        Submitted => Some(JePending),
        JeVerified => Some(AePending),
        AeSigned => Some(EeStage1Pending),
        EeStage1Signed => Some(CeStage1Pending),
        CeStage1Signed => Some(if !record.position.has_fee() || record.is_paid() {
            ClerkPending
        } else {
            PaymentPending
        }),
        Paid => Some(ClerkPending),
        ClerkApproved => Some(EeStage2Pending),
        EeStage2Signed => Some(CeStage2Pending),
        CeStage2Signed => Some(Approved),
        _ => None,
    }
}

/// Trim optional free-text comments, dropping empty results.
fn normalize_comments(comments: Option<String>) -> Option<String> {
    comments
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
}
