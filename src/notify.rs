//! Applicant Notification Seam
//!
//! Delivery (SMS/email) is an external collaborator; the engine hands it
//! typed events. Apart from OTP delivery — where the caller needs a
//! delivery confirmation — notification failures never fail a transition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::appointment::Appointment;
use crate::otp::SignerRole;
use crate::record::{ApplicationRecord, CertificateInfo, RejectionRecord};

/// Error type for notification delivery.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Outbound notification channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn appointment_scheduled(
        &self,
        record: &ApplicationRecord,
        appointment: &Appointment,
    ) -> Result<(), NotifyError>;

    async fn appointment_rescheduled(
        &self,
        record: &ApplicationRecord,
        appointment: &Appointment,
        reason: &str,
    ) -> Result<(), NotifyError>;

    /// Deliver a signing code to the officer's registered channel. The
    /// raw code exists only on this path.
    async fn otp_code(
        &self,
        record: &ApplicationRecord,
        signer: SignerRole,
        code: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), NotifyError>;

    async fn application_rejected(
        &self,
        record: &ApplicationRecord,
        rejection: &RejectionRecord,
    ) -> Result<(), NotifyError>;

    async fn certificate_issued(
        &self,
        record: &ApplicationRecord,
        certificate: &CertificateInfo,
    ) -> Result<(), NotifyError>;
}

/// Discards all notifications.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn appointment_scheduled(
        &self,
        _record: &ApplicationRecord,
        _appointment: &Appointment,
    ) -> Result<(), NotifyError> {
        Ok(())
    }

    async fn appointment_rescheduled(
        &self,
        _record: &ApplicationRecord,
        _appointment: &Appointment,
        _reason: &str,
    ) -> Result<(), NotifyError> {
        Ok(())
    }

    async fn otp_code(
        &self,
        _record: &ApplicationRecord,
        _signer: SignerRole,
        _code: &str,
        _expires_at: DateTime<Utc>,
    ) -> Result<(), NotifyError> {
        Ok(())
    }

    async fn application_rejected(
        &self,
        _record: &ApplicationRecord,
        _rejection: &RejectionRecord,
    ) -> Result<(), NotifyError> {
        Ok(())
    }

    async fn certificate_issued(
        &self,
        _record: &ApplicationRecord,
        _certificate: &CertificateInfo,
    ) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Captured notification, for inspection in tests and local development.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifierEvent {
    AppointmentScheduled {
        application_id: Uuid,
        appointment_id: Uuid,
    },
    AppointmentRescheduled {
        application_id: Uuid,
        reason: String,
    },
    OtpCode {
        application_id: Uuid,
        signer: SignerRole,
        code: String,
    },
    ApplicationRejected {
        application_id: Uuid,
        stage_comments: String,
    },
    CertificateIssued {
        application_id: Uuid,
        certificate_id: Uuid,
    },
}

/// Records every notification instead of delivering it. Stands in for
/// the SMS/email channel wherever tests need to read the delivered code.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<NotifierEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<NotifierEvent> {
        self.events.lock().await.clone()
    }

    /// The most recently delivered OTP code for an application.
    pub async fn last_otp_code(&self, application_id: Uuid) -> Option<String> {
        self.events
            .lock()
            .await
            .iter()
            .rev()
            .find_map(|e| match e {
                NotifierEvent::OtpCode {
                    application_id: id,
                    code,
                    ..
                } if *id == application_id => Some(code.clone()),
                _ => None,
            })
    }

    async fn push(&self, event: NotifierEvent) {
        self.events.lock().await.push(event);
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn appointment_scheduled(
        &self,
        record: &ApplicationRecord,
        appointment: &Appointment,
    ) -> Result<(), NotifyError> {
        self.push(NotifierEvent::AppointmentScheduled {
            application_id: record.id,
            appointment_id: appointment.appointment_id,
        })
        .await;
        Ok(())
    }

    async fn appointment_rescheduled(
        &self,
        record: &ApplicationRecord,
        _appointment: &Appointment,
        reason: &str,
    ) -> Result<(), NotifyError> {
        self.push(NotifierEvent::AppointmentRescheduled {
            application_id: record.id,
            reason: reason.to_string(),
        })
        .await;
        Ok(())
    }

    async fn otp_code(
        &self,
        record: &ApplicationRecord,
        signer: SignerRole,
        code: &str,
        _expires_at: DateTime<Utc>,
    ) -> Result<(), NotifyError> {
        self.push(NotifierEvent::OtpCode {
            application_id: record.id,
            signer,
            code: code.to_string(),
        })
        .await;
        Ok(())
    }

    async fn application_rejected(
        &self,
        record: &ApplicationRecord,
        rejection: &RejectionRecord,
    ) -> Result<(), NotifyError> {
        self.push(NotifierEvent::ApplicationRejected {
            application_id: record.id,
            stage_comments: rejection.comments.clone(),
        })
        .await;
        Ok(())
    }

    async fn certificate_issued(
        &self,
        record: &ApplicationRecord,
        certificate: &CertificateInfo,
    ) -> Result<(), NotifyError> {
        self.push(NotifierEvent::CertificateIssued {
            application_id: record.id,
            certificate_id: certificate.certificate_id,
        })
        .await;
        Ok(())
    }
}
