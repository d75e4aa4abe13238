//! In-Memory Store
//!
//! Default [`WorkflowStore`] backend over tokio-locked maps. Suitable for
//! tests and single-process deployments; the `database` feature provides
//! the Postgres equivalent.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::appointment::Appointment;
use crate::otp::{OtpSession, SignerRole};
use crate::record::ApplicationRecord;
use crate::status::ApplicationStatus;
use crate::store::{CertificateJob, StoreError, WorkflowStore};

/// In-memory workflow store.
#[derive(Default)]
pub struct InMemoryStore {
    applications: RwLock<HashMap<Uuid, ApplicationRecord>>,
    appointments: RwLock<HashMap<Uuid, Appointment>>,
    otp_sessions: RwLock<HashMap<(Uuid, SignerRole), OtpSession>>,
    certificate_jobs: Mutex<Vec<CertificateJob>>,
    sequence: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryStore {
    async fn insert_application(&self, record: &ApplicationRecord) -> Result<(), StoreError> {
        let mut applications = self.applications.write().await;
        if applications.contains_key(&record.id) {
            return Err(StoreError::Storage(format!(
                "duplicate application id: {}",
                record.id
            )));
        }
        applications.insert(record.id, record.clone());
        Ok(())
    }

    async fn load_application(&self, id: Uuid) -> Result<ApplicationRecord, StoreError> {
        let applications = self.applications.read().await;
        applications
            .get(&id)
            .cloned()
            .ok_or(StoreError::ApplicationNotFound(id))
    }

    async fn save_application(&self, record: &mut ApplicationRecord) -> Result<(), StoreError> {
        let mut applications = self.applications.write().await;
        let stored = applications
            .get(&record.id)
            .ok_or(StoreError::ApplicationNotFound(record.id))?;
        if stored.version != record.version {
            return Err(StoreError::VersionConflict(record.id));
        }
        record.version += 1;
        record.updated_at = Utc::now();
        applications.insert(record.id, record.clone());
        Ok(())
    }

    async fn list_by_status(
        &self,
        statuses: &[ApplicationStatus],
    ) -> Result<Vec<ApplicationRecord>, StoreError> {
        let applications = self.applications.read().await;
        let mut matching: Vec<ApplicationRecord> = applications
            .values()
            .filter(|r| statuses.contains(&r.status))
            .cloned()
            .collect();
        matching.sort_by_key(|r| r.created_at);
        Ok(matching)
    }

    async fn next_application_number(&self) -> Result<String, StoreError> {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("LIC-{}-{seq:05}", Utc::now().year()))
    }

    async fn upsert_appointment(&self, appointment: &Appointment) -> Result<(), StoreError> {
        let mut appointments = self.appointments.write().await;
        // One active appointment per application.
        appointments.retain(|_, a| a.application_id != appointment.application_id);
        appointments.insert(appointment.appointment_id, appointment.clone());
        Ok(())
    }

    async fn appointment_for_application(
        &self,
        application_id: Uuid,
    ) -> Result<Option<Appointment>, StoreError> {
        let appointments = self.appointments.read().await;
        Ok(appointments
            .values()
            .find(|a| a.application_id == application_id)
            .cloned())
    }

    async fn load_appointment(&self, appointment_id: Uuid) -> Result<Appointment, StoreError> {
        let appointments = self.appointments.read().await;
        appointments
            .get(&appointment_id)
            .cloned()
            .ok_or(StoreError::AppointmentNotFound(appointment_id))
    }

    async fn remove_appointment(&self, application_id: Uuid) -> Result<(), StoreError> {
        let mut appointments = self.appointments.write().await;
        appointments.retain(|_, a| a.application_id != application_id);
        Ok(())
    }

    async fn put_otp_session(&self, session: &OtpSession) -> Result<(), StoreError> {
        let mut sessions = self.otp_sessions.write().await;
        sessions.insert((session.application_id, session.signer), session.clone());
        Ok(())
    }

    async fn active_otp_session(
        &self,
        application_id: Uuid,
        signer: SignerRole,
    ) -> Result<Option<OtpSession>, StoreError> {
        let sessions = self.otp_sessions.read().await;
        Ok(sessions.get(&(application_id, signer)).cloned())
    }

    async fn consume_otp_session(
        &self,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut sessions = self.otp_sessions.write().await;
        let Some(session) = sessions.values_mut().find(|s| s.session_id == session_id) else {
            return Ok(false);
        };
        if session.consumed_at.is_some() {
            return Ok(false);
        }
        session.consumed_at = Some(now);
        Ok(true)
    }

    async fn record_otp_failure(&self, session_id: Uuid) -> Result<u32, StoreError> {
        let mut sessions = self.otp_sessions.write().await;
        let Some(session) = sessions.values_mut().find(|s| s.session_id == session_id) else {
            return Ok(0);
        };
        session.attempts += 1;
        Ok(session.attempts)
    }

    async fn remove_otp_sessions(&self, application_id: Uuid) -> Result<(), StoreError> {
        let mut sessions = self.otp_sessions.write().await;
        sessions.retain(|(id, _), _| *id != application_id);
        Ok(())
    }

    async fn enqueue_certificate_job(
        &self,
        application_id: Uuid,
        queued_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut jobs = self.certificate_jobs.lock().await;
        if jobs.iter().any(|j| j.application_id == application_id) {
            return Ok(());
        }
        jobs.push(CertificateJob {
            application_id,
            queued_at,
            attempts: 0,
            last_error: None,
        });
        Ok(())
    }

    async fn claim_certificate_job(&self) -> Result<Option<CertificateJob>, StoreError> {
        let mut jobs = self.certificate_jobs.lock().await;
        if jobs.is_empty() {
            Ok(None)
        } else {
            Ok(Some(jobs.remove(0)))
        }
    }

    async fn requeue_certificate_job(
        &self,
        job: &CertificateJob,
        error: &str,
    ) -> Result<(), StoreError> {
        let mut jobs = self.certificate_jobs.lock().await;
        jobs.push(CertificateJob {
            application_id: job.application_id,
            queued_at: job.queued_at,
            attempts: job.attempts + 1,
            last_error: Some(error.to_string()),
        });
        Ok(())
    }

    async fn complete_certificate_job(&self, _application_id: Uuid) -> Result<(), StoreError> {
        // Claiming removed the job already.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::PositionType;
    use crate::record::{Address, ApplicantProfile, NewApplication};
    use chrono::Duration;

    fn sample_record() -> ApplicationRecord {
        ApplicationRecord::new_draft(NewApplication {
            position: PositionType::LicenceEngineer,
            applicant: ApplicantProfile {
                full_name: "M. Joshi".to_string(),
                email: "mj@example.com".to_string(),
                phone: "9800000003".to_string(),
                pan: "ABCPJ9012L".to_string(),
                aadhar: "456789012345".to_string(),
                coa_number: None,
            },
            local_address: Address {
                line1: "7 College Rd".to_string(),
                line2: None,
                city: "Nagpur".to_string(),
                state: "MH".to_string(),
                pincode: "440001".to_string(),
            },
            permanent_address: None,
            qualifications: vec![],
            experiences: vec![],
        })
    }

    #[tokio::test]
    async fn test_save_bumps_version_and_detects_conflicts() {
        let store = InMemoryStore::new();
        let record = sample_record();
        store.insert_application(&record).await.unwrap();

        let mut copy_a = store.load_application(record.id).await.unwrap();
        let mut copy_b = store.load_application(record.id).await.unwrap();

        store.save_application(&mut copy_a).await.unwrap();
        assert_eq!(copy_a.version, 2);

        // The stale copy loses.
        let err = store.save_application(&mut copy_b).await.unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict(_)));
    }

    #[tokio::test]
    async fn test_otp_consume_is_single_winner() {
        let store = InMemoryStore::new();
        let (session, _code) = OtpSession::issue(
            Uuid::new_v4(),
            SignerRole::CityEngineer,
            Duration::minutes(5),
            3,
        );
        store.put_otp_session(&session).await.unwrap();

        let now = Utc::now();
        assert!(store.consume_otp_session(session.session_id, now).await.unwrap());
        assert!(!store.consume_otp_session(session.session_id, now).await.unwrap());
    }

    #[tokio::test]
    async fn test_new_session_replaces_prior_for_same_signer() {
        let store = InMemoryStore::new();
        let application_id = Uuid::new_v4();
        let (first, _) = OtpSession::issue(
            application_id,
            SignerRole::AssistantEngineer,
            Duration::minutes(5),
            3,
        );
        let (second, _) = OtpSession::issue(
            application_id,
            SignerRole::AssistantEngineer,
            Duration::minutes(5),
            3,
        );
        store.put_otp_session(&first).await.unwrap();
        store.put_otp_session(&second).await.unwrap();

        let active = store
            .active_otp_session(application_id, SignerRole::AssistantEngineer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.session_id, second.session_id);
    }

    #[tokio::test]
    async fn test_certificate_queue_is_idempotent() {
        let store = InMemoryStore::new();
        let application_id = Uuid::new_v4();
        let now = Utc::now();
        store.enqueue_certificate_job(application_id, now).await.unwrap();
        store.enqueue_certificate_job(application_id, now).await.unwrap();

        assert!(store.claim_certificate_job().await.unwrap().is_some());
        assert!(store.claim_certificate_job().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_application_numbers_are_unique_and_sequential() {
        let store = InMemoryStore::new();
        let a = store.next_application_number().await.unwrap();
        let b = store.next_application_number().await.unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with("LIC-"));
        assert!(a.ends_with("00001"));
    }
}
