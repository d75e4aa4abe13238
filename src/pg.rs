//! Postgres Store
//!
//! [`WorkflowStore`] backed by Postgres. Records are stored as JSONB
//! snapshots next to the columns the store itself needs (status for work
//! queues, version for the optimistic check); OTP sessions and the
//! certificate queue are plain columns so their compare-and-swap updates
//! stay single statements.
//!
//! NOTE: All queries use runtime-checked sqlx::query() instead of
//! compile-time sqlx::query!() macros because the tables are created by
//! migrations that may not exist at compile time. Expected schema:
//!
//! ```sql
//! CREATE SCHEMA licence;
//! CREATE SEQUENCE licence.application_number_seq;
//! CREATE TABLE licence.applications (
//!     id          uuid PRIMARY KEY,
//!     status      int NOT NULL,
//!     record      jsonb NOT NULL,
//!     version     bigint NOT NULL,
//!     updated_at  timestamptz NOT NULL DEFAULT now()
//! );
//! CREATE TABLE licence.appointments (
//!     appointment_id  uuid PRIMARY KEY,
//!     application_id  uuid NOT NULL UNIQUE,
//!     record          jsonb NOT NULL
//! );
//! CREATE TABLE licence.otp_sessions (
//!     session_id      uuid PRIMARY KEY,
//!     application_id  uuid NOT NULL,
//!     signer          text NOT NULL,
//!     code_hash       text NOT NULL,
//!     issued_at       timestamptz NOT NULL,
//!     expires_at      timestamptz NOT NULL,
//!     attempts        int NOT NULL,
//!     max_attempts    int NOT NULL,
//!     consumed_at     timestamptz,
//!     UNIQUE (application_id, signer)
//! );
//! CREATE TABLE licence.certificate_jobs (
//!     application_id  uuid PRIMARY KEY,
//!     queued_at       timestamptz NOT NULL,
//!     attempts        int NOT NULL DEFAULT 0,
//!     last_error      text,
//!     claimed_at      timestamptz
//! );
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::appointment::Appointment;
use crate::otp::{OtpSession, SignerRole};
use crate::record::ApplicationRecord;
use crate::status::ApplicationStatus;
use crate::store::{CertificateJob, StoreError, WorkflowStore};

/// Postgres-backed workflow store.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn record_from_row(row: &PgRow) -> Result<ApplicationRecord, StoreError> {
        let value: serde_json::Value = row.get("record");
        Ok(serde_json::from_value(value)?)
    }

    fn appointment_from_row(row: &PgRow) -> Result<Appointment, StoreError> {
        let value: serde_json::Value = row.get("record");
        Ok(serde_json::from_value(value)?)
    }

    fn session_from_row(row: &PgRow) -> Result<OtpSession, StoreError> {
        let signer: String = row.get("signer");
        let signer = signer
            .parse::<SignerRole>()
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(OtpSession {
            session_id: row.get("session_id"),
            application_id: row.get("application_id"),
            signer,
            code_hash: row.get("code_hash"),
            issued_at: row.get("issued_at"),
            expires_at: row.get("expires_at"),
            attempts: row.get::<i32, _>("attempts").max(0) as u32,
            max_attempts: row.get::<i32, _>("max_attempts").max(0) as u32,
            consumed_at: row.get("consumed_at"),
        })
    }

    fn job_from_row(row: &PgRow) -> CertificateJob {
        CertificateJob {
            application_id: row.get("application_id"),
            queued_at: row.get("queued_at"),
            attempts: row.get::<i32, _>("attempts").max(0) as u32,
            last_error: row.get("last_error"),
        }
    }
}

#[async_trait]
impl WorkflowStore for PgStore {
    async fn insert_application(&self, record: &ApplicationRecord) -> Result<(), StoreError> {
        let snapshot = serde_json::to_value(record)?;
        sqlx::query(
            r#"
            INSERT INTO licence.applications (id, status, record, version, updated_at)
            VALUES ($1, $2, $3, $4, now())
            "#,
        )
        .bind(record.id)
        .bind(record.status.code())
        .bind(snapshot)
        .bind(record.version as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_application(&self, id: Uuid) -> Result<ApplicationRecord, StoreError> {
        let row = sqlx::query(r#"SELECT record FROM licence.applications WHERE id = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::ApplicationNotFound(id))?;
        Self::record_from_row(&row)
    }

    async fn save_application(&self, record: &mut ApplicationRecord) -> Result<(), StoreError> {
        let expected = record.version;
        let mut candidate = record.clone();
        candidate.version = expected + 1;
        candidate.updated_at = Utc::now();
        let snapshot = serde_json::to_value(&candidate)?;

        let result = sqlx::query(
            r#"
            UPDATE licence.applications
            SET status = $2, record = $3, version = $4, updated_at = now()
            WHERE id = $1 AND version = $5
            "#,
        )
        .bind(candidate.id)
        .bind(candidate.status.code())
        .bind(snapshot)
        .bind(candidate.version as i64)
        .bind(expected as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Either the record vanished or someone saved a newer version.
            let exists =
                sqlx::query(r#"SELECT 1 AS one FROM licence.applications WHERE id = $1"#)
                    .bind(record.id)
                    .fetch_optional(&self.pool)
                    .await?
                    .is_some();
            return Err(if exists {
                StoreError::VersionConflict(record.id)
            } else {
                StoreError::ApplicationNotFound(record.id)
            });
        }

        record.version = candidate.version;
        record.updated_at = candidate.updated_at;
        Ok(())
    }

    async fn list_by_status(
        &self,
        statuses: &[ApplicationStatus],
    ) -> Result<Vec<ApplicationRecord>, StoreError> {
        let codes: Vec<i32> = statuses.iter().map(|s| s.code()).collect();
        let rows = sqlx::query(
            r#"
            SELECT record FROM licence.applications
            WHERE status = ANY($1)
            ORDER BY updated_at
            "#,
        )
        .bind(codes)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::record_from_row).collect()
    }

    async fn next_application_number(&self) -> Result<String, StoreError> {
        let row = sqlx::query(r#"SELECT nextval('licence.application_number_seq') AS seq"#)
            .fetch_one(&self.pool)
            .await?;
        let seq: i64 = row.get("seq");
        Ok(format!("LIC-{}-{seq:05}", Utc::now().year()))
    }

    async fn upsert_appointment(&self, appointment: &Appointment) -> Result<(), StoreError> {
        let snapshot = serde_json::to_value(appointment)?;
        sqlx::query(
            r#"
            INSERT INTO licence.appointments (appointment_id, application_id, record)
            VALUES ($1, $2, $3)
            ON CONFLICT (application_id)
            DO UPDATE SET appointment_id = EXCLUDED.appointment_id, record = EXCLUDED.record
            "#,
        )
        .bind(appointment.appointment_id)
        .bind(appointment.application_id)
        .bind(snapshot)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn appointment_for_application(
        &self,
        application_id: Uuid,
    ) -> Result<Option<Appointment>, StoreError> {
        let row = sqlx::query(
            r#"SELECT record FROM licence.appointments WHERE application_id = $1"#,
        )
        .bind(application_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| Self::appointment_from_row(&r)).transpose()
    }

    async fn load_appointment(&self, appointment_id: Uuid) -> Result<Appointment, StoreError> {
        let row = sqlx::query(
            r#"SELECT record FROM licence.appointments WHERE appointment_id = $1"#,
        )
        .bind(appointment_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::AppointmentNotFound(appointment_id))?;
        Self::appointment_from_row(&row)
    }

    async fn remove_appointment(&self, application_id: Uuid) -> Result<(), StoreError> {
        sqlx::query(r#"DELETE FROM licence.appointments WHERE application_id = $1"#)
            .bind(application_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn put_otp_session(&self, session: &OtpSession) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO licence.otp_sessions
                (session_id, application_id, signer, code_hash, issued_at,
                 expires_at, attempts, max_attempts, consumed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NULL)
            ON CONFLICT (application_id, signer)
            DO UPDATE SET
                session_id = EXCLUDED.session_id,
                code_hash = EXCLUDED.code_hash,
                issued_at = EXCLUDED.issued_at,
                expires_at = EXCLUDED.expires_at,
                attempts = EXCLUDED.attempts,
                max_attempts = EXCLUDED.max_attempts,
                consumed_at = NULL
            "#,
        )
        .bind(session.session_id)
        .bind(session.application_id)
        .bind(session.signer.as_str())
        .bind(&session.code_hash)
        .bind(session.issued_at)
        .bind(session.expires_at)
        .bind(session.attempts as i32)
        .bind(session.max_attempts as i32)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn active_otp_session(
        &self,
        application_id: Uuid,
        signer: SignerRole,
    ) -> Result<Option<OtpSession>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT session_id, application_id, signer, code_hash, issued_at,
                   expires_at, attempts, max_attempts, consumed_at
            FROM licence.otp_sessions
            WHERE application_id = $1 AND signer = $2
            "#,
        )
        .bind(application_id)
        .bind(signer.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| Self::session_from_row(&r)).transpose()
    }

    async fn consume_otp_session(
        &self,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE licence.otp_sessions
            SET consumed_at = $2
            WHERE session_id = $1 AND consumed_at IS NULL
            "#,
        )
        .bind(session_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_otp_failure(&self, session_id: Uuid) -> Result<u32, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE licence.otp_sessions
            SET attempts = attempts + 1
            WHERE session_id = $1
            RETURNING attempts
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map_or(0, |r| r.get::<i32, _>("attempts").max(0) as u32))
    }

    async fn remove_otp_sessions(&self, application_id: Uuid) -> Result<(), StoreError> {
        sqlx::query(r#"DELETE FROM licence.otp_sessions WHERE application_id = $1"#)
            .bind(application_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn enqueue_certificate_job(
        &self,
        application_id: Uuid,
        queued_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO licence.certificate_jobs (application_id, queued_at, attempts)
            VALUES ($1, $2, 0)
            ON CONFLICT (application_id) DO NOTHING
            "#,
        )
        .bind(application_id)
        .bind(queued_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn claim_certificate_job(&self) -> Result<Option<CertificateJob>, StoreError> {
        // CTE claim with SKIP LOCKED so concurrent workers never double-
        // process a job.
        let row = sqlx::query(
            r#"
            WITH next AS (
                SELECT application_id
                FROM licence.certificate_jobs
                WHERE claimed_at IS NULL
                ORDER BY queued_at
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            UPDATE licence.certificate_jobs j
            SET claimed_at = now()
            FROM next
            WHERE j.application_id = next.application_id
            RETURNING j.application_id, j.queued_at, j.attempts, j.last_error
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| Self::job_from_row(&r)))
    }

    async fn requeue_certificate_job(
        &self,
        job: &CertificateJob,
        error: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE licence.certificate_jobs
            SET claimed_at = NULL, attempts = $2, last_error = $3
            WHERE application_id = $1
            "#,
        )
        .bind(job.application_id)
        .bind((job.attempts + 1) as i32)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn complete_certificate_job(&self, application_id: Uuid) -> Result<(), StoreError> {
        sqlx::query(r#"DELETE FROM licence.certificate_jobs WHERE application_id = $1"#)
            .bind(application_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
