//! Certificate Issuance Worker
//!
//! Terminal approval only queues certificate generation; this worker
//! drains the queue, renders the final licence certificate through the
//! external generator, and attaches it to the record. Callers observe
//! completion by polling `certificate_status`, never by blocking on the
//! signing transition.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::docgen::{DocumentGenerator, GeneratedKind};
use crate::document::DocumentRef;
use crate::notify::Notifier;
use crate::record::CertificateInfo;
use crate::store::{CertificateJob, StoreError, WorkflowStore};
use crate::WorkflowError;

/// Attempts per job before it is dropped with an error log.
const MAX_ATTEMPTS: u32 = 3;

/// Polling interval when the queue is empty.
const POLL_INTERVAL_MS: u64 = 200;

/// Backoff interval after an unexpected error.
const ERROR_BACKOFF_MS: u64 = 1000;

/// Retries when the attach save loses a version race.
const ATTACH_RETRIES: u32 = 3;

/// Background consumer of the certificate-generation queue.
pub struct CertificateWorker {
    store: Arc<dyn WorkflowStore>,
    generator: Arc<dyn DocumentGenerator>,
    notifier: Arc<dyn Notifier>,
}

impl CertificateWorker {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        generator: Arc<dyn DocumentGenerator>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            generator,
            notifier,
        }
    }

    /// Run the worker loop until the shutdown signal flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("certificate worker started");

        loop {
            if *shutdown.borrow() {
                info!("certificate worker shutting down");
                break;
            }

            match self.process_one().await {
                Ok(true) => continue,
                Ok(false) => {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS)) => {}
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                info!("certificate worker shutting down");
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "error processing certificate job");
                    tokio::time::sleep(Duration::from_millis(ERROR_BACKOFF_MS)).await;
                }
            }
        }
    }

    /// Drain every queued job once. Deterministic entry point for tests
    /// and cron-style deployments; returns how many jobs were taken.
    pub async fn drain_once(&self) -> Result<usize, WorkflowError> {
        let mut processed = 0;
        while self.process_one().await? {
            processed += 1;
        }
        Ok(processed)
    }

    /// Process one job. Returns Ok(true) if a job was taken, Ok(false)
    /// if the queue was empty.
    async fn process_one(&self) -> Result<bool, WorkflowError> {
        let Some(job) = self.store.claim_certificate_job().await? else {
            return Ok(false);
        };

        match self.issue(&job).await {
            Ok(()) => {
                self.store.complete_certificate_job(job.application_id).await?;
                Ok(true)
            }
            Err(e) if job.attempts + 1 < MAX_ATTEMPTS => {
                warn!(
                    application_id = %job.application_id,
                    attempts = job.attempts,
                    error = %e,
                    "retrying certificate generation"
                );
                self.store
                    .requeue_certificate_job(&job, &e.to_string())
                    .await?;
                Ok(true)
            }
            Err(e) => {
                error!(
                    application_id = %job.application_id,
                    attempts = job.attempts,
                    error = %e,
                    "giving up on certificate generation"
                );
                self.store.complete_certificate_job(job.application_id).await?;
                Ok(true)
            }
        }
    }

    /// Render and attach the certificate under the record version check,
    /// retrying if a concurrent writer touches the record.
    async fn issue(&self, job: &CertificateJob) -> Result<(), WorkflowError> {
        for _ in 0..ATTACH_RETRIES {
            let mut record = self.store.load_application(job.application_id).await?;
            if record.certificate.is_some() {
                debug!(application_id = %record.id, "certificate already attached");
                return Ok(());
            }
            // The record resubmitted out from under a stale job; nothing
            // to issue.
            if record.certificate_requested_at.is_none() {
                warn!(application_id = %record.id, "certificate no longer requested, dropping job");
                return Ok(());
            }

            let generated = self
                .generator
                .render(GeneratedKind::LicenseCertificate, &record)
                .await
                .map_err(|e| WorkflowError::ExternalService {
                    service: "certificate generation",
                    message: e.to_string(),
                })?;

            let mut document = DocumentRef::new(
                GeneratedKind::LicenseCertificate.document_type(),
                generated.file_name,
                generated.size_bytes,
                generated.handle,
            );
            document.verified = true;

            let certificate = CertificateInfo {
                certificate_id: Uuid::new_v4(),
                document: document.clone(),
                generated_at: Utc::now(),
            };
            record.upsert_document(document);
            record.certificate = Some(certificate.clone());

            match self.store.save_application(&mut record).await {
                Ok(()) => {
                    info!(
                        application_id = %record.id,
                        certificate_id = %certificate.certificate_id,
                        "certificate issued"
                    );
                    if let Err(e) = self.notifier.certificate_issued(&record, &certificate).await {
                        warn!(
                            application_id = %record.id,
                            error = %e,
                            "certificate notification delivery failed"
                        );
                    }
                    return Ok(());
                }
                Err(StoreError::VersionConflict(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(WorkflowError::Conflict(format!(
            "certificate attach for {} kept losing version races",
            job.application_id
        )))
    }
}
