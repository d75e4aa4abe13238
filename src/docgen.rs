//! Generated Document Seam
//!
//! Recommendation forms, licence certificates, and payment challans are
//! rendered by an external collaborator (a PDF service in production).
//! The engine only receives typed metadata back; the presence of a
//! generated document on a record is itself workflow state.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

use crate::content_store::{ContentStore, ContentStoreError};
use crate::document::{ContentHandle, DocumentType};
use crate::record::ApplicationRecord;

/// The documents the engine produces as transition side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratedKind {
    /// Stage-1 signature target (AE, EE stage 1, CE stage 1).
    RecommendationForm,
    /// Stage-2 signature target and the final issued artifact.
    LicenseCertificate,
    /// Payment voucher for the licence fee.
    PaymentChallan,
}

impl GeneratedKind {
    pub fn document_type(&self) -> DocumentType {
        match self {
            Self::RecommendationForm => DocumentType::RecommendationForm,
            Self::LicenseCertificate => DocumentType::LicenseCertificate,
            Self::PaymentChallan => DocumentType::PaymentChallan,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RecommendationForm => "recommendation-form",
            Self::LicenseCertificate => "license-certificate",
            Self::PaymentChallan => "payment-challan",
        }
    }
}

/// Metadata of a rendered document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedDocument {
    pub file_name: String,
    pub size_bytes: u64,
    pub handle: ContentHandle,
}

/// Error type for document generation.
#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    #[error("render failed: {0}")]
    Render(String),

    #[error(transparent)]
    Content(#[from] ContentStoreError),
}

/// Renders engine-generated documents.
#[async_trait]
pub trait DocumentGenerator: Send + Sync {
    async fn render(
        &self,
        kind: GeneratedKind,
        record: &ApplicationRecord,
    ) -> Result<GeneratedDocument, GeneratorError>;
}

/// Plain-text renderer backed by a [`ContentStore`]. Stands in for the
/// PDF service in tests and local deployments; the output still flows
/// through the same content-addressed handles.
pub struct PlainTextGenerator {
    content: Arc<dyn ContentStore>,
}

impl PlainTextGenerator {
    pub fn new(content: Arc<dyn ContentStore>) -> Self {
        Self { content }
    }
}

#[async_trait]
impl DocumentGenerator for PlainTextGenerator {
    async fn render(
        &self,
        kind: GeneratedKind,
        record: &ApplicationRecord,
    ) -> Result<GeneratedDocument, GeneratorError> {
        let number = record
            .application_number
            .as_deref()
            .unwrap_or("unassigned");
        let body = format!(
            "{kind}\napplication: {number}\napplicant: {name}\nposition: {position}\nrendered: {at}\n",
            kind = kind.as_str(),
            name = record.applicant.full_name,
            position = record.position,
            at = Utc::now().to_rfc3339(),
        );

        let handle = self.content.store(body.as_bytes()).await?;
        Ok(GeneratedDocument {
            file_name: format!("{}-{number}.txt", kind.as_str()),
            size_bytes: body.len() as u64,
            handle,
        })
    }
}
