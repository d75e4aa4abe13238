//! Application Record
//!
//! The persisted aggregate for one licence application: applicant data,
//! documents, payment, rejection metadata, and the authoritative lifecycle
//! status with its transition history. All fields change only through
//! engine transitions (documents being the one sub-resource with its own
//! upload path while the record is editable by the applicant).

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::document::{DocumentRef, DocumentType};
use crate::position::PositionType;
use crate::status::ApplicationStatus;

/// Applicant identity and contact details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicantProfile {
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub pan: String,
    pub aadhar: String,
    /// Council of Architecture registration, where the grade requires it.
    pub coa_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub state: String,
    pub pincode: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Qualification {
    pub degree: String,
    pub institution: String,
    pub year: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Experience {
    pub organisation: String,
    pub designation: String,
    pub from: NaiveDate,
    pub to: Option<NaiveDate>,
}

/// Completed fee payment. Once present it survives rejection and
/// resubmission; corrections are document-level, not financial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInfo {
    pub amount: Decimal,
    pub gateway_reference: String,
    pub paid_at: DateTime<Utc>,
}

/// Final issued certificate, attached asynchronously after terminal
/// approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateInfo {
    pub certificate_id: Uuid,
    pub document: DocumentRef,
    pub generated_at: DateTime<Utc>,
}

/// The single active rejection. At most one stage's rejection is live at
/// a time; resubmission clears it (the comment stays visible in history).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionRecord {
    /// The pending stage the application was rejected out of.
    pub stage: ApplicationStatus,
    pub rejected_by: String,
    pub comments: String,
    pub rejected_at: DateTime<Utc>,
}

/// One hop in the lifecycle, including auto-forward hops (actor "system").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub from: ApplicationStatus,
    pub to: ApplicationStatus,
    pub changed_at: DateTime<Utc>,
    pub actor: String,
    pub comments: Option<String>,
}

/// Input for creating a new draft application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewApplication {
    pub position: PositionType,
    pub applicant: ApplicantProfile,
    pub local_address: Address,
    /// `None` means the permanent address aliases the local one.
    pub permanent_address: Option<Address>,
    #[serde(default)]
    pub qualifications: Vec<Qualification>,
    #[serde(default)]
    pub experiences: Vec<Experience>,
}

/// Partial update applied to a draft. `None` fields are left untouched;
/// `permanent_address: Some(None)` resets it to alias the local address.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DraftUpdate {
    #[serde(default)]
    pub applicant: Option<ApplicantProfile>,
    #[serde(default)]
    pub local_address: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permanent_address: Option<Option<Address>>,
    #[serde(default)]
    pub qualifications: Option<Vec<Qualification>>,
    #[serde(default)]
    pub experiences: Option<Vec<Experience>>,
}

/// One licence application and its full lifecycle state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub id: Uuid,
    /// Assigned by the store on first submission, stable thereafter.
    pub application_number: Option<String>,
    pub position: PositionType,
    pub status: ApplicationStatus,

    pub applicant: ApplicantProfile,
    pub local_address: Address,
    pub permanent_address: Option<Address>,
    pub qualifications: Vec<Qualification>,
    pub experiences: Vec<Experience>,
    pub documents: Vec<DocumentRef>,

    pub payment: Option<PaymentInfo>,
    /// Set when the terminal transition queues certificate generation.
    pub certificate_requested_at: Option<DateTime<Utc>>,
    pub certificate: Option<CertificateInfo>,
    pub rejection: Option<RejectionRecord>,

    pub history: Vec<StatusChange>,

    /// Optimistic-concurrency version, bumped by every store save.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApplicationRecord {
    /// Create a fresh draft.
    pub fn new_draft(new: NewApplication) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            application_number: None,
            position: new.position,
            status: ApplicationStatus::Draft,
            applicant: new.applicant,
            local_address: new.local_address,
            permanent_address: new.permanent_address,
            qualifications: new.qualifications,
            experiences: new.experiences,
            documents: Vec::new(),
            payment: None,
            certificate_requested_at: None,
            certificate: None,
            rejection: None,
            history: Vec::new(),
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record a status change, appending to history.
    pub fn set_status(
        &mut self,
        to: ApplicationStatus,
        actor: &str,
        comments: Option<String>,
    ) {
        let from = std::mem::replace(&mut self.status, to);
        let now = Utc::now();
        self.history.push(StatusChange {
            from,
            to,
            changed_at: now,
            actor: actor.to_string(),
            comments,
        });
        self.updated_at = now;
    }

    /// The permanent address, falling back to the local one when aliased.
    pub fn effective_permanent_address(&self) -> &Address {
        self.permanent_address.as_ref().unwrap_or(&self.local_address)
    }

    pub fn fee(&self) -> Decimal {
        self.position.fee()
    }

    pub fn is_paid(&self) -> bool {
        self.payment.is_some()
    }

    pub fn document(&self, doc_type: DocumentType) -> Option<&DocumentRef> {
        self.documents.iter().find(|d| d.doc_type == doc_type)
    }

    /// Attach a document, replacing any existing one of the same
    /// non-repeatable kind. Replacement rather than append is what keeps
    /// re-signing and re-uploading at one document per kind.
    pub fn upsert_document(&mut self, doc: DocumentRef) {
        if !doc.doc_type.is_repeatable() {
            self.documents.retain(|d| d.doc_type != doc.doc_type);
        }
        self.documents.push(doc);
        self.updated_at = Utc::now();
    }

    pub fn remove_documents_of_type(&mut self, doc_type: DocumentType) {
        self.documents.retain(|d| d.doc_type != doc_type);
    }

    /// Applicant-uploaded document kinds still missing for this grade.
    pub fn missing_documents(&self) -> Vec<DocumentType> {
        self.position
            .required_documents()
            .iter()
            .copied()
            .filter(|t| self.document(*t).is_none())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::ContentHandle;

    fn sample_new(position: PositionType) -> NewApplication {
        NewApplication {
            position,
            applicant: ApplicantProfile {
                full_name: "A. Kulkarni".to_string(),
                email: "ak@example.com".to_string(),
                phone: "9800000001".to_string(),
                pan: "ABCPK1234F".to_string(),
                aadhar: "234567890123".to_string(),
                coa_number: None,
            },
            local_address: Address {
                line1: "12 MG Road".to_string(),
                line2: None,
                city: "Pune".to_string(),
                state: "MH".to_string(),
                pincode: "411001".to_string(),
            },
            permanent_address: None,
            qualifications: vec![],
            experiences: vec![],
        }
    }

    #[test]
    fn test_new_draft() {
        let record = ApplicationRecord::new_draft(sample_new(PositionType::LicenceEngineer));
        assert_eq!(record.status, ApplicationStatus::Draft);
        assert_eq!(record.application_number, None);
        assert_eq!(record.version, 1);
        assert!(record.history.is_empty());
    }

    #[test]
    fn test_set_status_records_history() {
        let mut record = ApplicationRecord::new_draft(sample_new(PositionType::Supervisor1));
        record.set_status(ApplicationStatus::Submitted, "applicant", None);
        record.set_status(ApplicationStatus::JePending, "system", None);

        assert_eq!(record.status, ApplicationStatus::JePending);
        assert_eq!(record.history.len(), 2);
        assert_eq!(record.history[0].from, ApplicationStatus::Draft);
        assert_eq!(record.history[0].to, ApplicationStatus::Submitted);
        assert_eq!(record.history[1].actor, "system");
    }

    #[test]
    fn test_permanent_address_aliases_local() {
        let record = ApplicationRecord::new_draft(sample_new(PositionType::Supervisor2));
        assert_eq!(record.effective_permanent_address().city, "Pune");
    }

    #[test]
    fn test_upsert_document_replaces_same_kind() {
        let mut record = ApplicationRecord::new_draft(sample_new(PositionType::LicenceEngineer));
        record.upsert_document(DocumentRef::new(
            DocumentType::Pan,
            "pan-v1.pdf",
            100,
            ContentHandle::from_bytes(b"v1"),
        ));
        record.upsert_document(DocumentRef::new(
            DocumentType::Pan,
            "pan-v2.pdf",
            120,
            ContentHandle::from_bytes(b"v2"),
        ));
        record.upsert_document(DocumentRef::new(
            DocumentType::Additional,
            "extra-1.pdf",
            10,
            ContentHandle::from_bytes(b"e1"),
        ));
        record.upsert_document(DocumentRef::new(
            DocumentType::Additional,
            "extra-2.pdf",
            10,
            ContentHandle::from_bytes(b"e2"),
        ));

        assert_eq!(
            record.documents.iter().filter(|d| d.doc_type == DocumentType::Pan).count(),
            1
        );
        assert_eq!(record.document(DocumentType::Pan).unwrap().file_name, "pan-v2.pdf");
        assert_eq!(
            record
                .documents
                .iter()
                .filter(|d| d.doc_type == DocumentType::Additional)
                .count(),
            2
        );
    }

    #[test]
    fn test_missing_documents_shrinks_as_uploads_land() {
        let mut record = ApplicationRecord::new_draft(sample_new(PositionType::LicenceEngineer));
        let before = record.missing_documents().len();
        record.upsert_document(DocumentRef::new(
            DocumentType::Pan,
            "pan.pdf",
            100,
            ContentHandle::from_bytes(b"pan"),
        ));
        assert_eq!(record.missing_documents().len(), before - 1);
    }
}
