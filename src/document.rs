//! Document References
//!
//! The engine never holds file bytes. Each attached document is a typed
//! reference: a document kind, file metadata, a verification flag, and a
//! [`ContentHandle`] pointing into the external document store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::str::FromStr;
use uuid::Uuid;

/// Kinds of documents attached to an application.
///
/// The last three are produced by the engine itself as transition side
/// effects; their presence on a record is a state-derived fact used as a
/// guard in later stages, and they are refused on the upload path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Pan,
    Aadhar,
    Degree,
    Marksheet,
    ExperienceCertificate,
    /// ISSE/COA registration certificate.
    CoaCertificate,
    PropertyTaxReceipt,
    SelfDeclaration,
    ProfilePicture,
    Additional,
    // System-generated
    RecommendationForm,
    LicenseCertificate,
    PaymentChallan,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pan => "pan",
            Self::Aadhar => "aadhar",
            Self::Degree => "degree",
            Self::Marksheet => "marksheet",
            Self::ExperienceCertificate => "experience_certificate",
            Self::CoaCertificate => "coa_certificate",
            Self::PropertyTaxReceipt => "property_tax_receipt",
            Self::SelfDeclaration => "self_declaration",
            Self::ProfilePicture => "profile_picture",
            Self::Additional => "additional",
            Self::RecommendationForm => "recommendation_form",
            Self::LicenseCertificate => "license_certificate",
            Self::PaymentChallan => "payment_challan",
        }
    }

    /// Produced by the engine, not uploaded by the applicant.
    pub fn is_system_generated(&self) -> bool {
        matches!(
            self,
            Self::RecommendationForm | Self::LicenseCertificate | Self::PaymentChallan
        )
    }

    /// An application may carry several `additional` attachments; every
    /// other kind is at most one per record.
    pub fn is_repeatable(&self) -> bool {
        matches!(self, Self::Additional)
    }
}

impl std::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Typed reference to stored document content.
///
/// `blob://sha256/{hex}` is content-addressed: the digest both names the
/// bytes and lets any holder verify them. `external://{system}/{id}` is a
/// passthrough to a collaborator system (payment gateway receipts, DigiLocker).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentHandle {
    Blob { digest: String },
    External { system: String, id: String },
}

/// Errors that can occur when parsing a content handle URI.
#[derive(Debug, thiserror::Error)]
pub enum ContentHandleParseError {
    #[error("invalid URI format: expected 'scheme://path'")]
    InvalidFormat,

    #[error("unknown scheme: {0}")]
    UnknownScheme(String),

    #[error("unsupported digest algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    #[error("missing path component after scheme")]
    MissingPath,
}

impl ContentHandle {
    /// Content-address a byte buffer.
    pub fn from_bytes(content: &[u8]) -> Self {
        Self::Blob {
            digest: hex::encode(Sha256::digest(content)),
        }
    }

    pub fn external(system: impl Into<String>, id: impl Into<String>) -> Self {
        Self::External {
            system: system.into(),
            id: id.into(),
        }
    }

    /// Parse a content handle from a URI string.
    pub fn parse(s: &str) -> Result<Self, ContentHandleParseError> {
        let (scheme, rest) = s
            .split_once("://")
            .ok_or(ContentHandleParseError::InvalidFormat)?;

        match scheme {
            "blob" => {
                let (algorithm, digest) = rest
                    .split_once('/')
                    .ok_or(ContentHandleParseError::MissingPath)?;
                if algorithm != "sha256" {
                    return Err(ContentHandleParseError::UnsupportedAlgorithm(
                        algorithm.to_string(),
                    ));
                }
                if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err(ContentHandleParseError::InvalidDigest(digest.to_string()));
                }
                Ok(Self::Blob {
                    digest: digest.to_ascii_lowercase(),
                })
            }
            "external" => {
                let (system, id) = rest
                    .split_once('/')
                    .ok_or(ContentHandleParseError::MissingPath)?;
                Ok(Self::External {
                    system: system.to_string(),
                    id: id.to_string(),
                })
            }
            _ => Err(ContentHandleParseError::UnknownScheme(scheme.to_string())),
        }
    }

    /// Convert to URI string.
    pub fn to_uri(&self) -> String {
        match self {
            Self::Blob { digest } => format!("blob://sha256/{digest}"),
            Self::External { system, id } => format!("external://{system}/{id}"),
        }
    }

    /// The sha-256 hex digest, for content-addressed handles.
    pub fn digest(&self) -> Option<&str> {
        match self {
            Self::Blob { digest } => Some(digest),
            Self::External { .. } => None,
        }
    }
}

impl std::fmt::Display for ContentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_uri())
    }
}

impl FromStr for ContentHandle {
    type Err = ContentHandleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// One document attached to an application record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub document_id: Uuid,
    pub doc_type: DocumentType,
    pub file_name: String,
    pub size_bytes: u64,
    pub handle: ContentHandle,
    /// Set by the Junior Engineer during appointment verification, and by
    /// the engine for documents it generated itself.
    pub verified: bool,
    pub uploaded_at: DateTime<Utc>,
}

impl DocumentRef {
    pub fn new(
        doc_type: DocumentType,
        file_name: impl Into<String>,
        size_bytes: u64,
        handle: ContentHandle,
    ) -> Self {
        Self {
            document_id: Uuid::new_v4(),
            doc_type,
            file_name: file_name.into(),
            size_bytes,
            handle,
            verified: false,
            uploaded_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_handle_roundtrip() {
        let handle = ContentHandle::from_bytes(b"scanned pan card");
        let uri = handle.to_uri();
        assert!(uri.starts_with("blob://sha256/"));
        assert_eq!(ContentHandle::parse(&uri).unwrap(), handle);
        assert_eq!(handle.digest().unwrap().len(), 64);
    }

    #[test]
    fn test_digest_is_deterministic() {
        assert_eq!(
            ContentHandle::from_bytes(b"same bytes"),
            ContentHandle::from_bytes(b"same bytes")
        );
        assert_ne!(
            ContentHandle::from_bytes(b"a"),
            ContentHandle::from_bytes(b"b")
        );
    }

    #[test]
    fn test_external_handle_roundtrip() {
        let handle = ContentHandle::external("razorpay", "pay_29QQoUBi66xm2f");
        let uri = handle.to_uri();
        assert_eq!(uri, "external://razorpay/pay_29QQoUBi66xm2f");
        assert_eq!(ContentHandle::parse(&uri).unwrap(), handle);
        assert_eq!(handle.digest(), None);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(ContentHandle::parse("not-a-uri").is_err());
        assert!(ContentHandle::parse("ftp://x/y").is_err());
        assert!(ContentHandle::parse("blob://md5/abcd").is_err());
        assert!(ContentHandle::parse("blob://sha256/nothex").is_err());
    }

    #[test]
    fn test_system_generated_kinds() {
        assert!(DocumentType::RecommendationForm.is_system_generated());
        assert!(DocumentType::PaymentChallan.is_system_generated());
        assert!(!DocumentType::Pan.is_system_generated());
        assert!(DocumentType::Additional.is_repeatable());
        assert!(!DocumentType::Pan.is_repeatable());
    }
}
