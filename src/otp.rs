//! OTP Signature Sessions
//!
//! A digital signature by AE/EE/CE is gated by a one-time code delivered
//! out of band. One active session exists per (application, signing role);
//! issuing a new code replaces the old session. Only a SHA-256 hash of
//! the code is stored, a session is consumable exactly once, and repeated
//! failed attempts invalidate it.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::str::FromStr;
use uuid::Uuid;

use crate::role::Role;

/// The three roles that sign with an OTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignerRole {
    AssistantEngineer,
    ExecutiveEngineer,
    CityEngineer,
}

impl SignerRole {
    /// Signing identity of an acting role, if it has one.
    pub fn from_role(role: &Role) -> Option<Self> {
        match role {
            Role::AssistantEngineer { .. } => Some(Self::AssistantEngineer),
            Role::ExecutiveEngineer => Some(Self::ExecutiveEngineer),
            Role::CityEngineer => Some(Self::CityEngineer),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AssistantEngineer => "assistant_engineer",
            Self::ExecutiveEngineer => "executive_engineer",
            Self::CityEngineer => "city_engineer",
        }
    }
}

impl std::fmt::Display for SignerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown signer role: {0}")]
pub struct UnknownSignerRole(pub String);

impl FromStr for SignerRole {
    type Err = UnknownSignerRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "assistant_engineer" => Ok(Self::AssistantEngineer),
            "executive_engineer" => Ok(Self::ExecutiveEngineer),
            "city_engineer" => Ok(Self::CityEngineer),
            _ => Err(UnknownSignerRole(s.to_string())),
        }
    }
}

/// Outcome of checking a submitted code against a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpCheck {
    /// Code matches a live session; proceed to consume it.
    Valid,
    /// Live session, wrong code. Counts as a failed attempt.
    Mismatch,
    /// Session is consumed, expired, or attempt-capped. Not retryable.
    Unusable,
}

/// One OTP signature session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtpSession {
    pub session_id: Uuid,
    pub application_id: Uuid,
    pub signer: SignerRole,
    /// Hex SHA-256 of the code; the raw code is never stored.
    pub code_hash: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub consumed_at: Option<DateTime<Utc>>,
}

impl OtpSession {
    /// Issue a fresh session. Returns the session and the raw code; the
    /// code goes to the delivery channel and is otherwise dropped.
    pub fn issue(
        application_id: Uuid,
        signer: SignerRole,
        ttl: Duration,
        max_attempts: u32,
    ) -> (Self, String) {
        let code = format!("{:06}", rand::thread_rng().gen_range(0..1_000_000u32));
        let now = Utc::now();
        let session = Self {
            session_id: Uuid::new_v4(),
            application_id,
            signer,
            code_hash: Self::hash_code(&code),
            issued_at: now,
            expires_at: now + ttl,
            attempts: 0,
            max_attempts,
            consumed_at: None,
        };
        (session, code)
    }

    pub fn hash_code(code: &str) -> String {
        hex::encode(Sha256::digest(code.as_bytes()))
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed_at.is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Check a submitted code. Does not mutate; the caller records the
    /// failed attempt / consumption through the store so the check stays
    /// race-free.
    pub fn check(&self, code: &str, now: DateTime<Utc>) -> OtpCheck {
        if self.is_consumed() || self.is_expired(now) || self.attempts_exhausted() {
            return OtpCheck::Unusable;
        }
        if self.code_hash == Self::hash_code(code) {
            OtpCheck::Valid
        } else {
            OtpCheck::Mismatch
        }
    }
}
