//! Appointment Sub-flow
//!
//! Scheduling data for the Junior Engineer's document-verification
//! appointment. At most one active appointment exists per application,
//! only while the record sits between scheduling and verification; it may
//! be rescheduled any number of times in that window, each reschedule
//! keeping its history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{required_trimmed, WorkflowError};

/// The active review appointment for an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub appointment_id: Uuid,
    pub application_id: Uuid,
    pub review_at: DateTime<Utc>,
    pub place: String,
    pub room_number: String,
    pub contact_person: String,
    pub comments: Option<String>,
    pub reschedules: Vec<Reschedule>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One entry of reschedule history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reschedule {
    pub reason: String,
    pub previous_review_at: DateTime<Utc>,
    pub rescheduled_at: DateTime<Utc>,
}

/// Payload for scheduling the review appointment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub review_at: DateTime<Utc>,
    pub place: String,
    pub contact_person: String,
    pub room_number: String,
    #[serde(default)]
    pub comments: Option<String>,
}

impl ScheduleRequest {
    /// Validate and normalise: required fields trimmed and non-empty,
    /// review date not in the past.
    pub fn validated(self, now: DateTime<Utc>) -> Result<Self, WorkflowError> {
        if self.review_at < now {
            return Err(WorkflowError::validation(
                "review_at",
                "review date must not be in the past",
            ));
        }
        Ok(Self {
            review_at: self.review_at,
            place: required_trimmed("place", &self.place)?,
            contact_person: required_trimmed("contact_person", &self.contact_person)?,
            room_number: required_trimmed("room_number", &self.room_number)?,
            comments: self
                .comments
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty()),
        })
    }
}

/// Payload for rescheduling an existing appointment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleRequest {
    pub review_at: DateTime<Utc>,
    pub reason: String,
    pub place: String,
    pub contact_person: String,
    pub room_number: String,
}

impl RescheduleRequest {
    pub fn validated(self, now: DateTime<Utc>) -> Result<Self, WorkflowError> {
        if self.review_at < now {
            return Err(WorkflowError::validation(
                "review_at",
                "review date must not be in the past",
            ));
        }
        Ok(Self {
            review_at: self.review_at,
            reason: required_trimmed("reason", &self.reason)?,
            place: required_trimmed("place", &self.place)?,
            contact_person: required_trimmed("contact_person", &self.contact_person)?,
            room_number: required_trimmed("room_number", &self.room_number)?,
        })
    }
}

impl Appointment {
    /// Create the appointment from an already-validated request.
    pub fn schedule(application_id: Uuid, request: ScheduleRequest) -> Self {
        let now = Utc::now();
        Self {
            appointment_id: Uuid::new_v4(),
            application_id,
            review_at: request.review_at,
            place: request.place,
            room_number: request.room_number,
            contact_person: request.contact_person,
            comments: request.comments,
            reschedules: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply an already-validated reschedule in place, appending history.
    pub fn reschedule(&mut self, request: RescheduleRequest) {
        let now = Utc::now();
        self.reschedules.push(Reschedule {
            reason: request.reason,
            previous_review_at: self.review_at,
            rescheduled_at: now,
        });
        self.review_at = request.review_at;
        self.place = request.place;
        self.contact_person = request.contact_person;
        self.room_number = request.room_number;
        self.updated_at = now;
    }
}
