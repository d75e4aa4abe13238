//! End-to-end lifecycle tests: the full approval chain, the payment
//! gate, rejection/resubmission, OTP misuse, and asynchronous
//! certificate issuance.

mod common;

use chrono::{Duration, Utc};
use common::*;
use license_workflow::{
    ApplicationStatus, DocumentType, NotifierEvent, PositionType, Role, ScheduleRequest,
    SideEffect, WorkflowError, WorkflowStore,
};

#[tokio::test]
async fn test_full_chain_for_fee_bearing_position() {
    let h = harness();
    let position = PositionType::LicenceEngineer;
    let record = draft_with_documents(&h, position).await;
    let id = record.id;

    // Submission assigns the application number and rests on JE.
    let outcome = h.engine.submit(id, &Role::Applicant).await.unwrap();
    assert_eq!(outcome.status, ApplicationStatus::JePending);
    let number = h
        .store
        .load_application(id)
        .await
        .unwrap()
        .application_number
        .unwrap();
    assert!(number.starts_with("LIC-"));

    // JE schedules, then verifies at the appointment.
    h.engine
        .schedule_appointment(id, valid_schedule(), &Role::JuniorEngineer)
        .await
        .unwrap();
    assert_eq!(status_of(&h, id).await, ApplicationStatus::AppointmentScheduled);

    let outcome = h
        .engine
        .verify_documents(id, Some("all originals sighted".to_string()), &Role::JuniorEngineer)
        .await
        .unwrap();
    // Verification and the hand-off to AE happen in the same call.
    assert_eq!(outcome.status, ApplicationStatus::AePending);
    assert!(h.engine.get_application(id).await.unwrap().appointment.is_none());

    // Stage-1 signatures: AE, EE, CE, each gated by a fresh code.
    sign(&h, id, &Role::AssistantEngineer { position }).await;
    assert_eq!(status_of(&h, id).await, ApplicationStatus::EeStage1Pending);
    sign(&h, id, &Role::ExecutiveEngineer).await;
    assert_eq!(status_of(&h, id).await, ApplicationStatus::CeStage1Pending);

    let loaded = h.store.load_application(id).await.unwrap();
    assert!(loaded.document(DocumentType::RecommendationForm).is_some());

    // Fee-bearing grade lands on the payment gate after CE stage 1.
    sign(&h, id, &Role::CityEngineer).await;
    assert_eq!(status_of(&h, id).await, ApplicationStatus::PaymentPending);

    h.engine.initiate_payment(id, &Role::Applicant).await.unwrap();
    let outcome = h
        .engine
        .confirm_payment(id, "gw-77421", &Role::Applicant)
        .await
        .unwrap();
    assert_eq!(outcome.status, ApplicationStatus::ClerkPending);

    let loaded = h.store.load_application(id).await.unwrap();
    assert!(loaded.document(DocumentType::PaymentChallan).is_some());
    let payment = loaded.payment.clone().unwrap();
    assert_eq!(payment.amount, position.fee());
    assert_eq!(payment.gateway_reference, "gw-77421");

    // Clerk approval, then the stage-2 signatures.
    h.engine.approve(id, None, &Role::Clerk).await.unwrap();
    assert_eq!(status_of(&h, id).await, ApplicationStatus::EeStage2Pending);
    sign(&h, id, &Role::ExecutiveEngineer).await;
    assert_eq!(status_of(&h, id).await, ApplicationStatus::CeStage2Pending);
    sign(&h, id, &Role::CityEngineer).await;
    assert_eq!(status_of(&h, id).await, ApplicationStatus::Approved);

    // Certificate generation is asynchronous: pending until the worker runs.
    let status = h.engine.certificate_status(id).await.unwrap();
    assert!(!status.exists);

    assert_eq!(h.worker.drain_once().await.unwrap(), 1);

    let status = h.engine.certificate_status(id).await.unwrap();
    assert!(status.exists);
    assert!(status.certificate_id.is_some());
    assert!(status.generated_at.is_some());

    let final_record = h.store.load_application(id).await.unwrap();
    assert!(final_record.document(DocumentType::LicenseCertificate).is_some());
    assert!(h
        .notifier
        .events()
        .await
        .iter()
        .any(|e| matches!(e, NotifierEvent::CertificateIssued { .. })));
}

#[tokio::test]
async fn test_architect_never_enters_payment_gate() {
    let h = harness();
    let id = drive_to(&h, PositionType::Architect, ApplicationStatus::CeStage1Pending).await;

    // CE stage-1 signature forwards straight to the clerk.
    sign(&h, id, &Role::CityEngineer).await;
    assert_eq!(status_of(&h, id).await, ApplicationStatus::ClerkPending);

    let record = h.store.load_application(id).await.unwrap();
    assert!(record.payment.is_none());
    assert!(!record
        .history
        .iter()
        .any(|c| c.to == ApplicationStatus::PaymentPending));
}

#[tokio::test]
async fn test_duplicate_payment_confirmation_is_noop() {
    let h = harness();
    let id = drive_to(&h, PositionType::Supervisor1, ApplicationStatus::PaymentPending).await;

    h.engine
        .confirm_payment(id, "gw-1111", &Role::Applicant)
        .await
        .unwrap();
    assert_eq!(status_of(&h, id).await, ApplicationStatus::ClerkPending);

    // A late gateway retry changes nothing and reports no effects.
    let outcome = h
        .engine
        .confirm_payment(id, "gw-2222", &Role::System)
        .await
        .unwrap();
    assert_eq!(outcome.status, ApplicationStatus::ClerkPending);
    assert!(outcome.effects.is_empty());

    let record = h.store.load_application(id).await.unwrap();
    assert_eq!(record.payment.unwrap().gateway_reference, "gw-1111");
}

#[tokio::test]
async fn test_rejection_then_resubmission_restarts_chain_keeping_payment() {
    let h = harness();
    let position = PositionType::LicenceEngineer;
    let id = drive_to(&h, position, ApplicationStatus::EeStage2Pending).await;

    // EE rejects at stage 2, after the fee was paid.
    h.engine
        .reject(id, "recommendation form references the wrong plot", &Role::ExecutiveEngineer)
        .await
        .unwrap();

    let record = h.store.load_application(id).await.unwrap();
    assert_eq!(record.status, ApplicationStatus::Rejected);
    let rejection = record.rejection.clone().unwrap();
    assert_eq!(rejection.stage, ApplicationStatus::EeStage2Pending);
    assert_eq!(rejection.rejected_by, "executive_engineer");
    assert!(record.payment.is_some());
    assert!(h
        .notifier
        .events()
        .await
        .iter()
        .any(|e| matches!(e, NotifierEvent::ApplicationRejected { .. })));

    // Resubmission restarts the chain from JE.
    let outcome = h.engine.resubmit(id, &Role::Applicant).await.unwrap();
    assert_eq!(outcome.status, ApplicationStatus::JePending);

    let record = h.store.load_application(id).await.unwrap();
    assert!(record.rejection.is_none());
    // Earlier sign-offs are void: generated stage documents are gone and
    // uploads need fresh verification.
    assert!(record.document(DocumentType::RecommendationForm).is_none());
    assert!(record.document(DocumentType::LicenseCertificate).is_none());
    assert!(record
        .documents
        .iter()
        .filter(|d| !d.doc_type.is_system_generated())
        .all(|d| !d.verified));
    // Payment and its challan persist.
    assert!(record.payment.is_some());
    assert!(record.document(DocumentType::PaymentChallan).is_some());

    // Second pass: the payment gate is skipped after CE stage 1.
    h.engine
        .schedule_appointment(id, valid_schedule(), &Role::JuniorEngineer)
        .await
        .unwrap();
    h.engine
        .verify_documents(id, None, &Role::JuniorEngineer)
        .await
        .unwrap();
    sign(&h, id, &Role::AssistantEngineer { position }).await;
    sign(&h, id, &Role::ExecutiveEngineer).await;
    sign(&h, id, &Role::CityEngineer).await;
    assert_eq!(status_of(&h, id).await, ApplicationStatus::ClerkPending);
}

#[tokio::test]
async fn test_rejection_requires_comments() {
    let h = harness();
    let position = PositionType::Supervisor2;
    let id = drive_to(&h, position, ApplicationStatus::AePending).await;

    let err = h
        .engine
        .reject(id, "   ", &Role::AssistantEngineer { position })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::Validation { field: "comments", .. }
    ));
    assert_eq!(status_of(&h, id).await, ApplicationStatus::AePending);
}

#[tokio::test]
async fn test_consumed_otp_cannot_be_replayed() {
    let h = harness();
    let position = PositionType::StructuralEngineer;
    let id = drive_to(&h, position, ApplicationStatus::AePending).await;
    let ae = Role::AssistantEngineer { position };

    h.engine.generate_otp(id, &ae).await.unwrap();
    let code = h.notifier.last_otp_code(id).await.unwrap();

    h.engine
        .verify_and_sign(id, code.clone(), None, &ae)
        .await
        .unwrap();
    assert_eq!(status_of(&h, id).await, ApplicationStatus::EeStage1Pending);

    // Replaying the same code must not double-apply anything. (It also
    // fails the role/state guard by now; the session is spent either way.)
    let err = h
        .engine
        .verify_and_sign(id, code, None, &ae)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::InvalidOtp | WorkflowError::Authorization
    ));
    assert_eq!(status_of(&h, id).await, ApplicationStatus::EeStage1Pending);

    let record = h.store.load_application(id).await.unwrap();
    assert_eq!(
        record
            .documents
            .iter()
            .filter(|d| d.doc_type == DocumentType::RecommendationForm)
            .count(),
        1
    );
}

#[tokio::test]
async fn test_expired_otp_is_rejected() {
    let h = harness();
    let position = PositionType::LicenceEngineer;
    let id = drive_to(&h, position, ApplicationStatus::AePending).await;
    let ae = Role::AssistantEngineer { position };

    h.engine.generate_otp(id, &ae).await.unwrap();
    let code = h.notifier.last_otp_code(id).await.unwrap();

    // Age the session past its expiry behind the engine's back.
    use license_workflow::SignerRole;
    let mut session = h
        .store
        .active_otp_session(id, SignerRole::AssistantEngineer)
        .await
        .unwrap()
        .unwrap();
    session.expires_at = Utc::now() - Duration::seconds(1);
    h.store.put_otp_session(&session).await.unwrap();

    let err = h.engine.verify_and_sign(id, code, None, &ae).await.unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidOtp));
    assert_eq!(status_of(&h, id).await, ApplicationStatus::AePending);
}

#[tokio::test]
async fn test_wrong_code_counts_attempts_until_session_dies() {
    let h = harness();
    let position = PositionType::Supervisor1;
    let id = drive_to(&h, position, ApplicationStatus::AePending).await;
    let ae = Role::AssistantEngineer { position };

    h.engine.generate_otp(id, &ae).await.unwrap();
    let code = h.notifier.last_otp_code(id).await.unwrap();

    // Burn through every allowed attempt with a wrong code.
    for _ in 0..5 {
        let err = h
            .engine
            .verify_and_sign(id, "0000000", None, &ae)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidOtp));
    }

    // Even the right code is dead now.
    let err = h.engine.verify_and_sign(id, code, None, &ae).await.unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidOtp));
    assert_eq!(status_of(&h, id).await, ApplicationStatus::AePending);

    // A fresh session recovers the flow.
    sign(&h, id, &ae).await;
    assert_eq!(status_of(&h, id).await, ApplicationStatus::EeStage1Pending);
}

#[tokio::test]
async fn test_sign_without_session_fails() {
    let h = harness();
    let position = PositionType::Supervisor2;
    let id = drive_to(&h, position, ApplicationStatus::AePending).await;

    let err = h
        .engine
        .verify_and_sign(id, "123456", None, &Role::AssistantEngineer { position })
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidOtp));
    assert_eq!(status_of(&h, id).await, ApplicationStatus::AePending);
}

#[tokio::test]
async fn test_schedule_with_past_date_is_rejected() {
    let h = harness();
    let id = drive_to(&h, PositionType::LicenceEngineer, ApplicationStatus::JePending).await;

    let request = ScheduleRequest {
        review_at: Utc::now() - Duration::days(1),
        place: "Ward Office B".to_string(),
        contact_person: "R. Deshmukh".to_string(),
        room_number: "214".to_string(),
        comments: None,
    };
    let err = h
        .engine
        .schedule_appointment(id, request, &Role::JuniorEngineer)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::Validation { field: "review_at", .. }
    ));
    assert_eq!(status_of(&h, id).await, ApplicationStatus::JePending);
}

#[tokio::test]
async fn test_reschedule_keeps_status_and_appends_history() {
    let h = harness();
    let id = drive_to(
        &h,
        PositionType::Supervisor1,
        ApplicationStatus::AppointmentScheduled,
    )
    .await;

    let view = h.engine.get_application(id).await.unwrap();
    let appointment = view.appointment.unwrap();

    let outcome = h
        .engine
        .reschedule_appointment(
            appointment.appointment_id,
            license_workflow::RescheduleRequest {
                review_at: Utc::now() + Duration::days(10),
                reason: "officer deputed to election duty".to_string(),
                place: "Ward Office A".to_string(),
                contact_person: "S. Patil".to_string(),
                room_number: "101".to_string(),
            },
            &Role::JuniorEngineer,
        )
        .await
        .unwrap();
    assert_eq!(outcome.status, ApplicationStatus::AppointmentScheduled);
    assert!(outcome
        .effects
        .iter()
        .any(|e| matches!(e, SideEffect::AppointmentRescheduled { .. })));

    let view = h.engine.get_application(id).await.unwrap();
    let rescheduled = view.appointment.unwrap();
    assert_eq!(rescheduled.appointment_id, appointment.appointment_id);
    assert_eq!(rescheduled.reschedules.len(), 1);
    assert_eq!(rescheduled.place, "Ward Office A");
    assert!(h
        .notifier
        .events()
        .await
        .iter()
        .any(|e| matches!(e, NotifierEvent::AppointmentRescheduled { .. })));
}

#[tokio::test]
async fn test_every_hop_is_recorded_in_history() {
    let h = harness();
    let id = drive_to(&h, PositionType::Architect, ApplicationStatus::ClerkPending).await;

    let record = h.store.load_application(id).await.unwrap();
    let hops: Vec<(ApplicationStatus, ApplicationStatus)> =
        record.history.iter().map(|c| (c.from, c.to)).collect();

    // Auto-forward hops are present and contiguous with the manual ones.
    assert!(hops.contains(&(ApplicationStatus::Draft, ApplicationStatus::Submitted)));
    assert!(hops.contains(&(ApplicationStatus::Submitted, ApplicationStatus::JePending)));
    assert!(hops.contains(&(ApplicationStatus::CeStage1Signed, ApplicationStatus::ClerkPending)));
    for pair in hops.windows(2) {
        assert_eq!(pair[0].1, pair[1].0, "history must chain without gaps");
    }
}
