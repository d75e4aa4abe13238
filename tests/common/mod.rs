//! Shared harness for integration tests: an engine over in-memory
//! backends plus helpers that drive an application to any stage of the
//! approval chain through the public API only.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use license_workflow::{
    ApplicationRecord, ApplicationStatus, CertificateWorker, ContentHandle, DocumentUpload,
    InMemoryContentStore, InMemoryStore, NewApplication, PlainTextGenerator, PositionType,
    RecordingNotifier, Role, ScheduleRequest, WorkflowEngine, WorkflowStore,
};
use license_workflow::record::{Address, ApplicantProfile, Experience, Qualification};

pub struct TestHarness {
    pub engine: WorkflowEngine,
    pub store: Arc<InMemoryStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub worker: CertificateWorker,
}

pub fn harness() -> TestHarness {
    let store = Arc::new(InMemoryStore::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let content = Arc::new(InMemoryContentStore::new());
    let generator = Arc::new(PlainTextGenerator::new(content));
    let engine = WorkflowEngine::new(store.clone(), notifier.clone(), generator.clone());
    let worker = CertificateWorker::new(store.clone(), generator, notifier.clone());
    TestHarness {
        engine,
        store,
        notifier,
        worker,
    }
}

pub fn new_application(position: PositionType) -> NewApplication {
    NewApplication {
        position,
        applicant: ApplicantProfile {
            full_name: "N. Gokhale".to_string(),
            email: "ng@example.com".to_string(),
            phone: "9800000010".to_string(),
            pan: "ABCPG2345Q".to_string(),
            aadhar: "789012345678".to_string(),
            coa_number: Some("CA/2019/112233".to_string()),
        },
        local_address: Address {
            line1: "21 Tilak Marg".to_string(),
            line2: Some("Sadashiv Peth".to_string()),
            city: "Pune".to_string(),
            state: "MH".to_string(),
            pincode: "411030".to_string(),
        },
        permanent_address: None,
        qualifications: vec![Qualification {
            degree: "B.E. Civil".to_string(),
            institution: "COEP".to_string(),
            year: 2015,
        }],
        experiences: vec![Experience {
            organisation: "Shree Constructions".to_string(),
            designation: "Site Engineer".to_string(),
            from: chrono::NaiveDate::from_ymd_opt(2016, 6, 1).unwrap(),
            to: None,
        }],
    }
}

/// Create a draft with every required document uploaded.
pub async fn draft_with_documents(h: &TestHarness, position: PositionType) -> ApplicationRecord {
    let record = h.engine.create_draft(new_application(position)).await.unwrap();
    for doc_type in position.required_documents() {
        h.engine
            .upload_document(
                record.id,
                DocumentUpload {
                    doc_type: *doc_type,
                    file_name: format!("{doc_type}.pdf"),
                    size_bytes: 2048,
                    handle: ContentHandle::from_bytes(doc_type.as_str().as_bytes()),
                },
                &Role::Applicant,
            )
            .await
            .unwrap();
    }
    record
}

pub fn valid_schedule() -> ScheduleRequest {
    ScheduleRequest {
        review_at: Utc::now() + Duration::days(3),
        place: "Ward Office B".to_string(),
        contact_person: "R. Deshmukh".to_string(),
        room_number: "214".to_string(),
        comments: None,
    }
}

/// Generate a code for `actor` and sign with it.
pub async fn sign(h: &TestHarness, id: Uuid, actor: &Role) {
    h.engine.generate_otp(id, actor).await.unwrap();
    let code = h.notifier.last_otp_code(id).await.unwrap();
    h.engine.verify_and_sign(id, code, None, actor).await.unwrap();
}

pub async fn status_of(h: &TestHarness, id: Uuid) -> ApplicationStatus {
    h.store.load_application(id).await.unwrap().status
}

/// Drive a fresh application through the chain until it rests on
/// `target`. Rejected is reached by an AE rejection.
pub async fn drive_to(
    h: &TestHarness,
    position: PositionType,
    target: ApplicationStatus,
) -> Uuid {
    use ApplicationStatus::*;

    let record = draft_with_documents(h, position).await;
    let id = record.id;
    if target == Draft {
        return id;
    }

    if target == Rejected {
        h.engine.submit(id, &Role::Applicant).await.unwrap();
        h.engine
            .schedule_appointment(id, valid_schedule(), &Role::JuniorEngineer)
            .await
            .unwrap();
        h.engine
            .verify_documents(id, None, &Role::JuniorEngineer)
            .await
            .unwrap();
        h.engine
            .reject(
                id,
                "experience certificate does not cover the claimed period",
                &Role::AssistantEngineer { position },
            )
            .await
            .unwrap();
        return id;
    }

    h.engine.submit(id, &Role::Applicant).await.unwrap();
    if target == JePending {
        return id;
    }

    h.engine
        .schedule_appointment(id, valid_schedule(), &Role::JuniorEngineer)
        .await
        .unwrap();
    if target == AppointmentScheduled {
        return id;
    }

    h.engine
        .verify_documents(id, None, &Role::JuniorEngineer)
        .await
        .unwrap();
    if target == AePending {
        return id;
    }

    sign(h, id, &Role::AssistantEngineer { position }).await;
    if target == EeStage1Pending {
        return id;
    }

    sign(h, id, &Role::ExecutiveEngineer).await;
    if target == CeStage1Pending {
        return id;
    }

    sign(h, id, &Role::CityEngineer).await;
    if target == PaymentPending {
        assert!(position.has_fee(), "fee-free grades never reach the payment gate");
        return id;
    }

    if position.has_fee() {
        h.engine
            .confirm_payment(id, "gw-0001", &Role::System)
            .await
            .unwrap();
    }
    if target == ClerkPending {
        return id;
    }

    h.engine.approve(id, None, &Role::Clerk).await.unwrap();
    if target == EeStage2Pending {
        return id;
    }

    sign(h, id, &Role::ExecutiveEngineer).await;
    if target == CeStage2Pending {
        return id;
    }

    sign(h, id, &Role::CityEngineer).await;
    assert_eq!(status_of(h, id).await, Approved);
    id
}
