use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::json;

use maestro_core::domain::service_request::{
    CustomerOrigin, PaymentMethod, PaymentStatus, ServiceStatus, Urgency,
};
use maestro_core::domain::user::UserId;
use maestro_core::errors::{PreconditionError, ValidationError, WorkflowError};
use maestro_core::messages::TemplateMessageGenerator;
use maestro_core::session::Session;
use maestro_core::store::{collections, DocumentStore, WriteBatch};
use maestro_core::workflow::service::{
    CompletionReport, IntakeInput, PaymentInput, ScheduleInput,
};
use maestro_core::workflow::quote::{QuoteDraftInput, QuoteItemInput};
use maestro_core::workflow::{quote, roles, service, WorkflowPolicy};
use maestro_core::{Quote, ServiceRequest};
use maestro_store::{ChangeKind, MemoryStore};

fn dispatcher() -> Session {
    Session::new("disp-1").with_email("dispatcher@example.com").with_display_name("Lucía")
}

fn technician() -> Session {
    Session::new("tech-1").with_display_name("Luis")
}

fn intake_input() -> IntakeInput {
    IntakeInput {
        customer_id: "cust-1".to_owned(),
        customer_name: "Ana Pérez".to_owned(),
        customer_email: Some("ana@example.com".to_owned()),
        customer_phone: Some("0991234567".to_owned()),
        customer_origin: Some(CustomerOrigin::WhatsApp),
        service_type: "Plomería".to_owned(),
        location: "Av. Central 42".to_owned(),
        problem_description: "Fuga bajo el fregadero de la cocina".to_owned(),
        urgency: Urgency::Medium,
    }
}

fn draft_input() -> QuoteDraftInput {
    QuoteDraftInput {
        description: "Reparación de fuga y cambio de sifón".to_owned(),
        items: vec![QuoteItemInput {
            description: "Mano de obra".to_owned(),
            quantity: Decimal::from(2),
            price: Decimal::from(100),
        }],
        notes: None,
        vat_percentage: Some(Decimal::ZERO),
        discount_amount: Decimal::ZERO,
        valid_until: None,
    }
}

async fn reload_service(store: &MemoryStore, id: &str) -> ServiceRequest {
    store
        .get(collections::SERVICE_REQUESTS, id)
        .await
        .expect("get service")
        .expect("service present")
        .decode()
        .expect("decode service")
}

async fn reload_quote(store: &MemoryStore, id: &str) -> Quote {
    store
        .get(collections::QUOTES, id)
        .await
        .expect("get quote")
        .expect("quote present")
        .decode()
        .expect("decode quote")
}

#[tokio::test]
async fn full_lifecycle_reaches_paid() {
    let store = MemoryStore::new();
    let policy = WorkflowPolicy::default();
    let admin = dispatcher();
    let tech = technician();

    let request = service::create_intake(&store, &admin, intake_input()).await.expect("intake");
    assert_eq!(request.status, ServiceStatus::Pending);

    let draft = quote::create_draft(&store, &tech, &policy, &request.id, draft_input())
        .await
        .expect("draft");
    assert_eq!(draft.total_amount, Decimal::from(200));

    quote::mark_sent(&store, &tech, &draft.id).await.expect("sent");
    let (approved, assigned) = quote::approve(&store, &admin, &draft.id).await.expect("approve");
    assert_eq!(approved.status, maestro_core::QuoteStatus::Approved);
    assert_eq!(assigned.status, ServiceStatus::Assigned);
    assert_eq!(assigned.quote_id.as_ref().expect("quote id").0, draft.id.0);

    service::schedule(
        &store,
        &admin,
        &request.id,
        ScheduleInput {
            date: NaiveDate::from_ymd_opt(2026, 9, 1).expect("date"),
            time: "09:30".to_owned(),
            notes: None,
        },
    )
    .await
    .expect("schedule");

    service::start_work(&store, &tech, &request.id).await.expect("start");

    let completed = service::complete(
        &store,
        &tech,
        &policy,
        &request.id,
        CompletionReport {
            notes: "Se reemplazó el sifón y se probó la instalación.".to_owned(),
            hours_worked: Some(Decimal::from(3)),
            evidence_photos: vec!["photo-1".to_owned()],
        },
    )
    .await
    .expect("complete");

    assert_eq!(completed.total_amount, Some(Decimal::from(200)));
    assert_eq!(completed.advance_payment, Some(Decimal::ZERO));
    assert_eq!(completed.remaining_balance, Some(Decimal::from(200)));
    assert_eq!(completed.payment_status, Some(PaymentStatus::Pending));
    assert_eq!(completed.warranty_days, Some(30));
    let completed_at = completed.completed_at.expect("completed at");
    let warranty = completed.warranty_expires_at.expect("warranty");
    assert_eq!(warranty - completed_at, chrono::Duration::days(30));

    let paid = service::register_payment(
        &store,
        &admin,
        &request.id,
        PaymentInput {
            amount: Decimal::from(200),
            method: PaymentMethod::Transfer,
            paid_at: Utc::now(),
            notes: None,
        },
    )
    .await
    .expect("payment");

    assert_eq!(paid.remaining_balance, Some(Decimal::ZERO));
    assert_eq!(paid.payment_status, Some(PaymentStatus::Paid));
    assert_eq!(paid.payments.len(), 1);

    let stored = reload_service(&store, &request.id.0).await;
    assert_eq!(stored.payment_status, Some(PaymentStatus::Paid));
}

#[tokio::test]
async fn partial_payment_keeps_service_partially_paid() {
    let store = MemoryStore::new();
    let policy = WorkflowPolicy::default();
    let admin = dispatcher();
    let tech = technician();

    let request = service::create_intake(&store, &admin, intake_input()).await.expect("intake");
    let draft = quote::create_draft(&store, &tech, &policy, &request.id, draft_input())
        .await
        .expect("draft");
    quote::approve(&store, &admin, &draft.id).await.expect("approve");
    service::schedule(
        &store,
        &admin,
        &request.id,
        ScheduleInput {
            date: NaiveDate::from_ymd_opt(2026, 9, 1).expect("date"),
            time: "09:00".to_owned(),
            notes: None,
        },
    )
    .await
    .expect("schedule");
    service::start_work(&store, &tech, &request.id).await.expect("start");
    service::complete(
        &store,
        &tech,
        &policy,
        &request.id,
        CompletionReport {
            notes: "Trabajo terminado sin novedades.".to_owned(),
            hours_worked: None,
            evidence_photos: Vec::new(),
        },
    )
    .await
    .expect("complete");

    let after = service::register_payment(
        &store,
        &admin,
        &request.id,
        PaymentInput {
            amount: Decimal::from(80),
            method: PaymentMethod::Cash,
            paid_at: Utc::now(),
            notes: Some("Abono inicial".to_owned()),
        },
    )
    .await
    .expect("payment");

    assert_eq!(after.remaining_balance, Some(Decimal::from(120)));
    assert_eq!(after.payment_status, Some(PaymentStatus::PartiallyPaid));
}

#[tokio::test]
async fn completion_without_hours_keeps_them_unrecorded() {
    let store = MemoryStore::new();
    let policy = WorkflowPolicy::default();
    let admin = dispatcher();
    let tech = technician();

    let request = service::create_intake(&store, &admin, intake_input()).await.expect("intake");
    let draft = quote::create_draft(&store, &tech, &policy, &request.id, draft_input())
        .await
        .expect("draft");
    quote::approve(&store, &admin, &draft.id).await.expect("approve");
    service::schedule(
        &store,
        &admin,
        &request.id,
        ScheduleInput {
            date: NaiveDate::from_ymd_opt(2026, 9, 2).expect("date"),
            time: "10:00".to_owned(),
            notes: None,
        },
    )
    .await
    .expect("schedule");
    service::start_work(&store, &tech, &request.id).await.expect("start");

    let completed = service::complete(
        &store,
        &tech,
        &policy,
        &request.id,
        CompletionReport {
            notes: "Trabajo terminado sin horas registradas.".to_owned(),
            hours_worked: None,
            evidence_photos: Vec::new(),
        },
    )
    .await
    .expect("complete");

    assert_eq!(completed.hours_worked, None);
    let stored = reload_service(&store, &request.id.0).await;
    assert_eq!(stored.hours_worked, None);
}

#[tokio::test]
async fn complete_with_unresolvable_quote_leaves_service_untouched() {
    let store = MemoryStore::new();
    let policy = WorkflowPolicy::default();
    let admin = dispatcher();
    let tech = technician();

    let request = service::create_intake(&store, &admin, intake_input()).await.expect("intake");
    let draft = quote::create_draft(&store, &tech, &policy, &request.id, draft_input())
        .await
        .expect("draft");
    quote::approve(&store, &admin, &draft.id).await.expect("approve");
    service::schedule(
        &store,
        &admin,
        &request.id,
        ScheduleInput {
            date: NaiveDate::from_ymd_opt(2026, 9, 1).expect("date"),
            time: "10:00".to_owned(),
            notes: None,
        },
    )
    .await
    .expect("schedule");
    service::start_work(&store, &tech, &request.id).await.expect("start");

    // The quote vanishes out from under the service reference.
    store
        .commit(WriteBatch::new().delete(collections::QUOTES, &draft.id.0))
        .await
        .expect("drop quote");

    let err = service::complete(
        &store,
        &tech,
        &policy,
        &request.id,
        CompletionReport {
            notes: "Trabajo terminado sin novedades.".to_owned(),
            hours_worked: None,
            evidence_photos: Vec::new(),
        },
    )
    .await
    .expect_err("missing quote");
    assert!(matches!(
        err,
        WorkflowError::Precondition(PreconditionError::MissingQuote { .. })
    ));

    let stored = reload_service(&store, &request.id.0).await;
    assert_eq!(stored.status, ServiceStatus::EnRuta);
    assert_eq!(stored.total_amount, None);
    assert_eq!(stored.payment_status, None);
}

#[tokio::test]
async fn approve_aborts_atomically_when_parent_is_missing() {
    let store = MemoryStore::new();
    let policy = WorkflowPolicy::default();
    let admin = dispatcher();
    let tech = technician();

    let request = service::create_intake(&store, &admin, intake_input()).await.expect("intake");
    let draft = quote::create_draft(&store, &tech, &policy, &request.id, draft_input())
        .await
        .expect("draft");

    store
        .commit(WriteBatch::new().delete(collections::SERVICE_REQUESTS, &request.id.0))
        .await
        .expect("drop service");

    let err = quote::approve(&store, &admin, &draft.id).await.expect_err("orphan");
    assert!(matches!(
        err,
        WorkflowError::Precondition(PreconditionError::OrphanQuote { .. })
    ));

    let stored = reload_quote(&store, &draft.id.0).await;
    assert_eq!(stored.status, maestro_core::QuoteStatus::Draft);
}

#[tokio::test]
async fn approve_is_single_shot() {
    let store = MemoryStore::new();
    let policy = WorkflowPolicy::default();
    let admin = dispatcher();
    let tech = technician();

    let request = service::create_intake(&store, &admin, intake_input()).await.expect("intake");
    let draft = quote::create_draft(&store, &tech, &policy, &request.id, draft_input())
        .await
        .expect("draft");
    quote::approve(&store, &admin, &draft.id).await.expect("approve");

    let err = quote::approve(&store, &admin, &draft.id).await.expect_err("second approve");
    assert!(matches!(
        err,
        WorkflowError::Precondition(PreconditionError::InvalidQuoteTransition { .. })
    ));
}

#[tokio::test]
async fn schedule_rejects_malformed_times() {
    let store = MemoryStore::new();
    let admin = dispatcher();
    let request = service::create_intake(&store, &admin, intake_input()).await.expect("intake");

    let err = service::schedule(
        &store,
        &admin,
        &request.id,
        ScheduleInput {
            date: NaiveDate::from_ymd_opt(2026, 9, 1).expect("date"),
            time: "25:99".to_owned(),
            notes: None,
        },
    )
    .await
    .expect_err("bad time");
    assert!(matches!(
        err,
        WorkflowError::Validation(ValidationError::InvalidTimeFormat { .. })
    ));
}

#[tokio::test]
async fn completion_notes_must_be_meaningful() {
    let store = MemoryStore::new();
    let policy = WorkflowPolicy::default();
    let admin = dispatcher();
    let request = service::create_intake(&store, &admin, intake_input()).await.expect("intake");

    let err = service::complete(
        &store,
        &admin,
        &policy,
        &request.id,
        CompletionReport { notes: "ok".to_owned(), hours_worked: None, evidence_photos: Vec::new() },
    )
    .await
    .expect_err("short notes");
    assert!(matches!(
        err,
        WorkflowError::Validation(ValidationError::NotesTooShort { min: 10 })
    ));
}

#[tokio::test]
async fn payments_require_completion() {
    let store = MemoryStore::new();
    let admin = dispatcher();
    let request = service::create_intake(&store, &admin, intake_input()).await.expect("intake");

    let err = service::register_payment(
        &store,
        &admin,
        &request.id,
        PaymentInput {
            amount: Decimal::from(10),
            method: PaymentMethod::Cash,
            paid_at: Utc::now(),
            notes: None,
        },
    )
    .await
    .expect_err("not completed");
    assert!(matches!(
        err,
        WorkflowError::Precondition(PreconditionError::PaymentBeforeCompletion { .. })
    ));
}

#[tokio::test]
async fn deleting_a_pending_service_cascades_its_quotes() {
    let store = MemoryStore::new();
    let policy = WorkflowPolicy::default();
    let admin = dispatcher();
    let tech = technician();

    let request = service::create_intake(&store, &admin, intake_input()).await.expect("intake");
    let first = quote::create_draft(&store, &tech, &policy, &request.id, draft_input())
        .await
        .expect("first draft");
    let second = quote::create_draft(&store, &tech, &policy, &request.id, draft_input())
        .await
        .expect("second draft");

    service::delete(&store, &request.id).await.expect("delete");

    assert!(store.get(collections::SERVICE_REQUESTS, &request.id.0).await.expect("get").is_none());
    assert!(store.get(collections::QUOTES, &first.id.0).await.expect("get").is_none());
    assert!(store.get(collections::QUOTES, &second.id.0).await.expect("get").is_none());
}

#[tokio::test]
async fn deletion_refused_once_work_advanced_or_money_moved() {
    let store = MemoryStore::new();
    let admin = dispatcher();

    let request = service::create_intake(&store, &admin, intake_input()).await.expect("intake");
    let assigned = WriteBatch::new().update(
        collections::SERVICE_REQUESTS,
        &request.id.0,
        json!({"status": "assigned"}),
    );
    store.commit(assigned).await.expect("force assigned");

    let err = service::delete(&store, &request.id).await.expect_err("status");
    assert!(matches!(
        err,
        WorkflowError::Precondition(PreconditionError::DeletionNotAllowed { .. })
    ));

    // Cancelled but with a recorded payment: still refused.
    let with_payment = WriteBatch::new().update(
        collections::SERVICE_REQUESTS,
        &request.id.0,
        json!({
            "status": "cancelled",
            "payments": [{
                "amount": "50",
                "method": "cash",
                "paidAt": Utc::now(),
                "registeredBy": "disp-1",
            }],
        }),
    );
    store.commit(with_payment).await.expect("force payment");

    let err = service::delete(&store, &request.id).await.expect_err("payments");
    assert!(matches!(
        err,
        WorkflowError::Precondition(PreconditionError::DeletionHasPayments { count: 1 })
    ));
}

#[tokio::test]
async fn quote_deletion_follows_status_rules() {
    let store = MemoryStore::new();
    let policy = WorkflowPolicy::default();
    let admin = dispatcher();
    let tech = technician();

    let request = service::create_intake(&store, &admin, intake_input()).await.expect("intake");
    let approved = quote::create_draft(&store, &tech, &policy, &request.id, draft_input())
        .await
        .expect("draft");
    quote::approve(&store, &admin, &approved.id).await.expect("approve");

    let err = quote::delete(&store, &approved.id).await.expect_err("approved is kept");
    assert!(matches!(
        err,
        WorkflowError::Precondition(PreconditionError::DeletionNotAllowed { .. })
    ));

    let rejected = quote::create_draft(&store, &tech, &policy, &request.id, draft_input())
        .await
        .expect("second draft");
    quote::reject(&store, &admin, &rejected.id).await.expect("reject");
    quote::delete(&store, &rejected.id).await.expect("rejected is deletable");
    assert!(store.get(collections::QUOTES, &rejected.id.0).await.expect("get").is_none());
}

#[tokio::test]
async fn draft_defaults_come_from_policy() {
    let store = MemoryStore::new();
    let policy = WorkflowPolicy::default();
    let admin = dispatcher();
    let tech = technician();

    let request = service::create_intake(&store, &admin, intake_input()).await.expect("intake");
    let mut input = draft_input();
    input.vat_percentage = None;
    input.valid_until = None;
    let before = Utc::now();
    let draft = quote::create_draft(&store, &tech, &policy, &request.id, input)
        .await
        .expect("draft");

    assert_eq!(draft.vat_percentage, Decimal::from(15));
    assert_eq!(draft.subtotal, Decimal::from(200));
    assert_eq!(draft.vat_amount, Decimal::from(30));
    assert_eq!(draft.total_amount, Decimal::from(230));
    let validity = draft.valid_until - before;
    assert!(validity >= chrono::Duration::days(14) && validity <= chrono::Duration::days(16));
    assert_eq!(draft.technician_id, "tech-1");
    assert_eq!(draft.customer_name.as_deref(), Some("Ana Pérez"));
    assert_eq!(draft.history.len(), 1);
    assert_eq!(draft.history[0].notes.as_deref(), Some("Cotización creada."));
}

#[tokio::test]
async fn oversized_discount_is_stored_unclamped() {
    let store = MemoryStore::new();
    let policy = WorkflowPolicy::default();
    let admin = dispatcher();
    let tech = technician();

    let request = service::create_intake(&store, &admin, intake_input()).await.expect("intake");
    let mut input = draft_input();
    input.discount_amount = Decimal::from(500);
    let draft = quote::create_draft(&store, &tech, &policy, &request.id, input)
        .await
        .expect("draft");

    assert_eq!(draft.total_amount, Decimal::from(-300));
    let stored = reload_quote(&store, &draft.id.0).await;
    assert_eq!(stored.total_amount, Decimal::from(-300));
}

#[tokio::test]
async fn expiry_is_manual_and_only_from_open_states() {
    let store = MemoryStore::new();
    let policy = WorkflowPolicy::default();
    let admin = dispatcher();
    let tech = technician();

    let request = service::create_intake(&store, &admin, intake_input()).await.expect("intake");
    let draft = quote::create_draft(&store, &tech, &policy, &request.id, draft_input())
        .await
        .expect("draft");
    quote::mark_sent(&store, &tech, &draft.id).await.expect("sent");
    let expired = quote::mark_expired(&store, &admin, &draft.id).await.expect("expire");
    assert_eq!(expired.status, maestro_core::QuoteStatus::Expired);

    let err = quote::mark_expired(&store, &admin, &draft.id).await.expect_err("terminal");
    assert!(matches!(
        err,
        WorkflowError::Precondition(PreconditionError::InvalidQuoteTransition { .. })
    ));
}

#[tokio::test]
async fn generated_message_is_cached_on_the_quote() {
    let store = MemoryStore::new();
    let policy = WorkflowPolicy::default();
    let admin = dispatcher();
    let tech = technician();
    let generator = TemplateMessageGenerator::new().expect("templates");

    let request = service::create_intake(&store, &admin, intake_input()).await.expect("intake");
    let draft = quote::create_draft(&store, &tech, &policy, &request.id, draft_input())
        .await
        .expect("draft");

    let message = quote::generate_message(&store, &tech, &generator, &draft.id)
        .await
        .expect("generate");
    assert!(message.contains("COTIZACIÓN DE SERVICIO"));

    let stored = reload_quote(&store, &draft.id.0).await;
    assert_eq!(stored.generated_message.as_deref(), Some(message.as_str()));
}

#[tokio::test]
async fn role_change_writes_user_audit_and_mail_together() {
    let store = MemoryStore::new();
    let generator = TemplateMessageGenerator::new().expect("templates");
    let admin = dispatcher();

    store
        .commit(WriteBatch::new().set(
            collections::USERS,
            "user-2",
            json!({
                "uid": "user-2",
                "email": "ana@example.com",
                "displayName": "Ana",
                "roles": ["Cliente"],
            }),
        ))
        .await
        .expect("seed user");

    let change = roles::change_user_role(
        &store,
        &admin,
        &generator,
        &UserId("user-2".to_owned()),
        "Dispatcher",
    )
    .await
    .expect("role change");

    assert_eq!(change.user.roles, vec!["Dispatcher".to_owned()]);
    assert_eq!(change.audit.details.previous_roles, vec!["Cliente".to_owned()]);
    assert_eq!(change.audit.details.new_roles, vec!["Dispatcher".to_owned()]);

    let audits = store
        .query_eq(collections::AUDIT_LOGS, "targetUserId", &json!("user-2"))
        .await
        .expect("audit query");
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].data["action"], "user.role.update");

    let mails = store
        .query_eq(collections::MAIL, "to", &json!(["ana@example.com"]))
        .await
        .expect("mail query");
    assert_eq!(mails.len(), 1);
    assert_eq!(mails[0].data["message"]["subject"], "Actualización de Rol en MaestroYa CRM");
    let html = mails[0].data["message"]["html"].as_str().expect("html");
    assert!(html.contains("Dispatcher"));

    let stored_user = store
        .get(collections::USERS, "user-2")
        .await
        .expect("get user")
        .expect("user present");
    assert_eq!(stored_user.data["roles"], json!(["Dispatcher"]));
}

#[tokio::test]
async fn role_change_without_email_skips_the_mail() {
    let store = MemoryStore::new();
    let generator = TemplateMessageGenerator::new().expect("templates");
    let admin = dispatcher();

    store
        .commit(WriteBatch::new().set(
            collections::USERS,
            "user-3",
            json!({"uid": "user-3", "roles": ["Cliente"]}),
        ))
        .await
        .expect("seed user");

    let change = roles::change_user_role(
        &store,
        &admin,
        &generator,
        &UserId("user-3".to_owned()),
        "Técnico",
    )
    .await
    .expect("role change");

    assert!(change.mail.is_none());
    let audits = store
        .query_eq(collections::AUDIT_LOGS, "targetUserId", &json!("user-3"))
        .await
        .expect("audit query");
    assert_eq!(audits.len(), 1);
}

#[tokio::test]
async fn admins_cannot_change_their_own_role() {
    let store = MemoryStore::new();
    let generator = TemplateMessageGenerator::new().expect("templates");
    let admin = dispatcher();

    store
        .commit(WriteBatch::new().set(
            collections::USERS,
            "disp-1",
            json!({"uid": "disp-1", "roles": ["SuperAdmin"]}),
        ))
        .await
        .expect("seed user");

    let err = roles::change_user_role(
        &store,
        &admin,
        &generator,
        &UserId("disp-1".to_owned()),
        "Cliente",
    )
    .await
    .expect_err("self change");
    assert!(matches!(
        err,
        WorkflowError::Precondition(PreconditionError::SelfRoleChange)
    ));

    let audits = store
        .query_eq(collections::AUDIT_LOGS, "targetUserId", &json!("disp-1"))
        .await
        .expect("audit query");
    assert!(audits.is_empty());
}

#[tokio::test]
async fn unknown_roles_are_rejected() {
    let store = MemoryStore::new();
    let generator = TemplateMessageGenerator::new().expect("templates");
    let admin = dispatcher();

    let err = roles::change_user_role(
        &store,
        &admin,
        &generator,
        &UserId("user-2".to_owned()),
        "Root",
    )
    .await
    .expect_err("unknown role");
    assert!(matches!(
        err,
        WorkflowError::Validation(ValidationError::UnknownRole { .. })
    ));
}

#[tokio::test]
async fn change_feed_reports_workflow_commits() {
    let store = MemoryStore::new();
    let admin = dispatcher();
    let mut feed = store.subscribe();

    let request = service::create_intake(&store, &admin, intake_input()).await.expect("intake");

    let event = feed.recv().await.expect("event");
    assert_eq!(event.collection, collections::SERVICE_REQUESTS);
    assert_eq!(event.id, request.id.0);
    assert_eq!(event.kind, ChangeKind::Set);
}
