use chrono::Utc;
use maestro_core::config::AppConfig;
use maestro_core::domain::{
    PaymentMethod, PaymentStatus, QuoteId, ServiceRequestId, Urgency,
};
use maestro_core::messages::TemplateMessageGenerator;
use maestro_core::session::Session;
use maestro_core::workflow::{quote, service};
use maestro_store::MemoryStore;
use rust_decimal::Decimal;

use crate::commands::{self, CommandResult};

/// Walks the full lifecycle against the in-memory store: intake, quote,
/// approval, scheduling, completion and payment. Nothing touches the
/// configured database.
pub fn run() -> CommandResult {
    let config = match commands::load_config("demo") {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match commands::blocking_runtime("demo") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    match runtime.block_on(walk_lifecycle(&config)) {
        Ok(summary) => CommandResult::success("demo", summary),
        Err(error) => CommandResult::failure("demo", "workflow", error, 5),
    }
}

async fn walk_lifecycle(config: &AppConfig) -> Result<String, String> {
    let store = MemoryStore::new();
    let policy = config.workflow.policy();
    let generator = TemplateMessageGenerator::new().map_err(|error| error.to_string())?;

    let dispatcher = Session::new("demo-dispatcher")
        .with_email("dispatcher@example.com")
        .with_display_name("Demo Dispatcher");
    let technician = Session::new("demo-technician")
        .with_email("tecnico@example.com")
        .with_display_name("Demo Técnico");

    let request = service::create_intake(
        &store,
        &dispatcher,
        service::IntakeInput {
            customer_id: "demo-customer".to_string(),
            customer_name: "Cliente Demo".to_string(),
            customer_email: Some("cliente@example.com".to_string()),
            customer_phone: Some("+593990000000".to_string()),
            customer_origin: None,
            service_type: "Plomería".to_string(),
            location: "Av. Principal 123, Quito".to_string(),
            problem_description: "Fuga de agua bajo el fregadero de la cocina".to_string(),
            urgency: Urgency::High,
        },
    )
    .await
    .map_err(|error| error.to_string())?;
    let service_id: ServiceRequestId = request.id.clone();
    tracing::info!(service = %service_id, "demo: service request registered");

    let draft = quote::create_draft(
        &store,
        &technician,
        &policy,
        &service_id,
        quote::QuoteDraftInput {
            description: "Reparación de fuga y cambio de sifón".to_string(),
            items: vec![
                quote::QuoteItemInput {
                    description: "Mano de obra".to_string(),
                    quantity: Decimal::from(2),
                    price: Decimal::from(25),
                },
                quote::QuoteItemInput {
                    description: "Sifón PVC".to_string(),
                    quantity: Decimal::from(1),
                    price: Decimal::from(12),
                },
            ],
            notes: Some("Incluye revisión de tuberías adyacentes".to_string()),
            vat_percentage: None,
            discount_amount: Decimal::ZERO,
            valid_until: None,
        },
    )
    .await
    .map_err(|error| error.to_string())?;
    let quote_id: QuoteId = draft.id.clone();
    tracing::info!(quote = %quote_id, total = %draft.total_amount, "demo: quote drafted");

    let message = quote::generate_message(&store, &technician, &generator, &quote_id)
        .await
        .map_err(|error| error.to_string())?;
    tracing::info!(chars = message.chars().count(), "demo: customer message rendered");

    quote::mark_sent(&store, &technician, &quote_id).await.map_err(|error| error.to_string())?;
    let (_, assigned) =
        quote::approve(&store, &dispatcher, &quote_id).await.map_err(|error| error.to_string())?;
    tracing::info!(status = assigned.status.as_str(), "demo: quote approved");

    service::schedule(
        &store,
        &dispatcher,
        &service_id,
        service::ScheduleInput {
            date: Utc::now().date_naive(),
            time: "09:00".to_string(),
            notes: Some("Llamar al llegar".to_string()),
        },
    )
    .await
    .map_err(|error| error.to_string())?;

    service::start_work(&store, &technician, &service_id)
        .await
        .map_err(|error| error.to_string())?;

    let completed = service::complete(
        &store,
        &technician,
        &policy,
        &service_id,
        service::CompletionReport {
            notes: "Fuga reparada y sifón reemplazado".to_string(),
            hours_worked: Some(Decimal::from(2)),
            evidence_photos: Vec::new(),
        },
    )
    .await
    .map_err(|error| error.to_string())?;
    let total = completed.total_amount.unwrap_or(Decimal::ZERO);
    tracing::info!(total = %total, "demo: work completed");

    let paid = service::register_payment(
        &store,
        &dispatcher,
        &service_id,
        service::PaymentInput {
            amount: total,
            method: PaymentMethod::Transfer,
            paid_at: Utc::now(),
            notes: None,
        },
    )
    .await
    .map_err(|error| error.to_string())?;

    if paid.payment_status != Some(PaymentStatus::Paid) {
        return Err(format!(
            "lifecycle ended with payment status {:?} instead of paid",
            paid.payment_status
        ));
    }

    Ok(format!(
        "demo lifecycle complete: service {service_id} reached paid with total {total}"
    ))
}
