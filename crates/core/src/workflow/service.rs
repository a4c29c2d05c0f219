use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use uuid::Uuid;

use crate::domain::quote::Quote;
use crate::domain::service_request::{
    CustomerOrigin, Payment, PaymentMethod, PaymentStatus, ServiceRequest, ServiceRequestId,
    ServiceStatus, Urgency,
};
use crate::errors::{PreconditionError, ValidationError, WorkflowError};
use crate::session::Session;
use crate::store::{collections, encode, DocumentStore, WriteBatch};
use crate::workflow::{load, WorkflowPolicy};

const MIN_COMPLETION_NOTES: usize = 10;
const MIN_DESCRIPTION: usize = 10;
const MAX_EVIDENCE_PHOTOS: usize = 5;

#[derive(Clone, Debug)]
pub struct IntakeInput {
    pub customer_id: String,
    pub customer_name: String,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub customer_origin: Option<CustomerOrigin>,
    pub service_type: String,
    pub location: String,
    pub problem_description: String,
    pub urgency: Urgency,
}

/// Registers a new service request in `pending` with its first history entry.
pub async fn create_intake<S: DocumentStore + ?Sized>(
    store: &S,
    session: &Session,
    input: IntakeInput,
) -> Result<ServiceRequest, WorkflowError> {
    if input.problem_description.chars().count() < MIN_DESCRIPTION {
        return Err(ValidationError::DescriptionTooShort { min: MIN_DESCRIPTION }.into());
    }

    let now = Utc::now();
    let mut request = ServiceRequest {
        id: ServiceRequestId(Uuid::new_v4().to_string()),
        customer_id: input.customer_id,
        customer_name: input.customer_name,
        customer_email: input.customer_email,
        customer_phone: input.customer_phone,
        customer_origin: input.customer_origin,
        service_type: input.service_type,
        location: input.location,
        problem_description: input.problem_description,
        urgency: input.urgency,
        status: ServiceStatus::Pending,
        created_at: now,
        updated_at: None,
        scheduled_at: None,
        started_at: None,
        completed_at: None,
        completion_notes: None,
        hours_worked: None,
        evidence_photos: Vec::new(),
        technician_id: None,
        quote_id: None,
        history: Vec::new(),
        total_amount: None,
        advance_payment: None,
        remaining_balance: None,
        payment_status: None,
        warranty_days: None,
        warranty_expires_at: None,
        payments: Vec::new(),
    };
    request.push_history(
        ServiceStatus::Pending,
        now,
        &session.uid.0,
        Some("Solicitud de servicio registrada.".to_owned()),
    );

    let batch = WriteBatch::new().set(collections::SERVICE_REQUESTS, &request.id.0, encode(&request)?);
    store.commit(batch).await?;
    Ok(request)
}

#[derive(Clone, Debug)]
pub struct ScheduleInput {
    pub date: NaiveDate,
    /// 24-hour wall-clock time, `HH:MM`.
    pub time: String,
    pub notes: Option<String>,
}

/// Books the visit. Legal only from `assigned`.
pub async fn schedule<S: DocumentStore + ?Sized>(
    store: &S,
    session: &Session,
    service_id: &ServiceRequestId,
    input: ScheduleInput,
) -> Result<ServiceRequest, WorkflowError> {
    let time = parse_schedule_time(&input.time)?;
    let (mut request, revision): (ServiceRequest, u64) =
        load(store, collections::SERVICE_REQUESTS, &service_id.0).await?;

    request.transition_to(ServiceStatus::Scheduled)?;
    let now = Utc::now();
    let scheduled_at = input.date.and_time(time).and_utc();
    request.scheduled_at = Some(scheduled_at);
    request.updated_at = Some(now);
    request.push_history(
        ServiceStatus::Scheduled,
        now,
        &session.uid.0,
        Some(input.notes.unwrap_or_else(|| "Servicio programado.".to_owned())),
    );

    let batch = WriteBatch::new().update_checked(
        collections::SERVICE_REQUESTS,
        &service_id.0,
        json!({
            "status": request.status,
            "scheduledAt": scheduled_at,
            "updatedAt": now,
            "history": request.history,
        }),
        revision,
    );
    store.commit(batch).await?;
    Ok(request)
}

/// Marks the technician on the way. Legal only from `scheduled`.
pub async fn start_work<S: DocumentStore + ?Sized>(
    store: &S,
    session: &Session,
    service_id: &ServiceRequestId,
) -> Result<ServiceRequest, WorkflowError> {
    let (mut request, revision): (ServiceRequest, u64) =
        load(store, collections::SERVICE_REQUESTS, &service_id.0).await?;

    request.transition_to(ServiceStatus::EnRuta)?;
    let now = Utc::now();
    request.started_at = Some(now);
    request.updated_at = Some(now);
    request.push_history(
        ServiceStatus::EnRuta,
        now,
        &session.uid.0,
        Some("El técnico ha iniciado el trabajo y está en ruta.".to_owned()),
    );

    let batch = WriteBatch::new().update_checked(
        collections::SERVICE_REQUESTS,
        &service_id.0,
        json!({
            "status": request.status,
            "startedAt": now,
            "updatedAt": now,
            "history": request.history,
        }),
        revision,
    );
    store.commit(batch).await?;
    Ok(request)
}

#[derive(Clone, Debug)]
pub struct CompletionReport {
    pub notes: String,
    pub hours_worked: Option<Decimal>,
    pub evidence_photos: Vec<String>,
}

/// Completes the work and derives the commercial fields from the approved
/// quote in the same write. Refuses when the quote reference is absent or
/// unresolvable, leaving the request untouched.
pub async fn complete<S: DocumentStore + ?Sized>(
    store: &S,
    session: &Session,
    policy: &WorkflowPolicy,
    service_id: &ServiceRequestId,
    report: CompletionReport,
) -> Result<ServiceRequest, WorkflowError> {
    if report.notes.chars().count() < MIN_COMPLETION_NOTES {
        return Err(ValidationError::NotesTooShort { min: MIN_COMPLETION_NOTES }.into());
    }
    if let Some(hours) = report.hours_worked {
        if hours <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveHours.into());
        }
    }
    if report.evidence_photos.len() > MAX_EVIDENCE_PHOTOS {
        return Err(ValidationError::TooManyPhotos { max: MAX_EVIDENCE_PHOTOS }.into());
    }

    let (mut request, revision): (ServiceRequest, u64) =
        load(store, collections::SERVICE_REQUESTS, &service_id.0).await?;

    let quote_id = request.quote_id.clone().ok_or_else(|| PreconditionError::MissingQuote {
        service_request_id: service_id.0.clone(),
    })?;
    let quote_doc = store
        .get(collections::QUOTES, &quote_id.0)
        .await?
        .ok_or_else(|| PreconditionError::MissingQuote {
            service_request_id: service_id.0.clone(),
        })?;
    let quote: Quote = quote_doc.decode()?;

    request.transition_to(ServiceStatus::Completed)?;
    let now = Utc::now();
    let total = quote.total_amount;
    request.completed_at = Some(now);
    request.updated_at = Some(now);
    request.completion_notes = Some(report.notes.clone());
    request.hours_worked = report.hours_worked;
    request.evidence_photos = report.evidence_photos;
    request.total_amount = Some(total);
    request.advance_payment = Some(Decimal::ZERO);
    request.remaining_balance = Some(total);
    request.payment_status = Some(PaymentStatus::Pending);
    request.warranty_days = Some(policy.warranty_days);
    request.warranty_expires_at = Some(now + Duration::days(i64::from(policy.warranty_days)));
    request.payments = Vec::new();
    request.push_history(
        ServiceStatus::Completed,
        now,
        &session.uid.0,
        Some(format!("Trabajo completado. {}", report.notes)),
    );

    let batch = WriteBatch::new().update_checked(
        collections::SERVICE_REQUESTS,
        &service_id.0,
        json!({
            "status": request.status,
            "completedAt": now,
            "updatedAt": now,
            "completionNotes": request.completion_notes,
            "hoursWorked": request.hours_worked,
            "evidencePhotos": request.evidence_photos,
            "history": request.history,
            "totalAmount": request.total_amount,
            "advancePayment": request.advance_payment,
            "remainingBalance": request.remaining_balance,
            "paymentStatus": request.payment_status,
            "warrantyDays": request.warranty_days,
            "warrantyExpiresAt": request.warranty_expires_at,
            "payments": request.payments,
        }),
        revision,
    );
    store.commit(batch).await?;
    Ok(request)
}

#[derive(Clone, Debug)]
pub struct PaymentInput {
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub paid_at: DateTime<Utc>,
    pub notes: Option<String>,
}

/// Records a payment against a completed service. No state transition; the
/// balance and payment status are recomputed from the full payment list.
pub async fn register_payment<S: DocumentStore + ?Sized>(
    store: &S,
    session: &Session,
    service_id: &ServiceRequestId,
    input: PaymentInput,
) -> Result<ServiceRequest, WorkflowError> {
    if input.amount <= Decimal::ZERO {
        return Err(ValidationError::NonPositiveAmount.into());
    }

    let (mut request, revision): (ServiceRequest, u64) =
        load(store, collections::SERVICE_REQUESTS, &service_id.0).await?;
    if request.status != ServiceStatus::Completed {
        return Err(PreconditionError::PaymentBeforeCompletion {
            status: request.status.as_str().to_owned(),
        }
        .into());
    }

    request.apply_payment(Payment {
        amount: input.amount,
        method: input.method,
        paid_at: input.paid_at,
        registered_by: session.uid.0.clone(),
        notes: input.notes,
    });
    let now = Utc::now();
    request.updated_at = Some(now);

    let batch = WriteBatch::new().update_checked(
        collections::SERVICE_REQUESTS,
        &service_id.0,
        json!({
            "payments": request.payments,
            "remainingBalance": request.remaining_balance,
            "paymentStatus": request.payment_status,
            "updatedAt": now,
        }),
        revision,
    );
    store.commit(batch).await?;
    Ok(request)
}

/// Cancels an open request, appending the reason to the history.
pub async fn cancel<S: DocumentStore + ?Sized>(
    store: &S,
    session: &Session,
    service_id: &ServiceRequestId,
    notes: Option<String>,
) -> Result<ServiceRequest, WorkflowError> {
    let (mut request, revision): (ServiceRequest, u64) =
        load(store, collections::SERVICE_REQUESTS, &service_id.0).await?;

    request.transition_to(ServiceStatus::Cancelled)?;
    let now = Utc::now();
    request.updated_at = Some(now);
    request.push_history(
        ServiceStatus::Cancelled,
        now,
        &session.uid.0,
        Some(notes.unwrap_or_else(|| "Servicio cancelado.".to_owned())),
    );

    let batch = WriteBatch::new().update_checked(
        collections::SERVICE_REQUESTS,
        &service_id.0,
        json!({
            "status": request.status,
            "updatedAt": now,
            "history": request.history,
        }),
        revision,
    );
    store.commit(batch).await?;
    Ok(request)
}

/// Deletes a request that never advanced commercially, cascading the removal
/// of every quote that references it in the same batch.
pub async fn delete<S: DocumentStore + ?Sized>(
    store: &S,
    service_id: &ServiceRequestId,
) -> Result<(), WorkflowError> {
    let (request, revision): (ServiceRequest, u64) =
        load(store, collections::SERVICE_REQUESTS, &service_id.0).await?;
    request.check_deletable()?;

    let quotes = store
        .query_eq(
            collections::QUOTES,
            "serviceRequestId",
            &serde_json::Value::String(service_id.0.clone()),
        )
        .await?;

    let mut batch = WriteBatch::new();
    for quote in &quotes {
        batch = batch.delete(collections::QUOTES, &quote.id);
    }
    batch = batch.delete_checked(collections::SERVICE_REQUESTS, &service_id.0, revision);
    store.commit(batch).await?;
    Ok(())
}

/// Accepts `H:MM` and `HH:MM`, 24-hour clock.
fn parse_schedule_time(value: &str) -> Result<NaiveTime, ValidationError> {
    let invalid = || ValidationError::InvalidTimeFormat { value: value.to_owned() };
    let (hour_part, minute_part) = value.split_once(':').ok_or_else(invalid)?;
    if hour_part.is_empty() || hour_part.len() > 2 || minute_part.len() != 2 {
        return Err(invalid());
    }
    let hour: u32 = hour_part.parse().map_err(|_| invalid())?;
    let minute: u32 = minute_part.parse().map_err(|_| invalid())?;
    NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_clock_times() {
        assert!(parse_schedule_time("09:00").is_ok());
        assert!(parse_schedule_time("9:30").is_ok());
        assert!(parse_schedule_time("23:59").is_ok());
        assert!(parse_schedule_time("00:00").is_ok());
    }

    #[test]
    fn rejects_out_of_range_and_malformed_times() {
        for bad in ["24:00", "12:60", "noon", "12", "12:5", "1200", ":30", "12:345", "-1:00"] {
            assert!(parse_schedule_time(bad).is_err(), "{bad}");
        }
    }
}
