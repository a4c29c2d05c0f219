use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use uuid::Uuid;

use crate::domain::quote::{Quote, QuoteId, QuoteItem, QuoteStatus};
use crate::domain::service_request::{ServiceRequest, ServiceRequestId, ServiceStatus};
use crate::domain::user::UserProfile;
use crate::errors::{PreconditionError, ValidationError, WorkflowError};
use crate::messages::MessageGenerator;
use crate::session::Session;
use crate::store::{collections, encode, DocumentStore, WriteBatch};
use crate::workflow::{load, WorkflowPolicy};

const MIN_DESCRIPTION: usize = 10;

#[derive(Clone, Debug)]
pub struct QuoteItemInput {
    pub description: String,
    pub quantity: Decimal,
    pub price: Decimal,
}

#[derive(Clone, Debug)]
pub struct QuoteDraftInput {
    pub description: String,
    pub items: Vec<QuoteItemInput>,
    pub notes: Option<String>,
    pub vat_percentage: Option<Decimal>,
    pub discount_amount: Decimal,
    pub valid_until: Option<DateTime<Utc>>,
}

/// Builds a draft quote from a service request, snapshotting the customer
/// and service data onto the quote.
pub async fn create_draft<S: DocumentStore + ?Sized>(
    store: &S,
    session: &Session,
    policy: &WorkflowPolicy,
    service_id: &ServiceRequestId,
    input: QuoteDraftInput,
) -> Result<Quote, WorkflowError> {
    if input.description.chars().count() < MIN_DESCRIPTION {
        return Err(ValidationError::DescriptionTooShort { min: MIN_DESCRIPTION }.into());
    }
    if input.items.is_empty() {
        return Err(ValidationError::EmptyQuoteItems.into());
    }
    for item in &input.items {
        if item.description.is_empty() {
            return Err(ValidationError::DescriptionTooShort { min: 1 }.into());
        }
        if item.quantity <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveQuantity.into());
        }
        if item.price < Decimal::ZERO {
            return Err(ValidationError::NegativePrice.into());
        }
    }
    let vat_percentage = input.vat_percentage.unwrap_or_else(|| policy.default_vat());
    if vat_percentage < Decimal::ZERO || vat_percentage > Decimal::from(100) {
        return Err(ValidationError::InvalidVatPercentage.into());
    }

    let (service, _): (ServiceRequest, u64) =
        load(store, collections::SERVICE_REQUESTS, &service_id.0).await?;

    let now = Utc::now();
    let mut quote = Quote {
        id: QuoteId(Uuid::new_v4().to_string()),
        service_request_id: service.id.clone(),
        customer_id: service.customer_id.clone(),
        customer_name: Some(service.customer_name.clone()),
        customer_phone: service.customer_phone.clone(),
        customer_email: service.customer_email.clone(),
        service_address: Some(service.location.clone()),
        service_type: Some(service.service_type.clone()),
        urgency: Some(service.urgency),
        problem_description: Some(service.problem_description.clone()),
        technician_id: session.uid.0.clone(),
        description: input.description,
        notes: input.notes,
        items: input
            .items
            .into_iter()
            .map(|item| QuoteItem {
                description: item.description,
                quantity: item.quantity,
                price: item.price,
            })
            .collect(),
        subtotal: Decimal::ZERO,
        vat_percentage,
        vat_amount: Decimal::ZERO,
        discount_amount: input.discount_amount,
        total_amount: Decimal::ZERO,
        valid_until: input
            .valid_until
            .unwrap_or_else(|| now + Duration::days(i64::from(policy.quote_validity_days))),
        status: QuoteStatus::Draft,
        created_at: now,
        updated_at: None,
        history: Vec::new(),
        generated_message: None,
    };
    quote.recompute_totals();
    quote.push_history(QuoteStatus::Draft, now, &session.uid.0, Some("Cotización creada.".to_owned()));

    let batch = WriteBatch::new().set(collections::QUOTES, &quote.id.0, encode(&quote)?);
    store.commit(batch).await?;
    Ok(quote)
}

/// Records the first dispatch to the customer.
pub async fn mark_sent<S: DocumentStore + ?Sized>(
    store: &S,
    session: &Session,
    quote_id: &QuoteId,
) -> Result<Quote, WorkflowError> {
    resolve_status(store, session, quote_id, QuoteStatus::Sent).await
}

/// Customer declined.
pub async fn reject<S: DocumentStore + ?Sized>(
    store: &S,
    session: &Session,
    quote_id: &QuoteId,
) -> Result<Quote, WorkflowError> {
    resolve_status(store, session, quote_id, QuoteStatus::Rejected).await
}

/// Validity window lapsed. Applied manually; there is no background sweep.
pub async fn mark_expired<S: DocumentStore + ?Sized>(
    store: &S,
    session: &Session,
    quote_id: &QuoteId,
) -> Result<Quote, WorkflowError> {
    resolve_status(store, session, quote_id, QuoteStatus::Expired).await
}

async fn resolve_status<S: DocumentStore + ?Sized>(
    store: &S,
    session: &Session,
    quote_id: &QuoteId,
    next: QuoteStatus,
) -> Result<Quote, WorkflowError> {
    let (mut quote, revision): (Quote, u64) = load(store, collections::QUOTES, &quote_id.0).await?;
    quote.transition_to(next)?;
    let now = Utc::now();
    quote.updated_at = Some(now);
    quote.push_history(next, now, &session.uid.0, None);

    let batch = WriteBatch::new().update_checked(
        collections::QUOTES,
        &quote_id.0,
        json!({
            "status": quote.status,
            "updatedAt": now,
            "history": quote.history,
        }),
        revision,
    );
    store.commit(batch).await?;
    Ok(quote)
}

/// Approves the quote and assigns its service request in one atomic batch.
/// A missing parent aborts the whole operation with nothing written.
pub async fn approve<S: DocumentStore + ?Sized>(
    store: &S,
    session: &Session,
    quote_id: &QuoteId,
) -> Result<(Quote, ServiceRequest), WorkflowError> {
    let (mut quote, quote_revision): (Quote, u64) =
        load(store, collections::QUOTES, &quote_id.0).await?;
    quote.transition_to(QuoteStatus::Approved)?;

    let service_doc = store
        .get(collections::SERVICE_REQUESTS, &quote.service_request_id.0)
        .await?
        .ok_or_else(|| PreconditionError::OrphanQuote {
            quote_id: quote_id.0.clone(),
            service_request_id: quote.service_request_id.0.clone(),
        })?;
    let mut service: ServiceRequest = service_doc.decode()?;
    service.transition_to(ServiceStatus::Assigned)?;

    let now = Utc::now();
    quote.updated_at = Some(now);
    quote.push_history(QuoteStatus::Approved, now, &session.uid.0, None);
    service.updated_at = Some(now);
    service.quote_id = Some(quote.id.clone());
    service.push_history(
        ServiceStatus::Assigned,
        now,
        &session.uid.0,
        Some("Cotización aprobada.".to_owned()),
    );

    let batch = WriteBatch::new()
        .update_checked(
            collections::QUOTES,
            &quote_id.0,
            json!({
                "status": quote.status,
                "updatedAt": now,
                "history": quote.history,
            }),
            quote_revision,
        )
        .update_checked(
            collections::SERVICE_REQUESTS,
            &service.id.0,
            json!({
                "status": service.status,
                "quoteId": service.quote_id,
                "updatedAt": now,
                "history": service.history,
            }),
            service_doc.revision,
        );
    store.commit(batch).await?;
    Ok((quote, service))
}

/// Deletes a quote that was never accepted.
pub async fn delete<S: DocumentStore + ?Sized>(
    store: &S,
    quote_id: &QuoteId,
) -> Result<(), WorkflowError> {
    let (quote, revision): (Quote, u64) = load(store, collections::QUOTES, &quote_id.0).await?;
    quote.check_deletable()?;

    let batch = WriteBatch::new().delete_checked(collections::QUOTES, &quote_id.0, revision);
    store.commit(batch).await?;
    Ok(())
}

/// Renders the customer message and caches it on the quote. The technician
/// name falls back to the acting session, then a team label inside the
/// generator.
pub async fn generate_message<S, G>(
    store: &S,
    session: &Session,
    generator: &G,
    quote_id: &QuoteId,
) -> Result<String, WorkflowError>
where
    S: DocumentStore + ?Sized,
    G: MessageGenerator + ?Sized,
{
    let (quote, revision): (Quote, u64) = load(store, collections::QUOTES, &quote_id.0).await?;

    let technician_name = match store.get(collections::USERS, &quote.technician_id).await? {
        Some(doc) => {
            let profile: UserProfile = doc.decode()?;
            profile.label().to_owned()
        }
        None => session.display_name.clone().unwrap_or_default(),
    };

    let message = generator.quote_message(&quote, &technician_name)?;
    let batch = WriteBatch::new().update_checked(
        collections::QUOTES,
        &quote_id.0,
        json!({ "generatedMessage": message }),
        revision,
    );
    store.commit(batch).await?;
    Ok(message)
}
