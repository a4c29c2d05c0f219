use thiserror::Error;

use crate::domain::quote::QuoteStatus;
use crate::domain::service_request::ServiceStatus;
use crate::messages::MessageError;
use crate::store::StoreError;

/// Input rejected before any write is attempted.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid time `{value}` (expected 24-hour HH:MM)")]
    InvalidTimeFormat { value: String },
    #[error("notes must be at least {min} characters")]
    NotesTooShort { min: usize },
    #[error("description must be at least {min} characters")]
    DescriptionTooShort { min: usize },
    #[error("amount must be greater than zero")]
    NonPositiveAmount,
    #[error("hours worked must be a positive number")]
    NonPositiveHours,
    #[error("at most {max} evidence photos are allowed")]
    TooManyPhotos { max: usize },
    #[error("a quote needs at least one line item")]
    EmptyQuoteItems,
    #[error("line item quantity must be greater than zero")]
    NonPositiveQuantity,
    #[error("line item price cannot be negative")]
    NegativePrice,
    #[error("vat percentage must be between 0 and 100")]
    InvalidVatPercentage,
    #[error("unknown role `{role}`")]
    UnknownRole { role: String },
}

/// State-based refusal: the entity exists but the operation is not legal
/// in its current state.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PreconditionError {
    #[error("invalid service transition from {from:?} to {to:?}")]
    InvalidServiceTransition { from: ServiceStatus, to: ServiceStatus },
    #[error("invalid quote transition from {from:?} to {to:?}")]
    InvalidQuoteTransition { from: QuoteStatus, to: QuoteStatus },
    #[error("service request {service_request_id} has no resolvable approved quote")]
    MissingQuote { service_request_id: String },
    #[error("quote {quote_id} references missing service request {service_request_id}")]
    OrphanQuote { quote_id: String, service_request_id: String },
    #[error("deletion not allowed while status is `{status}`")]
    DeletionNotAllowed { status: String },
    #[error("deletion not allowed: {count} payment(s) are registered")]
    DeletionHasPayments { count: usize },
    #[error("payments can only be registered on completed services (status is `{status}`)")]
    PaymentBeforeCompletion { status: String },
    #[error("administrators cannot change their own role")]
    SelfRoleChange,
}

/// Umbrella error for workflow operations. `Store` covers transaction
/// failures: the batch either committed fully or not at all, but in-memory
/// state held by the caller may be stale until the next read.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Precondition(#[from] PreconditionError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Message(#[from] MessageError),
}

impl WorkflowError {
    /// Single user-facing message surfaced at the operation boundary.
    /// None of these are retried automatically.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Validation(_) => "The input could not be accepted. Check the form and try again.",
            Self::Precondition(_) => "The action is not allowed in the current state.",
            Self::Store(_) => "The change could not be saved. Reload and try again.",
            Self::Message(_) => "The message could not be generated.",
        }
    }
}
