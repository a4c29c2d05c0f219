use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::service_request::{HistoryEntry, ServiceRequestId, Urgency};
use crate::errors::PreconditionError;
use crate::pricing;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuoteId(pub String);

impl std::fmt::Display for QuoteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteStatus {
    Draft,
    Sent,
    Approved,
    Rejected,
    Expired,
}

impl QuoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Sent => "sent",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(Self::Draft),
            "sent" => Some(Self::Sent),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    /// Approval, rejection and expiry are all decided while the quote is
    /// still open (draft or sent). The terminal states never move again.
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Draft, Self::Sent)
                | (Self::Draft | Self::Sent, Self::Approved)
                | (Self::Draft | Self::Sent, Self::Rejected)
                | (Self::Draft | Self::Sent, Self::Expired)
        )
    }

    pub fn is_deletable(&self) -> bool {
        matches!(self, Self::Draft | Self::Rejected | Self::Expired)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteItem {
    pub description: String,
    pub quantity: Decimal,
    pub price: Decimal,
}

/// A quote denormalizes a snapshot of the customer and service data it was
/// created from, so it stays readable after the request moves on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub id: QuoteId,
    pub service_request_id: ServiceRequestId,
    pub customer_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub urgency: Option<Urgency>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub problem_description: Option<String>,
    pub technician_id: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub items: Vec<QuoteItem>,
    pub subtotal: Decimal,
    pub vat_percentage: Decimal,
    pub vat_amount: Decimal,
    pub discount_amount: Decimal,
    pub total_amount: Decimal,
    pub valid_until: DateTime<Utc>,
    pub status: QuoteStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_message: Option<String>,
}

impl Quote {
    pub fn transition_to(&mut self, next: QuoteStatus) -> Result<(), PreconditionError> {
        if !self.status.can_transition_to(next) {
            return Err(PreconditionError::InvalidQuoteTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn push_history(
        &mut self,
        status: QuoteStatus,
        timestamp: DateTime<Utc>,
        actor_id: &str,
        notes: Option<String>,
    ) {
        self.history.push(HistoryEntry {
            status: status.as_str().to_owned(),
            timestamp,
            actor_id: actor_id.to_owned(),
            notes,
        });
    }

    /// Recomputes subtotal, VAT and total from the line items.
    pub fn recompute_totals(&mut self) {
        let totals = pricing::quote_totals(&self.items, self.vat_percentage, self.discount_amount);
        self.subtotal = totals.subtotal;
        self.vat_amount = totals.vat_amount;
        self.total_amount = totals.total_amount;
    }

    pub fn check_deletable(&self) -> Result<(), PreconditionError> {
        if self.status.is_deletable() {
            Ok(())
        } else {
            Err(PreconditionError::DeletionNotAllowed {
                status: self.status.as_str().to_owned(),
            })
        }
    }
}
