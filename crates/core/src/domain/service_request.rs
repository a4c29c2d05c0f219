use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::quote::QuoteId;
use crate::errors::PreconditionError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceRequestId(pub String);

impl std::fmt::Display for ServiceRequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of a service request. `InProgress` exists in stored data but
/// the dispatch flow goes scheduled -> en_ruta -> completed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Pending,
    Assigned,
    Scheduled,
    InProgress,
    EnRuta,
    Completed,
    Cancelled,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::Scheduled => "scheduled",
            Self::InProgress => "in_progress",
            Self::EnRuta => "en_ruta",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "assigned" => Some(Self::Assigned),
            "scheduled" => Some(Self::Scheduled),
            "in_progress" => Some(Self::InProgress),
            "en_ruta" => Some(Self::EnRuta),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Assigned)
                | (Self::Assigned, Self::Scheduled)
                | (Self::Scheduled, Self::EnRuta)
                | (Self::EnRuta, Self::Completed)
        ) || (!self.is_terminal() && next == Self::Cancelled)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    Medium,
    High,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Intake channel, stored with the original display spellings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CustomerOrigin {
    Web,
    WhatsApp,
    Llamada,
    Email,
    Referido,
    Otro,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Transfer,
    Card,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    PartiallyPaid,
    Paid,
}

/// Append-only audit trail entry. The status is kept as a free string so
/// service and quote histories share one shape.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub actor_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub paid_at: DateTime<Utc>,
    pub registered_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRequest {
    pub id: ServiceRequestId,
    pub customer_id: String,
    pub customer_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_origin: Option<CustomerOrigin>,
    pub service_type: String,
    pub location: String,
    pub problem_description: String,
    pub urgency: Urgency,
    pub status: ServiceStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hours_worked: Option<Decimal>,
    #[serde(default)]
    pub evidence_photos: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub technician_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quote_id: Option<QuoteId>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_amount: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advance_payment: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_balance: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_status: Option<PaymentStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warranty_days: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warranty_expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub payments: Vec<Payment>,
}

impl ServiceRequest {
    pub fn transition_to(&mut self, next: ServiceStatus) -> Result<(), PreconditionError> {
        if !self.status.can_transition_to(next) {
            return Err(PreconditionError::InvalidServiceTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn push_history(
        &mut self,
        status: ServiceStatus,
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

    /// Records a payment and recomputes the commercial fields. Balances are
    /// derived, never trusted from the caller.
    pub fn apply_payment(&mut self, payment: Payment) {
        self.payments.push(payment);
        let total = self.total_amount.unwrap_or(Decimal::ZERO);
        let advance = self.advance_payment.unwrap_or(Decimal::ZERO);
        let remaining = derived_remaining_balance(total, advance, &self.payments);
        self.remaining_balance = Some(remaining);
        self.payment_status = Some(derived_payment_status(remaining, !self.payments.is_empty()));
    }

    /// Deletion rules: only requests that never advanced commercially may go.
    pub fn check_deletable(&self) -> Result<(), PreconditionError> {
        if !matches!(self.status, ServiceStatus::Pending | ServiceStatus::Cancelled) {
            return Err(PreconditionError::DeletionNotAllowed {
                status: self.status.as_str().to_owned(),
            });
        }
        if !self.payments.is_empty() {
            return Err(PreconditionError::DeletionHasPayments {
                count: self.payments.len(),
            });
        }
        Ok(())
    }
}

/// remaining = max(0, total - advance - sum(payments))
pub fn derived_remaining_balance(total: Decimal, advance: Decimal, payments: &[Payment]) -> Decimal {
    let paid: Decimal = payments.iter().map(|p| p.amount).sum();
    (total - advance - paid).max(Decimal::ZERO)
}

pub fn derived_payment_status(remaining: Decimal, has_payments: bool) -> PaymentStatus {
    if remaining <= Decimal::ZERO {
        PaymentStatus::Paid
    } else if has_payments {
        PaymentStatus::PartiallyPaid
    } else {
        PaymentStatus::Pending
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::*;

    fn payment(amount: i64) -> Payment {
        Payment {
            amount: Decimal::from(amount),
            method: PaymentMethod::Cash,
            paid_at: Utc::now(),
            registered_by: "tech-1".to_owned(),
            notes: None,
        }
    }

    fn base_request() -> ServiceRequest {
        ServiceRequest {
            id: ServiceRequestId("sr-1".to_owned()),
            customer_id: "cust-1".to_owned(),
            customer_name: "Ana Pérez".to_owned(),
            customer_email: None,
            customer_phone: None,
            customer_origin: Some(CustomerOrigin::Web),
            service_type: "Plomería".to_owned(),
            location: "Av. Central 42".to_owned(),
            problem_description: "Fuga bajo el fregadero".to_owned(),
            urgency: Urgency::Medium,
            status: ServiceStatus::Pending,
            created_at: Utc::now(),
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
        }
    }

    #[test]
    fn dispatch_path_is_legal() {
        assert!(ServiceStatus::Pending.can_transition_to(ServiceStatus::Assigned));
        assert!(ServiceStatus::Assigned.can_transition_to(ServiceStatus::Scheduled));
        assert!(ServiceStatus::Scheduled.can_transition_to(ServiceStatus::EnRuta));
        assert!(ServiceStatus::EnRuta.can_transition_to(ServiceStatus::Completed));
    }

    #[test]
    fn skipping_states_is_rejected() {
        assert!(!ServiceStatus::Pending.can_transition_to(ServiceStatus::Scheduled));
        assert!(!ServiceStatus::Pending.can_transition_to(ServiceStatus::Completed));
        assert!(!ServiceStatus::Scheduled.can_transition_to(ServiceStatus::Completed));
    }

    #[test]
    fn terminal_states_cannot_move() {
        assert!(!ServiceStatus::Completed.can_transition_to(ServiceStatus::Cancelled));
        assert!(!ServiceStatus::Cancelled.can_transition_to(ServiceStatus::Pending));
    }

    #[test]
    fn any_open_state_can_cancel() {
        for status in [
            ServiceStatus::Pending,
            ServiceStatus::Assigned,
            ServiceStatus::Scheduled,
            ServiceStatus::InProgress,
            ServiceStatus::EnRuta,
        ] {
            assert!(status.can_transition_to(ServiceStatus::Cancelled), "{status:?}");
        }
    }

    #[test]
    fn transition_to_reports_both_states() {
        let mut request = base_request();
        let err = request
            .transition_to(ServiceStatus::Completed)
            .expect_err("pending cannot complete");
        assert_eq!(
            err,
            PreconditionError::InvalidServiceTransition {
                from: ServiceStatus::Pending,
                to: ServiceStatus::Completed,
            }
        );
        assert_eq!(request.status, ServiceStatus::Pending);
    }

    #[test]
    fn full_payment_settles_the_balance() {
        let mut request = base_request();
        request.status = ServiceStatus::Completed;
        request.total_amount = Some(Decimal::from(200));
        request.advance_payment = Some(Decimal::ZERO);
        request.remaining_balance = Some(Decimal::from(200));
        request.payment_status = Some(PaymentStatus::Pending);

        request.apply_payment(payment(200));
        assert_eq!(request.remaining_balance, Some(Decimal::ZERO));
        assert_eq!(request.payment_status, Some(PaymentStatus::Paid));
    }

    #[test]
    fn partial_payment_keeps_balance_open() {
        let mut request = base_request();
        request.status = ServiceStatus::Completed;
        request.total_amount = Some(Decimal::from(200));
        request.advance_payment = Some(Decimal::ZERO);

        request.apply_payment(payment(80));
        assert_eq!(request.remaining_balance, Some(Decimal::from(120)));
        assert_eq!(request.payment_status, Some(PaymentStatus::PartiallyPaid));
    }

    #[test]
    fn overpayment_clamps_to_zero() {
        let mut request = base_request();
        request.status = ServiceStatus::Completed;
        request.total_amount = Some(Decimal::from(100));
        request.advance_payment = Some(Decimal::ZERO);

        request.apply_payment(payment(150));
        assert_eq!(request.remaining_balance, Some(Decimal::ZERO));
        assert_eq!(request.payment_status, Some(PaymentStatus::Paid));
    }

    #[test]
    fn deletion_requires_pending_or_cancelled_without_payments() {
        let mut request = base_request();
        assert!(request.check_deletable().is_ok());

        request.status = ServiceStatus::Completed;
        assert_eq!(
            request.check_deletable(),
            Err(PreconditionError::DeletionNotAllowed { status: "completed".to_owned() })
        );

        request.status = ServiceStatus::Cancelled;
        request.payments.push(payment(50));
        assert_eq!(
            request.check_deletable(),
            Err(PreconditionError::DeletionHasPayments { count: 1 })
        );
    }

    #[test]
    fn status_round_trips_through_storage_encoding() {
        for status in [
            ServiceStatus::Pending,
            ServiceStatus::Assigned,
            ServiceStatus::Scheduled,
            ServiceStatus::InProgress,
            ServiceStatus::EnRuta,
            ServiceStatus::Completed,
            ServiceStatus::Cancelled,
        ] {
            assert_eq!(ServiceStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ServiceStatus::parse("unknown"), None);
    }

    #[test]
    fn documents_use_camel_case_fields() {
        let request = base_request();
        let value = serde_json::to_value(&request).expect("serialize");
        assert!(value.get("customerName").is_some());
        assert!(value.get("problemDescription").is_some());
        assert_eq!(value["status"], "pending");
        assert_eq!(value["customerOrigin"], "Web");
    }
}
