use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use tera::{Context, Tera};
use thiserror::Error;

use crate::domain::quote::Quote;
use crate::domain::service_request::ServiceRequest;
use crate::domain::user::UserProfile;
use crate::pricing;
use crate::session::Session;

const QUOTE_TEMPLATE: &str = "quote_message.txt";
const CLOSING_TEMPLATE: &str = "closing_message.txt";
const ROLE_EMAIL_TEMPLATE: &str = "role_change_email.html";

pub const ROLE_EMAIL_SUBJECT: &str = "Actualización de Rol en MaestroYa CRM";

const UNSPECIFIED: &str = "No especificado";
const UNSPECIFIED_F: &str = "No especificada";
const DEFAULT_TECHNICIAN: &str = "Equipo MaestroYa";

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("template rendering failed: {0}")]
    Template(#[from] tera::Error),
}

/// Seam for the customer-facing message collaborator. The default renders
/// fixed templates; richer generators plug in behind the same trait.
pub trait MessageGenerator: Send + Sync {
    fn quote_message(&self, quote: &Quote, technician_name: &str) -> Result<String, MessageError>;
    fn closing_message(&self, service: &ServiceRequest) -> Result<String, MessageError>;
    fn role_change_email(
        &self,
        target: &UserProfile,
        new_role: &str,
        admin: &Session,
    ) -> Result<String, MessageError>;
}

pub struct TemplateMessageGenerator {
    tera: Tera,
}

impl TemplateMessageGenerator {
    pub fn new() -> Result<Self, MessageError> {
        let mut tera = Tera::default();
        tera.add_raw_template(QUOTE_TEMPLATE, include_str!("../templates/quote_message.txt"))?;
        tera.add_raw_template(CLOSING_TEMPLATE, include_str!("../templates/closing_message.txt"))?;
        tera.add_raw_template(
            ROLE_EMAIL_TEMPLATE,
            include_str!("../templates/role_change_email.html"),
        )?;
        Ok(Self { tera })
    }
}

impl MessageGenerator for TemplateMessageGenerator {
    fn quote_message(&self, quote: &Quote, technician_name: &str) -> Result<String, MessageError> {
        let items: Vec<serde_json::Value> = quote
            .items
            .iter()
            .map(|item| {
                json!({
                    "quantity": item.quantity.normalize().to_string(),
                    "description": item.description,
                    "price": money(item.price),
                    "line_subtotal": money(pricing::line_subtotal(item)),
                })
            })
            .collect();

        let mut context = Context::new();
        context.insert("customer_name", quote.customer_name.as_deref().unwrap_or("Cliente"));
        context.insert("service_reference", &reference(&quote.service_request_id.0));
        context.insert(
            "service_address",
            quote.service_address.as_deref().unwrap_or(UNSPECIFIED_F),
        );
        context.insert("service_type", quote.service_type.as_deref().unwrap_or(UNSPECIFIED));
        context.insert("urgency", quote.urgency.map(|u| u.as_str()).unwrap_or(UNSPECIFIED));
        context.insert(
            "problem_description",
            quote.problem_description.as_deref().unwrap_or(UNSPECIFIED),
        );
        context.insert("items", &items);
        context.insert("subtotal", &money(quote.subtotal));
        context.insert("vat_percentage", &quote.vat_percentage.normalize().to_string());
        context.insert("vat_amount", &money(quote.vat_amount));
        context.insert("total_amount", &money(quote.total_amount));
        context.insert("valid_until", &long_date_es(quote.valid_until));
        context.insert(
            "technician_name",
            if technician_name.is_empty() { DEFAULT_TECHNICIAN } else { technician_name },
        );
        Ok(self.tera.render(QUOTE_TEMPLATE, &context)?.trim().to_owned())
    }

    fn closing_message(&self, service: &ServiceRequest) -> Result<String, MessageError> {
        let hours = service
            .hours_worked
            .map(|hours| hours.normalize().to_string())
            .unwrap_or_else(|| UNSPECIFIED.to_owned());

        let mut context = Context::new();
        context.insert("customer_name", &service.customer_name);
        context.insert("service_reference", &reference(&service.id.0));
        context.insert("service_type", &service.service_type);
        context.insert(
            "completed_at",
            &service.completed_at.map(short_date).unwrap_or_else(|| "N/A".to_owned()),
        );
        context.insert("hours_worked", &hours);
        context.insert("total_amount", &money(service.total_amount.unwrap_or(Decimal::ZERO)));
        context.insert(
            "advance_payment",
            &money(service.advance_payment.unwrap_or(Decimal::ZERO)),
        );
        context.insert(
            "remaining_balance",
            &money(service.remaining_balance.unwrap_or(Decimal::ZERO)),
        );
        context.insert("warranty_days", &service.warranty_days.unwrap_or(0));
        context.insert(
            "warranty_expires_at",
            &service
                .warranty_expires_at
                .map(short_date)
                .unwrap_or_else(|| "N/A".to_owned()),
        );
        context.insert(
            "completion_notes",
            service.completion_notes.as_deref().unwrap_or(UNSPECIFIED_F),
        );
        Ok(self.tera.render(CLOSING_TEMPLATE, &context)?.trim().to_owned())
    }

    fn role_change_email(
        &self,
        target: &UserProfile,
        new_role: &str,
        admin: &Session,
    ) -> Result<String, MessageError> {
        let mut context = Context::new();
        context.insert("recipient_name", target.display_name.as_deref().unwrap_or("usuario"));
        context.insert("new_role", new_role);
        context.insert("admin_name", admin.label());
        Ok(self.tera.render(ROLE_EMAIL_TEMPLATE, &context)?)
    }
}

fn money(value: Decimal) -> String {
    format!("{:.2}", value.round_dp(2))
}

/// Short uppercase reference shown to customers.
fn reference(id: &str) -> String {
    id.chars().take(7).collect::<String>().to_uppercase()
}

fn short_date(ts: DateTime<Utc>) -> String {
    format!("{:02}/{:02}/{}", ts.day(), ts.month(), ts.year())
}

const MONTHS_ES: [&str; 12] = [
    "enero",
    "febrero",
    "marzo",
    "abril",
    "mayo",
    "junio",
    "julio",
    "agosto",
    "septiembre",
    "octubre",
    "noviembre",
    "diciembre",
];

fn long_date_es(ts: DateTime<Utc>) -> String {
    format!("{:02} de {} de {}", ts.day(), MONTHS_ES[ts.month0() as usize], ts.year())
}
