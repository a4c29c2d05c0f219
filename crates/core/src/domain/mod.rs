pub mod mail;
pub mod quote;
pub mod service_request;
pub mod user;

pub use mail::{MailMessage, MailRecord};
pub use quote::{Quote, QuoteId, QuoteItem, QuoteStatus};
pub use service_request::{
    CustomerOrigin, HistoryEntry, Payment, PaymentMethod, PaymentStatus, ServiceRequest,
    ServiceRequestId, ServiceStatus, Urgency,
};
pub use user::{AuditDetails, AuditLogEntry, UserId, UserProfile};
