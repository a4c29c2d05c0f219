pub mod config;
pub mod domain;
pub mod errors;
pub mod messages;
pub mod pricing;
pub mod session;
pub mod store;
pub mod workflow;

pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat, LlmProvider};
pub use domain::{
    AuditLogEntry, CustomerOrigin, HistoryEntry, MailMessage, MailRecord, Payment, PaymentMethod,
    PaymentStatus, Quote, QuoteId, QuoteItem, QuoteStatus, ServiceRequest, ServiceRequestId,
    ServiceStatus, Urgency, UserId, UserProfile,
};
pub use errors::{PreconditionError, ValidationError, WorkflowError};
pub use messages::{MessageError, MessageGenerator, TemplateMessageGenerator};
pub use pricing::QuoteTotals;
pub use session::Session;
pub use store::{collections, Document, DocumentStore, StoreError, WriteBatch};
pub use workflow::WorkflowPolicy;
