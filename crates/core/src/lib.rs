pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;

pub use audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
pub use domain::intent::{Entities, Intent, IntentResult};
pub use domain::message::{Message, MessageId, MessageRole};
pub use domain::order::{OrderId, OrderItem, OrderSummary};
pub use domain::product::{ProductId, ProductSummary};
pub use domain::session::{ContextPatch, Session, SessionContext, SessionId, SessionKey, SessionStatus};
pub use domain::support_config::SupportConfig;
pub use errors::{ApplicationError, DomainError, InterfaceError};
