pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod negotiation;
pub mod payments;
pub mod status;
pub mod validator;

pub use audit::{AuditContext, AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use domain::cart::{Cart, CartId, CartItem, CartItemId, CartStatus};
pub use domain::inventory::InventoryCatalog;
pub use domain::negotiation::{Negotiation, NegotiationId, NegotiationStatus, Party, Round};
pub use domain::order::{Order, OrderId, OrderStatus};
pub use domain::payment::{Payment, PaymentId, PaymentMethod, PaymentStatus};
pub use domain::quotation::{Quotation, QuotationId, QuotationItem, QuotationStatus};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use negotiation::{effective_terms, NegotiationCommand, NegotiationEngine, NegotiationError};
pub use payments::{PaymentReconciler, ReconciliationOutcome, RedirectParams};
pub use status::{derive_canonical_status, CanonicalStatus, DeriveOptions, WorkflowFacts};
pub use validator::{validate_cart, ValidationReport};
