pub mod bootstrap;
pub mod gateway;
pub mod health;
pub mod service;
pub mod watcher;

pub use bootstrap::{bootstrap, bootstrap_with_config, Application, BootstrapError};
pub use gateway::HttpPaymentGateway;
pub use service::{
    AcceptedNegotiation, NewCartItem, PaymentRequest, QuotedPrice, WorkflowRepositories,
    WorkflowService,
};
pub use watcher::{NegotiationWatch, NegotiationWatcher};
