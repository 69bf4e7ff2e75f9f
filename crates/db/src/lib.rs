pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod reconciliation;
pub mod repositories;
pub mod snapshot;

pub use connection::{connect, connect_with_config, connect_with_settings, DbPool};
pub use fixtures::{FlowSeedInfo, MarketplaceSeedDataset, SeedResult, VerificationResult};
pub use reconciliation::{RepositoryOrderLedger, RepositoryReconciliationMarkers};
pub use snapshot::{load_workflow_snapshot, WorkflowSnapshot};
