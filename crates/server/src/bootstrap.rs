use std::sync::Arc;

use gemsource_core::audit::TracingAuditSink;
use gemsource_core::config::{AppConfig, ConfigError, LoadOptions};
use gemsource_core::payments::GatewayError;
use gemsource_db::{connect_with_config, migrations, DbPool};
use thiserror::Error;
use tracing::{info, warn};

use crate::gateway::HttpPaymentGateway;
use crate::service::{WorkflowRepositories, WorkflowService};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub service: Arc<WorkflowService>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("payment gateway client could not be built: {0}")]
    Gateway(#[source] GatewayError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let gateway = HttpPaymentGateway::from_config(&config.gateway).map_err(BootstrapError::Gateway)?;
    if !gateway.is_configured() {
        warn!(
            event_name = "system.bootstrap.gateway_unconfigured",
            correlation_id = "bootstrap",
            "gateway.secret_key is unset; checkout redirects will fail verification"
        );
    }

    let service = WorkflowService::new(
        WorkflowRepositories::sqlite(db_pool.clone()),
        Arc::new(gateway),
        Arc::new(TracingAuditSink),
        config.workflow.clone(),
    );

    Ok(Application { config, db_pool, service: Arc::new(service) })
}

#[cfg(test)]
mod tests {
    use gemsource_core::audit::AuditContext;
    use gemsource_core::config::{ConfigOverrides, LoadOptions};
    use gemsource_core::status::CanonicalStatus;

    use crate::bootstrap::bootstrap;

    fn overrides(database_url: &str, secret_key: Option<&str>) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                gateway_secret_key: secret_key.map(str::to_string),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_on_publishable_gateway_key() {
        let result = bootstrap(overrides("sqlite::memory:", Some("pk_live_123"))).await;

        assert!(result.is_err());
        let message = result.err().expect("error").to_string();
        assert!(message.contains("gateway.secret_key"));
    }

    #[tokio::test]
    async fn bootstrap_migrates_and_serves_the_cart_workflow() {
        let app = bootstrap(overrides("sqlite::memory:", Some("sk_test_bootstrap")))
            .await
            .expect("bootstrap should succeed with valid overrides");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('cart', 'quotation', 'negotiation', 'marketplace_order')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("expected workflow tables to be available after bootstrap");
        assert_eq!(table_count, 4, "bootstrap should expose the workflow tables");

        let ctx = AuditContext::new(None, "corr-bootstrap", "buyer-boot");
        let cart = app.service.create_cart(&ctx, "buyer-boot").await.expect("cart persists");
        let status = app.service.canonical_status(&cart.id).await.expect("status derives");
        assert_eq!(status, CanonicalStatus::Submitted);
    }
}
