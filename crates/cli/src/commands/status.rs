use gemsource_core::domain::cart::CartId;
use gemsource_core::status::DeriveOptions;
use gemsource_db::repositories::{
    SqlCartRepository, SqlNegotiationRepository, SqlOrderRepository, SqlQuotationRepository,
};
use gemsource_db::{connect_with_config, load_workflow_snapshot, WorkflowSnapshot};
use serde::Serialize;

use crate::commands::{current_thread_runtime, load_config, CommandResult};

/// Read-only view of one cart. Does not migrate; an unmigrated store reports `db_query`.
#[derive(Debug, PartialEq, Eq, Serialize)]
struct StatusReport {
    cart_id: String,
    canonical_status: &'static str,
    cart_status: &'static str,
    active_quotation_id: Option<String>,
    quotation_status: Option<&'static str>,
    negotiation_id: Option<String>,
    negotiation_status: Option<&'static str>,
    order_id: Option<String>,
    order_status: Option<&'static str>,
}

impl StatusReport {
    fn from_snapshot(snapshot: &WorkflowSnapshot, options: DeriveOptions) -> Self {
        let quotation = snapshot.active_quotation();
        Self {
            cart_id: snapshot.cart.id.to_string(),
            canonical_status: snapshot.canonical_status(options).as_str(),
            cart_status: snapshot.cart.status.as_str(),
            active_quotation_id: quotation.map(|quotation| quotation.id.to_string()),
            quotation_status: quotation.map(|quotation| quotation.status.as_str()),
            negotiation_id: snapshot.negotiation.as_ref().map(|negotiation| negotiation.id.to_string()),
            negotiation_status: snapshot.negotiation.as_ref().map(|negotiation| negotiation.status.as_str()),
            order_id: snapshot.order.as_ref().map(|order| order.id.to_string()),
            order_status: snapshot.order.as_ref().map(|order| order.status.as_str()),
        }
    }
}

pub fn run(cart_id: &str, json: bool) -> CommandResult {
    let cart_id = cart_id.trim();
    if cart_id.is_empty() {
        return CommandResult::failure("status", "invalid_argument", "cart id must not be empty", 8);
    }

    let config = match load_config("status") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match current_thread_runtime("status") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };
    let options = config.workflow.derive_options();
    let id = CartId(cart_id.to_string());

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        let snapshot = load_workflow_snapshot(
            &SqlCartRepository::new(pool.clone()),
            &SqlQuotationRepository::new(pool.clone()),
            &SqlNegotiationRepository::new(pool.clone()),
            &SqlOrderRepository::new(pool.clone()),
            &id,
        )
        .await
        .map_err(|error| ("db_query", error.to_string(), 4u8));
        pool.close().await;
        snapshot
    });

    let snapshot = match result {
        Ok(Some(snapshot)) => snapshot,
        Ok(None) => {
            return CommandResult::failure(
                "status",
                "not_found",
                format!("cart `{cart_id}` does not exist"),
                7,
            )
        }
        Err((error_class, message, exit_code)) => {
            return CommandResult::failure("status", error_class, message, exit_code)
        }
    };

    let report = StatusReport::from_snapshot(&snapshot, options);
    if json {
        return match serde_json::to_string(&report) {
            Ok(output) => CommandResult { exit_code: 0, output },
            Err(error) => CommandResult::failure("status", "serialization", error.to_string(), 1),
        };
    }

    CommandResult { exit_code: 0, output: render_human(&report) }
}

fn render_human(report: &StatusReport) -> String {
    let mut lines = vec![format!("cart {}: {}", report.cart_id, report.canonical_status)];
    lines.push(format!("- cart: {}", report.cart_status));
    lines.push(format!(
        "- quotation: {}",
        describe(report.active_quotation_id.as_deref(), report.quotation_status)
    ));
    lines.push(format!(
        "- negotiation: {}",
        describe(report.negotiation_id.as_deref(), report.negotiation_status)
    ));
    lines.push(format!("- order: {}", describe(report.order_id.as_deref(), report.order_status)));
    lines.join("\n")
}

fn describe(id: Option<&str>, status: Option<&str>) -> String {
    match (id, status) {
        (Some(id), Some(status)) => format!("{id} ({status})"),
        (Some(id), None) => id.to_string(),
        _ => "none".to_string(),
    }
}
