use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use gemsource_core::domain::cart::CartId;
use gemsource_core::domain::negotiation::NegotiationId;
use gemsource_core::domain::order::{
    OpsCheckStatus, OpsFinalCheck, Order, OrderBasis, OrderId, OrderLine, OrderStatus,
};
use gemsource_core::domain::payment::{Payment, PaymentId, PaymentMethod, PaymentStatus};
use gemsource_core::domain::quotation::QuotationId;

use super::codec::{
    format_optional_timestamp, from_json, parse_decimal, parse_enum, parse_optional_timestamp,
    parse_timestamp, to_json,
};
use super::{OrderRepository, RepositoryError};
use crate::DbPool;

const ORDER_COLUMNS: &str = "id, cart_id, quotation_id, negotiation_id, basis_json, status,
     lines_json, total_amount, paid_amount, ops_check_status, ops_check_reason, ops_checked_by,
     ops_checked_at, payment_link_sent_at, payment_confirmed_at, forwarded_to_ops_at, created_at,
     updated_at";

pub struct SqlOrderRepository {
    pool: DbPool,
}

impl SqlOrderRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn with_payments(&self, row: &SqliteRow) -> Result<Order, RepositoryError> {
        let id: String = row.try_get("id")?;
        let payment_rows = sqlx::query(
            "SELECT id, order_id, amount, method, status, gateway_reference, transaction_ref,
                    paid_at, created_at
             FROM payment WHERE order_id = ? ORDER BY created_at ASC, rowid ASC",
        )
        .bind(&id)
        .fetch_all(&self.pool)
        .await?;

        let payments = payment_rows.iter().map(payment_from_row).collect::<Result<Vec<_>, _>>()?;
        order_from_row(row, payments)
    }
}

#[async_trait::async_trait]
impl OrderRepository for SqlOrderRepository {
    async fn find_by_id(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM marketplace_order WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref row) => Ok(Some(self.with_payments(row).await?)),
            None => Ok(None),
        }
    }

    async fn find_by_quotation(
        &self,
        quotation_id: &QuotationId,
    ) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM marketplace_order WHERE quotation_id = ?"
        ))
        .bind(&quotation_id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref row) => Ok(Some(self.with_payments(row).await?)),
            None => Ok(None),
        }
    }

    async fn list_for_cart(&self, cart_id: &CartId) -> Result<Vec<Order>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM marketplace_order WHERE cart_id = ?
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(&cart_id.0)
        .fetch_all(&self.pool)
        .await?;

        let mut orders = Vec::with_capacity(rows.len());
        for row in &rows {
            orders.push(self.with_payments(row).await?);
        }
        Ok(orders)
    }

    async fn save(&self, order: Order) -> Result<(), RepositoryError> {
        let basis_json = to_json("basis_json", &order.basis)?;
        let lines_json = to_json("lines_json", &order.lines)?;
        let check = &order.ops_final_check;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO marketplace_order (id, cart_id, quotation_id, negotiation_id, basis_json,
                                            status, lines_json, total_amount, paid_amount,
                                            ops_check_status, ops_check_reason, ops_checked_by,
                                            ops_checked_at, payment_link_sent_at,
                                            payment_confirmed_at, forwarded_to_ops_at,
                                            created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 status = excluded.status,
                 paid_amount = excluded.paid_amount,
                 ops_check_status = excluded.ops_check_status,
                 ops_check_reason = excluded.ops_check_reason,
                 ops_checked_by = excluded.ops_checked_by,
                 ops_checked_at = excluded.ops_checked_at,
                 payment_link_sent_at = excluded.payment_link_sent_at,
                 payment_confirmed_at = excluded.payment_confirmed_at,
                 forwarded_to_ops_at = excluded.forwarded_to_ops_at,
                 updated_at = excluded.updated_at",
        )
        .bind(&order.id.0)
        .bind(&order.cart_id.0)
        .bind(&order.quotation_id.0)
        .bind(order.negotiation_id.as_ref().map(|id| id.0.clone()))
        .bind(basis_json)
        .bind(order.status.as_str())
        .bind(lines_json)
        .bind(order.total_amount.to_string())
        .bind(order.paid_amount.to_string())
        .bind(check.status.map(|status| status.as_str()))
        .bind(&check.reason)
        .bind(&check.checked_by)
        .bind(format_optional_timestamp(check.checked_at))
        .bind(format_optional_timestamp(order.payment_link_sent_at))
        .bind(format_optional_timestamp(order.payment_confirmed_at))
        .bind(format_optional_timestamp(order.forwarded_to_ops_at))
        .bind(order.created_at.to_rfc3339())
        .bind(order.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        for payment in &order.payments {
            sqlx::query(
                "INSERT INTO payment (id, order_id, amount, method, status, gateway_reference,
                                      transaction_ref, paid_at, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                     status = excluded.status,
                     paid_at = excluded.paid_at",
            )
            .bind(&payment.id.0)
            .bind(&order.id.0)
            .bind(payment.amount.to_string())
            .bind(payment.method.as_str())
            .bind(payment.status.as_str())
            .bind(&payment.gateway_reference)
            .bind(&payment.transaction_ref)
            .bind(format_optional_timestamp(payment.paid_at))
            .bind(payment.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

fn order_from_row(row: &SqliteRow, payments: Vec<Payment>) -> Result<Order, RepositoryError> {
    let basis_json: String = row.try_get("basis_json")?;
    let lines_json: String = row.try_get("lines_json")?;
    let status: String = row.try_get("status")?;
    let total_amount: String = row.try_get("total_amount")?;
    let paid_amount: String = row.try_get("paid_amount")?;
    let check_status: Option<String> = row.try_get("ops_check_status")?;
    let negotiation_id: Option<String> = row.try_get("negotiation_id")?;

    let basis: OrderBasis = from_json("basis_json", &basis_json)?;
    let lines: Vec<OrderLine> = from_json("lines_json", &lines_json)?;

    Ok(Order {
        id: OrderId(row.try_get("id")?),
        cart_id: CartId(row.try_get("cart_id")?),
        quotation_id: QuotationId(row.try_get("quotation_id")?),
        negotiation_id: negotiation_id.map(NegotiationId),
        basis,
        status: parse_enum("status", &status, OrderStatus::parse)?,
        lines,
        total_amount: parse_decimal("total_amount", &total_amount)?,
        paid_amount: parse_decimal("paid_amount", &paid_amount)?,
        ops_final_check: OpsFinalCheck {
            status: check_status
                .map(|status| parse_enum("ops_check_status", &status, OpsCheckStatus::parse))
                .transpose()?,
            reason: row.try_get("ops_check_reason")?,
            checked_by: row.try_get("ops_checked_by")?,
            checked_at: parse_optional_timestamp("ops_checked_at", row.try_get("ops_checked_at")?)?,
        },
        payment_link_sent_at: parse_optional_timestamp(
            "payment_link_sent_at",
            row.try_get("payment_link_sent_at")?,
        )?,
        payment_confirmed_at: parse_optional_timestamp(
            "payment_confirmed_at",
            row.try_get("payment_confirmed_at")?,
        )?,
        forwarded_to_ops_at: parse_optional_timestamp(
            "forwarded_to_ops_at",
            row.try_get("forwarded_to_ops_at")?,
        )?,
        payments,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn payment_from_row(row: &SqliteRow) -> Result<Payment, RepositoryError> {
    let amount: String = row.try_get("amount")?;
    let method: String = row.try_get("method")?;
    let status: String = row.try_get("status")?;

    Ok(Payment {
        id: PaymentId(row.try_get("id")?),
        order_id: OrderId(row.try_get("order_id")?),
        amount: parse_decimal("amount", &amount)?,
        method: parse_enum("method", &method, PaymentMethod::parse)?,
        status: parse_enum("status", &status, PaymentStatus::parse)?,
        gateway_reference: row.try_get("gateway_reference")?,
        transaction_ref: row.try_get("transaction_ref")?,
        paid_at: parse_optional_timestamp("paid_at", row.try_get("paid_at")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
