use chrono::{DateTime, Utc};
use sqlx::Row;

use gemsource_core::domain::order::OrderId;

use super::{ReconciliationMarkerRepository, RepositoryError};
use crate::DbPool;

pub struct SqlReconciliationMarkerRepository {
    pool: DbPool,
}

impl SqlReconciliationMarkerRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ReconciliationMarkerRepository for SqlReconciliationMarkerRepository {
    async fn is_reconciled(&self, session_id: &str) -> Result<bool, RepositoryError> {
        let count = sqlx::query(
            "SELECT COUNT(*) AS count FROM payment_reconciliation_marker WHERE session_id = ?",
        )
        .bind(session_id)
        .fetch_one(&self.pool)
        .await?
        .try_get::<i64, _>("count")?;

        Ok(count > 0)
    }

    async fn mark_reconciled(
        &self,
        session_id: &str,
        order_id: &OrderId,
        reconciled_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO payment_reconciliation_marker (session_id, order_id, reconciled_at)
             VALUES (?, ?, ?)
             ON CONFLICT(session_id) DO NOTHING",
        )
        .bind(session_id)
        .bind(&order_id.0)
        .bind(reconciled_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
