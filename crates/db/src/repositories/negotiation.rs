use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use gemsource_core::domain::negotiation::{
    Negotiation, NegotiationId, NegotiationStatus, Party, Round, RoundItem,
};
use gemsource_core::domain::quotation::QuotationId;

use super::codec::{from_json, parse_decimal, parse_enum, parse_timestamp, parse_u32, to_json};
use super::{NegotiationRepository, RepositoryError};
use crate::DbPool;

pub struct SqlNegotiationRepository {
    pool: DbPool,
}

impl SqlNegotiationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load(&self, row: Option<SqliteRow>) -> Result<Option<Negotiation>, RepositoryError> {
        let Some(row) = row else {
            return Ok(None);
        };

        let id: String = row.try_get("id")?;
        let round_rows = sqlx::query(
            "SELECT round_number, proposed_by, proposer_id, items_json, proposed_total, message,
                    created_at
             FROM negotiation_round WHERE negotiation_id = ? ORDER BY round_number ASC",
        )
        .bind(&id)
        .fetch_all(&self.pool)
        .await?;

        let rounds = round_rows.iter().map(round_from_row).collect::<Result<Vec<_>, _>>()?;
        negotiation_from_row(&row, rounds).map(Some)
    }
}

#[async_trait::async_trait]
impl NegotiationRepository for SqlNegotiationRepository {
    async fn find_by_id(
        &self,
        id: &NegotiationId,
    ) -> Result<Option<Negotiation>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, quotation_id, status, opened_by, closed_by, close_reason, created_at,
                    updated_at
             FROM negotiation WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        self.load(row).await
    }

    async fn find_by_quotation(
        &self,
        quotation_id: &QuotationId,
    ) -> Result<Option<Negotiation>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, quotation_id, status, opened_by, closed_by, close_reason, created_at,
                    updated_at
             FROM negotiation WHERE quotation_id = ?",
        )
        .bind(&quotation_id.0)
        .fetch_optional(&self.pool)
        .await?;

        self.load(row).await
    }

    async fn save(&self, negotiation: Negotiation) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO negotiation (id, quotation_id, status, opened_by, closed_by, close_reason,
                                      created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 status = excluded.status,
                 closed_by = excluded.closed_by,
                 close_reason = excluded.close_reason,
                 updated_at = excluded.updated_at",
        )
        .bind(&negotiation.id.0)
        .bind(&negotiation.quotation_id.0)
        .bind(negotiation.status.as_str())
        .bind(negotiation.opened_by.as_str())
        .bind(negotiation.closed_by.map(|party| party.as_str()))
        .bind(&negotiation.close_reason)
        .bind(negotiation.created_at.to_rfc3339())
        .bind(negotiation.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        for round in &negotiation.rounds {
            sqlx::query(
                "INSERT INTO negotiation_round (negotiation_id, round_number, proposed_by,
                                                proposer_id, items_json, proposed_total, message,
                                                created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(negotiation_id, round_number) DO NOTHING",
            )
            .bind(&negotiation.id.0)
            .bind(i64::from(round.number))
            .bind(round.proposed_by.as_str())
            .bind(&round.proposer_id)
            .bind(to_json("items_json", &round.items)?)
            .bind(round.proposed_total.to_string())
            .bind(&round.message)
            .bind(round.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

fn negotiation_from_row(row: &SqliteRow, rounds: Vec<Round>) -> Result<Negotiation, RepositoryError> {
    let status: String = row.try_get("status")?;
    let opened_by: String = row.try_get("opened_by")?;
    let closed_by: Option<String> = row.try_get("closed_by")?;

    Ok(Negotiation {
        id: NegotiationId(row.try_get("id")?),
        quotation_id: QuotationId(row.try_get("quotation_id")?),
        status: parse_enum("status", &status, NegotiationStatus::parse)?,
        opened_by: parse_enum("opened_by", &opened_by, Party::parse)?,
        rounds,
        closed_by: closed_by
            .map(|party| parse_enum("closed_by", &party, Party::parse))
            .transpose()?,
        close_reason: row.try_get("close_reason")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn round_from_row(row: &SqliteRow) -> Result<Round, RepositoryError> {
    let proposed_by: String = row.try_get("proposed_by")?;
    let items_json: String = row.try_get("items_json")?;
    let proposed_total: String = row.try_get("proposed_total")?;
    let items: Vec<RoundItem> = from_json("items_json", &items_json)?;

    Ok(Round {
        number: parse_u32("round_number", row.try_get("round_number")?)?,
        proposed_by: parse_enum("proposed_by", &proposed_by, Party::parse)?,
        proposer_id: row.try_get("proposer_id")?,
        items,
        proposed_total: parse_decimal("proposed_total", &proposed_total)?,
        message: row.try_get("message")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
