use crate::database::error::{DatabaseError, DbResult};
use crate::database::repository::MandateRepository;
use crate::payments::types::{MandateRecord, MandateStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
struct MandateRow {
    order_id: Uuid,
    mandate_reference: String,
    masked_account: String,
    holder_name: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<MandateRow> for MandateRecord {
    type Error = DatabaseError;

    fn try_from(row: MandateRow) -> Result<Self, Self::Error> {
        Ok(MandateRecord {
            order_id: row.order_id,
            mandate_reference: row.mandate_reference,
            masked_account: row.masked_account,
            holder_name: row.holder_name,
            status: row
                .status
                .parse::<MandateStatus>()
                .map_err(|e| DatabaseError::decode("status", e))?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Postgres-backed mandate repository
pub struct PgMandateRepository {
    pool: PgPool,
}

impl PgMandateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MandateRepository for PgMandateRepository {
    async fn upsert(&self, record: &MandateRecord) -> DbResult<MandateRecord> {
        sqlx::query_as::<_, MandateRow>(
            "INSERT INTO mandates (order_id, mandate_reference, masked_account, holder_name, status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (order_id) DO UPDATE SET \
                mandate_reference = EXCLUDED.mandate_reference, \
                masked_account = EXCLUDED.masked_account, \
                holder_name = EXCLUDED.holder_name, \
                status = EXCLUDED.status, \
                updated_at = EXCLUDED.updated_at \
             RETURNING order_id, mandate_reference, masked_account, holder_name, status, created_at, updated_at",
        )
        .bind(record.order_id)
        .bind(&record.mandate_reference)
        .bind(&record.masked_account)
        .bind(&record.holder_name)
        .bind(record.status.as_str())
        .bind(record.created_at)
        .bind(record.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DatabaseError::from_sqlx(e).with_context("upsert mandate"))?
        .try_into()
    }

    async fn find_by_reference(&self, mandate_reference: &str) -> DbResult<Option<MandateRecord>> {
        sqlx::query_as::<_, MandateRow>(
            "SELECT order_id, mandate_reference, masked_account, holder_name, status, created_at, updated_at \
             FROM mandates WHERE mandate_reference = $1",
        )
        .bind(mandate_reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .map(MandateRecord::try_from)
        .transpose()
    }

    async fn update_status(
        &self,
        mandate_reference: &str,
        status: MandateStatus,
    ) -> DbResult<Option<MandateRecord>> {
        sqlx::query_as::<_, MandateRow>(
            "UPDATE mandates SET status = $2, updated_at = NOW() WHERE mandate_reference = $1 \
             RETURNING order_id, mandate_reference, masked_account, holder_name, status, created_at, updated_at",
        )
        .bind(mandate_reference)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .map(MandateRecord::try_from)
        .transpose()
    }
}
