//! SQLx-backed history store.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leasewatch_model::{
    HistoryFilter, HistoryPage, ScanRunId, ScanRunRecord, ScanRunSummary,
};
use sqlx::PgPool;
use sqlx::types::Json;
use tracing::info;

use super::history::{HistoryError, PageAnchor, ScanHistoryStore};

pub struct PostgresScanHistoryStore {
    pool: PgPool,
}

impl fmt::Debug for PostgresScanHistoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresScanHistoryStore")
            .field("pool_size", &self.pool.size())
            .field("idle", &self.pool.num_idle())
            .finish()
    }
}

fn unavailable(context: &str) -> impl Fn(sqlx::Error) -> HistoryError + '_ {
    move |e| HistoryError::Unavailable(format!("{context}: {e}"))
}

impl PostgresScanHistoryStore {
    /// Connects, applies migrations and verifies the pool.
    pub async fn connect(database_url: &str) -> Result<Self, HistoryError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(unavailable("connect"))?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: PgPool) -> Result<Self, HistoryError> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| HistoryError::Unavailable(format!("migrate: {e}")))?;
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&pool)
            .await
            .map_err(unavailable("health check"))?;
        info!("Scan history connected to Postgres");
        Ok(Self { pool })
    }
}

#[async_trait]
impl ScanHistoryStore for PostgresScanHistoryStore {
    async fn save(&self, record: &ScanRunRecord) -> Result<(), HistoryError> {
        let summary = record.summary();
        let result = sqlx::query(
            r#"
            INSERT INTO scan_runs (id, state, started_at, ended_at, summary, record)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(record.id.to_uuid())
        .bind(record.state.as_str())
        .bind(record.started_at)
        .bind(record.ended_at)
        .bind(Json(&summary))
        .bind(Json(record))
        .execute(&self.pool)
        .await
        .map_err(unavailable("insert scan run"))?;

        if result.rows_affected() == 0 {
            return Err(HistoryError::DuplicateRun(record.id));
        }
        Ok(())
    }

    async fn get(&self, id: ScanRunId) -> Result<ScanRunRecord, HistoryError> {
        let row: Option<Json<ScanRunRecord>> =
            sqlx::query_scalar("SELECT record FROM scan_runs WHERE id = $1")
                .bind(id.to_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(unavailable("load scan run"))?;
        row.map(|Json(record)| record)
            .ok_or(HistoryError::NotFound(id))
    }

    async fn list(
        &self,
        filter: &HistoryFilter,
        page_token: Option<&str>,
    ) -> Result<HistoryPage, HistoryError> {
        let anchor = page_token.map(PageAnchor::decode).transpose()?;
        let size = filter.page_size();
        let anchor_at: Option<DateTime<Utc>> = anchor.map(|a| a.started_at);
        let anchor_id = anchor.map(|a| a.id.to_uuid());

        let rows: Vec<Json<ScanRunSummary>> = sqlx::query_scalar(
            r#"
            SELECT summary
            FROM scan_runs
            WHERE ($1::text IS NULL OR state = $1)
              AND ($2::timestamptz IS NULL OR started_at >= $2)
              AND ($3::timestamptz IS NULL OR started_at <= $3)
              AND ($4::timestamptz IS NULL OR (started_at, id) < ($4, $5))
            ORDER BY started_at DESC, id DESC
            LIMIT $6
            "#,
        )
        .bind(filter.state.map(|s| s.as_str()))
        .bind(filter.from)
        .bind(filter.to)
        .bind(anchor_at)
        .bind(anchor_id)
        .bind((size + 1) as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable("list scan runs"))?;

        let mut items: Vec<ScanRunSummary> =
            rows.into_iter().map(|Json(s)| s).collect();
        let next_page_token = if items.len() > size {
            items.truncate(size);
            items.last().map(|s| PageAnchor::of(s).encode())
        } else {
            None
        };
        Ok(HistoryPage {
            items,
            next_page_token,
        })
    }
}
