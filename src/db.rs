use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

use crate::config::IngestPolicy;
use crate::error::Result;
use crate::loss::NON_DISEASE_LABELS;
use crate::models::{round2, DiseaseCounts, ProductionRecord, SeverityContext};
use crate::store::{AppliedUpload, ProductionStore};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProductionStore for PgStore {
    async fn apply_upload(
        &self,
        policy: IngestPolicy,
        records: &[ProductionRecord],
        severity: &SeverityContext,
    ) -> Result<AppliedUpload> {
        let mut tx = self.pool.begin().await?;
        let mut applied = AppliedUpload::default();

        sqlx::query(
            r#"
            INSERT INTO cacao_forecast.sessions (session_id, severity, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (session_id) DO UPDATE
            SET severity = EXCLUDED.severity, updated_at = now()
            "#,
        )
        .bind(&severity.session_id)
        .bind(severity.severity)
        .execute(&mut *tx)
        .await?;

        if policy == IngestPolicy::Replace {
            let result = sqlx::query("DELETE FROM cacao_forecast.production")
                .execute(&mut *tx)
                .await?;
            applied.removed = result.rows_affected() as usize;
        }

        for record in records {
            let inserted: bool = sqlx::query(
                r#"
                INSERT INTO cacao_forecast.production (date, value)
                VALUES ($1, $2)
                ON CONFLICT (date) DO UPDATE
                SET value = EXCLUDED.value
                RETURNING (xmax = 0) AS inserted
                "#,
            )
            .bind(record.date)
            .bind(record.value)
            .fetch_one(&mut *tx)
            .await?
            .get("inserted");

            if inserted {
                applied.inserted += 1;
            } else {
                applied.updated += 1;
            }
        }

        tx.commit().await?;
        info!(
            ?policy,
            inserted = applied.inserted,
            updated = applied.updated,
            removed = applied.removed,
            "production upload committed"
        );
        Ok(applied)
    }

    async fn fetch_series(&self) -> Result<Vec<ProductionRecord>> {
        let rows = sqlx::query("SELECT date, value FROM cacao_forecast.production ORDER BY date")
            .fetch_all(&self.pool)
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(ProductionRecord {
                date: row.get("date"),
                value: round2(row.get("value")),
            });
        }
        Ok(records)
    }

    async fn session_severity(&self, session_id: &str) -> Result<Option<i32>> {
        let row = sqlx::query("SELECT severity FROM cacao_forecast.sessions WHERE session_id = $1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| row.get("severity")))
    }

    async fn record_scan(&self, disease: &str, confidence: f64) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO cacao_forecast.scan_records (id, disease, confidence)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(id)
        .bind(disease)
        .bind(confidence)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    async fn disease_counts(&self) -> Result<DiseaseCounts> {
        let excluded: Vec<String> = NON_DISEASE_LABELS.iter().map(|s| s.to_string()).collect();
        let rows = sqlx::query(
            r#"
            SELECT disease, COUNT(*) AS count
            FROM cacao_forecast.scan_records
            WHERE disease <> ALL($1)
            GROUP BY disease
            "#,
        )
        .bind(excluded)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = DiseaseCounts::default();
        for row in rows {
            let count: i64 = row.get("count");
            counts.total_diseases_detected += count;
            counts.disease_counts.insert(row.get("disease"), count);
        }
        Ok(counts)
    }
}
