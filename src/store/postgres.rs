//! PostgreSQL correlation index
//!
//! Nearest-neighbour search runs in process: one query fetches every row in
//! the union of the probe windows, then each probe is scored against it.

use std::collections::BTreeSet;

use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

use super::{
    rank_candidates, CorrelationIndex, KnnHit, KnnProbe, PairExtension, PairMerge, SchemaStatus,
    StoreResult,
};
use crate::db;
use crate::models::{CorrelationAlert, CorrelationRecord, ScoreAnchor};

const RECORD_COLUMNS: &str = "id, finding1, finding2, log_type, corr_rules, event_timestamp, counter, corr_vector, score_timestamp, root";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = db::create_pool(database_url).await?;
        Ok(Self::new(pool))
    }
}

fn record_from_row(row: &PgRow) -> Result<CorrelationRecord, sqlx::Error> {
    let rules: Vec<String> = row.try_get("corr_rules")?;
    Ok(CorrelationRecord {
        id: row.try_get("id")?,
        finding1: row.try_get("finding1")?,
        finding2: row.try_get("finding2")?,
        log_type: row.try_get("log_type")?,
        corr_rules: rules.into_iter().collect::<BTreeSet<_>>(),
        timestamp: row.try_get("event_timestamp")?,
        counter: row.try_get("counter")?,
        corr_vector: row.try_get("corr_vector")?,
        score_timestamp: row.try_get("score_timestamp")?,
        root: row.try_get("root")?,
    })
}

fn records_from_rows(rows: &[PgRow]) -> Result<Vec<CorrelationRecord>, sqlx::Error> {
    rows.iter().map(record_from_row).collect()
}

#[async_trait]
impl CorrelationIndex for PgStore {
    async fn ensure_schema(&self) -> StoreResult<SchemaStatus> {
        let status = if db::schema_present(&self.pool).await? {
            SchemaStatus::AlreadyPresent
        } else {
            db::apply_schema(&self.pool).await?;
            SchemaStatus::Created
        };

        // Seeding is conditional, so a concurrent bootstrap cannot double it
        sqlx::query(
            r#"
            INSERT INTO score_anchors (id, score_timestamp, root)
            SELECT $1, 0, true
            WHERE NOT EXISTS (SELECT 1 FROM score_anchors WHERE root)
            "#,
        )
        .bind(Uuid::new_v4())
        .execute(&self.pool)
        .await?;

        Ok(status)
    }

    async fn latest_anchor(&self) -> StoreResult<Option<ScoreAnchor>> {
        let row = sqlx::query(
            "SELECT id, score_timestamp, root FROM score_anchors ORDER BY score_timestamp DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(ScoreAnchor {
                id: r.try_get("id")?,
                score_timestamp: r.try_get("score_timestamp")?,
                root: r.try_get("root")?,
            })),
            None => Ok(None),
        }
    }

    async fn put_anchor(&self, anchor: &ScoreAnchor) -> StoreResult<()> {
        sqlx::query("INSERT INTO score_anchors (id, score_timestamp, root) VALUES ($1, $2, $3)")
            .bind(anchor.id)
            .bind(anchor.score_timestamp)
            .bind(anchor.root)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn merge_pair(&self, fresh: &CorrelationRecord, extend: PairExtension<'_>) -> StoreResult<PairMerge> {
        let mut tx = self.pool.begin().await?;

        // idx_history_pair makes a concurrent insert of the same pair wait,
        // then fall through to the update branch
        let rules: Vec<String> = fresh.corr_rules.iter().cloned().collect();
        let inserted = sqlx::query(
            r#"
            INSERT INTO correlation_history
                (id, finding1, finding2, log_type, corr_rules, event_timestamp, counter, corr_vector, score_timestamp, root)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT ((LEAST(finding1, finding2)), (GREATEST(finding1, finding2)))
                WHERE finding1 <> '' AND finding2 <> ''
                DO NOTHING
            RETURNING id
            "#,
        )
        .bind(fresh.id)
        .bind(&fresh.finding1)
        .bind(&fresh.finding2)
        .bind(&fresh.log_type)
        .bind(&rules)
        .bind(fresh.timestamp)
        .bind(fresh.counter)
        .bind(&fresh.corr_vector)
        .bind(fresh.score_timestamp)
        .bind(fresh.root)
        .fetch_optional(&mut *tx)
        .await?;

        if inserted.is_some() {
            tx.commit().await?;
            return Ok(PairMerge {
                record: fresh.clone(),
                rule_added: true,
            });
        }

        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM correlation_history \
             WHERE finding1 <> '' AND finding2 <> '' \
               AND LEAST(finding1, finding2) = LEAST($1, $2) \
               AND GREATEST(finding1, finding2) = GREATEST($1, $2) \
             FOR UPDATE"
        );
        let row = sqlx::query(&sql)
            .bind(&fresh.finding1)
            .bind(&fresh.finding2)
            .fetch_one(&mut *tx)
            .await?;
        let mut record = record_from_row(&row)?;

        let rule_added = extend(&mut record);
        if rule_added {
            let rules: Vec<String> = record.corr_rules.iter().cloned().collect();
            sqlx::query(
                "UPDATE correlation_history SET corr_rules = $2, counter = $3, corr_vector = $4 WHERE id = $1",
            )
            .bind(record.id)
            .bind(&rules)
            .bind(record.counter)
            .bind(&record.corr_vector)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(PairMerge { record, rule_added })
    }

    async fn upsert_record(&self, record: &CorrelationRecord) -> StoreResult<()> {
        let rules: Vec<String> = record.corr_rules.iter().cloned().collect();
        sqlx::query(
            r#"
            INSERT INTO correlation_history
                (id, finding1, finding2, log_type, corr_rules, event_timestamp, counter, corr_vector, score_timestamp, root)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                corr_rules = EXCLUDED.corr_rules,
                counter = EXCLUDED.counter,
                corr_vector = EXCLUDED.corr_vector,
                event_timestamp = EXCLUDED.event_timestamp,
                score_timestamp = EXCLUDED.score_timestamp
            "#,
        )
        .bind(record.id)
        .bind(&record.finding1)
        .bind(&record.finding2)
        .bind(&record.log_type)
        .bind(&rules)
        .bind(record.timestamp)
        .bind(record.counter)
        .bind(&record.corr_vector)
        .bind(record.score_timestamp)
        .bind(record.root)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn records_for_finding(&self, finding_id: &str) -> StoreResult<Vec<CorrelationRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM correlation_history \
             WHERE finding1 = $1 OR finding2 = $1 ORDER BY created_at ASC"
        );
        let rows = sqlx::query(&sql).bind(finding_id).fetch_all(&self.pool).await?;
        Ok(records_from_rows(&rows)?)
    }

    async fn scan_pairs(&self, start_timestamp: i64, end_timestamp: i64) -> StoreResult<Vec<CorrelationRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM correlation_history \
             WHERE finding1 <> '' AND finding2 <> '' \
               AND event_timestamp >= $1 AND event_timestamp <= $2 \
             ORDER BY created_at ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(start_timestamp)
            .bind(end_timestamp)
            .fetch_all(&self.pool)
            .await?;
        Ok(records_from_rows(&rows)?)
    }

    async fn multi_knn(&self, probes: &[KnnProbe]) -> StoreResult<Vec<StoreResult<Vec<KnnHit>>>> {
        let (Some(start), Some(end)) = (
            probes.iter().map(|p| p.filter.start_timestamp).min(),
            probes.iter().map(|p| p.filter.end_timestamp).max(),
        ) else {
            return Ok(Vec::new());
        };

        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM correlation_history \
             WHERE NOT root AND event_timestamp >= $1 AND event_timestamp <= $2"
        );
        let rows = sqlx::query(&sql).bind(start).bind(end).fetch_all(&self.pool).await?;
        let candidates = records_from_rows(&rows)?;

        Ok(probes
            .iter()
            .map(|probe| Ok(rank_candidates(probe, &candidates)))
            .collect())
    }

    async fn get_alert(&self, id: Uuid) -> StoreResult<Option<CorrelationAlert>> {
        let alert = sqlx::query_as::<_, CorrelationAlert>("SELECT * FROM correlation_alerts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(alert)
    }

    async fn put_alert(&self, alert: &CorrelationAlert) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO correlation_alerts
                (id, correlation_rule_id, correlation_rule_name, finding_ids, state, severity, start_time, acknowledged_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                state = EXCLUDED.state,
                acknowledged_at = EXCLUDED.acknowledged_at
            "#,
        )
        .bind(alert.id)
        .bind(&alert.correlation_rule_id)
        .bind(&alert.correlation_rule_name)
        .bind(&alert.finding_ids)
        .bind(alert.state.as_str())
        .bind(&alert.severity)
        .bind(alert.start_time)
        .bind(alert.acknowledged_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_alerts(&self, rule_id: Option<&str>) -> StoreResult<Vec<CorrelationAlert>> {
        let alerts = sqlx::query_as::<_, CorrelationAlert>(
            r#"
            SELECT * FROM correlation_alerts
            WHERE $1::TEXT IS NULL OR correlation_rule_id = $1
            ORDER BY start_time DESC, id ASC
            "#,
        )
        .bind(rule_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(alerts)
    }
}
