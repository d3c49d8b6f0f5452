use anyhow::Context;
use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::client::SnapshotKind;
use crate::models::{DistributionSummary, QualityLabel, SnapshotRecord};

pub async fn connect(database_url: &str) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn record_snapshot(
    pool: &PgPool,
    kind: SnapshotKind,
    summary: &DistributionSummary,
    rejected: usize,
) -> anyhow::Result<Uuid> {
    let id = Uuid::new_v4();
    let critical = summary.share(QualityLabel::NeedsImprovement);
    let acceptable = summary.share(QualityLabel::Acceptable);
    let excellent = summary.share(QualityLabel::Excellent);

    sqlx::query(
        r#"
        INSERT INTO course_quality.snapshots
        (id, kind, captured_at, total, pending, needs_improvement, acceptable, excellent,
         needs_improvement_pct, acceptable_pct, excellent_pct, rejected)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(id)
    .bind(kind.as_str())
    .bind(Utc::now())
    .bind(to_i32(summary.total)?)
    .bind(to_i32(summary.pending)?)
    .bind(to_i32(critical.count)?)
    .bind(to_i32(acceptable.count)?)
    .bind(to_i32(excellent.count)?)
    .bind(critical.percentage)
    .bind(acceptable.percentage)
    .bind(excellent.percentage)
    .bind(to_i32(rejected)?)
    .execute(pool)
    .await
    .context("failed to archive snapshot")?;

    Ok(id)
}

pub async fn fetch_history(
    pool: &PgPool,
    kind: Option<SnapshotKind>,
    limit: i64,
) -> anyhow::Result<Vec<SnapshotRecord>> {
    let mut query = String::from(
        "SELECT id, kind, captured_at, total, pending, needs_improvement, acceptable, excellent, \
         needs_improvement_pct, acceptable_pct, excellent_pct, rejected \
         FROM course_quality.snapshots",
    );

    if kind.is_some() {
        query.push_str(" WHERE kind = $2");
    }
    query.push_str(" ORDER BY captured_at DESC LIMIT $1");

    let mut rows = sqlx::query(&query).bind(limit.max(1));
    if let Some(kind) = kind {
        rows = rows.bind(kind.as_str());
    }

    let records = rows.fetch_all(pool).await?;
    let mut history = Vec::with_capacity(records.len());

    for row in records {
        history.push(SnapshotRecord {
            id: row.get("id"),
            kind: row.get("kind"),
            captured_at: row.get("captured_at"),
            total: row.get("total"),
            pending: row.get("pending"),
            needs_improvement: row.get("needs_improvement"),
            acceptable: row.get("acceptable"),
            excellent: row.get("excellent"),
            needs_improvement_pct: row.get("needs_improvement_pct"),
            acceptable_pct: row.get("acceptable_pct"),
            excellent_pct: row.get("excellent_pct"),
            rejected: row.get("rejected"),
        });
    }

    Ok(history)
}

fn to_i32(value: usize) -> anyhow::Result<i32> {
    i32::try_from(value).with_context(|| format!("count {value} does not fit the archive schema"))
}
