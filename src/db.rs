use anyhow::Context;
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::Serialize;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::BatchConfig;
use crate::import::RawRecord;
use crate::models::{
    EngagementLevel, ImportSummary, NewSubscriber, RiskBucket, ScoreResult, Segment,
    SubscriberPage, SubscriberRow, SubscriberStatus, SubscriberUpdate, Tier,
};
use crate::reconcile::{self, ExistingIndex, ExistingSubscriber, Reconciliation};
use crate::scoring;

const SUBSCRIBER_COLUMNS: &str = "id, email, name, status, tier, join_date, last_active, \
     total_opens, total_clicks, rfm_score, churn_risk, engagement_level";

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Loads a handful of demo subscribers through the regular import path.
pub async fn seed(
    pool: &PgPool,
    user_id: &str,
    now: DateTime<Utc>,
    batch: &BatchConfig,
) -> anyhow::Result<ImportSummary> {
    let rows: [&[(&str, &str)]; 4] = [
        &[
            ("email", "avery.lee@example.com"),
            ("name", "Avery Lee"),
            ("status", "paid"),
            ("tier", "founding member"),
            ("signup_date", "2024-02-11"),
            ("opens_count", "148"),
            ("clicks_count", "31"),
        ],
        &[
            ("email", "jules.moreno@example.com"),
            ("name", "Jules Moreno"),
            ("status", "paid"),
            ("tier", "annual"),
            ("signup_date", "2025-06-02"),
            ("opens_count", "22"),
            ("clicks_count", "4"),
        ],
        &[
            ("email", "kiara.patel@example.com"),
            ("name", "Kiara Patel"),
            ("status", "comp"),
            ("signup_date", "2025-09-20"),
            ("opens_count", "6"),
        ],
        &[
            ("email", "sam.okafor@example.com"),
            ("status", "free"),
            ("signup_date", "2023-12-01"),
        ],
    ];

    let records: Vec<RawRecord> = rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect::<RawRecord>()
        })
        .collect();

    let existing = fetch_existing_index(pool, user_id).await?;
    let plan = reconcile::reconcile(&records, &existing, now);
    persist(pool, user_id, &plan, batch).await
}

/// Reads every subscriber's email, id and last activity once, before
/// reconciliation.
pub async fn fetch_existing_index(
    pool: &PgPool,
    user_id: &str,
) -> anyhow::Result<ExistingIndex> {
    let rows =
        sqlx::query("SELECT id, email, last_active FROM crm.subscribers WHERE user_id = $1")
            .bind(user_id)
            .fetch_all(pool)
            .await
            .context("failed to load existing subscriber emails")?;

    let entries = rows.iter().map(|row| {
        (
            row.get::<String, _>("email"),
            ExistingSubscriber {
                id: row.get("id"),
                last_active: row.get("last_active"),
            },
        )
    });
    let index = ExistingIndex::from_subscribers(entries);
    debug!(existing = index.len(), "built existing email index");
    Ok(index)
}

/// Writes a reconciliation: bounded multi-row inserts, then updates dispatched
/// concurrently in bounded groups.
pub async fn persist(
    pool: &PgPool,
    user_id: &str,
    plan: &Reconciliation,
    batch: &BatchConfig,
) -> anyhow::Result<ImportSummary> {
    let batch = batch.normalized();
    let mut summary = ImportSummary {
        skipped_count: plan.skipped,
        ..ImportSummary::default()
    };

    for (index, chunk) in plan.insert_chunks(batch.insert_chunk_size).enumerate() {
        let written = insert_chunk(pool, user_id, chunk).await.with_context(|| {
            format!(
                "failed to insert subscriber chunk {} ({})",
                index + 1,
                summary.progress()
            )
        })?;
        debug!(chunk = index + 1, rows = written, "inserted subscriber chunk");
        summary.inserted_count += written;
    }

    for (index, chunk) in plan.update_chunks(batch.update_concurrency).enumerate() {
        let affected = try_join_all(chunk.iter().map(|update| update_subscriber(pool, update)))
            .await
            .with_context(|| {
                format!(
                    "failed to apply subscriber update group {} ({})",
                    index + 1,
                    summary.progress()
                )
            })?;
        let written: usize = affected.iter().sum();
        debug!(group = index + 1, rows = written, "applied subscriber updates");
        summary.updated_count += written;
    }

    info!(
        inserted = summary.inserted_count,
        updated = summary.updated_count,
        skipped = summary.skipped_count,
        "persisted import"
    );
    Ok(summary)
}

fn insert_query<'args>(
    user_id: &'args str,
    chunk: &'args [NewSubscriber],
) -> QueryBuilder<'args, Postgres> {
    let mut builder = QueryBuilder::new(
        "INSERT INTO crm.subscribers \
         (id, user_id, email, name, status, tier, source, external_id, join_date, last_active, \
          engagement_level, rfm_score, churn_risk, total_opens, total_clicks) ",
    );
    builder.push_values(chunk, |mut values, new| {
        let fields = &new.fields;
        values
            .push_bind(Uuid::new_v4())
            .push_bind(user_id)
            .push_bind(&fields.email)
            .push_bind(&fields.name)
            .push_bind(fields.status.as_str())
            .push_bind(fields.tier.as_str())
            .push_bind(new.source.as_str())
            .push_bind(&fields.external_id)
            .push_bind(fields.join_date)
            .push_bind(fields.last_active)
            .push_bind(fields.scoring.engagement.as_str())
            .push_bind(fields.scoring.score)
            .push_bind(fields.scoring.risk)
            .push_bind(fields.total_opens)
            .push_bind(fields.total_clicks);
    });
    builder
}

async fn insert_chunk(
    pool: &PgPool,
    user_id: &str,
    chunk: &[NewSubscriber],
) -> sqlx::Result<usize> {
    if chunk.is_empty() {
        return Ok(0);
    }

    let result = insert_query(user_id, chunk).build().execute(pool).await?;
    Ok(result.rows_affected() as usize)
}

// The score in `fields` was computed with the stored last_active already
// merged in, so the column is written as-is.
async fn update_subscriber(pool: &PgPool, update: &SubscriberUpdate) -> sqlx::Result<usize> {
    let fields = &update.fields;
    let result = sqlx::query(
        r#"
        UPDATE crm.subscribers
        SET email = $2, name = $3, status = $4, tier = $5, source = 'import',
            external_id = COALESCE($6, external_id), join_date = $7,
            last_active = $8, engagement_level = $9,
            rfm_score = $10, churn_risk = $11, total_opens = $12, total_clicks = $13,
            updated_at = $14
        WHERE id = $1
        "#,
    )
    .bind(update.id)
    .bind(&fields.email)
    .bind(&fields.name)
    .bind(fields.status.as_str())
    .bind(fields.tier.as_str())
    .bind(&fields.external_id)
    .bind(fields.join_date)
    .bind(fields.last_active)
    .bind(fields.scoring.engagement.as_str())
    .bind(fields.scoring.score)
    .bind(fields.scoring.risk)
    .bind(fields.total_opens)
    .bind(fields.total_clicks)
    .bind(update.updated_at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() as usize)
}

/// Listing criteria. The serialized form, without paging, is what a segment
/// records as its criteria.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SubscriberFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SubscriberStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engagement: Option<EngagementLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskBucket>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment_id: Option<Uuid>,
    #[serde(skip)]
    pub page: i64,
    #[serde(skip)]
    pub limit: i64,
}

impl SubscriberFilter {
    fn limit(&self) -> i64 {
        self.limit.max(1)
    }

    fn offset(&self) -> i64 {
        (self.page.max(1) - 1).saturating_mul(self.limit())
    }

    fn search_pattern(&self) -> Option<String> {
        self.query
            .as_deref()
            .map(str::trim)
            .filter(|query| !query.is_empty())
            .map(|query| format!("%{query}%"))
    }
}

/// `SELECT {columns}` over the user's subscribers narrowed by every set
/// criterion. Paging is left to the caller.
fn filtered_query<'args>(
    columns: &str,
    user_id: &'args str,
    filter: &SubscriberFilter,
) -> QueryBuilder<'args, Postgres> {
    let mut builder = QueryBuilder::new(format!(
        "SELECT {columns} FROM crm.subscribers WHERE user_id = "
    ));
    builder.push_bind(user_id);

    if let Some(status) = filter.status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(engagement) = filter.engagement {
        builder
            .push(" AND engagement_level = ")
            .push_bind(engagement.as_str());
    }
    if let Some(bucket) = filter.risk {
        let (lower, upper) = bucket.bounds();
        if let Some(floor) = lower {
            builder.push(" AND churn_risk >= ").push_bind(floor);
        }
        if let Some(cap) = upper {
            builder.push(" AND churn_risk < ").push_bind(cap);
        }
    }
    if let Some(segment_id) = filter.segment_id {
        builder
            .push(" AND id IN (SELECT subscriber_id FROM crm.subscriber_segments WHERE segment_id = ")
            .push_bind(segment_id)
            .push(")");
    }
    if let Some(pattern) = filter.search_pattern() {
        builder
            .push(" AND (email ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR name ILIKE ")
            .push_bind(pattern)
            .push(")");
    }

    builder
}

fn page_query<'args>(
    user_id: &'args str,
    filter: &SubscriberFilter,
) -> QueryBuilder<'args, Postgres> {
    let mut builder = filtered_query(SUBSCRIBER_COLUMNS, user_id, filter);
    builder
        .push(" ORDER BY join_date DESC NULLS LAST LIMIT ")
        .push_bind(filter.limit())
        .push(" OFFSET ")
        .push_bind(filter.offset());
    builder
}

pub async fn count_subscribers(
    pool: &PgPool,
    user_id: &str,
    filter: &SubscriberFilter,
) -> anyhow::Result<i64> {
    let row = filtered_query("COUNT(*) AS total", user_id, filter)
        .build()
        .fetch_one(pool)
        .await
        .context("failed to count subscribers")?;
    Ok(row.get("total"))
}

/// One page of matches, newest join first, with the unpaged match count.
pub async fn fetch_subscribers(
    pool: &PgPool,
    user_id: &str,
    filter: &SubscriberFilter,
) -> anyhow::Result<SubscriberPage> {
    let total = count_subscribers(pool, user_id, filter).await?;
    let rows = page_query(user_id, filter)
        .build()
        .fetch_all(pool)
        .await
        .context("failed to fetch subscribers")?;

    Ok(SubscriberPage {
        subscribers: rows.iter().map(subscriber_from_row).collect(),
        total,
    })
}

pub async fn fetch_all_subscribers(
    pool: &PgPool,
    user_id: &str,
) -> anyhow::Result<Vec<SubscriberRow>> {
    let query = format!(
        "SELECT {SUBSCRIBER_COLUMNS} FROM crm.subscribers WHERE user_id = $1 ORDER BY join_date DESC NULLS LAST"
    );
    let rows = sqlx::query(&query)
        .bind(user_id)
        .fetch_all(pool)
        .await
        .context("failed to fetch subscribers")?;

    Ok(rows.iter().map(subscriber_from_row).collect())
}

fn subscriber_from_row(row: &PgRow) -> SubscriberRow {
    let status: String = row.get("status");
    let tier: String = row.get("tier");
    let engagement: Option<String> = row.get("engagement_level");

    SubscriberRow {
        id: row.get("id"),
        email: row.get("email"),
        name: row.get("name"),
        status: SubscriberStatus::parse(&status),
        tier: Tier::new(&tier),
        join_date: row.get("join_date"),
        last_active: row.get("last_active"),
        total_opens: row.get("total_opens"),
        total_clicks: row.get("total_clicks"),
        rfm_score: row.get("rfm_score"),
        churn_risk: row.get("churn_risk"),
        engagement: engagement.as_deref().and_then(EngagementLevel::parse),
    }
}

/// Recomputes scoring fields for every subscriber of the user against `now`.
pub async fn rescore(
    pool: &PgPool,
    user_id: &str,
    now: DateTime<Utc>,
    batch: &BatchConfig,
) -> anyhow::Result<usize> {
    let batch = batch.normalized();
    let subscribers = fetch_all_subscribers(pool, user_id).await?;
    let rescored: Vec<(Uuid, ScoreResult)> = subscribers
        .iter()
        .map(|subscriber| {
            (
                subscriber.id,
                scoring::compute_engagement(&subscriber.snapshot(), now),
            )
        })
        .collect();

    let mut updated = 0usize;
    for chunk in rescored.chunks(batch.update_concurrency) {
        let affected = try_join_all(
            chunk
                .iter()
                .map(|(id, result)| write_score(pool, *id, result, now)),
        )
        .await
        .context("failed to write recomputed scores")?;
        updated += affected.iter().sum::<usize>();
    }

    info!(subscribers = subscribers.len(), updated, "rescored subscribers");
    Ok(updated)
}

async fn write_score(
    pool: &PgPool,
    id: Uuid,
    result: &ScoreResult,
    now: DateTime<Utc>,
) -> sqlx::Result<usize> {
    let outcome = sqlx::query(
        r#"
        UPDATE crm.subscribers
        SET rfm_score = $2, engagement_level = $3, churn_risk = $4, updated_at = $5
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(result.score)
    .bind(result.engagement.as_str())
    .bind(result.risk)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(outcome.rows_affected() as usize)
}

fn link_query<'args>(
    segment_id: Uuid,
    members: &'args [Uuid],
) -> QueryBuilder<'args, Postgres> {
    let mut builder =
        QueryBuilder::new("INSERT INTO crm.subscriber_segments (subscriber_id, segment_id) ");
    builder.push_values(members, |mut values, member| {
        values.push_bind(*member).push_bind(segment_id);
    });
    builder
}

/// Saves the filter as a manual segment and links every subscriber matching it
/// right now, across all pages.
pub async fn create_segment(
    pool: &PgPool,
    user_id: &str,
    name: &str,
    filter: &SubscriberFilter,
    batch: &BatchConfig,
) -> anyhow::Result<Segment> {
    let batch = batch.normalized();
    let criteria = serde_json::to_value(filter).context("failed to encode segment criteria")?;
    let description = format!("Auto-created from filters: {criteria}");

    let mut tx = pool.begin().await?;
    let row = sqlx::query(
        r#"
        INSERT INTO crm.segments (id, user_id, name, description, criteria, segment_type)
        VALUES ($1, $2, $3, $4, $5, 'manual')
        RETURNING id, name, description, segment_type, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(name)
    .bind(&description)
    .bind(&criteria)
    .fetch_one(&mut *tx)
    .await
    .context("failed to create segment")?;
    let segment_id: Uuid = row.get("id");

    let members: Vec<Uuid> = filtered_query("id", user_id, filter)
        .build()
        .fetch_all(&mut *tx)
        .await
        .context("failed to select segment members")?
        .iter()
        .map(|member| member.get("id"))
        .collect();

    for (index, chunk) in members.chunks(batch.insert_chunk_size).enumerate() {
        link_query(segment_id, chunk)
            .build()
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to link segment member chunk {}", index + 1))?;
    }
    tx.commit().await?;

    info!(%segment_id, members = members.len(), "created segment");
    Ok(Segment {
        id: segment_id,
        name: row.get("name"),
        description: row.get("description"),
        segment_type: row.get("segment_type"),
        member_count: members.len() as i64,
        created_at: row.get("created_at"),
    })
}

pub async fn list_segments(pool: &PgPool, user_id: &str) -> anyhow::Result<Vec<Segment>> {
    let rows = sqlx::query(
        r#"
        SELECT s.id, s.name, s.description, s.segment_type, s.created_at,
               COUNT(l.subscriber_id) AS member_count
        FROM crm.segments s
        LEFT JOIN crm.subscriber_segments l ON l.segment_id = s.id
        WHERE s.user_id = $1
        GROUP BY s.id
        ORDER BY s.created_at DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
    .context("failed to fetch segments")?;

    Ok(rows
        .iter()
        .map(|row| Segment {
            id: row.get("id"),
            name: row.get("name"),
            description: row.get("description"),
            segment_type: row.get("segment_type"),
            member_count: row.get("member_count"),
            created_at: row.get("created_at"),
        })
        .collect())
}

/// Links go with the segment. Returns false when the user owns no such segment.
pub async fn delete_segment(pool: &PgPool, user_id: &str, id: Uuid) -> anyhow::Result<bool> {
    let result = sqlx::query("DELETE FROM crm.segments WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await
        .context("failed to delete segment")?;
    Ok(result.rows_affected() > 0)
}
