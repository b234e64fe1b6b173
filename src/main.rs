use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use newsletter_crm_scoring::config::{
    BatchConfig, DEFAULT_INSERT_CHUNK_SIZE, DEFAULT_UPDATE_CONCURRENCY,
};
use newsletter_crm_scoring::db::{self, SubscriberFilter};
use newsletter_crm_scoring::models::{EngagementLevel, RiskBucket, SubscriberStatus};
use newsletter_crm_scoring::{import, reconcile, report};

#[derive(Parser)]
#[command(name = "crm-scoring")]
#[command(about = "Subscriber engagement scoring and CSV import for a newsletter CRM", long_about = None)]
struct Cli {
    /// Postgres connection string
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: String,

    /// Account that owns the subscriber list
    #[arg(long, env = "CRM_USER_ID")]
    user_id: String,

    /// Rows per INSERT statement
    #[arg(long, env = "CRM_INSERT_CHUNK_SIZE", default_value_t = DEFAULT_INSERT_CHUNK_SIZE)]
    insert_chunk_size: usize,

    /// UPDATE statements in flight at once
    #[arg(long, env = "CRM_UPDATE_CONCURRENCY", default_value_t = DEFAULT_UPDATE_CONCURRENCY)]
    update_concurrency: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load demo subscribers
    Seed,
    /// Import subscribers from a CSV export
    Import {
        #[arg(long)]
        csv: PathBuf,
        /// Reconcile and print counts without writing
        #[arg(long)]
        dry_run: bool,
    },
    /// Recompute engagement and churn risk for every subscriber
    Rescore,
    /// List subscribers
    List {
        #[command(flatten)]
        filters: FilterArgs,
        #[arg(long, default_value_t = 1)]
        page: i64,
        #[arg(long, default_value_t = 20)]
        limit: i64,
        #[arg(long)]
        json: bool,
    },
    /// Save the subscribers matching the filters as a segment
    CreateSegment {
        #[arg(long)]
        name: String,
        #[command(flatten)]
        filters: FilterArgs,
    },
    /// List saved segments
    Segments,
    /// Delete a segment; its members are untouched
    DeleteSegment { id: Uuid },
    /// Generate a markdown report
    Report {
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

#[derive(Args)]
struct FilterArgs {
    #[arg(long, value_enum)]
    status: Option<StatusArg>,
    #[arg(long, value_enum)]
    engagement: Option<LevelArg>,
    #[arg(long, value_enum)]
    risk: Option<LevelArg>,
    /// Substring match on email or name
    #[arg(long)]
    query: Option<String>,
    /// Only members of this segment
    #[arg(long)]
    segment: Option<Uuid>,
}

impl FilterArgs {
    fn into_filter(self, page: i64, limit: i64) -> SubscriberFilter {
        SubscriberFilter {
            status: self.status.map(Into::into),
            engagement: self.engagement.map(Into::into),
            risk: self.risk.map(Into::into),
            query: self.query,
            segment_id: self.segment,
            page,
            limit,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum StatusArg {
    Free,
    Paid,
    Comp,
}

impl From<StatusArg> for SubscriberStatus {
    fn from(value: StatusArg) -> Self {
        match value {
            StatusArg::Free => SubscriberStatus::Free,
            StatusArg::Paid => SubscriberStatus::Paid,
            StatusArg::Comp => SubscriberStatus::Comp,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum LevelArg {
    Low,
    Medium,
    High,
}

impl From<LevelArg> for EngagementLevel {
    fn from(value: LevelArg) -> Self {
        match value {
            LevelArg::Low => EngagementLevel::Low,
            LevelArg::Medium => EngagementLevel::Medium,
            LevelArg::High => EngagementLevel::High,
        }
    }
}

impl From<LevelArg> for RiskBucket {
    fn from(value: LevelArg) -> Self {
        match value {
            LevelArg::Low => RiskBucket::Low,
            LevelArg::Medium => RiskBucket::Medium,
            LevelArg::High => RiskBucket::High,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "newsletter_crm_scoring=info,crm_scoring=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let batch = BatchConfig::new(cli.insert_chunk_size, cli.update_concurrency);

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&cli.database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let summary = db::seed(&pool, &cli.user_id, Utc::now(), &batch).await?;
            println!("{}", summary.message());
        }
        Commands::Import { csv, dry_run } => {
            let parsed = import::read_csv(&csv)
                .with_context(|| format!("failed to import {}", csv.display()))?;
            info!(
                rows = parsed.records.len(),
                row_errors = parsed.row_errors,
                "read {}",
                csv.display()
            );

            let existing = db::fetch_existing_index(&pool, &cli.user_id).await?;
            let plan = reconcile::reconcile(&parsed.records, &existing, Utc::now());

            let summary = if dry_run {
                plan.planned_summary()
            } else {
                db::persist(&pool, &cli.user_id, &plan, &batch).await?
            };
            println!("{}", summary.message());
            if summary.skipped_count > 0 {
                println!("Skipped {} rows without an email.", summary.skipped_count);
            }
        }
        Commands::Rescore => {
            let updated = db::rescore(&pool, &cli.user_id, Utc::now(), &batch).await?;
            println!("Rescored {updated} subscribers.");
        }
        Commands::List {
            filters,
            page,
            limit,
            json,
        } => {
            let filter = filters.into_filter(page, limit);
            let listing = db::fetch_subscribers(&pool, &cli.user_id, &filter).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&listing)?);
                return Ok(());
            }
            if listing.subscribers.is_empty() {
                println!("No subscribers match these filters.");
                return Ok(());
            }
            println!(
                "Showing {} of {} subscribers.",
                listing.subscribers.len(),
                listing.total
            );
            for subscriber in listing.subscribers.iter() {
                println!(
                    "- {} ({}, {}) score {} engagement {} risk {}%",
                    subscriber.name.as_deref().unwrap_or("-"),
                    subscriber.email,
                    subscriber.status.as_str(),
                    subscriber.rfm_score,
                    subscriber.engagement.map_or("unscored", EngagementLevel::as_str),
                    subscriber.churn_risk
                );
            }
        }
        Commands::CreateSegment { name, filters } => {
            let filter = filters.into_filter(1, 1);
            let segment =
                db::create_segment(&pool, &cli.user_id, &name, &filter, &batch).await?;
            println!(
                "Created segment {} ({}) with {} subscribers.",
                segment.name, segment.id, segment.member_count
            );
        }
        Commands::Segments => {
            let segments = db::list_segments(&pool, &cli.user_id).await?;
            if segments.is_empty() {
                println!("No segments yet.");
            }
            for segment in segments.iter() {
                println!(
                    "- {} ({}) {} subscribers, created {}",
                    segment.name,
                    segment.id,
                    segment.member_count,
                    segment.created_at.format("%Y-%m-%d")
                );
            }
        }
        Commands::DeleteSegment { id } => {
            if db::delete_segment(&pool, &cli.user_id, id).await? {
                println!("Segment {id} deleted.");
            } else {
                println!("No segment {id} for this account.");
            }
        }
        Commands::Report { out } => {
            let subscribers = db::fetch_all_subscribers(&pool, &cli.user_id).await?;
            let report = report::build_report(Some(&cli.user_id), Utc::now(), &subscribers);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
