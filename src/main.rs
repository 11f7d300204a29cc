//! Tracking - operator CLI for the activity tracking engine
//!
//! Initializes the tracker database, records single events, and prints
//! content and user trackers as JSON.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, Level};
use tracing_subscriber::{self, EnvFilter};
use tracking_core::{
    error::Result,
    parse_stats_date, Actor, ContentKind, LibsqlTrackerStore, MemoryDirectory,
    MemoryTrackerStore, OperationKind, RangeQueryResolver, TrackerStore, TrackingConfig,
    TrackingEngine, TrackingEvent, Vote,
};

#[derive(Parser)]
#[command(name = "tracking")]
#[command(about = "Attribution and aggregation of post, comment and user activity", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Set log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Database path, `:memory:` or libsql:// URL (overrides the config file)
    #[arg(long, env = "TRACKING_DB_PATH")]
    db_path: Option<String>,

    /// Configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and apply migrations
    Init,

    /// Record one event
    Record {
        /// create-content, update-content, create-comment or update-comment
        #[arg(long)]
        operation: String,

        /// Acting user; omit for an anonymous visitor
        #[arg(long)]
        actor: Option<String>,

        /// Author of the post (post events) or comment (comment events)
        #[arg(long)]
        owner: Option<String>,

        /// Post or comment id
        #[arg(long)]
        content_id: String,

        /// Parent post of a comment
        #[arg(long)]
        parent_id: Option<String>,

        /// up or down
        #[arg(long)]
        vote: Option<String>,

        #[arg(long, default_value = "0")]
        views: u64,

        #[arg(long, default_value = "0")]
        opens: u64,

        /// Author of the parent post, registered in the directory
        #[arg(long)]
        parent_owner: Option<String>,

        /// Author of the comment, registered in the directory
        #[arg(long)]
        comment_owner: Option<String>,

        /// Day to record against (yyMMdd); defaults to today (UTC)
        #[arg(long)]
        date: Option<String>,

        /// Run against an in-memory store and print the outcome
        #[arg(long)]
        dry_run: bool,
    },

    /// Print content trackers as JSON
    Content {
        /// post or comment
        #[arg(long, default_value = "post")]
        kind: String,

        #[arg(long)]
        id: String,

        /// Window start (yyMMdd or yyMM)
        #[arg(long)]
        start: Option<String>,

        /// Window end (yyMMdd or yyMM)
        #[arg(long)]
        end: Option<String>,
    },

    /// Print user trackers as JSON
    User {
        #[arg(long)]
        id: String,

        /// Window start (yyMMdd or yyMM)
        #[arg(long)]
        start: Option<String>,

        /// Window end (yyMMdd or yyMM)
        #[arg(long)]
        end: Option<String>,
    },
}

/// Open the configured libSQL store
async fn open_store(config: &TrackingConfig, create_if_missing: bool) -> Result<Arc<LibsqlTrackerStore>> {
    let mode = config.connection_mode()?;
    debug!("Opening store: {:?}", mode);
    let store =
        LibsqlTrackerStore::new_with_validation(mode, create_if_missing, config.busy_timeout())
            .await?;
    Ok(Arc::new(store))
}

fn parse_optional_date(value: Option<String>) -> Result<Option<chrono::NaiveDate>> {
    value.as_deref().map(parse_stats_date).transpose()
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::new(format!(
        "tracking={level},tracking_core={level}",
        level = level.as_str().to_lowercase()
    ));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr) // Write logs to stderr, not stdout
        .init();

    debug!("Tracking v{} starting...", env!("CARGO_PKG_VERSION"));

    let mut config = TrackingConfig::load(cli.config.as_deref())?;
    if let Some(db_path) = cli.db_path.clone() {
        config.database.path = Some(db_path);
    }

    match cli.command {
        Commands::Init => {
            let path = config.database_path();
            debug!("Initializing database at {}", path);
            let store = open_store(&config, true).await?;
            store.check_database_health().await?;
            let migrations = store.applied_migrations().await?;
            println!("✓ Database initialized: {} ({} migrations)", path, migrations.len());
            Ok(())
        }
        Commands::Record {
            operation,
            actor,
            owner,
            content_id,
            parent_id,
            vote,
            views,
            opens,
            parent_owner,
            comment_owner,
            date,
            dry_run,
        } => {
            let operation: OperationKind = operation.parse()?;
            let vote = vote.as_deref().map(str::parse::<Vote>).transpose()?;
            let actor = match actor {
                Some(id) => Actor::User(id),
                None => Actor::Anonymous,
            };
            let content_owner_id = owner
                .or_else(|| actor.user_id().map(str::to_string))
                .unwrap_or_default();

            let event = TrackingEvent {
                operation,
                actor,
                content_owner_id: content_owner_id.clone(),
                content_kind: operation.content_kind(),
                is_new_content: operation.is_create(),
                content_id: content_id.clone(),
                parent_content_id: parent_id.clone(),
                vote,
                view_count: views,
                open_count: opens,
            };

            let directory = MemoryDirectory::new();
            if let (Some(post_id), Some(author)) = (parent_id, parent_owner) {
                directory.register_post(post_id, author).await;
            }
            if operation == OperationKind::UpdateComment {
                let author = comment_owner.unwrap_or(content_owner_id);
                directory.register_comment(content_id, author).await;
            }

            let store: Arc<dyn TrackerStore> = if dry_run {
                info!("Dry run: recording against an in-memory store");
                Arc::new(MemoryTrackerStore::new())
            } else {
                open_store(&config, false).await?
            };

            let engine = TrackingEngine::new(store, Arc::new(directory));
            let outcome = match parse_optional_date(date)? {
                Some(day) => engine.record_at(&event, day).await?,
                None => engine.record(&event).await?,
            };
            print_json(&outcome)
        }
        Commands::Content {
            kind,
            id,
            start,
            end,
        } => {
            let kind: ContentKind = kind.parse()?;
            let store = open_store(&config, false).await?;
            let resolver =
                RangeQueryResolver::with_max_range_days(store, config.query.max_range_days);
            let selection = resolver
                .fetch_content_tracker(
                    kind,
                    &id,
                    parse_optional_date(start)?,
                    parse_optional_date(end)?,
                )
                .await?;
            print_json(&selection)
        }
        Commands::User { id, start, end } => {
            let store = open_store(&config, false).await?;
            let resolver =
                RangeQueryResolver::with_max_range_days(store, config.query.max_range_days);
            let selection = resolver
                .fetch_user_tracker(&id, parse_optional_date(start)?, parse_optional_date(end)?)
                .await?;
            print_json(&selection)
        }
    }
}
