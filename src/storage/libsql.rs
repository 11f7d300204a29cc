//! LibSQL storage backend implementation
//!
//! Provides persistent tracker storage using Turso/libSQL. Post and comment
//! trackers are one row per day; user trackers are one monthly row plus one
//! row per day slot, written together in a single transaction.

use crate::counters::{CommentCounter, PostCounter, UserCounter, UserCounters};
use crate::error::{Result, TrackingError};
use crate::keys::TrackerKey;
use crate::storage::{check_range, check_template, CounterBatch, TrackerStore};
use crate::types::{
    ContentCounters, ContentKind, ContentTracker, CounterUpdate, TrackerKind, TrackerTemplate,
    UserTracker,
};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use libsql::{params, Builder, Connection, Database, Value};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Schema migrations, applied in order and recorded in `_migrations_applied`
const MIGRATIONS: &[(&str, &str)] = &[(
    "001_tracker_schema.sql",
    include_str!("../../migrations/libsql/001_tracker_schema.sql"),
)];

/// Busy timeout used when none is configured
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Parse SQL file into individual statements
fn parse_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();

    for line in sql.lines() {
        let trimmed = line.trim();

        if current.is_empty() && (trimmed.is_empty() || trimmed.starts_with("--")) {
            continue;
        }

        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);

        if trimmed.ends_with(';') {
            statements.push(current.clone());
            current.clear();
        }
    }

    if !current.trim().is_empty() {
        statements.push(current);
    }

    statements
}

/// Database connection mode
#[derive(Debug, Clone)]
pub enum ConnectionMode {
    /// Local file-based database
    Local(String),
    /// In-memory database (for testing)
    InMemory,
    /// Remote database (Turso Cloud)
    Remote { url: String, token: String },
    /// Embedded replica with sync
    EmbeddedReplica {
        path: String,
        url: String,
        token: String,
    },
}

impl ConnectionMode {
    /// Interpret a database location string.
    ///
    /// - ":memory:" → InMemory
    /// - "libsql://..." → Remote, with the token read from `token_env`
    /// - Other → Local file path
    pub fn from_location(location: &str, token_env: &str) -> Result<Self> {
        if location == ":memory:" {
            Ok(ConnectionMode::InMemory)
        } else if location.starts_with("libsql://") {
            let token = std::env::var(token_env)
                .map_err(|_| TrackingError::Other(format!("{} not found", token_env)))?;
            Ok(ConnectionMode::Remote {
                url: location.to_string(),
                token,
            })
        } else {
            Ok(ConnectionMode::Local(location.to_string()))
        }
    }
}

/// Table layout of one content tracker kind
struct ContentTable {
    table: &'static str,
    id_column: &'static str,
    columns: Vec<&'static str>,
}

fn content_table(kind: ContentKind) -> ContentTable {
    match kind {
        ContentKind::Post => ContentTable {
            table: "post_trackers",
            id_column: "post_id",
            columns: PostCounter::ALL.iter().map(|c| c.column()).collect(),
        },
        ContentKind::Comment => ContentTable {
            table: "comment_trackers",
            id_column: "comment_id",
            columns: CommentCounter::ALL.iter().map(|c| c.column()).collect(),
        },
    }
}

fn user_columns() -> Vec<&'static str> {
    UserCounter::ALL.iter().map(|c| c.column()).collect()
}

/// `0, 0, ...` with one zero per column
fn zeros(count: usize) -> String {
    vec!["0"; count].join(", ")
}

fn content_kind(key: &TrackerKey) -> Result<ContentKind> {
    match key.kind() {
        TrackerKind::Post => Ok(ContentKind::Post),
        TrackerKind::Comment => Ok(ContentKind::Comment),
        TrackerKind::User => Err(TrackingError::InvariantViolation(format!(
            "{} is a user key, not a content key",
            key.id()
        ))),
    }
}

fn parse_day(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| TrackingError::Database(format!("Invalid stored date '{}': {}", value, e)))
}

/// Read one counter column, rejecting anything SQLite did not store as an integer
fn read_counter(row: &libsql::Row, idx: i32) -> Result<i64> {
    match row.get_value(idx)? {
        Value::Integer(value) => Ok(value),
        other => Err(TrackingError::Database(format!(
            "Counter column {} holds {:?} instead of an integer",
            idx, other
        ))),
    }
}

/// Read `UserCounter::ALL.len()` integer columns starting at `offset`
fn read_user_counters(row: &libsql::Row, offset: i32) -> Result<UserCounters> {
    let mut counters = UserCounters::default();
    for (i, counter) in UserCounter::ALL.iter().enumerate() {
        counters.set(*counter, read_counter(row, offset + i as i32)?);
    }
    Ok(counters)
}

/// LibSQL tracker store
///
/// Statements go through a single connection guarded by an async mutex:
/// SQLite has one writer anyway, and an in-memory database only lives as
/// long as its connection.
pub struct LibsqlTrackerStore {
    _db: Database,
    conn: Mutex<Connection>,
}

impl LibsqlTrackerStore {
    /// Validate database file before opening
    ///
    /// # Returns
    /// * `Ok(true)` if database exists and is valid
    /// * `Ok(false)` if database doesn't exist and must_exist=false
    /// * `Err(TrackingError)` with actionable message if validation fails
    fn validate_database_file(db_path: &str, must_exist: bool) -> Result<bool> {
        use std::fs;
        use std::path::Path;

        let path = Path::new(db_path);

        if !path.exists() {
            if must_exist {
                return Err(TrackingError::Database(format!(
                    "Database file not found at '{}'. Please run 'tracking init' first or check the configured database path.",
                    db_path
                )));
            }
            return Ok(false);
        }

        // SQLite files start with "SQLite format 3\0" (16 bytes). A fresh file
        // created by libsql may still be empty until the first write.
        match fs::read(path) {
            Ok(bytes) => {
                if bytes.is_empty() {
                    return Ok(true);
                }
                if bytes.len() < 16 || &bytes[0..16] != b"SQLite format 3\0" {
                    return Err(TrackingError::Database(format!(
                        "Database file at '{}' is corrupted or not a valid SQLite database. Please delete it and run 'tracking init' to reinitialize.",
                        db_path
                    )));
                }

                debug!("Database file validation passed: {}", db_path);
                Ok(true)
            }
            Err(e) => {
                let error_msg = e.to_string();
                if error_msg.contains("permission") || error_msg.contains("Permission") {
                    Err(TrackingError::Database(format!(
                        "Cannot read database file at '{}': Permission denied. Please check file permissions.",
                        db_path
                    )))
                } else {
                    Err(TrackingError::Database(format!(
                        "Cannot read database file at '{}': {}. The file may be corrupted or inaccessible.",
                        db_path, e
                    )))
                }
            }
        }
    }

    /// Create a new tracker store with validation
    ///
    /// # Arguments
    /// * `mode` - Connection mode (local, in-memory, remote, or replica)
    /// * `create_if_missing` - If true, create database if it doesn't exist. If false, error on missing database.
    /// * `busy_timeout` - How long a file database waits on a lock held by another process
    pub async fn new_with_validation(
        mode: ConnectionMode,
        create_if_missing: bool,
        busy_timeout: Duration,
    ) -> Result<Self> {
        info!(
            "Connecting to LibSQL database: {:?} (create_if_missing: {})",
            mode, create_if_missing
        );

        match &mode {
            ConnectionMode::Local(path) | ConnectionMode::EmbeddedReplica { path, .. } => {
                let exists = Self::validate_database_file(path, !create_if_missing)?;
                if create_if_missing && !exists {
                    if let Some(parent) = std::path::Path::new(path).parent() {
                        if !parent.as_os_str().is_empty() {
                            std::fs::create_dir_all(parent).map_err(|e| {
                                TrackingError::Database(format!(
                                    "Failed to create database directory {}: {}",
                                    parent.display(),
                                    e
                                ))
                            })?;
                        }
                    }
                }
            }
            ConnectionMode::InMemory | ConnectionMode::Remote { .. } => {
                // Remote validation happens server-side
            }
        }

        let db = match &mode {
            ConnectionMode::Local(path) => Builder::new_local(path).build().await.map_err(|e| {
                TrackingError::Database(format!("Failed to create local database: {}", e))
            })?,
            ConnectionMode::InMemory => {
                Builder::new_local(":memory:").build().await.map_err(|e| {
                    TrackingError::Database(format!("Failed to create in-memory database: {}", e))
                })?
            }
            ConnectionMode::Remote { url, token } => {
                Builder::new_remote(url.clone(), token.clone())
                    .build()
                    .await
                    .map_err(|e| {
                        TrackingError::Database(format!("Failed to create remote database: {}", e))
                    })?
            }
            ConnectionMode::EmbeddedReplica { path, url, token } => {
                Builder::new_remote_replica(path, url.clone(), token.clone())
                    .build()
                    .await
                    .map_err(|e| {
                        TrackingError::Database(format!("Failed to create embedded replica: {}", e))
                    })?
            }
        };

        let conn = db
            .connect()
            .map_err(|e| TrackingError::Database(format!("Failed to get connection: {}", e)))?;

        if let ConnectionMode::Local(_) | ConnectionMode::EmbeddedReplica { .. } = &mode {
            let pragma = format!("PRAGMA busy_timeout = {}", busy_timeout.as_millis());
            conn.query(&pragma, params![]).await.map_err(|e| {
                TrackingError::Database(format!("Failed to set busy timeout: {}", e))
            })?;
        }

        info!("LibSQL database connection established");

        let store = Self {
            _db: db,
            conn: Mutex::new(conn),
        };

        store.verify_database_health().await?;
        store.run_migrations().await?;

        Ok(store)
    }

    /// Open an existing database
    ///
    /// Errors if a local database file does not exist yet; use
    /// `new_with_validation(..., true, ...)` to create one.
    pub async fn new(mode: ConnectionMode) -> Result<Self> {
        Self::new_with_validation(mode, false, DEFAULT_BUSY_TIMEOUT).await
    }

    /// Open a fresh in-memory database with the schema applied
    pub async fn in_memory() -> Result<Self> {
        Self::new_with_validation(ConnectionMode::InMemory, true, DEFAULT_BUSY_TIMEOUT).await
    }

    /// Open or create a local file database
    pub async fn open_local(path: &str) -> Result<Self> {
        Self::new_with_validation(
            ConnectionMode::Local(path.to_string()),
            true,
            DEFAULT_BUSY_TIMEOUT,
        )
        .await
    }

    /// Verify database health before operations
    async fn verify_database_health(&self) -> Result<()> {
        let conn = self.conn.lock().await;

        conn.query("SELECT 1", params![]).await.map_err(|e| {
            TrackingError::Database(format!(
                "Database corruption detected or invalid database file: {}",
                e
            ))
        })?;

        let write_test = r#"
            CREATE TABLE IF NOT EXISTS _health_check (id INTEGER PRIMARY KEY);
            DROP TABLE IF EXISTS _health_check;
        "#;

        if let Err(e) = conn.execute_batch(write_test).await {
            let error_msg = e.to_string().to_lowercase();
            if error_msg.contains("read") && error_msg.contains("only")
                || error_msg.contains("readonly")
                || error_msg.contains("permission")
            {
                return Err(TrackingError::Database(format!(
                    "Database is read-only or lacks write permissions: {}",
                    e
                )));
            }
            return Err(TrackingError::Database(format!(
                "Database write test failed: {}",
                e
            )));
        }

        debug!("Database health check passed");
        Ok(())
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations...");
        let conn = self.conn.lock().await;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations_applied (
                migration_name TEXT PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )",
            params![],
        )
        .await
        .map_err(|e| TrackingError::Migration(format!("Failed to create migrations table: {}", e)))?;

        for (migration_name, sql) in MIGRATIONS {
            let mut rows = conn
                .query(
                    "SELECT COUNT(*) FROM _migrations_applied WHERE migration_name = ?",
                    params![*migration_name],
                )
                .await?;

            let already_applied = match rows.next().await? {
                Some(row) => row.get::<i64>(0)?,
                None => 0,
            };

            if already_applied > 0 {
                debug!("Skipping already applied migration: {}", migration_name);
                continue;
            }

            let statements = parse_sql_statements(sql);
            debug!("Parsed {} statements from {}", statements.len(), migration_name);

            let tx = conn.transaction().await?;
            for (i, statement) in statements.iter().enumerate() {
                let statement = statement.trim();
                if statement.is_empty() {
                    continue;
                }
                tx.execute(statement, params![]).await.map_err(|e| {
                    TrackingError::Migration(format!(
                        "Failed to execute statement #{} in {}: {}\nStatement: {}",
                        i + 1,
                        migration_name,
                        e,
                        &statement[..statement.len().min(300)]
                    ))
                })?;
            }

            tx.execute(
                "INSERT INTO _migrations_applied (migration_name, applied_at) VALUES (?, ?)",
                params![*migration_name, Utc::now().timestamp()],
            )
            .await
            .map_err(|e| TrackingError::Migration(format!("Failed to record migration: {}", e)))?;

            tx.commit()
                .await
                .map_err(|e| TrackingError::Migration(format!("Failed to commit {}: {}", migration_name, e)))?;

            info!("Executed migration: {}", migration_name);
        }

        info!("Database migrations completed");
        Ok(())
    }

    /// Check if database is healthy and operational
    pub async fn check_database_health(&self) -> Result<()> {
        debug!("Checking database health...");
        let conn = self.conn.lock().await;

        match conn.query("SELECT COUNT(*) FROM _migrations_applied", params![]).await {
            Ok(_) => {
                debug!("Database health check passed");
                Ok(())
            }
            Err(e) => {
                let error_msg = e.to_string();
                if error_msg.contains("readonly") || error_msg.contains("permission") {
                    Err(TrackingError::Database(
                        "Database is read-only or permission denied. Check file permissions."
                            .to_string(),
                    ))
                } else if error_msg.contains("corrupt") || error_msg.contains("malformed") {
                    Err(TrackingError::Database(
                        "Database appears to be corrupted. Consider restoring from backup."
                            .to_string(),
                    ))
                } else {
                    Err(TrackingError::Database(format!(
                        "Health check failed: {}",
                        error_msg
                    )))
                }
            }
        }
    }

    /// Names of the migrations recorded as applied
    pub async fn applied_migrations(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT migration_name FROM _migrations_applied ORDER BY migration_name",
                params![],
            )
            .await?;
        let mut names = Vec::new();
        while let Some(row) = rows.next().await? {
            names.push(row.get::<String>(0)?);
        }
        Ok(names)
    }

    fn row_to_content(kind: ContentKind, row: &libsql::Row) -> Result<ContentTracker> {
        let id: String = row.get(0)?;
        let content_id: String = row.get(1)?;
        let owner_id: String = row.get(2)?;
        let day: String = row.get(3)?;

        let mut counters = ContentCounters::zero(kind);
        match &mut counters {
            ContentCounters::Post(c) => {
                for (i, counter) in PostCounter::ALL.iter().enumerate() {
                    c.set(*counter, read_counter(row, 4 + i as i32)?);
                }
            }
            ContentCounters::Comment(c) => {
                for (i, counter) in CommentCounter::ALL.iter().enumerate() {
                    c.set(*counter, read_counter(row, 4 + i as i32)?);
                }
            }
        }

        Ok(ContentTracker {
            id,
            kind,
            content_id,
            owner_id,
            day: parse_day(&day)?,
            counters,
        })
    }

    fn content_select(kind: ContentKind) -> String {
        let table = content_table(kind);
        format!(
            "SELECT id, {}, author_id, day, {} FROM {}",
            table.id_column,
            table.columns.join(", "),
            table.table
        )
    }

    fn user_select() -> String {
        format!(
            "SELECT id, user_id, month, days_in_month, {} FROM user_trackers",
            user_columns().join(", ")
        )
    }

    /// Decode a monthly row; day slots start zeroed until `load_days`
    fn row_to_user(row: &libsql::Row) -> Result<UserTracker> {
        let id: String = row.get(0)?;
        let user_id: String = row.get(1)?;
        let month: String = row.get(2)?;
        let days_in_month = row.get::<i64>(3)? as u32;

        let mut tracker = UserTracker::zero(id, user_id, parse_day(&month)?, days_in_month);
        tracker.monthly = read_user_counters(row, 4)?;
        Ok(tracker)
    }

    async fn load_days(conn: &Connection, tracker: &mut UserTracker) -> Result<()> {
        let sql = format!(
            "SELECT day, {} FROM user_tracker_days WHERE tracker_id = ? ORDER BY day ASC",
            user_columns().join(", ")
        );
        let mut rows = conn.query(&sql, params![tracker.id.as_str()]).await?;
        while let Some(row) = rows.next().await? {
            let day = row.get::<i64>(0)?;
            let counters = read_user_counters(&row, 1)?;
            let slot = usize::try_from(day - 1).ok().and_then(|i| tracker.days.get_mut(i));
            match slot {
                Some(existing) => *existing = counters,
                None => {
                    return Err(TrackingError::Database(format!(
                        "Tracker {} has day slot {} beyond its {} days",
                        tracker.id, day, tracker.days_in_month
                    )))
                }
            }
        }
        Ok(())
    }

    /// Run `UPDATE table SET c = c + ? ... WHERE <filter>` inside a transaction.
    ///
    /// Rows where a positive delta would push a column past `i64::MAX` are left
    /// alone; SQLite would otherwise store the sum as a REAL.
    async fn apply_deltas(
        tx: &libsql::Transaction,
        table: &str,
        filter: &str,
        deltas: &[(&'static str, i64)],
        filter_values: Vec<Value>,
    ) -> std::result::Result<u64, libsql::Error> {
        let set_clause = deltas
            .iter()
            .map(|(column, _)| format!("{column} = {column} + ?"))
            .collect::<Vec<_>>()
            .join(", ");
        let guards = deltas
            .iter()
            .filter(|(_, d)| *d > 0)
            .map(|(column, _)| format!(" AND {column} <= {} - ?", i64::MAX))
            .collect::<String>();
        let sql = format!(
            "UPDATE {} SET {} WHERE {}{}",
            table, set_clause, filter, guards
        );

        let mut values: Vec<Value> = deltas.iter().map(|(_, d)| Value::Integer(*d)).collect();
        values.extend(filter_values);
        values.extend(
            deltas
                .iter()
                .filter(|(_, d)| *d > 0)
                .map(|(_, d)| Value::Integer(*d)),
        );

        tx.execute(&sql, libsql::params_from_iter(values)).await
    }

    async fn row_exists(
        tx: &libsql::Transaction,
        table: &str,
        id: &str,
    ) -> std::result::Result<bool, libsql::Error> {
        let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
        let mut rows = tx.query(&sql, params![id]).await?;
        Ok(rows.next().await?.is_some())
    }
}

#[async_trait]
impl TrackerStore for LibsqlTrackerStore {
    async fn ensure_exists(&self, key: &TrackerKey, template: &TrackerTemplate) -> Result<bool> {
        check_template(key, template)?;
        let storage_err = |e: libsql::Error| TrackingError::storage(key.id(), e.to_string());
        let now = Utc::now().timestamp();

        let conn = self.conn.lock().await;
        let tx = conn.transaction().await.map_err(storage_err)?;

        let created = match template {
            TrackerTemplate::User { user_id } => {
                let columns = user_columns();
                let sql = format!(
                    "INSERT INTO user_trackers (id, user_id, month, days_in_month, {}, created_at)
                     VALUES (?, ?, ?, ?, {}, ?) ON CONFLICT(id) DO NOTHING",
                    columns.join(", "),
                    zeros(columns.len())
                );
                let inserted = tx
                    .execute(
                        &sql,
                        params![
                            key.id(),
                            user_id.as_str(),
                            key.period_start().to_string(),
                            key.days_in_month() as i64,
                            now
                        ],
                    )
                    .await
                    .map_err(storage_err)?;

                if inserted > 0 {
                    let day_sql = format!(
                        "INSERT INTO user_tracker_days (tracker_id, day, {}) VALUES (?, ?, {})",
                        columns.join(", "),
                        zeros(columns.len())
                    );
                    for day in 1..=key.days_in_month() {
                        tx.execute(&day_sql, params![key.id(), day as i64])
                            .await
                            .map_err(storage_err)?;
                    }
                }
                inserted > 0
            }
            TrackerTemplate::Post { author_id, .. } | TrackerTemplate::Comment { author_id, .. } => {
                let table = content_table(content_kind(key)?);
                let sql = format!(
                    "INSERT INTO {} (id, {}, author_id, day, {}, created_at)
                     VALUES (?, ?, ?, ?, {}, ?) ON CONFLICT(id) DO NOTHING",
                    table.table,
                    table.id_column,
                    table.columns.join(", "),
                    zeros(table.columns.len())
                );
                let inserted = tx
                    .execute(
                        &sql,
                        params![
                            key.id(),
                            key.entity_id(),
                            author_id.as_str(),
                            key.period_start().to_string(),
                            now
                        ],
                    )
                    .await
                    .map_err(storage_err)?;
                inserted > 0
            }
        };

        tx.commit().await.map_err(storage_err)?;

        debug!("ensure_exists {} {} created={}", key.kind(), key.id(), created);
        Ok(created)
    }

    async fn increment(&self, key: &TrackerKey, updates: &[CounterUpdate]) -> Result<()> {
        let batch = CounterBatch::for_key(key, updates)?;
        if batch.is_empty() {
            return Ok(());
        }
        let deltas = batch.columns();
        let storage_err = |e: libsql::Error| TrackingError::storage(key.id(), e.to_string());

        let conn = self.conn.lock().await;
        let tx = conn.transaction().await.map_err(storage_err)?;

        let (table, missing) = match key.kind() {
            TrackerKind::User => ("user_trackers", "user tracker was not preallocated"),
            TrackerKind::Post => ("post_trackers", "post tracker was not preallocated"),
            TrackerKind::Comment => ("comment_trackers", "comment tracker was not preallocated"),
        };

        let changed = Self::apply_deltas(
            &tx,
            table,
            "id = ?",
            &deltas,
            vec![Value::Text(key.id().to_string())],
        )
        .await
        .map_err(storage_err)?;

        if changed == 0 {
            let exists = Self::row_exists(&tx, table, key.id())
                .await
                .map_err(storage_err)?;
            tx.rollback().await.map_err(storage_err)?;
            if exists {
                warn!("Increment on {} would overflow a counter", key.id());
                return Err(TrackingError::storage(
                    key.id(),
                    "increment would overflow a counter",
                ));
            }
            return Err(TrackingError::storage(key.id(), missing));
        }

        if key.kind() == TrackerKind::User {
            let changed = Self::apply_deltas(
                &tx,
                "user_tracker_days",
                "tracker_id = ? AND day = ?",
                &deltas,
                vec![
                    Value::Text(key.id().to_string()),
                    Value::Integer(key.day_of_month() as i64),
                ],
            )
            .await
            .map_err(storage_err)?;

            if changed == 0 {
                warn!(
                    "Tracker {} has no day slot {} or it would overflow",
                    key.id(),
                    key.day_of_month()
                );
                tx.rollback().await.map_err(storage_err)?;
                return Err(TrackingError::storage(
                    key.id(),
                    format!("day slot {} is missing or would overflow", key.day_of_month()),
                ));
            }
        }

        tx.commit().await.map_err(storage_err)?;

        debug!("Incremented {} {} ({} columns)", key.kind(), key.id(), deltas.len());
        Ok(())
    }

    async fn get_content(&self, key: &TrackerKey) -> Result<Option<ContentTracker>> {
        let kind = content_kind(key)?;
        let sql = format!("{} WHERE id = ?", Self::content_select(kind));

        let conn = self.conn.lock().await;
        let mut rows = conn.query(&sql, params![key.id()]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Self::row_to_content(kind, &row)?)),
            None => Ok(None),
        }
    }

    async fn get_user(&self, key: &TrackerKey) -> Result<Option<UserTracker>> {
        if key.kind() != TrackerKind::User {
            return Err(TrackingError::InvariantViolation(format!(
                "{} is not a user key",
                key.id()
            )));
        }
        let sql = format!("{} WHERE id = ?", Self::user_select());

        let conn = self.conn.lock().await;
        let mut rows = conn.query(&sql, params![key.id()]).await?;
        let mut tracker = match rows.next().await? {
            Some(row) => Self::row_to_user(&row)?,
            None => return Ok(None),
        };
        drop(rows);

        Self::load_days(&conn, &mut tracker).await?;
        Ok(Some(tracker))
    }

    async fn range_content(
        &self,
        kind: ContentKind,
        entity_id: &str,
        from: &TrackerKey,
        to: &TrackerKey,
    ) -> Result<Vec<ContentTracker>> {
        check_range(kind.tracker_kind(), entity_id, from, to)?;
        let table = content_table(kind);
        let sql = format!(
            "{} WHERE {} = ? AND id >= ? AND id <= ? ORDER BY id ASC",
            Self::content_select(kind),
            table.id_column
        );

        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(&sql, params![entity_id, from.id(), to.id()])
            .await?;

        let mut trackers = Vec::new();
        while let Some(row) = rows.next().await? {
            trackers.push(Self::row_to_content(kind, &row)?);
        }
        debug!(
            "Range {} {}..={} returned {} trackers",
            kind.tracker_kind(),
            from.id(),
            to.id(),
            trackers.len()
        );
        Ok(trackers)
    }

    async fn range_user(
        &self,
        entity_id: &str,
        from: &TrackerKey,
        to: &TrackerKey,
    ) -> Result<Vec<UserTracker>> {
        check_range(TrackerKind::User, entity_id, from, to)?;
        let sql = format!(
            "{} WHERE user_id = ? AND id >= ? AND id <= ? ORDER BY id ASC",
            Self::user_select()
        );

        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(&sql, params![entity_id, from.id(), to.id()])
            .await?;

        let mut trackers = Vec::new();
        while let Some(row) = rows.next().await? {
            trackers.push(Self::row_to_user(&row)?);
        }
        drop(rows);

        for tracker in trackers.iter_mut() {
            Self::load_days(&conn, tracker).await?;
        }
        debug!(
            "Range user {}..={} returned {} trackers",
            from.id(),
            to.id(),
            trackers.len()
        );
        Ok(trackers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::build_key;
    use std::collections::HashSet;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 2, d).unwrap()
    }

    #[test]
    fn test_parse_sql_statements() {
        let sql = "-- comment\nCREATE TABLE a (\n  id TEXT\n);\n\nCREATE INDEX i ON a(id);\n";
        let statements = parse_sql_statements(sql);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].starts_with("CREATE TABLE a"));
    }

    #[test]
    fn test_connection_mode_from_location() {
        assert!(matches!(
            ConnectionMode::from_location(":memory:", "UNUSED").unwrap(),
            ConnectionMode::InMemory
        ));
        assert!(matches!(
            ConnectionMode::from_location("/tmp/t.db", "UNUSED").unwrap(),
            ConnectionMode::Local(_)
        ));
        assert!(ConnectionMode::from_location(
            "libsql://example.turso.io",
            "TRACKING_TEST_TOKEN_THAT_IS_NOT_SET"
        )
        .is_err());
    }

    #[tokio::test]
    async fn test_schema_columns_match_counters() {
        let store = LibsqlTrackerStore::in_memory().await.unwrap();
        let conn = store.conn.lock().await;

        let expected: Vec<(&str, Vec<&str>)> = vec![
            ("post_trackers", PostCounter::ALL.iter().map(|c| c.column()).collect()),
            ("comment_trackers", CommentCounter::ALL.iter().map(|c| c.column()).collect()),
            ("user_trackers", user_columns()),
            ("user_tracker_days", user_columns()),
        ];

        for (table, columns) in expected {
            let mut rows = conn
                .query(&format!("PRAGMA table_info({})", table), params![])
                .await
                .unwrap();
            let mut present = HashSet::new();
            while let Some(row) = rows.next().await.unwrap() {
                present.insert(row.get::<String>(1).unwrap());
            }
            for column in columns {
                assert!(present.contains(column), "{} is missing {}", table, column);
            }
        }
    }

    #[tokio::test]
    async fn test_migrations_are_recorded_once() {
        let store = LibsqlTrackerStore::in_memory().await.unwrap();
        store.run_migrations().await.unwrap();
        assert_eq!(
            store.applied_migrations().await.unwrap(),
            vec!["001_tracker_schema.sql".to_string()]
        );
        store.check_database_health().await.unwrap();
    }

    #[tokio::test]
    async fn test_user_tracker_preallocates_every_day() {
        let store = LibsqlTrackerStore::in_memory().await.unwrap();
        let key = build_key(TrackerKind::User, "u1", day(29)).unwrap();
        let template = TrackerTemplate::User {
            user_id: "u1".into(),
        };

        assert!(store.ensure_exists(&key, &template).await.unwrap());
        assert!(!store.ensure_exists(&key, &template).await.unwrap());

        store
            .increment(
                &key,
                &[
                    CounterUpdate::user("u1", UserCounter::ViewsOfOthers, 3),
                    CounterUpdate::user("u1", UserCounter::VotesForOthers, 1),
                ],
            )
            .await
            .unwrap();

        let tracker = store.get_user(&key).await.unwrap().unwrap();
        assert_eq!(tracker.days_in_month, 29);
        assert_eq!(tracker.days.len(), 29);
        assert_eq!(tracker.monthly.views_of_others, 3);
        assert_eq!(tracker.day(29).unwrap().views_of_others, 3);
        assert_eq!(tracker.day(28).unwrap().views_of_others, 0);
        assert!(tracker.is_consistent());
    }

    #[tokio::test]
    async fn test_increment_missing_tracker_is_storage_error() {
        let store = LibsqlTrackerStore::in_memory().await.unwrap();
        let key = build_key(TrackerKind::Comment, "c1", day(3)).unwrap();
        let err = store
            .increment(&key, &[CounterUpdate::comment("c1", CommentCounter::Views, 1)])
            .await
            .unwrap_err();
        match err {
            TrackingError::Storage { key: failed, .. } => assert_eq!(failed, "c1240203"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_content_round_trip() {
        let store = LibsqlTrackerStore::in_memory().await.unwrap();
        let key = build_key(TrackerKind::Post, "p1", day(3)).unwrap();
        let template = TrackerTemplate::Post {
            post_id: "p1".into(),
            author_id: "alice".into(),
        };
        store.ensure_exists(&key, &template).await.unwrap();
        store
            .increment(
                &key,
                &[
                    CounterUpdate::post("p1", PostCounter::DownVotes, 1),
                    CounterUpdate::post("p1", PostCounter::Opens, 2),
                ],
            )
            .await
            .unwrap();

        let tracker = store.get_content(&key).await.unwrap().unwrap();
        assert_eq!(tracker.owner_id, "alice");
        assert_eq!(tracker.day, day(3));
        let counters = tracker.counters.as_post().unwrap();
        assert_eq!(counters.down_votes, 1);
        assert_eq!(counters.opens, 2);
        assert_eq!(counters.up_votes, 0);
    }
}
