//! Test utilities for storage initialization
//!
//! Shared by unit tests, integration tests and the CLI's dry-run mode so
//! every caller gets a store with the schema already applied.

use crate::error::Result;
use crate::storage::libsql::{ConnectionMode, LibsqlTrackerStore, DEFAULT_BUSY_TIMEOUT};
use crate::storage::memory::MemoryTrackerStore;
use std::path::Path;
use std::sync::Arc;

/// In-memory libSQL store with migrations applied
pub async fn create_test_store() -> Result<Arc<LibsqlTrackerStore>> {
    Ok(Arc::new(LibsqlTrackerStore::in_memory().await?))
}

/// File-backed libSQL store created inside `dir`
pub async fn create_file_store(dir: &Path) -> Result<Arc<LibsqlTrackerStore>> {
    let path = dir.join("tracking.db");
    let store = LibsqlTrackerStore::new_with_validation(
        ConnectionMode::Local(path.to_string_lossy().into_owned()),
        true,
        DEFAULT_BUSY_TIMEOUT,
    )
    .await?;
    Ok(Arc::new(store))
}

/// Empty process-local store
pub fn create_memory_store() -> Arc<MemoryTrackerStore> {
    Arc::new(MemoryTrackerStore::new())
}
