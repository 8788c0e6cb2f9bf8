//! Repository Module
//!
//! Provides storage operations for SurrealDB tables.

pub mod order;
pub mod product;

// Re-exports
pub use order::OrderRepository;
pub use product::ProductRepository;

use surrealdb::Surreal;
use surrealdb::engine::local::Db;
use thiserror::Error;

/// Repository error types
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate: {0}")]
    Duplicate(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// Conditional write matched no row (stock guard failed)
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl From<surrealdb::Error> for RepoError {
    fn from(err: surrealdb::Error) -> Self {
        RepoError::Database(err.to_string())
    }
}

/// Result type for repository operations
pub type RepoResult<T> = Result<T, RepoError>;

// =============================================================================
// ID Convention: "table:id" format everywhere
// =============================================================================
//
// Use surrealdb::RecordId for all IDs:
//   - parse: let id: RecordId = "product:abc".parse()?;
//   - build: let id = RecordId::from_table_key("product", "abc");
//   - table name: id.table()
//   - bare key: id.key().to_string()
//   - CRUD: db.select(id) / db.delete(id) take a RecordId directly

/// Strip a `table:` prefix if the caller passed a full record id
pub(crate) fn strip_table_prefix<'a>(table: &str, id: &'a str) -> &'a str {
    id.strip_prefix(table)
        .and_then(|rest| rest.strip_prefix(':'))
        .unwrap_or(id)
}

/// Base repository with database reference
#[derive(Clone)]
pub struct BaseRepository {
    db: Surreal<Db>,
}

impl BaseRepository {
    pub fn new(db: Surreal<Db>) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &Surreal<Db> {
        &self.db
    }
}
