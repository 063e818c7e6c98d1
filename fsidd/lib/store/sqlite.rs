use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};

use super::{FsidSource, StoreError, StoreResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

static TABLE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap()
});

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// An fsid store backed by a single SQL table.
///
/// The table holds one row per path. The fsid column is an auto-incrementing primary key and the
/// path column carries a unique constraint, so the database itself arbitrates concurrent
/// allocations of the same path.
#[derive(Debug, Clone)]
pub struct SqlFsidStore {
    pool: Pool<Sqlite>,
    table: String,

    // pre-built statements, the table name cannot be a bind parameter
    select_fsid: String,
    insert_path: String,
    select_path: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SqlFsidStore {
    /// Opens a connection pool to `url` and wraps it in a store using `table`.
    ///
    /// Plain file paths are accepted and opened in read-write-create mode.
    pub async fn connect(url: &str, table: &str, max_connections: u32) -> StoreResult<Self> {
        let url = if url.starts_with("sqlite:") {
            url.to_string()
        } else {
            format!("sqlite://{url}?mode=rwc")
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(&url)
            .await?;

        Self::new(pool, table)
    }

    /// Creates a store over an existing pool.
    pub fn new(pool: Pool<Sqlite>, table: &str) -> StoreResult<Self> {
        if !is_valid_table_name(table) {
            return Err(StoreError::Other(format!("invalid table name: {table:?}")));
        }

        let quoted = format!("\"{table}\"");
        Ok(Self {
            pool,
            table: table.to_string(),
            select_fsid: format!("SELECT fsid FROM {quoted} WHERE path = ?"),
            insert_path: format!("INSERT INTO {quoted} (path) VALUES (?) RETURNING fsid"),
            select_path: format!("SELECT path FROM {quoted} WHERE fsid = ?"),
        })
    }

    /// Creates the fsid table if it does not exist yet.
    pub async fn create_table(&self) -> StoreResult<()> {
        let statement = format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" (\
                fsid INTEGER PRIMARY KEY AUTOINCREMENT, \
                path TEXT NOT NULL UNIQUE\
            )",
            self.table
        );

        sqlx::query(&statement).execute(&self.pool).await?;
        tracing::debug!(table = %self.table, "fsid table ready");

        Ok(())
    }

    /// Returns the name of the fsid table.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Returns the underlying connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Closes every connection in the pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns `true` if `name` can be used as the fsid table name.
///
/// Only plain identifiers are accepted since the name is spliced into SQL text.
pub fn is_valid_table_name(name: &str) -> bool {
    TABLE_NAME.is_match(name)
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl FsidSource for SqlFsidStore {
    async fn get_fsid(&self, path: &str) -> StoreResult<i32> {
        sqlx::query_scalar::<_, i32>(&self.select_fsid)
            .bind(path)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)
    }

    async fn allocate_fsid(&self, path: &str) -> StoreResult<i32> {
        let fsid = sqlx::query_scalar::<_, i32>(&self.insert_path)
            .bind(path)
            .fetch_one(&self.pool)
            .await?;

        Ok(fsid)
    }

    async fn get_path(&self, fsid: i32) -> StoreResult<String> {
        sqlx::query_scalar::<_, String>(&self.select_path)
            .bind(fsid)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
