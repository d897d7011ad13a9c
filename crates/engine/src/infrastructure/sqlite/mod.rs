//! SQLite persistence for bibles, chapters and credit accounts.
//!
//! One pool backs all three repository ports. Structured values (the bible,
//! continuity records) are stored as JSON text columns.

mod bibles;
mod chapters;
mod credits;

use std::sync::Arc;

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::infrastructure::ports::{ClockPort, RepoError};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS bibles (
        id TEXT PRIMARY KEY,
        owner_id TEXT NOT NULL,
        title TEXT NOT NULL,
        bible_json TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_bibles_owner ON bibles (owner_id)",
    r#"
    CREATE TABLE IF NOT EXISTS chapters (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL,
        outline_id TEXT NOT NULL,
        title TEXT NOT NULL,
        content TEXT NOT NULL,
        word_count INTEGER NOT NULL,
        continuity_json TEXT,
        draft TEXT,
        draft_complete INTEGER NOT NULL DEFAULT 0,
        updated_at TEXT NOT NULL,
        UNIQUE (project_id, outline_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS credit_accounts (
        user_id TEXT PRIMARY KEY,
        balance INTEGER NOT NULL CHECK (balance >= 0),
        updated_at TEXT NOT NULL
    )
    "#,
];

/// SQLite implementation of [`BibleRepo`], [`ChapterRepo`] and [`CreditRepo`].
///
/// [`BibleRepo`]: crate::infrastructure::ports::BibleRepo
/// [`ChapterRepo`]: crate::infrastructure::ports::ChapterRepo
/// [`CreditRepo`]: crate::infrastructure::ports::CreditRepo
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    clock: Arc<dyn ClockPort>,
}

impl SqliteStore {
    pub async fn new(db_path: &str, clock: Arc<dyn ClockPort>) -> Result<Self, RepoError> {
        let pool = SqlitePool::connect(&format!("sqlite:{}?mode=rwc", db_path))
            .await
            .map_err(|e| RepoError::database("connect", e))?;

        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(|e| RepoError::database("migrate", e))?;
        }

        tracing::info!(path = %db_path, "SQLite store ready");
        Ok(Self { pool, clock })
    }

    fn now(&self) -> String {
        self.clock.now().to_rfc3339()
    }
}

fn column<'r, T>(row: &'r SqliteRow, name: &'static str) -> Result<T, RepoError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name)
        .map_err(|e| RepoError::serialization(format!("column {name}: {e}")))
}

fn parse_column<T>(row: &SqliteRow, name: &'static str) -> Result<T, RepoError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw: String = column(row, name)?;
    raw.parse()
        .map_err(|e: T::Err| RepoError::serialization(format!("column {name}: {e}")))
}

fn to_sql_amount(amount: u64) -> Result<i64, RepoError> {
    i64::try_from(amount).map_err(|_| RepoError::constraint(format!("amount {amount} out of range")))
}

fn from_sql_amount(value: i64) -> Result<u64, RepoError> {
    u64::try_from(value).map_err(|_| RepoError::constraint(format!("negative balance {value}")))
}

#[cfg(test)]
pub(crate) async fn temp_store() -> (SqliteStore, tempfile::TempDir) {
    use crate::infrastructure::clock::SystemClock;

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("folio.db");
    let store = SqliteStore::new(
        path.to_str().expect("utf-8 path"),
        Arc::new(SystemClock::new()),
    )
    .await
    .expect("open store");
    (store, dir)
}
