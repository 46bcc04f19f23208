//! Ledger - per-database record of applied migrations
//!
//! The ledger table is append/mark only. Applying a revision inserts a row,
//! undoing it flags that row as rolled back. Rows are never deleted, so the
//! table keeps the full history of a database.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use tracing::debug;

use crate::error::{MigrateError, MigrateResult};
use crate::migrations::definitions::LedgerEntry;

/// Whether `name` can be used as an unquoted SQL identifier
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Quote a validated identifier
pub(crate) fn quote_identifier(name: &str) -> MigrateResult<String> {
    if !is_valid_identifier(name) {
        return Err(MigrateError::InvalidIdentifier(name.to_string()));
    }
    Ok(format!("\"{}\"", name))
}

/// Reads and writes the ledger table of one target
#[derive(Debug, Clone)]
pub struct LedgerStore {
    schema: String,
    table_name: String,
    table: String,
}

impl LedgerStore {
    /// Ledger stored as `schema.table`
    pub fn new(schema: &str, table: &str) -> MigrateResult<Self> {
        Ok(Self {
            table: format!("{}.{}", quote_identifier(schema)?, quote_identifier(table)?),
            schema: schema.to_string(),
            table_name: table.to_string(),
        })
    }

    /// Schema-qualified, quoted table name
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the ledger table. Safe to run any number of times.
    pub async fn ensure_table(&self, conn: &mut PgConnection) -> MigrateResult<()> {
        sqlx::query(&self.create_table_sql()).execute(&mut *conn).await?;

        // Ledgers written by older releases have no rolled_back column. ALTER
        // TABLE locks the table even when the column exists, so look first.
        let has_column = sqlx::query_scalar::<_, bool>(&self.has_rolled_back_column_sql())
            .bind(&self.schema)
            .bind(&self.table_name)
            .fetch_one(&mut *conn)
            .await?;
        if !has_column {
            sqlx::query(&self.add_rolled_back_column_sql())
                .execute(&mut *conn)
                .await?;
            debug!(table = %self.table, "Added rolled_back column to ledger");
        }
        debug!(table = %self.table, "Ledger table ready");
        Ok(())
    }

    /// Most recent revision that hasn't been rolled back
    pub async fn current_head(&self, conn: &mut PgConnection) -> MigrateResult<Option<String>> {
        let head = sqlx::query_scalar::<_, String>(&self.current_head_sql())
            .fetch_optional(&mut *conn)
            .await?;
        Ok(head)
    }

    /// Append a row for an applied revision
    pub async fn record_applied(
        &self,
        conn: &mut PgConnection,
        revision: &str,
        applied_at: DateTime<Utc>,
    ) -> MigrateResult<()> {
        sqlx::query(&self.insert_sql())
            .bind(revision)
            .bind(applied_at)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Flag the applied row of `revision` as rolled back
    pub async fn record_rolled_back(&self, conn: &mut PgConnection, revision: &str) -> MigrateResult<()> {
        let result = sqlx::query(&self.mark_rolled_back_sql())
            .bind(revision)
            .execute(&mut *conn)
            .await?;
        if result.rows_affected() == 0 {
            return Err(MigrateError::LedgerEntryMissing {
                revision: revision.to_string(),
            });
        }
        Ok(())
    }

    /// Full history, newest first
    pub async fn entries(&self, conn: &mut PgConnection) -> MigrateResult<Vec<LedgerEntry>> {
        let rows = sqlx::query_as::<_, (String, DateTime<Utc>, Option<bool>)>(&self.entries_sql())
            .fetch_all(&mut *conn)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(version, applied_at, rolled_back)| LedgerEntry {
                version,
                applied_at,
                rolled_back,
            })
            .collect())
    }

    pub fn create_table_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    \
                version CHARACTER VARYING NOT NULL,\n    \
                applied_at TIMESTAMP WITH TIME ZONE NOT NULL,\n    \
                rolled_back BOOLEAN\n\
            )",
            self.table
        )
    }

    pub fn has_rolled_back_column_sql(&self) -> String {
        "SELECT EXISTS (SELECT 1 FROM information_schema.columns \
         WHERE table_schema = $1 AND table_name = $2 AND column_name = 'rolled_back')"
            .to_string()
    }

    pub fn add_rolled_back_column_sql(&self) -> String {
        format!("ALTER TABLE {} ADD COLUMN IF NOT EXISTS rolled_back BOOLEAN", self.table)
    }

    pub fn current_head_sql(&self) -> String {
        format!(
            "SELECT version FROM {} WHERE rolled_back IS NOT TRUE ORDER BY applied_at DESC LIMIT 1",
            self.table
        )
    }

    pub fn insert_sql(&self) -> String {
        format!("INSERT INTO {} (version, applied_at) VALUES ($1, $2)", self.table)
    }

    pub fn mark_rolled_back_sql(&self) -> String {
        format!(
            "UPDATE {} SET rolled_back = TRUE WHERE version = $1 AND rolled_back IS NOT TRUE",
            self.table
        )
    }

    pub fn entries_sql(&self) -> String {
        format!(
            "SELECT version, applied_at, rolled_back FROM {} ORDER BY applied_at DESC",
            self.table
        )
    }
}
