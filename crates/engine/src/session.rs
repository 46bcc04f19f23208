//! Target sessions - one live connection per target database
//!
//! The runner never talks to a driver directly. It asks a [`Connector`] for a
//! [`TargetSession`] and drives the session through the ledger and the
//! migration steps. [`PgConnector`] is the PostgreSQL implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Connection, Executor, PgConnection};
use tracing::{debug, warn};

use crate::config::TargetConfig;
use crate::error::{MigrateError, MigrateResult};
use crate::ledger::{quote_identifier, LedgerStore};

/// Opens sessions on target databases
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, target: &TargetConfig) -> MigrateResult<Box<dyn TargetSession>>;
}

/// A connection to one target, privately owned by the runner for one run
#[async_trait]
pub trait TargetSession: Send {
    /// Create the ledger table if it is missing
    async fn ensure_ledger(&mut self) -> MigrateResult<()>;

    /// Most recent applied, not rolled back, revision
    async fn current_head(&mut self) -> MigrateResult<Option<String>>;

    /// Run `sql` and record `revision` as applied, in one transaction
    async fn apply_step(&mut self, revision: &str, sql: &str, applied_at: DateTime<Utc>) -> MigrateResult<()>;

    /// Run `sql` and mark `revision` as rolled back, in one transaction
    async fn revert_step(&mut self, revision: &str, sql: &str) -> MigrateResult<()>;

    /// Close the connection
    async fn close(self: Box<Self>) -> MigrateResult<()>;
}

/// Connects to PostgreSQL targets
#[derive(Debug, Clone)]
pub struct PgConnector {
    ledger_table: String,
}

impl PgConnector {
    pub fn new(ledger_table: impl Into<String>) -> Self {
        Self {
            ledger_table: ledger_table.into(),
        }
    }
}

#[async_trait]
impl Connector for PgConnector {
    async fn connect(&self, target: &TargetConfig) -> MigrateResult<Box<dyn TargetSession>> {
        let ledger = LedgerStore::new(&target.schema, &self.ledger_table)?;
        let search_path = quote_identifier(&target.schema)?;
        let options = target.connect_options()?;

        let mut conn = PgConnection::connect_with(&options)
            .await
            .map_err(|source| MigrateError::Connection {
                target: target.display_name(),
                source,
            })?;
        let set_search_path = format!("SET search_path TO {}", search_path);
        conn.execute(set_search_path.as_str()).await?;
        debug!(target = %target.display_name(), "Connected");

        Ok(Box::new(PgSession { conn, ledger }))
    }
}

/// Session over a single PostgreSQL connection
pub struct PgSession {
    conn: PgConnection,
    ledger: LedgerStore,
}

impl PgSession {
    pub fn ledger(&self) -> &LedgerStore {
        &self.ledger
    }
}

#[async_trait]
impl TargetSession for PgSession {
    async fn ensure_ledger(&mut self) -> MigrateResult<()> {
        self.ledger.ensure_table(&mut self.conn).await
    }

    async fn current_head(&mut self) -> MigrateResult<Option<String>> {
        self.ledger.current_head(&mut self.conn).await
    }

    async fn apply_step(&mut self, revision: &str, sql: &str, applied_at: DateTime<Utc>) -> MigrateResult<()> {
        let mut tx = self.conn.begin().await?;

        // A bare &str runs over the simple query protocol, so the body may
        // hold any number of statements.
        let executed = (&mut *tx).execute(sql).await;
        if let Err(source) = executed {
            rollback(tx, revision).await;
            return Err(MigrateError::StepFailed {
                revision: revision.to_string(),
                source,
            });
        }
        let recorded = self.ledger.record_applied(&mut *tx, revision, applied_at).await;
        if let Err(e) = recorded {
            rollback(tx, revision).await;
            return Err(e);
        }

        tx.commit().await.map_err(|source| MigrateError::StepFailed {
            revision: revision.to_string(),
            source,
        })
    }

    async fn revert_step(&mut self, revision: &str, sql: &str) -> MigrateResult<()> {
        let mut tx = self.conn.begin().await?;

        let executed = (&mut *tx).execute(sql).await;
        if let Err(source) = executed {
            rollback(tx, revision).await;
            return Err(MigrateError::StepFailed {
                revision: revision.to_string(),
                source,
            });
        }
        let recorded = self.ledger.record_rolled_back(&mut *tx, revision).await;
        if let Err(e) = recorded {
            rollback(tx, revision).await;
            return Err(e);
        }

        tx.commit().await.map_err(|source| MigrateError::StepFailed {
            revision: revision.to_string(),
            source,
        })
    }

    async fn close(self: Box<Self>) -> MigrateResult<()> {
        self.conn.close().await?;
        Ok(())
    }
}

async fn rollback(tx: sqlx::Transaction<'_, sqlx::Postgres>, revision: &str) {
    if let Err(e) = tx.rollback().await {
        warn!(revision = %revision, error = %e, "Failed to roll back transaction");
    }
}
