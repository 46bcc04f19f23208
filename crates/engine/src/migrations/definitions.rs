//! Migration Definitions - Core types shared by the migration system
//!
//! Defines the ledger entry, the run configuration, the direction of a run
//! and the per-target outcomes returned to callers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::env;
use std::path::PathBuf;

use crate::error::{ConfigError, MigrateError};

/// One row of a target's ledger table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    /// Revision that was applied
    pub version: String,
    /// When it was applied
    pub applied_at: DateTime<Utc>,
    /// Set once the revision has been undone. NULL and false both mean applied.
    pub rolled_back: Option<bool>,
}

impl LedgerEntry {
    /// Whether this entry still counts towards the current head
    pub fn is_applied(&self) -> bool {
        !self.rolled_back.unwrap_or(false)
    }
}

/// Configuration for the migration system
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Directory holding one `.sql` file per revision
    pub versions_dir: PathBuf,
    /// Directory the schema dump is written to
    pub schema_dir: PathBuf,
    /// Ledger table name, created in each target's schema
    pub ledger_table: String,
    /// JSON file listing target databases
    pub credentials_file: PathBuf,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            versions_dir: PathBuf::from("db_migrations/versions"),
            schema_dir: PathBuf::from("db_migrations"),
            ledger_table: "migrations".to_string(),
            credentials_file: PathBuf::from("db_creds.json"),
        }
    }
}

impl MigrationConfig {
    /// Defaults overridden by `DBMIGRATE_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(dir) = env::var("DBMIGRATE_VERSIONS_DIR") {
            config.versions_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = env::var("DBMIGRATE_SCHEMA_DIR") {
            config.schema_dir = PathBuf::from(dir);
        }
        if let Ok(table) = env::var("DBMIGRATE_TABLE") {
            config.ledger_table = table;
        }
        if let Ok(file) = env::var("DBMIGRATE_CREDS_FILE") {
            config.credentials_file = PathBuf::from(file);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !crate::ledger::is_valid_identifier(&self.ledger_table) {
            return Err(ConfigError::InvalidValue {
                field: "ledger_table".to_string(),
                value: self.ledger_table.clone(),
                expected: "a plain SQL identifier ([A-Za-z_][A-Za-z0-9_]*)".to_string(),
            });
        }
        if self.versions_dir.as_os_str().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "versions_dir".to_string(),
                hint: "set DBMIGRATE_VERSIONS_DIR or keep the default".to_string(),
            });
        }
        Ok(())
    }
}

/// Migration direction for execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MigrationDirection {
    /// Apply pending migrations (run upgrade bodies)
    Up,
    /// Undo the most recent migration (run its downgrade body)
    Down,
}

impl std::fmt::Display for MigrationDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationDirection::Up => write!(f, "upgrade"),
            MigrationDirection::Down => write!(f, "downgrade"),
        }
    }
}

/// What happened on one target
#[derive(Debug)]
pub enum TargetStatus {
    /// Ledger table exists
    Initialized,
    /// Forward run completed. `skipped` holds revisions with a blank upgrade body.
    /// Skipped revisions get no ledger row, so a blank tail (such as a freshly
    /// scaffolded migration) is planned and skipped again on every run.
    Applied {
        applied: Vec<String>,
        skipped: Vec<String>,
    },
    /// The most recent revision was undone
    RolledBack { revision: String },
    /// Nothing to migrate, or nothing to roll back
    NothingToDo,
    /// The head revision has no downgrade commands
    CannotRollBack { revision: String },
    /// The run for this target stopped. Steps committed before the failure
    /// stand and are listed in `applied`.
    Failed {
        revision: Option<String>,
        error: MigrateError,
        applied: Vec<String>,
    },
}

/// Outcome of one target within a run
#[derive(Debug)]
pub struct TargetOutcome {
    /// Display name of the target, password masked
    pub target: String,
    pub status: TargetStatus,
}

impl TargetOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self.status, TargetStatus::Failed { .. })
    }
}

/// Result of an engine call, one outcome per target in input order
#[derive(Debug)]
pub struct RunReport {
    pub direction: Option<MigrationDirection>,
    pub outcomes: Vec<TargetOutcome>,
    /// Total execution time in milliseconds
    pub execution_time_ms: u128,
}

impl RunReport {
    /// Whether any target ended in `Failed`
    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(TargetOutcome::is_failure)
    }

    /// Number of revisions applied across all targets, failed targets included
    pub fn applied_count(&self) -> usize {
        self.outcomes
            .iter()
            .map(|outcome| match &outcome.status {
                TargetStatus::Applied { applied, .. } | TargetStatus::Failed { applied, .. } => applied.len(),
                _ => 0,
            })
            .sum()
    }
}
