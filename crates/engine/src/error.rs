//! Error types for the migration engine
//!
//! Structural errors (unreadable or inconsistent migration files) abort a run
//! before any database is touched. Everything else is scoped to a single
//! target and ends up in that target's outcome.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for migration operations
pub type MigrateResult<T> = Result<T, MigrateError>;

/// Errors raised by the migration engine
#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("Malformed migration {}: {reason}", display_source(.source_path))]
    MalformedMigration {
        source_path: Option<PathBuf>,
        reason: String,
    },

    #[error("Found conflicting revisions '{existing}' and '{conflicting}', both branching from '{shared_predecessor}'")]
    BranchConflict {
        existing: String,
        conflicting: String,
        shared_predecessor: String,
    },

    #[error("Migrations not reachable from the first revision: {}", .revisions.join(", "))]
    OrphanedMigrations { revisions: Vec<String> },

    #[error("Revision '{revision}' is declared by more than one migration file")]
    DuplicateRevision { revision: String },

    #[error("Can't find the revision '{revision}' among the migration files")]
    UnknownRevision { revision: String },

    #[error("No applied ledger entry found for revision '{revision}'")]
    LedgerEntryMissing { revision: String },

    #[error("Failed to execute migration {revision}: {source}")]
    StepFailed {
        revision: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Failed to connect to {target}: {source}")]
    Connection {
        target: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid SQL identifier: '{0}'")]
    InvalidIdentifier(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Schema dump failed: {message}")]
    Dump { message: String },
}

fn display_source(path: &Option<PathBuf>) -> String {
    match path {
        Some(path) => path.display().to_string(),
        None => "<inline>".to_string(),
    }
}

impl MigrateError {
    /// Create a malformed migration error for a file
    pub fn malformed(source_path: Option<PathBuf>, reason: impl Into<String>) -> Self {
        Self::MalformedMigration {
            source_path,
            reason: reason.into(),
        }
    }

    /// Create an unknown revision error
    pub fn unknown_revision(revision: impl Into<String>) -> Self {
        Self::UnknownRevision {
            revision: revision.into(),
        }
    }

    /// Errors in the migration files themselves. These abort a run before
    /// any target is contacted.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::MalformedMigration { .. }
                | Self::BranchConflict { .. }
                | Self::OrphanedMigrations { .. }
                | Self::DuplicateRevision { .. }
        )
    }

    /// The revision this error is about, when there is one
    pub fn revision(&self) -> Option<&str> {
        match self {
            Self::UnknownRevision { revision }
            | Self::LedgerEntryMissing { revision }
            | Self::StepFailed { revision, .. }
            | Self::DuplicateRevision { revision } => Some(revision),
            _ => None,
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required field: {field}. {hint}")]
    MissingRequired { field: String, hint: String },

    #[error("Invalid value for field '{field}': '{value}'. Expected: {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("Credentials file error: {message}")]
    FileError { message: String },

    #[error("Configuration parsing error: {message}")]
    ParseError { message: String },
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::ParseError {
            message: err.to_string(),
        }
    }
}
