//! Schema dump through `pg_dump`
//!
//! Writes the table structure of one target's schema to
//! `<schema_dir>/schema.sql`, without data, owners or privileges.

use std::path::PathBuf;
use tokio::process::Command;
use tracing::info;

use crate::config::TargetConfig;
use crate::error::{MigrateError, MigrateResult};
use crate::ledger::quote_identifier;
use crate::migrations::definitions::MigrationConfig;
use crate::migrations::manager::schema_file_path;

/// Name of the dump file, without extension
pub const SCHEMA_FILE_NAME: &str = "schema";

/// Runs `pg_dump` against a target
#[derive(Debug, Clone)]
pub struct SchemaDumper {
    program: String,
    schema_dir: PathBuf,
}

impl SchemaDumper {
    pub fn new(config: &MigrationConfig) -> Self {
        Self {
            program: "pg_dump".to_string(),
            schema_dir: config.schema_dir.clone(),
        }
    }

    /// Use another `pg_dump` binary
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Where the dump is written
    pub fn output_path(&self) -> PathBuf {
        schema_file_path(&self.schema_dir, SCHEMA_FILE_NAME)
    }

    /// Arguments passed to `pg_dump`, the database URI last
    pub fn arguments(&self, target: &TargetConfig) -> MigrateResult<Vec<String>> {
        Ok(vec![
            "--format=plain".to_string(),
            "--encoding=UTF8".to_string(),
            "--schema-only".to_string(),
            "--no-privileges".to_string(),
            "--no-owner".to_string(),
            // Same quoting as the ledger table, so the case of the name is kept
            format!("--schema={}", quote_identifier(&target.schema)?),
            format!("--file={}", self.output_path().display()),
            target.database_uri()?,
        ])
    }

    /// Dump the schema of `target`, returning the file written
    pub async fn dump(&self, target: &TargetConfig) -> MigrateResult<PathBuf> {
        tokio::fs::create_dir_all(&self.schema_dir).await?;

        let output = Command::new(&self.program)
            .args(self.arguments(target)?)
            .output()
            .await
            .map_err(|e| MigrateError::Dump {
                message: format!("could not run {}: {}", self.program, e),
            })?;

        if !output.status.success() {
            return Err(MigrateError::Dump {
                message: format!(
                    "{} exited with {}: {}",
                    self.program,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        let path = self.output_path();
        info!(target = %target.display_name(), path = %path.display(), "Schema dumped");
        Ok(path)
    }
}
