//! Migration Manager - File system operations for migrations
//!
//! Reads every migration file of the versions directory and writes new blank
//! migrations linked to the current tail of the chain.

use chrono::{DateTime, Local};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::definitions::MigrationConfig;
use super::file::MigrationFile;
use super::graph::MigrationChain;
use crate::error::{ConfigError, MigrateError, MigrateResult};

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Migration manager for creating and loading migrations
pub struct MigrationManager {
    config: MigrationConfig,
}

impl MigrationManager {
    /// Create a new migration manager with default configuration
    pub fn new() -> Self {
        Self::with_config(MigrationConfig::default())
    }

    /// Create a new migration manager with custom configuration
    pub fn with_config(config: MigrationConfig) -> Self {
        Self { config }
    }

    /// Get the configuration
    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Load and parse every `.sql` file in the versions directory.
    ///
    /// Files are returned sorted by path so that errors found later on are
    /// reported the same way whatever order the file system lists them in.
    pub async fn load_migrations(&self) -> MigrateResult<Vec<MigrationFile>> {
        let dir = &self.config.versions_dir;
        if !fs::try_exists(dir).await? {
            warn!(dir = %dir.display(), "Migrations directory does not exist");
            return Ok(Vec::new());
        }

        let mut paths = Vec::new();
        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_file() && path.extension().map_or(false, |ext| ext == "sql") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut migrations = Vec::with_capacity(paths.len());
        for path in paths {
            let content = fs::read_to_string(&path).await?;
            migrations.push(MigrationFile::parse_with_source(&content, &path)?);
        }

        debug!(count = migrations.len(), dir = %dir.display(), "Loaded migration files");
        Ok(migrations)
    }

    /// Load the migration files and order them into a chain
    pub async fn load_chain(&self) -> MigrateResult<MigrationChain> {
        let migrations = self.load_migrations().await?;
        MigrationChain::build(migrations)
    }

    /// Write a blank migration after the current tail of the chain.
    ///
    /// Returns the path of the new file.
    pub async fn create_blank_migration(&self, description: &str) -> MigrateResult<PathBuf> {
        let description = description.trim();
        if description.is_empty() {
            return Err(MigrateError::Config(ConfigError::MissingRequired {
                field: "name".to_string(),
                hint: "a short description is required to name the migration".to_string(),
            }));
        }

        let chain = self.load_chain().await?;
        let down_revision = chain.latest().unwrap_or_default().to_string();
        let revision = generate_revision(description, Local::now());

        fs::create_dir_all(&self.config.versions_dir).await?;
        let path = self.migration_file_path(&revision);
        write_new_file(&path, &MigrationFile::template(&revision, &down_revision)).await?;
        info!(path = %path.display(), revision = %revision, down_revision = %down_revision, "Created new migration file");
        Ok(path)
    }

    /// Path of the file holding `revision`
    pub fn migration_file_path(&self, revision: &str) -> PathBuf {
        self.config.versions_dir.join(format!("{}.sql", revision))
    }

    /// Path the schema dump is written to
    pub fn schema_file_path(&self, name: &str) -> PathBuf {
        schema_file_path(&self.config.schema_dir, name)
    }
}

impl Default for MigrationManager {
    fn default() -> Self {
        Self::new()
    }
}

/// `<timestamp>_<description>` with whitespace collapsed to `_` and lowercased
pub fn generate_revision(description: &str, now: DateTime<Local>) -> String {
    let name = WHITESPACE_RE.replace_all(description.trim(), "_").to_lowercase();
    format!("{}_{}", now.format("%Y%m%d%H%M%S"), name)
}

/// Write `contents` to a file that must not exist yet
async fn write_new_file(path: &Path, contents: &str) -> MigrateResult<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::AlreadyExists => MigrateError::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("migration file {} already exists", path.display()),
            )),
            _ => MigrateError::Io(e),
        })?;
    file.write_all(contents.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

pub(crate) fn schema_file_path(schema_dir: &Path, name: &str) -> PathBuf {
    schema_dir.join(format!("{}.sql", name))
}
