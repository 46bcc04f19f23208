//! Target database configuration
//!
//! Targets come from the first source that applies:
//! 1. `DATABASE_URI` (with `SCHEMA`), a single database
//! 2. `DB_USER`, `DB_PASSWORD`, `DB_HOST`, `DB_PORT`, `DB_NAME` (with `SCHEMA`)
//! 3. the JSON credentials file, one entry per database

use serde::Deserialize;
use sqlx::postgres::PgConnectOptions;
use std::env;
use std::path::Path;
use std::str::FromStr;
use url::Url;

use crate::error::{ConfigError, MigrateResult};
use crate::migrations::definitions::MigrationConfig;

pub const DEFAULT_SCHEMA: &str = "public";
pub const DEFAULT_PORT: u16 = 5432;

/// How to reach a target database
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetConnection {
    /// A full `postgres://` URI
    Uri(String),
    /// Individual credentials
    Credentials {
        user: String,
        password: String,
        host: String,
        port: u16,
        database: String,
    },
}

/// One database to migrate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetConfig {
    pub connection: TargetConnection,
    /// Schema holding the ledger table, also the session's search path
    pub schema: String,
}

/// Entry of the credentials file
#[derive(Debug, Deserialize)]
struct CredentialEntry {
    db_user: String,
    db_password: String,
    db_host: String,
    #[serde(default = "default_port")]
    db_port: u16,
    db_name: String,
    #[serde(default = "default_schema")]
    db_schema: String,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_schema() -> String {
    DEFAULT_SCHEMA.to_string()
}

impl From<CredentialEntry> for TargetConfig {
    fn from(entry: CredentialEntry) -> Self {
        Self {
            connection: TargetConnection::Credentials {
                user: entry.db_user,
                password: entry.db_password,
                host: entry.db_host,
                port: entry.db_port,
                database: entry.db_name,
            },
            schema: entry.db_schema,
        }
    }
}

impl TargetConfig {
    pub fn from_uri(uri: impl Into<String>, schema: impl Into<String>) -> Self {
        Self {
            connection: TargetConnection::Uri(uri.into()),
            schema: schema.into(),
        }
    }

    /// Resolve every configured target
    pub fn load_all(config: &MigrationConfig) -> Result<Vec<Self>, ConfigError> {
        if let Some(target) = Self::from_env()? {
            return Ok(vec![target]);
        }
        Self::from_credentials_file(&config.credentials_file)
    }

    /// A single target from environment variables, if they are set
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        let schema = env::var("SCHEMA").unwrap_or_else(|_| DEFAULT_SCHEMA.to_string());

        if let Ok(uri) = env::var("DATABASE_URI") {
            return Ok(Some(Self::from_uri(uri, schema)));
        }

        if let Ok(user) = env::var("DB_USER") {
            let port = match env::var("DB_PORT") {
                Ok(port) => port.parse().map_err(|_| ConfigError::InvalidValue {
                    field: "DB_PORT".to_string(),
                    value: port,
                    expected: "valid port number (0-65535)".to_string(),
                })?,
                Err(_) => DEFAULT_PORT,
            };
            return Ok(Some(Self {
                connection: TargetConnection::Credentials {
                    user,
                    password: env::var("DB_PASSWORD").unwrap_or_default(),
                    host: required_env("DB_HOST")?,
                    port,
                    database: required_env("DB_NAME")?,
                },
                schema,
            }));
        }

        Ok(None)
    }

    /// Targets listed in a JSON credentials file
    pub fn from_credentials_file(path: &Path) -> Result<Vec<Self>, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileError {
            message: format!(
                "no DATABASE_URI or DB_USER set and {} could not be read: {}",
                path.display(),
                e
            ),
        })?;
        Self::parse_credentials(&content)
    }

    pub fn parse_credentials(content: &str) -> Result<Vec<Self>, ConfigError> {
        let entries: Vec<CredentialEntry> = serde_json::from_str(content)?;
        Ok(entries.into_iter().map(Self::from).collect())
    }

    /// Options used to open the connection
    pub fn connect_options(&self) -> MigrateResult<PgConnectOptions> {
        let options = match &self.connection {
            TargetConnection::Uri(uri) => PgConnectOptions::from_str(uri)?,
            TargetConnection::Credentials {
                user,
                password,
                host,
                port,
                database,
            } => PgConnectOptions::new()
                .host(host)
                .port(*port)
                .username(user)
                .password(password)
                .database(database),
        };
        Ok(options)
    }

    /// `postgres://` URI for external tools such as `pg_dump`
    pub fn database_uri(&self) -> Result<String, ConfigError> {
        match &self.connection {
            TargetConnection::Uri(uri) => Ok(uri.clone()),
            TargetConnection::Credentials {
                user,
                password,
                host,
                port,
                database,
            } => {
                let invalid = |field: &str, value: &str| ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: value.to_string(),
                    expected: "a value usable in a postgres:// URI".to_string(),
                };
                let mut url = Url::parse(&format!("postgres://{}", host)).map_err(|_| invalid("db_host", host))?;
                url.set_port(Some(*port)).map_err(|_| invalid("db_port", &port.to_string()))?;
                url.set_username(user).map_err(|_| invalid("db_user", user))?;
                if !password.is_empty() {
                    url.set_password(Some(password)).map_err(|_| invalid("db_password", "***"))?;
                }
                url.set_path(database);
                Ok(url.to_string())
            }
        }
    }

    /// Human readable name with the password masked
    pub fn display_name(&self) -> String {
        let location = match &self.connection {
            TargetConnection::Uri(uri) => Url::parse(uri)
                .map(|mut url| {
                    if url.password().is_some() {
                        let _ = url.set_password(Some("***"));
                    }
                    url.to_string()
                })
                .unwrap_or_else(|_| "postgres://***".to_string()),
            TargetConnection::Credentials {
                user,
                host,
                port,
                database,
                ..
            } => format!("{}@{}:{}/{}", user, host, port, database),
        };
        format!("{} (schema {})", location, self.schema)
    }
}

fn required_env(var: &str) -> Result<String, ConfigError> {
    env::var(var).map_err(|_| ConfigError::MissingRequired {
        field: var.to_string(),
        hint: "required when DB_USER is set".to_string(),
    })
}
