//! # dbmigrate-engine
//!
//! Applies and reverts ordered schema migrations on one or more PostgreSQL
//! databases, keeping a ledger table in each so that repeated runs only apply
//! what is missing.
//!
//! Each migration file names the revision it follows. The files are ordered
//! into a single chain, the chain is compared with each database's ledger,
//! and the remaining steps run one transaction per step.
//!
//! ```rust,no_run
//! use dbmigrate_engine::{MigrationConfig, MigrationManager, MigrationRunner, TargetConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MigrationConfig::from_env()?;
//! let targets = TargetConfig::load_all(&config)?;
//! let runner = MigrationRunner::new(MigrationManager::with_config(config));
//! let report = runner.apply(&targets).await?;
//! println!("Applied {} migrations", report.applied_count());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dump;
pub mod error;
pub mod ledger;
pub mod migrations;
pub mod session;

pub use config::{TargetConfig, TargetConnection};
pub use dump::SchemaDumper;
pub use error::*;
pub use ledger::LedgerStore;
pub use migrations::*;
pub use session::{Connector, PgConnector, PgSession, TargetSession};
