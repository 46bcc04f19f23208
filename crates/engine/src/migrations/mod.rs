//! Migration System
//!
//! Migration files, their ordering into a chain, planning against a
//! database's ledger, and running plans on target databases.

pub mod definitions;
pub mod file;
pub mod graph;
pub mod manager;
pub mod planner;
pub mod rollback;
pub mod runner;

pub use definitions::*;
pub use file::MigrationFile;
pub use graph::{MigrationChain, ROOT_REVISION};
pub use manager::{generate_revision, MigrationManager};
pub use planner::{plan_backward, plan_forward};
pub use runner::{MigrationObserver, MigrationRunner};
