//! Migration Planner - turns a chain and a database head into work
//!
//! Forward plans are the suffix of the chain after the last applied
//! revision. Backward plans hold at most the last applied revision: one
//! invocation undoes one step.

use super::graph::MigrationChain;
use crate::error::{MigrateError, MigrateResult};

/// Revisions still to apply, in chain order.
///
/// `last_applied` is the database's current head, `None` before the first
/// migration. A head that is not part of the chain is drift between the
/// database and the files on disk and is reported, never skipped.
pub fn plan_forward<'a>(
    chain: &'a MigrationChain,
    last_applied: Option<&str>,
) -> MigrateResult<&'a [String]> {
    let revisions = chain.revisions();
    match last_applied {
        None => Ok(revisions),
        Some(revision) => {
            let position = chain
                .position(revision)
                .ok_or_else(|| MigrateError::unknown_revision(revision))?;
            Ok(&revisions[position + 1..])
        }
    }
}

/// The revision to undo, if any
pub fn plan_backward(last_applied: Option<&str>) -> Option<String> {
    last_applied.map(str::to_string)
}
