//! Migration Rollback - undoes the most recent migration
//!
//! One invocation undoes one step per target: the latest applied revision
//! that hasn't been rolled back already. Its ledger row is flagged, not
//! removed.

use std::time::Instant;
use tracing::{error, info, warn};

use super::definitions::{MigrationDirection, RunReport, TargetStatus};
use super::graph::MigrationChain;
use super::planner::plan_backward;
use super::runner::{Job, MigrationRunner};
use crate::config::TargetConfig;
use crate::error::{MigrateError, MigrateResult};
use crate::session::TargetSession;

impl MigrationRunner {
    /// Roll back the last applied migration on every target.
    ///
    /// Returns `Err` only for problems in the migration files, in which case
    /// no target has been touched.
    pub async fn undo(&self, targets: &[TargetConfig]) -> MigrateResult<RunReport> {
        let start_time = Instant::now();
        let chain = self.manager().load_chain().await?;
        info!(migrations = chain.len(), targets = targets.len(), "Starting downgrade");

        let outcomes = self.run_job(Job::Undo(&chain), targets).await;
        Ok(RunReport {
            direction: Some(MigrationDirection::Down),
            outcomes,
            execution_time_ms: start_time.elapsed().as_millis(),
        })
    }

    pub(super) async fn backward(
        &self,
        chain: &MigrationChain,
        session: &mut dyn TargetSession,
        target: &str,
    ) -> TargetStatus {
        let head = match self.current_head(session).await {
            Ok(head) => head,
            Err(error) => {
                return TargetStatus::Failed {
                    revision: None,
                    error,
                    applied: Vec::new(),
                }
            }
        };

        let Some(revision) = plan_backward(head.as_deref()) else {
            info!(target = %target, "Nothing to roll back");
            return TargetStatus::NothingToDo;
        };

        let Some(migration) = chain.get(&revision) else {
            error!(target = %target, revision = %revision, "Database head is not among the migration files");
            return TargetStatus::Failed {
                error: MigrateError::unknown_revision(revision.as_str()),
                revision: Some(revision),
                applied: Vec::new(),
            };
        };

        if !migration.has_downgrade() {
            warn!(target = %target, revision = %revision, "Can't roll back, no downgrade commands");
            return TargetStatus::CannotRollBack { revision };
        }

        let previous = if migration.is_root() {
            "<base>"
        } else {
            migration.down_revision.as_str()
        };
        info!(target = %target, "Running downgrade: {} -> {}", revision, previous);
        self.notify(|observer| observer.on_step_started(target, MigrationDirection::Down, &revision));

        match session.revert_step(&revision, &migration.downgrade_body).await {
            Ok(()) => {
                self.notify(|observer| observer.on_step_finished(target, MigrationDirection::Down, &revision));
                TargetStatus::RolledBack { revision }
            }
            Err(error) => {
                error!(target = %target, revision = %revision, error = %error, "Downgrade failed");
                self.notify(|observer| {
                    observer.on_step_failed(target, MigrationDirection::Down, &revision, &error)
                });
                TargetStatus::Failed {
                    revision: Some(revision),
                    error,
                    applied: Vec::new(),
                }
            }
        }
    }
}
