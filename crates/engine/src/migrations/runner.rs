//! Migration Runner - Executes migrations against target databases
//!
//! Targets are processed one after another. Each target gets its own
//! session, opened at the start of its turn and closed at the end whatever
//! happened. A failure on one target never stops the others; a problem in the
//! migration files stops the run before any target is contacted.

use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use super::definitions::{MigrationDirection, RunReport, TargetOutcome, TargetStatus};
use super::graph::MigrationChain;
use super::manager::MigrationManager;
use super::planner::plan_forward;
use crate::config::TargetConfig;
use crate::error::{MigrateError, MigrateResult};
use crate::session::{Connector, PgConnector, TargetSession};

/// Receives progress while a run is under way.
///
/// Every method has an empty default so observers only implement what they
/// care about. The final state of each target is also in the [`RunReport`].
pub trait MigrationObserver: Send + Sync {
    fn on_target_started(&self, _target: &str, _direction: Option<MigrationDirection>) {}

    fn on_step_started(&self, _target: &str, _direction: MigrationDirection, _revision: &str) {}

    fn on_step_finished(&self, _target: &str, _direction: MigrationDirection, _revision: &str) {}

    /// A forward step whose upgrade body is blank
    fn on_step_skipped(&self, _target: &str, _revision: &str) {}

    fn on_step_failed(
        &self,
        _target: &str,
        _direction: MigrationDirection,
        _revision: &str,
        _error: &MigrateError,
    ) {
    }

    fn on_target_finished(&self, _outcome: &TargetOutcome) {}
}

/// What a run does on each target
#[derive(Clone, Copy)]
pub(super) enum Job<'a> {
    Initialize,
    Apply(&'a MigrationChain),
    Undo(&'a MigrationChain),
}

impl Job<'_> {
    fn direction(&self) -> Option<MigrationDirection> {
        match self {
            Job::Initialize => None,
            Job::Apply(_) => Some(MigrationDirection::Up),
            Job::Undo(_) => Some(MigrationDirection::Down),
        }
    }
}

/// Migration runner that executes migrations against target databases
pub struct MigrationRunner {
    manager: MigrationManager,
    connector: Arc<dyn Connector>,
    observer: Option<Arc<dyn MigrationObserver>>,
}

impl MigrationRunner {
    /// Runner connecting to PostgreSQL targets
    pub fn new(manager: MigrationManager) -> Self {
        let connector = Arc::new(PgConnector::new(manager.config().ledger_table.clone()));
        Self::with_connector(manager, connector)
    }

    /// Runner using a custom way of opening target sessions
    pub fn with_connector(manager: MigrationManager, connector: Arc<dyn Connector>) -> Self {
        Self {
            manager,
            connector,
            observer: None,
        }
    }

    /// Stream progress to `observer`
    pub fn with_observer(mut self, observer: Arc<dyn MigrationObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Get the migration manager
    pub fn manager(&self) -> &MigrationManager {
        &self.manager
    }

    /// Create the ledger table on every target
    pub async fn initialize(&self, targets: &[TargetConfig]) -> MigrateResult<RunReport> {
        let start_time = Instant::now();
        let outcomes = self.run_job(Job::Initialize, targets).await;
        Ok(self.report(None, outcomes, start_time))
    }

    /// Apply every pending migration on every target.
    ///
    /// Returns `Err` only for problems in the migration files, in which case
    /// no target has been touched.
    pub async fn apply(&self, targets: &[TargetConfig]) -> MigrateResult<RunReport> {
        let start_time = Instant::now();
        let chain = self.manager.load_chain().await?;
        info!(migrations = chain.len(), targets = targets.len(), "Starting upgrade");

        let outcomes = self.run_job(Job::Apply(&chain), targets).await;
        Ok(self.report(Some(MigrationDirection::Up), outcomes, start_time))
    }

    pub(super) async fn run_job(&self, job: Job<'_>, targets: &[TargetConfig]) -> Vec<TargetOutcome> {
        let mut outcomes = Vec::with_capacity(targets.len());

        for target in targets {
            let name = target.display_name();
            self.notify(|observer| observer.on_target_started(&name, job.direction()));
            info!(target = %name, "Running {} on database", job_label(job));

            let status = match self.connector.connect(target).await {
                Ok(mut session) => {
                    let status = match job {
                        Job::Initialize => self.initialize_target(&mut *session, &name).await,
                        Job::Apply(chain) => self.forward(chain, &mut *session, &name).await,
                        Job::Undo(chain) => self.backward(chain, &mut *session, &name).await,
                    };
                    if let Err(e) = session.close().await {
                        warn!(target = %name, error = %e, "Failed to close connection");
                    }
                    status
                }
                Err(error) => {
                    error!(target = %name, error = %error, "Could not connect");
                    TargetStatus::Failed {
                        revision: None,
                        error,
                        applied: Vec::new(),
                    }
                }
            };

            let outcome = TargetOutcome { target: name, status };
            self.notify(|observer| observer.on_target_finished(&outcome));
            outcomes.push(outcome);
        }

        outcomes
    }

    async fn initialize_target(&self, session: &mut dyn TargetSession, target: &str) -> TargetStatus {
        match session.ensure_ledger().await {
            Ok(()) => {
                info!(target = %target, "Ledger table initialized");
                TargetStatus::Initialized
            }
            Err(error) => TargetStatus::Failed {
                revision: None,
                error,
                applied: Vec::new(),
            },
        }
    }

    /// Ledger ready and current head read
    pub(super) async fn current_head(&self, session: &mut dyn TargetSession) -> MigrateResult<Option<String>> {
        session.ensure_ledger().await?;
        session.current_head().await
    }

    async fn forward(&self, chain: &MigrationChain, session: &mut dyn TargetSession, target: &str) -> TargetStatus {
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

        let plan = match plan_forward(chain, head.as_deref()) {
            Ok(plan) => plan,
            Err(error) => {
                error!(target = %target, error = %error, "Database head is not among the migration files");
                return TargetStatus::Failed {
                    revision: head,
                    error,
                    applied: Vec::new(),
                };
            }
        };

        if plan.is_empty() {
            info!(target = %target, "Nothing to migrate");
            return TargetStatus::NothingToDo;
        }

        let mut applied = Vec::new();
        let mut skipped = Vec::new();
        let mut current = head;

        for revision in plan {
            let Some(migration) = chain.get(revision) else {
                return TargetStatus::Failed {
                    revision: Some(revision.clone()),
                    error: MigrateError::unknown_revision(revision.as_str()),
                    applied,
                };
            };

            if !migration.has_upgrade() {
                info!(target = %target, revision = %revision, "No upgrade commands, skipping");
                self.notify(|observer| observer.on_step_skipped(target, revision));
                skipped.push(revision.clone());
                continue;
            }

            info!(
                target = %target,
                "Running upgrade: {} -> {}",
                current.as_deref().unwrap_or("<base>"),
                revision
            );
            self.notify(|observer| observer.on_step_started(target, MigrationDirection::Up, revision));

            match session
                .apply_step(revision, &migration.upgrade_body, Utc::now())
                .await
            {
                Ok(()) => {
                    self.notify(|observer| observer.on_step_finished(target, MigrationDirection::Up, revision));
                    applied.push(revision.clone());
                    current = Some(revision.clone());
                }
                Err(error) => {
                    error!(target = %target, revision = %revision, error = %error, "Upgrade failed");
                    self.notify(|observer| observer.on_step_failed(target, MigrationDirection::Up, revision, &error));
                    return TargetStatus::Failed {
                        revision: Some(revision.clone()),
                        error,
                        applied,
                    };
                }
            }
        }

        info!(target = %target, applied = applied.len(), skipped = skipped.len(), "Upgrade finished");
        TargetStatus::Applied { applied, skipped }
    }

    pub(super) fn notify(&self, event: impl FnOnce(&dyn MigrationObserver)) {
        if let Some(observer) = &self.observer {
            event(observer.as_ref());
        }
    }

    fn report(
        &self,
        direction: Option<MigrationDirection>,
        outcomes: Vec<TargetOutcome>,
        start_time: Instant,
    ) -> RunReport {
        RunReport {
            direction,
            outcomes,
            execution_time_ms: start_time.elapsed().as_millis(),
        }
    }
}

fn job_label(job: Job<'_>) -> &'static str {
    match job {
        Job::Initialize => "init_migration",
        Job::Apply(_) => "upgrade",
        Job::Undo(_) => "downgrade",
    }
}
