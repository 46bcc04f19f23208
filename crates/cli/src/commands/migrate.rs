use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

use dbmigrate_engine::{
    MigrateError, MigrationConfig, MigrationDirection, MigrationManager, MigrationObserver, MigrationRunner,
    RunReport, TargetConfig, TargetOutcome, TargetStatus,
};

/// Prints progress as the runner goes
struct ConsoleObserver;

impl MigrationObserver for ConsoleObserver {
    fn on_target_started(&self, target: &str, _direction: Option<MigrationDirection>) {
        println!("==> {}", target);
    }

    fn on_step_started(&self, _target: &str, direction: MigrationDirection, revision: &str) {
        println!("  Running {} {}", direction, revision);
    }

    fn on_step_skipped(&self, _target: &str, revision: &str) {
        println!("  Skipped {} (no upgrade commands)", revision);
    }

    fn on_step_failed(&self, _target: &str, direction: MigrationDirection, revision: &str, error: &MigrateError) {
        println!("  {} of {} failed: {}", direction, revision, error);
    }
}

pub(crate) fn load_config() -> Result<MigrationConfig> {
    MigrationConfig::from_env().context("invalid migration settings")
}

pub(crate) fn load_targets(config: &MigrationConfig) -> Result<Vec<TargetConfig>> {
    let targets = TargetConfig::load_all(config).context("could not resolve target databases")?;
    if targets.is_empty() {
        bail!("no databases configured in {}", config.credentials_file.display());
    }
    Ok(targets)
}

fn runner(config: MigrationConfig) -> MigrationRunner {
    MigrationRunner::new(MigrationManager::with_config(config)).with_observer(Arc::new(ConsoleObserver))
}

pub async fn touch(name: &[String]) -> Result<()> {
    let path = create(load_config()?, name).await?;
    println!("Created migration: {}", path.display());
    Ok(())
}

async fn create(config: MigrationConfig, name: &[String]) -> Result<PathBuf> {
    let manager = MigrationManager::with_config(config);
    let path = manager.create_blank_migration(&name.join(" ")).await?;
    Ok(path)
}

pub async fn init() -> Result<()> {
    let config = load_config()?;
    let targets = load_targets(&config)?;
    let report = runner(config).initialize(&targets).await?;
    finish(&report)
}

pub async fn upgrade() -> Result<()> {
    let config = load_config()?;
    let targets = load_targets(&config)?;
    let report = runner(config).apply(&targets).await?;
    finish(&report)
}

pub async fn downgrade() -> Result<()> {
    let config = load_config()?;
    let targets = load_targets(&config)?;
    let report = runner(config).undo(&targets).await?;
    finish(&report)
}

fn finish(report: &RunReport) -> Result<()> {
    println!();
    for outcome in &report.outcomes {
        println!("{}", summary_line(outcome));
    }
    println!("Done in {}ms", report.execution_time_ms);

    let failed = report.outcomes.iter().filter(|o| o.is_failure()).count();
    if failed > 0 {
        bail!("{} of {} databases failed", failed, report.outcomes.len());
    }
    Ok(())
}

fn summary_line(outcome: &TargetOutcome) -> String {
    let status = match &outcome.status {
        TargetStatus::Initialized => "ledger ready".to_string(),
        TargetStatus::Applied { applied, skipped } if skipped.is_empty() => {
            format!("applied {} migration(s)", applied.len())
        }
        TargetStatus::Applied { applied, skipped } => {
            format!("applied {} migration(s), skipped {} blank", applied.len(), skipped.len())
        }
        TargetStatus::RolledBack { revision } => format!("rolled back {}", revision),
        TargetStatus::NothingToDo => "nothing to do".to_string(),
        TargetStatus::CannotRollBack { revision } => {
            format!("can't roll back {}, it has no downgrade commands", revision)
        }
        TargetStatus::Failed { revision, error, applied } => {
            let mut line = match revision {
                Some(revision) => format!("FAILED at {}: {}", revision, error),
                None => format!("FAILED: {}", error),
            };
            if !applied.is_empty() {
                line.push_str(&format!(" (after applying {})", applied.join(", ")));
            }
            line
        }
    };
    format!("{}: {}", outcome.target, status)
}
