//! In-memory targets for driving the runner without a database server

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use dbmigrate_engine::{
    Connector, LedgerEntry, MigrateError, MigrateResult, MigrationConfig, MigrationDirection,
    MigrationManager, MigrationObserver, MigrationRunner, TargetConfig, TargetOutcome, TargetSession,
};

/// Any body containing this marker fails to execute
pub const FAIL_MARKER: &str = "-- fail";

#[derive(Debug, Default)]
pub struct DatabaseState {
    pub ledger_created: bool,
    pub ledger: Vec<LedgerEntry>,
    /// Bodies of committed steps, in order
    pub executed: Vec<String>,
    pub refuse_connections: bool,
    pub opened: usize,
    pub closed: usize,
}

impl DatabaseState {
    pub fn head(&self) -> Option<String> {
        let mut entries: Vec<&LedgerEntry> = self.ledger.iter().filter(|e| e.is_applied()).collect();
        entries.sort_by_key(|e| e.applied_at);
        entries.last().map(|e| e.version.clone())
    }

    pub fn versions(&self) -> Vec<String> {
        self.ledger.iter().map(|e| e.version.clone()).collect()
    }
}

/// A database living in memory, shared between the test and its sessions
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<DatabaseState>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Database whose ledger already holds `versions`, oldest first
    pub fn at(versions: &[&str]) -> Self {
        let db = Self::new();
        {
            let mut state = db.state();
            state.ledger_created = true;
            let start = Utc::now() - Duration::hours(1);
            for (i, version) in versions.iter().enumerate() {
                state.ledger.push(LedgerEntry {
                    version: version.to_string(),
                    applied_at: start + Duration::seconds(i as i64),
                    rolled_back: None,
                });
            }
        }
        db
    }

    pub fn unreachable() -> Self {
        let db = Self::new();
        db.state().refuse_connections = true;
        db
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, DatabaseState> {
        self.state.lock().unwrap()
    }
}

/// Hands out sessions on in-memory databases keyed by target URI
#[derive(Debug, Default)]
pub struct MemoryConnector {
    databases: HashMap<String, MemoryDatabase>,
    pub attempts: Mutex<usize>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a database and return its target
    pub fn add(&mut self, name: &str, db: MemoryDatabase) -> TargetConfig {
        let uri = format!("postgres://tester:secret@{}:5432/app", name);
        self.databases.insert(uri.clone(), db);
        TargetConfig::from_uri(uri, "public")
    }

    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }
}

fn uri_of(target: &TargetConfig) -> String {
    match &target.connection {
        dbmigrate_engine::TargetConnection::Uri(uri) => uri.clone(),
        other => panic!("memory targets use URIs, got {:?}", other),
    }
}

fn execution_error(revision: &str) -> MigrateError {
    MigrateError::StepFailed {
        revision: revision.to_string(),
        source: sqlx::Error::Protocol(format!("syntax error in {}", revision)),
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, target: &TargetConfig) -> MigrateResult<Box<dyn TargetSession>> {
        *self.attempts.lock().unwrap() += 1;
        let db = self
            .databases
            .get(&uri_of(target))
            .cloned()
            .unwrap_or_default();
        {
            let mut state = db.state();
            if state.refuse_connections {
                return Err(MigrateError::Connection {
                    target: target.display_name(),
                    source: sqlx::Error::PoolTimedOut,
                });
            }
            state.opened += 1;
        }
        Ok(Box::new(MemorySession { db }))
    }
}

pub struct MemorySession {
    db: MemoryDatabase,
}

#[async_trait]
impl TargetSession for MemorySession {
    async fn ensure_ledger(&mut self) -> MigrateResult<()> {
        self.db.state().ledger_created = true;
        Ok(())
    }

    async fn current_head(&mut self) -> MigrateResult<Option<String>> {
        Ok(self.db.state().head())
    }

    async fn apply_step(&mut self, revision: &str, sql: &str, applied_at: DateTime<Utc>) -> MigrateResult<()> {
        let mut state = self.db.state();
        if sql.contains(FAIL_MARKER) {
            return Err(execution_error(revision));
        }
        state.executed.push(sql.to_string());
        state.ledger.push(LedgerEntry {
            version: revision.to_string(),
            applied_at,
            rolled_back: None,
        });
        Ok(())
    }

    async fn revert_step(&mut self, revision: &str, sql: &str) -> MigrateResult<()> {
        let mut state = self.db.state();
        if sql.contains(FAIL_MARKER) {
            return Err(execution_error(revision));
        }
        let entry = state
            .ledger
            .iter_mut()
            .find(|e| e.version == revision && e.is_applied())
            .ok_or_else(|| MigrateError::LedgerEntryMissing {
                revision: revision.to_string(),
            })?;
        entry.rolled_back = Some(true);
        state.executed.push(sql.to_string());
        Ok(())
    }

    async fn close(self: Box<Self>) -> MigrateResult<()> {
        self.db.state().closed += 1;
        Ok(())
    }
}

/// Records observer callbacks as strings
#[derive(Debug, Default)]
pub struct RecordingObserver {
    pub events: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl MigrationObserver for RecordingObserver {
    fn on_target_started(&self, _target: &str, direction: Option<MigrationDirection>) {
        self.push(format!("start {:?}", direction));
    }

    fn on_step_started(&self, _target: &str, direction: MigrationDirection, revision: &str) {
        self.push(format!("{} {}", direction, revision));
    }

    fn on_step_finished(&self, _target: &str, _direction: MigrationDirection, revision: &str) {
        self.push(format!("done {}", revision));
    }

    fn on_step_skipped(&self, _target: &str, revision: &str) {
        self.push(format!("skip {}", revision));
    }

    fn on_step_failed(&self, _target: &str, _direction: MigrationDirection, revision: &str, _error: &MigrateError) {
        self.push(format!("fail {}", revision));
    }

    fn on_target_finished(&self, outcome: &TargetOutcome) {
        self.push(format!("finish failed={}", outcome.is_failure()));
    }
}

/// Write a migration file into `dir`
pub fn write_migration(dir: &Path, revision: &str, down_revision: &str, upgrade: &str, downgrade: &str) {
    std::fs::create_dir_all(dir).unwrap();
    let text = format!(
        "-- revision: '{}'\n-- down_revision: '{}'\n\n-- upgrade\n{}\n\n-- downgrade\n{}\n",
        revision, down_revision, upgrade, downgrade
    );
    std::fs::write(dir.join(format!("{}.sql", revision)), text).unwrap();
}

/// Chain `a -> b -> c`, each creating and dropping its own table
pub fn write_abc(dir: &Path) {
    write_migration(dir, "a", "", "CREATE TABLE a ();", "DROP TABLE a;");
    write_migration(dir, "b", "a", "CREATE TABLE b ();", "DROP TABLE b;");
    write_migration(dir, "c", "b", "CREATE TABLE c ();", "DROP TABLE c;");
}

pub fn runner(dir: &Path, connector: Arc<MemoryConnector>) -> MigrationRunner {
    let config = MigrationConfig {
        versions_dir: dir.to_path_buf(),
        schema_dir: dir.to_path_buf(),
        ..Default::default()
    };
    MigrationRunner::with_connector(MigrationManager::with_config(config), connector)
}
