//! Migration Graph - orders migration files into a single chain
//!
//! Every migration names the revision it was created after. Following those
//! links from the empty root sentinel yields the application order. Two
//! migrations claiming the same predecessor are a branch and are rejected,
//! never merged.

use std::collections::{BTreeMap, HashMap};

use super::file::MigrationFile;
use crate::error::{MigrateError, MigrateResult};

/// `down_revision` of the first migration
pub const ROOT_REVISION: &str = "";

/// Migration files in application order
#[derive(Debug, Clone, Default)]
pub struct MigrationChain {
    order: Vec<String>,
    positions: HashMap<String, usize>,
    migrations: HashMap<String, MigrationFile>,
}

impl MigrationChain {
    /// Build the chain from an unordered set of migration files.
    pub fn build(migrations: Vec<MigrationFile>) -> MigrateResult<Self> {
        let mut by_revision: BTreeMap<String, MigrationFile> = BTreeMap::new();
        for migration in migrations {
            if by_revision.contains_key(&migration.revision) {
                return Err(MigrateError::DuplicateRevision {
                    revision: migration.revision,
                });
            }
            by_revision.insert(migration.revision.clone(), migration);
        }

        // predecessor -> successor
        let mut successors: HashMap<&str, &str> = HashMap::with_capacity(by_revision.len());
        for migration in by_revision.values() {
            if let Some(existing) = successors.insert(&migration.down_revision, &migration.revision) {
                return Err(MigrateError::BranchConflict {
                    existing: existing.to_string(),
                    conflicting: migration.revision.clone(),
                    shared_predecessor: migration.down_revision.clone(),
                });
            }
        }

        let mut order = Vec::with_capacity(by_revision.len());
        let mut current = ROOT_REVISION;
        while let Some(&next) = successors.get(current) {
            order.push(next.to_string());
            current = next;
        }

        if order.len() != by_revision.len() {
            let visited: std::collections::HashSet<&str> = order.iter().map(String::as_str).collect();
            let revisions = by_revision
                .keys()
                .filter(|revision| !visited.contains(revision.as_str()))
                .cloned()
                .collect();
            return Err(MigrateError::OrphanedMigrations { revisions });
        }

        let positions = order
            .iter()
            .enumerate()
            .map(|(index, revision)| (revision.clone(), index))
            .collect();

        Ok(Self {
            order,
            positions,
            migrations: by_revision.into_iter().collect(),
        })
    }

    /// Revisions in application order
    pub fn revisions(&self) -> &[String] {
        &self.order
    }

    /// Position of `revision` in the chain
    pub fn position(&self, revision: &str) -> Option<usize> {
        self.positions.get(revision).copied()
    }

    /// The migration file for `revision`
    pub fn get(&self, revision: &str) -> Option<&MigrationFile> {
        self.migrations.get(revision)
    }

    /// The newest revision, if any
    pub fn latest(&self) -> Option<&str> {
        self.order.last().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
