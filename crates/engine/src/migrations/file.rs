//! Migration File - parsing and templating of a single migration
//!
//! A migration file carries its own identity in two comment markers and two
//! section delimiters:
//!
//! ```text
//! -- revision: '20240101120000_create_users'
//! -- down_revision: ''
//!
//! -- upgrade
//! CREATE TABLE users (id serial primary key);
//!
//! -- downgrade
//! DROP TABLE users;
//! ```
//!
//! Bodies are kept verbatim. They are never split into statements; the driver
//! receives each body as one batch.

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};

use crate::error::{MigrateError, MigrateResult};

static REVISION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^-- revision:[ \t]*'([^']+)'[ \t]*\r?$").expect("valid regex"));
static DOWN_REVISION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^-- down_revision:[ \t]*'([^']*)'[ \t]*\r?$").expect("valid regex")
});
static UPGRADE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^-- upgrade[ \t]*\r?$").expect("valid regex"));
static DOWNGRADE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^-- downgrade[ \t]*\r?$").expect("valid regex"));

/// A migration as read from disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    /// Unique identifier of this migration
    pub revision: String,
    /// Revision this one was created after, empty for the first migration
    pub down_revision: String,
    /// Commands run when moving forward
    pub upgrade_body: String,
    /// Commands run when moving backward. Blank means the step can't be undone.
    pub downgrade_body: String,
    /// File the migration was read from
    pub source: Option<PathBuf>,
}

impl MigrationFile {
    /// Parse migration text that didn't come from a file
    pub fn parse(text: &str) -> MigrateResult<Self> {
        Self::parse_from(text, None)
    }

    /// Parse migration text read from `path`
    pub fn parse_with_source(text: &str, path: &Path) -> MigrateResult<Self> {
        Self::parse_from(text, Some(path.to_path_buf()))
    }

    fn parse_from(text: &str, source: Option<PathBuf>) -> MigrateResult<Self> {
        let revision = single_marker(&REVISION_RE, text, "revision", &source)?;
        let down_revision = single_marker(&DOWN_REVISION_RE, text, "down_revision", &source)?;

        let upgrade = UPGRADE_RE
            .find(text)
            .ok_or_else(|| MigrateError::malformed(source.clone(), "missing '-- upgrade' section"))?;
        let downgrade = DOWNGRADE_RE
            .find_at(text, upgrade.end())
            .ok_or_else(|| {
                MigrateError::malformed(
                    source.clone(),
                    "missing '-- downgrade' section after '-- upgrade'",
                )
            })?;

        Ok(Self {
            revision,
            down_revision,
            upgrade_body: text[upgrade.end()..downgrade.start()].to_string(),
            downgrade_body: text[downgrade.end()..].to_string(),
            source,
        })
    }

    /// Blank migration text linking `revision` to `down_revision`
    pub fn template(revision: &str, down_revision: &str) -> String {
        format!(
            "-- revision: '{}'\n\
             -- down_revision: '{}'\n\n\
             -- upgrade\n\n\
             -- downgrade\n",
            revision, down_revision
        )
    }

    /// Whether this is the first migration of a chain
    pub fn is_root(&self) -> bool {
        self.down_revision.is_empty()
    }

    /// Whether there is anything to run forward
    pub fn has_upgrade(&self) -> bool {
        !self.upgrade_body.trim().is_empty()
    }

    /// Whether the migration can be undone
    pub fn has_downgrade(&self) -> bool {
        !self.downgrade_body.trim().is_empty()
    }
}

fn single_marker(
    re: &Regex,
    text: &str,
    name: &str,
    source: &Option<PathBuf>,
) -> MigrateResult<String> {
    let mut captures = re.captures_iter(text);
    let first = captures
        .next()
        .ok_or_else(|| MigrateError::malformed(source.clone(), format!("missing '-- {}:' marker", name)))?;
    if captures.next().is_some() {
        return Err(MigrateError::malformed(
            source.clone(),
            format!("'-- {}:' marker appears more than once", name),
        ));
    }
    Ok(first[1].to_string())
}
