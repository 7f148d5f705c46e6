//! Migration file generation.
//!
//! The writer compares the current model snapshot with the schema the
//! existing chain produces and appends a new record for the difference.

use std::path::{Path, PathBuf};

use quill_schema::SchemaSnapshot;
use tracing::info;

use crate::autodetector::{Autodetector, AutodetectorOptions};
use crate::chain::MigrationChain;
use crate::error::{MigrateError, Result};
use crate::migration::MigrationRecord;
use crate::operations::MigrationOperation;
use crate::state::SchemaState;

/// A record produced by [`MigrationWriter::make_migration`].
#[derive(Debug, Clone, PartialEq)]
pub struct NewMigration {
    /// The new record.
    pub record: MigrationRecord,
    /// Where the record lives (or would live, on a dry run).
    pub path: PathBuf,
    /// Whether the file was written.
    pub written: bool,
}

/// Appends records to a migration directory.
pub struct MigrationWriter {
    dir: PathBuf,
    autodetector: Autodetector,
    label: Option<String>,
    dry_run: bool,
}

impl MigrationWriter {
    /// Creates a writer for `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            autodetector: Autodetector::new(),
            label: None,
            dry_run: false,
        }
    }

    /// Supplies rename hints to the diff.
    #[must_use]
    pub fn renames(mut self, options: AutodetectorOptions) -> Self {
        self.autodetector = Autodetector::with_options(options);
        self
    }

    /// Overrides the generated label (`initial` or `auto`).
    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Builds the record without writing it.
    #[must_use]
    pub fn dry_run(mut self, enabled: bool) -> Self {
        self.dry_run = enabled;
        self
    }

    /// Returns the migration directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Diffs `current` against the chain and appends a record when they differ.
    ///
    /// Returns `None` when the models match the head of the chain.
    pub fn make_migration(&self, current: &SchemaSnapshot) -> Result<Option<NewMigration>> {
        let chain = MigrationChain::load(&self.dir)?;

        if chain
            .head()
            .is_some_and(|head| head.snapshot_hash == current.content_hash())
        {
            info!("No changes detected");
            return Ok(None);
        }

        let mut state = chain.replay()?;
        let previous = if chain.is_empty() {
            None
        } else {
            Some(state.to_snapshot()?)
        };
        let operations = self.autodetector.diff(previous.as_ref(), current)?;
        if operations.is_empty() {
            info!("No changes detected");
            return Ok(None);
        }
        Self::check_replay(&mut state, &operations, current)?;

        let label = match &self.label {
            Some(label) => label.clone(),
            None if chain.is_empty() => "initial".to_string(),
            None => "auto".to_string(),
        };
        let record = MigrationRecord::new(
            chain.next_id(&label)?,
            chain.head().map(|head| head.id.clone()),
            current.content_hash(),
            operations,
        );

        info!(
            migration = %record.id,
            version = ?current.version(),
            operations = record.operations.len(),
            "New migration"
        );
        for operation in &record.operations {
            info!(migration = %record.id, "  {}", operation.description());
        }

        if self.dry_run {
            return Ok(Some(NewMigration {
                path: self.dir.join(record.id.file_name()),
                record,
                written: false,
            }));
        }

        let path = record.write(&self.dir)?;
        info!(path = %path.display(), "Created migration");
        Ok(Some(NewMigration {
            record,
            path,
            written: true,
        }))
    }

    /// Fails unless `operations` apply on top of the chain and reproduce
    /// `current`, so no record is written that the chain cannot replay.
    fn check_replay(
        state: &mut SchemaState,
        operations: &[MigrationOperation],
        current: &SchemaSnapshot,
    ) -> Result<()> {
        for operation in operations {
            state.apply_operation(operation).map_err(|e| {
                MigrateError::InvalidState(format!(
                    "the new migration cannot be applied after the existing chain ({e}); \
                     split the change into separate migrations"
                ))
            })?;
        }
        let leftover = Autodetector::new().diff(Some(&state.to_snapshot()?), current)?;
        if let Some(operation) = leftover.first() {
            return Err(MigrateError::InvalidState(format!(
                "replaying the new migration does not reproduce the models: {}",
                operation.description()
            )));
        }
        Ok(())
    }
}
