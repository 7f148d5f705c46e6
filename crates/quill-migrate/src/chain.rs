//! The linear migration chain.
//!
//! A chain is valid only if it has exactly one root, every other record
//! follows the record directly before it, and no two records share a
//! predecessor. Any other shape is a [`MigrateError::ChainIntegrity`] error.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::{MigrateError, Result};
use crate::migration::{MigrationId, MigrationRecord, FILE_NAME_PATTERN};
use crate::state::SchemaState;

/// An ordered, validated sequence of migration records from root to head.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MigrationChain {
    records: Vec<MigrationRecord>,
}

impl MigrationChain {
    /// Creates an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Orders and validates records. Fails if they do not form one line.
    pub fn from_records(records: Vec<MigrationRecord>) -> Result<Self> {
        if records.is_empty() {
            return Ok(Self::new());
        }

        let mut ids = HashSet::new();
        for record in &records {
            if !ids.insert(&record.id) {
                return Err(MigrateError::ChainIntegrity(format!(
                    "migration '{}' appears twice",
                    record.id
                )));
            }
        }

        let mut successors: HashMap<Option<&MigrationId>, &MigrationRecord> = HashMap::new();
        for record in &records {
            if let Some(other) = successors.insert(record.predecessor.as_ref(), record) {
                let parent = record
                    .predecessor
                    .as_ref()
                    .map_or_else(|| "nothing".to_string(), ToString::to_string);
                let (first, second) = if other.id < record.id {
                    (&other.id, &record.id)
                } else {
                    (&record.id, &other.id)
                };
                return Err(MigrateError::ChainIntegrity(format!(
                    "migrations '{first}' and '{second}' both follow {parent}"
                )));
            }
        }

        let mut ordered = Vec::with_capacity(records.len());
        let mut current = successors
            .get(&None)
            .copied()
            .ok_or_else(|| MigrateError::ChainIntegrity("no root migration".to_string()))?;
        loop {
            let expected = u32::try_from(ordered.len() + 1).unwrap_or(u32::MAX);
            if current.id.sequence() != expected {
                return Err(MigrateError::ChainIntegrity(format!(
                    "migration '{}' is at position {expected}",
                    current.id
                )));
            }
            ordered.push(current.clone());
            match successors.get(&Some(&current.id)) {
                Some(next) => current = next,
                None => break,
            }
        }

        if ordered.len() != records.len() {
            let orphans: Vec<String> = records
                .iter()
                .filter(|r| !ordered.iter().any(|o| o.id == r.id))
                .map(|r| r.id.to_string())
                .collect();
            return Err(MigrateError::ChainIntegrity(format!(
                "migrations not reachable from the root: {}",
                orphans.join(", ")
            )));
        }

        Ok(Self { records: ordered })
    }

    /// Loads every `NNNN_label.toml` file from `dir`. A missing directory is
    /// an empty chain.
    pub fn load(dir: &Path) -> Result<Self> {
        if !dir.exists() {
            debug!(dir = %dir.display(), "Migration directory does not exist");
            return Ok(Self::new());
        }

        let mut paths = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            if FILE_NAME_PATTERN.is_match(name) {
                paths.push(path);
            } else {
                warn!(file = %path.display(), "Ignoring file that is not a migration");
            }
        }
        paths.sort();

        let records = paths
            .iter()
            .map(|p| MigrationRecord::read(p))
            .collect::<Result<Vec<_>>>()?;
        Self::from_records(records)
    }

    /// Records from root to head.
    #[must_use]
    pub fn records(&self) -> &[MigrationRecord] {
        &self.records
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the chain has no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The latest record.
    #[must_use]
    pub fn head(&self) -> Option<&MigrationRecord> {
        self.records.last()
    }

    /// Position of a record by its identifier string.
    #[must_use]
    pub fn position(&self, id: &str) -> Option<usize> {
        self.records.iter().position(|r| r.id.to_string() == id)
    }

    /// Identifier for a new record appended with `label`.
    pub fn next_id(&self, label: &str) -> Result<MigrationId> {
        let sequence = self.head().map_or(0, |r| r.id.sequence()) + 1;
        MigrationId::new(sequence, label)
    }

    /// Appends a record; it must follow the current head.
    pub fn push(&mut self, record: MigrationRecord) -> Result<()> {
        let head = self.head().map(|r| &r.id);
        if record.predecessor.as_ref() != head {
            return Err(MigrateError::ChainIntegrity(format!(
                "migration '{}' does not follow the head of the chain",
                record.id
            )));
        }
        let expected = u32::try_from(self.records.len() + 1).unwrap_or(u32::MAX);
        if record.id.sequence() != expected {
            return Err(MigrateError::ChainIntegrity(format!(
                "migration '{}' is at position {expected}",
                record.id
            )));
        }
        self.records.push(record);
        Ok(())
    }

    /// Replays every record from an empty schema.
    pub fn replay(&self) -> Result<SchemaState> {
        SchemaState::from_records(&self.records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_schema::{Field, FieldType};

    use crate::operations::MigrationOperation;

    fn id(sequence: u32, label: &str) -> MigrationId {
        MigrationId::new(sequence, label).unwrap()
    }

    fn record(sequence: u32, label: &str, predecessor: Option<MigrationId>) -> MigrationRecord {
        MigrationRecord::new(id(sequence, label), predecessor, "hash", Vec::new())
    }

    fn linear() -> Vec<MigrationRecord> {
        vec![
            record(1, "initial", None),
            record(2, "add_age", Some(id(1, "initial"))),
            record(3, "add_email", Some(id(2, "add_age"))),
        ]
    }

    #[test]
    fn test_orders_records() {
        let mut records = linear();
        records.reverse();

        let chain = MigrationChain::from_records(records).unwrap();
        let ids: Vec<String> = chain.records().iter().map(|r| r.id.to_string()).collect();
        assert_eq!(ids, vec!["0001_initial", "0002_add_age", "0003_add_email"]);
        assert_eq!(chain.head().unwrap().id.to_string(), "0003_add_email");
        assert_eq!(chain.position("0002_add_age"), Some(1));
    }

    #[test]
    fn test_branching_rejected() {
        let mut records = linear();
        records.push(record(3, "other", Some(id(2, "add_age"))));

        let err = MigrationChain::from_records(records).unwrap_err();
        match err {
            MigrateError::ChainIntegrity(message) => {
                assert!(message.contains("0003_add_email"));
                assert!(message.contains("0003_other"));
            }
            other => panic!("Expected ChainIntegrity, got {other:?}"),
        }
    }

    #[test]
    fn test_two_roots_rejected() {
        let records = vec![record(1, "initial", None), record(2, "second_root", None)];
        assert!(matches!(
            MigrationChain::from_records(records),
            Err(MigrateError::ChainIntegrity(_))
        ));
    }

    #[test]
    fn test_gap_rejected() {
        let records = vec![
            record(1, "initial", None),
            record(3, "add_email", Some(id(2, "add_age"))),
        ];
        assert!(matches!(
            MigrationChain::from_records(records),
            Err(MigrateError::ChainIntegrity(_))
        ));
    }

    #[test]
    fn test_sequence_must_match_position() {
        let records = vec![
            record(1, "initial", None),
            record(5, "add_age", Some(id(1, "initial"))),
        ];
        assert!(matches!(
            MigrationChain::from_records(records),
            Err(MigrateError::ChainIntegrity(_))
        ));
    }

    #[test]
    fn test_push_enforces_head() {
        let mut chain = MigrationChain::from_records(linear()).unwrap();
        assert_eq!(chain.next_id("next").unwrap().to_string(), "0004_next");

        let stale = record(4, "stale", Some(id(2, "add_age")));
        assert!(chain.push(stale).is_err());

        let next = record(4, "next", Some(id(3, "add_email")));
        chain.push(next).unwrap();
        assert_eq!(chain.len(), 4);
    }

    #[test]
    fn test_load_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        let initial = MigrationRecord::new(
            id(1, "initial"),
            None,
            "h1",
            vec![MigrationOperation::create_table(
                "users",
                vec![Field::new("id", FieldType::Int64).primary_key()],
            )],
        );
        let second = MigrationRecord::new(
            id(2, "add_name"),
            Some(id(1, "initial")),
            "h2",
            vec![MigrationOperation::add_column(
                "users",
                Field::new("name", FieldType::VarChar).max_length(20).nullable(),
            )],
        );
        initial.write(dir.path()).unwrap();
        second.write(dir.path()).unwrap();
        std::fs::write(dir.path().join("README.md"), "notes").unwrap();

        let chain = MigrationChain::load(dir.path()).unwrap();
        assert_eq!(chain.len(), 2);

        let state = chain.replay().unwrap();
        assert_eq!(state.get_model("users").unwrap().fields.len(), 2);
    }

    #[test]
    fn test_load_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let chain = MigrationChain::load(&dir.path().join("missing")).unwrap();
        assert!(chain.is_empty());
    }

    #[test]
    fn test_load_rejects_branching_files() {
        let dir = tempfile::tempdir().unwrap();
        record(1, "initial", None).write(dir.path()).unwrap();
        record(2, "left", Some(id(1, "initial"))).write(dir.path()).unwrap();
        record(2, "right", Some(id(1, "initial"))).write(dir.path()).unwrap();

        assert!(matches!(
            MigrationChain::load(dir.path()),
            Err(MigrateError::ChainIntegrity(_))
        ));
    }
}
