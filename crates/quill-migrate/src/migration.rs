//! Migration records and their on-disk encoding.
//!
//! Each record is one TOML file named `NNNN_label.toml` holding the record
//! identifier, its predecessor, the hash of the snapshot it was generated
//! from and the ordered operation list. Records are written once and never
//! modified afterwards.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{MigrateError, Result};
use crate::operations::MigrationOperation;

static ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9]{4,})_(\w+)$").expect("valid regex"));
static LABEL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_]+$").expect("valid regex"));

/// Pattern migration file names must match.
pub static FILE_NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{4,}_\w+\.toml$").expect("valid regex"));

const FILE_HEADER: &str = "# Generated by quill-migrate. Do not edit applied migrations.\n\n";

/// Stable identifier of a migration record: sequence number plus label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MigrationId {
    sequence: u32,
    label: String,
}

impl MigrationId {
    /// Creates an identifier, validating the label.
    pub fn new(sequence: u32, label: impl Into<String>) -> Result<Self> {
        let label = label.into();
        if sequence == 0 {
            return Err(MigrateError::InvalidState(
                "Migration sequence numbers start at 1".to_string(),
            ));
        }
        if !LABEL_PATTERN.is_match(&label) {
            return Err(MigrateError::InvalidState(format!(
                "Invalid migration label '{label}': only [a-zA-Z0-9_] are allowed"
            )));
        }
        Ok(Self { sequence, label })
    }

    /// Position of the record in the chain, starting at 1.
    #[must_use]
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Human label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// File name the record is stored under.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{self}.toml")
    }
}

impl fmt::Display for MigrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}_{}", self.sequence, self.label)
    }
}

impl FromStr for MigrationId {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let captures = ID_PATTERN
            .captures(s)
            .ok_or_else(|| format!("'{s}' is not a migration identifier"))?;
        let sequence = captures[1]
            .parse::<u32>()
            .map_err(|e| format!("'{s}': {e}"))?;
        Self::new(sequence, &captures[2]).map_err(|e| e.to_string())
    }
}

impl TryFrom<String> for MigrationId {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MigrationId> for String {
    fn from(id: MigrationId) -> Self {
        id.to_string()
    }
}

/// One immutable unit of schema change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationRecord {
    /// Identifier.
    pub id: MigrationId,
    /// The record this one follows; `None` for the root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predecessor: Option<MigrationId>,
    /// Content hash of the snapshot this record brings the schema to.
    pub snapshot_hash: String,
    /// Operations in application order.
    #[serde(default)]
    pub operations: Vec<MigrationOperation>,
}

#[derive(Serialize)]
struct MigrationFileRef<'a> {
    migration: &'a MigrationRecord,
}

#[derive(Deserialize)]
struct MigrationFile {
    migration: MigrationRecord,
}

impl MigrationRecord {
    /// Creates a record.
    #[must_use]
    pub fn new(
        id: MigrationId,
        predecessor: Option<MigrationId>,
        snapshot_hash: impl Into<String>,
        operations: Vec<MigrationOperation>,
    ) -> Self {
        Self {
            id,
            predecessor,
            snapshot_hash: snapshot_hash.into(),
            operations,
        }
    }

    /// Encodes the record as TOML.
    pub fn to_toml(&self) -> Result<String> {
        let body = toml::to_string_pretty(&MigrationFileRef { migration: self })?;
        Ok(format!("{FILE_HEADER}{body}"))
    }

    /// Decodes a record from TOML.
    pub fn from_toml(text: &str, path: &Path) -> Result<Self> {
        toml::from_str::<MigrationFile>(text)
            .map(|file| file.migration)
            .map_err(|e| MigrateError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
    }

    /// Reads a record and checks that its file name matches its identifier.
    pub fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let record = Self::from_toml(&text, path)?;

        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if file_name != record.id.file_name() {
            return Err(MigrateError::Parse {
                path: path.to_path_buf(),
                message: format!("file contains migration '{}'", record.id),
            });
        }
        Ok(record)
    }

    /// Writes the record into `dir`. Existing files are never overwritten.
    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(self.id.file_name());
        if path.exists() {
            return Err(MigrateError::MigrationExists(path));
        }
        fs::write(&path, self.to_toml()?)?;
        Ok(path)
    }
}
