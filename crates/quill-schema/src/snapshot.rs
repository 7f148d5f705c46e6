//! Flattening and validation of snapshot documents.
//!
//! A [`SchemaSnapshot`] is built once per make-migrations run. Construction
//! resolves, in this order:
//!
//! 1. enumerations into [`FieldType::Choices`] with their encoding tables;
//! 2. inheritance: fields of the abstract base chain are prepended, root first;
//! 3. embedded groups: the group's fields are spliced in place of the
//!    embedding entry, optionally prefixed;
//! 4. ignored fields are validated and dropped from storage;
//! 5. unique and indexed attributes become [`Index`] entries.
//!
//! The result is an ordered list of [`Model`]s that the diff engine compares
//! by table name.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::document::{
    EnumDef, FieldDef, FieldEntry, FieldTypeDef, GroupDef, IndexAttr, ModelDef, SnapshotDocument,
};
use crate::error::{Result, SchemaError};
use crate::lints::{check_attributes, check_default, check_identifier};
use crate::model::{Field, Index, Model};
use crate::types::FieldType;

/// How nullable fields with `auto_update_time` are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NullableAutoUpdate {
    /// Keep the attribute; the update trigger overwrites NULL as well.
    #[default]
    Populate,
    /// Drop the attribute; the application maintains the value.
    Skip,
    /// Refuse the snapshot.
    Reject,
}

/// Options for snapshot construction.
#[derive(Debug, Clone, Default)]
pub struct SnapshotOptions {
    /// Policy for nullable auto-update fields.
    pub nullable_auto_update: NullableAutoUpdate,
}

/// The flattened schema at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaSnapshot {
    version: Option<u64>,
    models: Vec<Model>,
    content_hash: String,
}

impl SchemaSnapshot {
    /// Builds a snapshot from already flattened models.
    pub fn from_models(version: Option<u64>, models: Vec<Model>) -> Result<Self> {
        let content_hash = content_hash(&models)?;
        Ok(Self {
            version,
            models,
            content_hash,
        })
    }

    /// Parses and flattens a JSON snapshot document.
    pub fn from_json(json: &str, options: &SnapshotOptions) -> Result<Self> {
        let document =
            SnapshotDocument::from_json(json).map_err(|e| SchemaError::Document(e.to_string()))?;
        Self::from_document(&document, options)
    }

    /// Flattens and validates a snapshot document.
    pub fn from_document(document: &SnapshotDocument, options: &SnapshotOptions) -> Result<Self> {
        let flattener = Flattener::new(document, options)?;
        let models = flattener.flatten()?;
        Self::from_models(document.version, models)
    }

    /// Version stamp of the source document.
    #[must_use]
    pub fn version(&self) -> Option<u64> {
        self.version
    }

    /// Flattened models in declaration order.
    #[must_use]
    pub fn models(&self) -> &[Model] {
        &self.models
    }

    /// Gets a model by table name.
    #[must_use]
    pub fn get_model(&self, name: &str) -> Option<&Model> {
        self.models.iter().find(|m| m.name == name)
    }

    /// Models keyed by table name.
    #[must_use]
    pub fn by_name(&self) -> BTreeMap<&str, &Model> {
        self.models.iter().map(|m| (m.name.as_str(), m)).collect()
    }

    /// Hex SHA-256 of the canonical JSON encoding of the flattened models.
    #[must_use]
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }
}

fn content_hash(models: &[Model]) -> Result<String> {
    let encoded = serde_json::to_vec(models).map_err(|e| SchemaError::Encoding(e.to_string()))?;
    Ok(hex::encode(Sha256::digest(&encoded)))
}

/// A field declaration together with the column name it flattens to.
struct PendingField<'a> {
    column: String,
    def: &'a FieldDef,
    /// Declared on a base model rather than the model itself.
    inherited: bool,
}

struct Flattener<'a> {
    document: &'a SnapshotDocument,
    options: &'a SnapshotOptions,
    enums: HashMap<&'a str, &'a EnumDef>,
    groups: HashMap<&'a str, &'a GroupDef>,
    models: HashMap<&'a str, &'a ModelDef>,
}

impl<'a> Flattener<'a> {
    fn new(document: &'a SnapshotDocument, options: &'a SnapshotOptions) -> Result<Self> {
        let mut enums = HashMap::new();
        for def in &document.enums {
            validate_enum(def)?;
            if enums.insert(def.name.as_str(), def).is_some() {
                return Err(duplicate("enumeration", &def.name));
            }
        }

        let mut groups = HashMap::new();
        for def in &document.groups {
            if groups.insert(def.name.as_str(), def).is_some() {
                return Err(duplicate("group", &def.name));
            }
        }

        let mut models = HashMap::new();
        for def in &document.models {
            check_identifier(&def.name)?;
            if models.insert(def.name.as_str(), def).is_some() {
                return Err(duplicate("model", &def.name));
            }
        }

        Ok(Self {
            document,
            options,
            enums,
            groups,
            models,
        })
    }

    fn flatten(&self) -> Result<Vec<Model>> {
        let mut tables = HashSet::new();
        let mut index_names = HashSet::new();
        let mut flattened = Vec::new();

        for def in self.document.models.iter().filter(|m| !m.is_abstract) {
            let model = self.flatten_model(def)?;
            if !tables.insert(model.name.clone()) {
                return Err(duplicate("table", &model.name));
            }
            for index in &model.indexes {
                if !index_names.insert(index.name.clone()) {
                    return Err(duplicate("index", &index.name));
                }
            }
            flattened.push(model);
        }

        Ok(flattened)
    }

    /// Base models first, the model itself last.
    fn lineage(&self, def: &'a ModelDef) -> Result<Vec<&'a ModelDef>> {
        let mut chain = vec![def];
        let mut seen = HashSet::from([def.name.as_str()]);
        let mut current = def;

        while let Some(base_name) = &current.extends {
            let base = self
                .models
                .get(base_name.as_str())
                .copied()
                .ok_or_else(|| SchemaError::UnknownBase {
                    model: current.name.clone(),
                    base: base_name.clone(),
                })?;
            if !base.is_abstract {
                return Err(SchemaError::BaseNotAbstract {
                    model: current.name.clone(),
                    base: base.name.clone(),
                });
            }
            if !seen.insert(base.name.as_str()) {
                return Err(SchemaError::InheritanceCycle(base.name.clone()));
            }
            chain.push(base);
            current = base;
        }

        chain.reverse();
        Ok(chain)
    }

    fn expand_fields(&self, def: &ModelDef, lineage: &[&'a ModelDef]) -> Result<Vec<PendingField<'a>>> {
        let mut pending = Vec::new();
        for &ancestor in lineage {
            let inherited = !std::ptr::eq(ancestor, def);
            for entry in &ancestor.fields {
                match entry {
                    FieldEntry::Field(field) => pending.push(PendingField {
                        column: field.name.clone(),
                        def: field,
                        inherited,
                    }),
                    FieldEntry::Embed(embed) => {
                        let group: &'a GroupDef = self
                            .groups
                            .get(embed.embed.as_str())
                            .copied()
                            .ok_or_else(|| SchemaError::UnknownGroup {
                                model: def.name.clone(),
                                group: embed.embed.clone(),
                            })?;
                        let prefix = embed.prefix.as_deref().unwrap_or("");
                        pending.extend(group.fields.iter().map(|field| PendingField {
                            column: format!("{prefix}{}", field.name),
                            def: field,
                            inherited,
                        }));
                    }
                }
            }
        }
        Ok(pending)
    }

    fn resolve_type(&self, model: &str, column: &str, declared: &FieldTypeDef) -> Result<FieldType> {
        match declared {
            FieldTypeDef::Type(FieldType::Choices { name, values }) => {
                validate_values(name, values.iter().map(String::as_str))?;
                Ok(FieldType::Choices {
                    name: name.clone(),
                    values: values.clone(),
                })
            }
            FieldTypeDef::Type(field_type) => Ok(field_type.clone()),
            FieldTypeDef::Enum { name } => {
                let def = self
                    .enums
                    .get(name.as_str())
                    .ok_or_else(|| SchemaError::UnknownEnum {
                        model: model.to_string(),
                        field: column.to_string(),
                        name: name.clone(),
                    })?;
                Ok(FieldType::Choices {
                    name: def.name.clone(),
                    values: def
                        .variants
                        .iter()
                        .map(|v| v.encoding().to_string())
                        .collect(),
                })
            }
        }
    }

    fn flatten_model(&self, def: &'a ModelDef) -> Result<Model> {
        let table = def.table_name().to_string();
        check_identifier(&table)?;

        let lineage = self.lineage(def)?;
        let pending = self.expand_fields(def, &lineage)?;

        let mut seen = HashSet::new();
        let mut ignored = HashSet::new();
        let mut fields = Vec::new();
        let mut indexes = Vec::new();
        let mut composite: BTreeMap<&str, Vec<(i32, usize, String)>> = BTreeMap::new();
        let mut own_composite = HashSet::new();

        for (position, PendingField { column, def: field, inherited }) in
            pending.into_iter().enumerate()
        {
            check_identifier(&column)?;
            if !seen.insert(column.clone()) {
                return Err(SchemaError::DuplicateField {
                    model: def.name.clone(),
                    field: column,
                });
            }

            if field.primary_key && field.ignored {
                return Err(SchemaError::InvalidPrimaryKey {
                    model: def.name.clone(),
                    field: column,
                    reason: "ignored",
                });
            }
            if field.primary_key && field.nullable {
                return Err(SchemaError::InvalidPrimaryKey {
                    model: def.name.clone(),
                    field: column,
                    reason: "nullable",
                });
            }
            if field.ignored {
                check_ignored(&def.name, &column, field)?;
                ignored.insert(column);
                continue;
            }

            let field_type = self.resolve_type(&def.name, &column, &field.field_type)?;
            check_attributes(field, &field_type).map_err(|message| {
                SchemaError::InvalidAnnotations {
                    model: def.name.clone(),
                    field: column.clone(),
                    message,
                }
            })?;
            if let Some(default) = &field.default {
                check_default(default, &field_type, field.max_length).map_err(|message| {
                    SchemaError::InvalidDefault {
                        model: def.name.clone(),
                        field: column.clone(),
                        message,
                    }
                })?;
            }

            let mut auto_update_time = field.auto_update_time;
            if auto_update_time && field.nullable {
                match self.options.nullable_auto_update {
                    NullableAutoUpdate::Populate => {}
                    NullableAutoUpdate::Skip => {
                        warn!(
                            model = %def.name,
                            field = %column,
                            "Ignoring auto_update_time on nullable field"
                        );
                        auto_update_time = false;
                    }
                    NullableAutoUpdate::Reject => {
                        return Err(SchemaError::InvalidAnnotations {
                            model: def.name.clone(),
                            field: column,
                            message: "auto_update_time on a nullable field is rejected by configuration"
                                .into(),
                        });
                    }
                }
            }

            if field.unique {
                indexes.push(Index::new(
                    format!("uq_{table}_{column}"),
                    [column.clone()],
                    true,
                ));
            }
            match &field.index {
                Some(IndexAttr { name: Some(name), priority }) => {
                    if !inherited {
                        own_composite.insert(name.as_str());
                    }
                    composite.entry(name.as_str()).or_default().push((
                        priority.unwrap_or(i32::MAX),
                        position,
                        column.clone(),
                    ));
                }
                Some(IndexAttr { name: None, .. }) if !field.unique => {
                    indexes.push(Index::new(
                        format!("idx_{table}_{column}"),
                        [column.clone()],
                        false,
                    ));
                }
                _ => {}
            }

            fields.push(Field {
                name: column,
                field_type,
                nullable: field.nullable,
                primary_key: field.primary_key,
                auto_increment: field.auto_increment,
                max_length: field.max_length,
                default: field.default.clone(),
                auto_create_time: field.auto_create_time,
                auto_update_time,
            });
        }

        if !fields.iter().any(|f| f.primary_key) {
            return Err(SchemaError::MissingPrimaryKey(def.name.clone()));
        }

        // Index names declared only on base models are qualified with the
        // table, so every model extending the base gets its own index.
        let qualify = |name: &str, inherited: bool| {
            if inherited {
                format!("{table}_{name}")
            } else {
                name.to_string()
            }
        };

        for (name, mut members) in composite {
            let name = qualify(name, !own_composite.contains(name));
            check_identifier(&name)?;
            members.sort_by_key(|(priority, position, _)| (*priority, *position));
            indexes.push(Index::new(
                name,
                members.into_iter().map(|(_, _, column)| column),
                false,
            ));
        }

        for &ancestor in &lineage {
            let inherited = !std::ptr::eq(ancestor, def);
            for index in &ancestor.indexes {
                let name = qualify(&index.name, inherited);
                check_identifier(&name)?;
                for column in &index.fields {
                    if ignored.contains(column) || !fields.iter().any(|f| &f.name == column) {
                        return Err(SchemaError::UnknownIndexField {
                            model: def.name.clone(),
                            index: index.name.clone(),
                            field: column.clone(),
                        });
                    }
                }
                indexes.push(Index::new(name, index.fields.iter().cloned(), index.unique));
            }
        }

        Ok(Model {
            name: table,
            fields,
            indexes,
        })
    }
}

fn duplicate(kind: &'static str, name: &str) -> SchemaError {
    SchemaError::DuplicateDeclaration {
        kind,
        name: name.to_string(),
    }
}

fn validate_enum(def: &EnumDef) -> Result<()> {
    let mut names = HashSet::new();
    for variant in &def.variants {
        if !names.insert(variant.name.as_str()) {
            return Err(SchemaError::InvalidEnum {
                name: def.name.clone(),
                message: format!("duplicate variant '{}'", variant.name),
            });
        }
    }
    validate_values(&def.name, def.variants.iter().map(|v| v.encoding()))
}

fn validate_values<'v>(name: &str, values: impl Iterator<Item = &'v str>) -> Result<()> {
    let invalid = |message: String| SchemaError::InvalidEnum {
        name: name.to_string(),
        message,
    };

    let mut seen = HashSet::new();
    for value in values {
        if value.is_empty() {
            return Err(invalid("empty encoding".into()));
        }
        if !seen.insert(value) {
            return Err(invalid(format!("duplicate encoding '{value}'")));
        }
    }
    if seen.is_empty() {
        return Err(invalid("no variants".into()));
    }
    Ok(())
}

fn check_ignored(model: &str, column: &str, def: &FieldDef) -> Result<()> {
    let attribute = if def.default.is_some() {
        Some("default")
    } else if def.unique {
        Some("unique")
    } else if def.index.is_some() {
        Some("index")
    } else if def.max_length.is_some() {
        Some("max_length")
    } else if def.auto_create_time {
        Some("auto_create_time")
    } else if def.auto_update_time {
        Some("auto_update_time")
    } else if def.auto_increment {
        Some("auto_increment")
    } else {
        None
    };

    match attribute {
        Some(attribute) => Err(SchemaError::IgnoredWithAttribute {
            model: model.to_string(),
            field: column.to_string(),
            attribute,
        }),
        None => Ok(()),
    }
}
