//! Identifier and attribute linting.

use std::sync::LazyLock;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;

use crate::document::FieldDef;
use crate::error::{Result, SchemaError};
use crate::types::{DefaultValue, FieldType};

static NUMERIC_ONLY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+$").expect("valid regex"));
static FORBIDDEN_CHARACTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9_]").expect("valid regex"));

/// Prefix reserved for the engine's own tables.
pub const RESERVED_PREFIX: &str = "_quill";

/// Checks that a model, table, field or index name can be used unquoted in
/// every supported dialect.
pub fn check_identifier(name: &str) -> Result<()> {
    let fail = |message| {
        Err(SchemaError::InvalidIdentifier {
            name: name.to_string(),
            message,
        })
    };

    if name.is_empty() {
        return fail("must not be empty");
    }
    if FORBIDDEN_CHARACTER.is_match(name) {
        return fail("only [a-zA-Z0-9_] are allowed");
    }
    if NUMERIC_ONLY.is_match(name) {
        return fail("must not be numeric only");
    }
    if name.starts_with(RESERVED_PREFIX) {
        return fail("prefix is reserved for the migration ledger");
    }
    if name.starts_with('_') || name.ends_with('_') {
        return fail("must not start or end with '_'");
    }
    if name.to_ascii_lowercase().starts_with("sqlite_") {
        return fail("prefix 'sqlite_' is reserved by SQLite");
    }
    Ok(())
}

/// Checks that a field's attributes are consistent with each other and with
/// its resolved type. Returns a message describing the first conflict.
pub fn check_attributes(def: &FieldDef, field_type: &FieldType) -> std::result::Result<(), String> {
    if def.auto_increment {
        if !def.primary_key {
            return Err("auto_increment requires primary_key".into());
        }
        if !field_type.is_integer() {
            return Err(format!(
                "auto_increment requires an integer type, found {}",
                field_type.kind_name()
            ));
        }
        if def.default.is_some() {
            return Err("auto_increment and default are mutually exclusive".into());
        }
    }

    if (def.auto_create_time || def.auto_update_time) && !field_type.is_temporal() {
        return Err(format!(
            "auto_create_time and auto_update_time require a date or time type, found {}",
            field_type.kind_name()
        ));
    }
    if def.auto_create_time && def.default.is_some() {
        return Err("auto_create_time and default are mutually exclusive".into());
    }
    if def.primary_key && def.default.is_some() {
        return Err("primary_key and default are mutually exclusive".into());
    }
    if def.primary_key && def.unique {
        return Err("primary_key is already unique".into());
    }
    if def.primary_key && def.index.is_some() {
        return Err("primary_key is already indexed".into());
    }

    match (def.max_length, field_type.accepts_max_length()) {
        (Some(_), false) => {
            return Err(format!(
                "max_length is not valid on {}",
                field_type.kind_name()
            ))
        }
        (Some(0), true) => return Err("max_length must be positive".into()),
        (None, true) if *field_type == FieldType::VarChar => {
            return Err("var_char requires max_length".into())
        }
        _ => {}
    }

    if def.auto_update_time && !def.nullable && def.default.is_none() && !def.auto_create_time {
        return Err(
            "auto_update_time on a non-nullable field requires default or auto_create_time".into(),
        );
    }

    Ok(())
}

/// Checks that a default literal fits the field it is attached to.
pub fn check_default(
    default: &DefaultValue,
    field_type: &FieldType,
    max_length: Option<u32>,
) -> std::result::Result<(), String> {
    let mismatch = || {
        Err(format!(
            "{} literal does not fit {}",
            default.kind_name(),
            field_type.kind_name()
        ))
    };

    match (field_type, default) {
        (t, DefaultValue::Integer(value)) if t.is_integer() => {
            let (min, max) = t.integer_range().unwrap_or((i64::MIN, i64::MAX));
            if *value < min || *value > max {
                return Err(format!("{value} is out of range for {}", t.kind_name()));
            }
            Ok(())
        }
        (t, DefaultValue::Integer(_) | DefaultValue::Float(_)) if t.is_float() => Ok(()),
        (FieldType::Boolean, DefaultValue::Boolean(_)) => Ok(()),
        (FieldType::VarChar, DefaultValue::String(value)) => match max_length {
            Some(limit) if value.chars().count() > limit as usize => {
                Err(format!("'{value}' is longer than max_length {limit}"))
            }
            _ => Ok(()),
        },
        (FieldType::VarBinary, DefaultValue::String(value)) => {
            let bytes =
                hex::decode(value).map_err(|e| format!("binary default must be hex: {e}"))?;
            match max_length {
                Some(limit) if bytes.len() > limit as usize => {
                    Err(format!("{} bytes exceed max_length {limit}", bytes.len()))
                }
                _ => Ok(()),
            }
        }
        (FieldType::Choices { name, values }, DefaultValue::String(value)) => {
            if values.contains(value) {
                Ok(())
            } else {
                Err(format!("'{value}' is not a value of enumeration '{name}'"))
            }
        }
        (FieldType::Date, DefaultValue::String(value)) => value
            .parse::<NaiveDate>()
            .map(|_| ())
            .map_err(|e| format!("'{value}' is not a date: {e}")),
        (FieldType::Time, DefaultValue::String(value)) => value
            .parse::<NaiveTime>()
            .map(|_| ())
            .map_err(|e| format!("'{value}' is not a time: {e}")),
        (FieldType::DateTime, DefaultValue::String(value)) => value
            .parse::<NaiveDateTime>()
            .map(|_| ())
            .map_err(|e| format!("'{value}' is not a date time: {e}")),
        (FieldType::Timestamp, DefaultValue::String(value)) => {
            if value.parse::<DateTime<FixedOffset>>().is_ok()
                || value.parse::<NaiveDateTime>().is_ok()
            {
                Ok(())
            } else {
                Err(format!("'{value}' is not a timestamp"))
            }
        }
        _ => mismatch(),
    }
}
