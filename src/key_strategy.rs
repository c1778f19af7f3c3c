use crate::{Error, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tracing::debug;

/// Pure derivation of an optional partition key from a record.
///
/// `Ok(None)` lets the broker choose placement (e.g. round-robin);
/// `Ok(Some(key))` routes deterministically by `key`, preserving relative
/// order for records sharing it.
pub trait PartitionKeyStrategy<T>: Send + Sync {
    fn partition_key(&self, record: &T) -> Result<Option<String>>;
}

impl<T, F> PartitionKeyStrategy<T> for F
where
    F: Fn(&T) -> Option<String> + Send + Sync,
{
    fn partition_key(&self, record: &T) -> Result<Option<String>> {
        Ok(self(record))
    }
}

/// Keys every record by the stringified hash of its value.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashKey;

impl<T: Hash> PartitionKeyStrategy<T> for HashKey {
    fn partition_key(&self, record: &T) -> Result<Option<String>> {
        let mut hasher = DefaultHasher::new();
        record.hash(&mut hasher);
        Ok(Some(hasher.finish().to_string()))
    }
}

/// Keys a record by fields of its JSON form.
#[derive(Debug, Clone)]
pub enum JsonKeyStrategy {
    /// Dotted path into the record, e.g. `"user.profile.email"`.
    FieldPath(String),
    /// `:`-joined values of the named fields.
    Composite(Vec<String>),
}

impl<T: Serialize> PartitionKeyStrategy<T> for JsonKeyStrategy {
    fn partition_key(&self, record: &T) -> Result<Option<String>> {
        let value =
            serde_json::to_value(record).map_err(|e| Error::PartitionKey(e.to_string()))?;

        Ok(match self {
            JsonKeyStrategy::FieldPath(path) => extract_field_value(&value, path),
            JsonKeyStrategy::Composite(fields) => extract_composite_key(&value, fields),
        })
    }
}

fn extract_field_value(record: &Value, field_path: &str) -> Option<String> {
    let parts: Vec<&str> = field_path.split('.').collect();
    let mut current = record;

    for part in parts {
        match current.get(part) {
            Some(value) => current = value,
            None => {
                debug!("Field '{}' not found in record", part);
                return None;
            }
        }
    }

    match current {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => None,
        _ => Some(current.to_string()),
    }
}

fn extract_composite_key(record: &Value, fields: &[String]) -> Option<String> {
    let mut key_parts = Vec::new();

    for field in fields {
        if let Some(value) = extract_field_value(record, field) {
            key_parts.push(value);
        } else {
            debug!("Missing field '{}' for composite key", field);
            return None;
        }
    }

    if key_parts.is_empty() {
        None
    } else {
        Some(key_parts.join(":"))
    }
}
