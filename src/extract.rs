//! Indexable-field extraction
//!
//! The cache never interprets advertisement payloads itself. Callers supply
//! an [`IndexValueExtractor`] that turns a payload into the attribute pairs
//! the secondary index should carry. Extraction runs on save and during
//! index rebuild; a failure on save fails the whole save so no unindexed
//! record is left behind, while rebuild logs and skips the record.
//!
//! [`JsonFieldExtractor`] is the stock implementation for JSON-encoded
//! advertisements with a configured field list per namespace.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use thiserror::Error;

/// A payload could not be decoded into indexable attributes.
#[derive(Debug, Error)]
#[error("malformed document: {0}")]
pub struct ExtractError(pub String);

/// Extracts the (attribute name, attribute value) pairs to index a payload
/// under. Implementations must be deterministic for a given payload.
pub trait IndexValueExtractor: Send {
    /// Returns the attribute pairs for `payload` in `namespace`.
    ///
    /// An empty map is valid and means "store but do not index".
    fn extract(
        &self,
        namespace: &str,
        payload: &[u8],
    ) -> Result<BTreeMap<String, String>, ExtractError>;
}

/// Extractor for JSON payloads with a per-namespace indexable-field list.
///
/// Namespaces without a configured field list are stored unindexed and the
/// payload is never parsed (raw/opaque namespaces stay opaque). For
/// configured namespaces the payload must be a JSON object; top-level
/// string, number, and bool fields from the list become attribute values,
/// everything else is skipped.
#[derive(Debug, Default)]
pub struct JsonFieldExtractor {
    /// namespace -> indexable field names
    fields: HashMap<String, Vec<String>>,
}

impl JsonFieldExtractor {
    /// Creates an extractor with no indexed namespaces.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the indexable fields for a namespace.
    pub fn with_fields(
        mut self,
        namespace: impl Into<String>,
        fields: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.fields
            .insert(namespace.into(), fields.into_iter().map(Into::into).collect());
        self
    }
}

impl IndexValueExtractor for JsonFieldExtractor {
    fn extract(
        &self,
        namespace: &str,
        payload: &[u8],
    ) -> Result<BTreeMap<String, String>, ExtractError> {
        let Some(fields) = self.fields.get(namespace) else {
            return Ok(BTreeMap::new());
        };

        let value: Value = serde_json::from_slice(payload)
            .map_err(|e| ExtractError(format!("invalid JSON payload: {}", e)))?;
        let Value::Object(object) = value else {
            return Err(ExtractError("payload is not a JSON object".into()));
        };

        let mut attrs = BTreeMap::new();
        for field in fields {
            match object.get(field) {
                Some(Value::String(s)) => {
                    attrs.insert(field.clone(), s.clone());
                }
                Some(Value::Number(n)) => {
                    attrs.insert(field.clone(), n.to_string());
                }
                Some(Value::Bool(b)) => {
                    attrs.insert(field.clone(), b.to_string());
                }
                // Arrays, objects, null, and absent fields are not indexed
                _ => {}
            }
        }
        Ok(attrs)
    }
}
