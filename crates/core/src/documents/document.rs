//! Document representation and identity helpers.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt::Write as _;

use crate::constants::{DOCUMENT_ID_FIELD, KEY_SEPARATOR};
use crate::errors::{Result, ValidationError};

/// A stored document: a JSON object keyed by field name.
pub type Document = Map<String, Value>;

/// Structural identity of a document under an ordered list of key fields.
///
/// Two documents have the same identity when the JSON values of every key
/// field are equal, independent of object key order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityKey(String);

impl IdentityKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Serializes a typed record into a document.
pub fn to_document<T: Serialize>(record: &T) -> Result<Document> {
    match serde_json::to_value(record)? {
        Value::Object(map) => Ok(map),
        other => Err(ValidationError::MalformedDocument(format!(
            "expected an object, got {}",
            type_name(&other)
        ))
        .into()),
    }
}

/// Deserializes a document back into a typed record.
pub fn from_document<T: DeserializeOwned>(document: Document) -> Result<T> {
    Ok(serde_json::from_value(Value::Object(document))?)
}

/// Returns the stored document key, if present and a string.
pub fn document_id(document: &Document) -> Option<&str> {
    document.get(DOCUMENT_ID_FIELD).and_then(Value::as_str)
}

/// Computes the identity of `document` under `fields`.
///
/// Returns `None` when any key field is absent or null.
pub fn identity_of(document: &Document, fields: &[&str]) -> Option<IdentityKey> {
    let mut out = String::new();
    for (i, field) in fields.iter().enumerate() {
        let value = document.get(*field).filter(|v| !v.is_null())?;
        if i > 0 {
            out.push('\u{1f}');
        }
        write_canonical(value, &mut out);
    }
    Some(IdentityKey(out))
}

/// Derives a document key from the identity fields, joining scalar values with
/// [`KEY_SEPARATOR`]. Strings are used verbatim, other values as JSON.
pub fn derive_document_id(document: &Document, fields: &[&str]) -> Option<String> {
    let mut parts = Vec::with_capacity(fields.len());
    for field in fields {
        let value = document.get(*field).filter(|v| !v.is_null())?;
        match value {
            Value::String(s) => parts.push(s.clone()),
            other => {
                let mut s = String::new();
                write_canonical(other, &mut s);
                parts.push(s);
            }
        }
    }
    Some(parts.join(KEY_SEPARATOR))
}

/// Documents indexed by identity. Later duplicates replace earlier ones.
#[derive(Debug, Default)]
pub struct KeyedDocuments {
    by_key: HashMap<IdentityKey, Document>,
}

impl KeyedDocuments {
    /// Indexes `documents` by `fields`, skipping documents without a complete key.
    pub fn index(documents: Vec<Document>, fields: &[&str]) -> Self {
        let mut by_key = HashMap::with_capacity(documents.len());
        for document in documents {
            if let Some(key) = identity_of(&document, fields) {
                by_key.insert(key, document);
            }
        }
        Self { by_key }
    }

    pub fn get(&self, key: &IdentityKey) -> Option<&Document> {
        self.by_key.get(key)
    }
}

/// Writes a canonical JSON rendering: object keys sorted, no whitespace.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{}", Value::String(key.clone()));
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => {
            let _ = write!(out, "{}", scalar);
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_identity_is_structural() {
        let a = doc(json!({"key": {"x": 1, "y": "b"}, "other": 1}));
        let b = doc(json!({"other": 2, "key": {"y": "b", "x": 1}}));
        assert_eq!(identity_of(&a, &["key"]), identity_of(&b, &["key"]));
    }

    #[test]
    fn test_identity_requires_all_fields() {
        let d = doc(json!({"symbolId": "AAPL", "date": null}));
        assert!(identity_of(&d, &["symbolId", "date"]).is_none());
        assert!(identity_of(&d, &["symbolId"]).is_some());
    }

    #[test]
    fn test_identity_distinguishes_types() {
        let a = doc(json!({"k": "1"}));
        let b = doc(json!({"k": 1}));
        assert_ne!(identity_of(&a, &["k"]), identity_of(&b, &["k"]));
    }

    #[test]
    fn test_derive_document_id() {
        let d = doc(json!({"symbolId": "AAPL", "date": "2024-01-02", "n": 3}));
        assert_eq!(
            derive_document_id(&d, &["symbolId", "date"]).as_deref(),
            Some("AAPL|2024-01-02")
        );
        assert_eq!(derive_document_id(&d, &["symbolId", "n"]).as_deref(), Some("AAPL|3"));
        assert!(derive_document_id(&d, &["missing"]).is_none());
    }

    #[test]
    fn test_keyed_documents_last_duplicate_wins() {
        let docs = vec![
            doc(json!({"id": "a", "v": 1})),
            doc(json!({"id": "a", "v": 2})),
            doc(json!({"v": 3})),
        ];
        let keyed = KeyedDocuments::index(docs, &["id"]);
        let key = identity_of(&doc(json!({"id": "a"})), &["id"]).unwrap();
        assert_eq!(keyed.get(&key).unwrap()["v"], json!(2));
    }

    #[test]
    fn test_to_document_rejects_non_objects() {
        assert!(to_document(&vec![1, 2]).is_err());
        assert!(to_document(&json!({"a": 1})).is_ok());
    }
}
