//! Field-level diffing and patch application.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::document::Document;
use crate::constants::DOCUMENT_ID_FIELD;

/// A set/unset patch against one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentPatch {
    /// Fields to write, with their new values.
    pub set: Document,
    /// Fields to remove.
    pub unset: Vec<String>,
}

impl DocumentPatch {
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.unset.is_empty()
    }

    /// Patch setting a single field.
    pub fn set_field(field: &str, value: Value) -> Self {
        let mut set = Document::new();
        set.insert(field.to_string(), value);
        Self {
            set,
            unset: Vec::new(),
        }
    }

    /// Names of every field the patch touches.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.set
            .keys()
            .map(String::as_str)
            .chain(self.unset.iter().map(String::as_str))
    }

    /// True when the patch is non-empty and touches nothing outside `allowed`.
    pub fn touches_only(&self, allowed: &[&str]) -> bool {
        !self.is_empty() && self.fields().all(|f| allowed.contains(&f))
    }
}

/// Computes the patch turning `previous` into `next`.
///
/// Changed or newly present fields are set; fields present in `previous` but
/// absent or null in `next` are unset. The document key is never unset.
pub fn diff_documents(previous: &Document, next: &Document) -> DocumentPatch {
    let mut patch = DocumentPatch::default();

    for (field, value) in next {
        if value.is_null() {
            continue;
        }
        if previous.get(field) != Some(value) {
            patch.set.insert(field.clone(), value.clone());
        }
    }

    for (field, value) in previous {
        if value.is_null() || field == DOCUMENT_ID_FIELD {
            continue;
        }
        if next.get(field).map_or(true, Value::is_null) {
            patch.unset.push(field.clone());
        }
    }
    patch.unset.sort();

    patch
}

/// Applies `patch` to `document` in place. Returns true if anything changed.
pub fn apply_patch(document: &mut Document, patch: &DocumentPatch) -> bool {
    let mut changed = false;
    for (field, value) in &patch.set {
        if document.get(field) != Some(value) {
            document.insert(field.clone(), value.clone());
            changed = true;
        }
    }
    for field in &patch.unset {
        if document.remove(field).is_some() {
            changed = true;
        }
    }
    changed
}
