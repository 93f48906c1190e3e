//! Typed helpers over stored documents: identity, diff and patch.

mod document;
mod patch;

pub use document::{
    derive_document_id, document_id, from_document, identity_of, to_document, Document,
    IdentityKey, KeyedDocuments,
};
pub use patch::{apply_patch, diff_documents, DocumentPatch};
