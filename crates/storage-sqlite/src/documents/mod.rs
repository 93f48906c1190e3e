//! SQLite storage for sync-engine documents.

mod model;
mod repository;

pub use model::DocumentDB;
pub use repository::DocumentRepository;
