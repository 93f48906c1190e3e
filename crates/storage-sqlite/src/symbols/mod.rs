//! SQLite storage implementation for merged symbols.

mod model;
mod repository;

pub use model::{MergedSymbolDB, MergedSymbolSlotDB};
pub use repository::MergedSymbolRepository;

#[cfg(test)]
mod tests;
