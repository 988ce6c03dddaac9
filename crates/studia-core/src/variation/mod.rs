//! Variation resolver.
//!
//! Chooses the concrete content of each block once per run, from the
//! exercise catalog and the student's level.

mod catalog;
mod resolver;

pub use catalog::{Catalog, CatalogEntry, InMemoryCatalog, Variation};
pub use resolver::{resolve_sequence, resolve_variation, ResolvedBlock};
