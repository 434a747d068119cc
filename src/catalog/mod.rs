//! Catalog — the product store (C1's data) and feature extractor (C1).

pub mod features;
pub mod ingest;
pub mod store;

pub use features::{extract_features, slot_label, FeatureInput};
pub use store::{CandidateFilter, CatalogStore};
