//! One-time CSV -> catalog ingestion. Out of scope for algorithmic design
//! (spec §1); this is a thin collaborator that parses rows and hands them
//! to `CatalogStore` via `C1`'s feature extractor.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::{info, warn};

use super::features::{extract_features, FeatureInput};
use super::store::CatalogStore;
use crate::models::Product;

#[derive(Debug, serde::Deserialize)]
struct ProductRow {
    product_id: String,
    brand: String,
    category_main: String,
    primary_color: String,
    price: f64,
    #[serde(default)]
    occasion: Option<String>,
    #[serde(default)]
    season: Option<String>,
    #[serde(default)]
    style: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    image_url: Option<String>,
}

/// Load products from `csv_path` into `store` if it is currently empty.
/// Idempotent: a populated store is left untouched.
pub async fn ingest_if_empty(store: &CatalogStore, csv_path: &str) -> Result<usize> {
    if !store.is_empty().await? {
        info!("catalog already populated, skipping ingestion");
        return Ok(0);
    }
    ingest_csv(store, csv_path).await
}

pub async fn ingest_csv(store: &CatalogStore, csv_path: &str) -> Result<usize> {
    let path = Path::new(csv_path);
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("open catalog csv at {csv_path}"))?;

    let mut loaded = 0usize;
    for result in reader.deserialize::<ProductRow>() {
        let row = match result {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "skipping malformed catalog row");
                continue;
            }
        };

        let feature_vector = extract_features(&FeatureInput {
            category_main: &row.category_main,
            primary_color: &row.primary_color,
            occasion: row.occasion.as_deref(),
            season: row.season.as_deref(),
            style: row.style.as_deref(),
        });

        let product = Product {
            product_id: row.product_id,
            brand: row.brand,
            category_main: row.category_main,
            primary_color: row.primary_color,
            price: row.price.max(0.0),
            occasion: row.occasion,
            season: row.season,
            style: row.style,
            display_name: row.display_name,
            image_url: row.image_url,
            feature_vector,
        };

        store.upsert(&product).await?;
        loaded += 1;
    }

    info!(loaded, csv_path, "catalog ingestion complete");
    Ok(loaded)
}
