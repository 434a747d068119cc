//! Product catalog store. Read-only after ingestion; shared freely across
//! concurrent readers (spec §5 "Catalog: read-only after ingestion, shared
//! freely").

use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use rusqlite::{params, Connection};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::models::Product;

const MAX_CANDIDATE_SAMPLE: usize = 200;

#[derive(Clone)]
pub struct CatalogStore {
    conn: Arc<Mutex<Connection>>,
}

/// Caller-supplied and diversity-derived filters for a candidate query
/// (spec §4.4, §4.5).
#[derive(Debug, Clone, Default)]
pub struct CandidateFilter {
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub category: Option<String>,
    pub avoid_categories: Vec<String>,
    pub avoid_colors: Vec<String>,
    pub avoid_brands: Vec<String>,
    pub exclude_product_ids: HashSet<String>,
}

impl CatalogStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    pub async fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS products (
                product_id TEXT PRIMARY KEY,
                brand TEXT NOT NULL,
                category_main TEXT NOT NULL,
                primary_color TEXT NOT NULL,
                price REAL NOT NULL,
                occasion TEXT,
                season TEXT,
                style TEXT,
                display_name TEXT,
                image_url TEXT,
                feature_vector TEXT NOT NULL
            )",
            [],
        )
        .context("create products table")?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_products_facets
             ON products(category_main, brand, primary_color, price)",
            [],
        )
        .context("create products facet index")?;
        Ok(())
    }

    pub async fn is_empty(&self) -> Result<bool> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM products", [], |r| r.get(0))?;
        Ok(count == 0)
    }

    pub async fn upsert(&self, product: &Product) -> Result<()> {
        let conn = self.conn.lock().await;
        let vec_csv = encode_vector(&product.feature_vector);
        conn.execute(
            "INSERT INTO products
                (product_id, brand, category_main, primary_color, price, occasion, season, style, display_name, image_url, feature_vector)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(product_id) DO UPDATE SET
                brand = excluded.brand,
                category_main = excluded.category_main,
                primary_color = excluded.primary_color,
                price = excluded.price,
                occasion = excluded.occasion,
                season = excluded.season,
                style = excluded.style,
                display_name = excluded.display_name,
                image_url = excluded.image_url,
                feature_vector = excluded.feature_vector",
            params![
                product.product_id,
                product.brand,
                product.category_main,
                product.primary_color,
                product.price,
                product.occasion,
                product.season,
                product.style,
                product.display_name,
                product.image_url,
                vec_csv,
            ],
        )?;
        Ok(())
    }

    pub async fn get(&self, product_id: &str) -> Result<Option<Product>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached("SELECT * FROM products WHERE product_id = ?1")?;
        let mut rows = stmt.query(params![product_id])?;
        if let Some(row) = rows.next()? {
            Ok(Some(row_to_product(row)?))
        } else {
            Ok(None)
        }
    }

    /// Draw a uniform random sample of size <= `MAX_CANDIDATE_SAMPLE` from
    /// rows matching the combined predicate (spec §4.4 "Candidate pool").
    pub async fn sample_candidates(&self, filter: &CandidateFilter) -> Result<Vec<Product>> {
        let conn = self.conn.lock().await;

        let mut sql = String::from("SELECT * FROM products WHERE 1 = 1");
        let mut bind: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(min) = filter.min_price {
            sql.push_str(" AND price >= ?");
            bind.push(Box::new(min));
        }
        if let Some(max) = filter.max_price {
            sql.push_str(" AND price <= ?");
            bind.push(Box::new(max));
        }
        if let Some(cat) = &filter.category {
            sql.push_str(" AND category_main = ?");
            bind.push(Box::new(cat.clone()));
        }
        for c in &filter.avoid_categories {
            sql.push_str(" AND category_main != ?");
            bind.push(Box::new(c.clone()));
        }
        for c in &filter.avoid_colors {
            sql.push_str(" AND primary_color != ?");
            bind.push(Box::new(c.clone()));
        }
        for b in &filter.avoid_brands {
            sql.push_str(" AND brand != ?");
            bind.push(Box::new(b.clone()));
        }

        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = bind.iter().map(|b| b.as_ref()).collect();
        let mut rows = stmt.query(param_refs.as_slice())?;

        let mut all = Vec::new();
        while let Some(row) = rows.next()? {
            let product = row_to_product(row)?;
            if filter.exclude_product_ids.contains(&product.product_id) {
                continue;
            }
            all.push(product);
        }

        let mut rng = rand::thread_rng();
        all.shuffle(&mut rng);
        all.truncate(MAX_CANDIDATE_SAMPLE);
        Ok(all)
    }

    pub async fn count(&self) -> Result<usize> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM products", [], |r| r.get(0))?;
        Ok(count as usize)
    }
}

fn row_to_product(row: &rusqlite::Row) -> rusqlite::Result<Product> {
    let vec_csv: String = row.get("feature_vector")?;
    Ok(Product {
        product_id: row.get("product_id")?,
        brand: row.get("brand")?,
        category_main: row.get("category_main")?,
        primary_color: row.get("primary_color")?,
        price: row.get("price")?,
        occasion: row.get("occasion")?,
        season: row.get("season")?,
        style: row.get("style")?,
        display_name: row.get("display_name")?,
        image_url: row.get("image_url")?,
        feature_vector: decode_vector(&vec_csv),
    })
}

fn encode_vector(v: &[u8]) -> String {
    v.iter().map(|b| b.to_string()).collect::<Vec<_>>().join(",")
}

fn decode_vector(s: &str) -> Vec<u8> {
    if s.is_empty() {
        return Vec::new();
    }
    s.split(',').filter_map(|p| p.parse().ok()).collect()
}
