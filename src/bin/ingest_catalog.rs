//! Catalog Ingestion CLI
//!
//! One-time CSV -> SQLite catalog load, independent of the HTTP service.
//!
//! Usage:
//!   cargo run --bin ingest-catalog -- --db ./fashion_reco.db --csv ./catalog.csv
//!   cargo run --bin ingest-catalog -- --db ./fashion_reco.db --csv ./catalog.csv --force

use anyhow::{Context, Result};
use clap::Parser;
use fashion_reco_backend::catalog::{ingest, CatalogStore};
use rusqlite::Connection;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Parser, Debug)]
#[command(name = "ingest-catalog")]
#[command(about = "Load a product catalog CSV into the fashion recommendation database")]
struct Args {
    /// Path to the SQLite database file
    #[arg(long, env = "DATABASE_URL", default_value = "./fashion_reco.db")]
    db: String,

    /// Path to the catalog CSV
    #[arg(long)]
    csv: String,

    /// Ingest even if the catalog table already has rows
    #[arg(long, default_value = "false")]
    force: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let conn = Connection::open(&args.db).with_context(|| format!("open sqlite db at {}", args.db))?;
    let conn = Arc::new(Mutex::new(conn));
    let store = CatalogStore::new(conn);
    store.init_schema().await?;

    let loaded = if args.force {
        ingest::ingest_csv(&store, &args.csv).await?
    } else {
        ingest::ingest_if_empty(&store, &args.csv).await?
    };

    println!("loaded {loaded} products from {} into {}", args.csv, args.db);
    Ok(())
}
