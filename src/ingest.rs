//! Product ingestion.
//!
//! Reads product records from a JSON Lines file or a JSON array, upserts
//! them into SQLite under their canonical id, and embeds new or changed
//! products inline when an embedding provider is configured. Embedding
//! failures are non-fatal: affected products stay pending for
//! `psearch embed pending`.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};

use product_search_core::models::{ProductId, ProductPayload};

use crate::config::Config;
use crate::db;
use crate::embed_cmd::{embed_products, hash_text};
use crate::embedding::{self, EmbeddingProvider};
use crate::sqlite_store::SqliteStore;

/// One input record: an optional explicit id plus payload fields.
#[derive(Debug, Clone, Deserialize)]
pub struct ProductRecord {
    #[serde(default)]
    pub id: Option<ProductId>,
    #[serde(flatten)]
    pub payload: ProductPayload,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestStats {
    pub read: u64,
    pub upserted: u64,
    pub skipped: u64,
    pub embedded: u64,
    pub embeddings_pending: u64,
}

/// Parse a JSON array (if the content starts with `[`) or JSON Lines.
pub fn parse_records(content: &str) -> Result<Vec<ProductRecord>> {
    if content.trim_start().starts_with('[') {
        return serde_json::from_str(content).context("Failed to parse JSON array of products");
    }

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).with_context(|| format!("Invalid product on line {}", i + 1))
        })
        .collect()
}

pub async fn run_ingest(
    config: &Config,
    path: &Path,
    limit: Option<usize>,
    dry_run: bool,
) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let mut records = parse_records(&content)?;
    if let Some(lim) = limit {
        records.truncate(lim);
    }

    if dry_run {
        let indexable = records
            .iter()
            .filter(|r| !r.payload.searchable_text(&config.lexical.text_fields).is_empty())
            .count();
        println!("ingest {} (dry-run)", path.display());
        println!("  records found: {}", records.len());
        println!("  indexable: {}", indexable);
        return Ok(());
    }

    let store = SqliteStore::new(db::connect(config).await?);
    let provider = if config.embedding.is_enabled() {
        match embedding::create_provider(&config.embedding) {
            Ok(p) => Some(p),
            Err(e) => {
                warn!(error = %e, "could not create embedding provider; skipping inline embedding");
                None
            }
        }
    } else {
        None
    };

    let stats = ingest_records(
        &store,
        provider.as_deref(),
        records,
        &config.lexical.text_fields,
        config.embedding.batch_size,
    )
    .await?;

    println!("ingest {}", path.display());
    println!("  read: {}", stats.read);
    println!("  upserted products: {}", stats.upserted);
    println!("  skipped (no searchable text): {}", stats.skipped);
    if config.embedding.is_enabled() {
        println!("  embeddings written: {}", stats.embedded);
        println!("  embeddings pending: {}", stats.embeddings_pending);
    }
    println!("ok");

    store.pool().close().await;
    Ok(())
}

/// Upsert `records` and embed what changed. Returns counts.
///
/// A search index built earlier in the same process does not see these
/// products until it is rebuilt.
pub async fn ingest_records(
    store: &SqliteStore,
    provider: Option<&dyn EmbeddingProvider>,
    records: Vec<ProductRecord>,
    text_fields: &[String],
    batch_size: usize,
) -> Result<IngestStats> {
    if text_fields.is_empty() {
        bail!("no text fields configured for ingestion");
    }

    let mut stats = IngestStats {
        read: records.len() as u64,
        ..Default::default()
    };
    let mut touched: HashSet<ProductId> = HashSet::new();

    for record in records {
        let text = record.payload.searchable_text(text_fields);
        if text.is_empty() {
            debug!(id = ?record.id, "skipping record without searchable text");
            stats.skipped += 1;
            continue;
        }
        let id = store
            .upsert_product(record.id, &record.payload, &text, &hash_text(&text))
            .await?;
        touched.insert(id);
        stats.upserted += 1;
    }

    info!(
        upserted = stats.upserted,
        skipped = stats.skipped,
        "products ingested"
    );

    if let Some(provider) = provider {
        let pending: Vec<_> = store
            .pending_embeddings(provider.model_name(), None)
            .await?
            .into_iter()
            .filter(|p| touched.contains(&p.id))
            .collect();
        let embed = embed_products(store, provider, &pending, batch_size).await;
        stats.embedded = embed.embedded;
        stats.embeddings_pending = embed.failed;
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_jsonl_skips_blank_lines() {
        let content = r#"{"id": 1, "title": "Canon EOS R6"}

{"title": "Sony A7", "price": 1999}
"#;
        let records = parse_records(content).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, Some(1));
        assert_eq!(records[1].id, None);
        assert_eq!(records[1].payload.price.as_deref(), Some("1999"));
    }

    #[test]
    fn test_parse_json_array() {
        let content = r#"[{"id": 5, "title": "Tripod", "color": "black"}]"#;
        let records = parse_records(content).unwrap();
        assert_eq!(records[0].id, Some(5));
        assert_eq!(
            records[0].payload.extra.get("color"),
            Some(&serde_json::json!("black"))
        );
        assert!(!records[0].payload.extra.contains_key("id"));
    }

    #[test]
    fn test_parse_reports_line_number() {
        let content = "{\"title\": \"ok\"}\n{not json}\n";
        let err = parse_records(content).unwrap_err();
        assert!(format!("{:#}", err).contains("line 2"));
    }
}
