use anyhow::{bail, Result};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::config::Config;
use crate::db;
use crate::embedding::{self, EmbeddingProvider};
use crate::sqlite_store::{PendingProduct, SqliteStore};

/// Outcome of one embedding pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EmbedStats {
    pub total: u64,
    pub embedded: u64,
    pub failed: u64,
}

/// Find and embed products whose vectors are missing or stale.
pub async fn run_embed_pending(
    config: &Config,
    limit: Option<usize>,
    batch_size_override: Option<usize>,
    dry_run: bool,
) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let provider = embedding::create_provider(&config.embedding)?;
    let store = SqliteStore::new(db::connect(config).await?);
    let batch_size = batch_size_override.unwrap_or(config.embedding.batch_size);

    if dry_run {
        let pending = store
            .pending_embeddings(provider.model_name(), limit)
            .await?;
        println!("embed pending (dry-run)");
        println!("  products needing embeddings: {}", pending.len());
        return Ok(());
    }

    let stats = embed_pending(&store, provider.as_ref(), limit, batch_size).await?;

    println!("embed pending");
    if stats.total == 0 {
        println!("  all products up to date");
    } else {
        println!("  total pending: {}", stats.total);
        println!("  embedded: {}", stats.embedded);
        println!("  failed: {}", stats.failed);
    }

    store.pool().close().await;
    Ok(())
}

/// Delete all vectors and regenerate them for every product.
pub async fn run_embed_rebuild(config: &Config, batch_size_override: Option<usize>) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let provider = embedding::create_provider(&config.embedding)?;
    let store = SqliteStore::new(db::connect(config).await?);
    let batch_size = batch_size_override.unwrap_or(config.embedding.batch_size);

    let cleared = store.clear_vectors().await?;
    info!(cleared, "cleared existing embeddings");

    let stats = embed_pending(&store, provider.as_ref(), None, batch_size).await?;

    println!("embed rebuild");
    println!("  cleared: {}", cleared);
    println!("  total products: {}", stats.total);
    println!("  embedded: {}", stats.embedded);
    println!("  failed: {}", stats.failed);

    store.pool().close().await;
    Ok(())
}

pub async fn embed_pending(
    store: &SqliteStore,
    provider: &dyn EmbeddingProvider,
    limit: Option<usize>,
    batch_size: usize,
) -> Result<EmbedStats> {
    let pending = store
        .pending_embeddings(provider.model_name(), limit)
        .await?;
    Ok(embed_products(store, provider, &pending, batch_size).await)
}

/// Embed `items` in batches and store the vectors. Failures are logged and
/// counted, never returned: the products stay pending for a later pass.
pub async fn embed_products(
    store: &SqliteStore,
    provider: &dyn EmbeddingProvider,
    items: &[PendingProduct],
    batch_size: usize,
) -> EmbedStats {
    let mut stats = EmbedStats {
        total: items.len() as u64,
        ..Default::default()
    };
    let model = provider.model_name().to_string();

    for batch in items.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|p| p.search_text.clone()).collect();

        let vectors = match provider.embed(&texts).await {
            Ok(v) if v.len() == batch.len() => v,
            Ok(v) => {
                warn!(
                    expected = batch.len(),
                    got = v.len(),
                    "embedding batch returned wrong number of vectors"
                );
                stats.failed += batch.len() as u64;
                continue;
            }
            Err(e) => {
                warn!(error = %e, size = batch.len(), "embedding batch failed");
                stats.failed += batch.len() as u64;
                continue;
            }
        };

        for (item, vector) in batch.iter().zip(&vectors) {
            if provider.dims() > 0 && vector.len() != provider.dims() {
                warn!(
                    product_id = item.id,
                    expected = provider.dims(),
                    got = vector.len(),
                    "embedding has unexpected dimensionality"
                );
                stats.failed += 1;
                continue;
            }
            match store
                .upsert_vector(item.id, vector, &model, &item.content_hash)
                .await
            {
                Ok(()) => stats.embedded += 1,
                Err(e) => {
                    warn!(product_id = item.id, error = %e, "failed to store embedding");
                    stats.failed += 1;
                }
            }
        }
    }

    stats
}

pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
