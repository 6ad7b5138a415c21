//! SQLite-backed retrieval collaborators.
//!
//! [`SqliteStore`] implements both [`CorpusSource`] (snapshot enumeration
//! for the lexical index) and [`VectorRetriever`] (brute-force cosine
//! similarity over `product_vectors`). Both report the canonical
//! `products.id`, so their hits fuse by identity.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::warn;

use product_search_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use product_search_core::models::{Hit, Product, ProductId, ProductPayload};
use product_search_core::store::{CorpusSource, VectorRetriever};

/// A product whose stored vector is missing or stale.
#[derive(Debug, Clone)]
pub struct PendingProduct {
    pub id: ProductId,
    pub search_text: String,
    pub content_hash: String,
}

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert or replace a product row. With `id = None` SQLite assigns
    /// the next rowid. Returns the canonical id.
    pub async fn upsert_product(
        &self,
        id: Option<ProductId>,
        payload: &ProductPayload,
        search_text: &str,
        content_hash: &str,
    ) -> Result<ProductId> {
        let now = chrono::Utc::now().timestamp();
        let payload_json = serde_json::to_string(payload)?;

        let row = sqlx::query(
            r#"
            INSERT INTO products (id, payload_json, search_text, content_hash, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                payload_json = excluded.payload_json,
                search_text = excluded.search_text,
                content_hash = excluded.content_hash,
                updated_at = excluded.updated_at
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(&payload_json)
        .bind(search_text)
        .bind(content_hash)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("id"))
    }

    pub async fn upsert_vector(
        &self,
        product_id: ProductId,
        vector: &[f32],
        model: &str,
        content_hash: &str,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let blob = vec_to_blob(vector);

        sqlx::query(
            r#"
            INSERT INTO product_vectors (product_id, embedding, model, dims, content_hash, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(product_id) DO UPDATE SET
                embedding = excluded.embedding,
                model = excluded.model,
                dims = excluded.dims,
                content_hash = excluded.content_hash,
                created_at = excluded.created_at
            "#,
        )
        .bind(product_id)
        .bind(&blob)
        .bind(model)
        .bind(vector.len() as i64)
        .bind(content_hash)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Products with no vector, or whose vector was built from different
    /// text or by a different model.
    pub async fn pending_embeddings(
        &self,
        model: &str,
        limit: Option<usize>,
    ) -> Result<Vec<PendingProduct>> {
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let rows = sqlx::query(
            r#"
            SELECT p.id, p.search_text, p.content_hash
            FROM products p
            LEFT JOIN product_vectors v ON v.product_id = p.id
            WHERE v.product_id IS NULL
               OR v.content_hash != p.content_hash
               OR v.model != ?
            ORDER BY p.id
            LIMIT ?
            "#,
        )
        .bind(model)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| PendingProduct {
                id: row.get("id"),
                search_text: row.get("search_text"),
                content_hash: row.get("content_hash"),
            })
            .collect())
    }

    pub async fn clear_vectors(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM product_vectors")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn product_count(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(&self.pool)
            .await?)
    }

    pub async fn vector_count(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM product_vectors")
            .fetch_one(&self.pool)
            .await?)
    }
}

fn parse_payload(json: &str) -> Result<ProductPayload> {
    Ok(serde_json::from_str(json)?)
}

#[async_trait]
impl CorpusSource for SqliteStore {
    async fn fetch_corpus(&self, limit: usize) -> Result<Vec<Product>> {
        let rows = sqlx::query("SELECT id, payload_json FROM products ORDER BY id LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        let mut products = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: ProductId = row.get("id");
            let payload_json: String = row.get("payload_json");
            match parse_payload(&payload_json) {
                Ok(payload) => products.push(Product { id, payload }),
                Err(e) => warn!(product_id = id, error = %e, "skipping product with malformed payload"),
            }
        }
        Ok(products)
    }
}

#[async_trait]
impl VectorRetriever for SqliteStore {
    async fn vector_search(&self, query_vec: &[f32], limit: usize) -> Result<Vec<Hit>> {
        let rows = sqlx::query(
            r#"
            SELECT v.product_id, v.embedding, p.payload_json
            FROM product_vectors v
            JOIN products p ON p.id = v.product_id
            WHERE v.dims = ?
            "#,
        )
        .bind(query_vec.len() as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut hits: Vec<Hit> = rows
            .iter()
            .filter_map(|row| {
                let id: ProductId = row.get("product_id");
                let blob: Vec<u8> = row.get("embedding");
                let payload_json: String = row.get("payload_json");
                let payload = parse_payload(&payload_json).ok()?;
                Some(Hit {
                    id,
                    score: cosine_similarity(query_vec, &blob_to_vec(&blob)) as f64,
                    payload,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });
        hits.truncate(limit);

        Ok(hits)
    }
}
