//! In-memory collaborator for tests and embedded use.
//!
//! Products live in a `BTreeMap` (so corpus enumeration is ordered by id)
//! and vectors in a `HashMap`, both behind `std::sync::RwLock`. Vector
//! search is brute-force cosine similarity. The store can be switched to
//! an "unavailable" state to exercise degradation paths.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{Hit, Product, ProductId};

use super::{CorpusSource, VectorRetriever};

#[derive(Default)]
pub struct InMemoryStore {
    products: RwLock<BTreeMap<ProductId, Product>>,
    vectors: RwLock<HashMap<ProductId, Vec<f32>>>,
    unavailable: AtomicBool,
    corpus_fetches: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_product(&self, product: Product) {
        self.products
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(product.id, product);
    }

    pub fn upsert_vector(&self, id: ProductId, vector: Vec<f32>) {
        self.vectors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, vector);
    }

    /// Make every subsequent call fail as if the backend were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// How many times [`CorpusSource::fetch_corpus`] has been called.
    pub fn corpus_fetches(&self) -> usize {
        self.corpus_fetches.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("in-memory store marked unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl VectorRetriever for InMemoryStore {
    async fn vector_search(&self, query_vec: &[f32], limit: usize) -> Result<Vec<Hit>> {
        self.check_available()?;
        let products = self.products.read().unwrap_or_else(PoisonError::into_inner);
        let vectors = self.vectors.read().unwrap_or_else(PoisonError::into_inner);

        let mut hits: Vec<Hit> = vectors
            .iter()
            .filter_map(|(id, v)| {
                let product = products.get(id)?;
                Some(Hit {
                    id: *id,
                    score: cosine_similarity(query_vec, v) as f64,
                    payload: product.payload.clone(),
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

#[async_trait]
impl CorpusSource for InMemoryStore {
    async fn fetch_corpus(&self, limit: usize) -> Result<Vec<Product>> {
        self.corpus_fetches.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        let products = self.products.read().unwrap_or_else(PoisonError::into_inner);
        Ok(products.values().take(limit).cloned().collect())
    }
}
