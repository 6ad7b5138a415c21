//! Collaborator interfaces consumed by the search core.
//!
//! The core never talks to a database directly. Storage backends implement
//! [`VectorRetriever`] (nearest-neighbour lookup) and [`CorpusSource`]
//! (snapshot enumeration for the lexical index), and the application
//! passes them in.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Hit, Product};

/// Nearest-neighbour search over stored product embeddings.
#[async_trait]
pub trait VectorRetriever: Send + Sync {
    /// Return up to `limit` products ordered by cosine similarity to
    /// `query_vec`, highest first.
    ///
    /// An empty store yields an empty vector. An unreachable store may
    /// return an error; the fusion engine treats that as "no semantic
    /// signal" rather than failing the request.
    async fn vector_search(&self, query_vec: &[f32], limit: usize) -> Result<Vec<Hit>>;
}

/// Enumerates the product corpus for lexical indexing.
#[async_trait]
pub trait CorpusSource: Send + Sync {
    /// Return up to `limit` products in a stable order.
    async fn fetch_corpus(&self, limit: usize) -> Result<Vec<Product>>;
}
