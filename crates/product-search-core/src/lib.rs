//! # Product Search Core
//!
//! Runtime-agnostic retrieval logic for Product Search: the product data
//! model, the BM25 lexical index, hybrid score fusion, query intent rules,
//! and the collaborator traits the application implements.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or other
//! native-only dependencies. Storage and embedding backends are supplied
//! by the caller through [`store::VectorRetriever`],
//! [`store::CorpusSource`], [`embedding::EmbeddingProvider`] and
//! [`intent::EntityTagger`].

pub mod embedding;
pub mod error;
pub mod intent;
pub mod lexical;
pub mod models;
pub mod search;
pub mod store;

pub use error::SearchError;
