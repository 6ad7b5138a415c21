//! # Product Search
//!
//! Hybrid product search over a SQLite catalogue: BM25 lexical ranking and
//! embedding similarity, fused into one ranked list.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌────────────┐
//! │  Ingest  │──▶│    SQLite    │──▶│ Lexical    │ (built lazily,
//! │ JSON/JSONL│  │products+vecs │   │ index      │  single flight)
//! └──────────┘   └──────┬───────┘   └─────┬──────┘
//!                       │ vector search   │ BM25
//!                       ▼                 ▼
//!                   ┌──────────────────────────┐
//!                   │ Fusion (core crate)      │
//!                   └────────────┬─────────────┘
//!                        ┌───────┴───────┐
//!                        ▼               ▼
//!                   ┌─────────┐     ┌─────────┐
//!                   │   CLI   │     │  HTTP   │
//!                   │(psearch)│     │ (axum)  │
//!                   └─────────┘     └─────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! psearch init                         # create database
//! psearch ingest products.jsonl        # load products
//! psearch embed pending                # generate embeddings
//! psearch search "red camera under \$500"
//! psearch serve                        # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | Corpus and vector retrieval over SQLite |
//! | [`embedding`] | Embedding providers |
//! | [`ingest`] | Product ingestion |
//! | [`embed_cmd`] | Embedding backfill and rebuild |
//! | [`index`] | Lexical index lifecycle |
//! | [`intent`] | Entity tagger backends |
//! | [`search`] | Search service |
//! | [`server`] | HTTP server |

pub mod config;
pub mod db;
pub mod embed_cmd;
pub mod embedding;
pub mod index;
pub mod ingest;
pub mod intent;
pub mod migrate;
pub mod search;
pub mod server;
pub mod sqlite_store;
