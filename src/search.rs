//! Search service: the full request pipeline over SQLite.
//!
//! [`SearchService`] wires the core fusion engine to its collaborators:
//!
//! 1. Validate the request.
//! 2. Make sure the lexical index is built ([`IndexController::ensure_ready`]).
//! 3. Extract the query intent and embed the query, concurrently.
//!    An embedding failure means no semantic signal, not a failed request.
//! 4. Fuse vector and lexical candidates, applying the intent's
//!    constraint filter at the configured stage.
//!
//! Both the CLI (`psearch search`) and the HTTP server delegate here.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use product_search_core::embedding::{embed_one, EmbeddingProvider};
use product_search_core::intent::{extract_intent, EntityTagger, Intent};
use product_search_core::models::FusedResult;
use product_search_core::search::{search, SearchRequest};
use product_search_core::SearchError;

use crate::config::{Config, IntentConfig, RetrievalConfig};
use crate::db;
use crate::embedding::create_provider;
use crate::index::{BuildOutcome, IndexController, IndexSettings, IndexStatus};
use crate::intent::create_tagger;
use crate::sqlite_store::SqliteStore;

/// A search request as accepted by the HTTP API.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub semantic_weight: Option<f64>,
    #[serde(default)]
    pub explain: bool,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            top_k: None,
            semantic_weight: None,
            explain: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<FusedResult>,
    /// Intent extracted from the query, when intent extraction is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
    pub lexical_ready: bool,
    pub semantic_used: bool,
}

pub struct SearchService {
    store: Arc<SqliteStore>,
    provider: Arc<dyn EmbeddingProvider>,
    tagger: Arc<dyn EntityTagger>,
    controller: IndexController,
    retrieval: RetrievalConfig,
    intent: IntentConfig,
    embedding_enabled: bool,
}

impl SearchService {
    /// Connect to the configured database and build every collaborator
    /// from configuration.
    pub async fn open(config: &Config) -> Result<Self> {
        let store = Arc::new(SqliteStore::new(db::connect(config).await?));
        let provider = create_provider(&config.embedding)?;
        let tagger = create_tagger(&config.intent)?;
        Ok(Self::from_parts(store, provider, tagger, config))
    }

    /// Assemble a service from explicit collaborators.
    pub fn from_parts(
        store: Arc<SqliteStore>,
        provider: Arc<dyn EmbeddingProvider>,
        tagger: Arc<dyn EntityTagger>,
        config: &Config,
    ) -> Self {
        let settings = IndexSettings {
            params: config.lexical.bm25,
            corpus_limit: config.lexical.corpus_limit,
            text_fields: config.lexical.text_fields.clone(),
        };
        let controller = IndexController::new(store.clone(), settings);
        Self {
            store,
            provider,
            tagger,
            controller,
            retrieval: config.retrieval.clone(),
            intent: config.intent.clone(),
            embedding_enabled: config.embedding.is_enabled(),
        }
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    pub async fn search(&self, q: &SearchQuery) -> Result<SearchResponse, SearchError> {
        let query = q.query.trim();
        if query.is_empty() {
            return Err(SearchError::InvalidRequest(
                "query must not be empty".to_string(),
            ));
        }
        let params = self.retrieval.params(q.top_k, q.semantic_weight);
        params.validate()?;

        let lexical = self.controller.ensure_ready().await;

        let (intent, query_vec) = tokio::join!(self.extract(query), self.embed(query));

        let req = SearchRequest {
            query,
            query_vec: query_vec.as_deref(),
            params,
            intent: intent.as_ref(),
            filter_stage: self.intent.filter_stage,
            explain: q.explain,
        };
        let results = search(self.store.as_ref(), lexical.as_deref(), &req).await?;

        info!(
            query,
            results = results.len(),
            lexical_ready = lexical.is_some(),
            semantic = query_vec.is_some(),
            "search served"
        );

        Ok(SearchResponse {
            results,
            intent,
            lexical_ready: lexical.is_some(),
            semantic_used: query_vec.is_some(),
        })
    }

    async fn extract(&self, query: &str) -> Option<Intent> {
        if !self.intent.enabled {
            return None;
        }
        Some(extract_intent(self.tagger.as_ref(), query).await)
    }

    async fn embed(&self, query: &str) -> Option<Vec<f32>> {
        if !self.embedding_enabled {
            return None;
        }
        match embed_one(self.provider.as_ref(), query).await {
            Ok(v) => Some(v),
            Err(e) => {
                let err = SearchError::RetrievalUnavailable(e.to_string());
                warn!(error = %err, "query embedding failed; continuing without semantic signal");
                None
            }
        }
    }

    pub async fn warm_index(&self) -> Result<BuildOutcome> {
        self.controller.warm().await
    }

    pub async fn rebuild_index(&self) -> Result<BuildOutcome> {
        self.controller.rebuild().await
    }

    pub fn index_status(&self) -> IndexStatus {
        self.controller.status()
    }
}

/// CLI entry point for `psearch search`.
pub async fn run_search(
    config: &Config,
    query: &str,
    top_k: Option<usize>,
    semantic_weight: Option<f64>,
    explain: bool,
    json: bool,
) -> Result<()> {
    let service = SearchService::open(config).await?;
    let request = SearchQuery {
        query: query.to_string(),
        top_k,
        semantic_weight,
        explain,
    };
    let response = service.search(&request).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response.results)?);
        service.store().pool().close().await;
        return Ok(());
    }

    if response.results.is_empty() {
        println!("No results.");
        service.store().pool().close().await;
        return Ok(());
    }

    for (i, result) in response.results.iter().enumerate() {
        let title = result.payload.field("title");
        println!(
            "{}. [{:.3}] {}",
            i + 1,
            result.score,
            title.as_deref().unwrap_or("(untitled)")
        );
        if let Some(brand) = result.payload.field("brand") {
            println!("    brand: {}", brand);
        }
        if let Some(price) = result.payload.field("price") {
            println!("    price: {}", price);
        }
        if let Some(ex) = &result.explain {
            println!(
                "    explain: lexical={:.3} semantic={:.3} alpha={:.2} candidates={}/{}{}",
                ex.lexical_score,
                ex.semantic_score,
                ex.alpha,
                ex.lexical_candidates,
                ex.semantic_candidates,
                if ex.fallback { " (semantic fallback)" } else { "" }
            );
        }
        println!("    id: {}", result.id);
        println!();
    }

    service.store().pool().close().await;
    Ok(())
}

/// CLI entry point for `psearch index status` and `psearch index rebuild`.
///
/// The index lives in process memory, so both commands build it from the
/// current corpus; `status` additionally reports storage counts.
pub async fn run_index(config: &Config, rebuild: bool) -> Result<()> {
    let service = SearchService::open(config).await?;
    let outcome = if rebuild {
        service.rebuild_index().await?
    } else {
        service.warm_index().await?
    };
    let status = service.index_status();

    println!("index {}", if rebuild { "rebuild" } else { "status" });
    if !rebuild {
        println!("  products: {}", service.store().product_count().await?);
        println!("  vectors: {}", service.store().vector_count().await?);
    }
    match outcome {
        BuildOutcome::EmptyCorpus => println!("  lexical index: not built (no indexable products)"),
        _ => {
            println!("  lexical index: ready");
            println!("  indexed documents: {}", status.documents);
            println!("  skipped (no searchable text): {}", status.skipped);
        }
    }

    service.store().pool().close().await;
    Ok(())
}
