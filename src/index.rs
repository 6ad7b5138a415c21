//! Lazy, single-flight construction of the lexical index.
//!
//! [`IndexController`] owns the process-wide [`SharedLexicalIndex`]. The
//! first search calls [`IndexController::ensure_ready`], which pulls a
//! corpus snapshot and builds the index. Concurrent callers queue on an
//! async mutex and, once it is their turn, find the index already built.
//! After that the index is never rebuilt automatically; use
//! [`IndexController::rebuild`] to pick up corpus changes.

use anyhow::Result;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;
use tracing::{info, warn};

use product_search_core::lexical::{Bm25Params, LexicalIndex, SharedLexicalIndex};
use product_search_core::models::Document;
use product_search_core::store::CorpusSource;
use product_search_core::SearchError;

/// Snapshot-building settings.
#[derive(Debug, Clone)]
pub struct IndexSettings {
    pub params: Bm25Params,
    pub corpus_limit: usize,
    pub text_fields: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub ready: bool,
    pub documents: usize,
    /// RFC 3339 time of the last successful build.
    pub built_at: Option<String>,
    /// Products skipped during the last build for lack of searchable text.
    pub skipped: usize,
}

/// What a build attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    /// A new index generation is installed.
    Built { documents: usize, skipped: usize },
    /// The index was already built; nothing was fetched.
    AlreadyReady,
    /// The snapshot had no indexable documents; the previous state stays.
    EmptyCorpus,
}

#[derive(Debug, Clone, Default)]
struct BuildInfo {
    built_at: Option<chrono::DateTime<chrono::Utc>>,
    skipped: usize,
}

pub struct IndexController {
    source: Arc<dyn CorpusSource>,
    settings: IndexSettings,
    index: SharedLexicalIndex,
    build_lock: Mutex<()>,
    /// Finished build attempts, successful or not.
    attempts: AtomicU64,
    info: RwLock<BuildInfo>,
}

impl IndexController {
    pub fn new(source: Arc<dyn CorpusSource>, settings: IndexSettings) -> Self {
        Self {
            source,
            settings,
            index: SharedLexicalIndex::new(),
            build_lock: Mutex::new(()),
            attempts: AtomicU64::new(0),
            info: RwLock::new(BuildInfo::default()),
        }
    }

    /// Current index generation, if one has been built.
    pub fn current(&self) -> Option<Arc<LexicalIndex>> {
        self.index.snapshot()
    }

    /// Build the index if it has never been built.
    ///
    /// Returns the current generation, or `None` when the corpus was
    /// empty or could not be fetched. Neither case is an error for the
    /// caller: search proceeds without a lexical signal.
    ///
    /// Callers that queued behind an attempt take its outcome, even a
    /// failed one. Only a call arriving after an attempt finished retries.
    pub async fn ensure_ready(&self) -> Option<Arc<LexicalIndex>> {
        if let Some(index) = self.index.snapshot() {
            return Some(index);
        }

        let seen = self.attempts.load(Ordering::Acquire);
        let _guard = self.build_lock.lock().await;
        if self.attempts.load(Ordering::Acquire) != seen {
            return self.index.snapshot();
        }
        if let Some(index) = self.index.snapshot() {
            return Some(index);
        }

        if let Err(e) = self.build_locked().await {
            warn!(error = %e, "lexical index initialization failed; continuing without lexical signal");
        }
        self.index.snapshot()
    }

    /// Force a fresh snapshot and swap it in. An empty snapshot keeps the
    /// previous generation.
    pub async fn rebuild(&self) -> Result<BuildOutcome> {
        let _guard = self.build_lock.lock().await;
        self.build_locked().await
    }

    /// Like [`ensure_ready`](Self::ensure_ready) but reports what happened
    /// and propagates fetch errors. Used for warm-up at startup.
    pub async fn warm(&self) -> Result<BuildOutcome> {
        if self.index.is_ready() {
            return Ok(BuildOutcome::AlreadyReady);
        }
        let _guard = self.build_lock.lock().await;
        if self.index.is_ready() {
            return Ok(BuildOutcome::AlreadyReady);
        }
        self.build_locked().await
    }

    pub fn status(&self) -> IndexStatus {
        let info = self.info.read().unwrap_or_else(PoisonError::into_inner);
        let current = self.index.snapshot();
        IndexStatus {
            ready: current.is_some(),
            documents: current.map(|i| i.len()).unwrap_or(0),
            built_at: info.built_at.map(|t| t.to_rfc3339()),
            skipped: info.skipped,
        }
    }

    /// Fetch, convert and build. Caller must hold `build_lock`.
    async fn build_locked(&self) -> Result<BuildOutcome> {
        let outcome = self.fetch_and_build().await;
        self.attempts.fetch_add(1, Ordering::Release);
        outcome
    }

    async fn fetch_and_build(&self) -> Result<BuildOutcome> {
        info!(limit = self.settings.corpus_limit, "building lexical index");

        let products = self.source.fetch_corpus(self.settings.corpus_limit).await?;
        let fetched = products.len();
        let corpus: Vec<Document> = products
            .into_iter()
            .filter_map(|p| Document::from_product(p, &self.settings.text_fields))
            .collect();
        let skipped = fetched - corpus.len();

        match self.index.build(corpus, self.settings.params) {
            Ok(index) => {
                let documents = index.len();
                let mut info = self.info.write().unwrap_or_else(PoisonError::into_inner);
                info.built_at = Some(chrono::Utc::now());
                info.skipped = skipped;
                info!(documents, skipped, "lexical index ready");
                Ok(BuildOutcome::Built { documents, skipped })
            }
            Err(SearchError::EmptyCorpus) => {
                warn!(fetched, skipped, "corpus has no indexable documents; lexical index not built");
                Ok(BuildOutcome::EmptyCorpus)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use product_search_core::models::{Product, ProductPayload};
    use product_search_core::store::memory::InMemoryStore;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Source that takes a while to answer, so concurrent callers really
    /// overlap with the in-flight fetch.
    struct SlowSource {
        products: Vec<Product>,
        fail: bool,
        fetches: AtomicUsize,
    }

    impl SlowSource {
        fn new(products: Vec<Product>, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                products,
                fail,
                fetches: AtomicUsize::new(0),
            })
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CorpusSource for SlowSource {
        async fn fetch_corpus(&self, limit: usize) -> Result<Vec<Product>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            if self.fail {
                anyhow::bail!("corpus store unreachable");
            }
            Ok(self.products.iter().take(limit).cloned().collect())
        }
    }

    async fn race(controller: &Arc<IndexController>, callers: usize) -> Vec<Option<usize>> {
        let handles: Vec<_> = (0..callers)
            .map(|_| {
                let c = Arc::clone(controller);
                tokio::spawn(async move { c.ensure_ready().await.map(|i| i.len()) })
            })
            .collect();
        let mut out = Vec::new();
        for h in handles {
            out.push(h.await.unwrap());
        }
        out
    }

    fn settings() -> IndexSettings {
        IndexSettings {
            params: Bm25Params::default(),
            corpus_limit: 1000,
            text_fields: vec!["title".to_string(), "description".to_string()],
        }
    }

    fn product(id: i64, title: Option<&str>) -> Product {
        Product {
            id,
            payload: ProductPayload {
                title: title.map(str::to_string),
                ..Default::default()
            },
        }
    }

    fn seeded() -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        store.upsert_product(product(1, Some("canon camera")));
        store.upsert_product(product(2, Some("nikon lens")));
        store.upsert_product(product(3, None));
        store
    }

    #[tokio::test]
    async fn test_ensure_ready_builds_once() {
        let store = seeded();
        let controller = IndexController::new(store.clone(), settings());

        let first = controller.ensure_ready().await.unwrap();
        assert_eq!(first.len(), 2);
        let second = controller.ensure_ready().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.corpus_fetches(), 1);

        let status = controller.status();
        assert!(status.ready);
        assert_eq!(status.documents, 2);
        assert_eq!(status.skipped, 1);
        assert!(status.built_at.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_first_requests_share_one_build() {
        let store = seeded();
        let controller = Arc::new(IndexController::new(store.clone(), settings()));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let c = Arc::clone(&controller);
                tokio::spawn(async move { c.ensure_ready().await.map(|i| i.len()) })
            })
            .collect();
        for h in handles {
            assert_eq!(h.await.unwrap(), Some(2));
        }
        assert_eq!(store.corpus_fetches(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_empty_corpus_attempt() {
        let source = SlowSource::new(vec![product(1, None)], false);
        let controller = Arc::new(IndexController::new(source.clone(), settings()));

        let results = race(&controller, 16).await;
        assert!(results.iter().all(Option::is_none));
        assert_eq!(source.fetches(), 1);

        // A request arriving after the attempt finished tries again.
        assert!(controller.ensure_ready().await.is_none());
        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_failed_fetch() {
        let source = SlowSource::new(vec![product(1, Some("canon camera"))], true);
        let controller = Arc::new(IndexController::new(source.clone(), settings()));

        let results = race(&controller, 8).await;
        assert!(results.iter().all(Option::is_none));
        assert_eq!(source.fetches(), 1);
    }

    #[tokio::test]
    async fn test_slow_build_is_shared_by_waiters() {
        let source = SlowSource::new(vec![product(1, Some("canon camera"))], false);
        let controller = Arc::new(IndexController::new(source.clone(), settings()));

        let results = race(&controller, 8).await;
        assert!(results.iter().all(|r| *r == Some(1)));
        assert_eq!(source.fetches(), 1);
    }

    #[tokio::test]
    async fn test_empty_corpus_leaves_index_unset() {
        let store = Arc::new(InMemoryStore::new());
        store.upsert_product(product(1, None));
        let controller = IndexController::new(store.clone(), settings());

        assert!(controller.ensure_ready().await.is_none());
        assert!(!controller.status().ready);
        // Still unset, so the next request tries again.
        assert!(controller.ensure_ready().await.is_none());
        assert_eq!(store.corpus_fetches(), 2);
    }

    #[tokio::test]
    async fn test_unavailable_source_degrades() {
        let store = seeded();
        store.set_unavailable(true);
        let controller = IndexController::new(store.clone(), settings());
        assert!(controller.ensure_ready().await.is_none());
        assert!(controller.warm().await.is_err());
    }

    #[tokio::test]
    async fn test_index_not_refreshed_until_rebuild() {
        let store = seeded();
        let controller = IndexController::new(store.clone(), settings());
        controller.ensure_ready().await.unwrap();

        store.upsert_product(product(4, Some("leather strap")));
        assert_eq!(controller.ensure_ready().await.unwrap().len(), 2);

        let outcome = controller.rebuild().await.unwrap();
        assert_eq!(
            outcome,
            BuildOutcome::Built {
                documents: 3,
                skipped: 1
            }
        );
        let hits = controller.current().unwrap().query("strap", 5);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 4);
    }

    #[tokio::test]
    async fn test_rebuild_with_empty_snapshot_keeps_previous() {
        let store = seeded();
        let controller = IndexController::new(store.clone(), settings());
        controller.ensure_ready().await.unwrap();

        let empty = Arc::new(InMemoryStore::new());
        let swapped = IndexController {
            source: empty,
            ..controller
        };
        assert_eq!(swapped.rebuild().await.unwrap(), BuildOutcome::EmptyCorpus);
        assert_eq!(swapped.status().documents, 2);
    }

    #[tokio::test]
    async fn test_warm_reports_already_ready() {
        let controller = IndexController::new(seeded(), settings());
        assert!(matches!(
            controller.warm().await.unwrap(),
            BuildOutcome::Built { documents: 2, .. }
        ));
        assert_eq!(controller.warm().await.unwrap(), BuildOutcome::AlreadyReady);
    }
}
