//! Hybrid retrieval: vector and lexical candidates fused into one ranking.
//!
//! The fusion engine has no database or configuration dependencies. The
//! calling application embeds the query, supplies a [`VectorRetriever`]
//! and (if one has been built) a [`LexicalIndex`], and receives a ranked
//! list of [`FusedResult`]s.
//!
//! # Fusion Algorithm
//!
//! 1. Fetch `max(top_k, candidate_k_vector)` vector hits and
//!    `max(top_k, candidate_k_lexical)` lexical hits, concurrently.
//! 2. Key both hit lists by canonical product id.
//! 3. Min-max normalize each side to `[0, 1]`. A side with a single
//!    distinct score normalizes every member to `0.0`.
//! 4. If the lexical side is empty, return the semantic hits sorted by
//!    raw score (the fallback).
//! 5. Otherwise merge: `score = (1 - α) × lexical + α × semantic`, with
//!    `0.0` for a missing side.
//! 6. Sort by score (desc), id (asc). Truncate to `top_k`.
//!
//! Retriever failures are absorbed as an empty semantic side. Only
//! invalid parameters and non-finite scores are reported as errors.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::error::{Result, SearchError};
use crate::intent::{apply_constraints, FilterStage, Intent};
use crate::lexical::LexicalIndex;
use crate::models::{FusedResult, Hit, ProductId, ProductPayload, ResultSource, ScoreExplanation};
use crate::store::VectorRetriever;

/// Document id → score, for one retrieval side of one query.
pub type ScoreMap = BTreeMap<ProductId, f64>;

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchParams {
    /// Weight for semantic vs lexical: `fused = (1-α)*lexical + α*semantic`.
    pub semantic_weight: f64,
    /// Maximum results to return.
    pub top_k: usize,
    /// Vector candidate pool. Never smaller than `top_k`.
    pub candidate_k_vector: Option<usize>,
    /// Lexical candidate pool. Never smaller than `top_k`.
    pub candidate_k_lexical: Option<usize>,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            semantic_weight: 0.7,
            top_k: 5,
            candidate_k_vector: None,
            candidate_k_lexical: None,
        }
    }
}

impl SearchParams {
    pub fn validate(&self) -> Result<()> {
        if !self.semantic_weight.is_finite() || !(0.0..=1.0).contains(&self.semantic_weight) {
            return Err(SearchError::InvalidRequest(format!(
                "semantic_weight must be in [0.0, 1.0], got {}",
                self.semantic_weight
            )));
        }
        if self.top_k == 0 {
            return Err(SearchError::InvalidRequest(
                "top_k must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn vector_pool(&self) -> usize {
        self.candidate_k_vector.unwrap_or(0).max(self.top_k)
    }

    pub fn lexical_pool(&self) -> usize {
        self.candidate_k_lexical.unwrap_or(0).max(self.top_k)
    }
}

/// Bundles all inputs for a single search invocation.
#[derive(Debug, Clone)]
pub struct SearchRequest<'a> {
    pub query: &'a str,
    /// Query embedding. `None` means no semantic signal for this request.
    pub query_vec: Option<&'a [f32]>,
    pub params: SearchParams,
    /// Extracted intent whose constraints post-filter the results.
    pub intent: Option<&'a Intent>,
    pub filter_stage: FilterStage,
    /// If true, populate [`ScoreExplanation`] on each result.
    pub explain: bool,
}

/// Run a hybrid search.
///
/// The vector lookup and the lexical query run concurrently. A failing
/// retriever is logged and treated as "no semantic hits"; a missing
/// lexical index means "no lexical hits".
pub async fn search<V>(
    retriever: &V,
    lexical: Option<&LexicalIndex>,
    req: &SearchRequest<'_>,
) -> Result<Vec<FusedResult>>
where
    V: VectorRetriever + ?Sized,
{
    req.params.validate()?;
    if req.query.trim().is_empty() {
        return Ok(Vec::new());
    }

    let vector_pool = req.params.vector_pool();
    let lexical_pool = req.params.lexical_pool();

    let semantic_side = async {
        let Some(qv) = req.query_vec else {
            return Vec::new();
        };
        match retriever.vector_search(qv, vector_pool).await {
            Ok(hits) => hits,
            Err(e) => {
                let err = SearchError::RetrievalUnavailable(e.to_string());
                warn!(error = %err, "vector retrieval failed; continuing without semantic hits");
                Vec::new()
            }
        }
    };
    let lexical_side = async {
        lexical
            .map(|index| index.query(req.query, lexical_pool))
            .unwrap_or_default()
    };

    let (mut semantic, lexical_hits) = futures::join!(semantic_side, lexical_side);
    debug!(
        semantic = semantic.len(),
        lexical = lexical_hits.len(),
        "retrieved candidates"
    );

    if let (Some(intent), FilterStage::Semantic) = (req.intent, req.filter_stage) {
        semantic = apply_constraints(intent, semantic);
    }

    let mut results = fuse(
        &semantic,
        &lexical_hits,
        req.params.semantic_weight,
        req.params.top_k,
        req.explain,
    )?;

    if let (Some(intent), FilterStage::Fused) = (req.intent, req.filter_stage) {
        results = apply_constraints(intent, results);
    }

    Ok(results)
}

/// Key hits by id. When an id repeats, its first (best-ranked) score wins.
pub fn build_score_map(hits: &[Hit]) -> ScoreMap {
    let mut map = ScoreMap::new();
    for hit in hits {
        map.entry(hit.id).or_insert(hit.score);
    }
    map
}

/// Min-max normalize to `[0.0, 1.0]`.
///
/// If all scores are equal (including a single entry), every entry maps
/// to `0.0`. Non-finite scores are rejected.
pub fn normalize_scores(map: &ScoreMap) -> Result<ScoreMap> {
    if let Some((id, score)) = map.iter().find(|(_, s)| !s.is_finite()) {
        return Err(SearchError::FusionFailure(format!(
            "non-finite score {score} for product {id}"
        )));
    }

    let s_min = map.values().copied().fold(f64::INFINITY, f64::min);
    let s_max = map.values().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = s_max - s_min;

    Ok(map
        .iter()
        .map(|(id, s)| {
            let norm = if range.abs() < f64::EPSILON {
                0.0
            } else {
                (s - s_min) / range
            };
            (*id, norm)
        })
        .collect())
}

/// Merge semantic and lexical hits into at most `top_k` ranked results.
pub fn fuse(
    semantic: &[Hit],
    lexical: &[Hit],
    alpha: f64,
    top_k: usize,
    explain: bool,
) -> Result<Vec<FusedResult>> {
    let sem_raw = build_score_map(semantic);
    let lex_raw = build_score_map(lexical);
    let sem_norm = normalize_scores(&sem_raw)?;
    let lex_norm = normalize_scores(&lex_raw)?;

    let sem_count = sem_raw.len();
    let lex_count = lex_raw.len();

    let mut payloads: BTreeMap<ProductId, &ProductPayload> = BTreeMap::new();
    for hit in semantic.iter().chain(lexical) {
        payloads.entry(hit.id).or_insert(&hit.payload);
    }

    let explanation = |lexical_score: f64, semantic_score: f64, fallback: bool| {
        explain.then(|| ScoreExplanation {
            lexical_score,
            semantic_score,
            alpha,
            lexical_candidates: lex_count,
            semantic_candidates: sem_count,
            fallback,
        })
    };

    let mut results: Vec<FusedResult> = if lex_norm.is_empty() {
        debug!(candidates = sem_count, "no lexical hits; returning semantic ranking");
        sem_raw
            .iter()
            .map(|(id, raw)| FusedResult {
                id: *id,
                score: *raw,
                payload: payloads.get(id).map(|p| (*p).clone()).unwrap_or_default(),
                source: ResultSource::Hybrid,
                explain: explanation(0.0, sem_norm.get(id).copied().unwrap_or(0.0), true),
            })
            .collect()
    } else {
        let ids: Vec<ProductId> = {
            let mut ids: Vec<ProductId> = sem_norm.keys().chain(lex_norm.keys()).copied().collect();
            ids.sort_unstable();
            ids.dedup();
            ids
        };
        ids.into_iter()
            .map(|id| {
                let l = lex_norm.get(&id).copied().unwrap_or(0.0);
                let s = sem_norm.get(&id).copied().unwrap_or(0.0);
                FusedResult {
                    id,
                    score: (1.0 - alpha) * l + alpha * s,
                    payload: payloads.get(&id).map(|p| (*p).clone()).unwrap_or_default(),
                    source: ResultSource::Hybrid,
                    explain: explanation(l, s, false),
                }
            })
            .collect()
    };

    if let Some(bad) = results.iter().find(|r| !r.score.is_finite()) {
        return Err(SearchError::FusionFailure(format!(
            "fused score for product {} is not finite",
            bad.id
        )));
    }

    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.id.cmp(&b.id))
    });
    results.truncate(top_k);

    Ok(results)
}
