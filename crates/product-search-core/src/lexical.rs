//! In-memory BM25 lexical index over a product corpus snapshot.
//!
//! Documents are tokenized by lowercasing and splitting on whitespace. No
//! stemming, no stop words: query text goes through the identical
//! tokenizer, so a query term matches only the exact same token.
//!
//! # Scoring
//!
//! Okapi BM25 with an IDF floor:
//!
//! ```text
//! idf(t)      = ln(N - n(t) + 0.5) - ln(n(t) + 0.5)
//! score(d, q) = Σ idf(t) · tf(t,d)·(k1+1) / (tf(t,d) + k1·(1 - b + b·|d|/avgdl))
//! ```
//!
//! Terms whose raw IDF is negative (present in more than half the corpus)
//! get `epsilon × mean(idf)` instead, so very common terms still count a
//! little rather than pushing a document's score down. A term present in
//! exactly half the corpus has an IDF of zero and contributes nothing.
//!
//! # Ordinals
//!
//! Each document gets an ordinal: its position in the snapshot passed to
//! [`LexicalIndex::build`]. Ordinals are contiguous from 0 and only used
//! internally for tie-breaking; [`LexicalIndex::query`] reports the
//! canonical product id carried by each [`Document`].
//!
//! # Sharing
//!
//! A built [`LexicalIndex`] is immutable. [`SharedLexicalIndex`] holds the
//! current generation behind an `Arc` and swaps in a new one only once it
//! is fully built, so readers see either the old or the new index.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::Deserialize;

use crate::error::{Result, SearchError};
use crate::models::{Document, Hit, ProductPayload};

/// BM25 tuning parameters.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Bm25Params {
    /// Term-frequency saturation.
    #[serde(default = "default_k1")]
    pub k1: f64,
    /// Document-length normalization strength, in `[0, 1]`.
    #[serde(default = "default_b")]
    pub b: f64,
    /// Multiplier on the mean IDF used as the floor for negative IDFs.
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
}

fn default_k1() -> f64 {
    1.5
}
fn default_b() -> f64 {
    0.75
}
fn default_epsilon() -> f64 {
    0.25
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self {
            k1: default_k1(),
            b: default_b(),
            epsilon: default_epsilon(),
        }
    }
}

/// Split text into lowercase whitespace-delimited tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

struct IndexedDoc {
    id: i64,
    payload: ProductPayload,
    len: usize,
    term_freqs: HashMap<String, u32>,
}

/// An immutable BM25 index built from one corpus snapshot.
pub struct LexicalIndex {
    params: Bm25Params,
    docs: Vec<IndexedDoc>,
    idf: HashMap<String, f64>,
    avgdl: f64,
}

impl std::fmt::Debug for LexicalIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LexicalIndex")
            .field("docs", &self.docs.len())
            .field("terms", &self.idf.len())
            .field("avgdl", &self.avgdl)
            .finish()
    }
}

impl LexicalIndex {
    /// Tokenize `corpus` and build the ranking structure.
    ///
    /// Document ordinals follow the order of `corpus`.
    ///
    /// # Errors
    ///
    /// [`SearchError::EmptyCorpus`] when `corpus` is empty.
    pub fn build(corpus: Vec<Document>, params: Bm25Params) -> Result<Self> {
        if corpus.is_empty() {
            return Err(SearchError::EmptyCorpus);
        }

        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        let mut total_len = 0usize;
        let mut docs = Vec::with_capacity(corpus.len());

        for doc in corpus {
            let tokens = tokenize(&doc.text);
            let mut term_freqs: HashMap<String, u32> = HashMap::new();
            for token in &tokens {
                *term_freqs.entry(token.clone()).or_insert(0) += 1;
            }
            for term in term_freqs.keys() {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            total_len += tokens.len();
            docs.push(IndexedDoc {
                id: doc.id,
                payload: doc.payload,
                len: tokens.len(),
                term_freqs,
            });
        }

        let n = docs.len() as f64;
        let avgdl = total_len as f64 / n;

        let mut idf: HashMap<String, f64> = HashMap::with_capacity(doc_freq.len());
        let mut idf_sum = 0.0;
        let mut negative: Vec<String> = Vec::new();
        for (term, freq) in doc_freq {
            let freq = freq as f64;
            let value = (n - freq + 0.5).ln() - (freq + 0.5).ln();
            idf_sum += value;
            if value < 0.0 {
                negative.push(term.clone());
            }
            idf.insert(term, value);
        }

        if !idf.is_empty() {
            let floor = params.epsilon * idf_sum / idf.len() as f64;
            for term in negative {
                idf.insert(term, floor);
            }
        }

        Ok(Self {
            params,
            docs,
            idf,
            avgdl,
        })
    }

    /// Number of indexed documents.
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    /// Always false for a successfully built index.
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// BM25 score of every document for `text`, indexed by ordinal.
    pub fn scores(&self, text: &str) -> Vec<f64> {
        let query = tokenize(text);
        let Bm25Params { k1, b, .. } = self.params;
        let avgdl = if self.avgdl > 0.0 { self.avgdl } else { 1.0 };

        self.docs
            .iter()
            .map(|doc| {
                let norm = k1 * (1.0 - b + b * doc.len as f64 / avgdl);
                query
                    .iter()
                    .map(|term| {
                        let tf = doc.term_freqs.get(term).copied().unwrap_or(0) as f64;
                        if tf == 0.0 {
                            return 0.0;
                        }
                        let idf = self.idf.get(term).copied().unwrap_or(0.0);
                        idf * tf * (k1 + 1.0) / (tf + norm)
                    })
                    .sum()
            })
            .collect()
    }

    /// Return up to `top_k` documents with a strictly positive score,
    /// highest first, ties broken by snapshot order.
    pub fn query(&self, text: &str, top_k: usize) -> Vec<Hit> {
        if top_k == 0 {
            return Vec::new();
        }

        let mut ranked: Vec<(usize, f64)> = self
            .scores(text)
            .into_iter()
            .enumerate()
            .filter(|(_, s)| *s > 0.0)
            .collect();

        // Stable sort keeps ordinal order among equal scores.
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(top_k);

        ranked
            .into_iter()
            .map(|(ordinal, score)| {
                let doc = &self.docs[ordinal];
                Hit {
                    id: doc.id,
                    score,
                    payload: doc.payload.clone(),
                }
            })
            .collect()
    }
}

/// Handle to the current [`LexicalIndex`] generation.
///
/// Cheap to read: queries clone the inner `Arc` and run without holding
/// the lock.
#[derive(Default)]
pub struct SharedLexicalIndex {
    current: RwLock<Option<Arc<LexicalIndex>>>,
}

impl SharedLexicalIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current generation, if one has been built.
    pub fn snapshot(&self) -> Option<Arc<LexicalIndex>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_ready(&self) -> bool {
        self.snapshot().is_some()
    }

    /// Replace the current generation.
    pub fn install(&self, index: LexicalIndex) -> Arc<LexicalIndex> {
        let index = Arc::new(index);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(index.clone());
        index
    }

    /// Build a new generation from `corpus` and install it.
    ///
    /// On [`SearchError::EmptyCorpus`] the previous generation (or the
    /// unset state) stays in effect.
    pub fn build(&self, corpus: Vec<Document>, params: Bm25Params) -> Result<Arc<LexicalIndex>> {
        let index = LexicalIndex::build(corpus, params)?;
        Ok(self.install(index))
    }

    /// Query the current generation.
    ///
    /// # Errors
    ///
    /// [`SearchError::NotInitialized`] if nothing has been built yet.
    pub fn query(&self, text: &str, top_k: usize) -> Result<Vec<Hit>> {
        let index = self.snapshot().ok_or(SearchError::NotInitialized)?;
        Ok(index.query(text, top_k))
    }
}
