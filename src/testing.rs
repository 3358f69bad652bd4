//! Deterministic stand-ins for the models and the network.
//!
//! These let the crawl, index and search pipeline run in tests without
//! downloading model weights or touching a remote site.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use url::Url;

use crate::{
    embedding::Embedder,
    error::Result,
    fetch::PageSource,
    reranker::Reranker,
};

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

/// FNV-1a, so bucket assignment is stable across processes.
fn fnv1a(token: &str) -> u64 {
    token.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
    })
}

/// Bag-of-words embedder: each lowercase token increments one hashed
/// bucket. Texts sharing words end up close in inner product.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
    calls: Arc<AtomicUsize>,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            calls: Arc::default(),
        }
    }

    /// Number of `embed` calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Embedder for HashEmbedder {
    fn model_id(&self) -> &str {
        "test/hash-embedder"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|text| {
                let mut vector = vec![0.0; self.dimension];
                for token in tokens(text) {
                    vector[(fnv1a(&token) % self.dimension as u64) as usize] +=
                        1.0;
                }
                vector
            })
            .collect())
    }
}

/// Scores a candidate by how many distinct query words it contains.
#[derive(Debug, Clone, Default)]
pub struct OverlapReranker;

impl Reranker for OverlapReranker {
    fn score(&self, query: &str, candidates: &[String]) -> Result<Vec<f32>> {
        let wanted: HashSet<String> = tokens(query).collect();
        Ok(candidates
            .iter()
            .map(|candidate| {
                let present: HashSet<String> = tokens(candidate).collect();
                wanted.intersection(&present).count() as f32
            })
            .collect())
    }
}

/// Reranker that gives every candidate the same score.
#[derive(Debug, Clone, Default)]
pub struct FlatReranker;

impl Reranker for FlatReranker {
    fn score(&self, _query: &str, candidates: &[String]) -> Result<Vec<f32>> {
        Ok(vec![0.5; candidates.len()])
    }
}

/// In-memory site keyed by absolute URL.
///
/// Records every request and the peak number of requests in flight at
/// once, so concurrency bounds can be asserted.
#[derive(Default)]
pub struct StaticSite {
    pages: HashMap<String, String>,
    delay: Duration,
    requests: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl StaticSite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, html: impl Into<String>) -> Self {
        self.pages.insert(url.to_string(), html.into());
        self
    }

    /// Hold every response for `delay` before returning it.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl PageSource for StaticSite {
    async fn fetch(&self, url: &Url) -> Option<String> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(url.to_string());
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.pages.get(url.as_str()).cloned()
    }
}
