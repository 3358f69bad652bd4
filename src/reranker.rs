use crate::error::{Error, Result};

/// A pairwise relevance model: sees the query and each candidate jointly.
pub trait Reranker: Send + Sync {
    fn model_id(&self) -> &str {
        "unnamed"
    }

    /// One score per candidate, in candidate order. Higher is more relevant.
    fn score(&self, query: &str, candidates: &[String]) -> Result<Vec<f32>>;
}

impl<R: Reranker + ?Sized> Reranker for Box<R> {
    fn model_id(&self) -> &str {
        (**self).model_id()
    }

    fn score(&self, query: &str, candidates: &[String]) -> Result<Vec<f32>> {
        (**self).score(query, candidates)
    }
}

/// A candidate position (into the recall list) with its rerank score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankedCandidate {
    pub position: usize,
    pub score: f32,
}

/// Score `contexts` against `query` and order them by score descending.
///
/// The sort is stable: candidates with equal scores keep their recall
/// order. A non-finite score is a model failure.
pub fn rank_candidates<R: Reranker + ?Sized>(
    reranker: &R,
    query: &str,
    contexts: &[String],
) -> Result<Vec<RankedCandidate>> {
    if contexts.is_empty() {
        return Ok(Vec::new());
    }

    let scores = reranker.score(query, contexts)?;
    if scores.len() != contexts.len() {
        return Err(Error::Model(format!(
            "reranker returned {} scores for {} candidates",
            scores.len(),
            contexts.len()
        )));
    }

    if scores.iter().any(|s| !s.is_finite()) {
        return Err(Error::Model("reranker produced non-finite score".into()));
    }

    let mut ranked: Vec<RankedCandidate> = scores
        .into_iter()
        .enumerate()
        .map(|(position, score)| RankedCandidate { position, score })
        .collect();

    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));

    Ok(ranked)
}
