use serde::Serialize;
use tracing::{debug, error, warn};

use crate::{
    catalog::{
        CatalogRecord,
        DEFAULT_DURATION_MINUTES,
        DEFAULT_JOB_LEVELS,
        Support,
    },
    detail::{derive_duration, extract_job_levels},
    embedding::{Embedder, embed_query},
    error::{Error, Result},
    indexer::{IndexPaths, LoadedIndex, load_index},
    model_manager::ModelManager,
    reranker::{Reranker, rank_candidates},
    text_util::{
        DISPLAY_DESCRIPTION_MAX_CHARS,
        meaningful_chars,
        truncate_chars,
    },
    vector_index::VectorIndex,
};

/// Candidates pulled from the vector index before reranking, regardless of
/// how many results were requested.
pub const RECALL_CANDIDATES: usize = 30;

/// Queries with fewer letters and digits than this are rejected.
pub const MIN_QUERY_CHARS: usize = 2;

pub const MAX_RESULTS: usize = 10;

/// One search result, ready for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub rank: usize,
    pub score: f32,
    pub url: String,
    pub name: String,
    pub description: String,
    pub duration: u32,
    pub job_levels: String,
    pub test_type: Vec<String>,
    pub remote_support: Support,
    pub adaptive_support: Support,
}

/// Two-stage retriever over a loaded index.
///
/// Immutable once built; share it behind an `Arc` to serve concurrent
/// queries.
pub struct Searcher {
    vectors: VectorIndex,
    records: Vec<CatalogRecord>,
    embedder: Box<dyn Embedder>,
    reranker: Box<dyn Reranker>,
}

impl Searcher {
    pub fn new(
        index: LoadedIndex,
        embedder: Box<dyn Embedder>,
        reranker: Box<dyn Reranker>,
    ) -> Result<Self> {
        if !index.vectors.is_empty()
            && index.vectors.dimension() != embedder.dimension()
        {
            return Err(Error::IndexIntegrity(format!(
                "index has dimension {} but {} produces {}",
                index.vectors.dimension(),
                embedder.model_id(),
                embedder.dimension()
            )));
        }
        if index.info.embedding_model != embedder.model_id() {
            warn!(
                indexed_with = %index.info.embedding_model,
                querying_with = embedder.model_id(),
                "query model differs from index model"
            );
        }

        Ok(Self {
            vectors: index.vectors,
            records: index.records,
            embedder,
            reranker,
        })
    }

    /// Load the index at `paths`, then both models.
    ///
    /// The index is checked first so a broken index fails before any
    /// model download starts.
    pub fn open(paths: &IndexPaths, models: &ModelManager) -> Result<Self> {
        let index = load_index(paths)?;
        let embedder = models.load_embedder()?;
        let reranker = models.load_reranker()?;
        Self::new(index, Box::new(embedder), Box::new(reranker))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Answer `query` with at most `top_k` results (clamped to 1..=10).
    ///
    /// An empty index yields an empty list. Failures inside the pipeline
    /// are logged and reported as [`Error::SearchFailed`].
    pub fn search(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<Recommendation>> {
        let query = query.trim();
        if meaningful_chars(query) < MIN_QUERY_CHARS {
            return Err(Error::QueryTooShort {
                min: MIN_QUERY_CHARS,
            });
        }

        self.retrieve(query, clamp_top_k(top_k)).map_err(|e| {
            error!(error = %e, query, "search pipeline failed");
            Error::SearchFailed
        })
    }

    fn retrieve(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<Recommendation>> {
        if self.vectors.is_empty() {
            return Ok(Vec::new());
        }

        let query_vector = embed_query(self.embedder.as_ref(), query)?;
        let hits = self.vectors.search(&query_vector, RECALL_CANDIDATES)?;

        let candidates = hits
            .iter()
            .map(|hit| {
                self.records.get(hit.row).ok_or_else(|| {
                    Error::IndexIntegrity(format!(
                        "no metadata for row {}",
                        hit.row
                    ))
                })
            })
            .collect::<Result<Vec<&CatalogRecord>>>()?;
        let contexts: Vec<String> =
            candidates.iter().map(|r| r.rich_context()).collect();

        let ranked =
            rank_candidates(self.reranker.as_ref(), query, &contexts)?;
        debug!(recalled = hits.len(), "reranked candidates");

        Ok(ranked
            .into_iter()
            .take(top_k)
            .enumerate()
            .map(|(i, c)| present(candidates[c.position], i + 1, c.score))
            .collect())
    }
}

pub fn clamp_top_k(top_k: usize) -> usize {
    top_k.clamp(1, MAX_RESULTS)
}

/// Stored duration when usable, else re-derived from the description,
/// else the default.
pub fn resolve_duration(record: &CatalogRecord) -> u32 {
    record
        .duration
        .filter(|&m| m > 0)
        .or_else(|| derive_duration(&record.description))
        .unwrap_or(DEFAULT_DURATION_MINUTES)
}

/// Stored job levels, unless they are the default and the description
/// names some.
pub fn resolve_job_levels(record: &CatalogRecord) -> String {
    if record.job_levels != DEFAULT_JOB_LEVELS {
        return record.job_levels.clone();
    }
    extract_job_levels(&record.description)
        .unwrap_or_else(|| DEFAULT_JOB_LEVELS.to_string())
}

fn present(
    record: &CatalogRecord,
    rank: usize,
    score: f32,
) -> Recommendation {
    Recommendation {
        rank,
        score,
        url: record.url.clone(),
        name: record.name.clone(),
        description: truncate_chars(
            &record.description,
            DISPLAY_DESCRIPTION_MAX_CHARS,
        ),
        duration: resolve_duration(record),
        job_levels: resolve_job_levels(record),
        test_type: record.test_type.clone(),
        remote_support: record.remote_support.into(),
        adaptive_support: record.adaptive_support.into(),
    }
}

pub fn format_human(results: &[Recommendation]) {
    if results.is_empty() {
        println!("No results found.");
        return;
    }

    for r in results {
        println!("{:>3}. [{:.3}] {}", r.rank, r.score, r.name);
        println!("     {}", r.url);
        println!(
            "     {} min | levels: {} | types: {} | remote: {} | adaptive: {}",
            r.duration,
            r.job_levels,
            r.test_type.join(", "),
            r.remote_support,
            r.adaptive_support
        );
    }
    println!("\n{} result(s)", results.len());
}

pub fn format_json(results: &[Recommendation], query: &str) -> Result<()> {
    #[derive(Serialize)]
    struct Output<'a> {
        query: &'a str,
        result_count: usize,
        results: &'a [Recommendation],
    }

    let output = Output {
        query,
        result_count: results.len(),
        results,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        indexer::{build_index, paths_in},
        testing::{FlatReranker, HashEmbedder, OverlapReranker},
    };

    fn record(name: &str, description: &str) -> CatalogRecord {
        let json = serde_json::json!({
            "url": format!("https://example.com/{}/", name.replace(' ', "-")),
            "name": name,
            "remote_support": "Yes",
            "adaptive_support": "No",
            "test_type": ["K"],
            "description": description,
        });
        serde_json::from_value(json).unwrap()
    }

    fn searcher_over(
        records: &[CatalogRecord],
        reranker: Box<dyn Reranker>,
    ) -> (Searcher, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let paths = paths_in(tmp.path());
        let embedder = HashEmbedder::new(128);
        build_index(records, &embedder, &paths, 8, false).unwrap();

        let searcher = Searcher::new(
            load_index(&paths).unwrap(),
            Box::new(embedder),
            reranker,
        )
        .unwrap();
        (searcher, tmp)
    }

    fn java_and_excel() -> Vec<CatalogRecord> {
        vec![
            record(
                "Java Test",
                "Measures Java knowledge. Time in minutes = 30. \
                 Job levels Entry Level",
            ),
            record("Excel Test", "Spreadsheet skills. Time in minutes = 20."),
        ]
    }

    #[test]
    fn java_query_ranks_java_first_with_derived_fields() {
        let (searcher, _tmp) =
            searcher_over(&java_and_excel(), Box::new(OverlapReranker));

        let results = searcher.search("java developer test", 5).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].name, "Java Test");
        assert_eq!(results[0].rank, 1);
        assert_eq!(results[0].duration, 30);
        assert_eq!(results[0].job_levels, "Entry Level");
        assert_eq!(results[0].remote_support, Support::Yes);
        assert_eq!(results[0].adaptive_support, Support::No);
        assert_eq!(results[1].duration, 20);
        assert_eq!(results[1].job_levels, DEFAULT_JOB_LEVELS);
    }

    #[test]
    fn results_are_sorted_and_bounded() {
        let records: Vec<CatalogRecord> = (0..25)
            .map(|i| record(&format!("Test {i}"), &format!("skill {i} test")))
            .collect();
        let (searcher, _tmp) =
            searcher_over(&records, Box::new(OverlapReranker));

        let results = searcher.search("skill test", 7).unwrap();
        assert_eq!(results.len(), 7);
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));

        assert_eq!(searcher.search("skill test", 50).unwrap().len(), 10);
        assert_eq!(searcher.search("skill test", 0).unwrap().len(), 1);
    }

    #[test]
    fn fewer_candidates_than_requested() {
        let (searcher, _tmp) =
            searcher_over(&java_and_excel(), Box::new(OverlapReranker));
        assert_eq!(searcher.search("excel", 10).unwrap().len(), 2);
    }

    #[test]
    fn repeated_queries_are_deterministic() {
        let (searcher, _tmp) =
            searcher_over(&java_and_excel(), Box::new(OverlapReranker));
        let first = searcher.search("java developer test", 10).unwrap();
        let second = searcher.search("java developer test", 10).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn equal_rerank_scores_keep_recall_order() {
        let records = vec![
            record("Alpha", "java java java"),
            record("Beta", "java"),
            record("Gamma", "python"),
        ];
        let (searcher, _tmp) = searcher_over(&records, Box::new(FlatReranker));

        let query = "java java java alpha";
        let embedder = HashEmbedder::new(128);
        let q = embed_query(&embedder, query).unwrap();
        let recall: Vec<String> = searcher
            .vectors
            .search(&q, RECALL_CANDIDATES)
            .unwrap()
            .into_iter()
            .map(|h| searcher.records[h.row].name.clone())
            .collect();

        let names: Vec<String> = searcher
            .search(query, 10)
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, recall);
    }

    #[test]
    fn short_queries_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = paths_in(tmp.path());
        let embedder = HashEmbedder::new(128);
        build_index(&java_and_excel(), &embedder, &paths, 8, false).unwrap();
        let searcher = Searcher::new(
            load_index(&paths).unwrap(),
            Box::new(embedder.clone()),
            Box::new(OverlapReranker),
        )
        .unwrap();

        let before = embedder.calls();
        for query in ["", " ", "?", "a", " !b! "] {
            assert!(matches!(
                searcher.search(query, 5),
                Err(Error::QueryTooShort { min: 2 })
            ));
        }
        assert_eq!(embedder.calls(), before);

        assert!(searcher.search("qa", 5).is_ok());
        assert_eq!(embedder.calls(), before + 1);
    }

    #[test]
    fn empty_index_returns_empty_list() {
        let (searcher, _tmp) = searcher_over(&[], Box::new(OverlapReranker));
        assert!(searcher.is_empty());
        assert!(searcher.search("java developer", 5).unwrap().is_empty());
    }

    #[test]
    fn description_is_cut_to_display_length() {
        let long = "analysis ".repeat(200);
        let (searcher, _tmp) =
            searcher_over(&[record("Long", &long)], Box::new(OverlapReranker));
        let results = searcher.search("analysis", 1).unwrap();
        assert_eq!(
            results[0].description.chars().count(),
            DISPLAY_DESCRIPTION_MAX_CHARS
        );
    }

    struct FailingReranker;

    impl Reranker for FailingReranker {
        fn score(&self, _: &str, _: &[String]) -> Result<Vec<f32>> {
            Err(Error::Model("inference exploded".into()))
        }
    }

    #[test]
    fn pipeline_failures_become_generic() {
        let (searcher, _tmp) =
            searcher_over(&java_and_excel(), Box::new(FailingReranker));
        let err = searcher.search("java", 5).unwrap_err();
        assert!(matches!(err, Error::SearchFailed));
        assert!(!err.to_string().contains("exploded"));
    }

    struct NanReranker;

    impl Reranker for NanReranker {
        fn score(&self, _: &str, candidates: &[String]) -> Result<Vec<f32>> {
            Ok(candidates
                .iter()
                .enumerate()
                .map(|(i, _)| if i % 3 == 0 { f32::NAN } else { i as f32 })
                .collect())
        }
    }

    #[test]
    fn non_finite_rerank_scores_become_generic_failure() {
        let records: Vec<CatalogRecord> = (0..30)
            .map(|i| record(&format!("Test {i}"), "Java skills."))
            .collect();
        let (searcher, _tmp) = searcher_over(&records, Box::new(NanReranker));

        let err = searcher.search("java skills", 10).unwrap_err();
        assert!(matches!(err, Error::SearchFailed));
    }

    #[test]
    fn dimension_mismatch_refuses_to_serve() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = paths_in(tmp.path());
        build_index(&java_and_excel(), &HashEmbedder::new(64), &paths, 8, false)
            .unwrap();

        let result = Searcher::new(
            load_index(&paths).unwrap(),
            Box::new(HashEmbedder::new(32)),
            Box::new(OverlapReranker),
        );
        assert!(matches!(result, Err(Error::IndexIntegrity(_))));
    }

    #[test]
    fn duration_resolution_order() {
        let mut r = record("X", "Approximate Completion Time in minutes = 25");
        assert_eq!(resolve_duration(&r), 25);

        r.duration = Some(12);
        assert_eq!(resolve_duration(&r), 12);

        r.duration = None;
        r.description = "Takes about 40 mins".into();
        assert_eq!(resolve_duration(&r), 40);

        r.description = "no timing".into();
        assert_eq!(resolve_duration(&r), DEFAULT_DURATION_MINUTES);
    }

    #[test]
    fn explicit_job_levels_are_kept() {
        let mut r = record("X", "Job levels Director");
        assert_eq!(resolve_job_levels(&r), "Director");
        r.job_levels = "Manager".into();
        assert_eq!(resolve_job_levels(&r), "Manager");
    }
}
