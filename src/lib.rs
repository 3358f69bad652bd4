//! catseek - crawl a paginated assessment catalog and recommend entries for
//! free-text queries.
//!
//! The pipeline has three stages, each usable on its own:
//!
//! 1. [`crawl`] walks the listing pages, fetches every detail page under a
//!    bounded permit pool and writes the catalog as JSON.
//! 2. [`indexer`] embeds each record with a bi-encoder and persists an exact
//!    inner-product [`VectorIndex`] plus a row-aligned metadata sidecar.
//! 3. [`Searcher`] recalls candidates from the index, reranks them with a
//!    cross-encoder and returns at most ten recommendations.
//!
//! # Quick start
//!
//! ```no_run
//! use catseek::{DataDir, ModelManager, SearchHandle, Searcher};
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let models = ModelManager::new();
//! let paths = data_dir.index_paths();
//!
//! let handle = SearchHandle::new();
//! handle.initialize(|| Searcher::open(&paths, &models)).unwrap();
//!
//! for r in handle.search("java developer, 40 minutes", 5).unwrap() {
//!     println!("{}. {} ({} min) {}", r.rank, r.name, r.duration, r.url);
//! }
//! ```

pub mod catalog;
pub mod crawl;
pub mod data_dir;
pub mod detail;
pub mod embedding;
pub mod error;
pub mod fetch;
pub mod handle;
pub mod indexer;
pub mod listing;
pub mod metadata_db;
pub mod model_manager;
pub mod reranker;
pub mod search;
pub mod testing;
pub mod text_util;
pub mod vector_index;

pub use catalog::CatalogRecord;
pub use crawl::{CrawlConfig, Crawler, StopSignal};
pub use data_dir::DataDir;
pub use embedding::Embedder;
pub use error::{Error, Result};
pub use fetch::{FetchConfig, Fetcher, PageSource};
pub use handle::{HandleState, SearchHandle};
pub use model_manager::ModelManager;
pub use reranker::Reranker;
pub use search::{Recommendation, Searcher};
pub use vector_index::VectorIndex;
