use std::path::{Path, PathBuf};

use tracing::info;

use crate::{
    catalog::CatalogRecord,
    embedding::{Embedder, embed_all},
    error::{Error, Result},
    metadata_db::{IndexInfo, MetadataDb},
    vector_index::VectorIndex,
};

/// Where the two halves of an index live. They are only meaningful
/// together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPaths {
    pub vectors: PathBuf,
    pub metadata: PathBuf,
}

impl IndexPaths {
    pub fn exist(&self) -> bool {
        self.vectors.is_file() && self.metadata.is_file()
    }
}

/// A loaded, alignment-checked index: `records[i]` describes row `i`.
#[derive(Debug)]
pub struct LoadedIndex {
    pub vectors: VectorIndex,
    pub records: Vec<CatalogRecord>,
    pub info: IndexInfo,
}

/// Embed every record's rich context and persist the vector index and the
/// metadata sidecar, replacing whatever was there.
///
/// An empty catalog produces a valid zero-row index.
pub fn build_index<E: Embedder + ?Sized>(
    records: &[CatalogRecord],
    embedder: &E,
    paths: &IndexPaths,
    batch_size: usize,
    show_progress: bool,
) -> Result<IndexInfo> {
    let contexts: Vec<String> =
        records.iter().map(CatalogRecord::rich_context).collect();
    let embedded = embed_all(embedder, &contexts, batch_size, show_progress)?;
    let vectors = VectorIndex::from_vectors(embedder.dimension(), &embedded)?;

    for path in [&paths.vectors, &paths.metadata] {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|_| Error::DataDir(parent.to_path_buf()))?;
        }
    }

    let metadata = MetadataDb::create(&paths.metadata)?;
    let info =
        metadata.write_all(records, embedder.model_id(), vectors.dimension())?;
    vectors.save(&paths.vectors)?;

    info!(
        records = info.record_count,
        dimension = info.dimension,
        model = %info.embedding_model,
        "index built"
    );
    Ok(info)
}

/// Load both halves of an index and verify they describe the same rows.
pub fn load_index(paths: &IndexPaths) -> Result<LoadedIndex> {
    let vectors = VectorIndex::load(&paths.vectors)?;
    let metadata = MetadataDb::open(&paths.metadata)?;
    let info = metadata.info()?;
    let records = metadata.load_records()?;

    check_alignment(&vectors, &records, &info)?;
    Ok(LoadedIndex {
        vectors,
        records,
        info,
    })
}

fn check_alignment(
    vectors: &VectorIndex,
    records: &[CatalogRecord],
    info: &IndexInfo,
) -> Result<()> {
    if vectors.len() != records.len() {
        return Err(Error::IndexIntegrity(format!(
            "vector index has {} rows but metadata has {}",
            vectors.len(),
            records.len()
        )));
    }
    if vectors.dimension() != info.dimension {
        return Err(Error::IndexIntegrity(format!(
            "vector index dimension {} differs from recorded {}",
            vectors.dimension(),
            info.dimension
        )));
    }
    Ok(())
}

/// Convenience for callers holding only a directory.
pub fn paths_in(dir: &Path) -> IndexPaths {
    IndexPaths {
        vectors: dir.join("vectors.idx"),
        metadata: dir.join("metadata.redb"),
    }
}
