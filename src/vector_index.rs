use std::{
    fs,
    io::{BufWriter, Write},
    path::Path,
};

use rayon::prelude::*;

use crate::error::{Error, Result};

const MAGIC: &[u8; 4] = b"CSVI";
const FORMAT_VERSION: u32 = 1;

/// Header: magic, version (u32 LE), dimension (u32 LE), rows (u64 LE).
const HEADER_SIZE: usize = 20;

/// One recall hit: a row of the index and its inner product with the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub row: usize,
    pub score: f32,
}

/// Exact inner-product index over fixed-dimension vectors.
///
/// Vectors are stored row-major in one flat buffer; row `i` is the `i`-th
/// vector added. With unit-length vectors the inner product is the cosine
/// similarity.
///
/// On-disk format:
/// - 4 bytes: magic `CSVI`
/// - 4 bytes: format version (u32 LE)
/// - 4 bytes: dimension D (u32 LE)
/// - 8 bytes: row count N (u64 LE)
/// - N * D * 4 bytes: f32 LE values in row-major order
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    dimension: usize,
    data: Vec<f32>,
}

impl VectorIndex {
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(Error::Config(
                "index dimension must be positive".into(),
            ));
        }
        Ok(Self {
            dimension,
            data: Vec::new(),
        })
    }

    pub fn from_vectors(
        dimension: usize,
        vectors: &[Vec<f32>],
    ) -> Result<Self> {
        let mut index = Self::new(dimension)?;
        index.data.reserve(vectors.len() * dimension);
        for vector in vectors {
            index.add(vector)?;
        }
        Ok(index)
    }

    /// Append a vector as the next row.
    pub fn add(&mut self, vector: &[f32]) -> Result<usize> {
        if vector.len() != self.dimension {
            return Err(Error::Model(format!(
                "cannot add {}-dimensional vector to {}-dimensional index",
                vector.len(),
                self.dimension
            )));
        }
        self.data.extend_from_slice(vector);
        Ok(self.len() - 1)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.data.len() / self.dimension
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn row(&self, row: usize) -> Option<&[f32]> {
        let start = row.checked_mul(self.dimension)?;
        self.data.get(start..start + self.dimension)
    }

    /// The `k` rows with the highest inner product against `query`.
    ///
    /// Ordered by score descending, then by row ascending, so equal scores
    /// come back in insertion order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Hit>> {
        if query.len() != self.dimension {
            return Err(Error::Model(format!(
                "query has dimension {}, index has {}",
                query.len(),
                self.dimension
            )));
        }
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits: Vec<Hit> = self
            .data
            .par_chunks_exact(self.dimension)
            .enumerate()
            .map(|(row, vector)| Hit {
                row,
                score: dot(vector, query),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score.total_cmp(&a.score).then(a.row.cmp(&b.row))
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// Write the index to `path`, replacing any previous file atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("idx.tmp");
        {
            let mut out = BufWriter::new(fs::File::create(&tmp)?);
            out.write_all(MAGIC)?;
            out.write_all(&FORMAT_VERSION.to_le_bytes())?;
            out.write_all(&(self.dimension as u32).to_le_bytes())?;
            out.write_all(&(self.len() as u64).to_le_bytes())?;
            for value in &self.data {
                out.write_all(&value.to_le_bytes())?;
            }
            out.flush()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Read an index written by [`VectorIndex::save`].
    ///
    /// A missing file, bad magic, unknown version, or a body whose length
    /// disagrees with the header is an integrity error.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(|e| {
            Error::IndexIntegrity(format!(
                "cannot read vector index {}: {e}",
                path.display()
            ))
        })?;

        if bytes.len() < HEADER_SIZE || &bytes[0..4] != MAGIC {
            return Err(Error::IndexIntegrity(format!(
                "{} is not a vector index",
                path.display()
            )));
        }

        let version = read_u32(&bytes[4..8]);
        if version != FORMAT_VERSION {
            return Err(Error::IndexIntegrity(format!(
                "unsupported vector index version {version}"
            )));
        }

        let dimension = read_u32(&bytes[8..12]) as usize;
        let rows = u64::from_le_bytes([
            bytes[12], bytes[13], bytes[14], bytes[15], bytes[16], bytes[17],
            bytes[18], bytes[19],
        ]) as usize;

        let body = &bytes[HEADER_SIZE..];
        let expected = rows
            .checked_mul(dimension)
            .and_then(|n| n.checked_mul(4));
        if dimension == 0 || expected != Some(body.len()) {
            return Err(Error::IndexIntegrity(format!(
                "vector index header says {rows} x {dimension}, \
                 body has {} bytes",
                body.len()
            )));
        }

        Ok(Self {
            dimension,
            data: body
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        })
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> VectorIndex {
        VectorIndex::from_vectors(
            3,
            &[
                vec![1.0, 0.0, 0.0],
                vec![0.0, 1.0, 0.0],
                vec![0.6, 0.8, 0.0],
                vec![1.0, 0.0, 0.0],
            ],
        )
        .unwrap()
    }

    #[test]
    fn search_orders_by_score_then_row() {
        let hits = sample().search(&[1.0, 0.0, 0.0], 10).unwrap();
        let rows: Vec<usize> = hits.iter().map(|h| h.row).collect();
        assert_eq!(rows, vec![0, 3, 2, 1]);
        assert!((hits[2].score - 0.6).abs() < 1e-6);
    }

    #[test]
    fn search_truncates_to_k() {
        let hits = sample().search(&[0.0, 1.0, 0.0], 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].row, 1);
        assert_eq!(hits[1].row, 2);
    }

    #[test]
    fn empty_index_returns_nothing() {
        let index = VectorIndex::new(3).unwrap();
        assert!(index.search(&[1.0, 0.0, 0.0], 30).unwrap().is_empty());
    }

    #[test]
    fn wrong_dimension_is_rejected() {
        assert!(sample().search(&[1.0, 0.0], 5).is_err());
        assert!(VectorIndex::new(2).unwrap().add(&[1.0]).is_err());
        assert!(VectorIndex::new(0).is_err());
    }

    #[test]
    fn non_finite_rows_do_not_break_ordering() {
        let vectors: Vec<Vec<f32>> = (0..40)
            .map(|i| match i % 7 {
                0 => vec![f32::NAN, 0.0],
                3 => vec![f32::INFINITY, 1.0],
                _ => vec![i as f32 / 40.0, 1.0],
            })
            .collect();
        let index = VectorIndex::from_vectors(2, &vectors).unwrap();

        let hits = index.search(&[1.0, 0.0], 30).unwrap();
        assert_eq!(hits.len(), 30);
    }

    #[test]
    fn body_is_little_endian() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vectors.idx");
        VectorIndex::from_vectors(2, &[vec![1.0, -2.5]])
            .unwrap()
            .save(&path)
            .unwrap();

        let bytes = fs::read(&path).unwrap();
        let mut expected = 1.0f32.to_le_bytes().to_vec();
        expected.extend_from_slice(&(-2.5f32).to_le_bytes());
        assert_eq!(&bytes[HEADER_SIZE..], expected.as_slice());
    }

    #[test]
    fn save_and_load_preserve_rows() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vectors.idx");
        let index = sample();

        index.save(&path).unwrap();
        let loaded = VectorIndex::load(&path).unwrap();

        assert_eq!(loaded, index);
        assert_eq!(loaded.len(), 4);
        assert_eq!(loaded.row(2), Some(&[0.6, 0.8, 0.0][..]));
        assert_eq!(loaded.row(4), None);
    }

    #[test]
    fn empty_index_survives_reload() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vectors.idx");
        VectorIndex::new(8).unwrap().save(&path).unwrap();

        let loaded = VectorIndex::load(&path).unwrap();
        assert!(loaded.is_empty());
        assert_eq!(loaded.dimension(), 8);
    }

    #[test]
    fn truncated_file_is_an_integrity_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vectors.idx");
        sample().save(&path).unwrap();

        let mut bytes = fs::read(&path).unwrap();
        bytes.truncate(bytes.len() - 4);
        fs::write(&path, bytes).unwrap();

        assert!(matches!(
            VectorIndex::load(&path),
            Err(Error::IndexIntegrity(_))
        ));
    }

    #[test]
    fn missing_or_foreign_file_is_an_integrity_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vectors.idx");
        assert!(matches!(
            VectorIndex::load(&path),
            Err(Error::IndexIntegrity(_))
        ));

        fs::write(&path, b"definitely not an index file").unwrap();
        assert!(matches!(
            VectorIndex::load(&path),
            Err(Error::IndexIntegrity(_))
        ));
    }
}
