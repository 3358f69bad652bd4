use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::{
    catalog::CatalogRecord,
    error::{Error, Result},
};

/// Row number → JSON-encoded `CatalogRecord`.
const RECORDS: TableDefinition<u64, &[u8]> = TableDefinition::new("records");
const INFO: TableDefinition<&str, &str> = TableDefinition::new("info");

const KEY_EMBEDDING_MODEL: &str = "embedding_model";
const KEY_DIMENSION: &str = "dimension";
const KEY_RECORD_COUNT: &str = "record_count";

/// Build-time facts stored next to the records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexInfo {
    pub embedding_model: String,
    pub dimension: usize,
    pub record_count: usize,
}

/// Row-aligned metadata sidecar for the vector index.
///
/// Row `i` of the `records` table describes row `i` of the vector index.
pub struct MetadataDb {
    db: Database,
}

impl MetadataDb {
    /// Create a fresh, empty database at `path`, discarding any previous one.
    pub fn create(path: &Path) -> Result<Self> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        txn.open_table(RECORDS)?;
        txn.open_table(INFO)?;
        txn.commit()?;

        Ok(Self { db })
    }

    /// Open an existing database. A missing file is an integrity error.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::IndexIntegrity(format!(
                "metadata store {} is missing",
                path.display()
            )));
        }
        Ok(Self {
            db: Database::open(path)?,
        })
    }

    /// Write every record (row = position in `records`) and the build info
    /// in a single transaction.
    pub fn write_all(
        &self,
        records: &[CatalogRecord],
        embedding_model: &str,
        dimension: usize,
    ) -> Result<IndexInfo> {
        let info = IndexInfo {
            embedding_model: embedding_model.to_string(),
            dimension,
            record_count: records.len(),
        };

        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(RECORDS)?;
            for (row, record) in records.iter().enumerate() {
                let bytes = serde_json::to_vec(record)?;
                table.insert(row as u64, bytes.as_slice())?;
            }

            let mut meta = txn.open_table(INFO)?;
            meta.insert(KEY_EMBEDDING_MODEL, info.embedding_model.as_str())?;
            meta.insert(KEY_DIMENSION, info.dimension.to_string().as_str())?;
            meta.insert(
                KEY_RECORD_COUNT,
                info.record_count.to_string().as_str(),
            )?;
        }
        txn.commit()?;
        Ok(info)
    }

    pub fn info(&self) -> Result<IndexInfo> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(INFO)?;

        let get = |key: &str| -> Result<String> {
            table
                .get(key)?
                .map(|v| v.value().to_string())
                .ok_or_else(|| {
                    Error::IndexIntegrity(format!("metadata lacks '{key}'"))
                })
        };
        let number = |key: &str| -> Result<usize> {
            get(key)?.parse().map_err(|_| {
                Error::IndexIntegrity(format!(
                    "metadata '{key}' is not a number"
                ))
            })
        };

        Ok(IndexInfo {
            embedding_model: get(KEY_EMBEDDING_MODEL)?,
            dimension: number(KEY_DIMENSION)?,
            record_count: number(KEY_RECORD_COUNT)?,
        })
    }

    /// Load every record in row order.
    ///
    /// Rows must be exactly `0..n` and `n` must match the recorded count;
    /// a gap, a stray row or an undecodable record is an integrity error.
    pub fn load_records(&self) -> Result<Vec<CatalogRecord>> {
        let expected = self.info()?.record_count;

        let txn = self.db.begin_read()?;
        let table = txn.open_table(RECORDS)?;

        let mut records = Vec::with_capacity(expected);
        for entry in table.iter()? {
            let (key, value) = entry?;
            let row = key.value();
            if row != records.len() as u64 {
                return Err(Error::IndexIntegrity(format!(
                    "metadata row {row} found where row {} was expected",
                    records.len()
                )));
            }
            let record: CatalogRecord = serde_json::from_slice(value.value())
                .map_err(|e| {
                    Error::IndexIntegrity(format!("metadata row {row}: {e}"))
                })?;
            records.push(record);
        }

        if records.len() != expected {
            return Err(Error::IndexIntegrity(format!(
                "metadata holds {} rows but records {expected}",
                records.len()
            )));
        }
        Ok(records)
    }
}
