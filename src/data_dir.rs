use std::path::{Path, PathBuf};

use crate::{
    error::{Error, Result},
    indexer::{IndexPaths, paths_in},
};

pub const DATA_DIR_ENV: &str = "CATSEEK_DATA_DIR";

#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Resolve the data directory from, in order of priority:
    /// 1. An explicit path (from --data-dir)
    /// 2. The CATSEEK_DATA_DIR environment variable
    /// 3. The XDG data directory (~/.local/share/catseek/)
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let root = if let Some(path) = explicit {
            path.to_path_buf()
        } else if let Ok(val) = std::env::var(DATA_DIR_ENV) {
            PathBuf::from(val)
        } else {
            xdg::BaseDirectories::with_prefix("catseek")
                .get_data_home()
                .ok_or_else(|| {
                    Error::Config(
                        "could not determine XDG data home directory".into(),
                    )
                })?
        };

        std::fs::create_dir_all(&root)
            .map_err(|_| Error::DataDir(root.clone()))?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Default location of the crawled catalog.
    pub fn catalog(&self) -> PathBuf {
        self.root.join("catalog.json")
    }

    pub fn index_paths(&self) -> IndexPaths {
        paths_in(&self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_with_explicit_path() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = DataDir::resolve(Some(tmp.path())).unwrap();

        assert_eq!(dir.root(), tmp.path());
        assert_eq!(dir.catalog(), tmp.path().join("catalog.json"));

        let paths = dir.index_paths();
        assert_eq!(paths.vectors, tmp.path().join("vectors.idx"));
        assert_eq!(paths.metadata, tmp.path().join("metadata.redb"));
        assert!(!paths.exist());
    }

    #[test]
    fn missing_root_is_created() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a").join("b");
        let dir = DataDir::resolve(Some(&nested)).unwrap();

        assert!(dir.root().is_dir());
    }

    #[test]
    fn uncreatable_root_is_a_data_dir_error() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("occupied");
        std::fs::write(&file, b"x").unwrap();

        let err = DataDir::resolve(Some(&file.join("sub"))).err();
        assert!(matches!(err, Some(Error::DataDir(_))));
    }
}
