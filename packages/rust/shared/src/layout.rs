//! On-disk layer layout consumed by downstream readers.
//!
//! ```text
//! <root>/00-raw/       source CSVs
//! <root>/01-clean/     cleaned parquet tables
//! <root>/01-clean/_dq/ data-quality run log
//! <root>/02-model/     dimension, fact and aggregate tables
//! ```

use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};

/// Paths of every layer under one data root.
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.root.join("00-raw")
    }

    pub fn clean_dir(&self) -> PathBuf {
        self.root.join("01-clean")
    }

    pub fn dq_dir(&self) -> PathBuf {
        self.clean_dir().join("_dq")
    }

    pub fn model_dir(&self) -> PathBuf {
        self.root.join("02-model")
    }

    /// `01-clean/<table>.parquet`
    pub fn clean_table(&self, table: &str) -> PathBuf {
        self.clean_dir().join(format!("{table}.parquet"))
    }

    /// `02-model/<table>.parquet`
    pub fn model_table(&self, table: &str) -> PathBuf {
        self.model_dir().join(format!("{table}.parquet"))
    }

    /// Create every layer directory. Safe to call repeatedly.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [self.raw_dir(), self.dq_dir(), self.model_dir()] {
            std::fs::create_dir_all(&dir).map_err(|e| PipelineError::io(&dir, e))?;
        }
        tracing::debug!(root = %self.root.display(), "data layout ready");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_paths() {
        let layout = DataLayout::new("data");
        assert_eq!(layout.raw_dir(), PathBuf::from("data/00-raw"));
        assert_eq!(layout.dq_dir(), PathBuf::from("data/01-clean/_dq"));
        assert_eq!(
            layout.model_table("sales_by_country"),
            PathBuf::from("data/02-model/sales_by_country.parquet")
        );
        assert_eq!(
            layout.clean_table("order_details"),
            PathBuf::from("data/01-clean/order_details.parquet")
        );
    }

    #[test]
    fn ensure_dirs_is_idempotent() {
        let root = std::env::temp_dir().join(format!("salesetl-layout-{}", uuid::Uuid::now_v7()));
        let layout = DataLayout::new(&root);

        layout.ensure_dirs().unwrap();
        layout.ensure_dirs().unwrap();

        assert!(layout.raw_dir().is_dir());
        assert!(layout.dq_dir().is_dir());
        assert!(layout.model_dir().is_dir());

        let _ = std::fs::remove_dir_all(&root);
    }
}
