//! Parquet persistence for pipeline layers.
//!
//! Every write goes to a temporary file in the destination directory and is
//! renamed into place once complete, so a reader never observes a
//! half-written table.
//!
//! - [`write_table`] / [`read_table`]: one [`Table`] per parquet file
//! - [`write_json`] / [`write_bytes`]: atomic writes for sidecar files
//! - [`remove_file`]: drop a stale optional output

mod convert;

use std::fs::File;
use std::io::Write;
use std::path::Path;

use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use salesetl_shared::{PipelineError, Result, Table};
use tracing::debug;

pub use convert::{append_record_batch, to_record_batch};

/// Write `table` to `path` as a single-row-group parquet file, replacing any
/// existing file atomically.
pub fn write_table(path: &Path, table: &Table) -> Result<()> {
    let batch = to_record_batch(table)?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();

    write_atomic(path, |file| {
        let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))
            .map_err(|e| PipelineError::Storage(format!("{}: {e}", path.display())))?;
        writer
            .write(&batch)
            .map_err(|e| PipelineError::Storage(format!("{}: {e}", path.display())))?;
        writer
            .close()
            .map_err(|e| PipelineError::Storage(format!("{}: {e}", path.display())))?;
        Ok(())
    })?;

    debug!(path = %path.display(), rows = table.len(), "wrote parquet table");
    Ok(())
}

/// Read a parquet file into a [`Table`].
pub fn read_table(path: &Path) -> Result<Table> {
    let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| PipelineError::Storage(format!("{}: {e}", path.display())))?;

    let columns: Vec<String> = builder
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();
    let mut table = Table::new(columns);

    let reader = builder
        .build()
        .map_err(|e| PipelineError::Storage(format!("{}: {e}", path.display())))?;
    for batch in reader {
        let batch = batch.map_err(|e| PipelineError::Storage(format!("{}: {e}", path.display())))?;
        append_record_batch(&mut table, &batch)?;
    }

    debug!(path = %path.display(), rows = table.len(), "read parquet table");
    Ok(table)
}

/// Read a parquet file if it exists.
pub fn read_table_if_exists(path: &Path) -> Result<Option<Table>> {
    if !path.exists() {
        return Ok(None);
    }
    read_table(path).map(Some)
}

/// Serialize `data` as pretty JSON and write it atomically.
pub fn write_json<T: serde::Serialize>(path: &Path, data: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| PipelineError::validation(format!("JSON serialization failed: {e}")))?;
    write_bytes(path, json.as_bytes())?;
    debug!(path = %path.display(), "wrote JSON file");
    Ok(())
}

/// Write raw bytes atomically.
pub fn write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    write_atomic(path, |file| {
        file.write_all(bytes).map_err(|e| PipelineError::io(path, e))
    })
}

/// Remove `path` if present. Returns whether a file was removed.
pub fn remove_file(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "removed stale file");
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(PipelineError::io(path, e)),
    }
}

/// Run `write` against a temp file next to `path`, then rename it over `path`.
fn write_atomic(path: &Path, write: impl FnOnce(&mut File) -> Result<()>) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir, e))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".salesetl-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| PipelineError::io(dir, e))?;

    write(tmp.as_file_mut())?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| PipelineError::io(tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| PipelineError::io(path, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use salesetl_shared::Value;
    use std::path::PathBuf;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("salesetl-storage-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn sales_table() -> Table {
        Table::from_rows(
            ["CompanyName", "line_amount", "rank"],
            vec![
                vec!["Ernst Handel".into(), Value::Float(200.0), Value::Int(1)],
                vec!["Alfreds".into(), Value::Float(50.0), Value::Int(2)],
                vec![Value::Null, Value::Float(10.5), Value::Int(3)],
            ],
        )
        .unwrap()
    }

    #[test]
    fn parquet_roundtrip() {
        let dir = temp_dir();
        let path = dir.join("sales_by_customer.parquet");

        write_table(&path, &sales_table()).unwrap();
        let back = read_table(&path).unwrap();

        assert_eq!(back, sales_table());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn overwrite_replaces_content_and_leaves_no_temp_files() {
        let dir = temp_dir();
        let path = dir.join("t.parquet");

        write_table(&path, &sales_table()).unwrap();
        let smaller = Table::from_rows(["x"], vec![vec![Value::Int(1)]]).unwrap();
        write_table(&path, &smaller).unwrap();

        assert_eq!(read_table(&path).unwrap(), smaller);
        let leftovers: Vec<_> = std::fs::read_dir(&dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn empty_table_keeps_columns() {
        let dir = temp_dir();
        let path = dir.join("dq_issues.parquet");

        write_table(&path, &Table::new(["run_ts", "detail"])).unwrap();
        let back = read_table(&path).unwrap();
        assert_eq!(back.columns(), &["run_ts", "detail"]);
        assert!(back.is_empty());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_file_helpers() {
        let dir = temp_dir();
        let path = dir.join("absent.parquet");

        assert!(read_table_if_exists(&path).unwrap().is_none());
        assert!(!remove_file(&path).unwrap());

        write_bytes(&path, b"junk").unwrap();
        assert!(read_table(&path).is_err());
        assert!(remove_file(&path).unwrap());
        assert!(!path.exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn json_sidecar_is_written() {
        let dir = temp_dir();
        let path = dir.join("nested").join("manifest.json");

        write_json(&path, &serde_json::json!({ "tables": 5 })).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"tables\": 5"));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
