//! DQ run log.
//!
//! Two parquet files under the DQ directory: `dq_runs.parquet` with one row
//! per run and `dq_issues.parquet` with one row per issue. Each write reads
//! the existing log, appends the new run, trims to the newest `retain_runs`
//! runs and writes both files back atomically.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::Utc;
use salesetl_shared::{PipelineError, Result, Table, Value};
use serde::Serialize;
use tracing::{info, instrument, warn};

pub const DQ_RUNS_FILE: &str = "dq_runs.parquet";
pub const DQ_ISSUES_FILE: &str = "dq_issues.parquet";

const RUN_COLUMNS: [&str; 3] = ["run_ts", "status", "issues_count"];
const ISSUE_COLUMNS: [&str; 2] = ["run_ts", "detail"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DqStatus {
    Pass,
    Fail,
}

impl fmt::Display for DqStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => f.write_str("PASS"),
            Self::Fail => f.write_str("FAIL"),
        }
    }
}

impl FromStr for DqStatus {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PASS" => Ok(Self::Pass),
            "FAIL" => Ok(Self::Fail),
            other => Err(PipelineError::parse(format!("unknown DQ status '{other}'"))),
        }
    }
}

/// One evaluation of the quality gate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DqRun {
    /// RFC 3339 UTC timestamp with microseconds, e.g. `2024-05-01T12:00:00.123456Z`.
    pub run_ts: String,
    pub status: DqStatus,
    pub issues: Vec<String>,
}

impl DqRun {
    /// Stamp a new run with the current time.
    pub fn new(issues: Vec<String>) -> Self {
        let run_ts = Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string();
        Self::at(run_ts, issues)
    }

    /// A run with an explicit timestamp.
    pub fn at(run_ts: impl Into<String>, issues: Vec<String>) -> Self {
        let status = if issues.is_empty() {
            DqStatus::Pass
        } else {
            DqStatus::Fail
        };
        Self {
            run_ts: run_ts.into(),
            status,
            issues,
        }
    }

    pub fn passed(&self) -> bool {
        self.status == DqStatus::Pass
    }
}

/// Append `run` to the log in `dq_dir`, keeping the newest `retain_runs` runs.
#[instrument(skip_all, fields(run_ts = %run.run_ts, status = %run.status))]
pub fn write_dq_log(run: &DqRun, dq_dir: &Path, retain_runs: usize) -> Result<()> {
    let runs_path = dq_dir.join(DQ_RUNS_FILE);
    let issues_path = dq_dir.join(DQ_ISSUES_FILE);

    let mut runs = Table::new(RUN_COLUMNS);
    let mut issues = Table::new(ISSUE_COLUMNS);
    match read_existing(dq_dir) {
        Ok(Some((old_runs, old_issues))) => {
            runs = old_runs;
            issues = old_issues;
        }
        Ok(None) => {}
        Err(e) => warn!(error = %e, "existing DQ log unreadable, starting a new one"),
    }

    runs.push_row(vec![
        run.run_ts.as_str().into(),
        run.status.to_string().into(),
        Value::Int(run.issues.len() as i64),
    ])?;
    for detail in &run.issues {
        issues.push_row(vec![run.run_ts.as_str().into(), detail.as_str().into()])?;
    }

    let excess = runs.len().saturating_sub(retain_runs.max(1));
    if excess > 0 {
        let mut position = 0;
        runs.retain_rows(|_| {
            position += 1;
            position > excess
        });
        let kept: Vec<String> = runs
            .column("run_ts")
            .into_iter()
            .flatten()
            .filter_map(Value::key)
            .collect();
        issues.retain_rows(|row| row[0].key().is_some_and(|ts| kept.contains(&ts)));
    }

    salesetl_storage::write_table(&runs_path, &runs)?;
    salesetl_storage::write_table(&issues_path, &issues)?;

    info!(
        issues = run.issues.len(),
        retained = runs.len(),
        "DQ log written"
    );
    Ok(())
}

/// Persisted DQ history, oldest first.
pub fn read_dq_runs(dq_dir: &Path) -> Result<Vec<DqRun>> {
    let Some((runs, issues)) = read_existing(dq_dir)? else {
        return Ok(Vec::new());
    };

    runs.rows()
        .iter()
        .map(|row| {
            let run_ts = row[0].to_string();
            let status = row[1].to_string().parse::<DqStatus>()?;
            let details = issues
                .rows()
                .iter()
                .filter(|issue| issue[0].to_string() == run_ts)
                .map(|issue| issue[1].to_string())
                .collect();
            Ok(DqRun {
                run_ts,
                status,
                issues: details,
            })
        })
        .collect()
}

/// Both log tables, or `None` when no runs have been logged yet.
fn read_existing(dq_dir: &Path) -> Result<Option<(Table, Table)>> {
    let Some(runs) = salesetl_storage::read_table_if_exists(&dq_dir.join(DQ_RUNS_FILE))? else {
        return Ok(None);
    };
    let issues = salesetl_storage::read_table_if_exists(&dq_dir.join(DQ_ISSUES_FILE))?
        .unwrap_or_else(|| Table::new(ISSUE_COLUMNS));

    let runs = runs.select(&RUN_COLUMNS)?;
    let issues = if issues.is_empty() {
        Table::new(ISSUE_COLUMNS)
    } else {
        issues.select(&ISSUE_COLUMNS)?
    };
    Ok(Some((runs, issues)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("salesetl-dq-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn status_follows_issues() {
        assert!(DqRun::new(vec![]).passed());
        let run = DqRun::new(vec!["orders: OrderID has nulls".into()]);
        assert_eq!(run.status, DqStatus::Fail);
        assert!(run.run_ts.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&run.run_ts).is_ok());
    }

    #[test]
    fn runs_accumulate() {
        let dir = temp_dir();
        write_dq_log(&DqRun::at("2024-01-01T00:00:00.000000Z", vec![]), &dir, 10).unwrap();
        write_dq_log(
            &DqRun::at(
                "2024-01-02T00:00:00.000000Z",
                vec!["a".into(), "b".into()],
            ),
            &dir,
            10,
        )
        .unwrap();

        let runs = read_dq_runs(&dir).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].status, DqStatus::Pass);
        assert!(runs[0].issues.is_empty());
        assert_eq!(runs[1].issues, vec!["a", "b"]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn retention_drops_oldest_runs_and_their_issues() {
        let dir = temp_dir();
        for day in 1..=4 {
            let run = DqRun::at(
                format!("2024-01-0{day}T00:00:00.000000Z"),
                vec![format!("issue {day}")],
            );
            write_dq_log(&run, &dir, 2).unwrap();
        }

        let runs = read_dq_runs(&dir).unwrap();
        let stamps: Vec<&str> = runs.iter().map(|r| r.run_ts.as_str()).collect();
        assert_eq!(
            stamps,
            vec!["2024-01-03T00:00:00.000000Z", "2024-01-04T00:00:00.000000Z"]
        );

        let issues = salesetl_storage::read_table(&dir.join(DQ_ISSUES_FILE)).unwrap();
        assert_eq!(issues.len(), 2);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn unreadable_log_is_replaced() {
        let dir = temp_dir();
        std::fs::write(dir.join(DQ_RUNS_FILE), b"not parquet").unwrap();

        write_dq_log(&DqRun::at("2024-01-01T00:00:00.000000Z", vec![]), &dir, 5).unwrap();
        assert_eq!(read_dq_runs(&dir).unwrap().len(), 1);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn empty_dir_has_no_history() {
        let dir = temp_dir();
        assert!(read_dq_runs(&dir).unwrap().is_empty());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
