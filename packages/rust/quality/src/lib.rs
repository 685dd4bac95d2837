//! Data-quality gate for the clean layer.
//!
//! [`run_checks`] is a pure rule battery over the cleaned customers, orders
//! and order details. [`write_dq_log`] appends the outcome to the DQ log
//! under `01-clean/_dq`, keeping a bounded history. A failing run is
//! observational only: nothing in this crate aborts the pipeline.

mod log;
mod rules;

pub use log::{DQ_ISSUES_FILE, DQ_RUNS_FILE, DqRun, DqStatus, read_dq_runs, write_dq_log};
pub use rules::{CoercionStats, coercion_issues, run_checks};
