//! Stage orchestration: extract → load → transform → build.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use salesetl_extract::Extractor;
use salesetl_quality::DqRun;
use salesetl_shared::{DataLayout, QualityConfig, Result, RunConfig};
use tracing::{info, instrument};

use crate::build::build;
use crate::load::load;
use crate::transform::transform;

/// How far to run the pipeline. Every stage runs its upstream stages first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Extract,
    Load,
    Transform,
    Build,
    All,
}

impl Stage {
    /// Stages executed for this target, in order. `All` is the same as `Build`.
    pub fn plan(self) -> &'static [Stage] {
        const FULL: [Stage; 4] = [Stage::Extract, Stage::Load, Stage::Transform, Stage::Build];
        match self {
            Stage::Extract => &FULL[..1],
            Stage::Load => &FULL[..2],
            Stage::Transform => &FULL[..3],
            Stage::Build | Stage::All => &FULL,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Extract => "extract",
            Stage::Load => "load",
            Stage::Transform => "transform",
            Stage::Build => "build",
            Stage::All => "all",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub stage: Stage,
    /// Raw files present after extraction.
    pub raw_files: Vec<String>,
    /// Raw files fetched during this run.
    pub downloaded: Vec<String>,
    /// Row count per written table, keyed `layer/table`.
    pub tables: BTreeMap<String, usize>,
    /// DQ result, when the load stage ran.
    pub dq: Option<DqRun>,
    pub elapsed: Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called when the pipeline completes.
    fn done(&self, summary: &RunSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn done(&self, _summary: &RunSummary) {}
}

/// Run the pipeline up to and including `stage`.
#[instrument(skip_all, fields(stage = %stage, data_dir = %config.data_dir.display()))]
pub async fn run(
    config: &RunConfig,
    stage: Stage,
    progress: &dyn ProgressReporter,
) -> Result<RunSummary> {
    let start = Instant::now();
    let plan = stage.plan();
    let layout = DataLayout::new(&config.data_dir);

    info!(stages = plan.len(), "starting pipeline");
    progress.phase("Preparing data directories");
    layout.ensure_dirs()?;

    let mut summary = RunSummary {
        stage,
        raw_files: Vec::new(),
        downloaded: Vec::new(),
        tables: BTreeMap::new(),
        dq: None,
        elapsed: Duration::ZERO,
    };

    // --- Extract ---
    progress.phase("Extracting raw sources");
    let extractor = Extractor::new(config.source.clone())?;
    let (raw, report) = extractor
        .extract(&layout.raw_dir(), config.include_products)
        .await?;
    summary.raw_files = report.present;
    summary.downloaded = report.downloaded;

    // --- Load ---
    if plan.contains(&Stage::Load) {
        progress.phase("Cleaning and validating");
        let quality = QualityConfig {
            retain_runs: config.retain_runs,
        };
        let clean = load(&raw, &layout, &quality)?;
        summary.tables.insert("01-clean/customers".into(), clean.customers.len());
        summary.tables.insert("01-clean/orders".into(), clean.orders.len());
        summary
            .tables
            .insert("01-clean/order_details".into(), clean.order_details.len());
        if let Some(products) = &clean.products {
            summary.tables.insert("01-clean/products".into(), products.len());
        }
        summary.dq = Some(clean.dq.clone());

        // --- Transform ---
        if plan.contains(&Stage::Transform) {
            progress.phase("Deriving dimensional model");
            let inputs = transform(&clean)?;

            // --- Build ---
            if plan.contains(&Stage::Build) {
                progress.phase("Building model layer");
                let model = build(&inputs, &layout, &config.tool_version)?;
                for (name, table) in model.named() {
                    summary.tables.insert(format!("02-model/{name}"), table.len());
                }
            }
        }
    }

    summary.elapsed = start.elapsed();
    progress.done(&summary);

    info!(
        tables = summary.tables.len(),
        elapsed_ms = summary.elapsed.as_millis(),
        "pipeline complete"
    );
    Ok(summary)
}
