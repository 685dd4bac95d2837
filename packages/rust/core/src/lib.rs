//! Pipeline stages and orchestration for salesetl.
//!
//! Raw CSVs are extracted by `salesetl-extract`, then this crate cleans them
//! into the `01-clean` layer, derives the dimensional model and writes the
//! ranked aggregates of the `02-model` layer.

pub mod build;
pub mod load;
pub mod normalize;
pub mod pipeline;
pub mod transform;

pub use build::{ModelManifest, ModelTables, build};
pub use load::{CleanTables, load};
pub use normalize::{FieldMap, missing_columns, normalize_columns};
pub use pipeline::{ProgressReporter, RunSummary, SilentProgress, Stage, run};
pub use transform::{ModelInputs, transform};
