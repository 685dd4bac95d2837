//! Shared types, error model, and configuration for salesetl.
//!
//! This crate is the foundation depended on by all other salesetl crates.
//! It provides:
//! - [`PipelineError`]: the unified error type
//! - Tabular types ([`Table`], [`Value`]) and the on-disk [`DataLayout`]
//! - Configuration ([`AppConfig`], [`RunConfig`], config loading)

pub mod config;
pub mod error;
pub mod layout;
pub mod table;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DEFAULT_BASE_URL, PathsConfig, PipelineSection, QualityConfig, RunConfig,
    SourceConfig, config_dir, config_file_path, init_config, load_config, load_config_from,
    validate_config,
};
pub use error::{PipelineError, Result};
pub use layout::DataLayout;
pub use table::{NULL_TOKENS, Table, Value};
