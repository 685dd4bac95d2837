//! salesetl CLI: batch ETL of the Northwind sales CSVs into layered parquet.
//!
//! Extracts the raw exports, cleans and quality-checks them, and builds the
//! dimensional model and ranked sales aggregates under the data directory.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
