//! Raw source extraction.
//!
//! Ensures the Northwind CSV exports exist under the raw layer, fetching
//! only the ones that are missing, then parses them with
//! [`read_csv_robust`]. Files already on disk are never fetched again, so
//! re-running extraction against a populated raw directory is a no-op.

mod reader;

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use salesetl_shared::{PipelineError, Result, SourceConfig, Table};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};
use url::Url;

pub use reader::{
    CANDIDATE_DELIMITERS, ParseOutcome, ParseTier, parse_csv_bytes, read_csv_robust,
    sniff_delimiter,
};

/// Maximum number of redirects to follow per download.
const MAX_REDIRECTS: usize = 5;

/// User-Agent string for download requests.
const USER_AGENT: &str = concat!("salesetl/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// SourceFile
// ---------------------------------------------------------------------------

/// One of the four source CSVs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceFile {
    Customers,
    Orders,
    OrderDetails,
    Products,
}

impl SourceFile {
    pub const ALL: [SourceFile; 4] = [
        SourceFile::Customers,
        SourceFile::Orders,
        SourceFile::OrderDetails,
        SourceFile::Products,
    ];

    /// Canonical file name in the raw layer.
    pub fn local_name(self) -> &'static str {
        match self {
            Self::Customers => "Customers.csv",
            Self::Orders => "Orders.csv",
            Self::OrderDetails => "Order_Details.csv",
            Self::Products => "Products.csv",
        }
    }

    /// File name on the remote mirror.
    pub fn remote_name(self) -> &'static str {
        match self {
            Self::Customers => "customers.csv",
            Self::Orders => "orders.csv",
            Self::OrderDetails => "order-details.csv",
            Self::Products => "products.csv",
        }
    }

    /// Products is the only optional source.
    pub fn is_required(self) -> bool {
        !matches!(self, Self::Products)
    }

    /// Sources taking part in a run.
    pub fn selected(include_products: bool) -> Vec<SourceFile> {
        Self::ALL
            .into_iter()
            .filter(|f| include_products || f.is_required())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// What `ensure_sources` found and did.
#[derive(Debug, Clone, Default)]
pub struct ExtractReport {
    /// Files fetched during this run.
    pub downloaded: Vec<String>,
    /// Selected files present after the run (fetched or pre-existing).
    pub present: Vec<String>,
    /// SHA-256 of every present file, keyed by local name.
    pub checksums: BTreeMap<String, String>,
}

/// Parsed raw tables. `products` is `None` when excluded or unavailable.
#[derive(Debug, Clone)]
pub struct RawTables {
    pub customers: Table,
    pub orders: Table,
    pub order_details: Table,
    pub products: Option<Table>,
}

enum Download {
    Saved(usize),
    Rejected(StatusCode),
}

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

/// Fetches and parses the raw source files.
pub struct Extractor {
    config: SourceConfig,
    client: Client,
}

impl Extractor {
    /// Create an extractor with one HTTP client for the whole run.
    pub fn new(config: SourceConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PipelineError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    /// Make sure every selected source exists in `raw_dir`, fetching the missing ones.
    ///
    /// HTTP error statuses leave the file absent. Transport failures are
    /// fatal for required files and only logged for the optional products
    /// file. Fails with [`PipelineError::MissingRequiredSource`] naming
    /// every required file still absent afterwards.
    #[instrument(skip_all, fields(raw_dir = %raw_dir.display()))]
    pub async fn ensure_sources(
        &self,
        raw_dir: &Path,
        include_products: bool,
    ) -> Result<ExtractReport> {
        std::fs::create_dir_all(raw_dir).map_err(|e| PipelineError::io(raw_dir, e))?;

        let mut report = ExtractReport::default();
        for file in SourceFile::selected(include_products) {
            let dest = raw_dir.join(file.local_name());
            if dest.exists() {
                debug!(file = file.local_name(), "raw file present, skipping download");
                continue;
            }
            if !self.config.auto_download {
                debug!(file = file.local_name(), "raw file absent and downloads disabled");
                continue;
            }

            let url = self.source_url(file)?;
            info!(%url, dest = %dest.display(), "downloading raw file");
            match download(&self.client, &url, &dest).await {
                Ok(Download::Saved(bytes)) => {
                    info!(file = file.local_name(), bytes, "download complete");
                    report.downloaded.push(file.local_name().to_string());
                }
                Ok(Download::Rejected(status)) => {
                    warn!(%url, %status, "download rejected by server");
                }
                Err(e) if !file.is_required() => {
                    warn!(%url, error = %e, "optional source unavailable");
                }
                Err(e) => return Err(e),
            }
        }

        let missing: Vec<String> = SourceFile::selected(include_products)
            .into_iter()
            .filter(|f| f.is_required() && !raw_dir.join(f.local_name()).exists())
            .map(|f| f.local_name().to_string())
            .collect();
        if !missing.is_empty() {
            return Err(PipelineError::MissingRequiredSource { files: missing });
        }

        for file in SourceFile::selected(include_products) {
            let path = raw_dir.join(file.local_name());
            if path.exists() {
                let bytes = std::fs::read(&path).map_err(|e| PipelineError::io(&path, e))?;
                report
                    .checksums
                    .insert(file.local_name().to_string(), compute_hash(&bytes));
                report.present.push(file.local_name().to_string());
            }
        }

        info!(
            downloaded = report.downloaded.len(),
            present = report.present.len(),
            "raw sources ready"
        );
        Ok(report)
    }

    /// Ensure sources, then parse every present selected file.
    #[instrument(skip_all, fields(raw_dir = %raw_dir.display()))]
    pub async fn extract(
        &self,
        raw_dir: &Path,
        include_products: bool,
    ) -> Result<(RawTables, ExtractReport)> {
        let report = self.ensure_sources(raw_dir, include_products).await?;

        let read = |file: SourceFile| -> Result<Table> {
            let (table, _outcome) = read_csv_robust(&raw_dir.join(file.local_name()))?;
            info!(file = file.local_name(), rows = table.len(), "parsed raw file");
            Ok(table)
        };

        let products_path = raw_dir.join(SourceFile::Products.local_name());
        let products = if include_products && products_path.exists() {
            Some(read(SourceFile::Products)?)
        } else {
            None
        };

        let tables = RawTables {
            customers: read(SourceFile::Customers)?,
            orders: read(SourceFile::Orders)?,
            order_details: read(SourceFile::OrderDetails)?,
            products,
        };
        Ok((tables, report))
    }

    fn source_url(&self, file: SourceFile) -> Result<Url> {
        let base = self.config.base_url.trim_end_matches('/');
        let raw = format!("{base}/{}", file.remote_name());
        Url::parse(&raw).map_err(|e| PipelineError::config(format!("invalid source URL '{raw}': {e}")))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Fetch `url` into `dest` atomically.
async fn download(client: &Client, url: &Url, dest: &Path) -> Result<Download> {
    let response = client
        .get(url.as_str())
        .send()
        .await
        .map_err(|e| PipelineError::Network(format!("{url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Ok(Download::Rejected(status));
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| PipelineError::Network(format!("{url}: failed to read body: {e}")))?;

    salesetl_storage::write_bytes(dest, &body)?;
    Ok(Download::Saved(body.len()))
}

/// Compute SHA-256 hex digest of file content.
pub fn compute_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("salesetl-extract-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("../../../fixtures/csv/{name}")).expect("read fixture")
    }

    fn source(server: &wiremock::MockServer) -> SourceConfig {
        SourceConfig {
            base_url: format!("{}/data", server.uri()),
            timeout_secs: 5,
            auto_download: true,
        }
    }

    async fn mount(server: &wiremock::MockServer, remote: &str, body: String, expected: u64) {
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path(format!("/data/{remote}")))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(body))
            .expect(expected)
            .mount(server)
            .await;
    }

    #[test]
    fn source_file_names() {
        assert_eq!(SourceFile::OrderDetails.local_name(), "Order_Details.csv");
        assert_eq!(SourceFile::OrderDetails.remote_name(), "order-details.csv");
        assert!(!SourceFile::Products.is_required());
        assert_eq!(SourceFile::selected(false).len(), 3);
        assert_eq!(SourceFile::selected(true).len(), 4);
    }

    #[test]
    fn test_compute_hash() {
        let hash = compute_hash(b"hello world");
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[tokio::test]
    async fn downloads_missing_files() {
        let server = wiremock::MockServer::start().await;
        mount(&server, "customers.csv", fixture("customers.csv"), 1).await;
        mount(&server, "orders.csv", fixture("orders.csv"), 1).await;
        mount(&server, "order-details.csv", fixture("order_details.csv"), 1).await;
        mount(&server, "products.csv", fixture("products.csv"), 1).await;

        let raw = temp_dir();
        let extractor = Extractor::new(source(&server)).unwrap();
        let (tables, report) = extractor.extract(&raw, true).await.unwrap();

        assert_eq!(report.downloaded.len(), 4);
        assert_eq!(report.checksums.len(), 4);
        assert!(raw.join("Order_Details.csv").exists());
        assert_eq!(tables.customers.len(), 3);
        assert_eq!(tables.order_details.len(), 8);
        assert!(tables.products.is_some());

        let _ = std::fs::remove_dir_all(&raw);
    }

    #[tokio::test]
    async fn rerun_with_populated_dir_downloads_nothing() {
        let server = wiremock::MockServer::start().await;
        for remote in ["customers.csv", "orders.csv", "order-details.csv", "products.csv"] {
            mount(&server, remote, "should,not\nbe,fetched\n".into(), 0).await;
        }

        let raw = temp_dir();
        for (local, fixture_name) in [
            ("Customers.csv", "customers.csv"),
            ("Orders.csv", "orders.csv"),
            ("Order_Details.csv", "order_details.csv"),
            ("Products.csv", "products.csv"),
        ] {
            std::fs::write(raw.join(local), fixture(fixture_name)).unwrap();
        }
        let before = std::fs::read(raw.join("Orders.csv")).unwrap();

        let extractor = Extractor::new(source(&server)).unwrap();
        let first = extractor.ensure_sources(&raw, true).await.unwrap();
        let second = extractor.ensure_sources(&raw, true).await.unwrap();

        assert!(first.downloaded.is_empty());
        assert!(second.downloaded.is_empty());
        assert_eq!(first.checksums, second.checksums);
        assert_eq!(std::fs::read(raw.join("Orders.csv")).unwrap(), before);

        let _ = std::fs::remove_dir_all(&raw);
    }

    #[tokio::test]
    async fn missing_required_files_are_all_named() {
        let server = wiremock::MockServer::start().await;
        mount(&server, "customers.csv", fixture("customers.csv"), 1).await;
        // orders.csv, order-details.csv and products.csv fall through to 404

        let raw = temp_dir();
        let extractor = Extractor::new(source(&server)).unwrap();
        let err = extractor.ensure_sources(&raw, true).await.unwrap_err();

        match err {
            PipelineError::MissingRequiredSource { files } => {
                assert_eq!(files, vec!["Orders.csv", "Order_Details.csv"]);
            }
            other => panic!("expected MissingRequiredSource, got {other}"),
        }
        assert!(!raw.join("Orders.csv").exists());

        let _ = std::fs::remove_dir_all(&raw);
    }

    #[tokio::test]
    async fn optional_products_never_block() {
        let server = wiremock::MockServer::start().await;
        mount(&server, "customers.csv", fixture("customers.csv"), 1).await;
        mount(&server, "orders.csv", fixture("orders.csv"), 1).await;
        mount(&server, "order-details.csv", fixture("order_details.csv"), 1).await;

        let raw = temp_dir();
        let extractor = Extractor::new(source(&server)).unwrap();
        let (tables, report) = extractor.extract(&raw, true).await.unwrap();

        assert_eq!(report.downloaded.len(), 3);
        assert!(tables.products.is_none());

        let _ = std::fs::remove_dir_all(&raw);
    }

    #[tokio::test]
    async fn excluded_products_are_not_fetched() {
        let server = wiremock::MockServer::start().await;
        mount(&server, "customers.csv", fixture("customers.csv"), 1).await;
        mount(&server, "orders.csv", fixture("orders.csv"), 1).await;
        mount(&server, "order-details.csv", fixture("order_details.csv"), 1).await;
        mount(&server, "products.csv", fixture("products.csv"), 0).await;

        let raw = temp_dir();
        let extractor = Extractor::new(source(&server)).unwrap();
        let (tables, _) = extractor.extract(&raw, false).await.unwrap();

        assert!(tables.products.is_none());
        assert!(!raw.join("Products.csv").exists());

        let _ = std::fs::remove_dir_all(&raw);
    }

    #[tokio::test]
    async fn offline_mode_reports_missing_without_requests() {
        let server = wiremock::MockServer::start().await;
        mount(&server, "customers.csv", fixture("customers.csv"), 0).await;

        let raw = temp_dir();
        let mut config = source(&server);
        config.auto_download = false;
        let extractor = Extractor::new(config).unwrap();
        let err = extractor.ensure_sources(&raw, false).await.unwrap_err();

        assert!(matches!(err, PipelineError::MissingRequiredSource { ref files } if files.len() == 3));

        let _ = std::fs::remove_dir_all(&raw);
    }
}
