//! Model layer: joins, ranked aggregates and the model manifest.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use salesetl_shared::{DataLayout, Result, Table, Value};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::transform::ModelInputs;

pub const MANIFEST_FILE: &str = "manifest.json";

/// Everything written to `02-model`.
#[derive(Debug, Clone)]
pub struct ModelTables {
    pub dim_customer: Table,
    pub fact_sales: Table,
    pub sales_by_customer: Table,
    pub sales_by_country: Table,
    pub sales_by_product: Option<Table>,
}

impl ModelTables {
    /// `(file stem, table)` for every table present.
    pub fn named(&self) -> Vec<(&'static str, &Table)> {
        let mut tables = vec![
            ("dim_customer", &self.dim_customer),
            ("fact_sales", &self.fact_sales),
            ("sales_by_customer", &self.sales_by_customer),
            ("sales_by_country", &self.sales_by_country),
        ];
        if let Some(product) = &self.sales_by_product {
            tables.push(("sales_by_product", product));
        }
        tables
    }
}

/// Sidecar describing the last model build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelManifest {
    pub tool_version: String,
    pub built_at: String,
    /// Row count per table stem.
    pub tables: BTreeMap<String, usize>,
}

/// Aggregate the model inputs and write the model layer.
#[instrument(skip_all, fields(data_dir = %layout.root().display()))]
pub fn build(inputs: &ModelInputs, layout: &DataLayout, tool_version: &str) -> Result<ModelTables> {
    let companies = lookup(&inputs.dim_customer, "CustomerID", "CompanyName")?;
    let countries = lookup(&inputs.dim_customer, "CustomerID", "Country")?;

    let fact = &inputs.fact_sales;
    let sales_by_customer = rank_totals(fact, "CustomerID", &companies, "CompanyName")?;
    let sales_by_country = rank_totals(fact, "CustomerID", &countries, "Country")?;

    let product_dim = inputs.products.as_ref().map(dim_product).transpose()?.flatten();
    let sales_by_product = match product_dim {
        Some(dim) => {
            let names = lookup(&dim, "ProductID", "ProductName")?;
            Some(rank_totals(fact, "ProductID", &names, "ProductName")?)
        }
        None => None,
    };

    let tables = ModelTables {
        dim_customer: inputs.dim_customer.clone(),
        fact_sales: inputs.fact_sales.clone(),
        sales_by_customer,
        sales_by_country,
        sales_by_product,
    };

    for (name, table) in tables.named() {
        salesetl_storage::write_table(&layout.model_table(name), table)?;
    }
    if tables.sales_by_product.is_none() {
        salesetl_storage::remove_file(&layout.model_table("sales_by_product"))?;
    }

    let manifest = ModelManifest {
        tool_version: tool_version.to_string(),
        built_at: Utc::now().to_rfc3339(),
        tables: tables
            .named()
            .into_iter()
            .map(|(name, table)| (name.to_string(), table.len()))
            .collect(),
    };
    salesetl_storage::write_json(&layout.model_dir().join(MANIFEST_FILE), &manifest)?;

    info!(
        sales_by_customer = tables.sales_by_customer.len(),
        sales_by_country = tables.sales_by_country.len(),
        sales_by_product = tables.sales_by_product.as_ref().map_or(0, Table::len),
        "model layer written"
    );
    Ok(tables)
}

/// `(ProductID, ProductName[, CategoryID])`, one row per product.
/// `None` when the products table cannot name products.
fn dim_product(products: &Table) -> Result<Option<Table>> {
    if !products.has_column("ProductID") || !products.has_column("ProductName") {
        warn!("products table lacks ProductID/ProductName, skipping sales_by_product");
        return Ok(None);
    }
    let mut columns = vec!["ProductID", "ProductName"];
    if products.has_column("CategoryID") {
        columns.push("CategoryID");
    }
    Ok(Some(products.select(&columns)?.dedup_by_key("ProductID")?))
}

/// Map join key → attribute for a deduplicated dimension.
fn lookup(dim: &Table, key: &str, attribute: &str) -> Result<HashMap<String, Value>> {
    let k = dim.require_column(key)?;
    let a = dim.require_column(attribute)?;
    let mut map = HashMap::new();
    for row in dim.rows() {
        if let Some(id) = row[k].key() {
            map.entry(id).or_insert_with(|| row[a].clone());
        }
    }
    Ok(map)
}

/// Left join `fact` to a dimension attribute, sum `line_amount` per
/// attribute value and rank descending. Facts without a matching or
/// non-null attribute are left out.
fn rank_totals(
    fact: &Table,
    fact_key: &str,
    attributes: &HashMap<String, Value>,
    group_column: &str,
) -> Result<Table> {
    let k = fact.require_column(fact_key)?;
    let amount = fact.require_column("line_amount")?;

    let mut totals: HashMap<String, (Value, f64)> = HashMap::new();
    for row in fact.rows() {
        let Some(group) = row[k].key().and_then(|id| attributes.get(&id)) else {
            continue;
        };
        let Some(label) = group.key() else {
            continue;
        };
        let entry = totals.entry(label).or_insert_with(|| (group.clone(), 0.0));
        entry.1 += row[amount].as_f64().unwrap_or(0.0);
    }

    let mut ranked: Vec<(String, Value, f64)> = totals
        .into_iter()
        .map(|(label, (value, total))| (label, value, total))
        .collect();
    ranked.sort_by(|a, b| {
        b.2.partial_cmp(&a.2)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });

    let mut table = Table::new([group_column, "line_amount", "rank"]);
    for (rank, (_, value, total)) in ranked.into_iter().enumerate() {
        table.push_row(vec![value, Value::Float(total), Value::Int(rank as i64 + 1)])?;
    }
    Ok(table)
}
