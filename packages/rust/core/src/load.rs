//! Clean layer: normalize, validate, coerce, persist, then run the DQ gate.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use salesetl_extract::RawTables;
use salesetl_quality::{CoercionStats, DqRun, coercion_issues, run_checks, write_dq_log};
use salesetl_shared::{DataLayout, PipelineError, QualityConfig, Result, Table, Value};
use tracing::{info, instrument, warn};

use crate::normalize::{
    CUSTOMER_FIELDS, ORDER_DETAIL_FIELDS, ORDER_FIELDS, PRODUCT_FIELDS, missing_columns,
    normalize_columns,
};

pub const CUSTOMERS_REQUIRED: [&str; 3] = ["CustomerID", "CompanyName", "Country"];
pub const ORDERS_REQUIRED: [&str; 3] = ["OrderID", "CustomerID", "OrderDate"];
pub const ORDER_DETAILS_REQUIRED: [&str; 5] =
    ["OrderID", "ProductID", "UnitPrice", "Quantity", "Discount"];

const DATETIME_FORMATS: [&str; 3] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%m/%d/%Y %H:%M:%S",
];
const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%m/%d/%Y"];

/// Output of the load stage.
#[derive(Debug, Clone)]
pub struct CleanTables {
    pub customers: Table,
    pub orders: Table,
    pub order_details: Table,
    pub products: Option<Table>,
    /// Rule violations plus dropped-row issues, in report order.
    pub issues: Vec<String>,
    pub stats: CoercionStats,
    /// The DQ run appended to the log.
    pub dq: DqRun,
}

/// Clean the raw tables and write them to `01-clean`.
///
/// Fails only on missing required columns or I/O. DQ failures are logged
/// and recorded, never raised.
#[instrument(skip_all, fields(data_dir = %layout.root().display()))]
pub fn load(raw: &RawTables, layout: &DataLayout, quality: &QualityConfig) -> Result<CleanTables> {
    let customers = normalize_columns(&raw.customers, CUSTOMER_FIELDS);
    let mut orders = normalize_columns(&raw.orders, ORDER_FIELDS);
    let mut order_details = normalize_columns(&raw.order_details, ORDER_DETAIL_FIELDS);
    let products = raw
        .products
        .as_ref()
        .map(|p| normalize_columns(p, PRODUCT_FIELDS));

    let missing: Vec<String> = [
        ("customers", &customers, &CUSTOMERS_REQUIRED[..]),
        ("orders", &orders, &ORDERS_REQUIRED[..]),
        ("order_details", &order_details, &ORDER_DETAILS_REQUIRED[..]),
    ]
    .into_iter()
    .flat_map(|(name, table, required)| {
        missing_columns(table, required)
            .into_iter()
            .map(move |col| format!("{name}.{col}"))
    })
    .collect();
    if !missing.is_empty() {
        return Err(PipelineError::SchemaValidation { missing });
    }

    let stats = CoercionStats {
        orders_bad_date: coerce_order_dates(&mut orders)?,
        order_details_missing_numeric: coerce_order_details(&mut order_details)?,
    };
    if stats.orders_bad_date > 0 {
        warn!(dropped = stats.orders_bad_date, "dropped orders with unparseable OrderDate");
    }
    if stats.order_details_missing_numeric > 0 {
        warn!(
            dropped = stats.order_details_missing_numeric,
            "dropped order lines missing Quantity/UnitPrice"
        );
    }

    salesetl_storage::write_table(&layout.clean_table("customers"), &customers)?;
    salesetl_storage::write_table(&layout.clean_table("orders"), &orders)?;
    salesetl_storage::write_table(&layout.clean_table("order_details"), &order_details)?;
    match &products {
        Some(products) => salesetl_storage::write_table(&layout.clean_table("products"), products)?,
        None => {
            salesetl_storage::remove_file(&layout.clean_table("products"))?;
        }
    }

    let mut issues = run_checks(&customers, &orders, &order_details);
    issues.extend(coercion_issues(&stats));
    let dq = DqRun::new(issues.clone());
    write_dq_log(&dq, &layout.dq_dir(), quality.retain_runs)?;
    if dq.passed() {
        info!("DQ passed");
    } else {
        warn!(issues = issues.len(), "DQ failed, continuing");
    }

    info!(
        customers = customers.len(),
        orders = orders.len(),
        order_details = order_details.len(),
        products = products.as_ref().map_or(0, Table::len),
        "clean layer written"
    );

    Ok(CleanTables {
        customers,
        orders,
        order_details,
        products,
        issues,
        stats,
        dq,
    })
}

/// Parse `OrderDate` in place and drop rows that fail. Returns the drop count.
fn coerce_order_dates(orders: &mut Table) -> Result<usize> {
    orders.map_column("OrderDate", |v| Value::from(parse_order_date(v)))?;
    let idx = orders.require_column("OrderDate")?;
    Ok(orders.retain_rows(|row| !row[idx].is_null()))
}

/// Coerce numeric fields, default `Discount`, drop rows without price or quantity.
fn coerce_order_details(order_details: &mut Table) -> Result<usize> {
    for column in ["Quantity", "UnitPrice", "Discount"] {
        order_details.map_column(column, |v| {
            Value::from(v.as_f64().filter(|f| f.is_finite()))
        })?;
    }
    order_details.map_column("Discount", |v| {
        if v.is_null() {
            Value::Float(0.0)
        } else {
            v.clone()
        }
    })?;

    let qty = order_details.require_column("Quantity")?;
    let price = order_details.require_column("UnitPrice")?;
    Ok(order_details.retain_rows(|row| !row[qty].is_null() && !row[price].is_null()))
}

/// Interpret an `OrderDate` cell. Offsets are converted to UTC.
pub fn parse_order_date(value: &Value) -> Option<NaiveDateTime> {
    let text = match value {
        Value::Timestamp(ts) => return Some(*ts),
        Value::Date(d) => return d.and_hms_opt(0, 0, 0),
        Value::Str(s) => s.trim(),
        _ => return None,
    };

    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .or_else(|| {
            DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|dt| dt.naive_utc())
        })
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}
