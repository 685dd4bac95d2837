//! Rule battery.
//!
//! Rules run in a fixed order and each violated rule contributes exactly one
//! issue string. Only the orders schema check short-circuits.

use std::collections::HashSet;

use salesetl_shared::{Table, Value};
use serde::Serialize;

const ORDERS_REQUIRED: [&str; 3] = ["OrderID", "CustomerID", "OrderDate"];

/// Rows the loader dropped while coercing required fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CoercionStats {
    /// Orders removed because `OrderDate` could not be parsed.
    pub orders_bad_date: usize,
    /// Order lines removed because `Quantity` or `UnitPrice` was missing.
    pub order_details_missing_numeric: usize,
}

/// Evaluate every rule against the cleaned tables. Empty means PASS.
pub fn run_checks(customers: &Table, orders: &Table, order_details: &Table) -> Vec<String> {
    let mut issues = Vec::new();

    let mut missing: Vec<&str> = ORDERS_REQUIRED
        .iter()
        .copied()
        .filter(|c| !orders.has_column(c))
        .collect();
    if !missing.is_empty() {
        missing.sort_unstable();
        let listed: Vec<String> = missing.iter().map(|c| format!("'{c}'")).collect();
        issues.push(format!("orders: missing columns [{}]", listed.join(", ")));
        return issues;
    }

    if let Some(mut ids) = orders.column("OrderID") {
        if ids.any(Value::is_null) {
            issues.push("orders: OrderID has nulls".to_string());
        }
    }
    if let Some(mut ids) = orders.column("OrderID") {
        let non_positive = ids.any(|v| !v.is_null() && v.as_f64().is_none_or(|id| id <= 0.0));
        if non_positive {
            issues.push("orders: OrderID must be > 0".to_string());
        }
    }

    match numeric_column(order_details, "Quantity") {
        Some(values) if values.iter().any(|q| *q <= 0.0) => {
            issues.push("order_details: Quantity must be > 0".to_string());
        }
        Some(_) => {}
        None => issues.push("order_details: Quantity column missing".to_string()),
    }

    match numeric_column(order_details, "UnitPrice") {
        Some(values) if values.iter().any(|p| *p < 0.0) => {
            issues.push("order_details: UnitPrice must be >= 0".to_string());
        }
        Some(_) => {}
        None => issues.push("order_details: UnitPrice column missing".to_string()),
    }

    match numeric_column(order_details, "Discount") {
        Some(values) => {
            let bad = values.iter().filter(|d| !(0.0..=1.0).contains(*d)).count();
            if bad > 0 {
                issues.push(format!("order_details: Discount must be 0..1 (bad={bad})"));
            }
        }
        None => issues.push("order_details: Discount column missing".to_string()),
    }

    if let (Some(known), Some(refs)) = (customers.column("CustomerID"), orders.column("CustomerID")) {
        let known: HashSet<String> = known.filter_map(Value::key).collect();
        let orphans = refs
            .filter(|v| v.key().is_none_or(|k| !known.contains(&k)))
            .count();
        if orphans > 0 {
            issues.push(format!("orders: missing customer FK ({orphans})"));
        }
    }

    issues
}

/// Turn the loader's dropped-row counts into DQ issues.
pub fn coercion_issues(stats: &CoercionStats) -> Vec<String> {
    let mut issues = Vec::new();
    if stats.orders_bad_date > 0 {
        issues.push(format!(
            "orders: dropped {} rows with unparseable OrderDate",
            stats.orders_bad_date
        ));
    }
    if stats.order_details_missing_numeric > 0 {
        issues.push(format!(
            "order_details: dropped {} rows missing Quantity/UnitPrice",
            stats.order_details_missing_numeric
        ));
    }
    issues
}

/// Numeric values of a column; non-numeric and null cells are skipped.
fn numeric_column(table: &Table, name: &str) -> Option<Vec<f64>> {
    table
        .column(name)
        .map(|cells| cells.filter_map(Value::as_f64).collect())
}
