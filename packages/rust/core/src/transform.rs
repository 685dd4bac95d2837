//! Dimensional model: `dim_customer` and `fact_sales`.

use std::collections::HashMap;

use salesetl_shared::{Result, Table, Value};
use tracing::{info, instrument};

use crate::load::CleanTables;

pub const DIM_CUSTOMER_COLUMNS: [&str; 3] = ["CustomerID", "CompanyName", "Country"];

pub const FACT_SALES_COLUMNS: [&str; 8] = [
    "OrderID",
    "CustomerID",
    "ProductID",
    "order_date",
    "UnitPrice",
    "Quantity",
    "Discount",
    "line_amount",
];

/// Tables handed to the build stage.
#[derive(Debug, Clone)]
pub struct ModelInputs {
    pub dim_customer: Table,
    pub fact_sales: Table,
    pub products: Option<Table>,
}

/// Derive the customer dimension and the sales fact from the clean layer.
#[instrument(skip_all)]
pub fn transform(clean: &CleanTables) -> Result<ModelInputs> {
    let dim_customer = clean
        .customers
        .select(&DIM_CUSTOMER_COLUMNS)?
        .dedup_by_key("CustomerID")?;
    let fact_sales = fact_sales(&clean.orders, &clean.order_details)?;

    info!(
        dim_customer = dim_customer.len(),
        fact_sales = fact_sales.len(),
        "model inputs derived"
    );

    Ok(ModelInputs {
        dim_customer,
        fact_sales,
        products: clean.products.clone(),
    })
}

/// Inner join of order lines with their order headers.
fn fact_sales(orders: &Table, order_details: &Table) -> Result<Table> {
    let order_id = orders.require_column("OrderID")?;
    let customer_id = orders.require_column("CustomerID")?;
    let order_date = orders.require_column("OrderDate")?;

    let mut headers: HashMap<String, Vec<&[Value]>> = HashMap::new();
    for row in orders.rows() {
        if let Some(key) = row[order_id].key() {
            headers.entry(key).or_default().push(row);
        }
    }

    let line_order = order_details.require_column("OrderID")?;
    let product = order_details.require_column("ProductID")?;
    let price = order_details.require_column("UnitPrice")?;
    let quantity = order_details.require_column("Quantity")?;
    let discount = order_details.require_column("Discount")?;

    let mut fact = Table::new(FACT_SALES_COLUMNS);
    for line in order_details.rows() {
        let Some(matches) = line[line_order].key().and_then(|k| headers.get(&k)) else {
            continue;
        };
        let amount = line_amount(&line[price], &line[quantity], &line[discount]);
        for header in matches {
            let day = match &header[order_date] {
                Value::Timestamp(ts) => Value::Date(ts.date()),
                Value::Date(d) => Value::Date(*d),
                _ => Value::Null,
            };
            fact.push_row(vec![
                line[line_order].clone(),
                header[customer_id].clone(),
                line[product].clone(),
                day,
                line[price].clone(),
                line[quantity].clone(),
                line[discount].clone(),
                Value::from(amount),
            ])?;
        }
    }
    Ok(fact)
}

/// `UnitPrice * Quantity * (1 - Discount)`, with a null discount read as 0.
pub fn line_amount(price: &Value, quantity: &Value, discount: &Value) -> Option<f64> {
    let discount = discount.as_f64().unwrap_or(0.0);
    Some(price.as_f64()? * quantity.as_f64()? * (1.0 - discount))
}
