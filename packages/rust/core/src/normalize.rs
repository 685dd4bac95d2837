//! Case-insensitive column renaming onto canonical names.

use salesetl_shared::Table;

/// `(lowercase source name, canonical name)` pairs for one table.
pub type FieldMap = [(&'static str, &'static str)];

pub const CUSTOMER_FIELDS: &FieldMap = &[
    ("customerid", "CustomerID"),
    ("companyname", "CompanyName"),
    ("country", "Country"),
];

pub const ORDER_FIELDS: &FieldMap = &[
    ("orderid", "OrderID"),
    ("customerid", "CustomerID"),
    ("orderdate", "OrderDate"),
];

pub const ORDER_DETAIL_FIELDS: &FieldMap = &[
    ("orderid", "OrderID"),
    ("productid", "ProductID"),
    ("unitprice", "UnitPrice"),
    ("quantity", "Quantity"),
    ("discount", "Discount"),
];

pub const PRODUCT_FIELDS: &FieldMap = &[
    ("productid", "ProductID"),
    ("productname", "ProductName"),
    ("categoryid", "CategoryID"),
];

/// Rename every column whose lowercased name is a key of `fields`.
///
/// Unmatched columns pass through. When several columns lowercase to the
/// same key only the first is renamed.
pub fn normalize_columns(table: &Table, fields: &FieldMap) -> Table {
    let mut renamed = table.clone();
    for (key, canonical) in fields {
        let hit = renamed
            .columns()
            .iter()
            .position(|c| c.to_lowercase() == *key);
        if let Some(pos) = hit {
            renamed.rename_column_at(pos, *canonical);
        }
    }
    renamed
}

/// Canonical columns from `required` that `table` lacks, in `required` order.
pub fn missing_columns(table: &Table, required: &[&str]) -> Vec<String> {
    required
        .iter()
        .filter(|c| !table.has_column(c))
        .map(|c| (*c).to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use salesetl_shared::Value;

    fn raw(header: &[&str]) -> Table {
        let row = header.iter().map(|_| Value::Int(1)).collect();
        Table::from_rows(header.iter().copied(), vec![row]).unwrap()
    }

    #[test]
    fn any_casing_maps_to_canonical() {
        for header in ["CustomerID", "customerID", "CUSTOMERID", "customerid"] {
            let t = normalize_columns(&raw(&[header, "country"]), CUSTOMER_FIELDS);
            assert_eq!(t.columns(), &["CustomerID", "Country"]);
        }
    }

    #[test]
    fn unmatched_columns_pass_through() {
        let t = normalize_columns(&raw(&["orderID", "shipCountry", "Freight"]), ORDER_FIELDS);
        assert_eq!(t.columns(), &["OrderID", "shipCountry", "Freight"]);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn normalizing_twice_is_stable() {
        let once = normalize_columns(&raw(&["unitPRICE", "QUANTITY", "extra"]), ORDER_DETAIL_FIELDS);
        let twice = normalize_columns(&once, ORDER_DETAIL_FIELDS);
        assert_eq!(once, twice);
    }

    #[test]
    fn only_first_duplicate_is_renamed() {
        let t = normalize_columns(&raw(&["customerid", "CUSTOMERID"]), CUSTOMER_FIELDS);
        assert_eq!(t.columns(), &["CustomerID", "CUSTOMERID"]);
    }

    #[test]
    fn missing_columns_listed_in_order() {
        let t = raw(&["OrderID"]);
        assert_eq!(
            missing_columns(&t, &["OrderID", "CustomerID", "OrderDate"]),
            vec!["CustomerID", "OrderDate"]
        );
    }
}
