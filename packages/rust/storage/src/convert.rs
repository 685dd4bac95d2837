//! Conversion between [`Table`] and Arrow record batches.
//!
//! Each column gets one Arrow type chosen from its non-null cells:
//! Int → Int64, Int/Float → Float64, Timestamp → Timestamp(µs),
//! Date → Date32, anything else (including mixed kinds) → Utf8.

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, AsArray, Date32Array, Float64Array, Int64Array, StringArray,
    TimestampMicrosecondArray,
};
use arrow::compute::cast;
use arrow::datatypes::{
    DataType, Date32Type, Field, Float64Type, Int64Type, Schema, SchemaRef, TimeUnit,
    TimestampMicrosecondType,
};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};

use salesetl_shared::{PipelineError, Result, Table, Value};

/// Days between 0001-01-01 (CE day 1) and 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Int,
    Float,
    Str,
    Timestamp,
    Date,
}

fn cell_kind(value: &Value) -> Option<Kind> {
    match value {
        v if v.is_null() => None,
        Value::Int(_) => Some(Kind::Int),
        Value::Float(_) => Some(Kind::Float),
        Value::Timestamp(_) => Some(Kind::Timestamp),
        Value::Date(_) => Some(Kind::Date),
        _ => Some(Kind::Str),
    }
}

fn merge(a: Kind, b: Kind) -> Kind {
    match (a, b) {
        (x, y) if x == y => x,
        (Kind::Int, Kind::Float) | (Kind::Float, Kind::Int) => Kind::Float,
        _ => Kind::Str,
    }
}

fn column_kind(table: &Table, idx: usize) -> Kind {
    table
        .rows()
        .iter()
        .filter_map(|row| cell_kind(&row[idx]))
        .reduce(merge)
        .unwrap_or(Kind::Str)
}

fn data_type(kind: Kind) -> DataType {
    match kind {
        Kind::Int => DataType::Int64,
        Kind::Float => DataType::Float64,
        Kind::Str => DataType::Utf8,
        Kind::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, None),
        Kind::Date => DataType::Date32,
    }
}

fn build_array(table: &Table, idx: usize, kind: Kind) -> ArrayRef {
    let cells = table.rows().iter().map(|row| &row[idx]);
    match kind {
        Kind::Int => Arc::new(
            cells
                .map(|v| match v {
                    Value::Int(i) => Some(*i),
                    _ => None,
                })
                .collect::<Int64Array>(),
        ),
        Kind::Float => Arc::new(cells.map(Value::as_f64).collect::<Float64Array>()),
        Kind::Timestamp => Arc::new(
            cells
                .map(|v| match v {
                    Value::Timestamp(ts) => Some(ts.and_utc().timestamp_micros()),
                    _ => None,
                })
                .collect::<TimestampMicrosecondArray>(),
        ),
        Kind::Date => Arc::new(
            cells
                .map(|v| match v {
                    Value::Date(d) => Some(d.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE),
                    _ => None,
                })
                .collect::<Date32Array>(),
        ),
        Kind::Str => Arc::new(
            cells
                .map(|v| if v.is_null() { None } else { Some(v.to_string()) })
                .collect::<StringArray>(),
        ),
    }
}

/// Convert a table into a single record batch with an inferred schema.
pub fn to_record_batch(table: &Table) -> Result<RecordBatch> {
    let mut fields = Vec::with_capacity(table.columns().len());
    let mut arrays = Vec::with_capacity(table.columns().len());

    for (idx, name) in table.columns().iter().enumerate() {
        let kind = column_kind(table, idx);
        fields.push(Field::new(name, data_type(kind), true));
        arrays.push(build_array(table, idx, kind));
    }

    let schema: SchemaRef = Arc::new(Schema::new(fields));
    let options = RecordBatchOptions::new().with_row_count(Some(table.len()));
    RecordBatch::try_new_with_options(schema, arrays, &options)
        .map_err(|e| PipelineError::Storage(format!("failed to build record batch: {e}")))
}

/// Append the rows of `batch` to `table`. Column order must match.
pub fn append_record_batch(table: &mut Table, batch: &RecordBatch) -> Result<()> {
    let schema = batch.schema();
    let columns = batch
        .columns()
        .iter()
        .zip(schema.fields())
        .map(|(array, field)| column_values(array, field.name()))
        .collect::<Result<Vec<_>>>()?;

    for row in 0..batch.num_rows() {
        let cells = columns.iter().map(|col| col[row].clone()).collect();
        table.push_row(cells)?;
    }
    Ok(())
}

fn cast_to(array: &ArrayRef, to: &DataType) -> Result<ArrayRef> {
    cast(array, to).map_err(|e| PipelineError::Storage(format!("cannot cast column to {to}: {e}")))
}

fn column_values(array: &ArrayRef, name: &str) -> Result<Vec<Value>> {
    let len = array.len();
    let values = match array.data_type() {
        DataType::Null => vec![Value::Null; len],
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => {
            let converted = cast_to(array, &DataType::Int64)?;
            let arr = converted.as_primitive::<Int64Type>();
            (0..len)
                .map(|i| if arr.is_null(i) { Value::Null } else { Value::Int(arr.value(i)) })
                .collect()
        }
        DataType::Float16 | DataType::Float32 | DataType::Float64 => {
            let converted = cast_to(array, &DataType::Float64)?;
            let arr = converted.as_primitive::<Float64Type>();
            (0..len)
                .map(|i| if arr.is_null(i) { Value::Null } else { Value::Float(arr.value(i)) })
                .collect()
        }
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View | DataType::Boolean => {
            let converted = cast_to(array, &DataType::Utf8)?;
            let arr = converted.as_string::<i32>();
            (0..len)
                .map(|i| {
                    if arr.is_null(i) {
                        Value::Null
                    } else {
                        Value::Str(arr.value(i).to_string())
                    }
                })
                .collect()
        }
        DataType::Timestamp(_, _) => {
            let converted = cast_to(array, &DataType::Timestamp(TimeUnit::Microsecond, None))?;
            let arr = converted.as_primitive::<TimestampMicrosecondType>();
            (0..len)
                .map(|i| {
                    if arr.is_null(i) {
                        Value::Null
                    } else {
                        micros_to_datetime(arr.value(i)).into()
                    }
                })
                .collect()
        }
        DataType::Date32 | DataType::Date64 => {
            let converted = cast_to(array, &DataType::Date32)?;
            let arr = converted.as_primitive::<Date32Type>();
            (0..len)
                .map(|i| {
                    if arr.is_null(i) {
                        Value::Null
                    } else {
                        NaiveDate::from_num_days_from_ce_opt(arr.value(i) + UNIX_EPOCH_DAYS_FROM_CE)
                            .into()
                    }
                })
                .collect()
        }
        other => {
            return Err(PipelineError::Storage(format!(
                "column '{name}' has unsupported type {other}"
            )));
        }
    };
    Ok(values)
}

fn micros_to_datetime(micros: i64) -> Option<NaiveDateTime> {
    let secs = micros.div_euclid(1_000_000);
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    DateTime::from_timestamp(secs, nanos).map(|dt| dt.naive_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_arrow_types_per_column() {
        let table = Table::from_rows(
            ["id", "price", "mixed", "empty"],
            vec![
                vec![Value::Int(1), Value::Int(10), Value::Int(1), Value::Null],
                vec![Value::Int(2), Value::Float(2.5), "x".into(), Value::Null],
            ],
        )
        .unwrap();

        let batch = to_record_batch(&table).unwrap();
        let schema = batch.schema();
        assert_eq!(schema.field(0).data_type(), &DataType::Int64);
        assert_eq!(schema.field(1).data_type(), &DataType::Float64);
        assert_eq!(schema.field(2).data_type(), &DataType::Utf8);
        assert_eq!(schema.field(3).data_type(), &DataType::Utf8);
        assert_eq!(batch.num_rows(), 2);
    }

    #[test]
    fn mixed_column_is_written_as_text() {
        let table =
            Table::from_rows(["v"], vec![vec![Value::Int(7)], vec!["seven".into()]]).unwrap();
        let batch = to_record_batch(&table).unwrap();

        let mut back = Table::new(["v"]);
        append_record_batch(&mut back, &batch).unwrap();
        assert_eq!(back.rows()[0][0], Value::Str("7".into()));
        assert_eq!(back.rows()[1][0], Value::Str("seven".into()));
    }

    #[test]
    fn temporal_values_survive_conversion() {
        let ts = NaiveDate::from_ymd_opt(1996, 7, 4)
            .unwrap()
            .and_hms_micro_opt(13, 5, 9, 250)
            .unwrap();
        let day = NaiveDate::from_ymd_opt(1969, 12, 31).unwrap();
        let table = Table::from_rows(
            ["OrderDate", "order_date"],
            vec![vec![ts.into(), day.into()], vec![Value::Null, Value::Null]],
        )
        .unwrap();

        let batch = to_record_batch(&table).unwrap();
        let mut back = Table::new(["OrderDate", "order_date"]);
        append_record_batch(&mut back, &batch).unwrap();

        assert_eq!(back.rows()[0][0], Value::Timestamp(ts));
        assert_eq!(back.rows()[0][1], Value::Date(day));
        assert_eq!(back.rows()[1][0], Value::Null);
    }

    #[test]
    fn zero_row_table_keeps_schema() {
        let table = Table::new(["run_ts", "detail"]);
        let batch = to_record_batch(&table).unwrap();
        assert_eq!(batch.num_rows(), 0);
        assert_eq!(batch.schema().fields().len(), 2);
    }
}
