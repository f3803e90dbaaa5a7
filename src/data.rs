//! Raw customer records, their Polars frame and CSV I/O

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::path::Path;

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Error;

/// A single scalar field value of a raw record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Number(f64),
    Bool(bool),
    Text(String),
    Missing,
}

impl Value {
    pub fn is_missing(&self) -> bool {
        match self {
            Value::Missing => true,
            Value::Number(n) => n.is_nan(),
            _ => false,
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(value as f64)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Value::Number(n) => write!(f, "{}", n),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Text(s) => f.write_str(s),
            Value::Missing => f.write_str(""),
        }
    }
}

/// One customer: field name to scalar value
pub type Record = BTreeMap<String, Value>;

/// Build a polars frame from records, one column per field in name order
///
/// Fields absent from a record are null in that row. A field is `Float64` when
/// it holds numbers and `String` when it holds text or booleans; a field that is
/// missing in every record becomes an all-null `Float64` column.
pub fn records_to_frame(records: &[Record]) -> crate::Result<DataFrame> {
    let mut field_names: Vec<&String> = records.iter().flat_map(|r| r.keys()).collect();
    field_names.sort();
    field_names.dedup();

    let mut columns = Vec::with_capacity(field_names.len());
    for name in field_names {
        let cells: Vec<&Value> = records
            .iter()
            .map(|r| r.get(name).unwrap_or(&Value::Missing))
            .collect();

        let has_number = cells.iter().any(|v| matches!(v, Value::Number(n) if !n.is_nan()));
        let has_text = cells
            .iter()
            .any(|v| matches!(v, Value::Text(_) | Value::Bool(_)));

        let series = match (has_number, has_text) {
            (true, true) => {
                return Err(Error::invalid(format!(
                    "field '{}' mixes numeric and categorical values",
                    name
                )))
            }
            (false, true) => {
                let values: Vec<Option<String>> = cells
                    .iter()
                    .map(|v| match v {
                        Value::Text(s) => Some(s.clone()),
                        Value::Bool(b) => Some(b.to_string()),
                        _ => None,
                    })
                    .collect();
                Series::new(name, values)
            }
            _ => {
                let values: Vec<Option<f64>> = cells
                    .iter()
                    .map(|v| match v {
                        Value::Number(n) if !n.is_nan() => Some(*n),
                        _ => None,
                    })
                    .collect();
                Series::new(name, values)
            }
        };
        columns.push(series);
    }

    Ok(DataFrame::new(columns)?)
}

/// Load customer records from a CSV file with a header row
///
/// Numeric columns become [`Value::Number`], everything else [`Value::Text`];
/// empty cells become [`Value::Missing`].
pub fn load_records_csv(file_path: impl AsRef<Path>) -> crate::Result<Vec<Record>> {
    let path = file_path.as_ref();
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;

    if df.height() == 0 {
        return Err(Error::invalid(format!("no rows found in {}", path.display())));
    }

    let mut records: Vec<Record> = vec![Record::new(); df.height()];
    for series in df.get_columns() {
        let name = series.name().to_string();
        if series.dtype().is_numeric() {
            let values = series.cast(&DataType::Float64)?;
            for (record, value) in records.iter_mut().zip(values.f64()?.into_iter()) {
                record.insert(name.clone(), value.map(Value::Number).unwrap_or(Value::Missing));
            }
        } else {
            let values = series.cast(&DataType::String)?;
            for (record, value) in records.iter_mut().zip(values.str()?.into_iter()) {
                let value = match value {
                    Some(s) if !s.is_empty() => Value::Text(s.to_string()),
                    _ => Value::Missing,
                };
                record.insert(name.clone(), value);
            }
        }
    }

    debug!(rows = records.len(), columns = df.width(), path = %path.display(), "loaded records");
    Ok(records)
}

/// Write records to a CSV file, one column per field
pub fn write_records_csv(records: &[Record], file_path: impl AsRef<Path>) -> crate::Result<()> {
    let mut df = records_to_frame(records)?;
    let mut file = File::create(file_path.as_ref())?;
    CsvWriter::new(&mut file).include_header(true).finish(&mut df)?;
    Ok(())
}
