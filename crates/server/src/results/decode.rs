// crates/server/src/results/decode.rs
//! Tabular decoders: first row is the header, each later row maps
//! header -> cell.

use std::io::Read;
use std::path::Path;

use calamine::{open_workbook, Data, Reader, Xlsx, XlsxError};
use serde_json::{Number, Value};
use thiserror::Error;

use super::record::TweetRecord;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("malformed XLSX: {0}")]
    Xlsx(#[from] XlsxError),
}

/// Decode delimited text. Cells are kept as strings. Blank lines are
/// skipped but rows of empty cells are kept; short rows only yield the cells
/// they have.
pub fn decode_csv<R: Read>(reader: R) -> Result<Vec<TweetRecord>, DecodeError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);
    let headers: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();

    let mut records = Vec::new();
    for row in rdr.records() {
        let row = row?;
        records.push(TweetRecord::from_cells(row.iter().enumerate().map(
            |(index, cell)| (column_key(&headers, index), Value::String(cell.to_string())),
        )));
    }
    Ok(records)
}

/// Decode the first worksheet of an XLSX workbook. Cells keep their native
/// type; empty cells and blank rows are skipped.
pub fn decode_xlsx(path: &Path) -> Result<Vec<TweetRecord>, DecodeError> {
    let mut workbook: Xlsx<_> = open_workbook(path)?;
    let Some(range) = workbook.worksheet_range_at(0) else {
        return Ok(Vec::new());
    };
    let range = range?;

    let mut rows = range.rows();
    let Some(header_row) = rows.next() else {
        return Ok(Vec::new());
    };
    let headers: Vec<String> = header_row.iter().map(|c| c.to_string()).collect();

    let records = rows
        .map(|row| {
            TweetRecord::from_cells(row.iter().enumerate().filter_map(|(index, cell)| {
                cell_value(cell).map(|v| (column_key(&headers, index), v))
            }))
        })
        .filter(|record| !record.is_empty())
        .collect();
    Ok(records)
}

/// Header name for a cell, or `column_<n>` (1-based) when the header is
/// blank or the row is wider than the header.
fn column_key(headers: &[String], index: usize) -> String {
    match headers.get(index) {
        Some(name) if !name.is_empty() => name.clone(),
        _ => format!("column_{}", index + 1),
    }
}

fn cell_value(cell: &Data) -> Option<Value> {
    let value = match cell {
        Data::Empty => return None,
        Data::Int(i) => Value::Number((*i).into()),
        Data::Float(f) => float_value(*f),
        Data::Bool(b) => Value::Bool(*b),
        Data::String(s) => Value::String(s.clone()),
        // Date cells are exported as their serial number, matching what a
        // spreadsheet shows before formatting.
        Data::DateTime(dt) => float_value(dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Value::String(s.clone()),
        Data::Error(e) => Value::String(e.to_string()),
    };
    Some(value)
}

fn float_value(f: f64) -> Value {
    Number::from_f64(f).map_or_else(|| Value::String(f.to_string()), Value::Number)
}
