//! CSV downloads of section data

use axum::{
    body::StreamBody,
    http::header,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use indexmap::IndexSet;
use serde_json::Value;

use crate::error::ChartistError;
use crate::types::{ChartEntry, GroupedDataset};

/// Byte order mark, so that spreadsheet applications detect UTF-8.
const BOM: &[u8] = b"\xEF\xBB\xBF";

/// Column holding the group key of raw data
pub const KEY_COLUMN: &str = "key";

/// Rows of a CSV download, with headers in first-seen order.
#[derive(Debug, Default, PartialEq)]
pub struct CsvTable {
    headers: IndexSet<String>,
    rows: Vec<Vec<(String, Value)>>,
}

impl CsvTable {
    fn push(&mut self, row: Vec<(String, Value)>) {
        for (header, _) in &row {
            if !self.headers.contains(header) {
                self.headers.insert(header.clone());
            }
        }
        self.rows.push(row);
    }

    pub fn headers(&self) -> impl Iterator<Item = &str> {
        self.headers.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Table of raw grouped data, each row led by its group key.
    ///
    /// The group key column is named [KEY_COLUMN], prefixed with underscores while that name is
    /// taken by a field of the data.
    pub fn from_grouped(grouped: &GroupedDataset) -> Self {
        let mut key_column = KEY_COLUMN.to_string();
        while grouped
            .iter()
            .any(|(_, rows)| rows.iter().any(|row| row.contains_key(&key_column)))
        {
            key_column.insert(0, '_');
        }
        let mut table = Self::default();
        table.headers.insert(key_column.clone());
        for (key, rows) in grouped.iter() {
            for row in rows.iter().filter(|row| !row.is_empty()) {
                let mut cells = Vec::with_capacity(row.len() + 1);
                cells.push((key_column.clone(), Value::String(key.clone())));
                cells.extend(row.iter().map(|(field, value)| (field.clone(), value.clone())));
                table.push(cells);
            }
        }
        table
    }

    /// Table of chart data. The truncation marker is left out.
    pub fn from_chart(entries: &[ChartEntry]) -> Self {
        let mut table = Self::default();
        for row in entries.iter().filter_map(ChartEntry::as_row) {
            let mut cells = Vec::with_capacity(row.values.len() + 1);
            cells.push(("name".to_string(), Value::String(row.name.clone())));
            cells.extend(
                row.values
                    .iter()
                    .map(|(key, value)| (key.clone(), Value::from(*value))),
            );
            table.push(cells);
        }
        table
    }

    /// Render the table as CSV, one chunk per line.
    ///
    /// The first chunk is the byte order mark.
    pub fn to_chunks(&self) -> Result<Vec<Bytes>, ChartistError> {
        let mut chunks = Vec::with_capacity(self.rows.len() + 2);
        chunks.push(Bytes::from_static(BOM));
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(self.headers())?;
        chunks.push(take_chunk(&mut writer)?);
        for row in &self.rows {
            let record = self.headers.iter().map(|header| {
                row.iter()
                    .find(|(field, _)| field == header)
                    .map(|(_, value)| format_cell(value))
                    .unwrap_or_default()
            });
            writer.write_record(record)?;
            chunks.push(take_chunk(&mut writer)?);
        }
        Ok(chunks)
    }
}

fn take_chunk(writer: &mut csv::Writer<Vec<u8>>) -> Result<Bytes, ChartistError> {
    writer.flush().map_err(csv::Error::from)?;
    Ok(Bytes::from(std::mem::take(writer.get_mut())))
}

/// Render one cell. Numbers are written with thousands separators.
fn format_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Number(number) => number
            .as_f64()
            .map(format_number)
            .unwrap_or_else(|| number.to_string()),
        other => other.to_string(),
    }
}

/// Format a number with thousands separators: integers without decimals, anything else with
/// two.
pub fn format_number(value: f64) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    let text = if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        format!("{value:.2}")
    };
    let (sign, digits) = match text.strip_prefix('-') {
        Some(digits) => ("-", digits),
        None => ("", text.as_str()),
    };
    let (integer, fraction) = match digits.split_once('.') {
        Some((integer, fraction)) => (integer, Some(fraction)),
        None => (digits, None),
    };
    let mut formatted = String::with_capacity(text.len() + integer.len() / 3);
    formatted.push_str(sign);
    for (i, digit) in integer.chars().enumerate() {
        if i > 0 && (integer.len() - i) % 3 == 0 {
            formatted.push(',');
        }
        formatted.push(digit);
    }
    if let Some(fraction) = fraction {
        formatted.push('.');
        formatted.push_str(fraction);
    }
    formatted
}

/// Respond with a CSV attachment streamed chunk by chunk.
pub fn attachment(filename: &str, chunks: Vec<Bytes>) -> Response {
    let stream = tokio_stream::iter(chunks.into_iter().map(Ok::<_, std::io::Error>));
    (
        [
            (header::CONTENT_TYPE, mime::TEXT_CSV_UTF_8.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        StreamBody::new(stream),
    )
        .into_response()
}
