//! Ingestion collaborators — delimited-file reading, schema inference,
//! and synthetic row generation.
//!
//! The engine consumes `(headers, rows)`; this module supplies them from
//! a CSV file and infers a typed schema: a column is `Int` when every
//! value parses as one, else `Float`, else `Geo2d` (`"lat,lon"`), else
//! `Text`.  Field widths are the maximum observed encoded length plus a
//! margin.

use rand::Rng;
use rand::rngs::StdRng;

use crate::engine::EngineError;
use crate::index::FieldType;

/// Margin added to the maximum observed field length.
const WIDTH_MARGIN: u32 = 4;

/// Floor for any field width.
const WIDTH_MIN: u32 = 8;

/// Headers plus materialized rows of a source file.
pub struct RowSet {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Read a delimited file with a header row.
pub fn read_delimited(path: &str) -> Result<RowSet, EngineError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_path(path)
        .map_err(|e| EngineError::Build(format!("cannot open {path:?}: {e}")))?;

    let headers = reader
        .headers()
        .map_err(|e| EngineError::Build(format!("bad header row in {path:?}: {e}")))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect::<Vec<String>>();
    if headers.is_empty() {
        return Err(EngineError::Build(format!("{path:?} has no header row")));
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record =
            record.map_err(|e| EngineError::Build(format!("bad row in {path:?}: {e}")))?;
        rows.push(record.iter().map(|v| v.to_string()).collect());
    }
    Ok(RowSet { headers, rows })
}

/// Infer `(types, widths)` from observed values.
pub fn infer_schema(headers: &[String], rows: &[Vec<String>]) -> (Vec<FieldType>, Vec<u32>) {
    let columns = headers.len();
    let mut types = Vec::with_capacity(columns);
    let mut widths = Vec::with_capacity(columns);

    for col in 0..columns {
        let values = rows.iter().filter_map(|r| r.get(col));

        let mut all_int = true;
        let mut all_float = true;
        let mut all_geo = true;
        let mut any = false;
        let mut max_len = headers[col].len();

        for value in values {
            any = true;
            let trimmed = value.trim();
            max_len = max_len.max(value.len());
            if trimmed.parse::<i64>().is_err() {
                all_int = false;
            }
            if trimmed.parse::<f64>().is_err() {
                all_float = false;
            }
            if !parses_as_geo(trimmed) {
                all_geo = false;
            }
        }

        let ty = if !any {
            FieldType::Text
        } else if all_int {
            FieldType::Int
        } else if all_float {
            FieldType::Float
        } else if all_geo {
            FieldType::Geo2d
        } else {
            FieldType::Text
        };
        types.push(ty);
        widths.push((max_len as u32 + WIDTH_MARGIN).max(WIDTH_MIN));
    }

    (types, widths)
}

fn parses_as_geo(value: &str) -> bool {
    match value.split_once(',') {
        Some((a, b)) => a.trim().parse::<f64>().is_ok() && b.trim().parse::<f64>().is_ok(),
        None => false,
    }
}

/// Synthesize `n` rows matching the schema, for
/// `INSERT INTO t GENERATE_DATA(n)`.
pub fn generate_rows(
    types: &[FieldType],
    widths: &[u32],
    n: u64,
    rng: &mut StdRng,
) -> Vec<Vec<String>> {
    let mut rows = Vec::with_capacity(n as usize);
    for _ in 0..n {
        let mut row = Vec::with_capacity(types.len());
        for (ty, width) in types.iter().zip(widths) {
            row.push(generate_value(*ty, *width, rng));
        }
        rows.push(row);
    }
    rows
}

fn generate_value(ty: FieldType, width: u32, rng: &mut StdRng) -> String {
    let value = raw_value(ty, width, rng);
    if value.len() <= width as usize {
        return value;
    }
    // Narrow slots (short observed values) get the smallest valid form.
    match ty {
        FieldType::Int => "0".to_string(),
        FieldType::Float => "0.0".to_string(),
        FieldType::Geo2d => "0,0".to_string(),
        FieldType::Text => value.chars().take(width as usize).collect(),
    }
}

fn raw_value(ty: FieldType, width: u32, rng: &mut StdRng) -> String {
    match ty {
        FieldType::Int => {
            // Keep the rendering comfortably inside the slot.
            let digits = (width.saturating_sub(WIDTH_MARGIN)).clamp(1, 9);
            let ceiling = 10i64.pow(digits);
            rng.random_range(0..ceiling).to_string()
        }
        FieldType::Float => format!("{:.2}", rng.random_range(0.0..10_000.0f64)),
        FieldType::Geo2d => {
            let lat = rng.random_range(-90.0..90.0f64);
            let lon = rng.random_range(-180.0..180.0f64);
            format!("{lat:.4},{lon:.4}")
        }
        FieldType::Text => {
            let len = (width.saturating_sub(WIDTH_MARGIN)).clamp(1, 12) as usize;
            (0..len)
                .map(|_| char::from(b'a' + rng.random_range(0..26u8)))
                .collect()
        }
    }
}
