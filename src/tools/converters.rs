use crate::domain::model::PeakDatum;
use crate::tools::filetypes::{Filetype, Layout};
use crate::tools::signal::linspace;
use crate::utils::error::{ProcessorError, Result};
use serde_json::{Map, Value};

/// CSV produced from a raw instrument file.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertedFile {
    pub filename: String,
    pub content: Vec<u8>,
    pub rows: usize,
}

/// `painting.0.dpt` -> `painting.csv`, `tracer.dat` -> `tracer.csv`.
pub fn csv_filename(filename: &str) -> String {
    let stem = filename
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(filename);
    // OPUS exports carry a numeric block index before the extension
    let stem = match stem.rsplit_once('.') {
        Some((base, index)) if !index.is_empty() && index.chars().all(|c| c.is_ascii_digit()) => {
            base
        }
        _ => stem,
    };
    format!("{}.csv", stem)
}

fn conversion_error(line: usize, message: impl Into<String>) -> ProcessorError {
    ProcessorError::ConversionError {
        message: format!("line {}: {}", line, message.into()),
    }
}

/// Converts a raw instrument file to a headerless, comma separated CSV.
pub fn convert_to_csv(filetype: &Filetype, content: &[u8], filename: &str) -> Result<ConvertedFile> {
    let text = filetype.decode(content);
    let lines: Vec<&str> = text.lines().collect();

    let end = lines.len().saturating_sub(filetype.data_trailer);
    if filetype.data_start >= end {
        return Err(ProcessorError::ConversionError {
            message: format!(
                "'{}' has {} lines, not enough for a {} file",
                filename,
                lines.len(),
                filetype.key
            ),
        });
    }

    let rows = match &filetype.layout {
        Layout::Delimited {
            delimiter,
            radix_point,
        } => delimited_rows(&lines, filetype.data_start, end, delimiter, *radix_point)?,
        Layout::Counts { x_range } => counts_rows(&lines, filetype.data_start, end, *x_range)?,
    };

    if rows.is_empty() {
        return Err(ProcessorError::ConversionError {
            message: format!("'{}' contains no data rows", filename),
        });
    }

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    for row in &rows {
        writer.write_record(row)?;
    }
    let content = writer
        .into_inner()
        .map_err(|e| ProcessorError::ConversionError {
            message: e.to_string(),
        })?;

    tracing::debug!(
        "Converted '{}' as {} ({} rows)",
        filename,
        filetype.key,
        rows.len()
    );

    Ok(ConvertedFile {
        filename: csv_filename(filename),
        content,
        rows: rows.len(),
    })
}

fn delimited_rows(
    lines: &[&str],
    start: usize,
    end: usize,
    delimiter: &regex::Regex,
    radix_point: char,
) -> Result<Vec<Vec<String>>> {
    let mut rows = Vec::new();

    for (offset, line) in lines[start..end].iter().enumerate() {
        let line_number = start + offset + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let fields: Vec<String> = delimiter
            .split(trimmed)
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(|f| f.replace(radix_point, "."))
            .collect();

        if fields.len() < 2 {
            return Err(conversion_error(
                line_number,
                format!("expected at least two columns in '{}'", trimmed),
            ));
        }
        if let Some(bad) = fields.iter().find(|f| f.parse::<f64>().is_err()) {
            return Err(conversion_error(line_number, format!("'{}' is not a number", bad)));
        }

        rows.push(fields);
    }

    Ok(rows)
}

fn counts_rows(
    lines: &[&str],
    start: usize,
    end: usize,
    x_range: (f64, f64),
) -> Result<Vec<Vec<String>>> {
    let mut counts = Vec::new();
    for (offset, line) in lines[start..end].iter().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let value = trimmed
            .parse::<f64>()
            .map_err(|_| conversion_error(start + offset + 1, format!("'{}' is not a count", trimmed)))?;
        counts.push(value);
    }

    let xs = linspace(x_range.0, x_range.1, counts.len());
    Ok(xs
        .into_iter()
        .zip(counts)
        .map(|(x, y)| vec![x.to_string(), y.to_string()])
        .collect())
}

/// Checks that `content` is a headerless numeric CSV and returns its column count.
///
/// With `max_columns`, wider rows are rejected.
pub fn validate_csv(content: &[u8], max_columns: Option<usize>) -> Result<usize> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(content);

    let mut columns = 0;
    for (index, record) in reader.records().enumerate() {
        let record = record?;
        if record.iter().any(|field| field.trim().parse::<f64>().is_err()) {
            let what = if index == 0 { "header or text row" } else { "non-numeric field" };
            return Err(conversion_error(index + 1, format!("{} found", what)));
        }
        if let Some(max) = max_columns {
            if record.len() > max {
                return Err(conversion_error(
                    index + 1,
                    format!("{} columns, at most {} allowed", record.len(), max),
                ));
            }
        }
        columns = columns.max(record.len());
    }

    if columns == 0 {
        return Err(ProcessorError::ConversionError {
            message: "CSV is empty".to_string(),
        });
    }
    Ok(columns)
}

/// Reads the first two columns of a converted CSV.
pub fn read_columns(content: &[u8]) -> Result<(Vec<f64>, Vec<f64>)> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(content);

    let mut xs = Vec::new();
    let mut ys = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record?;
        let parse = |column: usize| -> Result<f64> {
            record
                .get(column)
                .and_then(|field| field.trim().parse::<f64>().ok())
                .ok_or_else(|| conversion_error(index + 1, format!("column {} is missing", column + 1)))
        };
        xs.push(parse(0)?);
        ys.push(parse(1)?);
    }
    Ok((xs, ys))
}

/// Spectrum metadata as an object: null becomes `{}`, strings must hold a JSON object.
pub fn validate_json(metadata: Option<&Value>) -> Result<Map<String, Value>> {
    match metadata {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(Value::String(raw)) if raw.trim().is_empty() => Ok(Map::new()),
        Some(Value::String(raw)) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(ProcessorError::InvalidMetadataError {
                message: format!("expected an object, got {}", other),
            }),
            Err(e) => Err(ProcessorError::InvalidMetadataError {
                message: e.to_string(),
            }),
        },
        Some(other) => Err(ProcessorError::InvalidMetadataError {
            message: format!("expected an object, got {}", other),
        }),
    }
}

/// Merges the detected peaks into the existing spectrum metadata.
pub fn construct_metadata(init: Option<&Value>, peaks: &[PeakDatum]) -> Result<Value> {
    let mut metadata = validate_json(init)?;
    let peaks: Vec<Value> = peaks
        .iter()
        .map(|peak| {
            let mut entry = Map::new();
            entry.insert("position".to_string(), Value::String(peak.position.to_string()));
            if let Some(fwhm) = peak.fwhm {
                entry.insert("fwhm".to_string(), Value::String(fwhm.to_string()));
            }
            Value::Object(entry)
        })
        .collect();
    metadata.insert("peaks".to_string(), Value::Array(peaks));
    Ok(Value::Object(metadata))
}
