use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde_json::{Number, Value};
use wellness_core::{CandidateItem, Record};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DocumentFormat {
    Json,
    Yaml,
}

impl DocumentFormat {
    /// Pick a document format from the file extension.
    ///
    /// # Errors
    /// Returns an error for a missing or unsupported extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(Self::Json),
            Some("yaml" | "yml") => Ok(Self::Yaml),
            _ => Err(anyhow!(
                "unsupported document extension for {} (expected .json, .yaml or .yml)",
                path.display()
            )),
        }
    }
}

/// Read tabular records from a CSV file with a header row.
///
/// # Errors
/// Returns an error when the file cannot be opened or a row is malformed.
pub fn load_records(path: &Path) -> Result<Vec<Record>> {
    let file = File::open(path)
        .with_context(|| format!("failed to open records file {}", path.display()))?;
    let records = parse_records(BufReader::new(file))
        .with_context(|| format!("failed to parse records file {}", path.display()))?;
    tracing::info!(path = %path.display(), records = records.len(), "loaded records");
    Ok(records)
}

/// Parse CSV rows into records, keeping the header's column order.
///
/// # Errors
/// Returns an error when the header or any row cannot be decoded, including
/// rows whose length differs from the header.
pub fn parse_records<R: Read>(reader: R) -> Result<Vec<Record>> {
    let mut csv_reader = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
    let headers = csv_reader
        .headers()
        .context("failed to read CSV header row")?
        .iter()
        .map(|header| header.trim().to_string())
        .collect::<Vec<_>>();

    let mut records = Vec::new();
    for (index, row) in csv_reader.records().enumerate() {
        let row = row.with_context(|| format!("failed to read CSV row {}", index + 1))?;
        records.push(headers.iter().cloned().zip(row.iter().map(parse_cell)).collect::<Record>());
    }
    Ok(records)
}

/// Numbers become JSON numbers, blanks become `null`, the rest stays text.
#[must_use]
pub fn parse_cell(cell: &str) -> Value {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    if let Ok(integer) = trimmed.parse::<i64>() {
        return Value::from(integer);
    }
    if let Some(number) = trimmed.parse::<f64>().ok().and_then(Number::from_f64) {
        return Value::Number(number);
    }
    Value::String(cell.to_string())
}

/// Deserialize a JSON or YAML document, chosen by extension.
///
/// # Errors
/// Returns an error when the file cannot be read, the extension is not
/// supported, or the content does not match `T`.
pub fn load_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let format = DocumentFormat::from_path(path)?;
    let body = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read document {}", path.display()))?;
    parse_document(&body, format).with_context(|| format!("invalid document {}", path.display()))
}

/// Deserialize a document body in the given format.
///
/// # Errors
/// Returns an error when the body does not match `T`.
pub fn parse_document<T: DeserializeOwned>(body: &str, format: DocumentFormat) -> Result<T> {
    match format {
        DocumentFormat::Json => serde_json::from_str(body).context("failed to decode JSON"),
        DocumentFormat::Yaml => serde_yaml::from_str(body).context("failed to decode YAML"),
    }
}

/// Load an intervention catalog (a list of `label`/`cost`/`benefit` entries).
///
/// # Errors
/// Returns an error when the document cannot be read or decoded. Label
/// uniqueness is checked by the optimizer, not here.
pub fn load_catalog(path: &Path) -> Result<Vec<CandidateItem>> {
    let catalog: Vec<CandidateItem> = load_document(path)?;
    tracing::info!(path = %path.display(), items = catalog.len(), "loaded catalog");
    Ok(catalog)
}
