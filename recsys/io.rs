//! Tab-separated event, query and prediction files.
//!
//! An event file has one row per event: `n_otypes` identifier columns followed by the
//! score. A query file has the identifier columns only; any further columns are
//! ignored, so an event file can be used as a query file. No header rows. Lines
//! starting with `#` are comments.

use crate::data::ExternalId;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IoError {
    #[error("Error reading or writing a tab-separated file: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed row at line {line}: {reason}")]
    MalformedRow { line: u64, reason: String },
}

/// Events and scores as read from disk, before ingestion.
#[derive(Debug, Clone, Default)]
pub struct RawEvents {
    pub events: Vec<Vec<ExternalId>>,
    pub scores: Vec<f64>,
}

fn reader(path: &Path) -> Result<csv::Reader<std::fs::File>, IoError> {
    Ok(csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .from_path(path)?)
}

fn line_of(record: &csv::StringRecord) -> u64 {
    record.position().map(|p| p.line()).unwrap_or(0)
}

fn parse_ids(record: &csv::StringRecord, n_otypes: usize) -> Result<Vec<ExternalId>, IoError> {
    if record.len() < n_otypes {
        return Err(IoError::MalformedRow {
            line: line_of(record),
            reason: format!("expected {n_otypes} identifier columns, found {}", record.len()),
        });
    }
    Ok(record
        .iter()
        .take(n_otypes)
        .map(|token| match token.parse::<ExternalId>() {
            Ok(id) => id,
            Err(never) => match never {},
        })
        .collect())
}

pub fn load_events(path: &Path, n_otypes: usize) -> Result<RawEvents, IoError> {
    let mut raw = RawEvents::default();
    for record in reader(path)?.records() {
        let record = record?;
        let ids = parse_ids(&record, n_otypes)?;
        let token = record.get(n_otypes).ok_or_else(|| IoError::MalformedRow {
            line: line_of(&record),
            reason: "missing score column".to_string(),
        })?;
        let score = token
            .trim()
            .parse::<f64>()
            .map_err(|e| IoError::MalformedRow {
                line: line_of(&record),
                reason: format!("score '{token}' is not numeric ({e})"),
            })?;
        raw.events.push(ids);
        raw.scores.push(score);
    }
    log::info!(
        "Read {} events from {}",
        raw.events.len(),
        path.display()
    );
    Ok(raw)
}

pub fn load_queries(path: &Path, n_otypes: usize) -> Result<Vec<Vec<ExternalId>>, IoError> {
    let mut queries = Vec::new();
    for record in reader(path)?.records() {
        queries.push(parse_ids(&record?, n_otypes)?);
    }
    Ok(queries)
}

/// Writes one row per query: the identifiers, then the prediction.
pub fn write_predictions(
    path: &Path,
    queries: &[Vec<ExternalId>],
    predictions: &[f64],
) -> Result<(), IoError> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(path)?;
    for (query, prediction) in queries.iter().zip(predictions) {
        let mut row: Vec<String> = query.iter().map(ExternalId::to_token).collect();
        row.push(format!("{prediction:.6}"));
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}
