//! CSV ingestion
//!
//! Tokenizes uploaded text with RFC4180 quoting (embedded commas, newlines,
//! doubled quotes) and zips each data line against the header line. Cells
//! are trimmed and carriage returns dropped. The upload size ceiling is the
//! caller's concern.

use crate::models::RawRow;
use std::sync::Arc;
use thiserror::Error;

/// Ingestion errors; on any of these nothing is populated
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CsvError {
    #[error("No header row found in CSV")]
    EmptyFile,

    #[error("Malformed CSV at line {line}: {message}")]
    Malformed { line: u64, message: String },
}

/// Parser output
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCsv {
    pub headers: Vec<String>,
    pub rows: Vec<Arc<RawRow>>,
}

fn clean_cell(cell: &str) -> String {
    cell.replace('\r', "").trim().to_string()
}

/// Header name for an empty header cell at 0-based `index`
fn synthesized_header(index: usize) -> String {
    format!("col_{}", index + 1)
}

/// A physical line holding nothing but whitespace
fn is_blank(cells: &[String]) -> bool {
    cells.len() == 1 && cells[0].is_empty()
}

/// Parse CSV text into headers and rows
pub fn parse(content: &str) -> Result<ParsedCsv, CsvError> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        // Records end at LF only; a stray CR stays in its cell for clean_cell
        .terminator(csv::Terminator::Any(b'\n'))
        .from_reader(content.as_bytes());

    let mut headers: Option<Vec<String>> = None;
    let mut rows = Vec::new();

    for result in reader.records() {
        let record = result.map_err(|e| CsvError::Malformed {
            line: e.position().map(|p| p.line()).unwrap_or(0),
            message: e.to_string(),
        })?;

        let cells: Vec<String> = record.iter().map(clean_cell).collect();
        if is_blank(&cells) {
            continue;
        }

        match &headers {
            None => {
                headers = Some(
                    cells
                        .into_iter()
                        .enumerate()
                        .map(|(i, h)| if h.is_empty() { synthesized_header(i) } else { h })
                        .collect(),
                );
            }
            Some(headers) => {
                let row: RawRow = headers
                    .iter()
                    .enumerate()
                    .map(|(i, h)| (h.clone(), cells.get(i).cloned().unwrap_or_default()))
                    .collect();
                rows.push(Arc::new(row));
            }
        }
    }

    let headers = headers.ok_or(CsvError::EmptyFile)?;
    tracing::debug!(columns = headers.len(), rows = rows.len(), "Parsed CSV");

    Ok(ParsedCsv { headers, rows })
}
