//! Row Normalizer: raw file text in, ordered header plus uniform rows out.
//!
//! Handles the irregularities real export files carry: `;` vs `,`
//! delimiters, empty or duplicate header cells, meta/footer lines mixed
//! into the data, and trailing optional columns that some rows omit.

use std::collections::HashMap;
use std::sync::OnceLock;

use anyhow::{Context, Result, anyhow};
use encoding_rs::UTF_8;
use regex::Regex;

use crate::{data::normalize_column_name, error::ImportError};

/// Lines starting with these markers are run metadata, not data rows.
const META_LINE_PATTERN: &str = r"^(-----|rows=|timestamp=)";

pub type NormalizedRow = HashMap<String, String>;

#[derive(Debug, Clone)]
pub struct NormalizedFile {
    pub header: Vec<String>,
    pub rows: Vec<NormalizedRow>,
    pub meta_lines: Vec<String>,
    pub delimiter: u8,
}

fn meta_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(META_LINE_PATTERN).expect("meta line pattern is valid"))
}

pub fn decode_bytes(bytes: &[u8]) -> Result<String> {
    let (text, _, had_errors) = UTF_8.decode(bytes);
    if had_errors {
        Err(anyhow!("Failed to decode file contents as UTF-8"))
    } else {
        Ok(text.into_owned())
    }
}

/// Counts `,` against `;` in the first line; the tie favors `;`.
pub fn detect_delimiter(first_line: &str) -> u8 {
    let commas = first_line.matches(',').count();
    let semicolons = first_line.matches(';').count();
    if semicolons < commas { b',' } else { b';' }
}

fn split_csv_line(line: &str, delimiter: u8) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(line.as_bytes());
    let mut record = csv::StringRecord::new();
    reader
        .read_record(&mut record)
        .with_context(|| format!("Splitting line '{line}'"))?;
    Ok(record.iter().map(|cell| cell.to_string()).collect())
}

/// Lower-cases header cells, squashes whitespace to underscores, remaps
/// the reserved `id` cell to `row_id`, and renames empty or duplicate
/// cells deterministically by position.
fn normalize_header(cells: Vec<String>) -> Vec<String> {
    let mut header: Vec<String> = Vec::with_capacity(cells.len());
    for (idx, cell) in cells.into_iter().enumerate() {
        let name = normalize_column_name(&cell);
        // `id` is reserved for the engine's identity column
        let name = if name == "id" {
            "row_id".to_string()
        } else {
            name
        };
        let name = if name.trim_matches('_').is_empty() {
            format!("unnamed_{idx}")
        } else if header.contains(&name) {
            format!("{name}_{idx}")
        } else {
            name
        };
        header.push(name);
    }
    header
}

/// Turns raw file text into a header and uniform rows. Fails only on a
/// missing header line; everything else is reconciled.
pub fn normalize(text: &str) -> Result<NormalizedFile, ImportError> {
    let mut lines = text.lines();
    let first_line = match lines.next() {
        Some(line) if !line.trim().is_empty() => line,
        _ => return Err(ImportError::MissingHeader),
    };

    let delimiter = detect_delimiter(first_line);
    let header_cells =
        split_csv_line(&first_line.to_lowercase(), delimiter).map_err(|_| ImportError::MissingHeader)?;
    let mut header = normalize_header(header_cells);

    let mut raw_rows: Vec<Vec<String>> = Vec::new();
    let mut meta_lines: Vec<String> = Vec::new();
    let mut max_width = header.len();

    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        if meta_line_regex().is_match(line) {
            meta_lines.push(line.to_string());
            continue;
        }
        let cells = match split_csv_line(line, delimiter) {
            Ok(cells) => cells,
            // an unsplittable body line is treated as metadata, not fatal
            Err(_) => {
                meta_lines.push(line.to_string());
                continue;
            }
        };
        max_width = max_width.max(cells.len());
        raw_rows.push(cells);
    }

    // header fillers get generated unique names; short rows get empty cells
    for idx in header.len()..max_width {
        header.push(format!("filler_{idx}"));
    }

    let rows = raw_rows
        .into_iter()
        .map(|mut cells| {
            cells.resize(max_width, String::new());
            header.iter().cloned().zip(cells).collect::<NormalizedRow>()
        })
        .collect();

    Ok(NormalizedFile {
        header,
        rows,
        meta_lines,
        delimiter,
    })
}
