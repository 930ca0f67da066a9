//! File-name routing: the underscore-token convention that names the
//! destination table and carries per-file metadata.
//!
//! `fees_report_acme_123_20200101_50.csv` routes to table `fees_report`
//! with client `acme`, id `123`, date `20200101`, count `50`.

use std::path::Path;

use crate::error::ImportError;

pub const SUPPORTED_EXTENSIONS: &[&str] = &["csv"];

const MIN_TOKENS: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNameParts {
    pub table: String,
    pub client_name: String,
    pub file_id: String,
    pub file_date: String,
    pub file_count: String,
    pub file_name: String,
}

pub fn file_name_of(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

pub fn is_supported(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|supported| ext.eq_ignore_ascii_case(supported))
        })
        .unwrap_or(false)
}

/// Tokenizes the base file name and rejects anything that cannot be routed
/// before a single DDL or DML statement runs.
pub fn parse_file_name(path: &str) -> Result<FileNameParts, ImportError> {
    let file_name = file_name_of(path);
    let stem = Path::new(&file_name)
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    let tokens: Vec<&str> = stem.split('_').collect();
    if tokens.len() < MIN_TOKENS || tokens.iter().take(MIN_TOKENS).any(|t| t.is_empty()) {
        return Err(ImportError::UnroutableFileName(file_name));
    }

    Ok(FileNameParts {
        table: format!("{}_{}", tokens[0], tokens[1]),
        client_name: tokens[2].to_string(),
        file_id: tokens[3].to_string(),
        file_date: tokens[4].to_string(),
        file_count: tokens[5].to_string(),
        file_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_conventional_file_name() {
        let parts = parse_file_name("reports/fees_report_acme_123_20200101_50.csv").unwrap();
        assert_eq!(parts.table, "fees_report");
        assert_eq!(parts.client_name, "acme");
        assert_eq!(parts.file_id, "123");
        assert_eq!(parts.file_date, "20200101");
        assert_eq!(parts.file_count, "50");
        assert_eq!(parts.file_name, "fees_report_acme_123_20200101_50.csv");
    }

    #[test]
    fn table_name_is_lower_cased() {
        let parts = parse_file_name("FEES_Report_Acme_1_20200101_2.csv").unwrap();
        assert_eq!(parts.table, "fees_report");
    }

    #[test]
    fn rejects_short_or_empty_token_names() {
        assert!(parse_file_name("fees_report.csv").is_err());
        assert!(parse_file_name("fees_report_acme_123_20200101_.csv").is_err());
    }

    #[test]
    fn extension_filter_is_case_insensitive() {
        assert!(is_supported("a_b_c_d_e_f.CSV"));
        assert!(!is_supported("a_b_c_d_e_f.xlsx"));
        assert!(!is_supported("no-extension"));
    }
}
