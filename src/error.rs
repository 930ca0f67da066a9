use thiserror::Error;

/// Failures that sink a whole file before any DDL or DML runs, plus
/// configuration problems surfaced while wiring up sources.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("file has no header line")]
    MissingHeader,
    #[error(
        "file name '{0}' cannot be routed: expected at least six underscore-delimited tokens \
         (<table>_<table>_<client>_<id>_<date>_<count>)"
    )]
    UnroutableFileName(String),
    #[error("source driver '{0}' is not supported")]
    UnsupportedDriver(String),
}
