//! Import Orchestrator: enumerates sources and files, decides per file
//! whether to import, skip, or retry, and drives the normalize → infer →
//! evolve → write pipeline.
//!
//! Nothing in here aborts the multi-file run; a single file's problems
//! only ever mark that file failed in history.

use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Local;
use itertools::Itertools;
use log::{debug, info, warn};
use serde::Serialize;

use crate::{
    backend::{RelationalBackend, SqliteBackend},
    cli::ImportArgs,
    data::{CANONICAL_DATETIME_FORMAT, parse_flexible_datetime},
    filename,
    history::{ATTEMPTS_LIMIT, AttemptOutcome, HistoryStore, ImportStatus},
    instruction::{InstructionRegistry, RowContext},
    normalize,
    schema::build_target_schema,
    source::{RemoteSource, SourcesConfig, build_source},
    writer,
};

/// Everything a single attempt accumulates besides written rows. Captured
/// meta/footer lines and DDL rejections land in the history `meta` column;
/// row and file errors land in `errors`.
#[derive(Debug, Default, Serialize)]
pub struct RunMeta {
    pub file_meta: Vec<String>,
    pub ddl_errors: Vec<String>,
    pub row_errors: Vec<String>,
    pub file_errors: Vec<String>,
}

impl RunMeta {
    pub fn is_clean(&self) -> bool {
        self.ddl_errors.is_empty() && self.row_errors.is_empty() && self.file_errors.is_empty()
    }

    pub fn meta_json(&self) -> Option<String> {
        if self.file_meta.is_empty() && self.ddl_errors.is_empty() {
            return None;
        }
        serde_json::json!({
            "file_meta": self.file_meta,
            "ddl_errors": self.ddl_errors,
        })
        .to_string()
        .into()
    }

    pub fn errors_json(&self) -> Option<String> {
        let all: Vec<&String> = self.file_errors.iter().chain(&self.row_errors).collect();
        if all.is_empty() {
            return None;
        }
        serde_json::to_string(&all).ok()
    }
}

#[derive(Debug)]
pub struct FileOutcome {
    pub status: ImportStatus,
    pub meta: RunMeta,
    pub inserted: usize,
    pub updated: usize,
}

impl FileOutcome {
    fn failed(mut meta: RunMeta, error: String) -> Self {
        meta.file_errors.push(error);
        Self {
            status: ImportStatus::Failed,
            meta,
            inserted: 0,
            updated: 0,
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub files_seen: usize,
    pub files_imported: usize,
    pub files_skipped: usize,
    pub files_failed: usize,
    pub rows_inserted: usize,
    pub rows_updated: usize,
}

pub fn execute(args: &ImportArgs) -> Result<()> {
    let config = SourcesConfig::load(&args.config)
        .with_context(|| format!("Loading sources from {:?}", args.config))?;
    let backend = SqliteBackend::open(&args.db)?;
    let engine = ImportEngine::new(backend)?;
    let summary = engine.run(&config, args.source.as_deref(), args.file.as_deref())?;

    if summary.files_seen == 0 {
        warn!("Nothing was imported!");
    }
    info!(
        "Processed {} file(s): {} imported, {} skipped, {} failed; {} row(s) inserted, {} updated",
        summary.files_seen,
        summary.files_imported,
        summary.files_skipped,
        summary.files_failed,
        summary.rows_inserted,
        summary.rows_updated
    );
    Ok(())
}

pub struct ImportEngine {
    backend: SqliteBackend,
    history: HistoryStore,
    registry: InstructionRegistry,
}

impl ImportEngine {
    pub fn new(backend: SqliteBackend) -> Result<Self> {
        let history = HistoryStore::new(backend.connection())?;
        Ok(Self {
            backend,
            history,
            registry: InstructionRegistry::with_known_tables(),
        })
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    /// Runs the import over every active source, optionally narrowed to one
    /// source name and/or one file path.
    pub fn run(
        &self,
        config: &SourcesConfig,
        source_filter: Option<&str>,
        file_filter: Option<&str>,
    ) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        for entry in config.active() {
            if source_filter.is_some_and(|name| name != entry.name) {
                continue;
            }
            let source = match build_source(entry) {
                Ok(source) => source,
                Err(err) => {
                    warn!("Skipping source '{}': {err:#}", entry.name);
                    continue;
                }
            };
            info!(
                "Connected to: {} ({})",
                entry.name,
                entry.driver.to_uppercase()
            );
            let files = match source.list() {
                Ok(files) => files,
                Err(err) => {
                    warn!("Source '{}' is unreachable: {err:#}", entry.name);
                    continue;
                }
            };
            for path in files {
                if file_filter.is_some_and(|wanted| wanted != path) {
                    continue;
                }
                if !filename::is_supported(&path) {
                    debug!("File '{path}' type is not supported - skip");
                    continue;
                }
                summary.files_seen += 1;
                self.process_file(source.as_ref(), &path, &mut summary)?;
            }
        }
        Ok(summary)
    }

    /// Per-file decision: import when unseen, skip when successfully
    /// imported and unchanged, re-import when modified or retryable,
    /// give up after the attempt limit.
    fn process_file(
        &self,
        source: &dyn RemoteSource,
        path: &str,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let Some(record) = self.history.find(source.name(), path)? else {
            info!("File '{path}' processing");
            return self.import_file(source, path, summary);
        };

        let last_modified = source
            .stat(path)
            .map(|stat| stat.last_modified)
            .unwrap_or(0);
        let retryable_failure =
            record.status != ImportStatus::Success && record.attempts <= ATTEMPTS_LIMIT;
        let modified = last_modified != record.file_modification_time;

        if retryable_failure || modified {
            info!(
                "Updating '{path}' due to: {}",
                if retryable_failure {
                    "previous import error"
                } else {
                    "file modified"
                }
            );
            return self.import_file(source, path, summary);
        }

        if record.status != ImportStatus::Success {
            warn!(
                "Giving up on '{path}' after {} attempt(s); not retrying",
                record.attempts
            );
        } else {
            info!(
                "Skip import '{}' - no changes detected",
                filename::file_name_of(path)
            );
        }
        summary.files_skipped += 1;
        Ok(())
    }

    fn import_file(
        &self,
        source: &dyn RemoteSource,
        path: &str,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let started = Instant::now();
        let (outcome, file_size, file_modification_time, duration) = match source.read(path) {
            Ok(bytes) => {
                let stat = source.stat(path).ok();
                let outcome = self.import_contents(path, &bytes);
                (
                    outcome,
                    stat.map(|s| s.size as i64).unwrap_or(0),
                    stat.map(|s| s.last_modified).unwrap_or(0),
                    started.elapsed().as_secs_f64(),
                )
            }
            Err(err) => {
                warn!("File '{path}' error: {err:#}");
                (
                    FileOutcome::failed(RunMeta::default(), format!("{err:#}")),
                    0,
                    0,
                    0.0,
                )
            }
        };

        let attempt = AttemptOutcome {
            source_name: source.name().to_string(),
            file_name: filename::file_name_of(path),
            file_path: path.to_string(),
            file_size,
            file_modification_time,
            file_processing_time: duration,
            status: outcome.status,
            meta: outcome.meta.meta_json(),
            errors: outcome.meta.errors_json(),
        };
        let attempts = self.history.record_attempt(&attempt)?;
        info!("done. attempts: {attempts}");

        match outcome.status {
            ImportStatus::Success => summary.files_imported += 1,
            ImportStatus::Failed => summary.files_failed += 1,
        }
        summary.rows_inserted += outcome.inserted;
        summary.rows_updated += outcome.updated;
        Ok(())
    }

    /// The pipeline for one fetched file: route by name, normalize, resolve
    /// the instruction, inject common fields, evolve the schema, write rows.
    pub fn import_contents(&self, path: &str, bytes: &[u8]) -> FileOutcome {
        let mut meta = RunMeta::default();

        let text = match normalize::decode_bytes(bytes) {
            Ok(text) => text,
            Err(err) => return FileOutcome::failed(meta, format!("{err:#}")),
        };
        let parts = match filename::parse_file_name(path) {
            Ok(parts) => parts,
            Err(err) => return FileOutcome::failed(meta, err.to_string()),
        };
        let normalized = match normalize::normalize(&text) {
            Ok(normalized) => normalized,
            Err(err) => return FileOutcome::failed(meta, err.to_string()),
        };

        debug!("Normalize file data...");
        meta.file_meta = normalized.meta_lines;
        let header = normalized.header;
        let mut rows = normalized.rows;

        if rows.is_empty() {
            info!("Nothing to import...");
            return FileOutcome {
                status: ImportStatus::Success,
                meta,
                inserted: 0,
                updated: 0,
            };
        }

        let instruction = self.registry.resolve(&parts.table, rows.first());
        let unique_key = instruction.uniqueness_key();
        let ctx = RowContext {
            file_name: parts.file_name.clone(),
            file_path: path.to_string(),
        };
        let created_at = Local::now()
            .naive_local()
            .format(CANONICAL_DATETIME_FORMAT)
            .to_string();
        let file_date = parse_flexible_datetime(&parts.file_date)
            .format(CANONICAL_DATETIME_FORMAT)
            .to_string();

        let mut extra_columns: Vec<String> = Vec::new();
        for row in &mut rows {
            let mut additions = instruction.augment_row(row);
            additions.extend(instruction.common_column_values(&ctx));
            additions.push(("client_name".to_string(), parts.client_name.clone()));
            additions.push(("file_id".to_string(), parts.file_id.clone()));
            additions.push(("file_date".to_string(), file_date.clone()));
            additions.push(("file_count".to_string(), parts.file_count.clone()));
            additions.push(("created_at".to_string(), created_at.clone()));
            for (name, value) in additions {
                if !header.contains(&name) && !extra_columns.contains(&name) {
                    extra_columns.push(name.clone());
                }
                row.insert(name, value);
            }
        }

        let mut all_columns = header;
        all_columns.extend(extra_columns);
        let target = build_target_schema(
            &parts.table,
            &all_columns,
            &instruction.common_columns(),
            &instruction.declared_columns(),
        );

        debug!("Verifying table and columns...");
        match self.backend.has_table(&target.table) {
            Ok(false) => {
                info!("Creating new '{}' schema...", target.table);
                match self.backend.create_table(&target, &unique_key) {
                    Ok(()) => info!(
                        "Table '{}' created with columns: {}",
                        target.table,
                        target.columns.iter().map(|c| c.name.as_str()).join(",")
                    ),
                    Err(err) => {
                        warn!("WARNING: {err:#}");
                        meta.ddl_errors.push(format!("{err:#}"));
                    }
                }
            }
            Ok(true) => match self.backend.column_listing(&target.table) {
                Ok(existing) => {
                    let missing = target.missing_columns(&existing);
                    if !missing.is_empty() {
                        info!("Alter table add new columns...");
                        match self.backend.add_columns(&target.table, &missing) {
                            Ok(()) => info!(
                                "Columns created: {}",
                                missing.iter().map(|c| c.name.as_str()).join(",")
                            ),
                            Err(err) => {
                                warn!("WARNING: {err:#}");
                                meta.ddl_errors.push(format!("{err:#}"));
                            }
                        }
                    }
                }
                Err(err) => meta.ddl_errors.push(format!("{err:#}")),
            },
            Err(err) => meta.ddl_errors.push(format!("{err:#}")),
        }

        // best-effort column set: whatever actually exists after evolution
        let live = self
            .backend
            .column_listing(&target.table)
            .unwrap_or_default();
        let effective = target.retain_columns(&live);

        let (inserted, updated) = if effective.columns.is_empty() {
            meta.file_errors.push(format!(
                "table '{}' is unavailable; {} row(s) not imported",
                target.table,
                rows.len()
            ));
            (0, 0)
        } else {
            info!("Importing data...");
            let report = writer::write_rows(&self.backend, &effective, &unique_key, &rows);
            meta.row_errors.extend(report.row_errors);
            (report.inserted, report.updated)
        };

        info!("Finished! Records modified: {}", inserted + updated);
        let status = if meta.is_clean() {
            ImportStatus::Success
        } else {
            ImportStatus::Failed
        };
        FileOutcome {
            status,
            meta,
            inserted,
            updated,
        }
    }

    pub fn backend(&self) -> &SqliteBackend {
        &self.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_meta_json_shapes() {
        let mut meta = RunMeta::default();
        assert!(meta.is_clean());
        assert_eq!(meta.meta_json(), None);
        assert_eq!(meta.errors_json(), None);

        meta.file_meta.push("rows=1".to_string());
        meta.row_errors.push("row 2: bad integer".to_string());
        assert!(!meta.is_clean());
        assert!(meta.meta_json().unwrap().contains("rows=1"));
        assert!(meta.errors_json().unwrap().contains("bad integer"));
    }

    #[test]
    fn unroutable_file_fails_before_any_ddl() {
        let engine = ImportEngine::new(SqliteBackend::open_in_memory().unwrap()).unwrap();
        let outcome = engine.import_contents("fees.csv", b"a,b\n1,2\n");
        assert_eq!(outcome.status, ImportStatus::Failed);
        assert_eq!(outcome.inserted, 0);
        assert!(!engine.backend().has_table("fees_report").unwrap());
        assert!(outcome.meta.errors_json().unwrap().contains("routed"));
    }

    #[test]
    fn empty_body_is_a_successful_noop() {
        let engine = ImportEngine::new(SqliteBackend::open_in_memory().unwrap()).unwrap();
        let outcome = engine.import_contents("fees_report_acme_1_20200101_2.csv", b"id,amount\n");
        assert_eq!(outcome.status, ImportStatus::Success);
        assert_eq!(outcome.inserted, 0);
        assert!(!engine.backend().has_table("fees_report").unwrap());
    }
}
