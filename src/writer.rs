//! Idempotent Writer: coerces each normalized row to the target schema and
//! persists it with insert-or-update semantics.
//!
//! Rows are independent: one row's coercion or write failure is recorded
//! and the remaining rows still run.

use log::{debug, warn};

use crate::{
    backend::RelationalBackend,
    data::{Value, coerce_typed_value},
    normalize::NormalizedRow,
    schema::TableSchema,
};

#[derive(Debug, Default)]
pub struct WriteReport {
    pub inserted: usize,
    pub updated: usize,
    pub row_errors: Vec<String>,
}

impl WriteReport {
    pub fn rows_written(&self) -> usize {
        self.inserted + self.updated
    }
}

/// An empty cell coerces to `None` and is kept, so updates can overwrite
/// the stored value with NULL; columns the file never mentions are absent
/// entirely and stay untouched.
fn coerce_row(
    schema: &TableSchema,
    row: &NormalizedRow,
) -> Result<Vec<(String, Option<Value>)>, String> {
    let mut coerced = Vec::with_capacity(schema.columns.len());
    for spec in &schema.columns {
        // the identity column is engine-owned; file data never writes it
        if spec.name == "id" {
            continue;
        }
        let Some(raw) = row.get(&spec.name) else {
            // declared column absent from this file; stays NULL
            continue;
        };
        match coerce_typed_value(raw, &spec.datatype) {
            Ok(value) => coerced.push((spec.name.clone(), value)),
            Err(err) => return Err(format!("column '{}': {err:#}", spec.name)),
        }
    }
    Ok(coerced)
}

/// Writes every row of the file. With a uniqueness key, a row matching
/// exactly one existing record updates it in place (all non-key columns
/// overwritten); otherwise the row is inserted. Without a key, persistence
/// is append-only.
pub fn write_rows(
    backend: &dyn RelationalBackend,
    schema: &TableSchema,
    unique_key: &[String],
    rows: &[NormalizedRow],
) -> WriteReport {
    let mut report = WriteReport::default();

    for (idx, row) in rows.iter().enumerate() {
        let row_number = idx + 1;
        let coerced = match coerce_row(schema, row) {
            Ok(coerced) => coerced,
            Err(err) => {
                report.row_errors.push(format!("row {row_number}: {err}"));
                continue;
            }
        };

        let outcome = persist_row(backend, schema, unique_key, coerced);
        match outcome {
            Ok(RowOutcome::Inserted) => report.inserted += 1,
            Ok(RowOutcome::Updated(id)) => {
                debug!("Record #{id} updated in '{}'", schema.table);
                report.updated += 1;
            }
            Err(err) => report
                .row_errors
                .push(format!("row {row_number}: {err:#}")),
        }
    }

    report
}

enum RowOutcome {
    Inserted,
    Updated(i64),
}

fn persist_row(
    backend: &dyn RelationalBackend,
    schema: &TableSchema,
    unique_key: &[String],
    coerced: Vec<(String, Option<Value>)>,
) -> anyhow::Result<RowOutcome> {
    if !unique_key.is_empty() {
        let criteria: Vec<(String, Value)> = unique_key
            .iter()
            .filter_map(|key| {
                coerced
                    .iter()
                    .find(|(name, _)| name == key)
                    .and_then(|(name, value)| value.clone().map(|value| (name.clone(), value)))
            })
            .collect();

        // a row missing (or blanking) part of its key cannot match; insert it
        if criteria.len() == unique_key.len() {
            let ids = backend.select_ids_by_eq(&schema.table, &criteria)?;
            if let Some(&id) = ids.first() {
                if ids.len() > 1 {
                    warn!(
                        "Uniqueness key matched {} rows in '{}'; updating record #{id}",
                        ids.len(),
                        schema.table
                    );
                }
                // every non-key column the file carries is overwritten,
                // cleared cells included (bound as NULL)
                let non_key: Vec<(String, Option<Value>)> = coerced
                    .into_iter()
                    .filter(|(name, _)| !unique_key.contains(name))
                    .collect();
                if !non_key.is_empty() {
                    backend.update_by_id(&schema.table, id, &non_key)?;
                }
                return Ok(RowOutcome::Updated(id));
            }
        }
    }

    let present: Vec<(String, Value)> = coerced
        .into_iter()
        .filter_map(|(name, value)| value.map(|value| (name, value)))
        .collect();
    backend.insert(&schema.table, &present)?;
    Ok(RowOutcome::Inserted)
}
