//! Column model, schema inference, and additive evolution.
//!
//! This module owns [`ColumnSpec`] (type plus modifiers, applied in a fixed
//! order by the DDL builder), [`TableSchema`] (the target shape of one
//! destination table), and the merge rules that combine observed file
//! columns, common system columns, and instruction-declared columns.
//!
//! Schemas only grow: the diff against a live table yields columns to add
//! and never a modification or removal of an existing column.

use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};

pub const DECIMAL_DEFAULT_TOTAL: u32 = 8;
pub const DECIMAL_DEFAULT_PLACES: u32 = 6;
const DECIMAL_MAX_TOTAL: u32 = 28;

/// Columns derived from the file name that stay plain indexed strings even
/// though some of their names would otherwise match the `_date` rule.
const META_STRING_COLUMNS: &[&str] = &["file_name", "client_name", "file_id", "file_count"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DecimalSpec {
    pub total: u32,
    pub places: u32,
}

impl Default for DecimalSpec {
    fn default() -> Self {
        Self {
            total: DECIMAL_DEFAULT_TOTAL,
            places: DECIMAL_DEFAULT_PLACES,
        }
    }
}

impl DecimalSpec {
    pub fn new(total: u32, places: u32) -> Result<Self> {
        let spec = Self { total, places };
        spec.ensure_valid()?;
        Ok(spec)
    }

    pub fn ensure_valid(&self) -> Result<()> {
        ensure!(self.total > 0, "Decimal total digits must be positive");
        ensure!(
            self.total <= DECIMAL_MAX_TOTAL,
            "Decimal total digits must be <= {}",
            DECIMAL_MAX_TOTAL
        );
        ensure!(
            self.places <= self.total,
            "Decimal places ({}) cannot exceed total digits ({})",
            self.places,
            self.total
        );
        Ok(())
    }

    pub fn signature(&self) -> String {
        format!("decimal({},{})", self.total, self.places)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ColumnType {
    String,
    Integer,
    Decimal(DecimalSpec),
    Date { format: String },
    DateTime { format: String },
    Timestamp,
}

/// One column of a target table: base type first, then modifiers. The DDL
/// builder consumes the fields in that fixed order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub datatype: ColumnType,
    pub nullable: bool,
    pub index: bool,
    pub unique: bool,
    pub length: Option<u32>,
}

impl ColumnSpec {
    /// Nullable by default; modifiers are opted into explicitly.
    pub fn new(name: impl Into<String>, datatype: ColumnType) -> Self {
        Self {
            name: name.into(),
            datatype,
            nullable: true,
            index: false,
            unique: false,
            length: None,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::String)
    }

    pub fn with_index(mut self) -> Self {
        self.index = true;
        self
    }

    pub fn with_unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn with_length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    pub fn not_nullable(mut self) -> Self {
        self.nullable = false;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    pub table: String,
    pub columns: Vec<ColumnSpec>,
}

impl TableSchema {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Adds the column, or replaces the spec in place when a column of the
    /// same name already exists (instruction declarations override inferred
    /// specs without changing column order).
    pub fn upsert_column(&mut self, spec: ColumnSpec) {
        match self.column_index(&spec.name) {
            Some(idx) => self.columns[idx] = spec,
            None => self.columns.push(spec),
        }
    }

    /// Columns of the target schema missing from the live table. The
    /// identity column is never a candidate.
    pub fn missing_columns(&self, existing: &[String]) -> Vec<ColumnSpec> {
        self.columns
            .iter()
            .filter(|spec| spec.name != "id" && !existing.iter().any(|name| *name == spec.name))
            .cloned()
            .collect()
    }

    /// Restricts the schema to columns that actually exist in the live
    /// table, so writes stay best-effort after a rejected DDL.
    pub fn retain_columns(&self, live: &[String]) -> TableSchema {
        TableSchema {
            table: self.table.clone(),
            columns: self
                .columns
                .iter()
                .filter(|spec| live.iter().any(|name| *name == spec.name))
                .cloned()
                .collect(),
        }
    }
}

/// Default typing for a column nothing else has claimed:
/// identifier-ish and file-name-derived fields become indexed strings,
/// date-ish fields become indexed timestamps, everything else a nullable
/// string.
pub fn infer_column(name: &str) -> ColumnSpec {
    if name == "created_at" || name == "updated_at" {
        return ColumnSpec::new(name, ColumnType::Timestamp);
    }
    if name.contains("_id") || META_STRING_COLUMNS.contains(&name) {
        return ColumnSpec::string(name).with_index();
    }
    if name.contains("_date") {
        return ColumnSpec::new(name, ColumnType::Timestamp).with_index();
    }
    ColumnSpec::string(name)
}

/// Builds the target schema for one file: every observed data column
/// (inferred), then common system columns, then instruction-declared
/// columns overriding by name.
pub fn build_target_schema(
    table: &str,
    data_columns: &[String],
    common: &[ColumnSpec],
    declared: &[ColumnSpec],
) -> TableSchema {
    let mut schema = TableSchema::new(table);
    for name in data_columns {
        schema.upsert_column(infer_column(name));
    }
    for spec in common {
        schema.upsert_column(spec.clone());
    }
    for spec in declared {
        schema.upsert_column(spec.clone());
    }
    schema
}
