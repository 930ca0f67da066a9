//! Per-table import instructions and their registry.
//!
//! An instruction customizes one destination table: extra row values,
//! explicitly typed columns, and the uniqueness key driving upserts.
//! Tables without an instruction get default policy: no extra columns,
//! insert-only persistence.
//!
//! Lookup is an explicit registry populated at startup and keyed by table
//! name; the `UpperCamelCase` + `Table` identifier is kept for log
//! messages so operators can match output against instruction names.

use std::collections::HashMap;

use anyhow::{Result, bail};
use heck::ToUpperCamelCase;
use log::{debug, info, warn};

use crate::{
    normalize::NormalizedRow,
    schema::{ColumnSpec, ColumnType, DecimalSpec},
};

/// File identity handed to instructions for common column values.
#[derive(Debug, Clone)]
pub struct RowContext {
    pub file_name: String,
    pub file_path: String,
}

pub trait Instruction {
    /// Additional or overriding column values for one row.
    fn augment_row(&self, _row: &NormalizedRow) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Explicitly typed columns this table needs beyond inferred strings.
    fn declared_columns(&self) -> Vec<ColumnSpec> {
        Vec::new()
    }

    /// Columns that jointly identify the same logical row across
    /// re-imports; empty means insert-only.
    fn uniqueness_key(&self) -> Vec<String> {
        Vec::new()
    }

    /// Columns attached to every row regardless of instruction presence.
    fn common_columns(&self) -> Vec<ColumnSpec> {
        vec![
            ColumnSpec::string("file_name").with_index(),
            ColumnSpec::string("file_path"),
        ]
    }

    fn common_column_values(&self, ctx: &RowContext) -> Vec<(String, String)> {
        vec![
            ("file_name".to_string(), ctx.file_name.clone()),
            ("file_path".to_string(), ctx.file_path.clone()),
        ]
    }
}

/// Default policy for tables without a registered instruction.
pub struct DefaultInstruction;

impl Instruction for DefaultInstruction {}

type InstructionCtor = fn() -> Box<dyn Instruction>;

pub struct InstructionRegistry {
    entries: HashMap<String, InstructionCtor>,
}

impl InstructionRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Registry pre-populated with the known table instructions.
    pub fn with_known_tables() -> Self {
        let mut registry = Self::new();
        registry.register("ecp_icpp", || Box::new(EcpIcppTable));
        registry.register("fees_report", || Box::new(FeesReportTable));
        registry
    }

    pub fn register(&mut self, table: &str, ctor: InstructionCtor) {
        self.entries.insert(table.to_string(), ctor);
    }

    /// Resolves the instruction for a table. A registered instruction that
    /// fails validation against the sample row is logged and replaced with
    /// default policy; absence is not an error.
    pub fn resolve(&self, table: &str, sample_row: Option<&NormalizedRow>) -> Box<dyn Instruction> {
        let Some(ctor) = self.entries.get(table) else {
            debug!(
                "No instruction registered for table '{table}' ({}); using default policy",
                convention_name(table)
            );
            return Box::new(DefaultInstruction);
        };

        let instruction = ctor();
        if let Some(sample) = sample_row {
            if let Err(err) = validate_instruction(instruction.as_ref(), sample) {
                warn!(
                    "Instruction {} failed validation ({err}); proceeding with default policy",
                    convention_name(table)
                );
                return Box::new(DefaultInstruction);
            }
        }
        info!("Instruction found: {}", convention_name(table));
        instruction
    }
}

impl Default for InstructionRegistry {
    fn default() -> Self {
        Self::with_known_tables()
    }
}

/// The instruction identifier an operator would look for in source, e.g.
/// `fees_report` -> `FeesReportTable`.
pub fn convention_name(table: &str) -> String {
    format!("{}Table", table.to_upper_camel_case())
}

/// Every extra column the instruction produces from a sample row must be
/// covered by its declared column schema, otherwise table creation would
/// silently miss columns the writer later needs.
fn validate_instruction(instruction: &dyn Instruction, sample_row: &NormalizedRow) -> Result<()> {
    let declared = instruction.declared_columns();
    for (column, _) in instruction.augment_row(sample_row) {
        let covered =
            declared.iter().any(|spec| spec.name == column) || sample_row.contains_key(&column);
        if !covered {
            bail!("augmented column '{column}' has no declared schema");
        }
    }
    Ok(())
}

/// Payment scheme interchange/fee report (ICPP extract).
pub struct EcpIcppTable;

impl Instruction for EcpIcppTable {
    fn augment_row(&self, row: &NormalizedRow) -> Vec<(String, String)> {
        match row.get("region") {
            Some(region) if !region.is_empty() => vec![(
                "proc_region".to_string(),
                region.trim().to_ascii_uppercase(),
            )],
            _ => Vec::new(),
        }
    }

    fn declared_columns(&self) -> Vec<ColumnSpec> {
        vec![
            ColumnSpec::new(
                "report_date",
                ColumnType::Date {
                    format: "%d.%m.%Y".to_string(),
                },
            )
            .with_index(),
            ColumnSpec::string("card_product_platform")
                .with_index()
                .with_length(18),
            ColumnSpec::string("security_level").with_index().with_length(7),
            ColumnSpec::string("region").with_index().with_length(3),
            ColumnSpec::string("proc_region").with_length(3),
            ColumnSpec::string("payment_id").with_index(),
            ColumnSpec::string("card").with_length(11),
            ColumnSpec::string("merchant_name"),
            ColumnSpec::string("merchant_id").with_index().with_length(8),
            ColumnSpec::string("terminal_id").with_index().with_length(18),
            ColumnSpec::new(
                "tr_batch_open_date",
                ColumnType::Date {
                    format: "%Y.%m.%d".to_string(),
                },
            ),
            ColumnSpec::new(
                "tr_date_time",
                ColumnType::DateTime {
                    format: "%Y.%m.%d %H:%M:%S".to_string(),
                },
            ),
            ColumnSpec::string("tr_type").with_index().with_length(2),
            ColumnSpec::new("tr_amount", ColumnType::Integer),
            ColumnSpec::string("tr_ccy").with_index().with_length(3),
            ColumnSpec::string("proc_code").with_index().with_length(2),
            ColumnSpec::string("mcc").with_index().with_length(4),
            ColumnSpec::new("reconciliation_amount", ColumnType::Integer).with_index(),
            ColumnSpec::string("reconciliation_ccy").with_index().with_length(3),
            ColumnSpec::new("interchange_fee_recon", ColumnType::Decimal(DecimalSpec::default())),
            ColumnSpec::new("total_interchange", ColumnType::Decimal(DecimalSpec::default())),
            ColumnSpec::new("total_scheme_fee", ColumnType::Decimal(DecimalSpec::default())),
        ]
    }

    fn uniqueness_key(&self) -> Vec<String> {
        vec![
            "tr_type".to_string(),
            "proc_code".to_string(),
            "reconciliation_amount".to_string(),
        ]
    }
}

/// Fee report files carry a stable per-file row identifier (the `id`
/// header cell, stored as `row_id`), so re-imports update in place
/// instead of appending.
pub struct FeesReportTable;

impl Instruction for FeesReportTable {
    fn uniqueness_key(&self) -> Vec<String> {
        vec!["file_name".to_string(), "row_id".to_string()]
    }
}
