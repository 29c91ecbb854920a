//! Cell rendering
//!
//! A [`CellRenderer`] is built once per read over a fixed column set. It
//! compiles every formula column up front and resolves linked-row columns
//! from outgoing edges, then turns each row into one [`CellValue`] per column.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use tabula_core::{
    render_text, Column, ColumnId, ColumnType, FormulaError, Row, RowId, TableId, TabulaResult,
};
use tabula_formula::{Formula, FormulaValue};
use tabula_storage::StorageTrait;
use tracing::warn;

/// Display value of one cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CellValue {
    /// Nothing stored
    Empty,
    /// Stored value, as written
    Stored(Value),
    /// Linked-row cell: numbers of the target rows
    Links(Vec<i64>),
    /// Formula result
    Computed(FormulaValue),
    /// Formula failure, recovered for this cell only
    FormulaError(String),
}

impl CellValue {
    /// Text used for filters and search. Formula failures render empty.
    pub fn render(&self) -> String {
        match self {
            CellValue::Empty | CellValue::FormulaError(_) => String::new(),
            CellValue::Stored(value) => render_text(value),
            CellValue::Links(numbers) => numbers
                .iter()
                .map(i64::to_string)
                .collect::<Vec<_>>()
                .join(", "),
            CellValue::Computed(value) => value.render(),
        }
    }

    /// JSON form of the value. Empty cells and formula failures are `null`.
    pub fn to_json(&self) -> Value {
        match self {
            CellValue::Empty | CellValue::FormulaError(_) => Value::Null,
            CellValue::Stored(value) => value.clone(),
            CellValue::Links(numbers) => Value::from(numbers.clone()),
            CellValue::Computed(value) => value.to_json(),
        }
    }

    /// Numeric reading used when ordering by a number or formula column.
    pub(crate) fn sort_number(&self) -> Option<f64> {
        match self {
            CellValue::Stored(value) => tabula_core::numeric_value(value),
            CellValue::Computed(value) => value.as_number(),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }
}

/// Renders rows for a fixed set of columns.
pub(crate) struct CellRenderer<'a, S: StorageTrait> {
    storage: &'a S,
    formulas: HashMap<ColumnId, Result<Formula, FormulaError>>,
    /// Row numbers of each linked target table, loaded on first use.
    target_numbers: HashMap<TableId, HashMap<RowId, i64>>,
}

impl<'a, S: StorageTrait> CellRenderer<'a, S> {
    pub fn new(storage: &'a S, columns: &[Column]) -> Self {
        let formulas = columns
            .iter()
            .filter_map(|c| {
                c.column_type
                    .formula_tokens()
                    .map(|tokens| (c.column_id, Formula::compile(tokens)))
            })
            .collect();
        Self {
            storage,
            formulas,
            target_numbers: HashMap::new(),
        }
    }

    pub fn render(&mut self, row: &Row, column: &Column) -> TabulaResult<CellValue> {
        match &column.column_type {
            ColumnType::Formula { .. } => Ok(self.compute(row, column)),
            ColumnType::LinkedRow { target_table_id } => {
                self.linked_numbers(row, column.column_id, *target_table_id)
            }
            _ => Ok(match row.cell(&column.column_id) {
                Some(value) => CellValue::Stored(value.clone()),
                None => CellValue::Empty,
            }),
        }
    }

    fn compute(&self, row: &Row, column: &Column) -> CellValue {
        let result = match self.formulas.get(&column.column_id) {
            Some(Ok(formula)) => formula.evaluate(&row.cells),
            Some(Err(err)) => Err(err.clone()),
            None => return CellValue::Empty,
        };
        match result {
            Ok(value) => CellValue::Computed(value),
            Err(err) => {
                warn!(
                    row_id = %row.row_id,
                    column_id = %column.column_id,
                    error = %err,
                    "formula cell failed to evaluate"
                );
                CellValue::FormulaError(err.to_string())
            }
        }
    }

    fn linked_numbers(
        &mut self,
        row: &Row,
        column_id: ColumnId,
        target_table_id: TableId,
    ) -> TabulaResult<CellValue> {
        let links = self.storage.link_outgoing(row.row_id, Some(column_id))?;
        if links.is_empty() {
            return Ok(CellValue::Links(Vec::new()));
        }
        if !self.target_numbers.contains_key(&target_table_id) {
            let numbers = self
                .storage
                .row_list_by_table(target_table_id)?
                .into_iter()
                .map(|r| (r.row_id, r.number))
                .collect();
            self.target_numbers.insert(target_table_id, numbers);
        }
        let numbers = &self.target_numbers[&target_table_id];
        Ok(CellValue::Links(
            links
                .iter()
                .filter_map(|link| numbers.get(&link.target_row_id).copied())
                .collect(),
        ))
    }
}
