//! Row store
//!
//! Rows hold a schemaless bag of column-id to value pairs. Writes go through
//! [`Engine::set_cell`], which validates the value against the column kind and
//! persists one cell at a time.

use crate::cells::CellRenderer;
use crate::Engine;
use chrono::NaiveDate;
use serde_json::Value;
use std::cmp::Ordering;
use tabula_core::{
    now, number_to_json, numeric_value, render_text, AccountId, CellMap, Column, ColumnId,
    ColumnType, EntityIdType, EntityType, Row, RowId, RowOrder, TableId, TabulaError,
    TabulaResult, ValidationError,
};
use tabula_storage::{CellWrite, NewRow, StorageTrait};
use tracing::{debug, info};

const DATE_FORMAT: &str = "%Y-%m-%d";

impl<S: StorageTrait> Engine<S> {
    /// Create an empty row with the next row number of its table.
    pub fn create_row(&self, account_id: AccountId, table_id: TableId) -> TabulaResult<Row> {
        self.owned_table(account_id, table_id)?;
        let row = self.storage.row_insert(&NewRow {
            row_id: RowId::now_v7(),
            table_id,
            created_at: now(),
        })?;
        debug!(table_id = %table_id, row_id = %row.row_id, number = row.number, "row created");
        Ok(row)
    }

    pub fn get_row(&self, account_id: AccountId, row_id: RowId) -> TabulaResult<Row> {
        self.owned_row(account_id, row_id)
    }

    /// The row's value bag as stored, stale keys included.
    pub fn get_all_cells(&self, account_id: AccountId, row_id: RowId) -> TabulaResult<CellMap> {
        Ok(self.owned_row(account_id, row_id)?.cells)
    }

    /// Write one cell. `null` clears it.
    ///
    /// Values are checked against the column kind: numbers accept JSON numbers
    /// and numeric strings, dates accept `YYYY-MM-DD`, select values are added
    /// to the allowed set when new. Linked-row and formula columns cannot be
    /// written.
    pub fn set_cell(
        &self,
        account_id: AccountId,
        row_id: RowId,
        column_id: ColumnId,
        value: Value,
    ) -> TabulaResult<Row> {
        let row = self.owned_row(account_id, row_id)?;
        let column = self.owned_column(account_id, column_id)?;
        if column.table_id != row.table_id {
            return Err(TabulaError::invalid_value(
                "column_id",
                "column does not belong to the row's table",
            ));
        }
        if !column.editable {
            return Err(TabulaError::Validation(ValidationError::ConstraintViolation {
                constraint: "editable".to_string(),
                reason: format!("column {:?} is read-only", column.name),
            }));
        }

        let stored = normalize_cell(&column, value)?;
        let added = self.storage.row_set_cell(&CellWrite {
            row_id,
            column_id,
            kind: column.kind(),
            value: stored.as_ref(),
            updated_at: now(),
        })?;
        if added {
            info!(column_id = %column_id, "select option added");
        }
        self.owned_row(account_id, row_id)
    }

    /// All rows of a table in the requested order.
    pub fn scan_rows(
        &self,
        account_id: AccountId,
        table_id: TableId,
        order: RowOrder,
    ) -> TabulaResult<Vec<Row>> {
        self.owned_table(account_id, table_id)?;
        let rows = self.ordered_rows(table_id, order)?;
        debug!(table_id = %table_id, rows = rows.len(), "scanned rows");
        Ok(rows)
    }

    /// Delete a row and every edge touching it.
    pub fn delete_row(&self, account_id: AccountId, row_id: RowId) -> TabulaResult<()> {
        self.owned_row(account_id, row_id)?;
        self.storage.row_delete(row_id)?;
        debug!(row_id = %row_id, "row deleted");
        Ok(())
    }

    /// Rows of a table whose stored value under the column equals `value`.
    pub fn find_rows_by_cell(
        &self,
        account_id: AccountId,
        table_id: TableId,
        column_id: ColumnId,
        value: &Value,
    ) -> TabulaResult<Vec<Row>> {
        self.owned_table(account_id, table_id)?;
        let column = self.owned_column(account_id, column_id)?;
        if column.table_id != table_id {
            return Err(TabulaError::not_found(EntityType::Column, column_id));
        }
        self.storage
            .row_find_by_cell(table_id, &column.cell_key(), value)
    }

    /// Rows of a table in `order`, without the ownership check.
    pub(crate) fn ordered_rows(&self, table_id: TableId, order: RowOrder) -> TabulaResult<Vec<Row>> {
        let mut rows = self.storage.row_list_by_table(table_id)?;
        match order {
            RowOrder::Created => {}
            RowOrder::CreatedDesc => rows.reverse(),
            RowOrder::Column {
                column_id,
                descending,
            } => {
                let column = self
                    .storage
                    .column_get(column_id)?
                    .filter(|c| c.table_id == table_id)
                    .ok_or_else(|| TabulaError::not_found(EntityType::Column, column_id))?;
                rows = sort_by_column(self.storage(), rows, &column, descending)?;
            }
        }
        Ok(rows)
    }
}

/// Stable sort by rendered value; numeric-aware for number and formula
/// columns, unset cells last in both directions.
fn sort_by_column<S: StorageTrait>(
    storage: &S,
    rows: Vec<Row>,
    column: &Column,
    descending: bool,
) -> TabulaResult<Vec<Row>> {
    let mut renderer = CellRenderer::new(storage, std::slice::from_ref(column));
    let numeric = matches!(
        column.column_type,
        ColumnType::Number | ColumnType::Formula { .. }
    );

    let mut keyed = Vec::with_capacity(rows.len());
    for row in rows {
        let cell = renderer.render(&row, column)?;
        let text = cell.render();
        let number = if numeric { cell.sort_number() } else { None };
        keyed.push(((text.is_empty(), number, text.to_lowercase()), row));
    }

    keyed.sort_by(|(a, _), (b, _)| {
        let (a_unset, a_num, a_text) = a;
        let (b_unset, b_num, b_text) = b;
        if a_unset != b_unset {
            return a_unset.cmp(b_unset);
        }
        let ord = match (a_num, b_num) {
            (Some(x), Some(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
            _ => a_text.cmp(b_text),
        };
        if descending {
            ord.reverse()
        } else {
            ord
        }
    });
    Ok(keyed.into_iter().map(|(_, row)| row).collect())
}

/// Check a value against the column kind and produce what gets stored.
/// `None` clears the cell.
fn normalize_cell(column: &Column, value: Value) -> TabulaResult<Option<Value>> {
    if value.is_null() {
        return Ok(None);
    }
    let kind = column.kind();
    let blank = matches!(&value, Value::String(s) if s.trim().is_empty());

    match &column.column_type {
        ColumnType::Text => match value {
            Value::Array(_) | Value::Object(_) => Err(TabulaError::invalid_value(
                "value",
                "text cells hold a single value",
            )),
            scalar => Ok(Some(scalar)),
        },
        ColumnType::Number if blank => Ok(None),
        ColumnType::Number => numeric_value(&value)
            .and_then(number_to_json)
            .map(Some)
            .ok_or_else(|| {
                TabulaError::invalid_value("value", format!("{} is not a number", value))
            }),
        ColumnType::Date if blank => Ok(None),
        ColumnType::Date => {
            let text = value.as_str().map(str::trim).unwrap_or_default();
            NaiveDate::parse_from_str(text, DATE_FORMAT)
                .map(|date| Some(Value::String(date.format(DATE_FORMAT).to_string())))
                .map_err(|_| {
                    TabulaError::invalid_value("value", format!("{} is not a YYYY-MM-DD date", value))
                })
        }
        ColumnType::Select { .. } if blank => Ok(None),
        ColumnType::Select { .. } => match value {
            Value::Array(_) | Value::Object(_) => Err(TabulaError::invalid_value(
                "value",
                "select cells hold a single option",
            )),
            scalar => Ok(Some(Value::String(render_text(&scalar).trim().to_string()))),
        },
        ColumnType::LinkedRow { .. } | ColumnType::Formula { .. } => Err(TabulaError::invalid_value(
            "column_id",
            format!("{} cells cannot be written directly", kind),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryStorage;
    use tabula_core::{ColumnKindSpec, FormulaToken};
    use serde_json::json;

    fn setup() -> (Engine<InMemoryStorage>, AccountId, TableId) {
        let engine = Engine::new(InMemoryStorage::new());
        let account = AccountId::now_v7();
        let (table, _) = engine.create_table(account, "Devices").unwrap();
        (engine, account, table.table_id)
    }

    #[test]
    fn test_rows_are_numbered() {
        let (engine, account, table) = setup();
        let a = engine.create_row(account, table).unwrap();
        let b = engine.create_row(account, table).unwrap();
        assert_eq!((a.number, b.number), (1, 2));
        assert!(a.cells.is_empty());
    }

    #[test]
    fn test_number_cells() {
        let (engine, account, table) = setup();
        let size = engine.create_column(account, table, "Size", ColumnKindSpec::Number).unwrap();
        let row = engine.create_row(account, table).unwrap();

        let row2 = engine.set_cell(account, row.row_id, size.column_id, json!("12.50")).unwrap();
        assert_eq!(row2.cell(&size.column_id), Some(&json!(12.5)));
        let row3 = engine.set_cell(account, row.row_id, size.column_id, json!("7")).unwrap();
        assert_eq!(row3.cell(&size.column_id), Some(&json!(7)));

        let err = engine.set_cell(account, row.row_id, size.column_id, json!("big"));
        assert!(err.unwrap_err().is_validation());

        let cleared = engine.set_cell(account, row.row_id, size.column_id, Value::Null).unwrap();
        assert!(cleared.cells.is_empty());
    }

    #[test]
    fn test_date_cells() {
        let (engine, account, table) = setup();
        let due = engine.create_column(account, table, "Due", ColumnKindSpec::Date).unwrap();
        let row = engine.create_row(account, table).unwrap();

        let ok = engine.set_cell(account, row.row_id, due.column_id, json!("2024-02-29")).unwrap();
        assert_eq!(ok.cell(&due.column_id), Some(&json!("2024-02-29")));
        for bad in [json!("2023-02-29"), json!("29/02/2024"), json!(20240229)] {
            assert!(engine.set_cell(account, row.row_id, due.column_id, bad).is_err());
        }
    }

    #[test]
    fn test_select_extends_allowed_values() {
        let (engine, account, table) = setup();
        let color = engine.create_column(account, table, "Color", ColumnKindSpec::Select).unwrap();
        let a = engine.create_row(account, table).unwrap();
        let b = engine.create_row(account, table).unwrap();

        engine.set_cell(account, a.row_id, color.column_id, json!("Red")).unwrap();
        engine.set_cell(account, b.row_id, color.column_id, json!("Red")).unwrap();
        engine.set_cell(account, b.row_id, color.column_id, json!(" Blue ")).unwrap();

        assert_eq!(
            engine.allowed_values(account, color.column_id).unwrap(),
            vec!["Red".to_string(), "Blue".to_string()]
        );
    }

    #[test]
    fn test_computed_columns_reject_writes() {
        let (engine, account, table) = setup();
        let size = engine.create_column(account, table, "Size", ColumnKindSpec::Number).unwrap();
        let double = engine
            .create_column(
                account,
                table,
                "Double",
                ColumnKindSpec::Formula {
                    tokens: vec![
                        FormulaToken::property(size.column_id),
                        FormulaToken::operator("*"),
                        FormulaToken::unit("2"),
                    ],
                },
            )
            .unwrap();
        let row = engine.create_row(account, table).unwrap();
        let err = engine.set_cell(account, row.row_id, double.column_id, json!(3));
        assert!(err.unwrap_err().is_validation());
    }

    #[test]
    fn test_column_from_other_table_rejected() {
        let (engine, account, table) = setup();
        let (other, _) = engine.create_table(account, "People").unwrap();
        let name = engine.create_column(account, other.table_id, "Name", ColumnKindSpec::Text).unwrap();
        let row = engine.create_row(account, table).unwrap();
        let err = engine.set_cell(account, row.row_id, name.column_id, json!("x"));
        assert!(err.unwrap_err().is_validation());
    }

    #[test]
    fn test_scan_orders() {
        let (engine, account, table) = setup();
        let size = engine.create_column(account, table, "Size", ColumnKindSpec::Number).unwrap();
        for value in [json!(10), json!(9), Value::Null, json!(100)] {
            let row = engine.create_row(account, table).unwrap();
            engine.set_cell(account, row.row_id, size.column_id, value).unwrap();
        }

        let numbers = |order| -> Vec<i64> {
            engine
                .scan_rows(account, table, order)
                .unwrap()
                .into_iter()
                .map(|r| r.number)
                .collect()
        };
        assert_eq!(numbers(RowOrder::Created), vec![1, 2, 3, 4]);
        assert_eq!(numbers(RowOrder::CreatedDesc), vec![4, 3, 2, 1]);
        assert_eq!(
            numbers(RowOrder::Column {
                column_id: size.column_id,
                descending: false
            }),
            vec![2, 1, 4, 3]
        );
        assert_eq!(
            numbers(RowOrder::Column {
                column_id: size.column_id,
                descending: true
            }),
            vec![4, 1, 2, 3]
        );
    }

    #[test]
    fn test_find_rows_by_cell() {
        let (engine, account, table) = setup();
        let serial = engine.create_column(account, table, "Serial", ColumnKindSpec::Text).unwrap();
        let a = engine.create_row(account, table).unwrap();
        let b = engine.create_row(account, table).unwrap();
        engine.set_cell(account, a.row_id, serial.column_id, json!("SN-1")).unwrap();
        engine.set_cell(account, b.row_id, serial.column_id, json!("SN-2")).unwrap();

        let found = engine
            .find_rows_by_cell(account, table, serial.column_id, &json!("SN-2"))
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].row_id, b.row_id);
    }
}
