//! TABULA Test Utilities
//!
//! Centralized test infrastructure for the TABULA workspace:
//! - Engines over both storage backends
//! - Proptest generators for column kinds, cell values and formulas
//! - Test fixtures for common scenarios (the "Devices" table)
//! - Custom assertions for TABULA-specific validation

// Re-export storage backends from their source crate
pub use tabula_storage::{InMemoryStorage, SqliteStorage, StorageTrait};

// Re-export core types for convenience
pub use tabula_core::{
    AccountId, CellMap, Column, ColumnId, ColumnKind, ColumnKindSpec, ColumnType, EngineConfig,
    EntityIdType, EntityType, FormulaToken, Row, RowId, TableId, TabulaError, TabulaResult,
    ValidationError, View, ViewId,
};
pub use tabula_engine::Engine;

use tempfile::TempDir;

// ============================================================================
// ENGINES
// ============================================================================

/// Engine over a fresh in-memory store.
pub fn memory_engine() -> Engine<InMemoryStorage> {
    Engine::new(InMemoryStorage::new())
}

/// Engine over a fresh SQLite file. Keep the returned directory alive for as
/// long as the engine is used.
pub fn sqlite_engine() -> TabulaResult<(Engine<SqliteStorage>, TempDir)> {
    let dir = tempfile::tempdir().map_err(TabulaError::backend)?;
    let storage = SqliteStorage::open(dir.path().join("tabula.sqlite"))?;
    Ok((Engine::new(storage), dir))
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for TABULA inputs.

    use super::*;
    use proptest::prelude::*;
    use serde_json::Value;

    /// Generate a name that survives trimming and fits the default limit.
    pub fn arb_name() -> impl Strategy<Value = String> {
        "[A-Za-z][A-Za-z0-9 ]{0,30}".prop_map(|s| s.trim().to_string())
    }

    /// Generate a kind that stores cell values.
    pub fn arb_value_kind() -> impl Strategy<Value = ColumnKind> {
        prop_oneof![
            Just(ColumnKind::Text),
            Just(ColumnKind::Number),
            Just(ColumnKind::Date),
            Just(ColumnKind::Select),
        ]
    }

    /// Generate a value that `set_cell` accepts for `kind`.
    pub fn arb_cell_value(kind: ColumnKind) -> BoxedStrategy<Value> {
        match kind {
            ColumnKind::Number => prop_oneof![
                (-1_000_000i64..1_000_000).prop_map(Value::from),
                (-1000.0f64..1000.0).prop_map(|f| Value::from((f * 100.0).round() / 100.0)),
            ]
            .boxed(),
            ColumnKind::Date => (1990i32..2100, 1u32..=12, 1u32..=28)
                .prop_map(|(y, m, d)| Value::from(format!("{:04}-{:02}-{:02}", y, m, d)))
                .boxed(),
            ColumnKind::Select => "[A-Za-z]{1,8}".prop_map(Value::from).boxed(),
            _ => "[a-z ]{1,16}".prop_map(Value::from).boxed(),
        }
    }

    /// Generate a well-formed arithmetic token sequence over `columns`.
    pub fn arb_formula_tokens(columns: Vec<ColumnId>) -> impl Strategy<Value = Vec<FormulaToken>> {
        let operand = if columns.is_empty() {
            (1u32..100).prop_map(|n| FormulaToken::unit(n.to_string())).boxed()
        } else {
            prop_oneof![
                (1u32..100).prop_map(|n| FormulaToken::unit(n.to_string())),
                proptest::sample::select(columns).prop_map(FormulaToken::property),
            ]
            .boxed()
        };
        let op = proptest::sample::select(vec!["+", "-", "*"]).prop_map(FormulaToken::operator);

        (operand.clone(), prop::collection::vec((op, operand), 0..5)).prop_map(|(first, rest)| {
            let mut tokens = vec![first];
            for (op, operand) in rest {
                tokens.push(op);
                tokens.push(operand);
            }
            tokens
        })
    }

    /// Generate a valid engine configuration.
    pub fn arb_valid_config() -> impl Strategy<Value = EngineConfig> {
        (1usize..500, 0usize..1000, any::<bool>()).prop_map(|(page, extra, search_row_number)| {
            EngineConfig {
                page_size: page,
                max_page_size: page + extra,
                search_row_number,
                ..EngineConfig::default()
            }
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built scenarios.

    use super::*;
    use serde_json::json;

    /// The "Devices" table: Color (text), Size (number) and a `Size * 2`
    /// formula, with rows (Red, 10) and (Blue, 20).
    #[derive(Debug, Clone)]
    pub struct Devices {
        pub account_id: AccountId,
        pub table_id: TableId,
        pub default_view: View,
        pub color: Column,
        pub size: Column,
        pub double: Column,
        pub rows: Vec<Row>,
    }

    impl Devices {
        pub fn create<S: StorageTrait>(engine: &Engine<S>) -> TabulaResult<Self> {
            let account_id = AccountId::now_v7();
            let (table, default_view) = engine.create_table(account_id, "Devices")?;
            let table_id = table.table_id;

            let color = engine.create_column(account_id, table_id, "Color", ColumnKindSpec::Text)?;
            let size = engine.create_column(account_id, table_id, "Size", ColumnKindSpec::Number)?;
            let double = engine.create_column(
                account_id,
                table_id,
                "Double",
                ColumnKindSpec::Formula {
                    tokens: vec![
                        FormulaToken::property(size.column_id),
                        FormulaToken::operator("*"),
                        FormulaToken::unit("2"),
                    ],
                },
            )?;

            let mut rows = Vec::new();
            for (c, s) in [("Red", 10), ("Blue", 20)] {
                let row = engine.create_row(account_id, table_id)?;
                engine.set_cell(account_id, row.row_id, color.column_id, json!(c))?;
                rows.push(engine.set_cell(account_id, row.row_id, size.column_id, json!(s))?);
            }

            Ok(Self {
                account_id,
                table_id,
                default_view,
                color,
                size,
                double,
                rows,
            })
        }
    }

    /// A table with one text column holding `values`, one row each.
    pub fn text_table<S: StorageTrait>(
        engine: &Engine<S>,
        account_id: AccountId,
        values: &[&str],
    ) -> TabulaResult<(TableId, Column)> {
        let (table, _) = engine.create_table(account_id, "Grades")?;
        let column =
            engine.create_column(account_id, table.table_id, "Grade", ColumnKindSpec::Text)?;
        for value in values {
            let row = engine.create_row(account_id, table.table_id)?;
            engine.set_cell(account_id, row.row_id, column.column_id, json!(value))?;
        }
        Ok((table.table_id, column))
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertion helpers for TABULA results.

    use super::*;

    /// Assert that a result is a NotFound error for `entity_type`.
    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &TabulaResult<T>, entity_type: EntityType) {
        match result {
            Err(TabulaError::NotFound { entity_type: et, .. }) => {
                assert_eq!(*et, entity_type, "Wrong entity type in NotFound error");
            }
            other => panic!("Expected NotFound error for {:?}, got: {:?}", entity_type, other),
        }
    }

    /// Assert that a result is a Validation error.
    #[track_caller]
    pub fn assert_validation_error<T: std::fmt::Debug>(result: &TabulaResult<T>) {
        match result {
            Err(TabulaError::Validation(_)) => {}
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }

    /// Assert that a result is a DuplicateName error for `entity_type`.
    #[track_caller]
    pub fn assert_duplicate_name<T: std::fmt::Debug>(
        result: &TabulaResult<T>,
        entity_type: EntityType,
    ) {
        match result {
            Err(TabulaError::Validation(ValidationError::DuplicateName {
                entity_type: et, ..
            })) => assert_eq!(*et, entity_type),
            other => panic!("Expected DuplicateName for {:?}, got: {:?}", entity_type, other),
        }
    }

    /// Assert that a result is a DuplicateEdge error.
    #[track_caller]
    pub fn assert_duplicate_edge<T: std::fmt::Debug>(result: &TabulaResult<T>) {
        match result {
            Err(TabulaError::DuplicateEdge { .. }) => {}
            other => panic!("Expected DuplicateEdge error, got: {:?}", other),
        }
    }

    /// Assert that rows carry exactly the given row numbers, in order.
    #[track_caller]
    pub fn assert_row_numbers(rows: &[Row], expected: &[i64]) {
        let numbers: Vec<i64> = rows.iter().map(|r| r.number).collect();
        assert_eq!(numbers, expected, "Unexpected row numbers");
    }
}

// ============================================================================
// TESTS
// ============================================================================
