//! Property tests for view and cell invariants.

use proptest::prelude::*;
use tabula_engine::QueryRequest;
use tabula_test_utils::generators::*;
use tabula_test_utils::*;

fn kind_spec(kind: ColumnKind) -> ColumnKindSpec {
    match kind {
        ColumnKind::Number => ColumnKindSpec::Number,
        ColumnKind::Date => ColumnKindSpec::Date,
        ColumnKind::Select => ColumnKindSpec::Select,
        _ => ColumnKindSpec::Text,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Reordering one view leaves other views and canonical positions alone.
    #[test]
    fn prop_reorder_is_view_local(
        column_count in 1usize..6,
        picks in prop::collection::vec(0usize..8, 0..8),
    ) {
        let engine = memory_engine();
        let account = AccountId::now_v7();
        let (table, view_a) = engine.create_table(account, "T").unwrap();
        let mut columns = Vec::new();
        for i in 0..column_count {
            columns.push(
                engine
                    .create_column(account, table.table_id, &format!("C{}", i), ColumnKindSpec::Text)
                    .unwrap(),
            );
        }
        let view_b = engine.create_view(account, table.table_id, "B").unwrap();
        let before_b = engine.view_columns(account, view_b.view_id).unwrap();

        let request: Vec<String> = picks
            .iter()
            .map(|i| match columns.get(*i) {
                Some(c) => c.column_id.to_string(),
                None => format!("junk-{}", i),
            })
            .collect();
        let entries = engine
            .reorder_view_columns(account, view_a.view_id, &request)
            .unwrap();

        let mut positions: Vec<i32> = entries.iter().map(|e| e.position).collect();
        positions.sort_unstable();
        prop_assert_eq!(positions, (0..column_count as i32).collect::<Vec<_>>());
        prop_assert_eq!(engine.view_columns(account, view_b.view_id).unwrap(), before_b);
        for (i, column) in columns.iter().enumerate() {
            let stored = engine.get_column(account, column.column_id).unwrap();
            prop_assert_eq!(stored.position, i as i32);
        }
    }

    /// Accepted cell values render as non-empty text and survive a query.
    #[test]
    fn prop_accepted_values_are_queryable(
        (kind, value) in arb_value_kind().prop_flat_map(|k| (Just(k), arb_cell_value(k))),
        name in arb_name(),
    ) {
        let engine = memory_engine();
        let account = AccountId::now_v7();
        let (table, _) = engine.create_table(account, &name).unwrap();
        let column = engine
            .create_column(account, table.table_id, &name, kind_spec(kind))
            .unwrap();
        let row = engine.create_row(account, table.table_id).unwrap();
        let stored = engine.set_cell(account, row.row_id, column.column_id, value);
        prop_assert!(stored.is_ok(), "{:?}", stored);

        let result = engine
            .query(account, QueryRequest::new(table.table_id))
            .unwrap();
        prop_assert_eq!(result.total, 1);
        let rendered = result.cell(&result.rows[0], column.column_id).unwrap().render();
        prop_assert!(!rendered.is_empty());
    }
}
