//! Query/filter engine
//!
//! A query resolves the table's rows in base order, ANDs the view's saved
//! filters, the ad hoc filters and the search term, counts the matches, then
//! pages and projects them. Nothing is kept between calls.

use crate::cells::{CellRenderer, CellValue};
use crate::Engine;
use serde::Serialize;
use std::collections::HashMap;
use tabula_core::{
    AccountId, CellFilter, Column, ColumnId, EntityType, RowId, RowOrder, SearchTerm, TableId,
    TabulaError, TabulaResult, ViewId,
};
use tabula_storage::StorageTrait;
use tracing::debug;

// ============================================================================
// REQUEST / RESULT
// ============================================================================

/// Read request over one table.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub table_id: TableId,
    /// View supplying columns and saved filters; all columns when unset
    pub view_id: Option<ViewId>,
    /// Free-text search over searchable columns
    pub search: Option<String>,
    /// Ad hoc substring filters, ANDed with the view's
    pub filters: HashMap<ColumnId, String>,
    pub order: RowOrder,
    /// Page length; the configured page size when unset
    pub limit: Option<usize>,
    pub offset: usize,
}

impl QueryRequest {
    pub fn new(table_id: TableId) -> Self {
        Self {
            table_id,
            view_id: None,
            search: None,
            filters: HashMap::new(),
            order: RowOrder::default(),
            limit: None,
            offset: 0,
        }
    }

    pub fn with_view(mut self, view_id: ViewId) -> Self {
        self.view_id = Some(view_id);
        self
    }

    pub fn with_search(mut self, term: impl Into<String>) -> Self {
        self.search = Some(term.into());
        self
    }

    pub fn with_filter(mut self, column_id: ColumnId, value: impl Into<String>) -> Self {
        self.filters.insert(column_id, value.into());
        self
    }

    pub fn with_order(mut self, order: RowOrder) -> Self {
        self.order = order;
        self
    }

    pub fn with_page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }
}

/// One projected row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRow {
    pub row_id: RowId,
    pub number: i64,
    /// One value per result column, in column order
    pub cells: Vec<CellValue>,
}

/// Page of projected rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub columns: Vec<Column>,
    pub rows: Vec<ResultRow>,
    /// Matching rows before paging
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}

impl QueryResult {
    /// Cell of a result row by column id.
    pub fn cell<'a>(&self, row: &'a ResultRow, column_id: ColumnId) -> Option<&'a CellValue> {
        self.columns
            .iter()
            .position(|c| c.column_id == column_id)
            .and_then(|index| row.cells.get(index))
    }
}

// ============================================================================
// EXECUTION
// ============================================================================

impl<S: StorageTrait> Engine<S> {
    /// Run a query. See the module docs for the evaluation order.
    pub fn query(&self, account_id: AccountId, request: QueryRequest) -> TabulaResult<QueryResult> {
        let table_id = request.table_id;
        self.owned_table(account_id, table_id)?;
        let all_columns = self.storage.column_list_by_table(table_id)?;

        let (columns, mut filters) = match request.view_id {
            Some(view_id) => {
                let view = self.owned_view(account_id, view_id)?;
                if view.table_id != table_id {
                    return Err(TabulaError::not_found(EntityType::View, view_id));
                }
                let saved: Vec<CellFilter> = self
                    .storage
                    .filter_list(view_id)?
                    .into_iter()
                    .filter_map(|f| CellFilter::new(f.column_id, &f.value))
                    .collect();
                (self.projected_columns(&view)?, saved)
            }
            None => (all_columns.clone(), Vec::new()),
        };

        for (column_id, value) in &request.filters {
            if !all_columns.iter().any(|c| c.column_id == *column_id) {
                return Err(TabulaError::not_found(EntityType::Column, column_id));
            }
            filters.extend(CellFilter::new(*column_id, value));
        }
        let search = request
            .search
            .as_deref()
            .and_then(|raw| SearchTerm::parse(raw, self.config.search_row_number));

        let by_id: HashMap<ColumnId, &Column> =
            all_columns.iter().map(|c| (c.column_id, c)).collect();
        let searchable: Vec<&Column> = all_columns.iter().filter(|c| c.searchable).collect();
        let mut renderer = CellRenderer::new(self.storage(), &all_columns);

        let mut matched = Vec::new();
        for row in self.ordered_rows(table_id, request.order)? {
            let mut keep = true;
            for filter in &filters {
                let Some(column) = by_id.get(&filter.column_id) else {
                    continue;
                };
                if !filter.matches(&renderer.render(&row, column)?.render()) {
                    keep = false;
                    break;
                }
            }
            if keep {
                if let Some(term) = &search {
                    keep = term.matches_row_number(row.number);
                    for column in &searchable {
                        if keep {
                            break;
                        }
                        keep = term.matches_text(&renderer.render(&row, column)?.render());
                    }
                }
            }
            if keep {
                matched.push(row);
            }
        }

        let total = matched.len();
        let limit = self.config.clamp_limit(request.limit);
        let mut rows = Vec::with_capacity(limit.min(total));
        for row in matched.into_iter().skip(request.offset).take(limit) {
            let cells = columns
                .iter()
                .map(|column| renderer.render(&row, column))
                .collect::<TabulaResult<Vec<_>>>()?;
            rows.push(ResultRow {
                row_id: row.row_id,
                number: row.number,
                cells,
            });
        }

        debug!(
            table_id = %table_id,
            view_id = ?request.view_id,
            total,
            rows = rows.len(),
            "query executed"
        );
        Ok(QueryResult {
            columns,
            rows,
            total,
            offset: request.offset,
            limit,
        })
    }

    /// Run a query and collect every matching row, paging through at the
    /// configured maximum page size. The request's own paging is ignored.
    pub fn query_all(
        &self,
        account_id: AccountId,
        request: QueryRequest,
    ) -> TabulaResult<QueryResult> {
        let page_size = self.config.max_page_size;
        let mut result = self.query(account_id, request.clone().with_page(0, page_size))?;
        while result.rows.len() < result.total {
            let page = self.query(
                account_id,
                request.clone().with_page(result.rows.len(), page_size),
            )?;
            if page.rows.is_empty() {
                break;
            }
            result.rows.extend(page.rows);
        }

        result.total = result.rows.len();
        result.offset = 0;
        result.limit = result.total;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryStorage;
    use serde_json::json;
    use tabula_core::{ColumnKindSpec, EngineConfig, EntityIdType, FormulaToken};

    #[test]
    fn test_paging_and_total() {
        let engine = Engine::new(InMemoryStorage::new());
        let account = AccountId::now_v7();
        let (table, _) = engine.create_table(account, "Numbers").unwrap();
        for _ in 0..5 {
            engine.create_row(account, table.table_id).unwrap();
        }

        let result = engine
            .query(account, QueryRequest::new(table.table_id).with_page(1, 2))
            .unwrap();
        assert_eq!(result.total, 5);
        let numbers: Vec<_> = result.rows.iter().map(|r| r.number).collect();
        assert_eq!(numbers, vec![2, 3]);
    }

    #[test]
    fn test_limit_is_capped() {
        let engine = Engine::new(InMemoryStorage::new());
        let account = AccountId::now_v7();
        let (table, _) = engine.create_table(account, "Numbers").unwrap();
        let result = engine
            .query(account, QueryRequest::new(table.table_id).with_page(0, 1_000_000))
            .unwrap();
        assert_eq!(result.limit, engine.config().max_page_size);
    }

    #[test]
    fn test_query_all_pages_past_the_cap() {
        let config = EngineConfig {
            page_size: 2,
            max_page_size: 3,
            ..EngineConfig::default()
        };
        let engine = Engine::with_config(InMemoryStorage::new(), config).unwrap();
        let account = AccountId::now_v7();
        let (table, _) = engine.create_table(account, "Numbers").unwrap();
        for _ in 0..10 {
            engine.create_row(account, table.table_id).unwrap();
        }

        let capped = engine
            .query(account, QueryRequest::new(table.table_id).with_page(0, 100))
            .unwrap();
        assert_eq!(capped.rows.len(), 3);

        let all = engine
            .query_all(account, QueryRequest::new(table.table_id))
            .unwrap();
        assert_eq!(all.total, 10);
        let numbers: Vec<_> = all.rows.iter().map(|r| r.number).collect();
        assert_eq!(numbers, (1..=10).collect::<Vec<i64>>());
    }

    #[test]
    fn test_search_matches_row_number() {
        let engine = Engine::new(InMemoryStorage::new());
        let account = AccountId::now_v7();
        let (table, _) = engine.create_table(account, "Numbers").unwrap();
        for _ in 0..3 {
            engine.create_row(account, table.table_id).unwrap();
        }
        let result = engine
            .query(account, QueryRequest::new(table.table_id).with_search("2"))
            .unwrap();
        assert_eq!(result.total, 1);
        assert_eq!(result.rows[0].number, 2);
    }

    #[test]
    fn test_failing_formula_is_per_cell() {
        let engine = Engine::new(InMemoryStorage::new());
        let account = AccountId::now_v7();
        let (table, _) = engine.create_table(account, "Ratios").unwrap();
        let t = table.table_id;
        let a = engine.create_column(account, t, "A", ColumnKindSpec::Number).unwrap();
        let b = engine.create_column(account, t, "B", ColumnKindSpec::Number).unwrap();
        let ratio = engine
            .create_column(
                account,
                t,
                "Ratio",
                ColumnKindSpec::Formula {
                    tokens: vec![
                        FormulaToken::property(a.column_id),
                        FormulaToken::operator("/"),
                        FormulaToken::property(b.column_id),
                    ],
                },
            )
            .unwrap();

        for (x, y) in [(10, 2), (1, 0)] {
            let row = engine.create_row(account, t).unwrap();
            engine.set_cell(account, row.row_id, a.column_id, json!(x)).unwrap();
            engine.set_cell(account, row.row_id, b.column_id, json!(y)).unwrap();
        }

        let result = engine.query(account, QueryRequest::new(t)).unwrap();
        assert_eq!(result.rows.len(), 2);
        assert_eq!(
            result.cell(&result.rows[0], ratio.column_id).map(CellValue::to_json),
            Some(json!(5))
        );
        assert!(matches!(
            result.cell(&result.rows[1], ratio.column_id),
            Some(CellValue::FormulaError(_))
        ));
        assert_eq!(
            result.cell(&result.rows[1], a.column_id),
            Some(&CellValue::Stored(json!(1)))
        );
    }

    #[test]
    fn test_cell_borrows_from_row() {
        let engine = Engine::new(InMemoryStorage::new());
        let account = AccountId::now_v7();
        let (table, _) = engine.create_table(account, "T").unwrap();
        let name = engine
            .create_column(account, table.table_id, "Name", ColumnKindSpec::Text)
            .unwrap();
        let row = engine.create_row(account, table.table_id).unwrap();
        engine
            .set_cell(account, row.row_id, name.column_id, json!("Ada"))
            .unwrap();

        let result = engine.query(account, QueryRequest::new(table.table_id)).unwrap();
        let first = result.rows[0].clone();
        let cell = result.cell(&first, name.column_id);
        drop(result);
        assert_eq!(cell, Some(&CellValue::Stored(json!("Ada"))));
    }

    #[test]
    fn test_overflowing_formula_is_a_cell_error() {
        let engine = Engine::new(InMemoryStorage::new());
        let account = AccountId::now_v7();
        let (table, _) = engine.create_table(account, "Big").unwrap();
        let t = table.table_id;
        let size = engine.create_column(account, t, "Size", ColumnKindSpec::Number).unwrap();
        let scaled = engine
            .create_column(
                account,
                t,
                "Scaled",
                ColumnKindSpec::Formula {
                    tokens: vec![
                        FormulaToken::property(size.column_id),
                        FormulaToken::operator("*"),
                        FormulaToken::unit("10"),
                    ],
                },
            )
            .unwrap();
        let row = engine.create_row(account, t).unwrap();
        engine
            .set_cell(account, row.row_id, size.column_id, json!(1e308))
            .unwrap();

        let result = engine.query(account, QueryRequest::new(t)).unwrap();
        assert!(matches!(
            result.cell(&result.rows[0], scaled.column_id),
            Some(CellValue::FormulaError(_))
        ));
        let searched = engine
            .query(account, QueryRequest::new(t).with_search("inf"))
            .unwrap();
        assert_eq!(searched.total, 0);
    }

    #[test]
    fn test_unknown_ad_hoc_filter_column() {
        let engine = Engine::new(InMemoryStorage::new());
        let account = AccountId::now_v7();
        let (table, _) = engine.create_table(account, "T").unwrap();
        let err = engine
            .query(
                account,
                QueryRequest::new(table.table_id).with_filter(ColumnId::now_v7(), "x"),
            )
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
