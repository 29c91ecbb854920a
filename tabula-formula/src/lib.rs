//! TABULA Formula - computed column compiler and evaluator
//!
//! Stored formulas are token sequences (see [`tabula_core::FormulaToken`]).
//! They compile straight into an [`Expr`] tree; there is no intermediate
//! textual form. Evaluation is row-local and stateless: every call reads the
//! row's current value bag, so results track cell updates with no cache to
//! invalidate.

pub mod ast;
pub mod compiler;
pub mod eval;
pub mod lexer;

pub use ast::{BinaryOp, Expr};
pub use compiler::{compile, Compiler, MAX_DEPTH};
pub use eval::{evaluate, FormulaValue};
pub use lexer::{source_from_tokens, tokens_from_source, Lexer, Span, Token, TokenKind};

use tabula_core::{CellMap, ColumnId, FormulaError, FormulaToken};

/// A compiled formula ready for evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    expr: Expr,
    references: Vec<ColumnId>,
}

impl Formula {
    /// Compile a stored token sequence.
    pub fn compile(tokens: &[FormulaToken]) -> Result<Self, FormulaError> {
        let expr = compile(tokens)?;
        let references = expr.referenced_columns();
        Ok(Self { expr, references })
    }

    /// Compile from source text, resolving column names through `resolve`.
    pub fn from_source<F>(source: &str, resolve: F) -> Result<(Self, Vec<FormulaToken>), FormulaError>
    where
        F: FnMut(&str) -> Option<ColumnId>,
    {
        let tokens = tokens_from_source(source, resolve)?;
        let formula = Self::compile(&tokens)?;
        Ok((formula, tokens))
    }

    /// Columns this formula reads, in first-seen order.
    pub fn references(&self) -> &[ColumnId] {
        &self.references
    }

    pub fn evaluate(&self, cells: &CellMap) -> Result<FormulaValue, FormulaError> {
        evaluate(&self.expr, cells)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tabula_core::EntityIdType;

    #[test]
    fn test_formula_reflects_updated_cells() {
        let size = ColumnId::now_v7();
        let formula = Formula::compile(&[
            FormulaToken::property(size),
            FormulaToken::operator("*"),
            FormulaToken::unit("2"),
        ])
        .unwrap();
        assert_eq!(formula.references(), &[size]);

        let mut cells = CellMap::new();
        cells.insert(size.cell_key(), json!(10));
        assert_eq!(formula.evaluate(&cells).unwrap().to_json(), json!(20));

        cells.insert(size.cell_key(), json!(21));
        assert_eq!(formula.evaluate(&cells).unwrap().to_json(), json!(42));
    }

    #[test]
    fn test_from_source() {
        let price = ColumnId::now_v7();
        let qty = ColumnId::now_v7();
        let (formula, tokens) = Formula::from_source("[Price] * Qty - 1", |name| match name {
            "Price" => Some(price),
            "Qty" => Some(qty),
            _ => None,
        })
        .unwrap();
        assert_eq!(tokens.len(), 5);
        assert_eq!(formula.references(), &[price, qty]);

        let mut cells = CellMap::new();
        cells.insert(price.cell_key(), json!("2.5"));
        cells.insert(qty.cell_key(), json!(4));
        assert_eq!(formula.evaluate(&cells).unwrap().to_json(), json!(9));
    }
}
