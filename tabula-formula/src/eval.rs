//! Row-local formula evaluation

use crate::ast::{BinaryOp, Expr};
use serde::Serialize;
use serde_json::Value;
use tabula_core::{format_number, number_to_json, render_text, CellMap, ColumnId, FormulaError};

/// Result of evaluating a formula against one row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FormulaValue {
    Number(f64),
    Text(String),
}

impl FormulaValue {
    /// Stored/display JSON form. Integral numbers become JSON integers.
    pub fn to_json(&self) -> Value {
        match self {
            FormulaValue::Number(n) => number_to_json(*n).unwrap_or(Value::Null),
            FormulaValue::Text(s) => Value::String(s.clone()),
        }
    }

    pub fn render(&self) -> String {
        match self {
            FormulaValue::Number(n) => format_number(*n),
            FormulaValue::Text(s) => s.clone(),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            FormulaValue::Number(n) => Some(*n),
            FormulaValue::Text(_) => None,
        }
    }
}

/// Evaluate an expression against a row's current value bag.
pub fn evaluate(expr: &Expr, cells: &CellMap) -> Result<FormulaValue, FormulaError> {
    match expr {
        Expr::Number(n) => Ok(FormulaValue::Number(*n)),
        Expr::Column(column_id) => substitute(column_id, cells),
        Expr::Negate(inner) => Ok(FormulaValue::Number(-evaluate_number(inner, cells)?)),
        Expr::Binary { op, left, right } => {
            let left = evaluate_number(left, cells)?;
            let right = evaluate_number(right, cells)?;
            apply(*op, left, right).map(FormulaValue::Number)
        }
        Expr::Concat(parts) => {
            let mut rendered = Vec::with_capacity(parts.len());
            for part in parts {
                rendered.push(evaluate(part, cells)?.render());
            }
            Ok(FormulaValue::Text(rendered.join(" ")))
        }
    }
}

fn evaluate_number(expr: &Expr, cells: &CellMap) -> Result<f64, FormulaError> {
    match evaluate(expr, cells)? {
        FormulaValue::Number(n) => Ok(n),
        FormulaValue::Text(text) => Err(FormulaError::NonNumericOperand {
            column: operand_label(expr),
            value: text,
        }),
    }
}

/// Apply one operator. Results outside the finite range are errors.
fn apply(op: BinaryOp, left: f64, right: f64) -> Result<f64, FormulaError> {
    let result = match op {
        BinaryOp::Add => left + right,
        BinaryOp::Sub => left - right,
        BinaryOp::Mul => left * right,
        BinaryOp::Div => {
            if right == 0.0 {
                return Err(FormulaError::DivisionByZero);
            }
            left / right
        }
    };
    if result.is_finite() {
        Ok(result)
    } else {
        Err(FormulaError::Overflow)
    }
}

/// Read one referenced column from the bag.
///
/// Numbers and numeric strings substitute as numbers; other text stays text.
/// Missing, null and blank values are errors.
fn substitute(column_id: &ColumnId, cells: &CellMap) -> Result<FormulaValue, FormulaError> {
    let missing = || FormulaError::MissingOperand {
        column: column_id.to_string(),
    };

    match cells.get(&column_id.cell_key()) {
        None | Some(Value::Null) => Err(missing()),
        Some(Value::Number(n)) => n.as_f64().map(FormulaValue::Number).ok_or_else(missing),
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Err(missing());
            }
            match trimmed.parse::<f64>() {
                Ok(n) if n.is_finite() => Ok(FormulaValue::Number(n)),
                _ => Ok(FormulaValue::Text(s.clone())),
            }
        }
        Some(other) => Ok(FormulaValue::Text(render_text(other))),
    }
}

fn operand_label(expr: &Expr) -> String {
    match expr {
        Expr::Column(column_id) => column_id.to_string(),
        _ => "expression".to_string(),
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;
    use tabula_core::EntityIdType;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_evaluation_is_deterministic(a in -10_000i64..10_000, b in 1i64..1_000) {
            let col = ColumnId::now_v7();
            let expr = Expr::binary(BinaryOp::Div, Expr::Column(col), Expr::Number(b as f64));
            let mut cells = CellMap::new();
            cells.insert(col.cell_key(), Value::from(a));
            let first = evaluate(&expr, &cells);
            let second = evaluate(&expr, &cells);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn prop_integral_products_are_json_integers(a in -10_000i64..10_000, b in -100i64..100) {
            let expr = Expr::binary(BinaryOp::Mul, Expr::Number(a as f64), Expr::Number(b as f64));
            let value = evaluate(&expr, &CellMap::new()).unwrap();
            prop_assert_eq!(value.to_json(), Value::from(a * b));
        }
    }
}
