//! Cell rendering and substring filters
//!
//! Filters, search and select options all operate on the *rendered text* of a
//! cell, so the rendering rules live here next to the matchers that use them.

use crate::ColumnId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// RENDERING
// ============================================================================

/// Render a stored JSON value as display text.
///
/// `null` renders empty, integral floats drop the fraction, arrays join their
/// rendered elements with `", "`.
pub fn render_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() => format_number(f),
            _ => n.to_string(),
        },
        Value::Array(items) => items
            .iter()
            .map(render_text)
            .collect::<Vec<_>>()
            .join(", "),
        Value::Object(_) => value.to_string(),
    }
}

/// Format a number the way cells display it.
pub fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// Convert a computed or parsed number to its stored JSON form.
///
/// Integral values become JSON integers. Non-finite values have no JSON
/// representation and yield `None`.
pub fn number_to_json(n: f64) -> Option<Value> {
    if !n.is_finite() {
        return None;
    }
    if n.fract() == 0.0 && n.abs() < 1e15 {
        return Some(Value::from(n as i64));
    }
    serde_json::Number::from_f64(n).map(Value::Number)
}

/// Numeric reading of a stored value: JSON numbers, or strings that parse as
/// a finite number.
pub fn numeric_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

// ============================================================================
// FILTERS
// ============================================================================

/// Substring filter on one column's rendered text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellFilter {
    pub column_id: ColumnId,
    needle: String,
}

impl CellFilter {
    /// Create a filter. Returns `None` for a blank value, which filters nothing.
    pub fn new(column_id: ColumnId, value: &str) -> Option<Self> {
        let needle = value.trim();
        if needle.is_empty() {
            return None;
        }
        Some(Self {
            column_id,
            needle: needle.to_lowercase(),
        })
    }

    /// Test the rendered text of this filter's column.
    pub fn matches(&self, rendered: &str) -> bool {
        rendered.to_lowercase().contains(&self.needle)
    }
}

/// Parsed free-text search term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchTerm {
    needle: String,
    row_number: Option<i64>,
}

impl SearchTerm {
    /// Parse a raw term. Blank input means "no search" and yields `None`.
    ///
    /// When `match_row_number` is set and the term is all ASCII digits, rows
    /// whose number equals it also match.
    pub fn parse(raw: &str, match_row_number: bool) -> Option<Self> {
        let needle = raw.trim();
        if needle.is_empty() {
            return None;
        }
        let row_number = if match_row_number && needle.bytes().all(|b| b.is_ascii_digit()) {
            needle.parse::<i64>().ok()
        } else {
            None
        };
        Some(Self {
            needle: needle.to_lowercase(),
            row_number,
        })
    }

    pub fn row_number(&self) -> Option<i64> {
        self.row_number
    }

    pub fn matches_text(&self, rendered: &str) -> bool {
        rendered.to_lowercase().contains(&self.needle)
    }

    pub fn matches_row_number(&self, number: i64) -> bool {
        self.row_number == Some(number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EntityIdType;
    use serde_json::json;

    #[test]
    fn test_render_scalars() {
        assert_eq!(render_text(&Value::Null), "");
        assert_eq!(render_text(&json!("Red")), "Red");
        assert_eq!(render_text(&json!(10)), "10");
        assert_eq!(render_text(&json!(20.0)), "20");
        assert_eq!(render_text(&json!(2.5)), "2.5");
        assert_eq!(render_text(&json!(true)), "true");
    }

    #[test]
    fn test_render_array_joins() {
        assert_eq!(render_text(&json!([1, 2, "x"])), "1, 2, x");
    }

    #[test]
    fn test_number_to_json_integral() {
        assert_eq!(number_to_json(20.0), Some(json!(20)));
        assert_eq!(number_to_json(-3.0), Some(json!(-3)));
        assert_eq!(number_to_json(0.5), Some(json!(0.5)));
        assert_eq!(number_to_json(f64::INFINITY), None);
        assert_eq!(number_to_json(f64::NAN), None);
    }

    #[test]
    fn test_numeric_value() {
        assert_eq!(numeric_value(&json!(4)), Some(4.0));
        assert_eq!(numeric_value(&json!(" 4.5 ")), Some(4.5));
        assert_eq!(numeric_value(&json!("blue")), None);
        assert_eq!(numeric_value(&json!("inf")), None);
        assert_eq!(numeric_value(&json!(null)), None);
    }

    #[test]
    fn test_cell_filter_is_case_insensitive_substring() {
        let filter = CellFilter::new(ColumnId::now_v7(), "RE").unwrap();
        assert!(filter.matches("Red"));
        assert!(filter.matches("green"));
        assert!(!filter.matches("Blue"));
    }

    #[test]
    fn test_blank_filter_is_none() {
        assert!(CellFilter::new(ColumnId::now_v7(), "  ").is_none());
    }

    #[test]
    fn test_search_term_digits() {
        let term = SearchTerm::parse(" 12 ", true).unwrap();
        assert!(term.matches_row_number(12));
        assert!(term.matches_text("A12"));

        let no_numbers = SearchTerm::parse("12", false).unwrap();
        assert!(!no_numbers.matches_row_number(12));

        let text = SearchTerm::parse("blue", true).unwrap();
        assert_eq!(text.row_number(), None);
        assert!(SearchTerm::parse("", true).is_none());
    }
}
