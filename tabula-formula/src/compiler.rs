//! Token sequence → expression tree
//!
//! Recursive descent over stored [`FormulaToken`]s. Precedence, lowest first:
//!
//! ```text
//! formula  := concat
//! concat   := additive additive*
//! additive := term (("+" | "-") term)*
//! term     := unary (("*" | "/") unary)*
//! unary    := "-" unary | primary
//! primary  := unit | property | "(" additive ")"
//! ```
//!
//! Binary operators are left associative. Error positions are token indexes.

use crate::ast::{BinaryOp, Expr};
use tabula_core::{FormulaError, FormulaToken};

const OPERATORS: [&str; 6] = ["+", "-", "*", "/", "(", ")"];

/// Deepest expression a formula may compile to. Also bounds nesting of
/// parentheses and unary minus while compiling.
pub const MAX_DEPTH: usize = 128;

/// Expression with the depth of its tree.
type Parsed = (Expr, usize);

/// Compile a stored token sequence into an expression tree.
pub fn compile(tokens: &[FormulaToken]) -> Result<Expr, FormulaError> {
    Compiler::new(tokens).compile()
}

/// Recursive-descent compiler over a borrowed token slice.
pub struct Compiler<'a> {
    tokens: &'a [FormulaToken],
    pos: usize,
    depth: usize,
}

impl<'a> Compiler<'a> {
    pub fn new(tokens: &'a [FormulaToken]) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    pub fn compile(&mut self) -> Result<Expr, FormulaError> {
        if self.tokens.is_empty() {
            return Err(self.error("formula has no tokens"));
        }
        self.check_operators()?;

        let (expr, _) = self.parse_concat()?;
        if !self.is_at_end() {
            return Err(self.error("unexpected token after expression"));
        }
        Ok(expr)
    }

    // ========================================================================
    // GRAMMAR
    // ========================================================================

    fn parse_concat(&mut self) -> Result<Parsed, FormulaError> {
        let (first, mut depth) = self.parse_additive()?;
        let mut parts = vec![first];

        while self.starts_operand() {
            let (part, part_depth) = self.parse_additive()?;
            depth = depth.max(part_depth);
            parts.push(part);
        }

        if parts.len() == 1 {
            Ok((parts.remove(0), depth))
        } else {
            self.node(Expr::Concat(parts), depth)
        }
    }

    fn parse_additive(&mut self) -> Result<Parsed, FormulaError> {
        let mut left = self.parse_term()?;

        while let Some(op) = self.binary_operator(&[BinaryOp::Add, BinaryOp::Sub]) {
            self.advance();
            let right = self.parse_term()?;
            left = self.join(op, left, right)?;
        }

        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Parsed, FormulaError> {
        let mut left = self.parse_unary()?;

        while let Some(op) = self.binary_operator(&[BinaryOp::Mul, BinaryOp::Div]) {
            self.advance();
            let right = self.parse_unary()?;
            left = self.join(op, left, right)?;
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Parsed, FormulaError> {
        if self.check_operator("-") {
            self.advance();
            self.enter()?;
            let (operand, depth) = self.parse_unary()?;
            self.depth -= 1;
            return self.node(Expr::Negate(Box::new(operand)), depth);
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Parsed, FormulaError> {
        match self.current() {
            None => Err(self.error("expected operand, found end of formula")),
            Some(FormulaToken::Unit { value }) => {
                let number = parse_unit(value).ok_or_else(|| {
                    self.error(&format!("unit {:?} is not a finite number", value))
                })?;
                self.advance();
                Ok((Expr::Number(number), 1))
            }
            Some(FormulaToken::Property { column_id }) => {
                let column_id = *column_id;
                self.advance();
                Ok((Expr::Column(column_id), 1))
            }
            Some(FormulaToken::Operator { value }) if value.trim() == "(" => {
                self.advance();
                self.enter()?;
                let inner = self.parse_additive()?;
                self.depth -= 1;
                if !self.check_operator(")") {
                    return Err(self.error("unbalanced parenthesis"));
                }
                self.advance();
                Ok(inner)
            }
            Some(FormulaToken::Operator { value }) => {
                Err(self.error(&format!("expected operand, found operator {:?}", value)))
            }
        }
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    /// Wrap children of depth `child_depth` in `expr`, enforcing [`MAX_DEPTH`].
    fn node(&self, expr: Expr, child_depth: usize) -> Result<Parsed, FormulaError> {
        let depth = child_depth + 1;
        if depth > MAX_DEPTH {
            return Err(self.error("formula nests too deeply"));
        }
        Ok((expr, depth))
    }

    fn join(&self, op: BinaryOp, left: Parsed, right: Parsed) -> Result<Parsed, FormulaError> {
        let depth = left.1.max(right.1);
        self.node(Expr::binary(op, left.0, right.0), depth)
    }

    fn enter(&mut self) -> Result<(), FormulaError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error("formula nests too deeply"));
        }
        Ok(())
    }

    fn current(&self) -> Option<&'a FormulaToken> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) {
        if !self.is_at_end() {
            self.pos += 1;
        }
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn check_operator(&self, symbol: &str) -> bool {
        matches!(self.current(), Some(FormulaToken::Operator { value }) if value.trim() == symbol)
    }

    /// The current token as one of the `allowed` binary operators.
    fn binary_operator(&self, allowed: &[BinaryOp]) -> Option<BinaryOp> {
        match self.current() {
            Some(FormulaToken::Operator { value }) => {
                BinaryOp::from_symbol(value.trim()).filter(|op| allowed.contains(op))
            }
            _ => None,
        }
    }

    /// Whether the current token can begin a concatenated operand.
    fn starts_operand(&self) -> bool {
        match self.current() {
            Some(FormulaToken::Unit { .. }) | Some(FormulaToken::Property { .. }) => true,
            Some(FormulaToken::Operator { value }) => value.trim() == "(",
            None => false,
        }
    }

    /// Reject unknown operator text up front so errors point at the token.
    fn check_operators(&mut self) -> Result<(), FormulaError> {
        for (index, token) in self.tokens.iter().enumerate() {
            if let FormulaToken::Operator { value } = token {
                if !OPERATORS.contains(&value.trim()) {
                    return Err(FormulaError::Malformed {
                        position: index,
                        reason: format!("unknown operator {:?}", value),
                    });
                }
            }
        }
        Ok(())
    }

    fn error(&self, reason: &str) -> FormulaError {
        FormulaError::Malformed {
            position: self.pos,
            reason: reason.to_string(),
        }
    }
}

fn parse_unit(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabula_core::{ColumnId, EntityIdType};

    fn op(symbol: &str) -> FormulaToken {
        FormulaToken::operator(symbol)
    }

    fn unit(value: &str) -> FormulaToken {
        FormulaToken::unit(value)
    }

    #[test]
    fn test_compile_precedence() {
        // 1 + 2 * 3
        let expr = compile(&[unit("1"), op("+"), unit("2"), op("*"), unit("3")]).unwrap();
        assert_eq!(
            expr,
            Expr::binary(
                BinaryOp::Add,
                Expr::Number(1.0),
                Expr::binary(BinaryOp::Mul, Expr::Number(2.0), Expr::Number(3.0)),
            )
        );
    }

    #[test]
    fn test_compile_left_associative() {
        // 8 - 3 - 1
        let expr = compile(&[unit("8"), op("-"), unit("3"), op("-"), unit("1")]).unwrap();
        assert_eq!(
            expr,
            Expr::binary(
                BinaryOp::Sub,
                Expr::binary(BinaryOp::Sub, Expr::Number(8.0), Expr::Number(3.0)),
                Expr::Number(1.0),
            )
        );
    }

    #[test]
    fn test_compile_parentheses() {
        // (1 + 2) * 3
        let expr = compile(&[
            op("("),
            unit("1"),
            op("+"),
            unit("2"),
            op(")"),
            op("*"),
            unit("3"),
        ])
        .unwrap();
        assert!(matches!(expr, Expr::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn test_compile_adjacent_operands_concatenate() {
        let a = ColumnId::now_v7();
        let b = ColumnId::now_v7();
        let expr = compile(&[
            FormulaToken::property(a),
            FormulaToken::property(b),
            unit("2"),
        ])
        .unwrap();
        assert_eq!(
            expr,
            Expr::Concat(vec![Expr::Column(a), Expr::Column(b), Expr::Number(2.0)])
        );
    }

    #[test]
    fn test_compile_unary_minus() {
        let expr = compile(&[op("-"), unit("4")]).unwrap();
        assert_eq!(expr, Expr::Negate(Box::new(Expr::Number(4.0))));
    }

    #[test]
    fn test_compile_errors() {
        let cases: Vec<(Vec<FormulaToken>, usize)> = vec![
            (vec![], 0),
            (vec![unit("1"), op("+")], 2),
            (vec![op("("), unit("1")], 2),
            (vec![unit("1"), op(")")], 1),
            (vec![unit("1"), op("%"), unit("2")], 1),
            (vec![unit("abc")], 0),
            (vec![op("*"), unit("2")], 0),
        ];
        for (tokens, position) in cases {
            match compile(&tokens) {
                Err(FormulaError::Malformed { position: p, .. }) => {
                    assert_eq!(p, position, "tokens: {:?}", tokens)
                }
                other => panic!("expected malformed for {:?}, got {:?}", tokens, other),
            }
        }
    }

    fn assert_too_deep(tokens: &[FormulaToken]) {
        match compile(tokens) {
            Err(FormulaError::Malformed { reason, .. }) => {
                assert_eq!(reason, "formula nests too deeply")
            }
            other => panic!("expected nesting error, got {:?}", other),
        }
    }

    #[test]
    fn test_deep_parentheses_are_rejected() {
        let mut tokens = vec![op("("); 5000];
        tokens.push(unit("1"));
        tokens.extend(vec![op(")"); 5000]);
        assert_too_deep(&tokens);

        let mut tokens = vec![op("-"); 5000];
        tokens.push(unit("1"));
        assert_too_deep(&tokens);
    }

    #[test]
    fn test_long_operator_chain_is_rejected() {
        let mut tokens = vec![unit("1")];
        for _ in 0..5000 {
            tokens.push(op("+"));
            tokens.push(unit("1"));
        }
        assert_too_deep(&tokens);
    }

    #[test]
    fn test_nesting_within_limit_compiles() {
        let nesting = MAX_DEPTH - 2;
        let mut tokens = vec![op("("); nesting];
        tokens.push(unit("1"));
        tokens.extend(vec![op(")"); nesting]);
        tokens.push(op("*"));
        tokens.push(unit("2"));
        assert!(compile(&tokens).is_ok());
    }

    #[test]
    fn test_operator_whitespace_is_tolerated() {
        assert!(compile(&[unit("1"), op(" + "), unit("2")]).is_ok());
    }
}
