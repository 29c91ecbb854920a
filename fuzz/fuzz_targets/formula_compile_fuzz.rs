//! Fuzz test for the formula compiler and evaluator
//!
//! Builds token sequences from arbitrary bytes, compiles them, and evaluates
//! whatever compiles against a small fixed row. Errors are fine; panics and
//! hangs are not.
//!
//! Run with: cargo +nightly fuzz run formula_compile_fuzz -- -max_total_time=60

#![no_main]

use libfuzzer_sys::fuzz_target;
use tabula_core::{CellMap, ColumnId, EntityIdType, FormulaToken};
use tabula_formula::Formula;

const OPERATORS: [&str; 7] = ["+", "-", "*", "/", "(", ")", "%"];
const UNITS: [&str; 6] = ["0", "1", "2.5", "-3", "1e308", "abc"];

fuzz_target!(|data: &[u8]| {
    let columns = [ColumnId::now_v7(), ColumnId::now_v7()];
    let tokens: Vec<FormulaToken> = data
        .iter()
        .map(|byte| {
            let index = (byte >> 2) as usize;
            match byte & 0b11 {
                0 => FormulaToken::operator(OPERATORS[index % OPERATORS.len()]),
                1 => FormulaToken::unit(UNITS[index % UNITS.len()]),
                _ => FormulaToken::property(columns[index % columns.len()]),
            }
        })
        .collect();

    if let Ok(formula) = Formula::compile(&tokens) {
        let mut cells = CellMap::new();
        cells.insert(columns[0].cell_key(), 10.into());
        cells.insert(columns[1].cell_key(), "blue".into());
        let _ = formula.evaluate(&cells);
    }
});
