use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use tabula_core::{CellMap, ColumnId, EntityIdType, FormulaToken};
use tabula_formula::Formula;

fn sample_tokens(size: ColumnId, price: ColumnId) -> Vec<FormulaToken> {
    vec![
        FormulaToken::operator("("),
        FormulaToken::property(size),
        FormulaToken::operator("*"),
        FormulaToken::unit("2"),
        FormulaToken::operator("+"),
        FormulaToken::property(price),
        FormulaToken::operator(")"),
        FormulaToken::operator("/"),
        FormulaToken::unit("3"),
    ]
}

fn bench_compile(c: &mut Criterion) {
    let tokens = sample_tokens(ColumnId::now_v7(), ColumnId::now_v7());
    c.bench_function("formula/compile", |b| {
        b.iter(|| {
            let formula = Formula::compile(black_box(&tokens)).expect("compile formula");
            black_box(formula.references().len());
        });
    });
}

fn bench_evaluate(c: &mut Criterion) {
    let size = ColumnId::now_v7();
    let price = ColumnId::now_v7();
    let formula = Formula::compile(&sample_tokens(size, price)).expect("compile formula");
    let mut cells = CellMap::new();
    cells.insert(size.cell_key(), json!(10));
    cells.insert(price.cell_key(), json!("4.5"));

    c.bench_function("formula/evaluate", |b| {
        b.iter(|| {
            let value = formula.evaluate(black_box(&cells)).expect("evaluate formula");
            black_box(value.to_json());
        });
    });
}

criterion_group!(benches, bench_compile, bench_evaluate);
criterion_main!(benches);
