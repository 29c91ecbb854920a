//! Fuzz test for the formula source lexer
//!
//! Feeds arbitrary UTF-8 to the lexer and the source-to-token conversion.
//! Neither may panic; successful lexing always ends in `Eof` with spans
//! inside the input.
//!
//! Run with: cargo +nightly fuzz run formula_lexer_fuzz -- -max_total_time=60

#![no_main]

use libfuzzer_sys::fuzz_target;
use tabula_core::{ColumnId, EntityIdType};
use tabula_formula::{tokens_from_source, Lexer, TokenKind};

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        if let Ok(tokens) = Lexer::new(input).tokenize() {
            assert_eq!(
                tokens.last().map(|t| &t.kind),
                Some(&TokenKind::Eof),
                "Last token should always be Eof"
            );
            for token in &tokens {
                assert!(token.span.start <= token.span.end, "Span start should be <= end");
                assert!(token.span.end <= input.len(), "Span should stay inside the input");
            }
        }

        // Every name resolves, so only lexing can fail.
        let id = ColumnId::now_v7();
        let _ = tokens_from_source(input, |_| Some(id));
    }
});
