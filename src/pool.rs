//! Thread-local parser pooling.
//!
//! Each worker thread lazily creates one tree-sitter parser for the Rust
//! grammar and reuses it for every parse it performs, so a file that goes
//! through ten pipeline iterations does not build ten parsers.

use ast_grep_language::{LanguageExt, SupportLang};
use std::cell::RefCell;
use thiserror::Error;
use tree_sitter::{Parser, Tree};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("failed to set language for parser")]
    LanguageSet,

    #[error("parser produced no tree")]
    ParseFailed,
}

thread_local! {
    static RUST_PARSER: RefCell<Option<Parser>> = const { RefCell::new(None) };
}

fn new_rust_parser() -> Result<Parser, PoolError> {
    let mut parser = Parser::new();
    let language = SupportLang::Rust.get_ts_language();
    parser
        .set_language(&language)
        .map_err(|_| PoolError::LanguageSet)?;
    Ok(parser)
}

/// Execute `f` with this thread's pooled parser, creating it on first use.
pub fn with_parser<F, R>(f: F) -> Result<R, PoolError>
where
    F: FnOnce(&mut Parser) -> R,
{
    RUST_PARSER.with(|cell| {
        let mut slot = cell.borrow_mut();
        let parser = match slot.take() {
            Some(parser) => parser,
            None => new_rust_parser()?,
        };
        Ok(f(slot.insert(parser)))
    })
}

/// Parse `source` with the pooled Rust parser.
pub fn parse_rust(source: &str) -> Result<Tree, PoolError> {
    with_parser(|parser| parser.parse(source, None))?.ok_or(PoolError::ParseFailed)
}
