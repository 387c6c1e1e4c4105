//! `lrstep` builds LR parsers at run-time from grammars registered through a [ParserBuilder],
//! and then lets the caller drive a parse one action at a time. Rather than attaching Rust code
//! to productions, each production carries a caller-chosen value (typically an enum); while a
//! [Parse]'s current [Action] is a reduction, [Parse::reduce_action] returns that value and
//! [Parse::sigil] returns the input text matched by each symbol of the production. The caller
//! thus performs semantic actions between [Parse::advance] calls:
//!
//! ```text
//! let mut parse = parser.consume(input);
//! loop {
//!     match parse.action() {
//!         Action::Accept => break,
//!         Action::Error(e) => return Err(e),
//!         Action::Reduce(_) => match parse.reduce_action() { ... },
//!         _ => (),
//!     }
//!     parse.advance();
//! }
//! ```
//!
//! Grammars are compiled with [cfgrammar] and their state tables with [lrtable]. Terminals are
//! lexed with a longest-match regex [Lexer].

#![allow(clippy::new_without_default)]

mod builder;
mod lexer;
mod parser;

pub use crate::{
    builder::{Assoc, BuildError, BuildErrorKind, ParserBuilder, ProdId},
    lexer::{LexBuildError, LexError, Lexeme, Lexer, LexerDef, Rule},
    parser::{Action, ErrorInfo, ErrorKind, Parse, Parser},
};

pub use cfgrammar::{PIdx, Span, TIdx};
pub use lrtable::StIdx;
