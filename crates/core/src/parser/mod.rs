//! PDF syntax parsing.
//!
//! - `lexer`: byte-oriented tokenizer
//! - `object`: object parser built on the lexer

pub mod lexer;
pub mod object;

pub use lexer::{Keyword, Lexer, Token};
pub use object::{
    EndKind, MAX_NESTING_DEPTH, ObjectParser, ParseContext, ParseEvent, ValueResolver, parse_value,
};
