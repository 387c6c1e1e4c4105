//! `qsdecode` decodes `application/x-www-form-urlencoded` query strings with PHP-style
//! array keys:
//!
//! ```text
//! first=value&arr[]=foo+bar&arr[]=baz&m[x][]=1
//!   => {"first": "value", "arr": ["foo bar", "baz"], "m": {"x": ["1"]}}
//! ```
//!
//! Input is recognised by an LR grammar driven one step at a time with [lrstep]; the decoder's
//! [Handler]s run on reductions, collecting bracketed keys on a stack and merging each completed
//! pair into the result with [Value::merge].

mod decoder;
mod urldecode;
mod value;

pub use crate::{
    decoder::{DEFAULT_MAX_DEPTH, DecodeError, DecodeErrorKind, Decoder, Handler, parse_str},
    urldecode::urldecode,
    value::{Table, Value, merge_tables},
};
