use std::{error::Error, fmt};

use lrstep::{Action, Assoc, BuildError, ErrorInfo, ErrorKind, Parse, Parser, ParserBuilder};
use tracing::{debug, trace};

use crate::{
    urldecode::urldecode,
    value::{Table, Value},
};

/// The semantic action attached to a production of the query-string grammar.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Handler {
    /// `[]`: push an append slot onto the key stack.
    EmptyKey,
    /// `[k]`: push `k` onto the key stack.
    Key,
    /// `name[..]..=value`: fold the key stack around `value` and merge it into `name`.
    ArrayPair,
    /// `name=value`
    ScalarPair,
}

impl fmt::Display for Handler {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Handler::EmptyKey => "push_empty_key",
            Handler::Key => "push_key",
            Handler::ArrayPair => "commit_array_pair",
            Handler::ScalarPair => "commit_scalar_pair",
        };
        write!(f, "{}", s)
    }
}

/// The default for [Decoder::max_depth], matching PHP's `max_input_nesting_level`.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Decodes `application/x-www-form-urlencoded` strings with PHP-style nested keys
/// (`a[x][]=1&a[x][]=2`) into a [Table]. A `Decoder` holds only the built grammar and its
/// settings: every call to [decode](Decoder::decode) starts from fresh state, so one decoder can
/// be shared freely.
pub struct Decoder {
    parser: Parser<Handler>,
    max_depth: usize,
}

impl Decoder {
    pub fn new() -> Result<Decoder, BuildError> {
        let parser = ParserBuilder::new()
            .terminal(Assoc::Left, "=", "=")
            .terminal(Assoc::Token, "]", r"\]")
            .terminal(Assoc::Right, "[", r"\[")
            .terminal(Assoc::Left, "&", "&")
            .terminal(Assoc::Token, "STRING", r"[^=\[\]&\s]+")
            .production("START", &["PAIRS"], None)
            .production("PAIRS", &["PAIR"], None)
            .production("PAIRS", &["PAIRS", "&", "PAIR"], None)
            .production("VALUE", &[], None)
            .production("VALUE", &["STRING"], None)
            .production("ARRKEY", &[], Some(Handler::EmptyKey))
            .production("ARRKEY", &["STRING"], Some(Handler::Key))
            .production("ARRDIM", &["[", "ARRKEY", "]"], None)
            .production("ARRDIM", &["[", "ARRKEY", "]", "ARRDIM"], None)
            .production(
                "PAIR",
                &["STRING", "ARRDIM", "=", "VALUE"],
                Some(Handler::ArrayPair),
            )
            .production("PAIR", &["STRING", "=", "VALUE"], Some(Handler::ScalarPair))
            .build()?;
        Ok(Decoder {
            parser,
            max_depth: DEFAULT_MAX_DEPTH,
        })
    }

    /// Set the maximum number of bracketed dimensions a pair may have. Pairs nested deeper make
    /// [decode](Decoder::decode) fail with [DecodeErrorKind::TooDeep]. Merging decoded values
    /// recurses once per dimension, so this also bounds stack use.
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// The underlying parser, e.g. for [Parser::yacc_src] or [Parser::validate].
    pub fn parser(&self) -> &Parser<Handler> {
        &self.parser
    }

    /// Decode `input`. The empty string decodes to an empty table.
    pub fn decode(&self, input: &str) -> Result<Table, DecodeError> {
        self.run(input, None)
    }

    /// As [decode](Decoder::decode), but calls `tracer` with a description of every parser step
    /// and every handler invoked.
    pub fn decode_traced<F>(&self, input: &str, mut tracer: F) -> Result<Table, DecodeError>
    where
        F: FnMut(&str),
    {
        self.run(input, Some(&mut tracer))
    }

    fn run(
        &self,
        input: &str,
        mut tracer: Option<&mut dyn FnMut(&str)>,
    ) -> Result<Table, DecodeError> {
        if input.is_empty() {
            return Ok(Table::new());
        }
        debug!(len = input.len(), "decoding");
        let mut pending = Pending {
            keys: Vec::new(),
            result: Table::new(),
            max_depth: self.max_depth,
        };
        let mut parse = self.parser.consume(input);
        loop {
            if let Some(t) = tracer.as_mut() {
                t(&parse.trace());
            }
            match parse.action() {
                Action::Accept => break,
                Action::Error(e) => {
                    let err = self.error(&parse, e);
                    debug!(%err, "decode failed");
                    return Err(err);
                }
                Action::Reduce(_) => {
                    if let Some(&h) = parse.reduce_action() {
                        if let Some(t) = tracer.as_mut() {
                            t(&format!("calling {}", h));
                        }
                        trace!(handler = %h, "dispatch");
                        if let Err(err) = pending.dispatch(h, &parse) {
                            debug!(%err, "decode failed");
                            return Err(err);
                        }
                    }
                }
                Action::Shift(_) | Action::Goto(_) => (),
            }
            parse.advance();
        }
        debug!(fields = pending.result.len(), "decoded");
        Ok(pending.result)
    }

    fn error(&self, parse: &Parse<'_, '_, Handler>, e: ErrorInfo) -> DecodeError {
        let position = e.span.start();
        let kind = match e.kind {
            ErrorKind::Syntax => DecodeErrorKind::Syntax { position },
            ErrorKind::NonAssociative => DecodeErrorKind::NonAssociative {
                token: e
                    .tidx
                    .and_then(|tidx| self.parser.token_name(tidx))
                    .unwrap_or_default()
                    .to_owned(),
            },
            ErrorKind::UnknownToken => DecodeErrorKind::UnknownToken {
                value: parse.input()[e.span.start()..e.span.end()].to_owned(),
                position,
            },
        };
        DecodeError { kind }
    }
}

/// The state of one decode call.
struct Pending {
    /// Dimension keys of the pair being parsed, outermost first. `None` is an append slot.
    keys: Vec<Option<String>>,
    result: Table,
    max_depth: usize,
}

impl Pending {
    fn dispatch(&mut self, h: Handler, parse: &Parse<'_, '_, Handler>) -> Result<(), DecodeError> {
        let sigil = |i| parse.sigil(i).unwrap_or_default();
        match h {
            Handler::EmptyKey => self.keys.push(None),
            Handler::Key => self.keys.push(Some(sigil(0).to_owned())),
            Handler::ScalarPair => {
                self.result
                    .insert(sigil(0).to_owned(), Value::Scalar(urldecode(sigil(2))));
            }
            Handler::ArrayPair => {
                if self.keys.len() > self.max_depth {
                    return Err(DecodeError {
                        kind: DecodeErrorKind::TooDeep {
                            field: sigil(0).to_owned(),
                            depth: self.keys.len(),
                            limit: self.max_depth,
                        },
                    });
                }
                let mut v = Value::Scalar(urldecode(sigil(3)));
                while let Some(k) = self.keys.pop() {
                    v = match k {
                        Some(k) => Value::Map(Table::from([(k, v)])),
                        None => Value::List(vec![v]),
                    };
                }
                match self.result.get_mut(sigil(0)) {
                    Some(existing) => existing.merge(v),
                    None => {
                        self.result.insert(sigil(0).to_owned(), v);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Why a string could not be decoded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodeError {
    pub kind: DecodeErrorKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecodeErrorKind {
    /// An unexpected token (or end of input) at byte `position`.
    Syntax { position: usize },
    NonAssociative { token: String },
    /// Input at byte `position` which no terminal matches; `value` is its first character.
    UnknownToken { value: String, position: usize },
    /// `field` has `depth` bracketed dimensions, more than the decoder's `limit`.
    TooDeep {
        field: String,
        depth: usize,
        limit: usize,
    },
}

impl Error for DecodeError {}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kind {
            DecodeErrorKind::Syntax { position } => write!(f, "Syntax error at {}", position),
            DecodeErrorKind::NonAssociative { ref token } => {
                write!(f, "Token {} is not associative", token)
            }
            DecodeErrorKind::UnknownToken {
                ref value,
                position,
            } => write!(f, "Unknown token '{}' at {}", value, position),
            DecodeErrorKind::TooDeep {
                ref field,
                depth,
                limit,
            } => write!(
                f,
                "Field '{}' is nested {} levels deep (limit {})",
                field, depth, limit
            ),
        }
    }
}

/// Decode `input` with a freshly built [Decoder].
pub fn parse_str(input: &str) -> Result<Table, Box<dyn Error>> {
    Ok(Decoder::new()?.decode(input)?)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn grammar() {
        let d = Decoder::new().unwrap();
        let src = d.parser().yacc_src();
        assert!(src.starts_with("%start START\n%token ']' 'STRING'\n%left '='\n%right '['\n"));
        assert!(src.contains("PAIR: 'STRING' ARRDIM '=' VALUE\n    | 'STRING' '=' VALUE;\n"));
        assert!(d.parser().token_id("STRING").is_some());
        assert!(d.parser().validate("a[b][]=c&d="));
        assert!(!d.parser().validate("a"));
    }

    #[test]
    fn handler_trace() {
        let d = Decoder::new().unwrap();
        let mut lines = Vec::new();
        let t = d.decode_traced("a=1", |l| lines.push(l.to_owned())).unwrap();
        assert_eq!(t["a"], Value::Scalar("1".to_owned()));
        assert!(lines.iter().any(|l| l.starts_with("shift ")));
        assert!(lines.iter().any(|l| l.starts_with("goto ")));
        assert_eq!(lines.last().map(String::as_str), Some("accept"));
        let reduces = lines
            .iter()
            .filter(|l| l.starts_with("reduce") || l.starts_with("calling"))
            .collect::<Vec<_>>();
        assert_eq!(
            reduces,
            vec![
                "reduce by VALUE -> 'STRING'",
                "reduce by PAIR -> 'STRING' '=' VALUE",
                "calling commit_scalar_pair",
                "reduce by PAIRS -> PAIR",
                "reduce by START -> PAIRS"
            ]
        );
    }

    #[test]
    fn key_handlers() {
        let d = Decoder::new().unwrap();
        let mut calls = Vec::new();
        d.decode_traced("a[x][]=1", |l| {
            if let Some(h) = l.strip_prefix("calling ") {
                calls.push(h.to_owned());
            }
        })
        .unwrap();
        assert_eq!(calls, vec!["push_key", "push_empty_key", "commit_array_pair"]);
    }

    #[test]
    fn empty_values_and_keys() {
        let d = Decoder::new().unwrap();
        let t = d.decode("a=&b[]=&c[k]=").unwrap();
        assert_eq!(t["a"], Value::Scalar(String::new()));
        assert_eq!(t["b"], Value::List(vec![Value::Scalar(String::new())]));
        assert_eq!(t["c"].get("k"), Some(&Value::Scalar(String::new())));
    }

    #[test]
    fn errors() {
        let d = Decoder::new().unwrap();
        let e = d.decode("a[=1").unwrap_err();
        assert_eq!(e.kind, DecodeErrorKind::Syntax { position: 2 });
        assert_eq!(e.to_string(), "Syntax error at 2");

        let e = d.decode("a=1&").unwrap_err();
        assert_eq!(e.kind, DecodeErrorKind::Syntax { position: 4 });

        let e = d.decode("a=1 2").unwrap_err();
        assert_eq!(
            e.kind,
            DecodeErrorKind::UnknownToken {
                value: " ".to_owned(),
                position: 3
            }
        );
        assert_eq!(e.to_string(), "Unknown token ' ' at 3");

        assert_eq!(
            DecodeError {
                kind: DecodeErrorKind::NonAssociative {
                    token: "==".to_owned()
                }
            }
            .to_string(),
            "Token == is not associative"
        );
    }

    #[test]
    fn depth_limit() {
        let d = Decoder::new().unwrap().max_depth(2);
        assert!(d.decode("a[x][]=1&a[x][]=2").is_ok());
        let e = d.decode("b=1&a[x][y][]=1&c=2").unwrap_err();
        assert_eq!(
            e.kind,
            DecodeErrorKind::TooDeep {
                field: "a".to_owned(),
                depth: 3,
                limit: 2
            }
        );
        assert_eq!(e.to_string(), "Field 'a' is nested 3 levels deep (limit 2)");
        // The failed pair leaves no key stack behind for later calls.
        assert_eq!(
            serde_json::to_string(&d.decode("a[]=1").unwrap()).unwrap(),
            r#"{"a":["1"]}"#
        );
    }

    #[test]
    fn one_shot() {
        let t = parse_str("x=1&y[]=2").unwrap();
        assert_eq!(t.keys().collect::<Vec<_>>(), vec!["x", "y"]);
        assert!(parse_str("=").is_err());
    }
}
