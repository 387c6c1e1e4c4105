use std::{error::Error, fmt, iter::FusedIterator, slice::Iter};

use cfgrammar::Span;
use regex::{Regex, RegexBuilder};

/// A single lexing rule: input matching `re` produces lexemes with the ID `tok_id`.
#[derive(Debug)]
pub struct Rule {
    /// The ID that lexemes created against this rule will be given. When the lexer is built by a
    /// [crate::ParserBuilder] this is the grammar's `TIdx` for the terminal of the same name.
    pub tok_id: u32,
    pub name: String,
    pub re_str: String,
    re: Regex,
}

impl Rule {
    pub fn new(tok_id: u32, name: &str, re_str: &str) -> Result<Rule, LexBuildError> {
        let re = RegexBuilder::new(&format!("\\A(?:{})", re_str))
            .multi_line(true)
            .dot_matches_new_line(true)
            .build()
            .map_err(|e| LexBuildError {
                name: name.to_owned(),
                err: e,
            })?;
        Ok(Rule {
            tok_id,
            name: name.to_owned(),
            re_str: re_str.to_owned(),
            re,
        })
    }
}

/// A rule's pattern could not be compiled.
#[derive(Debug)]
pub struct LexBuildError {
    pub name: String,
    pub err: regex::Error,
}

impl Error for LexBuildError {}

impl fmt::Display for LexBuildError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Invalid pattern for '{}': {}", self.name, self.err)
    }
}

/// No rule matched the input at `span`, which covers the first unmatched character.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LexError {
    span: Span,
}

impl LexError {
    pub fn new(span: Span) -> Self {
        LexError { span }
    }

    pub fn span(&self) -> Span {
        self.span
    }
}

impl Error for LexError {}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Couldn't lex input starting at byte {}", self.span.start())
    }
}

/// A segment of the user's input matched by a rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Lexeme {
    tok_id: u32,
    span: Span,
}

impl Lexeme {
    pub fn new(tok_id: u32, start: usize, len: usize) -> Self {
        Lexeme {
            tok_id,
            span: Span::new(start, start + len),
        }
    }

    /// The token ID.
    pub fn tok_id(&self) -> u32 {
        self.tok_id
    }

    pub fn span(&self) -> Span {
        self.span
    }
}

/// An ordered set of rules. From it one can produce a [Lexer] which lexes a given input.
#[derive(Debug, Default)]
pub struct LexerDef {
    rules: Vec<Rule>,
}

impl LexerDef {
    pub fn new() -> Self {
        LexerDef { rules: Vec::new() }
    }

    /// Add a rule matching `re_str` which produces lexemes with ID `tok_id`. Rules pushed
    /// earlier win ties between matches of equal length.
    pub fn push(&mut self, tok_id: u32, name: &str, re_str: &str) -> Result<(), LexBuildError> {
        self.rules.push(Rule::new(tok_id, name, re_str)?);
        Ok(())
    }

    /// Get the `Rule` at index `idx`.
    pub fn get_rule(&self, idx: usize) -> Option<&Rule> {
        self.rules.get(idx)
    }

    /// Get the `Rule` which produces lexemes with ID `tok_id`.
    pub fn get_rule_by_id(&self, tok_id: u32) -> Option<&Rule> {
        self.rules.iter().find(|r| r.tok_id == tok_id)
    }

    /// Get the `Rule` instance associated with a particular name.
    pub fn get_rule_by_name(&self, n: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.name == n)
    }

    pub fn iter_rules(&self) -> Iter<'_, Rule> {
        self.rules.iter()
    }

    pub fn rules_len(&self) -> usize {
        self.rules.len()
    }

    /// Return a lexer for `s`. Lexemes are produced lazily as the lexer is iterated over.
    pub fn lexer<'lexer, 'input>(&'lexer self, s: &'input str) -> Lexer<'lexer, 'input> {
        Lexer {
            lexerdef: self,
            s,
            i: 0,
            failed: false,
        }
    }
}

/// Iterates over the lexemes of one input. After the first [LexError] no further items are
/// produced.
pub struct Lexer<'lexer, 'input> {
    lexerdef: &'lexer LexerDef,
    s: &'input str,
    i: usize,
    failed: bool,
}

impl<'lexer, 'input> Lexer<'lexer, 'input> {
    /// Return the user input associated with `span`.
    pub fn span_str(&self, span: Span) -> &'input str {
        &self.s[span.start()..span.end()]
    }

    pub fn input(&self) -> &'input str {
        self.s
    }
}

impl Iterator for Lexer<'_, '_> {
    type Item = Result<Lexeme, LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.i >= self.s.len() {
            return None;
        }
        let old_i = self.i;
        let mut longest = 0; // Length of the longest match
        let mut longest_ridx = 0; // This is only valid iff longest != 0
        for (ridx, r) in self.lexerdef.iter_rules().enumerate() {
            if let Some(m) = r.re.find(&self.s[old_i..]) {
                let len = m.end();
                // Note that by using ">", we implicitly prefer an earlier over a later rule, if
                // both match an input of the same length.
                if len > longest {
                    longest = len;
                    longest_ridx = ridx;
                }
            }
        }
        if longest > 0 {
            self.i += longest;
            let tok_id = self.lexerdef.rules[longest_ridx].tok_id;
            Some(Ok(Lexeme::new(tok_id, old_i, longest)))
        } else {
            self.failed = true;
            let clen = self.s[old_i..].chars().next().map_or(0, char::len_utf8);
            Some(Err(LexError::new(Span::new(old_i, old_i + clen))))
        }
    }
}

impl FusedIterator for Lexer<'_, '_> {}
