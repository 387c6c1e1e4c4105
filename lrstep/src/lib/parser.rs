use std::{error::Error, fmt};

use cfgrammar::{
    PIdx, Span, Symbol, TIdx,
    yacc::{AssocKind, YaccGrammar},
};
use lrtable::{StIdx, StateGraph, StateTable};
use tracing::trace;

use crate::{
    builder::{ProdId, quote_token},
    lexer::{LexError, Lexeme, Lexer, LexerDef},
};

/// A built grammar: its state table, its lexer, and the action attached to each production.
/// A `Parser` is immutable and can drive any number of [Parse]s, including concurrently.
pub struct Parser<A> {
    pub(crate) grm: YaccGrammar<u32>,
    pub(crate) sgraph: StateGraph<u32>,
    pub(crate) stable: StateTable<u32>,
    pub(crate) lexerdef: LexerDef,
    pub(crate) yacc_src: String,
    /// Indexed by `PIdx`.
    pub(crate) prod_ids: Vec<Option<ProdId>>,
    /// Indexed by `ProdId`.
    pub(crate) actions: Vec<Option<A>>,
}

impl<A> Parser<A> {
    pub fn grammar(&self) -> &YaccGrammar<u32> {
        &self.grm
    }

    pub fn lexerdef(&self) -> &LexerDef {
        &self.lexerdef
    }

    /// The Yacc source the grammar was built from.
    pub fn yacc_src(&self) -> &str {
        &self.yacc_src
    }

    /// Return the ID of the terminal `name`, if it exists.
    pub fn token_id(&self, name: &str) -> Option<TIdx<u32>> {
        self.grm.token_idx(name)
    }

    pub fn token_name(&self, tidx: TIdx<u32>) -> Option<&str> {
        self.grm.token_name(tidx)
    }

    /// Map a grammar production back to the order it was registered in. The start production
    /// the grammar adds internally has no `ProdId`.
    pub fn prod_id(&self, pidx: PIdx<u32>) -> Option<ProdId> {
        self.prod_ids.get(usize::from(pidx)).copied().flatten()
    }

    /// The action registered with production `id`.
    pub fn prod_action(&self, id: ProdId) -> Option<&A> {
        self.actions.get(id.0).and_then(Option::as_ref)
    }

    /// Start parsing `input`. The returned [Parse] is positioned on its first action; nothing
    /// beyond the first lexeme has been consumed.
    pub fn consume<'p, 'i>(&'p self, input: &'i str) -> Parse<'p, 'i, A> {
        Parse::new(self, input)
    }

    /// Does `input` parse without error?
    pub fn validate(&self, input: &str) -> bool {
        self.consume(input).run().is_ok()
    }

    /// Would an error on `tidx` in state `stidx` have been a shift/reduce conflict between
    /// non-associative operators of equal precedence?
    fn nonassoc_error(&self, stidx: StIdx<u32>, tidx: TIdx<u32>) -> bool {
        match self.grm.token_precedence(tidx) {
            Some(tprec) if tprec.kind == AssocKind::Nonassoc => {
                self.sgraph
                    .core_state(stidx)
                    .items
                    .keys()
                    .filter(|(pidx, dot)| usize::from(*dot) == self.grm.prod(*pidx).len())
                    .any(|(pidx, _)| {
                        self.grm
                            .prod_precedence(*pidx)
                            .is_some_and(|pprec| pprec.level == tprec.level)
                    })
            }
            _ => false,
        }
    }

    fn pp_prod(&self, pidx: PIdx<u32>) -> String {
        let lhs = self.grm.rule_name_str(self.grm.prod_to_rule(pidx));
        let prod = self.grm.prod(pidx);
        if prod.is_empty() {
            return format!("{} -> %empty", lhs);
        }
        let rhs = prod
            .iter()
            .map(|sym| match *sym {
                Symbol::Rule(ridx) => self.grm.rule_name_str(ridx).to_owned(),
                Symbol::Token(tidx) => quote_token(self.grm.token_name(tidx).unwrap_or("")),
            })
            .collect::<Vec<_>>();
        format!("{} -> {}", lhs, rhs.join(" "))
    }
}

/// What a [Parse] will do on its next [advance](Parse::advance).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    /// Push the lookahead and move to the given state.
    Shift(StIdx<u32>),
    /// Push the result of the last reduction and move to the given state.
    Goto(StIdx<u32>),
    /// Pop the right-hand side of the given production off the stack.
    Reduce(PIdx<u32>),
    Accept,
    Error(ErrorInfo),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The lookahead is not valid in the current state.
    Syntax,
    /// The lookahead is a `%nonassoc` operator following an operator of the same precedence.
    NonAssociative,
    /// The lexer could not match the input.
    UnknownToken,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            ErrorKind::Syntax => "syntax error",
            ErrorKind::NonAssociative => "non-associative operator",
            ErrorKind::UnknownToken => "unknown token",
        };
        write!(f, "{}", s)
    }
}

/// Where, and why, a parse failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    /// The offending lexeme, or the first unlexable character.
    pub span: Span,
    /// The offending terminal. `None` for [ErrorKind::UnknownToken].
    pub tidx: Option<TIdx<u32>>,
}

impl Error for ErrorInfo {}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} at byte {}", self.kind, self.span.start())
    }
}

/// One in-progress parse of one input. Each call to [advance](Parse::advance) performs exactly
/// one [Action]; the caller inspects [action](Parse::action) in between, typically to run
/// semantic code whenever a production is about to be reduced.
pub struct Parse<'p, 'i, A> {
    parser: &'p Parser<A>,
    lexer: Lexer<'p, 'i>,
    lookahead: Result<Lexeme, LexError>,
    pstack: Vec<StIdx<u32>>,
    /// One span per symbol on the stack above the start state.
    spans: Vec<Span>,
    /// The span covered by the last reduction, pushed by the following goto.
    reduced: Span,
    action: Action,
}

impl<'p, 'i, A> Parse<'p, 'i, A> {
    fn new(parser: &'p Parser<A>, input: &'i str) -> Self {
        let start = parser.stable.start_state();
        let mut p = Parse {
            parser,
            lexer: parser.lexerdef.lexer(input),
            lookahead: Ok(Lexeme::new(0, 0, 0)),
            pstack: vec![start],
            spans: Vec::new(),
            reduced: Span::new(0, 0),
            action: Action::Accept,
        };
        p.lookahead = p.next_lexeme();
        p.action = p.lookup(start);
        p
    }

    /// The action the next call to [advance](Parse::advance) will perform.
    pub fn action(&self) -> Action {
        self.action
    }

    /// Perform the current action and work out the next one. Once the parse has reached
    /// [Action::Accept] or [Action::Error] this does nothing.
    pub fn advance(&mut self) {
        trace!(step = %self.trace(), "advance");
        let parser = self.parser;
        match self.action {
            Action::Shift(stidx) => {
                if let Ok(lexeme) = self.lookahead {
                    self.spans.push(lexeme.span());
                }
                self.pstack.push(stidx);
                self.lookahead = self.next_lexeme();
                self.action = self.lookup(stidx);
            }
            Action::Reduce(pidx) => {
                let n = parser.grm.prod(pidx).len();
                let first = self.spans.len() - n;
                self.reduced = if n == 0 {
                    let pos = self.position();
                    Span::new(pos, pos)
                } else {
                    Span::new(self.spans[first].start(), self.spans[self.spans.len() - 1].end())
                };
                self.spans.truncate(first);
                self.pstack.truncate(self.pstack.len() - n);
                let prior = *self.pstack.last().unwrap();
                let ridx = parser.grm.prod_to_rule(pidx);
                self.action = Action::Goto(parser.stable.goto(prior, ridx).unwrap());
            }
            Action::Goto(stidx) => {
                self.pstack.push(stidx);
                self.spans.push(self.reduced);
                self.action = self.lookup(stidx);
            }
            Action::Accept | Action::Error(_) => (),
        }
    }

    /// Advance until the parse accepts or fails.
    pub fn run(mut self) -> Result<(), ErrorInfo> {
        loop {
            match self.action {
                Action::Accept => return Ok(()),
                Action::Error(e) => return Err(e),
                _ => self.advance(),
            }
        }
    }

    /// If the current action is a reduction, the registration-order ID of its production.
    pub fn reduce_id(&self) -> Option<ProdId> {
        match self.action {
            Action::Reduce(pidx) => self.parser.prod_id(pidx),
            _ => None,
        }
    }

    /// If the current action is a reduction, the action registered with its production.
    pub fn reduce_action(&self) -> Option<&'p A> {
        let parser = self.parser;
        self.reduce_id().and_then(|id| parser.prod_action(id))
    }

    /// If the current action is a reduction, the input text matched by the `idx`th symbol
    /// (zero-based) of the production being reduced. Rules which matched nothing yield `""`.
    pub fn sigil(&self, idx: usize) -> Option<&'i str> {
        let Action::Reduce(pidx) = self.action else {
            return None;
        };
        let n = self.parser.grm.prod(pidx).len();
        if idx >= n {
            return None;
        }
        let span = self.spans[self.spans.len() - n + idx];
        Some(self.lexer.span_str(span))
    }

    /// A human readable description of the current action, e.g. `shift 3` or
    /// `reduce by Expr -> Expr '+' Term`.
    pub fn trace(&self) -> String {
        match self.action {
            Action::Shift(stidx) => format!("shift {}", usize::from(stidx)),
            Action::Goto(stidx) => format!("goto {}", usize::from(stidx)),
            Action::Reduce(pidx) => format!("reduce by {}", self.parser.pp_prod(pidx)),
            Action::Accept => "accept".to_owned(),
            Action::Error(e) => format!("error: {}", e),
        }
    }

    /// The depth of the parse stack, including the start state.
    pub fn stack_len(&self) -> usize {
        self.pstack.len()
    }

    /// The current lookahead. At the end of the input this is a zero-length lexeme of the
    /// grammar's end-of-file terminal.
    pub fn lookahead(&self) -> Result<Lexeme, LexError> {
        self.lookahead
    }

    /// The byte offset of the current lookahead.
    pub fn position(&self) -> usize {
        match self.lookahead {
            Ok(lexeme) => lexeme.span().start(),
            Err(e) => e.span().start(),
        }
    }

    pub fn input(&self) -> &'i str {
        self.lexer.input()
    }

    fn next_lexeme(&mut self) -> Result<Lexeme, LexError> {
        match self.lexer.next() {
            Some(r) => r,
            None => {
                let eof = u32::from(self.parser.grm.eof_token_idx());
                Ok(Lexeme::new(eof, self.lexer.input().len(), 0))
            }
        }
    }

    fn lookup(&self, stidx: StIdx<u32>) -> Action {
        let lexeme = match self.lookahead {
            Ok(lexeme) => lexeme,
            Err(e) => {
                return Action::Error(ErrorInfo {
                    kind: ErrorKind::UnknownToken,
                    span: e.span(),
                    tidx: None,
                });
            }
        };
        let tidx = TIdx(lexeme.tok_id());
        match self.parser.stable.action(stidx, tidx) {
            lrtable::Action::Shift(stidx) => Action::Shift(stidx),
            lrtable::Action::Reduce(pidx) => Action::Reduce(pidx),
            lrtable::Action::Accept => Action::Accept,
            lrtable::Action::Error => {
                let kind = if self.parser.nonassoc_error(stidx, tidx) {
                    ErrorKind::NonAssociative
                } else {
                    ErrorKind::Syntax
                };
                Action::Error(ErrorInfo {
                    kind,
                    span: lexeme.span(),
                    tidx: Some(tidx),
                })
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{Assoc, ParserBuilder};

    #[derive(Debug, PartialEq)]
    enum Calc {
        Add,
        Mul,
        Int,
        Paren,
    }

    fn calc() -> Parser<Calc> {
        ParserBuilder::new()
            .terminal(Assoc::Left, "+", r"\+")
            .terminal(Assoc::Left, "*", r"\*")
            .terminal(Assoc::Token, "(", r"\(")
            .terminal(Assoc::Token, ")", r"\)")
            .terminal(Assoc::Token, "INT", "[0-9]+")
            .production("Expr", &["Expr", "+", "Expr"], Some(Calc::Add))
            .production("Expr", &["Expr", "*", "Expr"], Some(Calc::Mul))
            .production("Expr", &["(", "Expr", ")"], Some(Calc::Paren))
            .production("Expr", &["INT"], Some(Calc::Int))
            .build()
            .unwrap()
    }

    /// Evaluate `s` by driving the parse by hand.
    fn eval(p: &Parser<Calc>, s: &str) -> Result<u64, ErrorInfo> {
        let mut parse = p.consume(s);
        let mut vals = Vec::new();
        loop {
            match parse.action() {
                Action::Accept => return Ok(vals.pop().unwrap()),
                Action::Error(e) => return Err(e),
                Action::Reduce(_) => match parse.reduce_action() {
                    Some(Calc::Int) => vals.push(parse.sigil(0).unwrap().parse().unwrap()),
                    Some(Calc::Add) => {
                        let (r, l) = (vals.pop().unwrap(), vals.pop().unwrap());
                        vals.push(l + r);
                    }
                    Some(Calc::Mul) => {
                        let (r, l) = (vals.pop().unwrap(), vals.pop().unwrap());
                        vals.push(l * r);
                    }
                    Some(Calc::Paren) | None => (),
                },
                _ => (),
            }
            parse.advance();
        }
    }

    #[test]
    fn evaluate() {
        let p = calc();
        assert_eq!(eval(&p, "2+3*4"), Ok(14));
        assert_eq!(eval(&p, "(2+3)*4"), Ok(20));
        assert_eq!(eval(&p, "7"), Ok(7));
    }

    #[test]
    fn step_sequence() {
        let p = calc();
        let mut parse = p.consume("1+2");
        let first = parse.lookahead().unwrap();
        assert_eq!(first.tok_id(), u32::from(p.token_id("INT").unwrap()));
        assert_eq!(first.span(), Span::new(0, 1));
        let mut steps = Vec::new();
        loop {
            let t = parse.trace();
            steps.push(match parse.action() {
                Action::Shift(_) => "shift".to_owned(),
                Action::Goto(_) => "goto".to_owned(),
                _ => t,
            });
            if matches!(parse.action(), Action::Accept | Action::Error(_)) {
                break;
            }
            parse.advance();
        }
        assert_eq!(
            steps,
            vec![
                "shift",
                "reduce by Expr -> 'INT'",
                "goto",
                "shift",
                "shift",
                "reduce by Expr -> 'INT'",
                "goto",
                "reduce by Expr -> Expr '+' Expr",
                "goto",
                "accept"
            ]
        );
        let eof = parse.lookahead().unwrap();
        assert_eq!(eof.tok_id(), u32::from(p.grammar().eof_token_idx()));
        assert_eq!(eof.span(), Span::new(3, 3));
    }

    #[test]
    fn sigils_cover_reduced_rules() {
        let p = calc();
        let mut parse = p.consume("(1+23)*4");
        let mut seen = Vec::new();
        while !matches!(parse.action(), Action::Accept | Action::Error(_)) {
            if parse.reduce_action() == Some(&Calc::Paren) {
                seen.push((
                    parse.sigil(0).unwrap(),
                    parse.sigil(1).unwrap(),
                    parse.sigil(2).unwrap(),
                ));
                assert_eq!(parse.sigil(3), None);
            }
            parse.advance();
        }
        assert_eq!(seen, vec![("(", "1+23", ")")]);
        assert_eq!(parse.sigil(0), None);
    }

    #[test]
    fn syntax_errors() {
        let p = calc();
        let e = eval(&p, "1+*2").unwrap_err();
        assert_eq!(e.kind, ErrorKind::Syntax);
        assert_eq!(e.span, Span::new(2, 3));
        assert_eq!(e.tidx, p.token_id("*"));

        // Premature end of input is reported at the end.
        let e = eval(&p, "(1+2").unwrap_err();
        assert_eq!(e.kind, ErrorKind::Syntax);
        assert_eq!(e.span, Span::new(4, 4));
        assert_eq!(e.tidx, Some(p.grammar().eof_token_idx()));

        let e = eval(&p, "").unwrap_err();
        assert_eq!(e.span, Span::new(0, 0));
    }

    #[test]
    fn unknown_token() {
        let p = calc();
        let e = eval(&p, "1 + 2").unwrap_err();
        assert_eq!(e.kind, ErrorKind::UnknownToken);
        assert_eq!(e.span, Span::new(1, 2));
        assert_eq!(e.tidx, None);
        assert_eq!(e.to_string(), "unknown token at byte 1");

        let mut parse = p.consume("1 + 2");
        parse.advance();
        assert_eq!(parse.lookahead().unwrap_err().span(), Span::new(1, 2));
        assert_eq!(parse.position(), 1);
    }

    #[test]
    fn error_is_terminal() {
        let p = calc();
        let mut parse = p.consume("1)");
        while !matches!(parse.action(), Action::Error(_)) {
            parse.advance();
        }
        let (action, depth) = (parse.action(), parse.stack_len());
        parse.advance();
        parse.advance();
        assert_eq!(parse.action(), action);
        assert_eq!(parse.stack_len(), depth);
        assert!(parse.trace().starts_with("error: syntax error"));
    }

    #[test]
    fn nonassociative() {
        let p = ParserBuilder::<()>::new()
            .terminal(Assoc::Nonassoc, "==", "==")
            .terminal(Assoc::Token, "INT", "[0-9]+")
            .production("Expr", &["Expr", "==", "Expr"], None)
            .production("Expr", &["INT"], None)
            .build()
            .unwrap();
        assert!(p.validate("1==2"));
        let e = p.consume("1==2==3").run().unwrap_err();
        assert_eq!(e.kind, ErrorKind::NonAssociative);
        assert_eq!(e.span, Span::new(4, 6));
        let e = p.consume("1====2").run().unwrap_err();
        assert_eq!(e.kind, ErrorKind::Syntax);
    }

    #[test]
    fn empty_productions() {
        let p = ParserBuilder::new()
            .terminal(Assoc::Token, "ID", "[a-z]+")
            .terminal(Assoc::Token, ",", ",")
            .production("List", &["List", ",", "Item"], Some("list"))
            .production("List", &["Item"], Some("one"))
            .production("Item", &["ID"], Some("id"))
            .production("Item", &[], Some("empty"))
            .build()
            .unwrap();
        assert!(p.validate(""));
        assert!(p.validate("a,,b"));
        let mut parse = p.consume("a,");
        let mut empties = Vec::new();
        while parse.action() != Action::Accept {
            if parse.reduce_action() == Some(&"empty") {
                empties.push(parse.position());
            }
            if parse.reduce_action() == Some(&"list") {
                assert_eq!(parse.sigil(0), Some("a"));
                assert_eq!(parse.sigil(2), Some(""));
            }
            parse.advance();
        }
        assert_eq!(empties, vec![2]);
    }

    #[test]
    fn independent_parses() {
        let p = calc();
        let mut a = p.consume("1+2");
        let b = p.consume("3*");
        a.advance();
        assert_eq!(b.run().unwrap_err().span, Span::new(2, 2));
        assert_eq!(a.run(), Ok(()));
        assert!(p.validate("(1)"));
        assert!(!p.validate("()"));
    }
}
