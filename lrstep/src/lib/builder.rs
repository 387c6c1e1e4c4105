use std::{
    collections::{HashMap, HashSet},
    error::Error,
    fmt,
};

use cfgrammar::{
    Symbol,
    yacc::{YaccGrammar, YaccKind, YaccOriginalActionKind},
};
use lrtable::{Minimiser, from_yacc};
use tracing::debug;

use crate::{
    lexer::{LexBuildError, LexerDef},
    parser::Parser,
};

/// How a terminal takes part in shift/reduce conflict resolution. Every non-`Token` terminal
/// gets its own precedence level, higher than those of all terminals registered before it.
/// There is no precedence-only variant: [cfgrammar] has no `%precedence` declaration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Assoc {
    /// A plain token with no precedence.
    Token,
    Left,
    Right,
    Nonassoc,
}

/// Identifies a production by its position in registration order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProdId(pub usize);

struct Terminal {
    assoc: Assoc,
    name: String,
    pattern: String,
}

struct Production<A> {
    lhs: String,
    rhs: Vec<String>,
    action: Option<A>,
}

/// Collects terminals and productions and builds them into a [Parser]. The first production's
/// left-hand side is the grammar's start rule.
///
/// ```text
/// let parser = ParserBuilder::new()
///     .terminal(Assoc::Left, "+", r"\+")
///     .terminal(Assoc::Token, "INT", "[0-9]+")
///     .production("Expr", &["Expr", "+", "INT"], Some(Act::Add))
///     .production("Expr", &["INT"], None)
///     .build()?;
/// ```
pub struct ParserBuilder<A> {
    terminals: Vec<Terminal>,
    productions: Vec<Production<A>>,
    error_on_conflicts: bool,
}

impl<A> ParserBuilder<A> {
    pub fn new() -> Self {
        ParserBuilder {
            terminals: Vec::new(),
            productions: Vec::new(),
            error_on_conflicts: true,
        }
    }

    /// Register the terminal `name`, lexed by the regular expression `pattern`.
    pub fn terminal(mut self, assoc: Assoc, name: &str, pattern: &str) -> Self {
        self.terminals.push(Terminal {
            assoc,
            name: name.to_owned(),
            pattern: pattern.to_owned(),
        });
        self
    }

    /// Register the production `lhs: rhs`. An empty `rhs` is an epsilon production. `action`
    /// is handed back by [crate::Parse::reduce_action] whenever this production is reduced.
    pub fn production(mut self, lhs: &str, rhs: &[&str], action: Option<A>) -> Self {
        self.productions.push(Production {
            lhs: lhs.to_owned(),
            rhs: rhs.iter().map(|s| (*s).to_owned()).collect(),
            action,
        });
        self
    }

    /// If set to `true` (the default), [build](ParserBuilder::build) fails on grammars with
    /// shift/reduce or reduce/reduce conflicts not resolved by precedence.
    pub fn error_on_conflicts(mut self, b: bool) -> Self {
        self.error_on_conflicts = b;
        self
    }

    /// The number of productions registered so far.
    pub fn prods_len(&self) -> usize {
        self.productions.len()
    }

    /// Build the grammar, its state table, and the lexer. Terminal IDs in the lexer are the
    /// grammar's `TIdx`s, so lexer and parser can never disagree about them.
    pub fn build(self) -> Result<Parser<A>, BuildError> {
        self.validate()?;
        let yacc_src = self.yacc_src();
        let grm = YaccGrammar::new(
            YaccKind::Original(YaccOriginalActionKind::NoAction),
            &yacc_src,
        )
        .map_err(|errs| {
            BuildError::new(BuildErrorKind::Grammar(
                errs.iter().map(|e| e.to_string()).collect(),
            ))
        })?;
        let (sgraph, stable) = from_yacc(&grm, Minimiser::Pager)
            .map_err(|e| BuildError::new(BuildErrorKind::StateTable(e.to_string())))?;
        if let Some(c) = stable.conflicts() {
            if self.error_on_conflicts {
                return Err(BuildError::new(BuildErrorKind::Conflicts {
                    shift_reduce: c.sr_len(),
                    reduce_reduce: c.rr_len(),
                }));
            }
            debug!(
                shift_reduce = c.sr_len(),
                reduce_reduce = c.rr_len(),
                "grammar has conflicts"
            );
        }

        let mut lexerdef = LexerDef::new();
        for t in &self.terminals {
            let tidx = grm
                .token_idx(&t.name)
                .ok_or_else(|| BuildError::new(BuildErrorKind::UnknownSymbol(t.name.clone())))?;
            lexerdef
                .push(u32::from(tidx), &t.name, &t.pattern)
                .map_err(|e| BuildError::new(BuildErrorKind::Pattern(e)))?;
        }

        // Map cfgrammar's production indexes back onto registration order.
        let registered = self
            .productions
            .iter()
            .enumerate()
            .map(|(i, p)| ((p.lhs.as_str(), p.rhs.iter().map(String::as_str).collect()), i))
            .collect::<HashMap<(&str, Vec<&str>), usize>>();
        let mut prod_ids = vec![None; usize::from(grm.prods_len())];
        let mut found = 0;
        for pidx in grm.iter_pidxs() {
            let lhs = grm.rule_name_str(grm.prod_to_rule(pidx));
            let rhs = grm
                .prod(pidx)
                .iter()
                .map(|sym| match *sym {
                    Symbol::Rule(ridx) => grm.rule_name_str(ridx),
                    Symbol::Token(tidx) => grm.token_name(tidx).unwrap_or(""),
                })
                .collect::<Vec<_>>();
            if let Some(&i) = registered.get(&(lhs, rhs)) {
                prod_ids[usize::from(pidx)] = Some(ProdId(i));
                found += 1;
            }
        }
        if found != self.productions.len() {
            return Err(BuildError::new(BuildErrorKind::Grammar(vec![format!(
                "only {} of {} productions were found in the built grammar",
                found,
                self.productions.len()
            )])));
        }

        let actions = self.productions.into_iter().map(|p| p.action).collect();
        debug!(
            prods = usize::from(grm.prods_len()),
            tokens = usize::from(grm.tokens_len()),
            "built parser"
        );
        Ok(Parser {
            grm,
            sgraph,
            stable,
            lexerdef,
            yacc_src,
            prod_ids,
            actions,
        })
    }

    fn validate(&self) -> Result<(), BuildError> {
        if self.productions.is_empty() {
            return Err(BuildError::new(BuildErrorKind::NoProductions));
        }
        let mut terminals = HashSet::new();
        for t in &self.terminals {
            if t.name.is_empty()
                || t.name.chars().any(char::is_whitespace)
                || (t.name.contains('\'') && t.name.contains('"'))
            {
                return Err(BuildError::new(BuildErrorKind::InvalidName(t.name.clone())));
            }
            if !terminals.insert(t.name.as_str()) {
                return Err(BuildError::new(BuildErrorKind::DuplicateTerminal(
                    t.name.clone(),
                )));
            }
        }
        let rules = self
            .productions
            .iter()
            .map(|p| p.lhs.as_str())
            .collect::<HashSet<_>>();
        for lhs in &rules {
            if !is_rule_name(lhs) {
                return Err(BuildError::new(BuildErrorKind::InvalidName((*lhs).to_owned())));
            }
            if terminals.contains(lhs) {
                return Err(BuildError::new(BuildErrorKind::TerminalAsRule(
                    (*lhs).to_owned(),
                )));
            }
        }
        let mut seen = HashSet::new();
        for p in &self.productions {
            if let Some(sym) = p
                .rhs
                .iter()
                .find(|s| !terminals.contains(s.as_str()) && !rules.contains(s.as_str()))
            {
                return Err(BuildError::new(BuildErrorKind::UnknownSymbol(sym.clone())));
            }
            if !seen.insert((p.lhs.as_str(), &p.rhs)) {
                return Err(BuildError::new(BuildErrorKind::DuplicateProduction(
                    pp_production(&p.lhs, &p.rhs),
                )));
            }
        }
        Ok(())
    }

    /// Render the registered grammar as Original Yacc source.
    fn yacc_src(&self) -> String {
        let terminals = self
            .terminals
            .iter()
            .map(|t| t.name.as_str())
            .collect::<HashSet<_>>();
        let mut s = format!("%start {}\n", self.productions[0].lhs);
        let plain = self
            .terminals
            .iter()
            .filter(|t| t.assoc == Assoc::Token)
            .map(|t| quote_token(&t.name))
            .collect::<Vec<_>>();
        if !plain.is_empty() {
            s.push_str(&format!("%token {}\n", plain.join(" ")));
        }
        for t in &self.terminals {
            let decl = match t.assoc {
                Assoc::Token => continue,
                Assoc::Left => "%left",
                Assoc::Right => "%right",
                Assoc::Nonassoc => "%nonassoc",
            };
            s.push_str(&format!("{} {}\n", decl, quote_token(&t.name)));
        }
        s.push_str("%%\n");

        let mut lhss = Vec::new();
        for p in &self.productions {
            if !lhss.contains(&p.lhs.as_str()) {
                lhss.push(p.lhs.as_str());
            }
        }
        for lhs in lhss {
            let alts = self
                .productions
                .iter()
                .filter(|p| p.lhs == lhs)
                .map(|p| {
                    p.rhs
                        .iter()
                        .map(|sym| {
                            if terminals.contains(sym.as_str()) {
                                quote_token(sym)
                            } else {
                                sym.clone()
                            }
                        })
                        .collect::<Vec<_>>()
                        .join(" ")
                })
                .collect::<Vec<_>>();
            s.push_str(&format!("{}: {};\n", lhs, alts.join("\n    | ")));
        }
        s
    }
}

fn is_rule_name(n: &str) -> bool {
    let mut chars = n.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => (),
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Quote a terminal name the way Yacc source refers to it.
pub(crate) fn quote_token(n: &str) -> String {
    if n.contains('\'') {
        format!("\"{}\"", n)
    } else {
        format!("'{}'", n)
    }
}

fn pp_production(lhs: &str, rhs: &[String]) -> String {
    if rhs.is_empty() {
        format!("{} -> %empty", lhs)
    } else {
        format!("{} -> {}", lhs, rhs.join(" "))
    }
}

/// Any error from [ParserBuilder::build].
#[derive(Debug)]
pub struct BuildError {
    pub kind: BuildErrorKind,
}

/// The various different reasons a grammar can fail to build.
#[derive(Debug)]
pub enum BuildErrorKind {
    NoProductions,
    InvalidName(String),
    DuplicateTerminal(String),
    DuplicateProduction(String),
    TerminalAsRule(String),
    UnknownSymbol(String),
    /// cfgrammar rejected the generated grammar.
    Grammar(Vec<String>),
    StateTable(String),
    Conflicts {
        shift_reduce: usize,
        reduce_reduce: usize,
    },
    Pattern(LexBuildError),
}

impl BuildError {
    fn new(kind: BuildErrorKind) -> Self {
        BuildError { kind }
    }
}

impl Error for BuildError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self.kind {
            BuildErrorKind::Pattern(ref e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kind {
            BuildErrorKind::NoProductions => write!(f, "No productions registered"),
            BuildErrorKind::InvalidName(ref n) => write!(f, "Invalid symbol name '{}'", n),
            BuildErrorKind::DuplicateTerminal(ref n) => {
                write!(f, "Terminal '{}' registered more than once", n)
            }
            BuildErrorKind::DuplicateProduction(ref p) => {
                write!(f, "Production {} registered more than once", p)
            }
            BuildErrorKind::TerminalAsRule(ref n) => {
                write!(f, "'{}' is both a terminal and a rule", n)
            }
            BuildErrorKind::UnknownSymbol(ref n) => {
                write!(f, "Symbol '{}' is neither a terminal nor a rule", n)
            }
            BuildErrorKind::Grammar(ref errs) => write!(f, "Invalid grammar: {}", errs.join("; ")),
            BuildErrorKind::StateTable(ref e) => write!(f, "Can't build state table: {}", e),
            BuildErrorKind::Conflicts {
                shift_reduce,
                reduce_reduce,
            } => write!(
                f,
                "Grammar has {} shift/reduce and {} reduce/reduce conflicts",
                shift_reduce, reduce_reduce
            ),
            BuildErrorKind::Pattern(ref e) => fmt::Display::fmt(e, f),
        }
    }
}
