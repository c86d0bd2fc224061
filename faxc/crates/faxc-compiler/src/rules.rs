//! The Pratt parse table: for every token kind, how it behaves as the first
//! token of an expression (`prefix`), how it behaves as an infix operator
//! (`infix`), and at what precedence it binds as infix.
//!
//! spec.md §4.4 permits either a dense array keyed by token kind or an
//! enum-dispatched function; a `match` avoids needing `TokenKind` to carry a
//! `usize` discriminant purely for table indexing.

use crate::compiler::Compiler;
use faxc_lex::TokenKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
    None,
    Assignment, // =
    Or,         // or
    And,        // and
    Equality,   // == !=
    Comparison, // < > <= >=
    Term,       // + -
    Factor,     // * /
    Unary,      // ! -
    Call,       // . ()
}

impl Precedence {
    /// One level tighter than `self`, used by `binary()` to parse a
    /// left-associative operator's right operand.
    pub fn next(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call => Precedence::Call,
        }
    }
}

pub type ParseFn = fn(&mut Compiler<'_>, bool);

#[derive(Clone, Copy)]
pub struct ParseRule {
    pub prefix: Option<ParseFn>,
    pub infix: Option<ParseFn>,
    pub precedence: Precedence,
}

fn rule(prefix: Option<ParseFn>, infix: Option<ParseFn>, precedence: Precedence) -> ParseRule {
    ParseRule { prefix, infix, precedence }
}

/// Looks up the rule for `kind`. Every `TokenKind` variant is matched
/// explicitly so that adding a new kind without a rule is a compile error.
pub fn get_rule(kind: TokenKind) -> ParseRule {
    use Precedence::*;
    use TokenKind::*;
    match kind {
        LeftParen => rule(Some(Compiler::grouping), Some(Compiler::call), Call),
        RightParen => rule(None, None, None),
        LeftBrace => rule(None, None, None),
        RightBrace => rule(None, None, None),
        Comma => rule(None, None, None),
        Dot => rule(None, Some(Compiler::dot), Call),
        Minus => rule(Some(Compiler::unary), Some(Compiler::binary), Term),
        Plus => rule(None, Some(Compiler::binary), Term),
        Semicolon => rule(None, None, None),
        Slash => rule(None, Some(Compiler::binary), Factor),
        Star => rule(None, Some(Compiler::binary), Factor),
        Bang => rule(Some(Compiler::unary), None, None),
        BangEqual => rule(None, Some(Compiler::binary), Equality),
        Equal => rule(None, None, None),
        EqualEqual => rule(None, Some(Compiler::binary), Equality),
        Greater => rule(None, Some(Compiler::binary), Comparison),
        GreaterEqual => rule(None, Some(Compiler::binary), Comparison),
        Less => rule(None, Some(Compiler::binary), Comparison),
        LessEqual => rule(None, Some(Compiler::binary), Comparison),
        Identifier => rule(Some(Compiler::variable), None, None),
        String => rule(Some(Compiler::string), None, None),
        Number => rule(Some(Compiler::number), None, None),
        And => rule(None, Some(Compiler::and_), And),
        Class => rule(None, None, None),
        Else => rule(None, None, None),
        False => rule(Some(Compiler::literal), None, None),
        For => rule(None, None, None),
        Fun => rule(None, None, None),
        If => rule(None, None, None),
        Nil => rule(Some(Compiler::literal), None, None),
        Or => rule(None, Some(Compiler::or_), Or),
        Print => rule(None, None, None),
        Return => rule(None, None, None),
        Super => rule(Some(Compiler::super_), None, None),
        This => rule(Some(Compiler::this), None, None),
        True => rule(Some(Compiler::literal), None, None),
        Var => rule(None, None, None),
        While => rule(None, None, None),
        TokenKind::Error => rule(None, None, None),
        Eof => rule(None, None, None),
    }
}
