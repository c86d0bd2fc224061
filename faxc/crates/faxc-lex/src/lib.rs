//! faxc-lex - Lexical Analyzer (Scanner)
//!
//! ============================================================================
//! LEXICAL ANALYSIS THEORY
//! ============================================================================
//!
//! Lexical analysis turns a character stream into a token stream. It is the
//! first and cheapest phase of compilation: everything downstream assumes
//! tokens, never raw bytes.
//!
//! FORMAL DEFINITION:
//! ------------------
//! Let Σ be the source alphabet (valid UTF-8 scalar values).
//! Let Σ* be the set of all finite strings over Σ.
//!
//! The scanner is a function:
//!   scan: Σ* → Token*
//! implemented here as incremental calls to `Scanner::scan_token`, so the
//! function is never materialized as a whole — only one token exists at a
//! time, plus the one token of lookahead the compiler keeps in
//! `current`/`previous`.
//!
//! PROPERTIES:
//! -----------
//! - O(n) total work across a whole source file: every byte is visited by
//!   `advance` a bounded number of times regardless of which token it ends
//!   up inside.
//! - Single-pass, no backtracking: once a byte is consumed it is never
//!   re-scanned under a different hypothesis.
//! - No token buffer: nothing is retained past the current/previous pair,
//!   so scanning a 10 MB file costs one `Token` worth of memory, not 10 MB
//!   of tokens.
//!
//! MAXIMAL MUNCH:
//! --------------
//! At every token boundary the scanner consumes the *longest* prefix that
//! still matches some token rule before deciding which rule won. This is
//! why `!=` is lexed as one token rather than `!` followed by `=`, and why
//! a run of identifier characters is never split early: `advance` keeps
//! pulling characters until the one it has just looked at no longer fits
//! the rule it is inside of fits.
//!
//! IDENTIFIER vs. KEYWORD:
//! ------------------------
//! An identifier lexeme is classified with a hand-coded trie, not a hash
//! lookup into a keyword table: after the first character narrows which
//! branch applies (`c` -> `class`, `continue`? ... `a` -> `and`, ...), each
//! subsequent character either narrows further or the whole run falls
//! through to plain `TokenKind::Identifier`. This costs a handful of
//! character comparisons in the worst case instead of a hash plus a
//! string compare, and it is exactly how the reference scanner this one is
//! built from resolves the identifier/keyword ambiguity.
//!
//! LINE TRACKING:
//! --------------
//! There is no separate source map: every `Token` this scanner produces
//! carries the 1-based source line it started on directly (`Token::line`),
//! and the scanner's own `line` counter is the single source of truth,
//! incremented exactly once per `'\n'` consumed by `advance`. The
//! invariant this relies on: every character of the input passes through
//! `advance` exactly once on the path to becoming part of some token (or
//! whitespace that is skipped before a token begins), so the counter can
//! never under- or over-count a line boundary relative to what a token
//! claims.
//!
//! ERROR TOKENS, NOT EXCEPTIONS:
//! ------------------------------
//! An unterminated string or an unrecognized byte does not abort scanning;
//! it produces a `TokenKind::Error` token carrying the diagnostic message
//! as its lexeme, and scanning continues from there on the next call. This
//! keeps the scanner infallible in the `Result` sense — it always returns
//! a `Token` — and lets the compiler's own panic-mode recovery decide what
//! to do with the error rather than unwinding out of the scan loop.
//!
//! WHAT THIS SCANNER DOES NOT DO:
//! -------------------------------
//! No tokenizer-level macro expansion, no preprocessor directives, no
//! token buffering/lookahead beyond one token, no separate line-table for
//! binary-search lookup — a single in-flight compile has no need for
//! random-access position queries, only the monotonically increasing
//! stream `next_token` already produces.

pub mod scanner;
pub mod token;

pub use scanner::Scanner;
pub use token::{Token, TokenKind};
