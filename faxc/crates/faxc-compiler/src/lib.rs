//! faxc-compiler - Single-Pass Pratt Compiler
//!
//! ============================================================================
//! PRATT PARSING THEORY (TOP-DOWN OPERATOR PRECEDENCE)
//! ============================================================================
//!
//! A recursive-descent parser needs a separate grammar production for
//! every precedence level — one function for `==`, another that calls it
//! for `+`/`-`, another that calls *that* for `*`/`/`, and so on — which
//! means adding an operator means adding a function. Pratt parsing
//! collapses all of that into one loop plus a table, by attaching two
//! numbers to every token: how tightly it binds to its *left* neighbor,
//! and how tightly it binds to its *right* one.
//!
//! BINDING POWER:
//! ---------------
//! Each token's `ParseRule` carries a `Precedence` — its binding power —
//! alongside the prefix/infix functions that know how to parse it:
//!
//! ```text
//! Precedence   Operators           Climbs to (rbp for its own operand)
//! -------------------------------------------------------------------
//! None         (no infix use)      —
//! Assignment   =                   Or
//! Or           or                  And
//! And          and                 Equality
//! Equality     == !=               Comparison
//! Comparison   < > <= >=           Term
//! Term         + -                 Factor
//! Factor       * /                 Unary
//! Unary        ! - (prefix)        Call
//! Call         . ( )               Call
//! ```
//!
//! `Precedence::next` is exactly the lbp -> rbp step: parsing the
//! right-hand operand of a left-associative operator at `next()` its own
//! precedence is what stops that operand from swallowing a same-or-lower
//! precedence operator that should instead bind to an *outer* call.
//!
//! ALGORITHM — `parse_precedence(min_prec)`:
//! ------------------------------------------
//! ```text
//! parse_precedence(min_prec):
//!     advance()
//!     prefix_rule = rule_for(previous).prefix
//!     prefix_rule(self)                      // consumes the leading atom
//!
//!     while min_prec <= rule_for(current).precedence:
//!         advance()
//!         infix_rule = rule_for(previous).infix
//!         infix_rule(self)                   // folds in the next operator
//! ```
//!
//! WORKED EXAMPLE — `1 + 2 * 3`:
//! -------------------------------
//! ```text
//! parse_precedence(Assignment)
//!   prefix: emit constant 1
//!   current = '+', Term >= Assignment -> continue
//!     advance past '+'
//!     binary(): parse_precedence(Term.next() = Factor)
//!         prefix: emit constant 2
//!         current = '*', Factor >= Factor -> continue
//!           advance past '*'
//!           binary(): parse_precedence(Factor.next() = Unary)
//!               prefix: emit constant 3
//!               current = ';', None < Unary -> stop, return
//!           emit OP_MULTIPLY                  // 2 * 3 folded first
//!         current = ';', None < Factor -> stop, return
//!     emit OP_ADD                             // 1 + (2 * 3)
//! RESULT: correct precedence, 1 + (2 * 3), with no dedicated grammar
//! production for "term" or "factor" ever written down.
//! ```
//!
//! NO SEPARATE AST:
//! -----------------
//! A conventional Pratt parser builds an expression tree and hands it to
//! a later code-generation pass. This compiler folds code generation into
//! the parse itself: every `prefix`/`infix` function in `rules.rs` emits
//! bytecode directly into the in-progress `Chunk` the moment it recognizes
//! its piece of the expression, rather than building a node to emit later.
//! The worked trace above is therefore also the literal order bytes are
//! written in — there is no tree to walk afterward because there never was
//! a tree.
//!
//! ASSIGNMENT AS A PRECEDENCE LEVEL:
//! -----------------------------------
//! `=` is parsed as the lowest infix precedence rather than as a special
//! statement form, which is what lets `a = b = c` and `a.field = b` fall
//! out of the same `parse_precedence` loop instead of a dedicated
//! assignment grammar rule; whether a given prefix expression is a valid
//! assignment target is checked by the `can_assign` flag threaded through
//! each prefix call, not by the grammar shape.
//!
//! PANIC-MODE ERROR RECOVERY:
//! ---------------------------
//! A syntax error does not abort the compile: the compiler enters panic
//! mode, suppresses further error reports until it resynchronizes at the
//! next statement boundary (a `;` or a keyword that starts a new
//! statement), and keeps parsing so one mistake is reported once instead
//! of cascading into dozens of follow-on errors.

mod compiler;
mod error;
mod rules;

pub use compiler::compile;
pub use error::CompileError;
