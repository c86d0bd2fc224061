//! Compile-time failure, reported as `faxt`'s exit code 65 (spec.md §6/§7).

use std::fmt;

/// The compiler never fails partway with a recoverable cause — panic-mode
/// recovery means it always runs to the end of the token stream and
/// accumulates every diagnostic along the way, so there is exactly one way
/// for `compile` to fail: at least one error was reported.
#[derive(Debug)]
pub struct CompileError {
    /// Rendered `[line N] Error at 'lexeme': message` lines, in report order.
    pub diagnostics: Vec<String>,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, diagnostic) in self.diagnostics.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{diagnostic}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CompileError {}
