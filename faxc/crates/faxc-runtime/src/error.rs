use std::fmt;

/// One back-trace line: the enclosing function's display name (`"script"`
/// for the implicit top-level function) and the source line active when
/// the error was raised (spec.md §7).
#[derive(Clone, Debug)]
pub struct FrameTrace {
    pub name: String,
    pub line: u32,
}

/// A VM dispatch-loop failure: type errors, arity mismatches, calls on
/// non-callables, undefined globals or properties, stack overflow (spec.md
/// §4.6, §7). The back-trace is captured while the frames are still live,
/// since raising it clears the call stack before returning to the caller.
#[derive(Debug)]
pub struct RuntimeError {
    pub message: String,
    pub trace: Vec<FrameTrace>,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.message)?;
        for (i, frame) in self.trace.iter().enumerate() {
            if frame.name == "script" {
                write!(f, "[line {}] in script", frame.line)?;
            } else {
                write!(f, "[line {}] in {}()", frame.line, frame.name)?;
            }
            if i + 1 != self.trace.len() {
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {}

/// The two user-visible failure modes (spec.md §7), kept as distinct
/// variants so the CLI can map each to its own exit code (65 / 70) instead
/// of collapsing to one generic failure.
#[derive(Debug, thiserror::Error)]
pub enum VmError {
    #[error(transparent)]
    Compile(#[from] faxc_compiler::CompileError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}
