//! The fax virtual machine: dispatch loop, call frames, closures and
//! native-function binding (spec.md §4.6–§4.7). Compilation lives in
//! `faxc-compiler`; this crate only runs the bytecode it produces.

mod error;
mod natives;
mod vm;

pub use error::{FrameTrace, RuntimeError, VmError};
pub use natives::native_clock;
pub use vm::Vm;
