//! Native (host-provided) functions bound into the global table at VM
//! start-up (spec.md §4.7).

use fgc::Value;
use std::time::{SystemTime, UNIX_EPOCH};

/// `clock()` — wall-clock seconds since a fixed epoch. `original_source`'s
/// `clock()` wraps C's `clock() / CLOCKS_PER_SEC`, i.e. host time rather
/// than CPU time; `SystemTime` is the idiomatic Rust equivalent and needs
/// no `libc` dependency (SPEC_FULL.md §11).
pub fn native_clock(_args: &[Value]) -> Result<Value, String> {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| "system clock is set before the epoch".to_string())?;
    Ok(Value::Number(elapsed.as_secs_f64()))
}
