//! The uniform runtime value.
//!
//! `spec.md` §3 permits NaN-boxing a 64-bit value as a MAY; we take the
//! safe-Rust path instead (see `DESIGN.md`) and represent it as a plain
//! tagged enum. Every invariant the spec states about equality and type
//! tests still holds — it's just checked by `match` instead of bit
//! inspection.

use crate::object::ObjHandle;
use std::fmt;

#[derive(Clone, Copy, Debug)]
pub enum Value {
    Nil,
    Bool(bool),
    Number(f64),
    Obj(ObjHandle),
}

impl Value {
    #[inline]
    pub fn is_falsey(&self) -> bool {
        matches!(self, Value::Nil | Value::Bool(false))
    }

    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    #[inline]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[inline]
    pub fn as_obj(&self) -> Option<ObjHandle> {
        match self {
            Value::Obj(h) => Some(*h),
            _ => None,
        }
    }

    /// Structural equality per spec.md §4.2: same kind, then by value for
    /// bool/number, by reference identity for objects (sound because every
    /// `String` is interned and every other object compares by identity).
    pub fn values_equal(a: Value, b: Value) -> bool {
        match (a, b) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(x), Value::Bool(y)) => x == y,
            (Value::Number(x), Value::Number(y)) => x == y,
            (Value::Obj(x), Value::Obj(y)) => x == y,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Obj(h) => write!(f, "{h}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falsey_is_nil_or_false() {
        assert!(Value::Nil.is_falsey());
        assert!(Value::Bool(false).is_falsey());
        assert!(!Value::Bool(true).is_falsey());
        assert!(!Value::Number(0.0).is_falsey());
    }

    #[test]
    fn equality_is_reflexive_symmetric_and_type_discriminating() {
        let a = Value::Number(1.0);
        let b = Value::Number(1.0);
        let c = Value::Bool(true);
        assert!(Value::values_equal(a, a));
        assert!(Value::values_equal(a, b));
        assert!(Value::values_equal(a, b) == Value::values_equal(b, a));
        assert!(!Value::values_equal(a, c));
        assert!(!Value::values_equal(Value::Nil, Value::Bool(false)));
    }

    #[quickcheck_macros::quickcheck]
    fn values_equal_is_reflexive(n: i64) -> bool {
        let v = Value::Number(n as f64);
        Value::values_equal(v, v)
    }

    #[quickcheck_macros::quickcheck]
    fn values_equal_is_symmetric(a: i64, b: i64) -> bool {
        let (va, vb) = (Value::Number(a as f64), Value::Number(b as f64));
        Value::values_equal(va, vb) == Value::values_equal(vb, va)
    }

    #[quickcheck_macros::quickcheck]
    fn values_equal_is_transitive(a: i64, b: i64, c: i64) -> bool {
        let (va, vb, vc) = (
            Value::Number(a as f64),
            Value::Number(b as f64),
            Value::Number(c as f64),
        );
        !(Value::values_equal(va, vb) && Value::values_equal(vb, vc)) || Value::values_equal(va, vc)
    }
}
