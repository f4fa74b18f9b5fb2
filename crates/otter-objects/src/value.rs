//! Values stored in slots and elements

use crate::object::ObjectId;
use std::sync::Arc;

/// A value held in a slot or element
///
/// Strings are immutable shared text; their representation belongs to the
/// engine above this layer.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Value {
    /// `undefined`
    #[default]
    Undefined,
    /// `null`
    Null,
    /// Boolean
    Boolean(bool),
    /// 32-bit integer
    Int32(i32),
    /// Double
    Double(f64),
    /// String
    String(Arc<str>),
    /// Object reference
    Object(ObjectId),
    /// Element hole marker; reads surface it as `Undefined`
    Hole,
}

impl Value {
    /// `undefined`
    #[inline]
    pub const fn undefined() -> Self {
        Self::Undefined
    }

    /// Create a number, using `Int32` when the value is integral
    pub fn number(n: f64) -> Self {
        let integral = n.fract() == 0.0 && n >= i32::MIN as f64 && n <= i32::MAX as f64;
        if integral && !(n == 0.0 && n.is_sign_negative()) {
            Self::Int32(n as i32)
        } else {
            Self::Double(n)
        }
    }

    /// Create a string value
    pub fn string(s: &str) -> Self {
        Self::String(Arc::from(s))
    }

    /// Check if undefined
    #[inline]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// Check if this is the hole marker
    #[inline]
    pub fn is_hole(&self) -> bool {
        matches!(self, Self::Hole)
    }

    /// Object reference, if any
    #[inline]
    pub fn as_object(&self) -> Option<ObjectId> {
        match self {
            Self::Object(id) => Some(*id),
            _ => None,
        }
    }

    /// Numeric value, if any
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Int32(i) => Some(*i as f64),
            Self::Double(d) => Some(*d),
            _ => None,
        }
    }

    /// SameValue: like `===` except `NaN` equals itself and `+0` differs
    /// from `-0`
    pub fn same_value(&self, other: &Value) -> bool {
        if let (Some(a), Some(b)) = (self.as_number(), other.as_number()) {
            if a.is_nan() && b.is_nan() {
                return true;
            }
            if a == 0.0 && b == 0.0 {
                return a.is_sign_positive() == b.is_sign_positive();
            }
            return a == b;
        }
        self == other
    }

    /// Convert a hole to `undefined`
    #[inline]
    pub fn unhole(self) -> Self {
        if self.is_hole() { Self::Undefined } else { self }
    }

    /// Whether the value is an object reference
    #[inline]
    pub fn is_object(&self) -> bool {
        matches!(self, Self::Object(_))
    }

    /// `typeof` for primitives; objects answer through their class
    pub fn primitive_type_of(&self) -> &'static str {
        match self {
            Self::Undefined | Self::Hole => "undefined",
            Self::Null => "object",
            Self::Boolean(_) => "boolean",
            Self::Int32(_) | Self::Double(_) => "number",
            Self::String(_) => "string",
            Self::Object(_) => "object",
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int32(i)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::string(s)
    }
}

impl From<ObjectId> for Value {
    fn from(id: ObjectId) -> Self {
        Self::Object(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_prefers_int32() {
        assert_eq!(Value::number(3.0), Value::Int32(3));
        assert_eq!(Value::number(3.5), Value::Double(3.5));
        assert_eq!(Value::number(-0.0), Value::Double(-0.0));
        assert_eq!(Value::number(4_294_967_296.0), Value::Double(4_294_967_296.0));
    }

    #[test]
    fn test_same_value_numbers() {
        let nan = Value::Double(f64::NAN);
        assert!(nan.same_value(&Value::Double(f64::NAN)));
        assert_ne!(nan, Value::Double(f64::NAN));
        assert!(!Value::Int32(0).same_value(&Value::Double(-0.0)));
        assert!(Value::Int32(2).same_value(&Value::Double(2.0)));
        assert!(Value::string("a").same_value(&Value::string("a")));
        assert!(!Value::Null.same_value(&Value::Undefined));
    }

    #[test]
    fn test_hole_reads_as_undefined() {
        assert!(Value::Hole.is_hole());
        assert_eq!(Value::Hole.unhole(), Value::Undefined);
        assert_eq!(Value::Int32(1).unhole(), Value::Int32(1));
    }

    #[test]
    fn test_primitive_type_of() {
        assert_eq!(Value::Null.primitive_type_of(), "object");
        assert_eq!(Value::string("a").primitive_type_of(), "string");
        assert_eq!(Value::Double(1.5).primitive_type_of(), "number");
    }
}
