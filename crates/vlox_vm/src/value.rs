pub mod native;

use crate::{
    error::RuntimeErrorKind,
    gc::{ArenaIndex, Heap, Native, ObjectIndex},
    object::{Closure, Function, LoxString},
};
use compact_str::CompactString;
use core::fmt;

/// A value.
#[derive(Debug, Clone, Copy)]
pub enum Value {
    /// Nil.
    Nil,
    /// Booleans.
    Bool(bool),
    /// Numbers.
    Number(f64),
    /// Interned strings.
    String(ArenaIndex<LoxString>),
    /// Bare functions, as stored in constant pools.
    Function(ArenaIndex<Function>),
    /// Closures.
    Closure(ArenaIndex<Closure>),
    /// Native functions.
    Native(ArenaIndex<Native>),
}

impl PartialEq for Value {
    #[expect(clippy::float_cmp, reason = "language equality is IEEE equality.")]
    fn eq(&self, other: &Self) -> bool {
        match (*self, *other) {
            (Self::Nil, Self::Nil) => true,
            (Self::Bool(lhs), Self::Bool(rhs)) => lhs == rhs,
            (Self::Number(lhs), Self::Number(rhs)) => lhs == rhs,
            (Self::String(lhs), Self::String(rhs)) => lhs == rhs,
            (Self::Function(lhs), Self::Function(rhs)) => lhs == rhs,
            (Self::Closure(lhs), Self::Closure(rhs)) => lhs == rhs,
            (Self::Native(lhs), Self::Native(rhs)) => lhs == rhs,
            _ => false,
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl Value {
    /// The name of the value's type.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match *self {
            Self::Nil => "nil",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Function(_) => "function",
            Self::Closure(_) => "closure",
            Self::Native(_) => "native",
        }
    }

    /// The heap object the value refers to, if any.
    #[must_use]
    pub const fn as_object(&self) -> Option<ObjectIndex> {
        match *self {
            Self::Nil | Self::Bool(_) | Self::Number(_) => None,
            Self::String(index) => Some(ObjectIndex::String(index)),
            Self::Function(index) => Some(ObjectIndex::Function(index)),
            Self::Closure(index) => Some(ObjectIndex::Closure(index)),
            Self::Native(index) => Some(ObjectIndex::Native(index)),
        }
    }

    /// Return whether the value is truthy.
    #[must_use]
    pub const fn truthy(&self) -> bool {
        match *self {
            Self::Nil => false,
            Self::Bool(val) => val,
            _ => true,
        }
    }

    /// The error for a binary operator applied to the wrong operand types.
    const fn mismatch(operator: &'static str, lhs: Self, rhs: Self) -> RuntimeErrorKind {
        RuntimeErrorKind::TypeMismatch {
            operator,
            lhs: lhs.type_name(),
            rhs: Some(rhs.type_name()),
        }
    }

    /// Apply a numeric binary operator.
    fn arithmetic(
        operator: &'static str,
        lhs: Self,
        rhs: Self,
        apply: impl FnOnce(f64, f64) -> Self,
    ) -> Result<Self, RuntimeErrorKind> {
        match (lhs, rhs) {
            (Self::Number(lhs), Self::Number(rhs)) => Ok(apply(lhs, rhs)),
            _ => Err(Self::mismatch(operator, lhs, rhs)),
        }
    }

    /// Execute add. Two strings are concatenated into a new interned string.
    ///
    /// # Errors
    /// Fails unless both operands are numbers or both are strings.
    pub fn add(heap: &mut Heap, lhs: Self, rhs: Self) -> Result<Self, RuntimeErrorKind> {
        match (lhs, rhs) {
            (Self::Number(lhs), Self::Number(rhs)) => Ok(Self::Number(lhs + rhs)),
            (Self::String(lhs), Self::String(rhs)) => {
                let mut concat = CompactString::new(heap.resolve_string(lhs)?);
                concat.push_str(heap.resolve_string(rhs)?);
                Ok(Self::String(heap.intern_owned(concat)))
            }
            _ => Err(Self::mismatch("+", lhs, rhs)),
        }
    }

    /// Execute subtraction.
    ///
    /// # Errors
    /// Fails unless both operands are numbers.
    pub fn sub(self, rhs: Self) -> Result<Self, RuntimeErrorKind> {
        Self::arithmetic("-", self, rhs, |lhs, rhs| Self::Number(lhs - rhs))
    }

    /// Execute multiplication.
    ///
    /// # Errors
    /// Fails unless both operands are numbers.
    pub fn mul(self, rhs: Self) -> Result<Self, RuntimeErrorKind> {
        Self::arithmetic("*", self, rhs, |lhs, rhs| Self::Number(lhs * rhs))
    }

    /// Execute division.
    ///
    /// # Errors
    /// Fails unless both operands are numbers.
    pub fn div(self, rhs: Self) -> Result<Self, RuntimeErrorKind> {
        Self::arithmetic("/", self, rhs, |lhs, rhs| Self::Number(lhs / rhs))
    }

    /// Evaluate less than.
    ///
    /// # Errors
    /// Fails unless both operands are numbers.
    pub fn less_than(self, rhs: Self) -> Result<Self, RuntimeErrorKind> {
        Self::arithmetic("<", self, rhs, |lhs, rhs| Self::Bool(lhs < rhs))
    }

    /// Evaluate less than or equal.
    ///
    /// # Errors
    /// Fails unless both operands are numbers.
    pub fn less_than_or_equal(self, rhs: Self) -> Result<Self, RuntimeErrorKind> {
        Self::arithmetic("<=", self, rhs, |lhs, rhs| Self::Bool(lhs <= rhs))
    }

    /// Evaluate greater than.
    ///
    /// # Errors
    /// Fails unless both operands are numbers.
    pub fn greater_than(self, rhs: Self) -> Result<Self, RuntimeErrorKind> {
        Self::arithmetic(">", self, rhs, |lhs, rhs| Self::Bool(lhs > rhs))
    }

    /// Evaluate greater than or equal.
    ///
    /// # Errors
    /// Fails unless both operands are numbers.
    pub fn greater_than_or_equal(self, rhs: Self) -> Result<Self, RuntimeErrorKind> {
        Self::arithmetic(">=", self, rhs, |lhs, rhs| Self::Bool(lhs >= rhs))
    }

    /// Evaluate numeric negation.
    ///
    /// # Errors
    /// Fails unless the operand is a number.
    pub const fn neg(self) -> Result<Self, RuntimeErrorKind> {
        match self {
            Self::Number(val) => Ok(Self::Number(-val)),
            _ => Err(RuntimeErrorKind::TypeMismatch {
                operator: "-",
                lhs: self.type_name(),
                rhs: None,
            }),
        }
    }
}

impl Value {
    /// Pair the value with the heap so that it can be displayed.
    #[must_use]
    pub const fn resolve<'value>(&'value self, heap: &'value Heap) -> ResolvedValue<'value> {
        ResolvedValue { inner: self, heap }
    }
}

/// A value that can be displayed the way `print` shows it.
#[derive(Debug)]
pub struct ResolvedValue<'value> {
    /// The value to print.
    inner: &'value Value,
    /// The heap to use to dereference handles.
    heap: &'value Heap,
}

impl fmt::Display for ResolvedValue<'_> {
    #[expect(
        clippy::min_ident_chars,
        reason = "keep consistent with trait definition."
    )]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let function_name = |handle| match self.heap.resolve_function(handle) {
            Ok(function) => Ok(function.name()),
            Err(_) => Err(fmt::Error),
        };
        let name = match *self.inner {
            Value::Nil => return write!(f, "nil"),
            Value::Bool(value) => return write!(f, "{value}"),
            Value::Number(value) => return write!(f, "{value}"),
            Value::String(handle) => {
                let string = self.heap.resolve_string(handle).map_err(|_err| fmt::Error)?;
                return write!(f, "{string}");
            }
            Value::Native(_) => return write!(f, "<native fn>"),
            Value::Function(handle) => function_name(handle)?,
            Value::Closure(handle) => {
                let closure = self
                    .heap
                    .resolve_closure(handle)
                    .map_err(|_err| fmt::Error)?;
                function_name(closure.function())?
            }
        };
        match name {
            Some(name) => {
                let name = self.heap.resolve_string(name).map_err(|_err| fmt::Error)?;
                write!(f, "<fn {name}>")
            }
            None => write!(f, "<script>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Value;
    use crate::config::VmConfig;
    use crate::error::RuntimeErrorKind;
    use crate::gc::Heap;

    #[test]
    fn numbers_display_without_trailing_zeros() {
        let heap = Heap::new(&VmConfig::default());
        for (number, expected) in [
            (3.0, "3"),
            (-0.0, "-0"),
            (2.5, "2.5"),
            (1e21, "1000000000000000000000"),
        ] {
            assert_eq!(Value::Number(number).resolve(&heap).to_string(), expected);
        }
        assert_eq!(Value::Nil.resolve(&heap).to_string(), "nil");
        assert_eq!(Value::Bool(false).resolve(&heap).to_string(), "false");
    }

    #[test]
    fn concatenation_is_interned() {
        let mut heap = Heap::new(&VmConfig::default());
        let lhs = Value::String(heap.intern("foo"));
        let rhs = Value::String(heap.intern("bar"));
        let joined = Value::add(&mut heap, lhs, rhs).unwrap();
        let literal = Value::String(heap.intern("foobar"));
        assert_eq!(joined, literal);
        assert_eq!(joined.resolve(&heap).to_string(), "foobar");
    }

    #[test]
    fn equality_is_by_identity_or_number() {
        let mut heap = Heap::new(&VmConfig::default());
        let string = Value::String(heap.intern("1"));
        assert_eq!(Value::Number(1.0), Value::Number(1.0));
        assert_ne!(Value::Number(f64::NAN), Value::Number(f64::NAN));
        assert_ne!(Value::Nil, Value::Bool(false));
        assert_ne!(string, Value::Number(1.0));
        assert!(!Value::Nil.truthy());
        assert!(Value::Number(0.0).truthy());
        assert!(string.truthy());
    }

    #[test]
    fn mismatches_name_operand_types() {
        let mut heap = Heap::new(&VmConfig::default());
        let string = Value::String(heap.intern("a"));
        let err = Value::add(&mut heap, Value::Number(1.0), string).unwrap_err();
        assert_eq!(
            err,
            RuntimeErrorKind::TypeMismatch {
                operator: "+",
                lhs: "number",
                rhs: Some("string"),
            }
        );
        assert_eq!(
            Value::Nil.neg().unwrap_err(),
            RuntimeErrorKind::TypeMismatch {
                operator: "-",
                lhs: "nil",
                rhs: None,
            }
        );
    }
}
