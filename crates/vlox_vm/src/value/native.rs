//! The native function interface and runtime builtins.

use crate::{error::RuntimeErrorKind, gc::Heap, value::Value};
use core::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// The native function interface.
///
/// The engine checks the argument count against [`NativeFunction::arity`]
/// before calling.
pub trait NativeFunction: fmt::Debug {
    /// Call the native function given its arguments.
    ///
    /// # Errors
    /// Any error is reported as a runtime error at the call site.
    fn call(&self, heap: &mut Heap, args: &[Value]) -> Result<Value, RuntimeErrorKind>;
    /// The name of the function.
    fn name(&self) -> &str;
    /// The arity of the function.
    fn arity(&self) -> u8;
}

/// The clock builtin.
#[derive(Debug, Clone, Copy, Default)]
pub struct Clock;

impl NativeFunction for Clock {
    fn call(&self, _heap: &mut Heap, _args: &[Value]) -> Result<Value, RuntimeErrorKind> {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Ok(Value::Number(since_epoch.as_secs_f64()))
    }

    fn name(&self) -> &'static str {
        "clock"
    }

    fn arity(&self) -> u8 {
        0
    }
}
