use crate::gc::AllocatorError;
use compact_str::CompactString;
use core::fmt;
use vlox_bytecode::DecodeError;

/// A runtime error together with the call stack at the point of failure.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeError {
    /// The type of runtime error.
    pub kind: RuntimeErrorKind,
    /// The active frames, innermost first.
    pub trace: Vec<TraceFrame>,
}

/// One line of a runtime error's stack trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    /// The function's name, or `None` for the top-level script.
    pub function: Option<CompactString>,
    /// The source line of the instruction being executed.
    pub line: usize,
}

/// The kinds of errors raised while executing.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeErrorKind {
    /// Attempted to read or assign a global that hasn't been defined.
    UndefinedVariable(CompactString),
    /// Attempted to apply an operator to values of the wrong type.
    TypeMismatch {
        /// The operator's symbol.
        operator: &'static str,
        /// The type of the left or only operand.
        lhs: &'static str,
        /// The type of the right operand of a binary operator.
        rhs: Option<&'static str>,
    },
    /// Attempted to call a value that can't be called.
    NotCallable(&'static str),
    /// Attempted to call a callable with the wrong number of arguments.
    ArgumentCount {
        /// The expected number of arguments.
        expected: u8,
        /// The actual number of arguments.
        actual: u8,
    },
    /// The call depth limit was reached.
    StackOverflow,
    // These errors can only occur if the VM or the frontend is misimplemented.
    /// The instruction stream could not be decoded.
    InvalidOpcode(DecodeError),
    /// An instruction referenced a missing constant, or a constant of the wrong type.
    InvalidConstant,
    /// Popping from an empty stack.
    EmptyStack,
    /// Popping from an empty call stack.
    EmptyCallStack,
    /// An instruction referenced an upvalue the closure does not have.
    InvalidUpvalue,
    /// A backward jump left the chunk.
    InvalidJump,
    /// Open upvalue link list contains closed upvalues.
    InvalidOpenUpvalue,
    /// Attempted to dereference a handle that is invalid.
    Dereference(AllocatorError),
    /// Failed IO operation.
    Io,
}

impl From<AllocatorError> for RuntimeErrorKind {
    fn from(value: AllocatorError) -> Self {
        Self::Dereference(value)
    }
}

impl From<DecodeError> for RuntimeErrorKind {
    fn from(value: DecodeError) -> Self {
        Self::InvalidOpcode(value)
    }
}

impl fmt::Display for RuntimeErrorKind {
    #[expect(
        clippy::min_ident_chars,
        reason = "keep consistent with trait definition."
    )]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::UndefinedVariable(ref name) => write!(f, "Undefined variable '{name}'."),
            Self::TypeMismatch {
                operator: "+",
                lhs,
                rhs: Some(rhs),
            } => write!(
                f,
                "Operands must be two numbers or two strings, got {lhs} and {rhs}."
            ),
            Self::TypeMismatch {
                operator,
                lhs,
                rhs: Some(rhs),
            } => write!(
                f,
                "Operands of '{operator}' must be numbers, got {lhs} and {rhs}."
            ),
            Self::TypeMismatch {
                operator,
                lhs,
                rhs: None,
            } => write!(f, "Operand of '{operator}' must be a number, got {lhs}."),
            Self::NotCallable(type_name) => {
                write!(f, "Can only call functions and classes, got {type_name}.")
            }
            Self::ArgumentCount { expected, actual } => {
                write!(f, "Expected {expected} arguments but got {actual}.")
            }
            Self::StackOverflow => write!(f, "Stack overflow."),
            Self::InvalidOpcode(ref err) => write!(f, "Invalid instruction: {err}."),
            Self::InvalidConstant => write!(f, "Invalid constant."),
            Self::EmptyStack => write!(f, "Empty stack."),
            Self::EmptyCallStack => write!(f, "Empty call stack."),
            Self::InvalidUpvalue => write!(f, "Invalid upvalue."),
            Self::InvalidJump => write!(f, "Invalid jump."),
            Self::InvalidOpenUpvalue => write!(f, "Invalid open upvalue."),
            Self::Dereference(ref err) => write!(f, "Invalid dereference: {err}."),
            Self::Io => write!(f, "Failed IO operation."),
        }
    }
}

impl core::error::Error for RuntimeErrorKind {}

impl fmt::Display for RuntimeError {
    #[expect(
        clippy::min_ident_chars,
        reason = "keep consistent with trait definition."
    )]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        for frame in &self.trace {
            match frame.function {
                Some(ref name) => write!(f, "\n[line {}] in {name}()", frame.line)?,
                None => write!(f, "\n[line {}] in script", frame.line)?,
            }
        }
        Ok(())
    }
}

impl core::error::Error for RuntimeError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        Some(&self.kind)
    }
}

/// An error reported by a frontend while compiling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    /// The line the error was found on.
    pub line: usize,
    /// The message.
    pub message: CompactString,
}

impl CompileError {
    /// Create an error reported at the given line.
    #[must_use]
    pub fn new(line: usize, message: impl Into<CompactString>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

impl fmt::Display for CompileError {
    #[expect(
        clippy::min_ident_chars,
        reason = "keep consistent with trait definition."
    )]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[line {}] Error: {}", self.line, self.message)
    }
}

impl core::error::Error for CompileError {}

/// The outcome of a failed `interpret`.
#[derive(Debug, Clone, PartialEq)]
pub enum InterpretError {
    /// The frontend rejected the source.
    Compile(CompileError),
    /// Execution failed.
    Runtime(RuntimeError),
}

impl From<CompileError> for InterpretError {
    fn from(value: CompileError) -> Self {
        Self::Compile(value)
    }
}

impl From<RuntimeError> for InterpretError {
    fn from(value: RuntimeError) -> Self {
        Self::Runtime(value)
    }
}

impl fmt::Display for InterpretError {
    #[expect(
        clippy::min_ident_chars,
        reason = "keep consistent with trait definition."
    )]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Compile(ref err) => write!(f, "{err}"),
            Self::Runtime(ref err) => write!(f, "{err}"),
        }
    }
}

impl core::error::Error for InterpretError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match *self {
            Self::Compile(ref err) => Some(err),
            Self::Runtime(ref err) => Some(err),
        }
    }
}
