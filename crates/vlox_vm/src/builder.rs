//! Construction of function objects for frontends.

use crate::error::CompileError;
use crate::gc::{AllocatorError, ArenaIndex, Heap};
use crate::object::{Function, LoxString, UpvalueDescriptor};
use crate::value::Value;
use core::fmt;
use vlox_bytecode::{Chunk, ConstantIndex, JumpOffset, LocalSlot, Opcode, UpvalueIndex};

/// The most upvalues one function can capture.
pub const MAX_UPVALUES: usize = u8::MAX as usize + 1;

/// A forward jump whose offset has not yet been resolved.
///
/// Created by [`FunctionBuilder::jump`] and [`FunctionBuilder::jump_if_false`].
/// Resolve it with [`FunctionBuilder::bind`].
#[derive(Debug)]
#[must_use = "an unbound jump skips nothing"]
pub struct Label {
    /// Position of the u16 operand in the instruction stream.
    operand: usize,
}

/// A limit of the instruction format that a function exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildErrorKind {
    /// More than 256 constants.
    TooManyConstants,
    /// A forward jump over more than `u16::MAX` bytes.
    JumpTooLarge,
    /// A loop body of more than `u16::MAX` bytes.
    LoopTooLarge,
    /// More than 256 captured variables.
    TooManyUpvalues,
}

/// An error raised while building a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildError {
    /// What went wrong.
    pub kind: BuildErrorKind,
    /// The line being emitted at the time.
    pub line: usize,
}

impl fmt::Display for BuildErrorKind {
    #[expect(
        clippy::min_ident_chars,
        reason = "keep consistent with trait definition."
    )]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::TooManyConstants => write!(f, "Too many constants in one chunk."),
            Self::JumpTooLarge => write!(f, "Too much code to jump over."),
            Self::LoopTooLarge => write!(f, "Loop body too large."),
            Self::TooManyUpvalues => write!(f, "Too many closure variables in function."),
        }
    }
}

impl fmt::Display for BuildError {
    #[expect(
        clippy::min_ident_chars,
        reason = "keep consistent with trait definition."
    )]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[line {}] {}", self.line, self.kind)
    }
}

impl core::error::Error for BuildError {}

impl From<BuildError> for CompileError {
    fn from(value: BuildError) -> Self {
        Self::new(value.line, value.kind.to_string())
    }
}

/// Builds one function: its bytecode, constants, line table and upvalue descriptors.
///
/// Heap objects created for the function (its name and string constants) are
/// only reachable through the builder until [`FunctionBuilder::finish`]. A
/// frontend that lets the engine collect meanwhile must report them with
/// [`FunctionBuilder::mark`].
#[derive(Debug)]
pub struct FunctionBuilder {
    name: Option<ArenaIndex<LoxString>>,
    arity: u8,
    upvalues: Vec<UpvalueDescriptor>,
    chunk: Chunk<Value>,
    /// The line attached to emitted bytes.
    line: usize,
}

impl FunctionBuilder {
    /// Start the top-level script.
    #[must_use]
    pub const fn script() -> Self {
        Self {
            name: None,
            arity: 0,
            upvalues: Vec::new(),
            chunk: Chunk::new(),
            line: 1,
        }
    }

    /// Start a named function.
    pub fn function(heap: &mut Heap, name: &str, arity: u8) -> Self {
        Self {
            name: Some(heap.intern(name)),
            ..Self::script()
        }
        .with_arity(arity)
    }

    const fn with_arity(mut self, arity: u8) -> Self {
        self.arity = arity;
        self
    }

    const fn error(&self, kind: BuildErrorKind) -> BuildError {
        BuildError {
            kind,
            line: self.line,
        }
    }

    /// Set the line attached to the following instructions.
    pub const fn line(&mut self, line: usize) -> &mut Self {
        self.line = line;
        self
    }

    /// Current byte offset in the instruction stream.
    #[must_use]
    pub fn current_offset(&self) -> usize {
        self.chunk.len()
    }

    /// The chunk built so far.
    #[must_use]
    pub const fn chunk(&self) -> &Chunk<Value> {
        &self.chunk
    }

    /// Emit an instruction.
    pub fn emit(&mut self, opcode: Opcode) -> &mut Self {
        self.chunk.write_opcode(opcode, self.line);
        self
    }

    /// Add a constant to the pool without emitting anything.
    ///
    /// # Errors
    /// Fails once the pool holds 256 constants.
    pub fn add_constant(&mut self, value: Value) -> Result<ConstantIndex, BuildError> {
        self.chunk
            .add_constant(value)
            .ok_or_else(|| self.error(BuildErrorKind::TooManyConstants))
    }

    /// Intern a name and add it to the pool.
    fn name_constant(&mut self, heap: &mut Heap, name: &str) -> Result<ConstantIndex, BuildError> {
        let string = heap.intern(name);
        self.add_constant(Value::String(string))
    }

    /// Push a constant.
    ///
    /// # Errors
    /// Fails once the pool holds 256 constants.
    pub fn constant(&mut self, value: Value) -> Result<&mut Self, BuildError> {
        let index = self.add_constant(value)?;
        Ok(self.emit(Opcode::Constant(index)))
    }

    /// Push a number.
    ///
    /// # Errors
    /// Fails once the pool holds 256 constants.
    pub fn number(&mut self, value: f64) -> Result<&mut Self, BuildError> {
        self.constant(Value::Number(value))
    }

    /// Push an interned string.
    ///
    /// # Errors
    /// Fails once the pool holds 256 constants.
    pub fn string(&mut self, heap: &mut Heap, text: &str) -> Result<&mut Self, BuildError> {
        let index = self.name_constant(heap, text)?;
        Ok(self.emit(Opcode::Constant(index)))
    }

    /// Push a local of the current frame.
    pub fn get_local(&mut self, slot: u8) -> &mut Self {
        self.emit(Opcode::GetLocal(LocalSlot::from(slot)))
    }

    /// Assign the top of the stack to a local of the current frame.
    pub fn set_local(&mut self, slot: u8) -> &mut Self {
        self.emit(Opcode::SetLocal(LocalSlot::from(slot)))
    }

    /// Push a global.
    ///
    /// # Errors
    /// Fails once the pool holds 256 constants.
    pub fn get_global(&mut self, heap: &mut Heap, name: &str) -> Result<&mut Self, BuildError> {
        let index = self.name_constant(heap, name)?;
        Ok(self.emit(Opcode::GetGlobal(index)))
    }

    /// Pop the top of the stack into a new global.
    ///
    /// # Errors
    /// Fails once the pool holds 256 constants.
    pub fn define_global(&mut self, heap: &mut Heap, name: &str) -> Result<&mut Self, BuildError> {
        let index = self.name_constant(heap, name)?;
        Ok(self.emit(Opcode::DefineGlobal(index)))
    }

    /// Assign the top of the stack to a global.
    ///
    /// # Errors
    /// Fails once the pool holds 256 constants.
    pub fn set_global(&mut self, heap: &mut Heap, name: &str) -> Result<&mut Self, BuildError> {
        let index = self.name_constant(heap, name)?;
        Ok(self.emit(Opcode::SetGlobal(index)))
    }

    /// Push one of the current closure's upvalues.
    pub fn get_upvalue(&mut self, index: u8) -> &mut Self {
        self.emit(Opcode::GetUpvalue(UpvalueIndex::from(index)))
    }

    /// Assign the top of the stack to one of the current closure's upvalues.
    pub fn set_upvalue(&mut self, index: u8) -> &mut Self {
        self.emit(Opcode::SetUpvalue(UpvalueIndex::from(index)))
    }

    /// Call the value below `argc` arguments.
    pub fn call(&mut self, argc: u8) -> &mut Self {
        self.emit(Opcode::Call(argc))
    }

    /// Push a closure over a finished function.
    ///
    /// # Errors
    /// Fails once the pool holds 256 constants.
    pub fn closure(&mut self, function: ArenaIndex<Function>) -> Result<&mut Self, BuildError> {
        let index = self.add_constant(Value::Function(function))?;
        Ok(self.emit(Opcode::Closure(index)))
    }

    /// Declare a captured variable and return its upvalue index.
    /// `index` is a local slot of the enclosing function if `is_local`, otherwise
    /// an upvalue index of the enclosing closure. Capturing the same variable
    /// twice returns the same index.
    ///
    /// # Errors
    /// Fails once 256 variables are captured.
    pub fn capture(&mut self, index: u8, is_local: bool) -> Result<u8, BuildError> {
        let descriptor = UpvalueDescriptor { index, is_local };
        let position = match self.upvalues.iter().position(|&existing| existing == descriptor) {
            Some(position) => position,
            None if self.upvalues.len() < MAX_UPVALUES => {
                self.upvalues.push(descriptor);
                self.upvalues.len() - 1
            }
            None => return Err(self.error(BuildErrorKind::TooManyUpvalues)),
        };
        u8::try_from(position).map_err(|_err| self.error(BuildErrorKind::TooManyUpvalues))
    }

    /// Emit an unconditional forward jump.
    pub fn jump(&mut self) -> Label {
        self.emit_jump_placeholder(Opcode::Jump(JumpOffset::from(0_u16)))
    }

    /// Emit a forward jump taken when the top of the stack is falsy.
    /// The condition stays on the stack.
    pub fn jump_if_false(&mut self) -> Label {
        self.emit_jump_placeholder(Opcode::JumpIfFalse(JumpOffset::from(0_u16)))
    }

    fn emit_jump_placeholder(&mut self, opcode: Opcode) -> Label {
        let start = self.chunk.write_opcode(opcode, self.line);
        Label { operand: start + 1 }
    }

    /// Point a forward jump at the current offset.
    ///
    /// # Errors
    /// Fails if the jump would skip more than `u16::MAX` bytes.
    pub fn bind(&mut self, label: Label) -> Result<&mut Self, BuildError> {
        let distance = self.chunk.len() - (label.operand + 2);
        let distance =
            u16::try_from(distance).map_err(|_err| self.error(BuildErrorKind::JumpTooLarge))?;
        self.chunk.patch_u16(label.operand, distance);
        Ok(self)
    }

    /// Emit a backward jump to `target`, an offset obtained from
    /// [`current_offset`](Self::current_offset).
    ///
    /// # Errors
    /// Fails if the jump would go back more than `u16::MAX` bytes.
    pub fn emit_loop(&mut self, target: usize) -> Result<&mut Self, BuildError> {
        let width = Opcode::Loop(JumpOffset::from(0_u16)).width();
        let distance = (self.chunk.len() + width).saturating_sub(target);
        let distance =
            u16::try_from(distance).map_err(|_err| self.error(BuildErrorKind::LoopTooLarge))?;
        Ok(self.emit(Opcode::Loop(JumpOffset::from(distance))))
    }

    /// Mark the objects that only the builder references.
    ///
    /// # Errors
    /// Fails if one of the handles is stale.
    pub fn mark(&self, heap: &mut Heap) -> Result<(), AllocatorError> {
        if let Some(name) = self.name {
            heap.mark_value(Value::String(name))?;
        }
        self.chunk
            .constants()
            .iter()
            .try_for_each(|constant| heap.mark_value(*constant))
    }

    /// Finish the function with an implicit `return nil` and allocate it.
    pub fn finish(mut self, heap: &mut Heap) -> ArenaIndex<Function> {
        self.emit(Opcode::Nil).emit(Opcode::Return);
        heap.make_function(Function {
            name: self.name,
            arity: self.arity,
            upvalues: self.upvalues,
            chunk: self.chunk,
        })
    }
}

impl Default for FunctionBuilder {
    fn default() -> Self {
        Self::script()
    }
}
