//! A stack-based virtual machine with a tracing garbage collector.

extern crate alloc;

/// Function construction for frontends.
pub mod builder;
/// VM configuration.
pub mod config;
/// Compile and runtime errors.
pub mod error;
/// The compiler boundary.
pub mod frontend;
/// Allocator and garbage collector.
pub mod gc;
/// The IO interface.
pub mod io;
/// Heap objects.
pub mod object;
/// Hash table for globals and interning.
pub mod table;
/// The VM values.
pub mod value;

use crate::{
    config::VmConfig,
    error::{InterpretError, RuntimeError, RuntimeErrorKind, TraceFrame},
    frontend::Frontend,
    gc::{ArenaIndex, GcStats, Heap, Native},
    io::IoContext,
    object::{Closure, Function, LoxString, Upvalue},
    table::Table,
    value::{
        Value,
        native::Clock,
    },
};
use alloc::rc::Rc;
use compact_str::CompactString;
use core::fmt::Write as _;
use vlox_bytecode::{ConstantIndex, LocalSlot, Opcode, StackSlot};

/// The control flow of the VM execution.
#[derive(Debug)]
enum ControlFlow {
    /// Continue execution.
    Continue,
    /// Finish execution.
    Done,
}

/// A call frame.
#[derive(Debug, Clone, Copy)]
struct CallFrame {
    /// The offset of the next instruction.
    ip: usize,
    /// The call frame's closure.
    closure: ArenaIndex<Closure>,
    /// The closure's function.
    function: ArenaIndex<Function>,
    /// The stack slot of the callee. Locals start here.
    base: StackSlot,
}

/// The virtual machine.
#[derive(Debug)]
pub struct Vm {
    /// The call stack.
    call_stack: Vec<CallFrame>,
    /// The value stack.
    stack: Vec<Value>,
    /// The globals.
    globals: Table,
    /// The open upvalues that may need to be closed, highest slot first.
    open_upvalues: Option<ArenaIndex<Upvalue>>,
    /// Every heap object.
    heap: Heap,
    /// Limits and collector tuning.
    config: VmConfig,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new(VmConfig::default())
    }
}

impl Vm {
    /// Initialise the virtual machine with the builtins defined.
    #[must_use]
    pub fn new(config: VmConfig) -> Self {
        let mut vm = Self {
            call_stack: Vec::with_capacity(config.max_frames),
            stack: Vec::new(),
            globals: Table::new(),
            open_upvalues: None,
            heap: Heap::new(&config),
            config,
        };
        vm.define_native(Rc::new(Clock));
        vm
    }

    /// Bind a native function to a global of the same name.
    pub fn define_native(&mut self, native: Native) {
        let key = self.heap.intern_key(native.name());
        let handle = self.heap.make_native(native);
        self.globals.set(key, Value::Native(handle));
    }

    /// Compile the source with the frontend and run it.
    ///
    /// # Errors
    /// Fails with the frontend's compile error or the first runtime error.
    pub fn interpret<F: Frontend>(
        &mut self,
        frontend: &mut F,
        context: &mut impl IoContext,
        source: &str,
    ) -> Result<(), InterpretError> {
        tracing::debug!("Compiling {} bytes of source.", source.len());
        let function = frontend.compile(source, &mut self.heap)?;
        self.run(context, function, Some(&*frontend))?;
        Ok(())
    }

    /// Run a compiled top-level function.
    ///
    /// # Errors
    /// This function will error at the first runtime error it encounters.
    pub fn run_function(
        &mut self,
        context: &mut impl IoContext,
        function: ArenaIndex<Function>,
    ) -> Result<(), RuntimeError> {
        self.run(context, function, None)
    }

    /// Run a function, resetting the stacks if it fails.
    fn run(
        &mut self,
        context: &mut impl IoContext,
        function: ArenaIndex<Function>,
        roots: Option<&dyn Frontend>,
    ) -> Result<(), RuntimeError> {
        let result = match self.enter(function) {
            Ok(()) => self.execute(context, roots),
            Err(kind) => Err(self.error(kind)),
        };
        if result.is_err() {
            self.reset();
        }
        result
    }

    /// Wrap the function in a closure and call it.
    fn enter(&mut self, function: ArenaIndex<Function>) -> Result<(), RuntimeErrorKind> {
        let closure = self.heap.make_closure(Closure {
            function,
            upvalues: Vec::new(),
        });
        self.push(Value::Closure(closure))?;
        self.call_closure(closure, 0)
    }

    /// Fetch, decode and execute until the outermost frame returns.
    fn execute(
        &mut self,
        context: &mut impl IoContext,
        roots: Option<&dyn Frontend>,
    ) -> Result<(), RuntimeError> {
        loop {
            if self.config.stress_gc || self.heap.should_collect() {
                self.collect(roots).map_err(|kind| self.error(kind))?;
            }
            if tracing::enabled!(tracing::Level::TRACE) {
                self.trace_execution();
            }
            match self.step(context).map_err(|kind| self.error(kind))? {
                ControlFlow::Continue => {}
                ControlFlow::Done => return Ok(()),
            }
        }
    }

    /// Attach the current call stack to an error.
    fn error(&self, kind: RuntimeErrorKind) -> RuntimeError {
        let trace = self
            .call_stack
            .iter()
            .rev()
            .map(|frame| {
                let function = self.heap.resolve_function(frame.function).ok();
                let offset = frame.ip.saturating_sub(1);
                let line = function
                    .and_then(|function| function.chunk().line_for_offset(offset))
                    .unwrap_or_default();
                let name = function
                    .and_then(Function::name)
                    .and_then(|name| self.heap.resolve_string(name).ok())
                    .map(CompactString::from);
                TraceFrame {
                    function: name,
                    line,
                }
            })
            .collect();
        RuntimeError { kind, trace }
    }

    /// Discard all execution state after an error. Globals are kept.
    fn reset(&mut self) {
        if self.close_upvalues(StackSlot::from(0_u32)).is_err() {
            self.open_upvalues = None;
        }
        self.stack.clear();
        self.call_stack.clear();
    }

    #[expect(clippy::too_many_lines, reason = "this function is hard to decompose.")]
    fn step(&mut self, context: &mut impl IoContext) -> Result<ControlFlow, RuntimeErrorKind> {
        let frame = *self.call_stack.last().ok_or(RuntimeErrorKind::EmptyCallStack)?;
        let (width, opcode) = {
            let function = self.heap.resolve_function(frame.function)?;
            Opcode::decode(function.chunk().at(frame.ip))?
        };
        let ip = frame.ip + width;
        self.frame_mut()?.ip = ip;

        match opcode {
            Opcode::Constant(index) => {
                let value = self.constant(frame.function, index)?;
                self.push(value)?;
            }
            Opcode::Nil => self.push(Value::Nil)?,
            Opcode::True => self.push(Value::Bool(true))?,
            Opcode::False => self.push(Value::Bool(false))?,
            Opcode::Pop => {
                self.pop()?;
            }
            Opcode::Dup => self.push(self.peek(0)?)?,
            Opcode::GetLocal(slot) => {
                let value = *self
                    .stack
                    .get(local(frame, slot))
                    .ok_or(RuntimeErrorKind::EmptyStack)?;
                self.push(value)?;
            }
            Opcode::SetLocal(slot) => {
                let value = self.peek(0)?;
                *self
                    .stack
                    .get_mut(local(frame, slot))
                    .ok_or(RuntimeErrorKind::EmptyStack)? = value;
            }
            Opcode::GetGlobal(index) => {
                let name = self.string_constant(frame.function, index)?;
                let key = self.heap.key(name)?;
                match self.globals.get(key) {
                    Some(value) => self.push(value)?,
                    None => {
                        let name = self.heap.resolve_string(name)?;
                        return Err(RuntimeErrorKind::UndefinedVariable(name.into()));
                    }
                }
            }
            Opcode::DefineGlobal(index) => {
                let name = self.string_constant(frame.function, index)?;
                let key = self.heap.key(name)?;
                let value = self.peek(0)?;
                self.globals.set(key, value);
                self.pop()?;
            }
            Opcode::SetGlobal(index) => {
                let name = self.string_constant(frame.function, index)?;
                let key = self.heap.key(name)?;
                let value = self.peek(0)?;
                self.globals.set(key, value);
            }
            Opcode::GetUpvalue(index) => {
                let handle = self.upvalue(frame.closure, index.to_usize())?;
                let value = match *self.heap.resolve_upvalue(handle)? {
                    Upvalue::Open { slot, .. } => *self
                        .stack
                        .get(slot.to_usize())
                        .ok_or(RuntimeErrorKind::EmptyStack)?,
                    Upvalue::Closed { value } => value,
                };
                self.push(value)?;
            }
            Opcode::SetUpvalue(index) => {
                let value = self.peek(0)?;
                let handle = self.upvalue(frame.closure, index.to_usize())?;
                match *self.heap.resolve_upvalue_mut(handle)? {
                    Upvalue::Open { slot, .. } => {
                        *self
                            .stack
                            .get_mut(slot.to_usize())
                            .ok_or(RuntimeErrorKind::EmptyStack)? = value;
                    }
                    Upvalue::Closed {
                        value: ref mut closed_value,
                    } => {
                        *closed_value = value;
                    }
                }
            }
            Opcode::Eq => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                self.push(Value::Bool(lhs == rhs))?;
            }
            Opcode::Ne => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                self.push(Value::Bool(lhs != rhs))?;
            }
            Opcode::Gt => self.binary(Value::greater_than)?,
            Opcode::Ge => self.binary(Value::greater_than_or_equal)?,
            Opcode::Lt => self.binary(Value::less_than)?,
            Opcode::Le => self.binary(Value::less_than_or_equal)?,
            Opcode::Add => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                let result = Value::add(&mut self.heap, lhs, rhs)?;
                self.push(result)?;
            }
            Opcode::Sub => self.binary(Value::sub)?,
            Opcode::Mul => self.binary(Value::mul)?,
            Opcode::Div => self.binary(Value::div)?,
            Opcode::Not => {
                let value = self.pop()?;
                self.push(Value::Bool(!value.truthy()))?;
            }
            Opcode::Neg => {
                let value = self.pop()?;
                self.push(value.neg()?)?;
            }
            Opcode::Print => {
                let value = self.pop()?;
                writeln!(context, "{}", value.resolve(&self.heap))
                    .map_err(|_err| RuntimeErrorKind::Io)?;
            }
            Opcode::Jump(offset) => {
                self.frame_mut()?.ip = ip + offset.to_usize();
            }
            Opcode::JumpIfFalse(offset) => {
                if !self.peek(0)?.truthy() {
                    self.frame_mut()?.ip = ip + offset.to_usize();
                }
            }
            Opcode::Loop(offset) => {
                self.frame_mut()?.ip = ip
                    .checked_sub(offset.to_usize())
                    .ok_or(RuntimeErrorKind::InvalidJump)?;
            }
            Opcode::Call(argc) => {
                let callee = self.peek(usize::from(argc))?;
                self.call_value(callee, argc)?;
            }
            Opcode::Closure(index) => {
                let Value::Function(function) = self.constant(frame.function, index)? else {
                    return Err(RuntimeErrorKind::InvalidConstant);
                };
                let descriptors = self.heap.resolve_function(function)?.upvalues().to_vec();
                let mut upvalues = Vec::with_capacity(descriptors.len());
                for descriptor in descriptors {
                    let upvalue = if descriptor.is_local {
                        let slot = frame.base + LocalSlot::from(descriptor.index);
                        self.capture_upvalue(slot)?
                    } else {
                        self.upvalue(frame.closure, usize::from(descriptor.index))?
                    };
                    upvalues.push(upvalue);
                }
                let closure = self.heap.make_closure(Closure { function, upvalues });
                self.push(Value::Closure(closure))?;
            }
            Opcode::CloseUpvalue => {
                let top = self
                    .stack
                    .len()
                    .checked_sub(1)
                    .ok_or(RuntimeErrorKind::EmptyStack)?;
                let top = StackSlot::try_from(top).map_err(|_err| RuntimeErrorKind::StackOverflow)?;
                self.close_upvalues(top)?;
                self.pop()?;
            }
            Opcode::Return => {
                let result = self.pop()?;
                let popped_frame = self
                    .call_stack
                    .pop()
                    .ok_or(RuntimeErrorKind::EmptyCallStack)?;
                self.close_upvalues(popped_frame.base)?;
                self.stack.truncate(popped_frame.base.to_usize());
                // Returning from the script.
                if self.call_stack.is_empty() {
                    return Ok(ControlFlow::Done);
                }
                self.push(result)?;
            }
        }

        Ok(ControlFlow::Continue)
    }

    /// The innermost call frame.
    fn frame_mut(&mut self) -> Result<&mut CallFrame, RuntimeErrorKind> {
        self.call_stack
            .last_mut()
            .ok_or(RuntimeErrorKind::EmptyCallStack)
    }

    /// The constant at the given index of the function's pool.
    fn constant(
        &self,
        function: ArenaIndex<Function>,
        index: ConstantIndex,
    ) -> Result<Value, RuntimeErrorKind> {
        self.heap
            .resolve_function(function)?
            .chunk()
            .constant(index)
            .copied()
            .ok_or(RuntimeErrorKind::InvalidConstant)
    }

    /// The string constant at the given index of the function's pool.
    fn string_constant(
        &self,
        function: ArenaIndex<Function>,
        index: ConstantIndex,
    ) -> Result<ArenaIndex<LoxString>, RuntimeErrorKind> {
        match self.constant(function, index)? {
            Value::String(string) => Ok(string),
            _ => Err(RuntimeErrorKind::InvalidConstant),
        }
    }

    /// The closure's upvalue at the given index.
    fn upvalue(
        &self,
        closure: ArenaIndex<Closure>,
        index: usize,
    ) -> Result<ArenaIndex<Upvalue>, RuntimeErrorKind> {
        self.heap
            .resolve_closure(closure)?
            .upvalues()
            .get(index)
            .copied()
            .ok_or(RuntimeErrorKind::InvalidUpvalue)
    }

    /// Pop two operands and push the result of a numeric operator.
    fn binary(
        &mut self,
        operator: impl FnOnce(Value, Value) -> Result<Value, RuntimeErrorKind>,
    ) -> Result<(), RuntimeErrorKind> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        self.push(operator(lhs, rhs)?)
    }

    /// Call a value with the `argc` arguments above it on the stack.
    fn call_value(&mut self, callee: Value, argc: u8) -> Result<(), RuntimeErrorKind> {
        match callee {
            Value::Closure(closure) => self.call_closure(closure, argc),
            Value::Native(handle) => {
                let native = Rc::clone(self.heap.resolve_native(handle)?);
                if native.arity() != argc {
                    return Err(RuntimeErrorKind::ArgumentCount {
                        expected: native.arity(),
                        actual: argc,
                    });
                }
                let start = self.stack.len() - usize::from(argc);
                let result = native.call(&mut self.heap, &self.stack[start..])?;
                // Drop the arguments and the callee.
                self.stack.truncate(start - 1);
                self.push(result)
            }
            other => Err(RuntimeErrorKind::NotCallable(other.type_name())),
        }
    }

    /// Call a closure.
    fn call_closure(
        &mut self,
        closure: ArenaIndex<Closure>,
        argc: u8,
    ) -> Result<(), RuntimeErrorKind> {
        let function = self.heap.resolve_closure(closure)?.function();
        let arity = self.heap.resolve_function(function)?.arity();
        if arity != argc {
            return Err(RuntimeErrorKind::ArgumentCount {
                expected: arity,
                actual: argc,
            });
        }
        if self.call_stack.len() >= self.config.max_frames {
            return Err(RuntimeErrorKind::StackOverflow);
        }
        let base = self
            .stack
            .len()
            .checked_sub(usize::from(argc) + 1)
            .ok_or(RuntimeErrorKind::EmptyStack)?;
        let base = StackSlot::try_from(base).map_err(|_err| RuntimeErrorKind::StackOverflow)?;
        self.call_stack.push(CallFrame {
            ip: 0,
            closure,
            function,
            base,
        });
        Ok(())
    }

    /// Capture a local upvalue.
    fn capture_upvalue(
        &mut self,
        slot: StackSlot,
    ) -> Result<ArenaIndex<Upvalue>, RuntimeErrorKind> {
        let mut prev_upvalue_index = None;
        let mut current_upvalue_index = self.open_upvalues;

        while let Some(current_index) = current_upvalue_index {
            let Upvalue::Open {
                slot: current_slot,
                next,
            } = *self.heap.resolve_upvalue(current_index)?
            else {
                return Err(RuntimeErrorKind::InvalidOpenUpvalue);
            };

            if current_slot < slot {
                break;
            }

            if current_slot == slot {
                return Ok(current_index);
            }

            prev_upvalue_index = Some(current_index);
            current_upvalue_index = next;
        }

        let new_upvalue = self.heap.make_upvalue(Upvalue::Open {
            slot,
            next: current_upvalue_index,
        });

        match prev_upvalue_index {
            Some(prev_index) => match *self.heap.resolve_upvalue_mut(prev_index)? {
                Upvalue::Open { ref mut next, .. } => {
                    *next = Some(new_upvalue);
                }
                Upvalue::Closed { .. } => {
                    return Err(RuntimeErrorKind::InvalidOpenUpvalue);
                }
            },
            None => {
                self.open_upvalues = Some(new_upvalue);
            }
        }

        Ok(new_upvalue)
    }

    /// Close every open upvalue at or above the given slot.
    fn close_upvalues(&mut self, last: StackSlot) -> Result<(), RuntimeErrorKind> {
        let mut current_upvalue_index = self.open_upvalues;

        while let Some(current_index) = current_upvalue_index {
            let upvalue = self.heap.resolve_upvalue_mut(current_index)?;
            let Upvalue::Open { slot, next } = *upvalue else {
                return Err(RuntimeErrorKind::InvalidOpenUpvalue);
            };
            if slot < last {
                break;
            }

            let value = *self
                .stack
                .get(slot.to_usize())
                .ok_or(RuntimeErrorKind::EmptyStack)?;
            *upvalue = Upvalue::Closed { value };
            current_upvalue_index = next;
        }
        self.open_upvalues = current_upvalue_index;
        Ok(())
    }
}

impl Vm {
    /// Push a value onto the value stack.
    ///
    /// # Errors
    /// Fails if the stack is full.
    pub fn push(&mut self, value: Value) -> Result<(), RuntimeErrorKind> {
        if self.stack.len() >= self.config.max_stack() {
            return Err(RuntimeErrorKind::StackOverflow);
        }
        self.stack.push(value);
        Ok(())
    }

    /// Pop a value off the value stack.
    ///
    /// # Errors
    /// Fails if the stack is empty.
    pub fn pop(&mut self) -> Result<Value, RuntimeErrorKind> {
        self.stack.pop().ok_or(RuntimeErrorKind::EmptyStack)
    }

    /// Return the value `distance` slots below the top of the stack.
    fn peek(&self, distance: usize) -> Result<Value, RuntimeErrorKind> {
        self.stack
            .len()
            .checked_sub(distance + 1)
            .and_then(|index| self.stack.get(index))
            .copied()
            .ok_or(RuntimeErrorKind::EmptyStack)
    }

    /// The number of values on the stack.
    #[must_use]
    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    /// The number of active call frames.
    #[must_use]
    pub fn frame_depth(&self) -> usize {
        self.call_stack.len()
    }

    /// Look up a global by name.
    #[must_use]
    pub fn global(&self, name: &str) -> Option<Value> {
        let string = self.heap.find_interned(name)?;
        let key = self.heap.key(string).ok()?;
        self.globals.get(key)
    }

    /// The heap.
    #[must_use]
    pub const fn heap(&self) -> &Heap {
        &self.heap
    }

    /// The heap, for allocating functions and strings outside of a frontend.
    pub const fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    /// Run a full collection.
    ///
    /// # Errors
    /// Fails if a root holds a stale handle.
    pub fn collect_garbage(&mut self) -> Result<GcStats, RuntimeErrorKind> {
        self.collect(None)
    }

    /// Run a full collection that also keeps the frontend's in-flight objects alive.
    ///
    /// # Errors
    /// Fails if a root holds a stale handle.
    pub fn collect_garbage_with(
        &mut self,
        frontend: &dyn Frontend,
    ) -> Result<GcStats, RuntimeErrorKind> {
        self.collect(Some(frontend))
    }

    fn collect(&mut self, roots: Option<&dyn Frontend>) -> Result<GcStats, RuntimeErrorKind> {
        self.mark_roots()?;
        if let Some(frontend) = roots {
            frontend.mark_roots(&mut self.heap)?;
        }
        let stats = self.heap.collect()?;
        tracing::debug!(
            "Collected {} bytes (from {} to {}) and {} objects, next at {}.",
            stats.bytes_before - stats.bytes_after,
            stats.bytes_before,
            stats.bytes_after,
            stats.freed_objects,
            stats.next_gc
        );
        Ok(stats)
    }

    /// Mark roots in the heap.
    fn mark_roots(&mut self) -> Result<(), RuntimeErrorKind> {
        // Stack roots.
        for value in &self.stack {
            self.heap.mark_value(*value)?;
        }

        // Call stack roots.
        for frame in &self.call_stack {
            self.heap.mark_object(frame.closure.into())?;
        }

        // Global variable roots.
        for (key, value) in self.globals.iter() {
            self.heap.mark_object(key.string.into())?;
            self.heap.mark_value(value)?;
        }

        // Open upvalues.
        let mut current_upvalue_index = self.open_upvalues;
        while let Some(current_index) = current_upvalue_index {
            self.heap.mark_object(current_index.into())?;
            let Upvalue::Open { next, .. } = *self.heap.resolve_upvalue(current_index)? else {
                return Err(RuntimeErrorKind::InvalidOpenUpvalue);
            };
            current_upvalue_index = next;
        }

        Ok(())
    }

    /// Log the stack and the instruction about to execute.
    fn trace_execution(&self) {
        let mut buffer = String::from("          ");
        for value in &self.stack {
            let _ = write!(buffer, "[ {} ]", value.resolve(&self.heap));
        }
        tracing::trace!("{buffer}");

        let Some(frame) = self.call_stack.last() else {
            return;
        };
        let Ok(function) = self.heap.resolve_function(frame.function) else {
            return;
        };
        buffer.clear();
        let mut constant =
            |buffer: &mut String, value: &Value| write!(buffer, "{}", value.resolve(&self.heap));
        let _ = function
            .chunk()
            .disassemble_instruction(&mut buffer, frame.ip, &mut constant);
        tracing::trace!("{buffer}");
    }
}

/// The absolute stack index of a frame-relative local.
fn local(frame: CallFrame, slot: LocalSlot) -> usize {
    (frame.base + slot).to_usize()
}
