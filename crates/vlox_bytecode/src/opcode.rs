use crate::{ConstantIndex, JumpOffset, LocalSlot, UpvalueIndex};
use core::fmt;

const CONSTANT: u8 = 0;
const NIL: u8 = 1;
const TRUE: u8 = 2;
const FALSE: u8 = 3;
const POP: u8 = 4;
const DUP: u8 = 5;
const GET_LOCAL: u8 = 6;
const SET_LOCAL: u8 = 7;
const GET_GLOBAL: u8 = 8;
const DEFINE_GLOBAL: u8 = 9;
const SET_GLOBAL: u8 = 10;
const GET_UPVALUE: u8 = 11;
const SET_UPVALUE: u8 = 12;
const EQ: u8 = 13;
const NE: u8 = 14;
const GT: u8 = 15;
const GE: u8 = 16;
const LT: u8 = 17;
const LE: u8 = 18;
const ADD: u8 = 19;
const SUB: u8 = 20;
const MUL: u8 = 21;
const DIV: u8 = 22;
const NOT: u8 = 23;
const NEG: u8 = 24;
const PRINT: u8 = 25;
const JUMP: u8 = 26;
const JUMP_IF_FALSE: u8 = 27;
const LOOP: u8 = 28;
const CALL: u8 = 29;
const CLOSURE: u8 = 30;
const CLOSE_UPVALUE: u8 = 31;
const RETURN: u8 = 32;

/// A decoded instruction.
///
/// Every instruction is a one byte opcode followed by zero, one or two operand bytes.
/// Multi-byte operands are little endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// Push the constant at the given pool index.
    Constant(ConstantIndex),
    /// Push nil.
    Nil,
    /// Push true.
    True,
    /// Push false.
    False,
    /// Pop the value on top of the stack.
    Pop,
    /// Push a copy of the value on top of the stack.
    Dup,
    /// Push a local value to the top of the stack.
    GetLocal(LocalSlot),
    /// Set a local value to the value that is on top of the stack without popping it.
    SetLocal(LocalSlot),
    /// Push the global named by the string constant.
    GetGlobal(ConstantIndex),
    /// Pop the top of the stack into the global named by the string constant.
    DefineGlobal(ConstantIndex),
    /// Define or update the global named by the string constant without popping.
    SetGlobal(ConstantIndex),
    /// Push the value of the current closure's upvalue.
    GetUpvalue(UpvalueIndex),
    /// Write the top of the stack into the current closure's upvalue without popping.
    SetUpvalue(UpvalueIndex),

    // Binary operations.
    /// Evaluate equality between the two topmost values on the stack.
    Eq,
    /// Evaluate inequality between the two topmost values on the stack.
    Ne,
    /// Evaluate greater than between the two topmost values on the stack.
    Gt,
    /// Evaluate greater than or equal between the two topmost values on the stack.
    Ge,
    /// Evaluate less than between the two topmost values on the stack.
    Lt,
    /// Evaluate less than or equal between the two topmost values on the stack.
    Le,
    /// Add or concatenate the two topmost values on the stack.
    Add,
    /// Subtract the two topmost values on the stack.
    Sub,
    /// Multiply the two topmost values on the stack.
    Mul,
    /// Divide the two topmost values on the stack.
    Div,

    // Unary operations.
    /// Boolean not of the topmost stack value.
    Not,
    /// Numeric negation of the topmost stack value.
    Neg,

    /// Pop and print the value on top of the stack.
    Print,
    /// Unconditional forward jump.
    Jump(JumpOffset),
    /// Forward jump if the top of the stack is falsy. The condition is not popped.
    JumpIfFalse(JumpOffset),
    /// Unconditional backward jump.
    Loop(JumpOffset),
    /// Call the value sitting below the given number of arguments.
    Call(u8),
    /// Wrap the function constant in a closure, capturing its upvalues.
    Closure(ConstantIndex),
    /// Close any upvalue pointing at the top of the stack and pop it.
    CloseUpvalue,
    /// Return from the current function.
    Return,
}

/// Error produced when a byte stream does not hold a valid instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// The stream ended before the instruction was complete.
    Truncated {
        /// The opcode byte, if one was read.
        opcode: Option<u8>,
    },
    /// The byte is not a known opcode.
    UnknownOpcode(u8),
}

impl fmt::Display for DecodeError {
    #[expect(
        clippy::min_ident_chars,
        reason = "keep consistent with trait definition."
    )]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Truncated { opcode: Some(opcode) } => {
                write!(f, "instruction {opcode:#04x} is missing operand bytes")
            }
            Self::Truncated { opcode: None } => write!(f, "expected an instruction"),
            Self::UnknownOpcode(byte) => write!(f, "unknown opcode {byte:#04x}"),
        }
    }
}

impl core::error::Error for DecodeError {}

/// A sink for encoded instruction bytes.
pub trait OpcodeEmitter {
    /// Emit a byte into the opcode stream.
    fn emit_u8(&mut self, value: u8);

    /// Emit a u16 into the opcode stream in little endian.
    fn emit_u16(&mut self, value: u16) {
        let [low, high] = value.to_le_bytes();
        self.emit_u8(low);
        self.emit_u8(high);
    }
}

impl OpcodeEmitter for Vec<u8> {
    fn emit_u8(&mut self, value: u8) {
        self.push(value);
    }
}

impl Opcode {
    /// Encode the instruction into the given emitter.
    pub fn encode(self, chunk: &mut impl OpcodeEmitter) {
        match self {
            Self::Constant(index) => {
                chunk.emit_u8(CONSTANT);
                chunk.emit_u8(index.to_u8());
            }
            Self::Nil => chunk.emit_u8(NIL),
            Self::True => chunk.emit_u8(TRUE),
            Self::False => chunk.emit_u8(FALSE),
            Self::Pop => chunk.emit_u8(POP),
            Self::Dup => chunk.emit_u8(DUP),
            Self::GetLocal(slot) => {
                chunk.emit_u8(GET_LOCAL);
                chunk.emit_u8(slot.to_u8());
            }
            Self::SetLocal(slot) => {
                chunk.emit_u8(SET_LOCAL);
                chunk.emit_u8(slot.to_u8());
            }
            Self::GetGlobal(name) => {
                chunk.emit_u8(GET_GLOBAL);
                chunk.emit_u8(name.to_u8());
            }
            Self::DefineGlobal(name) => {
                chunk.emit_u8(DEFINE_GLOBAL);
                chunk.emit_u8(name.to_u8());
            }
            Self::SetGlobal(name) => {
                chunk.emit_u8(SET_GLOBAL);
                chunk.emit_u8(name.to_u8());
            }
            Self::GetUpvalue(index) => {
                chunk.emit_u8(GET_UPVALUE);
                chunk.emit_u8(index.to_u8());
            }
            Self::SetUpvalue(index) => {
                chunk.emit_u8(SET_UPVALUE);
                chunk.emit_u8(index.to_u8());
            }
            Self::Eq => chunk.emit_u8(EQ),
            Self::Ne => chunk.emit_u8(NE),
            Self::Gt => chunk.emit_u8(GT),
            Self::Ge => chunk.emit_u8(GE),
            Self::Lt => chunk.emit_u8(LT),
            Self::Le => chunk.emit_u8(LE),
            Self::Add => chunk.emit_u8(ADD),
            Self::Sub => chunk.emit_u8(SUB),
            Self::Mul => chunk.emit_u8(MUL),
            Self::Div => chunk.emit_u8(DIV),
            Self::Not => chunk.emit_u8(NOT),
            Self::Neg => chunk.emit_u8(NEG),
            Self::Print => chunk.emit_u8(PRINT),
            Self::Jump(offset) => {
                chunk.emit_u8(JUMP);
                chunk.emit_u16(offset.to_u16());
            }
            Self::JumpIfFalse(offset) => {
                chunk.emit_u8(JUMP_IF_FALSE);
                chunk.emit_u16(offset.to_u16());
            }
            Self::Loop(offset) => {
                chunk.emit_u8(LOOP);
                chunk.emit_u16(offset.to_u16());
            }
            Self::Call(argc) => {
                chunk.emit_u8(CALL);
                chunk.emit_u8(argc);
            }
            Self::Closure(index) => {
                chunk.emit_u8(CLOSURE);
                chunk.emit_u8(index.to_u8());
            }
            Self::CloseUpvalue => chunk.emit_u8(CLOSE_UPVALUE),
            Self::Return => chunk.emit_u8(RETURN),
        }
    }

    /// The number of bytes the encoded instruction occupies.
    #[must_use]
    pub const fn width(self) -> usize {
        match self {
            Self::Jump(_) | Self::JumpIfFalse(_) | Self::Loop(_) => 3,
            Self::Constant(_)
            | Self::GetLocal(_)
            | Self::SetLocal(_)
            | Self::GetGlobal(_)
            | Self::DefineGlobal(_)
            | Self::SetGlobal(_)
            | Self::GetUpvalue(_)
            | Self::SetUpvalue(_)
            | Self::Call(_)
            | Self::Closure(_) => 2,
            _ => 1,
        }
    }
}

struct ByteIterator<'data> {
    data: &'data [u8],
    index: usize,
}

impl<'data> From<&'data [u8]> for ByteIterator<'data> {
    fn from(value: &'data [u8]) -> Self {
        Self {
            data: value,
            index: 0,
        }
    }
}

impl ByteIterator<'_> {
    fn next_u8(&mut self) -> Option<u8> {
        let value = self.data.get(self.index).copied()?;
        self.index += 1;
        Some(value)
    }

    fn next_u16(&mut self) -> Option<u16> {
        let low = *self.data.get(self.index)?;
        let high = *self.data.get(self.index + 1)?;
        self.index += 2;
        Some(u16::from_le_bytes([low, high]))
    }
}

impl Opcode {
    /// Decode the instruction at the start of the byte stream.
    /// Also returns the number of bytes the instruction occupied.
    ///
    /// # Errors
    /// Fails on an unknown opcode or when the stream ends inside the instruction.
    pub fn decode(stream: &[u8]) -> Result<(usize, Self), DecodeError> {
        let mut stream = ByteIterator::from(stream);
        let opcode = stream
            .next_u8()
            .ok_or(DecodeError::Truncated { opcode: None })?;
        let truncated = DecodeError::Truncated {
            opcode: Some(opcode),
        };

        let inst = match opcode {
            CONSTANT => Self::Constant(stream.next_u8().ok_or(truncated)?.into()),
            NIL => Self::Nil,
            TRUE => Self::True,
            FALSE => Self::False,
            POP => Self::Pop,
            DUP => Self::Dup,
            GET_LOCAL => Self::GetLocal(stream.next_u8().ok_or(truncated)?.into()),
            SET_LOCAL => Self::SetLocal(stream.next_u8().ok_or(truncated)?.into()),
            GET_GLOBAL => Self::GetGlobal(stream.next_u8().ok_or(truncated)?.into()),
            DEFINE_GLOBAL => Self::DefineGlobal(stream.next_u8().ok_or(truncated)?.into()),
            SET_GLOBAL => Self::SetGlobal(stream.next_u8().ok_or(truncated)?.into()),
            GET_UPVALUE => Self::GetUpvalue(stream.next_u8().ok_or(truncated)?.into()),
            SET_UPVALUE => Self::SetUpvalue(stream.next_u8().ok_or(truncated)?.into()),
            EQ => Self::Eq,
            NE => Self::Ne,
            GT => Self::Gt,
            GE => Self::Ge,
            LT => Self::Lt,
            LE => Self::Le,
            ADD => Self::Add,
            SUB => Self::Sub,
            MUL => Self::Mul,
            DIV => Self::Div,
            NOT => Self::Not,
            NEG => Self::Neg,
            PRINT => Self::Print,
            JUMP => Self::Jump(stream.next_u16().ok_or(truncated)?.into()),
            JUMP_IF_FALSE => Self::JumpIfFalse(stream.next_u16().ok_or(truncated)?.into()),
            LOOP => Self::Loop(stream.next_u16().ok_or(truncated)?.into()),
            CALL => Self::Call(stream.next_u8().ok_or(truncated)?),
            CLOSURE => Self::Closure(stream.next_u8().ok_or(truncated)?.into()),
            CLOSE_UPVALUE => Self::CloseUpvalue,
            RETURN => Self::Return,
            byte => return Err(DecodeError::UnknownOpcode(byte)),
        };

        Ok((stream.index, inst))
    }
}

impl Opcode {
    /// Format an opcode by writing into the given buffer.
    /// Constant operands are rendered with `constant`, jumps as absolute targets.
    ///
    /// # Errors
    /// This function will error if it can not write into the buffer.
    pub fn format<W: fmt::Write + ?Sized>(
        self,
        buffer: &mut W,
        address: usize,
        constant: &mut impl FnMut(&mut W, ConstantIndex) -> fmt::Result,
    ) -> Result<(), fmt::Error> {
        let next = address + self.width();
        match self {
            Self::Constant(index) => {
                write!(buffer, "{:<16} {:4} '", "constant", index.to_u8())?;
                constant(buffer, index)?;
                write!(buffer, "'")
            }
            Self::GetGlobal(index) | Self::DefineGlobal(index) | Self::SetGlobal(index) => {
                write!(buffer, "{:<16} {:4} '", self.mnemonic(), index.to_u8())?;
                constant(buffer, index)?;
                write!(buffer, "'")
            }
            Self::Closure(index) => {
                write!(buffer, "{:<16} {:4} ", "closure", index.to_u8())?;
                constant(buffer, index)
            }
            Self::GetLocal(slot) | Self::SetLocal(slot) => {
                write!(buffer, "{:<16} {:4}", self.mnemonic(), slot.to_u8())
            }
            Self::GetUpvalue(index) | Self::SetUpvalue(index) => {
                write!(buffer, "{:<16} {:4}", self.mnemonic(), index.to_u8())
            }
            Self::Call(argc) => write!(buffer, "{:<16} {argc:4}", "call"),
            Self::Jump(offset) | Self::JumpIfFalse(offset) => write!(
                buffer,
                "{:<16} {address:4} -> {}",
                self.mnemonic(),
                next + offset.to_usize()
            ),
            Self::Loop(offset) => write!(
                buffer,
                "{:<16} {address:4} -> {}",
                "loop",
                next.checked_sub(offset.to_usize()).ok_or(fmt::Error)?
            ),
            _ => write!(buffer, "{}", self.mnemonic()),
        }
    }

    /// The assembly name of the instruction.
    #[must_use]
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Self::Constant(_) => "constant",
            Self::Nil => "nil",
            Self::True => "true",
            Self::False => "false",
            Self::Pop => "pop",
            Self::Dup => "dup",
            Self::GetLocal(_) => "get_local",
            Self::SetLocal(_) => "set_local",
            Self::GetGlobal(_) => "get_global",
            Self::DefineGlobal(_) => "define_global",
            Self::SetGlobal(_) => "set_global",
            Self::GetUpvalue(_) => "get_upvalue",
            Self::SetUpvalue(_) => "set_upvalue",
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Gt => "gt",
            Self::Ge => "ge",
            Self::Lt => "lt",
            Self::Le => "le",
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Not => "not",
            Self::Neg => "neg",
            Self::Print => "print",
            Self::Jump(_) => "jump",
            Self::JumpIfFalse(_) => "jump_if_false",
            Self::Loop(_) => "loop",
            Self::Call(_) => "call",
            Self::Closure(_) => "closure",
            Self::CloseUpvalue => "close_upvalue",
            Self::Return => "return",
        }
    }
}
