//! The instruction set and chunk layout shared by compilers and the virtual machine.

pub mod chunk;
mod index;
pub mod lines;
mod opcode;

pub use chunk::{Chunk, MAX_CONSTANTS};
pub use index::{
    ConstantIndex, JumpOffset, LocalSlot, StackSlot, TryFromOperandError, TryFromStackSlotError,
    UpvalueIndex,
};
pub use opcode::{DecodeError, Opcode, OpcodeEmitter};
