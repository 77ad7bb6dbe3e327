use crate::lines::LineTable;
use crate::{ConstantIndex, Opcode, OpcodeEmitter};
use core::fmt;

/// The most constants a single chunk can address with a one byte operand.
pub const MAX_CONSTANTS: usize = u8::MAX as usize + 1;

/// A chunk of bytecode: the instruction stream, its constant pool and line table.
///
/// Written once by a compiler and only read while executing.
#[derive(Debug, Clone)]
pub struct Chunk<C> {
    /// The instruction stream.
    code: Vec<u8>,
    /// The constant pool.
    constants: Vec<C>,
    /// The source line of every byte in the stream.
    lines: LineTable,
}

impl<C> Default for Chunk<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Emits encoded bytes into a chunk, tagging each with one line.
struct LineWriter<'chunk, C> {
    chunk: &'chunk mut Chunk<C>,
    line: usize,
}

impl<C> OpcodeEmitter for LineWriter<'_, C> {
    fn emit_u8(&mut self, value: u8) {
        self.chunk.write(value, self.line);
    }
}

impl<C> Chunk<C> {
    /// Create an empty chunk.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            code: Vec::new(),
            constants: Vec::new(),
            lines: LineTable::new(),
        }
    }

    /// Append a raw byte.
    pub fn write(&mut self, byte: u8, line: usize) {
        self.code.push(byte);
        self.lines.push(line);
    }

    /// Append an encoded instruction and return the offset it starts at.
    pub fn write_opcode(&mut self, opcode: Opcode, line: usize) -> usize {
        let offset = self.code.len();
        opcode.encode(&mut LineWriter { chunk: self, line });
        offset
    }

    /// Append a constant and return its pool index.
    /// Returns `None` once the pool can no longer be addressed by a byte.
    pub fn add_constant(&mut self, value: C) -> Option<ConstantIndex> {
        if self.constants.len() >= MAX_CONSTANTS {
            return None;
        }
        let index = ConstantIndex::try_from(self.constants.len()).ok()?;
        self.constants.push(value);
        Some(index)
    }

    /// Overwrite the two bytes at `offset` with a little endian u16.
    /// Used to back-patch jump operands. Returns `false` if out of range.
    pub fn patch_u16(&mut self, offset: usize, value: u16) -> bool {
        let Some(bytes) = self.code.get_mut(offset..offset + 2) else {
            return false;
        };
        bytes.copy_from_slice(&value.to_le_bytes());
        true
    }

    /// The whole instruction stream.
    #[must_use]
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// The instruction stream starting at the given offset.
    #[must_use]
    pub fn at(&self, offset: usize) -> &[u8] {
        self.code.get(offset..).unwrap_or_default()
    }

    /// The constant pool.
    #[must_use]
    pub fn constants(&self) -> &[C] {
        &self.constants
    }

    /// The constant at the given pool index.
    #[must_use]
    pub fn constant(&self, index: ConstantIndex) -> Option<&C> {
        self.constants.get(index.to_usize())
    }

    /// The source line of the byte at the given offset.
    #[must_use]
    pub fn line_for_offset(&self, offset: usize) -> Option<usize> {
        self.lines.get(offset)
    }

    /// The number of bytes in the instruction stream.
    #[must_use]
    pub fn len(&self) -> usize {
        self.code.len()
    }

    /// Whether the instruction stream is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// The number of bytes owned by the chunk's buffers.
    #[must_use]
    pub fn heap_size(&self) -> usize {
        self.code.capacity() + self.constants.capacity() * size_of::<C>() + self.lines.heap_size()
    }
}

impl<C> Chunk<C> {
    /// Disassemble a chunk's bytecode into the given buffer.
    ///
    /// # Errors
    /// This function will error if it can not write into the buffer.
    pub fn disassemble<W: fmt::Write + ?Sized>(
        &self,
        buffer: &mut W,
        name: &str,
        mut constant: impl FnMut(&mut W, &C) -> fmt::Result,
    ) -> Result<(), fmt::Error> {
        writeln!(buffer, "== {name} ==")?;
        let mut offset = 0;
        while offset < self.code.len() {
            offset = self.disassemble_instruction(buffer, offset, &mut constant)?;
            writeln!(buffer)?;
        }
        Ok(())
    }

    /// Disassemble the single instruction at `offset` without a trailing newline.
    /// Returns the offset of the next instruction.
    ///
    /// # Errors
    /// This function will error if it can not write into the buffer.
    pub fn disassemble_instruction<W: fmt::Write + ?Sized>(
        &self,
        buffer: &mut W,
        offset: usize,
        constant: &mut impl FnMut(&mut W, &C) -> fmt::Result,
    ) -> Result<usize, fmt::Error> {
        write!(buffer, "{offset:04} ")?;
        let line = self.line_for_offset(offset);
        if offset > 0 && line == self.line_for_offset(offset - 1) {
            write!(buffer, "   | ")?;
        } else {
            write!(buffer, "{:4} ", line.unwrap_or_default())?;
        }

        match Opcode::decode(self.at(offset)) {
            Ok((width, opcode)) => {
                opcode.format(buffer, offset, &mut |buffer, index| {
                    match self.constant(index) {
                        Some(value) => constant(buffer, value),
                        None => write!(buffer, "<missing constant>"),
                    }
                })?;
                Ok(offset + width)
            }
            Err(err) => {
                write!(buffer, "{err}")?;
                Ok(offset + 1)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Chunk;
    use crate::Opcode;
    use core::fmt::Write as _;

    #[test]
    fn lines_track_every_byte() {
        let mut chunk: Chunk<f64> = Chunk::new();
        let index = chunk.add_constant(1.5).unwrap();
        chunk.write_opcode(Opcode::Constant(index), 1);
        chunk.write_opcode(Opcode::Print, 1);
        let jump = chunk.write_opcode(Opcode::Jump(0_u16.into()), 2);
        chunk.write_opcode(Opcode::Return, 3);

        assert_eq!(chunk.len(), 7);
        assert_eq!(chunk.line_for_offset(0), Some(1));
        assert_eq!(chunk.line_for_offset(2), Some(1));
        assert_eq!(chunk.line_for_offset(jump + 2), Some(2));
        assert_eq!(chunk.line_for_offset(6), Some(3));
        assert_eq!(chunk.line_for_offset(7), None);
    }

    #[test]
    fn constant_pool_is_bounded() {
        let mut chunk: Chunk<u32> = Chunk::new();
        for value in 0..256 {
            assert!(chunk.add_constant(value).is_some());
        }
        assert!(chunk.add_constant(256).is_none());
        assert_eq!(chunk.constants().len(), 256);
    }

    #[test]
    fn patching_rewrites_jump_operand() {
        let mut chunk: Chunk<f64> = Chunk::new();
        let jump = chunk.write_opcode(Opcode::JumpIfFalse(0_u16.into()), 1);
        assert!(chunk.patch_u16(jump + 1, 0x0304));
        assert!(!chunk.patch_u16(jump + 2, 0));
        assert_eq!(
            Opcode::decode(chunk.code()).unwrap().1,
            Opcode::JumpIfFalse(0x0304_u16.into())
        );
    }

    #[test]
    fn disassembly() {
        let mut chunk: Chunk<f64> = Chunk::new();
        let index = chunk.add_constant(1.2).unwrap();
        chunk.write_opcode(Opcode::Constant(index), 123);
        chunk.write_opcode(Opcode::Neg, 123);
        chunk.write_opcode(Opcode::JumpIfFalse(1_u16.into()), 124);
        chunk.write_opcode(Opcode::Return, 124);

        let mut buffer = String::new();
        chunk
            .disassemble(&mut buffer, "test", |buffer, value| write!(buffer, "{value}"))
            .unwrap();
        let expected = "\
== test ==
0000  123 constant            0 '1.2'
0002    | neg
0003  124 jump_if_false       3 -> 7
0006    | return
";
        assert_eq!(buffer, expected);
    }
}
