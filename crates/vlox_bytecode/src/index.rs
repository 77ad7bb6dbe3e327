use core::convert;
use core::ops;

/// Error when conversion from usize to `StackSlot` fails.
#[derive(Debug)]
pub struct TryFromStackSlotError;

/// Error when a usize does not fit into a single byte operand.
#[derive(Debug)]
pub struct TryFromOperandError;

/// An absolute slot in the value stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StackSlot {
    /// The pointer into the stack.
    index: u32,
}

impl StackSlot {
    /// Convert to usize.
    #[must_use]
    pub const fn to_usize(self) -> usize {
        self.index as usize
    }
}

impl convert::TryFrom<usize> for StackSlot {
    type Error = TryFromStackSlotError;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        let index: u32 = value.try_into().map_err(|_err| TryFromStackSlotError)?;
        Ok(Self { index })
    }
}

impl convert::From<u32> for StackSlot {
    fn from(value: u32) -> Self {
        Self { index: value }
    }
}

/// A local slot is relative to its frame, so adding the frame base gives the absolute slot.
impl ops::Add<LocalSlot> for StackSlot {
    type Output = Self;

    fn add(self, rhs: LocalSlot) -> Self::Output {
        Self {
            index: self.index + u32::from(rhs.0),
        }
    }
}

/// Generate a single byte operand newtype.
macro_rules! byte_operand {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(u8);

        impl $name {
            /// Convert to u8.
            #[must_use]
            pub const fn to_u8(self) -> u8 {
                self.0
            }

            /// Convert to usize.
            #[must_use]
            pub const fn to_usize(self) -> usize {
                self.0 as usize
            }
        }

        impl convert::From<u8> for $name {
            fn from(value: u8) -> Self {
                Self(value)
            }
        }

        impl convert::TryFrom<usize> for $name {
            type Error = TryFromOperandError;

            fn try_from(value: usize) -> Result<Self, Self::Error> {
                let index: u8 = value.try_into().map_err(|_err| TryFromOperandError)?;
                Ok(Self(index))
            }
        }
    };
}

byte_operand!(
    /// An index into a chunk's constant pool.
    ConstantIndex
);
byte_operand!(
    /// A stack slot relative to the base of the current call frame.
    LocalSlot
);
byte_operand!(
    /// An index into the current closure's upvalues.
    UpvalueIndex
);

/// Unsigned distance of a jump, measured from the end of the jump instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct JumpOffset {
    /// The number of bytes to jump over.
    offset: u16,
}

impl convert::From<u16> for JumpOffset {
    fn from(value: u16) -> Self {
        Self { offset: value }
    }
}

impl JumpOffset {
    /// Convert to u16.
    #[must_use]
    pub const fn to_u16(self) -> u16 {
        self.offset
    }

    /// Convert to usize.
    #[must_use]
    pub const fn to_usize(self) -> usize {
        self.offset as usize
    }
}
