//! Heap object payloads.

use crate::gc::{ArenaIndex, HeapSize};
use crate::value::Value;
use compact_str::CompactString;
use vlox_bytecode::{Chunk, StackSlot};

/// FNV-1a offset basis.
const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
/// FNV-1a prime.
const FNV_PRIME: u32 = 0x0100_0193;

/// Hash a string with 32-bit FNV-1a.
#[must_use]
pub fn hash_str(text: &str) -> u32 {
    text.bytes().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(byte)).wrapping_mul(FNV_PRIME)
    })
}

/// An immutable heap string with its hash computed once up front.
#[derive(Debug, Clone)]
pub struct LoxString {
    /// The contents.
    text: CompactString,
    /// The cached FNV-1a hash of the contents.
    hash: u32,
}

impl LoxString {
    /// Create a string whose hash has already been computed.
    pub(crate) const fn with_hash(text: CompactString, hash: u32) -> Self {
        Self { text, hash }
    }

    /// The string contents.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.text.as_str()
    }

    /// The cached hash.
    #[must_use]
    pub const fn hash(&self) -> u32 {
        self.hash
    }
}

impl HeapSize for LoxString {
    fn heap_size(&self) -> usize {
        if self.text.is_heap_allocated() {
            self.text.capacity()
        } else {
            0
        }
    }
}

/// Where a closure finds one of its upvalues when it is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UpvalueDescriptor {
    /// The local slot in the enclosing frame, or the index into the enclosing closure's upvalues.
    pub index: u8,
    /// Whether `index` names a local of the immediately enclosing function.
    pub is_local: bool,
}

/// A compiled function.
#[derive(Debug, Clone)]
pub struct Function {
    /// The name of the function. The top-level script has none.
    pub(crate) name: Option<ArenaIndex<LoxString>>,
    /// The number of parameters.
    pub(crate) arity: u8,
    /// How each upvalue is captured when a closure is made.
    pub(crate) upvalues: Vec<UpvalueDescriptor>,
    /// The function body.
    pub(crate) chunk: Chunk<Value>,
}

impl Function {
    /// The name of the function, if it is not the top-level script.
    #[must_use]
    pub const fn name(&self) -> Option<ArenaIndex<LoxString>> {
        self.name
    }

    /// The number of parameters.
    #[must_use]
    pub const fn arity(&self) -> u8 {
        self.arity
    }

    /// The number of upvalues a closure over this function carries.
    #[must_use]
    pub fn upvalue_count(&self) -> usize {
        self.upvalues.len()
    }

    /// The upvalue descriptors.
    #[must_use]
    pub fn upvalues(&self) -> &[UpvalueDescriptor] {
        &self.upvalues
    }

    /// The function body.
    #[must_use]
    pub const fn chunk(&self) -> &Chunk<Value> {
        &self.chunk
    }
}

impl HeapSize for Function {
    fn heap_size(&self) -> usize {
        self.chunk.heap_size() + self.upvalues.capacity() * size_of::<UpvalueDescriptor>()
    }
}

/// A function together with the variables it captured.
#[derive(Debug, Clone)]
pub struct Closure {
    /// The wrapped function.
    pub(crate) function: ArenaIndex<Function>,
    /// The captured variables, one per upvalue descriptor.
    pub(crate) upvalues: Vec<ArenaIndex<Upvalue>>,
}

impl Closure {
    /// The wrapped function.
    #[must_use]
    pub const fn function(&self) -> ArenaIndex<Function> {
        self.function
    }

    /// The captured variables.
    #[must_use]
    pub fn upvalues(&self) -> &[ArenaIndex<Upvalue>] {
        &self.upvalues
    }
}

impl HeapSize for Closure {
    fn heap_size(&self) -> usize {
        self.upvalues.capacity() * size_of::<ArenaIndex<Upvalue>>()
    }
}

/// A captured variable.
#[derive(Debug, Clone)]
pub enum Upvalue {
    /// The variable still lives on the stack.
    Open {
        /// The absolute stack slot of the variable.
        slot: StackSlot,
        /// The next open upvalue, which points at a lower slot.
        next: Option<ArenaIndex<Upvalue>>,
    },
    /// The variable outlived its frame and now lives here.
    Closed {
        /// The captured value.
        value: Value,
    },
}

impl HeapSize for Upvalue {}
