//! Arena based heap and mark-sweep garbage collector.

use crate::config::VmConfig;
use crate::object::{Closure, Function, LoxString, Upvalue, hash_str};
use crate::table::{Table, TableKey};
use crate::value::Value;
use crate::value::native::NativeFunction;
use alloc::rc::Rc;
use compact_str::CompactString;
use core::any;
use core::fmt;
use core::iter;
use core::marker;
use core::mem;
use core::num::NonZeroU32;

/// A raw index into an arena.
/// This has no associated generation and is to be used in the
/// internal implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct ArenaPtr(NonZeroU32);

impl ArenaPtr {
    /// Create a new arena pointer failing if the index does not fit into
    /// the internal representation or if it is zero i.e. the null pointer.
    fn new(index: usize) -> Option<Self> {
        NonZeroU32::new(u32::try_from(index).ok()?).map(ArenaPtr)
    }

    /// Convert to index to be used when indexing the internal arena data representation.
    fn to_index(self) -> usize {
        (u32::from(self.0) as usize) - 1
    }
}

/// An entry's generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Generation(u32);

impl Generation {
    /// Increment the generation.
    const fn increment(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// Return the raw integer.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// The color of an entry to be used during mark and sweep garbage collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MarkColor {
    /// Unvisited.
    White,
    /// Visited but references aren't traced yet.
    Grey,
    /// Visited with references traced.
    Black,
}

/// An entry in an arena.
#[derive(Debug, Clone)]
enum Entry<T> {
    /// A free entry in the arena.
    /// Can be reused for new allocations.
    Free {
        /// The entry's generation.
        generation: Generation,
        /// The next free entry if it exists.
        next_free: Option<ArenaPtr>,
    },
    /// A used entry in the arena.
    Used {
        /// The color of the entry.
        color: MarkColor,
        /// The entry's generation.
        generation: Generation,
        /// The entry's value.
        value: T,
    },
}

/// Bytes owned by an object beyond its arena slot.
pub(crate) trait HeapSize {
    /// The number of bytes the value owns outside of its slot.
    fn heap_size(&self) -> usize {
        0
    }
}

/// The number of bytes an object accounts for while it is alive.
fn footprint<T: HeapSize>(value: &T) -> usize {
    mem::size_of::<Entry<T>>() + value.heap_size()
}

/// An arena allocator.
#[derive(Debug)]
pub(crate) struct Arena<T> {
    /// The underlying data store.
    data: Vec<Entry<T>>,
    /// The list of free entries.
    free_list: Option<ArenaPtr>,
    /// The number of used entries.
    live: usize,
    /// The name of the arena.
    name: &'static str,
}

/// An iterator over used entries in an arena.
#[derive(Debug)]
pub(crate) struct ArenaIterator<'data, T> {
    /// The arena to iterate over.
    inner: &'data Arena<T>,
    /// The current index.
    index: usize,
}

impl<'data, T> iter::Iterator for ArenaIterator<'data, T> {
    type Item = (usize, &'data T);

    fn next(&mut self) -> Option<Self::Item> {
        while self.index < self.inner.data.len() {
            let index = self.index;
            let entry = self.inner.data.get(index)?;
            self.index += 1;
            match *entry {
                Entry::Free { .. } => {}
                Entry::Used { ref value, .. } => return Some((index, value)),
            }
        }
        None
    }
}

/// A handle to a value allocated by an arena.
pub struct ArenaIndex<T> {
    /// The index to an arena.
    ptr: ArenaPtr,
    /// The entry's generation.
    generation: Generation,
    /// Type marker to tie handle to allocated value type.
    _marker: marker::PhantomData<T>,
}

impl<T> ArenaIndex<T> {
    /// Construct an arena index from raw parts.
    const fn from_raw_parts(ptr: ArenaPtr, generation: Generation) -> Self {
        Self {
            ptr,
            generation,
            _marker: marker::PhantomData,
        }
    }
}

impl<T> fmt::Debug for ArenaIndex<T> {
    #[expect(
        clippy::min_ident_chars,
        reason = "keep consistent with trait definition."
    )]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArenaIndex")
            .field("ptr", &self.ptr)
            .field("generation", &self.generation)
            .field("type", &any::type_name::<T>())
            .finish_non_exhaustive()
    }
}

impl<T> Clone for ArenaIndex<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ArenaIndex<T> {}

impl<T> PartialEq for ArenaIndex<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr && self.generation == other.generation
    }
}

impl<T> Eq for ArenaIndex<T> {}

/// Errors when dereferencing a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocatorError {
    /// The handle's index is out of bounds.
    OutOfBounds {
        /// The out of bounds index.
        index: usize,
        /// The name of the arena.
        name: &'static str,
    },
    /// The handle's generation is out of date.
    WrongGeneration {
        /// The entry's generation.
        expected: Generation,
        /// The handle's generation.
        actual: Generation,
        /// The name of the arena.
        name: &'static str,
    },
    /// The handle points to a freed entry.
    Free {
        /// The index to the free entry.
        index: usize,
        /// The name of the arena.
        name: &'static str,
    },
}

impl fmt::Display for AllocatorError {
    #[expect(
        clippy::min_ident_chars,
        reason = "keep consistent with trait definition."
    )]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::OutOfBounds { index, name } => {
                write!(f, "handle {index} is out of bounds of the {name} arena")
            }
            Self::WrongGeneration {
                expected,
                actual,
                name,
            } => write!(
                f,
                "handle into the {name} arena has generation {} but the entry has generation {}",
                actual.raw(),
                expected.raw()
            ),
            Self::Free { index, name } => {
                write!(f, "handle {index} points to a freed entry of the {name} arena")
            }
        }
    }
}

impl core::error::Error for AllocatorError {}

impl<T> Arena<T> {
    /// Initialise a new arena allocator.
    const fn new(name: &'static str) -> Self {
        Self {
            data: Vec::new(),
            free_list: None,
            live: 0,
            name,
        }
    }

    /// Allocate a value and return a handle to it.
    fn alloc(&mut self, value: T) -> ArenaIndex<T> {
        self.live += 1;
        if let Some(index) = self.next_free() {
            self.data[index.ptr.to_index()] = Entry::Used {
                generation: index.generation,
                value,
                color: MarkColor::White,
            };
            index
        } else {
            let generation = Generation(0);
            self.data.push(Entry::Used {
                generation,
                value,
                color: MarkColor::White,
            });
            let ptr = ArenaPtr::new(self.data.len()).expect("ran out of capacity.");
            ArenaIndex::from_raw_parts(ptr, generation)
        }
    }

    /// Return the next free entry if it exists.
    fn next_free(&mut self) -> Option<ArenaIndex<T>> {
        match self.free_list {
            None => None,
            Some(index) => match self.data[index.to_index()] {
                Entry::Free {
                    generation,
                    next_free,
                } => {
                    self.free_list = next_free;
                    Some(ArenaIndex::from_raw_parts(index, generation))
                }
                #[expect(clippy::panic, reason = "no clean way to deal with this.")]
                Entry::Used { .. } => panic!("arena free list is corrupted!"),
            },
        }
    }

    /// Create an iterator over live entries.
    pub(crate) const fn iter(&self) -> ArenaIterator<'_, T> {
        ArenaIterator {
            inner: self,
            index: 0,
        }
    }

    /// The number of live entries.
    pub(crate) const fn len(&self) -> usize {
        self.live
    }

    /// Check that the handle points at a live entry and return its slot.
    fn slot(&self, index: ArenaIndex<T>) -> Result<usize, AllocatorError> {
        let slot = index.ptr.to_index();
        match self.data.get(slot) {
            None => Err(AllocatorError::OutOfBounds {
                index: slot,
                name: self.name,
            }),
            Some(&Entry::Used { generation, .. }) if generation == index.generation => Ok(slot),
            Some(&Entry::Used { generation, .. }) => Err(AllocatorError::WrongGeneration {
                expected: generation,
                actual: index.generation,
                name: self.name,
            }),
            Some(&Entry::Free { .. }) => Err(AllocatorError::Free {
                index: slot,
                name: self.name,
            }),
        }
    }

    /// Get a reference to the value pointed to by the handle if it is valid.
    pub(crate) fn get(&self, index: ArenaIndex<T>) -> Result<&T, AllocatorError> {
        let slot = self.slot(index)?;
        match self.data[slot] {
            Entry::Used { ref value, .. } => Ok(value),
            Entry::Free { .. } => unreachable!("slot() only returns used entries."),
        }
    }

    /// Get a mutable reference to the value pointed to by the handle if it is valid.
    fn get_mut(&mut self, index: ArenaIndex<T>) -> Result<&mut T, AllocatorError> {
        let slot = self.slot(index)?;
        match self.data[slot] {
            Entry::Used { ref mut value, .. } => Ok(value),
            Entry::Free { .. } => unreachable!("slot() only returns used entries."),
        }
    }

    /// Mark the value pointed to by the handle if it is valid with the given color.
    fn mark(&mut self, index: ArenaIndex<T>, mark: MarkColor) -> Result<(), AllocatorError> {
        let slot = self.slot(index)?;
        match self.data[slot] {
            Entry::Used { ref mut color, .. } => {
                *color = mark;
                Ok(())
            }
            Entry::Free { .. } => unreachable!("slot() only returns used entries."),
        }
    }

    /// Grey the value pointed to by the handle if it is still white.
    /// Return whether the value was already reached this cycle.
    fn grey(&mut self, index: ArenaIndex<T>) -> Result<bool, AllocatorError> {
        let slot = self.slot(index)?;
        match self.data[slot] {
            Entry::Used { ref mut color, .. } if *color == MarkColor::White => {
                *color = MarkColor::Grey;
                Ok(false)
            }
            Entry::Used { .. } => Ok(true),
            Entry::Free { .. } => unreachable!("slot() only returns used entries."),
        }
    }

    /// Whether the handle points at a live entry that has been reached this cycle.
    pub(crate) fn is_marked(&self, index: ArenaIndex<T>) -> bool {
        matches!(
            self.data.get(index.ptr.to_index()),
            Some(&Entry::Used { generation, color, .. })
                if generation == index.generation && color != MarkColor::White
        )
    }
}

impl<T: HeapSize> Arena<T> {
    /// Free every unreached entry and whiten the survivors for the next cycle.
    /// Returns the number of freed entries and freed bytes.
    fn sweep(&mut self) -> (usize, usize) {
        let mut freed_entries = 0;
        let mut freed_bytes = 0;
        for (slot, entry) in self.data.iter_mut().enumerate() {
            match *entry {
                Entry::Used {
                    color: MarkColor::White,
                    generation,
                    ref value,
                } => {
                    freed_bytes += footprint(value);
                    freed_entries += 1;
                    *entry = Entry::Free {
                        generation: generation.increment(),
                        next_free: self.free_list,
                    };
                    self.free_list = ArenaPtr::new(slot + 1);
                }
                Entry::Used { ref mut color, .. } => *color = MarkColor::White,
                Entry::Free { .. } => {}
            }
        }
        self.live -= freed_entries;
        (freed_entries, freed_bytes)
    }
}

/// A native function binding.
pub type Native = Rc<dyn NativeFunction>;

impl HeapSize for Native {}

/// A handle to an object of any kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectIndex {
    /// A handle to a string.
    String(ArenaIndex<LoxString>),
    /// A handle to a function.
    Function(ArenaIndex<Function>),
    /// A handle to a closure.
    Closure(ArenaIndex<Closure>),
    /// A handle to an upvalue.
    Upvalue(ArenaIndex<Upvalue>),
    /// A handle to a native function.
    Native(ArenaIndex<Native>),
}

macro_rules! generate_from_arena_index {
    ($index:ty => $variant:ident) => {
        impl From<$index> for ObjectIndex {
            fn from(value: $index) -> Self {
                Self::$variant(value)
            }
        }
    };
}

generate_from_arena_index!(ArenaIndex<LoxString> => String);
generate_from_arena_index!(ArenaIndex<Function> => Function);
generate_from_arena_index!(ArenaIndex<Closure> => Closure);
generate_from_arena_index!(ArenaIndex<Upvalue> => Upvalue);
generate_from_arena_index!(ArenaIndex<Native> => Native);

/// Reports the objects directly referenced by an object.
pub(crate) trait Trace {
    /// Push every outgoing reference onto `edges`.
    fn trace(&self, edges: &mut Vec<ObjectIndex>);
}

impl Trace for Value {
    fn trace(&self, edges: &mut Vec<ObjectIndex>) {
        if let Some(object) = self.as_object() {
            edges.push(object);
        }
    }
}

impl Trace for Function {
    fn trace(&self, edges: &mut Vec<ObjectIndex>) {
        if let Some(name) = self.name {
            edges.push(name.into());
        }
        for constant in self.chunk.constants() {
            constant.trace(edges);
        }
    }
}

impl Trace for Closure {
    fn trace(&self, edges: &mut Vec<ObjectIndex>) {
        edges.push(self.function.into());
        edges.extend(self.upvalues.iter().copied().map(ObjectIndex::from));
    }
}

impl Trace for Upvalue {
    fn trace(&self, edges: &mut Vec<ObjectIndex>) {
        match *self {
            // The stack slot is a root on its own.
            Self::Open { .. } => {}
            Self::Closed { ref value } => value.trace(edges),
        }
    }
}

/// The outcome of one collection cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcStats {
    /// Bytes accounted for before the cycle.
    pub bytes_before: usize,
    /// Bytes accounted for after the cycle.
    pub bytes_after: usize,
    /// The number of objects reclaimed.
    pub freed_objects: usize,
    /// The allocation volume that triggers the next cycle.
    pub next_gc: usize,
}

/// The object heap.
///
/// Owns every object, the string interning table and the collector state.
#[derive(Debug)]
pub struct Heap {
    /// Arena allocator for strings.
    strings: Arena<LoxString>,
    /// Arena allocator for functions.
    functions: Arena<Function>,
    /// Arena allocator for closures.
    closures: Arena<Closure>,
    /// Arena allocator for upvalues.
    upvalues: Arena<Upvalue>,
    /// Arena allocator for native functions.
    natives: Arena<Native>,
    /// Every live string keyed by itself. Weak during collection.
    interned: Table,

    // GC
    /// The work queue for objects to trace.
    grey_stack: Vec<ObjectIndex>,
    /// Scratch space for the edges of the object being blackened.
    edges: Vec<ObjectIndex>,
    /// Bytes held by live objects.
    bytes_allocated: usize,
    /// The number of bytes before garbage collection.
    next_gc: usize,
    /// The lowest collection threshold.
    min_next_gc: usize,
    /// The growth factor relative to the number of allocated bytes after collection.
    growth_factor: usize,
}

impl Heap {
    /// Initialise the heap with the collector settings of the configuration.
    #[must_use]
    pub const fn new(config: &VmConfig) -> Self {
        Self {
            strings: Arena::new("strings"),
            functions: Arena::new("functions"),
            closures: Arena::new("closures"),
            upvalues: Arena::new("upvalues"),
            natives: Arena::new("natives"),
            interned: Table::new(),
            grey_stack: Vec::new(),
            edges: Vec::new(),
            bytes_allocated: 0,
            next_gc: config.initial_gc_threshold,
            min_next_gc: config.initial_gc_threshold,
            growth_factor: config.gc_growth_factor,
        }
    }

    /// Return the canonical string with the given contents, allocating it if needed.
    pub fn intern(&mut self, text: &str) -> ArenaIndex<LoxString> {
        self.intern_key(text).string
    }

    /// Return the hash table key of the canonical string with the given contents,
    /// allocating the string if needed.
    pub fn intern_key(&mut self, text: &str) -> TableKey {
        let hash = hash_str(text);
        let string = match self.interned.find_string(&self.strings, text, hash) {
            Some(existing) => existing,
            None => self.insert_string(LoxString::with_hash(text.into(), hash)),
        };
        TableKey { string, hash }
    }

    /// Return the canonical string with the given contents, taking ownership of the buffer.
    pub fn intern_owned(&mut self, text: CompactString) -> ArenaIndex<LoxString> {
        let hash = hash_str(&text);
        match self.interned.find_string(&self.strings, &text, hash) {
            Some(existing) => existing,
            None => self.insert_string(LoxString::with_hash(text, hash)),
        }
    }

    /// Return the canonical string with the given contents without allocating.
    #[must_use]
    pub fn find_interned(&self, text: &str) -> Option<ArenaIndex<LoxString>> {
        self.interned.find_string(&self.strings, text, hash_str(text))
    }

    /// Allocate a string that is known not to be interned yet and intern it.
    fn insert_string(&mut self, string: LoxString) -> ArenaIndex<LoxString> {
        let hash = string.hash();
        self.bytes_allocated += footprint(&string);
        let handle = self.strings.alloc(string);
        self.interned.set(
            TableKey {
                string: handle,
                hash,
            },
            Value::Nil,
        );
        handle
    }

    /// Allocate a function.
    pub fn make_function(&mut self, function: Function) -> ArenaIndex<Function> {
        self.bytes_allocated += footprint(&function);
        self.functions.alloc(function)
    }

    /// Allocate a closure.
    pub(crate) fn make_closure(&mut self, closure: Closure) -> ArenaIndex<Closure> {
        self.bytes_allocated += footprint(&closure);
        self.closures.alloc(closure)
    }

    /// Allocate an upvalue.
    pub(crate) fn make_upvalue(&mut self, upvalue: Upvalue) -> ArenaIndex<Upvalue> {
        self.bytes_allocated += footprint(&upvalue);
        self.upvalues.alloc(upvalue)
    }

    /// Allocate a native function.
    pub fn make_native(&mut self, native: Native) -> ArenaIndex<Native> {
        self.bytes_allocated += footprint(&native);
        self.natives.alloc(native)
    }

    /// Return the hash table key for a string.
    ///
    /// # Errors
    /// Fails if the handle is stale.
    pub fn key(&self, string: ArenaIndex<LoxString>) -> Result<TableKey, AllocatorError> {
        let hash = self.strings.get(string)?.hash();
        Ok(TableKey { string, hash })
    }

    /// Return a reference to a string given a valid handle.
    ///
    /// # Errors
    /// Fails if the handle is stale.
    pub fn resolve_string(&self, index: ArenaIndex<LoxString>) -> Result<&str, AllocatorError> {
        self.strings.get(index).map(LoxString::as_str)
    }

    /// Return a reference to a function given a valid handle.
    ///
    /// # Errors
    /// Fails if the handle is stale.
    pub fn resolve_function(
        &self,
        index: ArenaIndex<Function>,
    ) -> Result<&Function, AllocatorError> {
        self.functions.get(index)
    }

    /// Return a reference to a closure given a valid handle.
    ///
    /// # Errors
    /// Fails if the handle is stale.
    pub fn resolve_closure(&self, index: ArenaIndex<Closure>) -> Result<&Closure, AllocatorError> {
        self.closures.get(index)
    }

    /// Return a reference to an upvalue given a valid handle.
    ///
    /// # Errors
    /// Fails if the handle is stale.
    pub fn resolve_upvalue(&self, index: ArenaIndex<Upvalue>) -> Result<&Upvalue, AllocatorError> {
        self.upvalues.get(index)
    }

    /// Return a mutable reference to an upvalue given a valid handle.
    pub(crate) fn resolve_upvalue_mut(
        &mut self,
        index: ArenaIndex<Upvalue>,
    ) -> Result<&mut Upvalue, AllocatorError> {
        self.upvalues.get_mut(index)
    }

    /// Return a reference to a native function given a valid handle.
    ///
    /// # Errors
    /// Fails if the handle is stale.
    pub fn resolve_native(&self, index: ArenaIndex<Native>) -> Result<&Native, AllocatorError> {
        self.natives.get(index)
    }

    /// Return the name of the function, falling back to `script` for the top level.
    ///
    /// # Errors
    /// Fails if the handle or the name is stale.
    pub fn function_name(&self, index: ArenaIndex<Function>) -> Result<&str, AllocatorError> {
        match self.resolve_function(index)?.name {
            Some(name) => self.resolve_string(name),
            None => Ok("script"),
        }
    }
}

impl Heap {
    /// Bytes held by live objects.
    #[must_use]
    pub const fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    /// The allocation volume that triggers the next collection.
    #[must_use]
    pub const fn next_gc(&self) -> usize {
        self.next_gc
    }

    /// The number of live objects of every kind.
    #[must_use]
    pub const fn object_count(&self) -> usize {
        self.strings.len()
            + self.functions.len()
            + self.closures.len()
            + self.upvalues.len()
            + self.natives.len()
    }

    /// The number of live strings.
    #[must_use]
    pub const fn string_count(&self) -> usize {
        self.strings.len()
    }

    /// The number of live closures.
    #[must_use]
    pub const fn closure_count(&self) -> usize {
        self.closures.len()
    }

    /// The number of strings in the interning table.
    #[must_use]
    pub fn interned_count(&self) -> usize {
        self.interned.len()
    }

    /// Return whether the allocator wants to garbage collect.
    #[must_use]
    pub const fn should_collect(&self) -> bool {
        self.bytes_allocated > self.next_gc
    }

    /// Mark a value as reachable.
    ///
    /// # Errors
    /// Fails if the value holds a stale handle.
    pub fn mark_value(&mut self, value: Value) -> Result<(), AllocatorError> {
        match value.as_object() {
            Some(object) => self.mark_object(object),
            None => Ok(()),
        }
    }

    /// Mark an object as reachable, queueing it for tracing on first visit.
    ///
    /// # Errors
    /// Fails if the handle is stale.
    pub fn mark_object(&mut self, index: ObjectIndex) -> Result<(), AllocatorError> {
        let is_marked = match index {
            ObjectIndex::String(arena_index) => self.strings.grey(arena_index)?,
            ObjectIndex::Function(arena_index) => self.functions.grey(arena_index)?,
            ObjectIndex::Closure(arena_index) => self.closures.grey(arena_index)?,
            ObjectIndex::Upvalue(arena_index) => self.upvalues.grey(arena_index)?,
            ObjectIndex::Native(arena_index) => self.natives.grey(arena_index)?,
        };

        if !is_marked {
            self.grey_stack.push(index);
        }

        Ok(())
    }

    /// Blacken one grey object by marking everything it references.
    fn blacken(&mut self, index: ObjectIndex) -> Result<(), AllocatorError> {
        let mut edges = mem::take(&mut self.edges);
        match index {
            ObjectIndex::String(arena_index) => {
                self.strings.mark(arena_index, MarkColor::Black)?;
            }
            ObjectIndex::Native(arena_index) => {
                self.natives.mark(arena_index, MarkColor::Black)?;
            }
            ObjectIndex::Function(arena_index) => {
                self.functions.mark(arena_index, MarkColor::Black)?;
                self.functions.get(arena_index)?.trace(&mut edges);
            }
            ObjectIndex::Closure(arena_index) => {
                self.closures.mark(arena_index, MarkColor::Black)?;
                self.closures.get(arena_index)?.trace(&mut edges);
            }
            ObjectIndex::Upvalue(arena_index) => {
                self.upvalues.mark(arena_index, MarkColor::Black)?;
                self.upvalues.get(arena_index)?.trace(&mut edges);
            }
        }

        let result = edges.drain(..).try_for_each(|edge| self.mark_object(edge));
        self.edges = edges;
        result
    }

    /// Trace all references by blackening all grey objects.
    fn trace_references(&mut self) -> Result<(), AllocatorError> {
        while let Some(index) = self.grey_stack.pop() {
            self.blacken(index)?;
        }
        Ok(())
    }

    /// Finish a collection cycle once every root has been marked: trace, drop
    /// unreached interned strings and sweep.
    ///
    /// Only the VM knows the full root set, so cycles start from `Vm::collect_garbage`.
    ///
    /// # Errors
    /// Fails if a reachable object holds a stale handle.
    pub(crate) fn collect(&mut self) -> Result<GcStats, AllocatorError> {
        let bytes_before = self.bytes_allocated;
        self.trace_references()?;

        let strings = &self.strings;
        self.interned
            .remove_unmarked(|string| strings.is_marked(string));

        let mut freed_objects = 0;
        let mut freed_bytes = 0;
        macro_rules! sweep {
            ($arena:expr) => {
                let (entries, bytes) = $arena.sweep();
                freed_objects += entries;
                freed_bytes += bytes;
            };
        }
        sweep!(self.strings);
        sweep!(self.functions);
        sweep!(self.closures);
        sweep!(self.upvalues);
        sweep!(self.natives);

        self.bytes_allocated = self.bytes_allocated.saturating_sub(freed_bytes);
        self.next_gc = self
            .bytes_allocated
            .saturating_mul(self.growth_factor)
            .max(self.min_next_gc);

        Ok(GcStats {
            bytes_before,
            bytes_after: self.bytes_allocated,
            freed_objects,
            next_gc: self.next_gc,
        })
    }
}

impl Heap {
    /// Dump the contents of the heap.
    ///
    /// # Errors
    /// This function will error if it can not write into the buffer.
    pub fn dump(&self, buffer: &mut impl fmt::Write) -> Result<(), fmt::Error> {
        const CUTOFF: usize = 30;

        writeln!(buffer, "Strings: {}", self.strings.len())?;
        for (index, string) in self.strings.iter() {
            let text = string.as_str();
            if text.chars().count() < CUTOFF {
                writeln!(buffer, "#{index} = \"{text}\"")?;
            } else {
                writeln!(
                    buffer,
                    "#{index} = \"{}...\" [0..{CUTOFF}]",
                    text.chars().take(CUTOFF).collect::<CompactString>()
                )?;
            }
        }

        writeln!(buffer, "Functions: {}", self.functions.len())?;
        for (index, function) in self.functions.iter() {
            let name = function
                .name
                .map_or(Ok("script"), |name| self.resolve_string(name))
                .map_err(|_err| fmt::Error)?;
            writeln!(
                buffer,
                "#{index} = <fn {name}> arity {} upvalues {}",
                function.arity,
                function.upvalue_count()
            )?;
        }

        writeln!(buffer, "Closures: {}", self.closures.len())?;
        for (index, closure) in self.closures.iter() {
            writeln!(buffer, "#{index} = {closure:?}")?;
        }

        writeln!(buffer, "Upvalues: {}", self.upvalues.len())?;
        for (index, upvalue) in self.upvalues.iter() {
            match *upvalue {
                Upvalue::Open { slot, .. } => {
                    writeln!(buffer, "#{index} = <open upvalue ${}>", slot.to_usize())?;
                }
                Upvalue::Closed { ref value } => {
                    writeln!(buffer, "#{index} = <closed upvalue {}>", value.resolve(self))?;
                }
            }
        }

        writeln!(buffer, "Natives: {}", self.natives.len())?;
        for (index, native) in self.natives.iter() {
            writeln!(buffer, "#{index} = {}", native.name())?;
        }

        Ok(())
    }

    /// Disassemble a function's chunk.
    ///
    /// # Errors
    /// This function will error if it can not write into the buffer or if the
    /// function handle is stale.
    pub fn disassemble<W: fmt::Write>(
        &self,
        function: ArenaIndex<Function>,
        buffer: &mut W,
    ) -> Result<(), fmt::Error> {
        let name = self.function_name(function).map_err(|_err| fmt::Error)?;
        let chunk = self
            .resolve_function(function)
            .map_err(|_err| fmt::Error)?
            .chunk();
        chunk.disassemble(buffer, name, |buffer: &mut W, value: &Value| {
            write!(buffer, "{}", value.resolve(self))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{AllocatorError, Heap};
    use crate::config::VmConfig;
    use crate::object::{Closure, Function, Upvalue};
    use crate::value::Value;
    use vlox_bytecode::Chunk;

    fn heap() -> Heap {
        Heap::new(&VmConfig::default())
    }

    fn function(heap: &mut Heap, name: &str, constants: &[Value]) -> Function {
        let mut chunk = Chunk::new();
        for constant in constants {
            chunk.add_constant(*constant).unwrap();
        }
        Function {
            name: Some(heap.intern(name)),
            arity: 0,
            upvalues: Vec::new(),
            chunk,
        }
    }

    #[test]
    fn interning_returns_the_canonical_handle() {
        let mut heap = heap();
        let first = heap.intern("hello");
        let second = heap.intern_owned("hello".into());
        assert_eq!(first, second);
        assert_ne!(first, heap.intern("world"));
        assert_eq!(heap.find_interned("hello"), Some(first));
        assert_eq!(heap.find_interned("missing"), None);
        assert_eq!(heap.string_count(), 2);
    }

    #[test]
    fn unmarked_objects_are_swept() {
        let mut heap = heap();
        let kept = heap.intern("kept");
        let _dropped = heap.intern("dropped");
        heap.mark_value(Value::String(kept)).unwrap();

        let stats = heap.collect().unwrap();
        assert_eq!(stats.freed_objects, 1);
        assert!(stats.bytes_after < stats.bytes_before);
        assert_eq!(heap.resolve_string(kept), Ok("kept"));
        assert_eq!(heap.find_interned("dropped"), None);
        assert_eq!(heap.interned_count(), 1);
    }

    #[test]
    fn stale_handles_are_detected() {
        let mut heap = heap();
        let stale = heap.intern("stale");
        heap.collect().unwrap();
        assert!(matches!(
            heap.resolve_string(stale),
            Err(AllocatorError::Free { .. })
        ));

        // The slot is reused with a new generation.
        let fresh = heap.intern("fresh");
        assert_ne!(stale, fresh);
        assert!(matches!(
            heap.resolve_string(stale),
            Err(AllocatorError::WrongGeneration { .. })
        ));
    }

    #[test]
    fn tracing_follows_closure_edges() {
        let mut heap = heap();
        let captured = heap.intern("captured");
        let constant = heap.intern("constant");
        let function = function(&mut heap, "f", &[Value::String(constant)]);
        let function = heap.make_function(function);
        let upvalue = heap.make_upvalue(Upvalue::Closed {
            value: Value::String(captured),
        });
        let closure = heap.make_closure(Closure {
            function,
            upvalues: vec![upvalue],
        });
        let _garbage = heap.intern("garbage");

        heap.mark_value(Value::Closure(closure)).unwrap();
        let stats = heap.collect().unwrap();

        assert_eq!(stats.freed_objects, 1);
        assert_eq!(heap.resolve_string(captured), Ok("captured"));
        assert_eq!(heap.resolve_string(constant), Ok("constant"));
        assert_eq!(heap.function_name(function), Ok("f"));
        assert!(heap.resolve_upvalue(upvalue).is_ok());
    }

    #[test]
    fn marks_are_cleared_between_cycles() {
        let mut heap = heap();
        let string = heap.intern("once");
        heap.mark_value(Value::String(string)).unwrap();
        heap.collect().unwrap();
        assert!(heap.resolve_string(string).is_ok());

        heap.collect().unwrap();
        assert!(heap.resolve_string(string).is_err());
        assert_eq!(heap.object_count(), 0);
        assert_eq!(heap.bytes_allocated(), 0);
    }

    #[test]
    fn threshold_grows_with_live_bytes() {
        let config = VmConfig::default()
            .with_initial_gc_threshold(0)
            .with_gc_growth_factor(3);
        let mut heap = Heap::new(&config);
        let string = heap.intern("survivor");
        assert!(heap.should_collect());

        heap.mark_value(Value::String(string)).unwrap();
        let stats = heap.collect().unwrap();
        assert_eq!(stats.next_gc, stats.bytes_after * 3);
        assert!(!heap.should_collect());
    }
}
