//! The boundary between the engine and whatever turns source text into functions.

use crate::error::CompileError;
use crate::gc::{AllocatorError, ArenaIndex, Heap};
use crate::object::Function;

/// Compiles source text into a top-level function allocated on the heap.
///
/// A frontend that holds heap objects between calls, or that runs code while
/// it is still compiling, reports those objects through [`Frontend::mark_roots`].
/// The engine calls it during every collection it performs on the frontend's behalf.
pub trait Frontend {
    /// Compile the source into a function of arity zero.
    ///
    /// # Errors
    /// Fails with the first error found in the source.
    fn compile(
        &mut self,
        source: &str,
        heap: &mut Heap,
    ) -> Result<ArenaIndex<Function>, CompileError>;

    /// Mark every heap object the frontend is still constructing.
    ///
    /// # Errors
    /// Fails if one of the frontend's handles is stale.
    fn mark_roots(&self, _heap: &mut Heap) -> Result<(), AllocatorError> {
        Ok(())
    }
}

impl<F> Frontend for F
where
    F: FnMut(&str, &mut Heap) -> Result<ArenaIndex<Function>, CompileError>,
{
    fn compile(
        &mut self,
        source: &str,
        heap: &mut Heap,
    ) -> Result<ArenaIndex<Function>, CompileError> {
        self(source, heap)
    }
}
