//! Virtual machine configuration.
//!
//! The configuration only states limits and collector tuning; the VM enforces them.

/// The number of value stack slots reserved for each call frame.
pub const SLOTS_PER_FRAME: usize = u8::MAX as usize + 1;

/// VM configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    /// Maximum call depth. The value stack holds `max_frames * 256` slots.
    pub max_frames: usize,
    /// Bytes allocated before the first collection, and the lowest threshold after any collection.
    pub initial_gc_threshold: usize,
    /// The next threshold is the live byte count times this factor.
    pub gc_growth_factor: usize,
    /// Collect at every safepoint.
    pub stress_gc: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            max_frames: 64,
            initial_gc_threshold: 1024 * 1024,
            gc_growth_factor: 2,
            stress_gc: false,
        }
    }
}

impl VmConfig {
    /// Create a configuration with the default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum call depth.
    #[must_use]
    pub const fn with_max_frames(mut self, max_frames: usize) -> Self {
        self.max_frames = max_frames;
        self
    }

    /// Set the initial collection threshold.
    #[must_use]
    pub const fn with_initial_gc_threshold(mut self, bytes: usize) -> Self {
        self.initial_gc_threshold = bytes;
        self
    }

    /// Set the threshold growth factor.
    #[must_use]
    pub const fn with_gc_growth_factor(mut self, factor: usize) -> Self {
        self.gc_growth_factor = factor;
        self
    }

    /// Enable or disable collecting at every safepoint.
    #[must_use]
    pub const fn with_stress_gc(mut self, stress_gc: bool) -> Self {
        self.stress_gc = stress_gc;
        self
    }

    /// The number of value stack slots.
    #[must_use]
    pub const fn max_stack(&self) -> usize {
        self.max_frames * SLOTS_PER_FRAME
    }
}
