use core::fmt;

/// Where `print` output goes.
pub trait IoContext: fmt::Write {}

/// Writes program output to standard output.
#[derive(Debug, Default)]
pub struct StdoutContext;

impl fmt::Write for StdoutContext {
    fn write_str(&mut self, text: &str) -> fmt::Result {
        print!("{text}");
        Ok(())
    }
}

impl IoContext for StdoutContext {}

/// Collects program output in memory.
#[derive(Debug, Default)]
pub struct BufferContext {
    data: String,
}

impl fmt::Write for BufferContext {
    fn write_str(&mut self, text: &str) -> fmt::Result {
        self.data.push_str(text);
        Ok(())
    }
}

impl IoContext for BufferContext {}

impl BufferContext {
    /// Create an empty buffer.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            data: String::new(),
        }
    }

    /// The output collected so far.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.data
    }

    /// Take the collected output.
    #[must_use]
    pub fn flush(self) -> String {
        self.data
    }
}
