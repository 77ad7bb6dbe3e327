//! A run length encoded line table.

/// A run of consecutive bytes that share a source line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Run {
    /// The source line.
    line: usize,
    /// How many bytes belong to this line.
    length: usize,
}

/// Maps every byte offset of a chunk to its source line.
///
/// Logically parallel to the byte stream, but stored as runs because most
/// instructions on a line are emitted back to back.
#[derive(Debug, Clone, Default)]
pub struct LineTable {
    /// The runs in stream order.
    runs: Vec<Run>,
    /// The total number of bytes covered.
    len: usize,
}

impl LineTable {
    /// Create an empty line table.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            runs: Vec::new(),
            len: 0,
        }
    }

    /// Record the line of the next byte.
    pub fn push(&mut self, line: usize) {
        self.push_multiple(line, 1);
    }

    /// Record the line of the next `count` bytes.
    pub fn push_multiple(&mut self, line: usize, count: usize) {
        if count == 0 {
            return;
        }
        self.len += count;
        match self.runs.last_mut() {
            Some(last) if last.line == line => {
                last.length += count;
            }
            _ => self.runs.push(Run {
                line,
                length: count,
            }),
        }
    }

    /// Return the line of the byte at the given offset.
    #[must_use]
    pub fn get(&self, offset: usize) -> Option<usize> {
        let mut remaining = offset;
        for run in &self.runs {
            if remaining < run.length {
                return Some(run.line);
            }
            remaining -= run.length;
        }
        None
    }

    /// The number of bytes covered by the table.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the table covers no bytes.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The number of bytes the table itself owns.
    #[must_use]
    pub const fn heap_size(&self) -> usize {
        self.runs.capacity() * size_of::<Run>()
    }
}

#[cfg(test)]
mod tests {
    use super::LineTable;

    #[test]
    fn runs_collapse_but_stay_parallel() {
        let mut lines = LineTable::new();
        lines.push_multiple(1, 3);
        lines.push(1);
        lines.push_multiple(4, 2);
        lines.push(2);

        assert_eq!(lines.len(), 7);
        assert_eq!(lines.get(0), Some(1));
        assert_eq!(lines.get(3), Some(1));
        assert_eq!(lines.get(4), Some(4));
        assert_eq!(lines.get(6), Some(2));
        assert_eq!(lines.get(7), None);
        let every_line: Vec<_> = (0..lines.len()).filter_map(|offset| lines.get(offset)).collect();
        assert_eq!(every_line, [1, 1, 1, 1, 4, 4, 2]);
    }

    #[test]
    fn empty_pushes_are_ignored() {
        let mut lines = LineTable::new();
        lines.push_multiple(9, 0);
        assert!(lines.is_empty());
        assert_eq!(lines.get(0), None);
    }
}
