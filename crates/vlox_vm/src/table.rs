//! An open addressing hash table keyed by interned strings.

use crate::gc::{Arena, ArenaIndex};
use crate::object::LoxString;
use crate::value::Value;

/// The initial number of buckets once the first entry is inserted.
const MIN_CAPACITY: usize = 8;
/// The maximum ratio of used buckets (tombstones included) to capacity, as a fraction.
const MAX_LOAD_NUMERATOR: usize = 3;
/// See [`MAX_LOAD_NUMERATOR`].
const MAX_LOAD_DENOMINATOR: usize = 4;

/// A string key with its precomputed hash.
///
/// Keys are compared by handle which is sound because every string is interned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableKey {
    /// The interned string.
    pub string: ArenaIndex<LoxString>,
    /// The string's hash.
    pub hash: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Bucket {
    /// Never used. Ends a probe sequence.
    Empty,
    /// Used to hold an entry that was deleted. Probing continues past it.
    Tombstone,
    Occupied { key: TableKey, value: Value },
}

/// A map from interned strings to values.
#[derive(Debug, Clone, Default)]
pub struct Table {
    /// The buckets. The length is zero or a power of two.
    buckets: Vec<Bucket>,
    /// Occupied buckets plus tombstones.
    used: usize,
    /// Occupied buckets.
    live: usize,
}

impl Table {
    /// Create an empty table without allocating.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buckets: Vec::new(),
            used: 0,
            live: 0,
        }
    }

    /// The number of entries.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.live
    }

    /// Whether the table has no entries.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// The number of buckets.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buckets.len()
    }

    /// Return the bucket the key lives in, or the bucket it should be inserted into.
    /// The table must have at least one empty bucket.
    fn find_bucket(buckets: &[Bucket], key: TableKey) -> usize {
        let mask = buckets.len() - 1;
        let mut index = key.hash as usize & mask;
        let mut tombstone = None;
        loop {
            match buckets[index] {
                Bucket::Empty => return tombstone.unwrap_or(index),
                Bucket::Tombstone => {
                    tombstone.get_or_insert(index);
                }
                Bucket::Occupied { key: existing, .. } if existing == key => return index,
                Bucket::Occupied { .. } => {}
            }
            index = (index + 1) & mask;
        }
    }

    /// Rehash every live entry into `capacity` buckets, dropping tombstones.
    fn resize(&mut self, capacity: usize) {
        let mut buckets = vec![Bucket::Empty; capacity];
        for bucket in &self.buckets {
            if let Bucket::Occupied { key, value } = *bucket {
                let index = Self::find_bucket(&buckets, key);
                buckets[index] = Bucket::Occupied { key, value };
            }
        }
        self.buckets = buckets;
        self.used = self.live;
    }

    /// Look up the value stored under the key.
    #[must_use]
    pub fn get(&self, key: TableKey) -> Option<Value> {
        if self.live == 0 {
            return None;
        }
        match self.buckets[Self::find_bucket(&self.buckets, key)] {
            Bucket::Occupied { value, .. } => Some(value),
            Bucket::Empty | Bucket::Tombstone => None,
        }
    }

    /// Whether the key is present.
    #[must_use]
    pub fn contains(&self, key: TableKey) -> bool {
        self.get(key).is_some()
    }

    /// Insert or update an entry. Returns whether the key was new.
    pub fn set(&mut self, key: TableKey, value: Value) -> bool {
        if (self.used + 1) * MAX_LOAD_DENOMINATOR > self.buckets.len() * MAX_LOAD_NUMERATOR {
            // Sized by live entries so that tombstone churn rehashes in place.
            let capacity = ((self.live + 1) * 2).next_power_of_two().max(MIN_CAPACITY);
            self.resize(capacity);
        }

        let index = Self::find_bucket(&self.buckets, key);
        let bucket = &mut self.buckets[index];
        let is_new = match *bucket {
            Bucket::Empty => {
                self.used += 1;
                true
            }
            // Reusing a tombstone does not change the load.
            Bucket::Tombstone => true,
            Bucket::Occupied { .. } => false,
        };
        if is_new {
            self.live += 1;
        }
        *bucket = Bucket::Occupied { key, value };
        is_new
    }

    /// Remove an entry, leaving a tombstone. Returns whether the key was present.
    pub fn delete(&mut self, key: TableKey) -> bool {
        if self.live == 0 {
            return false;
        }
        let index = Self::find_bucket(&self.buckets, key);
        let bucket = &mut self.buckets[index];
        match *bucket {
            Bucket::Occupied { .. } => {
                *bucket = Bucket::Tombstone;
                self.live -= 1;
                true
            }
            Bucket::Empty | Bucket::Tombstone => false,
        }
    }

    /// Find a key whose contents equal `text`.
    /// This is the only lookup that compares contents rather than handles.
    pub(crate) fn find_string(
        &self,
        strings: &Arena<LoxString>,
        text: &str,
        hash: u32,
    ) -> Option<ArenaIndex<LoxString>> {
        if self.live == 0 {
            return None;
        }
        let mask = self.buckets.len() - 1;
        let mut index = hash as usize & mask;
        loop {
            match self.buckets[index] {
                Bucket::Empty => return None,
                Bucket::Tombstone => {}
                Bucket::Occupied { key, .. } => {
                    if key.hash == hash
                        && strings
                            .get(key.string)
                            .is_ok_and(|string| string.as_str() == text)
                    {
                        return Some(key.string);
                    }
                }
            }
            index = (index + 1) & mask;
        }
    }

    /// Delete every entry whose key has not been reached by the collector.
    pub(crate) fn remove_unmarked(
        &mut self,
        mut is_marked: impl FnMut(ArenaIndex<LoxString>) -> bool,
    ) {
        for bucket in &mut self.buckets {
            if let Bucket::Occupied { key, .. } = *bucket
                && !is_marked(key.string)
            {
                *bucket = Bucket::Tombstone;
                self.live -= 1;
            }
        }
    }

    /// Iterate over the entries in bucket order.
    pub fn iter(&self) -> impl Iterator<Item = (TableKey, Value)> + '_ {
        self.buckets.iter().filter_map(|bucket| match *bucket {
            Bucket::Occupied { key, value } => Some((key, value)),
            Bucket::Empty | Bucket::Tombstone => None,
        })
    }
}
