//! Direct-mapped memoisation cache shared by every container type.
//!
//! A cache is a fixed number of slots, each holding at most one value tagged
//! with the identifier triple `(file_index, offset, timestamp)`. Components
//! pick a slot by reducing an element or segment index modulo the capacity;
//! collisions simply overwrite. There is no eviction list: the cache is a
//! memo sized by the client to its working set, and any identifier mismatch
//! (including a stale timestamp after a mutation) is a miss.
//!
//! A cache is a distinct object whose lifetime the client controls. It may be
//! shared across containers as long as identifiers stay globally unique,
//! which is how cooperating parsers avoid duplicate reads.

use crate::clock::Timestamp;
use crate::error::{ArgumentError, Result, RuntimeError};

/// The validity tag of a cached value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheIdentifier {
    file_index: i32,
    offset: i64,
    timestamp: Timestamp,
}

impl CacheIdentifier {
    pub fn new(file_index: i32, offset: i64, timestamp: Timestamp) -> CacheIdentifier {
        CacheIdentifier {
            file_index,
            offset,
            timestamp,
        }
    }

    pub fn file_index(&self) -> i32 {
        self.file_index
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}

/// One occupied cache slot.
#[derive(Debug, Clone)]
pub struct CacheValue<V> {
    identifier: CacheIdentifier,
    value: V,
}

impl<V> CacheValue<V> {
    pub fn identifier(&self) -> &CacheIdentifier {
        &self.identifier
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn into_value(self) -> V {
        self.value
    }
}

/// Fixed-capacity slot array. `V` is whatever the owning container memoises:
/// decoded element values, segment payloads or materialised tree nodes.
#[derive(Debug)]
pub struct Cache<V> {
    values: Vec<Option<CacheValue<V>>>,
}

impl<V> Cache<V> {
    /// Creates a cache with `capacity` slots.
    ///
    /// # Failure
    ///
    /// Fails with `Argument::ValueZeroOrLess` when `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> Result<Cache<V>> {
        if capacity == 0 {
            return Err(ArgumentError::ValueZeroOrLess("capacity").into());
        }
        let mut values = Vec::new();
        values.resize_with(capacity, || None);
        Ok(Cache { values })
    }

    /// Drops every cached value and leaves all slots empty. The capacity is
    /// unchanged.
    pub fn clear(&mut self) {
        for slot in &mut self.values {
            *slot = None;
        }
    }

    /// The number of slots.
    pub fn number_of_entries(&self) -> usize {
        self.values.len()
    }

    /// The number of occupied slots.
    pub fn number_of_values(&self) -> usize {
        self.values.iter().filter(|slot| slot.is_some()).count()
    }

    /// # Failure
    ///
    /// Fails with `Argument::ValueOutOfBounds` when `index` is not a valid
    /// slot.
    pub fn value_by_index(&self, index: usize) -> Result<Option<&CacheValue<V>>> {
        if index >= self.values.len() {
            return Err(ArgumentError::ValueOutOfBounds("cache entry index").into());
        }
        Ok(self.values[index].as_ref())
    }

    /// Replaces slot `index`. The previous occupant, if any, is dropped.
    pub fn set_value_by_index(
        &mut self,
        index: usize,
        identifier: CacheIdentifier,
        value: V,
    ) -> Result<()> {
        if index >= self.values.len() {
            return Err(ArgumentError::ValueOutOfBounds("cache entry index").into());
        }
        self.values[index] = Some(CacheValue { identifier, value });
        Ok(())
    }

    /// Reduces `index` to a slot number.
    pub(crate) fn slot_for(&self, index: u64) -> usize {
        (index % self.values.len() as u64) as usize
    }

    /// The hit test: a slot serves a lookup only on full identifier equality.
    pub(crate) fn is_hit(&self, slot: usize, identifier: &CacheIdentifier) -> Result<bool> {
        let hit = matches!(
            self.value_by_index(slot)?,
            Some(occupant) if occupant.identifier == *identifier
        );
        if hit {
            tracing::trace!(slot, entries = self.values.len(), "cache hit");
        } else {
            tracing::trace!(slot, entries = self.values.len(), "cache miss");
        }
        Ok(hit)
    }

    /// Re-reads `slot` after a deposit and requires the identifier the
    /// depositor was handed, failing `Runtime::ValueMissing` otherwise.
    pub(crate) fn expect(
        &self,
        slot: usize,
        identifier: &CacheIdentifier,
        what: &'static str,
    ) -> Result<&V> {
        match self.value_by_index(slot)? {
            Some(occupant) if occupant.identifier == *identifier => Ok(&occupant.value),
            _ => Err(RuntimeError::ValueMissing(what).into()),
        }
    }
}

/// Deposit handle lent to a read callback.
///
/// The writer is bound to the slot and identifier the container computed for
/// the element being read; the callback deposits the decoded value through it
/// during its execution. After the callback returns, the container re-reads
/// the slot and fails `Runtime::ValueMissing` when nothing valid arrived.
pub struct ValueWriter<'a, V> {
    cache: &'a mut Cache<V>,
    slot: usize,
    identifier: CacheIdentifier,
}

impl<'a, V> ValueWriter<'a, V> {
    pub(crate) fn new(
        cache: &'a mut Cache<V>,
        slot: usize,
        identifier: CacheIdentifier,
    ) -> ValueWriter<'a, V> {
        ValueWriter {
            cache,
            slot,
            identifier,
        }
    }

    /// The identifier the deposited value will be stored under.
    pub fn identifier(&self) -> &CacheIdentifier {
        &self.identifier
    }

    /// Stores `value` in the bound slot.
    pub fn set_value(self, value: V) -> Result<()> {
        self.cache
            .set_value_by_index(self.slot, self.identifier, value)
    }
}
