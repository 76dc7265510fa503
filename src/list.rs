//! Indexed collection of independently cached elements.
//!
//! A list maps element indexes to data ranges in backing storage and hands
//! decoded element values out of a client-controlled [`Cache`]. The reader
//! trait supplies the decoding: on a cache miss the list invokes
//! [`ElementReader::read_element`], which deposits the value through the
//! writer it is handed; the list then re-reads the slot and returns the
//! deposited value.

use std::fmt;
use std::sync::Arc;

use crate::cache::{Cache, CacheIdentifier, ValueWriter};
use crate::clock::{default_clock, Clock, Timestamp};
use crate::error::{Error, IoError, Result, RuntimeError};
use crate::range::{MappedRange, Range};
use crate::segments::SegmentTable;
use crate::ReadFlags;

/// Snapshot of one list element, as handed to read callbacks.
#[derive(Debug, Clone)]
pub struct ListElement {
    index: usize,
    range: Range,
    value_offset: i64,
    mapped_size: Option<u64>,
    timestamp: Timestamp,
}

impl ListElement {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn data_range(&self) -> &Range {
        &self.range
    }

    /// The element's offset in the list's logical address space.
    pub fn value_offset(&self) -> i64 {
        self.value_offset
    }

    /// The size the element occupies in the logical projection; equals the
    /// data range size unless an override was set.
    pub fn mapped_size(&self) -> u64 {
        self.mapped_size.unwrap_or_else(|| self.range.size())
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// The identifier a value for this element is cached under.
    pub(crate) fn identifier(&self) -> CacheIdentifier {
        CacheIdentifier::new(self.range.file_index(), self.range.offset(), self.timestamp)
    }
}

/// Client hooks that produce element values from their data ranges.
///
/// The implementor is the list's data handle: it is owned by the list,
/// dropped with it, and cloned with it. `Io` is the opaque per-call I/O
/// state; only the callbacks interpret it.
pub trait ElementReader {
    type Io: ?Sized;
    type Value;

    /// Called on a cache miss. The implementation decodes the element's
    /// bytes (fetching them however it likes through `io`) and deposits the
    /// value via `writer` before returning.
    fn read_element(
        &mut self,
        io: &mut Self::Io,
        element: &ListElement,
        writer: ValueWriter<'_, Self::Value>,
        read_flags: ReadFlags,
    ) -> Result<()>;

    /// Reserved write-back path; the default fails
    /// `Runtime::UnsupportedValue`.
    fn write_element(
        &mut self,
        _io: &mut Self::Io,
        _element: &ListElement,
        _value: &Self::Value,
    ) -> Result<()> {
        Err(RuntimeError::UnsupportedValue("element write").into())
    }
}

/// An ordered list of data ranges with per-element cached values.
pub struct List<R: ElementReader> {
    table: SegmentTable,
    reader: R,
    clock: Arc<dyn Clock>,
}

impl<R: ElementReader> List<R> {
    pub fn new(reader: R) -> List<R> {
        List::with_clock(reader, default_clock())
    }

    /// Creates a list stamping element mutations from `clock` instead of the
    /// process-wide monotonic clock.
    pub fn with_clock(reader: R, clock: Arc<dyn Clock>) -> List<R> {
        List {
            table: SegmentTable::new(),
            reader,
            clock,
        }
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    pub fn reader_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    /// Removes every element.
    pub fn empty(&mut self) {
        self.table.clear();
    }

    /// Grows the list with unset slots or shrinks it, discarding truncated
    /// elements.
    pub fn resize(&mut self, number_of_elements: usize) -> Result<()> {
        self.table.resize(number_of_elements)
    }

    pub fn number_of_elements(&self) -> usize {
        self.table.len()
    }

    /// Sum of all element data range sizes.
    pub fn data_size(&self) -> u64 {
        self.table.data_size()
    }

    pub fn is_element_set(&self, element_index: usize) -> Result<bool> {
        self.table.is_set(element_index)
    }

    /// # Failure
    ///
    /// Fails with `Runtime::ValueMissing` when the slot exists but was never
    /// set, and `Argument::ValueOutOfBounds` when it does not exist.
    pub fn get_element_by_index(&mut self, element_index: usize) -> Result<ListElement> {
        self.element_snapshot(element_index)
    }

    /// Resolves the element whose mapped range contains `value_offset`.
    /// Returns `Ok(None)` when no element does.
    pub fn get_element_by_offset(
        &mut self,
        value_offset: i64,
    ) -> Result<Option<(usize, ListElement)>> {
        if self.table.data_size() == 0 {
            return Ok(None);
        }
        match self.table.segment_index_at_offset(value_offset) {
            Ok((element_index, _)) => {
                let element = self.element_snapshot(element_index)?;
                Ok(Some((element_index, element)))
            }
            Err(Error::Runtime(RuntimeError::ValueOutOfBounds(_))) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Sets the data range of the element at `element_index`, creating the
    /// element when the slot was empty. Bumps the element's timestamp.
    pub fn set_element_by_index(
        &mut self,
        element_index: usize,
        file_index: i32,
        offset: i64,
        size: u64,
        flags: u32,
    ) -> Result<()> {
        let range = Range::new(file_index, offset, size, flags)?;
        let timestamp = self.clock.now();
        self.table.set(element_index, range, timestamp)?;
        tracing::debug!(element_index, offset, size, "set list element");
        Ok(())
    }

    /// Appends an element whose logical offset is the current data size.
    pub fn append_element(
        &mut self,
        file_index: i32,
        offset: i64,
        size: u64,
        flags: u32,
    ) -> Result<usize> {
        let range = Range::new(file_index, offset, size, flags)?;
        let timestamp = self.clock.now();
        let element_index = self.table.append(range, timestamp)?;
        tracing::debug!(element_index, offset, size, "appended list element");
        Ok(element_index)
    }

    pub fn get_data_range_by_index(&self, element_index: usize) -> Result<Range> {
        Ok(*self.table.get(element_index)?.range())
    }

    /// Replaces the data range of an existing element and bumps its
    /// timestamp, invalidating any cached value.
    pub fn set_data_range_by_index(
        &mut self,
        element_index: usize,
        file_index: i32,
        offset: i64,
        size: u64,
        flags: u32,
    ) -> Result<()> {
        let range = Range::new(file_index, offset, size, flags)?;
        let timestamp = self.clock.now();
        self.table.update(element_index, range, timestamp)
    }

    /// Overrides the size an element occupies in the logical projection.
    pub fn set_mapped_size_by_index(
        &mut self,
        element_index: usize,
        mapped_size: Option<u64>,
    ) -> Result<()> {
        let timestamp = self.clock.now();
        self.table.set_mapped_size(element_index, mapped_size, timestamp)
    }

    pub fn mapped_range_by_index(&mut self, element_index: usize) -> Result<MappedRange> {
        self.table.mapped_range(element_index)
    }

    /// Resolves a logical offset to `(element_index, offset_within_element)`.
    pub fn element_index_at_value_offset(&mut self, value_offset: i64) -> Result<(usize, u64)> {
        self.table.segment_index_at_offset(value_offset)
    }

    /// Resolves a value index to `(element_index, value_offset_in_element)`
    /// for fixed-size values packed into the elements.
    pub fn element_index_at_value_index(
        &self,
        value_index: u64,
        value_size: u64,
    ) -> Result<(usize, u64)> {
        self.table.segment_index_at_value_index(value_index, value_size)
    }

    /// Retrieves the value of the element at `element_index`, reading it
    /// through the element reader on a cache miss.
    pub fn get_element_value_by_index<'c>(
        &mut self,
        io: &mut R::Io,
        cache: &'c mut Cache<R::Value>,
        element_index: usize,
        read_flags: ReadFlags,
    ) -> Result<&'c R::Value> {
        let element = self.element_snapshot(element_index)?;
        self.get_element_value(io, cache, &element, read_flags)
    }

    /// Retrieves the value of the element whose mapped range contains
    /// `value_offset`.
    pub fn get_element_value_at_offset<'c>(
        &mut self,
        io: &mut R::Io,
        cache: &'c mut Cache<R::Value>,
        value_offset: i64,
        read_flags: ReadFlags,
    ) -> Result<&'c R::Value> {
        let (element_index, _) = self.table.segment_index_at_offset(value_offset)?;
        self.get_element_value_by_index(io, cache, element_index, read_flags)
    }

    /// Deposits `value` for the element at `element_index` without invoking
    /// the reader.
    pub fn set_element_value_by_index(
        &mut self,
        cache: &mut Cache<R::Value>,
        element_index: usize,
        value: R::Value,
    ) -> Result<()> {
        let element = self.element_snapshot(element_index)?;
        let slot = cache.slot_for(element_index as u64);
        cache.set_value_by_index(slot, element.identifier(), value)
    }

    /// Deposits `value` for the element whose mapped range contains
    /// `value_offset`.
    pub fn set_element_value_at_offset(
        &mut self,
        cache: &mut Cache<R::Value>,
        value_offset: i64,
        value: R::Value,
    ) -> Result<()> {
        let (element_index, _) = self.table.segment_index_at_offset(value_offset)?;
        self.set_element_value_by_index(cache, element_index, value)
    }

    /// The value flow of a single element: hit test, read through the
    /// callback on a miss, then re-validate the deposit.
    fn get_element_value<'c>(
        &mut self,
        io: &mut R::Io,
        cache: &'c mut Cache<R::Value>,
        element: &ListElement,
        read_flags: ReadFlags,
    ) -> Result<&'c R::Value> {
        let slot = cache.slot_for(element.index() as u64);
        let identifier = element.identifier();

        let mut hit = false;
        if !read_flags.contains(ReadFlags::IGNORE_CACHE) {
            hit = cache.is_hit(slot, &identifier)?;
        }
        if !hit {
            tracing::trace!(
                offset = element.data_range().offset(),
                size = element.data_range().size(),
                "reading element data"
            );
            let writer = ValueWriter::new(&mut *cache, slot, identifier);
            self.reader
                .read_element(io, element, writer, read_flags)
                .map_err(|err| IoError::ReadFailed {
                    offset: element.data_range().offset(),
                    source: Some(err.into()),
                })?;
        }
        cache.expect(slot, &identifier, "element value")
    }

    fn element_snapshot(&mut self, element_index: usize) -> Result<ListElement> {
        let mapped = self.table.mapped_range(element_index)?;
        let segment = self.table.get(element_index)?;
        Ok(ListElement {
            index: element_index,
            range: *segment.range(),
            value_offset: mapped.offset(),
            mapped_size: segment.mapped_size_override(),
            timestamp: segment.timestamp(),
        })
    }
}

impl<R: ElementReader + Clone> Clone for List<R> {
    /// Deep-copies the element descriptors and clones the reader; cached
    /// values are not touched (the cache is a separate object).
    fn clone(&self) -> List<R> {
        List {
            table: self.table.clone(),
            reader: self.reader.clone(),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<R: ElementReader> fmt::Debug for List<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("List")
            .field("number_of_elements", &self.table.len())
            .field("data_size", &self.table.data_size())
            .finish()
    }
}
