//! Fixed-size-element view over a run of segments.
//!
//! A vector is a list whose element size is fixed at construction: element
//! indexes and offsets are derived from the segment layout by arithmetic
//! instead of being declared per element. Segments are expected to hold a
//! whole number of elements; a remainder is a client bug and surfaces as
//! `Runtime::ValueOutOfBounds` at element lookup.

use std::fmt;
use std::sync::Arc;

use crate::cache::{Cache, CacheIdentifier, ValueWriter};
use crate::clock::{default_clock, Clock, Timestamp};
use crate::error::{ArgumentError, IoError, Result, RuntimeError};
use crate::range::Range;
use crate::segments::SegmentTable;
use crate::ReadFlags;

/// Client hooks that produce element values for a [`Vector`].
///
/// The callback is keyed by element index (not segment index) and must
/// deposit its value through `writer`, which is bound to the element-index
/// cache slot.
pub trait VectorReader {
    type Io: ?Sized;
    type Value;

    #[allow(clippy::too_many_arguments)]
    fn read_element(
        &mut self,
        io: &mut Self::Io,
        element_index: u64,
        file_index: i32,
        offset: i64,
        size: u64,
        range_flags: u32,
        writer: ValueWriter<'_, Self::Value>,
        read_flags: ReadFlags,
    ) -> Result<()>;
}

/// Where a derived element lives in backing storage.
struct ElementLocation {
    file_index: i32,
    offset: i64,
    range_flags: u32,
    timestamp: Timestamp,
}

pub struct Vector<R: VectorReader> {
    element_size: u64,
    table: SegmentTable,
    reader: R,
    clock: Arc<dyn Clock>,
}

impl<R: VectorReader> Vector<R> {
    /// # Failure
    ///
    /// Fails with `Argument::ValueZeroOrLess` when `element_data_size` is
    /// zero.
    pub fn new(element_data_size: u64, reader: R) -> Result<Vector<R>> {
        Vector::with_clock(element_data_size, reader, default_clock())
    }

    pub fn with_clock(
        element_data_size: u64,
        reader: R,
        clock: Arc<dyn Clock>,
    ) -> Result<Vector<R>> {
        if element_data_size == 0 {
            return Err(ArgumentError::ValueZeroOrLess("element data size").into());
        }
        if element_data_size > i64::MAX as u64 {
            return Err(ArgumentError::ValueExceedsMaximum("element data size").into());
        }
        Ok(Vector {
            element_size: element_data_size,
            table: SegmentTable::new(),
            reader,
            clock,
        })
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    pub fn reader_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    pub fn element_data_size(&self) -> u64 {
        self.element_size
    }

    /// Sum of all segment sizes.
    pub fn size(&self) -> u64 {
        self.table.data_size()
    }

    pub fn number_of_elements(&self) -> u64 {
        self.table.data_size() / self.element_size
    }

    pub fn empty(&mut self) {
        self.table.clear();
    }

    /// Grows the segment array with unset slots or shrinks it.
    pub fn resize_segments(&mut self, number_of_segments: usize) -> Result<()> {
        self.table.resize(number_of_segments)
    }

    pub fn number_of_segments(&self) -> usize {
        self.table.len()
    }

    pub fn get_segment_by_index(&self, segment_index: usize) -> Result<Range> {
        Ok(*self.table.get(segment_index)?.range())
    }

    pub fn set_segment_by_index(
        &mut self,
        segment_index: usize,
        file_index: i32,
        offset: i64,
        size: u64,
        flags: u32,
    ) -> Result<()> {
        let range = Range::new(file_index, offset, size, flags)?;
        let timestamp = self.clock.now();
        self.table.set(segment_index, range, timestamp)
    }

    pub fn append_segment(
        &mut self,
        file_index: i32,
        offset: i64,
        size: u64,
        flags: u32,
    ) -> Result<usize> {
        let range = Range::new(file_index, offset, size, flags)?;
        let timestamp = self.clock.now();
        self.table.append(range, timestamp)
    }

    /// Inserts a segment before the first one, shifting every derived
    /// element index up.
    pub fn prepend_segment(
        &mut self,
        file_index: i32,
        offset: i64,
        size: u64,
        flags: u32,
    ) -> Result<()> {
        let range = Range::new(file_index, offset, size, flags)?;
        let timestamp = self.clock.now();
        self.table.prepend(range, timestamp)
    }

    /// Maps a logical offset to `(element_index, offset_within_element)`.
    pub fn get_element_index_at_offset(&mut self, value_offset: i64) -> Result<(u64, u64)> {
        let (segment_index, segment_offset) = self.table.segment_index_at_offset(value_offset)?;
        let elements_before = self.elements_before(segment_index)?;
        self.check_exact(segment_index)?;
        Ok((
            elements_before + segment_offset / self.element_size,
            segment_offset % self.element_size,
        ))
    }

    /// Retrieves the value of the element at `element_index`, reading it
    /// through the vector reader on a cache miss.
    pub fn get_element_value_by_index<'c>(
        &mut self,
        io: &mut R::Io,
        cache: &'c mut Cache<R::Value>,
        element_index: u64,
        read_flags: ReadFlags,
    ) -> Result<&'c R::Value> {
        let location = self.element_location(element_index)?;
        let slot = cache.slot_for(element_index);
        let identifier =
            CacheIdentifier::new(location.file_index, location.offset, location.timestamp);

        let mut hit = false;
        if !read_flags.contains(ReadFlags::IGNORE_CACHE) {
            hit = cache.is_hit(slot, &identifier)?;
        }
        if !hit {
            tracing::trace!(
                element_index,
                offset = location.offset,
                size = self.element_size,
                "reading vector element data"
            );
            let writer = ValueWriter::new(&mut *cache, slot, identifier);
            self.reader
                .read_element(
                    io,
                    element_index,
                    location.file_index,
                    location.offset,
                    self.element_size,
                    location.range_flags,
                    writer,
                    read_flags,
                )
                .map_err(|err| IoError::ReadFailed {
                    offset: location.offset,
                    source: Some(err.into()),
                })?;
        }
        cache.expect(slot, &identifier, "element value")
    }

    /// Retrieves the value of the element containing `value_offset`.
    pub fn get_element_value_at_offset<'c>(
        &mut self,
        io: &mut R::Io,
        cache: &'c mut Cache<R::Value>,
        value_offset: i64,
        read_flags: ReadFlags,
    ) -> Result<&'c R::Value> {
        let (element_index, _) = self.get_element_index_at_offset(value_offset)?;
        self.get_element_value_by_index(io, cache, element_index, read_flags)
    }

    /// Deposits `value` for the element at `element_index` without invoking
    /// the reader.
    pub fn set_element_value_by_index(
        &mut self,
        cache: &mut Cache<R::Value>,
        element_index: u64,
        value: R::Value,
    ) -> Result<()> {
        let location = self.element_location(element_index)?;
        let slot = cache.slot_for(element_index);
        let identifier =
            CacheIdentifier::new(location.file_index, location.offset, location.timestamp);
        cache.set_value_by_index(slot, identifier, value)
    }

    /// Resolves an element index to its backing location, walking segments
    /// and requiring each to hold a whole number of elements.
    fn element_location(&self, element_index: u64) -> Result<ElementLocation> {
        let mut remaining = element_index;
        for slot in self.table.segments() {
            let Some(segment) = slot else { continue };
            let size = segment.range().size();
            if size % self.element_size != 0 {
                return Err(RuntimeError::ValueOutOfBounds("segment size").into());
            }
            let number_of_elements = size / self.element_size;
            if remaining < number_of_elements {
                let offset = segment.range().offset() + (remaining * self.element_size) as i64;
                return Ok(ElementLocation {
                    file_index: segment.range().file_index(),
                    offset,
                    range_flags: segment.range().flags(),
                    timestamp: segment.timestamp(),
                });
            }
            remaining -= number_of_elements;
        }
        Err(ArgumentError::ValueOutOfBounds("element index").into())
    }

    fn elements_before(&self, segment_index: usize) -> Result<u64> {
        let mut count = 0;
        for slot in self.table.segments().take(segment_index) {
            let Some(segment) = slot else { continue };
            let size = segment.range().size();
            if size % self.element_size != 0 {
                return Err(RuntimeError::ValueOutOfBounds("segment size").into());
            }
            count += size / self.element_size;
        }
        Ok(count)
    }

    fn check_exact(&self, segment_index: usize) -> Result<()> {
        let segment = self.table.get(segment_index)?;
        if segment.range().size() % self.element_size != 0 {
            return Err(RuntimeError::ValueOutOfBounds("segment size").into());
        }
        Ok(())
    }
}

impl<R: VectorReader + Clone> Clone for Vector<R> {
    fn clone(&self) -> Vector<R> {
        Vector {
            element_size: self.element_size,
            table: self.table.clone(),
            reader: self.reader.clone(),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<R: VectorReader> fmt::Debug for Vector<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vector")
            .field("element_data_size", &self.element_size)
            .field("number_of_segments", &self.table.len())
            .field("size", &self.table.data_size())
            .finish()
    }
}
