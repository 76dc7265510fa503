//! Offset-keyed variant of the fixed-size-element containers.
//!
//! An area behaves like a vector but addresses elements by their logical
//! offset instead of an element index: callers and callbacks speak in
//! offsets, and the cache slot is derived from the offset. Any offset within
//! an element resolves to that element's aligned start.

use std::fmt;
use std::sync::Arc;

use crate::cache::{Cache, CacheIdentifier, ValueWriter};
use crate::clock::{default_clock, Clock, Timestamp};
use crate::error::{ArgumentError, IoError, Result, RuntimeError};
use crate::range::Range;
use crate::segments::SegmentTable;
use crate::ReadFlags;

/// Client hooks that produce element values for an [`Area`].
///
/// `element_value_offset` is the element's aligned logical offset; the
/// remaining parameters locate the element's bytes in backing storage.
pub trait AreaReader {
    type Io: ?Sized;
    type Value;

    #[allow(clippy::too_many_arguments)]
    fn read_element(
        &mut self,
        io: &mut Self::Io,
        element_value_offset: i64,
        file_index: i32,
        offset: i64,
        size: u64,
        range_flags: u32,
        writer: ValueWriter<'_, Self::Value>,
        read_flags: ReadFlags,
    ) -> Result<()>;
}

struct ElementLocation {
    value_offset: i64,
    file_index: i32,
    offset: i64,
    range_flags: u32,
    timestamp: Timestamp,
}

pub struct Area<R: AreaReader> {
    element_size: u64,
    table: SegmentTable,
    reader: R,
    clock: Arc<dyn Clock>,
}

impl<R: AreaReader> Area<R> {
    /// # Failure
    ///
    /// Fails with `Argument::ValueZeroOrLess` when `element_data_size` is
    /// zero.
    pub fn new(element_data_size: u64, reader: R) -> Result<Area<R>> {
        Area::with_clock(element_data_size, reader, default_clock())
    }

    pub fn with_clock(
        element_data_size: u64,
        reader: R,
        clock: Arc<dyn Clock>,
    ) -> Result<Area<R>> {
        if element_data_size == 0 {
            return Err(ArgumentError::ValueZeroOrLess("element data size").into());
        }
        if element_data_size > i64::MAX as u64 {
            return Err(ArgumentError::ValueExceedsMaximum("element data size").into());
        }
        Ok(Area {
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

    pub fn empty(&mut self) {
        self.table.clear();
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

    /// Grows the segment array with unset slots or shrinks it.
    pub fn resize_segments(&mut self, number_of_segments: usize) -> Result<()> {
        self.table.resize(number_of_segments)
    }

    /// Retrieves the value of the element containing `value_offset`, reading
    /// it through the area reader on a cache miss.
    pub fn get_element_value_at_offset<'c>(
        &mut self,
        io: &mut R::Io,
        cache: &'c mut Cache<R::Value>,
        value_offset: i64,
        read_flags: ReadFlags,
    ) -> Result<&'c R::Value> {
        let location = self.element_location(value_offset)?;
        let slot = self.slot_for_offset(cache, location.value_offset);
        let identifier =
            CacheIdentifier::new(location.file_index, location.offset, location.timestamp);

        let mut hit = false;
        if !read_flags.contains(ReadFlags::IGNORE_CACHE) {
            hit = cache.is_hit(slot, &identifier)?;
        }
        if !hit {
            tracing::trace!(
                value_offset = location.value_offset,
                offset = location.offset,
                size = self.element_size,
                "reading area element data"
            );
            let writer = ValueWriter::new(&mut *cache, slot, identifier);
            self.reader
                .read_element(
                    io,
                    location.value_offset,
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

    /// Deposits `value` for the element containing `value_offset` without
    /// invoking the reader.
    pub fn set_element_value_at_offset(
        &mut self,
        cache: &mut Cache<R::Value>,
        value_offset: i64,
        value: R::Value,
    ) -> Result<()> {
        let location = self.element_location(value_offset)?;
        let slot = self.slot_for_offset(cache, location.value_offset);
        let identifier =
            CacheIdentifier::new(location.file_index, location.offset, location.timestamp);
        cache.set_value_by_index(slot, identifier, value)
    }

    /// Resolves any offset within an element to the element's aligned start
    /// and backing location, walking segments and requiring each to hold a
    /// whole number of elements.
    fn element_location(&self, value_offset: i64) -> Result<ElementLocation> {
        if value_offset < 0 {
            return Err(ArgumentError::ValueLessThanZero("value offset").into());
        }
        let element_value_offset = value_offset - value_offset % self.element_size as i64;
        let mut remaining = element_value_offset as u64;
        for slot in self.table.segments() {
            let Some(segment) = slot else { continue };
            let size = segment.range().size();
            if size % self.element_size != 0 {
                return Err(RuntimeError::ValueOutOfBounds("segment size").into());
            }
            if remaining < size {
                return Ok(ElementLocation {
                    value_offset: element_value_offset,
                    file_index: segment.range().file_index(),
                    offset: segment.range().offset() + remaining as i64,
                    range_flags: segment.range().flags(),
                    timestamp: segment.timestamp(),
                });
            }
            remaining -= size;
        }
        Err(RuntimeError::ValueOutOfBounds("value offset").into())
    }

    fn slot_for_offset(&self, cache: &Cache<R::Value>, element_value_offset: i64) -> usize {
        cache.slot_for(element_value_offset as u64 / self.element_size)
    }
}

impl<R: AreaReader + Clone> Clone for Area<R> {
    fn clone(&self) -> Area<R> {
        Area {
            element_size: self.element_size,
            table: self.table.clone(),
            reader: self.reader.clone(),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<R: AreaReader> fmt::Debug for Area<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Area")
            .field("element_data_size", &self.element_size)
            .field("number_of_segments", &self.table.len())
            .field("size", &self.table.data_size())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::Error;
    use std::cell::Cell;
    use std::rc::Rc;

    /// Encodes the element index (derived from the aligned offset) into the
    /// first four bytes of the value.
    #[derive(Clone)]
    struct OffsetIndexReader {
        reads: Rc<Cell<usize>>,
    }

    impl OffsetIndexReader {
        fn new() -> OffsetIndexReader {
            OffsetIndexReader {
                reads: Rc::new(Cell::new(0)),
            }
        }
    }

    impl AreaReader for OffsetIndexReader {
        type Io = ();
        type Value = Vec<u8>;

        fn read_element(
            &mut self,
            _io: &mut (),
            element_value_offset: i64,
            _file_index: i32,
            _offset: i64,
            size: u64,
            _range_flags: u32,
            writer: ValueWriter<'_, Vec<u8>>,
            _read_flags: ReadFlags,
        ) -> Result<()> {
            self.reads.set(self.reads.get() + 1);
            let element_index = (element_value_offset as u64 / size) as u32;
            let mut value = vec![0u8; size as usize];
            value[..4].copy_from_slice(&element_index.to_le_bytes());
            writer.set_value(value)
        }
    }

    fn area_with_one_segment() -> Area<OffsetIndexReader> {
        let mut area = Area::new(512, OffsetIndexReader::new()).unwrap();
        area.append_segment(0, 0, 1024 * 512, 0).unwrap();
        area
    }

    #[test]
    fn offsets_resolve_to_their_containing_element() {
        let mut area = area_with_one_segment();
        let mut cache = Cache::with_capacity(64).unwrap();

        let value = area
            .get_element_value_at_offset(&mut (), &mut cache, 0, ReadFlags::empty())
            .unwrap();
        assert_eq!(&value[..4], &0u32.to_le_bytes());

        let value = area
            .get_element_value_at_offset(&mut (), &mut cache, 512, ReadFlags::empty())
            .unwrap();
        assert_eq!(&value[..4], &1u32.to_le_bytes());

        // Any offset inside the first element resolves to it.
        let value = area
            .get_element_value_at_offset(&mut (), &mut cache, 511, ReadFlags::empty())
            .unwrap();
        assert_eq!(&value[..4], &0u32.to_le_bytes());
    }

    #[test]
    fn interior_offset_hits_the_aligned_element_cache_slot() {
        let area_reader = OffsetIndexReader::new();
        let reads = Rc::clone(&area_reader.reads);
        let mut area = Area::new(512, area_reader).unwrap();
        area.append_segment(0, 0, 4096, 0).unwrap();
        let mut cache = Cache::with_capacity(8).unwrap();

        area.get_element_value_at_offset(&mut (), &mut cache, 0, ReadFlags::empty())
            .unwrap();
        area.get_element_value_at_offset(&mut (), &mut cache, 511, ReadFlags::empty())
            .unwrap();
        area.get_element_value_at_offset(&mut (), &mut cache, 1, ReadFlags::empty())
            .unwrap();
        assert_eq!(reads.get(), 1);
    }

    #[test]
    fn deposited_value_is_served_without_reading() {
        let area_reader = OffsetIndexReader::new();
        let reads = Rc::clone(&area_reader.reads);
        let mut area = Area::new(512, area_reader).unwrap();
        area.append_segment(2, 8192, 4096, 0).unwrap();
        let mut cache = Cache::with_capacity(8).unwrap();

        area.set_element_value_at_offset(&mut cache, 1024, vec![0xEE; 512])
            .unwrap();
        let value = area
            .get_element_value_at_offset(&mut (), &mut cache, 1030, ReadFlags::empty())
            .unwrap();
        assert_eq!(value[0], 0xEE);
        assert_eq!(reads.get(), 0);
    }

    #[test]
    fn offset_past_the_area_is_an_error() {
        let mut area = area_with_one_segment();
        let mut cache: Cache<Vec<u8>> = Cache::with_capacity(8).unwrap();
        assert!(area
            .get_element_value_at_offset(&mut (), &mut cache, 1024 * 512, ReadFlags::empty())
            .is_err());
    }

    #[test]
    fn negative_offset_is_an_argument_error() {
        let mut area = area_with_one_segment();
        let mut cache: Cache<Vec<u8>> = Cache::with_capacity(8).unwrap();
        let err = area
            .get_element_value_at_offset(&mut (), &mut cache, -1, ReadFlags::empty())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Argument(ArgumentError::ValueLessThanZero(_))
        ));
    }

    #[test]
    fn second_file_segment_keeps_identifiers_distinct() {
        let mut area = Area::new(512, OffsetIndexReader::new()).unwrap();
        area.append_segment(0, 0, 1024, 0).unwrap();
        area.append_segment(1, 0, 1024, 0).unwrap();
        let mut cache = Cache::with_capacity(8).unwrap();

        // Elements 0 and 2 live at file offset 0 of different files; both
        // stay addressable through their own slots.
        let value = area
            .get_element_value_at_offset(&mut (), &mut cache, 0, ReadFlags::empty())
            .unwrap();
        assert_eq!(&value[..4], &0u32.to_le_bytes());
        let value = area
            .get_element_value_at_offset(&mut (), &mut cache, 1024, ReadFlags::empty())
            .unwrap();
        assert_eq!(&value[..4], &2u32.to_le_bytes());
    }
}
