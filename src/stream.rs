//! Contiguous read/seek access over scattered segments.
//!
//! A stream exposes a POSIX-like cursor over the concatenation of its
//! segments. Reads walk segment boundaries transparently: each touched
//! segment is fetched through the [`SegmentReader`] (seek, then an exact-size
//! read) and memoised in the client's cache. Reading the whole stream at once
//! caches a single buffer at slot 0, and later per-segment requests are
//! served by slicing that buffer.

use std::cmp::min;
use std::fmt;
use std::io;
use std::io::SeekFrom;
use std::sync::Arc;

use crate::buffer::DataBuffer;
use crate::cache::{Cache, CacheIdentifier};
use crate::clock::{default_clock, Clock, Timestamp};
use crate::error::{ArgumentError, IoError, Result, RuntimeError};
use crate::range::Range;
use crate::segments::SegmentTable;
use crate::ReadFlags;

/// Client hooks that fetch segment bytes from backing storage.
pub trait SegmentReader {
    type Io: ?Sized;

    /// Positions the backing file for `segment_index` at `offset`. The
    /// returned offset must equal the requested one; anything else fails the
    /// stream operation with `Io::SeekFailed`.
    fn seek_segment(
        &mut self,
        io: &mut Self::Io,
        segment_index: usize,
        file_index: i32,
        offset: i64,
    ) -> Result<i64>;

    /// Reads segment bytes into `buf`, returning the number of bytes read.
    /// Anything short of `buf.len()` fails the stream operation with
    /// `Io::ReadFailed`; the cache is never populated with partial data.
    #[allow(clippy::too_many_arguments)]
    fn read_segment(
        &mut self,
        io: &mut Self::Io,
        segment_index: usize,
        file_index: i32,
        buf: &mut [u8],
        range_flags: u32,
        read_flags: ReadFlags,
    ) -> Result<usize>;
}

pub struct Stream<R: SegmentReader> {
    table: SegmentTable,
    reader: R,
    clock: Arc<dyn Clock>,
    timestamp: Timestamp,
    current_offset: u64,
    current_segment_index: usize,
    current_segment_offset: u64,
    cursor_stale: bool,
}

impl<R: SegmentReader> Stream<R> {
    pub fn new(reader: R) -> Stream<R> {
        Stream::with_clock(reader, default_clock())
    }

    pub fn with_clock(reader: R, clock: Arc<dyn Clock>) -> Stream<R> {
        let timestamp = clock.now();
        Stream {
            table: SegmentTable::new(),
            reader,
            clock,
            timestamp,
            current_offset: 0,
            current_segment_index: 0,
            current_segment_offset: 0,
            cursor_stale: false,
        }
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    pub fn reader_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    /// Removes every segment and rewinds the cursor.
    pub fn empty(&mut self) {
        self.table.clear();
        self.touch();
        self.current_offset = 0;
        self.current_segment_index = 0;
        self.current_segment_offset = 0;
        self.cursor_stale = false;
    }

    pub fn number_of_segments(&self) -> usize {
        self.table.len()
    }

    /// Sum of all segment sizes; the size of the logical stream.
    pub fn get_data_size(&self) -> u64 {
        self.table.data_size()
    }

    /// The cursor's logical offset.
    pub fn get_offset(&self) -> i64 {
        self.current_offset as i64
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
        self.table.set(segment_index, range, timestamp)?;
        self.touch();
        Ok(())
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
        let segment_index = self.table.append(range, timestamp)?;
        self.touch();
        Ok(segment_index)
    }

    /// Grows the segment array with unset slots or shrinks it.
    pub fn resize_segments(&mut self, number_of_segments: usize) -> Result<()> {
        self.table.resize(number_of_segments)?;
        self.touch();
        Ok(())
    }

    /// Copies up to `buf.len()` bytes from the cursor, walking segment
    /// boundaries, and advances the cursor by the number of bytes read.
    /// Reading at or past the end of the stream returns 0.
    pub fn read_buffer(
        &mut self,
        io: &mut R::Io,
        cache: &mut Cache<DataBuffer<'static>>,
        buf: &mut [u8],
    ) -> Result<usize> {
        self.table.ensure_mapped()?;
        self.refresh_cursor()?;

        let data_size = self.table.data_size();
        if self.current_offset >= data_size || buf.is_empty() {
            return Ok(0);
        }
        let read_size = min(buf.len() as u64, data_size - self.current_offset) as usize;

        let mut copied = 0;
        while copied < read_size {
            let segment = self.table.get(self.current_segment_index)?;
            let range = *segment.range();
            let segment_timestamp = segment.timestamp();
            let segment_size = range.size();

            if self.current_segment_offset >= segment_size {
                self.current_segment_index += 1;
                self.current_segment_offset = 0;
                continue;
            }
            let want = min(
                (read_size - copied) as u64,
                segment_size - self.current_segment_offset,
            ) as usize;
            {
                // The segment's logical start is wherever the cursor is,
                // minus how far into the segment it sits.
                let mapped_offset = self.current_offset - self.current_segment_offset;
                let data = fetch_segment_data(
                    &mut self.reader,
                    io,
                    cache,
                    self.timestamp,
                    data_size,
                    self.current_segment_index,
                    &range,
                    segment_timestamp,
                    mapped_offset,
                    ReadFlags::empty(),
                )?;
                let start = self.current_segment_offset as usize;
                buf[copied..copied + want].copy_from_slice(&data[start..start + want]);
            }
            copied += want;
            self.current_offset += want as u64;
            self.current_segment_offset += want as u64;
            if self.current_segment_offset >= segment_size {
                self.current_segment_index += 1;
                self.current_segment_offset = 0;
            }
        }
        Ok(read_size)
    }

    /// Repositions the cursor. Seeking at or past the end of the stream is
    /// legal; the next read returns 0.
    ///
    /// # Failure
    ///
    /// A resolved offset below zero fails `Runtime::ValueOutOfBounds`. (The
    /// unsupported-whence failure of flag-based seek interfaces cannot occur
    /// here: `SeekFrom` is exhaustive.)
    pub fn seek_offset(&mut self, pos: SeekFrom) -> Result<i64> {
        self.table.ensure_mapped()?;
        let data_size = self.table.data_size();

        let resolved = match pos {
            SeekFrom::Start(offset) => {
                if offset > i64::MAX as u64 {
                    return Err(ArgumentError::ValueExceedsMaximum("offset").into());
                }
                offset as i64
            }
            SeekFrom::Current(delta) => (self.current_offset as i64)
                .checked_add(delta)
                .ok_or(RuntimeError::ValueOutOfBounds("offset"))?,
            SeekFrom::End(delta) => (data_size as i64)
                .checked_add(delta)
                .ok_or(RuntimeError::ValueOutOfBounds("offset"))?,
        };
        if resolved < 0 {
            return Err(RuntimeError::ValueOutOfBounds("offset").into());
        }
        if (resolved as u64) < data_size {
            let (segment_index, segment_offset) = self.table.segment_index_at_offset(resolved)?;
            self.current_segment_index = segment_index;
            self.current_segment_offset = segment_offset;
        } else {
            self.current_segment_index = self.table.len();
            self.current_segment_offset = 0;
        }
        self.current_offset = resolved as u64;
        self.cursor_stale = false;
        Ok(resolved)
    }

    /// Reads the entire logical stream into a single buffer cached at slot 0.
    /// Subsequent calls return the cached buffer until a segment mutation
    /// invalidates it.
    pub fn get_data<'c>(
        &mut self,
        io: &mut R::Io,
        cache: &'c mut Cache<DataBuffer<'static>>,
    ) -> Result<&'c DataBuffer<'static>> {
        self.table.ensure_mapped()?;
        let data_size = self.table.data_size();
        if data_size > isize::MAX as u64 {
            return Err(RuntimeError::ValueExceedsMaximum("data size").into());
        }
        let identifier = CacheIdentifier::new(0, 0, self.timestamp);
        if cache.is_hit(0, &identifier)? {
            return cache.expect(0, &identifier, "stream data");
        }
        tracing::trace!(data_size, "reading whole stream");

        let mut data = vec![0u8; data_size as usize];
        let mut position = 0usize;
        for segment_index in 0..self.table.len() {
            let Some(segment) = self.table.get_opt(segment_index)? else {
                continue;
            };
            let range = *segment.range();
            let size = range.size() as usize;
            if size == 0 {
                continue;
            }
            read_exact_segment(
                &mut self.reader,
                io,
                segment_index,
                &range,
                &mut data[position..position + size],
                ReadFlags::empty(),
            )?;
            position += size;
        }
        cache.set_value_by_index(0, identifier, DataBuffer::from_vec(data))?;
        cache.expect(0, &identifier, "stream data")
    }

    /// The cached bytes of one segment.
    pub fn get_segment_data<'c>(
        &mut self,
        io: &mut R::Io,
        cache: &'c mut Cache<DataBuffer<'static>>,
        segment_index: usize,
        read_flags: ReadFlags,
    ) -> Result<&'c [u8]> {
        self.table.ensure_mapped()?;
        let data_size = self.table.data_size();
        let mapped_offset = self.table.mapped_range(segment_index)?.offset() as u64;
        let segment = self.table.get(segment_index)?;
        let range = *segment.range();
        let segment_timestamp = segment.timestamp();
        fetch_segment_data(
            &mut self.reader,
            io,
            cache,
            self.timestamp,
            data_size,
            segment_index,
            &range,
            segment_timestamp,
            mapped_offset,
            read_flags,
        )
    }

    /// The cached bytes of the segment containing `offset`, starting at
    /// `offset` and extending to the segment's end.
    pub fn get_segment_data_at_offset<'c>(
        &mut self,
        io: &mut R::Io,
        cache: &'c mut Cache<DataBuffer<'static>>,
        offset: i64,
        read_flags: ReadFlags,
    ) -> Result<&'c [u8]> {
        let (segment_index, segment_offset) = self.table.segment_index_at_offset(offset)?;
        let data = self.get_segment_data(io, cache, segment_index, read_flags)?;
        Ok(&data[segment_offset as usize..])
    }

    /// Reserved; the write path is not defined for streams.
    pub fn write_buffer(&mut self, _io: &mut R::Io, _buf: &[u8]) -> Result<usize> {
        Err(RuntimeError::UnsupportedValue("stream write").into())
    }

    /// Borrows the stream together with its I/O state and cache as a
    /// `std::io::Read + Seek` adapter.
    pub fn stream_reader<'a>(
        &'a mut self,
        io: &'a mut R::Io,
        cache: &'a mut Cache<DataBuffer<'static>>,
    ) -> StreamReader<'a, R> {
        StreamReader {
            stream: self,
            io,
            cache,
        }
    }

    /// Marks the stream mutated: bumps its timestamp (invalidating the
    /// whole-stream buffer) and schedules a cursor revalidation.
    fn touch(&mut self) {
        self.timestamp = self.clock.now();
        self.cursor_stale = true;
    }

    /// Recomputes `(current_segment_index, current_segment_offset)` from the
    /// logical offset after a segment mutation.
    fn refresh_cursor(&mut self) -> Result<()> {
        if !self.cursor_stale {
            return Ok(());
        }
        let data_size = self.table.data_size();
        if self.current_offset < data_size {
            let (segment_index, segment_offset) = self
                .table
                .segment_index_at_offset(self.current_offset as i64)?;
            self.current_segment_index = segment_index;
            self.current_segment_offset = segment_offset;
        } else {
            self.current_segment_index = self.table.len();
            self.current_segment_offset = 0;
        }
        self.cursor_stale = false;
        Ok(())
    }
}

/// Returns the bytes of one segment out of the cache, reading them through
/// the segment reader on a miss. When the cache holds the whole stream in
/// slot 0, the segment is served by slicing that buffer instead.
#[allow(clippy::too_many_arguments)]
fn fetch_segment_data<'c, R: SegmentReader>(
    reader: &mut R,
    io: &mut R::Io,
    cache: &'c mut Cache<DataBuffer<'static>>,
    stream_timestamp: Timestamp,
    data_size: u64,
    segment_index: usize,
    range: &Range,
    segment_timestamp: Timestamp,
    mapped_offset: u64,
    read_flags: ReadFlags,
) -> Result<&'c [u8]> {
    let segment_size = range.size() as usize;

    if !read_flags.contains(ReadFlags::IGNORE_CACHE) && cache.number_of_values() == 1 {
        let whole = CacheIdentifier::new(0, 0, stream_timestamp);
        if let Some(occupant) = cache.value_by_index(0)? {
            if *occupant.identifier() == whole && occupant.value().len() as u64 == data_size {
                let start = mapped_offset as usize;
                return Ok(&cache.expect(0, &whole, "stream data")?.data()[start..start + segment_size]);
            }
        }
    }

    let slot = cache.slot_for(segment_index as u64);
    let identifier =
        CacheIdentifier::new(range.file_index(), range.offset(), segment_timestamp);

    let mut hit = false;
    if !read_flags.contains(ReadFlags::IGNORE_CACHE) {
        hit = cache.is_hit(slot, &identifier)?;
    }
    if !hit {
        let mut data = vec![0u8; segment_size];
        read_exact_segment(reader, io, segment_index, range, &mut data, read_flags)?;
        cache.set_value_by_index(slot, identifier, DataBuffer::from_vec(data))?;
    }
    Ok(cache.expect(slot, &identifier, "segment data")?.data())
}

/// Seek-then-read of one whole segment, enforcing the callback contracts.
fn read_exact_segment<R: SegmentReader>(
    reader: &mut R,
    io: &mut R::Io,
    segment_index: usize,
    range: &Range,
    buf: &mut [u8],
    read_flags: ReadFlags,
) -> Result<()> {
    tracing::trace!(
        segment_index,
        offset = range.offset(),
        size = buf.len(),
        "reading segment data"
    );
    let offset = reader
        .seek_segment(io, segment_index, range.file_index(), range.offset())
        .map_err(|err| IoError::SeekFailed {
            segment: segment_index,
            offset: range.offset(),
            source: Some(err.into()),
        })?;
    if offset != range.offset() {
        return Err(IoError::SeekFailed {
            segment: segment_index,
            offset: range.offset(),
            source: None,
        }
        .into());
    }
    let read_count = reader
        .read_segment(
            io,
            segment_index,
            range.file_index(),
            buf,
            range.flags(),
            read_flags,
        )
        .map_err(|err| IoError::ReadFailed {
            offset: range.offset(),
            source: Some(err.into()),
        })?;
    if read_count != buf.len() {
        return Err(IoError::ReadFailed {
            offset: range.offset(),
            source: None,
        }
        .into());
    }
    Ok(())
}

/// `std::io` adapter over a stream, in the shape of an incremental blob
/// handle: wrap it in a `BufReader` or anything else built on the std
/// traits.
pub struct StreamReader<'a, R: SegmentReader> {
    stream: &'a mut Stream<R>,
    io: &'a mut R::Io,
    cache: &'a mut Cache<DataBuffer<'static>>,
}

impl<R: SegmentReader> io::Read for StreamReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream
            .read_buffer(self.io, self.cache, buf)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))
    }
}

impl<R: SegmentReader> io::Seek for StreamReader<'_, R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.stream
            .seek_offset(pos)
            .map(|offset| offset as u64)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))
    }
}

impl<R: SegmentReader> fmt::Debug for Stream<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("number_of_segments", &self.table.len())
            .field("data_size", &self.table.data_size())
            .field("offset", &self.current_offset)
            .finish()
    }
}

impl<R: SegmentReader + Clone> Clone for Stream<R> {
    fn clone(&self) -> Stream<R> {
        Stream {
            table: self.table.clone(),
            reader: self.reader.clone(),
            clock: Arc::clone(&self.clock),
            timestamp: self.timestamp,
            current_offset: self.current_offset,
            current_segment_index: self.current_segment_index,
            current_segment_offset: self.current_segment_offset,
            cursor_stale: self.cursor_stale,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::Error;
    use std::cell::Cell;
    use std::rc::Rc;

    /// Serves segment `i` as `b'A' + i` repeated, counting reads.
    #[derive(Clone)]
    struct PatternReader {
        reads: Rc<Cell<usize>>,
        short_read: bool,
        skewed_seek: bool,
    }

    impl PatternReader {
        fn new() -> PatternReader {
            PatternReader {
                reads: Rc::new(Cell::new(0)),
                short_read: false,
                skewed_seek: false,
            }
        }
    }

    impl SegmentReader for PatternReader {
        type Io = ();

        fn seek_segment(
            &mut self,
            _io: &mut (),
            _segment_index: usize,
            _file_index: i32,
            offset: i64,
        ) -> Result<i64> {
            if self.skewed_seek {
                Ok(offset + 1)
            } else {
                Ok(offset)
            }
        }

        fn read_segment(
            &mut self,
            _io: &mut (),
            segment_index: usize,
            _file_index: i32,
            buf: &mut [u8],
            _range_flags: u32,
            _read_flags: ReadFlags,
        ) -> Result<usize> {
            self.reads.set(self.reads.get() + 1);
            buf.fill(b'A' + segment_index as u8);
            if self.short_read {
                Ok(buf.len() - 1)
            } else {
                Ok(buf.len())
            }
        }
    }

    fn three_segment_stream() -> Stream<PatternReader> {
        let mut stream = Stream::new(PatternReader::new());
        stream.append_segment(0, 0, 10, 0).unwrap();
        stream.append_segment(0, 100, 20, 0).unwrap();
        stream.append_segment(1, 0, 5, 0).unwrap();
        stream
    }

    fn cache() -> Cache<DataBuffer<'static>> {
        Cache::with_capacity(8).unwrap()
    }

    #[test]
    fn traversal_walks_segment_boundaries() {
        let mut stream = three_segment_stream();
        let mut cache = cache();
        assert_eq!(stream.get_data_size(), 35);

        stream.seek_offset(SeekFrom::Start(15)).unwrap();
        let mut buf = [0u8; 10];
        let read = stream.read_buffer(&mut (), &mut cache, &mut buf).unwrap();
        assert_eq!(read, 10);
        assert_eq!(&buf, b"BBBBBBBBBB");

        stream.seek_offset(SeekFrom::End(-1)).unwrap();
        let read = stream.read_buffer(&mut (), &mut cache, &mut buf).unwrap();
        assert_eq!(read, 1);
        assert_eq!(buf[0], b'C');
    }

    #[test]
    fn read_across_all_three_segments() {
        let mut stream = three_segment_stream();
        let mut cache = cache();
        let mut buf = [0u8; 35];
        let read = stream.read_buffer(&mut (), &mut cache, &mut buf).unwrap();
        assert_eq!(read, 35);
        let mut expected = Vec::new();
        expected.extend_from_slice(&[b'A'; 10]);
        expected.extend_from_slice(&[b'B'; 20]);
        expected.extend_from_slice(&[b'C'; 5]);
        assert_eq!(&buf[..], &expected[..]);
        assert_eq!(stream.get_offset(), 35);

        // The next read is at end of stream.
        assert_eq!(stream.read_buffer(&mut (), &mut cache, &mut buf).unwrap(), 0);
    }

    #[test]
    fn reads_are_served_from_the_segment_cache() {
        let stream_reader = PatternReader::new();
        let reads = Rc::clone(&stream_reader.reads);
        let mut stream = Stream::new(stream_reader);
        stream.append_segment(0, 0, 16, 0).unwrap();
        let mut cache = cache();

        let mut buf = [0u8; 8];
        stream.read_buffer(&mut (), &mut cache, &mut buf).unwrap();
        stream.seek_offset(SeekFrom::Start(0)).unwrap();
        stream.read_buffer(&mut (), &mut cache, &mut buf).unwrap();
        assert_eq!(reads.get(), 1);
    }

    #[test]
    fn zero_length_read_is_a_no_op() {
        let mut stream = three_segment_stream();
        let mut cache = cache();
        let mut buf = [];
        assert_eq!(stream.read_buffer(&mut (), &mut cache, &mut buf).unwrap(), 0);
        assert_eq!(stream.get_offset(), 0);
    }

    #[test]
    fn seek_round_trips_through_current() {
        let mut stream = three_segment_stream();
        for offset in [0u64, 1, 10, 29, 30, 34, 35] {
            stream.seek_offset(SeekFrom::Start(offset)).unwrap();
            let current = stream.seek_offset(SeekFrom::Current(0)).unwrap();
            assert_eq!(current, offset as i64);
        }
    }

    #[test]
    fn seek_past_end_reads_nothing() {
        let mut stream = three_segment_stream();
        let mut cache = cache();
        let offset = stream.seek_offset(SeekFrom::Start(99)).unwrap();
        assert_eq!(offset, 99);
        let mut buf = [0u8; 4];
        assert_eq!(stream.read_buffer(&mut (), &mut cache, &mut buf).unwrap(), 0);
    }

    #[test]
    fn negative_resolved_seek_is_out_of_bounds() {
        let mut stream = three_segment_stream();
        let err = stream.seek_offset(SeekFrom::End(-36)).unwrap_err();
        assert!(matches!(
            err,
            Error::Runtime(RuntimeError::ValueOutOfBounds(_))
        ));
    }

    #[test]
    fn short_segment_read_is_fatal_and_uncached() {
        let mut stream_reader = PatternReader::new();
        stream_reader.short_read = true;
        let mut stream = Stream::new(stream_reader);
        stream.append_segment(0, 0, 16, 0).unwrap();
        let mut cache = cache();

        let mut buf = [0u8; 16];
        let err = stream
            .read_buffer(&mut (), &mut cache, &mut buf)
            .unwrap_err();
        assert!(matches!(err, Error::Io(IoError::ReadFailed { .. })));
        assert_eq!(cache.number_of_values(), 0);
    }

    #[test]
    fn seek_callback_must_land_on_the_requested_offset() {
        let mut stream_reader = PatternReader::new();
        stream_reader.skewed_seek = true;
        let mut stream = Stream::new(stream_reader);
        stream.append_segment(0, 0, 16, 0).unwrap();
        let mut cache = cache();

        let mut buf = [0u8; 4];
        let err = stream
            .read_buffer(&mut (), &mut cache, &mut buf)
            .unwrap_err();
        assert!(matches!(err, Error::Io(IoError::SeekFailed { .. })));
    }

    #[test]
    fn whole_stream_buffer_is_cached_once() {
        let stream_reader = PatternReader::new();
        let reads = Rc::clone(&stream_reader.reads);
        let mut stream = Stream::new(stream_reader);
        stream.append_segment(0, 0, 10, 0).unwrap();
        stream.append_segment(0, 100, 20, 0).unwrap();
        let mut cache = cache();

        let data = stream.get_data(&mut (), &mut cache).unwrap();
        assert_eq!(data.len(), 30);
        assert_eq!(&data.data()[..10], &[b'A'; 10]);
        assert_eq!(&data.data()[10..], &[b'B'; 20]);
        assert_eq!(reads.get(), 2);

        stream.get_data(&mut (), &mut cache).unwrap();
        assert_eq!(reads.get(), 2);
    }

    #[test]
    fn segment_mutation_invalidates_the_whole_stream_buffer() {
        let stream_reader = PatternReader::new();
        let reads = Rc::clone(&stream_reader.reads);
        let mut stream = Stream::new(stream_reader);
        stream.append_segment(0, 0, 10, 0).unwrap();
        let mut cache = cache();

        stream.get_data(&mut (), &mut cache).unwrap();
        assert_eq!(reads.get(), 1);

        stream.set_segment_by_index(0, 0, 50, 10, 0).unwrap();
        stream.get_data(&mut (), &mut cache).unwrap();
        assert_eq!(reads.get(), 2);
    }

    #[test]
    fn segment_requests_slice_the_whole_stream_buffer() {
        let stream_reader = PatternReader::new();
        let reads = Rc::clone(&stream_reader.reads);
        let mut stream = Stream::new(stream_reader);
        stream.append_segment(0, 0, 10, 0).unwrap();
        stream.append_segment(0, 100, 20, 0).unwrap();
        let mut cache = cache();

        stream.get_data(&mut (), &mut cache).unwrap();
        let read_count = reads.get();

        let data = stream
            .get_segment_data(&mut (), &mut cache, 1, ReadFlags::empty())
            .unwrap();
        assert_eq!(data, &[b'B'; 20]);
        assert_eq!(reads.get(), read_count);

        let mut buf = [0u8; 6];
        stream.seek_offset(SeekFrom::Start(8)).unwrap();
        stream.read_buffer(&mut (), &mut cache, &mut buf).unwrap();
        assert_eq!(&buf, b"AABBBB");
        assert_eq!(reads.get(), read_count);
    }

    #[test]
    fn segment_data_at_offset_returns_the_tail() {
        let mut stream = three_segment_stream();
        let mut cache = cache();
        let data = stream
            .get_segment_data_at_offset(&mut (), &mut cache, 12, ReadFlags::empty())
            .unwrap();
        assert_eq!(data, &[b'B'; 18]);
    }

    #[test]
    fn write_is_unsupported() {
        let mut stream = three_segment_stream();
        let err = stream.write_buffer(&mut (), b"data").unwrap_err();
        assert!(matches!(
            err,
            Error::Runtime(RuntimeError::UnsupportedValue(_))
        ));
    }

    #[test]
    fn cursor_survives_segment_mutation() {
        let mut stream = three_segment_stream();
        let mut cache = cache();
        stream.seek_offset(SeekFrom::Start(12)).unwrap();

        // Replacing a later segment leaves the cursor's logical offset
        // intact; the segment cursor is recomputed on the next read.
        stream.set_segment_by_index(2, 1, 64, 5, 0).unwrap();
        let mut buf = [0u8; 4];
        stream.read_buffer(&mut (), &mut cache, &mut buf).unwrap();
        assert_eq!(&buf, b"BBBB");
        assert_eq!(stream.get_offset(), 16);
    }

    #[test]
    fn stream_reader_adapts_to_std_io() {
        use std::io::{BufRead, BufReader, Read, Seek};

        let mut stream = three_segment_stream();
        let mut cache = cache();
        let mut ctx = ();
        let mut adapter = stream.stream_reader(&mut ctx, &mut cache);
        adapter.seek(SeekFrom::Start(5)).unwrap();
        let mut buf = [0u8; 10];
        adapter.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"AAAAABBBBB");

        adapter.seek(SeekFrom::Start(0)).unwrap();
        let mut buffered = BufReader::with_capacity(7, adapter);
        let chunk = buffered.fill_buf().unwrap();
        assert_eq!(chunk, b"AAAAAAA");
    }
}
