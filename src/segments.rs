//! The segment engine shared by lists, vectors, areas and streams.
//!
//! A table is an ordered array of optionally-set segments plus the lazily
//! recomputed projection of those segments onto a contiguous logical address
//! space. Structural mutations mark the projection dirty; it is recomputed
//! before the next offset lookup.

use crate::clock::Timestamp;
use crate::error::{ArgumentError, Result, RuntimeError};
use crate::range::{MappedRange, Range};

#[derive(Debug, Clone)]
pub(crate) struct Segment {
    range: Range,
    mapped_size: Option<u64>,
    timestamp: Timestamp,
}

impl Segment {
    pub(crate) fn range(&self) -> &Range {
        &self.range
    }

    /// The size this segment occupies in the logical projection.
    pub(crate) fn mapped_size(&self) -> u64 {
        self.mapped_size.unwrap_or_else(|| self.range.size())
    }

    pub(crate) fn mapped_size_override(&self) -> Option<u64> {
        self.mapped_size
    }

    pub(crate) fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}

#[derive(Debug, Clone)]
pub(crate) struct SegmentTable {
    segments: Vec<Option<Segment>>,
    mapped: Vec<MappedRange>,
    mapped_total: u64,
    data_size: u64,
    calculate_mapped_ranges: bool,
}

impl SegmentTable {
    pub(crate) fn new() -> SegmentTable {
        SegmentTable {
            segments: Vec::new(),
            mapped: Vec::new(),
            mapped_total: 0,
            data_size: 0,
            calculate_mapped_ranges: false,
        }
    }

    pub(crate) fn clear(&mut self) {
        self.segments.clear();
        self.mapped.clear();
        self.mapped_total = 0;
        self.data_size = 0;
        self.calculate_mapped_ranges = true;
    }

    pub(crate) fn len(&self) -> usize {
        self.segments.len()
    }

    pub(crate) fn data_size(&self) -> u64 {
        self.data_size
    }

    /// Grows with unset slots or shrinks, dropping truncated segments.
    pub(crate) fn resize(&mut self, number_of_segments: usize) -> Result<()> {
        if number_of_segments < self.segments.len() {
            let removed: u64 = self.segments[number_of_segments..]
                .iter()
                .flatten()
                .map(|segment| segment.range.size())
                .sum();
            self.segments.truncate(number_of_segments);
            self.data_size -= removed;
        } else {
            self.segments.resize_with(number_of_segments, || None);
        }
        self.calculate_mapped_ranges = true;
        Ok(())
    }

    pub(crate) fn is_set(&self, index: usize) -> Result<bool> {
        if index >= self.segments.len() {
            return Err(ArgumentError::ValueOutOfBounds("segment index").into());
        }
        Ok(self.segments[index].is_some())
    }

    pub(crate) fn get_opt(&self, index: usize) -> Result<Option<&Segment>> {
        if index >= self.segments.len() {
            return Err(ArgumentError::ValueOutOfBounds("segment index").into());
        }
        Ok(self.segments[index].as_ref())
    }

    pub(crate) fn get(&self, index: usize) -> Result<&Segment> {
        self.get_opt(index)?
            .ok_or_else(|| RuntimeError::ValueMissing("segment").into())
    }

    pub(crate) fn segments(&self) -> impl Iterator<Item = Option<&Segment>> {
        self.segments.iter().map(|slot| slot.as_ref())
    }

    /// Creates or replaces the segment at `index`.
    pub(crate) fn set(
        &mut self,
        index: usize,
        range: Range,
        timestamp: Timestamp,
    ) -> Result<()> {
        if index >= self.segments.len() {
            return Err(ArgumentError::ValueOutOfBounds("segment index").into());
        }
        let previous_size = self.segments[index]
            .as_ref()
            .map(|segment| segment.range.size())
            .unwrap_or(0);
        self.adjust_data_size(previous_size, range.size())?;
        let mapped_size = self.segments[index]
            .as_ref()
            .and_then(|segment| segment.mapped_size);
        self.segments[index] = Some(Segment {
            range,
            mapped_size,
            timestamp,
        });
        self.calculate_mapped_ranges = true;
        Ok(())
    }

    /// Replaces the segment at `index`, which must already be set.
    pub(crate) fn update(
        &mut self,
        index: usize,
        range: Range,
        timestamp: Timestamp,
    ) -> Result<()> {
        if self.get_opt(index)?.is_none() {
            return Err(RuntimeError::ValueMissing("segment").into());
        }
        self.set(index, range, timestamp)
    }

    pub(crate) fn append(&mut self, range: Range, timestamp: Timestamp) -> Result<usize> {
        self.adjust_data_size(0, range.size())?;
        self.segments.push(Some(Segment {
            range,
            mapped_size: None,
            timestamp,
        }));
        self.calculate_mapped_ranges = true;
        Ok(self.segments.len() - 1)
    }

    pub(crate) fn prepend(&mut self, range: Range, timestamp: Timestamp) -> Result<()> {
        self.adjust_data_size(0, range.size())?;
        self.segments.insert(
            0,
            Some(Segment {
                range,
                mapped_size: None,
                timestamp,
            }),
        );
        self.calculate_mapped_ranges = true;
        Ok(())
    }

    /// Overrides (or clears) the mapped size of the segment at `index`.
    pub(crate) fn set_mapped_size(
        &mut self,
        index: usize,
        mapped_size: Option<u64>,
        timestamp: Timestamp,
    ) -> Result<()> {
        if let Some(size) = mapped_size {
            if size > i64::MAX as u64 {
                return Err(ArgumentError::ValueExceedsMaximum("mapped size").into());
            }
        }
        match self.segments.get_mut(index) {
            None => Err(ArgumentError::ValueOutOfBounds("segment index").into()),
            Some(None) => Err(RuntimeError::ValueMissing("segment").into()),
            Some(Some(segment)) => {
                segment.mapped_size = mapped_size;
                segment.timestamp = timestamp;
                self.calculate_mapped_ranges = true;
                Ok(())
            }
        }
    }

    fn adjust_data_size(&mut self, previous_size: u64, new_size: u64) -> Result<()> {
        let reduced = self.data_size - previous_size;
        let data_size = reduced
            .checked_add(new_size)
            .filter(|size| *size <= i64::MAX as u64)
            .ok_or(RuntimeError::ValueExceedsMaximum("data size"))?;
        self.data_size = data_size;
        Ok(())
    }

    /// Recomputes the logical projection when a structural mutation has
    /// marked it dirty.
    pub(crate) fn ensure_mapped(&mut self) -> Result<()> {
        if !self.calculate_mapped_ranges {
            return Ok(());
        }
        let mut offset: i64 = 0;
        self.mapped.clear();
        self.mapped.reserve(self.segments.len());
        for slot in &self.segments {
            let size = slot.as_ref().map(Segment::mapped_size).unwrap_or(0);
            self.mapped.push(MappedRange::new(offset, size));
            offset = offset
                .checked_add(size as i64)
                .ok_or(RuntimeError::ValueExceedsMaximum("mapped size"))?;
        }
        self.mapped_total = offset as u64;
        self.calculate_mapped_ranges = false;
        Ok(())
    }

    pub(crate) fn mapped_range(&mut self, index: usize) -> Result<MappedRange> {
        self.ensure_mapped()?;
        if index >= self.mapped.len() {
            return Err(ArgumentError::ValueOutOfBounds("segment index").into());
        }
        if self.segments[index].is_none() {
            return Err(RuntimeError::ValueMissing("segment").into());
        }
        Ok(self.mapped[index])
    }

    /// Resolves a logical offset to `(segment_index, offset_within_segment)`.
    ///
    /// The search guesses an index assuming evenly sized segments, probes
    /// linearly upwards, and when that walks past the target restarts from
    /// the guess walking downwards.
    pub(crate) fn segment_index_at_offset(&mut self, value_offset: i64) -> Result<(usize, u64)> {
        if value_offset < 0 {
            return Err(ArgumentError::ValueLessThanZero("value offset").into());
        }
        self.ensure_mapped()?;
        if self.mapped_total == 0 {
            return Err(RuntimeError::ValueOutOfBounds("data size").into());
        }
        let number_of_segments = self.segments.len();
        let initial = ((number_of_segments as u128 * value_offset as u128)
            / self.mapped_total as u128) as usize;
        let initial = initial.min(number_of_segments - 1);

        let mut index = initial;
        while index < number_of_segments {
            let mapped = self.mapped[index];
            if mapped.contains(value_offset) {
                return Ok((index, (value_offset - mapped.offset()) as u64));
            }
            if value_offset < mapped.offset() {
                break;
            }
            index += 1;
        }
        let mut index = initial as isize;
        while index >= 0 {
            let mapped = self.mapped[index as usize];
            if mapped.contains(value_offset) {
                return Ok((index as usize, (value_offset - mapped.offset()) as u64));
            }
            if value_offset > mapped.offset() {
                break;
            }
            index -= 1;
        }
        Err(RuntimeError::ValueOutOfBounds("element index").into())
    }

    /// Resolves a value index to `(segment_index, value_offset_in_segment)`
    /// for values of a fixed `value_size`, walking segments and subtracting
    /// each one's value count.
    pub(crate) fn segment_index_at_value_index(
        &self,
        value_index: u64,
        value_size: u64,
    ) -> Result<(usize, u64)> {
        if value_size == 0 {
            return Err(ArgumentError::ValueZeroOrLess("value size").into());
        }
        let mut remaining = value_index;
        for (index, slot) in self.segments.iter().enumerate() {
            let Some(segment) = slot else { continue };
            let number_of_values = segment.range.size() / value_size;
            if remaining < number_of_values {
                return Ok((index, remaining * value_size));
            }
            remaining -= number_of_values;
        }
        Err(RuntimeError::ValueOutOfBounds("value index").into())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn range(offset: i64, size: u64) -> Range {
        Range::new(0, offset, size, 0).unwrap()
    }

    fn table(sizes: &[u64]) -> SegmentTable {
        let mut table = SegmentTable::new();
        let mut offset = 0;
        for (i, size) in sizes.iter().enumerate() {
            table.append(range(offset, *size), i as Timestamp + 1).unwrap();
            offset += *size as i64;
        }
        table
    }

    #[test]
    fn data_size_tracks_appends_and_replacements() {
        let mut table = table(&[10, 20, 5]);
        assert_eq!(table.data_size(), 35);

        table.set(1, range(100, 50), 9).unwrap();
        assert_eq!(table.data_size(), 65);

        table.resize(1).unwrap();
        assert_eq!(table.data_size(), 10);
    }

    #[test]
    fn mapped_ranges_are_contiguous_from_zero() {
        let mut table = table(&[10, 20, 5]);
        assert_eq!(table.mapped_range(0).unwrap(), MappedRange::new(0, 10));
        assert_eq!(table.mapped_range(1).unwrap(), MappedRange::new(10, 20));
        assert_eq!(table.mapped_range(2).unwrap(), MappedRange::new(30, 5));
    }

    #[test]
    fn zero_size_segment_keeps_data_size_and_projection() {
        let mut table = table(&[10]);
        table.append(range(500, 0), 7).unwrap();
        table.append(range(600, 4), 8).unwrap();
        assert_eq!(table.data_size(), 14);
        assert_eq!(table.mapped_range(1).unwrap(), MappedRange::new(10, 0));
        assert_eq!(table.mapped_range(2).unwrap(), MappedRange::new(10, 4));
    }

    #[test]
    fn offset_lookup_probes_both_directions() {
        // Skewed sizes push the initial guess away from the target in both
        // directions.
        let mut table = table(&[1000, 10, 10, 10, 1000]);
        assert_eq!(table.segment_index_at_offset(0).unwrap(), (0, 0));
        assert_eq!(table.segment_index_at_offset(999).unwrap(), (0, 999));
        assert_eq!(table.segment_index_at_offset(1005).unwrap(), (1, 5));
        assert_eq!(table.segment_index_at_offset(1025).unwrap(), (3, 5));
        assert_eq!(table.segment_index_at_offset(2029).unwrap(), (4, 999));
    }

    #[test]
    fn offset_at_or_past_end_is_out_of_bounds() {
        let mut table = table(&[10, 20]);
        assert!(table.segment_index_at_offset(30).is_err());
        assert!(table.segment_index_at_offset(31).is_err());
    }

    #[test]
    fn unset_slots_are_skipped_by_lookups() {
        let mut table = table(&[16]);
        table.resize(3).unwrap();
        table.set(2, range(64, 16), 5).unwrap();
        assert_eq!(table.data_size(), 32);
        assert_eq!(table.segment_index_at_offset(20).unwrap(), (2, 4));
    }

    #[test]
    fn value_index_walk_subtracts_per_segment_counts() {
        let table = table(&[64, 32]);
        assert_eq!(table.segment_index_at_value_index(0, 16).unwrap(), (0, 0));
        assert_eq!(table.segment_index_at_value_index(3, 16).unwrap(), (0, 48));
        assert_eq!(table.segment_index_at_value_index(4, 16).unwrap(), (1, 0));
        assert_eq!(table.segment_index_at_value_index(5, 16).unwrap(), (1, 16));
        assert!(table.segment_index_at_value_index(6, 16).is_err());
    }

    #[test]
    fn mapped_size_override_reshapes_the_projection() {
        let mut table = table(&[10, 20]);
        table.set_mapped_size(0, Some(4), 9).unwrap();
        assert_eq!(table.mapped_range(1).unwrap(), MappedRange::new(4, 20));
        // Physical accounting is unchanged.
        assert_eq!(table.data_size(), 30);
    }
}
