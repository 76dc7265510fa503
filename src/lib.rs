//! Segmented file data abstraction.
//!
//! `fdata` exposes scattered on-disk byte regions as unified, cacheable,
//! randomly-addressable logical containers. It sits between a raw I/O handle
//! and parsers of complex binary formats, shielding them from layout
//! concerns: fragmentation across files, extents, sparse runs and compressed
//! segments.
//!
//! Containers describe *where* data lives as [`Range`] descriptors in some
//! file-index space; *how* bytes are fetched and decoded is injected as a
//! reader trait implementation. Decoded values are memoised in a [`Cache`],
//! a direct-mapped slot array the client sizes to its working set and may
//! share between cooperating containers. Cache validity is governed by
//! timestamps: every element mutation advances the element's timestamp, so
//! stale slots miss and are re-read.
//!
//! The container types:
//!
//! - [`Stream`] — ordered segments forming one contiguous logical byte
//!   stream with read/seek.
//! - [`List`] — indexed elements with individually cached decoded values.
//! - [`Vector`] — a list specialised to fixed-size elements, with derived
//!   element-index arithmetic.
//! - [`Area`] — like a vector but keyed by logical offset.
//! - [`Btree`] — a lazily materialised, cached node tree whose leaves
//!   reference further data ranges.
//!
//! The crate performs no internal synchronisation: a container and its cache
//! form one logical aggregate owned by a single thread. Callbacks may block
//! on I/O; no locks are held while they do.
//!
//! # Example
//!
//! ```
//! use fdata::{Cache, ElementReader, List, ListElement, ReadFlags, Result, ValueWriter};
//!
//! /// Decodes an element as the size of its extent.
//! struct Decoder;
//!
//! impl ElementReader for Decoder {
//!     type Io = ();
//!     type Value = u64;
//!
//!     fn read_element(
//!         &mut self,
//!         _io: &mut (),
//!         element: &ListElement,
//!         writer: ValueWriter<'_, u64>,
//!         _read_flags: ReadFlags,
//!     ) -> Result<()> {
//!         writer.set_value(element.data_range().size())
//!     }
//! }
//!
//! fn main() -> Result<()> {
//!     let mut list = List::new(Decoder);
//!     list.append_element(0, 4096, 24, 0)?;
//!
//!     let mut cache = Cache::with_capacity(16)?;
//!     let value = list.get_element_value_by_index(&mut (), &mut cache, 0, ReadFlags::empty())?;
//!     assert_eq!(*value, 24);
//!     Ok(())
//! }
//! ```

pub mod area;
pub mod btree;
pub mod buffer;
pub mod cache;
pub mod clock;
pub mod error;
pub mod list;
pub mod range;
mod segments;
pub mod stream;
pub mod vector;

pub use area::{Area, AreaReader};
pub use btree::{Btree, BtreeEntry, BtreeNode, LeafValue, NodeReader, NodeValueWriter, SubNode};
pub use buffer::DataBuffer;
pub use cache::{Cache, CacheIdentifier, CacheValue, ValueWriter};
pub use clock::{Clock, MonotonicClock, Timestamp};
pub use error::{
    ArgumentError, BoxError, Error, InputError, IoError, MemoryError, OutputError, Result,
    RuntimeError,
};
pub use list::{ElementReader, List, ListElement};
pub use range::{MappedRange, Range};
pub use stream::{SegmentReader, Stream, StreamReader};
pub use vector::{Vector, VectorReader};

bitflags::bitflags! {
    /// Flags steering a value or segment read.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ReadFlags: u8 {
        /// Bypass the cache hit test and read through the callback
        /// unconditionally. The freshly read value is still deposited.
        const IGNORE_CACHE = 0x01;
    }
}
