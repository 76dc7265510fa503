//! Byte payloads with explicit ownership.
//!
//! The two modes a buffer can be in are encoded in the type rather than in an
//! ownership flag: an owned buffer frees its allocation on drop, a borrowed
//! one never does. A borrowed buffer silently becomes owned the first time an
//! operation needs to grow or mutate it.

use crate::error::{ArgumentError, Result, RuntimeError};

#[derive(Debug, Clone)]
enum Payload<'a> {
    Owned(Vec<u8>),
    Borrowed(&'a [u8]),
}

/// An owning or borrowing byte container.
///
/// Most buffers in this crate are `DataBuffer<'static>` and owned; the
/// borrowed mode exists for zero-copy hand-off of caller slices whose
/// lifetime demonstrably outlives the buffer.
#[derive(Debug, Clone)]
pub struct DataBuffer<'a> {
    payload: Payload<'a>,
}

impl<'a> DataBuffer<'a> {
    /// Creates an owned, zero-filled buffer of `size` bytes.
    ///
    /// # Failure
    ///
    /// Fails with `Argument::ValueExceedsMaximum` when `size` exceeds
    /// `isize::MAX`.
    pub fn new(size: u64) -> Result<DataBuffer<'static>> {
        check_size(size)?;
        Ok(DataBuffer {
            payload: Payload::Owned(vec![0; size as usize]),
        })
    }

    /// An empty owned buffer.
    pub fn empty() -> DataBuffer<'static> {
        DataBuffer {
            payload: Payload::Owned(Vec::new()),
        }
    }

    /// Takes ownership of `data` without copying.
    pub fn from_vec(data: Vec<u8>) -> DataBuffer<'static> {
        DataBuffer {
            payload: Payload::Owned(data),
        }
    }

    /// Borrows `data`. The caller guarantees the bytes outlive the buffer;
    /// this is the one place the API requires caller discipline.
    pub fn borrowed(data: &'a [u8]) -> DataBuffer<'a> {
        DataBuffer {
            payload: Payload::Borrowed(data),
        }
    }

    pub fn len(&self) -> usize {
        match &self.payload {
            Payload::Owned(data) => data.len(),
            Payload::Borrowed(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this buffer owns its allocation.
    pub fn is_owned(&self) -> bool {
        matches!(self.payload, Payload::Owned(_))
    }

    /// Grows or shrinks the buffer to `size` bytes.
    ///
    /// Shrinking a borrowed buffer narrows the borrow; growing one copies the
    /// borrowed bytes into a fresh owned allocation first. Grown space is
    /// zero-filled.
    pub fn resize(&mut self, size: u64) -> Result<()> {
        check_size(size)?;
        let size = size as usize;
        match &mut self.payload {
            Payload::Owned(data) => data.resize(size, 0),
            Payload::Borrowed(slot) => {
                let data: &'a [u8] = slot;
                if size <= data.len() {
                    self.payload = Payload::Borrowed(&data[..size]);
                } else {
                    let mut owned = data.to_vec();
                    owned.resize(size, 0);
                    self.payload = Payload::Owned(owned);
                }
            }
        }
        Ok(())
    }

    /// Replaces the payload with a copy of `data`.
    pub fn set_data(&mut self, data: &[u8]) {
        self.payload = Payload::Owned(data.to_vec());
    }

    /// Replaces the payload, taking ownership of `data`.
    pub fn set_data_owned(&mut self, data: Vec<u8>) {
        self.payload = Payload::Owned(data);
    }

    /// Replaces the payload with a borrow of `data`.
    pub fn set_data_borrowed(&mut self, data: &'a [u8]) {
        self.payload = Payload::Borrowed(data);
    }

    pub fn data(&self) -> &[u8] {
        match &self.payload {
            Payload::Owned(data) => data,
            Payload::Borrowed(data) => data,
        }
    }

    /// The tail of the payload starting at `offset`.
    ///
    /// `offset == len` is legal and yields an empty slice.
    ///
    /// # Failure
    ///
    /// Fails with `Runtime::ValueOutOfBounds` when `offset > len`.
    pub fn data_at_offset(&self, offset: u64) -> Result<&[u8]> {
        let data = self.data();
        if offset > data.len() as u64 {
            return Err(RuntimeError::ValueOutOfBounds("offset").into());
        }
        Ok(&data[offset as usize..])
    }

    /// Mutable access to the payload. A borrowed buffer becomes owned.
    pub fn data_mut(&mut self) -> &mut [u8] {
        if let Payload::Borrowed(data) = &self.payload {
            let owned = data.to_vec();
            self.payload = Payload::Owned(owned);
        }
        match &mut self.payload {
            Payload::Owned(data) => data,
            Payload::Borrowed(_) => unreachable!(),
        }
    }
}

impl Default for DataBuffer<'static> {
    fn default() -> Self {
        DataBuffer::empty()
    }
}

fn check_size(size: u64) -> Result<()> {
    if size > isize::MAX as u64 {
        return Err(ArgumentError::ValueExceedsMaximum("size").into());
    }
    Ok(())
}
