//! Positioned reads and fixed-width field decoding.
//!
//! Mach-O headers are decoded relative to big-endian order: a header whose
//! magic reads byte-reversed is "swapped" and every multi-byte field inside it
//! is decoded little-endian instead. Buffers are never mutated to achieve this.

use crate::error::{classify_io, ErrorKind, WrappedError};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

pub(crate) type ParseResult<T> = std::result::Result<T, WrappedError>;

/// A source of bytes addressable by absolute offset.
///
/// Every read returns exactly `len` bytes or fails; a read past the end of the
/// source is an [`ErrorKind::OutOfRange`] failure.
pub trait ByteSource {
    /// Reads exactly `len` bytes starting at `offset`
    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>, WrappedError>;
}

impl ByteSource for File {
    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>, WrappedError> {
        let message = || format!("failed to read {len} bytes at offset {offset}");
        let mut handle = self;
        handle
            .seek(SeekFrom::Start(offset))
            .map_err(|e| classify_io(message(), e))?;

        let mut buf = vec![0u8; len];
        handle
            .read_exact(&mut buf)
            .map_err(|e| classify_io(message(), e))?;
        Ok(buf)
    }
}

impl ByteSource for [u8] {
    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>, WrappedError> {
        let out_of_range = || {
            WrappedError::bare(
                ErrorKind::OutOfRange,
                format!(
                    "read of {len} bytes at offset {offset} exceeds source length {}",
                    self.len()
                ),
            )
        };
        let start = usize::try_from(offset).map_err(|_| out_of_range())?;
        let end = start.checked_add(len).ok_or_else(out_of_range)?;
        self.get(start..end)
            .map(<[u8]>::to_vec)
            .ok_or_else(out_of_range)
    }
}

impl ByteSource for Vec<u8> {
    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>, WrappedError> {
        self.as_slice().read_at(offset, len)
    }
}

/// Decode a `u32` at `offset`, honouring the swap flag
pub fn read_u32(buf: &[u8], offset: usize, swapped: bool) -> Result<u32, WrappedError> {
    let bytes = field::<4>(buf, offset)?;
    Ok(if swapped {
        u32::from_le_bytes(bytes)
    } else {
        u32::from_be_bytes(bytes)
    })
}

/// Decode a `u64` at `offset`, honouring the swap flag
pub fn read_u64(buf: &[u8], offset: usize, swapped: bool) -> Result<u64, WrappedError> {
    let bytes = field::<8>(buf, offset)?;
    Ok(if swapped {
        u64::from_le_bytes(bytes)
    } else {
        u64::from_be_bytes(bytes)
    })
}

/// Extract an `N`-byte field.
///
/// An offset outside the buffer is a [`ErrorKind::BufferRange`] failure; an
/// offset whose end cannot even be computed is a [`ErrorKind::DataView`] one.
fn field<const N: usize>(buf: &[u8], offset: usize) -> ParseResult<[u8; N]> {
    let end = offset.checked_add(N).ok_or_else(|| {
        WrappedError::bare(
            ErrorKind::DataView,
            format!("field offset {offset} + {N} overflows"),
        )
    })?;

    let slice = buf.get(offset..end).ok_or_else(|| {
        WrappedError::bare(
            ErrorKind::BufferRange,
            format!(
                "{N}-byte field at offset {offset} is outside a {} byte buffer",
                buf.len()
            ),
        )
    })?;

    slice.try_into().map_err(|e| {
        WrappedError::new(
            ErrorKind::DataView,
            format!("failed to decode {N}-byte field at offset {offset}"),
            &e,
        )
    })
}
