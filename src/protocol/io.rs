//! The append-only write sink and read cursor that back [`super::context::SCtx`]
//! and [`super::context::DCtx`].
//!
//! These are intentionally dumb: they know nothing about endianness
//! negotiation or data flags. That logic lives one layer up, in
//! [`super::primitive`], which decides whether to byte-swap before handing
//! bytes down here.

use super::error::{CspError, Result, Status};

/// A growable, append-only byte sink.
///
/// Any growable byte container would satisfy the contract the engine needs;
/// this wraps a `Vec<u8>` since that's the natural choice for an in-process
/// encode pass.
#[derive(Debug, Default, Clone)]
pub struct ByteSink(Vec<u8>);

impl ByteSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Creates an empty sink with room for at least `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self(Vec::with_capacity(capacity))
    }

    /// The number of bytes written so far.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if nothing has been written yet.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Appends raw bytes to the sink.
    pub fn append(&mut self, bytes: &[u8]) {
        self.0.extend_from_slice(bytes);
    }

    /// Overwrites `len` bytes starting at `offset` with `bytes`. Used to
    /// patch a length prefix after the fact.
    ///
    /// # Panics
    ///
    /// Panics if `offset + bytes.len()` is out of bounds, or if the slices
    /// overlap past what was already written.
    pub fn patch(&mut self, offset: usize, bytes: &[u8]) {
        self.0[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Consumes the sink, returning the underlying bytes.
    pub fn into_vec(self) -> Vec<u8> {
        self.0
    }

    /// Borrows the bytes written so far.
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

/// A read cursor over a borrowed byte slice.
///
/// Every read that would run past the end of the slice fails with
/// [`Status::ErrorOverflow`].
#[derive(Debug, Clone, Copy)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    /// Creates a cursor positioned at the start of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// The current read position.
    pub fn tell(&self) -> usize {
        self.pos
    }

    /// The number of unread bytes remaining.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Moves the read position to an absolute offset.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(CspError::from(Status::ErrorOverflow));
        }
        self.pos = pos;
        Ok(())
    }

    /// Reads and returns `n` bytes, advancing the cursor.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(CspError::from(Status::ErrorOverflow));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Reads a single byte without consuming it.
    pub fn peek_u8(&self) -> Result<u8> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or(CspError::from(Status::ErrorOverflow))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_tracks_length() {
        let mut sink = ByteSink::new();
        assert!(sink.is_empty());
        sink.append(&[1, 2, 3]);
        assert_eq!(sink.len(), 3);
    }

    #[test]
    fn patch_overwrites_in_place() {
        let mut sink = ByteSink::new();
        sink.append(&[0, 0, 0, 0]);
        sink.patch(0, &[1, 2]);
        assert_eq!(sink.as_slice(), &[1, 2, 0, 0]);
    }

    #[test]
    fn cursor_fails_past_end() {
        let data = [1, 2, 3];
        let mut cursor = ByteCursor::new(&data);
        assert!(cursor.read_bytes(2).is_ok());
        assert!(matches!(
            cursor.read_bytes(5),
            Err(CspError::Status(Status::ErrorOverflow))
        ));
    }

    #[test]
    fn seek_and_tell_roundtrip() {
        let data = [1, 2, 3, 4];
        let mut cursor = ByteCursor::new(&data);
        cursor.read_bytes(2).unwrap();
        assert_eq!(cursor.tell(), 2);
        cursor.seek(0).unwrap();
        assert_eq!(cursor.tell(), 0);
        assert!(cursor.seek(10).is_err());
    }
}
