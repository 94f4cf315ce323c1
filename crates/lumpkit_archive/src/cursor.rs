//! Bounds-checked cursor over an in-memory byte buffer.
//!
//! Every codec parses untrusted data through a [`BinaryCursor`]. A read that would run past the end of
//! the buffer fails with [`Error::OutOfBounds`], which codecs treat as the canonical corruption signal.
//! The buffer never grows on its own: writes past the end fail as well, and callers grow the buffer with
//! [`BinaryCursor::resize`] before writing into the new region.

use byteorder::ByteOrder;

use crate::error::{Error, Result};

/// Cursor over an owned byte buffer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BinaryCursor {
    data: Vec<u8>,
    position: usize,
}

impl BinaryCursor {
    /// Create a cursor positioned at the start of `data`
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, position: 0 }
    }

    /// Create a cursor over `len` zero bytes
    pub fn zeroed(len: usize) -> Self {
        Self::new(vec![0; len])
    }

    /// Total length of the buffer
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Current position
    pub fn position(&self) -> usize {
        self.position
    }

    /// Number of bytes between the position and the end of the buffer
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Move to an absolute position. Seeking to the end of the buffer is allowed.
    pub fn seek(&mut self, position: usize) -> Result<()> {
        if position > self.data.len() {
            return Err(out_of_bounds(position, 0, self.data.len()));
        }
        self.position = position;
        Ok(())
    }

    /// Grow or shrink the buffer. New bytes are zero-filled and the position is clamped to the new end.
    pub fn resize(&mut self, len: usize) {
        self.data.resize(len, 0);
        self.position = self.position.min(len);
    }

    /// Read `n` bytes and advance
    pub fn read(&mut self, n: usize) -> Result<&[u8]> {
        let end = self.checked_end(n)?;
        let start = std::mem::replace(&mut self.position, end);
        Ok(&self.data[start..end])
    }

    /// Read exactly `N` bytes into an array
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read(N)?);
        Ok(out)
    }

    /// Look at `n` bytes at `offset` without moving the cursor
    pub fn peek_at(&self, offset: usize, n: usize) -> Result<&[u8]> {
        match offset.checked_add(n) {
            Some(end) if end <= self.data.len() => Ok(&self.data[offset..end]),
            _ => Err(out_of_bounds(offset, n, self.data.len())),
        }
    }

    /// Overwrite bytes at the position and advance
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let end = self.checked_end(bytes.len())?;
        self.data[self.position..end].copy_from_slice(bytes);
        self.position = end;
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read(1)?[0])
    }

    pub fn read_u16<B: ByteOrder>(&mut self) -> Result<u16> {
        Ok(B::read_u16(self.read(2)?))
    }

    pub fn read_u32<B: ByteOrder>(&mut self) -> Result<u32> {
        Ok(B::read_u32(self.read(4)?))
    }

    pub fn read_i32<B: ByteOrder>(&mut self) -> Result<i32> {
        Ok(B::read_i32(self.read(4)?))
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write(&[value])
    }

    pub fn write_u16<B: ByteOrder>(&mut self, value: u16) -> Result<()> {
        let mut buf = [0u8; 2];
        B::write_u16(&mut buf, value);
        self.write(&buf)
    }

    pub fn write_u32<B: ByteOrder>(&mut self, value: u32) -> Result<()> {
        let mut buf = [0u8; 4];
        B::write_u32(&mut buf, value);
        self.write(&buf)
    }

    pub fn write_i32<B: ByteOrder>(&mut self, value: i32) -> Result<()> {
        let mut buf = [0u8; 4];
        B::write_i32(&mut buf, value);
        self.write(&buf)
    }

    /// Borrow the whole buffer
    pub fn get_ref(&self) -> &[u8] {
        &self.data
    }

    /// Unwrap and return the buffer
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    fn checked_end(&self, n: usize) -> Result<usize> {
        match self.position.checked_add(n) {
            Some(end) if end <= self.data.len() => Ok(end),
            _ => Err(out_of_bounds(self.position, n, self.data.len())),
        }
    }
}

fn out_of_bounds(position: usize, requested: usize, len: usize) -> Error {
    Error::OutOfBounds {
        position,
        requested,
        len,
    }
}

#[cfg(test)]
mod test {
    use byteorder::{BigEndian, LittleEndian};
    use pretty_assertions::assert_eq;

    use crate::cursor::BinaryCursor;
    use crate::error::{Error, Result};

    #[test]
    fn read_typed_values() -> Result<()> {
        #[rustfmt::skip]
        let mut cursor = BinaryCursor::new(vec![
            0x43, 0x53, 0x69, 0x64,
            0x0A, 0x00,
            0x00, 0x00, 0x01, 0x00,
        ]);

        assert_eq!(cursor.read(4)?, b"CSid");
        assert_eq!(cursor.read_u16::<LittleEndian>()?, 10);
        assert_eq!(cursor.read_u32::<BigEndian>()?, 0x100);
        assert_eq!(cursor.remaining(), 0);

        Ok(())
    }

    #[test]
    fn read_past_end_is_out_of_bounds() {
        let mut cursor = BinaryCursor::new(vec![0x01, 0x02, 0x03]);
        cursor.seek(2).unwrap();

        let err = cursor.read_u16::<LittleEndian>().unwrap_err();
        assert!(matches!(
            err,
            Error::OutOfBounds {
                position: 2,
                requested: 2,
                len: 3
            }
        ));

        // A failed read leaves the position untouched
        assert_eq!(cursor.position(), 2);
        assert_eq!(cursor.len(), 3);
    }

    #[test]
    fn huge_read_does_not_overflow() {
        let mut cursor = BinaryCursor::new(vec![0x00; 4]);
        cursor.seek(1).unwrap();
        assert!(matches!(
            cursor.read(usize::MAX),
            Err(Error::OutOfBounds { .. })
        ));
        assert!(cursor.peek_at(usize::MAX, 2).is_err());
    }

    #[test]
    fn seek_past_end_fails() {
        let mut cursor = BinaryCursor::zeroed(4);
        assert!(cursor.seek(4).is_ok());
        assert!(matches!(cursor.seek(5), Err(Error::OutOfBounds { .. })));
    }

    #[test]
    fn write_requires_explicit_growth() -> Result<()> {
        let mut cursor = BinaryCursor::zeroed(2);
        assert!(cursor.write_u32::<LittleEndian>(7).is_err());
        assert_eq!(cursor.len(), 2);

        cursor.resize(6);
        cursor.write_u16::<LittleEndian>(0x0201)?;
        cursor.write_u32::<LittleEndian>(0x06050403)?;

        assert_eq!(
            cursor.into_inner(),
            vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06]
        );

        Ok(())
    }

    #[test]
    fn shrinking_clamps_position() {
        let mut cursor = BinaryCursor::zeroed(8);
        cursor.seek(8).unwrap();
        cursor.resize(3);
        assert_eq!(cursor.position(), 3);
        assert_eq!(cursor.remaining(), 0);
    }
}
