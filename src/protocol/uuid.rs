//! A 128-bit identity type used for struct and interface identity. Always
//! carried big-endian on the wire, regardless of the active common flags.

use std::fmt;
use std::io::{Read, Write};

use super::error::Result;

/// A 128-bit identifier with a defined total order and hash, used as struct
/// identity and as interface identity.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Uuid([u8; 16]);

/// The all-zero identifier, used as a sentinel for "no interface"/"no type".
pub const NULL_UUID: Uuid = Uuid([0; 16]);

impl Uuid {
    /// Builds a `Uuid` directly from its big-endian byte representation.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Uuid(bytes)
    }

    /// Builds a `Uuid` from the conventional five-field layout
    /// (time-low, time-mid, time-hi, clock-seq, node), matching the way
    /// schemas declare struct and interface identities as literals.
    pub const fn from_fields(d1: u32, d2: u16, d3: u16, d4: u16, d5: u64) -> Self {
        let mut b = [0u8; 16];
        let d1b = d1.to_be_bytes();
        let d2b = d2.to_be_bytes();
        let d3b = d3.to_be_bytes();
        let d4b = d4.to_be_bytes();
        let d5b = d5.to_be_bytes();

        b[0] = d1b[0];
        b[1] = d1b[1];
        b[2] = d1b[2];
        b[3] = d1b[3];
        b[4] = d2b[0];
        b[5] = d2b[1];
        b[6] = d3b[0];
        b[7] = d3b[1];
        b[8] = d4b[0];
        b[9] = d4b[1];
        // `d5` is logically a 48-bit node id; only its low 6 bytes are kept.
        b[10] = d5b[2];
        b[11] = d5b[3];
        b[12] = d5b[4];
        b[13] = d5b[5];
        b[14] = d5b[6];
        b[15] = d5b[7];

        Uuid(b)
    }

    /// Returns the underlying big-endian bytes.
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Reads a `Uuid` from a stream. Always big-endian, independent of the
    /// active common flags.
    pub fn read<R: Read>(r: &mut R) -> Result<Self> {
        let mut buf = [0u8; 16];
        r.read_exact(&mut buf)?;
        Ok(Uuid(buf))
    }

    /// Writes a `Uuid` to a stream. Always big-endian, independent of the
    /// active common flags.
    pub fn write<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_all(&self.0)?;
        Ok(())
    }
}

impl fmt::Debug for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7], b[8], b[9], b[10], b[11], b[12], b[13], b[14], b[15]
        )
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_roundtrip() {
        let id = Uuid::from_fields(0xad46_4a00, 0x1234, 0x5678, 0x9abc, 0x1122_3344_5566);

        let mut buf = Vec::new();
        id.write(&mut buf).unwrap();
        assert_eq!(buf.len(), 16);

        let mut cursor = std::io::Cursor::new(buf);
        let id2 = Uuid::read(&mut cursor).unwrap();
        assert_eq!(id, id2);
    }

    #[test]
    fn total_order_is_byte_lexicographic() {
        let a = Uuid::from_bytes([0; 16]);
        let mut bytes = [0; 16];
        bytes[15] = 1;
        let b = Uuid::from_bytes(bytes);

        assert!(a < b);
        assert_ne!(a, b);
    }
}
