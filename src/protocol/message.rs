//! The message envelope every exchange is wrapped in: a fixed 5-byte
//! header, followed by a body whose shape depends on the header's
//! `MessageKind`.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use enum_primitive_derive::Primitive;
use num_traits::FromPrimitive;

use super::context::CommonFlags;
use super::error::{CspError, Result, Status};
use super::interface::is_protocol_version_supported;
use super::io::{ByteCursor, ByteSink};
use super::uuid::Uuid;

/// The kind of body that follows a [`Header`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Primitive)]
pub enum MessageKind {
    /// A bare status, with no struct payload.
    Status = 0,
    /// A serialized struct body.
    Data = 1,
    /// A request for the receiver's negotiated party settings.
    GetSettings = 2,
}

/// The fixed-size envelope every message starts with: protocol version,
/// common flags, and message kind. Always big-endian on the wire.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Header {
    /// The protocol version this message is framed under.
    pub protocol_version: u8,
    /// The common flags in effect for this message.
    pub common_flags: CommonFlags,
    /// The kind of body that follows.
    pub message_kind: MessageKind,
}

/// The on-wire byte length of [`Header`].
pub const HEADER_LEN: usize = 5;

impl Header {
    /// Writes the header to `sink`.
    pub fn write(&self, sink: &mut ByteSink) {
        let mut buf = Vec::with_capacity(HEADER_LEN);
        buf.write_u8(self.protocol_version).unwrap();
        buf.write_u16::<BigEndian>(self.common_flags.bits()).unwrap();
        buf.write_u16::<BigEndian>(self.message_kind as u16).unwrap();
        sink.append(&buf);
    }

    /// Reads a header from the start of `cursor`.
    ///
    /// Fails with [`Status::ErrorNotSupportedProtocolVersion`] if the
    /// protocol version isn't one this implementation understands, before
    /// even inspecting the rest of the message.
    pub fn read(cursor: &mut ByteCursor<'_>) -> Result<Self> {
        let mut bytes = cursor.read_bytes(HEADER_LEN)?;
        let protocol_version = bytes.read_u8().unwrap();
        if !is_protocol_version_supported(protocol_version) {
            return Err(CspError::from(Status::ErrorNotSupportedProtocolVersion));
        }

        let common_flags = CommonFlags::from_bits_truncate(bytes.read_u16::<BigEndian>().unwrap());
        let kind_raw = bytes.read_u16::<BigEndian>().unwrap();
        let message_kind = MessageKind::from_u16(kind_raw)
            .ok_or_else(|| CspError::Invalid(format!("unknown message kind {kind_raw}")))?;

        Ok(Header {
            protocol_version,
            common_flags,
            message_kind,
        })
    }
}

/// The body of a `Data` message: an encoded struct, plus the data flags and
/// interface version it was encoded with so the receiver can set up a
/// matching [`super::context::DCtx`] before decoding `payload`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataBody {
    /// The identity of the struct encoded in `payload`.
    pub input_struct_id: Uuid,
    /// The data flags `payload` was encoded with.
    pub data_flags: u32,
    /// The interface version `payload` was encoded at.
    pub interface_version: u32,
    /// The encoded struct body (identity + versions + fields, per
    /// [`super::aggregate::serialize_struct`]).
    pub payload: Vec<u8>,
}

impl DataBody {
    /// Writes this body to `sink`. The payload runs to the end of the
    /// message: a `Data` body carries no internal length prefix, since the
    /// transport already delivers one message as one discrete byte range.
    pub fn write(&self, sink: &mut ByteSink) {
        sink.append(self.input_struct_id.as_bytes());
        let mut buf = Vec::with_capacity(8);
        buf.write_u32::<BigEndian>(self.data_flags).unwrap();
        buf.write_u32::<BigEndian>(self.interface_version).unwrap();
        sink.append(&buf);
        sink.append(&self.payload);
    }

    /// Reads a body previously written by [`DataBody::write`], consuming the
    /// rest of `cursor` as the payload.
    pub fn read(cursor: &mut ByteCursor<'_>) -> Result<Self> {
        let mut id_bytes = [0u8; 16];
        id_bytes.copy_from_slice(cursor.read_bytes(16)?);
        let input_struct_id = Uuid::from_bytes(id_bytes);

        let mut flags_bytes = cursor.read_bytes(4)?;
        let data_flags = flags_bytes.read_u32::<BigEndian>().unwrap();
        let mut version_bytes = cursor.read_bytes(4)?;
        let interface_version = version_bytes.read_u32::<BigEndian>().unwrap();
        let payload = cursor.read_bytes(cursor.remaining())?.to_vec();

        Ok(DataBody {
            input_struct_id,
            data_flags,
            interface_version,
            payload,
        })
    }
}

/// The body of a `Status` message: either a bare status, or one of two
/// richer shapes carrying what the receiver *does* support, so the sender
/// can retry with a compatible request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusBody {
    /// A plain status with no further detail.
    Simple(Status),
    /// The sender's protocol version wasn't recognized; here's what is.
    UnsupportedProtocolVersion {
        /// The protocol versions this receiver understands, newest first.
        supported: Vec<u8>,
    },
    /// No common interface version could be negotiated for the requested
    /// struct; here's the receiver's floor and the struct id it concerns.
    UnsupportedInterfaceVersion {
        /// The oldest interface version this receiver still supports.
        min_supported: u32,
        /// The struct identity the request concerned.
        output_type_id: Uuid,
    },
}

impl StatusBody {
    /// The status code this body carries; the leading field on the wire
    /// regardless of variant.
    pub fn status(&self) -> Status {
        match self {
            StatusBody::Simple(status) => *status,
            StatusBody::UnsupportedProtocolVersion { .. } => Status::ErrorNotSupportedProtocolVersion,
            StatusBody::UnsupportedInterfaceVersion { .. } => Status::ErrorNotSupportedInterfaceVersion,
        }
    }

    /// Writes this body to `sink`: `i32 statusCode` followed by a
    /// code-dependent tail.
    pub fn write(&self, sink: &mut ByteSink) {
        let mut buf = Vec::with_capacity(4);
        buf.write_i32::<BigEndian>(self.status() as i32).unwrap();
        sink.append(&buf);
        match self {
            StatusBody::Simple(_) => {}
            StatusBody::UnsupportedProtocolVersion { supported } => {
                sink.append(&[supported.len() as u8]);
                sink.append(supported);
            }
            StatusBody::UnsupportedInterfaceVersion {
                min_supported,
                output_type_id,
            } => {
                let mut tail = Vec::with_capacity(4);
                tail.write_u32::<BigEndian>(*min_supported).unwrap();
                sink.append(&tail);
                sink.append(output_type_id.as_bytes());
            }
        }
    }

    /// Reads a body previously written by [`StatusBody::write`].
    pub fn read(cursor: &mut ByteCursor<'_>) -> Result<Self> {
        let mut code_bytes = cursor.read_bytes(4)?;
        let raw = code_bytes.read_i32::<BigEndian>().unwrap();
        let status = Status::from_i32(raw)
            .ok_or_else(|| CspError::Invalid(format!("unknown status code {raw}")))?;

        match status {
            Status::ErrorNotSupportedProtocolVersion => {
                let count = cursor.read_bytes(1)?[0];
                let supported = cursor.read_bytes(count as usize)?.to_vec();
                Ok(StatusBody::UnsupportedProtocolVersion { supported })
            }
            Status::ErrorNotSupportedInterfaceVersion => {
                let mut min_bytes = cursor.read_bytes(4)?;
                let min_supported = min_bytes.read_u32::<BigEndian>().unwrap();
                let mut id_bytes = [0u8; 16];
                id_bytes.copy_from_slice(cursor.read_bytes(16)?);
                Ok(StatusBody::UnsupportedInterfaceVersion {
                    min_supported,
                    output_type_id: Uuid::from_bytes(id_bytes),
                })
            }
            other => Ok(StatusBody::Simple(other)),
        }
    }
}

/// The body of a `GetSettings` message: empty on the wire, carrying only
/// the header's flags. Present as a type for symmetry with the other
/// message kinds and so call sites can match on `MessageKind` exhaustively.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct GetSettingsBody;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let header = Header {
            protocol_version: 1,
            common_flags: CommonFlags::BITNESS32 | CommonFlags::BIG_ENDIAN_FORMAT,
            message_kind: MessageKind::Data,
        };
        let mut sink = ByteSink::new();
        header.write(&mut sink);
        assert_eq!(sink.len(), HEADER_LEN);

        let bytes = sink.into_vec();
        let mut cursor = ByteCursor::new(&bytes);
        let parsed = Header::read(&mut cursor).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn unsupported_protocol_version_is_rejected_at_header() {
        let mut sink = ByteSink::new();
        sink.append(&[0xff]);
        sink.append(&0u16.to_be_bytes());
        sink.append(&0u16.to_be_bytes());
        let bytes = sink.into_vec();
        let mut cursor = ByteCursor::new(&bytes);
        let err = Header::read(&mut cursor).unwrap_err();
        assert!(matches!(
            err,
            CspError::Status(Status::ErrorNotSupportedProtocolVersion)
        ));
    }

    #[test]
    fn data_body_round_trips() {
        let body = DataBody {
            input_struct_id: Uuid::from_fields(1, 2, 3, 4, 5),
            data_flags: 0x07,
            interface_version: 3,
            payload: vec![9, 8, 7],
        };
        let mut sink = ByteSink::new();
        body.write(&mut sink);
        let bytes = sink.into_vec();
        let mut cursor = ByteCursor::new(&bytes);
        let parsed = DataBody::read(&mut cursor).unwrap();
        assert_eq!(parsed, body);
    }

    #[test]
    fn status_body_variants_round_trip() {
        for body in [
            StatusBody::Simple(Status::ErrorNoSuchHandler),
            StatusBody::UnsupportedProtocolVersion { supported: vec![1, 2] },
            StatusBody::UnsupportedInterfaceVersion {
                min_supported: 2,
                output_type_id: Uuid::from_fields(9, 9, 9, 9, 9),
            },
        ] {
            let mut sink = ByteSink::new();
            body.write(&mut sink);
            let bytes = sink.into_vec();
            let mut cursor = ByteCursor::new(&bytes);
            let parsed = StatusBody::read(&mut cursor).unwrap();
            assert_eq!(parsed, body);
        }
    }
}
