//! The serialization engine: contexts, primitive and struct encoding, the
//! version converter chain, and the message envelope that carries all of it
//! over an opaque byte channel.
//!
//! Nothing in this module touches a socket or a thread; it only turns typed
//! values into bytes and back, and frames the bytes into messages. The
//! transport and the request/response handshake built on top of it live in
//! [`crate::client`] and [`crate::server`].

pub mod aggregate;
pub mod context;
pub mod error;
pub mod interface;
pub mod io;
pub mod message;
pub mod primitive;
pub mod uuid;
pub mod version;

pub use aggregate::{deserialize_struct, serialize_struct, CspStruct};
pub use context::{AddedPointers, CommonFlags, DCtx, DataFlags, SCtx};
pub use error::{CspError, Result, Status};
pub use interface::{
    is_interface_version_supported, is_protocol_version_supported, latest_protocol_version,
    Interface, StructCategory, StructDescriptor, TypeRegistry, INTERFACE_VERSION_UNDEFINED,
    PROTOCOL_VERSIONS,
};
pub use message::{DataBody, GetSettingsBody, Header, MessageKind, StatusBody, HEADER_LEN};
pub use primitive::{
    deserialize_pointer, read_size_t, serialize_pointer, write_size_t, CspDeserialize,
    CspSerialize, FlexInt,
};
pub use uuid::{Uuid, NULL_UUID};
pub use version::{negotiate_version, ConverterChain, VersionConverter};

use io::ByteSink;

/// Encodes `value` into a fresh byte buffer under the given protocol and
/// data flags, returning the encoded bytes.
///
/// A small convenience wrapper around constructing a [`ByteSink`] and
/// [`SCtx`] by hand, for callers that just want `T -> Vec<u8>`.
pub fn encode<T: CspStruct>(
    value: &T,
    protocol_version: u8,
    common_flags: CommonFlags,
    data_flags: DataFlags,
    interface_version: u32,
) -> Result<Vec<u8>> {
    let mut sink = ByteSink::new();
    let mut ctx = SCtx::new(&mut sink, protocol_version, common_flags, data_flags, interface_version);
    serialize_struct(value, &mut ctx)?;
    Ok(sink.into_vec())
}

/// Decodes a value of `T` from `bytes`, previously produced by [`encode`].
///
/// Any pointers the decoder allocates are registered into a fresh
/// [`AddedPointers`] that's dropped once decoding succeeds and ownership has
/// passed to the returned value's `Rc` fields; on failure the registry (and
/// everything it holds) is simply dropped.
pub fn decode<T: CspStruct>(
    bytes: &[u8],
    protocol_version: u8,
    common_flags: CommonFlags,
    data_flags: DataFlags,
    interface_version: u32,
) -> Result<T> {
    let mut added = AddedPointers::new();
    let mut ctx = DCtx::new(bytes, protocol_version, common_flags, data_flags, interface_version, &mut added);
    deserialize_struct(&mut ctx)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ping(i32);

    impl CspStruct for Ping {
        fn descriptor() -> StructDescriptor {
            StructDescriptor {
                id: Uuid::from_fields(0x5041_4e47, 0, 0, 0, 1),
                interface: Interface {
                    id: Uuid::from_fields(1, 0, 0, 0, 0),
                    version: 1,
                    min_supported_version: 1,
                    mandatory_data_flags: DataFlags::empty(),
                    forbidden_data_flags: DataFlags::empty(),
                },
                latest_private_version: 0,
                min_supported_private_version: 0,
                category: StructCategory::AlwaysSimplyAssignable,
            }
        }

        fn serialize_body(&self, ctx: &mut SCtx<'_>) -> Result<()> {
            self.0.serialize(ctx)
        }

        fn deserialize_body(ctx: &mut DCtx<'_>) -> Result<Self> {
            Ok(Ping(i32::deserialize(ctx)?))
        }
    }

    #[test]
    fn encode_decode_round_trip() {
        let bytes = encode(&Ping(7), 1, CommonFlags::empty(), DataFlags::empty(), 1).unwrap();
        let decoded: Ping = decode(&bytes, 1, CommonFlags::empty(), DataFlags::empty(), 1).unwrap();
        assert_eq!(decoded.0, 7);
    }
}
