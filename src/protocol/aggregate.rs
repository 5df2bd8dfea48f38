//! Struct-level framing: the small header every struct carries ahead of its
//! body (identity, private version, interface version) and the category
//! checks that validate a pass's negotiated flags against what the struct
//! declares it supports.

use super::context::{DCtx, SCtx};
use super::error::{CspError, Result, Status};
use super::interface::{is_interface_version_supported, StructDescriptor};
use super::primitive::FlexInt;
use super::uuid::Uuid;

/// A type whose values can be framed as a CSP struct: it knows its own
/// identity and wire category, and can write/read its body at its current
/// (latest) private version.
///
/// A type with no version history beyond its latest only needs
/// `serialize_body`/`deserialize_body`. A type that has gone through a
/// schema revision additionally overrides `deserialize_versioned_body` to
/// read an older wire layout and walk it up through a
/// [`super::version::ConverterChain`] of its own; `deserialize_struct` calls
/// whichever one applies based on the private version found on the wire.
pub trait CspStruct: Sized {
    /// Static metadata: identity, interface membership, versions, category.
    fn descriptor() -> StructDescriptor;

    /// Writes the body at the struct's latest private version.
    fn serialize_body(&self, ctx: &mut SCtx<'_>) -> Result<()>;

    /// Reads the body, assumed to already be at the struct's latest private
    /// version.
    fn deserialize_body(ctx: &mut DCtx<'_>) -> Result<Self>;

    /// Reads the body as it was written at `wire_version`, translating it up
    /// to `descriptor().latest_private_version` if the two differ.
    ///
    /// The default only accepts `wire_version ==
    /// descriptor().latest_private_version` and defers to
    /// `deserialize_body`; types with converters for older versions override
    /// this to read the older layout themselves and run it through their own
    /// `ConverterChain`.
    fn deserialize_versioned_body(ctx: &mut DCtx<'_>, wire_version: u32) -> Result<Self> {
        let descriptor = Self::descriptor();
        if wire_version == descriptor.latest_private_version {
            Self::deserialize_body(ctx)
        } else {
            Err(CspError::NoSuchConverter {
                id: descriptor.id,
                from: wire_version,
                to: descriptor.latest_private_version,
            })
        }
    }
}

/// Writes a complete struct: its identity, the interface version and
/// private version it's being encoded at, and its body.
///
/// The private version field is a wire-format addition beyond the struct
/// header spec.md defines: a receiver decoding an older body still needs to
/// know which version it's reading in order to pick the right converter
/// chain (see `deserialize_struct`).
///
/// Rejects the write up front if the pass's negotiated data flags aren't
/// compatible with the struct's declared interface constraints, or with its
/// wire category (a `General`-category struct doesn't care, but the
/// simply-assignable categories only tolerate a subset of flag
/// combinations).
pub fn serialize_struct<T: CspStruct>(value: &T, ctx: &mut SCtx<'_>) -> Result<()> {
    let descriptor = T::descriptor();

    if !descriptor.interface.accepts(ctx.data_flags) {
        return Err(CspError::from(
            Status::ErrorNotSupportedSerializationSettingsForStruct,
        ));
    }

    ctx.append(descriptor.id.as_bytes());
    FlexInt::write(ctx.interface_version as u64, ctx)?;
    FlexInt::write(descriptor.latest_private_version as u64, ctx)?;

    value.serialize_body(ctx)
}

/// Reads a complete struct written by [`serialize_struct`].
///
/// Fails with [`Status::ErrorInvalidArgument`] if the wire identity doesn't
/// match `T`, with [`Status::ErrorNotSupportedInterfaceVersion`] if the
/// interface version falls below `T`'s interface floor or above its current
/// revision, and with [`CspError::NoSuchConverter`] if the private version on
/// the wire is outside `T`'s supported range. Otherwise dispatches to
/// [`CspStruct::deserialize_versioned_body`], which runs `T`'s own
/// `ConverterChain` when the wire's private version is older than latest.
pub fn deserialize_struct<T: CspStruct>(ctx: &mut DCtx<'_>) -> Result<T> {
    let descriptor = T::descriptor();

    let mut id_bytes = [0u8; 16];
    id_bytes.copy_from_slice(ctx.read_bytes(16)?);
    let id = Uuid::from_bytes(id_bytes);
    if id != descriptor.id {
        return Err(CspError::Invalid(format!(
            "expected struct id {:?}, found {:?}",
            descriptor.id, id
        )));
    }

    let interface_version = FlexInt::read(ctx)? as u32;
    if !is_interface_version_supported(
        interface_version,
        descriptor.interface.min_supported_version,
        descriptor.interface.version,
    ) {
        return Err(CspError::from(Status::ErrorNotSupportedInterfaceVersion));
    }

    let private_version = FlexInt::read(ctx)? as u32;
    if private_version > descriptor.latest_private_version
        || private_version < descriptor.min_supported_private_version
    {
        return Err(CspError::NoSuchConverter {
            id: descriptor.id,
            from: private_version,
            to: descriptor.latest_private_version,
        });
    }

    T::deserialize_versioned_body(ctx, private_version)
}
