//! Wire encoding for primitive values: fixed-width integers and floats,
//! the `sizeOfIntegersMayBeNotEqual` tagged-width path, the `sizeT`
//! collection-length prefix, and nullable/shared pointers.

use std::rc::Rc;

use super::context::{DataFlags, DCtx, SCtx};
use super::error::{CspError, Result, Status};

/// A value that can be written to an [`SCtx`].
pub trait CspSerialize {
    /// Writes `self` into `ctx`.
    fn serialize(&self, ctx: &mut SCtx<'_>) -> Result<()>;
}

/// A value that can be read back from a [`DCtx`].
pub trait CspDeserialize: Sized {
    /// Reads a value of `Self` out of `ctx`.
    fn deserialize(ctx: &mut DCtx<'_>) -> Result<Self>;
}

fn swap_if_needed<const N: usize>(mut bytes: [u8; N], swap: bool) -> [u8; N] {
    if swap {
        bytes.reverse();
    }
    bytes
}

macro_rules! impl_fixed_width {
    ($ty:ty, $n:literal) => {
        impl CspSerialize for $ty {
            fn serialize(&self, ctx: &mut SCtx<'_>) -> Result<()> {
                let bytes = swap_if_needed(self.to_ne_bytes(), ctx.swap_endianness());
                ctx.append(&bytes);
                Ok(())
            }
        }

        impl CspDeserialize for $ty {
            fn deserialize(ctx: &mut DCtx<'_>) -> Result<Self> {
                let bytes = ctx.read_bytes($n)?;
                let mut arr = [0u8; $n];
                arr.copy_from_slice(bytes);
                let arr = swap_if_needed(arr, ctx.swap_endianness());
                Ok(<$ty>::from_ne_bytes(arr))
            }
        }
    };
}

impl_fixed_width!(f32, 4);
impl_fixed_width!(f64, 8);

impl CspSerialize for bool {
    fn serialize(&self, ctx: &mut SCtx<'_>) -> Result<()> {
        ctx.append(&[if *self { 1 } else { 0 }]);
        Ok(())
    }
}

impl CspDeserialize for bool {
    fn deserialize(ctx: &mut DCtx<'_>) -> Result<Self> {
        let byte = ctx.read_bytes(1)?[0];
        Ok(byte != 0)
    }
}

/// An integer type whose wire representation can be tagged with a
/// platform-independent width under `sizeOfIntegersMayBeNotEqual`.
trait TaggedInt: Copy {
    const NATIVE_WIDTH: u8;
    fn to_wide(self) -> i128;
    fn from_wide(value: i128) -> Result<Self>;
    fn write_native(self, out: &mut [u8; 16]) -> &[u8];
    fn read_native(bytes: &[u8]) -> i128;
    const SIGNED: bool;
}

macro_rules! impl_tagged_int {
    ($ty:ty, $n:literal, signed) => {
        impl_tagged_int!(@body $ty, $n, true, |v: i128| v as $ty as i128);
    };
    ($ty:ty, $n:literal, unsigned) => {
        impl_tagged_int!(@body $ty, $n, false, |v: i128| (v as u128) as i128);
    };
    (@body $ty:ty, $n:literal, $signed:expr, $narrow:expr) => {
        impl TaggedInt for $ty {
            const NATIVE_WIDTH: u8 = $n;
            const SIGNED: bool = $signed;

            fn to_wide(self) -> i128 {
                self as i128
            }

            fn from_wide(value: i128) -> Result<Self> {
                let narrowed = $narrow(value);
                if narrowed != value {
                    return Err(CspError::from(Status::ErrorValueOverflow));
                }
                Ok(narrowed as $ty)
            }

            fn write_native(self, buf: &mut [u8; 16]) -> &[u8] {
                buf[..$n].copy_from_slice(&self.to_ne_bytes());
                &buf[..$n]
            }

            fn read_native(bytes: &[u8]) -> i128 {
                let mut arr = [0u8; $n];
                arr.copy_from_slice(bytes);
                <$ty>::from_ne_bytes(arr) as i128
            }
        }
    };
}

impl_tagged_int!(i8, 1, signed);
impl_tagged_int!(i16, 2, signed);
impl_tagged_int!(i32, 4, signed);
impl_tagged_int!(i64, 8, signed);
impl_tagged_int!(u8, 1, unsigned);
impl_tagged_int!(u16, 2, unsigned);
impl_tagged_int!(u32, 4, unsigned);
impl_tagged_int!(u64, 8, unsigned);

fn serialize_tagged<T: TaggedInt>(value: T, ctx: &mut SCtx<'_>) -> Result<()> {
    if !ctx.data_flags.contains(DataFlags::SIZE_OF_INTEGERS_MAY_BE_NOT_EQUAL) {
        let mut buf = [0u8; 16];
        let native = value.write_native(&mut buf);
        let swapped: Vec<u8> = if ctx.swap_endianness() {
            native.iter().rev().copied().collect()
        } else {
            native.to_vec()
        };
        ctx.append(&swapped);
        return Ok(());
    }

    ctx.append(&[T::NATIVE_WIDTH]);
    let mut buf = [0u8; 16];
    let native = value.write_native(&mut buf);
    let swapped: Vec<u8> = if ctx.swap_endianness() {
        native.iter().rev().copied().collect()
    } else {
        native.to_vec()
    };
    ctx.append(&swapped);
    Ok(())
}

fn deserialize_tagged<T: TaggedInt>(ctx: &mut DCtx<'_>) -> Result<T> {
    if !ctx.data_flags.contains(DataFlags::SIZE_OF_INTEGERS_MAY_BE_NOT_EQUAL) {
        let bytes = ctx.read_bytes(T::NATIVE_WIDTH as usize)?;
        let mut owned = bytes.to_vec();
        if ctx.swap_endianness() {
            owned.reverse();
        }
        let wide = T::read_native(&owned);
        return T::from_wide(wide);
    }

    let wire_width = ctx.read_bytes(1)?[0];
    let bytes = ctx.read_bytes(wire_width as usize)?;
    let mut owned = bytes.to_vec();
    if ctx.swap_endianness() {
        owned.reverse();
    }

    let wide = decode_wire_width(&owned, wire_width, T::SIGNED)?;
    T::from_wide(wide)
}

fn decode_wire_width(bytes: &[u8], width: u8, signed: bool) -> Result<i128> {
    match width {
        1 => Ok(if signed {
            bytes[0] as i8 as i128
        } else {
            bytes[0] as i128
        }),
        2 => {
            let mut arr = [0u8; 2];
            arr.copy_from_slice(bytes);
            Ok(if signed {
                i16::from_ne_bytes(arr) as i128
            } else {
                u16::from_ne_bytes(arr) as i128
            })
        }
        4 => {
            let mut arr = [0u8; 4];
            arr.copy_from_slice(bytes);
            Ok(if signed {
                i32::from_ne_bytes(arr) as i128
            } else {
                u32::from_ne_bytes(arr) as i128
            })
        }
        8 => {
            let mut arr = [0u8; 8];
            arr.copy_from_slice(bytes);
            Ok(if signed {
                i64::from_ne_bytes(arr) as i128
            } else {
                u64::from_ne_bytes(arr) as i128
            })
        }
        _ => Err(CspError::from(Status::ErrorInvalidArgument)),
    }
}

macro_rules! impl_tagged_serialize {
    ($ty:ty) => {
        impl CspSerialize for $ty {
            fn serialize(&self, ctx: &mut SCtx<'_>) -> Result<()> {
                serialize_tagged(*self, ctx)
            }
        }

        impl CspDeserialize for $ty {
            fn deserialize(ctx: &mut DCtx<'_>) -> Result<Self> {
                deserialize_tagged(ctx)
            }
        }
    };
}

impl_tagged_serialize!(i8);
impl_tagged_serialize!(i16);
impl_tagged_serialize!(i32);
impl_tagged_serialize!(i64);
impl_tagged_serialize!(u8);
impl_tagged_serialize!(u16);
impl_tagged_serialize!(u32);
impl_tagged_serialize!(u64);

/// A platform-width integer (C's `size_t`): 4 bytes on the wire when
/// `CommonFlags::BITNESS32` is set, 8 otherwise. Used for collection length
/// prefixes and pointer back-reference offsets, independent of
/// `sizeOfIntegersMayBeNotEqual`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct FlexInt(pub u64);

impl FlexInt {
    /// Writes a platform-width integer honoring `CommonFlags::BITNESS32`.
    ///
    /// Always a fixed-width write: unlike ordinary integer fields, a `sizeT`
    /// never carries a `sizeOfIntegersMayBeNotEqual` width tag.
    pub fn write(value: u64, ctx: &mut SCtx<'_>) -> Result<()> {
        use super::context::CommonFlags;
        if ctx.common_flags.contains(CommonFlags::BITNESS32) {
            let narrowed: u32 = value
                .try_into()
                .map_err(|_| CspError::from(Status::ErrorValueOverflow))?;
            let bytes = swap_if_needed(narrowed.to_ne_bytes(), ctx.swap_endianness());
            ctx.append(&bytes);
        } else {
            let bytes = swap_if_needed(value.to_ne_bytes(), ctx.swap_endianness());
            ctx.append(&bytes);
        }
        Ok(())
    }

    /// Reads a platform-width integer honoring `CommonFlags::BITNESS32`.
    pub fn read(ctx: &mut DCtx<'_>) -> Result<u64> {
        use super::context::CommonFlags;
        if ctx.common_flags.contains(CommonFlags::BITNESS32) {
            let bytes = ctx.read_bytes(4)?;
            let mut arr = [0u8; 4];
            arr.copy_from_slice(bytes);
            let arr = swap_if_needed(arr, ctx.swap_endianness());
            Ok(u32::from_ne_bytes(arr) as u64)
        } else {
            let bytes = ctx.read_bytes(8)?;
            let mut arr = [0u8; 8];
            arr.copy_from_slice(bytes);
            let arr = swap_if_needed(arr, ctx.swap_endianness());
            Ok(u64::from_ne_bytes(arr))
        }
    }
}

/// Writes the length prefix ahead of a collection's elements.
pub fn write_size_t(len: usize, ctx: &mut SCtx<'_>) -> Result<()> {
    FlexInt::write(len as u64, ctx)
}

/// Reads a collection's length prefix.
pub fn read_size_t(ctx: &mut DCtx<'_>) -> Result<usize> {
    let n = FlexInt::read(ctx)?;
    usize::try_from(n).map_err(|_| CspError::from(Status::ErrorValueOverflow))
}

impl<T: CspSerialize> CspSerialize for Vec<T> {
    fn serialize(&self, ctx: &mut SCtx<'_>) -> Result<()> {
        write_size_t(self.len(), ctx)?;
        for item in self {
            item.serialize(ctx)?;
        }
        Ok(())
    }
}

impl<T: CspDeserialize> CspDeserialize for Vec<T> {
    fn deserialize(ctx: &mut DCtx<'_>) -> Result<Self> {
        let len = read_size_t(ctx)?;
        let mut out = Vec::with_capacity(len.min(1 << 20));
        for _ in 0..len {
            out.push(T::deserialize(ctx)?);
        }
        Ok(out)
    }
}

impl CspSerialize for String {
    fn serialize(&self, ctx: &mut SCtx<'_>) -> Result<()> {
        write_size_t(self.len(), ctx)?;
        ctx.append(self.as_bytes());
        Ok(())
    }
}

impl CspDeserialize for String {
    fn deserialize(ctx: &mut DCtx<'_>) -> Result<Self> {
        let len = read_size_t(ctx)?;
        let bytes = ctx.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| CspError::Invalid(e.to_string()))
    }
}

impl<T: CspSerialize, const N: usize> CspSerialize for [T; N] {
    fn serialize(&self, ctx: &mut SCtx<'_>) -> Result<()> {
        for item in self {
            item.serialize(ctx)?;
        }
        Ok(())
    }
}

/// Serializes a nullable, potentially shared pointer field.
///
/// Wire shape is a 1-byte tag: `0` = null, `1` = inline value, `2` = a
/// back-reference (a `sizeT` offset into this pass's byte stream) to a
/// pointee already emitted earlier. Aliasing is only detected when
/// `CHECK_RECURSIVE_POINTERS` is active; otherwise every non-null pointer is
/// emitted inline, which is only legal when `ALLOW_UNMANAGED_POINTERS` is
/// also set.
pub fn serialize_pointer<T: CspSerialize>(value: &Option<Rc<T>>, ctx: &mut SCtx<'_>) -> Result<()> {
    let Some(rc) = value else {
        ctx.append(&[0]);
        return Ok(());
    };

    let tracking = ctx.data_flags.contains(DataFlags::CHECK_RECURSIVE_POINTERS);
    let unmanaged_ok = ctx.data_flags.contains(DataFlags::ALLOW_UNMANAGED_POINTERS);

    if !tracking && !unmanaged_ok {
        return Err(CspError::from(
            Status::ErrorNotSupportedSerializationSettingsForStruct,
        ));
    }

    if tracking {
        let addr = Rc::as_ptr(rc) as *const () as usize;
        if let Some(prior_offset) = ctx.record_pointer(addr) {
            ctx.append(&[2]);
            write_size_t(prior_offset as usize, ctx)?;
            return Ok(());
        }
    }

    ctx.append(&[1]);
    rc.as_ref().serialize(ctx)
}

/// Deserializes a nullable, potentially shared pointer field written by
/// [`serialize_pointer`].
pub fn deserialize_pointer<T: CspDeserialize + 'static>(ctx: &mut DCtx<'_>) -> Result<Option<Rc<T>>> {
    let tag = ctx.read_bytes(1)?[0];
    match tag {
        0 => Ok(None),
        1 => {
            let offset = ctx.offset();
            let value = Rc::new(T::deserialize(ctx)?);
            ctx.record_pointer(offset, value.clone());
            Ok(Some(value))
        }
        2 => {
            let offset = read_size_t(ctx)? as u64;
            let value = ctx.resolve_pointer::<T>(offset)?;
            Ok(Some(value))
        }
        _ => Err(CspError::Invalid(format!("unknown pointer tag {tag}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::context::{AddedPointers, CommonFlags};
    use crate::protocol::io::ByteSink;

    fn roundtrip<T>(value: T, common: CommonFlags, data: DataFlags) -> T
    where
        T: CspSerialize + CspDeserialize,
    {
        let mut sink = ByteSink::new();
        {
            let mut sctx = SCtx::new(&mut sink, 1, common, data, 0);
            value.serialize(&mut sctx).unwrap();
        }
        let bytes = sink.into_vec();
        let mut added = AddedPointers::new();
        let mut dctx = DCtx::new(&bytes, 1, common, data, 0, &mut added);
        T::deserialize(&mut dctx).unwrap()
    }

    #[test]
    fn fixed_width_int_roundtrip() {
        assert_eq!(roundtrip(42i32, CommonFlags::empty(), DataFlags::empty()), 42);
        assert_eq!(
            roundtrip(u64::MAX, CommonFlags::empty(), DataFlags::empty()),
            u64::MAX
        );
    }

    #[test]
    fn endianness_swap_round_trips() {
        let flags = CommonFlags::ENDIANNESS_DIFFERENCE;
        assert_eq!(roundtrip(0x1234_5678u32, flags, DataFlags::empty()), 0x1234_5678);
    }

    #[test]
    fn tagged_width_narrowing_overflow() {
        let mut sink = ByteSink::new();
        let data_flags = DataFlags::SIZE_OF_INTEGERS_MAY_BE_NOT_EQUAL;
        {
            let mut sctx = SCtx::new(&mut sink, 1, CommonFlags::empty(), data_flags, 0);
            300i32.serialize(&mut sctx).unwrap();
        }
        let bytes = sink.into_vec();
        let mut added = AddedPointers::new();
        let mut dctx = DCtx::new(&bytes, 1, CommonFlags::empty(), data_flags, 0, &mut added);
        let err = u8::deserialize(&mut dctx).unwrap_err();
        assert!(matches!(err, CspError::Status(Status::ErrorValueOverflow)));
    }

    #[test]
    fn tagged_width_widening_succeeds() {
        let mut sink = ByteSink::new();
        let data_flags = DataFlags::SIZE_OF_INTEGERS_MAY_BE_NOT_EQUAL;
        {
            let mut sctx = SCtx::new(&mut sink, 1, CommonFlags::empty(), data_flags, 0);
            7u8.serialize(&mut sctx).unwrap();
        }
        let bytes = sink.into_vec();
        let mut added = AddedPointers::new();
        let mut dctx = DCtx::new(&bytes, 1, CommonFlags::empty(), data_flags, 0, &mut added);
        assert_eq!(u64::deserialize(&mut dctx).unwrap(), 7);
    }

    #[test]
    fn vec_and_string_roundtrip() {
        let v = vec![1u32, 2, 3];
        assert_eq!(roundtrip(v.clone(), CommonFlags::empty(), DataFlags::empty()), v);

        let s = "hello csp".to_string();
        assert_eq!(
            roundtrip(s.clone(), CommonFlags::empty(), DataFlags::empty()),
            s
        );
    }

    #[test]
    fn pointer_without_any_flag_is_rejected() {
        let mut sink = ByteSink::new();
        let mut sctx = SCtx::new(&mut sink, 1, CommonFlags::empty(), DataFlags::empty(), 0);
        let value: Option<Rc<u32>> = Some(Rc::new(5));
        let err = serialize_pointer(&value, &mut sctx).unwrap_err();
        assert!(matches!(
            err,
            CspError::Status(Status::ErrorNotSupportedSerializationSettingsForStruct)
        ));
    }

    #[test]
    fn pointer_aliasing_round_trips_to_same_allocation() {
        let data_flags = DataFlags::CHECK_RECURSIVE_POINTERS;
        let shared = Rc::new(99u32);
        let a: Option<Rc<u32>> = Some(shared.clone());
        let b: Option<Rc<u32>> = Some(shared);

        let mut sink = ByteSink::new();
        {
            let mut sctx = SCtx::new(&mut sink, 1, CommonFlags::empty(), data_flags, 0);
            serialize_pointer(&a, &mut sctx).unwrap();
            serialize_pointer(&b, &mut sctx).unwrap();
        }

        let bytes = sink.into_vec();
        let mut added = AddedPointers::new();
        let mut dctx = DCtx::new(&bytes, 1, CommonFlags::empty(), data_flags, 0, &mut added);
        let da = deserialize_pointer::<u32>(&mut dctx).unwrap().unwrap();
        let db = deserialize_pointer::<u32>(&mut dctx).unwrap().unwrap();
        assert!(Rc::ptr_eq(&da, &db));
        assert_eq!(*da, 99);
    }

    #[test]
    fn null_pointer_round_trips() {
        let mut sink = ByteSink::new();
        let data_flags = DataFlags::CHECK_RECURSIVE_POINTERS;
        {
            let mut sctx = SCtx::new(&mut sink, 1, CommonFlags::empty(), data_flags, 0);
            let value: Option<Rc<u32>> = None;
            serialize_pointer(&value, &mut sctx).unwrap();
        }
        let bytes = sink.into_vec();
        let mut added = AddedPointers::new();
        let mut dctx = DCtx::new(&bytes, 1, CommonFlags::empty(), data_flags, 0, &mut added);
        assert!(deserialize_pointer::<u32>(&mut dctx).unwrap().is_none());
    }
}
