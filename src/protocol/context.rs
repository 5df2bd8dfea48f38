//! Per-pass context objects: the negotiated flag sets, and the `SCtx`/`DCtx`
//! bundles that carry them alongside a byte sink/cursor and the optional
//! pointer-tracking tables, for the lifetime of a single encode or decode.

use std::any::Any;
use std::collections::HashMap;
use std::rc::Rc;

use bitflags::bitflags;

use super::error::{CspError, Result, Status};
use super::io::{ByteCursor, ByteSink};

bitflags! {
    /// Flags negotiated once per session and carried, platform-neutral, in
    /// every message header.
    #[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct CommonFlags: u16 {
        /// The sender's size_t/pointer width is 32 bits.
        const BITNESS32 = 0x0001;
        /// The sender's native byte order is big-endian.
        const BIG_ENDIAN_FORMAT = 0x0002;
        /// The sender's endianness differs from a declared reference and
        /// wants the receiver to byte-swap multi-byte primitives.
        const ENDIANNESS_DIFFERENCE = 0x0004;
    }
}

bitflags! {
    /// Flags that govern a single encode/decode pass, negotiated per
    /// interface and possibly overridden per message.
    #[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct DataFlags: u32 {
        /// A primitive's wire width may differ from its local width; writers
        /// emit a 1-byte width tag ahead of the value.
        const SIZE_OF_INTEGERS_MAY_BE_NOT_EQUAL = 0x0000_0001;
        /// Non-null pointer fields that aren't recursion-tracked may be
        /// serialized by value (inline, owned) rather than rejected.
        const ALLOW_UNMANAGED_POINTERS = 0x0000_0002;
        /// Pointer identity is tracked so that aliased/cyclic graphs encode
        /// each pointee once and decode back to aliased pointers.
        const CHECK_RECURSIVE_POINTERS = 0x0000_0004;
        /// The sender's struct layout may not match the receiver's; category
        /// optimizations that assume identical alignment must be skipped.
        const ALIGNMENT_MAY_BE_NOT_EQUAL = 0x0000_0008;
        /// Disables every simply-assignable raw-block optimization,
        /// forcing a per-field walk regardless of category.
        const SIMPLY_ASSIGNABLE_TAGS_OPTIMIZATIONS_ARE_TURNED_OFF = 0x0000_0010;
    }
}

/// The registry of owner handles for heap objects the decoder allocated
/// during a pass.
///
/// Created by the caller before the [`DCtx`] it's attached to, and outliving
/// it: on a successful decode, ownership of every entry transfers to the
/// caller; on failure, the caller drops this registry (or calls
/// [`AddedPointers::release`]) to free everything the decoder allocated.
#[derive(Debug, Default)]
pub struct AddedPointers {
    entries: Vec<Rc<dyn Any>>,
}

impl AddedPointers {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a heap allocation made during decoding. The registry is
    /// guaranteed not to hold duplicate handles for the same allocation.
    pub fn register<T: 'static>(&mut self, value: Rc<T>) {
        let already_present = self
            .entries
            .iter()
            .any(|existing| Rc::ptr_eq(existing, &(value.clone() as Rc<dyn Any>)));
        if !already_present {
            self.entries.push(value);
        }
    }

    /// The number of distinct allocations currently registered.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no allocations are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Releases every registered allocation. Called by the caller after a
    /// failing decode to reclaim everything that pass allocated.
    pub fn release(&mut self) {
        self.entries.clear();
    }
}

/// Per-pass state for serialization: a mutable byte sink, the negotiated
/// flags, and an optional pointer-identity table for reference sharing and
/// cycle detection.
#[derive(Debug)]
pub struct SCtx<'a> {
    sink: &'a mut ByteSink,
    /// The negotiated wire protocol version.
    pub protocol_version: u8,
    /// The negotiated common flags for this pass.
    pub common_flags: CommonFlags,
    /// The negotiated data flags for this pass.
    pub data_flags: DataFlags,
    /// The interface version the body should be encoded at.
    pub interface_version: u32,
    pointers: Option<HashMap<usize, u64>>,
}

impl<'a> SCtx<'a> {
    /// Creates a new serialization context writing into `sink`.
    pub fn new(
        sink: &'a mut ByteSink,
        protocol_version: u8,
        common_flags: CommonFlags,
        data_flags: DataFlags,
        interface_version: u32,
    ) -> Self {
        let pointers = data_flags
            .contains(DataFlags::CHECK_RECURSIVE_POINTERS)
            .then(HashMap::new);

        Self {
            sink,
            protocol_version,
            common_flags,
            data_flags,
            interface_version,
            pointers,
        }
    }

    /// Whether multi-byte primitives should be byte-swapped before being
    /// written.
    pub fn swap_endianness(&self) -> bool {
        self.common_flags.contains(CommonFlags::ENDIANNESS_DIFFERENCE)
    }

    /// The number of bytes written to the sink so far; used as the wire
    /// offset identity for pointer tracking.
    pub fn offset(&self) -> u64 {
        self.sink.len() as u64
    }

    /// Appends raw bytes to the sink.
    pub fn append(&mut self, bytes: &[u8]) {
        self.sink.append(bytes)
    }

    /// Records that a pointer (identified by its address) is about to be
    /// emitted inline at the current offset.
    ///
    /// Returns the offset of a prior emission if this address has already
    /// been seen during this pass, in which case the caller should emit a
    /// back-reference instead of recursing into the pointee.
    pub fn record_pointer(&mut self, addr: usize) -> Option<u64> {
        let offset = self.offset();
        match self.pointers.as_mut() {
            Some(map) => match map.get(&addr) {
                Some(&prior) => Some(prior),
                None => {
                    map.insert(addr, offset);
                    None
                }
            },
            None => None,
        }
    }
}

/// Per-pass state for deserialization: a read cursor, the negotiated flags,
/// a pointer-identity table mirroring the encoder's, and the registry of
/// heap objects allocated while decoding.
#[derive(Debug)]
pub struct DCtx<'a> {
    cursor: ByteCursor<'a>,
    /// The wire protocol version the payload was encoded with.
    pub protocol_version: u8,
    /// The common flags the payload was encoded with.
    pub common_flags: CommonFlags,
    /// The data flags the payload was encoded with.
    pub data_flags: DataFlags,
    /// The interface version the body was encoded at.
    pub interface_version: u32,
    pointers: Option<HashMap<u64, Rc<dyn Any>>>,
    added_pointers: &'a mut AddedPointers,
}

impl<'a> DCtx<'a> {
    /// Creates a new deserialization context reading from `data`, registering
    /// every heap allocation it makes into `added_pointers`.
    pub fn new(
        data: &'a [u8],
        protocol_version: u8,
        common_flags: CommonFlags,
        data_flags: DataFlags,
        interface_version: u32,
        added_pointers: &'a mut AddedPointers,
    ) -> Self {
        let pointers = data_flags
            .contains(DataFlags::CHECK_RECURSIVE_POINTERS)
            .then(HashMap::new);

        Self {
            cursor: ByteCursor::new(data),
            protocol_version,
            common_flags,
            data_flags,
            interface_version,
            pointers,
            added_pointers,
        }
    }

    /// Whether multi-byte primitives should be byte-swapped after being
    /// read.
    pub fn swap_endianness(&self) -> bool {
        self.common_flags.contains(CommonFlags::ENDIANNESS_DIFFERENCE)
    }

    /// The current read offset, used to key back-references.
    pub fn offset(&self) -> u64 {
        self.cursor.tell() as u64
    }

    /// Reads `n` raw bytes, advancing the cursor.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.cursor.read_bytes(n)
    }

    /// Moves the read cursor to an absolute offset, used to resolve
    /// back-references that point earlier in the stream.
    pub fn seek(&mut self, pos: u64) -> Result<()> {
        self.cursor.seek(pos as usize)
    }

    /// Registers a pointee about to be decoded at the current offset, so a
    /// later back-reference to this offset can resolve to it.
    pub fn record_pointer<T: 'static>(&mut self, offset: u64, value: Rc<T>) {
        self.added_pointers.register(value.clone());
        if let Some(map) = self.pointers.as_mut() {
            map.insert(offset, value as Rc<dyn Any>);
        }
    }

    /// Resolves a back-reference to a pointee previously decoded at
    /// `offset`. Fails with [`Status::ErrorInternal`] if nothing has been
    /// recorded there yet, or if it was recorded as a different type.
    pub fn resolve_pointer<T: 'static>(&self, offset: u64) -> Result<Rc<T>> {
        let entry = self
            .pointers
            .as_ref()
            .and_then(|map| map.get(&offset))
            .ok_or(CspError::from(Status::ErrorInternal))?;

        entry
            .clone()
            .downcast::<T>()
            .map_err(|_| CspError::from(Status::ErrorInternal))
    }

    /// Registers an allocation made outside of pointer-identity tracking
    /// (the `allowUnmanagedPointers` path), so it's still reclaimable on
    /// failure.
    pub fn record_unmanaged<T: 'static>(&mut self, value: Rc<T>) {
        self.added_pointers.register(value);
    }
}
