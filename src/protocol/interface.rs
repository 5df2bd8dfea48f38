//! Interface identity and the struct category that governs how a struct's
//! body is framed on the wire.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use super::context::DataFlags;
use super::uuid::{Uuid, NULL_UUID};

/// Sentinel meaning "no interface version has been assigned yet".
pub const INTERFACE_VERSION_UNDEFINED: u32 = u32::MAX;

/// The wire protocol versions this implementation understands, newest first.
pub const PROTOCOL_VERSIONS: &[u8] = &[1];

/// The newest protocol version this implementation understands.
pub fn latest_protocol_version() -> u8 {
    PROTOCOL_VERSIONS[0]
}

/// Returns `true` if `version` is one of [`PROTOCOL_VERSIONS`].
pub fn is_protocol_version_supported(version: u8) -> bool {
    PROTOCOL_VERSIONS.contains(&version)
}

/// The identity of an interface: a namespace of struct schemas that evolve
/// together and share one version number and one set of data-flag
/// constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interface {
    /// The interface's identity.
    pub id: Uuid,
    /// The interface's current revision. Only this field, and
    /// `min_supported_version`, may change between publications of the same
    /// interface.
    pub version: u32,
    /// The oldest interface version a decoder of this struct still accepts.
    /// A payload declaring a version below this floor is rejected with
    /// `ErrorNotSupportedInterfaceVersion` before its body is read.
    pub min_supported_version: u32,
    /// Data flags every session using this interface must have set.
    pub mandatory_data_flags: DataFlags,
    /// Data flags no session using this interface may have set.
    pub forbidden_data_flags: DataFlags,
}

impl Default for Interface {
    fn default() -> Self {
        Self::UNDEFINED
    }
}

impl Interface {
    /// The sentinel interface used before one has been assigned.
    pub const UNDEFINED: Interface = Interface {
        id: NULL_UUID,
        version: INTERFACE_VERSION_UNDEFINED,
        min_supported_version: 0,
        mandatory_data_flags: DataFlags::empty(),
        forbidden_data_flags: DataFlags::empty(),
    };

    /// Returns `true` if `flags` satisfies both this interface's mandatory
    /// and forbidden data-flag constraints.
    pub fn accepts(&self, flags: DataFlags) -> bool {
        flags.contains(self.mandatory_data_flags) && !flags.intersects(self.forbidden_data_flags)
    }
}

/// Returns `true` if `version` falls within `[min_version, max_version]`.
pub fn is_interface_version_supported(version: u32, min_version: u32, max_version: u32) -> bool {
    version >= min_version && version <= max_version
}

/// The structural category of a struct, used to decide whether its body can
/// be emitted as one raw memory block or must be walked field by field.
///
/// Categories are ordered from the most to the least permissive optimization:
/// a category earlier in this list is a strict subset of the guarantees
/// offered by one later in the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StructCategory {
    /// No pointers, no padding, and every field's wire width always equals
    /// its native width: the struct can be copied as one raw block under any
    /// negotiated flags (aside from an endianness swap).
    AlwaysSimplyAssignable,
    /// Like `SimplyAssignable`, but additionally has a size and alignment
    /// that can't change between compilations: safe to raw-block copy even
    /// when the peer's layout might otherwise be suspect.
    SimplyAssignableFixedSize,
    /// No pointers and no padding, but at least one field's wire width can
    /// vary with `sizeOfIntegersMayBeNotEqual`: raw-block copy is only valid
    /// while that flag is off.
    SimplyAssignable,
    /// Like `SimplyAssignable`, but the struct is declared with alignment 1,
    /// so it remains raw-block-copyable even when
    /// `alignmentMayBeNotEqual` is set.
    SimplyAssignableAlignedToOne,
    /// Contains pointers, nested non-simply-assignable structs, or other
    /// fields that always require a per-field walk.
    General,
}

impl StructCategory {
    /// Returns `true` if a struct in this category can be emitted as a
    /// single raw memory block given the active `flags`.
    pub fn allows_raw_block(self, flags: DataFlags) -> bool {
        if flags.contains(DataFlags::SIMPLY_ASSIGNABLE_TAGS_OPTIMIZATIONS_ARE_TURNED_OFF) {
            return false;
        }

        match self {
            StructCategory::AlwaysSimplyAssignable => true,
            StructCategory::SimplyAssignableFixedSize => true,
            StructCategory::SimplyAssignable => {
                !flags.contains(DataFlags::SIZE_OF_INTEGERS_MAY_BE_NOT_EQUAL)
                    && !flags.contains(DataFlags::ALIGNMENT_MAY_BE_NOT_EQUAL)
            }
            StructCategory::SimplyAssignableAlignedToOne => {
                !flags.contains(DataFlags::SIZE_OF_INTEGERS_MAY_BE_NOT_EQUAL)
            }
            StructCategory::General => false,
        }
    }
}

/// The static metadata for one struct schema: its identity, the interface it
/// belongs to, its current private version, and its wire category.
#[derive(Debug, Clone, Copy)]
pub struct StructDescriptor {
    /// The struct's identity, stable across every private version.
    pub id: Uuid,
    /// The interface this struct is published as part of.
    pub interface: Interface,
    /// The newest private version of this struct's body layout.
    pub latest_private_version: u32,
    /// The oldest private version a receiver is required to be able to
    /// translate up to `latest_private_version`.
    pub min_supported_private_version: u32,
    /// This struct's wire category.
    pub category: StructCategory,
}

/// A process-wide registry mapping struct identities to the metadata needed
/// to decode them without static type knowledge, for the dynamic-polymorphic
/// dispatch path.
#[derive(Default)]
pub struct TypeRegistry {
    entries: RefCell<HashMap<Uuid, Rc<StructDescriptor>>>,
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("len", &self.entries.borrow().len())
            .finish()
    }
}

impl TypeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or overwrites) the descriptor for a struct identity.
    pub fn register(&self, descriptor: StructDescriptor) {
        self.entries
            .borrow_mut()
            .insert(descriptor.id, Rc::new(descriptor));
    }

    /// Looks up the descriptor registered for `id`, if any.
    pub fn lookup(&self, id: Uuid) -> Option<Rc<StructDescriptor>> {
        self.entries.borrow().get(&id).cloned()
    }

    /// The number of distinct struct identities currently registered.
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Returns `true` if no struct identities are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}
