//! Type metadata and value witness table records.
//!
//! Every Swift type is described at runtime by a `TypeMetadata` record whose
//! first word is a kind discriminator and whose second word points at the
//! type's context descriptor. Immediately **before** the metadata record sits
//! a pointer to the type's value witness table - the function table that
//! fully describes how to initialize, copy, move, and destroy a value of the
//! type. That adjacency is an ABI invariant, not a convenience:
//! [`FullTypeMetadata`] models the combined shape.

use core::ffi::{c_char, c_void};

use crate::descriptor::NominalTypeDescriptor;

// ============================================================================
// Metadata kinds
// ============================================================================

/// Bit planes composed into [`MetadataKind`] values.
pub const METADATA_KIND_IS_NON_TYPE: usize = 0x400;
pub const METADATA_KIND_IS_NON_HEAP: usize = 0x200;
pub const METADATA_KIND_IS_RUNTIME_PRIVATE: usize = 0x100;

/// The kind discriminator in a metadata record. Pointer-sized on the wire;
/// values above 2047 are class metadata (ObjC isa pointers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct MetadataKind(pub usize);

impl MetadataKind {
    pub const CLASS: MetadataKind = MetadataKind(0);
    pub const STRUCT: MetadataKind = MetadataKind(METADATA_KIND_IS_NON_HEAP);
    pub const ENUM: MetadataKind = MetadataKind(1 | METADATA_KIND_IS_NON_HEAP);
    pub const OPTIONAL: MetadataKind = MetadataKind(2 | METADATA_KIND_IS_NON_HEAP);
    /// A foreign class, such as a Core Foundation class.
    pub const FOREIGN_CLASS: MetadataKind = MetadataKind(3 | METADATA_KIND_IS_NON_HEAP);
    /// A type whose value is not exposed in the metadata system.
    pub const OPAQUE: MetadataKind =
        MetadataKind(METADATA_KIND_IS_RUNTIME_PRIVATE | METADATA_KIND_IS_NON_HEAP);
    pub const TUPLE: MetadataKind =
        MetadataKind(1 | METADATA_KIND_IS_RUNTIME_PRIVATE | METADATA_KIND_IS_NON_HEAP);
    pub const FUNCTION: MetadataKind =
        MetadataKind(2 | METADATA_KIND_IS_RUNTIME_PRIVATE | METADATA_KIND_IS_NON_HEAP);
    pub const EXISTENTIAL: MetadataKind =
        MetadataKind(3 | METADATA_KIND_IS_RUNTIME_PRIVATE | METADATA_KIND_IS_NON_HEAP);
    pub const METATYPE: MetadataKind =
        MetadataKind(4 | METADATA_KIND_IS_RUNTIME_PRIVATE | METADATA_KIND_IS_NON_HEAP);
    pub const OBJC_CLASS_WRAPPER: MetadataKind =
        MetadataKind(5 | METADATA_KIND_IS_RUNTIME_PRIVATE | METADATA_KIND_IS_NON_HEAP);
    pub const EXISTENTIAL_METATYPE: MetadataKind =
        MetadataKind(6 | METADATA_KIND_IS_RUNTIME_PRIVATE | METADATA_KIND_IS_NON_HEAP);
    /// A heap-allocated local variable using statically-generated metadata.
    pub const HEAP_LOCAL_VARIABLE: MetadataKind = MetadataKind(METADATA_KIND_IS_NON_TYPE);
    /// A heap-allocated local variable using runtime-instantiated metadata.
    pub const HEAP_GENERIC_LOCAL_VARIABLE: MetadataKind =
        MetadataKind(METADATA_KIND_IS_NON_TYPE | METADATA_KIND_IS_RUNTIME_PRIVATE);
    /// A native error object.
    pub const ERROR_OBJECT: MetadataKind =
        MetadataKind(1 | METADATA_KIND_IS_NON_TYPE | METADATA_KIND_IS_RUNTIME_PRIVATE);

    /// Whether this kind denotes class metadata. Values above 2047 are isa
    /// pointers rather than enumerated kinds.
    pub fn is_class(self) -> bool {
        self == Self::CLASS || self.0 > 2047
    }
}

// ============================================================================
// Value witness table
// ============================================================================

/// Initialize/assign witness: `T *(*)(T *dest, T *src, M *self)`.
pub type TransferFn =
    unsafe extern "C" fn(dest: *mut c_void, src: *mut c_void, metadata: *const TypeMetadata)
        -> *mut c_void;

/// Destroy witness: `void (*)(T *object, M *self)`.
pub type DestroyFn = unsafe extern "C" fn(object: *mut c_void, metadata: *const TypeMetadata);

/// `unsigned (*)(const T *value, UINT_TYPE emptyCases, M *self)`.
pub type GetEnumTagFn = unsafe extern "C" fn(
    value: *const c_void,
    empty_cases: u32,
    metadata: *const TypeMetadata,
) -> u32;

/// `void (*)(T *value, UINT_TYPE whichCase, UINT_TYPE emptyCases, M *self)`.
pub type StoreEnumTagFn = unsafe extern "C" fn(
    value: *mut c_void,
    which_case: u32,
    empty_cases: u32,
    metadata: *const TypeMetadata,
);

/// Flags word in a value witness table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(transparent)]
pub struct ValueWitnessFlags(pub u32);

impl ValueWitnessFlags {
    pub const ALIGNMENT_MASK: u32 = 0x0000_FFFF;
    pub const IS_NON_POD: u32 = 0x0001_0000;
    pub const IS_NON_INLINE: u32 = 0x0002_0000;
    pub const HAS_EXTRA_INHABITANTS: u32 = 0x0004_0000;
    pub const HAS_SPARE_BITS: u32 = 0x0008_0000;
    pub const IS_NON_BITWISE_TAKABLE: u32 = 0x0010_0000;
    pub const HAS_ENUM_WITNESSES: u32 = 0x0020_0000;

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn with(self, mask: u32) -> Self {
        Self(self.0 | mask)
    }

    pub fn contains(self, mask: u32) -> bool {
        self.0 & mask != 0
    }

    /// The type's required alignment in bytes.
    pub fn alignment(self) -> usize {
        ((self.0 & Self::ALIGNMENT_MASK) + 1) as usize
    }

    /// Whether values embed reference-counted or otherwise non-trivial
    /// fields. POD values may be moved and copied with a raw byte copy.
    pub fn is_non_pod(self) -> bool {
        self.contains(Self::IS_NON_POD)
    }

    pub fn is_non_bitwise_takable(self) -> bool {
        self.contains(Self::IS_NON_BITWISE_TAKABLE)
    }
}

/// The value witness table: six transfer/destroy slots, the two
/// single-payload-enum tag slots, the storage sizes, and the flags word.
///
/// Null slots are expressed as `None`; every slot is populated in tables
/// emitted by the Swift compiler.
#[repr(C)]
pub struct ValueWitnessTable {
    /// Given an invalid buffer, initialize it as a copy of the object in the
    /// source buffer.
    pub init_buffer_with_copy: Option<TransferFn>,
    /// Given a valid object, destroy it, leaving it invalid.
    pub destroy: Option<DestroyFn>,
    /// Given an invalid object, initialize it as a copy of the source.
    pub init_with_copy: Option<TransferFn>,
    /// Given a valid object, change it to be a copy of the source.
    pub assign_with_copy: Option<TransferFn>,
    /// Given an invalid object, initialize it by taking the source's value.
    /// The source becomes invalid.
    pub init_with_take: Option<TransferFn>,
    /// Given a valid object, change it to the source's value. The source
    /// becomes invalid.
    pub assign_with_take: Option<TransferFn>,
    /// Given a valid single-payload enum with a payload of this type, read
    /// its case tag.
    pub get_enum_tag_single_payload: Option<GetEnumTagFn>,
    /// Given uninitialized memory for a single-payload enum with a payload
    /// of this type, store the case tag.
    pub store_enum_tag_single_payload: Option<StoreEnumTagFn>,
    /// Required storage size of a single value.
    pub size: usize,
    /// Required size per element of an array of this type; at least one,
    /// even for zero-sized types.
    pub stride: usize,
    pub flags: ValueWitnessFlags,
    pub extra_inhabitant_count: u32,
}

// ============================================================================
// Type metadata
// ============================================================================

/// The metadata record the runtime hands around to identify a type.
#[repr(C)]
pub struct TypeMetadata {
    pub kind: MetadataKind,
    pub type_descriptor: *const NominalTypeDescriptor,
}

/// A metadata record together with the value-witness-table pointer that the
/// ABI places immediately before it.
#[repr(C)]
pub struct FullTypeMetadata {
    pub value_witness_table: *const ValueWitnessTable,
    pub metadata: TypeMetadata,
}

impl FullTypeMetadata {
    /// Recovers the full record from a metadata pointer by stepping back
    /// over the witness-table word.
    ///
    /// # Safety
    /// `metadata` must point at the `metadata` field of a live
    /// `FullTypeMetadata`.
    pub unsafe fn containing(metadata: *const TypeMetadata) -> *mut FullTypeMetadata {
        (metadata as *mut u8).sub(core::mem::size_of::<*const ValueWitnessTable>())
            as *mut FullTypeMetadata
    }
}

// ============================================================================
// Tuple metadata
// ============================================================================

/// Flags argument to the tuple-metadata accessor; the low 16 bits carry the
/// element count.
pub const fn tuple_type_flags(num_elements: u16) -> usize {
    num_elements as usize
}

/// One element record trailing a [`TupleTypeMetadata`].
#[repr(C)]
pub struct TupleElement {
    pub metadata: *const TypeMetadata,
    pub offset: usize,
}

/// Metadata for a tuple type: kind word, element count, optional label
/// string, then `num_elements` trailing [`TupleElement`] records.
#[repr(C)]
pub struct TupleTypeMetadata {
    pub kind: MetadataKind,
    pub num_elements: usize,
    pub labels: *const c_char,
}

impl TupleTypeMetadata {
    /// # Safety
    /// `self` must be a live tuple metadata record and `index` must be below
    /// `num_elements`.
    pub unsafe fn element(&self, index: usize) -> &TupleElement {
        debug_assert!(index < self.num_elements);
        let base = (self as *const Self).add(1) as *const TupleElement;
        &*base.add(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_predicates() {
        assert!(MetadataKind::CLASS.is_class());
        assert!(MetadataKind(4096).is_class());
        assert!(!MetadataKind::STRUCT.is_class());
        assert!(!MetadataKind::TUPLE.is_class());
        assert_ne!(MetadataKind::ENUM, MetadataKind::OPTIONAL);
    }

    #[test]
    fn test_flags_alignment_and_pod() {
        let flags = ValueWitnessFlags(7); // alignment mask holds align - 1
        assert_eq!(flags.alignment(), 8);
        assert!(!flags.is_non_pod());

        let flags = flags.with(ValueWitnessFlags::IS_NON_POD);
        assert!(flags.is_non_pod());
        assert!(!flags.is_non_bitwise_takable());
    }

    #[test]
    fn test_full_metadata_adjacency() {
        let full = FullTypeMetadata {
            value_witness_table: core::ptr::null(),
            metadata: TypeMetadata {
                kind: MetadataKind::STRUCT,
                type_descriptor: core::ptr::null(),
            },
        };
        let recovered = unsafe { FullTypeMetadata::containing(&full.metadata) };
        assert_eq!(recovered as *const _, &full as *const _);
    }
}
