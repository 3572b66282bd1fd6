//! Protocol conformance and witness table records.
//!
//! A conformance record ties a type descriptor to a protocol descriptor and
//! names the witness table pattern the runtime instantiates on first use.
//! Resilient conformances carry a trailing list of requirement/witness pairs
//! plus a generic witness table header pointing at private instantiation
//! cache storage.

use core::ffi::c_void;

use crate::relative::{RelativeIndirectablePointer, RelativePointer};

// ============================================================================
// Conformance flags
// ============================================================================

/// How [`ProtocolConformanceDescriptor::type_descriptor`] references the
/// conforming type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TypeReferenceKind {
    /// Direct reference to a nominal type descriptor.
    DirectTypeDescriptor = 0,
    /// Indirect reference to a nominal type descriptor.
    IndirectTypeDescriptor = 1,
    DirectObjCClassName = 2,
    IndirectObjCClass = 3,
}

/// Flags word of a conformance descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(transparent)]
pub struct ConformanceFlags(pub u32);

impl ConformanceFlags {
    const TYPE_REFERENCE_KIND_SHIFT: u32 = 3;
    const TYPE_REFERENCE_KIND_MASK: u32 = 0x7 << Self::TYPE_REFERENCE_KIND_SHIFT;
    pub const IS_RETROACTIVE: u32 = 1 << 6;
    pub const HAS_RESILIENT_WITNESSES: u32 = 1 << 16;
    pub const HAS_GENERIC_WITNESS_TABLE: u32 = 1 << 17;

    pub const fn new(kind: TypeReferenceKind) -> Self {
        Self((kind as u32) << Self::TYPE_REFERENCE_KIND_SHIFT)
    }

    pub const fn with(self, mask: u32) -> Self {
        Self(self.0 | mask)
    }

    pub fn contains(self, mask: u32) -> bool {
        self.0 & mask != 0
    }

    pub fn type_reference_kind(self) -> u32 {
        (self.0 & Self::TYPE_REFERENCE_KIND_MASK) >> Self::TYPE_REFERENCE_KIND_SHIFT
    }
}

// ============================================================================
// Conformance records
// ============================================================================

/// The record registered with the runtime to declare "this type conforms to
/// this protocol". Trailing objects follow per the flags.
#[repr(C)]
pub struct ProtocolConformanceDescriptor {
    pub protocol: RelativeIndirectablePointer,
    pub type_descriptor: RelativePointer,
    pub witness_table_pattern: RelativePointer,
    pub flags: ConformanceFlags,
}

/// Header preceding the resilient witness list.
#[repr(C)]
pub struct ResilientWitnessesHeader {
    pub num_witnesses: u32,
}

/// One requirement/witness pair in the resilient witness list.
#[repr(C)]
pub struct ResilientWitness {
    /// The protocol requirement, referenced through its symbol.
    pub requirement: RelativeIndirectablePointer,
    /// The implementation satisfying it.
    pub witness: RelativePointer,
}

/// Header describing how to instantiate the witness table.
#[repr(C)]
pub struct GenericWitnessTable {
    /// Size of the instantiated table, in words.
    pub witness_table_size_in_words: u16,
    /// Private storage size in words, with the low bit set if the table
    /// always requires instantiation.
    pub witness_table_private_size_in_words_and_requires_instantiation: u16,
    pub instantiator: RelativePointer,
    pub private_data: RelativePointer,
}

impl GenericWitnessTable {
    /// Number of words of private cache storage the runtime expects behind
    /// `private_data`.
    pub const NUM_PRIVATE_CACHE_WORDS: usize = 16;

    pub const fn private_size_and_requires_instantiation(
        private_size_in_words: u16,
        requires_instantiation: bool,
    ) -> u16 {
        (private_size_in_words << 1) | requires_instantiation as u16
    }
}

// ============================================================================
// Instantiated witness tables
// ============================================================================

/// Index of the first requirement slot in an instantiated witness table;
/// slot zero is the conformance descriptor.
pub const WITNESS_TABLE_FIRST_REQUIREMENT_OFFSET: usize = 1;

/// An instantiated protocol witness table, viewed as an array of words.
#[repr(C)]
pub struct ProtocolWitnessTable {
    pub conformance: *const ProtocolConformanceDescriptor,
}

impl ProtocolWitnessTable {
    /// Reads the witness at `slot`.
    ///
    /// # Safety
    /// The table must be live and contain at least `slot + 1` words.
    pub unsafe fn witness(&self, slot: usize) -> *mut c_void {
        let words = self as *const Self as *const *mut c_void;
        *words.add(slot)
    }

    /// Overwrites the witness at `slot`.
    ///
    /// # Safety
    /// As for [`witness`](Self::witness), and the table must be writable.
    pub unsafe fn set_witness(&mut self, slot: usize, value: *mut c_void) {
        let words = self as *mut Self as *mut *mut c_void;
        *words.add(slot) = value;
    }
}
