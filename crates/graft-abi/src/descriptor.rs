//! Context descriptors and field reflection records.
//!
//! Descriptors form a tree: a module descriptor at the root, nominal type
//! descriptors pointing back at their parent context, and field descriptors
//! hanging off each nominal type for reflection. All cross-record references
//! are relative pointers, so a whole descriptor chain can live in one
//! allocation and remain valid wherever that allocation sits.

use core::ffi::c_char;

use crate::metadata::TypeMetadata;
use crate::relative::{RelativeIndirectablePointer, RelativePointer};

// ============================================================================
// Context descriptor flags
// ============================================================================

/// Discriminator in the low five bits of [`ContextDescriptorFlags`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ContextDescriptorKind {
    Module = 0,
    Extension = 1,
    Anonymous = 2,
    Protocol = 3,
    OpaqueType = 4,
    Class = 16,
    Struct = 17,
    Enum = 18,
}

/// Common flags word at the head of every context descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(transparent)]
pub struct ContextDescriptorFlags(pub u32);

impl ContextDescriptorFlags {
    const KIND_MASK: u32 = 0x1F;
    pub const IS_UNIQUE: u32 = 0x40;
    pub const IS_GENERIC: u32 = 0x80;

    pub const fn new(kind: ContextDescriptorKind) -> Self {
        Self(kind as u32)
    }

    pub const fn with(self, mask: u32) -> Self {
        Self(self.0 | mask)
    }

    pub fn kind(self) -> u32 {
        self.0 & Self::KIND_MASK
    }

    pub fn is_generic(self) -> bool {
        self.0 & Self::IS_GENERIC != 0
    }
}

// ============================================================================
// Context descriptors
// ============================================================================

/// The common prefix of every context descriptor: flags plus the parent
/// context reference (null for modules).
#[repr(C)]
pub struct ContextDescriptor {
    pub flags: ContextDescriptorFlags,
    pub parent: RelativeIndirectablePointer,
}

/// Descriptor for a module context. The name is a NUL-terminated string.
#[repr(C)]
pub struct ModuleDescriptor {
    pub context: ContextDescriptor,
    pub name: RelativePointer,
}

/// The prefix shared by struct, enum, and class descriptors: context, type
/// name, metadata access function, and reflection fields.
#[repr(C)]
pub struct NominalTypeDescriptor {
    pub context: ContextDescriptor,
    pub name: RelativePointer,
    pub access_function: RelativePointer,
    pub fields: RelativePointer,
}

impl NominalTypeDescriptor {
    /// The type's NUL-terminated name.
    ///
    /// # Safety
    /// The descriptor must be live and its name pointer valid.
    pub unsafe fn name_ptr(&self) -> *const c_char {
        self.name.target() as *const c_char
    }
}

/// Descriptor for a struct type.
#[repr(C)]
pub struct StructDescriptor {
    pub nominal_type: NominalTypeDescriptor,
    /// Number of stored properties, not including any generic parameters.
    pub num_fields: i32,
    /// Offset, in pointer-sized words from the metadata record, of the field
    /// offset vector. Zero if there is none.
    pub field_offset_vector_offset: u32,
}

impl StructDescriptor {
    /// Reads the field offset vector out of `metadata`.
    ///
    /// # Safety
    /// `metadata` must be struct metadata described by this descriptor.
    pub unsafe fn field_offsets<'a>(&self, metadata: *const TypeMetadata) -> &'a [i32] {
        debug_assert!(self.field_offset_vector_offset != 0);
        let words = metadata as *const usize;
        let vector = words.add(self.field_offset_vector_offset as usize) as *const i32;
        core::slice::from_raw_parts(vector, self.num_fields as usize)
    }
}

/// Descriptor for a protocol.
#[repr(C)]
pub struct ProtocolDescriptor {
    pub context: ContextDescriptor,
    pub name: RelativePointer,
    pub num_requirements_in_signature: u32,
    pub num_requirements: u32,
    /// Associated type names, a comma-separated NUL-terminated list.
    pub associated_type_names: RelativePointer,
}

// ============================================================================
// Field reflection
// ============================================================================

/// Discriminator for [`FieldDescriptor::kind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum FieldDescriptorKind {
    Struct = 0,
    Class = 1,
    Enum = 2,
    MultiPayloadEnum = 3,
    Protocol = 4,
    ClassProtocol = 5,
    ObjCProtocol = 6,
    ObjCClass = 7,
}

/// Reflection metadata for a nominal type's stored properties. Followed in
/// memory by `num_fields` [`FieldRecord`]s.
#[repr(C)]
pub struct FieldDescriptor {
    pub mangled_type_name: RelativePointer,
    pub superclass: RelativePointer,
    pub kind: FieldDescriptorKind,
    pub field_record_size: u16,
    pub num_fields: u32,
}

impl FieldDescriptor {
    /// # Safety
    /// The descriptor must be followed by `num_fields` live records and
    /// `index` must be in range.
    pub unsafe fn record(&self, index: usize) -> &FieldRecord {
        debug_assert!(index < self.num_fields as usize);
        let base = (self as *const Self).add(1) as *const FieldRecord;
        &*base.add(index)
    }
}

/// Flags word of a [`FieldRecord`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(transparent)]
pub struct FieldRecordFlags(pub u32);

impl FieldRecordFlags {
    /// The field is a `var`, not a `let`.
    pub const IS_VAR: u32 = 0x2;

    pub const fn with(self, mask: u32) -> Self {
        Self(self.0 | mask)
    }

    pub fn is_var(self) -> bool {
        self.0 & Self::IS_VAR != 0
    }
}

/// One stored-property record: its mangled type and its name.
#[repr(C)]
pub struct FieldRecord {
    pub flags: FieldRecordFlags,
    pub mangled_type_name: RelativePointer,
    pub field_name: RelativePointer,
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::size_of;

    #[test]
    fn test_record_sizes() {
        assert_eq!(size_of::<ContextDescriptor>(), 8);
        assert_eq!(size_of::<ModuleDescriptor>(), 12);
        assert_eq!(size_of::<NominalTypeDescriptor>(), 20);
        assert_eq!(size_of::<StructDescriptor>(), 28);
        assert_eq!(size_of::<ProtocolDescriptor>(), 24);
        assert_eq!(size_of::<FieldDescriptor>(), 16);
        assert_eq!(size_of::<FieldRecord>(), 12);
    }

    #[test]
    fn test_flags_kind_and_masks() {
        let flags = ContextDescriptorFlags::new(ContextDescriptorKind::Struct)
            .with(ContextDescriptorFlags::IS_UNIQUE);
        assert_eq!(flags.kind(), ContextDescriptorKind::Struct as u32);
        assert!(!flags.is_generic());

        let generic = flags.with(ContextDescriptorFlags::IS_GENERIC);
        assert!(generic.is_generic());
        assert_eq!(generic.kind(), ContextDescriptorKind::Struct as u32);
    }

    #[test]
    fn test_field_record_flags() {
        assert!(FieldRecordFlags::default()
            .with(FieldRecordFlags::IS_VAR)
            .is_var());
        assert!(!FieldRecordFlags::default().is_var());
    }

    #[test]
    fn test_field_offset_vector_read() {
        // Fake struct metadata: [vwt][kind][descriptor][off0 off1] with the
        // offset vector starting at word 3 from the metadata pointer... the
        // metadata pointer is the kind word, so vector offset is 2 here.
        #[repr(C)]
        struct Fake {
            vwt: usize,
            kind: usize,
            descriptor: usize,
            offsets: [i32; 2],
        }
        let fake = Fake {
            vwt: 0,
            kind: 0x200,
            descriptor: 0,
            offsets: [0, 8],
        };
        let desc = StructDescriptor {
            nominal_type: NominalTypeDescriptor {
                context: ContextDescriptor {
                    flags: ContextDescriptorFlags::new(ContextDescriptorKind::Struct),
                    parent: Default::default(),
                },
                name: Default::default(),
                access_function: Default::default(),
                fields: Default::default(),
            },
            num_fields: 2,
            field_offset_vector_offset: 2,
        };
        let metadata = &fake.kind as *const usize as *const TypeMetadata;
        let offsets = unsafe { desc.field_offsets(metadata) };
        assert_eq!(offsets, &[0, 8]);
    }
}
