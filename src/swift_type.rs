//! Type handles.
//!
//! A [`SwiftType`] wraps a pointer to live Swift type metadata and exposes
//! the operations the rest of the bridge needs: moving and destroying values
//! through the value witness table (with a raw byte copy fast path for POD
//! types), protocol conformance lookup, and emission of the type's mangled
//! name into descriptor byte streams.

use std::ffi::{c_void, CStr};
use std::ptr;

use graftr_abi::{
    FullTypeMetadata, MetadataKind, ProtocolDescriptor, ProtocolWitnessTable, SymbolicReference,
    SymbolicReferenceKind, TypeMetadata, ValueWitnessTable,
};

use crate::error::{InteropError, Result};
use crate::runtime::CoreRuntime;

/// Which transfer witness to apply. Copy modes leave the source valid; take
/// modes consume it. Assign modes destroy the previous destination value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    InitBufferWithCopy,
    InitWithCopy,
    AssignWithCopy,
    InitWithTake,
    AssignWithTake,
}

impl TransferMode {
    fn witness_name(self) -> &'static str {
        match self {
            TransferMode::InitBufferWithCopy => "initializeBufferWithCopy",
            TransferMode::InitWithCopy => "initializeWithCopy",
            TransferMode::AssignWithCopy => "assignWithCopy",
            TransferMode::InitWithTake => "initializeWithTake",
            TransferMode::AssignWithTake => "assignWithTake",
        }
    }
}

/// The native layout the host side compiled against, checked at handle
/// construction to catch ABI drift before any value crosses the boundary.
#[derive(Debug, Clone, Copy)]
pub struct LayoutExpectation {
    pub size: usize,
    pub alignment: usize,
}

/// A handle to a Swift type.
///
/// The wrapped metadata is immutable and lives for the whole process, so
/// handles are freely cloneable and shareable.
#[derive(Clone)]
pub struct SwiftType {
    metadata: *const TypeMetadata,
    witnesses: *const ValueWitnessTable,
    mangled: String,
    /// Synthesized types have no symbol the demangler could resolve, so
    /// byte-stream references to them go through the context descriptor.
    symbolic: bool,
}

// Metadata records are immutable once published and never deallocated.
unsafe impl Send for SwiftType {}
unsafe impl Sync for SwiftType {}

impl SwiftType {
    /// Wraps a metadata pointer. `mangled` is the type's textual mangling.
    ///
    /// # Safety
    /// `metadata` must point at live, process-lifetime type metadata laid
    /// out with its value witness table pointer immediately before it.
    pub unsafe fn from_metadata(
        metadata: *const TypeMetadata,
        mangled: impl Into<String>,
    ) -> Result<SwiftType> {
        Self::wrap(metadata, mangled.into(), false)
    }

    pub(crate) unsafe fn from_metadata_symbolic(
        metadata: *const TypeMetadata,
        mangled: String,
    ) -> Result<SwiftType> {
        Self::wrap(metadata, mangled, true)
    }

    unsafe fn wrap(
        metadata: *const TypeMetadata,
        mangled: String,
        symbolic: bool,
    ) -> Result<SwiftType> {
        if metadata.is_null() {
            return Err(InteropError::Unsupported(format!(
                "null metadata for `{mangled}`"
            )));
        }
        let witnesses = (*FullTypeMetadata::containing(metadata)).value_witness_table;
        if witnesses.is_null() {
            return Err(InteropError::AbiMismatch {
                type_name: mangled,
                detail: "metadata has no value witness table".into(),
            });
        }
        // A POD claim licenses raw byte moves, which a non-bitwise-takable
        // type forbids. A table carrying both is corrupt.
        let flags = (*witnesses).flags;
        if !flags.is_non_pod() && flags.is_non_bitwise_takable() {
            return Err(InteropError::AbiMismatch {
                type_name: mangled,
                detail: "witness flags claim POD but not bitwise takable".into(),
            });
        }
        Ok(SwiftType {
            metadata,
            witnesses,
            mangled,
            symbolic,
        })
    }

    /// Fails with [`InteropError::AbiMismatch`] if the native layout
    /// disagrees with `expected`.
    pub fn verify_layout(&self, expected: &LayoutExpectation) -> Result<()> {
        if self.size() != expected.size {
            return Err(InteropError::AbiMismatch {
                type_name: self.display_name(),
                detail: format!(
                    "native size is {}, host expects {}",
                    self.size(),
                    expected.size
                ),
            });
        }
        if self.alignment() != expected.alignment {
            return Err(InteropError::AbiMismatch {
                type_name: self.display_name(),
                detail: format!(
                    "native alignment is {}, host expects {}",
                    self.alignment(),
                    expected.alignment
                ),
            });
        }
        Ok(())
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn metadata(&self) -> *const TypeMetadata {
        self.metadata
    }

    pub fn witnesses(&self) -> &ValueWitnessTable {
        // Wrap checked non-null; the table is immutable.
        unsafe { &*self.witnesses }
    }

    pub fn kind(&self) -> MetadataKind {
        unsafe { (*self.metadata).kind }
    }

    pub fn size(&self) -> usize {
        self.witnesses().size
    }

    pub fn stride(&self) -> usize {
        self.witnesses().stride
    }

    pub fn alignment(&self) -> usize {
        self.witnesses().flags.alignment()
    }

    pub fn is_pod(&self) -> bool {
        !self.witnesses().flags.is_non_pod()
    }

    pub fn extra_inhabitant_count(&self) -> u32 {
        self.witnesses().extra_inhabitant_count
    }

    /// The textual mangling, e.g. `s5Int32V`.
    pub fn mangled_name(&self) -> &str {
        &self.mangled
    }

    /// The declared name out of the nominal type descriptor, for nominal
    /// value kinds that carry one.
    pub fn name(&self) -> Option<String> {
        let kind = self.kind();
        if kind != MetadataKind::STRUCT
            && kind != MetadataKind::ENUM
            && kind != MetadataKind::OPTIONAL
        {
            return None;
        }
        unsafe {
            let descriptor = (*self.metadata).type_descriptor;
            if descriptor.is_null() {
                return None;
            }
            let name = (*descriptor).name_ptr();
            if name.is_null() {
                return None;
            }
            Some(CStr::from_ptr(name).to_string_lossy().into_owned())
        }
    }

    fn display_name(&self) -> String {
        self.name().unwrap_or_else(|| self.mangled.clone())
    }

    // ========================================================================
    // Value operations
    // ========================================================================

    /// Moves or copies a value from `src` to `dest` per `mode`. POD types
    /// take a raw byte copy; everything else goes through the witness.
    ///
    /// # Safety
    /// `dest` and `src` must be valid for this type's size, `src` must hold
    /// an initialized value, and `dest` must already hold one for the
    /// assign modes.
    pub unsafe fn transfer(
        &self,
        dest: *mut c_void,
        src: *mut c_void,
        mode: TransferMode,
    ) -> Result<*mut c_void> {
        let vwt = self.witnesses();
        if !vwt.flags.is_non_pod() {
            // `dest == src` is legal for the assign witnesses (self-assignment),
            // so the copy must tolerate exact overlap.
            ptr::copy(src as *const u8, dest as *mut u8, vwt.size);
            return Ok(dest);
        }
        let witness = match mode {
            TransferMode::InitBufferWithCopy => vwt.init_buffer_with_copy,
            TransferMode::InitWithCopy => vwt.init_with_copy,
            TransferMode::AssignWithCopy => vwt.assign_with_copy,
            TransferMode::InitWithTake => vwt.init_with_take,
            TransferMode::AssignWithTake => vwt.assign_with_take,
        }
        .ok_or_else(|| self.missing_witness(mode.witness_name()))?;
        Ok(witness(dest, src, self.metadata))
    }

    /// Destroys the value at `value`. A no-op for POD types.
    ///
    /// # Safety
    /// `value` must hold an initialized value of this type; it is invalid
    /// afterwards.
    pub unsafe fn destroy(&self, value: *mut c_void) -> Result<()> {
        let vwt = self.witnesses();
        if !vwt.flags.is_non_pod() {
            return Ok(());
        }
        let destroy = vwt.destroy.ok_or_else(|| self.missing_witness("destroy"))?;
        destroy(value, self.metadata);
        Ok(())
    }

    /// Reads the case tag of a single-payload enum whose payload is this
    /// type. Zero is the payload case.
    ///
    /// # Safety
    /// `value` must hold an initialized enum value of the instantiated
    /// single-payload layout.
    pub unsafe fn get_enum_tag(&self, value: *const c_void, empty_cases: u32) -> Result<u32> {
        let witness = self
            .witnesses()
            .get_enum_tag_single_payload
            .ok_or_else(|| self.missing_witness("getEnumTagSinglePayload"))?;
        Ok(witness(value, empty_cases, self.metadata))
    }

    /// Stores a case tag into a single-payload enum whose payload is this
    /// type. For the payload case the payload must already be initialized.
    ///
    /// # Safety
    /// `value` must be valid for the instantiated single-payload layout.
    pub unsafe fn store_enum_tag(
        &self,
        value: *mut c_void,
        which_case: u32,
        empty_cases: u32,
    ) -> Result<()> {
        let witness = self
            .witnesses()
            .store_enum_tag_single_payload
            .ok_or_else(|| self.missing_witness("storeEnumTagSinglePayload"))?;
        witness(value, which_case, empty_cases, self.metadata);
        Ok(())
    }

    /// Asks the runtime whether this type conforms to `protocol`, returning
    /// the witness table when it does.
    pub fn conformance(
        &self,
        protocol: *const ProtocolDescriptor,
    ) -> Result<Option<*const ProtocolWitnessTable>> {
        let runtime = CoreRuntime::global()?;
        let table = unsafe { (runtime.conforms_to_protocol)(self.metadata, protocol) };
        Ok(if table.is_null() { None } else { Some(table) })
    }

    fn missing_witness(&self, name: &str) -> InteropError {
        InteropError::AbiMismatch {
            type_name: self.display_name(),
            detail: format!("missing `{name}` value witness"),
        }
    }

    // ========================================================================
    // Mangled-name emission
    // ========================================================================

    /// Bytes needed by [`write_mangled_name`](Self::write_mangled_name),
    /// including the NUL terminator and any trailing pointer.
    pub(crate) fn mangled_encoding_len(&self) -> usize {
        if self.symbolic {
            SymbolicReference::SIZE + 1 + std::mem::size_of::<*const c_void>()
        } else {
            self.mangled.len() + 1
        }
    }

    /// Emits this type's mangled name at `dest` for the runtime demangler.
    ///
    /// Resolvable types are written as their textual mangling. Synthesized
    /// types are written as an indirect-context symbolic reference whose
    /// pointer slot sits just past the NUL terminator and holds the absolute
    /// descriptor address.
    ///
    /// # Safety
    /// `dest` must be valid for [`mangled_encoding_len`](Self::mangled_encoding_len)
    /// bytes, at its final address.
    pub(crate) unsafe fn write_mangled_name(&self, dest: *mut u8) -> Result<()> {
        if self.symbolic {
            let slot = dest.add(SymbolicReference::SIZE + 1);
            SymbolicReference::write_at(
                dest,
                SymbolicReferenceKind::IndirectContext,
                slot as *const c_void,
            )?;
            *dest.add(SymbolicReference::SIZE) = 0;
            (slot as *mut *const c_void)
                .write_unaligned((*self.metadata).type_descriptor as *const c_void);
        } else {
            ptr::copy_nonoverlapping(self.mangled.as_ptr(), dest, self.mangled.len());
            *dest.add(self.mangled.len()) = 0;
        }
        Ok(())
    }
}

impl std::fmt::Debug for SwiftType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwiftType")
            .field("mangled", &self.mangled)
            .field("kind", &self.kind())
            .field("size", &self.size())
            .field("symbolic", &self.symbolic)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graftr_abi::ValueWitnessFlags;

    fn fake_metadata(flags: ValueWitnessFlags) -> &'static TypeMetadata {
        let vwt: &'static ValueWitnessTable = Box::leak(Box::new(ValueWitnessTable {
            init_buffer_with_copy: None,
            destroy: None,
            init_with_copy: None,
            assign_with_copy: None,
            init_with_take: None,
            assign_with_take: None,
            get_enum_tag_single_payload: None,
            store_enum_tag_single_payload: None,
            size: 8,
            stride: 8,
            flags,
            extra_inhabitant_count: 0,
        }));
        let full: &'static FullTypeMetadata = Box::leak(Box::new(FullTypeMetadata {
            value_witness_table: vwt,
            metadata: TypeMetadata {
                kind: MetadataKind::STRUCT,
                type_descriptor: std::ptr::null(),
            },
        }));
        &full.metadata
    }

    #[test]
    fn test_wrap_rejects_pod_non_takable_flags() {
        let corrupt =
            ValueWitnessFlags(7).with(ValueWitnessFlags::IS_NON_BITWISE_TAKABLE);
        let err = unsafe { SwiftType::from_metadata(fake_metadata(corrupt), "s5Int64V") }
            .unwrap_err();
        assert!(matches!(err, InteropError::AbiMismatch { .. }));
        assert!(err.to_string().contains("bitwise takable"));

        // Non-POD types may legitimately be non-bitwise-takable.
        let weak_holder = ValueWitnessFlags(7)
            .with(ValueWitnessFlags::IS_NON_POD)
            .with(ValueWitnessFlags::IS_NON_BITWISE_TAKABLE);
        let ty = unsafe { SwiftType::from_metadata(fake_metadata(weak_holder), "s5Int64V") }
            .unwrap();
        assert!(!ty.is_pod());
    }
}
