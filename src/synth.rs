//! Metadata synthesis for host-defined struct types.
//!
//! A [`SynthType`] fabricates the full metadata record the Swift runtime
//! expects of a native struct: value witness table, kind word, context
//! descriptor chain, reflection field records, and field offset vector.
//! Everything lives in two address-stable allocations:
//!
//! ```text
//! metadata block    [witness table][vwt ptr][kind][descriptor][extra
//!                    metadata slots][state back-ref][field offset vector]
//! descriptor block  [module desc][module name][struct desc][type name]
//!                   [field desc][field records][mangled names][field names]
//! ```
//!
//! The witness functions are shared trampolines: they recover the owning
//! [`SynthState`] through the slot just before the field offset vector and
//! forward to per-field transfer and destroy.

use std::alloc::{self, Layout};
use std::ffi::c_void;
use std::mem::size_of;
use std::ptr;

use graftr_abi::mangle::{self, TypeCode};
use graftr_abi::{
    ContextDescriptorFlags, ContextDescriptorKind, FieldDescriptor, FieldDescriptorKind,
    FieldRecord, FieldRecordFlags, FullTypeMetadata, MetadataKind, ModuleDescriptor,
    NominalTypeDescriptor, StructDescriptor, TypeMetadata, ValueWitnessFlags, ValueWitnessTable,
};
use tracing::{debug, error};

use crate::bridge::BridgeCell;
use crate::error::{InteropError, Result};
use crate::swift_type::{SwiftType, TransferMode};

// ============================================================================
// Raw allocations
// ============================================================================

/// An owned, zero-initialized, address-stable allocation.
#[derive(Debug)]
pub(crate) struct RawBlock {
    ptr: *mut u8,
    layout: Layout,
}

// The block is exclusively owned; sharing of its contents is governed by
// the types built on top.
unsafe impl Send for RawBlock {}
unsafe impl Sync for RawBlock {}

impl RawBlock {
    pub(crate) fn zeroed(size: usize, align: usize) -> Result<RawBlock> {
        let layout = Layout::from_size_align(size.max(1), align)
            .map_err(|_| InteropError::AllocationFailed { size })?;
        // Safety: layout has non-zero size.
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        if ptr.is_null() {
            return Err(InteropError::AllocationFailed { size });
        }
        Ok(RawBlock { ptr, layout })
    }

    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }
}

impl Drop for RawBlock {
    fn drop(&mut self) {
        // Safety: allocated with this exact layout, freed once.
        unsafe { alloc::dealloc(self.ptr, self.layout) }
    }
}

// ============================================================================
// Builder
// ============================================================================

/// One native field of a synthesized type.
pub struct SynthField {
    name: String,
    ty: SwiftType,
    offset: usize,
}

impl SynthField {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> &SwiftType {
        &self.ty
    }

    /// Byte offset inside the native value.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

/// Builder for a [`SynthType`].
pub struct SynthTypeBuilder {
    module: String,
    name: String,
    instance_header: bool,
    extra_metadata_slots: usize,
    fields: Vec<(String, SwiftType)>,
}

impl SynthTypeBuilder {
    pub fn new(module: &str, name: &str) -> SynthTypeBuilder {
        SynthTypeBuilder {
            module: module.to_owned(),
            name: name.to_owned(),
            instance_header: false,
            extra_metadata_slots: 0,
            fields: Vec::new(),
        }
    }

    /// Reserves a leading pointer-sized slot in the native value for a
    /// [`BridgeCell`] reference, making values of this type participate in
    /// host reference counting. Forces the type to be non-POD.
    pub fn with_instance_header(mut self) -> Self {
        self.instance_header = true;
        self
    }

    /// Reserves extra pointer slots after the metadata record proper, for
    /// callers that pattern this type against generic metadata.
    pub fn with_extra_metadata_slots(mut self, slots: usize) -> Self {
        self.extra_metadata_slots = slots;
        self
    }

    pub fn field(mut self, name: &str, ty: SwiftType) -> Self {
        self.fields.push((name.to_owned(), ty));
        self
    }

    pub fn build(self) -> Result<SynthType> {
        let module = sanitize(&self.module)?;
        let name = sanitize(&self.name)?;

        let header = if self.instance_header {
            size_of::<*const c_void>()
        } else {
            0
        };
        let mut alignment = if self.instance_header { header } else { 1 };
        let mut non_pod = self.instance_header;
        let mut offset = header;
        let mut fields = Vec::with_capacity(self.fields.len());
        for (field_name, ty) in self.fields {
            alignment = alignment.max(ty.alignment());
            non_pod |= !ty.is_pod();
            let size = ty.size();
            // TODO: pad `offset` up to the field's alignment; fields are
            // packed for now and hosts lay their accessors out to match.
            fields.push(SynthField {
                name: field_name,
                ty,
                offset,
            });
            offset += size;
        }
        let size = offset;

        let metadata_block =
            build_metadata_block(size, alignment, non_pod, self.extra_metadata_slots, &fields)?;
        let metadata_ptr = unsafe {
            metadata_block
                .as_ptr()
                .add(size_of::<ValueWitnessTable>() + size_of::<*const c_void>())
                as *const TypeMetadata
        };

        let descriptor_block = build_descriptor_block(
            &module,
            &name,
            &fields,
            field_offset_vector_offset(self.extra_metadata_slots),
        )?;
        let descriptor =
            unsafe { struct_descriptor_in(descriptor_block.as_ptr(), &module) as *const NominalTypeDescriptor };
        unsafe {
            (*(metadata_ptr as *mut TypeMetadata)).type_descriptor = descriptor;
        }

        let mangled = mangle::mangle_nominal(&module, &name, TypeCode::Struct);
        // Safety: both blocks are fully populated and address-stable.
        let ty = unsafe { SwiftType::from_metadata_symbolic(metadata_ptr, mangled)? };

        let synth = SynthType {
            ty,
            state: Box::new(SynthState {
                fields,
                has_header: self.instance_header,
                size,
            }),
            metadata_block,
            descriptor_block,
            extra_slots: self.extra_metadata_slots,
        };
        // The back-ref slot sits one word before the field offset vector and
        // lets the witness trampolines find their state again.
        unsafe {
            let slot = (metadata_ptr as *mut usize)
                .add(field_offset_vector_offset(synth.extra_slots) as usize - 1);
            *slot = &*synth.state as *const SynthState as usize;
        }

        debug!(
            target: "interop",
            ty = synth.ty.mangled_name(),
            size,
            fields = synth.state.fields.len(),
            "synthesized struct metadata"
        );
        Ok(synth)
    }
}

fn sanitize(name: &str) -> Result<String> {
    let cleaned: String = name.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    if cleaned.is_empty() {
        return Err(InteropError::Unsupported(format!(
            "`{name}` contains no ASCII identifier characters"
        )));
    }
    Ok(cleaned)
}

/// Words from the metadata pointer to the field offset vector: kind,
/// descriptor, the extra slots, and the state back-ref.
fn field_offset_vector_offset(extra_slots: usize) -> u32 {
    (3 + extra_slots) as u32
}

fn align4(offset: usize) -> usize {
    (offset + 3) & !3
}

fn build_metadata_block(
    size: usize,
    alignment: usize,
    non_pod: bool,
    extra_slots: usize,
    fields: &[SynthField],
) -> Result<RawBlock> {
    let vwt_bytes = size_of::<ValueWitnessTable>();
    let words = 3 + extra_slots;
    let total = vwt_bytes + size_of::<*const c_void>() + words * size_of::<usize>()
        + fields.len() * size_of::<i32>();
    let block = RawBlock::zeroed(total, 16)?;

    // Safety: the block is freshly allocated with room for every record
    // written below.
    unsafe {
        let vwt = block.as_ptr() as *mut ValueWitnessTable;
        (*vwt).init_buffer_with_copy = Some(init_with_copy_witness);
        (*vwt).destroy = Some(destroy_witness);
        (*vwt).init_with_copy = Some(init_with_copy_witness);
        (*vwt).assign_with_copy = Some(assign_with_copy_witness);
        (*vwt).init_with_take = Some(init_with_take_witness);
        (*vwt).assign_with_take = Some(assign_with_take_witness);
        (*vwt).size = size;
        (*vwt).stride = size.max(1);
        let mut flags = ValueWitnessFlags((alignment - 1) as u32);
        if non_pod {
            flags = flags.with(ValueWitnessFlags::IS_NON_POD);
        }
        (*vwt).flags = flags;
        (*vwt).extra_inhabitant_count = 0;

        let full = block.as_ptr().add(vwt_bytes) as *mut FullTypeMetadata;
        (*full).value_witness_table = vwt;
        (*full).metadata.kind = MetadataKind::STRUCT;
        // type_descriptor is patched in once the descriptor block exists.

        let metadata = &(*full).metadata as *const TypeMetadata;
        let vector = (metadata as *mut u8).add(words * size_of::<usize>()) as *mut i32;
        for (i, field) in fields.iter().enumerate() {
            *vector.add(i) = field.offset as i32;
        }
    }
    Ok(block)
}

/// Address of the struct descriptor inside a descriptor block laid out by
/// [`build_descriptor_block`] for the given module name.
unsafe fn struct_descriptor_in(base: *mut u8, module: &str) -> *mut StructDescriptor {
    base.add(align4(size_of::<ModuleDescriptor>() + module.len() + 1)) as *mut StructDescriptor
}

fn build_descriptor_block(
    module: &str,
    name: &str,
    fields: &[SynthField],
    field_offset_vector_offset: u32,
) -> Result<RawBlock> {
    let struct_off = align4(size_of::<ModuleDescriptor>() + module.len() + 1);
    let name_off = struct_off + size_of::<StructDescriptor>();
    let field_desc_off = align4(name_off + name.len() + 1);
    let records_off = field_desc_off + size_of::<FieldDescriptor>();
    let mangled_off = records_off + fields.len() * size_of::<FieldRecord>();
    let mangled_total: usize = fields.iter().map(|f| f.ty.mangled_encoding_len()).sum();
    let names_off = mangled_off + mangled_total;
    let names_total: usize = fields.iter().map(|f| f.name.len() + 1).sum();
    let block = RawBlock::zeroed(names_off + names_total, 8)?;

    // Safety: every offset above is inside the allocation, and the records
    // written through them are 4-byte aligned.
    unsafe {
        let base = block.as_ptr();

        let module_desc = base as *mut ModuleDescriptor;
        (*module_desc).context.flags = ContextDescriptorFlags::new(ContextDescriptorKind::Module);
        let module_name = base.add(size_of::<ModuleDescriptor>());
        ptr::copy_nonoverlapping(module.as_ptr(), module_name, module.len());
        (*module_desc).name.set_target(module_name as *const c_void)?;

        let desc = base.add(struct_off) as *mut StructDescriptor;
        (*desc).nominal_type.context.flags =
            ContextDescriptorFlags::new(ContextDescriptorKind::Struct)
                .with(ContextDescriptorFlags::IS_UNIQUE);
        (*desc)
            .nominal_type
            .context
            .parent
            .set_target(module_desc as *const c_void, false)?;
        let type_name = base.add(name_off);
        ptr::copy_nonoverlapping(name.as_ptr(), type_name, name.len());
        (*desc).nominal_type.name.set_target(type_name as *const c_void)?;
        // No metadata access function: host function addresses are not
        // guaranteed reachable by a 32-bit offset from this block.
        (*desc).num_fields = fields.len() as i32;
        (*desc).field_offset_vector_offset = field_offset_vector_offset;

        // Even with no fields, a present field descriptor marks the type as
        // reflectable.
        let field_desc = base.add(field_desc_off) as *mut FieldDescriptor;
        (*desc)
            .nominal_type
            .fields
            .set_target(field_desc as *const c_void)?;
        (*field_desc).kind = FieldDescriptorKind::Struct;
        (*field_desc).field_record_size = size_of::<FieldRecord>() as u16;
        (*field_desc).num_fields = fields.len() as u32;

        let mut mangled_cursor = base.add(mangled_off);
        let mut name_cursor = base.add(names_off);
        for (i, field) in fields.iter().enumerate() {
            let record = base.add(records_off + i * size_of::<FieldRecord>()) as *mut FieldRecord;
            (*record).flags = FieldRecordFlags::default().with(FieldRecordFlags::IS_VAR);
            (*record)
                .mangled_type_name
                .set_target(mangled_cursor as *const c_void)?;
            field.ty.write_mangled_name(mangled_cursor)?;
            mangled_cursor = mangled_cursor.add(field.ty.mangled_encoding_len());

            (*record).field_name.set_target(name_cursor as *const c_void)?;
            ptr::copy_nonoverlapping(field.name.as_ptr(), name_cursor, field.name.len());
            name_cursor = name_cursor.add(field.name.len() + 1);
        }
    }
    Ok(block)
}

// ============================================================================
// Synthesized type handle
// ============================================================================

/// Transfer and destroy state shared by the witness trampolines.
pub(crate) struct SynthState {
    fields: Vec<SynthField>,
    has_header: bool,
    size: usize,
}

impl SynthState {
    unsafe fn retain_header(&self, value: *const u8) {
        if !self.has_header {
            return;
        }
        let cell = *(value as *const *const BridgeCell);
        if !cell.is_null() {
            BridgeCell::retain_raw(cell);
        }
    }

    unsafe fn release_header(&self, value: *const u8) {
        if !self.has_header {
            return;
        }
        let cell = *(value as *const *const BridgeCell);
        if !cell.is_null() {
            BridgeCell::release_raw(cell);
        }
    }

    unsafe fn transfer_fields(&self, dest: *mut u8, src: *mut u8, mode: TransferMode) {
        if self.has_header {
            *(dest as *mut usize) = *(src as *const usize);
        }
        for field in &self.fields {
            let result = field.ty.transfer(
                dest.add(field.offset) as *mut c_void,
                src.add(field.offset) as *mut c_void,
                mode,
            );
            if let Err(err) = result {
                error!(target: "interop", field = field.name.as_str(), error = %err, "field transfer failed");
            }
        }
    }

    unsafe fn transfer(&self, dest: *mut u8, src: *mut u8, mode: TransferMode) {
        match mode {
            // Takes move the header reference without touching the count
            // and go through each field's own take witness, since a field
            // type need not be bitwise takable.
            TransferMode::InitWithTake => {
                self.transfer_fields(dest, src, TransferMode::InitWithTake);
            }
            TransferMode::AssignWithTake => {
                if dest as *const u8 != src as *const u8 {
                    self.destroy_value(dest);
                    self.transfer_fields(dest, src, TransferMode::InitWithTake);
                }
            }
            TransferMode::InitBufferWithCopy | TransferMode::InitWithCopy => {
                self.retain_header(src);
                self.transfer_fields(dest, src, TransferMode::InitWithCopy);
            }
            TransferMode::AssignWithCopy => {
                // Retain before release so self-assignment stays balanced.
                self.retain_header(src);
                self.release_header(dest);
                self.transfer_fields(dest, src, TransferMode::AssignWithCopy);
            }
        }
    }

    /// Destroys field values without touching the header. The wrapper that
    /// owns the initial data block holds no foreign reference, so its
    /// teardown must not decrement the count.
    pub(crate) unsafe fn destroy_fields(&self, data: *mut u8) {
        for field in &self.fields {
            if let Err(err) = field.ty.destroy(data.add(field.offset) as *mut c_void) {
                error!(target: "interop", field = field.name.as_str(), error = %err, "field destroy failed");
            }
        }
    }

    unsafe fn destroy_value(&self, data: *mut u8) {
        self.destroy_fields(data);
        self.release_header(data);
    }
}

/// A fully synthesized struct type.
///
/// The handle owns the metadata the Swift runtime sees; once any value of
/// the type has been handed across the boundary the handle must stay alive
/// for the rest of the process, which the type registry guarantees.
pub struct SynthType {
    ty: SwiftType,
    state: Box<SynthState>,
    metadata_block: RawBlock,
    descriptor_block: RawBlock,
    extra_slots: usize,
}

impl SynthType {
    pub fn builder(module: &str, name: &str) -> SynthTypeBuilder {
        SynthTypeBuilder::new(module, name)
    }

    pub fn swift_type(&self) -> &SwiftType {
        &self.ty
    }

    pub fn fields(&self) -> &[SynthField] {
        &self.state.fields
    }

    pub fn has_instance_header(&self) -> bool {
        self.state.has_header
    }

    /// Size of the native value, header included.
    pub fn size(&self) -> usize {
        self.state.size
    }

    pub fn descriptor(&self) -> *const NominalTypeDescriptor {
        // Patched in during build, never null afterwards.
        unsafe { (*self.ty.metadata()).type_descriptor }
    }

    pub fn extra_metadata_slots(&self) -> usize {
        self.extra_slots
    }

    /// Writes one of the reserved extra metadata slots.
    pub fn set_extra_metadata_slot(&self, index: usize, value: *const c_void) -> Result<()> {
        if index >= self.extra_slots {
            return Err(InteropError::Unsupported(format!(
                "extra metadata slot {index} out of {} reserved",
                self.extra_slots
            )));
        }
        // Safety: slot words were reserved in the metadata block.
        unsafe {
            let slot = (self.ty.metadata() as *mut usize).add(2 + index);
            *slot = value as usize;
        }
        Ok(())
    }

    pub(crate) fn state(&self) -> &SynthState {
        &self.state
    }

    #[cfg(test)]
    pub(crate) fn metadata_block_ptr(&self) -> *const u8 {
        self.metadata_block.as_ptr()
    }

    #[cfg(test)]
    pub(crate) fn descriptor_block_ptr(&self) -> *const u8 {
        self.descriptor_block.as_ptr()
    }
}

// ============================================================================
// Witness trampolines
// ============================================================================

unsafe fn state_of(metadata: *const TypeMetadata) -> &'static SynthState {
    debug_assert_eq!((*metadata).kind, MetadataKind::STRUCT);
    let descriptor = (*metadata).type_descriptor as *const StructDescriptor;
    let slot =
        (metadata as *const usize).add((*descriptor).field_offset_vector_offset as usize - 1);
    &*(*slot as *const SynthState)
}

unsafe extern "C" fn init_with_copy_witness(
    dest: *mut c_void,
    src: *mut c_void,
    metadata: *const TypeMetadata,
) -> *mut c_void {
    state_of(metadata).transfer(dest as *mut u8, src as *mut u8, TransferMode::InitWithCopy);
    dest
}

unsafe extern "C" fn assign_with_copy_witness(
    dest: *mut c_void,
    src: *mut c_void,
    metadata: *const TypeMetadata,
) -> *mut c_void {
    state_of(metadata).transfer(dest as *mut u8, src as *mut u8, TransferMode::AssignWithCopy);
    dest
}

unsafe extern "C" fn init_with_take_witness(
    dest: *mut c_void,
    src: *mut c_void,
    metadata: *const TypeMetadata,
) -> *mut c_void {
    state_of(metadata).transfer(dest as *mut u8, src as *mut u8, TransferMode::InitWithTake);
    dest
}

unsafe extern "C" fn assign_with_take_witness(
    dest: *mut c_void,
    src: *mut c_void,
    metadata: *const TypeMetadata,
) -> *mut c_void {
    state_of(metadata).transfer(dest as *mut u8, src as *mut u8, TransferMode::AssignWithTake);
    dest
}

unsafe extern "C" fn destroy_witness(object: *mut c_void, metadata: *const TypeMetadata) {
    state_of(metadata).destroy_value(object as *mut u8);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("My.App").unwrap(), "MyApp");
        assert_eq!(sanitize("Counter`1").unwrap(), "Counter1");
        assert!(sanitize("<>").is_err());
    }

    #[test]
    fn test_vector_offset_accounts_for_extra_slots() {
        assert_eq!(field_offset_vector_offset(0), 3);
        assert_eq!(field_offset_vector_offset(3), 6);
    }
}
