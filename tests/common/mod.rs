//! Shared fixtures: leaked metadata records standing in for real Swift
//! types, and stub runtime entry points that mimic the witness-table
//! instantiation and conformance registration protocol.

#![allow(dead_code)]

use std::ffi::{c_char, c_void};
use std::sync::atomic::{AtomicIsize, Ordering};
use std::sync::Mutex;

use graftr_abi::metadata::{DestroyFn, TransferFn};
use graftr_abi::{
    FullTypeMetadata, MetadataKind, ProtocolConformanceDescriptor, ProtocolDescriptor,
    ProtocolWitnessTable, ResilientWitness, ResilientWitnessesHeader, TupleElement, TypeMetadata,
    ValueWitnessFlags, ValueWitnessTable,
};
use graftr::runtime::{CoreRuntime, MetadataResponse};
use graftr::SwiftType;

// ============================================================================
// Leaked metadata fixtures
// ============================================================================

fn leak_type(vwt: ValueWitnessTable, kind: MetadataKind, mangled: &str) -> SwiftType {
    let vwt: &'static ValueWitnessTable = Box::leak(Box::new(vwt));
    let full: &'static FullTypeMetadata = Box::leak(Box::new(FullTypeMetadata {
        value_witness_table: vwt,
        metadata: TypeMetadata {
            kind,
            type_descriptor: std::ptr::null(),
        },
    }));
    unsafe { SwiftType::from_metadata(&full.metadata, mangled).unwrap() }
}

fn empty_vwt(size: usize, alignment: u32, flags: u32) -> ValueWitnessTable {
    ValueWitnessTable {
        init_buffer_with_copy: None,
        destroy: None,
        init_with_copy: None,
        assign_with_copy: None,
        init_with_take: None,
        assign_with_take: None,
        get_enum_tag_single_payload: None,
        store_enum_tag_single_payload: None,
        size,
        stride: size.max(1),
        flags: ValueWitnessFlags(alignment - 1).with(flags),
        extra_inhabitant_count: 0,
    }
}

/// An 8-byte POD type, transferable by raw byte copy.
pub fn pod_u64_type() -> SwiftType {
    leak_type(empty_vwt(8, 8, 0), MetadataKind::STRUCT, "s5Int64V")
}

/// A 4-byte POD type.
pub fn pod_u32_type() -> SwiftType {
    leak_type(empty_vwt(4, 4, 0), MetadataKind::STRUCT, "s5Int32V")
}

// ============================================================================
// A counting non-POD type
// ============================================================================

/// Net live values of the counting type: inits increment, destroys
/// decrement, moves are neutral.
pub static LIVE_VALUES: AtomicIsize = AtomicIsize::new(0);

/// Number of `initializeWithTake` invocations on the counting type, for
/// asserting that moves are witness calls rather than byte copies.
pub static TAKE_CALLS: AtomicIsize = AtomicIsize::new(0);

static COUNTING: Mutex<()> = Mutex::new(());

/// Serializes tests that assert on [`LIVE_VALUES`], which the test harness
/// would otherwise interleave.
pub fn counting_lock() -> std::sync::MutexGuard<'static, ()> {
    COUNTING.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

unsafe extern "C" fn counting_init(
    dest: *mut c_void,
    src: *mut c_void,
    _metadata: *const TypeMetadata,
) -> *mut c_void {
    std::ptr::copy_nonoverlapping(src as *const u8, dest as *mut u8, 8);
    LIVE_VALUES.fetch_add(1, Ordering::SeqCst);
    dest
}

unsafe extern "C" fn counting_assign(
    dest: *mut c_void,
    src: *mut c_void,
    _metadata: *const TypeMetadata,
) -> *mut c_void {
    // Old dest dies, new copy born: net zero.
    std::ptr::copy_nonoverlapping(src as *const u8, dest as *mut u8, 8);
    dest
}

unsafe extern "C" fn counting_take(
    dest: *mut c_void,
    src: *mut c_void,
    _metadata: *const TypeMetadata,
) -> *mut c_void {
    std::ptr::copy_nonoverlapping(src as *const u8, dest as *mut u8, 8);
    TAKE_CALLS.fetch_add(1, Ordering::SeqCst);
    dest
}

unsafe extern "C" fn counting_assign_take(
    dest: *mut c_void,
    src: *mut c_void,
    _metadata: *const TypeMetadata,
) -> *mut c_void {
    std::ptr::copy_nonoverlapping(src as *const u8, dest as *mut u8, 8);
    LIVE_VALUES.fetch_sub(1, Ordering::SeqCst);
    dest
}

unsafe extern "C" fn counting_destroy(_object: *mut c_void, _metadata: *const TypeMetadata) {
    LIVE_VALUES.fetch_sub(1, Ordering::SeqCst);
}

/// An 8-byte non-POD type whose witnesses track the live value count in
/// [`LIVE_VALUES`].
pub fn counting_type() -> SwiftType {
    let mut vwt = empty_vwt(8, 8, ValueWitnessFlags::IS_NON_POD);
    vwt.init_buffer_with_copy = Some(counting_init as TransferFn);
    vwt.init_with_copy = Some(counting_init as TransferFn);
    vwt.assign_with_copy = Some(counting_assign as TransferFn);
    vwt.init_with_take = Some(counting_take as TransferFn);
    vwt.assign_with_take = Some(counting_assign_take as TransferFn);
    vwt.destroy = Some(counting_destroy as DestroyFn);
    leak_type(vwt, MetadataKind::STRUCT, "4Test8CountedV")
}

// ============================================================================
// Stub runtime entry points
// ============================================================================

/// Conformance record ranges handed to the stub registration entry point.
pub static REGISTERED_RANGES: Mutex<Vec<(usize, usize)>> = Mutex::new(Vec::new());

unsafe extern "C" fn stub_conforms_to_protocol(
    _metadata: *const TypeMetadata,
    _protocol: *const ProtocolDescriptor,
) -> *const ProtocolWitnessTable {
    std::ptr::null()
}

/// Mimics the runtime: builds a table of `1 + num_requirements` words with
/// the descriptor in slot 0 and, per resilient witness entry, the entry's
/// witness pointer copied verbatim into the next free requirement slot.
unsafe extern "C" fn stub_get_witness_table(
    conformance: *const ProtocolConformanceDescriptor,
    _metadata: *const TypeMetadata,
    _instantiation_args: *const c_void,
) -> *const ProtocolWitnessTable {
    let protocol = (*conformance).protocol.target() as *const ProtocolDescriptor;
    let requirements = (*protocol).num_requirements as usize;

    let header =
        (conformance as *const u8).add(std::mem::size_of::<ProtocolConformanceDescriptor>())
            as *const ResilientWitnessesHeader;
    let num_witnesses = (*header).num_witnesses as usize;
    let witnesses = (header as *const u8).add(std::mem::size_of::<ResilientWitnessesHeader>())
        as *const ResilientWitness;

    let mut table: Vec<usize> = vec![0; 1 + requirements];
    table[0] = conformance as usize;
    for i in 0..num_witnesses.min(requirements) {
        table[1 + i] = (*witnesses.add(i)).witness.target() as usize;
    }
    Box::leak(table.into_boxed_slice()).as_ptr() as *const ProtocolWitnessTable
}

unsafe extern "C" fn stub_register_conformances(begin: *const c_void, end: *const c_void) {
    REGISTERED_RANGES
        .lock()
        .unwrap()
        .push((begin as usize, end as usize));
}

/// Instantiates tuple metadata the way the runtime would: naturally aligned
/// element offsets, POD witnesses.
unsafe extern "C" fn stub_get_tuple_type_metadata(
    _request: usize,
    flags: usize,
    elements: *const *const TypeMetadata,
    _labels: *const c_char,
    _proposed_witnesses: *const ValueWitnessTable,
) -> MetadataResponse {
    let count = flags & 0xFFFF;

    let mut offset = 0usize;
    let mut alignment = 1usize;
    let mut offsets = Vec::with_capacity(count);
    for i in 0..count {
        let element = *elements.add(i);
        let ty = SwiftType::from_metadata(element, "").unwrap();
        let align = ty.alignment();
        alignment = alignment.max(align);
        offset = (offset + align - 1) & !(align - 1);
        offsets.push(offset);
        offset += ty.size();
    }
    let size = offset;

    let vwt: &'static ValueWitnessTable =
        Box::leak(Box::new(empty_vwt(size, alignment as u32, 0)));

    // [vwt ptr][kind][num_elements][labels][elements...]
    let words = 4 + count * 2;
    let mut block: Vec<usize> = vec![0; words];
    block[0] = vwt as *const ValueWitnessTable as usize;
    block[1] = MetadataKind::TUPLE.0;
    block[2] = count;
    let block: &'static mut [usize] = Box::leak(block.into_boxed_slice());
    for i in 0..count {
        let element = &mut block[4 + i * 2] as *mut usize as *mut TupleElement;
        (*element).metadata = *elements.add(i);
        (*element).offset = offsets[i];
    }
    MetadataResponse {
        metadata: &block[1] as *const usize as *const TypeMetadata,
        state: 0,
    }
}

/// Installs the stub entry points. Each integration test binary is its own
/// process, so the stubs never collide with a real runtime.
pub fn install_stub_runtime() -> &'static CoreRuntime {
    CoreRuntime::install(CoreRuntime {
        conforms_to_protocol: stub_conforms_to_protocol,
        get_witness_table: stub_get_witness_table,
        register_protocol_conformances: stub_register_conformances,
        get_tuple_type_metadata: stub_get_tuple_type_metadata,
    })
}

/// A leaked stand-in protocol descriptor with the given requirement count.
pub fn fake_protocol(num_requirements: u32) -> *const ProtocolDescriptor {
    let descriptor: &'static mut ProtocolDescriptor =
        Box::leak(Box::new(unsafe { std::mem::zeroed() }));
    descriptor.num_requirements = num_requirements;
    descriptor
}
