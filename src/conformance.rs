//! Synthesized protocol conformances.
//!
//! A conformance record built at runtime cannot use direct relative pointers
//! for most of its references: the protocol descriptor, the conforming type
//! descriptor, and the witness implementations all live in other allocations
//! or other images, with no ±2 GiB guarantee. The record therefore carries
//! its own pointer slots for everything indirectable, and the witnesses go
//! through a two-phase dance:
//!
//! 1. **Populate**: each resilient witness entry points at its own in-block
//!    requirement slot, a placeholder address the runtime will copy verbatim
//!    when it instantiates the witness table.
//! 2. **Fixup**: the instantiated table (which holds full-size pointers) is
//!    scanned, every slot still holding a placeholder is overwritten with
//!    the real witness, and the record is registered with the runtime.
//!
//! Both phases complete before the conformance is handed out, so no caller
//! ever observes a placeholder.

use std::ffi::c_void;
use std::mem::size_of;

use graftr_abi::{
    ConformanceFlags, GenericWitnessTable, NominalTypeDescriptor, ProtocolConformanceDescriptor,
    ProtocolDescriptor, ProtocolWitnessTable, RelativePointer, ResilientWitness,
    ResilientWitnessesHeader, TypeMetadata, TypeReferenceKind,
    WITNESS_TABLE_FIRST_REQUIREMENT_OFFSET,
};
use tracing::debug;

use crate::error::{InteropError, Result};
use crate::runtime::CoreRuntime;
use crate::synth::RawBlock;

/// A witness implementation for one protocol requirement.
pub enum Witness {
    /// Metadata satisfying an associated type requirement.
    AssociatedTypeMetadata(*const TypeMetadata),
    /// A witness table satisfying an associated conformance requirement.
    AssociatedConformance(*const ProtocolWitnessTable),
    /// A function implementing a method requirement.
    Function(*const c_void),
}

impl Witness {
    fn as_ptr(&self) -> *const c_void {
        match *self {
            Witness::AssociatedTypeMetadata(metadata) => metadata as *const c_void,
            Witness::AssociatedConformance(table) => table as *const c_void,
            Witness::Function(function) => function,
        }
    }
}

/// One resilient witness entry: the requirement descriptor symbol and the
/// implementation satisfying it.
pub struct RequirementWitness {
    pub requirement: *const c_void,
    pub witness: Witness,
}

/// Everything needed to declare one conformance.
pub struct ConformanceRequest<'a> {
    pub protocol: *const ProtocolDescriptor,
    pub protocol_name: &'a str,
    pub type_descriptor: *const NominalTypeDescriptor,
    pub type_name: &'a str,
    pub metadata: *const TypeMetadata,
    pub witnesses: &'a [RequirementWitness],
}

// Block layout, all in one allocation:
//   [record: RelativePointer -> descriptor][pad]
//   [pointer slots: protocol, type descriptor, one per requirement]
//   [ProtocolConformanceDescriptor]
//   [ResilientWitnessesHeader][ResilientWitness x n]
//   [GenericWitnessTable][private cache words]
const RECORD_OFFSET: usize = 0;
const SLOTS_OFFSET: usize = 8;

fn slot_offset(index: usize) -> usize {
    SLOTS_OFFSET + index * size_of::<*const c_void>()
}

fn descriptor_offset(num_witnesses: usize) -> usize {
    slot_offset(2 + num_witnesses)
}

fn header_offset(num_witnesses: usize) -> usize {
    descriptor_offset(num_witnesses) + size_of::<ProtocolConformanceDescriptor>()
}

fn witness_offset(num_witnesses: usize, index: usize) -> usize {
    header_offset(num_witnesses)
        + size_of::<ResilientWitnessesHeader>()
        + index * size_of::<ResilientWitness>()
}

fn cache_offset(num_witnesses: usize) -> usize {
    witness_offset(num_witnesses, num_witnesses) + size_of::<GenericWitnessTable>()
}

fn block_size(num_witnesses: usize) -> usize {
    cache_offset(num_witnesses)
        + GenericWitnessTable::NUM_PRIVATE_CACHE_WORDS * size_of::<usize>()
}

/// A registered conformance. Must stay alive for the rest of the process
/// once synthesized; the owning type handle guarantees that.
#[derive(Debug)]
pub struct ProtocolConformance {
    /// Keeps the record storage alive; registered records are read by the
    /// runtime for the rest of the process.
    _block: RawBlock,
    descriptor: *const ProtocolConformanceDescriptor,
    witness_table: *const ProtocolWitnessTable,
}

// The block is immutable after registration.
unsafe impl Send for ProtocolConformance {}
unsafe impl Sync for ProtocolConformance {}

impl ProtocolConformance {
    /// Builds, instantiates, fixes up, and registers the conformance.
    pub fn synthesize(request: &ConformanceRequest<'_>) -> Result<ProtocolConformance> {
        let runtime = CoreRuntime::global()?;
        let n = request.witnesses.len();
        let block = RawBlock::zeroed(block_size(n), 16)?;

        // Safety: all offsets are inside the allocation and every record
        // written through them is at least 4-byte aligned.
        unsafe {
            let base = block.as_ptr();
            let slots = base.add(SLOTS_OFFSET) as *mut *const c_void;
            *slots = request.protocol as *const c_void;
            *slots.add(1) = request.type_descriptor as *const c_void;
            for (i, entry) in request.witnesses.iter().enumerate() {
                *slots.add(2 + i) = entry.requirement;
            }

            let descriptor = base.add(descriptor_offset(n)) as *mut ProtocolConformanceDescriptor;
            (*descriptor)
                .protocol
                .set_target(slots as *const c_void, true)?;
            (*descriptor)
                .type_descriptor
                .set_target(slots.add(1) as *const c_void)?;
            // witness_table_pattern stays null; the generic witness table
            // drives instantiation.
            (*descriptor).flags = ConformanceFlags::new(TypeReferenceKind::IndirectTypeDescriptor)
                .with(ConformanceFlags::HAS_RESILIENT_WITNESSES)
                .with(ConformanceFlags::HAS_GENERIC_WITNESS_TABLE);

            let record = base.add(RECORD_OFFSET) as *mut RelativePointer;
            (*record).set_target(descriptor as *const c_void)?;

            (*(base.add(header_offset(n)) as *mut ResilientWitnessesHeader)).num_witnesses =
                n as u32;
            for i in 0..n {
                let witness = base.add(witness_offset(n, i)) as *mut ResilientWitness;
                let slot = slots.add(2 + i) as *const c_void;
                (*witness).requirement.set_target(slot, true)?;
                // Placeholder: the slot's own address marks this entry until
                // the fixup pass.
                (*witness).witness.set_target(slot)?;
            }

            let generic = base.add(witness_offset(n, n)) as *mut GenericWitnessTable;
            (*generic).witness_table_size_in_words = 0;
            (*generic).witness_table_private_size_in_words_and_requires_instantiation =
                GenericWitnessTable::private_size_and_requires_instantiation(0, true);
            (*generic)
                .private_data
                .set_target(base.add(cache_offset(n)) as *const c_void)?;

            let table = (runtime.get_witness_table)(
                descriptor,
                request.metadata,
                std::ptr::null(),
            );
            if table.is_null() {
                return Err(InteropError::Unsupported(format!(
                    "runtime returned no witness table for `{}: {}`",
                    request.type_name, request.protocol_name
                )));
            }

            fixup(request, table, slots)?;

            let begin = record as *const c_void;
            let end = record.add(1) as *const c_void;
            (runtime.register_protocol_conformances)(begin, end);

            debug!(
                target: "interop",
                ty = request.type_name,
                protocol = request.protocol_name,
                witnesses = n,
                "registered synthesized conformance"
            );
            Ok(ProtocolConformance {
                _block: block,
                descriptor,
                witness_table: table,
            })
        }
    }

    pub fn witness_table(&self) -> *const ProtocolWitnessTable {
        self.witness_table
    }

    pub fn descriptor(&self) -> *const ProtocolConformanceDescriptor {
        self.descriptor
    }
}

/// Replaces every placeholder the runtime copied into the instantiated
/// table with its real witness, failing if any supplied witness was never
/// placed.
unsafe fn fixup(
    request: &ConformanceRequest<'_>,
    table: *const ProtocolWitnessTable,
    slots: *const *const c_void,
) -> Result<()> {
    let table = &mut *(table as *mut ProtocolWitnessTable);
    let total = (*request.protocol).num_requirements as usize
        + WITNESS_TABLE_FIRST_REQUIREMENT_OFFSET;

    let mut placed = vec![false; request.witnesses.len()];
    for slot in WITNESS_TABLE_FIRST_REQUIREMENT_OFFSET..total {
        let current = table.witness(slot) as *const c_void;
        for (i, entry) in request.witnesses.iter().enumerate() {
            if current == slots.add(2 + i) as *const c_void {
                table.set_witness(slot, entry.witness.as_ptr() as *mut c_void);
                placed[i] = true;
            }
        }
    }

    let remaining = placed.iter().filter(|p| !**p).count();
    if remaining > 0 {
        return Err(InteropError::IncompleteConformance {
            type_name: request.type_name.to_owned(),
            protocol: request.protocol_name.to_owned(),
            remaining,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_layout_matches_handwritten_record() {
        // Three witnesses: record 4 + pad 4 + 5 slots + descriptor 16 +
        // header 4 + 3 * 8 + generic table 12 + 16 cache words.
        assert_eq!(descriptor_offset(3), 48);
        assert_eq!(header_offset(3), 64);
        assert_eq!(witness_offset(3, 0), 68);
        assert_eq!(cache_offset(3), 104);
        assert_eq!(block_size(3), 232);
        assert_eq!(cache_offset(3) % 8, 0);
    }
}
