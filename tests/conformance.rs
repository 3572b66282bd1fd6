//! Conformance synthesis against the stub runtime: record wiring,
//! witness-table fixup, and registration.

mod common;

use std::ffi::c_void;

use graftr_abi::{
    ConformanceFlags, RelativePointer, TypeReferenceKind, WITNESS_TABLE_FIRST_REQUIREMENT_OFFSET,
};
use graftr::{
    ConformanceRequest, InteropError, ProtocolConformance, RequirementWitness, SynthType, Witness,
};

fn leaked_symbol() -> *const c_void {
    Box::leak(Box::new(0usize)) as *const usize as *const c_void
}

fn sample_type() -> SynthType {
    SynthType::builder("Demo", "Badge")
        .field("id", common::pod_u64_type())
        .build()
        .unwrap()
}

extern "C" fn method_impl() {}

#[test]
fn test_synthesize_fills_every_requirement_slot() {
    common::install_stub_runtime();
    let ty = sample_type();
    let protocol = common::fake_protocol(3);

    let associated = common::pod_u32_type();
    let requirements = [leaked_symbol(), leaked_symbol(), leaked_symbol()];
    let witnesses = [
        RequirementWitness {
            requirement: requirements[0],
            witness: Witness::AssociatedTypeMetadata(associated.metadata()),
        },
        RequirementWitness {
            requirement: requirements[1],
            witness: Witness::AssociatedConformance(std::ptr::null()),
        },
        RequirementWitness {
            requirement: requirements[2],
            witness: Witness::Function(method_impl as *const c_void),
        },
    ];

    let conformance = ProtocolConformance::synthesize(&ConformanceRequest {
        protocol,
        protocol_name: "Displayable",
        type_descriptor: ty.descriptor(),
        type_name: "Badge",
        metadata: ty.swift_type().metadata(),
        witnesses: &witnesses,
    })
    .unwrap();

    let table = conformance.witness_table();
    unsafe {
        assert_eq!(
            (*table).conformance as *const _,
            conformance.descriptor()
        );
        let first = WITNESS_TABLE_FIRST_REQUIREMENT_OFFSET;
        assert_eq!(
            (*table).witness(first) as usize,
            associated.metadata() as usize
        );
        assert!((*table).witness(first + 1).is_null());
        assert_eq!(
            (*table).witness(first + 2) as usize,
            method_impl as usize
        );
    }
}

#[test]
fn test_descriptor_flags_and_references() {
    common::install_stub_runtime();
    let ty = sample_type();
    let protocol = common::fake_protocol(1);

    let witnesses = [RequirementWitness {
        requirement: leaked_symbol(),
        witness: Witness::Function(method_impl as *const c_void),
    }];
    let conformance = ProtocolConformance::synthesize(&ConformanceRequest {
        protocol,
        protocol_name: "Displayable",
        type_descriptor: ty.descriptor(),
        type_name: "Badge",
        metadata: ty.swift_type().metadata(),
        witnesses: &witnesses,
    })
    .unwrap();

    unsafe {
        let descriptor = conformance.descriptor();
        let flags = (*descriptor).flags;
        assert_eq!(
            flags.type_reference_kind(),
            TypeReferenceKind::IndirectTypeDescriptor as u32
        );
        assert!(flags.contains(ConformanceFlags::HAS_RESILIENT_WITNESSES));
        assert!(flags.contains(ConformanceFlags::HAS_GENERIC_WITNESS_TABLE));
        assert!(!flags.contains(ConformanceFlags::IS_RETROACTIVE));

        assert_eq!(
            (*descriptor).protocol.target() as *const _,
            protocol
        );
        // Indirect reference: the relative pointer lands on a slot holding
        // the descriptor address.
        let slot = (*descriptor).type_descriptor.target() as *const usize;
        assert_eq!(*slot, ty.descriptor() as usize);
    }
}

#[test]
fn test_record_is_registered_with_runtime() {
    common::install_stub_runtime();
    let ty = sample_type();
    let protocol = common::fake_protocol(1);

    let witnesses = [RequirementWitness {
        requirement: leaked_symbol(),
        witness: Witness::Function(method_impl as *const c_void),
    }];
    let conformance = ProtocolConformance::synthesize(&ConformanceRequest {
        protocol,
        protocol_name: "Equatable",
        type_descriptor: ty.descriptor(),
        type_name: "Badge",
        metadata: ty.swift_type().metadata(),
        witnesses: &witnesses,
    })
    .unwrap();

    let ranges = common::REGISTERED_RANGES.lock().unwrap().clone();
    let ours = ranges
        .iter()
        .find(|(begin, _)| unsafe {
            let record = *begin as *const RelativePointer;
            (*record).target() as *const _ == conformance.descriptor()
        })
        .copied()
        .expect("record range was registered");
    assert_eq!(ours.1 - ours.0, std::mem::size_of::<RelativePointer>());
}

#[test]
fn test_unplaced_witness_is_an_error() {
    common::install_stub_runtime();
    let ty = sample_type();
    // One requirement slot, two supplied witnesses: the second placeholder
    // never lands in the table.
    let protocol = common::fake_protocol(1);

    let witnesses = [
        RequirementWitness {
            requirement: leaked_symbol(),
            witness: Witness::Function(method_impl as *const c_void),
        },
        RequirementWitness {
            requirement: leaked_symbol(),
            witness: Witness::Function(method_impl as *const c_void),
        },
    ];
    let err = ProtocolConformance::synthesize(&ConformanceRequest {
        protocol,
        protocol_name: "Displayable",
        type_descriptor: ty.descriptor(),
        type_name: "Badge",
        metadata: ty.swift_type().metadata(),
        witnesses: &witnesses,
    })
    .unwrap_err();

    match err {
        InteropError::IncompleteConformance {
            remaining,
            type_name,
            protocol,
        } => {
            assert_eq!(remaining, 1);
            assert_eq!(type_name, "Badge");
            assert_eq!(protocol, "Displayable");
        }
        other => panic!("unexpected error: {other}"),
    }
}
