//! Swift metadata ABI records.
//!
//! This crate defines the raw, `#[repr(C)]` shapes of the Swift runtime's
//! type-metadata format: value witness tables, type metadata, context and
//! nominal-type descriptors, reflection field descriptors, and protocol
//! conformance records, together with the relative-pointer encoding and the
//! symbol name mangling that tie them together.
//!
//! # Design
//!
//! - Every record here is a wire format, not a convenience API. Field order,
//!   widths, and flag bit positions mirror the Swift runtime's published
//!   metadata layout exactly; a revision of that layout is a breaking change
//!   to this crate.
//! - Internal pointers inside metadata are **relative**: signed 32-bit byte
//!   offsets from the pointer's own storage location. Records are therefore
//!   address-sensitive and must not be moved after their pointers are set.
//! - Flags words are hand-rolled bit fields (mask constants plus accessor
//!   methods) rather than enum sets, because the runtime assigns meaning to
//!   individual bit planes within a single word.
//! - No allocation or I/O happens in this crate. Building and owning the
//!   records is the job of the runtime crate layered on top.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod conformance;
pub mod descriptor;
pub mod mangle;
pub mod metadata;
pub mod relative;

pub use conformance::{
    ConformanceFlags, GenericWitnessTable, ProtocolConformanceDescriptor, ProtocolWitnessTable,
    ResilientWitness, ResilientWitnessesHeader, TypeReferenceKind,
    WITNESS_TABLE_FIRST_REQUIREMENT_OFFSET,
};
pub use descriptor::{
    ContextDescriptor, ContextDescriptorFlags, ContextDescriptorKind, FieldDescriptor,
    FieldDescriptorKind, FieldRecord, FieldRecordFlags, ModuleDescriptor, NominalTypeDescriptor,
    ProtocolDescriptor, StructDescriptor,
};
pub use mangle::TypeCode;
pub use metadata::{
    DestroyFn, FullTypeMetadata, GetEnumTagFn, MetadataKind, StoreEnumTagFn, TransferFn,
    TupleElement, TupleTypeMetadata, TypeMetadata, ValueWitnessFlags, ValueWitnessTable,
};
pub use relative::{
    OffsetOverflow, RelativeIndirectablePointer, RelativePointer, SymbolicReference,
    SymbolicReferenceKind,
};
