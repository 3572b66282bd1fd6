//! Graftr: expose host-defined types to the Swift runtime as native values.
//!
//! The Swift runtime identifies every type by a metadata record. This crate
//! reads those records for real Swift types and fabricates byte-exact ones
//! for types the host defines, so the runtime moves, copies, reflects, and
//! dispatches host values exactly as it would its own.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                  Graftr                     │
//! │                                             │
//! │  swift_type  - type handles and witnesses   │
//! │  synth       - forged struct metadata       │
//! │  conformance - forged protocol conformances │
//! │  bridge      - reference-count bridging     │
//! │  registry    - one handle per host type     │
//! │                                             │
//! ├─────────────────────────────────────────────┤
//! │      ABI records (graftr-abi, no_std)       │
//! ├─────────────────────────────────────────────┤
//! │      libswiftCore via dynamic loading       │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Ownership across the boundary
//!
//! Swift structs are value types: the runtime copies and destroys them
//! through their value witness table. Host objects are reference types kept
//! alive by their owners. The [`bridge`] module counts every Swift-side
//! copy as a foreign reference and anchors the host object strongly while
//! any copy exists.

pub mod bridge;
pub mod conformance;
pub mod core_lib;
pub mod describe;
pub mod error;
pub mod generic;
pub mod library;
pub mod registry;
pub mod runtime;
pub mod swift_type;
pub mod synth;

pub use bridge::{BridgeCell, HostValue, SwiftHandle, TaggedPtr};
pub use conformance::{
    ConformanceRequest, ProtocolConformance, RequirementWitness, Witness,
};
pub use core_lib::{swift_core, SwiftCore};
pub use describe::{describe, describe_synth, FieldDesc, TypeDesc};
pub use error::{InteropError, Result};
pub use generic::{instantiate_generic, optional_of, tuple_of};
pub use library::NativeLib;
pub use registry::{synth_type_of, SwiftBridged};
pub use runtime::{CoreRuntime, MetadataResponse};
pub use swift_type::{LayoutExpectation, SwiftType, TransferMode};
pub use synth::{SynthField, SynthType, SynthTypeBuilder};
