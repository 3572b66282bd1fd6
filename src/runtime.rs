//! Entry points into the Swift runtime.
//!
//! The four runtime functions the bridge depends on are resolved once and
//! installed process-wide. Tests install stub implementations instead of
//! loading a real runtime library.

use std::ffi::{c_char, c_void};
use std::sync::OnceLock;

use graftr_abi::{
    ProtocolConformanceDescriptor, ProtocolDescriptor, ProtocolWitnessTable, TypeMetadata,
    ValueWitnessTable,
};
use tracing::debug;

use crate::error::Result;
use crate::library::NativeLib;
use crate::InteropError;

/// Response of the runtime's metadata request functions.
#[repr(C)]
pub struct MetadataResponse {
    pub metadata: *const TypeMetadata,
    /// `MetadataState`; zero is complete.
    pub state: usize,
}

pub type ConformsToProtocolFn = unsafe extern "C" fn(
    metadata: *const TypeMetadata,
    protocol: *const ProtocolDescriptor,
) -> *const ProtocolWitnessTable;

pub type GetWitnessTableFn = unsafe extern "C" fn(
    conformance: *const ProtocolConformanceDescriptor,
    metadata: *const TypeMetadata,
    instantiation_args: *const c_void,
) -> *const ProtocolWitnessTable;

pub type RegisterConformancesFn =
    unsafe extern "C" fn(begin: *const c_void, end: *const c_void);

pub type GetTupleTypeMetadataFn = unsafe extern "C" fn(
    request: usize,
    flags: usize,
    elements: *const *const TypeMetadata,
    labels: *const c_char,
    proposed_witnesses: *const ValueWitnessTable,
) -> MetadataResponse;

/// The resolved runtime entry points.
pub struct CoreRuntime {
    pub conforms_to_protocol: ConformsToProtocolFn,
    pub get_witness_table: GetWitnessTableFn,
    pub register_protocol_conformances: RegisterConformancesFn,
    pub get_tuple_type_metadata: GetTupleTypeMetadataFn,
}

static RUNTIME: OnceLock<CoreRuntime> = OnceLock::new();

impl CoreRuntime {
    /// Resolves the entry points out of `library`.
    pub fn from_library(library: &NativeLib) -> Result<CoreRuntime> {
        // Safety: each symbol is the runtime function of the stated C
        // signature; the library stays open for the process lifetime.
        unsafe {
            Ok(CoreRuntime {
                conforms_to_protocol: std::mem::transmute::<*mut c_void, ConformsToProtocolFn>(
                    library.require_symbol("swift_conformsToProtocol")?,
                ),
                get_witness_table: std::mem::transmute::<*mut c_void, GetWitnessTableFn>(
                    library.require_symbol("swift_getWitnessTable")?,
                ),
                register_protocol_conformances: std::mem::transmute::<
                    *mut c_void,
                    RegisterConformancesFn,
                >(
                    library.require_symbol("swift_registerProtocolConformances")?
                ),
                get_tuple_type_metadata: std::mem::transmute::<*mut c_void, GetTupleTypeMetadataFn>(
                    library.require_symbol("swift_getTupleTypeMetadata")?,
                ),
            })
        }
    }

    /// Installs `runtime` as the process-wide entry points. The first
    /// install wins; later calls return the already-installed set.
    pub fn install(runtime: CoreRuntime) -> &'static CoreRuntime {
        let installed = RUNTIME.get_or_init(|| runtime);
        debug!(target: "interop", "runtime entry points installed");
        installed
    }

    /// The installed entry points, or [`InteropError::RuntimeNotLoaded`].
    pub fn global() -> Result<&'static CoreRuntime> {
        RUNTIME.get().ok_or(InteropError::RuntimeNotLoaded)
    }

    pub fn is_installed() -> bool {
        RUNTIME.get().is_some()
    }
}
