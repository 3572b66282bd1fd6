//! Runtime-instantiated metadata: tuples, optionals, and bound generics.

use std::ffi::c_void;
use std::ptr;

use graftr_abi::mangle;
use graftr_abi::metadata::tuple_type_flags;
use graftr_abi::TypeMetadata;
use tracing::debug;

use crate::error::{InteropError, Result};
use crate::library::NativeLib;
use crate::runtime::{CoreRuntime, MetadataResponse};
use crate::swift_type::{SwiftType, TransferMode};

/// A blocking, complete metadata request.
const REQUEST_COMPLETE: usize = 0;

pub type MetadataAccessor0 = unsafe extern "C" fn(request: usize) -> MetadataResponse;
pub type MetadataAccessor1 =
    unsafe extern "C" fn(request: usize, a: *const TypeMetadata) -> MetadataResponse;
pub type MetadataAccessor2 = unsafe extern "C" fn(
    request: usize,
    a: *const TypeMetadata,
    b: *const TypeMetadata,
) -> MetadataResponse;
pub type MetadataAccessor3 = unsafe extern "C" fn(
    request: usize,
    a: *const TypeMetadata,
    b: *const TypeMetadata,
    c: *const TypeMetadata,
) -> MetadataResponse;

// ============================================================================
// Tuples
// ============================================================================

/// Instantiates the tuple of `elements`. A one-element tuple is the element
/// itself; the empty tuple is `()`.
pub fn tuple_of(elements: &[&SwiftType]) -> Result<SwiftType> {
    if let [single] = elements {
        return Ok((*single).clone());
    }
    let runtime = CoreRuntime::global()?;
    let metas: Vec<*const TypeMetadata> = elements.iter().map(|e| e.metadata()).collect();
    let response = unsafe {
        (runtime.get_tuple_type_metadata)(
            REQUEST_COMPLETE,
            tuple_type_flags(elements.len() as u16),
            metas.as_ptr(),
            ptr::null(),
            ptr::null(),
        )
    };
    if response.metadata.is_null() {
        return Err(InteropError::Unsupported(format!(
            "tuple instantiation of {} elements failed",
            elements.len()
        )));
    }
    let parts: Vec<&str> = elements.iter().map(|e| e.mangled_name()).collect();
    let mangled = mangle::mangle_tuple(&parts);
    debug!(target: "interop", tuple = mangled.as_str(), "instantiated tuple metadata");
    // Safety: the runtime returns process-lifetime metadata.
    unsafe { SwiftType::from_metadata(response.metadata, mangled) }
}

// ============================================================================
// Bound generics
// ============================================================================

/// Instantiates a bound generic type by calling its metadata accessor,
/// dispatched by arity. `base` is the mangled generic base, e.g. `Sq` for
/// `Optional` or `Sa` for `Array`.
pub fn instantiate_generic(
    library: &NativeLib,
    base: &str,
    args: &[&SwiftType],
) -> Result<SwiftType> {
    let symbol = mangle::metadata_accessor_symbol(base);
    let accessor = library.require_symbol(&symbol)?;
    // Safety: a `...Ma` symbol is the metadata accessor of the matching
    // arity; the argument metadata pointers are live.
    let response = unsafe {
        match args {
            [] => std::mem::transmute::<*mut c_void, MetadataAccessor0>(accessor)(REQUEST_COMPLETE),
            [a] => std::mem::transmute::<*mut c_void, MetadataAccessor1>(accessor)(
                REQUEST_COMPLETE,
                a.metadata(),
            ),
            [a, b] => std::mem::transmute::<*mut c_void, MetadataAccessor2>(accessor)(
                REQUEST_COMPLETE,
                a.metadata(),
                b.metadata(),
            ),
            [a, b, c] => std::mem::transmute::<*mut c_void, MetadataAccessor3>(accessor)(
                REQUEST_COMPLETE,
                a.metadata(),
                b.metadata(),
                c.metadata(),
            ),
            _ => {
                return Err(InteropError::Unsupported(format!(
                    "generic arity {} (accessors are dispatched up to 3 arguments)",
                    args.len()
                )))
            }
        }
    };
    if response.metadata.is_null() {
        return Err(InteropError::Unsupported(format!(
            "metadata accessor `{symbol}` returned no metadata"
        )));
    }
    let parts: Vec<&str> = args.iter().map(|a| a.mangled_name()).collect();
    let mangled = mangle::mangle_generic(base, &parts);
    debug!(target: "interop", generic = mangled.as_str(), "instantiated generic metadata");
    unsafe { SwiftType::from_metadata(response.metadata, mangled) }
}

// ============================================================================
// Optionals
// ============================================================================

/// Tag of the payload case of `Optional`.
pub const OPTIONAL_TAG_SOME: u32 = 0;
/// Tag of the `.none` case.
pub const OPTIONAL_TAG_NONE: u32 = 1;
/// `Optional` has a single empty case.
pub const OPTIONAL_EMPTY_CASES: u32 = 1;

/// Instantiates `Optional<wrapped>`.
pub fn optional_of(library: &NativeLib, wrapped: &SwiftType) -> Result<SwiftType> {
    instantiate_generic(library, "Sq", &[wrapped])
}

/// Writes `.some(src)` into `dest`, which must be sized for the optional's
/// single-payload layout.
///
/// # Safety
/// `dest` must be valid uninitialized optional storage and `src` a live
/// value of the wrapped type.
pub unsafe fn store_optional_some(
    wrapped: &SwiftType,
    dest: *mut c_void,
    src: *mut c_void,
) -> Result<()> {
    wrapped.transfer(dest, src, TransferMode::InitWithCopy)?;
    wrapped.store_enum_tag(dest, OPTIONAL_TAG_SOME, OPTIONAL_EMPTY_CASES)
}

/// Writes `.none` into `dest`.
///
/// # Safety
/// `dest` must be valid uninitialized optional storage.
pub unsafe fn store_optional_none(wrapped: &SwiftType, dest: *mut c_void) -> Result<()> {
    wrapped.store_enum_tag(dest, OPTIONAL_TAG_NONE, OPTIONAL_EMPTY_CASES)
}

/// Reads the case tag out of an optional value; [`OPTIONAL_TAG_SOME`] means
/// the payload is present.
///
/// # Safety
/// `value` must hold an initialized optional of the wrapped type.
pub unsafe fn read_optional_tag(wrapped: &SwiftType, value: *const c_void) -> Result<u32> {
    wrapped.get_enum_tag(value, OPTIONAL_EMPTY_CASES)
}
