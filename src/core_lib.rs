//! The Swift core library and its standard types.

use std::sync::OnceLock;

use graftr_abi::mangle::{self, TypeCode};
use graftr_abi::TypeMetadata;
use tracing::debug;

use crate::error::Result;
use crate::library::NativeLib;
use crate::runtime::CoreRuntime;
use crate::swift_type::SwiftType;

#[cfg(target_os = "macos")]
pub const DEFAULT_CORE_PATH: &str = "/usr/lib/swift/libswiftCore.dylib";
#[cfg(not(target_os = "macos"))]
pub const DEFAULT_CORE_PATH: &str = "libswiftCore.so";

static CORE: OnceLock<SwiftCore> = OnceLock::new();

/// An opened Swift core library with the runtime entry points installed and
/// the standard type handles resolvable by symbol.
pub struct SwiftCore {
    library: NativeLib,
    runtime: &'static CoreRuntime,
}

impl SwiftCore {
    pub fn open(path: &str) -> Result<SwiftCore> {
        let library = NativeLib::open(path)?;
        let runtime = CoreRuntime::install(CoreRuntime::from_library(&library)?);
        debug!(target: "interop", library = path, "swift core library ready");
        Ok(SwiftCore { library, runtime })
    }

    pub fn open_default() -> Result<SwiftCore> {
        Self::open(DEFAULT_CORE_PATH)
    }

    pub fn library(&self) -> &NativeLib {
        &self.library
    }

    pub fn runtime(&self) -> &'static CoreRuntime {
        self.runtime
    }

    /// Resolves the metadata record for a mangled type out of this library.
    pub fn metadata(&self, mangled: &str) -> Result<SwiftType> {
        let symbol = mangle::metadata_symbol(mangled);
        let address = self.library.require_symbol(&symbol)? as *const TypeMetadata;
        // Safety: a `...N` symbol is the address of the kind word of a full
        // metadata record, alive as long as the library.
        unsafe { SwiftType::from_metadata(address, mangled) }
    }

    fn standard(&self, name: &str) -> Result<SwiftType> {
        self.metadata(&mangle::mangle_nominal("Swift", name, TypeCode::Struct))
    }

    pub fn int8(&self) -> Result<SwiftType> {
        self.standard("Int8")
    }

    pub fn int16(&self) -> Result<SwiftType> {
        self.standard("Int16")
    }

    pub fn int32(&self) -> Result<SwiftType> {
        self.standard("Int32")
    }

    pub fn int64(&self) -> Result<SwiftType> {
        self.standard("Int64")
    }

    pub fn double(&self) -> Result<SwiftType> {
        self.standard("Double")
    }

    pub fn bool(&self) -> Result<SwiftType> {
        self.standard("Bool")
    }

    pub fn string(&self) -> Result<SwiftType> {
        // String mangles to the standard substitution `SS`.
        self.metadata("SS")
    }

    pub fn raw_pointer(&self) -> Result<SwiftType> {
        // UnsafeRawPointer mangles to `SV`.
        self.metadata("SV")
    }
}

/// The lazily opened default core library.
pub fn swift_core() -> Result<&'static SwiftCore> {
    if let Some(core) = CORE.get() {
        return Ok(core);
    }
    let opened = SwiftCore::open_default()?;
    // A racing open of the same path hits the library cache, so the loser
    // here is cheap to discard.
    Ok(CORE.get_or_init(|| opened))
}
