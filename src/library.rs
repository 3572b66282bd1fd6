//! Dynamic library loading and symbol resolution.
//!
//! Metadata resolved out of a library must outlive every value the Swift
//! runtime still holds, so libraries are opened once per path and kept for
//! the lifetime of the process. [`NativeLib`] is a cheap copyable handle
//! into that cache.

use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::{Mutex, MutexGuard, OnceLock};

use libloading::Library;
use tracing::debug;

use crate::error::{InteropError, Result};

static LIBRARIES: OnceLock<Mutex<HashMap<String, NativeLib>>> = OnceLock::new();

/// A process-lifetime handle to an opened dynamic library.
#[derive(Clone, Copy)]
pub struct NativeLib {
    path: &'static str,
    library: &'static Library,
}

impl NativeLib {
    /// Opens `path`, or returns the already-open handle for it. Libraries
    /// are never closed.
    pub fn open(path: &str) -> Result<NativeLib> {
        let mut cache = lock(LIBRARIES.get_or_init(Default::default));
        if let Some(handle) = cache.get(path) {
            return Ok(*handle);
        }

        // Safety: runtime libraries with ordinary initializers, held open
        // for the process lifetime.
        let library = unsafe { Library::new(path) }.map_err(|source| InteropError::LibraryOpen {
            path: path.to_owned(),
            source,
        })?;
        debug!(target: "interop", library = path, "opened native library");

        let handle = NativeLib {
            path: Box::leak(path.to_owned().into_boxed_str()),
            library: Box::leak(Box::new(library)),
        };
        cache.insert(path.to_owned(), handle);
        Ok(handle)
    }

    pub fn path(&self) -> &str {
        self.path
    }

    /// Resolves `symbol`, returning its address or `None`.
    pub fn try_symbol(&self, symbol: &str) -> Option<*mut c_void> {
        // Safety: the symbol is treated as an opaque address; callers choose
        // the type they cast it to.
        let found = unsafe {
            self.library
                .get::<*mut c_void>(symbol.as_bytes())
                .ok()
                .map(|s| *s)
        };
        if found.is_none() {
            debug!(target: "interop", library = self.path, symbol, "symbol not found");
        }
        found
    }

    /// Resolves `symbol` or fails with [`InteropError::MissingSymbol`].
    pub fn require_symbol(&self, symbol: &str) -> Result<*mut c_void> {
        self.try_symbol(symbol)
            .ok_or_else(|| InteropError::MissingSymbol {
                symbol: symbol.to_owned(),
                library: self.path.to_owned(),
            })
    }

    /// Looks up a protocol descriptor by the protocol's mangled type name.
    pub fn protocol_descriptor(
        &self,
        mangled: &str,
    ) -> Result<*const graftr_abi::ProtocolDescriptor> {
        let symbol = graftr_abi::mangle::protocol_descriptor_symbol(mangled);
        Ok(self.require_symbol(&symbol)? as *const graftr_abi::ProtocolDescriptor)
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
