//! Ownership bridging between host references and Swift value copies.
//!
//! The host side tracks objects by reference; Swift tracks struct values by
//! copy. A [`BridgeCell`] glues the two models together: every Swift-side
//! copy of a value counts as one foreign reference, and while any foreign
//! reference exists the cell anchors the host object strongly so the host
//! collector cannot reclaim it. When the last foreign copy is destroyed the
//! anchor drops back to a weak reference.

use std::alloc::{self, Layout};
use std::any::Any;
use std::ffi::c_void;
use std::sync::atomic::{AtomicIsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::{error, warn};

use crate::error::{InteropError, Result};
use crate::library::lock;
use crate::swift_type::SwiftType;
use crate::synth::{RawBlock, SynthType};

// ============================================================================
// Tagged pointers
// ============================================================================

/// A pointer with ownership carried in the low bit. Values of Swift types
/// are at least pointer-aligned wherever a tagged pointer is used, so the
/// bit is free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaggedPtr(usize);

impl TaggedPtr {
    pub fn new(ptr: *const c_void, owned: bool) -> TaggedPtr {
        debug_assert_eq!(ptr as usize & 1, 0);
        TaggedPtr(ptr as usize | owned as usize)
    }

    pub fn ptr(self) -> *mut c_void {
        (self.0 & !1) as *mut c_void
    }

    pub fn is_owned(self) -> bool {
        self.0 & 1 == 1
    }

    pub fn raw(self) -> usize {
        self.0
    }

    pub fn from_raw(raw: usize) -> TaggedPtr {
        TaggedPtr(raw)
    }
}

// ============================================================================
// Scoped value handles
// ============================================================================

fn value_layout(ty: &SwiftType) -> Result<Layout> {
    Layout::from_size_align(ty.size().max(1), ty.alignment().max(1))
        .map_err(|_| InteropError::AllocationFailed { size: ty.size() })
}

/// A pointer to a Swift value together with its type and ownership. Owned
/// handles destroy and free the value when dropped.
pub struct SwiftHandle<'a> {
    value: TaggedPtr,
    ty: &'a SwiftType,
}

impl<'a> SwiftHandle<'a> {
    /// Wraps a value owned by someone else; dropping the handle leaves it
    /// untouched.
    ///
    /// # Safety
    /// `value` must point at an initialized value of `ty` that outlives the
    /// handle.
    pub unsafe fn borrowed(value: *const c_void, ty: &'a SwiftType) -> SwiftHandle<'a> {
        SwiftHandle {
            value: TaggedPtr::new(value, false),
            ty,
        }
    }

    /// Takes ownership: the value is destroyed and its storage freed when
    /// the handle drops.
    ///
    /// # Safety
    /// `value` must hold an initialized value of `ty` in storage allocated
    /// with the value layout of `ty`, as [`alloc_value`](Self::alloc_value)
    /// produces.
    pub unsafe fn owned(value: *mut c_void, ty: &'a SwiftType) -> SwiftHandle<'a> {
        SwiftHandle {
            value: TaggedPtr::new(value, true),
            ty,
        }
    }

    /// Allocates zeroed owned storage for a value of `ty`. The caller must
    /// initialize it before the handle escapes.
    pub fn alloc_value(ty: &'a SwiftType) -> Result<SwiftHandle<'a>> {
        let layout = value_layout(ty)?;
        // Safety: layout has non-zero size.
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        if ptr.is_null() {
            return Err(InteropError::AllocationFailed { size: ty.size() });
        }
        Ok(SwiftHandle {
            value: TaggedPtr::new(ptr as *const c_void, true),
            ty,
        })
    }

    pub fn pointer(&self) -> *mut c_void {
        self.value.ptr()
    }

    pub fn swift_type(&self) -> &SwiftType {
        self.ty
    }

    pub fn is_owned(&self) -> bool {
        self.value.is_owned()
    }
}

impl Drop for SwiftHandle<'_> {
    fn drop(&mut self) {
        if !self.value.is_owned() {
            return;
        }
        // Safety: owned handles point at initialized values in storage of
        // the matching layout.
        unsafe {
            if let Err(err) = self.ty.destroy(self.value.ptr()) {
                error!(target: "interop", error = %err, "destroy on handle drop failed");
            }
            if let Ok(layout) = value_layout(self.ty) {
                alloc::dealloc(self.value.ptr() as *mut u8, layout);
            }
        }
    }
}

// ============================================================================
// Bridge cells
// ============================================================================

/// The foreign reference count and anchor for one host object.
///
/// The cell is always handled through `Arc`: the owning wrapper holds one
/// strong reference, and every foreign copy of the value holds one more, so
/// the cell outlives whichever side lets go last.
pub struct BridgeCell {
    foreign: AtomicIsize,
    anchor: Mutex<Option<Arc<dyn Any + Send + Sync>>>,
    target: Weak<dyn Any + Send + Sync>,
}

impl BridgeCell {
    pub fn new(target: &Arc<dyn Any + Send + Sync>) -> Arc<BridgeCell> {
        Arc::new(BridgeCell {
            foreign: AtomicIsize::new(0),
            anchor: Mutex::new(None),
            target: Arc::downgrade(target),
        })
    }

    /// Number of live foreign copies.
    pub fn foreign_count(&self) -> isize {
        self.foreign.load(Ordering::SeqCst)
    }

    /// The host object, if it is still alive.
    pub fn target(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.target.upgrade()
    }

    fn update_anchor(&self) {
        let mut anchor = lock(&self.anchor);
        if self.foreign.load(Ordering::SeqCst) > 0 {
            if anchor.is_none() {
                *anchor = self.target.upgrade();
            }
        } else {
            *anchor = None;
        }
    }

    /// Records one more foreign copy, anchoring the host object on the
    /// zero-to-one transition.
    ///
    /// # Safety
    /// `cell` must have come from an `Arc<BridgeCell>` that is still alive.
    pub unsafe fn retain_raw(cell: *const BridgeCell) {
        // The new copy holds one strong count on the cell itself.
        Arc::increment_strong_count(cell);
        let this = &*cell;
        this.foreign.fetch_add(1, Ordering::SeqCst);
        this.update_anchor();
    }

    /// Records the destruction of a foreign copy, dropping the anchor on
    /// the one-to-zero transition.
    ///
    /// # Safety
    /// As for [`retain_raw`](Self::retain_raw); the count must have been
    /// incremented by a matching retain.
    pub unsafe fn release_raw(cell: *const BridgeCell) {
        let this = &*cell;
        let previous = this.foreign.fetch_sub(1, Ordering::SeqCst);
        if previous <= 0 {
            // Tolerated: runtime teardown paths can over-release a value
            // that was never copied. No matching strong count to drop.
            warn!(target: "interop", count = previous - 1, "unbalanced foreign release");
            return;
        }
        this.update_anchor();
        // Last use of the cell pointer: this may free the cell.
        Arc::decrement_strong_count(cell);
    }
}

// ============================================================================
// Wrapped host values
// ============================================================================

/// The bridged native value of one host object: its cell, its data block,
/// and the synthesized type describing that block.
///
/// The wrapper's own data block holds a borrowed cell pointer and is not a
/// foreign copy; dropping the wrapper destroys the field values only and
/// never touches the foreign count.
pub struct HostValue<T: Any + Send + Sync> {
    host: Arc<T>,
    cell: Arc<BridgeCell>,
    ty: &'static SynthType,
    data: RawBlock,
}

impl<T: Any + Send + Sync> std::fmt::Debug for HostValue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostValue")
            .field("ty", &self.ty.swift_type().mangled_name())
            .finish_non_exhaustive()
    }
}

impl<T: Any + Send + Sync> HostValue<T> {
    /// Allocates the native data block for `host`. The header slot is
    /// populated; the caller initializes the field region through
    /// [`data`](Self::data) before handing the value to Swift.
    pub fn new(host: Arc<T>, ty: &'static SynthType) -> Result<HostValue<T>> {
        if !ty.has_instance_header() {
            return Err(InteropError::Unsupported(format!(
                "type `{}` has no instance header to bridge through",
                ty.swift_type().mangled_name()
            )));
        }
        let any: Arc<dyn Any + Send + Sync> = host.clone();
        let cell = BridgeCell::new(&any);
        let data = RawBlock::zeroed(ty.size().max(1), ty.swift_type().alignment().max(8))?;
        // Safety: the block starts with the pointer-sized header slot.
        unsafe {
            *(data.as_ptr() as *mut *const BridgeCell) = Arc::as_ptr(&cell);
        }
        Ok(HostValue {
            host,
            cell,
            ty,
            data,
        })
    }

    pub fn host(&self) -> &Arc<T> {
        &self.host
    }

    pub fn cell(&self) -> &Arc<BridgeCell> {
        &self.cell
    }

    pub fn synth_type(&self) -> &'static SynthType {
        self.ty
    }

    /// The native value, valid for the wrapper's lifetime.
    pub fn data(&self) -> *mut c_void {
        self.data.as_ptr() as *mut c_void
    }
}

impl<T: Any + Send + Sync> Drop for HostValue<T> {
    fn drop(&mut self) {
        // Fields only: the wrapper holds no foreign reference.
        unsafe { self.ty.state().destroy_fields(self.data.as_ptr()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_ptr_round_trip() {
        let storage = 0u64;
        let ptr = &storage as *const u64 as *const c_void;
        let owned = TaggedPtr::new(ptr, true);
        assert_eq!(owned.ptr(), ptr as *mut c_void);
        assert!(owned.is_owned());

        let borrowed = TaggedPtr::from_raw(owned.raw() & !1);
        assert_eq!(borrowed.ptr(), ptr as *mut c_void);
        assert!(!borrowed.is_owned());
    }

    #[test]
    fn test_cell_anchors_target_while_foreign_refs_exist() {
        let host: Arc<dyn Any + Send + Sync> = Arc::new(17usize);
        let weak_host = Arc::downgrade(&host);
        let cell = BridgeCell::new(&host);
        let raw = Arc::as_ptr(&cell);

        unsafe { BridgeCell::retain_raw(raw) };
        assert_eq!(cell.foreign_count(), 1);

        // The anchor keeps the host alive after its last direct reference.
        drop(host);
        assert!(weak_host.upgrade().is_some());

        unsafe { BridgeCell::release_raw(raw) };
        assert_eq!(cell.foreign_count(), 0);
        assert!(weak_host.upgrade().is_none());
    }

    #[test]
    fn test_unbalanced_release_is_tolerated() {
        let host: Arc<dyn Any + Send + Sync> = Arc::new(0u8);
        let cell = BridgeCell::new(&host);
        unsafe { BridgeCell::release_raw(Arc::as_ptr(&cell)) };
        assert_eq!(cell.foreign_count(), -1);
    }
}
