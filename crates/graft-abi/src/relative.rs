//! Relative pointers: the offset-based encoding used throughout Swift metadata.
//!
//! A relative pointer stores a signed 32-bit byte offset from its **own
//! storage address** to the target. An offset of zero encodes null, which
//! means a record can never point at itself. The indirectable variant
//! reserves the low bit of the offset to mean "the target address holds a
//! pointer to the real target" - needed when a record must reference memory
//! that cannot be guaranteed to sit within ±2 GiB.
//!
//! Because the encoding is address-sensitive, the accessors are `unsafe`:
//! they are only meaningful once the record occupies its final resting
//! address, and the caller must guarantee the record is not moved afterwards.

use core::ffi::c_void;
use core::fmt;
use core::ptr;

/// Error produced when a target lies farther than a 32-bit signed offset
/// can express. This signals a layout-design error: related records must be
/// co-located.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetOverflow {
    /// The byte distance that failed to encode.
    pub distance: isize,
}

impl fmt::Display for OffsetOverflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "relative pointer target at distance {:#x} overflows 32-bit offset",
            self.distance
        )
    }
}

#[cfg(feature = "std")]
impl std::error::Error for OffsetOverflow {}

fn encode_offset(base: *const u8, target: *const c_void) -> Result<i32, OffsetOverflow> {
    let distance = (target as isize).wrapping_sub(base as isize);
    i32::try_from(distance).map_err(|_| OffsetOverflow { distance })
}

/// A direct relative pointer: `target = &self + offset`, null when zero.
#[derive(Debug, Default)]
#[repr(transparent)]
pub struct RelativePointer {
    offset: i32,
}

impl RelativePointer {
    /// The null relative pointer.
    pub const fn zero() -> Self {
        Self { offset: 0 }
    }

    /// Raw stored offset.
    pub fn offset(&self) -> i32 {
        self.offset
    }

    pub fn is_null(&self) -> bool {
        self.offset == 0
    }

    /// Resolves the target address.
    ///
    /// # Safety
    /// `self` must reside at its final address inside a live metadata record.
    pub unsafe fn target(&self) -> *mut c_void {
        if self.offset == 0 {
            return ptr::null_mut();
        }
        (self as *const Self as *mut u8).offset(self.offset as isize) as *mut c_void
    }

    /// Stores the offset to `target`, or zero for null.
    ///
    /// Fails if `target` is farther than ±2 GiB from this pointer's own
    /// address.
    ///
    /// # Safety
    /// `self` must reside at its final address; moving the record afterwards
    /// invalidates the stored offset.
    pub unsafe fn set_target(&mut self, target: *const c_void) -> Result<(), OffsetOverflow> {
        if target.is_null() {
            self.offset = 0;
            return Ok(());
        }
        self.offset = encode_offset(self as *const Self as *const u8, target)?;
        Ok(())
    }

    /// Encodes and writes a relative pointer at `location` without requiring
    /// an aligned reference. Used when emitting records into raw byte
    /// streams, such as mangled-type payloads.
    ///
    /// # Safety
    /// `location` must be valid for a 4-byte write.
    pub unsafe fn write_at(location: *mut u8, target: *const c_void) -> Result<(), OffsetOverflow> {
        let offset = if target.is_null() {
            0
        } else {
            encode_offset(location, target)?
        };
        ptr::write_unaligned(location as *mut i32, offset);
        Ok(())
    }
}

/// A relative pointer whose low offset bit selects indirection: when set,
/// the resolved address holds a pointer to the real target.
#[derive(Debug, Default)]
#[repr(transparent)]
pub struct RelativeIndirectablePointer {
    offset_and_indirect: i32,
}

impl RelativeIndirectablePointer {
    pub const fn zero() -> Self {
        Self {
            offset_and_indirect: 0,
        }
    }

    pub fn is_null(&self) -> bool {
        self.offset_and_indirect == 0
    }

    /// Resolves the target, following one level of indirection if the low
    /// bit is set.
    ///
    /// # Safety
    /// `self` must reside at its final address; an indirect target address
    /// must hold a valid pointer.
    pub unsafe fn target(&self) -> *mut c_void {
        if self.offset_and_indirect == 0 {
            return ptr::null_mut();
        }
        let address = (self as *const Self as *mut u8)
            .offset((self.offset_and_indirect & !1) as isize);
        if self.offset_and_indirect & 1 == 1 {
            *(address as *const *mut c_void)
        } else {
            address as *mut c_void
        }
    }

    /// Stores the offset to `target`. With `indirect`, `target` must be the
    /// address of a pointer-sized slot holding the real target, and must be
    /// at least 2-byte aligned so the low bit is free to carry the flag.
    ///
    /// # Safety
    /// Same address-stability requirements as [`RelativePointer::set_target`].
    pub unsafe fn set_target(
        &mut self,
        target: *const c_void,
        indirect: bool,
    ) -> Result<(), OffsetOverflow> {
        if target.is_null() {
            self.offset_and_indirect = 0;
            return Ok(());
        }
        let offset = encode_offset(self as *const Self as *const u8, target)?;
        debug_assert_eq!(offset & 1, 0, "indirectable target must be 2-byte aligned");
        self.offset_and_indirect = if indirect { offset | 1 } else { offset };
        Ok(())
    }
}

/// Symbolic reference kinds embedded in mangled-type byte streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SymbolicReferenceKind {
    /// The relative pointer targets a context descriptor directly.
    DirectContext = 1,
    /// The relative pointer targets a pointer to a context descriptor.
    IndirectContext = 2,
}

/// A symbolic reference: a control byte followed by an unaligned relative
/// pointer, spliced into the middle of a mangled-name byte stream.
#[repr(C, packed)]
pub struct SymbolicReference {
    pub kind: SymbolicReferenceKind,
    pub pointer: RelativePointer,
}

impl SymbolicReference {
    /// Encoded size in bytes (1 kind byte + 4 offset bytes).
    pub const SIZE: usize = 5;

    /// Emits a symbolic reference at `dest` whose pointer targets `target`,
    /// returning the first byte past the record.
    ///
    /// # Safety
    /// `dest` must be valid for [`Self::SIZE`] bytes of writes, and the
    /// emitted record must not be moved before it is consumed.
    pub unsafe fn write_at(
        dest: *mut u8,
        kind: SymbolicReferenceKind,
        target: *const c_void,
    ) -> Result<*mut u8, OffsetOverflow> {
        *dest = kind as u8;
        RelativePointer::write_at(dest.add(1), target)?;
        Ok(dest.add(Self::SIZE))
    }
}
