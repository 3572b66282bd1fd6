//! Value transfer through type handles: POD fast path, witness dispatch,
//! scoped handles, and runtime-instantiated tuples.

mod common;

use std::ffi::c_void;
use std::sync::atomic::Ordering;

use graftr::{tuple_of, SwiftHandle, TransferMode};

#[test]
fn test_pod_transfer_copies_bytes() {
    let ty = common::pod_u64_type();
    assert!(ty.is_pod());

    let mut src: u64 = 0xDEAD_BEEF_CAFE_F00D;
    let mut dest: u64 = 0;
    let result = unsafe {
        ty.transfer(
            &mut dest as *mut u64 as *mut c_void,
            &mut src as *mut u64 as *mut c_void,
            TransferMode::InitWithCopy,
        )
    }
    .unwrap();
    assert_eq!(result, &mut dest as *mut u64 as *mut c_void);
    assert_eq!(dest, src);

    // Destroying a POD value is a no-op.
    unsafe { ty.destroy(&mut dest as *mut u64 as *mut c_void) }.unwrap();
}

#[test]
fn test_non_pod_transfer_balances_live_count() {
    let _guard = common::counting_lock();
    let ty = common::counting_type();
    assert!(!ty.is_pod());

    let mut original: u64 = 7;
    let mut copy: u64 = 0;
    let mut moved: u64 = 0;
    unsafe {
        let original = &mut original as *mut u64 as *mut c_void;
        let copy = &mut copy as *mut u64 as *mut c_void;
        let moved = &mut moved as *mut u64 as *mut c_void;

        let before = common::LIVE_VALUES.load(Ordering::SeqCst);
        ty.transfer(copy, original, TransferMode::InitWithCopy).unwrap();
        assert_eq!(common::LIVE_VALUES.load(Ordering::SeqCst), before + 1);

        // A take moves the value without changing the live count.
        ty.transfer(moved, copy, TransferMode::InitWithTake).unwrap();
        assert_eq!(common::LIVE_VALUES.load(Ordering::SeqCst), before + 1);

        ty.destroy(moved).unwrap();
        assert_eq!(common::LIVE_VALUES.load(Ordering::SeqCst), before);
    }
    assert_eq!(copy, 7);
    assert_eq!(moved, 7);
}

#[test]
fn test_owned_handle_destroys_on_drop() {
    let _guard = common::counting_lock();
    let ty = common::counting_type();
    let before = common::LIVE_VALUES.load(Ordering::SeqCst);

    let mut source: u64 = 42;
    {
        let handle = SwiftHandle::alloc_value(&ty).unwrap();
        unsafe {
            ty.transfer(
                handle.pointer(),
                &mut source as *mut u64 as *mut c_void,
                TransferMode::InitWithCopy,
            )
        }
        .unwrap();
        assert!(handle.is_owned());
        assert_eq!(common::LIVE_VALUES.load(Ordering::SeqCst), before + 1);
    }
    assert_eq!(common::LIVE_VALUES.load(Ordering::SeqCst), before);
}

#[test]
fn test_borrowed_handle_leaves_value_alone() {
    let _guard = common::counting_lock();
    let ty = common::counting_type();
    let before = common::LIVE_VALUES.load(Ordering::SeqCst);
    let value: u64 = 1;
    {
        let handle = unsafe { SwiftHandle::borrowed(&value as *const u64 as *const c_void, &ty) };
        assert!(!handle.is_owned());
    }
    assert_eq!(common::LIVE_VALUES.load(Ordering::SeqCst), before);
}

#[test]
fn test_tuple_instantiation_and_collapse() -> anyhow::Result<()> {
    common::install_stub_runtime();

    let a = common::pod_u32_type();
    let b = common::pod_u64_type();

    // One-element tuples collapse to the element itself.
    let single = tuple_of(&[&a])?;
    assert_eq!(single.metadata(), a.metadata());
    assert_eq!(single.mangled_name(), "s5Int32V");

    // (Int32, Int64): natural alignment pads the second element to 8.
    let pair = tuple_of(&[&a, &b])?;
    assert_eq!(pair.mangled_name(), "s5Int32V_s5Int64Vt");
    assert_eq!(pair.size(), 16);
    assert_eq!(pair.alignment(), 8);

    let empty = tuple_of(&[])?;
    assert_eq!(empty.mangled_name(), "yt");
    assert_eq!(empty.size(), 0);
    Ok(())
}
