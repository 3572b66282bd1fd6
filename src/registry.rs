//! The process-wide type registry.
//!
//! Each host type gets exactly one synthesized handle, built on first use
//! and kept for the rest of the process. Single-flight is arbitrated per
//! type: a builder claims its entry, constructs with the map unlocked (so
//! a constructor can register the types of its own fields), and publishes
//! under the lock. Concurrent first uses of the same type wait for the
//! claimant instead of racing to build duplicate metadata.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Condvar, Mutex, OnceLock};

use tracing::debug;

use crate::error::Result;
use crate::library::lock;
use crate::synth::SynthType;

/// A host type that can describe itself as a Swift struct.
pub trait SwiftBridged: 'static {
    /// Builds the synthesized type. Called at most once per process unless
    /// it fails, in which case the next use retries.
    fn swift_type() -> Result<SynthType>;
}

enum Slot {
    /// A builder has claimed the entry and is constructing off-lock.
    Building,
    Ready(&'static SynthType),
}

struct Registry {
    slots: Mutex<HashMap<TypeId, Slot>>,
    built: Condvar,
}

static REGISTRY: OnceLock<Registry> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(|| Registry {
        slots: Mutex::new(HashMap::new()),
        built: Condvar::new(),
    })
}

/// The synthesized handle for `T`, building and publishing it on first use.
///
/// Reentrant for distinct types: a [`SwiftBridged`] constructor may call
/// this for its field types. A type whose constructor requires the type
/// itself is an unbuildable cycle and deadlocks, as it would in any order.
pub fn synth_type_of<T: SwiftBridged>() -> Result<&'static SynthType> {
    let registry = registry();
    let id = TypeId::of::<T>();

    let mut slots = lock(&registry.slots);
    loop {
        match slots.get(&id) {
            Some(Slot::Ready(existing)) => return Ok(existing),
            Some(Slot::Building) => {
                slots = registry
                    .built
                    .wait(slots)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
            }
            None => break,
        }
    }
    slots.insert(id, Slot::Building);
    drop(slots);

    let built = T::swift_type();

    let mut slots = lock(&registry.slots);
    let result = match built {
        Ok(built) => {
            // Handles live forever: synthesized metadata holds a raw
            // back-reference into this allocation, and the Swift runtime
            // may keep reading the records indefinitely.
            let published: &'static SynthType = Box::leak(Box::new(built));
            slots.insert(id, Slot::Ready(published));
            debug!(
                target: "interop",
                ty = published.swift_type().mangled_name(),
                host = std::any::type_name::<T>(),
                "registered bridged type"
            );
            Ok(published)
        }
        Err(err) => {
            slots.remove(&id);
            Err(err)
        }
    };
    drop(slots);
    registry.built.notify_all();
    result
}

/// Whether `T` has already been synthesized.
pub fn is_registered<T: SwiftBridged>() -> bool {
    REGISTRY
        .get()
        .map(|registry| {
            matches!(
                lock(&registry.slots).get(&TypeId::of::<T>()),
                Some(Slot::Ready(_))
            )
        })
        .unwrap_or(false)
}
