//! Identifier allocation
//!
//! Every instance, material, shader and light carries a 64-bit identifier that
//! is assigned exactly once and never changes for the lifetime of the object.
//! The scene sets index everything by these integers, so two objects must
//! never share one. A single [`IdPool`] is created by the engine and shared
//! (by `Arc`) with every producer of identified objects.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// A source of fresh, monotonically increasing identifiers
#[derive(Debug, Default)]
pub struct IdPool {
    next: AtomicU64,
}

impl IdPool {
    /// Create a pool whose first identifier is zero
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(0),
        }
    }

    /// Take the next identifier
    pub fn fresh(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Take a fresh instance identifier
    pub fn fresh_instance(&self) -> InstanceId {
        InstanceId(self.fresh())
    }

    /// Take a fresh material identifier
    pub fn fresh_material(&self) -> MaterialId {
        MaterialId(self.fresh())
    }

    /// Take a fresh shader identifier
    pub fn fresh_shader(&self) -> ShaderId {
        ShaderId(self.fresh())
    }

    /// Take a fresh light identifier
    pub fn fresh_light(&self) -> LightId {
        LightId(self.fresh())
    }

    /// The identifier the next call to [`IdPool::fresh`] will return
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl $name {
            /// The raw integer value
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "#{}"), self.0)
            }
        }
    };
}

id_type!(
    /// Identifier of a renderable instance (single, batched or billboarded)
    InstanceId,
    "instance"
);
id_type!(
    /// Identifier of a material
    MaterialId,
    "material"
);
id_type!(
    /// Identifier of a shader program wrapper
    ShaderId,
    "shader"
);
id_type!(
    /// Identifier of a light
    LightId,
    "light"
);

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_ids_are_monotonic() {
        let pool = IdPool::new();
        let a = pool.fresh();
        let b = pool.fresh();
        let c = pool.fresh();
        assert!(a < b && b < c);
        assert_eq!(pool.peek(), c + 1);
    }

    #[test]
    fn test_typed_ids_share_one_sequence() {
        let pool = IdPool::new();
        let instance = pool.fresh_instance();
        let material = pool.fresh_material();
        let shader = pool.fresh_shader();
        let light = pool.fresh_light();
        assert_eq!(instance.get(), 0);
        assert_eq!(material.get(), 1);
        assert_eq!(shader.get(), 2);
        assert_eq!(light.get(), 3);
        assert_eq!(format!("{material}"), "material#1");
    }

    #[test]
    fn test_ids_unique_across_threads() {
        let pool = Arc::new(IdPool::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || (0..256).map(|_| pool.fresh()).collect::<Vec<_>>())
            })
            .collect();

        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 4 * 256);
    }
}
