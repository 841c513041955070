//! Identifiers for kernel entities
//!
//! Every handle handed to user space is a small non-zero integer. Zero is
//! reserved so that it can never name a live object.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! kernel_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(u32);

        impl $name {
            /// Wraps a raw handle value
            pub const fn new(raw: u32) -> Self {
                Self(raw)
            }

            /// Returns the raw handle value
            pub const fn as_u32(&self) -> u32 {
                self.0
            }

            /// Parses a handle out of a 64-bit syscall register
            ///
            /// Returns `None` for zero, which is never allocated, or a value
            /// wider than 32 bits.
            pub fn from_register(raw: u64) -> Option<Self> {
                u32::try_from(raw).ok().filter(|v| *v != 0).map(Self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "({})"), self.0)
            }
        }
    };
}

kernel_id!(
    /// Identifier for a user process (one address space, one quota entry)
    ProcessId,
    "Process"
);

kernel_id!(
    /// Identifier for a kernel thread
    ThreadId,
    "Thread"
);

kernel_id!(
    /// Identifier for an IPC endpoint
    ///
    /// Endpoint IDs are assigned monotonically and never reused, so a stale
    /// handle held by user space can never alias a newer endpoint.
    EndpointId,
    "Endpoint"
);

kernel_id!(
    /// Identifier for a shared-memory region
    RegionId,
    "Region"
);

/// Monotonic source of non-zero handle values
///
/// Handles are never recycled. Once the 32-bit space is exhausted the
/// allocator refuses to hand out more values instead of wrapping.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    next: u32,
}

impl IdAllocator {
    /// Creates an allocator whose first value is 1
    pub const fn new() -> Self {
        Self { next: 1 }
    }

    /// Returns the next unused value, or `None` when exhausted
    pub fn allocate(&mut self) -> Option<u32> {
        let value = self.next;
        if value == 0 {
            return None;
        }
        self.next = value.checked_add(1).unwrap_or(0);
        Some(value)
    }

    /// Returns the value the next call to `allocate` would produce
    pub fn peek(&self) -> Option<u32> {
        (self.next != 0).then_some(self.next)
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
