//! Kernel error types

use core_types::{EndpointId, MemoryError, NameError};
use resources::QuotaError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors that can occur when interacting with the kernel
///
/// Every variant is a recoverable user-facing failure. None of them
/// describes a kernel fault.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KernelError {
    /// A register value or size was out of range
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A user pointer failed validation
    #[error("Bad user address: {0}")]
    BadAddress(#[from] MemoryError),

    /// A service name failed validation
    #[error("Invalid service name: {0}")]
    InvalidName(#[from] NameError),

    /// The syscall number is not part of the ABI
    #[error("Unknown syscall: {0}")]
    UnknownSyscall(u64),

    /// Per-process ceiling reached
    #[error("{0}")]
    QuotaExceeded(#[from] QuotaError),

    /// A fixed-size kernel table has no free slot
    #[error("Capacity exhausted: {0}")]
    CapacityExhausted(String),

    /// The endpoint already holds a pending message
    #[error("Endpoint full: {0}")]
    EndpointFull(EndpointId),

    /// The named object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The caller does not own the object
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// A blocked operation was cancelled by process termination or close
    #[error("Operation cancelled")]
    Cancelled,
}

/// Failure classes visible in the error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Invalid pointer, name, size or handle
    Argument,
    /// Per-process ceiling reached
    Quota,
    /// Fixed table or slot is full
    Capacity,
    /// Lookup miss or stale handle
    NotFound,
    /// Blocked call ended without a result
    Interrupted,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Argument => write!(f, "argument"),
            ErrorClass::Quota => write!(f, "quota"),
            ErrorClass::Capacity => write!(f, "capacity"),
            ErrorClass::NotFound => write!(f, "not-found"),
            ErrorClass::Interrupted => write!(f, "interrupted"),
        }
    }
}

impl KernelError {
    /// Classifies this error
    pub fn class(&self) -> ErrorClass {
        match self {
            KernelError::InvalidArgument(_)
            | KernelError::BadAddress(_)
            | KernelError::InvalidName(_)
            | KernelError::UnknownSyscall(_)
            | KernelError::PermissionDenied(_) => ErrorClass::Argument,
            KernelError::QuotaExceeded(_) => ErrorClass::Quota,
            KernelError::CapacityExhausted(_) | KernelError::EndpointFull(_) => {
                ErrorClass::Capacity
            }
            KernelError::NotFound(_) => ErrorClass::NotFound,
            KernelError::Cancelled => ErrorClass::Interrupted,
        }
    }

    /// Value returned to user space for this error
    ///
    /// The ABI does not differentiate failures.
    pub fn user_code(&self) -> i64 {
        -1
    }
}
