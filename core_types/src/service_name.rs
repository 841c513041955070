//! Fixed-width service names
//!
//! Names cross the syscall boundary as a 24-byte, NUL-padded ASCII buffer.
//! Two names are equal when their bytes up to the first NUL are equal.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Size of the name buffer read from user space
pub const SERVICE_NAME_MAX: usize = 24;

/// A validated service name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceName {
    bytes: [u8; SERVICE_NAME_MAX],
    len: u8,
}

impl ServiceName {
    /// Builds a name from a Rust string
    pub fn new(name: &str) -> Result<Self, NameError> {
        if name.len() > SERVICE_NAME_MAX {
            return Err(NameError::TooLong { len: name.len() });
        }
        if name.as_bytes().contains(&0) {
            return Err(NameError::InteriorNul);
        }
        let mut bytes = [0u8; SERVICE_NAME_MAX];
        bytes[..name.len()].copy_from_slice(name.as_bytes());
        Self::from_padded(&bytes)
    }

    /// Parses the raw buffer copied in from user space
    ///
    /// The name ends at the first NUL byte, or fills the whole buffer if
    /// there is none. Bytes after the terminator are ignored.
    pub fn from_padded(raw: &[u8; SERVICE_NAME_MAX]) -> Result<Self, NameError> {
        let len = raw.iter().position(|b| *b == 0).unwrap_or(SERVICE_NAME_MAX);
        if len == 0 {
            return Err(NameError::Empty);
        }
        if !raw[..len].iter().all(|b| b.is_ascii() && !b.is_ascii_control()) {
            return Err(NameError::NotPrintableAscii);
        }
        let mut bytes = [0u8; SERVICE_NAME_MAX];
        bytes[..len].copy_from_slice(&raw[..len]);
        Ok(Self {
            bytes,
            len: len as u8,
        })
    }

    /// Returns the name without padding
    pub fn as_str(&self) -> &str {
        // from_padded only admits printable ASCII
        std::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or_default()
    }

    /// Returns the NUL-padded wire form
    pub fn to_padded(&self) -> [u8; SERVICE_NAME_MAX] {
        self.bytes
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reasons a service name is rejected
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NameError {
    #[error("Service name is empty")]
    Empty,

    #[error("Service name too long: {len} bytes (max {SERVICE_NAME_MAX})")]
    TooLong { len: usize },

    #[error("Service name contains a NUL byte")]
    InteriorNul,

    #[error("Service name is not printable ASCII")]
    NotPrintableAscii,
}
