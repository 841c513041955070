//! Message type carried by endpoints

use core_types::ProcessId;
use kernel_api::{KernelError, Wakeup};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest payload an endpoint accepts
pub const IPC_MSG_MAX_SIZE: usize = 128;

/// A message copied in from the sender
///
/// The payload is owned by the kernel from the moment it is copied in, so the
/// sender may reuse its buffer immediately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    sender: ProcessId,
    payload: Vec<u8>,
}

impl Message {
    /// Creates a message, rejecting oversized payloads
    pub fn new(sender: ProcessId, payload: Vec<u8>) -> Result<Self, KernelError> {
        if payload.len() > IPC_MSG_MAX_SIZE {
            return Err(KernelError::InvalidArgument(format!(
                "message of {} bytes exceeds {}",
                payload.len(),
                IPC_MSG_MAX_SIZE
            )));
        }
        Ok(Self { sender, payload })
    }

    /// Process that sent the message
    pub fn sender(&self) -> ProcessId {
        self.sender
    }

    /// Message bytes
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Length of the payload in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Returns true for a zero-length message
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Converts into the wakeup handed to a parked receiver
    pub fn into_wakeup(self) -> Wakeup {
        Wakeup::Delivered {
            sender: self.sender,
            payload: self.payload,
        }
    }

    /// Recovers a message from a wakeup the scheduler could not deliver
    pub fn from_wakeup(wakeup: Wakeup) -> Option<Self> {
        match wakeup {
            Wakeup::Delivered { sender, payload } => Some(Self { sender, payload }),
            Wakeup::Cancelled => None,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Message[from={}, {} bytes]", self.sender, self.payload.len())
    }
}
