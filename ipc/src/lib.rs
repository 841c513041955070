//! # Inter-Process Communication (IPC)
//!
//! This crate implements the endpoint table: the rendezvous primitive every
//! other service is built on.
//!
//! ## Philosophy
//!
//! - **One slot per endpoint**: a second send fails instead of queueing
//! - **Receivers block, senders never do**
//! - **Hand-off, not polling**: a send with a waiting receiver passes the
//!   message to that receiver's wakeup directly
//! - **Owned by processes**: every endpoint is charged to its owner's quota
//!   and disappears with it
//!
//! ## Architecture
//!
//! - [`Message`]: sender identity plus an owned payload of at most
//!   [`IPC_MSG_MAX_SIZE`] bytes
//! - [`Endpoint`]: single slot and FIFO wait queue
//! - [`EndpointTable`]: fixed-capacity arena; all mutations take `&mut self`
//!   and are serialized by the caller's lock

pub mod endpoint;
pub mod message;
pub mod table;

pub use endpoint::Endpoint;
pub use message::{Message, IPC_MSG_MAX_SIZE};
pub use table::{EndpointTable, RecvOutcome, DEFAULT_ENDPOINT_CAPACITY};
