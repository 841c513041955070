//! Resilience Test Utilities
//!
//! This crate provides shared utilities for resilience and integration tests.
//!
//! ## Test Philosophy
//!
//! - **Hostile user space**: Every pointer and id may be garbage; the kernel returns -1 and stays consistent
//! - **Real concurrency**: Blocking receives run on host threads and are woken by other threads
//! - **No leaks**: Quotas, table slots and physical frames return to their baseline after teardown
//! - **Observable**: Assertions go through the audit logs and accounting, not through internals

use core_types::EndpointId;
use kernel_api::syscalls::{SYS_IPC_CREATE, SYS_IPC_RECV, SYS_IPC_SEND};
use kernel_api::{KernelError, WaitKey};
use sha2::{Digest, Sha256};
use sim_kernel::config::KernelConfig;
use sim_kernel::test_utils::{wait_until_blocked, UserProcess};
use sim_kernel::SimulatedKernel;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// How long tests wait for a thread to park before giving up
pub const BLOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Bootstrap helper for tests
///
/// Creates a shareable kernel with the default configuration.
pub fn test_bootstrap() -> Arc<SimulatedKernel> {
    Arc::new(SimulatedKernel::new())
}

/// Creates a shareable kernel with an explicit configuration
pub fn bootstrap_with(config: KernelConfig) -> Arc<SimulatedKernel> {
    Arc::new(SimulatedKernel::with_config(config))
}

/// Spawns a user process with a scratch buffer
pub fn spawn_test_process(kernel: &SimulatedKernel, name: &str) -> Result<UserProcess, KernelError> {
    UserProcess::spawn(kernel, name)
}

/// Creates an endpoint owned by `owner`, returning the raw register value
pub fn create_endpoint(kernel: &SimulatedKernel, owner: &UserProcess) -> Option<u64> {
    u64::try_from(owner.syscall(kernel, SYS_IPC_CREATE, &[])).ok()
}

/// Wait key for an endpoint given as a raw register value
pub fn endpoint_key(raw: u64) -> WaitKey {
    WaitKey::Endpoint(EndpointId::new(raw as u32))
}

/// Sends `payload` from `sender`'s scratch buffer
pub fn send_bytes(kernel: &SimulatedKernel, sender: &UserProcess, endpoint: u64, payload: &[u8]) -> i64 {
    match sender.write(kernel, 0, payload) {
        Ok(addr) => sender.syscall(kernel, SYS_IPC_SEND, &[endpoint, addr, payload.len() as u64]),
        Err(_) => -1,
    }
}

/// Starts a receive on its own host thread
///
/// The message lands at `offset` in the receiver's scratch buffer and the
/// sender id four bytes before it.
pub fn recv_in_background(
    kernel: &Arc<SimulatedKernel>,
    receiver: UserProcess,
    endpoint: u64,
    offset: u64,
    max_len: u64,
) -> JoinHandle<i64> {
    let kernel = Arc::clone(kernel);
    std::thread::spawn(move || {
        receiver.syscall(
            &kernel,
            SYS_IPC_RECV,
            &[endpoint, receiver.buf(offset), max_len, receiver.buf(offset - 4)],
        )
    })
}

/// Starts a receive and waits until the thread has parked on the endpoint
pub fn parked_receiver(
    kernel: &Arc<SimulatedKernel>,
    receiver: UserProcess,
    endpoint: u64,
    offset: u64,
    max_len: u64,
) -> Option<JoinHandle<i64>> {
    let handle = recv_in_background(kernel, receiver, endpoint, offset, max_len);
    wait_until_blocked(kernel, receiver.caller.thread, endpoint_key(endpoint), BLOCK_TIMEOUT)
        .then_some(handle)
}

/// SHA-256 digest of a byte buffer
pub fn checksum(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

/// Deterministic test pattern derived from a seed
pub fn pattern(seed: u8, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| seed.wrapping_mul(31).wrapping_add((i % 251) as u8))
        .collect()
}
