//! IPC Rendezvous Integration Tests
//!
//! These tests validate single-slot endpoint semantics end to end:
//! - Buffered delivery when no receiver is waiting
//! - Direct hand-off to a parked receiver
//! - Full-slot rejection and truncating receives
//! - Many concurrent senders against one receiver
//! - Messages survive a receiver whose buffer vanished while it was parked

use core_types::{EndpointId, PAGE_SIZE};
use ipc::IPC_MSG_MAX_SIZE;
use kernel_api::syscalls::*;
use kernel_api::ErrorClass;
use sim_kernel::syscall_gate::SyscallEvent;
use sim_kernel::test_utils::wait_until_blocked;
use std::collections::BTreeSet;
use std::sync::Arc;
use tests_resilience::*;

// ============================================================================
// Test A: Buffered Delivery
// ============================================================================

#[test]
fn test_send_then_recv_delivers_payload_and_sender() {
    let kernel = test_bootstrap();
    let server = spawn_test_process(&kernel, "server").unwrap();
    let client = spawn_test_process(&kernel, "client").unwrap();
    let ep = create_endpoint(&kernel, &server).unwrap();

    assert_eq!(send_bytes(&kernel, &client, ep, b"hello server"), 0);

    let sender_out = server.buf(0);
    let buf = server.buf(64);
    let len = server.syscall(&kernel, SYS_IPC_RECV, &[ep, buf, 64, sender_out]);
    assert_eq!(len, 12);
    assert_eq!(server.read(&kernel, buf, 12).unwrap(), b"hello server");
    assert_eq!(
        server.read_sender(&kernel, sender_out).unwrap(),
        client.caller.process.as_u32()
    );
    assert_eq!(kernel.endpoint_is_occupied(EndpointId::new(ep as u32)), Some(false));
}

#[test]
fn test_zero_length_message() {
    let kernel = test_bootstrap();
    let p = spawn_test_process(&kernel, "p").unwrap();
    let ep = create_endpoint(&kernel, &p).unwrap();

    assert_eq!(p.syscall(&kernel, SYS_IPC_SEND, &[ep, 0, 0]), 0);
    assert_eq!(p.syscall(&kernel, SYS_IPC_RECV, &[ep, p.buf(0), 16, 0]), 0);
}

#[test]
fn test_full_endpoint_rejects_second_send() {
    let kernel = test_bootstrap();
    let server = spawn_test_process(&kernel, "server").unwrap();
    let client = spawn_test_process(&kernel, "client").unwrap();
    let ep = create_endpoint(&kernel, &server).unwrap();

    assert_eq!(send_bytes(&kernel, &client, ep, b"first"), 0);
    assert_eq!(send_bytes(&kernel, &client, ep, b"second"), -1);

    // The first message is intact
    let len = server.syscall(&kernel, SYS_IPC_RECV, &[ep, server.buf(0), 64, 0]);
    assert_eq!(len, 5);
    assert_eq!(server.read(&kernel, server.buf(0), 5).unwrap(), b"first");

    assert_eq!(kernel.syscall_audit().rejections(ErrorClass::Capacity), 1);
    assert_eq!(send_bytes(&kernel, &client, ep, b"second"), 0);
}

#[test]
fn test_truncating_recv_reports_full_length() {
    let kernel = test_bootstrap();
    let p = spawn_test_process(&kernel, "p").unwrap();
    let ep = create_endpoint(&kernel, &p).unwrap();
    let payload = pattern(7, 100);

    assert_eq!(send_bytes(&kernel, &p, ep, &payload), 0);
    p.write(&kernel, 512, &[0xEE; 32]).unwrap();

    let len = p.syscall(&kernel, SYS_IPC_RECV, &[ep, p.buf(512), 10, 0]);
    assert_eq!(len, 100);
    let landed = p.read(&kernel, p.buf(512), 32).unwrap();
    assert_eq!(&landed[..10], &payload[..10]);
    assert!(landed[10..].iter().all(|b| *b == 0xEE));

    // The message was consumed
    assert_eq!(kernel.endpoint_is_occupied(EndpointId::new(ep as u32)), Some(false));
}

#[test]
fn test_message_size_limit() {
    let kernel = test_bootstrap();
    let p = spawn_test_process(&kernel, "p").unwrap();
    let ep = create_endpoint(&kernel, &p).unwrap();

    assert_eq!(send_bytes(&kernel, &p, ep, &pattern(1, IPC_MSG_MAX_SIZE)), 0);
    assert_eq!(
        p.syscall(&kernel, SYS_IPC_RECV, &[ep, p.buf(1024), 256, 0]),
        IPC_MSG_MAX_SIZE as i64
    );
    assert_eq!(send_bytes(&kernel, &p, ep, &pattern(1, IPC_MSG_MAX_SIZE + 1)), -1);
    assert_eq!(kernel.endpoint_is_occupied(EndpointId::new(ep as u32)), Some(false));
}

#[test]
fn test_only_owner_receives() {
    let kernel = test_bootstrap();
    let owner = spawn_test_process(&kernel, "owner").unwrap();
    let thief = spawn_test_process(&kernel, "thief").unwrap();
    let ep = create_endpoint(&kernel, &owner).unwrap();

    assert_eq!(send_bytes(&kernel, &thief, ep, b"secret"), 0);
    assert_eq!(thief.syscall(&kernel, SYS_IPC_RECV, &[ep, thief.buf(0), 64, 0]), -1);
    assert_eq!(thief.syscall(&kernel, SYS_IPC_CLOSE, &[ep]), -1);
    assert_eq!(kernel.endpoint_is_occupied(EndpointId::new(ep as u32)), Some(true));
}

#[test]
fn test_unknown_endpoint_ids() {
    let kernel = test_bootstrap();
    let p = spawn_test_process(&kernel, "p").unwrap();

    for raw in [0, 999, u64::from(u32::MAX) + 1] {
        assert_eq!(p.syscall(&kernel, SYS_IPC_SEND, &[raw, p.buf(0), 1]), -1);
        assert_eq!(p.syscall(&kernel, SYS_IPC_RECV, &[raw, p.buf(0), 1, 0]), -1);
        assert_eq!(p.syscall(&kernel, SYS_IPC_CLOSE, &[raw]), -1);
    }
}

// ============================================================================
// Test B: Blocking Receive
// ============================================================================

#[test]
fn test_blocked_receiver_woken_by_send() {
    let kernel = test_bootstrap();
    let server = spawn_test_process(&kernel, "server").unwrap();
    let client = spawn_test_process(&kernel, "client").unwrap();
    let ep = create_endpoint(&kernel, &server).unwrap();

    let receiver = parked_receiver(&kernel, server, ep, 64, 64).unwrap();
    assert_eq!(send_bytes(&kernel, &client, ep, b"wake up"), 0);
    assert_eq!(receiver.join().unwrap(), 7);

    assert_eq!(server.read(&kernel, server.buf(64), 7).unwrap(), b"wake up");
    assert_eq!(
        server.read_sender(&kernel, server.buf(60)).unwrap(),
        client.caller.process.as_u32()
    );

    // Handed off directly: the slot never held the message
    assert_eq!(kernel.endpoint_is_occupied(EndpointId::new(ep as u32)), Some(false));
}

#[test]
fn test_two_receivers_served_in_order() {
    let kernel = test_bootstrap();
    let server = spawn_test_process(&kernel, "server").unwrap();
    let client = spawn_test_process(&kernel, "client").unwrap();
    let second = server.spawn_thread(&kernel).unwrap();
    let ep = create_endpoint(&kernel, &server).unwrap();

    let first_rx = parked_receiver(&kernel, server, ep, 64, 64).unwrap();
    let second_rx = parked_receiver(&kernel, second, ep, 1024, 64).unwrap();

    assert_eq!(send_bytes(&kernel, &client, ep, b"one"), 0);
    assert_eq!(first_rx.join().unwrap(), 3);
    assert_eq!(send_bytes(&kernel, &client, ep, b"three"), 0);
    assert_eq!(second_rx.join().unwrap(), 5);

    assert_eq!(server.read(&kernel, server.buf(64), 3).unwrap(), b"one");
    assert_eq!(server.read(&kernel, server.buf(1024), 5).unwrap(), b"three");
}

#[test]
fn test_blocking_recv_is_audited_once() {
    let kernel = test_bootstrap();
    let server = spawn_test_process(&kernel, "server").unwrap();
    let client = spawn_test_process(&kernel, "client").unwrap();
    let ep = create_endpoint(&kernel, &server).unwrap();

    let receiver = parked_receiver(&kernel, server, ep, 64, 64).unwrap();
    assert_eq!(send_bytes(&kernel, &client, ep, b"ping"), 0);
    assert_eq!(receiver.join().unwrap(), 4);

    let audit = kernel.syscall_audit();
    assert_eq!(
        audit.count_events(|e| matches!(
            e,
            SyscallEvent::Completed { syscall, value: 4, .. } if syscall == "ipc_recv"
        )),
        1
    );
}

// ============================================================================
// Test C: Concurrent Senders
// ============================================================================

#[test]
fn test_concurrent_senders_deliver_every_message_once() {
    const SENDERS: u8 = 4;
    const PER_SENDER: u8 = 25;

    let kernel = test_bootstrap();
    let server = spawn_test_process(&kernel, "server").unwrap();
    let ep = create_endpoint(&kernel, &server).unwrap();

    let senders: Vec<_> = (0..SENDERS)
        .map(|s| {
            let kernel = Arc::clone(&kernel);
            let client = spawn_test_process(&kernel, &format!("client{}", s)).unwrap();
            std::thread::spawn(move || {
                for seq in 0..PER_SENDER {
                    while send_bytes(&kernel, &client, ep, &[s, seq]) != 0 {
                        std::thread::yield_now();
                    }
                }
            })
        })
        .collect();

    let mut seen = BTreeSet::new();
    for _ in 0..(SENDERS as usize * PER_SENDER as usize) {
        let len = server.syscall(&kernel, SYS_IPC_RECV, &[ep, server.buf(0), 8, 0]);
        assert_eq!(len, 2);
        let bytes = server.read(&kernel, server.buf(0), 2).unwrap();
        assert!(seen.insert((bytes[0], bytes[1])), "duplicate {:?}", bytes);
    }
    for sender in senders {
        sender.join().unwrap();
    }

    assert_eq!(seen.len(), SENDERS as usize * PER_SENDER as usize);
    assert_eq!(kernel.endpoint_is_occupied(EndpointId::new(ep as u32)), Some(false));
}

// ============================================================================
// Test D: Faulting Receivers
// ============================================================================

/// Parks `receiver` with its buffer inside a fresh shared region
///
/// Returns the region handle and the receive thread.
fn park_on_shared_buffer(
    kernel: &Arc<sim_kernel::SimulatedKernel>,
    receiver: sim_kernel::test_utils::UserProcess,
    ep: u64,
) -> (u64, std::thread::JoinHandle<i64>) {
    let region = receiver.syscall(kernel, SYS_SHM_CREATE, &[PAGE_SIZE]) as u64;
    let at = receiver.syscall(kernel, SYS_SHM_MAP, &[region, 0]) as u64;
    let handle = {
        let kernel = Arc::clone(kernel);
        std::thread::spawn(move || receiver.syscall(&kernel, SYS_IPC_RECV, &[ep, at, 64, 0]))
    };
    assert!(wait_until_blocked(
        kernel,
        receiver.caller.thread,
        endpoint_key(ep),
        BLOCK_TIMEOUT
    ));
    (region, handle)
}

#[test]
fn test_message_kept_when_receive_buffer_unmapped() {
    let kernel = test_bootstrap();
    let server = spawn_test_process(&kernel, "server").unwrap();
    let sibling = server.spawn_thread(&kernel).unwrap();
    let client = spawn_test_process(&kernel, "client").unwrap();
    let ep = create_endpoint(&kernel, &server).unwrap();

    let (region, receiver) = park_on_shared_buffer(&kernel, server, ep);
    assert_eq!(sibling.syscall(&kernel, SYS_SHM_UNMAP, &[region]), 0);

    assert_eq!(send_bytes(&kernel, &client, ep, b"do not drop"), 0);
    assert_eq!(receiver.join().unwrap(), -1);

    // The message went back into the slot
    assert_eq!(kernel.endpoint_is_occupied(EndpointId::new(ep as u32)), Some(true));
    let len = server.syscall(
        &kernel,
        SYS_IPC_RECV,
        &[ep, server.buf(64), 64, server.buf(60)],
    );
    assert_eq!(len, 11);
    assert_eq!(server.read(&kernel, server.buf(64), 11).unwrap(), b"do not drop");
    assert_eq!(
        server.read_sender(&kernel, server.buf(60)).unwrap(),
        client.caller.process.as_u32()
    );
    assert_eq!(kernel.endpoint_is_occupied(EndpointId::new(ep as u32)), Some(false));
}

#[test]
fn test_message_passed_to_next_receiver_after_fault() {
    let kernel = test_bootstrap();
    let server = spawn_test_process(&kernel, "server").unwrap();
    let second = server.spawn_thread(&kernel).unwrap();
    let sibling = server.spawn_thread(&kernel).unwrap();
    let client = spawn_test_process(&kernel, "client").unwrap();
    let ep = create_endpoint(&kernel, &server).unwrap();

    let (region, faulting) = park_on_shared_buffer(&kernel, server, ep);
    let healthy = parked_receiver(&kernel, second, ep, 1024, 64).unwrap();
    assert_eq!(sibling.syscall(&kernel, SYS_SHM_UNMAP, &[region]), 0);

    assert_eq!(send_bytes(&kernel, &client, ep, b"second chance"), 0);
    assert_eq!(faulting.join().unwrap(), -1);
    assert_eq!(healthy.join().unwrap(), 13);

    assert_eq!(server.read(&kernel, server.buf(1024), 13).unwrap(), b"second chance");
    assert_eq!(kernel.endpoint_is_occupied(EndpointId::new(ep as u32)), Some(false));

    // The endpoint takes new messages once the hand-off completes
    assert_eq!(send_bytes(&kernel, &client, ep, b"next"), 0);
}
