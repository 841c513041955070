//! Endpoint table
//!
//! A fixed-capacity arena of endpoints. IDs come from a monotonic allocator
//! and are never reused; slots are.

use crate::{Endpoint, Message};
use core_types::{EndpointId, IdAllocator, ProcessId, ThreadId};
use kernel_api::{Caller, KernelError, Scheduler, WaitKey, Wakeup};
use resources::{QuotaLedger, ResourceKind};

/// Default number of endpoint slots
pub const DEFAULT_ENDPOINT_CAPACITY: usize = 64;

/// Result of a receive attempt made under the table lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecvOutcome {
    /// A message was pending and has been taken
    Ready(Message),
    /// The caller has been queued and must block on the endpoint's wait key
    MustWait,
}

/// Table of all live endpoints
#[derive(Debug)]
pub struct EndpointTable {
    slots: Vec<Option<Endpoint>>,
    ids: IdAllocator,
}

impl EndpointTable {
    /// Creates a table with `capacity` slots
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            ids: IdAllocator::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of live endpoints
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn index_of(&self, id: EndpointId) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|ep| ep.id() == id))
    }

    /// Looks up a live endpoint
    pub fn get(&self, id: EndpointId) -> Option<&Endpoint> {
        self.slots.iter().flatten().find(|ep| ep.id() == id)
    }

    fn get_mut(&mut self, id: EndpointId) -> Result<&mut Endpoint, KernelError> {
        self.slots
            .iter_mut()
            .flatten()
            .find(|ep| ep.id() == id)
            .ok_or_else(|| KernelError::NotFound(id.to_string()))
    }

    pub fn contains(&self, id: EndpointId) -> bool {
        self.get(id).is_some()
    }

    /// Returns true if the endpoint holds a pending message
    pub fn is_occupied(&self, id: EndpointId) -> Option<bool> {
        self.get(id).map(Endpoint::is_occupied)
    }

    /// Number of endpoints owned by `owner`
    pub fn count_owned(&self, owner: ProcessId) -> usize {
        self.slots
            .iter()
            .flatten()
            .filter(|ep| ep.owner() == owner)
            .count()
    }

    /// Creates an endpoint owned by `owner`
    ///
    /// Capacity and ID space are checked before the quota is reserved, so a
    /// failure never leaves a reservation behind.
    pub fn create(
        &mut self,
        owner: ProcessId,
        ledger: &mut QuotaLedger,
    ) -> Result<EndpointId, KernelError> {
        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or_else(|| KernelError::CapacityExhausted("endpoint table".into()))?;
        if self.ids.peek().is_none() {
            return Err(KernelError::CapacityExhausted("endpoint ids".into()));
        }
        ledger.try_reserve(owner, ResourceKind::Endpoints)?;

        let id = self
            .ids
            .allocate()
            .map(EndpointId::new)
            .ok_or_else(|| KernelError::CapacityExhausted("endpoint ids".into()))?;
        self.slots[index] = Some(Endpoint::new(id, owner));
        log::debug!("{} created {}", owner, id);
        Ok(id)
    }

    /// Delivers a message to an endpoint
    ///
    /// The first queued receiver that can accept the message gets it
    /// directly. With no receiver the message is stored in the slot. If the
    /// slot is occupied, or a handed-off message has not been copied out
    /// yet, the send fails and nothing changes.
    pub fn send(
        &mut self,
        id: EndpointId,
        message: Message,
        scheduler: &dyn Scheduler,
    ) -> Result<(), KernelError> {
        let endpoint = self.get_mut(id)?;
        if !endpoint.accepts_send() {
            return Err(KernelError::EndpointFull(id));
        }
        Self::hand_off(endpoint, message, scheduler)
    }

    fn hand_off(
        endpoint: &mut Endpoint,
        message: Message,
        scheduler: &dyn Scheduler,
    ) -> Result<(), KernelError> {
        let id = endpoint.id();
        let key = WaitKey::Endpoint(id);
        let mut message = message;
        while let Some(thread) = endpoint.pop_waiter() {
            match scheduler.wake_one(key, thread, message.into_wakeup()) {
                Ok(()) => {
                    endpoint.begin_handoff(thread);
                    return Ok(());
                }
                Err(returned) => {
                    message = Message::from_wakeup(returned).ok_or(KernelError::Cancelled)?;
                    log::debug!("{}: waiter {} gone, trying next", id, thread);
                }
            }
        }

        endpoint
            .deposit(message)
            .map_err(|_| KernelError::EndpointFull(id))
    }

    /// Marks a handed-off message as copied out by `thread`
    pub fn finish_handoff(&mut self, id: EndpointId, thread: ThreadId) {
        if let Ok(endpoint) = self.get_mut(id) {
            endpoint.finish_handoff(thread);
        }
    }

    /// Gives back a handed-off message its receiver could not copy out
    ///
    /// The message goes to the next waiter or into the slot, which the
    /// reservation kept empty. If the endpoint is gone the message is
    /// dropped with it.
    pub fn return_handoff(
        &mut self,
        id: EndpointId,
        thread: ThreadId,
        message: Message,
        scheduler: &dyn Scheduler,
    ) -> Result<(), KernelError> {
        let endpoint = self.get_mut(id)?;
        endpoint.finish_handoff(thread);
        log::debug!("{}: {} returned by {}", id, message, thread);
        Self::hand_off(endpoint, message, scheduler)
    }

    /// Puts a message taken by `recv_or_wait` back into its slot
    ///
    /// Must be called without releasing the table lock in between.
    pub fn restore(&mut self, id: EndpointId, message: Message) -> Result<(), KernelError> {
        self.get_mut(id)?
            .deposit(message)
            .map_err(|_| KernelError::EndpointFull(id))
    }

    /// Takes the pending message or queues the caller as a waiter
    ///
    /// Only the owning process may receive.
    pub fn recv_or_wait(
        &mut self,
        id: EndpointId,
        caller: Caller,
    ) -> Result<RecvOutcome, KernelError> {
        let endpoint = self.get_mut(id)?;
        if endpoint.owner() != caller.process {
            return Err(KernelError::PermissionDenied(format!(
                "{} does not own {}",
                caller.process, id
            )));
        }
        if let Some(message) = endpoint.take() {
            return Ok(RecvOutcome::Ready(message));
        }
        endpoint.enqueue_waiter(caller.thread);
        Ok(RecvOutcome::MustWait)
    }

    /// Removes a thread from an endpoint's wait queue
    pub fn cancel_waiter(&mut self, id: EndpointId, thread: ThreadId) -> bool {
        self.get_mut(id)
            .map(|ep| ep.remove_waiter(thread))
            .unwrap_or(false)
    }

    /// Removes dead threads from every wait queue
    pub fn purge_threads(&mut self, threads: &[ThreadId]) {
        for endpoint in self.slots.iter_mut().flatten() {
            for thread in threads {
                endpoint.remove_waiter(*thread);
                endpoint.finish_handoff(*thread);
            }
        }
    }

    /// Destroys an endpoint owned by `caller`
    ///
    /// Queued receivers are woken with [`Wakeup::Cancelled`], any pending
    /// message is dropped and the owner's quota is released.
    pub fn destroy(
        &mut self,
        id: EndpointId,
        caller: ProcessId,
        ledger: &mut QuotaLedger,
        scheduler: &dyn Scheduler,
    ) -> Result<(), KernelError> {
        let index = self
            .index_of(id)
            .ok_or_else(|| KernelError::NotFound(id.to_string()))?;
        if self.slots[index].as_ref().map(Endpoint::owner) != Some(caller) {
            return Err(KernelError::PermissionDenied(format!(
                "{} does not own {}",
                caller, id
            )));
        }
        if let Some(endpoint) = self.slots[index].take() {
            Self::retire(endpoint, ledger, scheduler);
        }
        Ok(())
    }

    /// Destroys every endpoint owned by an exiting process
    pub fn release_owned(
        &mut self,
        owner: ProcessId,
        ledger: &mut QuotaLedger,
        scheduler: &dyn Scheduler,
    ) -> Vec<EndpointId> {
        let mut released = Vec::new();
        for slot in self.slots.iter_mut() {
            if slot.as_ref().is_some_and(|ep| ep.owner() == owner) {
                if let Some(endpoint) = slot.take() {
                    released.push(endpoint.id());
                    Self::retire(endpoint, ledger, scheduler);
                }
            }
        }
        released
    }

    fn retire(mut endpoint: Endpoint, ledger: &mut QuotaLedger, scheduler: &dyn Scheduler) {
        let key = WaitKey::Endpoint(endpoint.id());
        for thread in endpoint.drain_waiters() {
            // A thread that already exited has nothing to cancel
            let _ = scheduler.wake_one(key, thread, Wakeup::Cancelled);
        }
        if let Some(dropped) = endpoint.take() {
            log::debug!("{} destroyed with pending {}", endpoint.id(), dropped);
        }
        ledger.release(endpoint.owner(), ResourceKind::Endpoints);
        log::debug!("{} destroyed {}", endpoint.owner(), endpoint.id());
    }
}

impl Default for EndpointTable {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::ProcessId;
    use parking_lot::Mutex;
    use resources::QuotaCeilings;
    use std::collections::HashSet;

    /// Scheduler double that records wakeups instead of parking threads
    #[derive(Default)]
    struct RecordingScheduler {
        delivered: Mutex<Vec<(ThreadId, Wakeup)>>,
        dead: Mutex<HashSet<ThreadId>>,
    }

    impl RecordingScheduler {
        fn kill(&self, thread: ThreadId) {
            self.dead.lock().insert(thread);
        }

        fn delivered(&self) -> Vec<(ThreadId, Wakeup)> {
            self.delivered.lock().clone()
        }
    }

    impl Scheduler for RecordingScheduler {
        fn block_current_thread(&self, _: ThreadId, _: WaitKey) -> Wakeup {
            Wakeup::Cancelled
        }

        fn wake_one(&self, _: WaitKey, thread: ThreadId, wakeup: Wakeup) -> Result<(), Wakeup> {
            if self.dead.lock().contains(&thread) {
                return Err(wakeup);
            }
            self.delivered.lock().push((thread, wakeup));
            Ok(())
        }

        fn on_process_exit(&self, _: ProcessId) -> Vec<ThreadId> {
            Vec::new()
        }
    }

    const OWNER: ProcessId = ProcessId::new(1);
    const OTHER: ProcessId = ProcessId::new(2);

    fn owner_caller() -> Caller {
        Caller::new(OWNER, ThreadId::new(10))
    }

    fn msg(sender: ProcessId, bytes: &[u8]) -> Message {
        Message::new(sender, bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_create_respects_quota() {
        let mut table = EndpointTable::default();
        let mut ledger = QuotaLedger::new(QuotaCeilings::default().with_endpoints(2));

        table.create(OWNER, &mut ledger).unwrap();
        table.create(OWNER, &mut ledger).unwrap();
        let err = table.create(OWNER, &mut ledger).unwrap_err();

        assert!(matches!(err, KernelError::QuotaExceeded(_)));
        assert_eq!(table.count_owned(OWNER), 2);
        assert_eq!(ledger.count(OWNER, ResourceKind::Endpoints), 2);
    }

    #[test]
    fn test_create_full_table_reserves_nothing() {
        let mut table = EndpointTable::new(1);
        let mut ledger = QuotaLedger::default();

        table.create(OWNER, &mut ledger).unwrap();
        let err = table.create(OTHER, &mut ledger).unwrap_err();

        assert!(matches!(err, KernelError::CapacityExhausted(_)));
        assert_eq!(ledger.count(OTHER, ResourceKind::Endpoints), 0);
    }

    #[test]
    fn test_ids_never_reused() {
        let mut table = EndpointTable::new(1);
        let mut ledger = QuotaLedger::default();
        let sched = RecordingScheduler::default();

        let first = table.create(OWNER, &mut ledger).unwrap();
        table.destroy(first, OWNER, &mut ledger, &sched).unwrap();
        let second = table.create(OWNER, &mut ledger).unwrap();

        assert_ne!(first, second);
        assert!(!table.contains(first));
    }

    #[test]
    fn test_send_to_full_endpoint_keeps_first_message() {
        let mut table = EndpointTable::default();
        let mut ledger = QuotaLedger::default();
        let sched = RecordingScheduler::default();
        let ep = table.create(OWNER, &mut ledger).unwrap();

        table.send(ep, msg(OTHER, b"first"), &sched).unwrap();
        let err = table
            .send(ep, msg(ProcessId::new(3), b"second"), &sched)
            .unwrap_err();
        assert_eq!(err, KernelError::EndpointFull(ep));

        let pending = table.get(ep).and_then(Endpoint::pending).unwrap();
        assert_eq!(pending.payload(), b"first");
        assert_eq!(pending.sender(), OTHER);
    }

    #[test]
    fn test_recv_takes_pending_message() {
        let mut table = EndpointTable::default();
        let mut ledger = QuotaLedger::default();
        let sched = RecordingScheduler::default();
        let ep = table.create(OWNER, &mut ledger).unwrap();

        table.send(ep, msg(OTHER, b"hello"), &sched).unwrap();
        let outcome = table.recv_or_wait(ep, owner_caller()).unwrap();

        assert_eq!(outcome, RecvOutcome::Ready(msg(OTHER, b"hello")));
        assert_eq!(table.is_occupied(ep), Some(false));
    }

    #[test]
    fn test_recv_on_empty_queues_and_send_hands_off() {
        let mut table = EndpointTable::default();
        let mut ledger = QuotaLedger::default();
        let sched = RecordingScheduler::default();
        let ep = table.create(OWNER, &mut ledger).unwrap();

        assert_eq!(
            table.recv_or_wait(ep, owner_caller()).unwrap(),
            RecvOutcome::MustWait
        );
        table.send(ep, msg(OTHER, b"direct"), &sched).unwrap();

        assert_eq!(table.is_occupied(ep), Some(false));
        assert_eq!(
            sched.delivered(),
            vec![(ThreadId::new(10), msg(OTHER, b"direct").into_wakeup())]
        );
    }

    #[test]
    fn test_send_skips_dead_waiter() {
        let mut table = EndpointTable::default();
        let mut ledger = QuotaLedger::default();
        let sched = RecordingScheduler::default();
        let ep = table.create(OWNER, &mut ledger).unwrap();

        table.recv_or_wait(ep, owner_caller()).unwrap();
        sched.kill(ThreadId::new(10));
        table.send(ep, msg(OTHER, b"kept"), &sched).unwrap();

        assert!(sched.delivered().is_empty());
        assert_eq!(table.is_occupied(ep), Some(true));
    }

    #[test]
    fn test_recv_requires_owner() {
        let mut table = EndpointTable::default();
        let mut ledger = QuotaLedger::default();
        let ep = table.create(OWNER, &mut ledger).unwrap();

        let err = table
            .recv_or_wait(ep, Caller::new(OTHER, ThreadId::new(20)))
            .unwrap_err();
        assert!(matches!(err, KernelError::PermissionDenied(_)));
        assert_eq!(table.get(ep).map(Endpoint::waiter_count), Some(0));
    }

    #[test]
    fn test_destroy_cancels_waiters_and_releases_quota() {
        let mut table = EndpointTable::default();
        let mut ledger = QuotaLedger::default();
        let sched = RecordingScheduler::default();
        let ep = table.create(OWNER, &mut ledger).unwrap();
        table.recv_or_wait(ep, owner_caller()).unwrap();

        assert!(matches!(
            table.destroy(ep, OTHER, &mut ledger, &sched),
            Err(KernelError::PermissionDenied(_))
        ));
        table.destroy(ep, OWNER, &mut ledger, &sched).unwrap();

        assert_eq!(sched.delivered(), vec![(ThreadId::new(10), Wakeup::Cancelled)]);
        assert_eq!(ledger.count(OWNER, ResourceKind::Endpoints), 0);
        assert!(matches!(
            table.send(ep, msg(OTHER, b"late"), &sched),
            Err(KernelError::NotFound(_))
        ));
    }

    #[test]
    fn test_release_owned_only_touches_owner() {
        let mut table = EndpointTable::default();
        let mut ledger = QuotaLedger::default();
        let sched = RecordingScheduler::default();
        let a = table.create(OWNER, &mut ledger).unwrap();
        let b = table.create(OWNER, &mut ledger).unwrap();
        let c = table.create(OTHER, &mut ledger).unwrap();

        let released = table.release_owned(OWNER, &mut ledger, &sched);

        assert_eq!(released, vec![a, b]);
        assert!(table.contains(c));
        assert_eq!(table.len(), 1);
        assert_eq!(ledger.count(OWNER, ResourceKind::Endpoints), 0);
        assert_eq!(ledger.count(OTHER, ResourceKind::Endpoints), 1);
    }

    #[test]
    fn test_purge_and_cancel_waiters() {
        let mut table = EndpointTable::default();
        let mut ledger = QuotaLedger::default();
        let ep = table.create(OWNER, &mut ledger).unwrap();
        table.recv_or_wait(ep, owner_caller()).unwrap();
        table
            .recv_or_wait(ep, Caller::new(OWNER, ThreadId::new(11)))
            .unwrap();

        assert!(table.cancel_waiter(ep, ThreadId::new(11)));
        table.purge_threads(&[ThreadId::new(10)]);
        assert_eq!(table.get(ep).map(Endpoint::waiter_count), Some(0));
    }

    #[test]
    fn test_send_refused_until_handoff_finishes() {
        let mut table = EndpointTable::default();
        let mut ledger = QuotaLedger::default();
        let sched = RecordingScheduler::default();
        let ep = table.create(OWNER, &mut ledger).unwrap();

        table.recv_or_wait(ep, owner_caller()).unwrap();
        table.send(ep, msg(OTHER, b"first"), &sched).unwrap();
        assert_eq!(
            table.send(ep, msg(OTHER, b"second"), &sched),
            Err(KernelError::EndpointFull(ep))
        );

        table.finish_handoff(ep, ThreadId::new(10));
        table.send(ep, msg(OTHER, b"second"), &sched).unwrap();
        assert_eq!(table.is_occupied(ep), Some(true));
    }

    #[test]
    fn test_returned_handoff_lands_in_slot() {
        let mut table = EndpointTable::default();
        let mut ledger = QuotaLedger::default();
        let sched = RecordingScheduler::default();
        let ep = table.create(OWNER, &mut ledger).unwrap();

        table.recv_or_wait(ep, owner_caller()).unwrap();
        table.send(ep, msg(OTHER, b"again"), &sched).unwrap();
        table
            .return_handoff(ep, ThreadId::new(10), msg(OTHER, b"again"), &sched)
            .unwrap();

        let outcome = table.recv_or_wait(ep, owner_caller()).unwrap();
        assert_eq!(outcome, RecvOutcome::Ready(msg(OTHER, b"again")));
    }

    #[test]
    fn test_returned_handoff_goes_to_next_waiter() {
        let mut table = EndpointTable::default();
        let mut ledger = QuotaLedger::default();
        let sched = RecordingScheduler::default();
        let ep = table.create(OWNER, &mut ledger).unwrap();
        let second = Caller::new(OWNER, ThreadId::new(11));

        table.recv_or_wait(ep, owner_caller()).unwrap();
        table.recv_or_wait(ep, second).unwrap();
        table.send(ep, msg(OTHER, b"x"), &sched).unwrap();
        table
            .return_handoff(ep, ThreadId::new(10), msg(OTHER, b"x"), &sched)
            .unwrap();

        let delivered = sched.delivered();
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[1], (ThreadId::new(11), msg(OTHER, b"x").into_wakeup()));
        assert_eq!(table.get(ep).and_then(Endpoint::handoff), Some(ThreadId::new(11)));
        assert_eq!(table.is_occupied(ep), Some(false));
    }

    #[test]
    fn test_restore_after_take() {
        let mut table = EndpointTable::default();
        let mut ledger = QuotaLedger::default();
        let sched = RecordingScheduler::default();
        let ep = table.create(OWNER, &mut ledger).unwrap();

        table.send(ep, msg(OTHER, b"keep"), &sched).unwrap();
        let RecvOutcome::Ready(taken) = table.recv_or_wait(ep, owner_caller()).unwrap() else {
            panic!("expected a pending message");
        };
        table.restore(ep, taken).unwrap();
        assert_eq!(table.get(ep).and_then(Endpoint::pending), Some(&msg(OTHER, b"keep")));
    }
}
