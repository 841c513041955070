//! Single-slot endpoint

use crate::Message;
use core_types::{EndpointId, ProcessId, ThreadId};
use std::collections::VecDeque;

/// A mailbox holding at most one pending message
///
/// Receivers that find the slot empty queue up in FIFO order. A send with
/// waiters present hands the message straight to the first waiter, so the
/// slot is only filled when nobody is waiting.
///
/// A handed-off message keeps the slot reserved until its receiver has
/// copied it out, so a receiver that faults can always give it back.
#[derive(Debug, Clone)]
pub struct Endpoint {
    id: EndpointId,
    owner: ProcessId,
    slot: Option<Message>,
    waiters: VecDeque<ThreadId>,
    handoff: Option<ThreadId>,
}

impl Endpoint {
    /// Creates an empty endpoint
    pub fn new(id: EndpointId, owner: ProcessId) -> Self {
        Self {
            id,
            owner,
            slot: None,
            waiters: VecDeque::new(),
            handoff: None,
        }
    }

    pub fn id(&self) -> EndpointId {
        self.id
    }

    pub fn owner(&self) -> ProcessId {
        self.owner
    }

    /// Returns true if a message is pending
    pub fn is_occupied(&self) -> bool {
        self.slot.is_some()
    }

    /// Returns true if a send can be accepted right now
    pub fn accepts_send(&self) -> bool {
        self.slot.is_none() && self.handoff.is_none()
    }

    /// Receiver still copying out a handed-off message
    pub fn handoff(&self) -> Option<ThreadId> {
        self.handoff
    }

    pub fn begin_handoff(&mut self, thread: ThreadId) {
        self.handoff = Some(thread);
    }

    /// Clears the reservation held by `thread`
    pub fn finish_handoff(&mut self, thread: ThreadId) -> bool {
        if self.handoff == Some(thread) {
            self.handoff = None;
            return true;
        }
        false
    }

    /// Returns the pending message without taking it
    pub fn pending(&self) -> Option<&Message> {
        self.slot.as_ref()
    }

    /// Stores a message in the empty slot
    ///
    /// Gives the message back if the slot is occupied.
    pub fn deposit(&mut self, message: Message) -> Result<(), Message> {
        if self.slot.is_some() {
            return Err(message);
        }
        self.slot = Some(message);
        Ok(())
    }

    /// Takes the pending message, emptying the slot
    pub fn take(&mut self) -> Option<Message> {
        self.slot.take()
    }

    pub fn enqueue_waiter(&mut self, thread: ThreadId) {
        self.waiters.push_back(thread);
    }

    pub fn pop_waiter(&mut self) -> Option<ThreadId> {
        self.waiters.pop_front()
    }

    /// Removes `thread` from the wait queue, returning whether it was there
    pub fn remove_waiter(&mut self, thread: ThreadId) -> bool {
        let before = self.waiters.len();
        self.waiters.retain(|t| *t != thread);
        self.waiters.len() != before
    }

    /// Empties the wait queue
    pub fn drain_waiters(&mut self) -> Vec<ThreadId> {
        self.waiters.drain(..).collect()
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.len()
    }
}
