//! Bounded event storage for the audit logs
//!
//! Every audit log keeps at most `capacity` events. When full, the oldest
//! half is discarded in one step and counted in [`EventRing::dropped`]. A
//! capacity of zero turns recording off.

/// Default number of events each audit log retains
pub const DEFAULT_AUDIT_CAPACITY: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRing<E> {
    events: Vec<E>,
    capacity: usize,
    dropped: u64,
}

impl<E> EventRing<E> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Vec::new(),
            capacity,
            dropped: 0,
        }
    }

    pub fn push(&mut self, event: E) {
        if self.capacity == 0 {
            self.dropped += 1;
            return;
        }
        if self.events.len() >= self.capacity {
            let evict = (self.capacity / 2).max(1);
            self.events.drain(..evict);
            self.dropped += evict as u64;
        }
        self.events.push(event);
    }

    /// Retained events, oldest first
    pub fn as_slice(&self) -> &[E] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Events discarded to stay within capacity
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl<E> Default for EventRing<E> {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_AUDIT_CAPACITY)
    }
}
