//! Lock-free ring of transfer buffer slots
//!
//! Producers (backend threads) reserve a ticket on `head`, consumers claim a
//! ticket on `tail`. Each slot carries a stamp that says whose turn it is:
//!
//! - `stamp == ticket`: empty, producer holding `ticket` may store
//! - `stamp == ticket + 1`: full, consumer holding `ticket` may take
//! - after the take the stamp becomes `ticket + capacity`, the next lap's ticket
//!
//! A producer never writes into a slot whose stamp says it is still occupied,
//! and `put` on a full ring hands the buffer back instead of waiting.

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::atomic::AtomicCell;
use crossbeam_utils::{Backoff, CachePadded};

use super::buffer::TransferBuffer;

struct Slot {
    stamp: AtomicUsize,
    buffer: AtomicCell<Option<Box<TransferBuffer>>>,
}

/// Bounded multi-producer ring of owned transfer buffers
pub struct CircularBufferPool {
    slots: Box<[Slot]>,
    mask: usize,
    head: CachePadded<AtomicUsize>,
    tail: CachePadded<AtomicUsize>,
}

impl CircularBufferPool {
    /// Create pool with `capacity` slots, rounded up to a power of two (min 2)
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2).next_power_of_two();
        let slots = (0..capacity)
            .map(|i| Slot {
                stamp: AtomicUsize::new(i),
                buffer: AtomicCell::new(None),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            slots,
            mask: capacity - 1,
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Number of slots
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Buffers handed in but not yet taken
    ///
    /// Diagnostic only; the value may be stale by the time it is read.
    #[must_use]
    pub fn size(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        head.wrapping_sub(tail).min(self.capacity())
    }

    /// Hand a buffer to the consumer
    ///
    /// # Errors
    ///
    /// Returns the buffer unchanged if every slot is occupied.
    pub fn put(&self, buffer: Box<TransferBuffer>) -> Result<(), Box<TransferBuffer>> {
        let backoff = Backoff::new();
        let mut head = self.head.load(Ordering::Relaxed);

        loop {
            let tail = self.tail.load(Ordering::Acquire);
            if head.wrapping_sub(tail) >= self.capacity() {
                return Err(buffer);
            }
            match self.head.compare_exchange_weak(
                head,
                head.wrapping_add(1),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(current) => {
                    head = current;
                    backoff.spin();
                }
            }
        }

        let slot = &self.slots[head & self.mask];

        // The consumer of the previous lap may still be taking its buffer
        let backoff = Backoff::new();
        while slot.stamp.load(Ordering::Acquire) != head {
            backoff.snooze();
        }

        let previous = slot.buffer.swap(Some(buffer));
        debug_assert!(previous.is_none(), "slot {} was still occupied", head & self.mask);
        if previous.is_some() {
            tracing::error!(ticket = head, "buffer pool slot occupied on put");
        }

        slot.stamp.store(head.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Take the oldest buffer, or `None` if the ring is empty
    ///
    /// If a producer has reserved the slot but not yet stored into it, this
    /// spins until the store lands.
    pub fn try_get(&self) -> Option<Box<TransferBuffer>> {
        let backoff = Backoff::new();
        let mut tail = self.tail.load(Ordering::Relaxed);

        loop {
            let head = self.head.load(Ordering::Acquire);
            if tail == head {
                return None;
            }
            match self.tail.compare_exchange_weak(
                tail,
                tail.wrapping_add(1),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(current) => {
                    tail = current;
                    backoff.spin();
                }
            }
        }

        Some(self.take_slot(tail))
    }

    /// Take the oldest buffer, busy-waiting until one arrives
    pub fn get(&self) -> Box<TransferBuffer> {
        let backoff = Backoff::new();
        loop {
            if let Some(buffer) = self.try_get() {
                return buffer;
            }
            backoff.snooze();
        }
    }

    /// Take every buffer reserved before this call
    ///
    /// Buffers put concurrently with the drain are left for the next one.
    pub fn drain(&self) -> Vec<Box<TransferBuffer>> {
        let head = self.head.load(Ordering::Acquire);
        let mut buffers = Vec::new();

        while self.tail.load(Ordering::Acquire) != head {
            match self.try_get() {
                Some(buffer) => buffers.push(buffer),
                None => break,
            }
        }
        buffers
    }

    fn take_slot(&self, ticket: usize) -> Box<TransferBuffer> {
        let slot = &self.slots[ticket & self.mask];
        let ready = ticket.wrapping_add(1);

        let backoff = Backoff::new();
        let buffer = loop {
            if slot.stamp.load(Ordering::Acquire) == ready {
                if let Some(buffer) = slot.buffer.take() {
                    break buffer;
                }
            }
            backoff.snooze();
        };

        slot.stamp
            .store(ticket.wrapping_add(self.capacity()), Ordering::Release);
        buffer
    }
}

impl std::fmt::Debug for CircularBufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircularBufferPool")
            .field("capacity", &self.capacity())
            .field("size", &self.size())
            .finish()
    }
}
