// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded FIFO buffer shared between producer threads and the dispatcher.
//!
//! # Overflow
//!
//! The buffer never blocks a producer. When a push finds the buffer at
//! capacity, the oldest record is evicted and counted; the new record is
//! always enqueued. The dispatcher takes the count once per drain cycle so a
//! burst of evictions produces a single warning instead of one per record.
//!
//! # Signaling
//!
//! One mutex protects the ring, the drop counter, the closed flag and the
//! flush threshold. One condition variable carries both "threshold reached"
//! and "shutdown requested". Pushes below the threshold do not signal; the
//! dispatcher picks those records up when its timed wait expires.

use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Largest number of slots a buffer will allocate.
pub const MAX_CAPACITY: usize = 1 << 18;

/// Fixed-capacity ring with head index and length.
///
/// Slots are allocated once at construction, steady-state traffic never
/// reallocates.
#[derive(Debug)]
pub(crate) struct RingBuffer<T> {
    slots: Vec<Option<T>>,
    head: usize,
    len: usize,
}

impl<T> RingBuffer<T> {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            head: 0,
            len: 0,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends at the tail. Returns the evicted head when the ring was full.
    pub(crate) fn push_back(&mut self, item: T) -> Option<T> {
        let capacity = self.capacity();
        if self.len == capacity {
            let evicted = self.slots[self.head].replace(item);
            self.head = (self.head + 1) % capacity;
            return evicted;
        }
        let tail = (self.head + self.len) % capacity;
        self.slots[tail] = Some(item);
        self.len += 1;
        None
    }

    /// Removes every element, oldest first.
    pub(crate) fn drain(&mut self) -> Vec<T> {
        let capacity = self.capacity();
        let mut out = Vec::with_capacity(self.len);
        for offset in 0..self.len {
            if let Some(item) = self.slots[(self.head + offset) % capacity].take() {
                out.push(item);
            }
        }
        self.head = 0;
        self.len = 0;
        out
    }
}

/// Returned by [`BoundedEventBuffer::push`] once the buffer has been closed.
/// Carries the rejected record back to the caller.
#[derive(thiserror::Error)]
#[error("event buffer is closed")]
pub struct BufferClosed<T>(pub T);

impl<T> fmt::Debug for BufferClosed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BufferClosed(..)")
    }
}

/// Result of one dispatcher wait.
#[derive(Debug)]
pub struct Drained<T> {
    /// Everything that was buffered, in push order. May be empty.
    pub records: Vec<T>,
    /// Evictions since the previous drain.
    pub dropped: u64,
    /// The buffer was closed when this drain happened; no record will follow.
    pub closed: bool,
}

#[derive(Debug)]
struct BufferState<T> {
    ring: RingBuffer<T>,
    dropped: u64,
    closed: bool,
    flush_threshold: usize,
    /// The dispatcher is parked in `wait_for_batch`.
    waiting: bool,
}

#[derive(Debug)]
pub struct BoundedEventBuffer<T> {
    state: Mutex<BufferState<T>>,
    signal: Condvar,
}

impl<T> BoundedEventBuffer<T> {
    /// Both values are clamped to at least 1; `capacity` is also clamped to
    /// [`MAX_CAPACITY`].
    pub fn new(capacity: usize, flush_threshold: usize) -> Self {
        Self {
            state: Mutex::new(BufferState {
                ring: RingBuffer::with_capacity(capacity.min(MAX_CAPACITY)),
                dropped: 0,
                closed: false,
                flush_threshold: flush_threshold.max(1),
                waiting: false,
            }),
            signal: Condvar::new(),
        }
    }

    // Every critical section leaves the state consistent, so a panic while
    // holding the lock cannot leave anything half-applied.
    fn lock(&self) -> MutexGuard<'_, BufferState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueues at the tail, evicting the oldest record when full.
    ///
    /// Never blocks beyond the lock acquisition. Wakes the dispatcher once the
    /// buffered count reaches the flush threshold.
    pub fn push(&self, item: T) -> Result<(), BufferClosed<T>> {
        let mut state = self.lock();
        if state.closed {
            return Err(BufferClosed(item));
        }
        if state.ring.push_back(item).is_some() {
            state.dropped += 1;
        }
        if state.ring.len() >= state.flush_threshold {
            self.signal.notify_one();
        }
        Ok(())
    }

    /// Atomically removes and returns everything buffered, oldest first.
    pub fn drain_all(&self) -> Vec<T> {
        self.lock().ring.drain()
    }

    /// Advisory; concurrent pushes may change it right after return.
    pub fn size(&self) -> usize {
        self.lock().ring.len()
    }

    pub fn capacity(&self) -> usize {
        self.lock().ring.capacity()
    }

    /// Returns the number of evictions since the last call and resets it.
    pub fn take_dropped_count(&self) -> u64 {
        std::mem::take(&mut self.lock().dropped)
    }

    pub fn flush_threshold(&self) -> usize {
        self.lock().flush_threshold
    }

    /// Changes the size that wakes the dispatcher early. Clamped to 1; a zero
    /// threshold would never register as reached. Records already buffered
    /// are unaffected.
    pub fn set_flush_threshold(&self, flush_threshold: usize) {
        let mut state = self.lock();
        state.flush_threshold = flush_threshold.max(1);
        self.signal.notify_all();
    }

    /// Marks the buffer closed and wakes the dispatcher. Returns `false` when
    /// it was already closed.
    pub fn close(&self) -> bool {
        let mut state = self.lock();
        let newly_closed = !state.closed;
        state.closed = true;
        self.signal.notify_all();
        newly_closed
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Whether the dispatcher is currently parked waiting for records.
    pub fn is_dispatcher_waiting(&self) -> bool {
        self.lock().waiting
    }

    /// Blocks while the buffer is empty and open, for at most `timeout`
    /// (`Duration::ZERO` waits for a signal only), then drains.
    ///
    /// The drain and the dropped count are taken in the same critical section
    /// that observed the wake-up condition.
    pub fn wait_for_batch(&self, timeout: Duration) -> Drained<T> {
        let mut state = self.lock();
        state.waiting = true;
        let idle = |s: &mut BufferState<T>| s.ring.is_empty() && !s.closed;
        let mut state = if timeout.is_zero() {
            self.signal
                .wait_while(state, idle)
                .unwrap_or_else(PoisonError::into_inner)
        } else {
            self.signal
                .wait_timeout_while(state, timeout, idle)
                .unwrap_or_else(PoisonError::into_inner)
                .0
        };
        state.waiting = false;
        Drained {
            records: state.ring.drain(),
            dropped: std::mem::take(&mut state.dropped),
            closed: state.closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_ring_push_and_drain_in_order() {
        let mut ring = RingBuffer::with_capacity(4);
        for i in 0..3 {
            assert!(ring.push_back(i).is_none());
        }
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.drain(), vec![0, 1, 2]);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_ring_evicts_head_when_full() {
        let mut ring = RingBuffer::with_capacity(3);
        for i in 0..3 {
            ring.push_back(i);
        }
        assert_eq!(ring.push_back(3), Some(0));
        assert_eq!(ring.push_back(4), Some(1));
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.drain(), vec![2, 3, 4]);
    }

    #[test]
    fn test_ring_wraps_after_drain() {
        let mut ring = RingBuffer::with_capacity(2);
        ring.push_back("a");
        ring.push_back("b");
        ring.push_back("c");
        assert_eq!(ring.drain(), vec!["b", "c"]);
        ring.push_back("d");
        assert_eq!(ring.drain(), vec!["d"]);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let buffer: BoundedEventBuffer<u8> = BoundedEventBuffer::new(0, 0);
        assert_eq!(buffer.capacity(), 1);
        assert_eq!(buffer.flush_threshold(), 1);
    }

    #[test]
    fn test_capacity_is_clamped_to_max() {
        let buffer: BoundedEventBuffer<u8> = BoundedEventBuffer::new(usize::MAX, 1);
        assert_eq!(buffer.capacity(), MAX_CAPACITY);
    }

    #[test]
    fn test_close_error_display() {
        let buffer = BoundedEventBuffer::new(1, 1);
        buffer.close();
        let rejected = buffer.push(7u8).unwrap_err();
        assert_eq!(rejected.to_string(), "event buffer is closed");
        assert_eq!(format!("{rejected:?}"), "BufferClosed(..)");
    }

    #[test]
    fn test_drain_all_empty() {
        let buffer: BoundedEventBuffer<u32> = BoundedEventBuffer::new(8, 4);
        assert!(buffer.drain_all().is_empty());
        assert_eq!(buffer.size(), 0);
    }

    #[test]
    fn test_drop_oldest_counts_each_eviction() {
        let buffer = BoundedEventBuffer::new(4, 100);
        for i in 0..7 {
            buffer.push(i).unwrap();
        }
        assert_eq!(buffer.size(), 4);
        assert_eq!(buffer.take_dropped_count(), 3);
        assert_eq!(buffer.take_dropped_count(), 0);
        assert_eq!(buffer.drain_all(), vec![3, 4, 5, 6]);
    }

    #[test]
    fn test_push_after_close_is_rejected() {
        let buffer = BoundedEventBuffer::new(4, 2);
        buffer.push("kept").unwrap();
        assert!(buffer.close());
        assert!(!buffer.close());

        let rejected = buffer.push("late").unwrap_err();
        assert_eq!(rejected.0, "late");
        assert_eq!(buffer.drain_all(), vec!["kept"]);
    }

    #[test]
    fn test_set_flush_threshold_clamps_to_one() {
        let buffer: BoundedEventBuffer<u8> = BoundedEventBuffer::new(8, 4);
        buffer.set_flush_threshold(0);
        assert_eq!(buffer.flush_threshold(), 1);
        buffer.set_flush_threshold(6);
        assert_eq!(buffer.flush_threshold(), 6);
    }

    #[test]
    fn test_wait_for_batch_times_out_empty() {
        let buffer: BoundedEventBuffer<u8> = BoundedEventBuffer::new(8, 4);
        let started = Instant::now();
        let drained = buffer.wait_for_batch(Duration::from_millis(30));
        assert!(drained.records.is_empty());
        assert!(!drained.closed);
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_wait_for_batch_returns_immediately_when_not_empty() {
        let buffer = BoundedEventBuffer::new(8, 4);
        buffer.push(1).unwrap();
        let started = Instant::now();
        let drained = buffer.wait_for_batch(Duration::from_secs(60));
        assert_eq!(drained.records, vec![1]);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_wait_for_batch_reports_dropped_with_batch() {
        let buffer = BoundedEventBuffer::new(2, 10);
        for i in 0..5 {
            buffer.push(i).unwrap();
        }
        let drained = buffer.wait_for_batch(Duration::from_millis(1));
        assert_eq!(drained.records, vec![3, 4]);
        assert_eq!(drained.dropped, 3);
        assert_eq!(buffer.take_dropped_count(), 0);
    }

    #[test]
    fn test_threshold_push_wakes_waiter() {
        let buffer = Arc::new(BoundedEventBuffer::new(16, 3));
        let waiter = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                let started = Instant::now();
                let drained = buffer.wait_for_batch(Duration::from_secs(60));
                (drained.records, started.elapsed())
            })
        };

        while !buffer.is_dispatcher_waiting() {
            thread::sleep(Duration::from_millis(1));
        }
        for i in 0..3 {
            buffer.push(i).unwrap();
        }

        let (records, elapsed) = waiter.join().unwrap();
        assert_eq!(records, vec![0, 1, 2]);
        assert!(!buffer.is_dispatcher_waiting());
        assert!(elapsed < Duration::from_secs(10));
    }

    #[test]
    fn test_close_wakes_signal_only_waiter() {
        let buffer: Arc<BoundedEventBuffer<u8>> = Arc::new(BoundedEventBuffer::new(16, 3));
        let waiter = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || buffer.wait_for_batch(Duration::ZERO))
        };

        thread::sleep(Duration::from_millis(20));
        buffer.close();

        let drained = waiter.join().unwrap();
        assert!(drained.closed);
        assert!(drained.records.is_empty());
    }

    #[test]
    fn test_concurrent_producers_lose_nothing_below_capacity() {
        let buffer = Arc::new(BoundedEventBuffer::new(10_000, 10_000));
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let buffer = Arc::clone(&buffer);
                thread::spawn(move || {
                    for i in 0..500 {
                        buffer.push((p, i)).unwrap();
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        let drained = buffer.drain_all();
        assert_eq!(drained.len(), 2_000);
        assert_eq!(buffer.take_dropped_count(), 0);
        for p in 0..4 {
            let mine: Vec<_> = drained.iter().filter(|(q, _)| *q == p).map(|(_, i)| *i).collect();
            assert_eq!(mine, (0..500).collect::<Vec<_>>());
        }
    }

    proptest! {
        #[test]
        fn prop_drains_preserve_push_order(
            pushes in 1usize..300,
            drain_every in 1usize..50,
        ) {
            let buffer = BoundedEventBuffer::new(pushes, 1);
            let mut seen = Vec::new();
            for i in 0..pushes {
                buffer.push(i).unwrap();
                if i % drain_every == 0 {
                    seen.extend(buffer.drain_all());
                }
            }
            seen.extend(buffer.drain_all());
            prop_assert_eq!(seen, (0..pushes).collect::<Vec<_>>());
        }

        #[test]
        fn prop_overflow_keeps_newest(capacity in 1usize..64, extra in 1usize..64) {
            let buffer = BoundedEventBuffer::new(capacity, capacity);
            for i in 0..capacity + extra {
                buffer.push(i).unwrap();
            }
            prop_assert_eq!(buffer.take_dropped_count(), extra as u64);
            prop_assert_eq!(buffer.drain_all(), (extra..capacity + extra).collect::<Vec<_>>());
        }
    }
}
