//! Lock-free single-producer / single-consumer ring buffer.
//!
//! One context pushes, one context pops; the two only meet through the
//! `head` and `tail` atomics. The producer is the only writer of `head`,
//! the consumer the only writer of `tail`.
//!
//! Each side is entered through a claim flag. A second thread arriving at a
//! side that is already in use does not touch the slots: its `push` reports
//! the buffer as full and its `pop` as empty. The buffer stays wait-free and
//! sound even when shared more widely than one producer and one consumer.
//!
//! # Memory ordering
//!
//! - Producer writes the slot, then publishes `head` with `Release`
//! - Consumer reads `head` with `Acquire` before touching the slot
//! - The same pairing runs the other way for `tail`, so a slot is never
//!   rewritten before the consumer has finished copying it out

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

const NO_CLEAR: usize = usize::MAX;

/// Fixed-capacity SPSC queue of `N` slots (`N - 1` usable), `N` a power of two
pub struct RingBuffer<T: Copy, const N: usize> {
    slots: [UnsafeCell<MaybeUninit<T>>; N],
    head: AtomicUsize,
    tail: AtomicUsize,
    clear_mark: AtomicUsize,
    dropped: AtomicUsize,
    pushing: AtomicBool,
    popping: AtomicBool,
}

/// Held while one thread acts as a side of the buffer
struct SideClaim<'a>(&'a AtomicBool);

impl<'a> SideClaim<'a> {
    fn try_claim(flag: &'a AtomicBool) -> Option<Self> {
        (!flag.swap(true, Ordering::Acquire)).then(|| Self(flag))
    }
}

impl Drop for SideClaim<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// SAFETY: a slot is written only under the producer claim while it lies
// outside [tail, head), and read only under the consumer claim while it lies
// inside it. The claims admit one thread per side at a time.
unsafe impl<T: Copy + Send, const N: usize> Sync for RingBuffer<T, N> {}

impl<T: Copy, const N: usize> RingBuffer<T, N> {
    const MASK: usize = N - 1;

    /// Evaluated at monomorphization; a bad `N` fails the build
    const SIZE_CHECK: () = assert!(
        N >= 2 && N.is_power_of_two(),
        "RingBuffer size must be a power of two"
    );

    pub fn new() -> Self {
        let () = Self::SIZE_CHECK;
        Self {
            slots: std::array::from_fn(|_| UnsafeCell::new(MaybeUninit::uninit())),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            clear_mark: AtomicUsize::new(NO_CLEAR),
            dropped: AtomicUsize::new(0),
            pushing: AtomicBool::new(false),
            popping: AtomicBool::new(false),
        }
    }

    /// Usable slots
    pub const fn capacity(&self) -> usize {
        N - 1
    }

    /// Producer side. Hands the item back when the buffer is full, or when
    /// another thread is pushing at the same moment.
    pub fn push(&self, item: T) -> Result<(), T> {
        let Some(_claim) = SideClaim::try_claim(&self.pushing) else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(item);
        };

        let head = self.head.load(Ordering::Relaxed);
        let next = (head + 1) & Self::MASK;
        if next == self.tail.load(Ordering::Acquire) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(item);
        }

        // SAFETY: `head` is outside [tail, head), so the consumer is not reading it
        unsafe {
            (*self.slots[head].get()).write(item);
        }
        self.head.store(next, Ordering::Release);
        Ok(())
    }

    /// Consumer side. `None` when empty, or when another thread is popping.
    pub fn pop(&self) -> Option<T> {
        let _claim = SideClaim::try_claim(&self.popping)?;
        self.apply_pending_clear();

        let tail = self.tail.load(Ordering::Relaxed);
        if tail == self.head.load(Ordering::Acquire) {
            return None;
        }

        // SAFETY: `tail` is inside [tail, head) and was initialised by the producer
        let item = unsafe { (*self.slots[tail].get()).assume_init_read() };
        self.tail.store((tail + 1) & Self::MASK, Ordering::Release);
        Some(item)
    }

    /// Consumer side: pop everything currently queued
    pub fn drain(&self) -> impl Iterator<Item = T> + '_ {
        std::iter::from_fn(move || self.pop())
    }

    /// Producer side: discard everything pushed so far.
    ///
    /// The consumer applies the discard before its next `pop`, so `tail`
    /// keeps a single writer.
    pub fn clear(&self) {
        let head = self.head.load(Ordering::Acquire);
        self.clear_mark.store(head, Ordering::Release);
    }

    fn apply_pending_clear(&self) {
        let mark = self.clear_mark.swap(NO_CLEAR, Ordering::Acquire);
        if mark == NO_CLEAR {
            return;
        }
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        let pending = head.wrapping_sub(tail) & Self::MASK;
        let to_mark = mark.wrapping_sub(tail) & Self::MASK;
        // Only move forward; the consumer may already be past the mark
        if to_mark <= pending {
            self.tail.store(mark, Ordering::Release);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == self.tail.load(Ordering::Acquire)
    }

    pub fn is_full(&self) -> bool {
        let head = self.head.load(Ordering::Acquire);
        ((head + 1) & Self::MASK) == self.tail.load(Ordering::Acquire)
    }

    /// Items currently queued (a snapshot; either side may move concurrently)
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        head.wrapping_sub(tail) & Self::MASK
    }

    /// Pushes rejected because the buffer was full
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl<T: Copy, const N: usize> Default for RingBuffer<T, N> {
    fn default() -> Self {
        Self::new()
    }
}
