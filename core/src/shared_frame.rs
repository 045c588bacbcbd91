//! Double-buffered hand-off of processed audio blocks.
//!
//! The producer fills the back frame and then flips `active`; the consumer
//! reads the active frame under a lease. The producer never writes a leased
//! frame: if the consumer is still holding the only writable frame, the
//! publish is skipped and reported as [`DecoderError::FrameBusy`].
//!
//! The lease handshake is Dekker-style (store own flag, then load the other
//! side's), so every access here uses `SeqCst`.

use std::cell::UnsafeCell;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::error::{DecoderError, Result};
use crate::{MAX_RAW_SAMPLES, SPECTRUM_SIZE};

const NO_FRAME: usize = usize::MAX;

/// One processed audio block plus decoder-facing metadata
#[derive(Clone)]
pub struct SharedFrame {
    pub samples: [i16; MAX_RAW_SAMPLES],
    pub sample_count: usize,
    /// Magnitude bins; only filled when an FFT stage exists upstream
    pub spectrum: [i16; SPECTRUM_SIZE],
    pub spectrum_len: usize,
    pub bin_width: f32,
    pub dominant_freq: f32,
    pub dominant_amp: f32,
    /// Frequency range the active decoder suggests for display (Hz)
    pub display_min_freq: u16,
    pub display_max_freq: u16,
    /// Monotonic publish counter, starting at 1
    pub sequence: u64,
}

impl SharedFrame {
    pub fn new() -> Self {
        Self {
            samples: [0; MAX_RAW_SAMPLES],
            sample_count: 0,
            spectrum: [0; SPECTRUM_SIZE],
            spectrum_len: 0,
            bin_width: 0.0,
            dominant_freq: 0.0,
            dominant_amp: 0.0,
            display_min_freq: 0,
            display_max_freq: 0,
            sequence: 0,
        }
    }

    pub fn raw(&self) -> &[i16] {
        &self.samples[..self.sample_count]
    }

    pub fn spectrum(&self) -> &[i16] {
        &self.spectrum[..self.spectrum_len]
    }

    /// Copy a block of raw samples in, truncating to the frame capacity
    pub fn set_raw(&mut self, block: &[i16]) {
        let n = block.len().min(MAX_RAW_SAMPLES);
        self.samples[..n].copy_from_slice(&block[..n]);
        self.sample_count = n;
    }
}

impl Default for SharedFrame {
    fn default() -> Self {
        Self::new()
    }
}

/// The two frames plus the index/lease atomics. Single producer, single consumer.
pub struct FrameExchange {
    frames: [UnsafeCell<SharedFrame>; 2],
    active: AtomicUsize,
    lease: AtomicUsize,
    published: AtomicU64,
    busy: AtomicU64,
}

// SAFETY: the producer only writes the non-active frame after checking it is
// not leased; the consumer only reads a frame it has leased and confirmed active.
unsafe impl Sync for FrameExchange {}

impl FrameExchange {
    pub fn new() -> Self {
        Self {
            frames: [UnsafeCell::new(SharedFrame::new()), UnsafeCell::new(SharedFrame::new())],
            active: AtomicUsize::new(NO_FRAME),
            lease: AtomicUsize::new(NO_FRAME),
            published: AtomicU64::new(0),
            busy: AtomicU64::new(0),
        }
    }

    /// Producer side: fill the back frame with `fill` and make it active
    pub fn publish_with<F>(&self, fill: F) -> Result<u64>
    where
        F: FnOnce(&mut SharedFrame),
    {
        let back = match self.active.load(Ordering::SeqCst) {
            0 => 1,
            _ => 0,
        };
        if self.lease.load(Ordering::SeqCst) == back {
            self.busy.fetch_add(1, Ordering::Relaxed);
            return Err(DecoderError::FrameBusy);
        }

        let sequence = self.published.load(Ordering::Relaxed) + 1;
        // SAFETY: `back` is neither active nor leased
        let frame = unsafe { &mut *self.frames[back].get() };
        fill(frame);
        frame.sequence = sequence;

        self.published.store(sequence, Ordering::Relaxed);
        self.active.store(back, Ordering::SeqCst);
        Ok(sequence)
    }

    /// Consumer side: lease the active frame. `None` before the first publish.
    pub fn snapshot(&self) -> Option<FrameGuard<'_>> {
        loop {
            let index = self.active.load(Ordering::SeqCst);
            if index == NO_FRAME {
                return None;
            }
            self.lease.store(index, Ordering::SeqCst);
            if self.active.load(Ordering::SeqCst) == index {
                return Some(FrameGuard { exchange: self, index });
            }
            // Flipped between load and lease; the producer may be writing `index`
            self.lease.store(NO_FRAME, Ordering::SeqCst);
        }
    }

    /// Index of the frame the consumer may read, if any has been published
    pub fn active_index(&self) -> Option<usize> {
        match self.active.load(Ordering::SeqCst) {
            NO_FRAME => None,
            index => Some(index),
        }
    }

    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Publishes skipped because the back frame was leased
    pub fn busy_count(&self) -> u64 {
        self.busy.load(Ordering::Relaxed)
    }
}

impl Default for FrameExchange {
    fn default() -> Self {
        Self::new()
    }
}

/// Read access to the active frame; releases the lease on drop
pub struct FrameGuard<'a> {
    exchange: &'a FrameExchange,
    index: usize,
}

impl FrameGuard<'_> {
    pub fn index(&self) -> usize {
        self.index
    }
}

impl Deref for FrameGuard<'_> {
    type Target = SharedFrame;

    fn deref(&self) -> &SharedFrame {
        // SAFETY: the frame is leased, so the producer will not write it
        unsafe { &*self.exchange.frames[self.index].get() }
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        self.exchange.lease.store(NO_FRAME, Ordering::SeqCst);
    }
}
