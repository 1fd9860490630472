use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

/* ---------- lock-free SPSC sample ring (power-of-two capacity) ---------- */

pub(crate) fn next_pow2(mut x: usize) -> usize {
    if x <= 1 { return 1; }
    x -= 1;
    x |= x >> 1;
    x |= x >> 2;
    x |= x >> 4;
    x |= x >> 8;
    x |= x >> 16;
    #[cfg(target_pointer_width = "64")]
    { x |= x >> 32; }
    x + 1
}

/// Single-producer single-consumer ring of f32 samples.
///
/// Used both across threads (headless host sink) and inside the block
/// processor as its per-channel output FIFO. All storage is allocated up front.
pub struct SampleRing {
    // Interior mutability: single producer writes, single consumer reads.
    buf: UnsafeCell<Box<[f32]>>,
    mask: usize,
    write: AtomicUsize,
    read: AtomicUsize,
}

// Safety: SPSC discipline is upheld by callers; one writer and one reader exist.
// The writer only fills slots outside [read..write) and then advances write; the
// reader only reads [read..write) and then advances read.
unsafe impl Send for SampleRing {}
unsafe impl Sync for SampleRing {}

impl SampleRing {
    /// Usable capacity is at least `cap` samples.
    pub fn with_capacity(cap: usize) -> Self {
        let cap_pow2 = next_pow2(cap + 1);
        Self {
            buf: UnsafeCell::new(vec![0.0f32; cap_pow2].into_boxed_slice()),
            mask: cap_pow2 - 1,
            write: AtomicUsize::new(0),
            read: AtomicUsize::new(0),
        }
    }

    #[inline]
    fn span(&self, w: usize, r: usize) -> usize {
        w.wrapping_sub(r) & self.mask
    }

    /// Samples available to the consumer.
    pub fn len(&self) -> usize {
        self.span(self.write.load(Ordering::Acquire), self.read.load(Ordering::Acquire))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slots available to the producer.
    pub fn free(&self) -> usize {
        self.mask - self.len()
    }

    /// Producer: push the entire slice; returns false (pushing nothing) if it does not fit.
    pub fn push_slice(&self, data: &[f32]) -> bool {
        let r = self.read.load(Ordering::Acquire);
        let w = self.write.load(Ordering::Relaxed);
        let free = self.mask - self.span(w, r);
        if free < data.len() { return false; }

        // Safe because: single producer, and the free-space check keeps us off
        // indices the consumer may be reading.
        let buf = unsafe { &mut *self.buf.get() };
        let mut wi = w;
        for &v in data {
            buf[wi & self.mask] = v;
            wi = wi.wrapping_add(1);
        }
        self.write.store(wi, Ordering::Release);
        true
    }

    /// Producer: push one sample; false if full.
    #[inline]
    pub fn push(&self, v: f32) -> bool {
        self.push_slice(std::slice::from_ref(&v))
    }

    /// Consumer: pop exactly `out.len()` samples; false (popping nothing) if not enough data.
    pub fn pop_into(&self, out: &mut [f32]) -> bool {
        if self.len() < out.len() { return false; }
        self.pop_up_to(out);
        true
    }

    /// Consumer: pop as many samples as are available, up to `out.len()`.
    /// Returns the count written to the front of `out`.
    pub fn pop_up_to(&self, out: &mut [f32]) -> usize {
        let w = self.write.load(Ordering::Acquire);
        let r = self.read.load(Ordering::Relaxed);
        let n = self.span(w, r).min(out.len());

        // Safe because: single consumer, and the producer only writes beyond `w`.
        let buf = unsafe { &*self.buf.get() };
        let mut ri = r;
        for o in out[..n].iter_mut() {
            *o = buf[ri & self.mask];
            ri = ri.wrapping_add(1);
        }
        self.read.store(ri, Ordering::Release);
        n
    }

    /// Consumer: discard everything currently readable.
    pub fn clear(&self) {
        let w = self.write.load(Ordering::Acquire);
        self.read.store(w, Ordering::Release);
    }
}
