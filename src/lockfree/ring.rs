use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// Simple padding to reduce false sharing on hot atomics
#[repr(align(128))]
struct Pad<T>(T);

// Bounded SPSC circular buffer with power-of-two storage. One pusher, one
// popper; head/tail use acquire/release ordering. Building block for the
// slot ring below, which pairs two of these per channel.
struct Queue<T> {
    buf: Box<[MaybeUninit<T>]>,
    mask: usize,
    head: Pad<AtomicUsize>, // next write index
    tail: Pad<AtomicUsize>, // next read index
}

// Safety: the SPSC protocol gives each slot exactly one owner at a time via
// the head/tail indices, so sharing across threads is sound for T: Send.
unsafe impl<T: Send> Sync for Queue<T> {}
unsafe impl<T: Send> Send for Queue<T> {}

impl<T> Queue<T> {
    // `min_capacity` items must fit; one storage slot is kept empty to
    // distinguish full from empty, hence the +1 before rounding.
    fn with_capacity(min_capacity: usize) -> Self {
        let len = (min_capacity + 1).next_power_of_two();
        // Heap-allocate uninitialized storage to keep stack frames small.
        // SAFETY: slots are only read after being written, and Drop drains
        // whatever is still initialized.
        let buf: Box<[MaybeUninit<T>]> = unsafe { Box::new_uninit_slice(len).assume_init() };
        Self {
            buf,
            mask: len - 1,
            head: Pad(AtomicUsize::new(0)),
            tail: Pad(AtomicUsize::new(0)),
        }
    }

    // Returns Ok(()) if pushed, Err(item) if full.
    #[inline(always)]
    fn try_push(&self, item: T) -> Result<(), T> {
        let head = self.head.0.load(Ordering::Relaxed);
        let next = (head + 1) & self.mask;
        if next == self.tail.0.load(Ordering::Acquire) {
            return Err(item); // full
        }
        // SAFETY: slot is exclusively owned by the pusher until tail moves past it.
        let slot = unsafe {
            self.buf.get_unchecked(head & self.mask) as *const MaybeUninit<T> as *mut MaybeUninit<T>
        };
        unsafe {
            (*slot).write(item);
        }
        self.head.0.store(next, Ordering::Release);
        Ok(())
    }

    #[inline(always)]
    fn try_pop(&self) -> Option<T> {
        let tail = self.tail.0.load(Ordering::Relaxed);
        if tail == self.head.0.load(Ordering::Acquire) {
            return None; // empty
        }
        // SAFETY: slot was written by the pusher and not yet consumed.
        let slot = unsafe { self.buf.get_unchecked(tail & self.mask) as *const MaybeUninit<T> };
        let item = unsafe { (*slot).assume_init_read() };
        self.tail.0.store((tail + 1) & self.mask, Ordering::Release);
        Some(item)
    }

    #[inline(always)]
    fn len(&self) -> usize {
        let head = self.head.0.load(Ordering::Acquire);
        let tail = self.tail.0.load(Ordering::Acquire);
        head.wrapping_sub(tail) & self.mask
    }
}

impl<T> Drop for Queue<T> {
    fn drop(&mut self) {
        // Drain remaining items to drop them properly.
        while self.try_pop().is_some() {}
    }
}

/// Zero-allocation SPSC object recycler. Holds `C` pre-built slots of `T`
/// spread across two sub-queues:
/// - `free`: reusable slots awaiting the producer
/// - `ready`: filled slots awaiting the consumer
///
/// Usage (one producer thread, one consumer thread):
///   producer: `acquire()` → fill → `publish(slot)`
///   consumer: `consume()` → process → `release(slot)`
///
/// Invariant: exactly `C` slots exist; each is in `free` xor `ready` xor
/// held by the producer or consumer. The separate sub-queues keep the two
/// roles' indices on different cache lines.
pub struct SlotRing<T, const C: usize> {
    free: Queue<T>,
    ready: Queue<T>,
}

impl<T: Default, const C: usize> SlotRing<T, C> {
    pub fn new_pair() -> (RingProducer<T, C>, RingConsumer<T, C>) {
        let ring = Arc::new(Self {
            free: Queue::with_capacity(C),
            ready: Queue::with_capacity(C),
        });
        for _ in 0..C {
            // Cannot fail: the queue stores at least C items.
            let _ = ring.free.try_push(T::default());
        }
        (
            RingProducer { ring: ring.clone() },
            RingConsumer { ring },
        )
    }
}

/// Producer half: acquires empty slots and publishes filled ones.
pub struct RingProducer<T, const C: usize> {
    ring: Arc<SlotRing<T, C>>,
}

impl<T, const C: usize> RingProducer<T, C> {
    /// Take an empty slot out of `free`. None iff the pool is exhausted
    /// (the consumer is lagging).
    #[inline(always)]
    pub fn acquire(&self) -> Option<T> {
        self.ring.free.try_pop()
    }

    /// Hand a filled slot to the consumer. Err returns the slot when
    /// `ready` is full, which cannot happen while the acquire/publish and
    /// consume/release discipline is maintained.
    #[inline(always)]
    pub fn publish(&self, item: T) -> Result<(), T> {
        self.ring.ready.try_push(item)
    }

    #[inline(always)]
    pub fn free_size(&self) -> usize {
        self.ring.free.len()
    }
}

/// Consumer half: consumes filled slots and releases them back empty.
pub struct RingConsumer<T, const C: usize> {
    ring: Arc<SlotRing<T, C>>,
}

impl<T, const C: usize> RingConsumer<T, C> {
    /// Take the next filled slot out of `ready`. None iff nothing pending.
    #[inline(always)]
    pub fn consume(&self) -> Option<T> {
        self.ring.ready.try_pop()
    }

    /// Return a processed slot to `free` for producer reuse.
    #[inline(always)]
    pub fn release(&self, item: T) -> Result<(), T> {
        self.ring.free.try_push(item)
    }

    #[inline(always)]
    pub fn ready_size(&self) -> usize {
        self.ring.ready.len()
    }

    #[inline(always)]
    pub fn free_size(&self) -> usize {
        self.ring.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_publish_consume_release_round_trip() {
        let (tx, rx) = SlotRing::<Vec<u8>, 8>::new_pair();
        assert_eq!(tx.free_size(), 8);
        assert_eq!(rx.ready_size(), 0);

        let mut slot = tx.acquire().expect("free slot");
        slot.clear();
        slot.extend_from_slice(b"hello");
        tx.publish(slot).expect("ready not full");

        assert_eq!(rx.ready_size(), 1);
        let got = rx.consume().expect("ready slot");
        assert_eq!(&got[..], b"hello");
        rx.release(got).expect("free not full");

        assert_eq!(tx.free_size(), 8);
        assert_eq!(rx.ready_size(), 0);
    }

    #[test]
    fn test_conservation_at_quiescence() {
        let (tx, rx) = SlotRing::<u64, 16>::new_pair();
        // Move some slots to ready, leave the rest free.
        for i in 0..5u64 {
            let _slot = tx.acquire().unwrap();
            tx.publish(i).unwrap();
        }
        assert_eq!(tx.free_size() + rx.ready_size(), 16);
    }

    #[test]
    fn test_acquire_exhaustion() {
        let (tx, _rx) = SlotRing::<u64, 4>::new_pair();
        let mut held = Vec::new();
        for _ in 0..4 {
            held.push(tx.acquire().expect("slot available"));
        }
        assert!(tx.acquire().is_none());
    }

    #[test]
    fn test_capacity_is_fully_usable() {
        // All C slots can sit in ready at once; free drains to zero.
        let (tx, rx) = SlotRing::<u64, 8>::new_pair();
        for i in 0..8u64 {
            let _slot = tx.acquire().unwrap();
            tx.publish(i).unwrap();
        }
        assert_eq!(tx.free_size(), 0);
        assert_eq!(rx.ready_size(), 8);
        for expect in 0..8u64 {
            assert_eq!(rx.consume(), Some(expect));
        }
    }

    #[test]
    fn test_fifo_order_across_threads() {
        let (tx, rx) = SlotRing::<u64, 1024>::new_pair();
        let producer = std::thread::spawn(move || {
            for i in 0..100_000u64 {
                let _slot = loop {
                    match tx.acquire() {
                        Some(slot) => break slot,
                        None => std::thread::yield_now(),
                    }
                };
                let mut item = i;
                while let Err(v) = tx.publish(item) {
                    item = v;
                    std::thread::yield_now();
                }
            }
        });
        let mut expect = 0u64;
        while expect < 100_000 {
            match rx.consume() {
                Some(v) => {
                    assert_eq!(v, expect);
                    let _ = rx.release(v);
                    expect += 1;
                }
                None => std::thread::yield_now(),
            }
        }
        producer.join().unwrap();
    }
}
