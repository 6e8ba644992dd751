//! Bounded concurrent frame ring buffer with stable, self-invalidating keys.
//!
//! Ported from the embedded SDK's single-`LOCK_HANDLE` ring buffer
//! (`FrameRingBuffer_t`): a `capacity+1`-slot array disambiguates full from
//! empty, serial numbers advance modulo a multiple of the slot count so
//! `serial % size` is always a faithful positional index, and the C
//! `{fn, appData}` destructor pair becomes a boxed closure run at most once.

use std::sync::{Arc, Mutex, Weak};

use bytes::Bytes;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RingBufferError {
    #[error("invalid argument: capacity must be > 0")]
    InvalidCapacity,
    #[error("invalid argument: frame data is empty")]
    EmptyFrame,
    #[error("ring buffer underflow: dequeue on empty buffer")]
    Underflow,
    #[error("frame key is stale or belongs to a different ring buffer")]
    InvalidKey,
    #[error("ring buffer has already been terminated")]
    Terminated,
}

/// Eviction policy applied after every enqueue and on policy change.
#[derive(Debug, Clone, Copy)]
pub enum DropFramePolicy {
    DontDrop,
    DropOldest { max_bytes: usize },
}

/// Replaces the C `{frameDestructor, appData}` pair: a closure run exactly
/// once when a slot's frame is released (dequeued, evicted, or the buffer
/// itself is torn down).
pub enum FrameDestructor {
    None,
    Boxed(Box<dyn FnOnce(&[u8]) + Send>),
}

impl FrameDestructor {
    fn run(self, data: &[u8]) {
        if let FrameDestructor::Boxed(f) = self {
            f(data);
        }
    }
}

impl Default for FrameDestructor {
    fn default() -> Self {
        FrameDestructor::None
    }
}

#[derive(Default)]
struct Slot {
    data: Option<Bytes>,
    serial: u16,
    destructor: FrameDestructor,
}

struct Inner {
    slots: Vec<Slot>,
    head: usize,
    tail: usize,
    capacity: usize,
    size: usize,
    next_serial: u16,
    max_serial: u16,
    used: usize,
    free: usize,
    sum_bytes: usize,
    drop_policy: DropFramePolicy,
}

impl Inner {
    fn is_full(&self) -> bool {
        self.free == 0
    }

    fn is_empty(&self) -> bool {
        self.used == 0
    }

    fn dequeue_one(&mut self) -> Result<(), RingBufferError> {
        if self.is_empty() {
            return Err(RingBufferError::Underflow);
        }
        let slot = &mut self.slots[self.tail];
        let len = slot.data.as_ref().map(|b| b.len()).unwrap_or(0);
        let data = slot.data.take();
        let destructor = std::mem::take(&mut slot.destructor);
        if let Some(bytes) = &data {
            destructor.run(bytes);
        }

        self.tail += 1;
        if self.tail >= self.size {
            self.tail = 0;
        }
        self.sum_bytes -= len;
        self.free += 1;
        self.used -= 1;
        Ok(())
    }

    fn apply_policy(&mut self) {
        if let DropFramePolicy::DropOldest { max_bytes } = self.drop_policy {
            while self.sum_bytes > max_bytes && self.dequeue_one().is_ok() {}
        }
    }

    /// Mirrors `prvFindFrame`: the newest occupied slot index is
    /// `capacity` (not `size - 1`) when `head == 0`. This is not an
    /// off-by-one: `size == capacity + 1`, so index `capacity` is exactly
    /// the last slot of the `size`-length array — the same slot `size - 1`
    /// would name. Kept as a direct port rather than rewritten to avoid
    /// silently changing a load-bearing derivation.
    fn latest_idx(&self) -> usize {
        if self.head == 0 {
            self.capacity
        } else {
            self.head - 1
        }
    }

    fn find_slot(&self, serial: u16) -> Option<usize> {
        if self.is_empty() {
            return None;
        }
        let idx = serial as usize % self.size;
        let latest = self.latest_idx();
        let in_range = if latest >= self.tail {
            idx >= self.tail && idx <= latest
        } else {
            idx <= latest || idx >= self.tail
        };
        if in_range && self.slots[idx].serial == serial {
            Some(idx)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStat {
    pub used: usize,
    pub free: usize,
    pub sum_bytes: usize,
}

/// A bounded, concurrent queue of frames accessed through stable keys.
pub struct FrameRingBuffer {
    inner: Arc<Mutex<Inner>>,
}

/// An opaque handle returned by [`FrameRingBuffer::enqueue`]. Validity is a
/// `serial % size` slot check, not reference counting — stale keys fail
/// `get_frame` in O(1) without ever aliasing a different frame's bytes.
#[derive(Clone)]
pub struct FrameKey {
    ring: Weak<Mutex<Inner>>,
    serial: u16,
}

impl FrameRingBuffer {
    pub fn create(capacity: usize) -> Result<Self, RingBufferError> {
        if capacity == 0 {
            return Err(RingBufferError::InvalidCapacity);
        }
        let size = capacity + 1;
        let max_serial = (u16::MAX as usize / size * size) as u16;
        let mut slots = Vec::with_capacity(size);
        slots.resize_with(size, Slot::default);

        let inner = Inner {
            slots,
            head: 0,
            tail: 0,
            capacity,
            size,
            next_serial: 0,
            max_serial,
            used: 0,
            free: capacity,
            sum_bytes: 0,
            drop_policy: DropFramePolicy::DontDrop,
        };
        Ok(FrameRingBuffer { inner: Arc::new(Mutex::new(inner)) })
    }

    pub fn enqueue(&self, data: Bytes, destructor: FrameDestructor) -> Result<FrameKey, RingBufferError> {
        if data.is_empty() {
            return Err(RingBufferError::EmptyFrame);
        }
        let mut inner = self.inner.lock().unwrap();

        if inner.is_full() {
            inner.dequeue_one()?;
        }

        let head = inner.head;
        let serial = inner.next_serial;
        inner.next_serial += 1;
        if inner.next_serial == inner.max_serial {
            inner.next_serial = 0;
        }

        let len = data.len();
        inner.slots[head] = Slot { data: Some(data), serial, destructor };
        inner.head += 1;
        if inner.head >= inner.size {
            inner.head = 0;
        }
        inner.sum_bytes += len;
        inner.free -= 1;
        inner.used += 1;

        inner.apply_policy();

        Ok(FrameKey { ring: Arc::downgrade(&self.inner), serial })
    }

    pub fn dequeue(&self) -> Result<(), RingBufferError> {
        let mut inner = self.inner.lock().unwrap();
        inner.dequeue_one()
    }

    /// Validates `key` and returns a clone of its backing bytes. Returns
    /// [`RingBufferError::InvalidKey`] if the slot has been evicted or
    /// reused by a newer frame (same failure for both — distinguishing them
    /// would require data the key no longer carries).
    pub fn get_frame(&self, key: &FrameKey) -> Result<Bytes, RingBufferError> {
        let ring = key.ring.upgrade().ok_or(RingBufferError::Terminated)?;
        let inner = ring.lock().unwrap();
        let idx = inner.find_slot(key.serial).ok_or(RingBufferError::InvalidKey)?;
        Ok(inner.slots[idx].data.clone().expect("occupied slot always has data"))
    }

    pub fn get_memory_stat(&self) -> MemoryStat {
        let inner = self.inner.lock().unwrap();
        MemoryStat { used: inner.used, free: inner.free, sum_bytes: inner.sum_bytes }
    }

    pub fn set_drop_frame_policy(&self, policy: DropFramePolicy) {
        let mut inner = self.inner.lock().unwrap();
        inner.drop_policy = policy;
        inner.apply_policy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_eviction_scenario() {
        let ring = FrameRingBuffer::create(3).unwrap();
        let key_a = ring.enqueue(Bytes::from(vec![0u8; 100]), FrameDestructor::None).unwrap();
        let key_b = ring.enqueue(Bytes::from(vec![0u8; 200]), FrameDestructor::None).unwrap();
        let _key_c = ring.enqueue(Bytes::from(vec![0u8; 300]), FrameDestructor::None).unwrap();

        ring.set_drop_frame_policy(DropFramePolicy::DropOldest { max_bytes: 400 });

        // 600 -> drop A -> 500 (still > 400) -> drop B -> 300, leaving only C.
        let stat = ring.get_memory_stat();
        assert_eq!(stat.sum_bytes, 300);
        assert_eq!(stat.used, 1);
        assert!(matches!(ring.get_frame(&key_a), Err(RingBufferError::InvalidKey)));
        assert!(matches!(ring.get_frame(&key_b), Err(RingBufferError::InvalidKey)));
    }

    #[test]
    fn serial_wrap_never_aliases() {
        // Capacity 2 => size 3, max_serial = 65535 - (65535 % 3) = 65535.
        let ring = FrameRingBuffer::create(2).unwrap();
        let mut last_key: Option<(FrameKey, u8)> = None;

        for i in 0..65536u32 {
            let tag = (i % 256) as u8;
            let key = ring.enqueue(Bytes::from(vec![tag]), FrameDestructor::None).unwrap();
            if let Some((old_key, old_tag)) = last_key.take() {
                match ring.get_frame(&old_key) {
                    Ok(bytes) => assert_eq!(bytes[0], old_tag, "key aliased a different frame's bytes"),
                    Err(RingBufferError::InvalidKey) => {}
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }
            last_key = Some((key, tag));
        }
    }

    #[test]
    fn invariants_hold_after_mixed_operations() {
        let ring = FrameRingBuffer::create(4).unwrap();
        for i in 0..10u8 {
            let _ = ring.enqueue(Bytes::from(vec![i]), FrameDestructor::None).unwrap();
            if i % 3 == 0 {
                let _ = ring.dequeue();
            }
            let stat = ring.get_memory_stat();
            assert_eq!(stat.used + stat.free, 4);
        }
    }

    #[test]
    fn destructor_runs_exactly_once_on_eviction() {
        let ring = FrameRingBuffer::create(1).unwrap();
        let calls = Arc::new(Mutex::new(0u32));
        let calls_clone = calls.clone();
        let destructor = FrameDestructor::Boxed(Box::new(move |_| {
            *calls_clone.lock().unwrap() += 1;
        }));
        let _key_a = ring.enqueue(Bytes::from(vec![1u8]), destructor).unwrap();
        let _key_b = ring.enqueue(Bytes::from(vec![2u8]), FrameDestructor::None).unwrap();
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn empty_frame_is_rejected() {
        let ring = FrameRingBuffer::create(1).unwrap();
        assert!(matches!(
            ring.enqueue(Bytes::new(), FrameDestructor::None),
            Err(RingBufferError::EmptyFrame)
        ));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(matches!(FrameRingBuffer::create(0), Err(RingBufferError::InvalidCapacity)));
    }
}
