use crate::lockfree::{RingConsumer, RingProducer};

/// One raw NDJSON payload as received from the wire. No interpretation
/// beyond "bytes"; the backing storage is retained across reuses so the
/// ring stays allocation-free after warm-up.
#[derive(Debug, Default)]
pub struct RawOrderUpdate {
    bytes: Vec<u8>,
}

impl RawOrderUpdate {
    #[inline(always)]
    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    #[inline(always)]
    pub fn extend_from_slice(&mut self, frame: &[u8]) {
        self.bytes.extend_from_slice(frame);
    }

    #[inline(always)]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

pub const RAW_ORDER_RING_CAPACITY: usize = 16384;

pub type PayloadProducer = RingProducer<RawOrderUpdate, RAW_ORDER_RING_CAPACITY>;
pub type PayloadConsumer = RingConsumer<RawOrderUpdate, RAW_ORDER_RING_CAPACITY>;
