use crate::lockfree::{RingConsumer, RingProducer};

/// End-to-end arrival sample for one payload. `arrival_ms` is UTC millis
/// when the session handed the frame up; `event_ms` is the payload's `"E"`
/// field (0 when absent). The logger persists `|arrival_ms - event_ms|`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencyEvent {
    pub arrival_ms: i64,
    pub event_ms: i64,
}

pub const LATENCY_RING_CAPACITY: usize = 1 << 16;

pub type LatencyProducer = RingProducer<LatencyEvent, LATENCY_RING_CAPACITY>;
pub type LatencyConsumer = RingConsumer<LatencyEvent, LATENCY_RING_CAPACITY>;
