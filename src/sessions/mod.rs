pub mod async_session;
pub mod backoff;
pub mod sync_session;

pub use async_session::AsyncSession;
pub use sync_session::SyncSession;

use crate::logging::latency_event::LatencyProducer;
use crate::message::{PayloadProducer, RawOrderUpdate};
use crate::utils::scan::extract_event_ts_ms;
use crate::utils::time::epoch_millis_utc;

/// One wss connection feeding a payload ring and a latency ring. The two
/// variants (cooperative task, blocking thread) share this contract; the
/// runner treats them uniformly.
pub trait Session: Send {
    fn start(self: Box<Self>) -> SessionHandle;
}

/// Whatever a started session leaves behind to wait on. Async sessions run
/// on the reactor and are cancelled with it, so they have nothing to join.
pub struct SessionHandle {
    worker: Option<std::thread::JoinHandle<()>>,
}

impl SessionHandle {
    pub fn threaded(worker: std::thread::JoinHandle<()>) -> Self {
        Self {
            worker: Some(worker),
        }
    }

    pub fn detached() -> Self {
        Self { worker: None }
    }

    pub fn join(mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Request URI for the WebSocket handshake; the default port is left out
/// so the Host header stays in the form upstream endpoints expect.
pub(crate) fn request_uri(host: &str, port: u16, target: &str) -> String {
    if port == 443 {
        format!("wss://{host}{target}")
    } else {
        format!("wss://{host}:{port}{target}")
    }
}

/// Hands one payload frame up: fills the acquired slot, records the
/// latency sample (dropped with rate-limited logging when that ring is
/// full), then publishes the slot. Returns the slot only when `ready` is
/// somehow full, so the caller can retain it instead of losing a buffer.
pub(crate) fn deliver_payload(
    payload_ring: &PayloadProducer,
    latency_ring: &LatencyProducer,
    mut slot: RawOrderUpdate,
    frame: &[u8],
    latency_drops: &mut u64,
    label: &str,
) -> Option<RawOrderUpdate> {
    let arrival_ms = epoch_millis_utc();
    slot.clear();
    slot.extend_from_slice(frame);
    let event_ms = extract_event_ts_ms(frame);
    match latency_ring.acquire() {
        Some(mut ev) => {
            ev.arrival_ms = arrival_ms;
            ev.event_ms = event_ms;
            let _ = latency_ring.publish(ev);
        }
        None => {
            *latency_drops += 1;
            if *latency_drops <= 3 || *latency_drops % 1000 == 0 {
                eprintln!(
                    "[{label}] latency ring full, event dropped ({} drops)",
                    latency_drops
                );
            }
        }
    }
    payload_ring.publish(slot).err()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lockfree::SlotRing;
    use crate::logging::latency_event::LatencyEvent;

    #[test]
    fn test_deliver_payload_publishes_frame_and_latency() {
        let (ptx, prx) = SlotRing::new_pair();
        let (ltx, lrx) = SlotRing::new_pair();
        let mut drops = 0u64;

        let slot = ptx.acquire().unwrap();
        let frame = br#"{"u":9,"E":1234}"#;
        let kept = deliver_payload(&ptx, &ltx, slot, frame, &mut drops, "test_session 0");
        assert!(kept.is_none());
        assert_eq!(drops, 0);

        let published = prx.consume().unwrap();
        assert_eq!(published.as_bytes(), frame);
        let ev: LatencyEvent = lrx.consume().unwrap();
        assert_eq!(ev.event_ms, 1234);
        assert!(ev.arrival_ms > 1_600_000_000_000);
    }

    #[test]
    fn test_deliver_payload_event_ms_zero_when_absent() {
        let (ptx, _prx) = SlotRing::new_pair();
        let (ltx, lrx) = SlotRing::new_pair();
        let mut drops = 0u64;

        let slot = ptx.acquire().unwrap();
        let kept = deliver_payload(&ptx, &ltx, slot, br#"{"u":9}"#, &mut drops, "test_session 0");
        assert!(kept.is_none());
        let ev: LatencyEvent = lrx.consume().unwrap();
        assert_eq!(ev.event_ms, 0);
    }
}
