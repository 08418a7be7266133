use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::message::{PayloadConsumer, RawOrderUpdate};
use crate::utils::affinity::{apply_pin, PinMode};
use crate::utils::io::writev_all;
use crate::utils::scan::extract_update_id;

// Time-based reordering window: emission is delayed this long so a
// slightly-earlier `u` arriving on another connection can still overtake.
const HOLDBACK: Duration = Duration::from_millis(20);

// Entries per vectored write: 64 payloads = 128 iovecs (payload + newline).
const BATCH_MAX: usize = 64;

static NEWLINE: u8 = b'\n';

// Buffered entry awaiting emission. Owns the payload buffer; `src` is the
// producer ring the slot goes back to after the write (or drop).
struct BufEntry {
    u: u64,
    first_seen: Instant,
    src: usize,
    buf: RawOrderUpdate,
}

impl PartialEq for BufEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for BufEntry {}

impl PartialOrd for BufEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for BufEntry {
    // `first_seen` breaks ties on equal `u` so the first arrival pops (and
    // is emitted) first; the later duplicate is then dropped at pop time.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        (self.u, self.first_seen, self.src).cmp(&(other.u, other.first_seen, other.src))
    }
}

/// Merges N payload rings into one strictly-increasing-by-`u` NDJSON file.
/// Sole consumer of every payload ring; sole owner of the output file.
///
/// Worker life cycle: running (ingest + flush under the hold-back window)
/// until stop is requested and every ring is empty, then a final drain
/// without the hold-back, then the file is closed with the thread.
pub struct StreamMerger {
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    inner: Option<MergerInner>,
}

struct MergerInner {
    rings: Vec<PayloadConsumer>,
    out: File,
    heap: BinaryHeap<Reverse<BufEntry>>,
    last_emitted_u: u64,
    write_errors: u64,
}

impl StreamMerger {
    /// Opens the output file (create + truncate, 0644). Failing to open is
    /// a startup error the caller must treat as fatal.
    pub fn new(rings: Vec<PayloadConsumer>, out_file: &str) -> Result<Self> {
        let out = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .mode(0o644)
            .open(out_file)
            .with_context(|| format!("failed to open merged output '{out_file}'"))?;
        Ok(Self {
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
            inner: Some(MergerInner {
                rings,
                out,
                heap: BinaryHeap::new(),
                last_emitted_u: 0,
                write_errors: 0,
            }),
        })
    }

    pub fn start(&mut self, pin: PinMode) {
        let Some(mut inner) = self.inner.take() else {
            return;
        };
        let stop = self.stop.clone();
        let worker = std::thread::Builder::new()
            .name("stream-merger".into())
            .spawn(move || {
                apply_pin(pin, "stream_merger");
                inner.run(&stop);
            })
            .expect("failed to spawn stream merger thread");
        self.worker = Some(worker);
    }

    /// Requests a graceful stop and waits for ingest + drain to finish.
    pub fn join(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for StreamMerger {
    fn drop(&mut self) {
        self.join();
    }
}

impl MergerInner {
    fn run(&mut self, stop: &AtomicBool) {
        loop {
            self.ingest_rings();
            self.flush_ready();
            if stop.load(Ordering::Relaxed) && self.all_rings_empty() {
                self.drain_all();
                break;
            }
            std::thread::yield_now();
        }
    }

    fn all_rings_empty(&self) -> bool {
        self.rings.iter().all(|ring| ring.ready_size() == 0)
    }

    // Pulls everything currently available from every ring. Payloads
    // without a parseable `u`, and late duplicates, give their slot back
    // immediately.
    fn ingest_rings(&mut self) {
        for i in 0..self.rings.len() {
            while let Some(m) = self.rings[i].consume() {
                match extract_update_id(m.as_bytes()) {
                    Some(u) if u > self.last_emitted_u => {
                        self.heap.push(Reverse(BufEntry {
                            u,
                            first_seen: Instant::now(),
                            src: i,
                            buf: m,
                        }));
                    }
                    _ => {
                        let _ = self.rings[i].release(m);
                    }
                }
            }
        }
    }

    fn flush_ready(&mut self) {
        let now = Instant::now();
        loop {
            let (batch, last_u) = self.collect_batch(Some(now));
            if batch.is_empty() {
                break;
            }
            let more = batch.len() == BATCH_MAX;
            self.write_batch(batch, last_u);
            if !more {
                break;
            }
        }
    }

    // Shutdown path: emit the remaining heap in `u` order, duplicates
    // skipped, no hold-back.
    fn drain_all(&mut self) {
        loop {
            let (batch, last_u) = self.collect_batch(None);
            if batch.is_empty() {
                break;
            }
            self.write_batch(batch, last_u);
        }
    }

    // Pops up to BATCH_MAX emittable entries. `now` enables the hold-back
    // check; None drains unconditionally. The batch-local `last_u` cursor
    // drops duplicates that would otherwise slip inside one batch.
    fn collect_batch(&mut self, now: Option<Instant>) -> (Vec<BufEntry>, u64) {
        let mut batch: Vec<BufEntry> = Vec::with_capacity(BATCH_MAX);
        let mut last_u = self.last_emitted_u;
        while batch.len() < BATCH_MAX {
            match self.heap.peek() {
                None => break,
                Some(Reverse(top)) => {
                    if top.u > last_u {
                        if let Some(now) = now {
                            if now.saturating_duration_since(top.first_seen) < HOLDBACK {
                                break;
                            }
                        }
                    }
                }
            }
            let Some(Reverse(entry)) = self.heap.pop() else {
                break;
            };
            if entry.u <= last_u {
                self.release(entry);
                continue;
            }
            last_u = entry.u;
            batch.push(entry);
        }
        (batch, last_u)
    }

    fn write_batch(&mut self, batch: Vec<BufEntry>, last_u: u64) {
        let mut iov: Vec<libc::iovec> = Vec::with_capacity(batch.len() * 2);
        for entry in &batch {
            let bytes = entry.buf.as_bytes();
            iov.push(libc::iovec {
                iov_base: bytes.as_ptr() as *mut _,
                iov_len: bytes.len(),
            });
            iov.push(libc::iovec {
                iov_base: &NEWLINE as *const u8 as *mut _,
                iov_len: 1,
            });
        }
        if let Err(err) = writev_all(self.out.as_raw_fd(), &mut iov) {
            self.write_errors += 1;
            if self.write_errors <= 3 || self.write_errors % 1000 == 0 {
                eprintln!(
                    "[stream_merger] write error, batch dropped: {err} ({} errors)",
                    self.write_errors
                );
            }
        }
        // The cursor advances even for an abandoned batch: the entries are
        // gone either way and re-accepting their range would break
        // monotonicity.
        self.last_emitted_u = last_u;
        for entry in batch {
            self.release(entry);
        }
    }

    fn release(&self, entry: BufEntry) {
        // Err means `free` is full, which matched capacities rule out; the
        // buffer is dropped rather than blocking the merger.
        let _ = self.rings[entry.src].release(entry.buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lockfree::SlotRing;
    use crate::message::PayloadProducer;

    fn deliver(tx: &PayloadProducer, json: &str) {
        let mut slot = tx.acquire().expect("free slot");
        slot.clear();
        slot.extend_from_slice(json.as_bytes());
        tx.publish(slot).expect("ready not full");
    }

    fn temp_out(tag: &str) -> String {
        std::env::temp_dir()
            .join(format!("merger_{tag}_{}.ndjson", std::process::id()))
            .to_string_lossy()
            .into_owned()
    }

    #[test]
    fn test_buf_entry_min_heap_order() {
        let t = Instant::now();
        let mk = |u, src| BufEntry {
            u,
            first_seen: t,
            src,
            buf: RawOrderUpdate::default(),
        };
        let mut heap = BinaryHeap::new();
        heap.push(Reverse(mk(7, 0)));
        heap.push(Reverse(mk(3, 1)));
        heap.push(Reverse(mk(5, 0)));
        assert_eq!(heap.pop().unwrap().0.u, 3);
        assert_eq!(heap.pop().unwrap().0.u, 5);
        assert_eq!(heap.pop().unwrap().0.u, 7);
    }

    #[test]
    fn test_buf_entry_equal_u_first_seen_wins() {
        let early = Instant::now();
        let late = early + Duration::from_millis(5);
        let mut heap = BinaryHeap::new();
        heap.push(Reverse(BufEntry {
            u: 9,
            first_seen: late,
            src: 1,
            buf: RawOrderUpdate::default(),
        }));
        heap.push(Reverse(BufEntry {
            u: 9,
            first_seen: early,
            src: 0,
            buf: RawOrderUpdate::default(),
        }));
        assert_eq!(heap.pop().unwrap().0.src, 0);
    }

    #[test]
    fn test_unparseable_payloads_are_dropped_and_released() {
        let (tx, rx) = SlotRing::new_pair();
        let out = temp_out("unparseable");
        let mut merger = StreamMerger::new(vec![rx], &out).unwrap();

        deliver(&tx, r#"{"e":"no update id"}"#);
        deliver(&tx, r#"{"u":1,"E":10}"#);

        merger.start(PinMode::Off);
        std::thread::sleep(Duration::from_millis(60));
        merger.join();

        let contents = std::fs::read_to_string(&out).unwrap();
        std::fs::remove_file(&out).unwrap();
        assert_eq!(contents, "{\"u\":1,\"E\":10}\n");
        // Both slots are back in the pool.
        assert_eq!(tx.free_size(), crate::message::RAW_ORDER_RING_CAPACITY);
    }

    #[test]
    fn test_open_failure_is_a_startup_error() {
        let (_tx, rx) = SlotRing::new_pair();
        let err = StreamMerger::new(vec![rx], "/nonexistent-dir/out.ndjson")
            .err()
            .expect("open must fail");
        assert!(format!("{err:#}").contains("failed to open merged output"));
    }
}
