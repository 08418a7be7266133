use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::logging::latency_event::LatencyConsumer;
use crate::utils::affinity::{apply_pin, PinMode};
use crate::utils::io::writev_all;

// Lines per vectored write.
const WRITE_BATCH: usize = 128;

/// Drains every session's latency ring round-robin on one background
/// thread and appends one decimal `|arrival_ms - event_ms|` line per event
/// to that session's file. Each session is the single producer of its
/// ring; this worker is the single consumer of all of them.
pub struct FileLogger {
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    sinks: Vec<LatencySink>,
}

struct LatencySink {
    ring: LatencyConsumer,
    file: Option<File>,
}

impl FileLogger {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
            sinks: Vec::new(),
        }
    }

    /// Registers a session's ring and opens its append-only file. An open
    /// failure is logged once and leaves the sink fileless; its ring is
    /// then never drained and the producer-side drop-on-full policy takes
    /// over.
    pub fn add_session(&mut self, ring: LatencyConsumer, path: &str) -> u16 {
        let file = match OpenOptions::new()
            .create(true)
            .append(true)
            .mode(0o644)
            .open(path)
        {
            Ok(file) => Some(file),
            Err(err) => {
                eprintln!("[file_logger] failed to open '{path}': {err}");
                None
            }
        };
        let id = self.sinks.len() as u16;
        self.sinks.push(LatencySink { ring, file });
        id
    }

    pub fn start(&mut self, pin: PinMode) {
        if self.running.swap(true, Ordering::Relaxed) {
            return;
        }
        let mut sinks = std::mem::take(&mut self.sinks);
        let running = self.running.clone();
        let worker = std::thread::Builder::new()
            .name("file-logger".into())
            .spawn(move || {
                apply_pin(pin, "file_logger");
                run_loop(&mut sinks, &running);
            })
            .expect("failed to spawn file logger thread");
        self.worker = Some(worker);
    }

    /// Stops the worker; residual events are flushed once before the files
    /// close with the worker.
    pub fn join(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Default for FileLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for FileLogger {
    fn drop(&mut self) {
        self.join();
    }
}

fn run_loop(sinks: &mut [LatencySink], running: &AtomicBool) {
    let mut current = 0usize;
    let mut idle_streak = 0usize;
    loop {
        if !running.load(Ordering::Relaxed) {
            break;
        }
        let n = sinks.len();
        if n == 0 {
            std::thread::yield_now();
            continue;
        }
        if current >= n {
            current = 0;
        }
        let drained = drain_queue(&mut sinks[current]);
        current += 1;
        if drained == 0 {
            idle_streak += 1;
            if idle_streak >= n {
                std::thread::yield_now();
                idle_streak = 0;
            }
        } else {
            idle_streak = 0;
        }
    }
    // Residual flush after stop; producers may still outpace this final
    // pass, in which case their drop-on-full policy applies.
    for sink in sinks.iter_mut() {
        drain_queue(sink);
    }
}

fn drain_queue(sink: &mut LatencySink) -> usize {
    let Some(file) = sink.file.as_ref() else {
        return 0;
    };
    let fd = file.as_raw_fd();
    let mut lines = [[0u8; 32]; WRITE_BATCH];
    let mut lens = [0usize; WRITE_BATCH];
    let mut cnt = 0usize;
    let mut total = 0usize;
    while let Some(ev) = sink.ring.consume() {
        let delta = (ev.arrival_ms - ev.event_ms).unsigned_abs();
        let mut len = format_decimal(delta, &mut lines[cnt]);
        lines[cnt][len] = b'\n';
        len += 1;
        lens[cnt] = len;
        let _ = sink.ring.release(ev);
        cnt += 1;
        total += 1;
        if cnt == WRITE_BATCH {
            flush_lines(fd, &lines, &lens, cnt);
            cnt = 0;
        }
    }
    if cnt > 0 {
        flush_lines(fd, &lines, &lens, cnt);
    }
    total
}

fn flush_lines(fd: RawFd, lines: &[[u8; 32]; WRITE_BATCH], lens: &[usize; WRITE_BATCH], cnt: usize) {
    let mut iov: Vec<libc::iovec> = (0..cnt)
        .map(|i| libc::iovec {
            iov_base: lines[i].as_ptr() as *mut _,
            iov_len: lens[i],
        })
        .collect();
    if let Err(err) = writev_all(fd, &mut iov) {
        eprintln!("[file_logger] write error, batch dropped: {err}");
    }
}

// Decimal ASCII without allocation; the caller appends the newline.
fn format_decimal(mut value: u64, out: &mut [u8; 32]) -> usize {
    if value == 0 {
        out[0] = b'0';
        return 1;
    }
    let mut tmp = [0u8; 20];
    let mut i = 0usize;
    while value > 0 {
        tmp[i] = b'0' + (value % 10) as u8;
        value /= 10;
        i += 1;
    }
    let mut o = 0usize;
    while i > 0 {
        i -= 1;
        out[o] = tmp[i];
        o += 1;
    }
    o
}
