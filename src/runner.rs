use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::lockfree::SlotRing;
use crate::logging::FileLogger;
use crate::merge::StreamMerger;
use crate::reactor::Reactor;
use crate::sessions::{AsyncSession, Session, SessionHandle, SyncSession};
use crate::utils::affinity::PinMode;
use crate::utils::time::timestamp_for_file;

// Composition/threading overview:
// - Reactor: 1 pinned worker hosting every AsyncSession task
// - SyncSession: one dedicated thread per session, stop flag polled at the
//   recv deadline
// - StreamMerger: dedicated pinned thread, consumes all payload rings
// - FileLogger: dedicated pinned thread, drains all latency rings
// - Main thread: sleeps to the deadline (or forever), then stops and joins
//   everything in order.

pub struct RunOptions {
    pub host: String,
    pub port: u16,
    pub target: String,
    pub num_connections: usize,
    pub out_file: String,
    pub seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Async,
    Sync,
}

impl RunMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RunMode::Async => "async",
            RunMode::Sync => "sync",
        }
    }
}

pub fn run(opt: &RunOptions, mode: RunMode) -> Result<()> {
    let n = opt.num_connections.max(1);

    let mut logger = FileLogger::new();
    let mut latency_producers = Vec::with_capacity(n);
    for i in 0..n {
        let (ltx, lrx) = SlotRing::new_pair();
        let path = format!(
            "latencies/{}_conn_{}_{}.lat",
            mode.as_str(),
            i,
            timestamp_for_file()
        );
        logger.add_session(lrx, &path);
        latency_producers.push(ltx);
    }

    let mut payload_producers = Vec::with_capacity(n);
    let mut payload_consumers = Vec::with_capacity(n);
    for _ in 0..n {
        let (ptx, prx) = SlotRing::new_pair();
        payload_producers.push(ptx);
        payload_consumers.push(prx);
    }

    // The merged output opens before any session starts; failure here is
    // the only fatal startup error.
    let mut merger = StreamMerger::new(payload_consumers, &opt.out_file)?;

    let stop = Arc::new(AtomicBool::new(false));
    let mut reactor = None;
    let mut sessions: Vec<Box<dyn Session>> = Vec::with_capacity(n);
    match mode {
        RunMode::Async => {
            let r = Reactor::start(1, PinMode::Auto)?;
            let handle = r.handle();
            for (i, (ptx, ltx)) in payload_producers
                .into_iter()
                .zip(latency_producers)
                .enumerate()
            {
                sessions.push(Box::new(AsyncSession::new(
                    i,
                    opt.host.clone(),
                    opt.port,
                    opt.target.clone(),
                    ptx,
                    ltx,
                    handle.clone(),
                )));
            }
            reactor = Some(r);
        }
        RunMode::Sync => {
            for (i, (ptx, ltx)) in payload_producers
                .into_iter()
                .zip(latency_producers)
                .enumerate()
            {
                sessions.push(Box::new(SyncSession::new(
                    i,
                    opt.host.clone(),
                    opt.port,
                    opt.target.clone(),
                    ptx,
                    ltx,
                    stop.clone(),
                )));
            }
        }
    }

    logger.start(PinMode::Auto);
    let handles: Vec<SessionHandle> = sessions.into_iter().map(|s| s.start()).collect();
    merger.start(PinMode::Auto);

    match opt.seconds {
        0 => loop {
            // Run until the process is killed.
            std::thread::park();
        },
        secs => std::thread::sleep(Duration::from_secs(secs)),
    }

    // Teardown order: cancel async tasks, stop blocking sessions, then let
    // the merger drain before the logger flushes its residuals.
    if let Some(mut r) = reactor {
        r.stop();
    }
    stop.store(true, Ordering::Relaxed);
    for handle in handles {
        handle.join();
    }
    merger.join();
    logger.join();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_mode_labels() {
        assert_eq!(RunMode::Async.as_str(), "async");
        assert_eq!(RunMode::Sync.as_str(), "sync");
    }
}
