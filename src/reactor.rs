use std::time::Duration;

use anyhow::{Context, Result};
use tokio::runtime::{Builder, Handle, Runtime};

use crate::utils::affinity::{apply_pin, PinMode};

/// Hosts all cooperative session tasks on a small pool of pinned worker
/// threads (one by default, to minimize context switching). The owned
/// runtime doubles as the keep-alive guard: idle workers stay parked until
/// `stop` tears the runtime down, cancelling in-flight tasks at their next
/// suspension point.
pub struct Reactor {
    runtime: Option<Runtime>,
}

impl Reactor {
    pub fn start(num_threads: usize, pin: PinMode) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(num_threads.max(1))
            .thread_name("reactor")
            .enable_all()
            .on_thread_start(move || {
                apply_pin(pin, "reactor");
            })
            .build()
            .context("failed to start reactor runtime")?;
        Ok(Self {
            runtime: Some(runtime),
        })
    }

    pub fn handle(&self) -> Handle {
        self.runtime
            .as_ref()
            .expect("reactor already stopped")
            .handle()
            .clone()
    }

    pub fn stop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(Duration::from_millis(500));
        }
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_tasks_run_and_stop_cancels() {
        let mut reactor = Reactor::start(1, PinMode::Off).unwrap();
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = ran.clone();
        reactor.handle().spawn(async move {
            ran_clone.store(true, Ordering::Relaxed);
        });

        let forever_started = Arc::new(AtomicBool::new(false));
        let started_clone = forever_started.clone();
        reactor.handle().spawn(async move {
            started_clone.store(true, Ordering::Relaxed);
            loop {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });

        std::thread::sleep(Duration::from_millis(50));
        assert!(ran.load(Ordering::Relaxed));
        assert!(forever_started.load(Ordering::Relaxed));
        // Must return despite the never-ending task.
        reactor.stop();
    }
}
