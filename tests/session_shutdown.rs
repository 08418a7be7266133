//! Blocking sessions must keep retrying with backoff while the endpoint
//! misbehaves, and still observe the stop flag promptly.

use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use feedmerge::lockfree::SlotRing;
use feedmerge::sessions::{Session, SyncSession};

#[test]
fn sync_session_stops_while_reconnecting() {
    // Accept and immediately drop connections so every TLS handshake fails
    // and the session cycles through its backoff schedule.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server_stop = Arc::new(AtomicBool::new(false));
    let server_stop_flag = server_stop.clone();
    listener.set_nonblocking(true).unwrap();
    let server = std::thread::spawn(move || {
        while !server_stop_flag.load(Ordering::Relaxed) {
            match listener.accept() {
                Ok((stream, _)) => drop(stream),
                Err(_) => std::thread::sleep(Duration::from_millis(10)),
            }
        }
    });

    let (ptx, _prx) = SlotRing::new_pair();
    let (ltx, _lrx) = SlotRing::new_pair();
    let stop = Arc::new(AtomicBool::new(false));
    let session = Box::new(SyncSession::new(
        0,
        "127.0.0.1".to_string(),
        port,
        "/".to_string(),
        ptx,
        ltx,
        stop.clone(),
    ));
    let handle = session.start();

    // Let it fail a few connects (200 ms + 400 ms backoff fit in here).
    std::thread::sleep(Duration::from_millis(700));

    stop.store(true, Ordering::Relaxed);
    let begin = Instant::now();
    handle.join();
    // Stop must be observed within a backoff slice + recv deadline, never
    // a full 5 s backoff.
    assert!(begin.elapsed() < Duration::from_secs(2));

    server_stop.store(true, Ordering::Relaxed);
    server.join().unwrap();
}
