use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use native_tls::{TlsConnector, TlsStream};
use tungstenite::client::IntoClientRequest;
use tungstenite::http::header::USER_AGENT;
use tungstenite::http::HeaderValue;
use tungstenite::{Message, WebSocket};

use crate::logging::latency_event::LatencyProducer;
use crate::message::{PayloadProducer, RawOrderUpdate};
use crate::sessions::backoff::Backoff;
use crate::sessions::{deliver_payload, request_uri, Session, SessionHandle};

const USER_AGENT_VALUE: &str = "feedmerge/0.1";

// Recv deadline exists only to poll the stop flag between frames.
const READ_DEADLINE: Duration = Duration::from_millis(200);

/// Blocking session: one dedicated OS thread per connection. Identical
/// contract to [`super::AsyncSession`], but every socket operation blocks
/// and shutdown is observed cooperatively at each recv deadline.
pub struct SyncSession {
    index: usize,
    host: String,
    port: u16,
    target: String,
    payload_ring: PayloadProducer,
    latency_ring: LatencyProducer,
    stop: Arc<AtomicBool>,
}

impl SyncSession {
    pub fn new(
        index: usize,
        host: String,
        port: u16,
        target: String,
        payload_ring: PayloadProducer,
        latency_ring: LatencyProducer,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            index,
            host,
            port,
            target,
            payload_ring,
            latency_ring,
            stop,
        }
    }

    fn run(&self) {
        let label = format!("sync_session {}", self.index);
        let mut backoff = Backoff::new();
        let mut spare: Option<RawOrderUpdate> = None;
        let mut latency_drops = 0u64;
        while !self.stop.load(Ordering::Relaxed) {
            let mut ws = match self.connect() {
                Ok(ws) => ws,
                Err(err) => {
                    eprintln!("[{label}] connect error: {err:#}");
                    wait_sync(&self.stop, backoff.next());
                    continue;
                }
            };
            backoff.reset();
            match self.read_loop(&mut ws, &mut spare, &mut latency_drops, &label) {
                Ok(()) => break, // stop requested
                Err(err) => {
                    eprintln!("[{label}] reconnecting after error: {err}");
                    wait_sync(&self.stop, backoff.next());
                }
            }
        }
    }

    // Resolve → TCP connect → TCP_NODELAY → TLS handshake (SNI = host) →
    // WS handshake; the recv deadline is applied only once the connection
    // is fully established.
    fn connect(&self) -> Result<WebSocket<TlsStream<TcpStream>>> {
        let addrs = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .context("resolve")?;
        let mut tcp = None;
        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect(addr) {
                Ok(stream) => {
                    tcp = Some(stream);
                    break;
                }
                Err(err) => last_err = Some(err),
            }
        }
        let tcp = match (tcp, last_err) {
            (Some(stream), _) => stream,
            (None, Some(err)) => return Err(anyhow!(err).context("connect")),
            (None, None) => return Err(anyhow!("no addresses resolved").context("connect")),
        };
        let _ = tcp.set_nodelay(true);

        let connector = TlsConnector::new().context("tls context")?;
        let stream = connector
            .connect(&self.host, tcp)
            .map_err(|err| match err {
                native_tls::HandshakeError::Failure(e) => anyhow!(e),
                native_tls::HandshakeError::WouldBlock(_) => anyhow!("handshake interrupted"),
            })
            .context("tls handshake")?;

        let mut request = request_uri(&self.host, self.port, &self.target)
            .into_client_request()
            .context("ws request")?;
        request
            .headers_mut()
            .insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
        let (ws, _response) = tungstenite::client(request, stream)
            .map_err(|err| match err {
                tungstenite::HandshakeError::Failure(e) => anyhow!(e),
                tungstenite::HandshakeError::Interrupted(_) => anyhow!("handshake interrupted"),
            })
            .context("ws handshake")?;

        ws.get_ref()
            .get_ref()
            .set_read_timeout(Some(READ_DEADLINE))
            .context("read deadline")?;
        Ok(ws)
    }

    // Ok(()) means the stop flag was observed; Err carries the read error
    // that triggers reconnect.
    fn read_loop(
        &self,
        ws: &mut WebSocket<TlsStream<TcpStream>>,
        spare: &mut Option<RawOrderUpdate>,
        latency_drops: &mut u64,
        label: &str,
    ) -> Result<(), tungstenite::Error> {
        loop {
            if self.stop.load(Ordering::Relaxed) {
                return Ok(());
            }
            // Hold a free slot before reading so a payload frame is never
            // dropped; the slot survives control frames and deadline wakeups.
            if spare.is_none() {
                match self.payload_ring.acquire() {
                    Some(slot) => *spare = Some(slot),
                    None => {
                        std::thread::yield_now();
                        continue;
                    }
                }
            }
            match ws.read() {
                Ok(Message::Text(text)) => {
                    let Some(slot) = spare.take() else { continue };
                    *spare = deliver_payload(
                        &self.payload_ring,
                        &self.latency_ring,
                        slot,
                        text.as_bytes(),
                        latency_drops,
                        label,
                    );
                }
                Ok(Message::Binary(data)) => {
                    let Some(slot) = spare.take() else { continue };
                    *spare = deliver_payload(
                        &self.payload_ring,
                        &self.latency_ring,
                        slot,
                        &data,
                        latency_drops,
                        label,
                    );
                }
                Ok(Message::Ping(payload)) => {
                    let _ = ws.send(Message::Pong(payload));
                }
                Ok(Message::Close(_)) => return Err(tungstenite::Error::ConnectionClosed),
                Ok(_) => {}
                Err(tungstenite::Error::Io(err))
                    if matches!(
                        err.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) =>
                {
                    // Deadline expiry with no frame; loop re-checks stop.
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Session for SyncSession {
    fn start(self: Box<Self>) -> SessionHandle {
        let name = format!("sync-session-{}", self.index);
        let worker = std::thread::Builder::new()
            .name(name)
            .spawn(move || self.run())
            .expect("failed to spawn sync session thread");
        SessionHandle::threaded(worker)
    }
}

// Backoff sleep sliced so the stop flag is observed promptly even inside a
// multi-second wait.
fn wait_sync(stop: &AtomicBool, wait: Duration) {
    let deadline = Instant::now() + wait;
    while !stop.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep((deadline - now).min(Duration::from_millis(50)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_sync_returns_early_on_stop() {
        let stop = AtomicBool::new(false);
        let started = Instant::now();
        std::thread::scope(|scope| {
            scope.spawn(|| {
                std::thread::sleep(Duration::from_millis(30));
                stop.store(true, Ordering::Relaxed);
            });
            wait_sync(&stop, Duration::from_secs(5));
        });
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_wait_sync_honors_deadline() {
        let stop = AtomicBool::new(false);
        let started = Instant::now();
        wait_sync(&stop, Duration::from_millis(60));
        assert!(started.elapsed() >= Duration::from_millis(60));
    }
}
