use anyhow::{anyhow, Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{lookup_host, TcpStream};
use tokio_native_tls::TlsStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::USER_AGENT;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{client_async_with_config, WebSocketStream};

use crate::logging::latency_event::LatencyProducer;
use crate::message::{PayloadProducer, RawOrderUpdate};
use crate::sessions::backoff::Backoff;
use crate::sessions::{deliver_payload, request_uri, Session, SessionHandle};

const USER_AGENT_VALUE: &str = "feedmerge/async/0.1";

type WsStream = WebSocketStream<TlsStream<TcpStream>>;

/// Cooperative session: runs as one task on the reactor runtime, so all N
/// connections share the reactor's pinned worker thread(s). Suspension
/// happens only at network I/O and backoff timers; stopping the reactor
/// cancels the task at the next such point.
pub struct AsyncSession {
    index: usize,
    host: String,
    port: u16,
    target: String,
    payload_ring: PayloadProducer,
    latency_ring: LatencyProducer,
    handle: tokio::runtime::Handle,
}

impl AsyncSession {
    pub fn new(
        index: usize,
        host: String,
        port: u16,
        target: String,
        payload_ring: PayloadProducer,
        latency_ring: LatencyProducer,
        handle: tokio::runtime::Handle,
    ) -> Self {
        Self {
            index,
            host,
            port,
            target,
            payload_ring,
            latency_ring,
            handle,
        }
    }

    async fn run(&self) {
        let label = format!("async_session {}", self.index);
        let mut backoff = Backoff::new();
        let mut spare: Option<RawOrderUpdate> = None;
        let mut latency_drops = 0u64;
        loop {
            let mut ws = match self.connect().await {
                Ok(ws) => ws,
                Err(err) => {
                    eprintln!("[{label}] connect error: {err:#}");
                    tokio::time::sleep(backoff.next()).await;
                    continue;
                }
            };
            backoff.reset();
            let err = self
                .read_loop(&mut ws, &mut spare, &mut latency_drops, &label)
                .await;
            eprintln!("[{label}] reconnecting after error: {err}");
            tokio::time::sleep(backoff.next()).await;
        }
    }

    // Resolve → TCP connect → TCP_NODELAY → TLS handshake (SNI = host) →
    // WS handshake, each stage failing individually via its context.
    async fn connect(&self) -> Result<WsStream> {
        let addrs: Vec<_> = lookup_host((self.host.as_str(), self.port))
            .await
            .context("resolve")?
            .collect();
        let mut tcp = None;
        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
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

        let connector = native_tls::TlsConnector::new().context("tls context")?;
        let connector = tokio_native_tls::TlsConnector::from(connector);
        let stream = connector
            .connect(&self.host, tcp)
            .await
            .context("tls handshake")?;

        let mut request = request_uri(&self.host, self.port, &self.target)
            .into_client_request()
            .context("ws request")?;
        request
            .headers_mut()
            .insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
        let (ws, _response) = client_async_with_config(request, stream, None)
            .await
            .context("ws handshake")?;
        Ok(ws)
    }

    async fn read_loop(
        &self,
        ws: &mut WsStream,
        spare: &mut Option<RawOrderUpdate>,
        latency_drops: &mut u64,
        label: &str,
    ) -> tungstenite::Error {
        loop {
            // Hold a free slot before reading so a payload frame is never
            // dropped; the slot survives control frames and reconnects.
            if spare.is_none() {
                match self.payload_ring.acquire() {
                    Some(slot) => *spare = Some(slot),
                    None => {
                        tokio::task::yield_now().await;
                        continue;
                    }
                }
            }
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
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
                Some(Ok(Message::Binary(data))) => {
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
                Some(Ok(Message::Ping(payload))) => {
                    let _ = ws.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Close(_))) | None => return tungstenite::Error::ConnectionClosed,
                Some(Ok(_)) => {}
                Some(Err(err)) => return err,
            }
        }
    }
}

impl Session for AsyncSession {
    fn start(self: Box<Self>) -> SessionHandle {
        let handle = self.handle.clone();
        handle.spawn(async move { self.run().await });
        SessionHandle::detached()
    }
}
