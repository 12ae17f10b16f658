//! Streaming session transport
//!
//! A single TCP (optionally TLS) connection to the server carries both
//! logical streams: the Sink stream (agent to server telemetry) and the
//! RPC stream (requests down, header and responses up). Frames are demuxed
//! by kind on the read side; each logical stream serializes its writers
//! behind its own mutex.
//!
//! # Recovery
//!
//! - The read loop treats any receive error as terminal and signals the
//!   session closed.
//! - A supervisor task watches for the closed signal and reconnects with a
//!   fixed 1 s backoff, resending the registration header before any
//!   request is served.
//! - `send` recovers lazily: when it finds the session down it makes
//!   exactly one reconnect attempt and otherwise fails, leaving the
//!   message to be dropped by the caller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use minion_api::{Broker, BrokerHandle, MinionConfig, ModuleRegistry, SendError};
use minion_ipc::{
    split_rpc_response, split_sink_message, Assembly, Reassembler, RpcRequest, RpcResponse,
    SinkMessage,
};

use crate::dispatch::{RpcDispatcher, RESPONSE_CHANNEL_SIZE};
use crate::error::{BrokerError, Result};
use crate::frame::{read_frame, Frame, FrameKind};
use crate::metrics::BrokerMetrics;
use crate::orchestrator::Orchestrator;
use crate::tls;
use crate::BrokerClient;

/// First dial retry delay during startup
const INITIAL_DIAL_BACKOFF: Duration = Duration::from_millis(250);

/// Dial backoff cap during startup
const MAX_DIAL_BACKOFF: Duration = Duration::from_secs(5);

/// Delay between supervisor reconnect attempts
const SUPERVISOR_BACKOFF: Duration = Duration::from_secs(1);

/// Default overall startup dial window
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Reassembly sweep cadence
const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// Property key for the startup dial window
const CONNECT_TIMEOUT_PROPERTY: &str = "connect-timeout-secs";

/// Property key enabling chunked sends on this transport
const CHUNK_SIZE_PROPERTY: &str = "max-buffer-size";

/// Byte stream the session runs over (plain TCP or TLS)
trait SessionIo: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> SessionIo for T {}

/// One live connection and its health state
struct Session {
    writer: Mutex<WriteHalf<Box<dyn SessionIo>>>,
    healthy: AtomicBool,
    closed: CancellationToken,
}

impl Session {
    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    fn mark_broken(&self) {
        self.healthy.store(false, Ordering::Release);
        self.closed.cancel();
    }

    /// Write one frame; a failed write breaks the session
    async fn write(&self, frame: &Frame) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let result = async {
            writer.write_all(&frame.encode()).await?;
            writer.flush().await?;
            Ok::<(), std::io::Error>(())
        }
        .await;
        if let Err(e) = result {
            self.mark_broken();
            return Err(BrokerError::Io(e));
        }
        Ok(())
    }
}

struct Inner {
    /// Self-reference for spawning long-lived tasks from `&self` methods
    me: std::sync::Weak<Inner>,
    config: Arc<MinionConfig>,
    metrics: Arc<BrokerMetrics>,
    orchestrator: Orchestrator,
    dispatcher: Arc<RpcDispatcher>,
    response_rx: Mutex<Option<mpsc::Receiver<RpcResponse>>>,
    session: RwLock<Option<Arc<Session>>>,
    /// Serializes Sink-stream writers
    sink_gate: Mutex<()>,
    /// Serializes RPC-stream writers (header and responses)
    rpc_gate: Mutex<()>,
    shutdown: CancellationToken,
    chunk_size: Option<usize>,
    tls: Option<tokio_rustls::TlsConnector>,
    server_name: Option<rustls::pki_types::ServerName<'static>>,
}

/// Broker client over the streaming session transport
pub struct StreamingClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for StreamingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingClient").finish_non_exhaustive()
    }
}

/// Send-only handle injected into Sink modules
struct SinkHandle(Arc<Inner>);

#[async_trait]
impl Broker for SinkHandle {
    async fn send(&self, message: SinkMessage) -> std::result::Result<(), SendError> {
        self.0.send_sink(message).await
    }
}

impl StreamingClient {
    /// Build the client. TLS configuration errors surface here, before any
    /// connection attempt.
    pub fn new(config: Arc<MinionConfig>, registry: Arc<ModuleRegistry>) -> Result<Self> {
        let metrics = Arc::new(BrokerMetrics::new(&config.id));
        let (response_tx, response_rx) = mpsc::channel(RESPONSE_CHANNEL_SIZE);
        let dispatcher = Arc::new(RpcDispatcher::new(
            &config,
            Arc::clone(&registry),
            Arc::clone(&metrics),
            response_tx,
        ));

        let (tls_connector, server_name) = if config.tls_enabled() {
            tracing::info!("TLS enabled for streaming transport");
            (
                Some(tls::connector_from_config(&config)?),
                Some(tls::server_name(&config.broker_url)?),
            )
        } else {
            tracing::info!("using insecure streaming connection");
            (None, None)
        };

        let chunk_size = config
            .broker_property(CHUNK_SIZE_PROPERTY)
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|&n| n > 0);

        Ok(Self {
            inner: Arc::new_cyclic(|me| Inner {
                me: me.clone(),
                orchestrator: Orchestrator::new(registry),
                metrics,
                dispatcher,
                response_rx: Mutex::new(Some(response_rx)),
                session: RwLock::new(None),
                sink_gate: Mutex::new(()),
                rpc_gate: Mutex::new(()),
                shutdown: CancellationToken::new(),
                chunk_size,
                tls: tls_connector,
                server_name,
                config,
            }),
        })
    }
}

#[async_trait]
impl Broker for StreamingClient {
    async fn send(&self, message: SinkMessage) -> std::result::Result<(), SendError> {
        self.inner.send_sink(message).await
    }
}

#[async_trait]
impl BrokerClient for StreamingClient {
    async fn start(&self) -> Result<()> {
        let inner = &self.inner;
        let timeout_secs = inner
            .config
            .broker_property(CONNECT_TIMEOUT_PROPERTY)
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS);
        let deadline = Instant::now() + Duration::from_secs(timeout_secs);
        let mut backoff = INITIAL_DIAL_BACKOFF;

        loop {
            match inner.establish_session().await {
                Ok(_) => break,
                Err(e) => {
                    if Instant::now() + backoff >= deadline {
                        return Err(BrokerError::DialTimeout {
                            url: inner.config.broker_url.clone(),
                            timeout_secs,
                        });
                    }
                    tracing::warn!(
                        broker_url = %inner.config.broker_url,
                        error = %e,
                        retry_in_ms = backoff.as_millis() as u64,
                        "broker dial failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_DIAL_BACKOFF);
                }
            }
        }
        tracing::info!(broker_url = %inner.config.broker_url, "streaming session established");

        // Modules may push messages as soon as they start
        let handle: BrokerHandle = Arc::new(SinkHandle(Arc::clone(inner)));
        inner
            .orchestrator
            .start_modules(&inner.config, handle)
            .await;

        if let Some(rx) = inner.response_rx.lock().await.take() {
            tokio::spawn(Arc::clone(inner).respond_loop(rx));
        }
        tokio::spawn(Arc::clone(inner).supervise());
        Ok(())
    }

    async fn stop(&self) {
        let inner = &self.inner;
        inner.shutdown.cancel();
        inner.orchestrator.stop_modules().await;
        if let Some(session) = inner.session.write().await.take() {
            session.mark_broken();
            let mut writer = session.writer.lock().await;
            let _ = writer.shutdown().await;
        }
        tracing::info!("streaming broker stopped");
    }

    fn metrics(&self) -> Arc<BrokerMetrics> {
        Arc::clone(&self.inner.metrics)
    }
}

impl Inner {
    async fn current_healthy(&self) -> Option<Arc<Session>> {
        self.session
            .read()
            .await
            .as_ref()
            .filter(|s| s.is_healthy())
            .cloned()
    }

    /// Dial one connection attempt, plain or TLS
    async fn dial_once(&self) -> Result<Box<dyn SessionIo>> {
        let stream = TcpStream::connect(&self.config.broker_url)
            .await
            .map_err(|e| BrokerError::Dial {
                url: self.config.broker_url.clone(),
                source: e,
            })?;
        stream.set_nodelay(true)?;

        match (&self.tls, &self.server_name) {
            (Some(connector), Some(name)) => {
                let stream = connector
                    .connect(name.clone(), stream)
                    .await
                    .map_err(|e| BrokerError::Tls {
                        reason: format!("handshake with {} failed: {e}", self.config.broker_url),
                    })?;
                Ok(Box::new(stream))
            }
            _ => Ok(Box::new(stream)),
        }
    }

    /// Return the current healthy session or build a new one.
    ///
    /// The registration header is sent before the read loop starts, so the
    /// server learns this agent's identity before any request round-trips.
    async fn establish_session(&self) -> Result<Arc<Session>> {
        let mut slot = self.session.write().await;
        if let Some(session) = slot.as_ref() {
            if session.is_healthy() {
                return Ok(Arc::clone(session));
            }
        }

        let stream = self.dial_once().await?;
        let (read_half, write_half) = tokio::io::split(stream);
        let session = Arc::new(Session {
            writer: Mutex::new(write_half),
            healthy: AtomicBool::new(true),
            closed: CancellationToken::new(),
        });
        *slot = Some(Arc::clone(&session));
        drop(slot);

        self.send_minion_header(&session).await?;
        if let Some(me) = self.me.upgrade() {
            tokio::spawn(me.read_loop(Arc::clone(&session), read_half));
        }
        Ok(session)
    }

    /// Register this agent with the server on a fresh RPC stream
    async fn send_minion_header(&self, session: &Session) -> Result<()> {
        let header = RpcResponse::minion_header(&self.config.id, &self.config.location);
        tracing::info!(
            system_id = %self.config.id,
            location = %self.config.location,
            "sending minion header"
        );
        let _gate = self.rpc_gate.lock().await;
        session
            .write(&Frame::new(FrameKind::Header, header.encode()))
            .await
    }

    /// Demux inbound frames until the connection breaks
    async fn read_loop(
        self: Arc<Self>,
        session: Arc<Session>,
        mut reader: ReadHalf<Box<dyn SessionIo>>,
    ) {
        let mut reassembler = Reassembler::new();
        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => break,

                _ = sweep.tick() => {
                    self.metrics.reassembly_drops(reassembler.sweep());
                }

                frame = read_frame(&mut reader) => match frame {
                    Ok(frame) => self.handle_frame(frame, &mut reassembler),
                    Err(e) => {
                        if !self.shutdown.is_cancelled() {
                            tracing::warn!(error = %e, "rpc stream terminated");
                        }
                        break;
                    }
                }
            }
        }
        session.mark_broken();
    }

    fn handle_frame(&self, frame: Frame, reassembler: &mut Reassembler) {
        match frame.kind {
            FrameKind::RpcRequest => {
                let request = match RpcRequest::decode(&frame.payload) {
                    Ok(request) => request,
                    Err(e) => {
                        tracing::warn!(error = %e, "dropping undecodable rpc request");
                        self.metrics.rpc_req_received.failed("unknown");
                        return;
                    }
                };
                self.metrics.rpc_req_received.succeeded(&request.module_id);
                tracing::debug!(
                    rpc_id = %request.rpc_id,
                    module_id = %request.module_id,
                    location = %request.location,
                    "received rpc request"
                );
                match reassembler.accept(
                    &request.rpc_id,
                    request.chunk_index(),
                    request.total_chunks,
                    request.content.clone(),
                ) {
                    Ok(Assembly::Complete(payload)) => {
                        let mut request = request;
                        request.content = payload;
                        request.current_chunk_number = 0;
                        request.total_chunks = 0;
                        self.dispatcher.dispatch(request);
                    }
                    Ok(Assembly::Pending) => {}
                    Err(e) => {
                        tracing::warn!(
                            rpc_id = %request.rpc_id,
                            error = %e,
                            "dropping malformed rpc chunk"
                        );
                        self.metrics.rpc_req_received.failed(&request.module_id);
                    }
                }
            }
            other => {
                tracing::warn!(kind = ?other, "unexpected frame kind on session, ignoring");
            }
        }
    }

    /// Reconnect after the read loop signals termination
    async fn supervise(self: Arc<Self>) {
        loop {
            let current = self.session.read().await.clone();
            match current {
                Some(session) => {
                    tokio::select! {
                        _ = self.shutdown.cancelled() => return,
                        _ = session.closed.cancelled() => {}
                    }
                }
                None => {
                    tokio::select! {
                        _ = self.shutdown.cancelled() => return,
                        _ = tokio::time::sleep(SUPERVISOR_BACKOFF) => continue,
                    }
                }
            }

            loop {
                if self.shutdown.is_cancelled() {
                    return;
                }
                match self.establish_session().await {
                    Ok(_) => {
                        tracing::warn!("rpc stream restarted");
                        break;
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "session reconnect failed");
                        tokio::select! {
                            _ = self.shutdown.cancelled() => return,
                            _ = tokio::time::sleep(SUPERVISOR_BACKOFF) => {}
                        }
                    }
                }
            }
        }
    }

    /// Drain worker responses onto the RPC stream
    async fn respond_loop(self: Arc<Self>, mut rx: mpsc::Receiver<RpcResponse>) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                response = rx.recv() => {
                    let Some(response) = response else { return };
                    // Errors are counted inside; the response is dropped
                    let _ = self.send_response(response).await;
                }
            }
        }
    }

    /// Write one response; requires a live session, no recovery attempt
    async fn send_response(&self, response: RpcResponse) -> Result<()> {
        let module_id = response.module_id.clone();
        let rpc_id = response.rpc_id.clone();

        let Some(session) = self.current_healthy().await else {
            self.metrics.rpc_res_sent.failed(&module_id);
            tracing::warn!(
                rpc_id = %rpc_id,
                module_id = %module_id,
                "no session, dropping rpc response"
            );
            return Err(BrokerError::NotConnected);
        };

        let parts = match self.chunk_size {
            Some(size) => split_rpc_response(response, size),
            None => vec![response],
        };

        let _gate = self.rpc_gate.lock().await;
        for part in &parts {
            if let Err(e) = session
                .write(&Frame::new(FrameKind::RpcResponse, part.encode()))
                .await
            {
                self.metrics.rpc_res_sent.failed(&module_id);
                tracing::warn!(
                    rpc_id = %rpc_id,
                    module_id = %module_id,
                    error = %e,
                    "failed to send rpc response"
                );
                return Err(e);
            }
        }
        self.metrics.rpc_res_sent.succeeded(&module_id);
        Ok(())
    }

    /// Forward a sink message, recovering the session at most once
    #[tracing::instrument(name = "sink.send", level = "debug", skip_all, fields(module_id = %message.module_id))]
    async fn send_sink(&self, mut message: SinkMessage) -> std::result::Result<(), SendError> {
        if self.shutdown.is_cancelled() {
            return Err(SendError::Stopped);
        }
        let module_id = message.module_id.clone();

        message.system_id = self.config.id.clone();
        message.location = self.config.location.clone();

        let session = match self.current_healthy().await {
            Some(session) => session,
            None => match self.establish_session().await {
                Ok(session) => {
                    tracing::warn!("sink stream restarted");
                    session
                }
                Err(e) => {
                    self.metrics.sink_msg_delivery.failed(&module_id);
                    return Err(SendError::Unavailable {
                        reason: e.to_string(),
                    });
                }
            },
        };

        let parts = match self.chunk_size {
            Some(size) => split_sink_message(message, size),
            None => vec![message],
        };

        let _gate = self.sink_gate.lock().await;
        for part in &parts {
            if let Err(e) = session
                .write(&Frame::new(FrameKind::Sink, part.encode()))
                .await
            {
                self.metrics.sink_msg_delivery.failed(&module_id);
                return Err(SendError::Delivery {
                    module_id,
                    reason: e.to_string(),
                });
            }
        }
        self.metrics.sink_msg_delivery.succeeded(&module_id);
        Ok(())
    }
}
