//! Pub/sub broker transport
//!
//! Topic-based messaging over MQTT with QoS 1. Three topic roles:
//!
//! - Sink producer: `<prefix>.Sink.<ModuleId>`
//! - RPC request consumer: `<prefix>.<Location>.rpc-request`
//! - RPC response producer: `<prefix>.rpc-response`
//!
//! Dots are ordinary characters in MQTT topic names, so the server's
//! dotted naming scheme carries over unchanged. Requests are acknowledged
//! only after dispatch (manual acks + persistent session), which gives
//! at-least-once delivery to the module; requests are idempotent
//! polls/probes, so redelivery is safe.
//!
//! Payloads are chunked at `max-buffer-size` (default 900 KiB) to stay
//! under common broker message ceilings.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, Publish, QoS, TlsConfiguration, Transport};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use minion_api::{Broker, BrokerHandle, MinionConfig, ModuleRegistry, SendError};
use minion_ipc::{
    split_rpc_response, split_sink_message, Assembly, Reassembler, RpcRequest, RpcResponse,
    SinkMessage, DEFAULT_PUBSUB_CHUNK_SIZE,
};

use crate::dispatch::{RpcDispatcher, RESPONSE_CHANNEL_SIZE};
use crate::error::{BrokerError, Result};
use crate::metrics::BrokerMetrics;
use crate::orchestrator::Orchestrator;
use crate::BrokerClient;

/// Default topic prefix used by the server
const DEFAULT_TOPIC_PREFIX: &str = "OpenNMS";

/// Property key for the topic prefix
const PREFIX_PROPERTY: &str = "topic-prefix";

/// Property key for the chunk size
const CHUNK_SIZE_PROPERTY: &str = "max-buffer-size";

/// MQTT keep-alive interval
const KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Delay before re-polling after an event-loop error
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(2);

/// Reassembly sweep cadence
const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// Headroom on top of the chunk size for envelope fields and MQTT framing
const PACKET_OVERHEAD: usize = 64 * 1024;

struct Inner {
    config: Arc<MinionConfig>,
    metrics: Arc<BrokerMetrics>,
    orchestrator: Orchestrator,
    dispatcher: Arc<RpcDispatcher>,
    response_rx: Mutex<Option<mpsc::Receiver<RpcResponse>>>,
    client: RwLock<Option<AsyncClient>>,
    shutdown: CancellationToken,
    chunk_size: usize,
    topic_prefix: String,
}

/// Broker client over topic-based publish/subscribe
pub struct PubSubClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for PubSubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubSubClient").finish_non_exhaustive()
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

impl PubSubClient {
    /// Build the client; the connection itself is opened by `start`
    pub fn new(config: Arc<MinionConfig>, registry: Arc<ModuleRegistry>) -> Result<Self> {
        let metrics = Arc::new(BrokerMetrics::new(&config.id));
        let (response_tx, response_rx) = mpsc::channel(RESPONSE_CHANNEL_SIZE);
        let dispatcher = Arc::new(RpcDispatcher::new(
            &config,
            Arc::clone(&registry),
            Arc::clone(&metrics),
            response_tx,
        ));
        let chunk_size = config
            .broker_property(CHUNK_SIZE_PROPERTY)
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_PUBSUB_CHUNK_SIZE);
        let topic_prefix = config
            .broker_property_or(PREFIX_PROPERTY, DEFAULT_TOPIC_PREFIX)
            .to_owned();

        Ok(Self {
            inner: Arc::new(Inner {
                orchestrator: Orchestrator::new(registry),
                metrics,
                dispatcher,
                response_rx: Mutex::new(Some(response_rx)),
                client: RwLock::new(None),
                shutdown: CancellationToken::new(),
                chunk_size,
                topic_prefix,
                config,
            }),
        })
    }
}

#[async_trait]
impl Broker for PubSubClient {
    async fn send(&self, message: SinkMessage) -> std::result::Result<(), SendError> {
        self.inner.send_sink(message).await
    }
}

#[async_trait]
impl BrokerClient for PubSubClient {
    async fn start(&self) -> Result<()> {
        let inner = &self.inner;
        let options = inner.mqtt_options()?;
        let (client, eventloop) = AsyncClient::new(options, 64);
        *inner.client.write().await = Some(client.clone());

        let request_topic = inner.request_topic();
        client
            .subscribe(request_topic.as_str(), QoS::AtLeastOnce)
            .await
            .map_err(|e| BrokerError::PubSub {
                reason: format!("cannot subscribe to {request_topic}: {e}"),
            })?;
        tracing::info!(
            broker_url = %inner.config.broker_url,
            topic = %request_topic,
            "subscribed to rpc request topic"
        );

        let handle: BrokerHandle = Arc::new(SinkHandle(Arc::clone(inner)));
        inner
            .orchestrator
            .start_modules(&inner.config, handle)
            .await;

        if let Some(rx) = inner.response_rx.lock().await.take() {
            tokio::spawn(Arc::clone(inner).respond_loop(rx));
        }
        tokio::spawn(Arc::clone(inner).consume_loop(client, eventloop));
        Ok(())
    }

    async fn stop(&self) {
        let inner = &self.inner;
        inner.shutdown.cancel();
        inner.orchestrator.stop_modules().await;
        if let Some(client) = inner.client.write().await.take() {
            let _ = client.disconnect().await;
        }
        tracing::info!("pubsub broker stopped");
    }

    fn metrics(&self) -> Arc<BrokerMetrics> {
        Arc::clone(&self.inner.metrics)
    }
}

impl Inner {
    fn request_topic(&self) -> String {
        format!("{}.{}.rpc-request", self.topic_prefix, self.config.location)
    }

    fn response_topic(&self) -> String {
        format!("{}.rpc-response", self.topic_prefix)
    }

    fn sink_topic(&self, module_id: &str) -> String {
        format!("{}.Sink.{}", self.topic_prefix, module_id)
    }

    /// Build the MQTT client options from config and broker properties
    fn mqtt_options(&self) -> Result<MqttOptions> {
        let (host, port) = match self.config.broker_url.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| BrokerError::PubSub {
                    reason: format!("invalid broker url '{}'", self.config.broker_url),
                })?;
                (host.to_owned(), port)
            }
            None => (self.config.broker_url.clone(), 1883),
        };

        let mut options = MqttOptions::new(self.config.id.clone(), host, port);
        options.set_keep_alive(KEEP_ALIVE);
        options.set_manual_acks(true);
        // Persistent session so unacked requests are redelivered
        options.set_clean_session(false);
        let max_packet = self.chunk_size + PACKET_OVERHEAD;
        options.set_max_packet_size(max_packet, max_packet);

        if self.config.tls_enabled() {
            tracing::info!("TLS enabled for pubsub transport");
            let ca_path =
                self.config
                    .broker_property("ca-cert-path")
                    .ok_or_else(|| BrokerError::Tls {
                        reason: "tls-enabled requires ca-cert-path".into(),
                    })?;
            let ca = std::fs::read(ca_path).map_err(|e| BrokerError::Tls {
                reason: format!("cannot read CA file {ca_path}: {e}"),
            })?;
            let client_auth = match (
                self.config.broker_property("client-cert-path"),
                self.config.broker_property("client-key-path"),
            ) {
                (Some(cert_path), Some(key_path)) => {
                    let cert = std::fs::read(cert_path).map_err(|e| BrokerError::Tls {
                        reason: format!("cannot read client cert {cert_path}: {e}"),
                    })?;
                    let key = std::fs::read(key_path).map_err(|e| BrokerError::Tls {
                        reason: format!("cannot read client key {key_path}: {e}"),
                    })?;
                    Some((cert, key))
                }
                _ => None,
            };
            options.set_transport(Transport::Tls(TlsConfiguration::Simple {
                ca,
                alpn: None,
                client_auth,
            }));
        }

        Ok(options)
    }

    /// Poll the event loop: requests in, connection state, resubscription
    async fn consume_loop(self: Arc<Self>, client: AsyncClient, mut eventloop: rumqttc::EventLoop) {
        let request_topic = self.request_topic();
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

                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        tracing::info!(topic = %request_topic, "pubsub broker connected, subscribing");
                        if let Err(e) = client.subscribe(request_topic.as_str(), QoS::AtLeastOnce).await {
                            tracing::error!(error = %e, "cannot resubscribe to rpc request topic");
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        self.handle_publish(&client, publish, &mut reassembler).await;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        if self.shutdown.is_cancelled() {
                            break;
                        }
                        tracing::error!(error = %e, "pubsub event loop error");
                        tokio::select! {
                            _ = self.shutdown.cancelled() => break,
                            _ = tokio::time::sleep(POLL_ERROR_BACKOFF) => {}
                        }
                    }
                }
            }
        }
        tracing::debug!("pubsub consumer loop terminated");
    }

    /// Decode, reassemble, and dispatch one request message
    async fn handle_publish(
        &self,
        client: &AsyncClient,
        publish: Publish,
        reassembler: &mut Reassembler,
    ) {
        match RpcRequest::decode(&publish.payload) {
            Ok(request) => {
                self.metrics.rpc_req_received.succeeded(&request.module_id);
                tracing::debug!(
                    rpc_id = %request.rpc_id,
                    module_id = %request.module_id,
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
            Err(e) => {
                tracing::warn!(error = %e, "dropping undecodable rpc request");
                self.metrics.rpc_req_received.failed("unknown");
            }
        }

        // Ack after dispatch; poison messages are acked too so they
        // do not redeliver forever
        if let Err(e) = client.ack(&publish).await {
            tracing::warn!(error = %e, "cannot ack rpc request");
        }
    }

    /// Drain worker responses onto the response topic
    async fn respond_loop(self: Arc<Self>, mut rx: mpsc::Receiver<RpcResponse>) {
        let topic = self.response_topic();
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                response = rx.recv() => {
                    let Some(response) = response else { return };
                    self.publish_response(&topic, response).await;
                }
            }
        }
    }

    async fn publish_response(&self, topic: &str, response: RpcResponse) {
        let module_id = response.module_id.clone();
        let rpc_id = response.rpc_id.clone();
        let Some(client) = self.client.read().await.clone() else {
            self.metrics.rpc_res_sent.failed(&module_id);
            return;
        };

        for part in split_rpc_response(response, self.chunk_size) {
            if let Err(e) = client
                .publish(topic, QoS::AtLeastOnce, false, part.encode().to_vec())
                .await
            {
                self.metrics.rpc_res_sent.failed(&module_id);
                tracing::warn!(
                    rpc_id = %rpc_id,
                    module_id = %module_id,
                    error = %e,
                    "cannot publish rpc response"
                );
                return;
            }
        }
        self.metrics.rpc_res_sent.succeeded(&module_id);
    }

    /// Publish a sink message, chunked to the configured size
    #[tracing::instrument(name = "sink.send", level = "debug", skip_all, fields(module_id = %message.module_id))]
    async fn send_sink(&self, mut message: SinkMessage) -> std::result::Result<(), SendError> {
        if self.shutdown.is_cancelled() {
            return Err(SendError::Stopped);
        }
        let module_id = message.module_id.clone();
        message.system_id = self.config.id.clone();
        message.location = self.config.location.clone();

        let Some(client) = self.client.read().await.clone() else {
            self.metrics.sink_msg_delivery.failed(&module_id);
            return Err(SendError::Unavailable {
                reason: "pubsub client not started".into(),
            });
        };

        let topic = self.sink_topic(&module_id);
        for part in split_sink_message(message, self.chunk_size) {
            if let Err(e) = client
                .publish(topic.as_str(), QoS::AtLeastOnce, false, part.encode().to_vec())
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
