//! Shared UDP worker pool for datagram-based Sink modules
//!
//! Workers share the port through SO_REUSEPORT so the kernel load-balances
//! datagrams across them. Each datagram becomes one sink message; `send`
//! is synchronous, so a worker naturally backs off while the upstream
//! write is in flight and the OS socket buffer absorbs bursts.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use minion_api::{BrokerHandle, ModuleError};
use minion_ipc::SinkMessage;

/// Receive buffer multiplier for datagram bursts
const RECV_BUFFER_MULTIPLIER: usize = 4;

/// Socket-level receive buffer baseline
const RECV_BUFFER_SIZE: usize = 256 * 1024;

/// UDP ingress shared by the datagram modules
pub(crate) struct UdpIngress {
    /// Module id stamped on every forwarded message
    pub module_id: &'static str,
    /// Port to listen on
    pub port: u16,
    /// Number of workers sharing the port
    pub workers: usize,
    /// Largest datagram accepted; larger ones are dropped
    pub max_packet: usize,
    /// Strip a trailing LF/CRLF before forwarding
    pub trim_newline: bool,
}

impl UdpIngress {
    /// Bind the worker sockets and spawn one task per worker.
    ///
    /// Returns once all sockets are bound; workers run until `cancel`
    /// fires.
    pub(crate) fn spawn(
        &self,
        broker: BrokerHandle,
        cancel: CancellationToken,
    ) -> Result<(), ModuleError> {
        let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, self.port));
        let workers = self.workers.max(1);

        for worker_id in 0..workers {
            let socket = bind_reuseport(addr, workers > 1).map_err(|e| ModuleError::Bind {
                addr: addr.to_string(),
                source: e,
            })?;
            let worker = Worker {
                module_id: self.module_id,
                worker_id,
                socket,
                broker: broker.clone(),
                cancel: cancel.clone(),
                max_packet: self.max_packet,
                trim_newline: self.trim_newline,
            };
            tokio::spawn(worker.run());
        }

        tracing::info!(
            module_id = self.module_id,
            port = self.port,
            workers,
            "udp ingress listening"
        );
        Ok(())
    }
}

/// Bind a non-blocking UDP socket, optionally with SO_REUSEPORT
fn bind_reuseport(addr: SocketAddr, reuse_port: bool) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    if reuse_port {
        socket.set_reuse_port(true)?;
    }
    if let Err(e) = socket.set_recv_buffer_size(RECV_BUFFER_SIZE * RECV_BUFFER_MULTIPLIER) {
        tracing::warn!(error = %e, "failed to set UDP SO_RCVBUF");
    }
    socket.bind(&addr.into())?;
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket.into())
}

struct Worker {
    module_id: &'static str,
    worker_id: usize,
    socket: UdpSocket,
    broker: BrokerHandle,
    cancel: CancellationToken,
    max_packet: usize,
    trim_newline: bool,
}

impl Worker {
    async fn run(self) {
        tracing::debug!(
            module_id = self.module_id,
            worker_id = self.worker_id,
            "udp worker started"
        );
        let mut buf = vec![0u8; self.max_packet];

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,

                recv = self.socket.recv_from(&mut buf) => match recv {
                    Ok((len, peer)) => self.forward(&buf[..len], peer).await,
                    Err(e) => {
                        if !self.cancel.is_cancelled() {
                            tracing::debug!(
                                module_id = self.module_id,
                                worker_id = self.worker_id,
                                error = %e,
                                "udp recv error"
                            );
                        }
                    }
                }
            }
        }

        tracing::debug!(
            module_id = self.module_id,
            worker_id = self.worker_id,
            "udp worker stopped"
        );
    }

    async fn forward(&self, data: &[u8], peer: SocketAddr) {
        let data = if self.trim_newline {
            trim_trailing_newline(data)
        } else {
            data
        };
        if data.is_empty() {
            return;
        }

        tracing::trace!(
            module_id = self.module_id,
            peer = %peer,
            bytes = data.len(),
            "forwarding datagram"
        );
        let message = SinkMessage::new(self.module_id, Bytes::copy_from_slice(data));
        if let Err(e) = self.broker.send(message).await {
            // Policy for unrecoverable send errors: drop the datagram
            tracing::debug!(
                module_id = self.module_id,
                error = %e,
                "datagram dropped"
            );
        }
    }
}

/// Trim a trailing LF or CRLF (some syslog clients append one)
pub(crate) fn trim_trailing_newline(data: &[u8]) -> &[u8] {
    let mut end = data.len();
    if end > 0 && data[end - 1] == b'\n' {
        end -= 1;
        if end > 0 && data[end - 1] == b'\r' {
            end -= 1;
        }
    }
    &data[..end]
}
