//! TLS client configuration from broker properties
//!
//! Property keys:
//!
//! - `tls-enabled`: "true" to wrap the transport in TLS
//! - `ca-cert-path`: PEM file with the CA that signs the server certificate
//!   (required when TLS is enabled)
//! - `client-cert-path` / `client-key-path`: client pair for mTLS; when
//!   either is missing the connection is server-auth only

use std::fs;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use tokio_rustls::TlsConnector;

use minion_api::MinionConfig;

use crate::error::{BrokerError, Result};

/// Build a TLS connector from the configuration's broker properties
pub fn connector_from_config(config: &MinionConfig) -> Result<TlsConnector> {
    let _ = rustls::crypto::ring::default_provider().install_default();

    let Some(ca_path) = config.broker_property("ca-cert-path") else {
        return Err(BrokerError::Tls {
            reason: "tls-enabled requires ca-cert-path".into(),
        });
    };

    let mut root_store = rustls::RootCertStore::empty();
    for cert in load_certs(ca_path)? {
        root_store.add(cert).map_err(|e| BrokerError::Tls {
            reason: format!("failed to add CA cert from {ca_path}: {e}"),
        })?;
    }

    let builder = rustls::ClientConfig::builder().with_root_certificates(root_store);

    let client_config = match (
        config.broker_property("client-cert-path"),
        config.broker_property("client-key-path"),
    ) {
        (Some(cert_path), Some(key_path)) => {
            tracing::info!("loading client certificate for mutual TLS");
            let certs = load_certs(cert_path)?;
            let key = load_private_key(key_path)?;
            builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| BrokerError::Tls {
                    reason: format!("invalid client certificate: {e}"),
                })?
        }
        _ => builder.with_no_client_auth(),
    };

    Ok(TlsConnector::from(Arc::new(client_config)))
}

/// Parse the host part of `broker_url` into a TLS server name
pub fn server_name(broker_url: &str) -> Result<ServerName<'static>> {
    let host = broker_url
        .rsplit_once(':')
        .map(|(host, _)| host)
        .unwrap_or(broker_url);
    if let Ok(ip) = host.parse::<std::net::IpAddr>() {
        return Ok(ServerName::IpAddress(ip.into()));
    }
    ServerName::try_from(host.to_owned()).map_err(|e| BrokerError::Tls {
        reason: format!("invalid server name '{host}': {e}"),
    })
}

fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>> {
    let pem = fs::read(path).map_err(|e| BrokerError::Tls {
        reason: format!("cannot read certificate file {path}: {e}"),
    })?;
    let mut cursor = std::io::Cursor::new(pem);
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cursor)
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| BrokerError::Tls {
            reason: format!("invalid PEM in {path}: {e}"),
        })?;
    if certs.is_empty() {
        return Err(BrokerError::Tls {
            reason: format!("no certificates found in {path}"),
        });
    }
    Ok(certs)
}

fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>> {
    let pem = fs::read(path).map_err(|e| BrokerError::Tls {
        reason: format!("cannot read key file {path}: {e}"),
    })?;
    let mut cursor = std::io::Cursor::new(pem);
    rustls_pemfile::private_key(&mut cursor)
        .map_err(|e| BrokerError::Tls {
            reason: format!("invalid PEM in {path}: {e}"),
        })?
        .ok_or_else(|| BrokerError::Tls {
            reason: format!("no private key found in {path}"),
        })
}
