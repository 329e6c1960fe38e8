//! TLS transport for mutual-TLS broker connections.
//!
//! Loads the device certificate, private key and CA bundle from PEM files
//! and configures rumqttc's TLS transport with client authentication.

use std::path::Path;

use rumqttc::{TlsConfiguration, Transport};

use crate::error::{MqttError, MqttResult};

/// Build a TLS transport from PEM file paths.
pub fn load_tls_transport(cert: &Path, key: &Path, ca: &Path) -> MqttResult<Transport> {
    let ca = read_pem(ca, "CA bundle")?;
    let client_cert = read_pem(cert, "client cert")?;
    let client_key = read_pem(key, "client key")?;

    Ok(Transport::tls_with_config(TlsConfiguration::Simple {
        ca,
        alpn: None,
        client_auth: Some((client_cert, client_key)),
    }))
}

fn read_pem(path: &Path, what: &str) -> MqttResult<Vec<u8>> {
    let bytes = std::fs::read(path)
        .map_err(|e| MqttError::Tls(format!("failed to read {what} '{}': {e}", path.display())))?;
    if bytes.is_empty() {
        return Err(MqttError::Tls(format!(
            "{what} '{}' is empty",
            path.display()
        )));
    }
    Ok(bytes)
}
