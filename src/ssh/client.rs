//! SSH Client implementation using russh

use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use russh::keys::{PublicKey, PublicKeyBase64};
use russh::*;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::config::SshConfig;
use super::error::SshError;

/// Opens and authenticates one SSH connection
pub struct SshClient {
    config: SshConfig,
}

impl SshClient {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    /// Connect, authenticate with the password and return the raw handle
    pub async fn connect(self) -> Result<client::Handle<ClientHandler>, SshError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        info!("Connecting to SSH server at {}", addr);

        let socket_addr = addr
            .to_socket_addrs()
            .map_err(|e| SshError::ConnectionFailed(format!("Failed to resolve address: {}", e)))?
            .next()
            .ok_or_else(|| SshError::ConnectionFailed("No address found".to_string()))?;

        let ssh_config = client::Config {
            inactivity_timeout: None,
            keepalive_interval: Some(Duration::from_secs(self.config.keepalive_secs)),
            keepalive_max: 3,
            ..Default::default()
        };

        let handler = ClientHandler::new(
            self.config.host.clone(),
            self.config.port,
            self.config.strict_host_key_checking,
            self.config.trusted_fingerprints.clone(),
        );

        let mut handle = tokio::time::timeout(
            Duration::from_secs(self.config.timeout_secs),
            client::connect(Arc::new(ssh_config), socket_addr, handler),
        )
        .await
        .map_err(|_| SshError::Timeout(format!("Connection to {} timed out", addr)))?
        .map_err(|e| match e {
            SshError::ProtocolError(msg) => SshError::ConnectionFailed(msg),
            other => other,
        })?;

        debug!("SSH handshake completed with {}", addr);

        let authenticated = handle
            .authenticate_password(&self.config.username, &self.config.password)
            .await
            .map_err(|e| SshError::AuthenticationFailed(e.to_string()))?;

        if !authenticated.success() {
            return Err(SshError::AuthenticationFailed(
                "Authentication rejected by server".to_string(),
            ));
        }

        info!("SSH authentication successful for {}@{}", self.config.username, addr);
        Ok(handle)
    }
}

/// SHA256 fingerprint in OpenSSH notation
pub fn fingerprint(key: &PublicKey) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.public_key_bytes());
    let hash = hasher.finalize();
    format!("SHA256:{}", BASE64.encode(hash).trim_end_matches('='))
}

/// Client handler for russh callbacks
///
/// Rig nodes live on a private display network and are commonly reimaged, so
/// unknown keys are accepted by default. With strict checking on, only keys whose
/// fingerprint is listed in the settings are trusted.
pub struct ClientHandler {
    host: String,
    port: u16,
    strict: bool,
    trusted_fingerprints: Vec<String>,
}

impl ClientHandler {
    pub fn new(host: String, port: u16, strict: bool, trusted_fingerprints: Vec<String>) -> Self {
        Self {
            host,
            port,
            strict,
            trusted_fingerprints,
        }
    }

    fn verify(&self, fingerprint: &str) -> Result<bool, SshError> {
        if self.trusted_fingerprints.iter().any(|f| f == fingerprint) {
            info!("Host key verified for {}:{}", self.host, self.port);
            return Ok(true);
        }

        if self.strict {
            warn!(
                "Untrusted host key for {}:{} (fingerprint: {}). Strict mode enabled, rejecting.",
                self.host, self.port, fingerprint
            );
            return Err(SshError::ConnectionFailed(format!(
                "Host key verification failed for {}:{}. Fingerprint: {}. \
                 Add it to trusted_fingerprints or disable strict mode.",
                self.host, self.port, fingerprint
            )));
        }

        info!(
            "Accepting host key for {}:{} (fingerprint: {})",
            self.host, self.port, fingerprint
        );
        Ok(true)
    }
}

impl client::Handler for ClientHandler {
    type Error = SshError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        self.verify(&fingerprint(server_public_key))
    }
}
