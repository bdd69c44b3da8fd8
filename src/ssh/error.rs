//! SSH Error types

use thiserror::Error;

use crate::rig::TransportError;

#[derive(Error, Debug)]
pub enum SshError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("SSH protocol error: {0}")]
    ProtocolError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Disconnected")]
    Disconnected,
}

impl From<russh::Error> for SshError {
    fn from(err: russh::Error) -> Self {
        match err {
            russh::Error::Disconnect => SshError::Disconnected,
            other => SshError::ProtocolError(other.to_string()),
        }
    }
}

impl From<SshError> for TransportError {
    fn from(err: SshError) -> Self {
        match err {
            SshError::AuthenticationFailed(reason) => TransportError::Authentication(reason),
            SshError::Timeout(_) => TransportError::Timeout,
            SshError::Disconnected => TransportError::Disconnected,
            SshError::ChannelError(reason) => TransportError::Exec(reason),
            other => TransportError::Connect(other.to_string()),
        }
    }
}

impl serde::Serialize for SshError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
