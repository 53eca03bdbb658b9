use http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io error")]
    Io(#[from] std::io::Error),
    #[error("stored session could not be decoded")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport configuration error")]
    Config(#[source] anyhow::Error),
    #[error("backend transport error")]
    Transport(#[source] anyhow::Error),
    #[error("backend remote error (status {status})")]
    Remote { status: StatusCode, message: String },
    #[error("backend response decode error")]
    Decode(#[source] anyhow::Error),
    #[error("duplex connection failed")]
    Connect(#[source] anyhow::Error),
}

impl TransportError {
    /// Label used for the `kind` dimension of error metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            TransportError::Config(_) => "config",
            TransportError::Transport(_) => "transport",
            TransportError::Remote { .. } => "remote",
            TransportError::Decode(_) => "decode",
            TransportError::Connect(_) => "connect",
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_are_stable() {
        let remote = TransportError::Remote {
            status: StatusCode::BAD_GATEWAY,
            message: "down".into(),
        };
        assert_eq!(remote.kind(), "remote");
        assert_eq!(remote.to_string(), "backend remote error (status 502 Bad Gateway)");
        assert_eq!(
            TransportError::Connect(anyhow::anyhow!("refused")).kind(),
            "connect"
        );
    }

    #[test]
    fn config_error_messages() {
        assert_eq!(
            ConfigError::Missing("CHAT_ENDPOINT").to_string(),
            "missing required setting CHAT_ENDPOINT"
        );
    }
}
