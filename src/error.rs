//! Error types for the bridge.

use thiserror::Error;

/// Failures of the credential lifecycle (device flow, token exchange, storage).
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum AuthError {
    #[error("Device code expired before authorization completed")]
    DeviceFlowExpired,

    #[error("Authorization was denied by the user")]
    AccessDenied,

    #[error("Device flow error: {message}")]
    DeviceFlow { message: String },

    #[error("Token exchange failed (status {status}): {body}")]
    Exchange { status: u16, body: String },

    #[error("Token endpoint returned an empty token")]
    EmptyToken,

    #[error("Network error during authorization: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Credential store error: {0}")]
    Store(#[from] std::io::Error),
}

impl AuthError {
    pub fn device_flow(msg: impl Into<String>) -> Self {
        Self::DeviceFlow {
            message: msg.into(),
        }
    }
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BridgeError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Authorization failed: {0}")]
    Auth(#[from] AuthError),

    #[error("Invalid model requested: {name}")]
    UnknownModel { name: String },

    #[error("Unsupported content shape for {role} message")]
    UnsupportedContentShape { role: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Backend returned status {status}: {body}")]
    Backend { status: u16, body: String },

    #[error("Stream read error: {message}")]
    StreamRead { message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl BridgeError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn unknown_model(name: impl Into<String>) -> Self {
        Self::UnknownModel { name: name.into() }
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: msg.into(),
        }
    }

    pub fn stream_read(msg: impl Into<String>) -> Self {
        Self::StreamRead {
            message: msg.into(),
        }
    }

    /// Whether the caller is at fault (surfaced as a 4xx in the caller's schema).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownModel { .. }
                | Self::UnsupportedContentShape { .. }
                | Self::InvalidRequest { .. }
        )
    }

    /// HTTP status this error is surfaced with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::UnknownModel { .. }
            | Self::UnsupportedContentShape { .. }
            | Self::InvalidRequest { .. } => 400,
            Self::Backend { status, .. } if (400..600).contains(status) => *status,
            Self::Auth(_) => 503,
            _ => 502,
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors_are_400() {
        assert_eq!(BridgeError::unknown_model("gpt-9").status_code(), 400);
        assert_eq!(
            BridgeError::UnsupportedContentShape {
                role: "user".to_string()
            }
            .status_code(),
            400
        );
        assert!(BridgeError::invalid_request("bad").is_client_error());
    }

    #[test]
    fn test_backend_status_is_mirrored() {
        let err = BridgeError::Backend {
            status: 429,
            body: "slow down".to_string(),
        };
        assert_eq!(err.status_code(), 429);

        let err = BridgeError::Backend {
            status: 503,
            body: String::new(),
        };
        assert_eq!(err.status_code(), 503);

        let err = BridgeError::Backend {
            status: 302,
            body: String::new(),
        };
        assert_eq!(err.status_code(), 502);
    }

    #[test]
    fn test_unknown_model_message_carries_original_name() {
        let err = BridgeError::unknown_model("Claude-Nonexistent");
        assert_eq!(err.to_string(), "Invalid model requested: Claude-Nonexistent");
    }

    #[test]
    fn test_auth_failure_is_unavailable() {
        let err = BridgeError::from(AuthError::DeviceFlowExpired);
        assert_eq!(err.status_code(), 503);
        assert!(!err.is_client_error());
    }
}
