use thiserror::Error;

pub type Result<T> = std::result::Result<T, BridgeError>;

// Every failure the bridge can observe. Nothing here is fatal to the host.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error), // Connect, timeout or body read failures.

    #[error("Endpoint {endpoint} answered with HTTP {status}")]
    Status { endpoint: String, status: u16 }, // Any non-2xx answer.

    #[error("Endpoint {endpoint} returned no usable candidate")]
    EmptyReply { endpoint: String }, // Safety-filtered or blank reply.

    #[error("Endpoint {endpoint} returned a malformed body: {reason}")]
    Malformed { endpoint: String, reason: String },

    #[error("No endpoints configured")]
    NoEndpoints,

    #[error("No credential available")]
    MissingCredential,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Desktop effect failed: {0}")]
    Effect(String),

    #[error("Process scan failed: {0}")]
    ProcessScan(String),

    #[error("Task join error: {0}")]
    TaskJoin(String),

    #[error("Logger error: {0}")]
    Logger(String),

    #[error("No Tokio runtime: {0}")]
    Runtime(String), // Components must be built inside a runtime.
}

impl BridgeError {
    /// Transport and protocol failures move the failover on to the next
    /// endpoint. Credential and local errors do not.
    pub fn is_failover_eligible(&self) -> bool {
        matches!(
            self,
            BridgeError::Transport(_)
                | BridgeError::Status { .. }
                | BridgeError::EmptyReply { .. }
                | BridgeError::Malformed { .. }
        )
    }
}

impl From<tokio::task::JoinError> for BridgeError {
    fn from(err: tokio::task::JoinError) -> Self {
        BridgeError::TaskJoin(err.to_string())
    }
}

impl From<tokio::runtime::TryCurrentError> for BridgeError {
    fn from(err: tokio::runtime::TryCurrentError) -> Self {
        BridgeError::Runtime(err.to_string())
    }
}

impl From<log::SetLoggerError> for BridgeError {
    fn from(err: log::SetLoggerError) -> Self {
        BridgeError::Logger(err.to_string())
    }
}
