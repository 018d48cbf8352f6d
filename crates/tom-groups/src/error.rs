/// Group-layer errors for ToM.
///
/// Protocol outcomes that are answered with a receipt (expired commands,
/// permission denials on incoming commands) never become errors; these
/// variants cover local callers and real failures.
#[derive(Debug, thiserror::Error)]
pub enum TomGroupError {
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("signature verification failed")]
    InvalidSignature,

    #[error("invalid envelope: {reason}")]
    InvalidEnvelope { reason: String },

    #[error("invalid node id: {0}")]
    InvalidNodeId(String),

    #[error("group not ready: {group}")]
    NotReady { group: String },

    #[error("permission denied: {reason}")]
    PermissionDenied { reason: String },

    #[error("invalid command: {reason}")]
    InvalidCommand { reason: String },

    #[error("not configured: {0}")]
    NotConfigured(&'static str),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("runtime shut down")]
    RuntimeClosed,
}

impl From<rmp_serde::encode::Error> for TomGroupError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        TomGroupError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for TomGroupError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        TomGroupError::Deserialization(e.to_string())
    }
}

/// Errors reported by a `GroupStore` backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("backend failure: {0}")]
    Backend(String),

    #[error("codec failure: {0}")]
    Codec(String),

    #[error("store lock poisoned")]
    Poisoned,
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Codec(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StoreError::Codec(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        StoreError::Codec(e.to_string())
    }
}
