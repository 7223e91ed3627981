//! Error types shared with the service crate.
//!
//! Agent transport failures have their own `AgentClientError`; this covers the
//! response log.

#[derive(Debug, thiserror::Error)]
pub enum CommonError {
    #[error("response log io error: {0}")]
    ResponseLog(#[from] std::io::Error),

    #[error("response log encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}
