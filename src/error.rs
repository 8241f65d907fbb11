use thiserror::Error;

/// Failure taxonomy for the chat client.
///
/// Connection problems feed the reconnect policy and are only fatal once the
/// budget is spent. Protocol and audio problems stay local to the offending
/// frame or stream and never cascade into the connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("{0}")]
    Connection(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("audio error: {0}")]
    Audio(String),
    #[error("reconnect budget exhausted.")]
    ReconnectExhausted,
}
