/// Errors surfaced by the socket layer
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    /// The channel was already closing or closed when the operation started
    #[error("socket already closed")]
    ConnectionClosed,

    /// An inbound frame could not be decoded as a message envelope
    #[error("malformed message: {0}")]
    MalformedMessage(#[source] serde_json::Error),

    /// An outbound message could not be serialized
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
}
