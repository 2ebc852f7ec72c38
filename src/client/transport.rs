// Transport contract the client drives.
//
// The WebSocket implementation itself lives outside this crate; the client
// only needs frame-level send/receive with end-of-message marking, a close
// handshake, and cancellation on every suspension point. Receivers take
// `&self` so one transport can be shared between concurrent senders and the
// receive loop; the client's send lock guarantees whole logical messages are
// never interleaved on the wire.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Frame payload classification, mirroring WebSocket message types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    Binary,
    Text,
    /// Peer initiated or acknowledged the close handshake.
    Close,
}

/// Close handshake status codes the client emits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseStatus {
    NormalClosure,
    GoingAway,
    ProtocolError,
    InternalError,
}

/// Outcome of a single transport receive.
#[derive(Clone, Copy, Debug)]
pub struct Received {
    /// Payload bytes written into the caller's buffer
    pub count: usize,
    /// Whether this frame completes the logical message
    pub end_of_message: bool,
    pub kind: MessageKind,
}

/// Parameters for establishing a connection.
///
/// The URI already carries the query-encoded buffer sizing advertisement
/// (`b`, `hb`, `mx`). A zero `keep_alive` disables transport-level pings.
#[derive(Debug)]
pub struct ConnectRequest<'a> {
    pub uri: &'a str,
    pub headers: &'a [(String, String)],
    pub sub_protocol: Option<&'a str>,
    pub keep_alive: Duration,
    pub cancel: &'a CancellationToken,
}

/// A connected, frame-oriented, full-duplex transport.
pub trait Transport: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Sends one frame. `end_of_message` marks the final frame of a logical
    /// message.
    fn send(
        &self,
        payload: &[u8],
        kind: MessageKind,
        end_of_message: bool,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Receives one frame into `into`, reporting the byte count, the
    /// end-of-message flag and the frame kind.
    fn receive(
        &self,
        into: &mut [u8],
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Received, Self::Error>> + Send;

    /// Initiates the close handshake.
    fn disconnect(
        &self,
        status: CloseStatus,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Factory establishing [`Transport`] instances from a connect request.
pub trait Connect: Send + Sync {
    type Transport: Transport;

    fn connect(
        &self,
        request: ConnectRequest<'_>,
    ) -> impl Future<Output = Result<Self::Transport, <Self::Transport as Transport>::Error>> + Send;
}
