// Client configuration: buffer sizing, timeouts, encoding and event hooks.

use crate::client::error::FbmError;
use crate::memory::{HeapMemory, MemoryManager};
use bytes::Bytes;
use encoding_rs::{Encoding, UTF_8};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Ceiling for the shared outbound stream buffer.
pub const STREAM_BUFFER_CEILING: usize = 128 * 1024;

/// Hook invoked once when the connection has fully closed.
pub type ClosedHook = Arc<dyn Fn() + Send + Sync>;

/// Hook invoked before the closed hook when the cause was an error.
pub type ErrorClosedHook = Arc<dyn Fn(&FbmError) + Send + Sync>;

/// Hook receiving control-frame messages (reserved id `-500`). The default
/// behavior without a hook is to discard them.
pub type ControlFrameHook = Arc<dyn Fn(Bytes) + Send + Sync>;

/// Configuration for an FBM client connection.
///
/// All sizes are bytes. Durations of zero disable the respective mechanism.
///
/// # Example
///
/// ```rust
/// use fbm_client::ClientConfig;
/// use std::time::Duration;
///
/// let config = ClientConfig::new()
///     .with_message_buffer_size(16 * 1024)
///     .with_max_message_size(1024 * 1024)
///     .with_request_timeout(Duration::from_secs(10));
/// assert_eq!(config.message_buffer_size, 16 * 1024);
/// ```
#[derive(Clone)]
pub struct ClientConfig {
    /// Per-receive transport buffer size
    pub recv_buffer_size: usize,

    /// Per-request fixed buffer capacity (headers plus body when not
    /// streaming)
    pub message_buffer_size: usize,

    /// Request-side header sizing advertised to the server; not enforced
    /// locally
    pub max_header_buffer_size: usize,

    /// Maximum assembled inbound message; larger messages are dropped. Also
    /// advertised to the server and bounds the outbound stream chunk size.
    pub max_message_size: usize,

    /// Transport-level ping interval; zero disables
    pub keep_alive_interval: Duration,

    /// Default per-send response deadline; zero disables
    pub request_timeout: Duration,

    /// Optional WebSocket sub-protocol to negotiate
    pub sub_protocol: Option<String>,

    /// Encoding for header value text
    pub header_encoding: &'static Encoding,

    /// Additional headers for the connect handshake
    pub headers: Vec<(String, String)>,

    /// Provider of all message buffers
    pub memory: Arc<dyn MemoryManager>,

    pub(crate) on_closed: Option<ClosedHook>,
    pub(crate) on_error_closed: Option<ErrorClosedHook>,
    pub(crate) on_control_frame: Option<ControlFrameHook>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            recv_buffer_size: 4 * 1024,
            message_buffer_size: 8 * 1024,
            max_header_buffer_size: 8 * 1024,
            max_message_size: 1024 * 1024,
            keep_alive_interval: Duration::ZERO,
            request_timeout: Duration::from_secs(30),
            sub_protocol: None,
            header_encoding: UTF_8,
            headers: Vec::new(),
            memory: Arc::new(HeapMemory),
            on_closed: None,
            on_error_closed: None,
            on_control_frame: None,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_recv_buffer_size(mut self, bytes: usize) -> Self {
        self.recv_buffer_size = bytes;
        self
    }

    pub fn with_message_buffer_size(mut self, bytes: usize) -> Self {
        self.message_buffer_size = bytes;
        self
    }

    pub fn with_max_header_buffer_size(mut self, bytes: usize) -> Self {
        self.max_header_buffer_size = bytes;
        self
    }

    pub fn with_max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes;
        self
    }

    pub fn with_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_sub_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.sub_protocol = Some(protocol.into());
        self
    }

    pub fn with_header_encoding(mut self, encoding: &'static Encoding) -> Self {
        self.header_encoding = encoding;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemoryManager>) -> Self {
        self.memory = memory;
        self
    }

    /// Registers the hook fired exactly once after the receive loop exits.
    pub fn on_closed(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_closed = Some(Arc::new(hook));
        self
    }

    /// Registers the hook fired before the closed hook when the connection
    /// terminated on an error.
    pub fn on_error_closed(mut self, hook: impl Fn(&FbmError) + Send + Sync + 'static) -> Self {
        self.on_error_closed = Some(Arc::new(hook));
        self
    }

    /// Registers the handler for control-frame messages.
    pub fn on_control_frame(mut self, hook: impl Fn(Bytes) + Send + Sync + 'static) -> Self {
        self.on_control_frame = Some(Arc::new(hook));
        self
    }

    /// Size of the shared outbound stream buffer.
    pub fn stream_buffer_size(&self) -> usize {
        self.max_message_size.min(STREAM_BUFFER_CEILING)
    }

    /// Appends the sizing advertisement (`b`, `hb`, `mx`) to `uri` as decimal
    /// query parameters.
    pub fn sized_uri(&self, uri: &str) -> String {
        let separator = if uri.contains('?') { '&' } else { '?' };
        format!(
            "{uri}{separator}b={}&hb={}&mx={}",
            self.recv_buffer_size, self.max_header_buffer_size, self.max_message_size
        )
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("recv_buffer_size", &self.recv_buffer_size)
            .field("message_buffer_size", &self.message_buffer_size)
            .field("max_header_buffer_size", &self.max_header_buffer_size)
            .field("max_message_size", &self.max_message_size)
            .field("keep_alive_interval", &self.keep_alive_interval)
            .field("request_timeout", &self.request_timeout)
            .field("sub_protocol", &self.sub_protocol)
            .field("header_encoding", &self.header_encoding.name())
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}
