//! FBM client: connection lifecycle, request correlation and the transport
//! contract.
//!
//! The pieces fit together as follows:
//!
//! * [`FbmClient`] drives a [`Transport`] produced by a [`Connect`]
//!   implementation, serializing outbound frames behind one send lock and
//!   running a single receive-loop task.
//! * Each in-flight request is registered in the [`PendingTable`] under its
//!   message id; the receive loop resolves the matching [`ResponseWaiter`]
//!   when the response arrives.
//! * [`ClientConfig`] carries buffer sizing (advertised to the server during
//!   the connect handshake), timeouts, header encoding and the close-event
//!   hooks.

pub mod config;
pub mod connection;
pub mod error;
pub mod pending;
pub mod transport;
pub mod waiter;

pub use config::{ClientConfig, STREAM_BUFFER_CEILING};
pub use connection::FbmClient;
pub use error::{FbmError, FbmResult};
pub use pending::PendingTable;
pub use transport::{CloseStatus, Connect, ConnectRequest, MessageKind, Received, Transport};
pub use waiter::ResponseWaiter;
