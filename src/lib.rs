//! Fixed Buffer Messaging (FBM) client.
//!
//! A stateful asynchronous request/response core that multiplexes many
//! logical exchanges over a single WebSocket-style connection. Compared with
//! one HTTP round trip per message, the savings come from reusing one
//! fixed-size binary buffer per in-flight request, serializing all frame
//! writes on the connection, and correlating responses to requests through a
//! message id carried in-band.
//!
//! # Wire format
//!
//! ```text
//! <header-record>*  terminator  <body-bytes>*
//! header-record := <cmd-byte> <value-bytes> terminator
//! terminator    := 0xFF 0xF1
//! ```
//!
//! The first record of every message is the message id (tag `1`, four
//! little-endian bytes). Positive ids identify user requests, `-500` is the
//! reserved control-frame id, and zero is invalid.
//!
//! # Shape of a round trip
//!
//! A caller rents a [`Request`] from a [`RequestPool`], writes headers and a
//! body into its buffer, and hands it to [`FbmClient::send`]. The client
//! registers the id, writes the wire image under the send lock, and awaits
//! the request's waiter. The receive loop reassembles the inbound response,
//! looks the id up, and resolves the waiter; the caller then reads the
//! [`ResponseView`] borrowed from the request's own buffer and returns the
//! request to the pool.

pub mod buffer;
pub mod client;
pub mod codec;
pub mod memory;
pub mod pool;
pub mod request;


pub use buffer::{BufferFull, FixedBuffer};
pub use client::{
    ClientConfig, CloseStatus, Connect, ConnectRequest, FbmClient, FbmError, FbmResult,
    MessageKind, Received, ResponseWaiter, Transport,
};
pub use codec::{CONTROL_ID, HeaderCommand, HeaderEntry, ParseStatus, TERMINATOR};
pub use memory::{HeapMemory, MemoryManager};
pub use pool::{PooledRequest, RequestPool};
pub use request::{BodyWriter, Request, ResponseView};
