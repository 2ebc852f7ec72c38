// The FBM client connection: single-writer send path, single-reader receive
// loop, and the lifecycle transitions between them.
//
// All transport writes happen under one async mutex whose guarded value is
// the shared outbound stream buffer, so holding the lock is also exclusive
// use of that buffer. The receive loop is one spawned task that reassembles
// logical messages from transport frames and routes them through the pending
// table; its exit path cancels every in-flight waiter and fires the close
// events exactly once.

use crate::buffer::FixedBuffer;
use crate::client::config::ClientConfig;
use crate::client::error::{FbmError, FbmResult};
use crate::client::pending::PendingTable;
use crate::client::transport::{
    CloseStatus, Connect, ConnectRequest, MessageKind, Received, Transport,
};
use crate::codec;
use crate::request::Request;
use bytes::{Bytes, BytesMut};
use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A connected FBM client multiplexing request/response exchanges over one
/// transport.
pub struct FbmClient<T: Transport> {
    shared: Arc<Shared<T>>,
}

struct Shared<T: Transport> {
    config: ClientConfig,
    transport: T,
    pending: PendingTable,
    send_path: Mutex<SendPath>,
    closed: AtomicBool,
    disposed: AtomicBool,
    loop_cancel: CancellationToken,
    events: EventSinks,
}

/// State owned by whoever holds the send lock.
struct SendPath {
    stream: FixedBuffer,
}

struct EventSinks {
    closed_fired: AtomicBool,
    on_closed: Option<crate::client::config::ClosedHook>,
    on_error_closed: Option<crate::client::config::ErrorClosedHook>,
    on_control_frame: Option<crate::client::config::ControlFrameHook>,
}

impl EventSinks {
    fn fire_error_closed(&self, err: &FbmError) {
        if let Some(hook) = &self.on_error_closed {
            hook(err);
        }
    }

    /// Fires the closed hook at most once per connection.
    fn fire_closed(&self) {
        if !self.closed_fired.swap(true, Ordering::SeqCst) {
            if let Some(hook) = &self.on_closed {
                hook();
            }
        }
    }

    fn handle_control_frame(&self, data: Bytes) {
        match &self.on_control_frame {
            Some(hook) => hook(data),
            None => debug!(len = data.len(), "discarding control frame"),
        }
    }
}

impl<T: Transport> FbmClient<T> {
    /// Establishes a connection and starts the receive loop.
    ///
    /// The connect URI is extended with the sizing advertisement query
    /// parameters (`b`, `hb`, `mx`) before it reaches the connector.
    pub async fn connect<C>(
        connector: &C,
        uri: &str,
        config: ClientConfig,
        cancel: &CancellationToken,
    ) -> FbmResult<Self>
    where
        C: Connect<Transport = T>,
    {
        let sized_uri = config.sized_uri(uri);
        let transport = connector
            .connect(ConnectRequest {
                uri: &sized_uri,
                headers: &config.headers,
                sub_protocol: config.sub_protocol.as_deref(),
                keep_alive: config.keep_alive_interval,
                cancel,
            })
            .await
            .map_err(FbmError::transport)?;

        let events = EventSinks {
            closed_fired: AtomicBool::new(false),
            on_closed: config.on_closed.clone(),
            on_error_closed: config.on_error_closed.clone(),
            on_control_frame: config.on_control_frame.clone(),
        };
        let stream = FixedBuffer::new(config.memory.clone(), config.stream_buffer_size());
        let shared = Arc::new(Shared {
            transport,
            pending: PendingTable::new(),
            send_path: Mutex::new(SendPath { stream }),
            closed: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            loop_cancel: CancellationToken::new(),
            events,
            config,
        });

        tokio::spawn(receive_loop(shared.clone()));

        Ok(FbmClient { shared })
    }

    /// Whether the connection is open: connected and not disposed.
    pub fn is_connected(&self) -> bool {
        !self.shared.closed.load(Ordering::SeqCst)
            && !self.shared.disposed.load(Ordering::SeqCst)
    }

    /// Number of requests currently awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.shared.pending.len()
    }

    /// Sends a built request and awaits its response with the configured
    /// default timeout.
    pub async fn send(&self, request: &mut Request, cancel: &CancellationToken) -> FbmResult<()> {
        let timeout = self.shared.config.request_timeout;
        self.send_with_timeout(request, timeout, cancel).await
    }

    /// Sends a built request and awaits its response.
    ///
    /// The request's wire image goes out as one binary frame under the send
    /// lock. A zero `timeout` disables the deadline. On success the response
    /// is bound to the request; on any failure the id is removed from the
    /// pending table before the error surfaces.
    pub async fn send_with_timeout(
        &self,
        request: &mut Request,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> FbmResult<()> {
        self.ensure_open()?;
        request.validate()?;

        let waiter = request.waiter().clone();
        self.shared
            .pending
            .insert_unique(request.message_id(), waiter.clone())?;
        waiter.arm();

        let outcome = self.transmit_unary(request, timeout, cancel).await;
        let outcome = match outcome {
            Ok(payload) => {
                request.bind_response(payload);
                Ok(())
            }
            Err(err) => {
                self.shared.pending.remove(request.message_id());
                Err(err)
            }
        };
        waiter.disarm();
        outcome
    }

    /// Sends a request whose body is produced by `body`, chunked through the
    /// shared stream buffer, then awaits the response with the configured
    /// default timeout.
    pub async fn stream<R>(
        &self,
        request: &mut Request,
        body: &mut R,
        cancel: &CancellationToken,
    ) -> FbmResult<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        let timeout = self.shared.config.request_timeout;
        self.stream_with_timeout(request, body, timeout, cancel).await
    }

    /// Streaming variant of [`send_with_timeout`](Self::send_with_timeout).
    ///
    /// The header section is closed before transmission so the built bytes
    /// form a complete header image; the body is then forwarded chunk by
    /// chunk while the send lock is held. The final frame carries the
    /// end-of-message mark: either the first under-filled read, or an empty
    /// trailing frame when the payload length is an exact multiple of the
    /// stream buffer.
    pub async fn stream_with_timeout<R>(
        &self,
        request: &mut Request,
        body: &mut R,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> FbmResult<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.ensure_open()?;
        request.close_headers()?;
        request.validate()?;

        let waiter = request.waiter().clone();
        self.shared
            .pending
            .insert_unique(request.message_id(), waiter.clone())?;
        waiter.arm();

        let outcome = self.transmit_streaming(request, body, timeout, cancel).await;
        let outcome = match outcome {
            Ok(payload) => {
                request.bind_response(payload);
                Ok(())
            }
            Err(err) => {
                self.shared.pending.remove(request.message_id());
                Err(err)
            }
        };
        waiter.disarm();
        outcome
    }

    /// Starts the close handshake with a normal-closure status. The receive
    /// loop observes the peer's close frame and winds the connection down.
    pub async fn disconnect(&self, cancel: &CancellationToken) -> FbmResult<()> {
        if self.shared.disposed.load(Ordering::SeqCst) {
            return Err(FbmError::Disposed);
        }
        self.shared
            .transport
            .disconnect(CloseStatus::NormalClosure, cancel)
            .await
            .map_err(FbmError::transport)
    }

    /// Tears the client down: stops the receive loop and releases the shared
    /// stream buffer. Further operations fail with `Disposed`.
    pub async fn dispose(&self) {
        self.shared.disposed.store(true, Ordering::SeqCst);
        self.shared.loop_cancel.cancel();
        let mut path = self.shared.send_path.lock().await;
        path.stream.release();
    }

    fn ensure_open(&self) -> FbmResult<()> {
        if self.shared.disposed.load(Ordering::SeqCst) {
            return Err(FbmError::Disposed);
        }
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(FbmError::NotConnected);
        }
        Ok(())
    }

    async fn transmit_unary(
        &self,
        request: &Request,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> FbmResult<Bytes> {
        {
            let _path = self.acquire_send_lock(cancel).await?;
            self.shared
                .transport
                .send(request.request_data(), MessageKind::Binary, true, cancel)
                .await
                .map_err(FbmError::transport)?;
        }
        request.waiter().wait(timeout, cancel).await
    }

    async fn transmit_streaming<R>(
        &self,
        request: &Request,
        body: &mut R,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> FbmResult<Bytes>
    where
        R: AsyncRead + Unpin + Send,
    {
        {
            let mut path = self.acquire_send_lock(cancel).await?;
            self.shared
                .transport
                .send(request.request_data(), MessageKind::Binary, false, cancel)
                .await
                .map_err(FbmError::transport)?;

            let chunk_capacity = path.stream.capacity();
            loop {
                let read = body.read(path.stream.region_mut()).await?;
                if read == 0 {
                    // Exact-multiple payloads end on a zero read without an
                    // end-marked data frame; terminate explicitly.
                    self.shared
                        .transport
                        .send(&[], MessageKind::Binary, true, cancel)
                        .await
                        .map_err(FbmError::transport)?;
                    break;
                }
                let end_of_message = read < chunk_capacity;
                self.shared
                    .transport
                    .send(
                        &path.stream.region_mut()[..read],
                        MessageKind::Binary,
                        end_of_message,
                        cancel,
                    )
                    .await
                    .map_err(FbmError::transport)?;
                if end_of_message {
                    break;
                }
            }
        }
        request.waiter().wait(timeout, cancel).await
    }

    async fn acquire_send_lock(
        &self,
        cancel: &CancellationToken,
    ) -> FbmResult<tokio::sync::MutexGuard<'_, SendPath>> {
        tokio::select! {
            guard = self.shared.send_path.lock() => Ok(guard),
            _ = cancel.cancelled() => Err(FbmError::Cancelled),
        }
    }
}

impl<T: Transport> std::fmt::Debug for FbmClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FbmClient")
            .field("connected", &self.is_connected())
            .field("pending", &self.shared.pending.len())
            .finish()
    }
}

impl<T: Transport> Drop for FbmClient<T> {
    fn drop(&mut self) {
        self.shared.loop_cancel.cancel();
    }
}

/// The dedicated receive task: frame reassembly, dispatch and shutdown
/// fan-out.
async fn receive_loop<T: Transport>(shared: Arc<Shared<T>>) {
    let mut recv = FixedBuffer::new(
        shared.config.memory.clone(),
        shared.config.recv_buffer_size,
    );
    let cancel = shared.loop_cancel.clone();

    let result = pump(&shared, &mut recv, &cancel).await;
    recv.release();

    match &result {
        Ok(()) => debug!("receive loop exited on close frame"),
        Err(FbmError::Cancelled) => debug!("receive loop cancelled"),
        Err(err) => {
            warn!(error = %err, "receive loop terminated on error");
            shared.events.fire_error_closed(err);
        }
    }

    shared.pending.cancel_all();
    shared.closed.store(true, Ordering::SeqCst);
    shared.events.fire_closed();
}

async fn pump<T: Transport>(
    shared: &Shared<T>,
    recv: &mut FixedBuffer,
    cancel: &CancellationToken,
) -> FbmResult<()> {
    loop {
        let first = receive_frame(shared, recv, cancel).await?;
        if first.kind == MessageKind::Close {
            return Ok(());
        }
        if first.count < codec::MIN_MESSAGE_LEN {
            // Cannot even hold a message id.
            debug!(count = first.count, "ignoring undersized first frame");
            continue;
        }

        let mut message = BytesMut::with_capacity(first.count);
        message.extend_from_slice(&recv.region_mut()[..first.count]);
        let mut complete = first.end_of_message;
        let mut oversized = false;

        while !complete {
            let next = receive_frame(shared, recv, cancel).await?;
            if next.kind == MessageKind::Close {
                return Ok(());
            }
            if message.len() + next.count > shared.config.max_message_size {
                warn!(
                    assembled = message.len(),
                    incoming = next.count,
                    limit = shared.config.max_message_size,
                    "dropping oversized inbound message"
                );
                oversized = true;
                break;
            }
            message.extend_from_slice(&recv.region_mut()[..next.count]);
            complete = next.end_of_message;
        }

        if oversized {
            continue;
        }
        dispatch(shared, message.freeze());
    }
}

async fn receive_frame<T: Transport>(
    shared: &Shared<T>,
    recv: &mut FixedBuffer,
    cancel: &CancellationToken,
) -> FbmResult<Received> {
    tokio::select! {
        received = shared.transport.receive(recv.region_mut(), cancel) => {
            received.map_err(FbmError::transport)
        }
        _ = cancel.cancelled() => Err(FbmError::Cancelled),
    }
}

/// Routes one assembled inbound message to its pending request, the control
/// handler, or the floor.
fn dispatch<T: Transport>(shared: &Shared<T>, data: Bytes) {
    let id = {
        let mut cursor = Cursor::new(data.as_ref());
        codec::get_message_id(codec::read_line(&mut cursor))
    };

    if id == codec::CONTROL_ID {
        shared.events.handle_control_frame(data);
        return;
    }
    if id < 0 {
        warn!(id, "dropping inbound message with invalid message id");
        return;
    }

    match shared.pending.remove(id) {
        Some(waiter) => {
            if !waiter.complete(data) {
                debug!(id, "waiter already terminal; dropping response payload");
            }
        }
        None => {
            debug!(id, "no pending request for inbound message id; dropping");
        }
    }
}
