// Shared rental store of reusable request objects.
//
// Idle requests are parked without their buffers: the return hook discards
// any response and frees the buffer back to the memory manager, and renting
// re-leases a buffer and rewrites the id record. The pool can be shared by
// any number of clients; an externally supplied pool stays owned by its
// creator.

use crate::client::config::ClientConfig;
use crate::client::error::FbmResult;
use crate::memory::MemoryManager;
use crate::request::Request;
use encoding_rs::Encoding;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

/// Rental pool of [`Request`] objects with a soft cap on parked idles.
#[derive(Clone)]
pub struct RequestPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    idle: Mutex<Vec<Request>>,
    max_idle: usize,
    capacity: usize,
    encoding: &'static Encoding,
    memory: Arc<dyn MemoryManager>,
}

impl RequestPool {
    /// Creates a pool handing out requests with `capacity`-byte buffers.
    pub fn new(
        memory: Arc<dyn MemoryManager>,
        capacity: usize,
        encoding: &'static Encoding,
        max_idle: usize,
    ) -> Self {
        RequestPool {
            inner: Arc::new(PoolInner {
                idle: Mutex::new(Vec::new()),
                max_idle,
                capacity,
                encoding,
                memory,
            }),
        }
    }

    /// Creates a pool matching a client configuration's buffer sizing,
    /// encoding and memory manager.
    pub fn for_config(config: &ClientConfig, max_idle: usize) -> Self {
        Self::new(
            config.memory.clone(),
            config.message_buffer_size,
            config.header_encoding,
            max_idle,
        )
    }

    /// Rents a request in fresh state: buffer leased, id record written.
    pub fn rent(&self) -> FbmResult<PooledRequest> {
        let parked = self.inner.idle.lock().expect("pool idle lock").pop();
        let mut request = match parked {
            Some(request) => request,
            None => Request::new(
                self.inner.memory.clone(),
                self.inner.capacity,
                self.inner.encoding,
            )?,
        };
        request.prepare()?;
        Ok(PooledRequest {
            request: Some(request),
            pool: self.inner.clone(),
        })
    }

    /// Number of currently parked idle requests.
    pub fn idle_len(&self) -> usize {
        self.inner.idle.lock().expect("pool idle lock").len()
    }
}

impl PoolInner {
    fn park(&self, mut request: Request) {
        request.release();
        let mut idle = self.idle.lock().expect("pool idle lock");
        if idle.len() < self.max_idle {
            idle.push(request);
        }
    }
}

impl fmt::Debug for RequestPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestPool")
            .field("idle", &self.idle_len())
            .field("max_idle", &self.inner.max_idle)
            .field("capacity", &self.inner.capacity)
            .finish()
    }
}

/// RAII rental of a [`Request`]; dropping returns it to the pool.
pub struct PooledRequest {
    request: Option<Request>,
    pool: Arc<PoolInner>,
}

impl Deref for PooledRequest {
    type Target = Request;

    fn deref(&self) -> &Request {
        self.request.as_ref().expect("pooled request present")
    }
}

impl DerefMut for PooledRequest {
    fn deref_mut(&mut self) -> &mut Request {
        self.request.as_mut().expect("pooled request present")
    }
}

impl Drop for PooledRequest {
    fn drop(&mut self) {
        if let Some(request) = self.request.take() {
            self.pool.park(request);
        }
    }
}

impl fmt::Debug for PooledRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.deref(), f)
    }
}
