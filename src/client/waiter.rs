// Single-shot completion primitive for one in-flight request.
//
// Armed by the sender right after its id is registered, resolved exactly once
// by whichever of completion, deadline expiry or cancellation wins the
// compare-and-set on the state word, and disarmed when the send operation
// finishes. The receive loop only pushes the payload through a oneshot
// channel; the caller's continuation runs on its own task, never on the loop.

use crate::client::error::{FbmError, FbmResult};
use bytes::Bytes;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

const IDLE: u8 = 0;
const ARMED: u8 = 1;
const COMPLETED: u8 = 2;
const TIMED_OUT: u8 = 3;
const CANCELLED: u8 = 4;

enum Outcome {
    Completed(Bytes),
    Cancelled,
}

/// Per-request waiter resolving to exactly one of completed, timed out or
/// cancelled per flight.
pub struct ResponseWaiter {
    state: AtomicU8,
    signal: Mutex<Option<oneshot::Sender<Outcome>>>,
    pending: Mutex<Option<oneshot::Receiver<Outcome>>>,
}

impl ResponseWaiter {
    pub fn new() -> Self {
        ResponseWaiter {
            state: AtomicU8::new(IDLE),
            signal: Mutex::new(None),
            pending: Mutex::new(None),
        }
    }

    /// Prepares a fresh single-shot notification. Called once per flight,
    /// immediately after the id is inserted into the pending table.
    pub fn arm(&self) {
        let (tx, rx) = oneshot::channel();
        *self.signal.lock().expect("waiter signal lock") = Some(tx);
        *self.pending.lock().expect("waiter pending lock") = Some(rx);
        self.state.store(ARMED, Ordering::Release);
    }

    /// Disposes the flight's channel halves and returns the waiter to idle.
    pub fn disarm(&self) {
        self.signal.lock().expect("waiter signal lock").take();
        self.pending.lock().expect("waiter pending lock").take();
        self.state.store(IDLE, Ordering::Release);
    }

    /// Resolves the waiter with a received payload.
    ///
    /// Returns `false` when the waiter already reached a terminal state (the
    /// caller must then dispose the payload buffer itself).
    pub fn complete(&self, payload: Bytes) -> bool {
        if !self.transition(COMPLETED) {
            return false;
        }
        if let Some(tx) = self.signal.lock().expect("waiter signal lock").take() {
            let _ = tx.send(Outcome::Completed(payload));
        }
        true
    }

    /// Forces the cancelled terminal state. Idempotent with respect to any
    /// prior terminal state.
    pub fn manual_cancellation(&self) {
        if self.transition(CANCELLED) {
            if let Some(tx) = self.signal.lock().expect("waiter signal lock").take() {
                let _ = tx.send(Outcome::Cancelled);
            }
        }
    }

    /// Awaits the terminal state of the current flight.
    ///
    /// A `timeout` of zero disables the deadline. When the waiter is already
    /// terminal on entry neither the deadline timer nor the cancellation
    /// registration is taken.
    pub async fn wait(&self, timeout: Duration, cancel: &CancellationToken) -> FbmResult<Bytes> {
        let Some(mut rx) = self.pending.lock().expect("waiter pending lock").take() else {
            return Err(FbmError::UnsetResponse);
        };

        if self.state.load(Ordering::Acquire) != ARMED {
            return Self::resolve(rx.await);
        }

        let deadline_armed = timeout > Duration::ZERO;
        enum Event {
            Settled(Result<Outcome, oneshot::error::RecvError>),
            Deadline,
            Aborted,
        }

        let event = tokio::select! {
            outcome = &mut rx => Event::Settled(outcome),
            _ = tokio::time::sleep(timeout), if deadline_armed => Event::Deadline,
            _ = cancel.cancelled() => Event::Aborted,
        };

        match event {
            Event::Settled(outcome) => Self::resolve(outcome),
            Event::Deadline => {
                if self.transition(TIMED_OUT) {
                    self.signal.lock().expect("waiter signal lock").take();
                    Err(FbmError::ResponseTimedOut)
                } else {
                    // Lost the race to a completion already in flight.
                    Self::resolve(rx.await)
                }
            }
            Event::Aborted => {
                if self.transition(CANCELLED) {
                    self.signal.lock().expect("waiter signal lock").take();
                    Err(FbmError::Cancelled)
                } else {
                    Self::resolve(rx.await)
                }
            }
        }
    }

    /// True while a flight is armed and unresolved.
    pub fn is_armed(&self) -> bool {
        self.state.load(Ordering::Acquire) == ARMED
    }

    fn transition(&self, terminal: u8) -> bool {
        self.state
            .compare_exchange(ARMED, terminal, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn resolve(outcome: Result<Outcome, oneshot::error::RecvError>) -> FbmResult<Bytes> {
        match outcome {
            Ok(Outcome::Completed(payload)) => Ok(payload),
            Ok(Outcome::Cancelled) => Err(FbmError::Cancelled),
            // Sender disposed without resolving: the flight was torn down.
            Err(_) => Err(FbmError::Cancelled),
        }
    }
}

impl Default for ResponseWaiter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ResponseWaiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state.load(Ordering::Relaxed) {
            IDLE => "idle",
            ARMED => "armed",
            COMPLETED => "completed",
            TIMED_OUT => "timed-out",
            CANCELLED => "cancelled",
            _ => "unknown",
        };
        f.debug_struct("ResponseWaiter").field("state", &state).finish()
    }
}
