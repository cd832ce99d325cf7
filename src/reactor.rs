//! The I/O reactor and request runner collaborator contracts.
//! Concrete transport, frame encoding, and the event loop itself are
//! excluded from this core; only the trait shapes the Control Connection
//! depends on live here. A production driver supplies real
//! implementations; `tests/` supplies scripted fakes.

use crate::error::ControlError;
use crate::protocol::{Event, Request, Response};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub type EventHandler = Box<dyn Fn(Event) + Send + Sync>;
pub type CloseHandler = Box<dyn Fn() + Send + Sync>;

/// A single opened transport connection to one candidate host.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Send one request and await the matching response.
    async fn send(&self, request: Request) -> Result<Response, ControlError>;

    /// Install the handler invoked for every server-pushed event frame
    /// received while this connection is open. Replaces any prior handler.
    fn on_event(&self, handler: EventHandler);

    /// Install the handler invoked once, when the connection closes for any
    /// reason other than a call to `close()`.
    fn on_close(&self, handler: CloseHandler);

    /// Close the connection. Idempotent.
    async fn close(&self);

    fn connected(&self) -> bool;
}

/// Opens connections and fires timers. Single collaborator
/// shared by every connect attempt.
#[async_trait]
pub trait IoReactor: Send + Sync {
    async fn connect(
        &self,
        ip: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<Arc<dyn Connection>, ControlError>;

    /// Schedule `task` to run after `delay`. Returns a handle whose
    /// `cancel()` prevents the task from running if it hasn't already.
    fn schedule(&self, delay: Duration, task: Box<dyn FnOnce() + Send>) -> TimerHandle;
}

/// Handle to a pending timer. `cancel()` is best-effort: if the timer has
/// already fired, it's a no-op.
pub struct TimerHandle {
    cancel: Box<dyn FnOnce() + Send>,
}

impl TimerHandle {
    pub fn new(cancel: Box<dyn FnOnce() + Send>) -> Self {
        Self { cancel }
    }

    pub fn cancel(self) {
        (self.cancel)();
    }
}

/// Issues one request on one connection, observing `timeout`.
/// Separated from `Connection::send` so that request-level timeout and
/// retry bookkeeping live outside the transport itself.
#[async_trait]
pub trait RequestRunner: Send + Sync {
    async fn execute(
        &self,
        connection: &dyn Connection,
        request: Request,
        timeout: Duration,
    ) -> Result<Response, ControlError>;
}

/// A `RequestRunner` that just forwards to `Connection::send`, racing it
/// against `timeout`. The default when no retry/backoff policy is injected.
pub struct DirectRequestRunner;

#[async_trait]
impl RequestRunner for DirectRequestRunner {
    async fn execute(
        &self,
        connection: &dyn Connection,
        request: Request,
        timeout: Duration,
    ) -> Result<Response, ControlError> {
        match tokio::time::timeout(timeout, connection.send(request)).await {
            Ok(result) => result,
            Err(_) => Err(ControlError::Timeout),
        }
    }
}
