//! Per-dispatch ambient data.
//!
//! A [`Context`] is created once per inbound call (by a [`ContextFactory`]) and
//! threaded by reference through every pipeline stage and handler. It is never
//! mutated: deriving a context (for a timeout attempt, for a new correlation
//! id) produces a new value.
//!
//! The cancellation signal is a [`CancellationToken`]. Cancellation is
//! cooperative: handlers observe it and return [`Reason::Cancelled`], nothing
//! is forcibly stopped.

use crate::environment::{Clock, SystemClock};
use crate::outcome::Reason;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Correlation id, timestamp and cancellation signal for one dispatch.
#[derive(Debug, Clone)]
pub struct Context {
    correlation_id: Uuid,
    timestamp: DateTime<Utc>,
    cancellation: CancellationToken,
}

impl Context {
    /// Assemble a context from its parts.
    #[must_use]
    pub const fn new(
        correlation_id: Uuid,
        timestamp: DateTime<Utc>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            correlation_id,
            timestamp,
            cancellation,
        }
    }

    /// A fresh context with a random correlation id, the current time and its
    /// own cancellation token.
    #[must_use]
    pub fn root() -> Self {
        Self::new(Uuid::new_v4(), Utc::now(), CancellationToken::new())
    }

    /// Correlation id linking everything done for this call.
    #[must_use]
    pub const fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    /// When the inbound call was accepted.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// The cancellation signal.
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Request cancellation of this context and every context derived from it.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await;
    }

    /// `Err(Reason::Cancelled)` once cancellation has been requested.
    ///
    /// # Errors
    ///
    /// Returns [`Reason::Cancelled`] if the signal has fired.
    pub fn ensure_active(&self) -> Result<(), Reason> {
        if self.is_cancelled() {
            Err(Reason::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Derive a context whose cancellation is a child of this one.
    ///
    /// Cancelling the child leaves the parent untouched; cancelling the parent
    /// cancels the child.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            correlation_id: self.correlation_id,
            timestamp: self.timestamp,
            cancellation: self.cancellation.child_token(),
        }
    }

    /// Derive a context carrying a different correlation id.
    #[must_use]
    pub fn with_correlation_id(&self, correlation_id: Uuid) -> Self {
        Self {
            correlation_id,
            timestamp: self.timestamp,
            cancellation: self.cancellation.clone(),
        }
    }
}

/// Creates one [`Context`] per inbound call.
///
/// Invoked by the caller-side boundary (an HTTP handler, a transport consumer),
/// never by the dispatch core itself.
pub trait ContextFactory: Send + Sync {
    /// Create a context for a new inbound call.
    fn create(&self) -> Context;
}

/// Context factory backed by a [`Clock`] and random v4 correlation ids.
///
/// When built with a root token, every created context is cancelled when the
/// root is (process shutdown).
#[derive(Debug, Clone)]
pub struct DefaultContextFactory<C = SystemClock> {
    clock: C,
    root: Option<CancellationToken>,
}

impl DefaultContextFactory<SystemClock> {
    /// Factory using the system clock.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            clock: SystemClock,
            root: None,
        }
    }
}

impl Default for DefaultContextFactory<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> DefaultContextFactory<C> {
    /// Factory using the given clock.
    #[must_use]
    pub const fn with_clock(clock: C) -> Self {
        Self { clock, root: None }
    }

    /// Link created contexts to a root cancellation token.
    #[must_use]
    pub fn with_root(mut self, root: CancellationToken) -> Self {
        self.root = Some(root);
        self
    }
}

impl<C: Clock> ContextFactory for DefaultContextFactory<C> {
    fn create(&self) -> Context {
        let cancellation = self
            .root
            .as_ref()
            .map_or_else(CancellationToken::new, CancellationToken::child_token);
        Context::new(Uuid::new_v4(), self.clock.now(), cancellation)
    }
}
