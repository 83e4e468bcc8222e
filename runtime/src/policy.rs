//! Resilience policies over outcome-producing operations.
//!
//! A [`Policy`] decorates an operation `Fn(Context) -> Future<Output =
//! Outcome<T>>`. The operation is re-invocable so a retry can call it again,
//! and it receives the context by value so a timeout can hand each attempt a
//! child context it is free to cancel.
//!
//! Policies compose by wrapping:
//!
//! - `timeout.wrap(retry)` bounds the total time spent across attempts;
//! - `retry.wrap(timeout)` bounds each attempt.
//!
//! # Example
//!
//! ```ignore
//! use courier_runtime::policy::{Policy, PolicyExt};
//! use courier_runtime::retry::RetryPolicy;
//! use courier_runtime::timeout::TimeoutPolicy;
//!
//! let per_attempt = RetryPolicy::new(3).wrap(TimeoutPolicy::new(Duration::from_millis(200)));
//!
//! let outcome = per_attempt
//!     .execute(ctx.clone(), |ctx| async move { client.call(&ctx).await })
//!     .await;
//! ```

use courier_core::context::Context;
use courier_core::outcome::Outcome;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

/// A decorator around a re-invocable, outcome-producing operation.
pub trait Policy: Send + Sync {
    /// Run `operation` under this policy.
    fn execute<'a, T, F, Fut>(&'a self, ctx: Context, operation: F) -> BoxFuture<'a, Outcome<T>>
    where
        F: Fn(Context) -> Fut + Send + Sync + 'a,
        Fut: Future<Output = Outcome<T>> + Send + 'a,
        T: Send + 'a;
}

impl<P: Policy> Policy for Arc<P> {
    fn execute<'a, T, F, Fut>(&'a self, ctx: Context, operation: F) -> BoxFuture<'a, Outcome<T>>
    where
        F: Fn(Context) -> Fut + Send + Sync + 'a,
        Fut: Future<Output = Outcome<T>> + Send + 'a,
        T: Send + 'a,
    {
        (**self).execute(ctx, operation)
    }
}

/// An absent policy runs the operation directly.
impl<P: Policy> Policy for Option<P> {
    fn execute<'a, T, F, Fut>(&'a self, ctx: Context, operation: F) -> BoxFuture<'a, Outcome<T>>
    where
        F: Fn(Context) -> Fut + Send + Sync + 'a,
        Fut: Future<Output = Outcome<T>> + Send + 'a,
        T: Send + 'a,
    {
        match self {
            Some(policy) => policy.execute(ctx, operation),
            None => Box::pin(async move { operation(ctx).await }),
        }
    }
}

/// `outer` applied around `inner` applied around the operation.
#[derive(Debug, Clone)]
pub struct Wrapped<O, I> {
    outer: O,
    inner: I,
}

impl<O, I> Wrapped<O, I> {
    /// Compose two policies.
    #[must_use]
    pub const fn new(outer: O, inner: I) -> Self {
        Self { outer, inner }
    }

    /// The outer policy.
    #[must_use]
    pub const fn outer(&self) -> &O {
        &self.outer
    }

    /// The inner policy.
    #[must_use]
    pub const fn inner(&self) -> &I {
        &self.inner
    }
}

impl<O: Policy, I: Policy> Policy for Wrapped<O, I> {
    fn execute<'a, T, F, Fut>(&'a self, ctx: Context, operation: F) -> BoxFuture<'a, Outcome<T>>
    where
        F: Fn(Context) -> Fut + Send + Sync + 'a,
        Fut: Future<Output = Outcome<T>> + Send + 'a,
        T: Send + 'a,
    {
        Box::pin(async move {
            let operation = &operation;
            let inner = &self.inner;
            self.outer
                .execute(ctx, move |ctx: Context| inner.execute(ctx, operation))
                .await
        })
    }
}

/// Combinators for every [`Policy`].
pub trait PolicyExt: Policy + Sized {
    /// Wrap `inner` with `self`: `self` is applied outermost.
    #[must_use]
    fn wrap<I: Policy>(self, inner: I) -> Wrapped<Self, I> {
        Wrapped::new(self, inner)
    }
}

impl<P: Policy> PolicyExt for P {}
