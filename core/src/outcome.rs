//! The non-panicking result type returned by every dispatch operation.
//!
//! An [`Outcome`] is either a success carrying a value or a failure carrying one
//! or more structured [`Reason`]s. Both variants carry string-keyed [`Metadata`]
//! so policies can report how they ran (attempt counts, elapsed time) without
//! changing the value itself.
//!
//! # Invariants
//!
//! - An outcome is never simultaneously success and failure.
//! - A failure always has at least one reason ([`Reasons`] cannot be empty).
//! - [`Outcome::merge`] keeps every reason of every failing member.
//!
//! # Example
//!
//! ```
//! use courier_core::outcome::{Outcome, Reason};
//!
//! let ok: Outcome<u32> = Outcome::success(7);
//! let failed: Outcome<u32> = Outcome::failure(Reason::rejected("out of stock"));
//!
//! let merged = Outcome::merge([ok.discard(), failed.discard()]);
//! assert!(merged.is_failure());
//! assert_eq!(merged.failure_reasons().len(), 1);
//! ```

use serde_json::Value;
use smallvec::SmallVec;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Well-known metadata keys written by the resilience policies.
pub mod keys {
    /// Number of attempts a retry policy actually made.
    pub const ATTEMPTS: &str = "retry.attempts";

    /// Set when a retry policy stopped because a filter declared the failure
    /// not retryable.
    pub const RETRY_STOPPED: &str = "retry.stopped";

    /// Wall-clock milliseconds measured by a timeout policy.
    pub const ELAPSED_MS: &str = "timeout.elapsed_ms";

    /// Id of the outbox record created by an outbox-mode publish.
    pub const RECORD_ID: &str = "outbox.record_id";
}

/// A panic caught at a dispatch boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaughtPanic {
    message: String,
}

impl CaughtPanic {
    /// Build from the payload returned by `catch_unwind`.
    #[must_use]
    pub fn from_payload(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&'static str>() {
            (*message).to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self { message }
    }

    /// Build from a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The panic message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CaughtPanic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Why an operation failed.
///
/// The variants follow the failure taxonomy of the dispatch core so callers can
/// tell "your request was rejected" apart from "we could not even try".
#[derive(Error, Debug, Clone)]
pub enum Reason {
    /// No handler is registered for the message type.
    #[error("no handler registered for `{message_type}`")]
    HandlerNotFound {
        /// Fully qualified type name of the message
        message_type: &'static str,
    },

    /// The handler rejected the message (business or technical failure).
    #[error("{0}")]
    Rejected(String),

    /// A collaborator (outbox store, transport, codec) was unavailable.
    #[error("{component} unavailable: {message}")]
    Infrastructure {
        /// Which collaborator failed
        component: &'static str,
        /// Collaborator error message
        message: String,
    },

    /// The operation did not finish before its deadline.
    #[error("timed out after {after:?}")]
    Timeout {
        /// The configured deadline
        after: Duration,
    },

    /// The caller withdrew interest.
    #[error("operation cancelled")]
    Cancelled,

    /// Handler or collaborator code panicked.
    #[error("panicked: {0}")]
    Panicked(CaughtPanic),

    /// A foreign error captured as a reason; the root cause stays reachable via
    /// [`std::error::Error::source`].
    #[error("{message}")]
    Error {
        /// Display form of the captured error
        message: String,
        /// The captured error
        #[source]
        source: Arc<dyn std::error::Error + Send + Sync>,
    },
}

impl Reason {
    /// A business rejection with a message.
    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }

    /// A collaborator failure.
    #[must_use]
    pub fn infrastructure(component: &'static str, error: impl fmt::Display) -> Self {
        Self::Infrastructure {
            component,
            message: error.to_string(),
        }
    }

    /// Capture an arbitrary error, keeping it as the source.
    #[must_use]
    pub fn error<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Error {
            message: error.to_string(),
            source: Arc::new(error),
        }
    }

    /// Whether this is a [`Reason::Timeout`].
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Whether this is a [`Reason::Cancelled`].
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether this is a [`Reason::HandlerNotFound`].
    #[must_use]
    pub const fn is_handler_not_found(&self) -> bool {
        matches!(self, Self::HandlerNotFound { .. })
    }

    /// Whether this is a [`Reason::Infrastructure`].
    #[must_use]
    pub const fn is_infrastructure(&self) -> bool {
        matches!(self, Self::Infrastructure { .. })
    }

    /// Whether this is a [`Reason::Panicked`].
    #[must_use]
    pub const fn is_panic(&self) -> bool {
        matches!(self, Self::Panicked(_))
    }
}

/// A non-empty list of failure reasons.
#[derive(Debug, Clone)]
pub struct Reasons(SmallVec<[Reason; 1]>);

impl Reasons {
    /// Start a list with its first reason.
    #[must_use]
    pub fn new(first: Reason) -> Self {
        let mut reasons = SmallVec::new();
        reasons.push(first);
        Self(reasons)
    }

    /// Collect reasons, returning `None` when the iterator is empty.
    pub fn collect(reasons: impl IntoIterator<Item = Reason>) -> Option<Self> {
        let reasons: SmallVec<[Reason; 1]> = reasons.into_iter().collect();
        if reasons.is_empty() {
            None
        } else {
            Some(Self(reasons))
        }
    }

    /// Append a reason.
    pub fn push(&mut self, reason: Reason) {
        self.0.push(reason);
    }

    /// Append every reason of another list.
    pub fn append(&mut self, other: Self) {
        self.0.extend(other.0);
    }

    /// The first reason recorded.
    #[must_use]
    pub fn first(&self) -> &Reason {
        &self.0[0]
    }

    /// Number of reasons (always at least one).
    #[must_use]
    pub fn count(&self) -> usize {
        self.0.len()
    }

    /// Iterate over the reasons.
    pub fn iter(&self) -> std::slice::Iter<'_, Reason> {
        self.0.iter()
    }

    /// Borrow as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[Reason] {
        &self.0
    }

    /// Whether any reason satisfies the predicate.
    pub fn any(&self, predicate: impl Fn(&Reason) -> bool) -> bool {
        self.0.iter().any(predicate)
    }
}

impl From<Reason> for Reasons {
    fn from(reason: Reason) -> Self {
        Self::new(reason)
    }
}

impl IntoIterator for Reasons {
    type Item = Reason;
    type IntoIter = smallvec::IntoIter<[Reason; 1]>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Reasons {
    type Item = &'a Reason;
    type IntoIter = std::slice::Iter<'a, Reason>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for Reasons {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, reason) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{reason}")?;
        }
        Ok(())
    }
}

/// String-keyed metadata attached to an outcome.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata(BTreeMap<String, Value>);

impl Metadata {
    /// Empty metadata.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Insert or replace a value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Look up a value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Look up an unsigned integer value.
    #[must_use]
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.0.get(key).and_then(Value::as_u64)
    }

    /// Merge another set of entries; keys present in `other` win.
    pub fn extend(&mut self, other: Self) {
        self.0.extend(other.0);
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value))
    }
}

/// Success with a value, or failure with one or more reasons.
#[must_use]
#[derive(Debug, Clone)]
pub enum Outcome<T> {
    /// The operation succeeded.
    Success {
        /// Produced value
        value: T,
        /// Execution metadata
        metadata: Metadata,
    },
    /// The operation failed.
    Failure {
        /// Every reason the operation failed
        reasons: Reasons,
        /// Execution metadata
        metadata: Metadata,
    },
}

impl<T> Outcome<T> {
    /// A success carrying `value`.
    pub const fn success(value: T) -> Self {
        Self::Success {
            value,
            metadata: Metadata::new(),
        }
    }

    /// A failure with a single reason.
    pub fn failure(reason: Reason) -> Self {
        Self::Failure {
            reasons: Reasons::new(reason),
            metadata: Metadata::new(),
        }
    }

    /// A failure with several reasons.
    pub const fn from_reasons(reasons: Reasons) -> Self {
        Self::Failure {
            reasons,
            metadata: Metadata::new(),
        }
    }

    /// Whether this is a success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Whether this is a failure.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }

    /// Borrow the success value, if any.
    #[must_use]
    pub const fn value(&self) -> Option<&T> {
        match self {
            Self::Success { value, .. } => Some(value),
            Self::Failure { .. } => None,
        }
    }

    /// Take the success value, if any.
    #[must_use]
    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Success { value, .. } => Some(value),
            Self::Failure { .. } => None,
        }
    }

    /// Borrow the failure reasons, if any.
    #[must_use]
    pub const fn reasons(&self) -> Option<&Reasons> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { reasons, .. } => Some(reasons),
        }
    }

    /// Failure reasons as a slice; empty for a success.
    #[must_use]
    pub fn failure_reasons(&self) -> &[Reason] {
        match self {
            Self::Success { .. } => &[],
            Self::Failure { reasons, .. } => reasons.as_slice(),
        }
    }

    /// Metadata of either variant.
    #[must_use]
    pub const fn metadata(&self) -> &Metadata {
        match self {
            Self::Success { metadata, .. } | Self::Failure { metadata, .. } => metadata,
        }
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        match self {
            Self::Success { metadata, .. } | Self::Failure { metadata, .. } => metadata,
        }
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata_mut().insert(key, value);
        self
    }

    /// Attach several metadata entries.
    pub fn with_metadata_from(mut self, metadata: Metadata) -> Self {
        self.metadata_mut().extend(metadata);
        self
    }

    /// Attempts recorded by a retry policy.
    #[must_use]
    pub fn attempts(&self) -> Option<u32> {
        self.metadata()
            .get_u64(keys::ATTEMPTS)
            .and_then(|attempts| u32::try_from(attempts).ok())
    }

    /// Elapsed time recorded by a timeout policy.
    #[must_use]
    pub fn elapsed(&self) -> Option<Duration> {
        self.metadata()
            .get_u64(keys::ELAPSED_MS)
            .map(Duration::from_millis)
    }

    /// Total match over both variants.
    pub fn match_with<U>(
        self,
        on_success: impl FnOnce(T) -> U,
        on_failure: impl FnOnce(Reasons) -> U,
    ) -> U {
        match self {
            Self::Success { value, .. } => on_success(value),
            Self::Failure { reasons, .. } => on_failure(reasons),
        }
    }

    /// Transform the success value, keeping metadata.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Self::Success { value, metadata } => Outcome::Success {
                value: f(value),
                metadata,
            },
            Self::Failure { reasons, metadata } => Outcome::Failure { reasons, metadata },
        }
    }

    /// Chain another outcome-producing step; metadata of both steps is kept.
    pub fn and_then<U>(self, f: impl FnOnce(T) -> Outcome<U>) -> Outcome<U> {
        match self {
            Self::Success { value, metadata } => {
                let mut merged = metadata;
                let next = f(value);
                merged.extend(next.metadata().clone());
                match next {
                    Outcome::Success { value, .. } => Outcome::Success {
                        value,
                        metadata: merged,
                    },
                    Outcome::Failure { reasons, .. } => Outcome::Failure {
                        reasons,
                        metadata: merged,
                    },
                }
            },
            Self::Failure { reasons, metadata } => Outcome::Failure { reasons, metadata },
        }
    }

    /// Drop the success value.
    pub fn discard(self) -> Outcome<()> {
        self.map(|_| ())
    }

    /// Convert into a plain `Result`, dropping metadata.
    ///
    /// # Errors
    ///
    /// Returns the failure reasons when the outcome is a failure.
    pub fn into_result(self) -> Result<T, Reasons> {
        match self {
            Self::Success { value, .. } => Ok(value),
            Self::Failure { reasons, .. } => Err(reasons),
        }
    }
}

impl Outcome<()> {
    /// Aggregate many outcomes into one.
    ///
    /// The result is a success only when every member succeeded. Every reason of
    /// every failing member is kept, in iteration order. Metadata entries are
    /// merged, later members winning on key collisions.
    pub fn merge<U>(outcomes: impl IntoIterator<Item = Outcome<U>>) -> Self {
        let mut collected: Option<Reasons> = None;
        let mut metadata = Metadata::new();

        for outcome in outcomes {
            match outcome {
                Outcome::Success { metadata: m, .. } => metadata.extend(m),
                Outcome::Failure { reasons, metadata: m } => {
                    metadata.extend(m);
                    match collected.as_mut() {
                        Some(all) => all.append(reasons),
                        None => collected = Some(reasons),
                    }
                },
            }
        }

        match collected {
            Some(reasons) => Outcome::Failure { reasons, metadata },
            None => Outcome::Success {
                value: (),
                metadata,
            },
        }
    }
}

impl<T, E> From<Result<T, E>> for Outcome<T>
where
    E: Into<Reason>,
{
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Self::success(value),
            Err(error) => Self::failure(error.into()),
        }
    }
}

impl<T> From<Reason> for Outcome<T> {
    fn from(reason: Reason) -> Self {
        Self::failure(reason)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Error)]
    #[error("disk on fire")]
    struct DiskError;

    #[test]
    fn success_is_never_failure() {
        let outcome = Outcome::success(5);
        assert!(outcome.is_success());
        assert!(!outcome.is_failure());
        assert_eq!(outcome.value(), Some(&5));
        assert!(outcome.failure_reasons().is_empty());
    }

    #[test]
    fn failure_always_has_a_reason() {
        let outcome: Outcome<()> = Outcome::failure(Reason::Cancelled);
        assert!(outcome.is_failure());
        assert_eq!(outcome.reasons().unwrap().count(), 1);
        assert!(outcome.reasons().unwrap().first().is_cancelled());
        assert!(Reasons::collect(Vec::new()).is_none());
    }

    #[test]
    fn match_with_is_total() {
        let described = Outcome::<u8>::failure(Reason::rejected("nope"))
            .match_with(|value| format!("ok {value}"), |reasons| format!("err {reasons}"));
        assert_eq!(described, "err nope");

        let described =
            Outcome::success(3_u8).match_with(|value| format!("ok {value}"), |r| r.to_string());
        assert_eq!(described, "ok 3");
    }

    #[test]
    fn error_reason_keeps_root_cause() {
        let reason = Reason::error(DiskError);
        assert_eq!(reason.to_string(), "disk on fire");
        let source = std::error::Error::source(&reason).unwrap();
        assert_eq!(source.to_string(), "disk on fire");
    }

    #[test]
    fn metadata_survives_map_and_and_then() {
        let outcome = Outcome::success(2)
            .with_metadata(keys::ATTEMPTS, 3)
            .map(|value| value * 2)
            .and_then(|value| Outcome::success(value + 1).with_metadata(keys::ELAPSED_MS, 40));

        assert_eq!(outcome.value(), Some(&5));
        assert_eq!(outcome.attempts(), Some(3));
        assert_eq!(outcome.elapsed(), Some(Duration::from_millis(40)));
    }

    #[test]
    fn merge_of_nothing_is_success() {
        let merged = Outcome::<()>::merge(Vec::<Outcome<()>>::new());
        assert!(merged.is_success());
    }

    #[test]
    fn merge_keeps_every_reason() {
        let merged = Outcome::merge([
            Outcome::success(()),
            Outcome::from_reasons(
                Reasons::collect([Reason::rejected("a"), Reason::rejected("b")]).unwrap(),
            ),
            Outcome::success(()),
            Outcome::failure(Reason::rejected("c")),
        ]);

        let messages: Vec<String> = merged
            .failure_reasons()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(messages, vec!["a", "b", "c"]);
    }

    #[test]
    fn result_conversion() {
        let outcome: Outcome<u8> = Err::<u8, _>(Reason::rejected("bad")).into();
        assert_eq!(outcome.into_result().unwrap_err().to_string(), "bad");

        let outcome: Outcome<u8> = Ok::<_, Reason>(1).into();
        assert_eq!(outcome.into_result().unwrap(), 1);
    }

    #[test]
    fn caught_panic_reads_string_payloads() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(CaughtPanic::from_payload(payload.as_ref()).message(), "boom");

        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(CaughtPanic::from_payload(payload.as_ref()).message(), "bang");

        let payload: Box<dyn Any + Send> = Box::new(17_u8);
        assert_eq!(
            CaughtPanic::from_payload(payload.as_ref()).message(),
            "non-string panic payload"
        );
    }

    proptest! {
        #[test]
        fn merge_preserves_failure_reasons(failures in proptest::collection::vec(any::<bool>(), 0..32)) {
            let outcomes: Vec<Outcome<()>> = failures
                .iter()
                .enumerate()
                .map(|(index, failed)| {
                    if *failed {
                        Outcome::failure(Reason::rejected(format!("handler-{index}")))
                    } else {
                        Outcome::success(())
                    }
                })
                .collect();

            let expected: Vec<String> = failures
                .iter()
                .enumerate()
                .filter(|(_, failed)| **failed)
                .map(|(index, _)| format!("handler-{index}"))
                .collect();

            let merged = Outcome::<()>::merge(outcomes);
            let actual: Vec<String> = merged.failure_reasons().iter().map(ToString::to_string).collect();

            prop_assert_eq!(merged.is_success(), expected.is_empty());
            prop_assert_eq!(actual, expected);
        }
    }
}
