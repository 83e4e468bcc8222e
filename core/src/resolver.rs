//! Handler resolution.
//!
//! The dispatcher looks handlers up through a [`DependencyResolver`]. Lookup
//! never fails for absence: a missing request handler is `None`, a missing
//! event handler list is empty.
//!
//! [`HandlerRegistry`] is the default, static resolver. It is built once at
//! startup by [`HandlerRegistryBuilder`] and is read-only afterwards, so it is
//! shared through an `Arc` without locking.
//!
//! # Example
//!
//! ```ignore
//! let registry = HandlerRegistry::builder()
//!     .request::<CreateOrder>(CreateOrderHandler::new(repo))
//!     .event::<OrderCreated>(SendConfirmationEmail)
//!     .event::<OrderCreated>(ReserveStock)
//!     .build()?;
//! ```

use crate::event::Event;
use crate::handler::{EventHandler, RequestHandler};
use crate::request::Request;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use thiserror::Error;

/// Capability lookup used by the dispatcher.
pub trait DependencyResolver: Send + Sync {
    /// The single handler registered for `R`, if any.
    fn try_resolve<R: Request>(&self) -> Option<Arc<dyn RequestHandler<R>>>;

    /// Every handler registered for `E`, in registration order.
    fn resolve_all<E: Event>(&self) -> Vec<Arc<dyn EventHandler<E>>>;
}

impl<T: DependencyResolver> DependencyResolver for Arc<T> {
    fn try_resolve<R: Request>(&self) -> Option<Arc<dyn RequestHandler<R>>> {
        (**self).try_resolve::<R>()
    }

    fn resolve_all<E: Event>(&self) -> Vec<Arc<dyn EventHandler<E>>> {
        (**self).resolve_all::<E>()
    }
}

/// Startup misconfiguration detected while building a registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    /// A second handler was registered for a request type.
    #[error("Duplicate request handler registered for {0}")]
    DuplicateRequestHandler(&'static str),
}

/// Immutable map from message type to handler(s).
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    requests: Arc<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
    events: Arc<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
}

impl HandlerRegistry {
    /// Start building a registry.
    #[must_use]
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    /// Number of request types with a handler.
    #[must_use]
    pub fn request_types(&self) -> usize {
        self.requests.len()
    }

    /// Number of event types with at least one handler.
    #[must_use]
    pub fn event_types(&self) -> usize {
        self.events.len()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("request_types", &self.requests.len())
            .field("event_types", &self.events.len())
            .finish()
    }
}

impl DependencyResolver for HandlerRegistry {
    fn try_resolve<R: Request>(&self) -> Option<Arc<dyn RequestHandler<R>>> {
        self.requests
            .get(&TypeId::of::<R>())
            .and_then(|entry| entry.downcast_ref::<Arc<dyn RequestHandler<R>>>())
            .map(Arc::clone)
    }

    fn resolve_all<E: Event>(&self) -> Vec<Arc<dyn EventHandler<E>>> {
        self.events
            .get(&TypeId::of::<E>())
            .and_then(|entry| entry.downcast_ref::<Vec<Arc<dyn EventHandler<E>>>>())
            .cloned()
            .unwrap_or_default()
    }
}

/// Builder for [`HandlerRegistry`].
#[derive(Default)]
pub struct HandlerRegistryBuilder {
    requests: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    events: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    duplicate: Option<&'static str>,
}

impl HandlerRegistryBuilder {
    /// Register the handler for request type `R`.
    ///
    /// Registering a second handler for the same type is reported by
    /// [`build`](Self::build).
    #[must_use]
    pub fn request<R: Request>(mut self, handler: impl RequestHandler<R>) -> Self {
        let handler: Arc<dyn RequestHandler<R>> = Arc::new(handler);
        match self.requests.entry(TypeId::of::<R>()) {
            Entry::Occupied(_) => {
                tracing::error!(
                    message_type = std::any::type_name::<R>(),
                    "Duplicate request handler registration"
                );
                self.duplicate.get_or_insert(std::any::type_name::<R>());
            }
            Entry::Vacant(slot) => {
                slot.insert(Box::new(handler));
            }
        }
        self
    }

    /// Add a handler for event type `E`. Handlers run in the order they are
    /// added.
    #[must_use]
    pub fn event<E: Event>(mut self, handler: impl EventHandler<E>) -> Self {
        let handler: Arc<dyn EventHandler<E>> = Arc::new(handler);
        let entry = self
            .events
            .entry(TypeId::of::<E>())
            .or_insert_with(|| -> Box<dyn Any + Send + Sync> {
                Box::new(Vec::<Arc<dyn EventHandler<E>>>::new())
            });
        if let Some(handlers) = entry.downcast_mut::<Vec<Arc<dyn EventHandler<E>>>>() {
            handlers.push(handler);
        }
        self
    }

    /// Freeze the registrations.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::DuplicateRequestHandler`] if any request
    /// type received more than one handler.
    pub fn build(self) -> Result<HandlerRegistry, RegistrationError> {
        if let Some(message_type) = self.duplicate {
            return Err(RegistrationError::DuplicateRequestHandler(message_type));
        }
        Ok(HandlerRegistry {
            requests: Arc::new(self.requests),
            events: Arc::new(self.events),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::handler::{FnEventHandler, FnRequestHandler};
    use crate::outcome::Outcome;

    struct GetAnswer;

    impl Request for GetAnswer {
        type Response = u32;
    }

    struct Unregistered;

    impl Request for Unregistered {
        type Response = ();
    }

    #[derive(Clone)]
    struct Happened;

    impl Event for Happened {
        fn event_type(&self) -> &'static str {
            "Happened.v1"
        }
    }

    fn answer(value: u32) -> impl RequestHandler<GetAnswer> {
        FnRequestHandler::new(move |_request: GetAnswer, _ctx: Context| async move {
            Outcome::success(value)
        })
    }

    fn named(name: &'static str) -> impl EventHandler<Happened> {
        FnEventHandler::new(name, |_event: Happened, _ctx: Context| async {
            Outcome::success(())
        })
    }

    #[tokio::test]
    async fn resolves_registered_request_handler() {
        let registry = HandlerRegistry::builder()
            .request::<GetAnswer>(answer(42))
            .build()
            .unwrap();

        let handler = registry.try_resolve::<GetAnswer>().unwrap();
        let ctx = Context::root();
        assert_eq!(handler.handle(GetAnswer, &ctx).await.into_value(), Some(42));
        assert!(registry.try_resolve::<Unregistered>().is_none());
    }

    #[test]
    fn duplicate_request_handler_is_a_startup_error() {
        let result = HandlerRegistry::builder()
            .request::<GetAnswer>(answer(1))
            .request::<GetAnswer>(answer(2))
            .build();

        assert!(matches!(
            result,
            Err(RegistrationError::DuplicateRequestHandler(name)) if name.ends_with("GetAnswer")
        ));
    }

    #[test]
    fn event_handlers_keep_registration_order() {
        let registry = HandlerRegistry::builder()
            .event::<Happened>(named("a"))
            .event::<Happened>(named("b"))
            .event::<Happened>(named("c"))
            .build()
            .unwrap();

        let names: Vec<_> = registry
            .resolve_all::<Happened>()
            .iter()
            .map(|handler| handler.name())
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(registry.event_types(), 1);
    }

    #[test]
    fn no_event_handlers_is_empty_not_error() {
        let registry = HandlerRegistry::builder().build().unwrap();
        assert!(registry.resolve_all::<Happened>().is_empty());
    }
}
