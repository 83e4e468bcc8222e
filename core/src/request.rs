//! Request trait.
//!
//! A request is a message expecting exactly one handler and one response. The
//! response type is declared on the request type so dispatch is fully typed:
//! `sender.send(CreateOrder { .. }, &ctx)` yields `Outcome<OrderId>`.

/// A message with exactly one handler and a typed response.
///
/// # Example
///
/// ```
/// use courier_core::request::Request;
///
/// struct CreateOrder {
///     customer: String,
///     amount: u64,
/// }
///
/// impl Request for CreateOrder {
///     type Response = u64;
/// }
/// ```
pub trait Request: Send + 'static {
    /// The value a successful handler produces.
    type Response: Send + 'static;
}

/// Human readable name of a request type, used in diagnostics.
#[must_use]
pub fn request_name<R: Request>() -> &'static str {
    std::any::type_name::<R>()
}
