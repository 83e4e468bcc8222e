//! # Courier Runtime
//!
//! Runtime implementation of the Courier dispatch core.
//!
//! This crate turns the contracts of `courier-core` into working components:
//! request dispatch, event fan-out, reliable publishing through an outbox and
//! the resilience policies that guard all of them.
//!
//! ## Core Components
//!
//! - **Sender**: resolves the single handler of a request and invokes it
//! - **Publisher**: fans events out to local handlers or stages them in the outbox
//! - **Orchestrators**: sequential and concurrent fan-out with lossless aggregation
//! - **Outbox / Relay**: durable staging and at-least-once delivery through a transport
//! - **Inbound Router**: decodes transport messages and publishes them locally
//! - **Policies**: retry and timeout decorators over any outcome-producing operation
//!
//! ## Example
//!
//! ```ignore
//! use courier_runtime::{Outbox, OutboxRelay, Publisher, PublishMode, RelayConfig, Sender};
//!
//! let registry = HandlerRegistry::builder()
//!     .request::<CreateOrder>(create_order_pipeline)
//!     .event::<InventoryChecked>(reserve_stock)
//!     .build()?;
//!
//! let relay = Arc::new(OutboxRelay::new(store.clone(), transport, RelayConfig::default()));
//! let outbox = Outbox::new(store).with_waker(relay.waker());
//!
//! let sender = Sender::new(registry.clone());
//! let publisher = Publisher::new(registry).with_outbox(outbox);
//! let relay_task = relay.spawn(shutdown.clone());
//!
//! let order_id = sender.send(CreateOrder::new("Ada", 100), &ctx).await;
//! publisher.publish(OrderCreated::new(order_id), &ctx, PublishMode::Outbox).await;
//! ```

/// Built-in pipeline behaviors
pub mod behavior;

/// Runtime configuration loaded from TOML and the environment
pub mod config;

/// Inbound consumption: decode transport messages and publish them locally
pub mod inbound;

/// Prometheus metrics for observability
pub mod metrics;

/// Event fan-out strategies
pub mod orchestrator;

/// Outbox staging
pub mod outbox;

/// Policy trait and composition
pub mod policy;

/// Event publishing
pub mod publisher;

/// Background outbox relay
pub mod relay;

/// Retry logic with exponential backoff
pub mod retry;

/// Request dispatch
pub mod sender;

/// Timeout policy
pub mod timeout;

pub use behavior::{PolicyBehavior, TracingBehavior};
pub use config::{ConfigError, CourierConfig};
pub use inbound::{InboundReport, InboundRouter, Routed};
pub use metrics::{MetricsError, MetricsRecorder};
pub use orchestrator::{
    ConcurrentOrchestrator, EventOrchestrator, Orchestration, OrchestrationStrategy,
    SequentialOrchestrator,
};
pub use outbox::Outbox;
pub use policy::{Policy, PolicyExt, Wrapped};
pub use publisher::{PublishMode, Publisher};
pub use relay::{BatchReport, OutboxRelay, RelayConfig, RelayError, RelayStats};
pub use retry::{RetryPolicy, RetryPolicyBuilder};
pub use sender::Sender;
pub use timeout::TimeoutPolicy;
