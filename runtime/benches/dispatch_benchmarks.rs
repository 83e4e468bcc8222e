//! Dispatch Benchmarks
//!
//! Measures the overhead the dispatch core adds around handlers:
//! - Request send through the resolver and pipeline
//! - Event fan-out, sequential versus concurrent
//! - Outbox staging and relay draining against in-memory collaborators
//!
//! Run with: `cargo bench`

#![allow(missing_docs)] // Benchmarks don't need extensive docs
#![allow(clippy::expect_used)] // Benchmarks can use expect for setup

use courier_core::CancellationToken;
use courier_core::context::Context;
use courier_core::event::Event;
use courier_core::handler::{FnEventHandler, FnRequestHandler, RequestHandler};
use courier_core::outcome::Outcome;
use courier_core::pipeline::PipelineBuilder;
use courier_core::request::Request;
use courier_core::resolver::HandlerRegistry;
use courier_runtime::{
    Outbox, OrchestrationStrategy, OutboxRelay, Publisher, RelayConfig, Sender, TracingBehavior,
};
use courier_testing::{InMemoryOutboxStore, RecordingTransport};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const BATCH: u64 = 100;

#[derive(Clone, Debug)]
struct Add(u64, u64);

impl Request for Add {
    type Response = u64;
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Tick(u64);

impl Event for Tick {
    fn event_type(&self) -> &'static str {
        "Tick.v1"
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build runtime")
}

fn add_handler() -> impl RequestHandler<Add> {
    FnRequestHandler::new(|Add(a, b): Add, _ctx: Context| {
        std::future::ready(Outcome::success(a + b))
    })
}

/// Benchmark request dispatch
fn benchmark_send(c: &mut Criterion) {
    let mut group = c.benchmark_group("send");
    group.throughput(Throughput::Elements(1));
    let runtime = runtime();

    group.bench_function("direct_handler", |b| {
        let sender = Sender::new(
            HandlerRegistry::builder()
                .request::<Add>(add_handler())
                .build()
                .expect("registry"),
        );
        let ctx = Context::root();

        b.to_async(&runtime).iter(|| async {
            let _ = sender.send(black_box(Add(1, 2)), &ctx).await;
        });
    });

    group.bench_function("traced_pipeline", |b| {
        let pipeline = PipelineBuilder::<Add>::new()
            .behavior(TracingBehavior::new())
            .handler(add_handler());
        let sender = Sender::new(
            HandlerRegistry::builder()
                .request::<Add>(pipeline)
                .build()
                .expect("registry"),
        );
        let ctx = Context::root();

        b.to_async(&runtime).iter(|| async {
            let _ = sender.send(black_box(Add(1, 2)), &ctx).await;
        });
    });

    group.finish();
}

/// Benchmark event fan-out by strategy and handler count
fn benchmark_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");
    let runtime = runtime();

    for handlers in [1_usize, 4, 16] {
        let mut builder = HandlerRegistry::builder();
        for _ in 0..handlers {
            builder = builder.event::<Tick>(FnEventHandler::new(
                "noop",
                |_tick: Tick, _ctx: Context| std::future::ready(Outcome::success(())),
            ));
        }
        let registry = builder.build().expect("registry");

        for strategy in [OrchestrationStrategy::Sequential, OrchestrationStrategy::Concurrent] {
            let publisher = Publisher::new(registry.clone()).with_orchestration(strategy.into());
            let ctx = Context::root();
            group.bench_with_input(
                BenchmarkId::new(format!("{strategy:?}"), handlers),
                &handlers,
                |b, _| {
                    b.to_async(&runtime).iter(|| async {
                        let _ = publisher.publish_local(Arc::new(black_box(Tick(1))), &ctx).await;
                    });
                },
            );
        }
    }

    group.finish();
}

/// Benchmark outbox staging and relay draining
fn benchmark_outbox(c: &mut Criterion) {
    let mut group = c.benchmark_group("outbox");
    let runtime = runtime();

    group.throughput(Throughput::Elements(1));
    group.bench_function("add", |b| {
        let outbox = Outbox::new(Arc::new(InMemoryOutboxStore::new()));
        let ctx = Context::root();

        b.to_async(&runtime).iter(|| async {
            let _ = outbox.add(black_box(&Tick(1)), &ctx).await;
        });
    });

    group.throughput(Throughput::Elements(BATCH));
    group.bench_function("relay_batch_100", |b| {
        b.to_async(&runtime).iter(|| async {
            let store = Arc::new(InMemoryOutboxStore::new());
            let outbox = Outbox::new(Arc::clone(&store));
            let ctx = Context::root();
            for i in 0..BATCH {
                let _ = outbox.add(&Tick(i), &ctx).await;
            }
            let relay = OutboxRelay::new(store, RecordingTransport::new(), RelayConfig::default());
            relay
                .process_batch(&CancellationToken::new())
                .await
                .expect("batch");
        });
    });

    group.finish();
}

criterion_group!(benches, benchmark_send, benchmark_fan_out, benchmark_outbox);
criterion_main!(benches);
