//! Performance benchmarks for a3s-session
//!
//! Run with: cargo bench

use a3s_session::reducer::reconstruct;
use a3s_session::{
    EventKind, EventRouter, MemorySessionApi, Message, SessionApi, StreamEvent,
    SubscriptionRegistry, TurnState,
};
use criterion::{criterion_group, criterion_main, Criterion};
use serde_json::json;
use std::sync::Arc;

fn ev(kind: EventKind, content: serde_json::Value) -> StreamEvent {
    StreamEvent::new(kind, "bench", content)
}

/// A turn with reasoning, `tools` tool calls and a streamed answer
fn turn(tools: usize, deltas: usize) -> Vec<StreamEvent> {
    let mut events = vec![
        ev(EventKind::Start, json!(null)),
        ev(EventKind::ThinkingStart, json!(null)),
    ];
    events.extend((0..deltas).map(|_| ev(EventKind::ThinkingDelta, json!("hmm "))));
    events.push(ev(EventKind::ThinkingEnd, json!(null)));
    for i in 0..tools {
        let id = format!("call-{}", i);
        events.push(ev(
            EventKind::ToolUse,
            json!({"id": id, "name": "Read", "input": {"path": format!("src/{}.rs", i)}}),
        ));
        events.push(ev(
            EventKind::ToolResult,
            json!({"tool_use_id": id, "content": "fn main() {}"}),
        ));
    }
    events.push(ev(EventKind::TextStart, json!(null)));
    events.extend((0..deltas).map(|_| ev(EventKind::TextDelta, json!("token "))));
    events.push(ev(EventKind::TextEnd, json!(null)));
    events.push(ev(EventKind::Done, json!(null)));
    events
}

fn bench_reduce(c: &mut Criterion) {
    let small = turn(2, 50);
    c.bench_function("reconstruct (2 tools, 50 deltas)", |b| {
        b.iter(|| reconstruct("msg", &small));
    });

    let mut group = c.benchmark_group("reconstruct_tools");
    for tools in [10, 100, 500] {
        let events = turn(tools, 20);
        group.bench_function(format!("{} tools", tools), |b| {
            b.iter(|| {
                let mut message = Message::assistant_shell("msg");
                let mut state = TurnState::new("msg");
                for event in &events {
                    state.apply(&mut message, event);
                }
                message
            });
        });
    }
    group.finish();
}

fn bench_route(c: &mut Criterion) {
    let registry = Arc::new(SubscriptionRegistry::new());
    for i in 0..100 {
        registry.insert(&format!("s-{}", i), Arc::new(|_: &StreamEvent| {}));
    }
    let router = EventRouter::new(registry);
    let frame = serde_json::to_string(&StreamEvent::new(
        EventKind::TextDelta,
        "s-42",
        json!("token"),
    ))
    .unwrap();

    c.bench_function("route_frame (100 sessions)", |b| {
        b.iter(|| router.route_frame(&frame).unwrap());
    });
}

fn bench_recovery(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let api = MemorySessionApi::new();
    rt.block_on(api.set_events("bench", turn(20, 100)));

    c.bench_function("fetch + reconstruct cached turn", |b| {
        b.to_async(&rt).iter(|| async {
            let events = api.get_events("bench").await.unwrap();
            reconstruct("msg", &events)
        });
    });
}

criterion_group!(benches, bench_reduce, bench_route, bench_recovery);
criterion_main!(benches);
