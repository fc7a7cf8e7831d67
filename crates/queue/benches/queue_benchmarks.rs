use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::Utc;
use serde_json::json;
use skein_queue::{Job, JobQueue, Payload};
use skein_store::InMemoryStore;
use std::sync::Arc;

fn email_payload() -> Payload {
    let mut payload = Payload::new();
    payload.insert("to".to_string(), json!("user@example.com"));
    payload.insert("subject".to_string(), json!("Welcome"));
    payload.insert("attempt".to_string(), json!(1));
    payload
}

fn setup() -> JobQueue<Arc<InMemoryStore>> {
    JobQueue::new(InMemoryStore::arc())
}

fn bench_push_pop_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("push_pop_latency");

    group.bench_function("push_then_pop", |b| {
        let queue = setup();
        let payload = email_payload();
        b.iter(|| {
            let mut job = Job::new("email", payload.clone());
            queue.push("jobs", &mut job).unwrap();
            black_box(queue.pop_non_blocking("jobs").unwrap());
        });
    });

    group.finish();
}

fn bench_push_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("push_throughput");

    for batch_size in [1, 10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            batch_size,
            |b, &size| {
                let payload = email_payload();
                b.iter(|| {
                    let queue = setup();
                    for _ in 0..size {
                        let mut job = Job::new("email", payload.clone());
                        queue.push("jobs", &mut job).unwrap();
                    }
                    black_box(queue.size("jobs").unwrap());
                });
            },
        );
    }

    group.finish();
}

fn bench_promotion(c: &mut Criterion) {
    let mut group = c.benchmark_group("delayed_promotion");

    for ready in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*ready as u64));
        group.bench_with_input(BenchmarkId::from_parameter(ready), ready, |b, &count| {
            let payload = email_payload();
            let past = Utc::now() - chrono::Duration::seconds(1);
            b.iter(|| {
                let queue = setup();
                for _ in 0..count {
                    let mut job = Job::new("email", payload.clone());
                    queue.push_delayed_at("jobs", &mut job, past).unwrap();
                }
                black_box(queue.promote("jobs").unwrap());
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_push_pop_latency,
    bench_push_throughput,
    bench_promotion
);
criterion_main!(benches);
