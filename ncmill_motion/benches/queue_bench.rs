//! Command queue throughput benchmarks.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use ncmill_common::types::SeqNo;
use ncmill_interp::emit::CanonOp;
use ncmill_interp::{CanonicalCommand, ModalState};
use ncmill_motion::channel;

fn cmd(seq: u64) -> CanonicalCommand {
    CanonicalCommand {
        seq: SeqNo(seq),
        line: seq as u32,
        modal: ModalState::new().snapshot(),
        op: CanonOp::Dwell { seconds: 0.0 },
    }
}

/// Full entry lifecycle on one thread: enqueue, dispatch, complete.
fn bench_single_thread_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_cycle");
    for depth in [8usize, 32, 128] {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            let (mut tx, mut rx) = channel(depth);
            let mut seq = 0u64;
            b.iter(|| {
                seq += 1;
                tx.try_enqueue(cmd(seq)).unwrap();
                let c = rx.dispatch_next().unwrap().unwrap();
                rx.complete(c.seq).unwrap();
            });
        });
    }
    group.finish();
}

/// Producer and consumer on separate threads, 10k commands per run.
fn bench_cross_thread(c: &mut Criterion) {
    const TOTAL: u64 = 10_000;
    let mut group = c.benchmark_group("queue_cross_thread");
    group.throughput(Throughput::Elements(TOTAL));
    for depth in [32usize, 128] {
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            b.iter(|| {
                let (mut tx, mut rx) = channel(depth);
                let consumer = std::thread::spawn(move || {
                    let mut done = 0u64;
                    while done < TOTAL {
                        if let Some(c) = rx.dispatch_next().unwrap() {
                            rx.complete(c.seq).unwrap();
                            done += 1;
                        } else {
                            std::hint::spin_loop();
                        }
                    }
                });
                for i in 1..=TOTAL {
                    tx.enqueue_blocking(cmd(i), std::time::Duration::from_secs(30))
                        .unwrap();
                }
                consumer.join().unwrap();
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_single_thread_cycle, bench_cross_thread);
criterion_main!(benches);
