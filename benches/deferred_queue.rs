use criterion::{criterion_group, criterion_main, Criterion};
use jsrt_host::deferred::{DeferredQueue, ManualClock, QueuePoll};
use jsrt_host::{Clock, HostBuilder, SharedBuffer, SourceUnit};

fn criterion_benchmark(c: &mut Criterion) {
    let clock = ManualClock::new();

    c.bench_function("register_1000", |b| {
        b.iter(|| {
            let mut queue = DeferredQueue::new();
            for i in 0..1000u32 {
                queue.register(clock.now(), f64::from(i % 17), i);
            }
            queue
        })
    });

    c.bench_function("drain_1000", |b| {
        b.iter(|| {
            let mut queue = DeferredQueue::new();
            for i in 0..1000u32 {
                queue.register(clock.now(), f64::from(i % 17), i);
            }

            let mut fired = 0;
            queue.begin_drain();
            loop {
                match queue.poll(clock.now()) {
                    QueuePoll::Fire(_) => fired += 1,
                    QueuePoll::Sleep(due) => clock.sleep_until(due),
                    QueuePoll::Exhausted => break,
                }
            }
            queue.finish_drain();
            fired
        })
    });

    // Same shape of work, through the engine
    let mut host = HostBuilder::new()
        .with_clock(clock.clone())
        .with_output(SharedBuffer::default())
        .build()
        .expect("Could not create host");
    let unit = SourceUnit::new(
        "timers.js",
        "for (let i = 0; i < 100; i++) setTimeout(() => {}, i % 17);",
    );

    c.bench_function("execute_100_timers", |b| {
        b.iter(|| host.execute(&unit).expect("Could not run script"))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
