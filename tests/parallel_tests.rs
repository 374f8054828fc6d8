//! Tests for the fan-out/fan-in runner under load.
//!
//! These use random per-element delays so that completion order differs
//! from source order, then check what the sink observed.

use pipefold::element::{Sink, Source, Transform};
use pipefold::error::{Error, Result, Stage, StageResult};
use pipefold::operators::{filter_map, map, try_map};
use pipefold::pipeline::pipeline;
use pipefold::runner::{CancelToken, ParallelConfig, ParallelRunner, run, run_parallel};
use pipefold::sinks::collect;
use pipefold::sources::{from_fn, range, try_from_iter};
use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

fn jitter(max_micros: u64) {
    let micros = rand::thread_rng().gen_range(0..=max_micros);
    std::thread::sleep(Duration::from_micros(micros));
}

/// A source that records the highest number of elements pulled but not yet
/// seen by the sink.
struct TrackedSource {
    next: u64,
    end: u64,
    delivered: Arc<AtomicU64>,
    max_outstanding: Arc<AtomicU64>,
}

impl Source for TrackedSource {
    type Output = u64;

    fn produce(&mut self) -> StageResult<Option<u64>> {
        if self.next == self.end {
            return Ok(None);
        }
        let item = self.next;
        self.next += 1;
        let outstanding = self.next - self.delivered.load(Ordering::SeqCst);
        self.max_outstanding.fetch_max(outstanding, Ordering::SeqCst);
        Ok(Some(item))
    }
}

struct TrackedSink {
    items: Vec<u64>,
    delivered: Arc<AtomicU64>,
}

impl Sink for TrackedSink {
    type Input = u64;

    fn consume(&mut self, item: u64) {
        self.items.push(item);
        self.delivered.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_ordered_map_with_random_delays() {
    let mut source = range(0u64..400);
    let mut sink = collect();
    let transform = map(|x: u64| {
        jitter(300);
        x * x
    });
    run_parallel(&mut source, &mut sink, &transform, &ParallelConfig::new(8)).unwrap();

    assert_eq!(sink.into_inner(), (0..400u64).map(|x| x * x).collect::<Vec<_>>());
}

#[test]
fn test_unordered_is_a_permutation() {
    let mut source = range(0u64..400);
    let mut sink = collect();
    let transform = map(|x: u64| {
        jitter(300);
        x
    });
    let stats = run_parallel(
        &mut source,
        &mut sink,
        &transform,
        &ParallelConfig::new(8).unordered(),
    )
    .unwrap();

    let items = sink.into_inner();
    assert_eq!(items.len(), 400);
    let unique: HashSet<_> = items.iter().copied().collect();
    assert_eq!(unique.len(), 400);
    assert_eq!(stats.emitted, 400);
}

#[test]
fn test_ordered_filter_map_with_random_delays() {
    let mut source = range(0u32..300);
    let mut sink = collect();
    let transform = filter_map(|x: u32| {
        jitter(200);
        (x % 7 == 0).then(|| x / 7)
    });
    let stats = run_parallel(&mut source, &mut sink, &transform, &ParallelConfig::new(6)).unwrap();

    assert_eq!(sink.into_inner(), (0..43).collect::<Vec<_>>());
    assert_eq!(stats.emitted + stats.filtered, 300);
}

#[test]
fn test_in_flight_window_bounds_outstanding() {
    let delivered = Arc::new(AtomicU64::new(0));
    let max_outstanding = Arc::new(AtomicU64::new(0));
    let mut source = TrackedSource {
        next: 0,
        end: 500,
        delivered: delivered.clone(),
        max_outstanding: max_outstanding.clone(),
    };
    let mut sink = TrackedSink {
        items: Vec::new(),
        delivered,
    };
    let transform = map(|x: u64| {
        jitter(100);
        x
    });
    let config = ParallelConfig::new(4).with_max_in_flight(6);
    ParallelRunner::new(config)
        .run(&mut source, &mut sink, &transform)
        .unwrap();

    assert_eq!(sink.items, (0..500).collect::<Vec<_>>());
    assert!(max_outstanding.load(Ordering::SeqCst) <= 6);
}

#[test]
fn test_produce_called_n_plus_one_times() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let mut source = from_fn(move || -> StageResult<Option<usize>> {
        let call = counter.fetch_add(1, Ordering::SeqCst);
        Ok((call < 250).then_some(call))
    });
    let mut sink = collect();
    run_parallel(
        &mut source,
        &mut sink,
        &map(|x: usize| x),
        &ParallelConfig::new(5),
    )
    .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 251);
    assert_eq!(sink.items().len(), 250);
}

#[test]
fn test_failure_delivers_exact_prefix_under_jitter() {
    for _ in 0..5 {
        let mut source = range(0u32..200);
        let mut sink = collect();
        let transform = try_map(|x: u32| {
            jitter(200);
            if x == 73 {
                Err(format!("element {x} is corrupt").into())
            } else {
                Ok(x)
            }
        });
        let err = run_parallel(&mut source, &mut sink, &transform, &ParallelConfig::new(8))
            .unwrap_err();

        assert_eq!(err.stage(), Some(Stage::Map));
        assert_eq!(err.inner().unwrap().to_string(), "element 73 is corrupt");
        assert_eq!(sink.into_inner(), (0..73).collect::<Vec<_>>());
    }
}

#[test]
fn test_nothing_pulled_after_failure_is_recognized() {
    let pulled = Arc::new(AtomicU64::new(0));
    let counter = pulled.clone();
    let mut source = from_fn(move || -> StageResult<Option<u64>> {
        Ok(Some(counter.fetch_add(1, Ordering::SeqCst)))
    });
    let mut sink = collect();
    let transform = try_map(|x: u64| if x == 10 { Err("stop".into()) } else { Ok(x) });
    let config = ParallelConfig::new(2).with_max_in_flight(4);
    run_parallel(&mut source, &mut sink, &transform, &config).unwrap_err();

    // The window caps how far past the failure the source can run.
    assert!(pulled.load(Ordering::SeqCst) <= 10 + 4);
}

#[test]
fn test_unordered_failure_keeps_only_earlier_deliveries() {
    let mut source = range(0u32..40);
    let mut sink = collect();
    let transform = try_map(|x: u32| {
        if x == 20 {
            std::thread::sleep(Duration::from_millis(20));
            Err("element 20 failed".into())
        } else {
            if x > 20 {
                std::thread::sleep(Duration::from_millis(200));
            }
            Ok(x)
        }
    });
    let config = ParallelConfig::new(4).unordered();
    let err = run_parallel(&mut source, &mut sink, &transform, &config).unwrap_err();

    assert_eq!(err.stage(), Some(Stage::Map));
    assert_eq!(err.inner().unwrap().to_string(), "element 20 failed");
    let mut items = sink.into_inner();
    items.sort_unstable();
    assert_eq!(items, (0..20).collect::<Vec<_>>());
}

#[test]
fn test_earlier_map_failure_beats_later_source_failure() {
    let mut source = try_from_iter(vec![Ok(0u32), Ok(1), Ok(2), Ok(3), Ok(4), Err("source broke")]);
    let mut sink = collect();
    let transform = try_map(|x: u32| {
        if x == 2 {
            std::thread::sleep(Duration::from_millis(30));
            Err("element 2 failed".into())
        } else {
            Ok(x)
        }
    });
    let err = run_parallel(&mut source, &mut sink, &transform, &ParallelConfig::new(4))
        .unwrap_err();

    assert_eq!(err.stage(), Some(Stage::Map));
    assert_eq!(err.inner().unwrap().to_string(), "element 2 failed");
    assert_eq!(sink.into_inner(), vec![0, 1]);
}

/// A transform that misreports its own failure as a cancellation.
struct CancelsAt(u32);

impl Transform for CancelsAt {
    type Input = u32;
    type Output = u32;

    fn apply(&self, input: u32) -> Result<Option<u32>> {
        if input == self.0 {
            Err(Error::Cancelled)
        } else {
            Ok(Some(input))
        }
    }
}

#[test]
fn test_transform_cannot_report_cancellation() {
    let mut sink = collect();
    let err = run(&mut range(0u32..10), &mut sink, &CancelsAt(5)).unwrap_err();
    assert_eq!(err.stage(), Some(Stage::Map));
    assert_eq!(sink.into_inner(), vec![0, 1, 2, 3, 4]);

    let mut sink = collect();
    let err = run_parallel(&mut range(0u32..10), &mut sink, &CancelsAt(5), &ParallelConfig::new(3))
        .unwrap_err();
    assert!(!err.is_cancelled());
    assert_eq!(err.stage(), Some(Stage::Map));
    let inner = err.into_inner().unwrap();
    assert!(inner.downcast_ref::<Error>().unwrap().is_cancelled());
    assert_eq!(sink.into_inner(), vec![0, 1, 2, 3, 4]);
}

#[test]
fn test_unbounded_timeout_runs_to_completion() {
    let mut source = range(0u64..50);
    let mut sink = collect();
    let config = ParallelConfig::new(4).with_timeout(Duration::MAX);
    run_parallel(&mut source, &mut sink, &map(|x: u64| x + 1), &config).unwrap();

    assert_eq!(sink.into_inner(), (1..51).collect::<Vec<_>>());
}

#[test]
fn test_external_cancel_from_other_thread() {
    let token = CancelToken::new();
    let remote = token.clone();
    let canceller = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(30));
        remote.cancel();
    });

    let err = pipeline(range(0u64..u64::MAX))
        .then(map(|x: u64| {
            std::thread::sleep(Duration::from_micros(200));
            x
        }))
        .sink(collect())
        .run_parallel(&ParallelConfig::new(4).with_cancel(token))
        .unwrap_err();
    canceller.join().unwrap();

    assert!(err.is_cancelled());
}

#[test]
fn test_many_workers_few_elements() {
    let mut source = range(0u8..3);
    let mut sink = collect();
    run_parallel(
        &mut source,
        &mut sink,
        &map(|x: u8| x + 1),
        &ParallelConfig::new(32),
    )
    .unwrap();

    assert_eq!(sink.into_inner(), vec![1, 2, 3]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_parallel_async() {
    let sink = pipeline(range(0u32..100))
        .then(map(|x: u32| {
            jitter(50);
            x * 3
        }))
        .sink(collect())
        .run_parallel_async(ParallelConfig::new(4))
        .await
        .unwrap();

    assert_eq!(sink.into_inner(), (0..100).map(|x| x * 3).collect::<Vec<_>>());
}
