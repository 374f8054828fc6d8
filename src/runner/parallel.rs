//! Fan-out/fan-in runner.
//!
//! Workers take turns pulling from the source through a single
//! [`Dispatcher`], apply the transform without holding any lock, and send
//! `(sequence, outcome)` pairs to the coordinator on the calling thread. The
//! coordinator is the only code that touches the sink.
//!
//! The dispatcher refuses to pull once `max_in_flight` elements are pulled
//! but not yet released, which bounds the sequencing buffer in ordered mode.
//!
//! Failures: the first failure halts the dispatcher. Among failures that
//! reach the coordinator before the drain completes, the one with the lowest
//! sequence index is reported. A source failure carries the sequence index
//! its pull would have had. In ordered mode the sink still receives every
//! result before the reported failure, in order, and nothing after it.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use crate::element::{Sink, Source, Transform};
use crate::error::{BoxError, Error, Result};
use crate::observability::{RunMetrics, trace_element};

use super::config::ParallelConfig;
use super::{RunStats, StopCondition, finish};

/// Runs a pipeline on a fixed pool of scoped worker threads.
#[derive(Debug, Clone, Default)]
pub struct ParallelRunner {
    config: ParallelConfig,
}

impl ParallelRunner {
    /// Create a runner with the given configuration.
    pub fn new(config: ParallelConfig) -> Self {
        Self { config }
    }

    /// Get the configuration.
    pub fn config(&self) -> &ParallelConfig {
        &self.config
    }

    /// Run `source` through `transform` into `sink`.
    ///
    /// The configuration is validated before the source is touched.
    pub fn run<S, T, K>(&self, source: &mut S, sink: &mut K, transform: &T) -> Result<RunStats>
    where
        S: Source + ?Sized,
        T: Transform<Input = S::Output> + ?Sized,
        K: Sink<Input = T::Output> + ?Sized,
    {
        self.config.validate()?;

        let config = &self.config;
        let _span = config.tracing.enter_run(&config.name, "parallel");
        tracing::debug!(
            workers = config.workers,
            preserve_order = config.preserve_order,
            window = config.window(),
            source = source.name(),
            transform = transform.name(),
            sink = sink.name(),
            "starting parallel run"
        );

        let metrics = RunMetrics::new(&config.name);
        let stop = StopCondition::new(config.cancel.as_ref(), config.timeout);
        let dispatcher = Dispatcher::new(source, config.window());
        let mut collector = Collector::new(sink, config);

        let (panic, spawn_error) = std::thread::scope(|scope| {
            let (tx, rx) = kanal::bounded::<Completion<T::Output>>(config.channel_capacity);
            let dispatcher = &dispatcher;
            let stop = &stop;

            let mut handles = Vec::with_capacity(config.workers);
            let mut spawn_error = None;
            for index in 0..config.workers {
                let tx = tx.clone();
                let metrics = metrics.clone();
                let span = tracing::Span::current();
                let spawned = std::thread::Builder::new()
                    .name(format!("pipefold-worker-{index}"))
                    .spawn_scoped(scope, move || {
                        let _entered = span.entered();
                        work(dispatcher, transform, tx, stop, &metrics);
                    });
                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(e) => {
                        tracing::warn!(index, error = %e, "failed to spawn worker");
                        dispatcher.halt();
                        spawn_error = Some(e);
                        break;
                    }
                }
            }
            drop(tx);

            {
                let _halt = HaltOnPanic(dispatcher);
                while let Ok(completion) = rx.recv() {
                    collector.accept(completion, dispatcher, stop, &metrics);
                }
            }

            let mut panic = None;
            for handle in handles {
                if let Err(payload) = handle.join() {
                    panic.get_or_insert(panic_message(payload));
                }
            }
            (panic, spawn_error)
        });

        let (pulled, dispatch_cancelled) = dispatcher.summary();
        let mut stats = collector.stats;
        stats.pulled = pulled;

        let result = if let Some(message) = panic {
            Err(Error::WorkerPanicked(message))
        } else if let Some(e) = spawn_error {
            Err(Error::Io(e))
        } else if let Some((sequence, error)) = collector.failure {
            tracing::debug!(sequence, "reporting lowest-sequence failure");
            Err(error)
        } else if collector.cancelled || dispatch_cancelled {
            Err(Error::Cancelled)
        } else {
            Ok(stats)
        };
        finish(&config.name, &metrics, &stats, result)
    }
}

/// One transformed element, or the failure that replaced it.
struct Completion<O> {
    sequence: u64,
    outcome: Result<Option<O>>,
}

enum Pull<T> {
    Item(u64, T),
    Failed(u64, BoxError),
    Done,
}

struct DispatchState<'a, S: ?Sized> {
    source: &'a mut S,
    next_sequence: u64,
    released: u64,
    halted: bool,
    cancelled: bool,
}

/// Serialized access to the source plus the in-flight window.
struct Dispatcher<'a, S: ?Sized> {
    state: Mutex<DispatchState<'a, S>>,
    window_open: Condvar,
    window: u64,
}

impl<'a, S: ?Sized> Dispatcher<'a, S> {
    fn new(source: &'a mut S, window: usize) -> Self {
        Self {
            state: Mutex::new(DispatchState {
                source,
                next_sequence: 0,
                released: 0,
                halted: false,
                cancelled: false,
            }),
            window_open: Condvar::new(),
            window: window as u64,
        }
    }

    fn lock(&self) -> MutexGuard<'_, DispatchState<'a, S>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stop all further pulls and wake waiting workers.
    fn halt(&self) {
        self.lock().halted = true;
        self.window_open.notify_all();
    }

    /// Mark `count` elements as no longer in flight.
    fn release(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.lock().released += count;
        self.window_open.notify_all();
    }

    /// Elements pulled, and whether pulling stopped because of cancellation.
    fn summary(&self) -> (u64, bool) {
        let state = self.lock();
        (state.next_sequence, state.cancelled)
    }
}

impl<S: Source + ?Sized> Dispatcher<'_, S> {
    fn pull(&self, stop: &StopCondition) -> Pull<S::Output> {
        let mut state = self.lock();
        loop {
            if state.halted {
                return Pull::Done;
            }
            if stop.is_triggered() {
                state.halted = true;
                state.cancelled = true;
                self.window_open.notify_all();
                return Pull::Done;
            }
            if state.next_sequence - state.released < self.window {
                break;
            }
            state = self
                .window_open
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }

        let sequence = state.next_sequence;
        match state.source.produce() {
            Ok(Some(item)) => {
                state.next_sequence += 1;
                Pull::Item(sequence, item)
            }
            Ok(None) => {
                state.halted = true;
                self.window_open.notify_all();
                Pull::Done
            }
            Err(e) => {
                state.halted = true;
                self.window_open.notify_all();
                Pull::Failed(sequence, e)
            }
        }
    }
}

/// Halts the dispatcher if the owning thread unwinds, so that no worker
/// stays parked on the window.
struct HaltOnPanic<'d, 'a, S: ?Sized>(&'d Dispatcher<'a, S>);

impl<S: ?Sized> Drop for HaltOnPanic<'_, '_, S> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.halt();
        }
    }
}

fn work<S, T>(
    dispatcher: &Dispatcher<'_, S>,
    transform: &T,
    results: kanal::Sender<Completion<T::Output>>,
    stop: &StopCondition,
    metrics: &RunMetrics,
) where
    S: Source + ?Sized,
    T: Transform<Input = S::Output> + ?Sized,
{
    let _halt = HaltOnPanic(dispatcher);
    loop {
        match dispatcher.pull(stop) {
            Pull::Item(sequence, item) => {
                metrics.record_pulled();
                let outcome = {
                    let _timer = metrics.start_timer();
                    transform.apply(item).map_err(Error::in_transform)
                };
                if results.send(Completion { sequence, outcome }).is_err() {
                    return;
                }
            }
            Pull::Failed(sequence, e) => {
                let _ = results.send(Completion {
                    sequence,
                    outcome: Err(Error::Source(e)),
                });
                return;
            }
            Pull::Done => return,
        }
    }
}

/// Fan-in side: sequencing buffer, failure selection and sink delivery.
struct Collector<'k, 'c, K: ?Sized, O> {
    sink: &'k mut K,
    config: &'c ParallelConfig,
    pending: BTreeMap<u64, Option<O>>,
    next_release: u64,
    failure: Option<(u64, Error)>,
    cancelled: bool,
    stats: RunStats,
}

impl<'k, 'c, K, O> Collector<'k, 'c, K, O>
where
    K: Sink<Input = O> + ?Sized,
{
    fn new(sink: &'k mut K, config: &'c ParallelConfig) -> Self {
        Self {
            sink,
            config,
            pending: BTreeMap::new(),
            next_release: 0,
            failure: None,
            cancelled: false,
            stats: RunStats::default(),
        }
    }

    fn accept<S: ?Sized>(
        &mut self,
        completion: Completion<O>,
        dispatcher: &Dispatcher<'_, S>,
        stop: &StopCondition,
        metrics: &RunMetrics,
    ) {
        if self.cancelled {
            return;
        }
        if self.failure.is_none() && stop.is_triggered() {
            tracing::debug!(
                sequence = completion.sequence,
                "cancellation observed, discarding results"
            );
            self.cancelled = true;
            self.pending.clear();
            dispatcher.halt();
            return;
        }

        let Completion { sequence, outcome } = completion;
        match outcome {
            Err(error) => {
                let lower = self
                    .failure
                    .as_ref()
                    .is_none_or(|(current, _)| sequence < *current);
                if lower {
                    tracing::debug!(sequence, error = %error, "failure recognized");
                    self.failure = Some((sequence, error));
                }
                dispatcher.halt();
            }
            Ok(output) if self.config.preserve_order => {
                self.pending.insert(sequence, output);
            }
            Ok(output) => {
                if self.failure.is_none() {
                    self.deliver(sequence, output, metrics);
                }
                dispatcher.release(1);
            }
        }

        if self.config.preserve_order {
            self.release_in_order(dispatcher, metrics);
        }
    }

    /// Release the contiguous run of buffered results that precede the
    /// current failure, if any.
    fn release_in_order<S: ?Sized>(&mut self, dispatcher: &Dispatcher<'_, S>, metrics: &RunMetrics) {
        let limit = self.failure.as_ref().map_or(u64::MAX, |(sequence, _)| *sequence);
        let mut released = 0;
        while self.next_release < limit {
            let Some(output) = self.pending.remove(&self.next_release) else {
                break;
            };
            self.deliver(self.next_release, output, metrics);
            self.next_release += 1;
            released += 1;
        }
        dispatcher.release(released);
    }

    fn deliver(&mut self, sequence: u64, output: Option<O>, metrics: &RunMetrics) {
        let emitted = output.is_some();
        match output {
            Some(value) => {
                self.sink.consume(value);
                self.stats.emitted += 1;
                metrics.record_emitted();
            }
            None => {
                self.stats.filtered += 1;
                metrics.record_filtered();
            }
        }
        if self.config.tracing.element_events {
            trace_element(&self.config.name, sequence, emitted);
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
