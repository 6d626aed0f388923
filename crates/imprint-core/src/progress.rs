//! Progress reporting shared by every stream type
//!
//! Streams only maintain a pair of counters ([`StreamCounters`]): the
//! throughput total and the absolute position. [`WithProgress`] wraps any
//! stream, samples those counters on a timer thread and emits
//! [`Progress`] events. When the wrapped stream terminates (finishes or
//! fails) the timer is stopped exactly once and one final event is
//! emitted. Nothing is emitted after that.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::stream::{Chunk, ChunkSink, ReadStream, SparseSink, Tracked};

/// A progress event
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Progress {
    /// Absolute position in the source or destination
    pub position: u64,
    /// Bytes processed since the previous event
    pub bytes: u64,
    /// Smoothed throughput in bytes per second
    pub speed: f64,
}

/// Callback receiving progress events
pub type ProgressCallback = Arc<dyn Fn(&Progress) + Send + Sync>;

/// Counters a stream updates and a progress timer samples
#[derive(Debug, Default)]
pub struct StreamCounters {
    bytes: AtomicU64,
    position: AtomicU64,
}

impl StreamCounters {
    /// Create zeroed counters
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record `count` newly processed bytes
    pub fn add_bytes(&self, count: u64) {
        self.bytes.fetch_add(count, Ordering::Relaxed);
    }

    /// Record the current absolute position
    pub fn set_position(&self, position: u64) {
        self.position.store(position, Ordering::Relaxed);
    }

    /// Total bytes processed
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Last recorded position
    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Speed estimation
// ============================================================================

/// Throughput estimate over a sliding window of samples
#[derive(Debug, Clone)]
pub struct SpeedMeter {
    samples: VecDeque<(Instant, u64)>,
    max_samples: usize,
}

impl SpeedMeter {
    /// Create a meter keeping the last 10 samples
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(10),
            max_samples: 10,
        }
    }

    /// Record the running byte total
    pub fn update(&mut self, total_bytes: u64) {
        self.update_at(Instant::now(), total_bytes);
    }

    fn update_at(&mut self, now: Instant, total_bytes: u64) {
        if self.samples.len() >= self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back((now, total_bytes));
    }

    /// Bytes per second between the oldest and newest sample
    pub fn speed(&self) -> f64 {
        let (Some(first), Some(last)) = (self.samples.front(), self.samples.back()) else {
            return 0.0;
        };

        let duration = last.0.duration_since(first.0);
        let bytes = last.1.saturating_sub(first.1);

        if duration.as_millis() > 0 {
            bytes as f64 / duration.as_secs_f64()
        } else {
            0.0
        }
    }
}

impl Default for SpeedMeter {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Timer
// ============================================================================

struct Emitter {
    counters: Arc<StreamCounters>,
    callback: ProgressCallback,
    last_bytes: u64,
    meter: SpeedMeter,
}

impl Emitter {
    fn emit(&mut self) {
        let total = self.counters.bytes();
        let delta = total.saturating_sub(self.last_bytes);
        self.last_bytes = total;
        self.meter.update(total);

        (self.callback)(&Progress {
            position: self.counters.position(),
            bytes: delta,
            speed: self.meter.speed(),
        });
    }
}

/// Periodic sampler for a set of counters
///
/// Dropping the timer without calling [`ProgressTimer::finish`] stops it
/// silently.
pub struct ProgressTimer {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<Emitter>>,
}

impl ProgressTimer {
    /// Start sampling `counters` every `interval`
    pub fn start(
        counters: Arc<StreamCounters>,
        interval: Duration,
        callback: ProgressCallback,
    ) -> Self {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let mut emitter = Emitter {
            last_bytes: counters.bytes(),
            counters,
            callback,
            meter: SpeedMeter::new(),
        };
        emitter.meter.update(emitter.last_bytes);

        let handle = std::thread::spawn(move || {
            loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => emitter.emit(),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            emitter
        });

        Self {
            stop: Some(stop_tx),
            handle: Some(handle),
        }
    }

    /// Stop the timer and emit the end state once
    pub fn finish(mut self) {
        if let Some(mut emitter) = self.cancel() {
            emitter.emit();
        }
    }

    fn cancel(&mut self) -> Option<Emitter> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(emitter) => Some(emitter),
            Err(_) => {
                tracing::warn!("progress timer thread panicked");
                None
            }
        }
    }
}

impl Drop for ProgressTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

// ============================================================================
// Decorator
// ============================================================================

/// Adds periodic progress events to a stream
pub struct WithProgress<S> {
    inner: S,
    timer: Option<ProgressTimer>,
}

impl<S: Tracked> WithProgress<S> {
    /// Wrap `inner`, reporting every `interval`
    pub fn new(inner: S, interval: Duration, callback: ProgressCallback) -> Self {
        let timer = ProgressTimer::start(inner.counters(), interval, callback);
        Self {
            inner,
            timer: Some(timer),
        }
    }
}

impl<S> WithProgress<S> {
    /// Stop reporting; the first call emits the final event
    ///
    /// Also runs when the decorator is dropped.
    pub fn terminate(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.finish();
        }
    }

    /// Whether the final event has been emitted
    pub fn is_terminated(&self) -> bool {
        self.timer.is_none()
    }

    /// The wrapped stream
    pub fn get_ref(&self) -> &S {
        &self.inner
    }
}

impl<S> Drop for WithProgress<S> {
    fn drop(&mut self) {
        self.terminate();
    }
}

impl<S: Tracked> Tracked for WithProgress<S> {
    fn counters(&self) -> Arc<StreamCounters> {
        self.inner.counters()
    }
}

impl<S: ReadStream> Iterator for WithProgress<S> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.is_terminated() {
            return None;
        }
        match self.inner.next() {
            Some(Ok(buffer)) => Some(Ok(buffer)),
            other => {
                self.terminate();
                other
            }
        }
    }
}

impl<S: ReadStream> ReadStream for WithProgress<S> {}

impl<S: ChunkSink> ChunkSink for WithProgress<S> {
    fn write(&mut self, buffer: Vec<u8>) -> Result<()> {
        let result = self.inner.write(buffer);
        if result.is_err() {
            self.terminate();
        }
        result
    }

    fn finish(&mut self) -> Result<()> {
        let result = self.inner.finish();
        self.terminate();
        result
    }
}

impl<S: SparseSink> SparseSink for WithProgress<S> {
    fn write_chunk(&mut self, chunk: Chunk) -> Result<()> {
        let result = self.inner.write_chunk(chunk);
        if result.is_err() {
            self.terminate();
        }
        result
    }

    fn finish(&mut self) -> Result<()> {
        let result = self.inner.finish();
        self.terminate();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::Mutex;

    struct Numbers {
        remaining: usize,
        fail: bool,
        counters: Arc<StreamCounters>,
    }

    impl Tracked for Numbers {
        fn counters(&self) -> Arc<StreamCounters> {
            Arc::clone(&self.counters)
        }
    }

    impl Iterator for Numbers {
        type Item = Result<Vec<u8>>;

        fn next(&mut self) -> Option<Self::Item> {
            if self.remaining == 0 {
                if self.fail {
                    return Some(Err(Error::UnexpectedEnd { offset: 0 }));
                }
                return None;
            }
            self.remaining -= 1;
            self.counters.add_bytes(10);
            self.counters.set_position(self.counters.bytes());
            Some(Ok(vec![0; 10]))
        }
    }

    impl ReadStream for Numbers {}

    fn recorder() -> (ProgressCallback, Arc<Mutex<Vec<Progress>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let callback: ProgressCallback = Arc::new(move |p: &Progress| {
            sink.lock().unwrap().push(*p);
        });
        (callback, events)
    }

    #[test]
    fn test_final_event_reflects_end_state() {
        let (callback, events) = recorder();
        let stream = Numbers {
            remaining: 5,
            fail: false,
            counters: StreamCounters::new(),
        };
        let mut tracked = WithProgress::new(stream, Duration::from_secs(60), callback);

        let chunks: Vec<_> = tracked.by_ref().collect::<Result<_>>().unwrap();
        assert_eq!(chunks.len(), 5);
        assert!(tracked.is_terminated());

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].position, 50);
        assert_eq!(events[0].bytes, 50);
    }

    #[test]
    fn test_error_terminates_once() {
        let (callback, events) = recorder();
        let stream = Numbers {
            remaining: 2,
            fail: true,
            counters: StreamCounters::new(),
        };
        let mut tracked = WithProgress::new(stream, Duration::from_secs(60), callback);

        assert!(tracked.next().unwrap().is_ok());
        assert!(tracked.next().unwrap().is_ok());
        assert!(tracked.next().unwrap().is_err());
        // terminated streams yield nothing more
        assert!(tracked.next().is_none());
        assert_eq!(events.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_drop_emits_final_event() {
        let (callback, events) = recorder();
        let stream = Numbers {
            remaining: 3,
            fail: false,
            counters: StreamCounters::new(),
        };
        let mut tracked = WithProgress::new(stream, Duration::from_secs(60), callback);
        assert!(tracked.next().unwrap().is_ok());
        drop(tracked);

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].bytes, 10);
    }

    #[test]
    fn test_explicit_terminate_then_drop_emits_once() {
        let (callback, events) = recorder();
        let stream = Numbers {
            remaining: 1,
            fail: false,
            counters: StreamCounters::new(),
        };
        let mut tracked = WithProgress::new(stream, Duration::from_secs(60), callback);
        tracked.terminate();
        assert!(tracked.is_terminated());
        drop(tracked);

        assert_eq!(events.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_periodic_events_report_deltas() {
        let (callback, events) = recorder();
        let counters = StreamCounters::new();
        let timer = ProgressTimer::start(
            Arc::clone(&counters),
            Duration::from_millis(20),
            callback,
        );

        counters.add_bytes(100);
        std::thread::sleep(Duration::from_millis(70));
        counters.add_bytes(50);
        timer.finish();

        let events = events.lock().unwrap();
        assert!(events.len() >= 2);
        let total: u64 = events.iter().map(|e| e.bytes).sum();
        assert_eq!(total, 150);
    }

    #[test]
    fn test_dropped_timer_never_emits() {
        let (callback, events) = recorder();
        let counters = StreamCounters::new();
        let timer = ProgressTimer::start(
            Arc::clone(&counters),
            Duration::from_secs(60),
            callback,
        );
        counters.add_bytes(10);
        drop(timer);
        counters.add_bytes(10);
        std::thread::sleep(Duration::from_millis(10));
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_speed_meter() {
        let mut meter = SpeedMeter::new();
        assert_eq!(meter.speed(), 0.0);

        let start = Instant::now();
        meter.update_at(start, 0);
        meter.update_at(start + Duration::from_secs(2), 2048);
        assert!((meter.speed() - 1024.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_speed_meter_window() {
        let mut meter = SpeedMeter::new();
        let start = Instant::now();
        for i in 0..20u64 {
            meter.update_at(start + Duration::from_secs(i), i * 100);
        }
        assert_eq!(meter.samples.len(), 10);
        assert!((meter.speed() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_progress_serializes() {
        let json = serde_json::to_string(&Progress {
            position: 1,
            bytes: 2,
            speed: 3.5,
        })
        .unwrap();
        assert_eq!(json, r#"{"position":1,"bytes":2,"speed":3.5}"#);
    }
}
