//! Progress aggregation for the download stage.
//!
//! Download workers report through the [`DownloadProgress`] trait. The
//! [`ProgressAggregator`] is a single task that owns the running totals and
//! emits a rate line on every tick through a [`ProgressReporter`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::counter::WorkCounter;
use crate::format::{format_bytes, format_duration, format_rate};

/// Capacity of the event channel feeding the aggregator.
const EVENT_CAPACITY: usize = 10_240;

/// Trait for receiving download progress updates.
///
/// All methods have default no-op implementations for convenience. Calls
/// must never block the caller.
pub trait DownloadProgress: Send + Sync {
    /// Called when a task is queued for download.
    fn on_item_queued(&self) {}

    /// Called once per downloaded file, as soon as its length is known.
    fn on_size_known(&self, _bytes: u64) {}

    /// Called with the number of bytes received since the last call.
    fn on_bytes(&self, _bytes: u64) {}

    /// Called when a task finishes, whether skipped, downloaded or failed.
    fn on_item_finished(&self) {}
}

/// A null progress implementation that ignores all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl DownloadProgress for NoProgress {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProgressEvent {
    ItemQueued,
    SizeKnown(u64),
    BytesReceived(u64),
    ItemFinished,
}

/// Running totals owned by the aggregator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressState {
    /// Sum of the sizes of every file whose length is known.
    pub bytes_expected: u64,
    /// Bytes received so far.
    pub bytes_received: u64,
    /// Tasks finished (skipped, downloaded or failed).
    pub items_finished: u64,
    /// Tasks queued so far.
    pub items_expected: u64,
}

impl ProgressState {
    fn apply(&mut self, event: ProgressEvent) {
        match event {
            ProgressEvent::ItemQueued => self.items_expected += 1,
            ProgressEvent::SizeKnown(n) => self.bytes_expected += n,
            ProgressEvent::BytesReceived(n) => self.bytes_received += n,
            ProgressEvent::ItemFinished => self.items_finished += 1,
        }
    }
}

/// One periodic progress report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressLine {
    /// Totals at the time of the tick.
    pub state: ProgressState,
    /// Bytes per second over the last interval.
    pub rate: u64,
}

impl ProgressLine {
    /// Estimated time until the known bytes have all arrived.
    #[must_use]
    pub fn eta(&self) -> Option<Duration> {
        let remaining = self
            .state
            .bytes_expected
            .checked_sub(self.state.bytes_received)
            .filter(|&r| r > 0)?;
        (self.rate > 0).then(|| Duration::from_secs(remaining.div_ceil(self.rate)))
    }
}

impl fmt::Display for ProgressLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}/{}] {}/{} @ {}",
            self.state.items_finished,
            self.state.items_expected,
            format_bytes(self.state.bytes_received),
            format_bytes(self.state.bytes_expected),
            format_rate(self.rate),
        )?;
        if let Some(eta) = self.eta() {
            write!(f, " eta {}", format_duration(eta))?;
        }
        Ok(())
    }
}

/// Destination for periodic progress lines.
pub trait ProgressReporter: Send + Sync {
    /// Called on every tick and once more when the aggregator stops.
    fn report(&self, line: &ProgressLine);
}

/// Writes progress lines to the `log` facade at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl ProgressReporter for LogReporter {
    fn report(&self, line: &ProgressLine) {
        log::info!("{line}");
    }
}

/// Cloneable event sender that feeds a [`ProgressAggregator`].
#[derive(Debug, Clone)]
pub struct ProgressHandle {
    tx: mpsc::Sender<ProgressEvent>,
    /// Events handed to detached sends and not yet in the channel.
    overflow: WorkCounter,
}

impl ProgressHandle {
    fn send(&self, event: ProgressEvent) {
        match self.tx.try_send(event) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            // Keep the caller moving; the detached send preserves the event
            Err(TrySendError::Full(event)) => {
                let tx = self.tx.clone();
                let overflow = self.overflow.clone();
                overflow.add(1);
                tokio::spawn(async move {
                    let _ = tx.send(event).await;
                    overflow.done();
                });
            }
        }
    }
}

impl DownloadProgress for ProgressHandle {
    fn on_item_queued(&self) {
        self.send(ProgressEvent::ItemQueued);
    }

    fn on_size_known(&self, bytes: u64) {
        self.send(ProgressEvent::SizeKnown(bytes));
    }

    fn on_bytes(&self, bytes: u64) {
        if bytes > 0 {
            self.send(ProgressEvent::BytesReceived(bytes));
        }
    }

    fn on_item_finished(&self) {
        self.send(ProgressEvent::ItemFinished);
    }
}

/// Final totals returned when the aggregator stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSummary {
    /// Totals at shutdown.
    pub state: ProgressState,
    /// Highest per-interval rate observed.
    pub peak_rate: u64,
}

/// Single owner of the download progress totals.
pub struct ProgressAggregator {
    handle: ProgressHandle,
    cancel: CancellationToken,
    task: JoinHandle<ProgressSummary>,
}

impl ProgressAggregator {
    /// Starts the aggregator task, reporting every `interval`.
    #[must_use]
    pub fn spawn(interval: Duration, reporter: Arc<dyn ProgressReporter>) -> Self {
        Self::spawn_with_capacity(interval, reporter, EVENT_CAPACITY)
    }

    fn spawn_with_capacity(
        interval: Duration,
        reporter: Arc<dyn ProgressReporter>,
        capacity: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(aggregate(rx, interval, reporter, cancel.clone()));
        Self {
            handle: ProgressHandle {
                tx,
                overflow: WorkCounter::new(),
            },
            cancel,
            task,
        }
    }

    /// Returns a handle for reporting events.
    #[must_use]
    pub fn handle(&self) -> ProgressHandle {
        self.handle.clone()
    }

    /// Stops the aggregator and returns the final totals.
    ///
    /// Events still waiting for channel space are delivered first.
    ///
    /// # Errors
    ///
    /// Returns an error if the aggregator task panicked.
    pub async fn shutdown(self) -> crate::Result<ProgressSummary> {
        self.handle.overflow.wait_zero().await;
        self.cancel.cancel();
        Ok(self.task.await?)
    }
}

#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
async fn aggregate(
    mut rx: mpsc::Receiver<ProgressEvent>,
    interval: Duration,
    reporter: Arc<dyn ProgressReporter>,
    cancel: CancellationToken,
) -> ProgressSummary {
    let mut state = ProgressState::default();
    let mut received_at_last_tick = 0;
    let mut peak_rate = 0;

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => state.apply(event),
                None => break,
            },
            _ = ticker.tick() => {
                let delta = state.bytes_received - received_at_last_tick;
                received_at_last_tick = state.bytes_received;
                let rate = (delta as f64 / interval.as_secs_f64()) as u64;
                peak_rate = peak_rate.max(rate);
                reporter.report(&ProgressLine { state, rate });
            }
        }
    }

    while let Ok(event) = rx.try_recv() {
        state.apply(event);
    }
    reporter.report(&ProgressLine { state, rate: 0 });

    ProgressSummary { state, peak_rate }
}
