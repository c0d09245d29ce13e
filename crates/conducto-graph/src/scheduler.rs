//! Sample-locked task scheduling.
//!
//! [`BlockScheduler`] is a [`Dependent`] whose notion of "now" is the
//! graph's nanosecond clock, derived from the sample position. Tasks are
//! enqueued from any thread through a cloneable [`SchedulerHandle`] into an
//! unbounded intake channel; they execute on the audio thread during the
//! per-block `update`. This makes the intake channel the sanctioned way to
//! push work from control threads onto the graph without locking the
//! audio thread.
//!
//! Because target times live in graph-sample time rather than wall time,
//! the scheduler stays self-consistent when the audio thread falls behind
//! and several blocks' worth of updates run in one wall-clock interval.
//! Periodic tasks re-arm with `fire += period`, never `now + period`, so
//! they cannot accumulate drift.

use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::graph::{Dependent, Timebase};

/// Errors surfaced by the executor-style control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    /// Lifecycle control belongs to the audio device, not the scheduler.
    #[error("scheduler termination is not supported; the audio device drives lifetime")]
    NotSupported,
}

/// Cancellation handle for a scheduled task.
///
/// Cancellation is honored when the task is next polled; a task already
/// executing on the audio thread cannot be interrupted.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    cancelled: Arc<AtomicBool>,
}

impl TaskHandle {
    fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Marks the task cancelled.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Whether the task has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

enum Intake {
    Immediate(Box<dyn FnOnce() + Send>),
    Timed(TimedTask),
}

struct TimedTask {
    run: Box<dyn FnMut() + Send>,
    delay: i64,
    period: i64,
    cancelled: Arc<AtomicBool>,
}

/// Heap entry ordered by fire time, ties broken by intake order.
struct Scheduled {
    fire: i64,
    seq: u64,
    task: TimedTask,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.fire == other.fire && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        // BinaryHeap is a max-heap; invert so the earliest fire time (and
        // for ties the earliest enqueue) pops first.
        other
            .fire
            .cmp(&self.fire)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Cross-thread entry point for enqueueing work onto the audio thread.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: Sender<Intake>,
}

impl SchedulerHandle {
    /// Runs `task` at the start of the next block.
    pub fn execute(&self, task: impl FnOnce() + Send + 'static) {
        let _ = self.tx.send(Intake::Immediate(Box::new(task)));
    }

    /// Runs `task` once, `delay` after the block that dequeues it.
    pub fn schedule(&self, task: impl FnMut() + Send + 'static, delay: Duration) -> TaskHandle {
        self.submit(Box::new(task), delay, Duration::ZERO)
    }

    /// Runs `task` after `initial_delay` and then every `period`,
    /// measured on the graph clock. Re-arming uses `fire += period` so a
    /// slow or bursty callback cannot introduce drift.
    pub fn schedule_at_fixed_rate(
        &self,
        task: impl FnMut() + Send + 'static,
        initial_delay: Duration,
        period: Duration,
    ) -> TaskHandle {
        self.submit(Box::new(task), initial_delay, period)
    }

    /// Alias of [`schedule_at_fixed_rate`](Self::schedule_at_fixed_rate):
    /// on a sample-locked clock the two policies coincide.
    pub fn schedule_with_fixed_delay(
        &self,
        task: impl FnMut() + Send + 'static,
        initial_delay: Duration,
        period: Duration,
    ) -> TaskHandle {
        self.schedule_at_fixed_rate(task, initial_delay, period)
    }

    fn submit(&self, run: Box<dyn FnMut() + Send>, delay: Duration, period: Duration) -> TaskHandle {
        let handle = TaskHandle::new();
        let task = TimedTask {
            run,
            delay: delay.as_nanos() as i64,
            period: period.as_nanos() as i64,
            cancelled: Arc::clone(&handle.cancelled),
        };
        let _ = self.tx.send(Intake::Timed(task));
        handle
    }

    /// Unsupported: the host's audio device drives termination.
    pub fn shutdown(&self) -> Result<(), ScheduleError> {
        Err(ScheduleError::NotSupported)
    }

    /// Unsupported: the host's audio device drives termination.
    pub fn shutdown_now(&self) -> Result<(), ScheduleError> {
        Err(ScheduleError::NotSupported)
    }

    /// Unsupported: the host's audio device drives termination.
    pub fn await_termination(&self, _timeout: Duration) -> Result<bool, ScheduleError> {
        Err(ScheduleError::NotSupported)
    }

    /// Always false; see [`shutdown`](Self::shutdown).
    pub fn is_shutdown(&self) -> bool {
        false
    }

    /// Always false; see [`shutdown`](Self::shutdown).
    pub fn is_terminated(&self) -> bool {
        false
    }
}

/// The per-block executor. Owned by the graph as its first dependent.
pub struct BlockScheduler {
    rx: Receiver<Intake>,
    heap: BinaryHeap<Scheduled>,
    seq: u64,
    now: i64,
}

impl BlockScheduler {
    /// Creates the scheduler and its cross-thread handle.
    pub fn new() -> (Self, SchedulerHandle) {
        let (tx, rx) = unbounded();
        (
            Self {
                rx,
                heap: BinaryHeap::new(),
                seq: 0,
                now: 0,
            },
            SchedulerHandle { tx },
        )
    }
}

impl Dependent for BlockScheduler {
    fn update(&mut self, timebase: &Timebase) {
        self.now = timebase.nanos();

        // Drain the intake first: immediate tasks run now, timed tasks get
        // their absolute fire time stamped and move to the delay order.
        // Every immediate task therefore runs before any delayed task that
        // fires in this block.
        while let Ok(intake) = self.rx.try_recv() {
            match intake {
                Intake::Immediate(task) => task(),
                Intake::Timed(task) => {
                    self.seq += 1;
                    self.heap.push(Scheduled {
                        fire: self.now + task.delay,
                        seq: self.seq,
                        task,
                    });
                }
            }
        }

        loop {
            match self.heap.peek() {
                Some(entry) if entry.fire <= self.now => {}
                _ => break,
            }
            let Some(mut entry) = self.heap.pop() else {
                break;
            };
            if entry.task.cancelled.load(Ordering::Relaxed) {
                continue;
            }
            (entry.task.run)();
            if entry.task.period > 0 && !entry.task.cancelled.load(Ordering::Relaxed) {
                entry.fire += entry.task.period;
                self.heap.push(entry);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn timebase(position: i64) -> Timebase {
        // 64-sample blocks at 64 kHz: exactly 1 ms of samples per block.
        Timebase::with_state(64000.0, 64, position)
    }

    fn recorder() -> (
        Arc<Mutex<Vec<&'static str>>>,
        impl Fn(&'static str) + Clone + Send + 'static,
    ) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let writer = {
            let log = Arc::clone(&log);
            move |tag: &'static str| log.lock().unwrap().push(tag)
        };
        (log, writer)
    }

    #[test]
    fn test_immediate_runs_before_delayed_in_same_block() {
        let (mut scheduler, handle) = BlockScheduler::new();
        let (log, write) = recorder();

        let w = write.clone();
        handle.schedule(move || w("delayed"), Duration::ZERO);
        let w = write;
        handle.execute(move || w("immediate"));

        scheduler.update(&timebase(0));
        assert_eq!(*log.lock().unwrap(), ["immediate", "delayed"]);
    }

    #[test]
    fn test_fire_time_order_with_insertion_tie_break() {
        let (mut scheduler, handle) = BlockScheduler::new();
        let (log, write) = recorder();

        let w = write.clone();
        handle.schedule(move || w("second"), Duration::from_nanos(500_000));
        let w = write.clone();
        handle.schedule(move || w("first"), Duration::from_nanos(100_000));
        let w = write.clone();
        handle.schedule(move || w("tie_a"), Duration::from_nanos(700_000));
        let w = write;
        handle.schedule(move || w("tie_b"), Duration::from_nanos(700_000));

        // intake drained at block 0 (now = 0); everything fires within the
        // first millisecond, i.e. by the block at position 64.
        scheduler.update(&timebase(0));
        scheduler.update(&timebase(64));
        assert_eq!(*log.lock().unwrap(), ["first", "second", "tie_a", "tie_b"]);
    }

    #[test]
    fn test_delay_counted_from_dequeue_block() {
        let (mut scheduler, handle) = BlockScheduler::new();
        let fired = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&fired);
        let now = Arc::new(Mutex::new(0i64));
        let seen = Arc::clone(&now);
        handle.schedule(
            move || log.lock().unwrap().push(*seen.lock().unwrap()),
            Duration::from_nanos(2_500_000),
        );

        // 1 ms per block; the task is dequeued at block 0 so it fires at
        // the first block whose time reaches 2.5 ms: block 3.
        for block in 0..5i64 {
            let tb = timebase(block * 64);
            *now.lock().unwrap() = tb.nanos();
            scheduler.update(&tb);
        }
        assert_eq!(*fired.lock().unwrap(), [3_000_000]);
    }

    #[test]
    fn test_periodic_task_has_no_drift() {
        let (mut scheduler, handle) = BlockScheduler::new();
        let fired = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&fired);
        let now = Arc::new(Mutex::new(0i64));
        let seen = Arc::clone(&now);
        handle.schedule_at_fixed_rate(
            move || log.lock().unwrap().push(*seen.lock().unwrap()),
            Duration::ZERO,
            Duration::from_millis(10),
        );

        for block in 0..35i64 {
            let tb = timebase(block * 64);
            *now.lock().unwrap() = tb.nanos();
            scheduler.update(&tb);
        }
        assert_eq!(
            *fired.lock().unwrap(),
            [0, 10_000_000, 20_000_000, 30_000_000]
        );
    }

    #[test]
    fn test_cancellation_honored_at_poll() {
        let (mut scheduler, handle) = BlockScheduler::new();
        let (log, write) = recorder();

        let w = write;
        let task = handle.schedule(move || w("ran"), Duration::from_millis(1));
        scheduler.update(&timebase(0));
        task.cancel();
        scheduler.update(&timebase(64));
        scheduler.update(&timebase(128));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_periodic_stops_after_cancellation() {
        let (mut scheduler, handle) = BlockScheduler::new();
        let count = Arc::new(Mutex::new(0usize));
        let log = Arc::clone(&count);
        let task =
            handle.schedule_at_fixed_rate(move || *log.lock().unwrap() += 1, Duration::ZERO, Duration::from_millis(1));

        scheduler.update(&timebase(0));
        assert_eq!(*count.lock().unwrap(), 1);
        task.cancel();
        scheduler.update(&timebase(64));
        scheduler.update(&timebase(128));
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn test_termination_surface_is_unsupported() {
        let (_scheduler, handle) = BlockScheduler::new();
        assert_eq!(handle.shutdown(), Err(ScheduleError::NotSupported));
        assert_eq!(handle.shutdown_now(), Err(ScheduleError::NotSupported));
        assert_eq!(
            handle.await_termination(Duration::from_secs(1)),
            Err(ScheduleError::NotSupported)
        );
        assert!(!handle.is_shutdown());
        assert!(!handle.is_terminated());
    }
}
