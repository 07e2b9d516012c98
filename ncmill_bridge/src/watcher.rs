//! Poll/compare completion tracking.
//!
//! The feed side records the last sequence number it enqueued; anyone
//! who wants to know whether the machine has caught up compares that
//! against the highest-completed number in the replicated status. No
//! callbacks, no subscriptions — just sampling.

use std::time::{Duration, Instant};

use ncmill_common::types::SeqNo;
use ncmill_motion::StatusReader;

/// Tracks how far behind the machine is on acknowledged work.
pub struct CompletionWatcher {
    status: StatusReader,
    last_enqueued: SeqNo,
}

impl CompletionWatcher {
    pub fn new(status: StatusReader) -> Self {
        Self {
            status,
            last_enqueued: SeqNo::NONE,
        }
    }

    /// Record the highest sequence number handed to the queue so far.
    pub fn record_enqueued(&mut self, seq: SeqNo) {
        if seq.0 > self.last_enqueued.0 {
            self.last_enqueued = seq;
        }
    }

    pub fn last_enqueued(&self) -> SeqNo {
        self.last_enqueued
    }

    /// Highest acknowledged sequence number, per the latest snapshot.
    pub fn completed(&self) -> SeqNo {
        self.status.read().completed_seq
    }

    /// True once everything recorded as enqueued has been acknowledged.
    pub fn is_drained(&self) -> bool {
        self.completed().0 >= self.last_enqueued.0
    }

    /// Commands still unacknowledged, per the latest snapshot.
    pub fn lag(&self) -> u64 {
        self.last_enqueued.0.saturating_sub(self.completed().0)
    }

    /// Poll until drained or `timeout` elapses. Returns whether the
    /// drain finished. Also gives up early when the machine halts with
    /// an alarm, since nothing further will complete.
    pub fn wait_drained(&self, timeout: Duration, poll: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_drained() {
                return true;
            }
            let snapshot = self.status.read();
            if snapshot.is_halted() {
                tracing::warn!(
                    completed = %snapshot.completed_seq,
                    pending = %self.last_enqueued,
                    "drain wait ended by halt"
                );
                return self.is_drained();
            }
            if Instant::now() >= deadline {
                tracing::warn!(lag = self.lag(), "drain wait timed out");
                return false;
            }
            std::thread::sleep(poll);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ncmill_common::status::{ExecutorState, MachineStatus};
    use ncmill_motion::status_buffer;

    #[test]
    fn drained_when_completed_catches_up() {
        let (mut writer, reader) = status_buffer();
        let mut watcher = CompletionWatcher::new(reader);
        assert!(watcher.is_drained());

        watcher.record_enqueued(SeqNo(3));
        assert!(!watcher.is_drained());
        assert_eq!(watcher.lag(), 3);

        let mut status = MachineStatus::default();
        status.completed_seq = SeqNo(3);
        writer.publish(&status);
        assert!(watcher.is_drained());
        assert_eq!(watcher.lag(), 0);
    }

    #[test]
    fn record_keeps_the_maximum() {
        let (_writer, reader) = status_buffer();
        let mut watcher = CompletionWatcher::new(reader);
        watcher.record_enqueued(SeqNo(5));
        watcher.record_enqueued(SeqNo(2));
        assert_eq!(watcher.last_enqueued(), SeqNo(5));
    }

    #[test]
    fn wait_drained_sees_progress_from_another_thread() {
        let (mut writer, reader) = status_buffer();
        let mut watcher = CompletionWatcher::new(reader);
        watcher.record_enqueued(SeqNo(10));

        let producer = std::thread::spawn(move || {
            let mut status = MachineStatus::default();
            for i in 1..=10u64 {
                std::thread::sleep(Duration::from_millis(2));
                status.completed_seq = SeqNo(i);
                writer.publish(&status);
            }
        });
        assert!(watcher.wait_drained(Duration::from_secs(2), Duration::from_millis(1)));
        producer.join().unwrap();
    }

    #[test]
    fn wait_drained_gives_up_on_a_halt() {
        let (mut writer, reader) = status_buffer();
        let mut watcher = CompletionWatcher::new(reader);
        watcher.record_enqueued(SeqNo(10));

        let mut status = MachineStatus::default();
        status.completed_seq = SeqNo(4);
        status.executor_state = ExecutorState::Faulted;
        writer.publish(&status);

        assert!(!watcher.wait_drained(Duration::from_secs(2), Duration::from_millis(1)));
        assert_eq!(watcher.lag(), 6);
    }
}
