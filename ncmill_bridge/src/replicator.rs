//! Fixed-cadence status replication.
//!
//! The replicator polls the motion status buffer on a fixed period and
//! pushes a copy to every registered sink. It is deliberately not
//! event-driven: the executor publishes every cycle, the replicator
//! samples at its own cadence, and a slow subscriber can at worst make
//! one replication late, never a control cycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ncmill_motion::StatusReader;

use crate::report::StatusReport;
use crate::BridgeResult;

/// A destination for replicated status reports.
pub trait StatusSink: Send {
    /// Deliver one report. Errors are logged by the replicator and do
    /// not stop the cadence.
    fn publish(&mut self, report: &StatusReport) -> BridgeResult<()>;

    /// Name for log lines.
    fn name(&self) -> &str;
}

/// The replication loop. Owns a status reader and its sinks; run it on
/// a dedicated thread.
pub struct StatusReplicator {
    reader: StatusReader,
    sinks: Vec<Box<dyn StatusSink>>,
    cadence: Duration,
    running: Arc<AtomicBool>,
    /// Publish buffer: the last report handed to the sinks.
    latest: Option<StatusReport>,
}

impl StatusReplicator {
    pub fn new(reader: StatusReader, cadence: Duration) -> Self {
        Self {
            reader,
            sinks: Vec::new(),
            cadence,
            running: Arc::new(AtomicBool::new(true)),
            latest: None,
        }
    }

    pub fn add_sink(&mut self, sink: Box<dyn StatusSink>) {
        tracing::info!(sink = sink.name(), "status sink registered");
        self.sinks.push(sink);
    }

    /// Shared flag that stops the loop at the next cadence boundary.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// The last report handed to the sinks, if any.
    pub fn latest(&self) -> Option<&StatusReport> {
        self.latest.as_ref()
    }

    /// Copy one snapshot and fan it out.
    pub fn replicate_once(&mut self) -> StatusReport {
        let epoch = self.reader.epoch();
        let status = self.reader.read();
        let report = StatusReport::from_status(epoch, &status);
        for sink in &mut self.sinks {
            if let Err(err) = sink.publish(&report) {
                tracing::warn!(sink = sink.name(), %err, "status publish failed");
            }
        }
        self.latest = Some(report);
        report
    }

    /// Replicate until the stop flag is cleared.
    pub fn run(&mut self) {
        tracing::info!(cadence_ms = self.cadence.as_millis() as u64, "replicator running");
        while self.running.load(Ordering::Relaxed) {
            self.replicate_once();
            std::thread::sleep(self.cadence);
        }
        tracing::info!("replicator stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ncmill_common::status::{ExecutorState, MachineStatus};
    use ncmill_common::types::SeqNo;
    use ncmill_motion::status_buffer;
    use std::sync::Mutex;

    struct Recording {
        seen: Arc<Mutex<Vec<StatusReport>>>,
    }

    impl StatusSink for Recording {
        fn publish(&mut self, report: &StatusReport) -> BridgeResult<()> {
            self.seen.lock().unwrap().push(*report);
            Ok(())
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    #[test]
    fn replicate_once_copies_the_current_snapshot() {
        let (mut writer, reader) = status_buffer();
        let mut status = MachineStatus::default();
        status.completed_seq = SeqNo(5);
        status.executor_state = ExecutorState::Running;
        writer.publish(&status);

        let mut replicator = StatusReplicator::new(reader, Duration::from_millis(10));
        let report = replicator.replicate_once();
        assert_eq!(report.completed_seq, SeqNo(5));
        assert_eq!(report.epoch, 1);
        assert_eq!(replicator.latest(), Some(&report));
    }

    #[test]
    fn loop_fans_out_at_its_own_cadence() {
        let (mut writer, reader) = status_buffer();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut replicator = StatusReplicator::new(reader, Duration::from_millis(2));
        replicator.add_sink(Box::new(Recording {
            seen: Arc::clone(&seen),
        }));
        let stop = replicator.stop_flag();

        let handle = std::thread::spawn(move || replicator.run());
        // The writer publishes far faster than the cadence samples.
        let mut status = MachineStatus::default();
        for i in 1..=1000u64 {
            status.completed_seq = SeqNo(i);
            writer.publish(&status);
            if i % 100 == 0 {
                std::thread::sleep(Duration::from_millis(1));
            }
        }
        std::thread::sleep(Duration::from_millis(20));
        stop.store(false, Ordering::Relaxed);
        handle.join().unwrap();

        let seen = seen.lock().unwrap();
        assert!(!seen.is_empty());
        // Sampling, not streaming: far fewer reports than publishes.
        assert!(seen.len() < 1000);
        // Monotonic within what was sampled.
        for pair in seen.windows(2) {
            assert!(pair[1].completed_seq.0 >= pair[0].completed_seq.0);
            assert!(pair[1].epoch >= pair[0].epoch);
        }
    }
}
