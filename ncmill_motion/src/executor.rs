//! Trajectory executor: the paced cycle loop on the real-time side.
//!
//! Each cycle: poll the command queue → advance the simulated joints
//! toward the active command's target at the commanded rate → on
//! completion acknowledge the sequence number → publish a fresh status
//! snapshot. Kinematics are deliberately simple (constant-rate
//! straight-line advance); the loop structure, pacing and fault
//! behavior are the point.
//!
//! ## RT setup sequence (`rt` feature)
//! 1. `mlockall(MCL_CURRENT | MCL_FUTURE)` — lock all pages.
//! 2. Prefault stack pages.
//! 3. `sched_setaffinity` — pin to an isolated core.
//! 4. `sched_setscheduler(SCHED_FIFO, prio)`.
//!
//! The loop paces itself with `clock_nanosleep(TIMER_ABSTIME)` on
//! `CLOCK_MONOTONIC` for drift-free cycles; a single overrun is a hard
//! fault. Without the feature every RT call is a no-op and the loop
//! sleeps with `std::thread::sleep` (simulation mode, overruns only
//! counted).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

use ncmill_common::consts::MAX_JOINTS;
use ncmill_common::error::NcError;
use ncmill_common::status::{
    ActiveAlarm, AlarmKind, ExecutorState, JointFlags, MachineStatus, SpindleDirection,
    SpindleStatus,
};
use ncmill_common::types::{Position, SeqNo};
use ncmill_interp::emit::CanonOp;
use ncmill_interp::CanonicalCommand;

use crate::queue::CommandConsumer;
use crate::status_buffer::StatusWriter;

// ─── Errors ─────────────────────────────────────────────────────────

/// Executor failure: an RT setup syscall or a runtime fault.
#[derive(Debug, Error)]
pub enum ExecError {
    /// RT system call failed.
    #[error("rt setup: {0}")]
    RtSetup(String),
    /// Runtime fault (execution fault, queue misuse).
    #[error(transparent)]
    Nc(#[from] NcError),
}

// ─── Cycle Statistics ───────────────────────────────────────────────

/// O(1) per-cycle timing statistics; updated every cycle with no
/// allocation.
#[derive(Debug, Clone)]
pub struct CycleStats {
    /// Total cycles executed.
    pub cycle_count: u64,
    /// Last cycle duration [ns].
    pub last_cycle_ns: i64,
    /// Minimum cycle duration [ns].
    pub min_cycle_ns: i64,
    /// Maximum cycle duration [ns].
    pub max_cycle_ns: i64,
    /// Running sum for average computation.
    pub sum_cycle_ns: i64,
    /// Number of overruns detected.
    pub overruns: u64,
    /// Maximum wake-up latency [ns].
    pub max_latency_ns: i64,
}

impl CycleStats {
    pub const fn new() -> Self {
        Self {
            cycle_count: 0,
            last_cycle_ns: 0,
            min_cycle_ns: i64::MAX,
            max_cycle_ns: 0,
            sum_cycle_ns: 0,
            overruns: 0,
            max_latency_ns: 0,
        }
    }

    /// Record one cycle. O(1), no allocation.
    #[inline]
    pub fn record(&mut self, duration_ns: i64, latency_ns: i64) {
        self.cycle_count += 1;
        self.last_cycle_ns = duration_ns;
        if duration_ns < self.min_cycle_ns {
            self.min_cycle_ns = duration_ns;
        }
        if duration_ns > self.max_cycle_ns {
            self.max_cycle_ns = duration_ns;
        }
        self.sum_cycle_ns += duration_ns;
        if latency_ns > self.max_latency_ns {
            self.max_latency_ns = latency_ns;
        }
    }

    /// Average cycle time [ns]; 0 before the first cycle.
    #[inline]
    pub fn avg_cycle_ns(&self) -> i64 {
        if self.cycle_count == 0 {
            0
        } else {
            self.sum_cycle_ns / self.cycle_count as i64
        }
    }
}

impl Default for CycleStats {
    fn default() -> Self {
        Self::new()
    }
}

// ─── RT Setup ───────────────────────────────────────────────────────

#[cfg(feature = "rt")]
fn rt_mlockall() -> Result<(), ExecError> {
    use nix::sys::mman::{mlockall, MlockallFlags};
    mlockall(MlockallFlags::MCL_CURRENT | MlockallFlags::MCL_FUTURE)
        .map_err(|e| ExecError::RtSetup(format!("mlockall failed: {e}")))
}

#[cfg(not(feature = "rt"))]
fn rt_mlockall() -> Result<(), ExecError> {
    Ok(())
}

/// Touch a stack region so its pages are resident before the loop.
fn prefault_stack() {
    let mut buf = [0u8; 256 * 1024];
    for byte in buf.iter_mut() {
        unsafe { core::ptr::write_volatile(byte, 0xFF) };
    }
    core::hint::black_box(&buf);
}

#[cfg(feature = "rt")]
fn rt_set_affinity(cpu: usize) -> Result<(), ExecError> {
    use nix::sched::{sched_setaffinity, CpuSet};
    use nix::unistd::Pid;
    let mut cpuset = CpuSet::new();
    cpuset
        .set(cpu)
        .map_err(|e| ExecError::RtSetup(format!("CpuSet::set({cpu}) failed: {e}")))?;
    sched_setaffinity(Pid::from_raw(0), &cpuset)
        .map_err(|e| ExecError::RtSetup(format!("sched_setaffinity failed: {e}")))
}

#[cfg(not(feature = "rt"))]
fn rt_set_affinity(_cpu: usize) -> Result<(), ExecError> {
    Ok(())
}

#[cfg(feature = "rt")]
fn rt_set_scheduler(priority: i32) -> Result<(), ExecError> {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    let ret = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        return Err(ExecError::RtSetup(format!(
            "sched_setscheduler(SCHED_FIFO, {priority}) failed: {err}"
        )));
    }
    Ok(())
}

#[cfg(not(feature = "rt"))]
fn rt_set_scheduler(_priority: i32) -> Result<(), ExecError> {
    Ok(())
}

/// Full RT setup sequence. Call on the executor thread before `run`.
/// Every step is a no-op without the `rt` feature.
pub fn rt_setup(cpu_core: usize, rt_priority: i32) -> Result<(), ExecError> {
    rt_mlockall()?;
    prefault_stack();
    rt_set_affinity(cpu_core)?;
    rt_set_scheduler(rt_priority)?;
    Ok(())
}

// ─── Executor ───────────────────────────────────────────────────────

/// Executor tuning.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Cycle time [µs].
    pub cycle_time_us: u64,
    /// Traverse rate for rapid moves [units/min].
    pub rapid_rate: f64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            cycle_time_us: ncmill_common::consts::DEFAULT_CYCLE_TIME_US,
            rapid_rate: 10_000.0,
        }
    }
}

/// The command currently being acted on.
struct ActiveCommand {
    cmd: CanonicalCommand,
    /// Remaining dwell time [s] for dwell commands.
    dwell_left: f64,
}

/// The paced executor loop. Owns the consumer side of the command
/// queue and the single status writer.
pub struct TrajectoryExecutor {
    queue: CommandConsumer,
    status: StatusWriter,
    shutdown: Arc<AtomicBool>,
    cycle_time_ns: i64,
    rapid_rate: f64,
    stats: CycleStats,
    position: Position,
    velocity: [f64; MAX_JOINTS],
    spindle: SpindleStatus,
    active: Option<ActiveCommand>,
    state: ExecutorState,
    alarm: ActiveAlarm,
    /// Test hook: raise an execution fault when this seq is dispatched.
    fault_at: Option<SeqNo>,
    program_ended: bool,
}

impl TrajectoryExecutor {
    pub fn new(queue: CommandConsumer, status: StatusWriter, config: ExecutorConfig) -> Self {
        Self {
            queue,
            status,
            shutdown: Arc::new(AtomicBool::new(false)),
            cycle_time_ns: (config.cycle_time_us.max(1) as i64) * 1000,
            rapid_rate: config.rapid_rate,
            stats: CycleStats::new(),
            position: Position::ZERO,
            velocity: [0.0; MAX_JOINTS],
            spindle: SpindleStatus::default(),
            active: None,
            state: ExecutorState::Idle,
            alarm: ActiveAlarm::default(),
            fault_at: None,
            program_ended: false,
        }
    }

    /// Shared flag that stops the loop at the next cycle boundary.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Timing statistics so far.
    pub fn stats(&self) -> &CycleStats {
        &self.stats
    }

    /// Inject an execution fault when `seq` reaches dispatch. Testing
    /// and commissioning hook.
    pub fn fault_at(&mut self, seq: SeqNo) {
        self.fault_at = Some(seq);
    }

    /// Enter the paced cycle loop. Returns when the program ends, the
    /// queue is aborted, the shutdown flag is raised, or a fault halts
    /// execution (the fault is also visible in status and the frozen
    /// queue).
    pub fn run(&mut self) -> Result<(), ExecError> {
        self.state = ExecutorState::Running;
        tracing::info!(cycle_time_ns = self.cycle_time_ns, "executor running");

        #[cfg(feature = "rt")]
        {
            self.run_rt_loop()
        }
        #[cfg(not(feature = "rt"))]
        {
            self.run_sim_loop()
        }
    }

    /// One return value for all loop variants.
    fn loop_exit(&mut self) -> Option<Result<(), ExecError>> {
        if self.shutdown.load(Ordering::Relaxed) {
            tracing::info!("executor shutdown requested");
            if self.state == ExecutorState::Running {
                self.state = ExecutorState::Idle;
            }
            self.publish();
            return Some(Ok(()));
        }
        match self.state {
            ExecutorState::Faulted => {
                let err = NcError::ExecutionFault {
                    seq: self.alarm.seq,
                    joint: self.alarm.joint,
                    detail: "execution fault".into(),
                };
                Some(Err(err.into()))
            }
            ExecutorState::Aborted => {
                tracing::warn!("executor stopping: queue aborted");
                Some(Ok(()))
            }
            _ if self.program_ended => {
                tracing::info!(cycles = self.stats.cycle_count, "program complete");
                Some(Ok(()))
            }
            _ => None,
        }
    }

    #[cfg(feature = "rt")]
    fn run_rt_loop(&mut self) -> Result<(), ExecError> {
        use nix::time::{clock_gettime, clock_nanosleep, ClockId, ClockNanosleepFlags};

        let clock = ClockId::CLOCK_MONOTONIC;
        let gettime =
            |c| clock_gettime(c).map_err(|e| ExecError::RtSetup(format!("clock_gettime: {e}")));
        let mut next_wake = gettime(clock)?;
        let dt_s = self.cycle_time_ns as f64 / 1e9;

        loop {
            next_wake = timespec_add_ns(next_wake, self.cycle_time_ns);
            let cycle_start = gettime(clock)?;
            let wake_latency_ns = timespec_diff_ns(&cycle_start, &next_wake).abs();

            self.cycle_body(dt_s);

            let cycle_end = gettime(clock)?;
            let duration_ns = timespec_diff_ns(&cycle_end, &cycle_start);
            self.stats.record(duration_ns, wake_latency_ns);

            if duration_ns > self.cycle_time_ns {
                // Hard deadline: a single overrun halts execution.
                self.stats.overruns += 1;
                let seq = self.executing_seq();
                self.raise_fault(
                    seq,
                    u8::MAX,
                    format!("cycle overrun: {duration_ns}ns > {}ns", self.cycle_time_ns),
                );
            }
            if let Some(exit) = self.loop_exit() {
                return exit;
            }
            let _ = clock_nanosleep(clock, ClockNanosleepFlags::TIMER_ABSTIME, &next_wake);
        }
    }

    #[cfg(not(feature = "rt"))]
    fn run_sim_loop(&mut self) -> Result<(), ExecError> {
        use std::time::{Duration, Instant};

        let cycle_duration = Duration::from_nanos(self.cycle_time_ns as u64);
        let dt_s = self.cycle_time_ns as f64 / 1e9;

        loop {
            let cycle_start = Instant::now();

            self.cycle_body(dt_s);

            let elapsed = cycle_start.elapsed();
            let duration_ns = elapsed.as_nanos() as i64;
            self.stats.record(duration_ns, 0);
            if duration_ns > self.cycle_time_ns {
                // Simulation mode: count, don't abort.
                self.stats.overruns += 1;
            }
            if let Some(exit) = self.loop_exit() {
                return exit;
            }
            if let Some(remaining) = cycle_duration.checked_sub(elapsed) {
                std::thread::sleep(remaining);
            }
        }
    }

    fn executing_seq(&self) -> SeqNo {
        self.active.as_ref().map(|a| a.cmd.seq).unwrap_or(SeqNo::NONE)
    }

    /// One cycle: poll → advance → publish.
    fn cycle_body(&mut self, dt_s: f64) {
        if self.queue.is_aborted() {
            // Drains the queue as a side effect.
            let _ = self.queue.dispatch_next();
            self.state = ExecutorState::Aborted;
            self.active = None;
            self.velocity = [0.0; MAX_JOINTS];
            self.publish();
            return;
        }

        if self.active.is_none() && self.state == ExecutorState::Running {
            match self.queue.dispatch_next() {
                Ok(Some(cmd)) => {
                    if self.fault_at == Some(cmd.seq) {
                        self.fault_at = None;
                        self.raise_fault(cmd.seq, u8::MAX, "injected fault");
                        self.publish();
                        return;
                    }
                    self.queue.mark_executing(cmd.seq);
                    let dwell_left = match cmd.op {
                        CanonOp::Dwell { seconds } => seconds,
                        _ => 0.0,
                    };
                    self.active = Some(ActiveCommand { cmd, dwell_left });
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::error!(%err, "dispatch failed");
                    self.raise_fault(SeqNo::NONE, u8::MAX, err.to_string());
                    self.publish();
                    return;
                }
            }
        }

        if let Some(done_seq) = self.advance(dt_s) {
            if let Err(err) = self.queue.complete(done_seq) {
                tracing::error!(%err, "completion rejected");
                self.raise_fault(done_seq, u8::MAX, err.to_string());
            } else {
                self.active = None;
                self.velocity = [0.0; MAX_JOINTS];
            }
        }

        self.publish();
    }

    /// Advance the active command by one cycle; `Some(seq)` when it
    /// finished this cycle.
    fn advance(&mut self, dt_s: f64) -> Option<SeqNo> {
        let active = self.active.as_mut()?;
        let seq = active.cmd.seq;
        let done = match active.cmd.op {
            CanonOp::StraightTraverse { target } => {
                let rate = self.rapid_rate / 60.0;
                step_toward(&mut self.position, &mut self.velocity, &target, rate, dt_s)
            }
            CanonOp::StraightFeed { target } | CanonOp::ArcFeed { target, .. } => {
                // Arcs advance along the chord; path shape is out of scope.
                let rate = (active.cmd.modal.feed_rate / 60.0).max(1e-9);
                step_toward(&mut self.position, &mut self.velocity, &target, rate, dt_s)
            }
            CanonOp::Dwell { .. } => {
                active.dwell_left -= dt_s;
                active.dwell_left <= 0.0
            }
            CanonOp::SpindleOn { speed, direction } => {
                self.spindle = SpindleStatus { speed, direction };
                true
            }
            CanonOp::SpindleOff => {
                self.spindle = SpindleStatus {
                    speed: 0.0,
                    direction: SpindleDirection::Stopped,
                };
                true
            }
            CanonOp::ToolChange { tool } => {
                tracing::info!(tool, seq = %seq, "tool change");
                true
            }
            CanonOp::SetDigitalOut { index, on } => {
                tracing::debug!(index, on, "digital output");
                true
            }
            CanonOp::Coolant { mist, flood } => {
                tracing::debug!(mist, flood, "coolant");
                true
            }
            CanonOp::ProgramStop | CanonOp::OptionalStop => {
                tracing::info!(seq = %seq, "program stop");
                true
            }
            CanonOp::ProgramEnd => {
                self.program_ended = true;
                self.state = ExecutorState::Idle;
                true
            }
        };
        done.then_some(seq)
    }

    fn raise_fault(&mut self, seq: SeqNo, joint: u8, detail: impl Into<String>) {
        let detail = detail.into();
        self.queue.report_fault(seq, joint, detail);
        self.state = ExecutorState::Faulted;
        self.alarm = ActiveAlarm {
            kind: AlarmKind::ExecutionFault,
            seq,
            joint,
        };
        self.active = None;
        self.velocity = [0.0; MAX_JOINTS];
    }

    fn publish(&mut self) {
        let mut status = MachineStatus {
            spindle: self.spindle,
            commanded: self.commanded_target(),
            completed_seq: self.queue.completed_seq(),
            executing_seq: self.executing_seq(),
            executor_state: self.state,
            alarm: self.alarm,
            cycle_count: self.stats.cycle_count,
            ..MachineStatus::default()
        };
        for i in 0..MAX_JOINTS {
            let joint = &mut status.joints[i];
            joint.position = self.position.coords[i];
            joint.velocity = self.velocity[i];
            joint.flags = JointFlags::HOMED;
            if self.velocity[i] != 0.0 {
                joint.flags |= JointFlags::MOVING;
            }
            if self.alarm.kind == AlarmKind::ExecutionFault && self.alarm.joint == i as u8 {
                joint.flags |= JointFlags::FAULT;
            }
        }
        self.status.publish(&status);
    }

    fn commanded_target(&self) -> Position {
        match self.active.as_ref().map(|a| a.cmd.op) {
            Some(CanonOp::StraightTraverse { target })
            | Some(CanonOp::StraightFeed { target })
            | Some(CanonOp::ArcFeed { target, .. }) => target,
            _ => self.position,
        }
    }
}

/// Move `position` toward `target` by `rate * dt`, updating per-joint
/// velocities. True when the target is reached.
fn step_toward(
    position: &mut Position,
    velocity: &mut [f64; MAX_JOINTS],
    target: &Position,
    rate: f64,
    dt_s: f64,
) -> bool {
    let mut dist_sq = 0.0;
    for i in 0..MAX_JOINTS {
        let d = target.coords[i] - position.coords[i];
        dist_sq += d * d;
    }
    let dist = dist_sq.sqrt();
    let step = rate * dt_s;
    if dist <= step {
        *position = *target;
        *velocity = [0.0; MAX_JOINTS];
        return true;
    }
    for i in 0..MAX_JOINTS {
        let dir = (target.coords[i] - position.coords[i]) / dist;
        position.coords[i] += dir * step;
        velocity[i] = dir * rate;
    }
    false
}

// ─── Time Helpers ───────────────────────────────────────────────────

#[cfg(feature = "rt")]
fn timespec_add_ns(ts: nix::sys::time::TimeSpec, ns: i64) -> nix::sys::time::TimeSpec {
    use nix::sys::time::TimeSpec;
    let mut secs = ts.tv_sec();
    let mut nanos = ts.tv_nsec() + ns;
    while nanos >= 1_000_000_000 {
        secs += 1;
        nanos -= 1_000_000_000;
    }
    while nanos < 0 {
        secs -= 1;
        nanos += 1_000_000_000;
    }
    TimeSpec::new(secs, nanos)
}

#[cfg(feature = "rt")]
fn timespec_diff_ns(a: &nix::sys::time::TimeSpec, b: &nix::sys::time::TimeSpec) -> i64 {
    (a.tv_sec() - b.tv_sec()) * 1_000_000_000 + (a.tv_nsec() - b.tv_nsec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_stats_track_min_max_avg() {
        let mut stats = CycleStats::new();
        assert_eq!(stats.avg_cycle_ns(), 0);

        stats.record(500_000, 1_000);
        stats.record(600_000, 500);
        assert_eq!(stats.cycle_count, 2);
        assert_eq!(stats.min_cycle_ns, 500_000);
        assert_eq!(stats.max_cycle_ns, 600_000);
        assert_eq!(stats.max_latency_ns, 1_000);
        assert_eq!(stats.avg_cycle_ns(), 550_000);
    }

    #[test]
    fn step_toward_reaches_target_exactly() {
        let mut pos = Position::ZERO;
        let mut vel = [0.0; MAX_JOINTS];
        let mut target = Position::ZERO;
        target.coords[0] = 1.0;

        // 10 units/s, 1 ms cycles: 100 cycles to cover 1 unit.
        let mut cycles = 0;
        while !step_toward(&mut pos, &mut vel, &target, 10.0, 0.001) {
            cycles += 1;
            assert!(cycles < 200, "did not converge");
        }
        assert_eq!(pos, target);
        assert_eq!(vel, [0.0; MAX_JOINTS]);
        assert!((99..=101).contains(&cycles));
    }

    #[test]
    fn rt_setup_is_noop_without_feature() {
        #[cfg(not(feature = "rt"))]
        assert!(rt_setup(0, 80).is_ok());
    }
}
