//! Bounded command queue across the real-time boundary.
//!
//! Single producer (the interpreter feed), single consumer (the
//! trajectory executor). Fixed-capacity ring allocated up front; the
//! two sides coordinate through atomic positions only — no lock is ever
//! taken on the enqueue/dispatch/complete paths.
//!
//! Capacity counts *unacknowledged* entries: a slot is freed by
//! `complete(seq)`, not by dispatch, so the look-ahead depth bounds
//! everything the producer is ahead of the machine, exactly.
//!
//! `Busy` is flow control, not an error. A reported execution fault or
//! an abort flips the queue phase; the producer's next enqueue fails
//! before it can hand over another command.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ncmill_common::error::{NcError, NcResult};
use ncmill_common::types::SeqNo;
use ncmill_interp::CanonicalCommand;

// ─── Entry Lifecycle ────────────────────────────────────────────────

/// Lifecycle of one queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EntryState {
    /// Slot is free.
    Empty = 0,
    /// Accepted from the producer, not yet handed to the executor.
    Queued = 1,
    /// Handed to the executor.
    Dispatched = 2,
    /// The executor is acting on it.
    Executing = 3,
    /// Acknowledged; slot about to be reused.
    Completed = 4,
    /// Drained by an abort.
    Aborted = 5,
}

impl EntryState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => EntryState::Queued,
            2 => EntryState::Dispatched,
            3 => EntryState::Executing,
            4 => EntryState::Completed,
            5 => EntryState::Aborted,
            _ => EntryState::Empty,
        }
    }
}

/// Result of a non-blocking enqueue attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    /// The command was accepted.
    Accepted,
    /// The queue is at look-ahead depth. Try again after a completion.
    Busy,
}

// ─── Queue Phase ────────────────────────────────────────────────────

const PHASE_ACTIVE: u8 = 0;
const PHASE_ABORTED: u8 = 1;
const PHASE_FAULTED: u8 = 2;

// ─── Shared Ring ────────────────────────────────────────────────────

struct Slot {
    state: AtomicU8,
    cmd: UnsafeCell<MaybeUninit<CanonicalCommand>>,
}

struct Shared {
    slots: Box<[Slot]>,
    depth: u64,
    /// Total commands ever accepted (producer-owned, consumer-read).
    enqueue_pos: AtomicU64,
    /// Total commands ever dispatched (consumer-owned).
    dispatch_pos: AtomicU64,
    /// Total commands ever completed; frees capacity (consumer-owned,
    /// producer-read).
    complete_pos: AtomicU64,
    phase: AtomicU8,
    last_enqueued: AtomicU64,
    last_dispatched: AtomicU64,
    completed_seq: AtomicU64,
    /// The fault that froze the queue. Cold path only: written once on
    /// fault, read by the producer after its enqueue is refused.
    fault: Mutex<Option<NcError>>,
}

// SAFETY: slot payloads are only touched under the position protocol:
// the producer writes cmd before publishing via enqueue_pos (Release),
// the consumer reads it after observing enqueue_pos (Acquire) and
// before advancing complete_pos. A slot is never written and read
// concurrently because capacity counts unacknowledged entries.
unsafe impl Send for Shared {}
unsafe impl Sync for Shared {}

impl Shared {
    fn in_flight(&self) -> u64 {
        self.enqueue_pos.load(Ordering::Acquire) - self.complete_pos.load(Ordering::Acquire)
    }
}

/// Create a command queue with the given look-ahead depth (minimum 1).
pub fn channel(depth: usize) -> (CommandProducer, CommandConsumer) {
    let depth = depth.max(1);
    let slots = (0..depth)
        .map(|_| Slot {
            state: AtomicU8::new(EntryState::Empty as u8),
            cmd: UnsafeCell::new(MaybeUninit::uninit()),
        })
        .collect::<Vec<_>>()
        .into_boxed_slice();
    let shared = Arc::new(Shared {
        slots,
        depth: depth as u64,
        enqueue_pos: AtomicU64::new(0),
        dispatch_pos: AtomicU64::new(0),
        complete_pos: AtomicU64::new(0),
        phase: AtomicU8::new(PHASE_ACTIVE),
        last_enqueued: AtomicU64::new(0),
        last_dispatched: AtomicU64::new(0),
        completed_seq: AtomicU64::new(0),
        fault: Mutex::new(None),
    });
    (
        CommandProducer {
            shared: Arc::clone(&shared),
        },
        CommandConsumer { shared },
    )
}

// ─── Producer ───────────────────────────────────────────────────────

/// The enqueue side. Exactly one exists per queue; not `Clone`.
pub struct CommandProducer {
    shared: Arc<Shared>,
}

impl CommandProducer {
    /// Attempt to enqueue without blocking.
    ///
    /// `Busy` at look-ahead depth. Fails on an aborted or faulted
    /// queue, and on a sequence number that is not strictly greater
    /// than the last accepted one.
    pub fn try_enqueue(&mut self, cmd: CanonicalCommand) -> NcResult<Enqueue> {
        let s = &*self.shared;
        match s.phase.load(Ordering::Acquire) {
            PHASE_ABORTED => return Err(NcError::QueueAborted),
            PHASE_FAULTED => return Err(self.fault_error()),
            _ => {}
        }
        let last = s.last_enqueued.load(Ordering::Relaxed);
        if cmd.seq.0 <= last {
            return Err(NcError::SequenceOrder {
                last: SeqNo(last),
                got: cmd.seq,
            });
        }
        let pos = s.enqueue_pos.load(Ordering::Relaxed);
        if pos - s.complete_pos.load(Ordering::Acquire) >= s.depth {
            return Ok(Enqueue::Busy);
        }
        let slot = &s.slots[(pos % s.depth) as usize];
        // SAFETY: this slot is free (pos - complete_pos < depth) and the
        // consumer cannot observe it until enqueue_pos is advanced below.
        unsafe { (*slot.cmd.get()).write(cmd) };
        slot.state.store(EntryState::Queued as u8, Ordering::Release);
        s.last_enqueued.store(cmd.seq.0, Ordering::Relaxed);
        s.enqueue_pos.store(pos + 1, Ordering::Release);
        Ok(Enqueue::Accepted)
    }

    /// Enqueue, parking cooperatively while the queue is full.
    ///
    /// Raises `StallAlarm` once `Busy` has persisted past
    /// `stall_alarm`; the queue itself stays usable, so the caller may
    /// surface the alarm and retry.
    pub fn enqueue_blocking(
        &mut self,
        cmd: CanonicalCommand,
        stall_alarm: Duration,
    ) -> NcResult<()> {
        let start = Instant::now();
        loop {
            match self.try_enqueue(cmd)? {
                Enqueue::Accepted => return Ok(()),
                Enqueue::Busy => {
                    let waited = start.elapsed();
                    if waited >= stall_alarm {
                        tracing::warn!(seq = %cmd.seq, waited_ms = waited.as_millis() as u64, "enqueue stalled");
                        return Err(NcError::StallAlarm {
                            seq: cmd.seq,
                            waited_ms: waited.as_millis() as u64,
                        });
                    }
                    std::thread::sleep(Duration::from_micros(100));
                }
            }
        }
    }

    /// Highest completed sequence number, as published by the consumer.
    pub fn completed_seq(&self) -> SeqNo {
        SeqNo(self.shared.completed_seq.load(Ordering::Acquire))
    }

    /// Unacknowledged entries currently held.
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight() as usize
    }

    /// Look-ahead depth.
    pub fn depth(&self) -> usize {
        self.shared.depth as usize
    }

    /// Abort the queue: refuse new entries, let the consumer drain.
    /// Idempotent.
    pub fn abort(&self) {
        abort_shared(&self.shared);
    }

    /// True once `abort` has taken effect.
    pub fn is_aborted(&self) -> bool {
        self.shared.phase.load(Ordering::Acquire) == PHASE_ABORTED
    }

    /// The fault that froze the queue, if any.
    pub fn fault(&self) -> Option<NcError> {
        match self.shared.fault.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Re-activate an aborted queue once the consumer has drained it.
    /// Returns false while entries are still in flight.
    pub fn reset(&mut self) -> bool {
        let s = &*self.shared;
        if s.phase.load(Ordering::Acquire) == PHASE_ACTIVE {
            return true;
        }
        if s.in_flight() != 0 {
            return false;
        }
        if let Ok(mut guard) = s.fault.lock() {
            *guard = None;
        }
        s.phase.store(PHASE_ACTIVE, Ordering::Release);
        true
    }

    fn fault_error(&self) -> NcError {
        self.fault().unwrap_or(NcError::QueueAborted)
    }
}

// ─── Consumer ───────────────────────────────────────────────────────

/// The dispatch side. Exactly one exists per queue; not `Clone`.
pub struct CommandConsumer {
    shared: Arc<Shared>,
}

impl CommandConsumer {
    /// Hand out the next command in strict sequence order.
    ///
    /// `Ok(None)` when the queue is empty, faulted or aborted. A gap in
    /// sequence numbers (which the enqueue protocol should make
    /// impossible) is reported as `SequenceOrder`.
    pub fn dispatch_next(&mut self) -> NcResult<Option<CanonicalCommand>> {
        let s = &*self.shared;
        match s.phase.load(Ordering::Acquire) {
            PHASE_ABORTED => {
                self.drain_aborted();
                return Ok(None);
            }
            PHASE_FAULTED => return Ok(None),
            _ => {}
        }
        let pos = s.dispatch_pos.load(Ordering::Relaxed);
        if pos == s.enqueue_pos.load(Ordering::Acquire) {
            return Ok(None);
        }
        let slot = &s.slots[(pos % s.depth) as usize];
        // SAFETY: enqueue_pos (Acquire) made the producer's write to
        // this slot visible, and the producer cannot reuse it before
        // complete_pos passes it.
        let cmd = unsafe { (*slot.cmd.get()).assume_init() };
        let last = s.last_dispatched.load(Ordering::Relaxed);
        if last != 0 && cmd.seq.0 != last + 1 {
            return Err(NcError::SequenceOrder {
                last: SeqNo(last),
                got: cmd.seq,
            });
        }
        slot.state
            .store(EntryState::Dispatched as u8, Ordering::Release);
        s.last_dispatched.store(cmd.seq.0, Ordering::Relaxed);
        s.dispatch_pos.store(pos + 1, Ordering::Release);
        Ok(Some(cmd))
    }

    /// Mark the most recently dispatched entry as actively executing.
    pub fn mark_executing(&mut self, seq: SeqNo) {
        let s = &*self.shared;
        let pos = s.dispatch_pos.load(Ordering::Relaxed);
        if pos == 0 {
            return;
        }
        let slot = &s.slots[((pos - 1) % s.depth) as usize];
        // SAFETY: the consumer owns dispatched slots until completion.
        let slot_seq = unsafe { (*slot.cmd.get()).assume_init_ref().seq };
        if slot_seq == seq {
            slot.state
                .store(EntryState::Executing as u8, Ordering::Release);
        }
    }

    /// Acknowledge the oldest in-flight command, freeing its slot and
    /// publishing the new highest-completed sequence number.
    ///
    /// Completions are strictly in order; anything else is a
    /// `SequenceOrder` error.
    pub fn complete(&mut self, seq: SeqNo) -> NcResult<()> {
        let s = &*self.shared;
        let pos = s.complete_pos.load(Ordering::Relaxed);
        if pos == s.dispatch_pos.load(Ordering::Relaxed) {
            return Err(NcError::SequenceOrder {
                last: SeqNo(s.completed_seq.load(Ordering::Relaxed)),
                got: seq,
            });
        }
        let slot = &s.slots[(pos % s.depth) as usize];
        // SAFETY: oldest in-flight slot; producer cannot touch it yet.
        let slot_seq = unsafe { (*slot.cmd.get()).assume_init_ref().seq };
        if slot_seq != seq {
            return Err(NcError::SequenceOrder {
                last: SeqNo(s.completed_seq.load(Ordering::Relaxed)),
                got: seq,
            });
        }
        slot.state
            .store(EntryState::Completed as u8, Ordering::Release);
        s.completed_seq.store(seq.0, Ordering::Release);
        s.complete_pos.store(pos + 1, Ordering::Release);
        Ok(())
    }

    /// Report an execution fault against `seq`. Freezes the queue: the
    /// producer's next enqueue fails with this fault.
    pub fn report_fault(&mut self, seq: SeqNo, joint: u8, detail: impl Into<String>) {
        let err = NcError::ExecutionFault {
            seq,
            joint,
            detail: detail.into(),
        };
        tracing::error!(%err, "execution fault reported");
        if let Ok(mut guard) = self.shared.fault.lock() {
            *guard = Some(err);
        }
        self.shared.phase.store(PHASE_FAULTED, Ordering::Release);
    }

    /// Abort the queue. Idempotent; the next `dispatch_next` drains the
    /// remaining entries as `Aborted`.
    pub fn abort(&self) {
        abort_shared(&self.shared);
    }

    /// True once `abort` has taken effect.
    pub fn is_aborted(&self) -> bool {
        self.shared.phase.load(Ordering::Acquire) == PHASE_ABORTED
    }

    /// Highest completed sequence number.
    pub fn completed_seq(&self) -> SeqNo {
        SeqNo(self.shared.completed_seq.load(Ordering::Acquire))
    }

    /// Unacknowledged entries currently held.
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight() as usize
    }

    /// Lifecycle state of the entry holding `seq`, if it is in flight.
    pub fn entry_state(&self, seq: SeqNo) -> Option<EntryState> {
        let s = &*self.shared;
        let from = s.complete_pos.load(Ordering::Acquire);
        let to = s.enqueue_pos.load(Ordering::Acquire);
        for pos in from..to {
            let slot = &s.slots[(pos % s.depth) as usize];
            // SAFETY: in-flight slots hold initialized commands.
            let slot_seq = unsafe { (*slot.cmd.get()).assume_init_ref().seq };
            if slot_seq == seq {
                return Some(EntryState::from_u8(slot.state.load(Ordering::Acquire)));
            }
        }
        None
    }

    /// Drop everything still queued or dispatched, marking it Aborted.
    /// Consumer-side half of `abort`.
    fn drain_aborted(&mut self) {
        let s = &*self.shared;
        let from = s.complete_pos.load(Ordering::Relaxed);
        let to = s.enqueue_pos.load(Ordering::Acquire);
        for pos in from..to {
            let slot = &s.slots[(pos % s.depth) as usize];
            slot.state
                .store(EntryState::Aborted as u8, Ordering::Release);
        }
        s.dispatch_pos.store(to, Ordering::Release);
        s.complete_pos.store(to, Ordering::Release);
    }
}

fn abort_shared(shared: &Shared) {
    let prev = shared.phase.swap(PHASE_ABORTED, Ordering::AcqRel);
    if prev != PHASE_ABORTED {
        tracing::warn!(in_flight = shared.in_flight(), "command queue aborted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ncmill_interp::emit::CanonOp;
    use ncmill_interp::ModalState;

    fn cmd(seq: u64) -> CanonicalCommand {
        CanonicalCommand {
            seq: SeqNo(seq),
            line: seq as u32,
            modal: ModalState::new().snapshot(),
            op: CanonOp::Dwell { seconds: 0.0 },
        }
    }

    #[test]
    fn enqueue_dispatch_complete_round() {
        let (mut tx, mut rx) = channel(4);
        assert_eq!(tx.try_enqueue(cmd(1)).unwrap(), Enqueue::Accepted);
        assert_eq!(tx.try_enqueue(cmd(2)).unwrap(), Enqueue::Accepted);
        assert_eq!(tx.in_flight(), 2);

        let a = rx.dispatch_next().unwrap().unwrap();
        assert_eq!(a.seq, SeqNo(1));
        assert_eq!(rx.entry_state(SeqNo(1)), Some(EntryState::Dispatched));
        rx.mark_executing(SeqNo(1));
        assert_eq!(rx.entry_state(SeqNo(1)), Some(EntryState::Executing));

        // Dispatch does not free capacity.
        assert_eq!(tx.in_flight(), 2);
        rx.complete(SeqNo(1)).unwrap();
        assert_eq!(tx.in_flight(), 1);
        assert_eq!(tx.completed_seq(), SeqNo(1));
    }

    #[test]
    fn busy_at_depth_nothing_dropped() {
        let (mut tx, mut rx) = channel(3);
        for i in 1..=3 {
            assert_eq!(tx.try_enqueue(cmd(i)).unwrap(), Enqueue::Accepted);
        }
        // Depth reached: the fourth is refused, not dropped.
        assert_eq!(tx.try_enqueue(cmd(4)).unwrap(), Enqueue::Busy);

        // Dispatch alone does not help; only completion frees a slot.
        let first = rx.dispatch_next().unwrap().unwrap();
        assert_eq!(tx.try_enqueue(cmd(4)).unwrap(), Enqueue::Busy);
        rx.complete(first.seq).unwrap();
        assert_eq!(tx.try_enqueue(cmd(4)).unwrap(), Enqueue::Accepted);

        // Everything comes out in order, nothing lost.
        let mut seqs = Vec::new();
        while let Some(c) = rx.dispatch_next().unwrap() {
            seqs.push(c.seq.0);
            rx.complete(c.seq).unwrap();
        }
        assert_eq!(seqs, vec![2, 3, 4]);
    }

    #[test]
    fn non_monotonic_sequence_rejected() {
        let (mut tx, _rx) = channel(4);
        tx.try_enqueue(cmd(5)).unwrap();
        let err = tx.try_enqueue(cmd(5)).unwrap_err();
        assert!(matches!(
            err,
            NcError::SequenceOrder {
                last: SeqNo(5),
                got: SeqNo(5),
            }
        ));
        assert!(tx.try_enqueue(cmd(3)).is_err());
        // Gapped but increasing is accepted at enqueue.
        assert_eq!(tx.try_enqueue(cmd(6)).unwrap(), Enqueue::Accepted);
    }

    #[test]
    fn out_of_order_completion_rejected() {
        let (mut tx, mut rx) = channel(4);
        tx.try_enqueue(cmd(1)).unwrap();
        tx.try_enqueue(cmd(2)).unwrap();
        rx.dispatch_next().unwrap();
        rx.dispatch_next().unwrap();
        assert!(rx.complete(SeqNo(2)).is_err());
        rx.complete(SeqNo(1)).unwrap();
        rx.complete(SeqNo(2)).unwrap();
    }

    #[test]
    fn fault_freezes_producer_before_next_enqueue() {
        let (mut tx, mut rx) = channel(8);
        tx.try_enqueue(cmd(1)).unwrap();
        let c = rx.dispatch_next().unwrap().unwrap();
        rx.report_fault(c.seq, 2, "following error");

        // Consumer dispatches nothing further.
        tx.try_enqueue(cmd(2)).unwrap_err();
        let err = tx.try_enqueue(cmd(3)).unwrap_err();
        match err {
            NcError::ExecutionFault { seq, joint, .. } => {
                assert_eq!(seq, SeqNo(1));
                assert_eq!(joint, 2);
            }
            other => panic!("expected execution fault, got {other:?}"),
        }
        assert!(rx.dispatch_next().unwrap().is_none());
    }

    #[test]
    fn abort_is_idempotent_and_drains() {
        let (mut tx, mut rx) = channel(4);
        for i in 1..=3 {
            tx.try_enqueue(cmd(i)).unwrap();
        }
        tx.abort();
        tx.abort();
        rx.abort();
        assert!(tx.is_aborted());

        assert!(matches!(tx.try_enqueue(cmd(4)), Err(NcError::QueueAborted)));
        // The consumer's next poll drains the leftovers.
        assert!(rx.dispatch_next().unwrap().is_none());
        assert_eq!(rx.in_flight(), 0);

        // Reset re-activates; sequence numbering continues.
        assert!(tx.reset());
        assert_eq!(tx.try_enqueue(cmd(4)).unwrap(), Enqueue::Accepted);
    }

    #[test]
    fn reset_refuses_while_in_flight() {
        let (mut tx, mut rx) = channel(4);
        tx.try_enqueue(cmd(1)).unwrap();
        tx.abort();
        // Consumer has not drained yet.
        assert!(!tx.reset());
        rx.dispatch_next().unwrap();
        assert!(tx.reset());
    }

    #[test]
    fn enqueue_blocking_raises_stall_alarm() {
        let (mut tx, _rx) = channel(1);
        tx.try_enqueue(cmd(1)).unwrap();
        let err = tx
            .enqueue_blocking(cmd(2), Duration::from_millis(20))
            .unwrap_err();
        match err {
            NcError::StallAlarm { seq, waited_ms } => {
                assert_eq!(seq, SeqNo(2));
                assert!(waited_ms >= 20);
            }
            other => panic!("expected stall alarm, got {other:?}"),
        }
        // The alarm is advisory: the queue still works after a drain.
        assert_eq!(tx.in_flight(), 1);
    }

    #[test]
    fn enqueue_blocking_succeeds_once_capacity_frees() {
        let (mut tx, mut rx) = channel(1);
        tx.try_enqueue(cmd(1)).unwrap();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            let c = rx.dispatch_next().unwrap().unwrap();
            rx.complete(c.seq).unwrap();
            rx
        });
        tx.enqueue_blocking(cmd(2), Duration::from_secs(2)).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn cross_thread_ordering_under_load() {
        let depth = 8;
        let total = 500u64;
        let (mut tx, mut rx) = channel(depth);
        let consumer = std::thread::spawn(move || {
            let mut seen = Vec::new();
            while (seen.len() as u64) < total {
                if let Some(c) = rx.dispatch_next().unwrap() {
                    seen.push(c.seq.0);
                    rx.complete(c.seq).unwrap();
                } else {
                    std::thread::yield_now();
                }
            }
            seen
        });
        for i in 1..=total {
            tx.enqueue_blocking(cmd(i), Duration::from_secs(5)).unwrap();
            assert!(tx.in_flight() <= depth);
        }
        let seen = consumer.join().unwrap();
        assert_eq!(seen, (1..=total).collect::<Vec<_>>());
    }
}
