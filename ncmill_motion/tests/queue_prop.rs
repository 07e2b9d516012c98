//! Property tests for the command queue: under arbitrary interleavings
//! of producer and consumer steps the queue never holds more than its
//! look-ahead depth, hands commands out strictly in order, and loses
//! nothing.

use proptest::prelude::*;

use ncmill_common::types::SeqNo;
use ncmill_interp::emit::CanonOp;
use ncmill_interp::{CanonicalCommand, ModalState};
use ncmill_motion::{channel, Enqueue};

fn cmd(seq: u64) -> CanonicalCommand {
    CanonicalCommand {
        seq: SeqNo(seq),
        line: seq as u32,
        modal: ModalState::new().snapshot(),
        op: CanonOp::Dwell { seconds: 0.0 },
    }
}

proptest! {
    /// Replay a random schedule of {enqueue, dispatch, complete} steps
    /// and check the capacity and ordering invariants after every one.
    #[test]
    fn depth_never_exceeded_under_interleaving(
        depth in 1usize..16,
        steps in proptest::collection::vec(0u8..3, 1..400),
    ) {
        let (mut tx, mut rx) = channel(depth);
        let mut next_seq = 1u64;
        let mut dispatched: Vec<u64> = Vec::new();
        let mut last_dispatched = 0u64;
        let mut completed = 0u64;

        for step in steps {
            match step {
                0 => match tx.try_enqueue(cmd(next_seq)).unwrap() {
                    Enqueue::Accepted => next_seq += 1,
                    Enqueue::Busy => {
                        // Busy only ever fires at exactly depth.
                        prop_assert_eq!(tx.in_flight(), depth);
                    }
                },
                1 => {
                    if let Some(c) = rx.dispatch_next().unwrap() {
                        prop_assert_eq!(c.seq.0, last_dispatched + 1);
                        last_dispatched = c.seq.0;
                        dispatched.push(c.seq.0);
                    }
                }
                _ => {
                    if let Some(&oldest) = dispatched.first() {
                        rx.complete(SeqNo(oldest)).unwrap();
                        dispatched.remove(0);
                        prop_assert_eq!(oldest, completed + 1);
                        completed = oldest;
                        prop_assert_eq!(rx.completed_seq().0, completed);
                    }
                }
            }
            prop_assert!(tx.in_flight() <= depth);
        }

        // Drain what remains; the tail must continue the sequence.
        for &seq in &dispatched {
            rx.complete(SeqNo(seq)).unwrap();
        }
        while let Some(c) = rx.dispatch_next().unwrap() {
            prop_assert_eq!(c.seq.0, last_dispatched + 1);
            last_dispatched = c.seq.0;
            rx.complete(c.seq).unwrap();
        }
        prop_assert_eq!(rx.completed_seq().0, next_seq - 1);
        prop_assert_eq!(rx.in_flight(), 0);
    }

    /// Cross-thread version: a real consumer thread, the producer
    /// blocking at depth. Nothing is dropped or reordered.
    #[test]
    fn cross_thread_depth_and_order(
        depth in 1usize..8,
        total in 1u64..120,
    ) {
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
            tx.enqueue_blocking(cmd(i), std::time::Duration::from_secs(10)).unwrap();
            prop_assert!(tx.in_flight() <= depth);
        }
        let seen = consumer.join().unwrap();
        prop_assert_eq!(seen, (1..=total).collect::<Vec<_>>());
    }
}
