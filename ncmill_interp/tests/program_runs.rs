//! End-to-end interpreter runs over realistic programs.

use ncmill_common::error::{InterpError, InterpErrorKind, NcError};
use ncmill_common::types::{Axis, Position, SeqNo};

use ncmill_interp::emit::CanonOp;
use ncmill_interp::modal::{DistanceMode, MotionMode, Units};
use ncmill_interp::{CanonicalCommand, Interpreter, Program};

fn run(src: &str) -> Vec<CanonicalCommand> {
    Interpreter::new(Program::from_text("test", src))
        .unwrap()
        .run_to_end()
        .unwrap()
}

fn motion_targets(cmds: &[CanonicalCommand]) -> Vec<Position> {
    cmds.iter()
        .filter_map(|c| match c.op {
            CanonOp::StraightTraverse { target } | CanonOp::StraightFeed { target } => Some(target),
            CanonOp::ArcFeed { target, .. } => Some(target),
            _ => None,
        })
        .collect()
}

/// A small facing program: the command stream must come out in source
/// order with gap-free sequence numbers and self-consistent snapshots.
#[test]
fn facing_program_end_to_end() {
    let src = "\
(MSG, facing pass)
G21 G90 G17
T1 M6
M3 S8000
G0 X0 Y0 Z5
G1 Z-0.5 F120
G1 X50 F300
G0 Z5
M5
M2";
    let cmds = run(src);

    // Gap-free, strictly increasing numbering starting at 1.
    for (i, cmd) in cmds.iter().enumerate() {
        assert_eq!(cmd.seq, SeqNo(i as u64 + 1));
    }
    // Source order is preserved.
    let lines: Vec<u32> = cmds.iter().map(|c| c.line).collect();
    let mut sorted = lines.clone();
    sorted.sort_unstable();
    assert_eq!(lines, sorted);

    assert!(matches!(cmds[0].op, CanonOp::ToolChange { tool: 1 }));
    assert!(matches!(cmds[1].op, CanonOp::SpindleOn { .. }));
    assert!(matches!(cmds.last().unwrap().op, CanonOp::ProgramEnd));

    // Every snapshot carries the units and distance mode set up front.
    for cmd in &cmds {
        assert_eq!(cmd.modal.units, Units::Millimeters);
        assert_eq!(cmd.modal.distance, DistanceMode::Absolute);
    }

    let targets = motion_targets(&cmds);
    assert_eq!(targets.len(), 4);
    assert_eq!(targets[3].get(Axis::Z), 5.0);
    assert_eq!(targets[3].get(Axis::X), 50.0); // X held from the feed move.
}

/// A syntax error stops the run at the offending line; commands from
/// earlier lines were already handed out and stay valid.
#[test]
fn syntax_error_preserves_position_and_prior_commands() {
    let src = "\
G0 X1
G0 X2
G1 X3 X4 F100
G0 X5
M2";
    let mut interp = Interpreter::new(Program::from_text("test", src)).unwrap();
    interp.start().unwrap();

    let mut delivered = Vec::new();
    let err = loop {
        match interp.next_commands() {
            Ok(Some(cmds)) => delivered.extend(cmds),
            Ok(None) => panic!("expected the run to fail"),
            Err(e) => break e,
        }
    };

    match err {
        NcError::Syntax(e) => {
            assert_eq!(e.line, 3);
            assert!(e.detail.contains("repeated"));
        }
        other => panic!("expected syntax error, got {other:?}"),
    }
    assert_eq!(delivered.len(), 2);
    assert_eq!(delivered[1].seq, SeqNo(2));
    assert!(interp.last_error().is_some());

    // Nothing more comes out without a reset.
    assert!(matches!(
        interp.next_commands(),
        Err(NcError::Interp(InterpError {
            kind: InterpErrorKind::NotRunning,
            ..
        }))
    ));
}

/// Subroutine bodies see their own modal state and locals; both are
/// restored at return, and commands emitted inside the body still get
/// globally sequential numbers.
#[test]
fn subroutine_numbering_and_modal_restore() {
    let src = "\
O200 sub
G91
G0 X#1
O200 return
G0 X999
O200 endsub
G90 G0 X10
O200 call [5]
G0 X20
M2";
    let cmds = run(src);

    // Main rapid, body rapid (incremental), main rapid, program end.
    assert_eq!(cmds.len(), 4);
    assert_eq!(
        cmds.iter().map(|c| c.seq.0).collect::<Vec<_>>(),
        vec![1, 2, 3, 4]
    );
    assert_eq!(cmds[1].modal.distance, DistanceMode::Incremental);
    // The body moved incrementally from X10 to X15.
    let targets = motion_targets(&cmds);
    assert_eq!(targets[1].get(Axis::X), 15.0);
    // Caller's absolute mode is back for the post-call move.
    assert_eq!(cmds[2].modal.distance, DistanceMode::Absolute);
    assert_eq!(targets[2].get(Axis::X), 20.0);
}

/// Parameters drive geometry through expressions, loops and canned
/// cycles together: a parameterized hole row.
#[test]
fn parameterized_hole_row() {
    let src = "\
#1 = 4        (hole count)
#2 = 10       (pitch)
#3 = 0        (index)
F150
G0 X0 Y0 Z5
O1 while [#3 LT #1]
G99 G81 X[#3 * #2] Y0 Z-2 R1
#3 = [#3 + 1]
O1 endwhile
M2";
    let cmds = run(src);
    let bottoms: Vec<f64> = cmds
        .iter()
        .filter_map(|c| match c.op {
            CanonOp::StraightFeed { target } => Some(target.get(Axis::X)),
            _ => None,
        })
        .collect();
    assert_eq!(bottoms, vec![0.0, 10.0, 20.0, 30.0]);
    for c in &cmds {
        assert!(c.modal.motion != MotionMode::Linear || c.modal.feed_rate > 0.0);
    }
}

/// Canonical commands survive serialization: the wire form the status
/// bridge ships must reproduce the command exactly.
#[test]
fn canonical_command_serde_round_trip() {
    let cmds = run("G21 G90\nM3 S500\nG0 X1 Y2 Z3\nG1 X4 F100\nM2");
    for cmd in cmds {
        let json = serde_json::to_string(&cmd).unwrap();
        let back: CanonicalCommand = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cmd);
    }
}

/// Expression and parameter semantics over a whole line: values read
/// before any assignment of the same line applies.
#[test]
fn read_then_set_across_one_line() {
    let src = "\
#10 = 2
G0 X[#10 * 3] Y#10
#10 = 100
G0 X#10
M2";
    let cmds = run(src);
    let targets = motion_targets(&cmds);
    assert_eq!(targets[0].get(Axis::X), 6.0);
    assert_eq!(targets[0].get(Axis::Y), 2.0);
    assert_eq!(targets[1].get(Axis::X), 100.0);
}

/// Undefined parameter reads are semantic errors carrying the line.
#[test]
fn undefined_parameter_reports_line() {
    let err = Interpreter::new(Program::from_text("t", "G0 X1\nG0 X#777\nM2"))
        .unwrap()
        .run_to_end()
        .unwrap_err();
    assert!(matches!(
        err,
        NcError::Interp(InterpError {
            line: 2,
            kind: InterpErrorKind::UndefinedParameter { number: 777 },
        })
    ));
}
