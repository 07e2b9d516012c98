//! The interpreter proper: block-by-block execution of an NC program.
//!
//! For each non-empty block the interpreter (1) layers the block's words
//! over the live modal state, (2) runs O-word control flow against an
//! explicit frame stack, (3) checks legality (modal group conflicts,
//! feed-rate presence, context rules), (4) commits the block's modal
//! changes and (5) emits zero or more canonical commands through the
//! sequence-stamping emitter.
//!
//! Subroutine calls save the full modal state and the local parameter
//! range on the frame stack; `return`/`endsub` restores both, so a
//! subroutine can never leak modal changes into its caller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ncmill_common::config::NcConfig;
use ncmill_common::consts::MAX_CALL_DEPTH;
use ncmill_common::error::{InterpError, InterpErrorKind, NcError, NcResult};
use ncmill_common::status::SpindleDirection;
use ncmill_common::types::{Axis, Position, SeqNo};

use crate::block::{parse_block, Block, ControlKind, ControlWord, ParseFailure};
use crate::emit::{plane_axes, ArcTurn, CanonOp, CanonicalCommand, Emitter};
use crate::modal::{CutterComp, DistanceMode, ModalState, MotionMode, Plane, RetractMode, Units};
use crate::param::ParamTable;
use crate::program::{Cursor, Program};
use crate::state::{InterpEvent, InterpState, InterpStateMachine, TransitionResult};

// ─── Control-Flow Frames ────────────────────────────────────────────

/// One entry on the interpreter's control-flow stack.
#[derive(Debug)]
enum Frame {
    /// Active subroutine call.
    Sub {
        label: u32,
        /// Line to resume at after return.
        return_line: u32,
        /// Caller's modal state, restored on return.
        saved_modal: Box<ModalState>,
        /// Caller's local parameter range (#1..=#30).
        saved_locals: Vec<(u32, Option<f64>)>,
    },
    /// Inside the taken branch of a conditional.
    If { label: u32 },
    /// Inside a loop body.
    While { label: u32, line: u32 },
}

/// A subroutine definition found by the pre-scan.
#[derive(Debug, Clone, Copy)]
struct SubDef {
    /// First line of the body.
    body_start: u32,
    /// Line of the `endsub`.
    endsub: u32,
}

// ─── Interpreter ────────────────────────────────────────────────────

/// RS274 interpreter for one program run.
#[derive(Debug)]
pub struct Interpreter {
    cursor: Cursor,
    params: ParamTable,
    modal: ModalState,
    emitter: Emitter,
    machine: InterpStateMachine,
    stack: Vec<Frame>,
    subs: HashMap<u32, SubDef>,
    /// Predicted machine position after the last emitted motion.
    position: Position,
    abort: Arc<AtomicBool>,
    /// When false, interpreter errors are resumable via [`clear_error`].
    ///
    /// [`clear_error`]: Interpreter::clear_error
    error_fatal: bool,
    semicolon_comments: bool,
    last_error: Option<NcError>,
}

impl Interpreter {
    /// Build an interpreter with default options (errors fatal,
    /// semicolon comments enabled).
    pub fn new(program: Program) -> NcResult<Self> {
        Self::with_options(program, true, true)
    }

    /// Build an interpreter from the runtime configuration.
    pub fn with_config(program: Program, config: &NcConfig) -> NcResult<Self> {
        Self::with_options(program, config.interp_error_fatal, config.semicolon_comments)
    }

    fn with_options(program: Program, error_fatal: bool, semicolon_comments: bool) -> NcResult<Self> {
        let subs = scan_subroutines(&program)?;
        Ok(Self {
            cursor: program.into_cursor(),
            params: ParamTable::new(),
            modal: ModalState::new(),
            emitter: Emitter::new(),
            machine: InterpStateMachine::new(),
            stack: Vec::new(),
            subs,
            position: Position::ZERO,
            abort: Arc::new(AtomicBool::new(false)),
            error_fatal,
            semicolon_comments,
            last_error: None,
        })
    }

    // ─── Accessors ──────────────────────────────────────────────────

    /// Current lifecycle state.
    pub fn state(&self) -> InterpState {
        self.machine.state()
    }

    /// Predicted machine position after the last emitted motion.
    pub fn position(&self) -> Position {
        self.position
    }

    /// The parameter table (shared with MDI-style callers).
    pub fn params(&self) -> &ParamTable {
        &self.params
    }

    /// Mutable access to the parameter table (tool tables, probing).
    pub fn params_mut(&mut self) -> &mut ParamTable {
        &mut self.params
    }

    /// Last sequence number emitted.
    pub fn last_seq(&self) -> SeqNo {
        self.emitter.last_seq()
    }

    /// The error that stopped interpretation, if any.
    pub fn last_error(&self) -> Option<&NcError> {
        self.last_error.as_ref()
    }

    /// Name of the loaded program.
    pub fn program_name(&self) -> &str {
        self.cursor.program().name()
    }

    /// Seed the predicted position from live machine status before a run.
    pub fn set_start_position(&mut self, position: Position) {
        self.position = position;
    }

    /// Set the offset of a work coordinate system (0 = G54 .. 8 = G59.3).
    pub fn set_coord_offset(&mut self, index: u8, offset: Position) {
        if let Some(slot) = self.modal.coord_offsets.get_mut(index as usize) {
            *slot = offset;
        }
    }

    // ─── Lifecycle ──────────────────────────────────────────────────

    /// Shared abort flag; set it from any thread to stop the run
    /// between blocks.
    pub fn abort_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    /// Request an abort. Observed before the next block is read.
    pub fn request_abort(&self) {
        self.abort.store(true, Ordering::Relaxed);
    }

    /// Feed-hold: pause emission. Returns false if not running.
    pub fn feed_hold(&mut self) -> bool {
        matches!(
            self.machine.handle_event(InterpEvent::FeedHold),
            TransitionResult::Ok(_)
        )
    }

    /// Resume from feed-hold. Returns false if not paused.
    pub fn resume(&mut self) -> bool {
        matches!(
            self.machine.handle_event(InterpEvent::Resume),
            TransitionResult::Ok(_)
        )
    }

    /// Start the loaded program (Idle → Running).
    pub fn start(&mut self) -> NcResult<()> {
        match self.machine.handle_event(InterpEvent::ProgramStart) {
            TransitionResult::Ok(_) => {
                tracing::info!(program = self.program_name(), "program started");
                Ok(())
            }
            TransitionResult::Rejected(reason) => {
                tracing::warn!(reason, "program start rejected");
                Err(ierr(self.cursor.position(), InterpErrorKind::NotRunning))
            }
        }
    }

    /// Clear a resumable error and continue at the next line.
    ///
    /// Returns false when errors are configured fatal or there is no
    /// error to clear.
    pub fn clear_error(&mut self) -> bool {
        if self.error_fatal || self.machine.state() != InterpState::StoppedOnError {
            return false;
        }
        self.machine.handle_event(InterpEvent::Reset);
        self.machine.handle_event(InterpEvent::ProgramStart);
        tracing::warn!(error = ?self.last_error, "error cleared, resuming at next line");
        self.last_error = None;
        true
    }

    /// Full reset: rewind the program, forget modal state, numbering
    /// and control-flow frames. The parameter table survives (work
    /// offsets and tool data persist across runs).
    pub fn reset(&mut self) {
        self.cursor.rewind();
        self.modal = ModalState::new();
        self.emitter.reset();
        self.stack.clear();
        self.position = Position::ZERO;
        self.last_error = None;
        self.abort.store(false, Ordering::Relaxed);
        let _ = self.machine.handle_event(InterpEvent::Reset);
    }

    // ─── Execution ──────────────────────────────────────────────────

    /// Interpret lines until a block emits commands.
    ///
    /// `Ok(Some(cmds))` — one block's commands (possibly empty for a
    /// modal-only block); `Ok(None)` — program ended or was aborted;
    /// `Err` — interpretation halted, state is `StoppedOnError`.
    pub fn next_commands(&mut self) -> NcResult<Option<Vec<CanonicalCommand>>> {
        loop {
            if self.abort.load(Ordering::Relaxed) {
                tracing::warn!(line = self.cursor.position(), "run aborted");
                let _ = self.machine.handle_event(InterpEvent::Reset);
                return Ok(None);
            }
            match self.machine.state() {
                InterpState::Running => {}
                InterpState::Paused => return Ok(Some(Vec::new())),
                InterpState::Ended => return Ok(None),
                InterpState::Idle | InterpState::StoppedOnError => {
                    return Err(ierr(self.cursor.position(), InterpErrorKind::NotRunning));
                }
            }

            let Some((lineno, text)) = self.cursor.next_line() else {
                tracing::warn!("program ended without M2/M30");
                self.machine.handle_event(InterpEvent::ProgramEnd);
                return Ok(None);
            };
            let text = text.to_string();

            let block = match parse_block(&text, lineno, &self.params, self.semicolon_comments) {
                Ok(b) => b,
                Err(failure) => {
                    let err = match failure {
                        ParseFailure::Syntax(e) => NcError::Syntax(e),
                        ParseFailure::UndefinedParameter { number } => {
                            ierr(lineno, InterpErrorKind::UndefinedParameter { number })
                        }
                    };
                    return Err(self.fail(err));
                }
            };

            if let Some(msg) = &block.message {
                tracing::info!(line = lineno, message = %msg, "operator message");
            }
            if let Some(comment) = &block.comment {
                tracing::debug!(line = lineno, comment = %comment);
            }
            if block.is_empty() {
                continue;
            }

            // Assignments apply after the whole line was read; word and
            // condition values above already saw the pre-line table.
            for &(number, value) in &block.assignments {
                self.params.set(number, value);
            }

            if let Some(control) = block.control.clone() {
                if let Err(err) = self.handle_control(lineno, &control) {
                    return Err(self.fail(err));
                }
                continue;
            }
            if block.words.is_empty() {
                continue;
            }

            return match self.execute(&block) {
                Ok(cmds) => Ok(Some(cmds)),
                Err(err) => Err(self.fail(err)),
            };
        }
    }

    /// Run the whole program, forwarding every command to `sink`.
    pub fn run(&mut self, mut sink: impl FnMut(CanonicalCommand) -> NcResult<()>) -> NcResult<()> {
        if self.machine.state() == InterpState::Idle {
            self.start()?;
        }
        while let Some(cmds) = self.next_commands()? {
            for cmd in cmds {
                sink(cmd)?;
            }
            if self.machine.state() == InterpState::Paused {
                return Ok(());
            }
        }
        Ok(())
    }

    /// Run the whole program and collect every command. Test and MDI
    /// convenience.
    pub fn run_to_end(&mut self) -> NcResult<Vec<CanonicalCommand>> {
        let mut out = Vec::new();
        self.run(|cmd| {
            out.push(cmd);
            Ok(())
        })?;
        Ok(out)
    }

    /// Record the error, stop the machine, and hand the error back.
    fn fail(&mut self, err: NcError) -> NcError {
        self.machine.handle_event(InterpEvent::Error);
        self.last_error = Some(err.clone());
        tracing::error!(%err, resumable = !self.error_fatal, "interpretation halted");
        err
    }

    // ─── O-Word Control Flow ────────────────────────────────────────

    fn handle_control(&mut self, lineno: u32, control: &ControlWord) -> NcResult<()> {
        let label = control.label;
        match &control.kind {
            ControlKind::Sub => {
                // Definition encountered in normal flow: skip the body.
                let def = self.subs.get(&label).copied().ok_or_else(|| {
                    ierr(lineno, InterpErrorKind::UndefinedSubroutine { label })
                })?;
                self.cursor.seek(def.endsub + 1);
            }
            ControlKind::EndSub | ControlKind::Return => self.do_return(lineno, label)?,
            ControlKind::Call { args } => self.do_call(lineno, label, args)?,
            ControlKind::If { cond } => {
                if *cond {
                    self.stack.push(Frame::If { label });
                } else {
                    let found = self.find_control(lineno + 1, label, &["else", "endif"]);
                    match found {
                        Some((target, kw)) => {
                            self.cursor.seek(target + 1);
                            if kw == "else" {
                                self.stack.push(Frame::If { label });
                            }
                        }
                        None => {
                            return Err(mismatched(lineno, label, "if"));
                        }
                    }
                }
            }
            ControlKind::Else => {
                // Reached by falling out of the taken branch.
                match self.stack.last() {
                    Some(Frame::If { label: l }) if *l == label => {
                        self.stack.pop();
                        let found = self.find_control(lineno + 1, label, &["endif"]);
                        match found {
                            Some((target, _)) => self.cursor.seek(target + 1),
                            None => return Err(mismatched(lineno, label, "else")),
                        }
                    }
                    _ => return Err(mismatched(lineno, label, "else")),
                }
            }
            ControlKind::EndIf => match self.stack.last() {
                Some(Frame::If { label: l }) if *l == label => {
                    self.stack.pop();
                }
                _ => return Err(mismatched(lineno, label, "endif")),
            },
            ControlKind::While { cond } => {
                if *cond {
                    self.stack.push(Frame::While { label, line: lineno });
                } else {
                    let found = self.find_control(lineno + 1, label, &["endwhile"]);
                    match found {
                        Some((target, _)) => self.cursor.seek(target + 1),
                        None => return Err(mismatched(lineno, label, "while")),
                    }
                }
            }
            ControlKind::EndWhile => match self.stack.last() {
                Some(Frame::While { label: l, line }) if *l == label => {
                    // Loop back: the while line re-evaluates its condition.
                    let line = *line;
                    self.stack.pop();
                    self.cursor.seek(line);
                }
                _ => return Err(mismatched(lineno, label, "endwhile")),
            },
        }
        Ok(())
    }

    fn do_call(&mut self, lineno: u32, label: u32, args: &[f64]) -> NcResult<()> {
        let def = self
            .subs
            .get(&label)
            .copied()
            .ok_or_else(|| ierr(lineno, InterpErrorKind::UndefinedSubroutine { label }))?;
        let depth = self
            .stack
            .iter()
            .filter(|f| matches!(f, Frame::Sub { .. }))
            .count();
        if depth >= MAX_CALL_DEPTH {
            return Err(ierr(
                lineno,
                InterpErrorKind::CallDepthExceeded {
                    limit: MAX_CALL_DEPTH,
                },
            ));
        }
        self.stack.push(Frame::Sub {
            label,
            return_line: self.cursor.position(),
            saved_modal: Box::new(self.modal.clone()),
            saved_locals: self.params.save_locals(),
        });
        for (i, arg) in args.iter().enumerate() {
            self.params.set(i as u32 + 1, *arg);
        }
        tracing::debug!(line = lineno, label, args = args.len(), "subroutine call");
        self.cursor.seek(def.body_start);
        Ok(())
    }

    /// Pop back to the innermost subroutine frame, restoring the
    /// caller's modal state and locals. `return` inside a conditional
    /// or loop unwinds the intervening frames too.
    fn do_return(&mut self, lineno: u32, label: u32) -> NcResult<()> {
        let sub_index = self
            .stack
            .iter()
            .rposition(|f| matches!(f, Frame::Sub { .. }))
            .ok_or_else(|| mismatched(lineno, label, "return"))?;
        self.stack.truncate(sub_index + 1);
        match self.stack.pop() {
            Some(Frame::Sub {
                return_line,
                saved_modal,
                saved_locals,
                ..
            }) => {
                self.modal = *saved_modal;
                self.params.restore_locals(&saved_locals);
                self.cursor.seek(return_line);
                Ok(())
            }
            _ => Err(mismatched(lineno, label, "return")),
        }
    }

    /// Scan forward for the next control word with this label and one
    /// of the wanted keywords. Labels are unique per program, so no
    /// nesting bookkeeping is needed.
    fn find_control(&self, from: u32, label: u32, wanted: &[&str]) -> Option<(u32, String)> {
        let program = self.cursor.program();
        for lineno in from..=program.len() as u32 {
            let text = program.line(lineno)?;
            if let Some((l, kw)) = scan_control(text) {
                if l == label && wanted.contains(&kw.as_str()) {
                    return Some((lineno, kw));
                }
            }
        }
        None
    }

    // ─── Block Execution ────────────────────────────────────────────

    /// Execute one word-bearing block: legality checks, modal commit,
    /// command emission.
    fn execute(&mut self, block: &Block) -> NcResult<Vec<CanonicalCommand>> {
        let line = block.line;
        check_modal_groups(block)?;
        let fx = decode(block)?;

        // Settings words.
        if let Some(f) = block.get('F') {
            if f <= 0.0 {
                return Err(illegal(line, "F", "feed rate must be positive"));
            }
            self.modal.feed_rate = f;
        }
        if let Some(s) = block.get('S') {
            if s < 0.0 {
                return Err(illegal(line, "S", "spindle speed must be non-negative"));
            }
            self.modal.spindle_speed = s;
        }
        if let Some(t) = block.get('T') {
            if t < 0.0 || t.fract() != 0.0 {
                return Err(illegal(line, "T", "tool number must be a non-negative integer"));
            }
            self.modal.tool = t as u32;
        }

        // Commit modal changes before any emission, so every snapshot
        // taken in this block reflects the block's own settings.
        if let Some(p) = fx.plane {
            self.modal.plane = p;
        }
        if let Some(u) = fx.units {
            self.modal.units = u;
        }
        if let Some(d) = fx.distance {
            self.modal.distance = d;
        }
        if let Some(c) = fx.cutter {
            self.modal.cutter_comp = c;
        }
        if let Some(r) = fx.retract {
            self.modal.retract = r;
        }
        if let Some(cs) = fx.coord {
            self.modal.coord_system = cs;
        }
        if let Some(m) = fx.motion {
            self.modal.motion = m;
            if m == MotionMode::None {
                self.modal.cycle_r = None;
                self.modal.cycle_z = None;
                self.modal.cycle_q = None;
                self.modal.cycle_p = None;
            }
        }
        if self.modal.motion.is_cycle() {
            if let Some(r) = block.get('R') {
                self.modal.cycle_r = Some(r);
            }
            if let Some(z) = block.get('Z') {
                self.modal.cycle_z = Some(z);
            }
            if let Some(q) = block.get('Q') {
                self.modal.cycle_q = Some(q);
            }
            if let Some(p) = block.get('P') {
                self.modal.cycle_p = Some(p);
            }
        }
        let respeed = block.has('S')
            && fx.spindle.is_none()
            && self.modal.spindle_dir != SpindleDirection::Stopped;
        if let Some(dir) = fx.spindle {
            self.modal.spindle_dir = dir;
        }
        let coolant_before = (self.modal.mist, self.modal.flood);
        if let Some(m) = fx.mist {
            self.modal.mist = m;
        }
        if let Some(f) = fx.flood {
            self.modal.flood = f;
        }
        let coolant_changed = (self.modal.mist, self.modal.flood) != coolant_before;

        // Emission, in the language's fixed order of execution.
        let mut cmds = Vec::new();
        if fx.tool_change {
            let op = CanonOp::ToolChange {
                tool: self.modal.tool,
            };
            cmds.push(self.emitter.emit(line, &self.modal, op));
        }
        match fx.spindle {
            Some(SpindleDirection::Stopped) => {
                cmds.push(self.emitter.emit(line, &self.modal, CanonOp::SpindleOff));
            }
            Some(direction) => {
                let op = CanonOp::SpindleOn {
                    speed: self.modal.spindle_speed,
                    direction,
                };
                cmds.push(self.emitter.emit(line, &self.modal, op));
            }
            None if respeed => {
                let op = CanonOp::SpindleOn {
                    speed: self.modal.spindle_speed,
                    direction: self.modal.spindle_dir,
                };
                cmds.push(self.emitter.emit(line, &self.modal, op));
            }
            None => {}
        }
        if coolant_changed {
            let op = CanonOp::Coolant {
                mist: self.modal.mist,
                flood: self.modal.flood,
            };
            cmds.push(self.emitter.emit(line, &self.modal, op));
        }
        if let Some((index, on)) = fx.digital {
            let op = CanonOp::SetDigitalOut { index, on };
            cmds.push(self.emitter.emit(line, &self.modal, op));
        }
        if let Some(seconds) = fx.dwell {
            cmds.push(self.emitter.emit(line, &self.modal, CanonOp::Dwell { seconds }));
        }

        if block.has_axis_word() {
            self.emit_motion(block, &mut cmds)?;
        }

        match fx.stop {
            Some(CanonOp::ProgramEnd) => {
                cmds.push(self.emitter.emit(line, &self.modal, CanonOp::ProgramEnd));
                self.machine.handle_event(InterpEvent::ProgramEnd);
                tracing::info!(line, "program end");
            }
            Some(op) => cmds.push(self.emitter.emit(line, &self.modal, op)),
            None => {}
        }
        Ok(cmds)
    }

    /// Motion target: axis words layered over the current position per
    /// the distance mode, with the active work offset applied.
    fn block_target(&self, block: &Block) -> Position {
        let mut target = self.position;
        for w in &block.words {
            if let Some(axis) = Axis::from_letter(w.letter) {
                let value = match self.modal.distance {
                    DistanceMode::Absolute => w.value + self.modal.active_offset().get(axis),
                    DistanceMode::Incremental => target.get(axis) + w.value,
                };
                target.set(axis, value);
            }
        }
        target
    }

    fn emit_motion(&mut self, block: &Block, cmds: &mut Vec<CanonicalCommand>) -> NcResult<()> {
        let line = block.line;
        match self.modal.motion {
            MotionMode::None => Err(illegal(
                line,
                "axis word",
                "no motion mode active (G80 state)",
            )),
            MotionMode::Rapid => {
                let target = self.block_target(block);
                let op = CanonOp::StraightTraverse { target };
                cmds.push(self.emitter.emit(line, &self.modal, op));
                self.position = target;
                Ok(())
            }
            MotionMode::Linear => {
                if self.modal.feed_rate <= 0.0 {
                    return Err(ierr(line, InterpErrorKind::MissingFeedRate));
                }
                let target = self.block_target(block);
                let op = CanonOp::StraightFeed { target };
                cmds.push(self.emitter.emit(line, &self.modal, op));
                self.position = target;
                Ok(())
            }
            MotionMode::ArcCw => self.emit_arc(block, cmds, ArcTurn::Clockwise),
            MotionMode::ArcCcw => self.emit_arc(block, cmds, ArcTurn::CounterClockwise),
            mode => self.emit_cycle(block, cmds, mode),
        }
    }

    fn emit_arc(
        &mut self,
        block: &Block,
        cmds: &mut Vec<CanonicalCommand>,
        turn: ArcTurn,
    ) -> NcResult<()> {
        let line = block.line;
        if self.modal.feed_rate <= 0.0 {
            return Err(ierr(line, InterpErrorKind::MissingFeedRate));
        }
        let target = self.block_target(block);
        let (fi, si) = plane_axes(self.modal.plane);
        let (sf, ss) = (self.position.coords[fi], self.position.coords[si]);
        let (ef, es) = (target.coords[fi], target.coords[si]);

        // I/J/K pair with X/Y/Z by axis index within the plane.
        const OFFSET_LETTERS: [char; 3] = ['I', 'J', 'K'];
        let lf = OFFSET_LETTERS[fi];
        let ls = OFFSET_LETTERS[si];
        let has_center = block.has(lf) || block.has(ls);

        let (cf, cs) = if let Some(r) = block.get('R') {
            if has_center {
                return Err(illegal(line, "R", "both radius and center offsets given"));
            }
            radius_center(sf, ss, ef, es, r, turn)
                .map_err(|reason| illegal(line, "R", &reason))?
        } else if has_center {
            let cf = sf + block.get(lf).unwrap_or(0.0);
            let cs = ss + block.get(ls).unwrap_or(0.0);
            let r_start = (sf - cf).hypot(ss - cs);
            let r_end = (ef - cf).hypot(es - cs);
            if r_start < 1e-9 {
                return Err(illegal(line, "arc", "zero-radius arc"));
            }
            if (r_start - r_end).abs() > 1e-3 * r_start.max(1.0) {
                return Err(illegal(line, "arc", "endpoints disagree on radius"));
            }
            (cf, cs)
        } else {
            return Err(ierr(
                line,
                InterpErrorKind::MissingWord {
                    word: format!("{lf}/{ls} or R"),
                },
            ));
        };

        let op = CanonOp::ArcFeed {
            target,
            center_first: cf,
            center_second: cs,
            turn,
        };
        cmds.push(self.emitter.emit(line, &self.modal, op));
        self.position = target;
        Ok(())
    }

    /// Expand a canned drilling cycle into traverse/feed/dwell commands.
    fn emit_cycle(
        &mut self,
        block: &Block,
        cmds: &mut Vec<CanonicalCommand>,
        mode: MotionMode,
    ) -> NcResult<()> {
        let line = block.line;
        if self.modal.plane != Plane::Xy {
            return Err(illegal(line, mode.g_word(), "canned cycles require the XY plane"));
        }
        if self.modal.feed_rate <= 0.0 {
            return Err(ierr(line, InterpErrorKind::MissingFeedRate));
        }
        let r_word = self
            .modal
            .cycle_r
            .ok_or_else(|| missing(line, "R"))?;
        let z_word = self
            .modal
            .cycle_z
            .ok_or_else(|| missing(line, "Z"))?;

        let offset_z = self.modal.active_offset().get(Axis::Z);
        let old_z = self.position.get(Axis::Z);
        let (r_plane, z_bottom) = match self.modal.distance {
            DistanceMode::Absolute => (r_word + offset_z, z_word + offset_z),
            // Incremental: R from the initial level, Z from the R plane.
            DistanceMode::Incremental => {
                let r = old_z + r_word;
                (r, r + z_word)
            }
        };
        if z_bottom >= r_plane {
            return Err(illegal(line, "Z", "cycle bottom is not below the R plane"));
        }

        // XY target: the Z word is the cycle bottom, not a coordinate.
        let mut target = self.position;
        for w in &block.words {
            if let Some(axis) = Axis::from_letter(w.letter) {
                if axis == Axis::Z {
                    continue;
                }
                let value = match self.modal.distance {
                    DistanceMode::Absolute => w.value + self.modal.active_offset().get(axis),
                    DistanceMode::Incremental => target.get(axis) + w.value,
                };
                target.set(axis, value);
            }
        }

        let mut at = self.position;
        // Preliminary rapids: clear to the R plane, then position XY.
        if old_z < r_plane {
            at.set(Axis::Z, r_plane);
            let op = CanonOp::StraightTraverse { target: at };
            cmds.push(self.emitter.emit(line, &self.modal, op));
        }
        let mut xy = target;
        xy.set(Axis::Z, at.get(Axis::Z));
        if xy != at {
            cmds.push(self.emitter.emit(line, &self.modal, CanonOp::StraightTraverse { target: xy }));
            at = xy;
        }
        if at.get(Axis::Z) > r_plane {
            at.set(Axis::Z, r_plane);
            let op = CanonOp::StraightTraverse { target: at };
            cmds.push(self.emitter.emit(line, &self.modal, op));
        }

        if mode == MotionMode::DrillPeck {
            let q = self.modal.cycle_q.ok_or_else(|| missing(line, "Q"))?;
            if q <= 0.0 {
                return Err(illegal(line, "Q", "peck increment must be positive"));
            }
            let mut depth = r_plane;
            while depth > z_bottom {
                let next = (depth - q).max(z_bottom);
                at.set(Axis::Z, next);
                cmds.push(self.emitter.emit(line, &self.modal, CanonOp::StraightFeed { target: at }));
                depth = next;
                if depth > z_bottom {
                    at.set(Axis::Z, r_plane);
                    cmds.push(self.emitter.emit(line, &self.modal, CanonOp::StraightTraverse { target: at }));
                    at.set(Axis::Z, depth);
                    cmds.push(self.emitter.emit(line, &self.modal, CanonOp::StraightTraverse { target: at }));
                }
            }
        } else {
            at.set(Axis::Z, z_bottom);
            cmds.push(self.emitter.emit(line, &self.modal, CanonOp::StraightFeed { target: at }));
            if mode == MotionMode::DrillDwell {
                let p = self.modal.cycle_p.ok_or_else(|| missing(line, "P"))?;
                if p < 0.0 {
                    return Err(illegal(line, "P", "dwell time must be non-negative"));
                }
                cmds.push(self.emitter.emit(line, &self.modal, CanonOp::Dwell { seconds: p }));
            }
        }

        // Retract.
        at.set(Axis::Z, r_plane);
        cmds.push(self.emitter.emit(line, &self.modal, CanonOp::StraightTraverse { target: at }));
        if self.modal.retract == RetractMode::InitialLevel && old_z > r_plane {
            at.set(Axis::Z, old_z);
            cmds.push(self.emitter.emit(line, &self.modal, CanonOp::StraightTraverse { target: at }));
        }
        self.position = at;
        Ok(())
    }
}

// ─── Decode ─────────────────────────────────────────────────────────

/// The block's effects on modal state and emission, decoded from its
/// G/M words.
#[derive(Debug, Default)]
struct BlockEffects {
    motion: Option<MotionMode>,
    plane: Option<Plane>,
    units: Option<Units>,
    distance: Option<DistanceMode>,
    cutter: Option<CutterComp>,
    retract: Option<RetractMode>,
    coord: Option<u8>,
    dwell: Option<f64>,
    spindle: Option<SpindleDirection>,
    tool_change: bool,
    mist: Option<bool>,
    flood: Option<bool>,
    digital: Option<(u8, bool)>,
    stop: Option<CanonOp>,
}

fn decode(block: &Block) -> Result<BlockEffects, NcError> {
    let line = block.line;
    let mut fx = BlockEffects::default();

    for g in block.g_codes() {
        // G-codes carry one decimal digit (G59.1); scale to integers.
        match (g * 10.0).round() as i64 {
            0 => fx.motion = Some(MotionMode::Rapid),
            10 => fx.motion = Some(MotionMode::Linear),
            20 => fx.motion = Some(MotionMode::ArcCw),
            30 => fx.motion = Some(MotionMode::ArcCcw),
            40 => {
                let p = block.get('P').ok_or_else(|| missing(line, "P"))?;
                if p < 0.0 {
                    return Err(illegal(line, "P", "dwell time must be non-negative"));
                }
                fx.dwell = Some(p);
            }
            170 => fx.plane = Some(Plane::Xy),
            180 => fx.plane = Some(Plane::Zx),
            190 => fx.plane = Some(Plane::Yz),
            200 => fx.units = Some(Units::Inches),
            210 => fx.units = Some(Units::Millimeters),
            400 => fx.cutter = Some(CutterComp::Off),
            410 => fx.cutter = Some(CutterComp::Left),
            420 => fx.cutter = Some(CutterComp::Right),
            540 => fx.coord = Some(0),
            550 => fx.coord = Some(1),
            560 => fx.coord = Some(2),
            570 => fx.coord = Some(3),
            580 => fx.coord = Some(4),
            590 => fx.coord = Some(5),
            591 => fx.coord = Some(6),
            592 => fx.coord = Some(7),
            593 => fx.coord = Some(8),
            800 => fx.motion = Some(MotionMode::None),
            810 => fx.motion = Some(MotionMode::Drill),
            820 => fx.motion = Some(MotionMode::DrillDwell),
            830 => fx.motion = Some(MotionMode::DrillPeck),
            900 => fx.distance = Some(DistanceMode::Absolute),
            910 => fx.distance = Some(DistanceMode::Incremental),
            980 => fx.retract = Some(RetractMode::InitialLevel),
            990 => fx.retract = Some(RetractMode::RPlane),
            _ => {
                return Err(ierr(
                    line,
                    InterpErrorKind::UnknownCode { code: g_name(g) },
                ));
            }
        }
    }

    for m in block.m_codes() {
        let deci = (m * 10.0).round() as i64;
        if deci % 10 != 0 {
            return Err(ierr(
                line,
                InterpErrorKind::UnknownCode {
                    code: format!("M{m}"),
                },
            ));
        }
        match deci / 10 {
            0 => fx.stop = Some(CanonOp::ProgramStop),
            1 => fx.stop = Some(CanonOp::OptionalStop),
            2 | 30 => fx.stop = Some(CanonOp::ProgramEnd),
            3 => fx.spindle = Some(SpindleDirection::Clockwise),
            4 => fx.spindle = Some(SpindleDirection::CounterClockwise),
            5 => fx.spindle = Some(SpindleDirection::Stopped),
            6 => fx.tool_change = true,
            7 => fx.mist = Some(true),
            8 => fx.flood = Some(true),
            9 => {
                fx.mist = Some(false);
                fx.flood = Some(false);
            }
            code @ (62 | 63) => {
                let p = block.get('P').ok_or_else(|| missing(line, "P"))?;
                if p < 0.0 || p.fract() != 0.0 || p > 255.0 {
                    return Err(illegal(line, "P", "digital output index must be 0..=255"));
                }
                fx.digital = Some((p as u8, code == 62));
            }
            code => {
                return Err(ierr(
                    line,
                    InterpErrorKind::UnknownCode {
                        code: format!("M{code}"),
                    },
                ));
            }
        }
    }
    Ok(fx)
}

// ─── Modal Group Checks ─────────────────────────────────────────────

fn g_modal_group(deci: i64) -> Option<u8> {
    match deci {
        0 | 10 | 20 | 30 | 800 | 810 | 820 | 830 => Some(1),
        170 | 180 | 190 => Some(2),
        900 | 910 => Some(3),
        200 | 210 => Some(6),
        400 | 410 | 420 => Some(7),
        980 | 990 => Some(10),
        540 | 550 | 560 | 570 | 580 | 590 | 591 | 592 | 593 => Some(12),
        _ => None,
    }
}

fn m_modal_group(code: i64) -> Option<u8> {
    match code {
        0 | 1 | 2 | 30 => Some(4),
        3 | 4 | 5 => Some(7),
        7 | 8 | 9 => Some(8),
        _ => None,
    }
}

/// At most one code per modal group per block.
fn check_modal_groups(block: &Block) -> Result<(), NcError> {
    let mut seen: HashMap<u8, String> = HashMap::new();
    for g in block.g_codes() {
        if let Some(group) = g_modal_group((g * 10.0).round() as i64) {
            if let Some(first) = seen.insert(group, g_name(g)) {
                return Err(ierr(
                    block.line,
                    InterpErrorKind::ConflictingModalGroup {
                        group,
                        first,
                        second: g_name(g),
                    },
                ));
            }
        }
    }
    for m in block.m_codes() {
        let deci = (m * 10.0).round() as i64;
        if deci % 10 != 0 {
            continue; // Caught by decode.
        }
        if let Some(group) = m_modal_group(deci / 10) {
            // M-groups share the G namespace offset 100 so they never collide.
            if let Some(first) = seen.insert(group + 100, format!("M{}", deci / 10)) {
                return Err(ierr(
                    block.line,
                    InterpErrorKind::ConflictingModalGroup {
                        group,
                        first,
                        second: format!("M{}", deci / 10),
                    },
                ));
            }
        }
    }
    Ok(())
}

// ─── Helpers ────────────────────────────────────────────────────────

fn g_name(value: f64) -> String {
    if value.fract().abs() < 1e-9 {
        format!("G{}", value as i64)
    } else {
        format!("G{value}")
    }
}

fn ierr(line: u32, kind: InterpErrorKind) -> NcError {
    InterpError::new(line, kind).into()
}

fn illegal(line: u32, word: &str, reason: &str) -> NcError {
    ierr(
        line,
        InterpErrorKind::IllegalInContext {
            word: word.to_string(),
            reason: reason.to_string(),
        },
    )
}

fn missing(line: u32, word: &str) -> NcError {
    ierr(
        line,
        InterpErrorKind::MissingWord {
            word: word.to_string(),
        },
    )
}

fn mismatched(line: u32, label: u32, word: &str) -> NcError {
    ierr(
        line,
        InterpErrorKind::MismatchedControlFlow {
            word: format!("O{label} {word}"),
        },
    )
}

/// Arc center from the radius format. `R` positive selects the minor
/// arc; negative the major one.
fn radius_center(
    sf: f64,
    ss: f64,
    ef: f64,
    es: f64,
    r: f64,
    turn: ArcTurn,
) -> Result<(f64, f64), String> {
    let df = ef - sf;
    let ds = es - ss;
    let chord = df.hypot(ds);
    if chord < 1e-9 {
        return Err("start and end coincide; use center format for full circles".to_string());
    }
    let radius = r.abs();
    let half = chord / 2.0;
    if radius + 1e-9 < half {
        return Err("radius too small for the endpoints".to_string());
    }
    let h = (radius * radius - half * half).max(0.0).sqrt();
    // Unit perpendicular to the left of the travel direction.
    let (uf, us) = (-ds / chord, df / chord);
    let sign = match (turn, r >= 0.0) {
        (ArcTurn::CounterClockwise, true) | (ArcTurn::Clockwise, false) => 1.0,
        (ArcTurn::CounterClockwise, false) | (ArcTurn::Clockwise, true) => -1.0,
    };
    Ok((
        sf + df / 2.0 + sign * h * uf,
        ss + ds / 2.0 + sign * h * us,
    ))
}

// ─── Pre-Scan ───────────────────────────────────────────────────────

/// Cheap control-word recognizer for scanning: `O<digits> <keyword>`.
/// Does not evaluate expressions, so it is safe before any parameter
/// is defined.
fn scan_control(text: &str) -> Option<(u32, String)> {
    let trimmed = text.trim_start();
    let mut chars = trimmed.chars().peekable();
    if !matches!(chars.next(), Some('o' | 'O')) {
        return None;
    }
    let mut digits = String::new();
    while let Some(c) = chars.peek() {
        if c.is_ascii_digit() {
            digits.push(*c);
            chars.next();
        } else {
            break;
        }
    }
    let label: u32 = digits.parse().ok()?;
    while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
        chars.next();
    }
    let mut keyword = String::new();
    while let Some(c) = chars.peek() {
        if c.is_ascii_alphabetic() {
            keyword.push(c.to_ascii_lowercase());
            chars.next();
        } else {
            break;
        }
    }
    if keyword.is_empty() {
        None
    } else {
        Some((label, keyword))
    }
}

/// Register every `sub`..`endsub` pair before the run starts, so calls
/// can target definitions later in the file.
fn scan_subroutines(program: &Program) -> Result<HashMap<u32, SubDef>, InterpError> {
    let mut subs = HashMap::new();
    let mut open: Option<(u32, u32)> = None;
    for lineno in 1..=program.len() as u32 {
        let Some(text) = program.line(lineno) else { break };
        let Some((label, keyword)) = scan_control(text) else {
            continue;
        };
        match keyword.as_str() {
            "sub" => {
                if open.is_some() || subs.contains_key(&label) {
                    return Err(InterpError::new(
                        lineno,
                        InterpErrorKind::MismatchedControlFlow {
                            word: format!("O{label} sub"),
                        },
                    ));
                }
                open = Some((label, lineno));
            }
            "endsub" => match open.take() {
                Some((open_label, start)) if open_label == label => {
                    subs.insert(
                        label,
                        SubDef {
                            body_start: start + 1,
                            endsub: lineno,
                        },
                    );
                }
                _ => {
                    return Err(InterpError::new(
                        lineno,
                        InterpErrorKind::MismatchedControlFlow {
                            word: format!("O{label} endsub"),
                        },
                    ));
                }
            },
            _ => {}
        }
    }
    if let Some((label, lineno)) = open {
        return Err(InterpError::new(
            lineno,
            InterpErrorKind::MismatchedControlFlow {
                word: format!("O{label} sub"),
            },
        ));
    }
    Ok(subs)
}
