//! The scope stack modeling abnormal control transfer
//!
//! Every construct that can receive an abnormal exit (a catch clause, a
//! finally block, a loop or switch for break/continue, a labeled block,
//! and the routine itself) pushes a frame while its interior is walked.
//! A statement that transfers control abnormally snapshots the current
//! lattice state and routes it outward through the stack:
//!
//! - a throw lands in every compatible catch frame of the nearest try
//!   (duplicated, since the concrete origin type is unknown) and stops
//!   there only if some handler is guaranteed to receive it;
//! - break/continue land in the nearest matching loop/switch/label frame;
//! - return lands in the routine frame;
//! - a finally frame intercepts anything passing it. The driver later
//!   re-routes each intercepted snapshot onward, preserving its original
//!   exit kind, after overlaying whatever the finally body wrote.

use log::trace;

use crate::contracts::ContractStore;
use crate::ids::{LabelId, TypeId};
use crate::lattice::FlowInfo;

/// What kind of construct a frame models
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// The routine itself; collects returns and uncaught throws
    Routine,
    Catch { declared: TypeId },
    Finally,
    Loop { label: Option<LabelId> },
    Switch { label: Option<LabelId> },
    Block { label: LabelId },
}

/// How control left the point the snapshot was taken at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    Exception(TypeId),
    Return,
    Break(Option<LabelId>),
    Continue(Option<LabelId>),
}

/// One routed snapshot: the exit kind it carries plus the lattice state
/// at the transfer point
#[derive(Debug, Clone)]
pub struct ExitSnapshot {
    pub kind: ExitKind,
    pub state: FlowInfo,
}

/// One stack frame with the snapshots routed to it so far
#[derive(Debug)]
pub struct ScopeFrame {
    pub kind: ScopeKind,
    pub pending: Vec<ExitSnapshot>,
}

impl ScopeFrame {
    fn new(kind: ScopeKind) -> Self {
        Self {
            kind,
            pending: Vec::new(),
        }
    }

    /// Remove and return the pending snapshots matching `pred`
    pub fn drain_matching<F>(&mut self, pred: F) -> Vec<ExitSnapshot>
    where
        F: Fn(&ExitKind) -> bool,
    {
        let mut kept = Vec::new();
        let mut taken = Vec::new();
        for snap in self.pending.drain(..) {
            if pred(&snap.kind) {
                taken.push(snap);
            } else {
                kept.push(snap);
            }
        }
        self.pending = kept;
        taken
    }
}

/// The stack of open frames for one routine's walk.
///
/// Owned exclusively by the single walking driver; never observed
/// concurrently.
#[derive(Debug)]
pub struct ScopeStack {
    frames: Vec<ScopeFrame>,
}

impl ScopeStack {
    pub fn new() -> Self {
        Self {
            frames: vec![ScopeFrame::new(ScopeKind::Routine)],
        }
    }

    pub fn push(&mut self, kind: ScopeKind) {
        self.frames.push(ScopeFrame::new(kind));
    }

    pub fn pop(&mut self) -> ScopeFrame {
        debug_assert!(self.frames.len() > 1, "routine frame must stay on the stack");
        self.frames.pop().expect("scope stack underflow")
    }

    /// Snapshots collected by the routine frame: returns plus uncaught throws
    pub fn take_routine_exits(&mut self) -> Vec<ExitSnapshot> {
        debug_assert_eq!(self.frames.len(), 1);
        std::mem::take(&mut self.frames[0].pending)
    }

    /// Route one snapshot outward from the innermost frame.
    ///
    /// Unreachable snapshots carry no information and are dropped here.
    pub fn route(&mut self, kind: ExitKind, state: FlowInfo, store: &ContractStore) {
        if !state.is_reachable() {
            return;
        }
        trace!("routing exit {:?}", kind);

        // Whether some already-visited catch frame of the current catch
        // group is guaranteed to receive the exception
        let mut caught_definitely = false;

        for i in (0..self.frames.len()).rev() {
            let frame_kind = self.frames[i].kind;

            // Leaving a run of catch frames: if one of them definitely
            // receives the throw, propagation ends with that try
            if caught_definitely && !matches!(frame_kind, ScopeKind::Catch { .. }) {
                return;
            }

            match (frame_kind, kind) {
                (ScopeKind::Catch { declared }, ExitKind::Exception(thrown)) => {
                    if store.catch_compatible(thrown, declared) {
                        self.frames[i].pending.push(ExitSnapshot {
                            kind,
                            state: state.clone(),
                        });
                        if store.catch_definite(thrown, declared) {
                            caught_definitely = true;
                        }
                    }
                }
                // A finally intercepts every exit kind passing it; the
                // driver re-routes after analyzing the finally body
                (ScopeKind::Finally, _) => {
                    self.frames[i].pending.push(ExitSnapshot { kind, state });
                    return;
                }
                (ScopeKind::Loop { label }, ExitKind::Break(target))
                    if target.is_none() || target == label =>
                {
                    self.frames[i].pending.push(ExitSnapshot { kind, state });
                    return;
                }
                (ScopeKind::Loop { label }, ExitKind::Continue(target))
                    if target.is_none() || target == label =>
                {
                    self.frames[i].pending.push(ExitSnapshot { kind, state });
                    return;
                }
                (ScopeKind::Switch { label }, ExitKind::Break(target))
                    if target.is_none() || target == label =>
                {
                    self.frames[i].pending.push(ExitSnapshot { kind, state });
                    return;
                }
                (ScopeKind::Block { label }, ExitKind::Break(Some(target)))
                    if target == label =>
                {
                    self.frames[i].pending.push(ExitSnapshot { kind, state });
                    return;
                }
                (ScopeKind::Routine, _) => {
                    self.frames[i].pending.push(ExitSnapshot { kind, state });
                    return;
                }
                _ => {}
            }
        }
    }
}

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new()
    }
}
