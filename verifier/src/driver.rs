//! The flow-sensitive walk over one routine
//!
//! [`analyze`] drives everything: it seeds the entry snapshot from the
//! routine's parameter contracts, walks the structured body with
//! exhaustive matches over [`FlowNode`], routes abnormal exits through the
//! [`ScopeStack`], and finally checks every tracked resource against the
//! join of all exit snapshots.
//!
//! Loops are handled with a capped two-pass widening: a first silent pass
//! discovers the loop-carried facts, the entry snapshot is widened by
//! joining the back-edge in, and a second reporting pass analyzes the body
//! under the widened entry. Findings are suppressed during discovery
//! passes so nothing is reported twice.

use fxhash::FxHashMap;
use log::{debug, info, trace};

use source_map::SourceSpan;

use crate::cfg::{
    CatchClause, ContractSite, Expr, ExprKind, FlowNode, Routine, StorageKind, SwitchArm, Variable,
};
use crate::config::AnalysisConfig;
use crate::contracts::{ContractIssueKind, ContractSlot, ContractStore};
use crate::findings::{CollectingSink, Finding, FindingKind, FindingSink, Severity};
use crate::ids::{GuardId, TrackId, VarId};
use crate::lattice::{FlowInfo, Presence, ResourceState, ValueInfo};
use crate::merge::{merge_branches, merge_values};
use crate::resource::ResourceTracker;
use crate::scope::{ExitKind, ExitSnapshot, ScopeKind, ScopeStack};

/// Analyze one routine and return its findings, ordered by source
/// position and kind
pub fn analyze(routine: &Routine, store: &ContractStore, config: &AnalysisConfig) -> Vec<Finding> {
    Analyzer::new(routine, store, config).run()
}

struct Analyzer<'a> {
    routine: &'a Routine,
    store: &'a ContractStore,
    config: &'a AnalysisConfig,
    tracker: ResourceTracker,
    scopes: ScopeStack,
    sink: CollectingSink,
    /// Non-zero while inside a discovery pass; findings are dropped
    suppress: usize,
    /// One tracking slot per producing expression, stable across loop passes
    track_cache: FxHashMap<(usize, usize), TrackId>,
    /// One guard per syntactic check site, stable across loop passes
    guard_cache: FxHashMap<(usize, usize), GuardId>,
    next_guard: GuardId,
}

fn span_key(span: SourceSpan) -> (usize, usize) {
    (span.start.byte_offset, span.end.byte_offset)
}

impl<'a> Analyzer<'a> {
    fn new(routine: &'a Routine, store: &'a ContractStore, config: &'a AnalysisConfig) -> Self {
        Self {
            routine,
            store,
            config,
            tracker: ResourceTracker::new(),
            scopes: ScopeStack::new(),
            sink: CollectingSink::new(),
            suppress: 0,
            track_cache: FxHashMap::default(),
            guard_cache: FxHashMap::default(),
            next_guard: GuardId::first(),
        }
    }

    fn run(mut self) -> Vec<Finding> {
        info!("analyzing routine `{}`", self.routine.name);

        self.check_own_contracts();

        let entry = self.entry_state();
        let body: &'a [FlowNode] = &self.routine.body;
        let normal_exit = self.run_block(body, entry);

        // The trailing fall-off is one more exit alongside returns and
        // uncaught throws
        let mut exit_states: Vec<FlowInfo> = self
            .scopes
            .take_routine_exits()
            .into_iter()
            .map(|snap| snap.state)
            .collect();
        if normal_exit.is_reachable() {
            exit_states.push(normal_exit);
        }

        let joined = merge_branches(exit_states);
        self.check_leaks(&joined);

        self.sink.into_sorted()
    }

    /// Report contract conflicts the routine's own declaration introduces
    fn check_own_contracts(&mut self) {
        let inherit = self.config.inherit_absence_contracts;
        for issue in self.store.check_decl(self.routine.decl, inherit) {
            let (kind, severity, message) = match issue.kind {
                ContractIssueKind::IllegalNarrowing => (
                    FindingKind::IllegalContractNarrowing,
                    Severity::Error,
                    format!(
                        "override of `{}` demands presence where the overridden declaration admits absence",
                        self.routine.name
                    ),
                ),
                ContractIssueKind::Conflict => (
                    FindingKind::ContractConflict,
                    Severity::Warning,
                    format!(
                        "defaulted contract on `{}` contradicts an explicitly inherited contract",
                        self.routine.name
                    ),
                ),
            };
            self.report(Finding::new(kind, severity, issue.span, message));
        }
    }

    /// Seed the entry snapshot from declared contracts. Parameters and
    /// fields carrying resources get foreign tracking slots: values
    /// produced outside the routine carry no local release obligation.
    fn entry_state(&mut self) -> FlowInfo {
        let inherit = self.config.inherit_absence_contracts;
        let routine = self.routine;
        let mut state = FlowInfo::entry();

        for var in routine.variables.values() {
            if var.is_reference {
                let resolved = match var.contract {
                    ContractSite::Param { routine, index } => {
                        self.store.resolve(routine, ContractSlot::Param(index), inherit)
                    }
                    ContractSite::Field(decl) => {
                        self.store.resolve(decl, ContractSlot::Field, inherit)
                    }
                    ContractSite::Unannotated => continue,
                };
                let presence = if resolved.requires_presence() {
                    Presence::Present
                } else if resolved.allows_absence() {
                    Presence::PossiblyAbsent
                } else {
                    Presence::Unknown
                };
                state = state.with_presence(var.id, presence);
            }
        }

        for var in routine.variables.values() {
            if var.is_resource && matches!(var.storage, StorageKind::Parameter | StorageKind::Field)
            {
                let track = self.track_for(var.span, true);
                if let Some(info) = self.tracker.info_mut(track) {
                    info.name = Some(var.name.clone());
                }
                state = state
                    .with_track(track, ResourceState::Open)
                    .with_binding(var.id, track);
            }
        }

        state
    }

    /// Check every locally owned resource against the joined exit snapshot
    fn check_leaks(&mut self, joined: &FlowInfo) {
        let mut findings = Vec::new();
        for info in self.tracker.iter() {
            if info.foreign || info.auto_managed || info.reported {
                continue;
            }
            // Inner links of a wrapper chain are subsumed by the outermost
            // wrapper; only it is reported
            if info.wrapped_by.is_some() {
                continue;
            }
            let (kind, level, message) = match joined.track_state(info.id) {
                ResourceState::Open => (
                    FindingKind::DefiniteResourceLeak,
                    self.config.report_unclosed_closeable,
                    match &info.name {
                        Some(name) => format!("resource `{}` is never released", name),
                        None => "resource allocated here is never released".to_string(),
                    },
                ),
                ResourceState::PossiblyClosed => (
                    FindingKind::PotentialResourceLeak,
                    self.config.report_potentially_unclosed_closeable,
                    match &info.name {
                        Some(name) => {
                            format!("resource `{}` may remain unreleased on some paths", name)
                        }
                        None => "resource allocated here may remain unreleased on some paths"
                            .to_string(),
                    },
                ),
                _ => continue,
            };
            let Some(severity) = level.as_severity() else {
                continue;
            };
            let mut finding = Finding::new(kind, severity, info.origin, message);
            if let Some(name) = &info.name {
                finding = finding.with_variable(name.clone());
            }
            findings.push((info.id, finding));
        }
        for (id, finding) in findings {
            if let Some(info) = self.tracker.info_mut(id) {
                info.reported = true;
            }
            self.report(finding);
        }
    }

    // ---- statement walking ----

    fn run_block(&mut self, nodes: &'a [FlowNode], mut state: FlowInfo) -> FlowInfo {
        for node in nodes {
            if !state.is_reachable() {
                if self.config.report_dead_code {
                    self.report(Finding::new(
                        FindingKind::DeadCode,
                        Severity::Warning,
                        node.span(),
                        "statement is unreachable",
                    ));
                }
                // Nothing in an unreachable region can change the outcome
                break;
            }
            state = self.run_node(node, state);
        }
        state
    }

    fn run_node(&mut self, node: &'a FlowNode, state: FlowInfo) -> FlowInfo {
        trace!("node at {}", node.span().start.line);
        match node {
            FlowNode::Declare { var, init, span } => match init {
                Some(expr) => {
                    let (state, value) = self.eval(expr, state);
                    self.bind_value(state, *var, value, *span)
                }
                None => state,
            },
            FlowNode::Assign { target, value, span } => {
                let (state, value) = self.eval(value, state);
                self.bind_value(state, *target, value, *span)
            }
            FlowNode::Eval { expr, .. } => self.eval(expr, state).0,
            FlowNode::Assert { condition, .. } => {
                let (true_state, false_state) = self.eval_condition(condition, state);
                if self.config.include_guards_in_null_analysis {
                    true_state
                } else {
                    // The guard's refinement is disabled, its evaluation
                    // effects are not
                    true_state.join(&false_state)
                }
            }
            FlowNode::If {
                condition,
                then_body,
                else_body,
                ..
            } => {
                let (true_state, false_state) = self.eval_condition(condition, state);
                let then_out = self.run_block(then_body, true_state);
                let else_out = self.run_block(else_body, false_state);
                merge_branches([then_out, else_out])
            }
            FlowNode::Loop {
                label,
                condition,
                body,
                ..
            } => self.run_loop(*label, condition.as_ref(), body, state),
            FlowNode::Switch {
                label,
                scrutinee,
                arms,
                ..
            } => self.run_switch(*label, scrutinee, arms, state),
            FlowNode::Try {
                resources,
                body,
                catches,
                finally_body,
                ..
            } => self.run_try(resources, body, catches, finally_body.as_deref(), state),
            FlowNode::Throw { ty, value, .. } => {
                let (state, _) = self.eval(value, state);
                self.scopes
                    .route(ExitKind::Exception(*ty), state.clone(), self.store);
                state.into_unreachable()
            }
            FlowNode::Return { value, span } => {
                let state = match value {
                    Some(expr) => {
                        let (mut state, value) = self.eval(expr, state);
                        // A returned resource becomes the caller's problem
                        if let Some(track) = value.track {
                            state = self.escape_track(state, track);
                        }
                        self.check_return_contract(value.presence, *span);
                        state
                    }
                    None => state,
                };
                self.scopes
                    .route(ExitKind::Return, state.clone(), self.store);
                state.into_unreachable()
            }
            FlowNode::Break { label, .. } => {
                self.scopes
                    .route(ExitKind::Break(*label), state.clone(), self.store);
                state.into_unreachable()
            }
            FlowNode::Continue { label, .. } => {
                self.scopes
                    .route(ExitKind::Continue(*label), state.clone(), self.store);
                state.into_unreachable()
            }
            FlowNode::Labeled { label, body, .. } => {
                self.scopes.push(ScopeKind::Block { label: *label });
                let out = self.run_block(body, state);
                let frame = self.scopes.pop();
                let break_states = frame.pending.into_iter().map(|snap| snap.state);
                merge_branches(std::iter::once(out).chain(break_states))
            }
        }
    }

    /// Capped two-pass widening. The first pass runs silently against a
    /// detached scope stack (its abnormal exits are routed again by the
    /// second pass), the entry is widened with the back-edge join, and the
    /// second pass analyzes and reports under the widened entry.
    fn run_loop(
        &mut self,
        label: Option<crate::ids::LabelId>,
        condition: Option<&'a Expr>,
        body: &'a [FlowNode],
        entry: FlowInfo,
    ) -> FlowInfo {
        debug!("loop in `{}`: discovery pass", self.routine.name);
        self.suppress += 1;
        let saved = std::mem::replace(&mut self.scopes, ScopeStack::new());
        self.scopes.push(ScopeKind::Loop { label });
        let (body_entry, _) = self.split_loop_condition(condition, entry.clone());
        let body_out = self.run_block(body, body_entry);
        let mut frame = self.scopes.pop();
        let continue_states = frame
            .drain_matching(|k| matches!(k, ExitKind::Continue(_)))
            .into_iter()
            .map(|snap| snap.state);
        let back_edge = merge_branches(std::iter::once(body_out).chain(continue_states));
        self.scopes = saved;
        self.suppress -= 1;

        let widened = entry.join(&back_edge);

        debug!("loop in `{}`: reporting pass", self.routine.name);
        self.scopes.push(ScopeKind::Loop { label });
        let (body_entry, skip_state) = self.split_loop_condition(condition, widened);
        // Normal completion of the body re-tests the condition and leaves
        // through its false side, which the widened skip state covers
        self.run_block(body, body_entry);
        let mut frame = self.scopes.pop();
        // The second back-edge is capped: its facts already reached the
        // widened entry in pass one
        let _ = frame.drain_matching(|k| matches!(k, ExitKind::Continue(_)));
        let break_states = frame.pending.into_iter().map(|snap| snap.state);

        merge_branches(std::iter::once(skip_state).chain(break_states))
    }

    /// Evaluate a loop condition once: the body-entry state and the
    /// loop-skipped state. A missing condition loops forever.
    fn split_loop_condition(
        &mut self,
        condition: Option<&'a Expr>,
        state: FlowInfo,
    ) -> (FlowInfo, FlowInfo) {
        match condition {
            Some(cond) => self.eval_condition(cond, state),
            None => (state, FlowInfo::unreachable()),
        }
    }

    fn run_switch(
        &mut self,
        label: Option<crate::ids::LabelId>,
        scrutinee: &'a Expr,
        arms: &'a [SwitchArm],
        state: FlowInfo,
    ) -> FlowInfo {
        let (dispatch, _) = self.eval(scrutinee, state);
        self.scopes.push(ScopeKind::Switch { label });

        let mut exits: Vec<FlowInfo> = Vec::new();
        let mut carry = FlowInfo::unreachable();
        let mut has_default = false;

        for arm in arms {
            if arm.is_default {
                has_default = true;
            }
            // An arm is entered by direct dispatch or by falling through
            // from the previous arm
            let arm_entry = dispatch.join(&carry);
            let out = self.run_block(&arm.body, arm_entry);
            if arm.falls_through {
                carry = out;
            } else {
                exits.push(out);
                carry = FlowInfo::unreachable();
            }
        }
        // The last arm may fall out of the switch entirely
        exits.push(carry);

        // Without a default arm the dispatch can match nothing
        if !has_default {
            exits.push(dispatch);
        }

        let frame = self.scopes.pop();
        exits.extend(frame.pending.into_iter().map(|snap| snap.state));
        merge_branches(exits)
    }

    fn run_try(
        &mut self,
        resources: &'a [(VarId, Expr)],
        body: &'a [FlowNode],
        catches: &'a [CatchClause],
        finally_body: Option<&'a [FlowNode]>,
        state: FlowInfo,
    ) -> FlowInfo {
        if finally_body.is_some() {
            self.scopes.push(ScopeKind::Finally);
        }
        for clause in catches {
            self.scopes.push(ScopeKind::Catch { declared: clause.ty });
        }
        // Declared resources are released before any catch runs, on every
        // exit of the body; model that as an innermost implicit finally
        if !resources.is_empty() {
            self.scopes.push(ScopeKind::Finally);
        }

        let mut state = state;
        let mut auto_tracks: Vec<TrackId> = Vec::new();
        for (var, init) in resources {
            let (next, value) = self.eval(init, state);
            state = next;
            let track = match value.track {
                Some(track) => track,
                None => {
                    let track = self.track_for(init.span, false);
                    state = state.with_track(track, ResourceState::Open);
                    track
                }
            };
            if let Some(info) = self.tracker.info_mut(track) {
                info.auto_managed = true;
            }
            state = self.bind_value(state, *var, ValueInfo::with_track(Presence::Present, track), init.span);
            auto_tracks.push(track);
        }
        let seed = self.close_auto(&auto_tracks, state.clone());

        let body_out = self.run_block(body, state);
        let mut after_arms: Vec<FlowInfo> = Vec::new();

        if !resources.is_empty() {
            // Pop the implicit finally and re-route everything that tried
            // to leave the body, with the declared resources closed
            let frame = self.scopes.pop();
            for snap in frame.pending {
                let closed = self.close_auto(&auto_tracks, snap.state);
                self.scopes.route(snap.kind, closed, self.store);
            }
        }
        after_arms.push(self.close_auto(&auto_tracks, body_out));

        // Catch frames pop innermost-first; realign with source order
        let mut catch_frames = Vec::with_capacity(catches.len());
        for _ in catches {
            catch_frames.push(self.scopes.pop());
        }
        catch_frames.reverse();

        for (clause, frame) in catches.iter().zip(catch_frames) {
            // Besides the routed exits (explicit throws and calls with a
            // declared failure), any call may still raise an undeclared
            // runtime fault before the body changed anything; seed with
            // the state right after resource setup
            let routed = frame.pending.into_iter().map(|snap| snap.state);
            let mut entry = merge_branches(std::iter::once(seed.clone()).chain(routed));
            if let Some(var) = clause.var {
                entry = entry.with_presence(var, Presence::Present);
            }
            after_arms.push(self.run_block(&clause.body, entry));
        }

        let after = merge_branches(after_arms);

        let Some(fin_body) = finally_body else {
            return after;
        };

        // Pop before walking so the finally body's own abnormal exits
        // route past this try
        let frame = self.scopes.pop();
        let pending: Vec<ExitSnapshot> = frame.pending;

        let fin_entry = merge_branches(
            std::iter::once(after.clone()).chain(pending.iter().map(|snap| snap.state.clone())),
        );
        if !fin_entry.is_reachable() {
            return FlowInfo::unreachable();
        }
        let fin_exit = self.run_block(fin_body, fin_entry.clone());

        if !fin_exit.is_reachable() {
            // The finally itself transfers control; every intercepted
            // exit is replaced by the finally's own
            return FlowInfo::unreachable();
        }

        // Re-route each intercepted exit, overlaying exactly the facts the
        // finally body wrote onto the state that exit carried in
        for snap in pending {
            let adjusted = snap.state.overlay_written(&fin_entry, &fin_exit);
            self.scopes.route(snap.kind, adjusted, self.store);
        }

        if after.is_reachable() {
            after.overlay_written(&fin_entry, &fin_exit)
        } else {
            FlowInfo::unreachable()
        }
    }

    /// Close every declared resource, innermost declaration last, wrapper
    /// chains included
    fn close_auto(&mut self, auto_tracks: &[TrackId], mut state: FlowInfo) -> FlowInfo {
        if !state.is_reachable() {
            return state;
        }
        for &track in auto_tracks.iter().rev() {
            for link in self.tracker.chain_of(track) {
                state = state.with_track(link, ResourceState::Closed);
            }
        }
        state
    }

    // ---- expression evaluation ----

    fn eval(&mut self, expr: &'a Expr, state: FlowInfo) -> (FlowInfo, ValueInfo) {
        match &expr.kind {
            ExprKind::Null => (state, ValueInfo::new(Presence::Absent)),
            ExprKind::Literal | ExprKind::Bool(_) => (state, ValueInfo::new(Presence::Present)),
            ExprKind::Use(var) => {
                let presence = state.presence_of(*var);
                let track = state.binding_of(*var);
                (state, ValueInfo { presence, track })
            }
            ExprKind::Call {
                target,
                receiver,
                args,
            } => self.eval_call(*target, receiver.as_deref(), args, expr.span, state),
            ExprKind::Construct { target, args } => {
                self.eval_construct(*target, args, expr.span, state)
            }
            ExprKind::Boxed(inner) => {
                // Boxing always yields a fresh present reference
                let (state, _) = self.eval(inner, state);
                (state, ValueInfo::new(Presence::Present))
            }
            ExprKind::Ternary {
                condition,
                then_value,
                else_value,
            } => {
                let (true_state, false_state) = self.eval_condition(condition, state);
                let mut arms = Vec::with_capacity(2);
                if true_state.is_reachable() {
                    arms.push(self.eval(then_value, true_state));
                }
                if false_state.is_reachable() {
                    arms.push(self.eval(else_value, false_state));
                }
                let (state, value) = merge_values(arms);
                (state, value.unwrap_or(ValueInfo::new(Presence::Unknown)))
            }
            ExprKind::SwitchValue { scrutinee, arms } => {
                let (state, _) = self.eval(scrutinee, state);
                let evaluated = arms
                    .iter()
                    .map(|arm| self.eval(arm, state.clone()))
                    .collect();
                let (state, value) = merge_values(evaluated);
                (state, value.unwrap_or(ValueInfo::new(Presence::Unknown)))
            }
            ExprKind::NullCheck { .. } => (state, ValueInfo::new(Presence::Present)),
            ExprKind::Closure { captures } => {
                let mut state = state;
                // An open resource captured by a closure outlives the
                // routine's control flow
                for var in captures {
                    if let Some(track) = state.binding_of(*var) {
                        state = self.escape_track(state, track);
                    }
                }
                (state, ValueInfo::new(Presence::Present))
            }
        }
    }

    fn eval_call(
        &mut self,
        target: crate::ids::DeclId,
        receiver: Option<&'a Expr>,
        args: &'a [Expr],
        span: SourceSpan,
        state: FlowInfo,
    ) -> (FlowInfo, ValueInfo) {
        let inherit = self.config.inherit_absence_contracts;

        let mut state = state;
        let mut receiver_value = None;
        if let Some(recv) = receiver {
            let (next, value) = self.eval(recv, state);
            state = next;
            self.check_deref(value.presence, self.expr_var_name(recv), recv.span);
            // A dereference that did not fault proves the receiver present
            if let ExprKind::Use(var) = recv.kind {
                state = state.with_presence(var, Presence::Present);
            }
            receiver_value = Some(value);
        }

        let mut arg_values = Vec::with_capacity(args.len());
        for arg in args {
            let (next, value) = self.eval(arg, state);
            state = next;
            arg_values.push(value);
        }

        let decl = self.store.decl(target);
        let is_helper = decl
            .map(|d| self.config.is_close_helper(&d.name))
            .unwrap_or(false);
        let closes_receiver = decl.map(|d| d.closes_receiver).unwrap_or(false);

        if closes_receiver {
            if let Some(track) = receiver_value.and_then(|v| v.track) {
                state = self.close_explicit(state, track, span);
            }
        }

        for (index, value) in arg_values.iter().enumerate() {
            if let Some(d) = decl {
                let resolved = self.store.resolve(target, ContractSlot::Param(index), inherit);
                if resolved.requires_presence() {
                    match value.presence {
                        Presence::Absent => {
                            let finding = Finding::new(
                                FindingKind::RequiredPresenceViolation,
                                Severity::Error,
                                args[index].span,
                                format!(
                                    "argument {} of `{}` requires presence but is definitely absent",
                                    index + 1,
                                    d.name
                                ),
                            );
                            self.report(finding);
                        }
                        Presence::PossiblyAbsent => {
                            let finding = Finding::new(
                                FindingKind::PotentialAbsenceDereference,
                                Severity::Warning,
                                args[index].span,
                                format!(
                                    "argument {} of `{}` requires presence but may be absent",
                                    index + 1,
                                    d.name
                                ),
                            );
                            self.report(finding);
                        }
                        _ => {}
                    }
                }
            }

            if let Some(track) = value.track {
                let closes_this = is_helper
                    || decl
                        .map(|d| d.closes_args.contains(&index))
                        .unwrap_or(false);
                if closes_this {
                    state = self.close_explicit(state, track, span);
                } else {
                    // Handed to a routine we cannot see through: the
                    // obligation leaves the local scope
                    state = self.escape_track(state, track);
                }
            }
        }

        if let Some(d) = decl {
            if self.config.include_guards_in_null_analysis {
                if let Some(index) = d.asserts_present {
                    if let Some(ExprKind::Use(var)) = args.get(index).map(|a| &a.kind) {
                        let guard = self.guard_for(span);
                        state = state.with_presence(*var, Presence::Protected(guard));
                    }
                }
            }
        }

        state = self.invalidate_fields(state);

        // A call declared to raise a checked failure is an exit point of
        // its own; the state before the normal return escapes along that
        // edge exactly like an explicit throw
        if let Some(d) = decl {
            for &ty in &d.throws {
                self.scopes
                    .route(ExitKind::Exception(ty), state.clone(), self.store);
            }
        }

        let presence = match decl {
            Some(d) if d.boxes_primitive => Presence::Present,
            Some(_) => {
                let resolved = self.store.resolve(target, ContractSlot::Return, inherit);
                if resolved.requires_presence() {
                    Presence::Present
                } else if resolved.allows_absence() {
                    Presence::PossiblyAbsent
                } else {
                    Presence::Unknown
                }
            }
            None => Presence::Unknown,
        };

        // A resource coming back from a plain call was produced elsewhere;
        // track it for close/escape modeling but without a local obligation
        let track = match decl {
            Some(d) if d.returns_resource => {
                let track = self.track_for(span, true);
                state = state.with_track(track, ResourceState::Open);
                Some(track)
            }
            _ => None,
        };

        let value = match track {
            Some(track) => ValueInfo::with_track(presence, track),
            None => ValueInfo::new(presence),
        };
        (state, value)
    }

    fn eval_construct(
        &mut self,
        target: crate::ids::DeclId,
        args: &'a [Expr],
        span: SourceSpan,
        state: FlowInfo,
    ) -> (FlowInfo, ValueInfo) {
        let inherit = self.config.inherit_absence_contracts;

        let mut state = state;
        let mut arg_values = Vec::with_capacity(args.len());
        for arg in args {
            let (next, value) = self.eval(arg, state);
            state = next;
            arg_values.push(value);
        }

        let decl = self.store.decl(target);
        let type_info = decl.and_then(|d| self.store.type_info(d.owner));
        let is_resource = type_info.map(|t| t.is_resource).unwrap_or(false);
        let close_is_noop = type_info.map(|t| t.close_is_noop).unwrap_or(false);
        let wraps_arg = decl.and_then(|d| d.wraps_arg);

        for (index, value) in arg_values.iter().enumerate() {
            if let Some(d) = decl {
                let resolved = self.store.resolve(target, ContractSlot::Param(index), inherit);
                if resolved.requires_presence() && value.presence == Presence::Absent {
                    let finding = Finding::new(
                        FindingKind::RequiredPresenceViolation,
                        Severity::Error,
                        args[index].span,
                        format!(
                            "argument {} of `{}` requires presence but is definitely absent",
                            index + 1,
                            d.name
                        ),
                    );
                    self.report(finding);
                } else if resolved.requires_presence()
                    && value.presence == Presence::PossiblyAbsent
                {
                    let finding = Finding::new(
                        FindingKind::PotentialAbsenceDereference,
                        Severity::Warning,
                        args[index].span,
                        format!(
                            "argument {} of `{}` requires presence but may be absent",
                            index + 1,
                            d.name
                        ),
                    );
                    self.report(finding);
                }
            }

            // A wrapped argument is owned through the wrapper; anything
            // else handed to the constructor escapes
            if let Some(track) = value.track {
                if wraps_arg != Some(index) {
                    state = self.escape_track(state, track);
                }
            }
        }

        // A failing constructor exits before any value exists; route the
        // state without the new track
        if let Some(d) = decl {
            for &ty in &d.throws {
                self.scopes
                    .route(ExitKind::Exception(ty), state.clone(), self.store);
            }
        }

        let track = if is_resource {
            let track = self.track_for(span, false);
            state = state.with_track(track, ResourceState::Open);
            // A wrapper whose release is an observable no-op does not
            // manage the inner value, so the chain is not formed
            if let Some(inner) = wraps_arg
                .and_then(|index| arg_values.get(index))
                .and_then(|v| v.track)
            {
                if close_is_noop {
                    trace!("wrapper chain broken by no-op release");
                } else {
                    self.tracker.chain(track, inner);
                }
            }
            Some(track)
        } else {
            None
        };

        state = self.invalidate_fields(state);

        let value = match track {
            Some(track) => ValueInfo::with_track(Presence::Present, track),
            None => ValueInfo::new(Presence::Present),
        };
        (state, value)
    }

    /// Evaluate a condition into its refined true and false states.
    ///
    /// Constant conditions exclude an arm outright; equality checks
    /// against the absence marker refine the tested variable in both
    /// directions, with a guard slot proving presence on the non-absent
    /// side. Field variables are only refined under the syntactic field
    /// analysis option.
    fn eval_condition(&mut self, expr: &'a Expr, state: FlowInfo) -> (FlowInfo, FlowInfo) {
        match &expr.kind {
            ExprKind::Bool(true) => (state, FlowInfo::unreachable()),
            ExprKind::Bool(false) => (FlowInfo::unreachable(), state),
            ExprKind::NullCheck { var, is_absent } => {
                let is_field = self
                    .routine
                    .variable(*var)
                    .map(|v| v.storage == StorageKind::Field)
                    .unwrap_or(false);
                if is_field && !self.config.syntactic_presence_analysis_for_fields {
                    return (state.clone(), state);
                }

                let known = state.presence_of(*var);
                let guard = self.guard_for(expr.span);
                let proven = if known == Presence::Present {
                    Presence::Present
                } else {
                    Presence::Protected(guard)
                };

                let absent_side = state.with_presence(*var, Presence::Absent);
                let present_side = state.with_presence(*var, proven);

                let (mut true_state, mut false_state) = if *is_absent {
                    (absent_side, present_side)
                } else {
                    (present_side, absent_side)
                };

                // A check whose outcome the lattice already decides has
                // one dead arm
                let absent_arm_dead = known.is_proven_present();
                let present_arm_dead = known == Presence::Absent;
                if *is_absent {
                    if absent_arm_dead {
                        true_state = FlowInfo::unreachable();
                    }
                    if present_arm_dead {
                        false_state = FlowInfo::unreachable();
                    }
                } else {
                    if present_arm_dead {
                        true_state = FlowInfo::unreachable();
                    }
                    if absent_arm_dead {
                        false_state = FlowInfo::unreachable();
                    }
                }
                (true_state, false_state)
            }
            _ => {
                let (state, _) = self.eval(expr, state);
                (state.clone(), state)
            }
        }
    }

    // ---- shared helpers ----

    /// Store a value into a variable: contract check, presence update,
    /// binding update, field escape
    fn bind_value(
        &mut self,
        state: FlowInfo,
        target: VarId,
        value: ValueInfo,
        span: SourceSpan,
    ) -> FlowInfo {
        let routine = self.routine;
        let Some(var) = routine.variable(target) else {
            return state;
        };
        self.check_store(var, value.presence, span);

        let mut state = state
            .with_presence(target, value.presence)
            .without_binding(target);

        if let Some(track) = value.track {
            if var.storage == StorageKind::Field {
                // Stored into a field: the value outlives the routine
                state = self.escape_track(state, track);
            } else {
                if let Some(info) = self.tracker.info_mut(track) {
                    if info.name.is_none() {
                        info.name = Some(var.name.clone());
                    }
                }
                state = state.with_binding(target, track);
            }
        }
        state
    }

    fn check_store(&mut self, var: &Variable, presence: Presence, span: SourceSpan) {
        let inherit = self.config.inherit_absence_contracts;
        let resolved = match var.contract {
            ContractSite::Param { routine, index } => {
                self.store.resolve(routine, ContractSlot::Param(index), inherit)
            }
            ContractSite::Field(decl) => self.store.resolve(decl, ContractSlot::Field, inherit),
            ContractSite::Unannotated => return,
        };
        if !resolved.requires_presence() {
            return;
        }
        match presence {
            Presence::Absent => {
                let finding = Finding::new(
                    FindingKind::RequiredPresenceViolation,
                    Severity::Error,
                    span,
                    format!("`{}` requires presence but is assigned an absent value", var.name),
                )
                .with_variable(var.name.clone());
                self.report(finding);
            }
            Presence::PossiblyAbsent => {
                let finding = Finding::new(
                    FindingKind::PotentialAbsenceDereference,
                    Severity::Warning,
                    span,
                    format!("`{}` requires presence but may be assigned an absent value", var.name),
                )
                .with_variable(var.name.clone());
                self.report(finding);
            }
            _ => {}
        }
    }

    fn check_deref(&mut self, presence: Presence, name: Option<&str>, span: SourceSpan) {
        let shown = name.unwrap_or("this expression");
        match presence {
            Presence::Absent => {
                let mut finding = Finding::new(
                    FindingKind::RequiredPresenceViolation,
                    Severity::Error,
                    span,
                    format!("`{}` is definitely absent here", shown),
                );
                if let Some(name) = name {
                    finding = finding.with_variable(name);
                }
                self.report(finding);
            }
            Presence::PossiblyAbsent => {
                let mut finding = Finding::new(
                    FindingKind::PotentialAbsenceDereference,
                    Severity::Warning,
                    span,
                    format!("`{}` may be absent here", shown),
                );
                if let Some(name) = name {
                    finding = finding.with_variable(name);
                }
                self.report(finding);
            }
            _ => {}
        }
    }

    fn check_return_contract(&mut self, presence: Presence, span: SourceSpan) {
        let inherit = self.config.inherit_absence_contracts;
        let resolved = self
            .store
            .resolve(self.routine.decl, ContractSlot::Return, inherit);
        if !resolved.requires_presence() {
            return;
        }
        match presence {
            Presence::Absent => {
                self.report(Finding::new(
                    FindingKind::RequiredPresenceViolation,
                    Severity::Error,
                    span,
                    format!(
                        "`{}` requires a present return value but returns an absent one",
                        self.routine.name
                    ),
                ));
            }
            Presence::PossiblyAbsent => {
                self.report(Finding::new(
                    FindingKind::PotentialAbsenceDereference,
                    Severity::Warning,
                    span,
                    format!(
                        "`{}` requires a present return value but may return an absent one",
                        self.routine.name
                    ),
                ));
            }
            _ => {}
        }
    }

    /// Explicit release: close the whole wrapper chain, flag releases of
    /// values the enclosing construct releases anyway
    fn close_explicit(&mut self, mut state: FlowInfo, track: TrackId, span: SourceSpan) -> FlowInfo {
        let auto_managed = self
            .tracker
            .info(track)
            .map(|info| info.auto_managed)
            .unwrap_or(false);
        if auto_managed {
            if let Some(severity) = self
                .config
                .report_explicitly_closed_auto_closeable
                .as_severity()
            {
                let name = self.tracker.info(track).and_then(|info| info.name.clone());
                let mut finding = Finding::new(
                    FindingKind::RedundantExplicitRelease,
                    severity,
                    span,
                    match &name {
                        Some(n) => {
                            format!("`{}` is released automatically; this release is redundant", n)
                        }
                        None => "this value is released automatically; this release is redundant"
                            .to_string(),
                    },
                );
                if let Some(n) = name {
                    finding = finding.with_variable(n);
                }
                self.report(finding);
            }
        }
        for link in self.tracker.chain_of(track) {
            state = state.with_track(link, ResourceState::Closed);
        }
        state
    }

    /// Escape is one-way: an open obligation leaves the scope, anything
    /// already settled stays settled
    fn escape_track(&mut self, state: FlowInfo, track: TrackId) -> FlowInfo {
        if state.track_state(track) == ResourceState::Open {
            state.with_track(track, ResourceState::Escaped)
        } else {
            state
        }
    }

    /// Any call can overwrite fields, so locally guarded field facts do
    /// not survive one
    fn invalidate_fields(&mut self, state: FlowInfo) -> FlowInfo {
        if !self.config.syntactic_presence_analysis_for_fields {
            return state;
        }
        let mut state = state;
        for var in self.routine.variables.values() {
            if var.storage == StorageKind::Field {
                if let Presence::Protected(_) = state.presence_of(var.id) {
                    state = state.with_presence(var.id, Presence::Unknown);
                }
            }
        }
        state
    }

    fn expr_var_name(&self, expr: &Expr) -> Option<&'a str> {
        match expr.kind {
            ExprKind::Use(var) => self.routine.variable(var).map(|v| v.name.as_str()),
            _ => None,
        }
    }

    fn track_for(&mut self, span: SourceSpan, foreign: bool) -> TrackId {
        let key = span_key(span);
        if let Some(&track) = self.track_cache.get(&key) {
            return track;
        }
        let track = self.tracker.create(span, foreign);
        self.track_cache.insert(key, track);
        track
    }

    fn guard_for(&mut self, span: SourceSpan) -> GuardId {
        let key = span_key(span);
        if let Some(&guard) = self.guard_cache.get(&key) {
            return guard;
        }
        let guard = self.next_guard;
        self.next_guard = self.next_guard.next();
        self.guard_cache.insert(key, guard);
        guard
    }

    fn report(&mut self, finding: Finding) {
        if self.suppress == 0 {
            self.sink.report(finding);
        }
    }
}
