//! Per-variable lattice state and the confluence join
//!
//! A [`FlowInfo`] is an immutable snapshot of everything the engine knows
//! at one control-flow point: the presence state of every variable, the
//! lifecycle state of every resource tracking slot, which lexical variable
//! currently holds which slot, and whether the point is reachable at all.
//!
//! Snapshots are persistent values. Updating one returns a new snapshot,
//! so branch exploration never shares mutable state and needs no
//! copy-on-write bookkeeping.
//!
//! The join is deliberately asymmetric: a "definite" result requires
//! unanimity across all reachable incoming edges, while a "potential"
//! result requires only one occurrence. That asymmetry is what makes the
//! definite/potential severity split of the findings meaningful, and it
//! must not be "simplified".

use crate::ids::collections::{new_id_map, IdMap};
use crate::ids::{GuardId, TrackId, VarId};

/// Presence state of one variable at one program point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// Definitely the absence marker on every path reaching here
    Absent,
    /// Definitely carries a value on every path reaching here
    Present,
    /// A syntactic guard has locally proven presence even though the
    /// declared contract does not. Carries the guard site so joins can
    /// tell "same guard on all edges" from "guarded differently".
    Protected(GuardId),
    /// Absent on at least one path reaching here
    PossiblyAbsent,
    /// Nothing is known
    Unknown,
}

impl Presence {
    /// Whether a dereference of this state is proven safe
    pub fn is_proven_present(self) -> bool {
        matches!(self, Presence::Present | Presence::Protected(_))
    }
}

/// Lifecycle state of one resource tracking slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    /// Slot exists but the producing expression has not run on this path
    Unassigned,
    Open,
    /// Released on every path reaching here
    Closed,
    /// Released on some but not all paths reaching here
    PossiblyClosed,
    /// The release obligation left the local scope (returned, stored to a
    /// field, handed to a routine, captured). No further leak diagnostics.
    Escaped,
}

/// The presence/resource facts carried by one produced value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueInfo {
    pub presence: Presence,
    pub track: Option<TrackId>,
}

impl ValueInfo {
    pub fn new(presence: Presence) -> Self {
        Self {
            presence,
            track: None,
        }
    }

    pub fn with_track(presence: Presence, track: TrackId) -> Self {
        Self {
            presence,
            track: Some(track),
        }
    }
}

/// Pointwise presence join. Definite states require unanimity.
pub fn join_presence(a: Presence, b: Presence) -> Presence {
    use Presence::*;
    match (a, b) {
        (Absent, Absent) => Absent,
        (Present, Present) => Present,
        (Protected(g1), Protected(g2)) if g1 == g2 => Protected(g1),
        // Contract-proven presence on one edge subsumes a guard on the other
        (Protected(_), Present) | (Present, Protected(_)) => Present,
        // Differently-guarded edges: the local proof does not survive
        (Protected(_), Protected(_)) => Unknown,
        (Absent, _) | (_, Absent) => PossiblyAbsent,
        (PossiblyAbsent, _) | (_, PossiblyAbsent) => PossiblyAbsent,
        _ => Unknown,
    }
}

/// Pointwise resource join. `Unassigned` is the identity: a slot absent on
/// one edge contributes nothing. Escape is sticky per path but does not
/// excuse a leak on another path, so any mixed combination degrades to
/// `PossiblyClosed`.
pub fn join_resource(a: ResourceState, b: ResourceState) -> ResourceState {
    use ResourceState::*;
    match (a, b) {
        (Unassigned, other) | (other, Unassigned) => other,
        (Closed, Closed) => Closed,
        (Open, Open) => Open,
        (Escaped, Escaped) => Escaped,
        _ => PossiblyClosed,
    }
}

/// Value-level join used for ternary and switch-expression arms
pub fn join_value(a: ValueInfo, b: ValueInfo) -> ValueInfo {
    ValueInfo {
        presence: join_presence(a.presence, b.presence),
        // Arms yielding different tracking slots: the slots stay tracked
        // individually in the FlowInfo, the joined value just stops naming one
        track: if a.track == b.track { a.track } else { None },
    }
}

/// An immutable lattice snapshot at one CFG point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowInfo {
    reachable: bool,
    presence: IdMap<VarId, Presence>,
    bindings: IdMap<VarId, TrackId>,
    tracks: IdMap<TrackId, ResourceState>,
}

impl FlowInfo {
    /// The reachable, fact-free entry snapshot
    pub fn entry() -> Self {
        Self {
            reachable: true,
            presence: new_id_map(),
            bindings: new_id_map(),
            tracks: new_id_map(),
        }
    }

    /// Lattice bottom: contributes nothing to joins
    pub fn unreachable() -> Self {
        Self {
            reachable: false,
            presence: new_id_map(),
            bindings: new_id_map(),
            tracks: new_id_map(),
        }
    }

    pub fn is_reachable(&self) -> bool {
        self.reachable
    }

    /// Keep the facts but mark the point unreachable (after return/throw,
    /// the facts still matter for the routed snapshot that carried them away)
    pub fn into_unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    pub fn presence_of(&self, var: VarId) -> Presence {
        self.presence.get(&var).copied().unwrap_or(Presence::Unknown)
    }

    pub fn with_presence(&self, var: VarId, presence: Presence) -> Self {
        let mut next = self.clone();
        next.presence.insert(var, presence);
        next
    }

    pub fn binding_of(&self, var: VarId) -> Option<TrackId> {
        self.bindings.get(&var).copied()
    }

    pub fn with_binding(&self, var: VarId, track: TrackId) -> Self {
        let mut next = self.clone();
        next.bindings.insert(var, track);
        next
    }

    pub fn without_binding(&self, var: VarId) -> Self {
        let mut next = self.clone();
        next.bindings.shift_remove(&var);
        next
    }

    pub fn track_state(&self, track: TrackId) -> ResourceState {
        self.tracks
            .get(&track)
            .copied()
            .unwrap_or(ResourceState::Unassigned)
    }

    /// Deterministic overwrite of one tracking slot's state.
    ///
    /// A slot holds exactly one state per snapshot, so the invariant that a
    /// variable is never simultaneously `Open` and `Escaped` holds by
    /// construction.
    pub fn with_track(&self, track: TrackId, state: ResourceState) -> Self {
        let mut next = self.clone();
        next.tracks.insert(track, state);
        next
    }

    /// Tracking slots known to this snapshot, in creation order
    pub fn track_ids(&self) -> impl Iterator<Item = TrackId> + '_ {
        self.tracks.keys().copied()
    }

    /// Join at a confluence point. Bottom (unreachable) is the identity;
    /// definite states require agreement of both operands.
    pub fn join(&self, other: &FlowInfo) -> FlowInfo {
        if !self.reachable {
            return other.clone();
        }
        if !other.reachable {
            return self.clone();
        }

        let mut presence = new_id_map();
        for (&var, &p) in &self.presence {
            presence.insert(var, join_presence(p, other.presence_of(var)));
        }
        for (&var, &p) in &other.presence {
            if !presence.contains_key(&var) {
                presence.insert(var, join_presence(self.presence_of(var), p));
            }
        }

        // A binding survives a join only when both edges agree; correlating
        // diverged aliases is intentionally not attempted
        let mut bindings = new_id_map();
        for (&var, &track) in &self.bindings {
            if other.bindings.get(&var) == Some(&track) {
                bindings.insert(var, track);
            }
        }

        let mut tracks = new_id_map();
        for (&track, &state) in &self.tracks {
            tracks.insert(track, join_resource(state, other.track_state(track)));
        }
        for (&track, &state) in &other.tracks {
            if !tracks.contains_key(&track) {
                tracks.insert(track, join_resource(self.track_state(track), state));
            }
        }

        FlowInfo {
            reachable: true,
            presence,
            bindings,
            tracks,
        }
    }

    /// Apply to `self` exactly the facts a finally body wrote.
    ///
    /// `entry` and `exit` are the finally body's own entry and exit
    /// snapshots; any fact that differs between them (or is new at exit)
    /// overwrites the corresponding fact of `self`. Facts the finally did
    /// not touch keep whatever `self` carried in, so the distinction between
    /// "arrived via return" and "arrived normally" survives the finally.
    pub fn overlay_written(&self, entry: &FlowInfo, exit: &FlowInfo) -> FlowInfo {
        let mut out = self.clone();
        for (&var, &p) in &exit.presence {
            if entry.presence.get(&var) != Some(&p) {
                out.presence.insert(var, p);
            }
        }
        for (&track, &state) in &exit.tracks {
            if entry.tracks.get(&track) != Some(&state) {
                out.tracks.insert(track, state);
            }
        }
        for (&var, &track) in &exit.bindings {
            if entry.bindings.get(&var) != Some(&track) {
                out.bindings.insert(var, track);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(raw: u32) -> VarId {
        VarId::from_raw(raw)
    }

    fn track(raw: u32) -> TrackId {
        TrackId::from_raw(raw)
    }

    #[test]
    fn test_presence_join_requires_unanimity() {
        use Presence::*;
        assert_eq!(join_presence(Present, Present), Present);
        assert_eq!(join_presence(Absent, Absent), Absent);
        assert_eq!(join_presence(Present, Absent), PossiblyAbsent);
        assert_eq!(join_presence(Unknown, Absent), PossiblyAbsent);
        assert_eq!(join_presence(Present, Unknown), Unknown);
        assert_eq!(join_presence(Unknown, Unknown), Unknown);
    }

    #[test]
    fn test_protected_join_demotes_without_matching_guard() {
        use Presence::*;
        let g1 = GuardId::from_raw(1);
        let g2 = GuardId::from_raw(2);

        assert_eq!(join_presence(Protected(g1), Protected(g1)), Protected(g1));
        assert_eq!(join_presence(Protected(g1), Protected(g2)), Unknown);
        assert_eq!(join_presence(Protected(g1), Present), Present);
        assert_eq!(join_presence(Protected(g1), Absent), PossiblyAbsent);
        assert_eq!(join_presence(Protected(g1), Unknown), Unknown);
    }

    #[test]
    fn test_resource_join() {
        use ResourceState::*;
        assert_eq!(join_resource(Open, Open), Open);
        assert_eq!(join_resource(Closed, Closed), Closed);
        assert_eq!(join_resource(Open, Closed), PossiblyClosed);
        assert_eq!(join_resource(Escaped, Escaped), Escaped);
        // Escape on one path does not excuse the other path
        assert_eq!(join_resource(Escaped, Open), PossiblyClosed);
        assert_eq!(join_resource(Escaped, Closed), PossiblyClosed);
        // A slot that does not exist on one edge contributes nothing
        assert_eq!(join_resource(Unassigned, Open), Open);
        assert_eq!(join_resource(Closed, Unassigned), Closed);
    }

    #[test]
    fn test_unreachable_is_join_identity() {
        let a = FlowInfo::entry().with_presence(var(1), Presence::Present);
        let bottom = FlowInfo::unreachable();

        assert_eq!(a.join(&bottom), a);
        assert_eq!(bottom.join(&a), a);
        assert!(!bottom.join(&FlowInfo::unreachable()).is_reachable());
    }

    #[test]
    fn test_join_is_never_more_certain_than_operands() {
        let a = FlowInfo::entry()
            .with_presence(var(1), Presence::Present)
            .with_track(track(1), ResourceState::Open);
        let b = FlowInfo::entry()
            .with_presence(var(1), Presence::Absent)
            .with_track(track(1), ResourceState::Closed);

        let joined = a.join(&b);
        assert_eq!(joined.presence_of(var(1)), Presence::PossiblyAbsent);
        assert_eq!(joined.track_state(track(1)), ResourceState::PossiblyClosed);
    }

    #[test]
    fn test_join_drops_disagreeing_bindings() {
        let a = FlowInfo::entry().with_binding(var(1), track(1));
        let b = FlowInfo::entry().with_binding(var(1), track(2));
        assert_eq!(a.join(&b).binding_of(var(1)), None);

        let c = FlowInfo::entry().with_binding(var(1), track(1));
        assert_eq!(a.join(&c).binding_of(var(1)), Some(track(1)));
    }

    #[test]
    fn test_vars_known_on_one_edge_degrade_to_uncertain() {
        let a = FlowInfo::entry().with_presence(var(1), Presence::Present);
        let b = FlowInfo::entry();

        assert_eq!(a.join(&b).presence_of(var(1)), Presence::Unknown);

        let c = FlowInfo::entry().with_presence(var(2), Presence::Absent);
        assert_eq!(a.join(&c).presence_of(var(2)), Presence::PossiblyAbsent);
    }

    #[test]
    fn test_overlay_written_applies_only_finally_writes() {
        let incoming = FlowInfo::entry()
            .with_presence(var(1), Presence::Present)
            .with_presence(var(2), Presence::Absent)
            .with_track(track(1), ResourceState::Open);

        // The finally body saw var(1) as unknown, wrote var(2), closed track(1)
        let fin_entry = FlowInfo::entry()
            .with_presence(var(1), Presence::Unknown)
            .with_presence(var(2), Presence::Unknown)
            .with_track(track(1), ResourceState::PossiblyClosed);
        let fin_exit = fin_entry
            .with_presence(var(2), Presence::Present)
            .with_track(track(1), ResourceState::Closed);

        let out = incoming.overlay_written(&fin_entry, &fin_exit);
        // Untouched by the finally: keeps the incoming fact
        assert_eq!(out.presence_of(var(1)), Presence::Present);
        // Written by the finally: uniformly applied
        assert_eq!(out.presence_of(var(2)), Presence::Present);
        assert_eq!(out.track_state(track(1)), ResourceState::Closed);
    }

    #[test]
    fn test_value_join() {
        let a = ValueInfo::with_track(Presence::Present, track(1));
        let b = ValueInfo::with_track(Presence::Present, track(1));
        assert_eq!(join_value(a, b).track, Some(track(1)));

        let c = ValueInfo::new(Presence::Absent);
        let joined = join_value(a, c);
        assert_eq!(joined.presence, Presence::PossiblyAbsent);
        assert_eq!(joined.track, None);
    }
}
