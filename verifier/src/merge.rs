//! Confluence joins for every merge shape the driver encounters
//!
//! If/else arms, switch arms (statement- and value-level), ternary arms
//! and loop back-edges all funnel through these helpers. Arms the driver
//! has statically excluded as dead never reach a merge at all; they are
//! dropped before the join rather than contributing a bottom element that
//! happens to cancel out, so code that can never run cannot manufacture
//! certainty.

use crate::lattice::{join_value, FlowInfo, ValueInfo};

/// Join the snapshots of all live arms of a statement-level confluence.
///
/// Unreachable arms are absorbed; if every arm is unreachable the merge
/// point itself is unreachable.
pub fn merge_branches<I>(arms: I) -> FlowInfo
where
    I: IntoIterator<Item = FlowInfo>,
{
    arms.into_iter()
        .fold(FlowInfo::unreachable(), |acc, arm| acc.join(&arm))
}

/// Join arms that additionally yield a value (ternary, switch expression).
///
/// The produced value's presence and resource facts become the join of all
/// live arms' yields. Unreachable arms contribute neither state nor value.
pub fn merge_values(arms: Vec<(FlowInfo, ValueInfo)>) -> (FlowInfo, Option<ValueInfo>) {
    let mut state = FlowInfo::unreachable();
    let mut value: Option<ValueInfo> = None;

    for (arm_state, arm_value) in arms {
        if !arm_state.is_reachable() {
            continue;
        }
        state = state.join(&arm_state);
        value = Some(match value {
            Some(prev) => join_value(prev, arm_value),
            None => arm_value,
        });
    }

    (state, value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{TrackId, VarId};
    use crate::lattice::{Presence, ResourceState};

    fn var(raw: u32) -> VarId {
        VarId::from_raw(raw)
    }

    #[test]
    fn test_merge_branches_excludes_dead_arms() {
        let live = FlowInfo::entry().with_presence(var(1), Presence::Present);
        let dead = FlowInfo::unreachable();

        // The dead arm must not demote the certainty of the live one
        let merged = merge_branches(vec![live.clone(), dead]);
        assert_eq!(merged.presence_of(var(1)), Presence::Present);

        let all_dead = merge_branches(vec![FlowInfo::unreachable(), FlowInfo::unreachable()]);
        assert!(!all_dead.is_reachable());
    }

    #[test]
    fn test_merge_branches_joins_live_arms() {
        let then_arm = FlowInfo::entry().with_presence(var(1), Presence::Present);
        let else_arm = FlowInfo::entry().with_presence(var(1), Presence::Absent);

        let merged = merge_branches(vec![then_arm, else_arm]);
        assert_eq!(merged.presence_of(var(1)), Presence::PossiblyAbsent);
    }

    #[test]
    fn test_merge_values_joins_yields() {
        let t = TrackId::from_raw(1);
        let arm_a = (
            FlowInfo::entry().with_track(t, ResourceState::Open),
            ValueInfo::with_track(Presence::Present, t),
        );
        let arm_b = (FlowInfo::entry(), ValueInfo::new(Presence::Absent));

        let (state, value) = merge_values(vec![arm_a, arm_b]);
        let value = value.expect("two live arms");
        assert_eq!(value.presence, Presence::PossiblyAbsent);
        assert_eq!(value.track, None);
        assert!(state.is_reachable());
    }

    #[test]
    fn test_merge_values_skips_dead_arms() {
        let live = (FlowInfo::entry(), ValueInfo::new(Presence::Present));
        let dead = (FlowInfo::unreachable(), ValueInfo::new(Presence::Absent));

        let (_, value) = merge_values(vec![live, dead]);
        assert_eq!(value.expect("one live arm").presence, Presence::Present);
    }
}
