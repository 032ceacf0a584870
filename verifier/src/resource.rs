//! Bookkeeping for tracked resource values.
//!
//! Each expression that produces a closeable value gets one tracking
//! record for the whole routine. Per-path lifecycle state lives in the
//! flow lattice; this registry holds the path-independent facts: where
//! the value was born, what it wraps, whether the routine even owns the
//! obligation to release it.

use source_map::SourceSpan;

use crate::ids::collections::{new_id_map, IdMap};
use crate::ids::TrackId;

/// Path-independent facts about one tracked resource value
#[derive(Debug, Clone)]
pub struct TrackInfo {
    pub id: TrackId,
    /// Where the producing expression sits in the source
    pub origin: SourceSpan,
    /// Variable name to report under, when the value was ever bound
    pub name: Option<String>,
    /// Inner resource this one wraps, if constructed over another tracked value
    pub wraps: Option<TrackId>,
    /// Outer wrapper constructed over this one
    pub wrapped_by: Option<TrackId>,
    /// Declared in a try-with-resources header; released by the construct itself
    pub auto_managed: bool,
    /// Produced outside the routine (parameter, field read, plain call
    /// return); carries no local release obligation
    pub foreign: bool,
    /// A finding was already emitted for this track; suppress repeats
    pub reported: bool,
}

/// Registry of every tracked resource value in one routine
#[derive(Debug)]
pub struct ResourceTracker {
    tracks: IdMap<TrackId, TrackInfo>,
    next: TrackId,
}

impl ResourceTracker {
    pub fn new() -> Self {
        Self {
            tracks: new_id_map(),
            next: TrackId::first(),
        }
    }

    pub fn create(&mut self, origin: SourceSpan, foreign: bool) -> TrackId {
        let id = self.next;
        self.next = self.next.next();
        self.tracks.insert(
            id,
            TrackInfo {
                id,
                origin,
                name: None,
                wraps: None,
                wrapped_by: None,
                auto_managed: false,
                foreign,
                reported: false,
            },
        );
        id
    }

    /// Record that `outer` wraps `inner`. Closing the outer value closes the
    /// whole chain, so the inner track stops carrying its own obligation.
    pub fn chain(&mut self, outer: TrackId, inner: TrackId) {
        if let Some(info) = self.tracks.get_mut(&outer) {
            info.wraps = Some(inner);
        }
        if let Some(info) = self.tracks.get_mut(&inner) {
            info.wrapped_by = Some(outer);
        }
    }

    /// The track itself plus, transitively, everything it wraps
    pub fn chain_of(&self, outer: TrackId) -> Vec<TrackId> {
        let mut out = Vec::new();
        let mut cur = Some(outer);
        while let Some(id) = cur {
            // A malformed cycle would loop forever; chains are short
            if out.contains(&id) {
                break;
            }
            out.push(id);
            cur = self.tracks.get(&id).and_then(|i| i.wraps);
        }
        out
    }

    pub fn info(&self, id: TrackId) -> Option<&TrackInfo> {
        self.tracks.get(&id)
    }

    pub fn info_mut(&mut self, id: TrackId) -> Option<&mut TrackInfo> {
        self.tracks.get_mut(&id)
    }

    /// All tracks in creation order
    pub fn iter(&self) -> impl Iterator<Item = &TrackInfo> {
        self.tracks.values()
    }
}

impl Default for ResourceTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creation_order_is_iteration_order() {
        let mut tracker = ResourceTracker::new();
        let a = tracker.create(SourceSpan::unknown(), false);
        let b = tracker.create(SourceSpan::unknown(), true);
        let ids: Vec<_> = tracker.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![a, b]);
        assert!(!tracker.info(a).unwrap().foreign);
        assert!(tracker.info(b).unwrap().foreign);
    }

    #[test]
    fn test_chain_links_both_directions() {
        let mut tracker = ResourceTracker::new();
        let inner = tracker.create(SourceSpan::unknown(), false);
        let mid = tracker.create(SourceSpan::unknown(), false);
        let outer = tracker.create(SourceSpan::unknown(), false);
        tracker.chain(mid, inner);
        tracker.chain(outer, mid);

        assert_eq!(tracker.info(inner).unwrap().wrapped_by, Some(mid));
        assert_eq!(tracker.info(outer).unwrap().wraps, Some(mid));
        assert_eq!(tracker.chain_of(outer), vec![outer, mid, inner]);
    }

    #[test]
    fn test_chain_of_plain_track_is_itself() {
        let mut tracker = ResourceTracker::new();
        let a = tracker.create(SourceSpan::unknown(), false);
        assert_eq!(tracker.chain_of(a), vec![a]);
    }
}
