//! Typed identifier vocabulary for the verifier
//!
//! Every entity the engine tracks (variables, tracking slots, declarations,
//! types, namespaces, guards, labels) gets its own lightweight u32 wrapper
//! so identifiers of different kinds cannot be mixed up. Identifiers are
//! scoped to one routine's analysis run (except `DeclId`/`TypeId`/
//! `NamespaceId`, which are owned by the contract store and live as long as
//! the front-end's binding tables).

use std::fmt;

/// Trait for ID types that can be created and validated
pub trait IdType: Copy + Clone + PartialEq + Eq + std::hash::Hash + fmt::Debug {
    /// Create a new ID from a raw u32 value
    fn from_raw(raw: u32) -> Self;

    /// Get the raw u32 value of this ID
    fn as_raw(self) -> u32;

    /// Check if this ID is valid (not a sentinel value)
    fn is_valid(self) -> bool;

    /// Get an invalid/null sentinel value
    fn invalid() -> Self;

    /// Create the first valid ID (typically used for ID generators)
    fn first() -> Self {
        Self::from_raw(0)
    }

    /// Get the next ID in sequence
    fn next(self) -> Self {
        Self::from_raw(self.as_raw().wrapping_add(1))
    }
}

/// Macro to define ID types with consistent behavior
macro_rules! define_id_type {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u32);

        impl $name {
            /// Create a new ID from a raw u32 value
            pub const fn from_raw(raw: u32) -> Self {
                Self(raw)
            }

            /// Get the raw u32 value of this ID
            pub const fn as_raw(self) -> u32 {
                self.0
            }

            /// Check if this ID is valid (not the sentinel value)
            pub const fn is_valid(self) -> bool {
                self.0 != u32::MAX
            }

            /// Get an invalid/null sentinel value
            pub const fn invalid() -> Self {
                Self(u32::MAX)
            }

            /// Create the first valid ID
            pub const fn first() -> Self {
                Self(0)
            }

            /// Get the next ID in sequence
            pub const fn next(self) -> Self {
                Self(self.0.wrapping_add(1))
            }
        }

        impl IdType for $name {
            fn from_raw(raw: u32) -> Self {
                Self::from_raw(raw)
            }

            fn as_raw(self) -> u32 {
                self.as_raw()
            }

            fn is_valid(self) -> bool {
                self.is_valid()
            }

            fn invalid() -> Self {
                Self::invalid()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::invalid()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.is_valid() {
                    write!(f, "{}({})", stringify!($name), self.0)
                } else {
                    write!(f, "{}(invalid)", stringify!($name))
                }
            }
        }
    };
}

define_id_type! {
    /// A declaration site inside one routine: local, parameter, or field
    VarId
}

define_id_type! {
    /// A synthetic resource tracking slot, bound 1:1 to one
    /// resource-producing expression
    TrackId
}

define_id_type! {
    /// A routine or field declaration in the front-end's binding tables
    DeclId
}

define_id_type! {
    /// A resolved type in the front-end's binding tables
    TypeId
}

define_id_type! {
    /// A namespace (package) in the front-end's binding tables
    NamespaceId
}

define_id_type! {
    /// One syntactic presence guard site (an equality check or assertion)
    GuardId
}

define_id_type! {
    /// A label attached to a loop, switch, or block
    LabelId
}

/// Convenience aliases for ID-keyed collections
///
/// Iteration order of these maps feeds finding order, so they are
/// insertion-ordered `IndexMap`s rather than hash maps: the determinism
/// property of `analyze` depends on it.
pub mod collections {
    use fxhash::FxBuildHasher;
    use indexmap::{IndexMap, IndexSet};

    /// Insertion-ordered map specialized for ID keys
    pub type IdMap<K, V> = IndexMap<K, V, FxBuildHasher>;

    /// Insertion-ordered set specialized for ID values
    pub type IdSet<T> = IndexSet<T, FxBuildHasher>;

    /// Create a new ID map
    pub fn new_id_map<K: super::IdType, V>() -> IdMap<K, V> {
        IdMap::default()
    }

    /// Create a new ID set
    pub fn new_id_set<T: super::IdType>() -> IdSet<T> {
        IdSet::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_basics() {
        let a = VarId::from_raw(3);
        assert_eq!(a.as_raw(), 3);
        assert!(a.is_valid());
        assert_eq!(a.next(), VarId::from_raw(4));

        let invalid = VarId::invalid();
        assert!(!invalid.is_valid());
        assert_eq!(VarId::default(), invalid);
    }

    #[test]
    fn test_id_display() {
        assert_eq!(format!("{}", TrackId::from_raw(7)), "TrackId(7)");
        assert_eq!(format!("{}", TrackId::invalid()), "TrackId(invalid)");
    }

    #[test]
    fn test_id_map_preserves_insertion_order() {
        let mut map = collections::new_id_map::<VarId, &str>();
        map.insert(VarId::from_raw(9), "nine");
        map.insert(VarId::from_raw(1), "one");
        map.insert(VarId::from_raw(4), "four");

        let keys: Vec<_> = map.keys().copied().collect();
        assert_eq!(
            keys,
            vec![VarId::from_raw(9), VarId::from_raw(1), VarId::from_raw(4)]
        );
    }
}
