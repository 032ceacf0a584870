//! Resolution of effective presence contracts
//!
//! A declaration's effective contract at a given slot (parameter position,
//! return, or field) is resolved by priority: explicit marker on the
//! declaration, then the default scoped to the immediate declaration, the
//! enclosing type, the enclosing namespace, then the contract inherited
//! from an overridden declaration, then nothing.
//!
//! Two conflict classes are detected and reported rather than guessed
//! around: an override that redeclares a parameter's required-presence
//! contract more strictly than the overridden declaration permitted, and a
//! scoped default that contradicts an explicitly inherited contract. An
//! explicit marker may contradict an inherited contract only by being
//! itself explicit.
//!
//! The declaration records here also carry the per-call facts the resource
//! tracker needs: release methods, closing helpers, wrapper constructors,
//! declared checked failures, and boxing routines.

use smallvec::SmallVec;
use source_map::SourceSpan;

use crate::ids::collections::{new_id_map, IdMap};
use crate::ids::{DeclId, NamespaceId, TypeId};

/// A declared presence marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// The declaration forbids the absence marker
    Required,
    /// The declaration admits the absence marker
    Optional,
}

/// The slot of a declaration a contract applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractSlot {
    Param(usize),
    Return,
    Field,
}

/// Where a resolved contract came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    Explicit,
    DeclDefault,
    TypeDefault,
    NamespaceDefault,
    Inherited,
    Unspecified,
}

/// The result of contract resolution for one slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    pub marker: Option<Marker>,
    pub provenance: Provenance,
}

impl Resolved {
    pub const NONE: Resolved = Resolved {
        marker: None,
        provenance: Provenance::Unspecified,
    };

    pub fn requires_presence(&self) -> bool {
        self.marker == Some(Marker::Required)
    }

    pub fn allows_absence(&self) -> bool {
        self.marker == Some(Marker::Optional)
    }

    fn is_default(&self) -> bool {
        matches!(
            self.provenance,
            Provenance::DeclDefault | Provenance::TypeDefault | Provenance::NamespaceDefault
        )
    }
}

/// A routine or field declaration as the verifier sees it
#[derive(Debug, Clone)]
pub struct MethodDecl {
    pub id: DeclId,
    pub name: String,
    pub owner: TypeId,
    pub span: SourceSpan,
    pub param_count: usize,
    /// Explicit markers per parameter position; `None` means unannotated
    pub explicit_params: Vec<Option<Marker>>,
    pub explicit_return: Option<Marker>,
    /// Explicit marker on a field declaration
    pub explicit_field: Option<Marker>,
    /// Default marker scoped to this one declaration
    pub default_marker: Option<Marker>,
    /// The declaration this one overrides, if any
    pub overrides: Option<DeclId>,
    /// Checked failure types this routine is declared to propagate
    pub throws: Vec<TypeId>,
    /// Whether calling this routine yields a resource the caller must not own
    pub returns_resource: bool,
    /// Whether this routine boxes a primitive into its reference form;
    /// its result is definitely present regardless of any other contract
    pub boxes_primitive: bool,
    /// Whether calling this on a receiver releases the receiver
    pub closes_receiver: bool,
    /// Argument positions this routine is known to release
    pub closes_args: SmallVec<[usize; 2]>,
    /// Argument position this routine asserts present (guard helper)
    pub asserts_present: Option<usize>,
    /// For constructors: argument position holding a resource this value wraps
    pub wraps_arg: Option<usize>,
}

impl MethodDecl {
    pub fn new(
        id: DeclId,
        name: impl Into<String>,
        owner: TypeId,
        span: SourceSpan,
        param_count: usize,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            owner,
            span,
            param_count,
            explicit_params: vec![None; param_count],
            explicit_return: None,
            explicit_field: None,
            default_marker: None,
            overrides: None,
            throws: Vec::new(),
            returns_resource: false,
            boxes_primitive: false,
            closes_receiver: false,
            closes_args: SmallVec::new(),
            asserts_present: None,
            wraps_arg: None,
        }
    }

    fn explicit_at(&self, slot: ContractSlot) -> Option<Marker> {
        match slot {
            ContractSlot::Param(i) => self.explicit_params.get(i).copied().flatten(),
            ContractSlot::Return => self.explicit_return,
            ContractSlot::Field => self.explicit_field,
        }
    }
}

/// A type in the front-end's binding tables
#[derive(Debug, Clone)]
pub struct TypeInfo {
    pub id: TypeId,
    pub name: String,
    pub namespace: NamespaceId,
    pub supertype: Option<TypeId>,
    /// Default marker scoped to the whole type
    pub default_marker: Option<Marker>,
    /// Whether values of this type carry an explicit release obligation
    pub is_resource: bool,
    /// Whether this type overrides its release to an observable no-op;
    /// wrapper chains through such a type are broken
    pub close_is_noop: bool,
}

impl TypeInfo {
    pub fn new(id: TypeId, name: impl Into<String>, namespace: NamespaceId) -> Self {
        Self {
            id,
            name: name.into(),
            namespace,
            supertype: None,
            default_marker: None,
            is_resource: false,
            close_is_noop: false,
        }
    }
}

/// A namespace with an optional scoped default marker
#[derive(Debug, Clone)]
pub struct NamespaceInfo {
    pub id: NamespaceId,
    pub name: String,
    pub default_marker: Option<Marker>,
}

/// The kind of a detected contract problem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractIssueKind {
    /// A scoped default contradicts an explicitly inherited contract
    Conflict,
    /// An override tightens an inherited parameter contract
    IllegalNarrowing,
}

/// A contract problem detected during resolution, reported at the override site
#[derive(Debug, Clone)]
pub struct ContractIssue {
    pub kind: ContractIssueKind,
    pub decl: DeclId,
    pub slot: ContractSlot,
    pub span: SourceSpan,
    pub overridden: DeclId,
}

/// Resolved declarations, types and namespaces for everything the analyzed
/// routines reference
#[derive(Debug, Clone, Default)]
pub struct ContractStore {
    decls: IdMap<DeclId, MethodDecl>,
    types: IdMap<TypeId, TypeInfo>,
    namespaces: IdMap<NamespaceId, NamespaceInfo>,
}

impl ContractStore {
    pub fn new() -> Self {
        Self {
            decls: new_id_map(),
            types: new_id_map(),
            namespaces: new_id_map(),
        }
    }

    pub fn add_decl(&mut self, decl: MethodDecl) -> DeclId {
        let id = decl.id;
        self.decls.insert(id, decl);
        id
    }

    pub fn add_type(&mut self, info: TypeInfo) -> TypeId {
        let id = info.id;
        self.types.insert(id, info);
        id
    }

    pub fn add_namespace(&mut self, info: NamespaceInfo) -> NamespaceId {
        let id = info.id;
        self.namespaces.insert(id, info);
        id
    }

    pub fn decl(&self, id: DeclId) -> Option<&MethodDecl> {
        self.decls.get(&id)
    }

    pub fn type_info(&self, id: TypeId) -> Option<&TypeInfo> {
        self.types.get(&id)
    }

    /// Whether `sub` is `sup` or a declared subtype of it
    pub fn is_subtype(&self, sub: TypeId, sup: TypeId) -> bool {
        let mut current = Some(sub);
        while let Some(ty) = current {
            if ty == sup {
                return true;
            }
            current = self.types.get(&ty).and_then(|info| info.supertype);
        }
        false
    }

    /// Whether a thrown type can land in a handler of the declared type.
    /// Compatibility runs both ways: a handler for a supertype certainly
    /// receives the throw, a handler for a subtype may, since the concrete
    /// origin is unknown.
    pub fn catch_compatible(&self, thrown: TypeId, declared: TypeId) -> bool {
        self.is_subtype(thrown, declared) || self.is_subtype(declared, thrown)
    }

    /// Whether a handler of the declared type is guaranteed to receive the throw
    pub fn catch_definite(&self, thrown: TypeId, declared: TypeId) -> bool {
        self.is_subtype(thrown, declared)
    }

    /// Resolve the effective presence contract of `decl` at `slot`.
    ///
    /// Priority: explicit marker, declaration default, type default,
    /// namespace default, inherited contract (when `inherit` is on), none.
    pub fn resolve(&self, decl: DeclId, slot: ContractSlot, inherit: bool) -> Resolved {
        let Some(d) = self.decls.get(&decl) else {
            // Unresolvable target: degrade to no contract, analysis continues
            return Resolved::NONE;
        };

        if let Some(marker) = d.explicit_at(slot) {
            return Resolved {
                marker: Some(marker),
                provenance: Provenance::Explicit,
            };
        }
        if let Some(marker) = d.default_marker {
            return Resolved {
                marker: Some(marker),
                provenance: Provenance::DeclDefault,
            };
        }
        if let Some(marker) = self.types.get(&d.owner).and_then(|t| t.default_marker) {
            return Resolved {
                marker: Some(marker),
                provenance: Provenance::TypeDefault,
            };
        }
        let namespace = self
            .types
            .get(&d.owner)
            .map(|t| t.namespace)
            .and_then(|ns| self.namespaces.get(&ns));
        if let Some(marker) = namespace.and_then(|ns| ns.default_marker) {
            return Resolved {
                marker: Some(marker),
                provenance: Provenance::NamespaceDefault,
            };
        }
        if inherit {
            if let Some(overridden) = d.overrides {
                let inherited = self.resolve(overridden, slot, inherit);
                if inherited.marker.is_some() {
                    return Resolved {
                        marker: inherited.marker,
                        provenance: Provenance::Inherited,
                    };
                }
            }
        }
        Resolved::NONE
    }

    /// Detect contract conflicts introduced by `decl` against the
    /// declaration it overrides. Both conflict classes are reported at the
    /// override site; no silent overriding happens either way.
    pub fn check_decl(&self, decl: DeclId, inherit: bool) -> Vec<ContractIssue> {
        let mut issues = Vec::new();
        if !inherit {
            return issues;
        }
        let Some(d) = self.decls.get(&decl) else {
            return issues;
        };
        let Some(overridden) = d.overrides else {
            return issues;
        };

        let mut slots: Vec<ContractSlot> = (0..d.param_count).map(ContractSlot::Param).collect();
        slots.push(ContractSlot::Return);

        for slot in slots {
            let inherited = self.resolve(overridden, slot, inherit);
            let Some(inherited_marker) = inherited.marker else {
                continue;
            };
            let own = self.resolve(decl, slot, inherit);

            // Parameters are contravariant: demanding presence where the
            // overridden declaration admitted absence narrows the contract
            if let ContractSlot::Param(_) = slot {
                if d.explicit_at(slot) == Some(Marker::Required)
                    && inherited_marker == Marker::Optional
                {
                    issues.push(ContractIssue {
                        kind: ContractIssueKind::IllegalNarrowing,
                        decl,
                        slot,
                        span: d.span,
                        overridden,
                    });
                    continue;
                }
            }

            // A default may not quietly contradict an inherited explicit
            // marker; only an explicit marker can do that
            if own.is_default()
                && inherited.provenance == Provenance::Explicit
                && own.marker != Some(inherited_marker)
            {
                issues.push(ContractIssue {
                    kind: ContractIssueKind::Conflict,
                    decl,
                    slot,
                    span: d.span,
                    overridden,
                });
            }
        }

        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span() -> SourceSpan {
        SourceSpan::unknown()
    }

    fn store_with_type() -> (ContractStore, TypeId, NamespaceId) {
        let mut store = ContractStore::new();
        let ns = store.add_namespace(NamespaceInfo {
            id: NamespaceId::from_raw(0),
            name: "io".to_string(),
            default_marker: None,
        });
        let ty = store.add_type(TypeInfo::new(TypeId::from_raw(0), "Stream", ns));
        (store, ty, ns)
    }

    #[test]
    fn test_explicit_beats_defaults() {
        let (mut store, ty, _) = store_with_type();
        store.types.get_mut(&ty).unwrap().default_marker = Some(Marker::Optional);

        let mut decl = MethodDecl::new(DeclId::from_raw(1), "read", ty, span(), 1);
        decl.explicit_params[0] = Some(Marker::Required);
        store.add_decl(decl);

        let resolved = store.resolve(DeclId::from_raw(1), ContractSlot::Param(0), true);
        assert_eq!(resolved.marker, Some(Marker::Required));
        assert_eq!(resolved.provenance, Provenance::Explicit);

        // Unannotated return falls back to the type default
        let ret = store.resolve(DeclId::from_raw(1), ContractSlot::Return, true);
        assert_eq!(ret.marker, Some(Marker::Optional));
        assert_eq!(ret.provenance, Provenance::TypeDefault);
    }

    #[test]
    fn test_namespace_default_and_inheritance_order() {
        let (mut store, ty, ns) = store_with_type();
        store.namespaces.get_mut(&ns).unwrap().default_marker = Some(Marker::Required);

        let mut base = MethodDecl::new(DeclId::from_raw(1), "get", ty, span(), 0);
        base.explicit_return = Some(Marker::Optional);
        store.add_decl(base);

        let ty2 = store.add_type(TypeInfo::new(
            TypeId::from_raw(1),
            "Impl",
            NamespaceId::from_raw(9),
        ));
        let mut derived = MethodDecl::new(DeclId::from_raw(2), "get", ty2, span(), 0);
        derived.overrides = Some(DeclId::from_raw(1));
        store.add_decl(derived);

        // No defaults reach Impl's namespace, so inheritance applies
        let resolved = store.resolve(DeclId::from_raw(2), ContractSlot::Return, true);
        assert_eq!(resolved.marker, Some(Marker::Optional));
        assert_eq!(resolved.provenance, Provenance::Inherited);

        // With inheritance switched off nothing is inherited
        let bare = store.resolve(DeclId::from_raw(2), ContractSlot::Return, false);
        assert_eq!(bare, Resolved::NONE);

        // The base method's own namespace default is shadowed by its explicit marker
        let base_res = store.resolve(DeclId::from_raw(1), ContractSlot::Return, true);
        assert_eq!(base_res.provenance, Provenance::Explicit);
    }

    #[test]
    fn test_illegal_narrowing() {
        let (mut store, ty, _) = store_with_type();
        let mut base = MethodDecl::new(DeclId::from_raw(1), "put", ty, span(), 1);
        base.explicit_params[0] = Some(Marker::Optional);
        store.add_decl(base);

        let mut derived = MethodDecl::new(DeclId::from_raw(2), "put", ty, span(), 1);
        derived.overrides = Some(DeclId::from_raw(1));
        derived.explicit_params[0] = Some(Marker::Required);
        store.add_decl(derived);

        let issues = store.check_decl(DeclId::from_raw(2), true);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, ContractIssueKind::IllegalNarrowing);
        assert_eq!(issues[0].slot, ContractSlot::Param(0));
    }

    #[test]
    fn test_widening_is_allowed() {
        let (mut store, ty, _) = store_with_type();
        let mut base = MethodDecl::new(DeclId::from_raw(1), "put", ty, span(), 1);
        base.explicit_params[0] = Some(Marker::Required);
        store.add_decl(base);

        let mut derived = MethodDecl::new(DeclId::from_raw(2), "put", ty, span(), 1);
        derived.overrides = Some(DeclId::from_raw(1));
        derived.explicit_params[0] = Some(Marker::Optional);
        store.add_decl(derived);

        assert!(store.check_decl(DeclId::from_raw(2), true).is_empty());
    }

    #[test]
    fn test_default_conflicting_with_inherited_explicit() {
        let (mut store, ty, _) = store_with_type();
        let mut base = MethodDecl::new(DeclId::from_raw(1), "get", ty, span(), 0);
        base.explicit_return = Some(Marker::Optional);
        store.add_decl(base);

        let ty2 = store.add_type(TypeInfo::new(
            TypeId::from_raw(1),
            "Impl",
            NamespaceId::from_raw(0),
        ));
        let mut derived = MethodDecl::new(DeclId::from_raw(2), "get", ty2, span(), 0);
        derived.overrides = Some(DeclId::from_raw(1));
        derived.default_marker = Some(Marker::Required);
        store.add_decl(derived);

        let issues = store.check_decl(DeclId::from_raw(2), true);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, ContractIssueKind::Conflict);
        assert_eq!(issues[0].slot, ContractSlot::Return);

        // An explicit marker is allowed to contradict the inherited one
        store.decls.get_mut(&DeclId::from_raw(2)).unwrap().default_marker = None;
        store
            .decls
            .get_mut(&DeclId::from_raw(2))
            .unwrap()
            .explicit_return = Some(Marker::Required);
        assert!(store.check_decl(DeclId::from_raw(2), true).is_empty());
    }

    #[test]
    fn test_subtype_and_catch_compatibility() {
        let (mut store, base_ty, ns) = store_with_type();
        let mut derived = TypeInfo::new(TypeId::from_raw(5), "FileStream", ns);
        derived.supertype = Some(base_ty);
        store.add_type(derived);
        let unrelated = store.add_type(TypeInfo::new(TypeId::from_raw(6), "Timeout", ns));

        assert!(store.is_subtype(TypeId::from_raw(5), base_ty));
        assert!(!store.is_subtype(base_ty, TypeId::from_raw(5)));

        // Both directions are compatible catches; only supertype handlers are definite
        assert!(store.catch_compatible(TypeId::from_raw(5), base_ty));
        assert!(store.catch_compatible(base_ty, TypeId::from_raw(5)));
        assert!(store.catch_definite(TypeId::from_raw(5), base_ty));
        assert!(!store.catch_definite(base_ty, TypeId::from_raw(5)));
        assert!(!store.catch_compatible(TypeId::from_raw(5), unrelated));
    }

    #[test]
    fn test_unresolved_decl_degrades() {
        let store = ContractStore::new();
        let resolved = store.resolve(DeclId::from_raw(42), ContractSlot::Return, true);
        assert_eq!(resolved, Resolved::NONE);
    }
}
