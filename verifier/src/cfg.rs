//! The per-routine control-flow view consumed by the verifier
//!
//! The front-end hands the engine one [`Routine`] per analyzed routine:
//! its declared variables and a structured body of [`FlowNode`]s. Nodes
//! form a tagged union over the fixed node-kind taxonomy (assignment,
//! call, branch, loop, switch, try/catch/finally, throw, return,
//! break/continue, resource declaration) and the driver walks them with
//! exhaustive pattern matching; there is no visitor hierarchy.
//!
//! Value-producing expressions are a second, smaller sum type ([`Expr`]).
//! The engine only distinguishes the shapes that affect presence or
//! resource state; everything else the front-end lowers to `Literal` or
//! drops before analysis.

use source_map::SourceSpan;

use crate::ids::collections::IdMap;
use crate::ids::{DeclId, LabelId, TypeId, VarId};

/// Where a variable's storage lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Local,
    Parameter,
    Field,
}

/// Which declared contract governs a variable's presence, if any
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractSite {
    /// Parameter at `index` of the declaring routine
    Param { routine: DeclId, index: usize },
    /// A field declaration
    Field(DeclId),
    /// Plain local with no declared contract
    Unannotated,
}

/// A declaration site inside one routine
///
/// Created when the CFG is built, immutable thereafter. Identifiers are
/// scoped to one routine's analysis run and discarded with it.
#[derive(Debug, Clone)]
pub struct Variable {
    pub id: VarId,
    pub name: String,
    pub storage: StorageKind,
    pub is_reference: bool,
    pub is_resource: bool,
    pub contract: ContractSite,
    pub span: SourceSpan,
}

/// One routine's analyzable view: variables plus a structured body
#[derive(Debug, Clone)]
pub struct Routine {
    /// The routine's own declaration (return contract, overrides, throws)
    pub decl: DeclId,
    pub name: String,
    pub variables: IdMap<VarId, Variable>,
    pub params: Vec<VarId>,
    pub body: Vec<FlowNode>,
}

impl Routine {
    pub fn variable(&self, id: VarId) -> Option<&Variable> {
        self.variables.get(&id)
    }
}

/// A value-producing expression
#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: SourceSpan,
}

impl Expr {
    pub fn new(kind: ExprKind, span: SourceSpan) -> Self {
        Self { kind, span }
    }
}

/// Expression shapes the engine distinguishes
#[derive(Debug, Clone)]
pub enum ExprKind {
    /// The absence-of-value marker
    Null,
    /// Any value-carrying constant
    Literal,
    /// A boolean constant; drives dead-arm exclusion in conditions
    Bool(bool),
    /// Read of a local, parameter, or field variable
    Use(VarId),
    /// Call of a resolved routine, with optional receiver
    Call {
        target: DeclId,
        receiver: Option<Box<Expr>>,
        args: Vec<Expr>,
    },
    /// Object construction; resource-ness comes from the constructed type
    Construct { target: DeclId, args: Vec<Expr> },
    /// Primitive-to-reference boxing conversion
    Boxed(Box<Expr>),
    /// Conditional expression; arms join at the value level
    Ternary {
        condition: Box<Expr>,
        then_value: Box<Expr>,
        else_value: Box<Expr>,
    },
    /// Expression-producing switch; every arm's yield joins at the value level
    SwitchValue { scrutinee: Box<Expr>, arms: Vec<Expr> },
    /// Syntactic presence check: `var == null` (`is_absent`) or `var != null`
    NullCheck { var: VarId, is_absent: bool },
    /// A closure literal; open resources it captures escape the local scope
    Closure { captures: Vec<VarId> },
}

/// One structured control-flow node
#[derive(Debug, Clone)]
pub enum FlowNode {
    /// Variable declaration, optionally initialized. A resource-typed
    /// declaration is a resource-declaration node in the taxonomy.
    Declare {
        var: VarId,
        init: Option<Expr>,
        span: SourceSpan,
    },
    /// Assignment to a local, parameter, or field variable
    Assign {
        target: VarId,
        value: Expr,
        span: SourceSpan,
    },
    /// Expression evaluated for its effects
    Eval { expr: Expr, span: SourceSpan },
    /// Assertion-like guard; only counts as proof of presence when the
    /// configuration says so
    Assert { condition: Expr, span: SourceSpan },
    If {
        condition: Expr,
        then_body: Vec<FlowNode>,
        else_body: Vec<FlowNode>,
        span: SourceSpan,
    },
    /// Pre-tested loop; `condition: None` means loop-forever
    Loop {
        label: Option<LabelId>,
        condition: Option<Expr>,
        body: Vec<FlowNode>,
        span: SourceSpan,
    },
    Switch {
        label: Option<LabelId>,
        scrutinee: Expr,
        arms: Vec<SwitchArm>,
        span: SourceSpan,
    },
    Try {
        /// Deterministic-release declarations: each resource is opened on
        /// entry and released automatically on every exit of the try
        resources: Vec<(VarId, Expr)>,
        body: Vec<FlowNode>,
        catches: Vec<CatchClause>,
        finally_body: Option<Vec<FlowNode>>,
        span: SourceSpan,
    },
    Throw {
        ty: TypeId,
        value: Expr,
        span: SourceSpan,
    },
    Return {
        value: Option<Expr>,
        span: SourceSpan,
    },
    Break {
        label: Option<LabelId>,
        span: SourceSpan,
    },
    Continue {
        label: Option<LabelId>,
        span: SourceSpan,
    },
    Labeled {
        label: LabelId,
        body: Vec<FlowNode>,
        span: SourceSpan,
    },
}

impl FlowNode {
    pub fn span(&self) -> SourceSpan {
        match self {
            FlowNode::Declare { span, .. }
            | FlowNode::Assign { span, .. }
            | FlowNode::Eval { span, .. }
            | FlowNode::Assert { span, .. }
            | FlowNode::If { span, .. }
            | FlowNode::Loop { span, .. }
            | FlowNode::Switch { span, .. }
            | FlowNode::Try { span, .. }
            | FlowNode::Throw { span, .. }
            | FlowNode::Return { span, .. }
            | FlowNode::Break { span, .. }
            | FlowNode::Continue { span, .. }
            | FlowNode::Labeled { span, .. } => *span,
        }
    }
}

/// One arm of a statement switch
#[derive(Debug, Clone)]
pub struct SwitchArm {
    pub body: Vec<FlowNode>,
    pub is_default: bool,
    /// Whether control falls through into the next arm after this body
    pub falls_through: bool,
    pub span: SourceSpan,
}

/// One catch clause of a try
#[derive(Debug, Clone)]
pub struct CatchClause {
    /// Declared exception type; a thrown snapshot is routed here when the
    /// thrown type and this type are compatible in either direction
    pub ty: TypeId,
    /// Variable receiving the caught exception, if bound
    pub var: Option<VarId>,
    pub body: Vec<FlowNode>,
    pub span: SourceSpan,
}
