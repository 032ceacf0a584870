//! Flow-sensitive presence and resource-release verification
//!
//! The engine proves two families of properties about each analyzed
//! routine:
//! - presence contracts: a slot marked as requiring a value never
//!   receives the absence marker, and dereferences of possibly-absent
//!   values are flagged;
//! - resource release: every locally produced resource is released on
//!   every path out of the routine, including exceptional ones.
//!
//! The front-end lowers each routine into the structured control-flow
//! view in [`cfg`], registers declarations in a [`contracts::ContractStore`],
//! and calls [`driver::analyze`]. Findings come back ordered by source
//! position, ready for rendering through the `diagnostics` crate or for
//! JSON serialization.

pub mod cfg;
pub mod config;
pub mod contracts;
pub mod driver;
pub mod findings;
pub mod ids;
pub mod lattice;
pub mod logging;
pub mod merge;
pub mod resource;
pub mod scope;


pub use cfg::{Expr, ExprKind, FlowNode, Routine, Variable};
pub use config::{AnalysisConfig, ConfigError, SeverityLevel};
pub use contracts::{ContractStore, Marker, MethodDecl, NamespaceInfo, TypeInfo};
pub use driver::analyze;
pub use findings::{Finding, FindingKind, Severity};
pub use lattice::{FlowInfo, Presence, ResourceState};
