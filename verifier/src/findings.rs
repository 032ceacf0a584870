//! Findings produced by the analysis and their diagnostic rendering

use serde::Serialize;

use diagnostics::{Diagnostic, DiagnosticBuilder};
use source_map::SourceSpan;

/// Every problem class the analysis can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    /// A locally owned resource is open on every path to some exit
    DefiniteResourceLeak,
    /// A locally owned resource is open on at least one path to some exit
    PotentialResourceLeak,
    /// An explicit release of a value the enclosing construct already releases
    RedundantExplicitRelease,
    /// A required-presence slot definitely receives an absent value
    RequiredPresenceViolation,
    /// A dereference or required slot may receive an absent value
    PotentialAbsenceDereference,
    /// A defaulted contract contradicts an inherited explicit one
    ContractConflict,
    /// An override explicitly tightens an inherited parameter contract
    IllegalContractNarrowing,
    /// A statement no path reaches
    DeadCode,
}

impl FindingKind {
    /// Stable machine-readable code, used in rendered diagnostics and JSON
    pub fn code(self) -> &'static str {
        match self {
            FindingKind::DefiniteResourceLeak => "unclosed-resource",
            FindingKind::PotentialResourceLeak => "potentially-unclosed-resource",
            FindingKind::RedundantExplicitRelease => "redundant-release",
            FindingKind::RequiredPresenceViolation => "required-absent",
            FindingKind::PotentialAbsenceDereference => "possibly-absent",
            FindingKind::ContractConflict => "contract-conflict",
            FindingKind::IllegalContractNarrowing => "contract-narrowing",
            FindingKind::DeadCode => "dead-code",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

/// One reported problem, pinned to a source span
#[derive(Debug, Clone, Serialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub severity: Severity,
    pub span: SourceSpan,
    /// Variable the finding is about, when one is known
    pub variable: Option<String>,
    pub message: String,
}

impl Finding {
    pub fn new(
        kind: FindingKind,
        severity: Severity,
        span: SourceSpan,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            severity,
            span,
            variable: None,
            message: message.into(),
        }
    }

    pub fn with_variable(mut self, name: impl Into<String>) -> Self {
        self.variable = Some(name.into());
        self
    }

    /// Ordering key for deterministic output: source position first, then
    /// kind, so runs over the same input always report identically
    pub fn sort_key(&self) -> (usize, usize, FindingKind) {
        (self.span.start.byte_offset, self.span.end.byte_offset, self.kind)
    }

    pub fn into_diagnostic(self) -> Diagnostic {
        let severity_builder = match self.severity {
            Severity::Error => DiagnosticBuilder::error(self.message.clone(), self.span),
            Severity::Warning => DiagnosticBuilder::warning(self.message.clone(), self.span),
        };
        let mut builder = severity_builder.code(self.kind.code());
        if let Some(name) = &self.variable {
            builder = builder.label(self.span, format!("`{}`", name));
        }
        builder.build()
    }
}

/// Render findings as a JSON array, for machine consumers
pub fn to_json(findings: &[Finding]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(findings)
}

/// Receiver for findings as the analysis emits them
pub trait FindingSink {
    fn report(&mut self, finding: Finding);
}

/// Sink that collects findings into a vector and sorts on demand
#[derive(Debug, Default)]
pub struct CollectingSink {
    findings: Vec<Finding>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_sorted(mut self) -> Vec<Finding> {
        self.findings.sort_by_key(|f| f.sort_key());
        self.findings
    }
}

impl FindingSink for CollectingSink {
    fn report(&mut self, finding: Finding) {
        self.findings.push(finding);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use source_map::{FileId, SourcePosition};

    fn span_at(offset: usize) -> SourceSpan {
        let pos = SourcePosition::new(1, offset + 1, offset);
        SourceSpan::new(pos, pos, FileId::new(0))
    }

    #[test]
    fn test_sink_orders_by_position_then_kind() {
        let mut sink = CollectingSink::new();
        sink.report(Finding::new(
            FindingKind::PotentialResourceLeak,
            Severity::Warning,
            span_at(40),
            "second",
        ));
        sink.report(Finding::new(
            FindingKind::RequiredPresenceViolation,
            Severity::Error,
            span_at(10),
            "first",
        ));
        sink.report(Finding::new(
            FindingKind::DefiniteResourceLeak,
            Severity::Error,
            span_at(40),
            "also second position, earlier kind",
        ));

        let sorted = sink.into_sorted();
        assert_eq!(sorted[0].message, "first");
        assert_eq!(sorted[1].kind, FindingKind::DefiniteResourceLeak);
        assert_eq!(sorted[2].kind, FindingKind::PotentialResourceLeak);
    }

    #[test]
    fn test_diagnostic_carries_code_and_label() {
        let finding = Finding::new(
            FindingKind::DefiniteResourceLeak,
            Severity::Error,
            span_at(3),
            "resource is never released",
        )
        .with_variable("reader");
        let diag = finding.into_diagnostic();
        assert_eq!(diag.code.as_deref(), Some("unclosed-resource"));
        assert!(diag.labels.iter().any(|l| l.message.contains("reader")));
    }

    #[test]
    fn test_finding_serializes_with_snake_case_kind() {
        let finding = Finding::new(
            FindingKind::PotentialAbsenceDereference,
            Severity::Warning,
            span_at(0),
            "value may be absent here",
        );
        let json = serde_json::to_string(&finding).unwrap();
        assert!(json.contains("\"potential_absence_dereference\""));
        assert!(json.contains("\"warning\""));
    }
}
