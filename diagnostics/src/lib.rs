//! Diagnostics library for rendering verifier findings
//!
//! This library provides Rust-style diagnostics with:
//! - Severity levels (Error, Warning, Info)
//! - Source code snippets with span underlining
//! - Secondary labels, notes and help text
//! - Plain, colored, and JSON output

use serde::Serialize;
use std::fmt;

// Re-export source mapping types from the source_map crate
pub use source_map::{FileId, SourceFile, SourceMap, SourcePosition, SourceSpan};

/// Severity level for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for DiagnosticSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticSeverity::Error => write!(f, "error"),
            DiagnosticSeverity::Warning => write!(f, "warning"),
            DiagnosticSeverity::Info => write!(f, "info"),
        }
    }
}

/// Style for diagnostic labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelStyle {
    Primary,
    Secondary,
}

/// A label that points to a span of code
#[derive(Debug, Clone, Serialize)]
pub struct Label {
    pub span: SourceSpan,
    pub message: String,
    pub style: LabelStyle,
}

impl Label {
    pub fn primary(span: SourceSpan, message: impl Into<String>) -> Self {
        Self {
            span,
            message: message.into(),
            style: LabelStyle::Primary,
        }
    }

    pub fn secondary(span: SourceSpan, message: impl Into<String>) -> Self {
        Self {
            span,
            message: message.into(),
            style: LabelStyle::Secondary,
        }
    }
}

/// A diagnostic message with severity, labels, notes and help text
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub severity: DiagnosticSeverity,
    pub code: Option<String>,
    pub message: String,
    pub span: SourceSpan,
    pub labels: Vec<Label>,
    pub notes: Vec<String>,
    pub help: Vec<String>,
}

/// Collection of diagnostics
#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnostics {
    pub diagnostics: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.diagnostics.extend(other.diagnostics);
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == DiagnosticSeverity::Error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == DiagnosticSeverity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == DiagnosticSeverity::Warning)
    }

    /// Machine-readable rendering for build-tool integration
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.diagnostics)
    }
}

/// Builder for creating diagnostics
pub struct DiagnosticBuilder {
    severity: DiagnosticSeverity,
    code: Option<String>,
    message: String,
    span: SourceSpan,
    labels: Vec<Label>,
    notes: Vec<String>,
    help: Vec<String>,
}

impl DiagnosticBuilder {
    pub fn new(severity: DiagnosticSeverity, message: impl Into<String>, span: SourceSpan) -> Self {
        Self {
            severity,
            code: None,
            message: message.into(),
            span,
            labels: vec![],
            notes: vec![],
            help: vec![],
        }
    }

    pub fn error(message: impl Into<String>, span: SourceSpan) -> Self {
        Self::new(DiagnosticSeverity::Error, message, span)
    }

    pub fn warning(message: impl Into<String>, span: SourceSpan) -> Self {
        Self::new(DiagnosticSeverity::Warning, message, span)
    }

    pub fn info(message: impl Into<String>, span: SourceSpan) -> Self {
        Self::new(DiagnosticSeverity::Info, message, span)
    }

    pub fn code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn label(mut self, span: SourceSpan, message: impl Into<String>) -> Self {
        self.labels.push(Label::primary(span, message));
        self
    }

    pub fn secondary_label(mut self, span: SourceSpan, message: impl Into<String>) -> Self {
        self.labels.push(Label::secondary(span, message));
        self
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn help(mut self, help_msg: impl Into<String>) -> Self {
        self.help.push(help_msg.into());
        self
    }

    pub fn build(self) -> Diagnostic {
        Diagnostic {
            severity: self.severity,
            code: self.code,
            message: self.message,
            span: self.span,
            labels: self.labels,
            notes: self.notes,
            help: self.help,
        }
    }
}

/// Formatter for displaying diagnostics as terminal text
pub struct ErrorFormatter {
    use_colors: bool,
}

impl ErrorFormatter {
    pub fn new() -> Self {
        Self { use_colors: false }
    }

    pub fn with_colors() -> Self {
        Self { use_colors: true }
    }

    pub fn format_diagnostics(&self, diagnostics: &Diagnostics, source_map: &SourceMap) -> String {
        let mut output = String::new();

        for (i, diagnostic) in diagnostics.diagnostics.iter().enumerate() {
            if i > 0 {
                output.push('\n');
            }
            output.push_str(&self.format_diagnostic(diagnostic, source_map));
        }

        output
    }

    pub fn format_diagnostic(&self, diagnostic: &Diagnostic, source_map: &SourceMap) -> String {
        let mut output = String::new();

        // Header: "warning[unclosed-resource]: message"
        if self.use_colors {
            let color = match diagnostic.severity {
                DiagnosticSeverity::Error => "\x1b[31m",
                DiagnosticSeverity::Warning => "\x1b[33m",
                DiagnosticSeverity::Info => "\x1b[36m",
            };
            output.push_str(color);
            output.push_str(&format!("{}", diagnostic.severity));
            if let Some(code) = &diagnostic.code {
                output.push_str(&format!("[{}]", code));
            }
            output.push_str("\x1b[0m: \x1b[1;97m");
            output.push_str(&diagnostic.message);
            output.push_str("\x1b[0m\n");
        } else {
            output.push_str(&format!("{}", diagnostic.severity));
            if let Some(code) = &diagnostic.code {
                output.push_str(&format!("[{}]", code));
            }
            output.push_str(&format!(": {}\n", diagnostic.message));
        }

        // Source snippet with underline
        if let Some(file) = source_map.get_file(diagnostic.span.file_id) {
            output.push_str(&format!(
                "  --> {}:{}:{}\n",
                file.name, diagnostic.span.start.line, diagnostic.span.start.column
            ));

            let line_num = diagnostic.span.start.line;
            let line_num_width = line_num.to_string().len();

            if let Some(line) = source_map.get_line(diagnostic.span.file_id, line_num) {
                output.push_str(&format!("{:width$} |\n", "", width = line_num_width));
                output.push_str(&format!("{} | {}\n", line_num, line));

                let padding = " ".repeat(diagnostic.span.start.column.saturating_sub(1));
                let underline_len = if diagnostic.span.start.line == diagnostic.span.end.line {
                    diagnostic
                        .span
                        .end
                        .column
                        .saturating_sub(diagnostic.span.start.column)
                        .max(1)
                } else {
                    line.len()
                        .saturating_sub(diagnostic.span.start.column.saturating_sub(1))
                        .max(1)
                };

                let underline = if self.use_colors {
                    format!("\x1b[31m{}\x1b[0m", "^".repeat(underline_len))
                } else {
                    "^".repeat(underline_len)
                };
                output.push_str(&format!(
                    "{:width$} | {}{}",
                    "",
                    padding,
                    underline,
                    width = line_num_width
                ));

                if let Some(label) = diagnostic
                    .labels
                    .iter()
                    .find(|l| l.style == LabelStyle::Primary)
                {
                    output.push_str(&format!(" {}", label.message));
                }
                output.push('\n');
            }
        }

        // Secondary labels reference related declarations (the overridden
        // routine for contract conflicts, the acquisition site for leaks)
        for label in &diagnostic.labels {
            if label.style == LabelStyle::Secondary {
                if let Some(file) = source_map.get_file(label.span.file_id) {
                    output.push_str(&format!(
                        "  --> {}:{}:{}: {}\n",
                        file.name, label.span.start.line, label.span.start.column, label.message
                    ));
                }
            }
        }

        for help_msg in &diagnostic.help {
            output.push_str("     help: ");
            output.push_str(help_msg);
            output.push('\n');
        }

        for note in &diagnostic.notes {
            output.push_str("note: ");
            output.push_str(note);
            output.push('\n');
        }

        output
    }
}

impl Default for ErrorFormatter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_span() -> SourceSpan {
        SourceSpan::new(
            SourcePosition::new(1, 5, 4),
            SourcePosition::new(1, 11, 10),
            FileId::new(0),
        )
    }

    #[test]
    fn test_diagnostic_builder() {
        let span = test_span();
        let diagnostic = DiagnosticBuilder::warning("resource is never released", span)
            .code("unclosed-resource")
            .label(span, "acquired here")
            .help("release it on every path, or use a managed resource block")
            .note("escape to a field or caller transfers the obligation")
            .build();

        assert_eq!(diagnostic.severity, DiagnosticSeverity::Warning);
        assert_eq!(diagnostic.code, Some("unclosed-resource".to_string()));
        assert_eq!(diagnostic.labels.len(), 1);
        assert_eq!(diagnostic.help.len(), 1);
        assert_eq!(diagnostic.notes.len(), 1);
    }

    #[test]
    fn test_format_plain() {
        let mut source_map = SourceMap::new();
        let file_id = source_map.add_file(
            "main.src".to_string(),
            "var input = open(\"data.txt\");".to_string(),
        );
        let span = source_map.span_from_offsets(file_id, 4, 9).unwrap();

        let diagnostic = DiagnosticBuilder::warning("resource is never released", span)
            .code("unclosed-resource")
            .label(span, "acquired here")
            .build();

        let rendered = ErrorFormatter::new().format_diagnostic(&diagnostic, &source_map);
        assert!(rendered.contains("warning[unclosed-resource]"));
        assert!(rendered.contains("main.src:1:5"));
        assert!(rendered.contains("^^^^^ acquired here"));
    }

    #[test]
    fn test_has_errors() {
        let mut diagnostics = Diagnostics::new();
        diagnostics.push(DiagnosticBuilder::warning("w", test_span()).build());
        assert!(!diagnostics.has_errors());

        diagnostics.push(DiagnosticBuilder::error("e", test_span()).build());
        assert!(diagnostics.has_errors());
        assert_eq!(diagnostics.errors().count(), 1);
        assert_eq!(diagnostics.warnings().count(), 1);
    }

    #[test]
    fn test_json_rendering() {
        let mut diagnostics = Diagnostics::new();
        diagnostics.push(
            DiagnosticBuilder::warning("resource is never released", test_span())
                .code("unclosed-resource")
                .build(),
        );

        let json = diagnostics.to_json().unwrap();
        assert!(json.contains("\"unclosed-resource\""));
        assert!(json.contains("\"warning\""));
    }
}
