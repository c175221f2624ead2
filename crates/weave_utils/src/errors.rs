use ariadne::{Color, Label, Report, ReportKind, Source};
use colored::Colorize;
use weave_span::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticSeverity {
    Error,
    Warning,
    Info,
}

impl DiagnosticSeverity {
    pub fn name(&self) -> &'static str {
        match self {
            DiagnosticSeverity::Error => "error",
            DiagnosticSeverity::Warning => "warning",
            DiagnosticSeverity::Info => "info",
        }
    }
}

/// A reportable finding. Weaving diagnostics usually point at a member; the
/// span is only present when the module was read from text.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    severity: DiagnosticSeverity,
    source_id: String,
    span: Option<Span>,
    message: String,
    label: Option<String>,
    suggestion: Option<String>,
    help: Option<String>,
}

impl Diagnostic {
    pub fn new<S: Into<String>>(
        severity: DiagnosticSeverity,
        source_id: S,
        span: Option<Span>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            source_id: source_id.into(),
            span,
            message: message.into(),
            label: None,
            suggestion: None,
            help: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn severity(&self) -> DiagnosticSeverity {
        self.severity
    }

    pub fn span(&self) -> Option<Span> {
        self.span
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn suggestion(&self) -> Option<&str> {
        self.suggestion.as_deref()
    }

    pub fn help(&self) -> Option<&str> {
        self.help.as_deref()
    }

    pub fn is_error(&self) -> bool {
        self.severity == DiagnosticSeverity::Error
    }

    pub fn report_kind(&self) -> ReportKind<'_> {
        match self.severity {
            DiagnosticSeverity::Error => ReportKind::Error,
            DiagnosticSeverity::Warning => ReportKind::Warning,
            DiagnosticSeverity::Info => ReportKind::Advice,
        }
    }

    /// Create an error diagnostic
    pub fn error(source_id: impl Into<String>, span: Option<Span>, message: impl Into<String>) -> Self {
        Self::new(DiagnosticSeverity::Error, source_id, span, message)
    }

    /// Create a warning diagnostic
    pub fn warning(
        source_id: impl Into<String>,
        span: Option<Span>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(DiagnosticSeverity::Warning, source_id, span, message)
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.severity.name(), self.message)
    }
}

/// Render diagnostics to stderr. Diagnostics without a span, or emitted
/// without the module text, fall back to a single coloured line.
pub fn emit_diagnostics(diagnostics: &[Diagnostic], source: Option<&str>) {
    for diagnostic in diagnostics {
        match (diagnostic.span(), source) {
            (Some(span), Some(source)) => emit_report(diagnostic, span, source),
            _ => emit_line(diagnostic),
        }
    }
}

fn emit_report(diagnostic: &Diagnostic, span: Span, source: &str) {
    let color = match diagnostic.severity {
        DiagnosticSeverity::Error => Color::Red,
        DiagnosticSeverity::Warning => Color::Yellow,
        DiagnosticSeverity::Info => Color::Blue,
    };

    let span: std::ops::Range<usize> = span.into();
    let mut report = Report::build(
        diagnostic.report_kind(),
        diagnostic.source_id().to_string(),
        span.start,
    )
    .with_message(diagnostic.message());

    let label = Label::new((diagnostic.source_id().to_string(), span.clone())).with_color(color);
    report = match diagnostic.label() {
        Some(text) => report.with_label(label.with_message(text)),
        None => report.with_label(label),
    };

    if let Some(suggestion) = diagnostic.suggestion() {
        report = report.with_note(format!("Suggestion: {}", suggestion));
    }

    if let Some(help) = diagnostic.help() {
        report = report.with_note(help);
    }

    let _ = report
        .finish()
        .eprint((diagnostic.source_id().to_string(), Source::from(source)));
}

fn emit_line(diagnostic: &Diagnostic) {
    let tag = match diagnostic.severity {
        DiagnosticSeverity::Error => "error".red().bold(),
        DiagnosticSeverity::Warning => "warning".yellow().bold(),
        DiagnosticSeverity::Info => "info".blue().bold(),
    };
    eprintln!("{}: {} ({})", tag, diagnostic.message(), diagnostic.source_id());
    if let Some(suggestion) = diagnostic.suggestion() {
        eprintln!("  {} {}", "suggestion:".bold(), suggestion);
    }
    if let Some(help) = diagnostic.help() {
        eprintln!("  {} {}", "help:".bold(), help);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_attach_optional_parts() {
        let diagnostic = Diagnostic::warning("demo.cwil", Some(Span::new(3, 7)), "skipped")
            .with_label("here")
            .with_help("add an accessor");

        assert_eq!(diagnostic.severity(), DiagnosticSeverity::Warning);
        assert_eq!(diagnostic.label(), Some("here"));
        assert_eq!(diagnostic.help(), Some("add an accessor"));
        assert!(!diagnostic.is_error());
        assert_eq!(diagnostic.to_string(), "warning: skipped");
    }
}
