use ariadne::{Color, Config, Label, Report, ReportKind, Source};
use jqexec_span::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    severity: DiagnosticSeverity,
    source_id: String,
    span: Span,
    message: String,
    label: Option<String>,
    help: Option<String>,
}

impl Diagnostic {
    pub fn new<S: Into<String>>(
        severity: DiagnosticSeverity,
        source_id: S,
        span: Span,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            source_id: source_id.into(),
            span,
            message: message.into(),
            label: None,
            help: None,
        }
    }

    /// Create an error diagnostic
    pub fn error(source_id: impl Into<String>, span: Span, message: impl Into<String>) -> Self {
        Self::new(DiagnosticSeverity::Error, source_id, span, message)
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn severity(&self) -> DiagnosticSeverity {
        self.severity
    }

    pub fn span(&self) -> Span {
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

    pub fn help(&self) -> Option<&str> {
        self.help.as_deref()
    }

    pub fn report_kind(&self) -> ReportKind<'_> {
        match self.severity {
            DiagnosticSeverity::Error => ReportKind::Error,
            DiagnosticSeverity::Warning => ReportKind::Warning,
        }
    }

    fn build_report(&self, colored: bool) -> Report<'_, (String, std::ops::Range<usize>)> {
        let color = match self.severity {
            DiagnosticSeverity::Error => Color::Red,
            DiagnosticSeverity::Warning => Color::Yellow,
        };

        let span: std::ops::Range<usize> = self.span.into();
        let mut label = Label::new((self.source_id.clone(), span.clone()));
        if let Some(text) = self.label() {
            label = label.with_message(text);
        }
        if colored {
            label = label.with_color(color);
        }

        let mut report = Report::build(self.report_kind(), self.source_id.clone(), span.start)
            .with_config(Config::default().with_color(colored))
            .with_message(self.message())
            .with_label(label);

        if let Some(help) = self.help() {
            report = report.with_help(help);
        }

        report.finish()
    }
}

/// Render diagnostics to plain text, suitable for carrying inside an error value.
pub fn render_diagnostics(diagnostics: &[Diagnostic], source: &str) -> String {
    let mut buffer = Vec::new();
    for diagnostic in diagnostics {
        let cache = (diagnostic.source_id().to_string(), Source::from(source));
        if diagnostic.build_report(false).write(cache, &mut buffer).is_err() {
            // Fall back to the bare message if the span no longer fits the source.
            buffer.extend_from_slice(diagnostic.message().as_bytes());
            buffer.push(b'\n');
        }
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Print diagnostics to stderr with colour.
pub fn emit_diagnostics(diagnostics: &[Diagnostic], source: &str) {
    for diagnostic in diagnostics {
        let _ = diagnostic
            .build_report(true)
            .eprint((diagnostic.source_id().to_string(), Source::from(source)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendered_text_contains_message_and_help() {
        let diagnostic = Diagnostic::error("<filter>", Span::new(1, 4), "unknown function `lenght`")
            .with_label("not defined")
            .with_help("did you mean `length`?");
        let text = render_diagnostics(&[diagnostic], ".|lenght");
        assert!(text.contains("unknown function `lenght`"));
        assert!(text.contains("did you mean `length`?"));
    }
}
