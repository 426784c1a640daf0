// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Diagnostics with locations and stable formatting.
//!
//! The one-line format is a contract with the test harness:
//! `<file>:<line>:<col> - <severity>: <message>`, path separators
//! normalized to forward slashes. Syntax errors carry a
//! `Syntax error: ` message prefix.

use crate::core::parser::{ParseError, ParseErrorKind};
use crate::core::source::SourceMap;
use crate::core::tokenizer::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub span: Span,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>, span: Span) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
            span,
        }
    }

    pub fn warning(message: impl Into<String>, span: Span) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
            span,
        }
    }

    pub fn from_parse_error(err: &ParseError) -> Self {
        let message = match err.kind {
            ParseErrorKind::Syntax => format!("Syntax error: {}", err.message),
            ParseErrorKind::Resource => err.message.clone(),
        };
        Self::error(message, err.span)
    }

    /// The stable one-line form.
    pub fn format(&self, sources: &SourceMap) -> String {
        format!(
            "{}:{}:{} - {}: {}",
            sources.name(self.span.file),
            self.span.line,
            self.span.col_start,
            self.severity.as_str(),
            self.message
        )
    }

    /// One-line form followed by the offending source line with a caret.
    pub fn format_with_context(&self, sources: &SourceMap) -> String {
        let mut out = self.format(sources);
        if let Some(line) = sources.line(self.span.file, self.span.line) {
            out.push('\n');
            out.push_str(&format!("{:>5} | {}\n", self.span.line, line));
            let caret_col = (self.span.col_start as usize).saturating_sub(1);
            out.push_str(&format!("{:>5} | {}^", "", " ".repeat(caret_col)));
        }
        out
    }
}

/// Order diagnostics by (file, line, column); severity breaks ties so
/// errors precede warnings reported at the same spot.
pub fn sort_diagnostics(diagnostics: &mut [Diagnostic]) {
    diagnostics.sort_by_key(|d| {
        (
            d.span.file,
            d.span.line,
            d.span.col_start,
            matches!(d.severity, Severity::Warning),
        )
    });
}

#[must_use]
pub fn error_count(diagnostics: &[Diagnostic]) -> usize {
    diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .count()
}

#[cfg(test)]
mod tests {
    use super::{sort_diagnostics, Diagnostic};
    use crate::core::source::SourceMap;
    use crate::core::tokenizer::Span;

    #[test]
    fn format_is_stable() {
        let mut sources = SourceMap::new();
        let file = sources.add_file("dir\\main.asm", "lda #zz\n");
        let diag = Diagnostic::error("Undefined symbol: zz", Span::new(file, 1, 6, 8));
        assert_eq!(
            diag.format(&sources),
            "dir/main.asm:1:6 - error: Undefined symbol: zz"
        );
    }

    #[test]
    fn context_points_at_column() {
        let mut sources = SourceMap::new();
        let file = sources.add_file("m.asm", "  bne far\n");
        let diag = Diagnostic::error("Branch target out of range", Span::new(file, 1, 3, 6));
        let text = diag.format_with_context(&sources);
        let caret_line = text.lines().last().unwrap();
        assert_eq!(caret_line.find('^'), Some(10));
    }

    #[test]
    fn diagnostics_sort_by_position() {
        let mut sources = SourceMap::new();
        let a = sources.add_file("a.asm", "");
        let b = sources.add_file("b.asm", "");
        let mut diags = vec![
            Diagnostic::error("third", Span::new(b, 1, 1, 1)),
            Diagnostic::error("second", Span::new(a, 2, 5, 6)),
            Diagnostic::error("first", Span::new(a, 2, 1, 2)),
        ];
        sort_diagnostics(&mut diags);
        assert_eq!(diags[0].message, "first");
        assert_eq!(diags[1].message, "second");
        assert_eq!(diags[2].message, "third");
    }
}
