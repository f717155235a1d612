//! Structured diagnostics with caret rendering.
//!
//! Both the lexer and the compiler report through [`Diagnostic`]; hosts
//! decide whether and where to print them (the REPL discards the first
//! compile attempt's diagnostics entirely).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Error,
    /// Secondary note attached to a prior error (e.g. a shadowed
    /// declaration site).
    Hint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub filename: String,
    /// 1-based line, 0 when no position applies.
    pub line: u32,
    /// Byte offset into the source text.
    pub offset: usize,
    pub message: String,
}

impl Diagnostic {
    pub fn error(
        filename: impl Into<String>,
        line: u32,
        offset: usize,
        message: impl Into<String>,
    ) -> Self {
        Diagnostic {
            severity: Severity::Error,
            filename: filename.into(),
            line,
            offset,
            message: message.into(),
        }
    }

    pub fn hint(
        filename: impl Into<String>,
        line: u32,
        offset: usize,
        message: impl Into<String>,
    ) -> Self {
        Diagnostic {
            severity: Severity::Hint,
            filename: filename.into(),
            line,
            offset,
            message: message.into(),
        }
    }

    /// Render with the offending source line and a caret marker.
    ///
    /// Offsets that fall outside `code` (possible when diagnostics come from
    /// synthetic token streams) degrade to the header line alone.
    pub fn render(&self, code: &str) -> String {
        let label = match self.severity {
            Severity::Error => "error",
            Severity::Hint => "hint",
        };
        let mut out = format!(
            "{}({}): {}: {}",
            self.filename, self.line, label, self.message
        );

        let offset = self.offset.min(code.len());
        let line_start = code[..offset].rfind('\n').map(|i| i + 1).unwrap_or(0);
        let line_end = code[offset..]
            .find('\n')
            .map(|i| offset + i)
            .unwrap_or(code.len());
        if line_start >= line_end {
            return out;
        }

        let line_text = &code[line_start..line_end];
        let column = code[line_start..offset].chars().count();
        out.push_str(&format!(
            "\n  {} | {}\n  {} | {}^",
            self.line,
            line_text,
            " ".repeat(self.line.to_string().len()),
            " ".repeat(column)
        ));
        out
    }
}

/// Render a batch of diagnostics against the source they refer to.
pub fn render_all(diags: &[Diagnostic], code: &str) -> String {
    diags
        .iter()
        .map(|d| d.render(code))
        .collect::<Vec<_>>()
        .join("\n")
}
