//! Source locations and user-facing diagnostics.

use std::fmt;

/// A 1-based line/column position in a source file.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

impl Location {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A source range, `begin` inclusive and `end` exclusive.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq)]
pub struct Source {
    pub begin: Location,
    pub end: Location,
}

impl Source {
    pub fn new(begin: Location, end: Location) -> Self {
        Self { begin, end }
    }

    /// A zero-width range at `line:column`.
    pub fn at(line: u32, column: u32) -> Self {
        let loc = Location::new(line, column);
        Self {
            begin: loc,
            end: loc,
        }
    }

    /// Returns `true` if no position was recorded.
    pub fn is_unknown(&self) -> bool {
        self.begin.line == 0
    }
}

/// Severity of a diagnostic.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warning => f.write_str("warning"),
            Self::Error => f.write_str("error"),
        }
    }
}

/// A single located message.
#[derive(Clone, Debug, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub source: Source,
}

impl Diagnostic {
    pub fn error(source: Source, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
            source,
        }
    }

    pub fn warning(source: Source, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
            source,
        }
    }

    /// Renders `<file>:<line>:<col> error: <message>` followed by the
    /// offending line of `text` and a caret under the column.
    pub fn render(&self, file: &str, text: &str) -> String {
        let mut out = String::new();
        self.render_into(&mut out, file, text);
        out
    }

    fn render_into(&self, out: &mut String, file: &str, text: &str) {
        use std::fmt::Write as _;

        if self.source.is_unknown() {
            let _ = writeln!(out, "{file} {}: {}", self.severity, self.message);
            return;
        }
        let loc = self.source.begin;
        let _ = writeln!(out, "{file}:{loc} {}: {}", self.severity, self.message);
        if let Some(line) = text.lines().nth(loc.line as usize - 1) {
            let _ = writeln!(out, "{line}");
            let pad: String = line
                .chars()
                .take(loc.column.saturating_sub(1) as usize)
                .map(|c| if c == '\t' { '\t' } else { ' ' })
                .collect();
            let _ = writeln!(out, "{pad}^");
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.source.is_unknown() {
            write!(f, "{}: {}", self.severity, self.message)
        } else {
            write!(f, "{} {}: {}", self.source.begin, self.severity, self.message)
        }
    }
}

/// Default cap on collected errors.
pub const DEFAULT_MAX_ERRORS: usize = 5;

/// An ordered list of diagnostics with an error cap.
///
/// Once `max_errors` errors have been collected, further errors are
/// dropped and the rendering ends with a "stopping after" line.
#[derive(Clone, Debug, PartialEq)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
    max_errors: usize,
    errors: usize,
    truncated: bool,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ERRORS)
    }
}

impl Diagnostics {
    pub fn new(max_errors: usize) -> Self {
        Self {
            entries: Vec::new(),
            max_errors: max_errors.max(1),
            errors: 0,
            truncated: false,
        }
    }

    /// Records a diagnostic. Errors past the cap are dropped.
    pub fn push(&mut self, diagnostic: Diagnostic) {
        if diagnostic.severity == Severity::Error {
            if self.errors >= self.max_errors {
                self.truncated = true;
                return;
            }
            self.errors += 1;
        }
        self.entries.push(diagnostic);
    }

    pub fn error(&mut self, source: Source, message: impl Into<String>) {
        self.push(Diagnostic::error(source, message));
    }

    /// Returns `true` once the cap has been hit and more errors were seen.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Returns `true` once `max_errors` errors have been collected.
    pub fn is_full(&self) -> bool {
        self.errors >= self.max_errors
    }

    pub fn has_errors(&self) -> bool {
        self.errors > 0
    }

    pub fn error_count(&self) -> usize {
        self.errors
    }

    pub fn max_errors(&self) -> usize {
        self.max_errors
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    /// Renders every diagnostic in encounter order.
    pub fn render(&self, file: &str, text: &str) -> String {
        let mut out = String::new();
        for diagnostic in &self.entries {
            diagnostic.render_into(&mut out, file, text);
        }
        if self.truncated {
            out.push_str(&format!(
                "{file} error: stopping after {} errors\n",
                self.max_errors
            ));
        }
        out
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, diagnostic) in self.entries.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{diagnostic}")?;
        }
        if self.truncated {
            write!(f, "\nerror: stopping after {} errors", self.max_errors)?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostics {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_with_caret() {
        let text = "fn main() {\n  let x = y;\n}\n";
        let d = Diagnostic::error(Source::at(2, 11), "unknown identifier `y`");
        assert_eq!(
            d.render("test.wgsl", text),
            "test.wgsl:2:11 error: unknown identifier `y`\n  let x = y;\n          ^\n"
        );
    }

    #[test]
    fn render_warning() {
        let d = Diagnostic::warning(Source::at(1, 1), "unused");
        assert_eq!(d.render("a.wgsl", "x"), "a.wgsl:1:1 warning: unused\nx\n^\n");
    }

    #[test]
    fn cap_appends_stopping_line() {
        let mut diags = Diagnostics::new(2);
        for col in 1..=4 {
            diags.error(Source::at(1, col), "bad");
        }
        assert_eq!(diags.error_count(), 2);
        assert!(diags.is_truncated());
        let text = diags.render("f.wgsl", "abcd");
        assert_eq!(
            text,
            "f.wgsl:1:1 error: bad\nabcd\n^\n\
             f.wgsl:1:2 error: bad\nabcd\n ^\n\
             f.wgsl error: stopping after 2 errors\n"
        );
    }

    #[test]
    fn warnings_do_not_count_towards_cap() {
        let mut diags = Diagnostics::new(1);
        diags.push(Diagnostic::warning(Source::at(1, 1), "w"));
        diags.error(Source::at(1, 1), "e");
        assert_eq!(diags.iter().count(), 2);
        assert!(diags.is_full());
        assert!(!diags.is_truncated());
    }

    #[test]
    fn unknown_location_renders_without_position() {
        let d = Diagnostic::error(Source::default(), "no entry point");
        assert_eq!(d.render("m.wgsl", ""), "m.wgsl error: no entry point\n");
        assert_eq!(d.to_string(), "error: no entry point");
    }
}
