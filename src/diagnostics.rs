//! Severity-classified diagnostics collected during one compilation
//!
//! A `Diagnostics` context is created per compilation invocation and handed
//! by `&mut` reference to every pass. Warnings and errors accumulate so that a
//! single run surfaces as many independent problems as possible; a fatal
//! report is recorded and then returned as `CompileError::Fatal`, which
//! unwinds the current pass through `?`.

use std::fmt;

use colored::Colorize;
use serde::{Deserialize, Serialize};

use crate::error::{CompileError, CompileResult};

/// How bad a reported problem is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
            Severity::Fatal => write!(f, "fatal"),
        }
    }
}

/// Pipeline stage that produced a diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Syntax,
    Semantic,
    Codegen,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Syntax => write!(f, "syntax"),
            Stage::Semantic => write!(f, "semantic"),
            Stage::Codegen => write!(f, "codegen"),
        }
    }
}

/// A (line, column) position in the source, both 1-based
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

impl Location {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// One reported problem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub stage: Stage,
    pub message: String,
    /// Snippet or name identifying the offending construct
    pub symbol: Option<String>,
    pub location: Option<Location>,
    pub file: Option<String>,
}

impl Diagnostic {
    pub fn new(severity: Severity, stage: Stage, message: impl Into<String>) -> Self {
        Self {
            severity,
            stage,
            message: message.into(),
            symbol: None,
            location: None,
            file: None,
        }
    }

    pub fn warning(stage: Stage, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, stage, message)
    }

    pub fn error(stage: Stage, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, stage, message)
    }

    pub fn fatal(stage: Stage, message: impl Into<String>) -> Self {
        Self::new(Severity::Fatal, stage, message)
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn at(mut self, location: impl Into<Option<Location>>) -> Self {
        self.location = location.into();
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(file) = &self.file {
            write!(f, "{}:", file)?;
        }
        if let Some(loc) = &self.location {
            write!(f, "{}:", loc)?;
        }
        if self.file.is_some() || self.location.is_some() {
            write!(f, " ")?;
        }
        write!(f, "{} [{}]: {}", self.severity, self.stage, self.message)?;
        if let Some(symbol) = &self.symbol {
            write!(f, " ({})", symbol)?;
        }
        Ok(())
    }
}

/// Accumulating collector for one compilation invocation
#[derive(Debug, Default)]
pub struct Diagnostics {
    messages: Vec<Diagnostic>,
    file: Option<String>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget every message and the file context
    pub fn reset(&mut self) {
        self.messages.clear();
        self.file = None;
    }

    /// Subsequent reports without their own file inherit this one
    pub fn set_file_context(&mut self, file: impl Into<String>) {
        self.file = Some(file.into());
    }

    pub fn file_context(&self) -> Option<&str> {
        self.file.as_deref()
    }

    /// Record a diagnostic. Fatal diagnostics come back as an error so the
    /// caller unwinds with `?`.
    pub fn report(&mut self, mut diagnostic: Diagnostic) -> CompileResult<()> {
        if diagnostic.file.is_none() {
            diagnostic.file = self.file.clone();
        }
        tracing::debug!(severity = %diagnostic.severity, stage = %diagnostic.stage, "{}", diagnostic.message);
        let fatal = diagnostic.severity == Severity::Fatal;
        self.messages.push(diagnostic.clone());
        if fatal {
            Err(CompileError::Fatal(Box::new(diagnostic)))
        } else {
            Ok(())
        }
    }

    /// Record an error raised by a node constructor or helper as a fatal
    /// diagnostic and hand it back for propagation.
    pub fn fatal_from(&mut self, stage: Stage, err: CompileError, location: Option<Location>) -> CompileError {
        if let CompileError::Fatal(_) = err {
            return err;
        }
        match self.report(Diagnostic::fatal(stage, err.to_string()).at(location)) {
            Err(fatal) => fatal,
            Ok(()) => err,
        }
    }

    pub fn messages(&self) -> &[Diagnostic] {
        &self.messages
    }

    pub fn num_messages(&self) -> usize {
        self.messages.len()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.messages.iter().filter(|d| d.severity == severity).count()
    }

    pub fn has_errors(&self) -> bool {
        self.messages.iter().any(|d| d.severity >= Severity::Error)
    }

    /// End-of-stage check: fails if any error was accumulated
    pub fn check(&self) -> CompileResult<()> {
        let count = self.count(Severity::Error) + self.count(Severity::Fatal);
        if count > 0 {
            Err(CompileError::Errors { count })
        } else {
            Ok(())
        }
    }

    /// Human readable listing of every message, colored by severity
    pub fn render(&self) -> String {
        let mut out = String::new();
        for d in &self.messages {
            let head = match d.severity {
                Severity::Warning => "warning".yellow().bold(),
                Severity::Error => "error".red().bold(),
                Severity::Fatal => "fatal".red().bold().underline(),
            };
            let mut place = String::new();
            if let Some(file) = &d.file {
                place.push_str(file);
                place.push(':');
            }
            if let Some(loc) = &d.location {
                place.push_str(&loc.to_string());
                place.push(':');
            }
            if !place.is_empty() {
                out.push_str(&format!("{} ", place.bold()));
            }
            out.push_str(&format!("{}[{}]: {}", head, d.stage, d.message));
            if let Some(symbol) = &d.symbol {
                out.push_str(&format!(" {}", format!("({})", symbol).cyan()));
            }
            out.push('\n');
        }
        out
    }

    pub fn to_json(&self) -> CompileResult<String> {
        Ok(serde_json::to_string_pretty(&self.messages)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errors_accumulate() {
        let mut diags = Diagnostics::new();
        diags.report(Diagnostic::warning(Stage::Semantic, "unused decorator")).unwrap();
        diags.report(Diagnostic::error(Stage::Semantic, "dtype mismatch")).unwrap();
        diags.report(Diagnostic::error(Stage::Semantic, "rank mismatch")).unwrap();

        assert_eq!(diags.num_messages(), 3);
        assert!(diags.has_errors());
        assert!(matches!(diags.check(), Err(CompileError::Errors { count: 2 })));
    }

    #[test]
    fn test_fatal_unwinds() {
        let mut diags = Diagnostics::new();
        let result = diags.report(Diagnostic::fatal(Stage::Semantic, "undefined symbol"));
        assert!(matches!(result, Err(CompileError::Fatal(_))));
        assert_eq!(diags.count(Severity::Fatal), 1);
    }

    #[test]
    fn test_file_context_is_inherited() {
        let mut diags = Diagnostics::new();
        diags.set_file_context("mod.py");
        diags
            .report(Diagnostic::warning(Stage::Syntax, "odd").at(Location::new(3, 4)))
            .unwrap();
        assert_eq!(diags.messages()[0].file.as_deref(), Some("mod.py"));
        assert_eq!(diags.messages()[0].to_string(), "mod.py:3:4: warning [syntax]: odd");
    }

    #[test]
    fn test_reset() {
        let mut diags = Diagnostics::new();
        diags.set_file_context("a.py");
        diags.report(Diagnostic::error(Stage::Codegen, "x")).unwrap();
        diags.reset();
        assert_eq!(diags.num_messages(), 0);
        assert!(diags.file_context().is_none());
        assert!(diags.check().is_ok());
    }
}
