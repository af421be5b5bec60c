//! Result of compiling one module
//!
//! A [`CompiledModule`] holds every generated file by name together with the
//! diagnostics collected on the way. Nothing is written to disk here; the
//! binary decides where the files go.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::Language;
use crate::diagnostics::Diagnostic;
use crate::error::CompileResult;

/// What a generated file holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    /// Native source in the target language
    Source,
    /// Binding header with the C-callable prototypes
    Header,
    /// Python C-API extension module
    Wrapper,
    /// Array runtime included by generated C
    Runtime,
}

/// One generated file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputFile {
    pub name: String,
    pub kind: FileKind,
    pub contents: String,
}

/// Every file generated for one module
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledModule {
    pub module_name: String,
    pub language: Language,
    pub files: Vec<OutputFile>,
    /// Warnings raised by any stage; errors abort before a module exists
    pub diagnostics: Vec<Diagnostic>,
}

impl CompiledModule {
    pub fn new(module_name: impl Into<String>, language: Language) -> Self {
        Self { module_name: module_name.into(), language, files: Vec::new(), diagnostics: Vec::new() }
    }

    /// Add a file named after the module; wrappers get a `_wrapper` suffix
    pub fn add_file(&mut self, kind: FileKind, extension: &str, contents: String) {
        let name = match kind {
            FileKind::Wrapper => format!("{}_wrapper.{}", self.module_name, extension),
            FileKind::Runtime => crate::codegen::runtime::NDARRAYS_HEADER.to_string(),
            FileKind::Source | FileKind::Header => format!("{}.{}", self.module_name, extension),
        };
        self.files.push(OutputFile { name, kind, contents });
    }

    pub fn file(&self, kind: FileKind) -> Option<&OutputFile> {
        self.files.iter().find(|f| f.kind == kind)
    }

    /// Text of the native source
    pub fn source(&self) -> &str {
        self.file(FileKind::Source).map_or("", |f| f.contents.as_str())
    }

    pub fn header(&self) -> Option<&str> {
        self.file(FileKind::Header).map(|f| f.contents.as_str())
    }

    pub fn wrapper(&self) -> Option<&str> {
        self.file(FileKind::Wrapper).map(|f| f.contents.as_str())
    }

    pub fn to_json(&self) -> CompileResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl fmt::Display for CompiledModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Module '{}' ({})", self.module_name, self.language)?;
        for file in &self.files {
            writeln!(f, "  {} ({} lines)", file.name, file.contents.lines().count())?;
        }
        if !self.diagnostics.is_empty() {
            writeln!(f, "  {} diagnostic(s)", self.diagnostics.len())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_file_names() {
        let mut module = CompiledModule::new("geometry", Language::C);
        module.add_file(FileKind::Source, "c", "int x;\n".to_string());
        module.add_file(FileKind::Header, "h", String::new());
        module.add_file(FileKind::Wrapper, "c", String::new());
        module.add_file(FileKind::Runtime, "h", String::new());
        let names: Vec<&str> = module.files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["geometry.c", "geometry.h", "geometry_wrapper.c", "ndarrays.h"]);
        assert_eq!(module.source(), "int x;\n");
        assert!(module.wrapper().is_some());
    }

    #[test]
    fn test_summary_and_json() {
        let mut module = CompiledModule::new("mod", Language::Fortran);
        module.add_file(FileKind::Source, "f90", "module mod\nend module mod\n".to_string());
        assert_eq!(module.to_string(), "Module 'mod' (fortran)\n  mod.f90 (2 lines)\n");
        let json = module.to_json().unwrap();
        assert!(json.contains("\"kind\": \"source\""));
    }
}
