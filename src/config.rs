//! Compiler configuration
//!
//! Settings can be built in code, loaded from a JSON file, or assembled from
//! command line flags; flags given on the command line override file values.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CompileResult;

/// Native target language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Fortran,
    C,
}

impl Language {
    /// Whether whole-array expressions can be emitted without explicit loops
    pub fn has_vectors(&self) -> bool {
        match self {
            Language::Fortran => true,
            Language::C => false,
        }
    }

    /// File extension of generated sources
    pub fn extension(&self) -> &'static str {
        match self {
            Language::Fortran => "f90",
            Language::C => "c",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::Fortran => write!(f, "fortran"),
            Language::C => write!(f, "c"),
        }
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fortran" | "f90" => Ok(Language::Fortran),
            "c" => Ok(Language::C),
            other => Err(format!("unknown language '{}', expected fortran or c", other)),
        }
    }
}

/// Configuration for one compilation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Target language for generated code
    pub language: Language,
    /// Also emit the Python C-API wrapper module
    pub wrapper: bool,
    /// Also emit the binding header
    pub header: bool,
    /// Name of the generated module; defaults to `mod`
    pub module_name: Option<String>,
    /// Keep `#$ omp`/`#$ acc` pragmas in the output
    pub pragmas: bool,
}

impl CompilerConfig {
    pub fn new(language: Language) -> Self {
        Self {
            language,
            ..Self::default()
        }
    }

    pub fn with_wrapper(mut self, wrapper: bool) -> Self {
        self.wrapper = wrapper;
        self
    }

    pub fn with_module_name(mut self, name: impl Into<String>) -> Self {
        self.module_name = Some(name.into());
        self
    }

    /// Name used for the generated module
    pub fn module_name(&self) -> &str {
        self.module_name.as_deref().unwrap_or("mod")
    }

    pub fn from_json(text: &str) -> CompileResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> CompileResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            language: Language::Fortran,
            wrapper: false,
            header: true,
            module_name: None,
            pragmas: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_vectors() {
        assert!(Language::Fortran.has_vectors());
        assert!(!Language::C.has_vectors());
    }

    #[test]
    fn test_language_from_str() {
        assert_eq!("C".parse::<Language>().unwrap(), Language::C);
        assert_eq!("fortran".parse::<Language>().unwrap(), Language::Fortran);
        assert!("rust".parse::<Language>().is_err());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = CompilerConfig::from_json(r#"{"language": "c", "wrapper": true}"#).unwrap();
        assert_eq!(config.language, Language::C);
        assert!(config.wrapper);
        assert!(config.header);
        assert_eq!(config.module_name(), "mod");
    }
}
