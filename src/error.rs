//! Error types for the NumPy to native compiler

use thiserror::Error;

use crate::diagnostics::Diagnostic;

/// Result type for compilation operations
pub type CompileResult<T> = Result<T, CompileError>;

/// Compilation errors
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Lexer error at line {line}, column {column}: {message}")]
    LexerError { line: usize, column: usize, message: String },

    #[error("Parser error at line {line}: {message}")]
    ParseError { line: usize, message: String },

    #[error("Type error: {message}")]
    TypeError { message: String },

    #[error("Shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: String, got: String },

    #[error("Undefined symbol: {name}")]
    UndefinedSymbol { name: String },

    #[error("{construct} is not supported for target {target}")]
    Restriction { construct: String, target: String },

    #[error("Unsupported type {dtype}({precision}) for target {target}")]
    UnsupportedType { dtype: String, precision: u8, target: String },

    #[error("Specification error: {message}")]
    Specification { message: String },

    #[error("Evaluation error: {message}")]
    Evaluation { message: String },

    #[error("Fatal: {0}")]
    Fatal(Box<Diagnostic>),

    #[error("Compilation failed with {count} error(s)")]
    Errors { count: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),
}

impl CompileError {
    pub fn parse_error(line: usize, msg: impl Into<String>) -> Self {
        CompileError::ParseError { line, message: msg.into() }
    }

    pub fn type_error(msg: impl Into<String>) -> Self {
        CompileError::TypeError { message: msg.into() }
    }

    pub fn undefined(name: impl Into<String>) -> Self {
        CompileError::UndefinedSymbol { name: name.into() }
    }

    pub fn restriction(construct: impl Into<String>, target: impl std::fmt::Display) -> Self {
        CompileError::Restriction {
            construct: construct.into(),
            target: target.to_string(),
        }
    }

    pub fn specification(msg: impl Into<String>) -> Self {
        CompileError::Specification { message: msg.into() }
    }

    pub fn evaluation(msg: impl Into<String>) -> Self {
        CompileError::Evaluation { message: msg.into() }
    }
}
