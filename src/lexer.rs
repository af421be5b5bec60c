//! Lexer for the Python/NumPy dialect using logos
//!
//! Supports tokens like:
//! - Identifiers and keywords: `def`, `return`, `x`, `np`
//! - Numbers: `1`, `2.5`, `1e-3`, `2j`
//! - Operators: `@`, `+`, `**`, `//`, `+=`, `==`, `->`
//! - Pragma comments: `#$ omp parallel do`
//!
//! Logical line structure is synthesized on top of the raw logos stream:
//! newlines inside brackets are joined, and changes of indentation produce
//! `Indent`/`Dedent` tokens.

use std::collections::VecDeque;

use logos::Logos;

use crate::diagnostics::Location;
use crate::error::{CompileError, CompileResult};

fn indent_width(slice: &str) -> usize {
    slice[1..].chars().fold(0, |w, c| if c == '\t' { w + 8 - w % 8 } else { w + 1 })
}

fn unquote(slice: &str) -> String {
    let inner = &slice[1..slice.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => {}
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn triple_quoted(lex: &mut logos::Lexer<Token>) -> Option<String> {
    let quote = lex.slice().to_string();
    let end = lex.remainder().find(&quote)?;
    let body = lex.remainder()[..end].to_string();
    lex.bump(end + quote.len());
    Some(body)
}

/// Token types for the dialect
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\f]+")]
#[logos(skip r"\\\r?\n")]
pub enum Token {
    // Layout
    #[regex(r"\n[ \t]*", |lex| indent_width(lex.slice()))]
    Newline(usize),

    /// Synthesized when a logical line is more indented than the previous one
    Indent,

    /// Synthesized when a block closes
    Dedent,

    #[regex(r"#\$[^\n]*", |lex| lex.slice()[2..].trim().to_string(), priority = 5)]
    Pragma(String),

    #[regex(r"#[^\n]*", logos::skip)]
    Comment,

    // Literals
    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),

    #[regex(r"[0-9]+\.[0-9]*([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    #[regex(r"\.[0-9]+([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    #[regex(r"[0-9]+[eE][+-]?[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
    Float(f64),

    #[regex(r"([0-9]+(\.[0-9]*)?|\.[0-9]+)([eE][+-]?[0-9]+)?[jJ]", |lex| {
        let s = lex.slice();
        s[..s.len() - 1].parse::<f64>().ok()
    })]
    Imag(f64),

    #[regex(r#""([^"\\\n]|\\.)*""#, |lex| unquote(lex.slice()))]
    #[regex(r"'([^'\\\n]|\\.)*'", |lex| unquote(lex.slice()))]
    #[token("\"\"\"", triple_quoted)]
    #[token("'''", triple_quoted)]
    Str(String),

    // Keywords
    #[token("def")]
    Def,
    #[token("return")]
    Return,
    #[token("if")]
    If,
    #[token("elif")]
    Elif,
    #[token("else")]
    Else,
    #[token("for")]
    For,
    #[token("in")]
    In,
    #[token("while")]
    While,
    #[token("and")]
    And,
    #[token("or")]
    Or,
    #[token("not")]
    Not,
    #[token("is")]
    Is,
    #[token("None")]
    NoneKw,
    #[token("True")]
    True,
    #[token("False")]
    False,
    #[token("pass")]
    Pass,
    #[token("break")]
    Break,
    #[token("continue")]
    Continue,
    #[token("import")]
    Import,
    #[token("from")]
    From,
    #[token("as")]
    As,

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    // Operators
    #[token("@")]
    At,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("**")]
    DoubleStar,
    #[token("/")]
    Slash,
    #[token("//")]
    DoubleSlash,
    #[token("%")]
    Percent,
    #[token("=")]
    Equals,
    #[token("+=")]
    PlusEq,
    #[token("-=")]
    MinusEq,
    #[token("*=")]
    StarEq,
    #[token("/=")]
    SlashEq,
    #[token("//=")]
    DoubleSlashEq,
    #[token("%=")]
    PercentEq,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<")]
    Lt,
    #[token("<=")]
    Le,
    #[token(">")]
    Gt,
    #[token(">=")]
    Ge,
    #[token("->")]
    Arrow,

    // Punctuation
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
    #[token(";")]
    Semicolon,
    #[token(".")]
    Dot,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Newline(_) => write!(f, "newline"),
            Token::Indent => write!(f, "indent"),
            Token::Dedent => write!(f, "dedent"),
            Token::Pragma(p) => write!(f, "#$ {}", p),
            Token::Comment => write!(f, "comment"),
            Token::Int(n) => write!(f, "{}", n),
            Token::Float(x) => write!(f, "{}", x),
            Token::Imag(x) => write!(f, "{}j", x),
            Token::Str(s) => write!(f, "{:?}", s),
            Token::Ident(s) => write!(f, "{}", s),
            Token::Def => write!(f, "def"),
            Token::Return => write!(f, "return"),
            Token::If => write!(f, "if"),
            Token::Elif => write!(f, "elif"),
            Token::Else => write!(f, "else"),
            Token::For => write!(f, "for"),
            Token::In => write!(f, "in"),
            Token::While => write!(f, "while"),
            Token::And => write!(f, "and"),
            Token::Or => write!(f, "or"),
            Token::Not => write!(f, "not"),
            Token::Is => write!(f, "is"),
            Token::NoneKw => write!(f, "None"),
            Token::True => write!(f, "True"),
            Token::False => write!(f, "False"),
            Token::Pass => write!(f, "pass"),
            Token::Break => write!(f, "break"),
            Token::Continue => write!(f, "continue"),
            Token::Import => write!(f, "import"),
            Token::From => write!(f, "from"),
            Token::As => write!(f, "as"),
            Token::At => write!(f, "@"),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::DoubleStar => write!(f, "**"),
            Token::Slash => write!(f, "/"),
            Token::DoubleSlash => write!(f, "//"),
            Token::Percent => write!(f, "%"),
            Token::Equals => write!(f, "="),
            Token::PlusEq => write!(f, "+="),
            Token::MinusEq => write!(f, "-="),
            Token::StarEq => write!(f, "*="),
            Token::SlashEq => write!(f, "/="),
            Token::DoubleSlashEq => write!(f, "//="),
            Token::PercentEq => write!(f, "%="),
            Token::EqEq => write!(f, "=="),
            Token::NotEq => write!(f, "!="),
            Token::Lt => write!(f, "<"),
            Token::Le => write!(f, "<="),
            Token::Gt => write!(f, ">"),
            Token::Ge => write!(f, ">="),
            Token::Arrow => write!(f, "->"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::Comma => write!(f, ","),
            Token::Colon => write!(f, ":"),
            Token::Semicolon => write!(f, ";"),
            Token::Dot => write!(f, "."),
        }
    }
}

/// A token together with the position of its first character
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub location: Location,
}

/// Lexer wrapper that provides a stream of logical-line tokens
pub struct Lexer<'source> {
    inner: logos::Lexer<'source, Token>,
    line_starts: Vec<usize>,
    indents: Vec<usize>,
    /// Bracket nesting depth; newlines are ignored while positive
    depth: usize,
    /// Indentation of the line the next real token starts
    pending_newline: Option<usize>,
    emitted_any: bool,
    finished: bool,
    queue: VecDeque<SpannedToken>,
}

impl<'source> Lexer<'source> {
    pub fn new(source: &'source str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self {
            inner: Token::lexer(source),
            line_starts,
            indents: vec![0],
            depth: 0,
            pending_newline: Some(0),
            emitted_any: false,
            finished: false,
            queue: VecDeque::new(),
        }
    }

    /// Line and column of a byte offset
    pub fn location_of(&self, offset: usize) -> Location {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        Location::new(line + 1, offset - self.line_starts[line] + 1)
    }

    /// Queue the layout tokens produced by starting a line at `width`
    fn open_line(&mut self, width: usize, location: Location) -> CompileResult<()> {
        if self.emitted_any {
            self.queue.push_back(SpannedToken { token: Token::Newline(width), location });
        }
        let current = self.indents.last().copied().unwrap_or(0);
        if width > current {
            self.indents.push(width);
            self.queue.push_back(SpannedToken { token: Token::Indent, location });
        } else if width < current {
            while self.indents.last().is_some_and(|&w| w > width) {
                self.indents.pop();
                self.queue.push_back(SpannedToken { token: Token::Dedent, location });
            }
            if self.indents.last().copied().unwrap_or(0) != width {
                return Err(CompileError::LexerError {
                    line: location.line,
                    column: location.column,
                    message: "unindent does not match any outer indentation level".to_string(),
                });
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        let location = self.location_of(self.inner.span().end);
        if self.emitted_any {
            self.queue.push_back(SpannedToken { token: Token::Newline(0), location });
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.queue.push_back(SpannedToken { token: Token::Dedent, location });
        }
        self.finished = true;
    }

    fn fill(&mut self) -> CompileResult<()> {
        while self.queue.is_empty() && !self.finished {
            let Some(next) = self.inner.next() else {
                self.close();
                break;
            };
            let location = self.location_of(self.inner.span().start);
            let token = next.map_err(|_| CompileError::LexerError {
                line: location.line,
                column: location.column,
                message: format!("unexpected character '{}'", self.inner.slice()),
            })?;
            match token {
                Token::Newline(width) => {
                    if self.depth == 0 {
                        self.pending_newline = Some(width);
                    }
                }
                token => {
                    match token {
                        Token::LParen | Token::LBracket => self.depth += 1,
                        Token::RParen | Token::RBracket => self.depth = self.depth.saturating_sub(1),
                        _ => {}
                    }
                    if let Some(width) = self.pending_newline.take() {
                        self.open_line(width, location)?;
                    }
                    self.emitted_any = true;
                    self.queue.push_back(SpannedToken { token, location });
                }
            }
        }
        Ok(())
    }
}

impl<'source> Iterator for Lexer<'source> {
    type Item = CompileResult<SpannedToken>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Err(e) = self.fill() {
            self.finished = true;
            self.queue.clear();
            return Some(Err(e));
        }
        self.queue.pop_front().map(Ok)
    }
}

/// Lex a whole source into layout-aware tokens
pub fn tokenize(source: &str) -> CompileResult<Vec<SpannedToken>> {
    Lexer::new(source).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source).unwrap().into_iter().map(|t| t.token).collect()
    }

    #[test]
    fn test_simple_tokens() {
        assert_eq!(
            kinds("c = a @ b"),
            vec![
                Token::Ident("c".to_string()),
                Token::Equals,
                Token::Ident("a".to_string()),
                Token::At,
                Token::Ident("b".to_string()),
                Token::Newline(0),
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            kinds("1 2.5 1e-3 2j .5"),
            vec![
                Token::Int(1),
                Token::Float(2.5),
                Token::Float(1e-3),
                Token::Imag(2.0),
                Token::Float(0.5),
                Token::Newline(0),
            ]
        );
    }

    #[test]
    fn test_indentation() {
        let source = "def f(x):\n    y = x\n    return y\nz = 1\n";
        let tokens = kinds(source);
        assert_eq!(tokens.iter().filter(|t| **t == Token::Indent).count(), 1);
        assert_eq!(tokens.iter().filter(|t| **t == Token::Dedent).count(), 1);
        let dedent = tokens.iter().position(|t| *t == Token::Dedent).unwrap();
        assert_eq!(tokens[dedent - 1], Token::Newline(0));
        assert_eq!(tokens[dedent + 1], Token::Ident("z".to_string()));
    }

    #[test]
    fn test_implicit_line_joining() {
        let tokens = kinds("x = f(1,\n      2)\n");
        assert_eq!(tokens.iter().filter(|t| matches!(t, Token::Newline(_))).count(), 1);
        assert!(!tokens.contains(&Token::Indent));
    }

    #[test]
    fn test_comments_and_pragmas() {
        let tokens = kinds("# plain comment\n#$ omp parallel\nx = 1 # trailing\n");
        assert_eq!(
            tokens,
            vec![
                Token::Pragma("omp parallel".to_string()),
                Token::Newline(0),
                Token::Ident("x".to_string()),
                Token::Equals,
                Token::Int(1),
                Token::Newline(0),
            ]
        );
    }

    #[test]
    fn test_strings_and_docstrings() {
        let tokens = kinds("def f():\n    \"\"\"Doc\n    string\"\"\"\n    return 'a'\n");
        assert!(tokens.contains(&Token::Str("Doc\n    string".to_string())));
        assert!(tokens.contains(&Token::Str("a".to_string())));
    }

    #[test]
    fn test_keywords_and_operators() {
        assert_eq!(
            kinds("a is not None and b ** 2 // 3"),
            vec![
                Token::Ident("a".to_string()),
                Token::Is,
                Token::Not,
                Token::NoneKw,
                Token::And,
                Token::Ident("b".to_string()),
                Token::DoubleStar,
                Token::Int(2),
                Token::DoubleSlash,
                Token::Int(3),
                Token::Newline(0),
            ]
        );
    }

    #[test]
    fn test_error_location() {
        let err = tokenize("x = 1\ny = $\n").unwrap_err();
        match err {
            CompileError::LexerError { line, column, .. } => assert_eq!((line, column), (2, 5)),
            other => panic!("Expected lexer error, got {:?}", other),
        }
    }

    #[test]
    fn test_bad_dedent() {
        assert!(tokenize("if x:\n    y = 1\n  z = 2\n").is_err());
    }
}
