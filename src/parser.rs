//! Parser for the Python/NumPy dialect
//!
//! Recursive descent over the layout-aware token stream. Parses:
//! - function definitions with decorators, annotations and defaults
//! - `if`/`elif`/`else`, `for .. in ..`, `while`, `return`, `pass`,
//!   `break`, `continue`, imports and `#$` pragmas
//! - assignments (tuple targets included) and augmented assignments
//! - expressions with Python precedence, from `a if c else b` down to
//!   calls, attributes and subscripts

use crate::ast::syntax::{Decorator, Expr, FunctionDef, Param, Program, Statement, StatementKind, Subscript};
use crate::ast::{Operator, UnaryOperator};
use crate::diagnostics::Location;
use crate::error::{CompileError, CompileResult};
use crate::lexer::{tokenize, SpannedToken, Token};

/// Parser for one module
pub struct Parser {
    tokens: Vec<SpannedToken>,
    pos: usize,
}

impl Parser {
    pub fn new(source: &str) -> CompileResult<Self> {
        Ok(Self { tokens: tokenize(source)?, pos: 0 })
    }

    fn current(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|t| &t.token)
    }

    fn location(&self) -> Location {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.location)
            .unwrap_or_default()
    }

    /// Advance to the next token
    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).map(|t| t.token.clone());
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    /// Check if current token matches expected, ignoring payloads
    fn check(&self, expected: &Token) -> bool {
        match self.current() {
            Some(tok) => std::mem::discriminant(tok) == std::mem::discriminant(expected),
            None => false,
        }
    }

    /// Consume the token if it matches
    fn eat(&mut self, expected: &Token) -> bool {
        if self.check(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error(&self, msg: impl Into<String>) -> CompileError {
        CompileError::parse_error(self.location().line, msg)
    }

    /// Consume token if it matches, otherwise error
    fn expect(&mut self, expected: Token) -> CompileResult<Token> {
        if self.check(&expected) {
            self.advance().ok_or_else(|| self.error("unexpected end of input"))
        } else {
            Err(self.error(format!("expected '{}', got {}", expected, self.describe_current())))
        }
    }

    fn expect_ident(&mut self) -> CompileResult<String> {
        match self.advance() {
            Some(Token::Ident(name)) => Ok(name),
            other => {
                self.pos -= usize::from(other.is_some());
                Err(self.error(format!("expected an identifier, got {}", self.describe_current())))
            }
        }
    }

    fn describe_current(&self) -> String {
        match self.current() {
            Some(tok) => format!("'{}'", tok),
            None => "end of input".to_string(),
        }
    }

    fn skip_newlines(&mut self) {
        while matches!(self.current(), Some(Token::Newline(_))) {
            self.pos += 1;
        }
    }

    fn end_of_statement(&mut self) -> CompileResult<()> {
        match self.current() {
            Some(Token::Newline(_)) => {
                self.pos += 1;
                Ok(())
            }
            None | Some(Token::Dedent) => Ok(()),
            _ => Err(self.error(format!("expected end of line, got {}", self.describe_current()))),
        }
    }

    /// Parse a complete module
    pub fn parse_program(&mut self) -> CompileResult<Program> {
        let mut body = Vec::new();
        self.skip_newlines();
        while self.current().is_some() {
            body.extend(self.parse_statement()?);
            self.skip_newlines();
        }
        Ok(Program { body })
    }

    /// Parse one logical line or compound statement
    fn parse_statement(&mut self) -> CompileResult<Vec<Statement>> {
        let location = self.location();
        let stmt = match self.current() {
            Some(Token::At) | Some(Token::Def) => self.parse_function_def()?,
            Some(Token::If) => self.parse_if()?,
            Some(Token::For) => self.parse_for()?,
            Some(Token::While) => {
                self.advance();
                let cond = self.parse_test()?;
                let body = self.parse_block()?;
                StatementKind::While { cond, body }
            }
            Some(Token::Pragma(_)) => {
                let Some(Token::Pragma(text)) = self.advance() else {
                    return Err(self.error("expected a pragma"));
                };
                self.end_of_statement()?;
                StatementKind::Pragma(text)
            }
            _ => return self.parse_simple_line(),
        };
        Ok(vec![Statement::new(stmt, location)])
    }

    /// Simple statements separated by `;` up to the end of the line
    fn parse_simple_line(&mut self) -> CompileResult<Vec<Statement>> {
        let mut stmts = Vec::new();
        loop {
            stmts.extend(self.parse_simple_statement()?);
            if !self.eat(&Token::Semicolon) || matches!(self.current(), Some(Token::Newline(_)) | None) {
                break;
            }
        }
        self.end_of_statement()?;
        Ok(stmts)
    }

    fn parse_simple_statement(&mut self) -> CompileResult<Vec<Statement>> {
        let location = self.location();
        let kind = match self.current() {
            Some(Token::Return) => {
                self.advance();
                if matches!(self.current(), Some(Token::Newline(_)) | Some(Token::Semicolon) | None) {
                    StatementKind::Return(None)
                } else {
                    StatementKind::Return(Some(self.parse_testlist()?))
                }
            }
            Some(Token::Pass) => {
                self.advance();
                StatementKind::Pass
            }
            Some(Token::Break) => {
                self.advance();
                StatementKind::Break
            }
            Some(Token::Continue) => {
                self.advance();
                StatementKind::Continue
            }
            Some(Token::Import) => return self.parse_import(location),
            Some(Token::From) => self.parse_from_import()?,
            _ => self.parse_expr_statement()?,
        };
        Ok(vec![Statement::new(kind, location)])
    }

    fn parse_expr_statement(&mut self) -> CompileResult<StatementKind> {
        let target = self.parse_testlist()?;
        let aug = match self.current() {
            Some(Token::PlusEq) => Some(Operator::Add),
            Some(Token::MinusEq) => Some(Operator::Sub),
            Some(Token::StarEq) => Some(Operator::Mul),
            Some(Token::SlashEq) => Some(Operator::Div),
            Some(Token::DoubleSlashEq) => Some(Operator::FloorDiv),
            Some(Token::PercentEq) => Some(Operator::Mod),
            _ => None,
        };
        if let Some(op) = aug {
            self.advance();
            let value = self.parse_testlist()?;
            return Ok(StatementKind::AugAssign { target, op, value });
        }
        if self.eat(&Token::Equals) {
            let value = self.parse_testlist()?;
            if self.check(&Token::Equals) {
                return Err(self.error("chained assignment is not supported"));
            }
            return Ok(StatementKind::Assign { target, value });
        }
        Ok(StatementKind::Expr(target))
    }

    fn parse_dotted_name(&mut self) -> CompileResult<String> {
        let mut name = self.expect_ident()?;
        while self.eat(&Token::Dot) {
            name.push('.');
            name.push_str(&self.expect_ident()?);
        }
        Ok(name)
    }

    fn parse_import(&mut self, location: Location) -> CompileResult<Vec<Statement>> {
        self.expect(Token::Import)?;
        let mut stmts = Vec::new();
        loop {
            let module = self.parse_dotted_name()?;
            let alias = if self.eat(&Token::As) { Some(self.expect_ident()?) } else { None };
            stmts.push(Statement::new(StatementKind::Import { module, alias }, location));
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        Ok(stmts)
    }

    fn parse_from_import(&mut self) -> CompileResult<StatementKind> {
        self.expect(Token::From)?;
        let module = self.parse_dotted_name()?;
        self.expect(Token::Import)?;
        if self.eat(&Token::Star) {
            return Ok(StatementKind::FromImport { module, names: vec![("*".to_string(), None)] });
        }
        let parens = self.eat(&Token::LParen);
        let mut names = Vec::new();
        loop {
            let name = self.expect_ident()?;
            let alias = if self.eat(&Token::As) { Some(self.expect_ident()?) } else { None };
            names.push((name, alias));
            if !self.eat(&Token::Comma) || (parens && self.check(&Token::RParen)) {
                break;
            }
        }
        if parens {
            self.expect(Token::RParen)?;
        }
        Ok(StatementKind::FromImport { module, names })
    }

    /// `:` followed by an indented block or a simple statement on the same line
    fn parse_block(&mut self) -> CompileResult<Vec<Statement>> {
        self.expect(Token::Colon)?;
        if !matches!(self.current(), Some(Token::Newline(_))) {
            return self.parse_simple_line();
        }
        self.advance();
        self.skip_newlines();
        self.expect(Token::Indent)?;
        let mut body = Vec::new();
        loop {
            self.skip_newlines();
            if self.eat(&Token::Dedent) || self.current().is_none() {
                break;
            }
            body.extend(self.parse_statement()?);
        }
        Ok(body)
    }

    fn parse_decorator(&mut self) -> CompileResult<Decorator> {
        let location = self.location();
        self.expect(Token::At)?;
        let name = self.parse_dotted_name()?;
        let (args, kwargs) = if self.eat(&Token::LParen) {
            self.parse_call_args()?
        } else {
            (Vec::new(), Vec::new())
        };
        self.end_of_statement()?;
        Ok(Decorator { name, args, kwargs, location })
    }

    fn parse_function_def(&mut self) -> CompileResult<StatementKind> {
        let mut decorators = Vec::new();
        while self.check(&Token::At) {
            decorators.push(self.parse_decorator()?);
            self.skip_newlines();
        }
        self.expect(Token::Def)?;
        let name = self.expect_ident()?;
        self.expect(Token::LParen)?;
        let mut params = Vec::new();
        while !self.check(&Token::RParen) {
            let pname = self.expect_ident()?;
            let annotation = if self.eat(&Token::Colon) { Some(self.parse_test()?) } else { None };
            let default = if self.eat(&Token::Equals) { Some(self.parse_test()?) } else { None };
            if default.is_none() && params.iter().any(|p: &Param| p.default.is_some()) {
                return Err(self.error(format!(
                    "non-default argument '{}' follows default argument",
                    pname
                )));
            }
            params.push(Param { name: pname, annotation, default });
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(Token::RParen)?;
        let returns = if self.eat(&Token::Arrow) { Some(self.parse_test()?) } else { None };
        let body = self.parse_block()?;
        Ok(StatementKind::FunctionDef(FunctionDef { name, params, returns, decorators, body }))
    }

    fn parse_if(&mut self) -> CompileResult<StatementKind> {
        self.expect(Token::If)?;
        let mut branches = Vec::new();
        let cond = self.parse_test()?;
        branches.push((cond, self.parse_block()?));
        let mut orelse = Vec::new();
        loop {
            self.skip_newlines();
            if self.eat(&Token::Elif) {
                let cond = self.parse_test()?;
                branches.push((cond, self.parse_block()?));
            } else if self.eat(&Token::Else) {
                orelse = self.parse_block()?;
                break;
            } else {
                break;
            }
        }
        Ok(StatementKind::If { branches, orelse })
    }

    fn parse_for(&mut self) -> CompileResult<StatementKind> {
        self.expect(Token::For)?;
        let target = self.expect_ident()?;
        if self.check(&Token::Comma) {
            return Err(self.error("only a single loop variable is supported"));
        }
        self.expect(Token::In)?;
        let iter = self.parse_test()?;
        let body = self.parse_block()?;
        Ok(StatementKind::For { target, iter, body })
    }

    /// Comma separated expressions; more than one builds a tuple
    fn parse_testlist(&mut self) -> CompileResult<Expr> {
        let first = self.parse_test()?;
        if !self.check(&Token::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&Token::Comma) {
            if matches!(self.current(), Some(Token::Newline(_)) | Some(Token::Equals) | None) {
                break;
            }
            items.push(self.parse_test()?);
        }
        Ok(Expr::Tuple(items))
    }

    /// Parse an expression (handles operator precedence)
    pub fn parse_test(&mut self) -> CompileResult<Expr> {
        let value = self.parse_or()?;
        if self.eat(&Token::If) {
            let cond = self.parse_or()?;
            self.expect(Token::Else)?;
            let orelse = self.parse_test()?;
            return Ok(Expr::IfExp { cond: Box::new(cond), then: Box::new(value), orelse: Box::new(orelse) });
        }
        Ok(value)
    }

    fn binary(op: Operator, left: Expr, right: Expr) -> Expr {
        Expr::Binary { op, left: Box::new(left), right: Box::new(right) }
    }

    fn parse_or(&mut self) -> CompileResult<Expr> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::Or) {
            let right = self.parse_and()?;
            left = Self::binary(Operator::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> CompileResult<Expr> {
        let mut left = self.parse_not()?;
        while self.eat(&Token::And) {
            let right = self.parse_not()?;
            left = Self::binary(Operator::And, left, right);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> CompileResult<Expr> {
        if self.eat(&Token::Not) {
            let operand = self.parse_not()?;
            return Ok(Expr::Unary { op: UnaryOperator::Not, operand: Box::new(operand) });
        }
        self.parse_comparison()
    }

    fn comparison_operator(&mut self) -> Option<Operator> {
        let op = match self.current()? {
            Token::EqEq => Operator::Eq,
            Token::NotEq => Operator::Ne,
            Token::Lt => Operator::Lt,
            Token::Le => Operator::Le,
            Token::Gt => Operator::Gt,
            Token::Ge => Operator::Ge,
            Token::Is => {
                if matches!(self.peek_at(1), Some(Token::Not)) {
                    self.pos += 1;
                    Operator::IsNot
                } else {
                    Operator::Is
                }
            }
            _ => return None,
        };
        self.pos += 1;
        Some(op)
    }

    /// `a < b < c` means `a < b and b < c`
    fn parse_comparison(&mut self) -> CompileResult<Expr> {
        let mut left = self.parse_arith()?;
        let mut result: Option<Expr> = None;
        while let Some(op) = self.comparison_operator() {
            let right = self.parse_arith()?;
            let cmp = Self::binary(op, left, right.clone());
            result = Some(match result {
                Some(prev) => Self::binary(Operator::And, prev, cmp),
                None => cmp,
            });
            left = right;
        }
        Ok(result.unwrap_or(left))
    }

    /// Parse additive expressions: a + b, a - b
    fn parse_arith(&mut self) -> CompileResult<Expr> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.current() {
                Some(Token::Plus) => Operator::Add,
                Some(Token::Minus) => Operator::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_term()?;
            left = Self::binary(op, left, right);
        }
        Ok(left)
    }

    /// Parse multiplicative expressions: a * b, a / b, a @ b
    fn parse_term(&mut self) -> CompileResult<Expr> {
        let mut left = self.parse_factor()?;
        loop {
            let op = match self.current() {
                Some(Token::Star) => Operator::Mul,
                Some(Token::Slash) => Operator::Div,
                Some(Token::DoubleSlash) => Operator::FloorDiv,
                Some(Token::Percent) => Operator::Mod,
                Some(Token::At) => {
                    self.advance();
                    let right = self.parse_factor()?;
                    left = Expr::Call {
                        func: Box::new(Expr::Name("matmul".to_string())),
                        args: vec![left, right],
                        kwargs: Vec::new(),
                    };
                    continue;
                }
                _ => break,
            };
            self.advance();
            let right = self.parse_factor()?;
            left = Self::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_factor(&mut self) -> CompileResult<Expr> {
        let op = match self.current() {
            Some(Token::Minus) => UnaryOperator::Neg,
            Some(Token::Plus) => UnaryOperator::Pos,
            _ => return self.parse_power(),
        };
        self.advance();
        let operand = self.parse_factor()?;
        Ok(Expr::Unary { op, operand: Box::new(operand) })
    }

    fn parse_power(&mut self) -> CompileResult<Expr> {
        let base = self.parse_postfix()?;
        if self.eat(&Token::DoubleStar) {
            let exponent = self.parse_factor()?;
            return Ok(Self::binary(Operator::Pow, base, exponent));
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> CompileResult<Expr> {
        let mut expr = self.parse_atom()?;
        loop {
            if self.eat(&Token::Dot) {
                let attr = self.expect_ident()?;
                expr = Expr::Attribute { value: Box::new(expr), attr };
            } else if self.eat(&Token::LParen) {
                let (args, kwargs) = self.parse_call_args()?;
                expr = Expr::Call { func: Box::new(expr), args, kwargs };
            } else if self.eat(&Token::LBracket) {
                let indices = self.parse_subscripts()?;
                expr = Expr::Subscript { value: Box::new(expr), indices };
            } else {
                return Ok(expr);
            }
        }
    }

    /// Arguments after an opening parenthesis, closing one included
    fn parse_call_args(&mut self) -> CompileResult<(Vec<Expr>, Vec<(String, Expr)>)> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        while !self.check(&Token::RParen) {
            if let (Some(Token::Ident(name)), Some(Token::Equals)) = (self.current(), self.peek_at(1)) {
                let name = name.clone();
                self.pos += 2;
                kwargs.push((name, self.parse_test()?));
            } else if !kwargs.is_empty() {
                return Err(self.error("positional argument follows keyword argument"));
            } else {
                args.push(self.parse_test()?);
            }
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(Token::RParen)?;
        Ok((args, kwargs))
    }

    fn parse_subscripts(&mut self) -> CompileResult<Vec<Subscript>> {
        let mut indices = Vec::new();
        loop {
            indices.push(self.parse_subscript()?);
            if !self.eat(&Token::Comma) || self.check(&Token::RBracket) {
                break;
            }
        }
        self.expect(Token::RBracket)?;
        Ok(indices)
    }

    fn parse_subscript(&mut self) -> CompileResult<Subscript> {
        let ends_part = |tok: Option<&Token>| matches!(tok, Some(Token::Colon) | Some(Token::Comma) | Some(Token::RBracket));
        let start = if ends_part(self.current()) { None } else { Some(self.parse_test()?) };
        if !self.eat(&Token::Colon) {
            return start.map(Subscript::Index).ok_or_else(|| self.error("empty subscript"));
        }
        let stop = if ends_part(self.current()) { None } else { Some(self.parse_test()?) };
        let step = if self.eat(&Token::Colon) && !ends_part(self.current()) {
            Some(self.parse_test()?)
        } else {
            None
        };
        Ok(Subscript::Slice { start, stop, step })
    }

    fn parse_atom(&mut self) -> CompileResult<Expr> {
        let Some(tok) = self.advance() else {
            return Err(self.error("unexpected end of input"));
        };
        match tok {
            Token::Ident(name) => Ok(Expr::Name(name)),
            Token::Int(n) => Ok(Expr::Int(n)),
            Token::Float(x) => Ok(Expr::Float(x)),
            Token::Imag(x) => Ok(Expr::Imag(x)),
            Token::Str(mut s) => {
                while let Some(Token::Str(next)) = self.current() {
                    s.push_str(next);
                    self.pos += 1;
                }
                Ok(Expr::Str(s))
            }
            Token::True => Ok(Expr::Bool(true)),
            Token::False => Ok(Expr::Bool(false)),
            Token::NoneKw => Ok(Expr::None),
            Token::LParen => {
                if self.eat(&Token::RParen) {
                    return Ok(Expr::Tuple(Vec::new()));
                }
                let first = self.parse_test()?;
                if self.eat(&Token::RParen) {
                    return Ok(first);
                }
                let mut items = vec![first];
                while self.eat(&Token::Comma) {
                    if self.check(&Token::RParen) {
                        break;
                    }
                    items.push(self.parse_test()?);
                }
                self.expect(Token::RParen)?;
                Ok(Expr::Tuple(items))
            }
            Token::LBracket => {
                let mut items = Vec::new();
                while !self.check(&Token::RBracket) {
                    items.push(self.parse_test()?);
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                self.expect(Token::RBracket)?;
                Ok(Expr::List(items))
            }
            other => {
                self.pos -= 1;
                Err(self.error(format!("unexpected '{}'", other)))
            }
        }
    }
}

/// Parse a whole module source
pub fn parse(source: &str) -> CompileResult<Program> {
    Parser::new(source)?.parse_program()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse_expr(source: &str) -> Expr {
        let program = parse(source).unwrap();
        match &program.body[0].kind {
            StatementKind::Expr(e) => e.clone(),
            other => panic!("Expected expression statement, got {:?}", other),
        }
    }

    #[test]
    fn test_simple_function() {
        let program = parse("def f(x: int) -> int:\n    return x + 1\n").unwrap();
        assert_eq!(program.body.len(), 1);
        match &program.body[0].kind {
            StatementKind::FunctionDef(def) => {
                assert_eq!(def.name, "f");
                assert_eq!(def.params.len(), 1);
                assert_eq!(def.params[0].annotation, Some(Expr::Name("int".to_string())));
                assert_eq!(def.returns, Some(Expr::Name("int".to_string())));
                assert_eq!(def.body.len(), 1);
                assert!(matches!(def.body[0].kind, StatementKind::Return(Some(Expr::Binary { op: Operator::Add, .. }))));
            }
            other => panic!("Expected function definition, got {:?}", other),
        }
    }

    #[test]
    fn test_decorators() {
        let source = "@types('int', 'float[:]', results='float')\n@pure\ndef g(n, a):\n    pass\n";
        let program = parse(source).unwrap();
        let StatementKind::FunctionDef(def) = &program.body[0].kind else {
            panic!("Expected function definition");
        };
        assert_eq!(def.decorators.len(), 2);
        assert_eq!(def.decorators[0].name, "types");
        assert_eq!(def.decorators[0].args.len(), 2);
        assert_eq!(def.decorators[0].kwargs[0].0, "results");
        assert_eq!(def.decorators[1].name, "pure");
        assert_eq!(def.decorators[1].location.line, 2);
    }

    #[test]
    fn test_precedence() {
        let e = parse_expr("a + b * c ** 2");
        let Expr::Binary { op: Operator::Add, right, .. } = e else {
            panic!("Expected addition at the root");
        };
        assert!(matches!(*right, Expr::Binary { op: Operator::Mul, .. }));
    }

    #[test]
    fn test_matmul_operator_is_a_call() {
        let e = parse_expr("a @ b");
        match e {
            Expr::Call { func, args, .. } => {
                assert_eq!(*func, Expr::Name("matmul".to_string()));
                assert_eq!(args.len(), 2);
            }
            other => panic!("Expected call, got {:?}", other),
        }
    }

    #[test]
    fn test_chained_comparison() {
        let e = parse_expr("0 < x <= 5");
        assert!(matches!(e, Expr::Binary { op: Operator::And, .. }));
    }

    #[test]
    fn test_is_not_none_and_ternary() {
        let e = parse_expr("x if x is not None else 0");
        let Expr::IfExp { cond, .. } = e else {
            panic!("Expected ternary");
        };
        assert!(matches!(*cond, Expr::Binary { op: Operator::IsNot, .. }));
    }

    #[test]
    fn test_subscripts_and_slices() {
        let e = parse_expr("a[1:, ::2, i]");
        let Expr::Subscript { indices, .. } = e else {
            panic!("Expected subscript");
        };
        assert_eq!(indices.len(), 3);
        assert_eq!(indices[0], Subscript::Slice { start: Some(Expr::Int(1)), stop: None, step: None });
        assert_eq!(indices[1], Subscript::Slice { start: None, stop: None, step: Some(Expr::Int(2)) });
        assert_eq!(indices[2], Subscript::Index(Expr::Name("i".to_string())));
    }

    #[test]
    fn test_tuple_assignment_and_kwargs() {
        let program = parse("a, b = zeros((3, 4), dtype=float), 1\n").unwrap();
        let StatementKind::Assign { target, value } = &program.body[0].kind else {
            panic!("Expected assignment");
        };
        assert!(matches!(target, Expr::Tuple(items) if items.len() == 2));
        let Expr::Tuple(items) = value else {
            panic!("Expected tuple value");
        };
        assert!(matches!(&items[0], Expr::Call { kwargs, .. } if kwargs[0].0 == "dtype"));
    }

    #[test]
    fn test_control_flow() {
        let source = "\
def f(n: int) -> int:
    s = 0
    for i in range(n):
        if i % 2 == 0:
            s += i
        elif i == 3:
            continue
        else:
            break
    while s > 10:
        s -= 1
    return s
";
        let program = parse(source).unwrap();
        let StatementKind::FunctionDef(def) = &program.body[0].kind else {
            panic!("Expected function definition");
        };
        assert_eq!(def.body.len(), 4);
        let StatementKind::For { body, .. } = &def.body[1].kind else {
            panic!("Expected for loop");
        };
        assert!(matches!(&body[0].kind, StatementKind::If { branches, orelse } if branches.len() == 2 && orelse.len() == 1));
    }

    #[test]
    fn test_imports_and_pragmas() {
        let source = "import numpy as np\nfrom numpy import zeros, ones as o\n#$ omp parallel\n";
        let program = parse(source).unwrap();
        assert_eq!(
            program.body[0].kind,
            StatementKind::Import { module: "numpy".to_string(), alias: Some("np".to_string()) }
        );
        assert_eq!(
            program.body[1].kind,
            StatementKind::FromImport {
                module: "numpy".to_string(),
                names: vec![("zeros".to_string(), None), ("ones".to_string(), Some("o".to_string()))],
            }
        );
        assert_eq!(program.body[2].kind, StatementKind::Pragma("omp parallel".to_string()));
    }

    #[test]
    fn test_error_reports_line() {
        let err = parse("x = 1\ny = (2 +\n").unwrap_err();
        assert!(matches!(err, CompileError::ParseError { .. }));
    }
}
