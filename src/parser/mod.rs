pub mod ast;

use crate::error::ParseError;
use crate::lexer::token::{Token, TokenKind};
use self::ast::*;

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
enum Precedence { Lowest, Equals, LessGreater, Sum, Product, Prefix, Call, Index }

fn precedence(kind: &TokenKind) -> Precedence {
    match kind {
        TokenKind::EqEq | TokenKind::NotEq => Precedence::Equals,
        TokenKind::Lt | TokenKind::Gt => Precedence::LessGreater,
        TokenKind::Plus | TokenKind::Minus => Precedence::Sum,
        TokenKind::Star | TokenKind::Slash => Precedence::Product,
        TokenKind::LParen => Precedence::Call,
        TokenKind::LBracket => Precedence::Index,
        _ => Precedence::Lowest,
    }
}

/// Pratt parser over a pre-lexed token stream. Errors are accumulated and
/// parsing keeps going, so one pass reports as many problems as possible.
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    errors: Vec<ParseError>,
}

impl Parser {
    pub fn new(mut tokens: Vec<Token>) -> Self {
        if !matches!(tokens.last().map(|t| &t.kind), Some(TokenKind::Eof)) {
            tokens.push(Token { kind: TokenKind::Eof, line: 0, col: 0 });
        }
        Self { tokens, pos: 0, errors: Vec::new() }
    }

    fn current(&self) -> &TokenKind { &self.tokens[self.pos].kind }
    fn peek(&self) -> &TokenKind { &self.peek_token().kind }
    fn peek_token(&self) -> &Token { &self.tokens[(self.pos + 1).min(self.tokens.len() - 1)] }
    fn advance(&mut self) { if self.pos < self.tokens.len() - 1 { self.pos += 1; } }

    fn error(&mut self, message: String) {
        let tok = &self.tokens[self.pos];
        self.errors.push(ParseError { line: tok.line, col: tok.col, message });
    }

    fn peek_error(&mut self, expected: &str) {
        let tok = self.peek_token();
        let (line, col) = (tok.line, tok.col);
        let message = format!("expected next token to be {expected}, got {} instead", tok.kind);
        self.errors.push(ParseError { line, col, message });
    }

    fn expect_peek(&mut self, expected: TokenKind) -> bool {
        if self.peek() == &expected {
            self.advance();
            true
        } else {
            self.peek_error(&expected.to_string());
            false
        }
    }

    pub fn parse(&mut self) -> Result<Program, Vec<ParseError>> {
        let mut program = Vec::new();
        while !matches!(self.current(), TokenKind::Eof) {
            if let Some(stmt) = self.parse_statement() {
                program.push(stmt);
            }
            self.advance();
        }
        if self.errors.is_empty() { Ok(program) } else { Err(std::mem::take(&mut self.errors)) }
    }

    // ── Statements ────────────────────────────────

    fn parse_statement(&mut self) -> Option<Stmt> {
        match self.current() {
            TokenKind::Let => self.parse_let(),
            TokenKind::Return => self.parse_return(),
            _ => self.parse_expression_statement(),
        }
    }

    fn parse_let(&mut self) -> Option<Stmt> {
        let name = match self.peek() {
            TokenKind::Ident(name) => { let name = name.clone(); self.advance(); name }
            _ => { self.peek_error("identifier"); return None; }
        };
        if !self.expect_peek(TokenKind::Assign) { return None; }
        self.advance();
        let value = self.parse_expression(Precedence::Lowest)?;
        if matches!(self.peek(), TokenKind::Semicolon) { self.advance(); }
        Some(Stmt::Let { name, value })
    }

    fn parse_return(&mut self) -> Option<Stmt> {
        if matches!(self.peek(), TokenKind::Semicolon) {
            self.advance();
            return Some(Stmt::Return(None));
        }
        self.advance();
        let value = self.parse_expression(Precedence::Lowest)?;
        if matches!(self.peek(), TokenKind::Semicolon) { self.advance(); }
        Some(Stmt::Return(Some(value)))
    }

    fn parse_expression_statement(&mut self) -> Option<Stmt> {
        let expr = self.parse_expression(Precedence::Lowest)?;
        if matches!(self.peek(), TokenKind::Semicolon) { self.advance(); }
        Some(Stmt::Expr(expr))
    }

    /// Statements until the closing brace; the cursor is left on it.
    fn parse_block(&mut self) -> Block {
        self.advance();
        let mut stmts = Vec::new();
        while !matches!(self.current(), TokenKind::RBrace | TokenKind::Eof) {
            if let Some(stmt) = self.parse_statement() {
                stmts.push(stmt);
            }
            self.advance();
        }
        if matches!(self.current(), TokenKind::Eof) {
            self.error("expected next token to be }, got end of input instead".into());
        }
        stmts
    }

    // ── Expressions ───────────────────────────────

    fn parse_expression(&mut self, min_prec: Precedence) -> Option<Expr> {
        let mut left = self.parse_prefix()?;
        while !matches!(self.peek(), TokenKind::Semicolon) && min_prec < precedence(self.peek()) {
            left = match self.peek() {
                TokenKind::LParen => { self.advance(); self.parse_call(left)? }
                TokenKind::LBracket => { self.advance(); self.parse_index(left)? }
                TokenKind::Plus | TokenKind::Minus | TokenKind::Star | TokenKind::Slash
                | TokenKind::Lt | TokenKind::Gt | TokenKind::EqEq | TokenKind::NotEq => {
                    self.advance();
                    self.parse_infix(left)?
                }
                _ => break,
            };
        }
        Some(left)
    }

    fn parse_prefix(&mut self) -> Option<Expr> {
        match self.current().clone() {
            TokenKind::Ident(name) => Some(Expr::Ident(name)),
            TokenKind::Int(lit) => self.parse_int(&lit),
            TokenKind::Str(s) => Some(Expr::Str(s)),
            TokenKind::True => Some(Expr::Bool(true)),
            TokenKind::False => Some(Expr::Bool(false)),
            TokenKind::Bang => self.parse_prefix_op(PrefixOp::Not),
            TokenKind::Minus => self.parse_prefix_op(PrefixOp::Neg),
            TokenKind::LParen => self.parse_grouped(),
            TokenKind::LBracket => self.parse_array(),
            TokenKind::LBrace => self.parse_hash(),
            TokenKind::If => self.parse_if(),
            TokenKind::Function => self.parse_function(),
            other => {
                self.error(format!("no prefix parse function for token {other}"));
                None
            }
        }
    }

    fn parse_int(&mut self, literal: &str) -> Option<Expr> {
        match literal.parse::<i64>() {
            Ok(n) => Some(Expr::Int(n)),
            Err(_) => {
                self.error(format!("could not parse {literal} as integer"));
                None
            }
        }
    }

    fn parse_prefix_op(&mut self, op: PrefixOp) -> Option<Expr> {
        self.advance();
        let right = self.parse_expression(Precedence::Prefix)?;
        Some(Expr::Prefix { op, right: Box::new(right) })
    }

    fn parse_infix(&mut self, left: Expr) -> Option<Expr> {
        let op = match self.current() {
            TokenKind::Plus => InfixOp::Add,
            TokenKind::Minus => InfixOp::Sub,
            TokenKind::Star => InfixOp::Mul,
            TokenKind::Slash => InfixOp::Div,
            TokenKind::Lt => InfixOp::Lt,
            TokenKind::Gt => InfixOp::Gt,
            TokenKind::EqEq => InfixOp::Eq,
            TokenKind::NotEq => InfixOp::NotEq,
            _ => unreachable!("dispatch only advances onto infix operators"),
        };
        let prec = precedence(self.current());
        self.advance();
        let right = self.parse_expression(prec)?;
        Some(Expr::Infix { left: Box::new(left), op, right: Box::new(right) })
    }

    fn parse_grouped(&mut self) -> Option<Expr> {
        self.advance();
        let expr = self.parse_expression(Precedence::Lowest)?;
        if !self.expect_peek(TokenKind::RParen) { return None; }
        Some(expr)
    }

    fn parse_if(&mut self) -> Option<Expr> {
        if !self.expect_peek(TokenKind::LParen) { return None; }
        self.advance();
        let cond = self.parse_expression(Precedence::Lowest)?;
        if !self.expect_peek(TokenKind::RParen) { return None; }
        if !self.expect_peek(TokenKind::LBrace) { return None; }
        let consequence = self.parse_block();
        let alternative = if matches!(self.peek(), TokenKind::Else) {
            self.advance();
            if !self.expect_peek(TokenKind::LBrace) { return None; }
            Some(self.parse_block())
        } else {
            None
        };
        Some(Expr::If { cond: Box::new(cond), consequence, alternative })
    }

    fn parse_function(&mut self) -> Option<Expr> {
        if !self.expect_peek(TokenKind::LParen) { return None; }
        let params = self.parse_function_params()?;
        if !self.expect_peek(TokenKind::LBrace) { return None; }
        let body = self.parse_block();
        Some(Expr::Function { params, body })
    }

    fn parse_function_params(&mut self) -> Option<Vec<String>> {
        let mut params = Vec::new();
        if matches!(self.peek(), TokenKind::RParen) {
            self.advance();
            return Some(params);
        }
        self.advance();
        params.push(self.parse_param_name()?);
        while matches!(self.peek(), TokenKind::Comma) {
            self.advance();
            self.advance();
            params.push(self.parse_param_name()?);
        }
        if !self.expect_peek(TokenKind::RParen) { return None; }
        Some(params)
    }

    fn parse_param_name(&mut self) -> Option<String> {
        match self.current() {
            TokenKind::Ident(name) => Some(name.clone()),
            other => {
                let other = other.to_string();
                self.error(format!("expected next token to be identifier, got {other} instead"));
                None
            }
        }
    }

    fn parse_call(&mut self, func: Expr) -> Option<Expr> {
        let args = self.parse_expression_list(TokenKind::RParen)?;
        Some(Expr::Call { func: Box::new(func), args })
    }

    fn parse_index(&mut self, left: Expr) -> Option<Expr> {
        self.advance();
        let index = self.parse_expression(Precedence::Lowest)?;
        if !self.expect_peek(TokenKind::RBracket) { return None; }
        Some(Expr::Index { left: Box::new(left), index: Box::new(index) })
    }

    fn parse_array(&mut self) -> Option<Expr> {
        Some(Expr::Array(self.parse_expression_list(TokenKind::RBracket)?))
    }

    fn parse_expression_list(&mut self, end: TokenKind) -> Option<Vec<Expr>> {
        let mut items = Vec::new();
        if self.peek() == &end {
            self.advance();
            return Some(items);
        }
        self.advance();
        items.push(self.parse_expression(Precedence::Lowest)?);
        while matches!(self.peek(), TokenKind::Comma) {
            self.advance();
            self.advance();
            items.push(self.parse_expression(Precedence::Lowest)?);
        }
        if !self.expect_peek(end) { return None; }
        Some(items)
    }

    fn parse_hash(&mut self) -> Option<Expr> {
        let mut pairs = Vec::new();
        while !matches!(self.peek(), TokenKind::RBrace | TokenKind::Eof) {
            self.advance();
            let key = self.parse_expression(Precedence::Lowest)?;
            if !self.expect_peek(TokenKind::Colon) { return None; }
            self.advance();
            let value = self.parse_expression(Precedence::Lowest)?;
            pairs.push((key, value));
            if !matches!(self.peek(), TokenKind::RBrace) && !self.expect_peek(TokenKind::Comma) {
                return None;
            }
        }
        if !self.expect_peek(TokenKind::RBrace) { return None; }
        Some(Expr::Hash(pairs))
    }
}
