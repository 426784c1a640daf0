// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Parser for tokenized assembly source.
//!
//! Produces the statement AST walked by the assembler driver. Statements
//! are immutable after parse; every node carries its span. Parse errors
//! are collected and parsing resumes at the next statement boundary.

use std::mem;
use std::rc::Rc;

use crate::core::source::{SourceLoader, SourceMap};
use crate::core::tokenizer::{OperatorKind, Span, Token, TokenKind, Tokenizer};
use crate::mos6502::operand::OperandAst;
use crate::mos6502::table::has_mnemonic;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    Syntax,
    Resource,
}

#[derive(Debug, Clone)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    pub span: Span,
}

impl ParseError {
    fn syntax(message: impl Into<String>, span: Span) -> Self {
        Self {
            kind: ParseErrorKind::Syntax,
            message: message.into(),
            span,
        }
    }

    fn resource(message: impl Into<String>, span: Span) -> Self {
        Self {
            kind: ParseErrorKind::Resource,
            message: message.into(),
            span,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Minus,
    BitNot,
    LogicNot,
    Low,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Multiply,
    Divide,
    Mod,
    Add,
    Subtract,
    Shl,
    Shr,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    BitAnd,
    BitXor,
    BitOr,
    LogicAnd,
    LogicOr,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Int(i64, Span),
    Str(Vec<u8>, Span),
    /// Possibly qualified identifier: `name` or `outer::inner`. Local
    /// label references keep their `@` prefix in the single segment.
    Ident(Vec<String>, Span),
    /// `*` - the current program counter.
    Pc(Span),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
        span: Span,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        span: Span,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        span: Span,
    },
    Member {
        expr: Box<Expr>,
        field: String,
        span: Span,
    },
    Index {
        expr: Box<Expr>,
        index: Box<Expr>,
        span: Span,
    },
}

pub fn expr_span(expr: &Expr) -> Span {
    match expr {
        Expr::Int(_, span)
        | Expr::Str(_, span)
        | Expr::Ident(_, span)
        | Expr::Pc(span)
        | Expr::Unary { span, .. }
        | Expr::Binary { span, .. }
        | Expr::Call { span, .. }
        | Expr::Member { span, .. }
        | Expr::Index { span, .. } => *span,
    }
}

#[derive(Debug, Clone)]
pub struct MacroDef {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Label {
        name: String,
        local: bool,
        span: Span,
    },
    Instruction {
        mnemonic: String,
        operand: OperandAst,
        span: Span,
    },
    Byte {
        args: Vec<Expr>,
        span: Span,
    },
    Word {
        args: Vec<Expr>,
        span: Span,
    },
    Fill {
        count: Expr,
        value: Option<Expr>,
        span: Span,
    },
    Text {
        args: Vec<Expr>,
        span: Span,
    },
    BinaryFile {
        path: String,
        size: Option<Expr>,
        offset: Option<Expr>,
        span: Span,
    },
    If {
        cond: Expr,
        then_body: Vec<Stmt>,
        else_body: Vec<Stmt>,
        span: Span,
    },
    For {
        var: String,
        iter: Expr,
        body: Vec<Stmt>,
        span: Span,
    },
    MacroDef {
        def: Rc<MacroDef>,
        span: Span,
    },
    MacroCall {
        path: Vec<String>,
        args: Vec<Expr>,
        span: Span,
    },
    Scope {
        name: Option<String>,
        body: Vec<Stmt>,
        span: Span,
    },
    Let {
        name: String,
        expr: Expr,
        span: Span,
    },
    Include {
        path: String,
        body: Vec<Stmt>,
        span: Span,
    },
    Segment {
        name: String,
        span: Span,
    },
    SetPc {
        expr: Expr,
        span: Span,
    },
    Align {
        boundary: Expr,
        fill: Option<Expr>,
        span: Span,
    },
    Error {
        message: Expr,
        span: Span,
    },
    Warning {
        message: Expr,
        span: Span,
    },
}

pub fn stmt_span(stmt: &Stmt) -> Span {
    match stmt {
        Stmt::Label { span, .. }
        | Stmt::Instruction { span, .. }
        | Stmt::Byte { span, .. }
        | Stmt::Word { span, .. }
        | Stmt::Fill { span, .. }
        | Stmt::Text { span, .. }
        | Stmt::BinaryFile { span, .. }
        | Stmt::If { span, .. }
        | Stmt::For { span, .. }
        | Stmt::MacroDef { span, .. }
        | Stmt::MacroCall { span, .. }
        | Stmt::Scope { span, .. }
        | Stmt::Let { span, .. }
        | Stmt::Include { span, .. }
        | Stmt::Segment { span, .. }
        | Stmt::SetPc { span, .. }
        | Stmt::Align { span, .. }
        | Stmt::Error { span, .. }
        | Stmt::Warning { span, .. } => *span,
    }
}

pub struct ParseOutput {
    pub stmts: Vec<Stmt>,
    pub errors: Vec<ParseError>,
}

/// Parse the root source file, resolving `!include` directives through the
/// loader. Returns the AST plus all collected parse errors; only a failure
/// to read the root file itself is fatal.
pub fn parse_program(
    root: &str,
    sources: &mut SourceMap,
    loader: &dyn SourceLoader,
) -> Result<ParseOutput, crate::core::source::SourceError> {
    let text = loader.read_text(root)?;
    Ok(parse_text(root, &text, sources, loader))
}

/// Parse source text already in memory (the root file of the program).
pub fn parse_text(
    name: &str,
    text: &str,
    sources: &mut SourceMap,
    loader: &dyn SourceLoader,
) -> ParseOutput {
    let file = sources.add_file(name, text);
    let (tokens, scan_errors) = Tokenizer::new(file, text).tokenize();
    let mut parser = Parser {
        tokens,
        index: 0,
        sources,
        loader,
        errors: scan_errors
            .into_iter()
            .map(|err| ParseError::syntax(err.message, err.span))
            .collect(),
        include_stack: vec![name.to_string()],
    };
    let stmts = parser.parse_body(false);
    ParseOutput {
        stmts,
        errors: parser.errors,
    }
}

struct Parser<'a> {
    tokens: Vec<Token>,
    index: usize,
    sources: &'a mut SourceMap,
    loader: &'a dyn SourceLoader,
    errors: Vec<ParseError>,
    include_stack: Vec<String>,
}

impl<'a> Parser<'a> {
    fn parse_body(&mut self, in_block: bool) -> Vec<Stmt> {
        let mut stmts = Vec::new();
        loop {
            self.skip_separators();
            match self.peek_kind() {
                TokenKind::End => {
                    if in_block {
                        self.errors.push(ParseError::syntax(
                            "Unexpected end of file; missing '}'",
                            self.current_span(),
                        ));
                    }
                    break;
                }
                TokenKind::CloseBrace => {
                    if !in_block {
                        self.errors.push(ParseError::syntax(
                            "Unexpected '}'",
                            self.current_span(),
                        ));
                        self.index += 1;
                        continue;
                    }
                    break;
                }
                _ => {}
            }

            match self.parse_statement() {
                Ok(stmt) => {
                    let is_label = matches!(stmt, Stmt::Label { .. });
                    stmts.push(stmt);
                    // A label may be followed by another statement on the
                    // same line; everything else needs a terminator.
                    if !is_label && !self.at_terminator() {
                        self.errors.push(ParseError::syntax(
                            "Unexpected trailing tokens",
                            self.current_span(),
                        ));
                        self.recover();
                    }
                }
                Err(err) => {
                    self.errors.push(err);
                    self.recover();
                }
            }
        }
        stmts
    }

    fn parse_statement(&mut self) -> Result<Stmt, ParseError> {
        let token = self.peek().clone();
        match &token.kind {
            TokenKind::At => {
                self.index += 1;
                let (name, name_span) = self.expect_identifier("Expected local label name")?;
                if !self.consume_kind(&TokenKind::Colon) {
                    return Err(ParseError::syntax(
                        "Expected ':' after local label",
                        self.current_span(),
                    ));
                }
                Ok(Stmt::Label {
                    name: format!("@{name}"),
                    local: true,
                    span: token.span.to(name_span),
                })
            }
            TokenKind::Identifier(name) => {
                let name = name.clone();
                // A label's colon must be adjacent (`loop:`); with a space
                // between, the colon is a statement separator.
                let adjacent_colon = matches!(
                    self.peek_at(1),
                    Some(Token { kind: TokenKind::Colon, span })
                        if span.line == token.span.line && span.col_start == token.span.col_end
                );
                match self.peek_at(1).map(|t| &t.kind) {
                    Some(TokenKind::Colon) if adjacent_colon => {
                        self.index += 2;
                        Ok(Stmt::Label {
                            name,
                            local: false,
                            span: token.span,
                        })
                    }
                    Some(TokenKind::Assign) => {
                        self.index += 2;
                        let expr = self.parse_expr()?;
                        let span = token.span.to(expr_span(&expr));
                        Ok(Stmt::Let {
                            name,
                            expr,
                            span,
                        })
                    }
                    _ => {
                        if has_mnemonic(&name) {
                            self.index += 1;
                            let operand = self.parse_operand()?;
                            Ok(Stmt::Instruction {
                                mnemonic: name.to_ascii_lowercase(),
                                operand,
                                span: token.span,
                            })
                        } else if matches!(
                            self.peek_at(1).map(|t| &t.kind),
                            Some(TokenKind::Newline | TokenKind::End | TokenKind::CloseBrace)
                                | None
                        ) {
                            // Bare identifier on its own: label without colon.
                            self.index += 1;
                            Ok(Stmt::Label {
                                name,
                                local: false,
                                span: token.span,
                            })
                        } else {
                            self.index += 1;
                            let operand = self.parse_operand()?;
                            // Unknown mnemonic is reported by the emitter
                            // with this statement's span.
                            Ok(Stmt::Instruction {
                                mnemonic: name.to_ascii_lowercase(),
                                operand,
                                span: token.span,
                            })
                        }
                    }
                }
            }
            TokenKind::Operator(OperatorKind::Multiply) => {
                self.index += 1;
                if !self.consume_kind(&TokenKind::Assign) {
                    return Err(ParseError::syntax(
                        "Expected '=' after '*'",
                        self.current_span(),
                    ));
                }
                let expr = self.parse_expr()?;
                let span = token.span.to(expr_span(&expr));
                Ok(Stmt::SetPc { expr, span })
            }
            TokenKind::Operator(OperatorKind::Plus) => {
                self.index += 1;
                self.parse_macro_call(token.span)
            }
            TokenKind::Bang => {
                self.index += 1;
                self.parse_directive(token.span)
            }
            _ => Err(ParseError::syntax(
                "Expected statement",
                token.span,
            )),
        }
    }

    fn parse_macro_call(&mut self, start: Span) -> Result<Stmt, ParseError> {
        let (path, mut end) = self.parse_qualified_name("Expected macro name after '+'")?;
        let mut args = Vec::new();
        if self.consume_kind(&TokenKind::OpenParen) {
            if !self.check_kind(&TokenKind::CloseParen) {
                args.push(self.parse_expr()?);
                while self.consume_kind(&TokenKind::Comma) {
                    args.push(self.parse_expr()?);
                }
            }
            end = self.current_span();
            if !self.consume_kind(&TokenKind::CloseParen) {
                return Err(ParseError::syntax(
                    "Missing ')' in macro call",
                    self.current_span(),
                ));
            }
        }
        Ok(Stmt::MacroCall {
            path,
            args,
            span: start.to(end),
        })
    }

    fn parse_directive(&mut self, start: Span) -> Result<Stmt, ParseError> {
        let (name, name_span) = self.expect_identifier("Expected directive name after '!'")?;
        let span = start.to(name_span);
        match name.to_ascii_lowercase().as_str() {
            "byte" => {
                let args = self.parse_expr_list()?;
                Ok(Stmt::Byte { args, span })
            }
            "word" => {
                let args = self.parse_expr_list()?;
                Ok(Stmt::Word { args, span })
            }
            "fill" => {
                let count = self.parse_expr()?;
                let value = if self.consume_kind(&TokenKind::Comma) {
                    Some(self.parse_expr()?)
                } else {
                    None
                };
                Ok(Stmt::Fill { count, value, span })
            }
            "text" => {
                let args = self.parse_expr_list()?;
                Ok(Stmt::Text { args, span })
            }
            "binary" => {
                let path = self.expect_string("Expected file path after !binary")?;
                let mut size = None;
                let mut offset = None;
                if self.consume_kind(&TokenKind::Comma) {
                    size = Some(self.parse_expr()?);
                    if self.consume_kind(&TokenKind::Comma) {
                        offset = Some(self.parse_expr()?);
                    }
                }
                Ok(Stmt::BinaryFile {
                    path,
                    size,
                    offset,
                    span,
                })
            }
            "if" => self.parse_if(span),
            "for" => {
                let (var, _) = self.expect_identifier("Expected loop variable after !for")?;
                let (kw, kw_span) = self.expect_identifier("Expected 'in' in !for")?;
                if !kw.eq_ignore_ascii_case("in") {
                    return Err(ParseError::syntax("Expected 'in' in !for", kw_span));
                }
                let iter = self.parse_expr()?;
                let body = self.parse_block()?;
                Ok(Stmt::For {
                    var,
                    iter,
                    body,
                    span,
                })
            }
            "macro" => {
                let (mac_name, _) = self.expect_identifier("Expected macro name after !macro")?;
                if !self.consume_kind(&TokenKind::OpenParen) {
                    return Err(ParseError::syntax(
                        "Expected '(' after macro name",
                        self.current_span(),
                    ));
                }
                let mut params = Vec::new();
                if !self.check_kind(&TokenKind::CloseParen) {
                    let (param, _) = self.expect_identifier("Expected parameter name")?;
                    params.push(param);
                    while self.consume_kind(&TokenKind::Comma) {
                        let (param, _) = self.expect_identifier("Expected parameter name")?;
                        params.push(param);
                    }
                }
                if !self.consume_kind(&TokenKind::CloseParen) {
                    return Err(ParseError::syntax(
                        "Missing ')' in macro parameter list",
                        self.current_span(),
                    ));
                }
                let body = self.parse_block()?;
                Ok(Stmt::MacroDef {
                    def: Rc::new(MacroDef {
                        name: mac_name,
                        params,
                        body,
                        span,
                    }),
                    span,
                })
            }
            "scope" => {
                let name = match self.peek_kind() {
                    TokenKind::Identifier(_) => {
                        let (n, _) = self.expect_identifier("Expected scope name")?;
                        Some(n)
                    }
                    _ => None,
                };
                let body = self.parse_block()?;
                Ok(Stmt::Scope { name, body, span })
            }
            "let" => {
                let (let_name, _) = self.expect_identifier("Expected name after !let")?;
                if !self.consume_kind(&TokenKind::Assign) {
                    return Err(ParseError::syntax(
                        "Expected '=' in !let",
                        self.current_span(),
                    ));
                }
                let expr = self.parse_expr()?;
                Ok(Stmt::Let {
                    name: let_name,
                    expr,
                    span,
                })
            }
            "include" => {
                let path = self.expect_string("Expected file path after !include")?;
                let body = self.parse_nested_file(&path, span);
                Ok(Stmt::Include { path, body, span })
            }
            "segment" => {
                let (seg, _) = self.expect_identifier("Expected segment name")?;
                Ok(Stmt::Segment { name: seg, span })
            }
            "align" => {
                let boundary = self.parse_expr()?;
                let fill = if self.consume_kind(&TokenKind::Comma) {
                    Some(self.parse_expr()?)
                } else {
                    None
                };
                Ok(Stmt::Align {
                    boundary,
                    fill,
                    span,
                })
            }
            "error" => {
                let message = self.parse_expr()?;
                Ok(Stmt::Error { message, span })
            }
            "warning" => {
                let message = self.parse_expr()?;
                Ok(Stmt::Warning { message, span })
            }
            other => Err(ParseError::syntax(
                format!("Unknown directive: !{other}"),
                span,
            )),
        }
    }

    fn parse_if(&mut self, span: Span) -> Result<Stmt, ParseError> {
        let cond = self.parse_expr()?;
        let then_body = self.parse_block()?;
        let mut else_body = Vec::new();
        let saved = self.index;
        self.skip_newlines();
        if let TokenKind::Identifier(kw) = self.peek_kind() {
            if kw.eq_ignore_ascii_case("else") {
                self.index += 1;
                if self.check_kind(&TokenKind::Bang) {
                    // `else !if ...` chains.
                    let bang_span = self.current_span();
                    self.index += 1;
                    let (next, next_span) =
                        self.expect_identifier("Expected directive after '!'")?;
                    if !next.eq_ignore_ascii_case("if") {
                        return Err(ParseError::syntax(
                            "Expected !if after else",
                            next_span,
                        ));
                    }
                    else_body.push(self.parse_if(bang_span)?);
                } else {
                    else_body = self.parse_block()?;
                }
                return Ok(Stmt::If {
                    cond,
                    then_body,
                    else_body,
                    span,
                });
            }
        }
        self.index = saved;
        Ok(Stmt::If {
            cond,
            then_body,
            else_body,
            span,
        })
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.skip_newlines();
        if !self.consume_kind(&TokenKind::OpenBrace) {
            return Err(ParseError::syntax("Expected '{'", self.current_span()));
        }
        let body = self.parse_body(true);
        if !self.consume_kind(&TokenKind::CloseBrace) {
            return Err(ParseError::syntax("Missing '}'", self.current_span()));
        }
        Ok(body)
    }

    fn parse_nested_file(&mut self, path: &str, span: Span) -> Vec<Stmt> {
        if self.include_stack.iter().any(|p| p == path) {
            self.errors.push(ParseError::resource(
                format!("Include cycle: {path}"),
                span,
            ));
            return Vec::new();
        }
        let text = match self.loader.read_text(path) {
            Ok(text) => text,
            Err(err) => {
                self.errors
                    .push(ParseError::resource(err.to_string(), span));
                return Vec::new();
            }
        };
        let file = self.sources.add_file(path, &text);
        let (tokens, scan_errors) = Tokenizer::new(file, &text).tokenize();
        for err in scan_errors {
            self.errors.push(ParseError::syntax(err.message, err.span));
        }

        self.include_stack.push(path.to_string());
        let saved_tokens = mem::replace(&mut self.tokens, tokens);
        let saved_index = mem::replace(&mut self.index, 0);
        let stmts = self.parse_body(false);
        self.tokens = saved_tokens;
        self.index = saved_index;
        self.include_stack.pop();
        stmts
    }

    // ---- operands ---------------------------------------------------

    fn parse_operand(&mut self) -> Result<OperandAst, ParseError> {
        if self.at_terminator() {
            return Ok(OperandAst::None);
        }

        if let TokenKind::Identifier(name) = self.peek_kind() {
            if name.eq_ignore_ascii_case("a") {
                let span = self.current_span();
                if matches!(
                    self.peek_at(1).map(|t| &t.kind),
                    Some(TokenKind::Newline | TokenKind::End | TokenKind::CloseBrace | TokenKind::Colon)
                        | None
                ) {
                    self.index += 1;
                    return Ok(OperandAst::Accumulator(span));
                }
            }
        }

        if self.consume_kind(&TokenKind::Hash) {
            let expr = self.parse_expr()?;
            return Ok(OperandAst::Immediate(expr));
        }

        if self.check_kind(&TokenKind::OpenParen) {
            let saved = self.index;
            self.index += 1;
            let inner = self.parse_expr()?;
            if self.consume_kind(&TokenKind::Comma) {
                let (reg, reg_span) = self.expect_identifier("Expected X in (expr,X)")?;
                if !reg.eq_ignore_ascii_case("x") {
                    return Err(ParseError::syntax("Expected X in (expr,X)", reg_span));
                }
                if !self.consume_kind(&TokenKind::CloseParen) {
                    return Err(ParseError::syntax(
                        "Missing ')' in indirect operand",
                        self.current_span(),
                    ));
                }
                return Ok(OperandAst::IndirectX(inner));
            }
            if !self.consume_kind(&TokenKind::CloseParen) {
                return Err(ParseError::syntax(
                    "Missing ')' in indirect operand",
                    self.current_span(),
                ));
            }
            if self.consume_kind(&TokenKind::Comma) {
                let (reg, reg_span) = self.expect_identifier("Expected Y in (expr),Y")?;
                if !reg.eq_ignore_ascii_case("y") {
                    return Err(ParseError::syntax("Expected Y in (expr),Y", reg_span));
                }
                return Ok(OperandAst::IndirectY(inner));
            }
            if self.at_terminator() {
                return Ok(OperandAst::Indirect(inner));
            }
            // Parenthesized sub-expression of a larger direct operand,
            // e.g. `lda (base+1)*2` - reparse as a plain expression.
            self.index = saved;
        }

        let expr = self.parse_expr()?;
        if self.consume_kind(&TokenKind::Comma) {
            let (reg, reg_span) = self.expect_identifier("Expected X or Y index register")?;
            return if reg.eq_ignore_ascii_case("x") {
                Ok(OperandAst::DirectX(expr))
            } else if reg.eq_ignore_ascii_case("y") {
                Ok(OperandAst::DirectY(expr))
            } else {
                Err(ParseError::syntax(
                    "Expected X or Y index register",
                    reg_span,
                ))
            };
        }
        Ok(OperandAst::Direct(expr))
    }

    // ---- expressions ------------------------------------------------

    fn parse_expr_list(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut exprs = vec![self.parse_expr()?];
        while self.consume_kind(&TokenKind::Comma) {
            exprs.push(self.parse_expr()?);
        }
        Ok(exprs)
    }

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        // Unary `<` and `>` take the low/high byte of the whole operand
        // expression to their right.
        match self.peek_operator() {
            Some(OperatorKind::Lt) => {
                let span = self.current_span();
                self.index += 1;
                let expr = self.parse_expr()?;
                return Ok(Expr::Unary {
                    op: UnaryOp::Low,
                    expr: Box::new(expr),
                    span,
                });
            }
            Some(OperatorKind::Gt) => {
                let span = self.current_span();
                self.index += 1;
                let expr = self.parse_expr()?;
                return Ok(Expr::Unary {
                    op: UnaryOp::High,
                    expr: Box::new(expr),
                    span,
                });
            }
            _ => {}
        }
        self.parse_logic_or()
    }

    fn parse_logic_or(&mut self) -> Result<Expr, ParseError> {
        let mut node = self.parse_logic_and()?;
        while self.match_operator(OperatorKind::LogicOr) {
            let span = self.prev_span();
            let rhs = self.parse_logic_and()?;
            node = binary(BinaryOp::LogicOr, node, rhs, span);
        }
        Ok(node)
    }

    fn parse_logic_and(&mut self) -> Result<Expr, ParseError> {
        let mut node = self.parse_bit_or()?;
        while self.match_operator(OperatorKind::LogicAnd) {
            let span = self.prev_span();
            let rhs = self.parse_bit_or()?;
            node = binary(BinaryOp::LogicAnd, node, rhs, span);
        }
        Ok(node)
    }

    fn parse_bit_or(&mut self) -> Result<Expr, ParseError> {
        let mut node = self.parse_bit_xor()?;
        while self.match_operator(OperatorKind::BitOr) {
            let span = self.prev_span();
            let rhs = self.parse_bit_xor()?;
            node = binary(BinaryOp::BitOr, node, rhs, span);
        }
        Ok(node)
    }

    fn parse_bit_xor(&mut self) -> Result<Expr, ParseError> {
        let mut node = self.parse_bit_and()?;
        while self.match_operator(OperatorKind::BitXor) {
            let span = self.prev_span();
            let rhs = self.parse_bit_and()?;
            node = binary(BinaryOp::BitXor, node, rhs, span);
        }
        Ok(node)
    }

    fn parse_bit_and(&mut self) -> Result<Expr, ParseError> {
        let mut node = self.parse_equality()?;
        while self.match_operator(OperatorKind::BitAnd) {
            let span = self.prev_span();
            let rhs = self.parse_equality()?;
            node = binary(BinaryOp::BitAnd, node, rhs, span);
        }
        Ok(node)
    }

    fn parse_equality(&mut self) -> Result<Expr, ParseError> {
        let mut node = self.parse_relational()?;
        loop {
            let op = match self.peek_operator() {
                Some(OperatorKind::Eq) => BinaryOp::Eq,
                Some(OperatorKind::Ne) => BinaryOp::Ne,
                _ => break,
            };
            self.index += 1;
            let span = self.prev_span();
            let rhs = self.parse_relational()?;
            node = binary(op, node, rhs, span);
        }
        Ok(node)
    }

    fn parse_relational(&mut self) -> Result<Expr, ParseError> {
        let mut node = self.parse_shift()?;
        loop {
            let op = match self.peek_operator() {
                Some(OperatorKind::Lt) => BinaryOp::Lt,
                Some(OperatorKind::Le) => BinaryOp::Le,
                Some(OperatorKind::Gt) => BinaryOp::Gt,
                Some(OperatorKind::Ge) => BinaryOp::Ge,
                _ => break,
            };
            self.index += 1;
            let span = self.prev_span();
            let rhs = self.parse_shift()?;
            node = binary(op, node, rhs, span);
        }
        Ok(node)
    }

    fn parse_shift(&mut self) -> Result<Expr, ParseError> {
        let mut node = self.parse_sum()?;
        loop {
            let op = match self.peek_operator() {
                Some(OperatorKind::Shl) => BinaryOp::Shl,
                Some(OperatorKind::Shr) => BinaryOp::Shr,
                _ => break,
            };
            self.index += 1;
            let span = self.prev_span();
            let rhs = self.parse_sum()?;
            node = binary(op, node, rhs, span);
        }
        Ok(node)
    }

    fn parse_sum(&mut self) -> Result<Expr, ParseError> {
        let mut node = self.parse_term()?;
        loop {
            let op = match self.peek_operator() {
                Some(OperatorKind::Plus) => BinaryOp::Add,
                Some(OperatorKind::Minus) => BinaryOp::Subtract,
                _ => break,
            };
            self.index += 1;
            let span = self.prev_span();
            let rhs = self.parse_term()?;
            node = binary(op, node, rhs, span);
        }
        Ok(node)
    }

    fn parse_term(&mut self) -> Result<Expr, ParseError> {
        let mut node = self.parse_unary()?;
        loop {
            let op = match self.peek_operator() {
                Some(OperatorKind::Multiply) => BinaryOp::Multiply,
                Some(OperatorKind::Divide) => BinaryOp::Divide,
                Some(OperatorKind::Mod) => BinaryOp::Mod,
                _ => break,
            };
            self.index += 1;
            let span = self.prev_span();
            let rhs = self.parse_unary()?;
            node = binary(op, node, rhs, span);
        }
        Ok(node)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek_kind() {
            TokenKind::Operator(OperatorKind::Minus) => Some(UnaryOp::Minus),
            TokenKind::Operator(OperatorKind::BitNot) => Some(UnaryOp::BitNot),
            TokenKind::Bang => Some(UnaryOp::LogicNot),
            _ => None,
        };
        if let Some(op) = op {
            self.index += 1;
            let span = self.prev_span();
            let expr = self.parse_unary()?;
            return Ok(Expr::Unary {
                op,
                expr: Box::new(expr),
                span,
            });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut node = self.parse_primary()?;
        loop {
            match self.peek_kind() {
                TokenKind::OpenParen => {
                    let open_span = self.current_span();
                    self.index += 1;
                    let mut args = Vec::new();
                    if !self.check_kind(&TokenKind::CloseParen) {
                        args.push(self.parse_expr()?);
                        while self.consume_kind(&TokenKind::Comma) {
                            args.push(self.parse_expr()?);
                        }
                    }
                    let close_span = self.current_span();
                    if !self.consume_kind(&TokenKind::CloseParen) {
                        return Err(ParseError::syntax(
                            "Missing ')' in call",
                            self.current_span(),
                        ));
                    }
                    node = Expr::Call {
                        callee: Box::new(node),
                        args,
                        span: open_span.to(close_span),
                    };
                }
                TokenKind::OpenBracket => {
                    let open_span = self.current_span();
                    self.index += 1;
                    let index = self.parse_expr()?;
                    let close_span = self.current_span();
                    if !self.consume_kind(&TokenKind::CloseBracket) {
                        return Err(ParseError::syntax(
                            "Missing ']' in subscript",
                            self.current_span(),
                        ));
                    }
                    node = Expr::Index {
                        expr: Box::new(node),
                        index: Box::new(index),
                        span: open_span.to(close_span),
                    };
                }
                TokenKind::Dot => {
                    self.index += 1;
                    let (field, field_span) =
                        self.expect_identifier("Expected member name after '.'")?;
                    node = Expr::Member {
                        expr: Box::new(node),
                        field,
                        span: field_span,
                    };
                }
                _ => break,
            }
        }
        Ok(node)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Number(value) => {
                self.index += 1;
                Ok(Expr::Int(value, token.span))
            }
            TokenKind::Str(lit) => {
                self.index += 1;
                Ok(Expr::Str(lit.bytes, token.span))
            }
            TokenKind::Identifier(_) => {
                let (path, span) = self.parse_qualified_name("Expected identifier")?;
                Ok(Expr::Ident(path, token.span.to(span)))
            }
            TokenKind::At => {
                self.index += 1;
                let (name, span) = self.expect_identifier("Expected local label name")?;
                Ok(Expr::Ident(vec![format!("@{name}")], token.span.to(span)))
            }
            TokenKind::Operator(OperatorKind::Multiply) => {
                self.index += 1;
                Ok(Expr::Pc(token.span))
            }
            TokenKind::OpenParen => {
                self.index += 1;
                let expr = self.parse_expr()?;
                if !self.consume_kind(&TokenKind::CloseParen) {
                    return Err(ParseError::syntax("Missing ')'", self.current_span()));
                }
                Ok(expr)
            }
            TokenKind::End | TokenKind::Newline => Err(ParseError::syntax(
                "Unexpected end of expression",
                token.span,
            )),
            _ => Err(ParseError::syntax(
                "Unexpected token in expression",
                token.span,
            )),
        }
    }

    fn parse_qualified_name(&mut self, expected: &str) -> Result<(Vec<String>, Span), ParseError> {
        let (first, mut span) = self.expect_identifier(expected)?;
        let mut path = vec![first];
        while self.consume_kind(&TokenKind::ColonColon) {
            let (next, next_span) = self.expect_identifier("Expected name after '::'")?;
            path.push(next);
            span = next_span;
        }
        Ok((path, span))
    }

    // ---- token helpers ----------------------------------------------

    fn expect_identifier(&mut self, expected: &str) -> Result<(String, Span), ParseError> {
        match self.peek_kind() {
            TokenKind::Identifier(name) => {
                let name = name.clone();
                let span = self.current_span();
                self.index += 1;
                Ok((name, span))
            }
            _ => Err(ParseError::syntax(expected, self.current_span())),
        }
    }

    fn expect_string(&mut self, expected: &str) -> Result<String, ParseError> {
        match self.peek_kind() {
            TokenKind::Str(lit) => {
                let text = String::from_utf8_lossy(&lit.bytes).to_string();
                self.index += 1;
                Ok(text)
            }
            _ => Err(ParseError::syntax(expected, self.current_span())),
        }
    }

    fn at_terminator(&self) -> bool {
        matches!(
            self.peek_kind(),
            TokenKind::Newline | TokenKind::End | TokenKind::CloseBrace | TokenKind::Colon
        )
    }

    fn skip_separators(&mut self) {
        while matches!(self.peek_kind(), TokenKind::Newline | TokenKind::Colon) {
            self.index += 1;
        }
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek_kind(), TokenKind::Newline) {
            self.index += 1;
        }
    }

    fn recover(&mut self) {
        loop {
            match self.peek_kind() {
                TokenKind::Newline | TokenKind::End | TokenKind::CloseBrace => break,
                _ => self.index += 1,
            }
        }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.index.min(self.tokens.len() - 1)]
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.index + offset)
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn peek_operator(&self) -> Option<OperatorKind> {
        match self.peek_kind() {
            TokenKind::Operator(op) => Some(*op),
            _ => None,
        }
    }

    fn check_kind(&self, kind: &TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn consume_kind(&mut self, kind: &TokenKind) -> bool {
        if self.check_kind(kind) {
            self.index += 1;
            true
        } else {
            false
        }
    }

    fn match_operator(&mut self, op: OperatorKind) -> bool {
        if self.peek_operator() == Some(op) {
            self.index += 1;
            true
        } else {
            false
        }
    }

    fn current_span(&self) -> Span {
        self.peek().span
    }

    fn prev_span(&self) -> Span {
        if self.index == 0 {
            Span::default()
        } else {
            self.tokens[self.index - 1].span
        }
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr, span: Span) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
        span,
    }
}
