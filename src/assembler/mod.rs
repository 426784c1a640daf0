// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Assembler driver: runs resolution passes to a fixpoint, then a final
//! strict pass, and assembles the output program image.
//!
//! Pass model: the AST is immutable; the symbol table persists across
//! passes and records the pass each symbol was last defined in. A pass is
//! stable when no label or constant changed value, no instruction changed
//! its encoded width, and no reference was left unresolved. Unresolved
//! references and range violations are hard errors only in the final
//! pass; earlier passes emit the widest legal placeholder so PC-dependent
//! computation stays meaningful.

pub mod cli;

#[cfg(test)]
mod tests;

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::rc::Rc;

use tracing::debug;

use crate::core::debuginfo::{
    ByteRole, ConstantRecord, DebugInfo, DebugInfoBuilder, LabelRecord,
};
use crate::core::diag::{error_count, sort_diagnostics, Diagnostic};
use crate::core::expr::{eval_expr, Builtin, EvalContext, EvalError, Value};
use crate::core::listing::ListingWriter;
use crate::core::parser::{self, expr_span, Expr, Stmt};
use crate::core::petscii;
use crate::core::segment::{SegmentSet, SetPcOutcome, DEFAULT_SEGMENT};
use crate::core::source::{FsLoader, SourceError, SourceLoader, SourceMap};
use crate::core::symbol_table::{DefineOutcome, ScopeId, Symbol, SymbolTable};
use crate::core::tokenizer::Span;
use crate::mos6502::disasm::{disassemble, DisasmOptions};
use crate::mos6502::encode::{encode_instruction, OperandShape};
use crate::mos6502::operand::OperandAst;

use cli::Cli;

pub use cli::VERSION;

/// BASIC stub `10 SYS 2061` placed at $0801 when the source does not set
/// the PC before its first emission. Code starts right after it at $080D.
const BASIC_STUB: [u8; 12] = [
    0x0b, 0x08, 0x0a, 0x00, 0x9e, 0x32, 0x30, 0x36, 0x31, 0x00, 0x00, 0x00,
];

const MAX_MACRO_DEPTH: usize = 64;

#[derive(Debug, Clone)]
pub struct AssembleOptions {
    /// Hard cap on resolution passes before "did not converge".
    pub max_passes: u32,
    /// Constants predefined in the root scope (`-D NAME=VAL`).
    pub defines: Vec<(String, i64)>,
}

impl Default for AssembleOptions {
    fn default() -> Self {
        Self {
            max_passes: 16,
            defines: Vec::new(),
        }
    }
}

pub struct AssembleResult {
    /// Program image prefixed with the 16-bit little-endian load address.
    /// Meaningful only when there are no error diagnostics.
    pub program: Vec<u8>,
    pub load_address: u16,
    pub diagnostics: Vec<Diagnostic>,
    pub debug_info: DebugInfo,
    pub sources: SourceMap,
}

impl AssembleResult {
    #[must_use]
    pub fn error_count(&self) -> usize {
        error_count(&self.diagnostics)
    }

    /// Diagnostics in their stable one-line form, ordered by position.
    #[must_use]
    pub fn formatted_diagnostics(&self) -> Vec<String> {
        self.diagnostics
            .iter()
            .map(|d| d.format(&self.sources))
            .collect()
    }
}

/// Assemble a root source file from disk. `!include`/`!binary` paths
/// resolve relative to the root file's directory.
pub fn assemble_path(
    root: &Path,
    options: &AssembleOptions,
) -> Result<AssembleResult, SourceError> {
    let loader = FsLoader::for_root(root);
    let name = root
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| root.to_string_lossy().to_string());
    let text = loader.read_text(&name)?;
    Ok(assemble_text(&name, &text, &loader, options))
}

/// Assemble source text already in memory, with file access through the
/// supplied loader.
pub fn assemble_text(
    name: &str,
    text: &str,
    loader: &dyn SourceLoader,
    options: &AssembleOptions,
) -> AssembleResult {
    let mut sources = SourceMap::new();
    let parse = parser::parse_text(name, text, &mut sources, loader);
    let mut diagnostics: Vec<Diagnostic> = parse
        .errors
        .iter()
        .map(Diagnostic::from_parse_error)
        .collect();

    if !diagnostics.is_empty() {
        sort_diagnostics(&mut diagnostics);
        return AssembleResult {
            program: Vec::new(),
            load_address: 0,
            diagnostics,
            debug_info: DebugInfoBuilder::new().snapshot(),
            sources,
        };
    }

    let ast: Rc<[Stmt]> = parse.stmts.into();
    let mut asm = Assembler::new(loader, options);

    let mut pass = 1;
    let converged = loop {
        let stable = asm.run_pass(&ast, pass, false);
        debug!(pass, stable, "resolution pass complete");
        if stable {
            break true;
        }
        if pass >= options.max_passes {
            break false;
        }
        pass += 1;
    };

    if !converged {
        diagnostics.extend(asm.take_diagnostics());
        diagnostics.push(Diagnostic::error(
            format!(
                "Assembly did not converge within {} passes",
                options.max_passes
            ),
            ast.first().map(parser::stmt_span).unwrap_or_default(),
        ));
        sort_diagnostics(&mut diagnostics);
        return AssembleResult {
            program: Vec::new(),
            load_address: 0,
            diagnostics,
            debug_info: DebugInfoBuilder::new().snapshot(),
            sources,
        };
    }

    asm.run_pass(&ast, pass + 1, true);
    debug!(passes = pass + 1, "assembly complete");

    diagnostics.extend(asm.take_diagnostics());
    sort_diagnostics(&mut diagnostics);

    let load_address = asm.segments.load_address();
    AssembleResult {
        program: asm.segments.program_bytes(),
        load_address,
        diagnostics,
        debug_info: asm.debug.snapshot(),
        sources,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StubState {
    Pending,
    Emitted,
    Suppressed,
}

struct Assembler<'a> {
    loader: &'a dyn SourceLoader,
    defines: &'a [(String, i64)],
    symbols: SymbolTable,
    segments: SegmentSet,
    debug: DebugInfoBuilder,
    diagnostics: Vec<Diagnostic>,
    current_scope: ScopeId,
    pass: u32,
    strict: bool,
    stub: StubState,
    /// Stability tracking for the fixpoint loop. Unresolved references
    /// are keyed by use site; a pass introducing no new ones is stable
    /// (the final pass turns the survivors into errors).
    value_changed: bool,
    unresolved: Vec<String>,
    prev_unresolved: Vec<String>,
    widths: Vec<u8>,
    prev_widths: Vec<u8>,
    /// Hygiene counters, reset per pass; the walk is deterministic so the
    /// same invocation gets the same index on every pass.
    invocation_counter: u32,
    anon_counter: u32,
    macro_depth: usize,
}

impl<'a> Assembler<'a> {
    fn new(loader: &'a dyn SourceLoader, options: &'a AssembleOptions) -> Self {
        Self {
            loader,
            defines: &options.defines,
            symbols: SymbolTable::new(),
            segments: SegmentSet::new(),
            debug: DebugInfoBuilder::new(),
            diagnostics: Vec::new(),
            current_scope: SymbolTable::ROOT,
            pass: 0,
            strict: false,
            stub: StubState::Pending,
            value_changed: false,
            unresolved: Vec::new(),
            prev_unresolved: Vec::new(),
            widths: Vec::new(),
            prev_widths: Vec::new(),
            invocation_counter: 0,
            anon_counter: 0,
            macro_depth: 0,
        }
    }

    fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    /// Run one pass over the AST. Returns true when the pass was stable.
    fn run_pass(&mut self, ast: &Rc<[Stmt]>, pass: u32, strict: bool) -> bool {
        self.pass = pass;
        self.strict = strict;
        self.segments.begin_pass();
        self.debug.clear();
        self.diagnostics.clear();
        self.current_scope = SymbolTable::ROOT;
        self.stub = StubState::Pending;
        self.value_changed = false;
        self.unresolved.clear();
        self.widths.clear();
        self.invocation_counter = 0;
        self.anon_counter = 0;
        self.macro_depth = 0;

        let defines = self.defines;
        for (name, value) in defines {
            let _ = self.symbols.define_constant(
                SymbolTable::ROOT,
                name,
                Value::Int(*value),
                pass,
                Span::default(),
            );
        }

        let ast = Rc::clone(ast);
        self.walk(&ast);

        self.unresolved.sort();
        self.unresolved.dedup();
        let stable = !self.value_changed
            && self.widths == self.prev_widths
            && self.unresolved == self.prev_unresolved;
        self.prev_widths = std::mem::take(&mut self.widths);
        self.prev_unresolved = std::mem::take(&mut self.unresolved);
        stable
    }

    fn walk(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            self.exec_stmt(stmt);
        }
    }

    fn exec_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Label { name, span, .. } => self.exec_label(name, *span),
            Stmt::Instruction {
                mnemonic,
                operand,
                span,
            } => self.exec_instruction(mnemonic, operand, *span),
            Stmt::Byte { args, span } => self.exec_byte(args, *span),
            Stmt::Word { args, span } => self.exec_word(args, *span),
            Stmt::Fill { count, value, span } => self.exec_fill(count, value.as_ref(), *span),
            Stmt::Text { args, span } => self.exec_text(args, *span),
            Stmt::BinaryFile {
                path,
                size,
                offset,
                span,
            } => self.exec_binary(path, size.as_ref(), offset.as_ref(), *span),
            Stmt::If {
                cond,
                then_body,
                else_body,
                ..
            } => self.exec_if(cond, then_body, else_body),
            Stmt::For {
                var,
                iter,
                body,
                span,
            } => self.exec_for(var, iter, body, *span),
            Stmt::MacroDef { def, span } => self.exec_macro_def(Rc::clone(def), *span),
            Stmt::MacroCall { path, args, span } => self.exec_macro_call(path, args, *span),
            Stmt::Scope { name, body, .. } => {
                let scope = match name {
                    Some(name) => self.symbols.ensure_child(self.current_scope, name, false),
                    None => self.enter_anonymous("scope"),
                };
                self.with_scope(scope, |asm| asm.walk(body));
            }
            Stmt::Let { name, expr, span } => self.exec_let(name, expr, *span),
            Stmt::Include { body, .. } => self.walk(body),
            Stmt::Segment { name, .. } => self.segments.select(name),
            Stmt::SetPc { expr, span } => self.exec_set_pc(expr, *span),
            Stmt::Align {
                boundary,
                fill,
                span,
            } => self.exec_align(boundary, fill.as_ref(), *span),
            Stmt::Error { message, span } => {
                if let Some(value) = self.eval_value(message) {
                    self.diagnostics
                        .push(Diagnostic::error(value.display_string(), *span));
                }
            }
            Stmt::Warning { message, span } => {
                if let Some(value) = self.eval_value(message) {
                    self.diagnostics
                        .push(Diagnostic::warning(value.display_string(), *span));
                }
            }
        }
    }

    // ---- symbols ----------------------------------------------------

    fn exec_label(&mut self, name: &str, span: Span) {
        let value = i64::from(self.effective_pc());
        match self
            .symbols
            .define_label(self.current_scope, name, value, self.pass, span)
        {
            DefineOutcome::New | DefineOutcome::Unchanged => {}
            DefineOutcome::Changed => self.value_changed = true,
            DefineOutcome::Duplicate => {
                self.diagnostics
                    .push(Diagnostic::error(format!("Duplicate label: {name}"), span));
                return;
            }
        }
        if Builtin::by_name(name).is_some() {
            self.diagnostics.push(Diagnostic::warning(
                format!("Label shadows built-in name: {name}"),
                span,
            ));
        }
        if self.strict {
            self.debug.record_label(LabelRecord {
                name: name.to_string(),
                scope_path: self.symbols.scope_path(self.current_scope),
                addr: value,
                segment: self.segments.current().name.clone(),
                loc: span,
            });
        }
    }

    fn exec_let(&mut self, name: &str, expr: &Expr, span: Span) {
        let Some(value) = self.eval_value(expr) else {
            return;
        };
        if self.strict {
            self.debug.record_constant(ConstantRecord {
                name: name.to_string(),
                scope_path: self.symbols.scope_path(self.current_scope),
                value: value.display_string(),
                loc: span,
            });
        }
        match self
            .symbols
            .define_constant(self.current_scope, name, value, self.pass, span)
        {
            DefineOutcome::New | DefineOutcome::Unchanged => {}
            DefineOutcome::Changed => self.value_changed = true,
            DefineOutcome::Duplicate => {
                self.diagnostics
                    .push(Diagnostic::error(format!("Duplicate symbol: {name}"), span));
            }
        }
    }

    fn exec_macro_def(&mut self, def: Rc<parser::MacroDef>, span: Span) {
        let name = def.name.clone();
        match self
            .symbols
            .define_macro(self.current_scope, def, self.pass, span)
        {
            DefineOutcome::Duplicate => {
                self.diagnostics.push(Diagnostic::error(
                    format!("Macro already defined: {name}"),
                    span,
                ));
            }
            _ => {
                if Builtin::by_name(&name).is_some() {
                    self.diagnostics.push(Diagnostic::warning(
                        format!("Macro shadows built-in name: {name}"),
                        span,
                    ));
                }
            }
        }
    }

    fn exec_macro_call(&mut self, path: &[String], args: &[Expr], span: Span) {
        let record = match self.symbols.lookup(self.current_scope, path) {
            Some(record) => record,
            None => {
                self.diagnostics.push(Diagnostic::error(
                    format!("Unknown macro: {}", path.join("::")),
                    span,
                ));
                return;
            }
        };
        let (def, captured) = match &record.sym {
            Symbol::Macro { def, captured } => (Rc::clone(def), *captured),
            _ => {
                self.diagnostics.push(Diagnostic::error(
                    format!("Symbol is not a macro: {}", path.join("::")),
                    span,
                ));
                return;
            }
        };

        if def.params.len() != args.len() {
            self.diagnostics.push(Diagnostic::error(
                format!(
                    "Macro {} expects {} argument(s), got {}",
                    def.name,
                    def.params.len(),
                    args.len()
                ),
                span,
            ));
            return;
        }
        if self.macro_depth >= MAX_MACRO_DEPTH {
            self.diagnostics.push(Diagnostic::error(
                "Macro expansion exceeded maximum depth",
                span,
            ));
            return;
        }

        // Arguments evaluate in the caller's scope; the body walks in a
        // fresh invocation scope under the macro's defining scope, so free
        // identifiers resolve hygienically and labels defined inside get
        // per-invocation identities.
        let mut bound = Vec::with_capacity(args.len());
        for (param, arg) in def.params.iter().zip(args) {
            bound.push((param.clone(), self.eval_value(arg)));
        }

        self.invocation_counter += 1;
        let scope_name = format!("{}@{}", def.name, self.invocation_counter);
        let invocation = self.symbols.ensure_child(captured, &scope_name, false);
        for (param, value) in bound {
            if let Some(value) = value {
                let _ = self
                    .symbols
                    .define_constant(invocation, &param, value, self.pass, span);
            }
        }

        self.macro_depth += 1;
        self.with_scope(invocation, |asm| asm.walk(&def.body));
        self.macro_depth -= 1;
    }

    // ---- control flow -----------------------------------------------

    fn exec_if(&mut self, cond: &Expr, then_body: &[Stmt], else_body: &[Stmt]) {
        // An unresolved condition takes neither branch this pass; the
        // unresolved flag forces another pass (or an error when final).
        let Some(value) = self.eval_int_opt(cond) else {
            return;
        };
        let scope = self.enter_anonymous("if");
        if value != 0 {
            self.with_scope(scope, |asm| asm.walk(then_body));
        } else {
            self.with_scope(scope, |asm| asm.walk(else_body));
        }
    }

    fn exec_for(&mut self, var: &str, iter: &Expr, body: &[Stmt], span: Span) {
        let Some(value) = self.eval_value(iter) else {
            return;
        };
        let items: Vec<Value> = match value {
            Value::Array(items) => items,
            other => {
                self.diagnostics.push(Diagnostic::error(
                    format!(
                        "!for expects an array, got: {}",
                        other.display_string()
                    ),
                    span,
                ));
                return;
            }
        };

        for item in items {
            let scope = self.enter_anonymous("for");
            let _ = self
                .symbols
                .define_constant(scope, var, item, self.pass, span);
            self.with_scope(scope, |asm| asm.walk(body));
        }
    }

    // ---- emission ---------------------------------------------------

    fn exec_instruction(&mut self, mnemonic: &str, operand: &OperandAst, span: Span) {
        let shape = match operand {
            OperandAst::None => OperandShape::None,
            OperandAst::Accumulator(_) => OperandShape::Accumulator,
            OperandAst::Immediate(_) => OperandShape::Immediate,
            OperandAst::Direct(_) => OperandShape::Direct,
            OperandAst::DirectX(_) => OperandShape::DirectX,
            OperandAst::DirectY(_) => OperandShape::DirectY,
            OperandAst::Indirect(_) => OperandShape::Indirect,
            OperandAst::IndirectX(_) => OperandShape::IndirectX,
            OperandAst::IndirectY(_) => OperandShape::IndirectY,
        };
        let value = operand.expr().and_then(|expr| self.eval_int_opt(expr));
        let pc = self.effective_pc();
        match encode_instruction(mnemonic, shape, value, pc, self.strict, operand.span(span)) {
            Ok(encoded) => {
                self.widths.push(encoded.bytes.len() as u8);
                self.emit(&encoded.bytes, span, ByteRole::InstructionStart);
            }
            Err(err) => {
                self.widths.push(0);
                self.diagnostics
                    .push(Diagnostic::error(err.message, err.span));
            }
        }
    }

    fn exec_byte(&mut self, args: &[Expr], span: Span) {
        let mut bytes = Vec::new();
        for arg in args {
            self.flatten_bytes(arg, &mut bytes);
        }
        self.emit(&bytes, span, ByteRole::Data);
    }

    fn flatten_bytes(&mut self, expr: &Expr, out: &mut Vec<u8>) {
        let span = expr_span(expr);
        match self.eval_value(expr) {
            None => out.push(0),
            Some(Value::Int(v)) => {
                if !(-128..=255).contains(&v) {
                    self.diagnostics.push(Diagnostic::error(
                        format!("Byte value out of range -128..255: {v}"),
                        span,
                    ));
                }
                out.push((v & 0xff) as u8);
            }
            Some(Value::Str(bytes)) => out.extend_from_slice(&bytes),
            Some(Value::Array(items)) => {
                for item in items {
                    match item {
                        Value::Int(v) => {
                            if !(-128..=255).contains(&v) {
                                self.diagnostics.push(Diagnostic::error(
                                    format!("Byte value out of range -128..255: {v}"),
                                    span,
                                ));
                            }
                            out.push((v & 0xff) as u8);
                        }
                        Value::Str(bytes) => out.extend_from_slice(&bytes),
                        other => {
                            self.diagnostics.push(Diagnostic::error(
                                format!("Cannot emit value: {}", other.display_string()),
                                span,
                            ));
                            out.push(0);
                        }
                    }
                }
            }
            Some(other) => {
                self.diagnostics.push(Diagnostic::error(
                    format!("Cannot emit value: {}", other.display_string()),
                    span,
                ));
                out.push(0);
            }
        }
    }

    fn exec_word(&mut self, args: &[Expr], span: Span) {
        let mut bytes = Vec::new();
        for arg in args {
            let arg_span = expr_span(arg);
            match self.eval_int_opt(arg) {
                None => bytes.extend_from_slice(&[0, 0]),
                Some(v) => {
                    if !(-32768..=65535).contains(&v) {
                        self.diagnostics.push(Diagnostic::error(
                            format!("Word value out of range -32768..65535: {v}"),
                            arg_span,
                        ));
                    }
                    bytes.push((v & 0xff) as u8);
                    bytes.push(((v >> 8) & 0xff) as u8);
                }
            }
        }
        self.emit(&bytes, span, ByteRole::Data);
    }

    fn exec_fill(&mut self, count: &Expr, value: Option<&Expr>, span: Span) {
        let Some(count) = self.eval_int_opt(count) else {
            return;
        };
        if count < 0 {
            self.diagnostics.push(Diagnostic::error(
                format!("Negative fill count: {count}"),
                span,
            ));
            return;
        }
        if count > 0x10000 {
            self.diagnostics.push(Diagnostic::error(
                format!("Fill count exceeds the 64K address space: {count}"),
                span,
            ));
            return;
        }
        let fill = match value {
            Some(expr) => {
                let fill_span = expr_span(expr);
                match self.eval_int_opt(expr) {
                    Some(v) => {
                        if !(-128..=255).contains(&v) {
                            self.diagnostics.push(Diagnostic::error(
                                format!("Byte value out of range -128..255: {v}"),
                                fill_span,
                            ));
                        }
                        (v & 0xff) as u8
                    }
                    None => 0,
                }
            }
            None => 0,
        };
        let bytes = vec![fill; count as usize];
        self.emit(&bytes, span, ByteRole::Data);
    }

    fn exec_text(&mut self, args: &[Expr], span: Span) {
        let mut bytes = Vec::new();
        for arg in args {
            let arg_span = expr_span(arg);
            match self.eval_value(arg) {
                None => {}
                Some(Value::Str(text)) => bytes.extend_from_slice(&petscii::encode(&text)),
                Some(Value::Int(v)) => {
                    if !(-128..=255).contains(&v) {
                        self.diagnostics.push(Diagnostic::error(
                            format!("Byte value out of range -128..255: {v}"),
                            arg_span,
                        ));
                    }
                    bytes.push((v & 0xff) as u8);
                }
                Some(other) => {
                    self.diagnostics.push(Diagnostic::error(
                        format!("!text expects strings, got: {}", other.display_string()),
                        arg_span,
                    ));
                }
            }
        }
        self.emit(&bytes, span, ByteRole::Data);
    }

    fn exec_binary(
        &mut self,
        path: &str,
        size: Option<&Expr>,
        offset: Option<&Expr>,
        span: Span,
    ) {
        let data = match self.loader.read_binary(path) {
            Ok(data) => data,
            Err(err) => {
                self.diagnostics
                    .push(Diagnostic::error(err.to_string(), span));
                return;
            }
        };
        let offset = match offset {
            Some(expr) => match self.eval_int_opt(expr) {
                Some(v) => v,
                None => return,
            },
            None => 0,
        };
        let size = match size {
            Some(expr) => match self.eval_int_opt(expr) {
                Some(v) => v,
                None => return,
            },
            None => data.len() as i64 - offset,
        };
        if offset < 0 || size < 0 || offset + size > data.len() as i64 {
            self.diagnostics.push(Diagnostic::error(
                format!(
                    "Binary include range exceeds file: {path} ({} bytes, offset {offset}, size {size})",
                    data.len()
                ),
                span,
            ));
            return;
        }
        let slice = data[offset as usize..(offset + size) as usize].to_vec();
        self.emit(&slice, span, ByteRole::Data);
    }

    fn exec_set_pc(&mut self, expr: &Expr, span: Span) {
        let Some(value) = self.eval_int_opt(expr) else {
            return;
        };
        if !(0..=0xffff).contains(&value) {
            self.diagnostics.push(Diagnostic::error(
                format!("Address out of range: {value}"),
                span,
            ));
            return;
        }
        if self.stub == StubState::Pending
            && self.segments.current().name == DEFAULT_SEGMENT
            && self.segments.at_origin()
        {
            self.stub = StubState::Suppressed;
        }
        if self.segments.set_pc(value as u16) == SetPcOutcome::Backwards {
            self.diagnostics.push(Diagnostic::error(
                format!("PC moved backwards over emitted code: {value:#06x}"),
                span,
            ));
        }
    }

    fn exec_align(&mut self, boundary: &Expr, fill: Option<&Expr>, span: Span) {
        let Some(boundary) = self.eval_int_opt(boundary) else {
            return;
        };
        if boundary < 1 || boundary > 0x10000 {
            self.diagnostics.push(Diagnostic::error(
                format!("Invalid alignment boundary: {boundary}"),
                span,
            ));
            return;
        }
        let fill = match fill {
            Some(expr) => self.eval_int_opt(expr).map(|v| (v & 0xff) as u8).unwrap_or(0),
            None => 0,
        };
        let pc = i64::from(self.effective_pc());
        let pad = (boundary - pc % boundary) % boundary;
        if pad > 0 {
            let bytes = vec![fill; pad as usize];
            self.emit(&bytes, span, ByteRole::Data);
        }
    }

    fn emit(&mut self, bytes: &[u8], span: Span, role: ByteRole) {
        if bytes.is_empty() {
            return;
        }
        if self.stub == StubState::Pending
            && self.segments.current().name == DEFAULT_SEGMENT
            && self.segments.at_origin()
        {
            let addr = self.segments.emit(&BASIC_STUB);
            self.debug
                .record_bytes(addr, DEFAULT_SEGMENT, &BASIC_STUB, span, ByteRole::Data);
            self.stub = StubState::Emitted;
        }
        let addr = self.segments.emit(bytes);
        let segment = self.segments.current().name.clone();
        self.debug.record_bytes(addr, &segment, bytes, span, role);
    }

    /// PC where the next byte will land, accounting for a BASIC stub that
    /// is still pending emission.
    fn effective_pc(&self) -> u16 {
        let pc = self.segments.pc();
        if self.stub == StubState::Pending
            && self.segments.current().name == DEFAULT_SEGMENT
            && self.segments.at_origin()
        {
            pc.wrapping_add(BASIC_STUB.len() as u16)
        } else {
            pc
        }
    }

    // ---- evaluation -------------------------------------------------

    fn eval_value(&mut self, expr: &Expr) -> Option<Value> {
        let ctx = Ctx {
            symbols: &self.symbols,
            scope: self.current_scope,
            pc: Some(i64::from(self.effective_pc())),
        };
        match eval_expr(expr, &ctx) {
            Ok(value) => Some(value),
            Err(EvalError::Unresolved { name, span }) => {
                self.unresolved.push(format!(
                    "{}:{}:{}:{name}",
                    span.file, span.line, span.col_start
                ));
                if self.strict {
                    self.diagnostics.push(Diagnostic::error(
                        format!("Undefined symbol: {name}"),
                        span,
                    ));
                }
                None
            }
            Err(EvalError::Error { message, span }) => {
                self.diagnostics.push(Diagnostic::error(message, span));
                None
            }
        }
    }

    fn eval_int_opt(&mut self, expr: &Expr) -> Option<i64> {
        match self.eval_value(expr)? {
            Value::Int(v) => Some(v),
            other => {
                self.diagnostics.push(Diagnostic::error(
                    format!("Expected integer value, got: {}", other.display_string()),
                    expr_span(expr),
                ));
                None
            }
        }
    }

    // ---- scope helpers ----------------------------------------------

    fn enter_anonymous(&mut self, kind: &str) -> ScopeId {
        self.anon_counter += 1;
        let name = format!("@{kind}@{}", self.anon_counter);
        self.symbols.ensure_child(self.current_scope, &name, true)
    }

    fn with_scope(&mut self, scope: ScopeId, body: impl FnOnce(&mut Self)) {
        let saved = std::mem::replace(&mut self.current_scope, scope);
        body(self);
        self.current_scope = saved;
    }
}

struct Ctx<'a> {
    symbols: &'a SymbolTable,
    scope: ScopeId,
    pc: Option<i64>,
}

impl EvalContext for Ctx<'_> {
    fn lookup(&self, path: &[String], span: Span) -> Result<Value, EvalError> {
        if let Some(record) = self.symbols.lookup(self.scope, path) {
            return match &record.sym {
                Symbol::Label { value } => Ok(Value::Int(*value)),
                Symbol::Constant { value } => Ok(value.clone()),
                Symbol::Macro { .. } => Err(EvalError::new(
                    format!("Macro used as a value: {}", path.join("::")),
                    span,
                )),
            };
        }
        if let [name] = path {
            if let Some(builtin) = Builtin::by_name(name) {
                return Ok(Value::Callable(builtin));
            }
        }
        Err(EvalError::unresolved(path.join("::"), span))
    }

    fn current_pc(&self) -> Option<i64> {
        self.pc
    }
}

// ---- CLI entry point ------------------------------------------------

/// Outcome of a CLI run: the assembly result plus where the program was
/// written (when it was).
pub struct RunReport {
    pub result: AssembleResult,
    pub out_path: Option<String>,
}

/// Run the assembler with command-line arguments. Output files are only
/// written when assembly produced no error diagnostics.
pub fn run() -> Result<RunReport, String> {
    let cli = <Cli as clap::Parser>::parse();
    cli.init_tracing();
    let options = cli.to_options()?;

    let result = assemble_path(&cli.source, &options)
        .map_err(|err| format!("{}: {err}", cli.source.display()))?;

    if result.error_count() > 0 {
        return Ok(RunReport {
            result,
            out_path: None,
        });
    }

    let out_path = cli.out_path();
    write_bytes(&out_path, &result.program).map_err(|err| format!("{out_path}: {err}"))?;

    if let Some(path) = &cli.debug_info {
        let text = result.debug_info.to_text(&result.sources);
        write_bytes(&path.to_string_lossy(), text.as_bytes())
            .map_err(|err| format!("{}: {err}", path.display()))?;
    }

    if let Some(target) = &cli.disasm {
        let image = &result.program[2..];
        let pred = result.debug_info.instruction_predicate(result.load_address);
        let opts = DisasmOptions {
            show_labels: true,
            show_cycles: true,
            labels: result
                .debug_info
                .labels()
                .iter()
                .map(|l| (l.addr as u16, l.name.clone()))
                .collect(),
        };
        let lines = disassemble(image, result.load_address, Some(&pred), &opts);
        let text = lines.join("\n") + "\n";
        if target == "-" {
            io::stdout()
                .write_all(text.as_bytes())
                .map_err(|err| err.to_string())?;
        } else {
            write_bytes(target, text.as_bytes()).map_err(|err| format!("{target}: {err}"))?;
        }
    }

    if let Some(path) = &cli.list {
        let file =
            File::create(path).map_err(|err| format!("{}: {err}", path.display()))?;
        let mut listing = ListingWriter::new(file);
        let title = format!("forge64 6502 Assembler v{VERSION}");
        listing
            .header(&title)
            .and_then(|()| listing.write_program(&result.debug_info, &result.sources))
            .and_then(|()| listing.footer(&result.debug_info, result.program.len() - 2))
            .map_err(|err| format!("{}: {err}", path.display()))?;
    }

    Ok(RunReport {
        result,
        out_path: Some(out_path),
    })
}

fn write_bytes(path: &str, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)
}
