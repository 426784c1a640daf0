// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Operand types for the MOS 6502.

use crate::core::parser::{expr_span, Expr};
use crate::core::tokenizer::Span;

/// The 13 canonical 6502 addressing modes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressMode {
    /// No operand (NOP, RTS, BRK, ...)
    Implied,
    /// ASL A, ROL A, ...
    Accumulator,
    /// #$nn
    Immediate,
    /// $nn
    ZeroPage,
    /// $nn,X
    ZeroPageX,
    /// $nn,Y
    ZeroPageY,
    /// $nnnn
    Absolute,
    /// $nnnn,X
    AbsoluteX,
    /// $nnnn,Y
    AbsoluteY,
    /// ($nnnn) - JMP only
    Indirect,
    /// ($nn,X)
    IndexedIndirectX,
    /// ($nn),Y
    IndirectIndexedY,
    /// Branch target (signed 8-bit offset)
    Relative,
}

impl AddressMode {
    /// Human-readable mode name for diagnostics.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            AddressMode::Implied => "implied",
            AddressMode::Accumulator => "accumulator",
            AddressMode::Immediate => "immediate",
            AddressMode::ZeroPage => "zero-page",
            AddressMode::ZeroPageX => "zero-page,X",
            AddressMode::ZeroPageY => "zero-page,Y",
            AddressMode::Absolute => "absolute",
            AddressMode::AbsoluteX => "absolute,X",
            AddressMode::AbsoluteY => "absolute,Y",
            AddressMode::Indirect => "indirect",
            AddressMode::IndexedIndirectX => "(indirect,X)",
            AddressMode::IndirectIndexedY => "(indirect),Y",
            AddressMode::Relative => "relative",
        }
    }

    /// Number of operand bytes following the opcode.
    #[must_use]
    pub fn operand_size(self) -> u8 {
        match self {
            AddressMode::Implied | AddressMode::Accumulator => 0,
            AddressMode::Immediate
            | AddressMode::ZeroPage
            | AddressMode::ZeroPageX
            | AddressMode::ZeroPageY
            | AddressMode::IndexedIndirectX
            | AddressMode::IndirectIndexedY
            | AddressMode::Relative => 1,
            AddressMode::Absolute
            | AddressMode::AbsoluteX
            | AddressMode::AbsoluteY
            | AddressMode::Indirect => 2,
        }
    }
}

/// Operand shape as parsed, carrying unevaluated expressions. The shape
/// determines the candidate addressing modes; the evaluated value picks
/// between zero-page and absolute widths.
#[derive(Clone, Debug)]
pub enum OperandAst {
    /// Bare mnemonic.
    None,
    /// `a`
    Accumulator(Span),
    /// `#expr`
    Immediate(Expr),
    /// `expr` - zero page, absolute, or branch target
    Direct(Expr),
    /// `expr,X`
    DirectX(Expr),
    /// `expr,Y`
    DirectY(Expr),
    /// `(expr)` - JMP only
    Indirect(Expr),
    /// `(expr,X)`
    IndirectX(Expr),
    /// `(expr),Y`
    IndirectY(Expr),
}

impl OperandAst {
    #[must_use]
    pub fn expr(&self) -> Option<&Expr> {
        match self {
            OperandAst::None | OperandAst::Accumulator(_) => None,
            OperandAst::Immediate(expr)
            | OperandAst::Direct(expr)
            | OperandAst::DirectX(expr)
            | OperandAst::DirectY(expr)
            | OperandAst::Indirect(expr)
            | OperandAst::IndirectX(expr)
            | OperandAst::IndirectY(expr) => Some(expr),
        }
    }

    #[must_use]
    pub fn span(&self, stmt_span: Span) -> Span {
        match self {
            OperandAst::None => stmt_span,
            OperandAst::Accumulator(span) => *span,
            other => other.expr().map(expr_span).unwrap_or(stmt_span),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::AddressMode;

    #[test]
    fn operand_sizes() {
        assert_eq!(AddressMode::Implied.operand_size(), 0);
        assert_eq!(AddressMode::Immediate.operand_size(), 1);
        assert_eq!(AddressMode::Relative.operand_size(), 1);
        assert_eq!(AddressMode::Absolute.operand_size(), 2);
        assert_eq!(AddressMode::Indirect.operand_size(), 2);
    }
}
