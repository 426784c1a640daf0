// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Instruction encoding: addressing-mode selection, zero-page narrowing
//! and branch offset computation.
//!
//! The driver evaluates operand expressions first; an operand whose value
//! is not yet known arrives as `None` and encodes as the widest legal
//! form so the PC stream stays meaningful across passes. Range checks are
//! enforced only in strict (final pass) mode.

use crate::core::tokenizer::Span;
use crate::mos6502::operand::AddressMode;
use crate::mos6502::table::{lookup_instruction, InstructionEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandShape {
    None,
    Accumulator,
    Immediate,
    Direct,
    DirectX,
    DirectY,
    Indirect,
    IndirectX,
    IndirectY,
}

#[derive(Debug, Clone)]
pub struct EncodeError {
    pub message: String,
    pub span: Span,
}

impl EncodeError {
    fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Encoded {
    pub bytes: Vec<u8>,
    pub mode: AddressMode,
    pub cycles: &'static str,
}

/// Branch mnemonics use relative addressing exclusively.
#[must_use]
pub fn is_branch(mnemonic: &str) -> bool {
    matches!(
        mnemonic.to_ascii_uppercase().as_str(),
        "BCC" | "BCS" | "BEQ" | "BNE" | "BMI" | "BPL" | "BVC" | "BVS"
    )
}

pub fn encode_instruction(
    mnemonic: &str,
    shape: OperandShape,
    value: Option<i64>,
    pc: u16,
    strict: bool,
    span: Span,
) -> Result<Encoded, EncodeError> {
    if !crate::mos6502::table::has_mnemonic(mnemonic) {
        return Err(EncodeError::new(
            format!("Unknown mnemonic: {mnemonic}"),
            span,
        ));
    }

    if is_branch(mnemonic) {
        return encode_branch(mnemonic, shape, value, pc, strict, span);
    }

    match shape {
        OperandShape::None => {
            let entry = lookup_instruction(mnemonic, AddressMode::Implied)
                .or_else(|| lookup_instruction(mnemonic, AddressMode::Accumulator))
                .ok_or_else(|| {
                    EncodeError::new(format!("{mnemonic} requires an operand"), span)
                })?;
            Ok(one_byte(entry))
        }

        OperandShape::Accumulator => {
            let entry = lookup_instruction(mnemonic, AddressMode::Accumulator).ok_or_else(|| {
                illegal_mode(mnemonic, AddressMode::Accumulator, span)
            })?;
            Ok(one_byte(entry))
        }

        OperandShape::Immediate => {
            let entry = lookup_instruction(mnemonic, AddressMode::Immediate)
                .ok_or_else(|| illegal_mode(mnemonic, AddressMode::Immediate, span))?;
            let byte = check_byte(value, strict, span)?;
            Ok(Encoded {
                bytes: vec![entry.opcode, byte],
                mode: AddressMode::Immediate,
                cycles: entry.cycles,
            })
        }

        OperandShape::Direct => {
            encode_direct(mnemonic, value, strict, span, AddressMode::ZeroPage, AddressMode::Absolute)
        }
        OperandShape::DirectX => encode_direct(
            mnemonic,
            value,
            strict,
            span,
            AddressMode::ZeroPageX,
            AddressMode::AbsoluteX,
        ),
        OperandShape::DirectY => encode_direct(
            mnemonic,
            value,
            strict,
            span,
            AddressMode::ZeroPageY,
            AddressMode::AbsoluteY,
        ),

        OperandShape::Indirect => {
            let entry = lookup_instruction(mnemonic, AddressMode::Indirect)
                .ok_or_else(|| illegal_mode(mnemonic, AddressMode::Indirect, span))?;
            let addr = check_word(value, strict, span)?;
            Ok(two_byte(entry, addr))
        }

        OperandShape::IndirectX => {
            let entry = lookup_instruction(mnemonic, AddressMode::IndexedIndirectX)
                .ok_or_else(|| illegal_mode(mnemonic, AddressMode::IndexedIndirectX, span))?;
            let byte = check_byte(value, strict, span)?;
            Ok(Encoded {
                bytes: vec![entry.opcode, byte],
                mode: AddressMode::IndexedIndirectX,
                cycles: entry.cycles,
            })
        }

        OperandShape::IndirectY => {
            let entry = lookup_instruction(mnemonic, AddressMode::IndirectIndexedY)
                .ok_or_else(|| illegal_mode(mnemonic, AddressMode::IndirectIndexedY, span))?;
            let byte = check_byte(value, strict, span)?;
            Ok(Encoded {
                bytes: vec![entry.opcode, byte],
                mode: AddressMode::IndirectIndexedY,
                cycles: entry.cycles,
            })
        }
    }
}

/// Pick zero page when the value is known to fit in one unsigned byte,
/// otherwise the absolute form. Unresolved operands take the widest legal
/// encoding as a placeholder.
fn encode_direct(
    mnemonic: &str,
    value: Option<i64>,
    strict: bool,
    span: Span,
    zp_mode: AddressMode,
    abs_mode: AddressMode,
) -> Result<Encoded, EncodeError> {
    let zp = lookup_instruction(mnemonic, zp_mode);
    let abs = lookup_instruction(mnemonic, abs_mode);

    match (zp, abs) {
        (None, None) => Err(illegal_mode(mnemonic, abs_mode, span)),
        (Some(entry), _) if fits_byte(value) => {
            let byte = check_byte(value, strict, span)?;
            Ok(Encoded {
                bytes: vec![entry.opcode, byte],
                mode: zp_mode,
                cycles: entry.cycles,
            })
        }
        (_, Some(entry)) => {
            let addr = check_word(value, strict, span)?;
            Ok(two_byte(entry, addr))
        }
        (Some(entry), None) => {
            // Zero-page-only encodings (e.g. STX $nn,Y) must fit a byte.
            let byte = check_byte(value, strict, span)?;
            Ok(Encoded {
                bytes: vec![entry.opcode, byte],
                mode: zp_mode,
                cycles: entry.cycles,
            })
        }
    }
}

fn encode_branch(
    mnemonic: &str,
    shape: OperandShape,
    value: Option<i64>,
    pc: u16,
    strict: bool,
    span: Span,
) -> Result<Encoded, EncodeError> {
    if shape != OperandShape::Direct {
        return Err(EncodeError::new(
            format!("{mnemonic} takes a branch target"),
            span,
        ));
    }
    let entry = match lookup_instruction(mnemonic, AddressMode::Relative) {
        Some(entry) => entry,
        None => return Err(illegal_mode(mnemonic, AddressMode::Relative, span)),
    };

    let offset_byte = match value {
        Some(target) => {
            // Signed arithmetic in 64 bits, range-checked before the
            // truncation to 8 bits.
            let offset = target - (i64::from(pc) + 2);
            if !(-128..=127).contains(&offset) {
                if strict {
                    return Err(EncodeError::new(
                        format!("Branch target out of range: offset {offset}"),
                        span,
                    ));
                }
                0
            } else {
                (offset as i8) as u8
            }
        }
        None => 0,
    };

    Ok(Encoded {
        bytes: vec![entry.opcode, offset_byte],
        mode: AddressMode::Relative,
        cycles: entry.cycles,
    })
}

fn illegal_mode(mnemonic: &str, mode: AddressMode, span: Span) -> EncodeError {
    EncodeError::new(
        format!("{mnemonic} does not support {} addressing", mode.name()),
        span,
    )
}

fn one_byte(entry: &'static InstructionEntry) -> Encoded {
    Encoded {
        bytes: vec![entry.opcode],
        mode: entry.mode,
        cycles: entry.cycles,
    }
}

fn two_byte(entry: &'static InstructionEntry, addr: u16) -> Encoded {
    Encoded {
        bytes: vec![entry.opcode, (addr & 0xff) as u8, (addr >> 8) as u8],
        mode: entry.mode,
        cycles: entry.cycles,
    }
}

fn fits_byte(value: Option<i64>) -> bool {
    matches!(value, Some(v) if (0..=0xff).contains(&v))
}

fn check_byte(value: Option<i64>, strict: bool, span: Span) -> Result<u8, EncodeError> {
    match value {
        None => Ok(0),
        Some(v) => {
            if strict && !(-128..=255).contains(&v) {
                return Err(EncodeError::new(
                    format!("Operand value out of byte range: {v}"),
                    span,
                ));
            }
            Ok((v & 0xff) as u8)
        }
    }
}

fn check_word(value: Option<i64>, strict: bool, span: Span) -> Result<u16, EncodeError> {
    match value {
        None => Ok(0),
        Some(v) => {
            if strict && !(0..=0xffff).contains(&v) {
                return Err(EncodeError::new(
                    format!("Address out of range: {v}"),
                    span,
                ));
            }
            Ok((v & 0xffff) as u16)
        }
    }
}
