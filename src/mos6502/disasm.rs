// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Disassembler: walks a byte image through the instruction table in
//! reverse.
//!
//! An optional `is_instruction` predicate (typically the debug-info view)
//! separates code from data; without it every byte that decodes as an
//! official opcode is treated as an instruction. The decoder is stateless
//! across lines other than the current offset.

use crate::mos6502::operand::AddressMode;
use crate::mos6502::table::lookup_opcode;

#[derive(Debug, Default)]
pub struct DisasmOptions {
    pub show_labels: bool,
    pub show_cycles: bool,
    /// Label addresses and names, from debug info.
    pub labels: Vec<(u16, String)>,
}

/// Disassemble `image` loaded at `base` into text lines.
pub fn disassemble(
    image: &[u8],
    base: u16,
    is_instruction: Option<&dyn Fn(usize) -> bool>,
    opts: &DisasmOptions,
) -> Vec<String> {
    let mut lines = Vec::new();
    let mut offset = 0usize;

    while offset < image.len() {
        let addr = base.wrapping_add(offset as u16);

        if opts.show_labels {
            for (label_addr, name) in &opts.labels {
                if *label_addr == addr {
                    lines.push(format!("{name}:"));
                }
            }
        }

        let decode = match is_instruction {
            Some(pred) if !pred(offset) => None,
            _ => lookup_opcode(image[offset]),
        };

        let consumed = match decode {
            Some(entry) => {
                let size = 1 + usize::from(entry.mode.operand_size());
                if offset + size > image.len() {
                    lines.push(data_line(addr, image[offset]));
                    1
                } else {
                    let operand_bytes = &image[offset + 1..offset + size];
                    let operand = format_operand(entry.mode, operand_bytes, addr);
                    let raw = hex_bytes(&image[offset..offset + size]);
                    let mnemonic = entry.mnemonic.to_ascii_lowercase();
                    let mut line = if operand.is_empty() {
                        format!("{addr:04x}: {raw:<9}    {mnemonic}")
                    } else {
                        format!("{addr:04x}: {raw:<9}    {mnemonic} {operand}")
                    };
                    if opts.show_cycles {
                        line = format!("{line:<40}; {}", entry.cycles);
                    }
                    lines.push(line);
                    size
                }
            }
            None => {
                lines.push(data_line(addr, image[offset]));
                1
            }
        };
        offset += consumed;
    }

    lines
}

fn data_line(addr: u16, byte: u8) -> String {
    format!("{addr:04x}: {:<9}    !byte ${byte:02x}", format!("{byte:02X}"))
}

fn hex_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn format_operand(mode: AddressMode, bytes: &[u8], addr: u16) -> String {
    let byte = bytes.first().copied().unwrap_or(0);
    let word = if bytes.len() >= 2 {
        u16::from(bytes[0]) | (u16::from(bytes[1]) << 8)
    } else {
        u16::from(byte)
    };
    match mode {
        AddressMode::Implied => String::new(),
        AddressMode::Accumulator => "a".to_string(),
        AddressMode::Immediate => format!("#${byte:02x}"),
        AddressMode::ZeroPage => format!("${byte:02x}"),
        AddressMode::ZeroPageX => format!("${byte:02x},x"),
        AddressMode::ZeroPageY => format!("${byte:02x},y"),
        AddressMode::Absolute => format!("${word:04x}"),
        AddressMode::AbsoluteX => format!("${word:04x},x"),
        AddressMode::AbsoluteY => format!("${word:04x},y"),
        AddressMode::Indirect => format!("(${word:04x})"),
        AddressMode::IndexedIndirectX => format!("(${byte:02x},x)"),
        AddressMode::IndirectIndexedY => format!("(${byte:02x}),y"),
        AddressMode::Relative => {
            let target = (i64::from(addr) + 2 + i64::from(byte as i8)) as u16;
            format!("${target:04x}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{disassemble, DisasmOptions};

    #[test]
    fn decodes_hello_sequence() {
        let image = [0xA9, 0x41, 0x8D, 0x20, 0xD0, 0x60];
        let lines = disassemble(&image, 0x0801, None, &DisasmOptions::default());
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("lda #$41"));
        assert!(lines[1].contains("sta $d020"));
        assert!(lines[2].contains("rts"));
        assert!(lines[0].starts_with("0801:"));
        assert!(lines[2].starts_with("0806:"));
    }

    #[test]
    fn relative_operand_shows_target_address() {
        // dex / bne back to the dex
        let image = [0xCA, 0xD0, 0xFD];
        let lines = disassemble(&image, 0x0801, None, &DisasmOptions::default());
        assert!(lines[1].contains("bne $0801"), "line was: {}", lines[1]);
    }

    #[test]
    fn predicate_marks_data_bytes() {
        let image = [0xA9, 0x41, 0x60];
        let pred = |offset: usize| offset == 2;
        let lines = disassemble(&image, 0x1000, Some(&pred), &DisasmOptions::default());
        assert!(lines[0].contains("!byte $a9"));
        assert!(lines[1].contains("!byte $41"));
        assert!(lines[2].contains("rts"));
    }

    #[test]
    fn unknown_opcode_is_data() {
        let image = [0xFF];
        let lines = disassemble(&image, 0, None, &DisasmOptions::default());
        assert!(lines[0].contains("!byte $ff"));
    }

    #[test]
    fn cycles_annotation() {
        let image = [0xEA];
        let opts = DisasmOptions {
            show_cycles: true,
            ..DisasmOptions::default()
        };
        let lines = disassemble(&image, 0, None, &opts);
        assert!(lines[0].ends_with("; 2"), "line was: {}", lines[0]);
    }

    #[test]
    fn labels_precede_their_address() {
        let image = [0xCA, 0xD0, 0xFD];
        let opts = DisasmOptions {
            show_labels: true,
            labels: vec![(0x0801, "loop".to_string())],
            ..DisasmOptions::default()
        };
        let lines = disassemble(&image, 0x0801, None, &opts);
        assert_eq!(lines[0], "loop:");
    }

    #[test]
    fn truncated_instruction_falls_back_to_data() {
        let image = [0xAD, 0x20];
        let lines = disassemble(&image, 0, None, &DisasmOptions::default());
        assert!(lines[0].contains("!byte $ad"));
    }
}
