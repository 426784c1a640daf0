// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Debug info: the mapping from emitted bytes back to source locations
//! plus the symbol and constant records.
//!
//! The builder grows during the final pass and is frozen into an immutable
//! [`DebugInfo`] snapshot handed to callers.

use std::collections::HashMap;

use crate::core::source::SourceMap;
use crate::core::tokenizer::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRole {
    InstructionStart,
    InstructionContinuation,
    Data,
}

#[derive(Debug, Clone)]
pub struct ByteRecord {
    pub addr: u16,
    pub segment: String,
    pub value: u8,
    pub loc: Span,
    pub role: ByteRole,
}

#[derive(Debug, Clone)]
pub struct LabelRecord {
    pub name: String,
    pub scope_path: Vec<String>,
    pub addr: i64,
    pub segment: String,
    pub loc: Span,
}

#[derive(Debug, Clone)]
pub struct ConstantRecord {
    pub name: String,
    pub scope_path: Vec<String>,
    pub value: String,
    pub loc: Span,
}

#[derive(Debug, Default)]
pub struct DebugInfoBuilder {
    bytes: Vec<ByteRecord>,
    labels: Vec<LabelRecord>,
    constants: Vec<ConstantRecord>,
}

impl DebugInfoBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
        self.labels.clear();
        self.constants.clear();
    }

    pub fn record_bytes(
        &mut self,
        addr: u16,
        segment: &str,
        bytes: &[u8],
        loc: Span,
        first: ByteRole,
    ) {
        for (offset, value) in bytes.iter().enumerate() {
            let role = if offset == 0 {
                first
            } else {
                match first {
                    ByteRole::InstructionStart => ByteRole::InstructionContinuation,
                    role => role,
                }
            };
            self.bytes.push(ByteRecord {
                addr: addr.wrapping_add(offset as u16),
                segment: segment.to_string(),
                value: *value,
                loc,
                role,
            });
        }
    }

    pub fn record_label(&mut self, record: LabelRecord) {
        self.labels.push(record);
    }

    pub fn record_constant(&mut self, record: ConstantRecord) {
        self.constants.push(record);
    }

    #[must_use]
    pub fn snapshot(self) -> DebugInfo {
        let mut by_addr: HashMap<u16, Vec<usize>> = HashMap::new();
        for (index, record) in self.bytes.iter().enumerate() {
            by_addr.entry(record.addr).or_default().push(index);
        }
        DebugInfo {
            bytes: self.bytes,
            labels: self.labels,
            constants: self.constants,
            by_addr,
        }
    }
}

/// Immutable debug-info snapshot.
#[derive(Debug)]
pub struct DebugInfo {
    bytes: Vec<ByteRecord>,
    labels: Vec<LabelRecord>,
    constants: Vec<ConstantRecord>,
    by_addr: HashMap<u16, Vec<usize>>,
}

impl DebugInfo {
    #[must_use]
    pub fn bytes(&self) -> &[ByteRecord] {
        &self.bytes
    }

    #[must_use]
    pub fn labels(&self) -> &[LabelRecord] {
        &self.labels
    }

    #[must_use]
    pub fn constants(&self) -> &[ConstantRecord] {
        &self.constants
    }

    /// Source locations mapped to `addr` (several when macro expansion
    /// emits multiple statements at one address).
    #[must_use]
    pub fn locations_at(&self, addr: u16) -> Vec<&ByteRecord> {
        match self.by_addr.get(&addr) {
            Some(indices) => indices.iter().map(|&i| &self.bytes[i]).collect(),
            None => Vec::new(),
        }
    }

    /// True when `addr` holds the first byte of an instruction.
    #[must_use]
    pub fn is_instruction(&self, addr: u16) -> bool {
        self.locations_at(addr)
            .iter()
            .any(|record| record.role == ByteRole::InstructionStart)
    }

    /// Predicate view over a program image starting at `base`, for the
    /// disassembler.
    pub fn instruction_predicate(&self, base: u16) -> impl Fn(usize) -> bool + '_ {
        move |offset| self.is_instruction(base.wrapping_add(offset as u16))
    }

    /// Stable text serialization: address map, labels, constants. Line
    /// oriented so hosts and golden tests can diff it.
    #[must_use]
    pub fn to_text(&self, sources: &SourceMap) -> String {
        let mut out = String::new();
        out.push_str("[addresses]\n");
        for record in &self.bytes {
            out.push_str(&format!(
                "{:04x} {} {}:{} {}\n",
                record.addr,
                record.segment,
                sources.name(record.loc.file),
                record.loc.line,
                match record.role {
                    ByteRole::InstructionStart => "i",
                    ByteRole::InstructionContinuation => "c",
                    ByteRole::Data => "d",
                }
            ));
        }
        out.push_str("[labels]\n");
        for label in &self.labels {
            out.push_str(&format!(
                "{} {:04x} {} {}:{}\n",
                qualified_name(&label.scope_path, &label.name),
                label.addr,
                label.segment,
                sources.name(label.loc.file),
                label.loc.line,
            ));
        }
        out.push_str("[constants]\n");
        for constant in &self.constants {
            out.push_str(&format!(
                "{} {} {}:{}\n",
                qualified_name(&constant.scope_path, &constant.name),
                constant.value,
                sources.name(constant.loc.file),
                constant.loc.line,
            ));
        }
        out
    }
}

fn qualified_name(scope_path: &[String], name: &str) -> String {
    if scope_path.is_empty() {
        name.to_string()
    } else {
        format!("{}::{}", scope_path.join("::"), name)
    }
}

#[cfg(test)]
mod tests {
    use super::{ByteRole, DebugInfoBuilder, LabelRecord};
    use crate::core::tokenizer::Span;

    #[test]
    fn roles_split_start_and_continuation() {
        let mut builder = DebugInfoBuilder::new();
        builder.record_bytes(
            0x0801,
            "default",
            &[0x8d, 0x20, 0xd0],
            Span::default(),
            ByteRole::InstructionStart,
        );
        let info = builder.snapshot();
        assert!(info.is_instruction(0x0801));
        assert!(!info.is_instruction(0x0802));
        assert_eq!(info.bytes().len(), 3);
        assert_eq!(info.bytes()[1].role, ByteRole::InstructionContinuation);
        assert_eq!(info.bytes()[1].value, 0x20);
    }

    #[test]
    fn data_bytes_keep_data_role() {
        let mut builder = DebugInfoBuilder::new();
        builder.record_bytes(0x0900, "default", &[1, 2], Span::default(), ByteRole::Data);
        let info = builder.snapshot();
        assert_eq!(info.bytes()[1].role, ByteRole::Data);
        assert!(!info.is_instruction(0x0900));
    }

    #[test]
    fn predicate_view_offsets_from_base() {
        let mut builder = DebugInfoBuilder::new();
        builder.record_bytes(
            0x0803,
            "default",
            &[0xea],
            Span::default(),
            ByteRole::InstructionStart,
        );
        let info = builder.snapshot();
        let pred = info.instruction_predicate(0x0801);
        assert!(pred(2));
        assert!(!pred(0));
    }

    #[test]
    fn text_dump_contains_labels() {
        let mut builder = DebugInfoBuilder::new();
        builder.record_label(LabelRecord {
            name: "start".to_string(),
            scope_path: vec!["main".to_string()],
            addr: 0x0801,
            segment: "default".to_string(),
            loc: Span::default(),
        });
        let info = builder.snapshot();
        let text = info.to_text(&crate::core::source::SourceMap::new());
        assert!(text.contains("main::start 0801"));
    }
}
