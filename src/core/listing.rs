// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Listing file generation.
//!
//! The listing is derived from the final debug info: emitted bytes are
//! grouped per source line in emission order, printed with their address,
//! followed by a footer with the symbol table.

use std::io::{self, Write};

use crate::core::debuginfo::DebugInfo;
use crate::core::source::SourceMap;

pub struct ListingWriter<W: Write> {
    out: W,
}

impl<W: Write> ListingWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn header(&mut self, title: &str) -> io::Result<()> {
        writeln!(self.out, "{title}")?;
        writeln!(self.out, "ADDR    BYTES                    LINE  SOURCE")?;
        writeln!(self.out, "------  -----------------------  ----  ------")?;
        Ok(())
    }

    pub fn write_program(&mut self, debug: &DebugInfo, sources: &SourceMap) -> io::Result<()> {
        let records = debug.bytes();
        let mut index = 0usize;
        while index < records.len() {
            let first = &records[index];
            let mut end = index + 1;
            while end < records.len()
                && records[end].loc.file == first.loc.file
                && records[end].loc.line == first.loc.line
                && records[end].addr == first.addr.wrapping_add((end - index) as u16)
            {
                end += 1;
            }

            let hex = records[index..end]
                .iter()
                .map(|r| format!("{:02X}", r.value))
                .collect::<Vec<_>>()
                .join(" ");
            let source = sources
                .line(first.loc.file, first.loc.line)
                .unwrap_or_default();
            writeln!(
                self.out,
                "{:04X}    {:<23}  {:>4}  {}",
                first.addr, hex, first.loc.line, source
            )?;
            index = end;
        }
        Ok(())
    }

    pub fn footer(&mut self, debug: &DebugInfo, total_bytes: usize) -> io::Result<()> {
        writeln!(self.out, "\nSYMBOL TABLE\n")?;
        for label in debug.labels() {
            let path = if label.scope_path.is_empty() {
                label.name.clone()
            } else {
                format!("{}::{}", label.scope_path.join("::"), label.name)
            };
            writeln!(self.out, "{:<24}: {:04x} ({})", path, label.addr, label.addr)?;
        }
        for constant in debug.constants() {
            let path = if constant.scope_path.is_empty() {
                constant.name.clone()
            } else {
                format!("{}::{}", constant.scope_path.join("::"), constant.name)
            };
            writeln!(self.out, "{:<24}= {}", path, constant.value)?;
        }
        writeln!(self.out, "\nTotal memory is {total_bytes} bytes")?;
        Ok(())
    }
}
