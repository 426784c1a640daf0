// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Output segments.
//!
//! A segment is a named output region with a starting PC, a current PC and
//! a growable byte buffer. Segments are created in declaration order and
//! concatenated in that order for the final program image, default segment
//! first.

pub const DEFAULT_SEGMENT: &str = "default";

/// Default load address for C64 programs (start of BASIC RAM).
pub const DEFAULT_ORIGIN: u16 = 0x0801;

#[derive(Debug)]
pub struct Segment {
    pub name: String,
    start_pc: u16,
    pc: u16,
    bytes: Vec<u8>,
}

impl Segment {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            start_pc: DEFAULT_ORIGIN,
            pc: DEFAULT_ORIGIN,
            bytes: Vec::new(),
        }
    }

    #[must_use]
    pub fn pc(&self) -> u16 {
        self.pc
    }

    #[must_use]
    pub fn start_pc(&self) -> u16 {
        self.start_pc
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn reset(&mut self) {
        self.start_pc = DEFAULT_ORIGIN;
        self.pc = DEFAULT_ORIGIN;
        self.bytes.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetPcOutcome {
    Ok,
    /// PC moved backwards over already emitted bytes.
    Backwards,
}

#[derive(Debug)]
pub struct SegmentSet {
    segments: Vec<Segment>,
    current: usize,
}

impl Default for SegmentSet {
    fn default() -> Self {
        Self::new()
    }
}

impl SegmentSet {
    #[must_use]
    pub fn new() -> Self {
        Self {
            segments: vec![Segment::new(DEFAULT_SEGMENT)],
            current: 0,
        }
    }

    /// Clear all buffers at the start of a pass. Segment identities and
    /// declaration order survive so the final concatenation is stable.
    pub fn begin_pass(&mut self) {
        for segment in &mut self.segments {
            segment.reset();
        }
        self.current = 0;
    }

    /// Switch to (creating if needed) the named segment.
    pub fn select(&mut self, name: &str) {
        if let Some(index) = self.segments.iter().position(|s| s.name == name) {
            self.current = index;
            return;
        }
        self.segments.push(Segment::new(name));
        self.current = self.segments.len() - 1;
    }

    #[must_use]
    pub fn current(&self) -> &Segment {
        &self.segments[self.current]
    }

    /// True when nothing has been emitted to the current segment yet, so
    /// a `* =` still sets its origin.
    #[must_use]
    pub fn at_origin(&self) -> bool {
        self.segments[self.current].bytes.is_empty()
    }

    pub fn set_pc(&mut self, pc: u16) -> SetPcOutcome {
        let segment = &mut self.segments[self.current];
        if segment.bytes.is_empty() {
            segment.start_pc = pc;
            segment.pc = pc;
            return SetPcOutcome::Ok;
        }
        if pc < segment.pc {
            return SetPcOutcome::Backwards;
        }
        // Forward move inside an open segment pads with zeros.
        let gap = usize::from(pc - segment.pc);
        segment.bytes.extend(std::iter::repeat(0u8).take(gap));
        segment.pc = pc;
        SetPcOutcome::Ok
    }

    #[must_use]
    pub fn pc(&self) -> u16 {
        self.segments[self.current].pc
    }

    /// Append bytes at the current PC, returning the address of the first
    /// byte written.
    pub fn emit(&mut self, bytes: &[u8]) -> u16 {
        let segment = &mut self.segments[self.current];
        let at = segment.pc;
        segment.bytes.extend_from_slice(bytes);
        segment.pc = segment.pc.wrapping_add(bytes.len() as u16);
        at
    }

    /// Load address of the final image: the default segment's origin.
    #[must_use]
    pub fn load_address(&self) -> u16 {
        self.segments[0].start_pc
    }

    /// Concatenated program image in declaration order, prefixed with the
    /// 16-bit little-endian load address.
    #[must_use]
    pub fn program_bytes(&self) -> Vec<u8> {
        let total: usize = self.segments.iter().map(|s| s.bytes.len()).sum();
        let load = self.load_address();
        let mut out = Vec::with_capacity(total + 2);
        out.push((load & 0xff) as u8);
        out.push((load >> 8) as u8);
        for segment in &self.segments {
            out.extend_from_slice(&segment.bytes);
        }
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::{SegmentSet, SetPcOutcome, DEFAULT_ORIGIN};

    #[test]
    fn default_segment_starts_at_basic_ram() {
        let set = SegmentSet::new();
        assert_eq!(set.pc(), DEFAULT_ORIGIN);
        assert_eq!(set.load_address(), DEFAULT_ORIGIN);
    }

    #[test]
    fn emit_advances_pc() {
        let mut set = SegmentSet::new();
        set.set_pc(0x1000);
        let at = set.emit(&[0xa9, 0x41]);
        assert_eq!(at, 0x1000);
        assert_eq!(set.pc(), 0x1002);
    }

    #[test]
    fn program_bytes_prefixes_load_address() {
        let mut set = SegmentSet::new();
        set.set_pc(0x0801);
        set.emit(&[0x60]);
        assert_eq!(set.program_bytes(), vec![0x01, 0x08, 0x60]);
    }

    #[test]
    fn segments_concatenate_in_declaration_order() {
        let mut set = SegmentSet::new();
        set.emit(&[1]);
        set.select("data");
        set.set_pc(0x2000);
        set.emit(&[2, 3]);
        set.select("default");
        set.emit(&[4]);
        let bytes = set.program_bytes();
        assert_eq!(&bytes[2..], &[1, 4, 2, 3]);
    }

    #[test]
    fn forward_pc_moves_pad_with_zeros() {
        let mut set = SegmentSet::new();
        set.set_pc(0x1000);
        set.emit(&[0xff]);
        assert_eq!(set.set_pc(0x1003), SetPcOutcome::Ok);
        set.emit(&[0xee]);
        assert_eq!(set.current().bytes(), &[0xff, 0, 0, 0xee]);
    }

    #[test]
    fn backwards_pc_is_rejected() {
        let mut set = SegmentSet::new();
        set.set_pc(0x1000);
        set.emit(&[0xff]);
        assert_eq!(set.set_pc(0x0900), SetPcOutcome::Backwards);
    }

    #[test]
    fn begin_pass_clears_buffers_but_keeps_order() {
        let mut set = SegmentSet::new();
        set.select("data");
        set.emit(&[9]);
        set.begin_pass();
        set.select("data");
        assert!(set.current().is_empty());
        let names: Vec<&str> = set.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["default", "data"]);
    }
}
