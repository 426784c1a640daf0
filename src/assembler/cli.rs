// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Command-line interface parsing and argument validation.

use std::path::PathBuf;

use clap::{ArgAction, Parser};

use super::AssembleOptions;

pub const VERSION: &str = "0.9";

const LONG_ABOUT: &str = "MOS 6502 macro assembler targeting the C64 .prg format.

Assembles the given source to a program image prefixed with its 16-bit
load address. When the source does not set the PC before its first
emission, a BASIC SYS stub is placed at $0801. Debug info, disassembly
and listing outputs are opt-in.";

#[derive(Parser, Debug)]
#[command(
    name = "forge64",
    version = VERSION,
    about = "MOS 6502 macro assembler targeting the C64 .prg format",
    long_about = LONG_ABOUT
)]
pub struct Cli {
    #[arg(value_name = "FILE", help = "Root assembly source file")]
    pub source: PathBuf,

    #[arg(
        short = 'o',
        long = "out",
        value_name = "FILE",
        long_help = "Output program path. Defaults to the input base with a .prg extension."
    )]
    pub out: Option<PathBuf>,

    #[arg(
        long = "debug-info",
        value_name = "FILE",
        long_help = "Write the debug-info record (address map, symbols, constants) to FILE."
    )]
    pub debug_info: Option<PathBuf>,

    #[arg(
        long = "disasm",
        value_name = "FILE",
        num_args = 0..=1,
        default_missing_value = "-",
        long_help = "Disassemble the assembled program. FILE is optional; when omitted, the listing goes to stdout."
    )]
    pub disasm: Option<String>,

    #[arg(
        short = 'l',
        long = "list",
        value_name = "FILE",
        long_help = "Emit a listing file with addresses, bytes, source lines and a symbol table."
    )]
    pub list: Option<PathBuf>,

    #[arg(
        short = 'D',
        long = "define",
        value_name = "NAME[=VAL]",
        action = ArgAction::Append,
        long_help = "Predefine a constant in the root scope (repeatable). If VAL is omitted, defaults to 1."
    )]
    pub defines: Vec<String>,

    #[arg(
        long = "max-passes",
        value_name = "N",
        default_value_t = 16,
        long_help = "Maximum resolution passes before assembly is reported as not converging."
    )]
    pub max_passes: u32,

    #[arg(
        short = 'v',
        long = "verbose",
        action = ArgAction::Count,
        long_help = "Increase log verbosity (-v: debug, -vv: trace)."
    )]
    pub verbose: u8,
}

impl Cli {
    pub fn init_tracing(&self) {
        let level = match self.verbose {
            0 => tracing::Level::WARN,
            1 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        };
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .try_init();
    }

    pub fn to_options(&self) -> Result<AssembleOptions, String> {
        let mut defines = Vec::new();
        for def in &self.defines {
            defines.push(parse_define(def)?);
        }
        if self.max_passes == 0 {
            return Err("--max-passes must be at least 1".to_string());
        }
        Ok(AssembleOptions {
            max_passes: self.max_passes,
            defines,
        })
    }

    /// Output program path: `-o` if given, else the input base with a
    /// `.prg` extension.
    #[must_use]
    pub fn out_path(&self) -> String {
        match &self.out {
            Some(path) => path.to_string_lossy().to_string(),
            None => self
                .source
                .with_extension("prg")
                .to_string_lossy()
                .to_string(),
        }
    }
}

/// Parse a `-D NAME[=VAL]` argument. Values accept the source literal
/// prefixes (`$` hex, `%` binary).
pub fn parse_define(arg: &str) -> Result<(String, i64), String> {
    let (name, value_text) = match arg.split_once('=') {
        Some((name, value)) => (name, Some(value)),
        None => (arg, None),
    };
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        || name.chars().next().is_some_and(|c| c.is_ascii_digit())
    {
        return Err(format!("Invalid define name: {arg}"));
    }
    let value = match value_text {
        None => 1,
        Some(text) => parse_number(text).ok_or_else(|| format!("Invalid define value: {arg}"))?,
    };
    Ok((name.to_string(), value))
}

fn parse_number(text: &str) -> Option<i64> {
    let text = text.trim();
    let (negative, text) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let value = if let Some(hex) = text.strip_prefix('$') {
        i64::from_str_radix(hex, 16).ok()?
    } else if let Some(bin) = text.strip_prefix('%') {
        i64::from_str_radix(bin, 2).ok()?
    } else {
        text.parse::<i64>().ok()?
    };
    Some(if negative { -value } else { value })
}
