// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

// CLI entrypoint for forge64.

fn main() {
    match forge64::assembler::run() {
        Ok(report) => {
            for diag in &report.result.diagnostics {
                eprintln!("{}", diag.format_with_context(&report.result.sources));
            }
            if report.result.error_count() > 0 {
                std::process::exit(1);
            }
        }
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    }
}
