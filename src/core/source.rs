// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Source file registry and the injectable file loader.
//!
//! All file access (`!include`, `!binary`, the root source) goes through a
//! [`SourceLoader`] so that hosts can redirect reads to in-memory buffers.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::core::text_utils::normalize_path;

pub type FileId = u32;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to open file: {0}")]
    Open(String, #[source] io::Error),

    #[error("Failed to read file: {0}")]
    Read(String, #[source] io::Error),

    #[error("File not found: {0}")]
    NotFound(String),
}

/// File access abstraction for the assembler.
pub trait SourceLoader {
    fn read_text(&self, path: &str) -> Result<String, SourceError>;
    fn read_binary(&self, path: &str) -> Result<Vec<u8>, SourceError>;
}

/// Loader backed by the file system, resolving relative paths against a
/// base directory (normally the root source's directory).
pub struct FsLoader {
    base: PathBuf,
}

impl FsLoader {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Loader whose base is the parent directory of `root`.
    pub fn for_root(root: &Path) -> Self {
        let base = root.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
        Self { base }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.base.join(p)
        }
    }
}

impl SourceLoader for FsLoader {
    fn read_text(&self, path: &str) -> Result<String, SourceError> {
        let full = self.resolve(path);
        fs::read_to_string(&full).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => SourceError::NotFound(path.to_string()),
            _ => SourceError::Read(path.to_string(), err),
        })
    }

    fn read_binary(&self, path: &str) -> Result<Vec<u8>, SourceError> {
        let full = self.resolve(path);
        fs::read(&full).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => SourceError::NotFound(path.to_string()),
            _ => SourceError::Read(path.to_string(), err),
        })
    }
}

/// In-memory loader used by tests and editor hosts.
#[derive(Default)]
pub struct MapLoader {
    texts: HashMap<String, String>,
    blobs: HashMap<String, Vec<u8>>,
}

impl MapLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_text(&mut self, path: &str, text: &str) -> &mut Self {
        self.texts.insert(path.to_string(), text.to_string());
        self
    }

    pub fn add_binary(&mut self, path: &str, bytes: Vec<u8>) -> &mut Self {
        self.blobs.insert(path.to_string(), bytes);
        self
    }
}

impl SourceLoader for MapLoader {
    fn read_text(&self, path: &str) -> Result<String, SourceError> {
        self.texts
            .get(path)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(path.to_string()))
    }

    fn read_binary(&self, path: &str) -> Result<Vec<u8>, SourceError> {
        self.blobs
            .get(path)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(path.to_string()))
    }
}

struct SourceFile {
    name: String,
    lines: Vec<String>,
}

/// Registry of all files seen during an assembly, keyed by [`FileId`].
#[derive(Default)]
pub struct SourceMap {
    files: Vec<SourceFile>,
}

impl SourceMap {
    #[must_use]
    pub fn new() -> Self {
        Self { files: Vec::new() }
    }

    pub fn add_file(&mut self, name: &str, text: &str) -> FileId {
        let id = self.files.len() as FileId;
        self.files.push(SourceFile {
            name: normalize_path(name),
            lines: text.lines().map(|l| l.trim_end().to_string()).collect(),
        });
        id
    }

    #[must_use]
    pub fn name(&self, file: FileId) -> &str {
        self.files
            .get(file as usize)
            .map(|f| f.name.as_str())
            .unwrap_or("<unknown>")
    }

    #[must_use]
    pub fn line(&self, file: FileId, line: u32) -> Option<&str> {
        self.files
            .get(file as usize)?
            .lines
            .get(line.saturating_sub(1) as usize)
            .map(|s| s.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
