//! Destination layout of an output book.
//!
//! Flattens an ordered list of chapters into entries with their final in-book location. With
//! more than one chapter each chapter's pages go under a zero-padded `v<N>/` directory, so
//! that the entries sort back into reading order.

use std::path::{Path, PathBuf};

use crate::format::Format;
use crate::page::Page;
use crate::path_utils::entry_name;

/// Directory prefix of chapter folders in multi-chapter books.
pub const CHAPTER_PREFIX: &str = "v";

/// A page with its destination inside the output container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyEntry {
    /// File in the working cache
    pub source: PathBuf,
    /// Relative path inside the book
    pub dest: PathBuf,
    /// Zero-based chapter index
    pub chapter: usize,
    pub format: Option<Format>,
}

impl AssemblyEntry {
    /// Destination as a `/`-separated container entry name.
    pub fn entry_name(&self) -> String {
        entry_name(&self.dest)
    }
}

/// Width of the chapter number so that `chapters` chapters sort lexicographically.
pub fn chapter_width(chapters: usize) -> usize {
    chapters.to_string().len()
}

/// Chapter directory name, e.g. `v03` for the third of twelve chapters.
pub fn chapter_dir(prefix: &str, index: usize, chapters: usize) -> String {
    format!("{}{:0width$}", prefix, index + 1, width = chapter_width(chapters))
}

/// Lays out `chapters` in order.
///
/// Empty chapters still consume a number, so chapter directories keep their positions.
pub fn assemble(chapters: &[Vec<Page>], prefix: &str) -> Vec<AssemblyEntry> {
    let total = chapters.len();
    let mut entries = Vec::with_capacity(chapters.iter().map(Vec::len).sum());
    for (chapter, pages) in chapters.iter().enumerate() {
        let dir = (total > 1).then(|| chapter_dir(prefix, chapter, total));
        for page in pages {
            let dest = match &dir {
                Some(dir) => Path::new(dir).join(page.rel_path()),
                None => page.rel_path().to_path_buf(),
            };
            entries.push(AssemblyEntry {
                source: page.path().to_path_buf(),
                dest,
                chapter,
                format: Format::from_extension(page.path()),
            });
        }
    }
    entries
}
