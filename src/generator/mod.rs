//! Generator module provides traits and implementations for the output book formats.
//!
//! This module contains the common interface for book generators and the implementations
//! for zip-family books (CBZ and plain ZIP) and EPUB.

use crate::assembler::AssemblyEntry;
use crate::error::Result;
use crate::types::{BookMetadata, Direction};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

pub mod cbz;
pub mod epub;

/// Comment stored in generated zip-family books.
pub const ARCHIVE_COMMENT: &str = "repacked with kaiso";

/// Settings shared by every generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorSettings {
    /// Deflate entries at maximum level instead of storing them
    pub compress: bool,
    pub direction: Direction,
    pub metadata: BookMetadata,
}

/// Common interface for all book generators.
///
/// A generator is created for one output file, receives the assembled chapters in reading
/// order and writes the finished book on [`Generator::save`].
#[async_trait]
pub trait Generator {
    /// Creates a new generator instance.
    ///
    /// # Parameters
    /// * `output_file` - Full path of the book to write; its directory must exist
    /// * `settings` - Compression, reading direction and metadata
    ///
    /// # Returns
    /// * `Result<Self>` - A new generator instance or an error if creation fails
    fn new(output_file: &Path, settings: &GeneratorSettings) -> Result<Self>
    where
        Self: Sized;

    /// Adds the pages of one chapter.
    ///
    /// # Parameters
    /// * `index` - Zero-based chapter index
    /// * `entries` - Pages of the chapter, in order, with their in-book destinations
    ///
    /// # Returns
    /// * `Result<&mut Self>` - Self reference for method chaining, or an error if failed
    async fn add_chapter(&mut self, index: usize, entries: &[AssemblyEntry]) -> Result<&mut Self>
    where
        Self: Sized;

    /// Finalizes the book and writes it to disk.
    ///
    /// # Returns
    /// * `Result<PathBuf>` - Path of the written book
    async fn save(self) -> Result<PathBuf>;
}

/// Reads a page from disk through a read-only memory map.
pub(crate) async fn map_page(path: &Path) -> Result<memmap2::Mmap> {
    let file = tokio::fs::File::open(path).await.map_err(|e| {
        crate::error::Error::Io(std::io::Error::new(
            e.kind(),
            format!(
                "Failed to open page '{}': {}",
                crate::path_utils::path_to_string_lossy(path),
                e
            ),
        ))
    })?;
    let file_std = file.into_std().await;
    let mmap =
        tokio::task::spawn_blocking(move || unsafe { memmap2::MmapOptions::new().map(&file_std) })
            .await??;
    Ok(mmap)
}
