//! Kaiso - Comic and Manga Archive Repacking Library
//!
//! This crate provides an asynchronous, declarative API for repacking page-image containers
//! (CBZ/ZIP) into new books (CBZ, ZIP or EPUB). Pages can be converted to another format,
//! resized, and turned grayscale on a bounded worker pool, and candidate formats can be
//! benchmarked on a sample of pages before committing to one.
//!
//! # Getting Started
//!
//! Configure the run with `RepackConfig`'s builder, then execute it with one of its entry
//! points. A [`CancelToken`] lets another task (e.g. a Ctrl-C handler) stop the run.
//!
//! ```rust,no_run
//! use kaiso::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> kaiso::error::Result<()> {
//!     let config = RepackConfig::builder()
//!         .image_format(Format::WebpLossy)
//!         .quality(80u8)
//!         .size((1440u32, 1920u32))
//!         .archive_format(FileFormat::Epub)
//!         .build()?;
//!
//!     // Optional: compare formats first
//!     let report = config.benchmark("My Book - Author.cbz", CancelToken::new()).await?;
//!     println!("{}", report.summary());
//!
//!     let summary = config.repack("My Book - Author.cbz", CancelToken::new()).await?;
//!     println!("{}: {}", summary.output_name(), summary.summary());
//!     Ok(())
//! }
//! ```
//!
//! For finer control (adding chapters from other containers, inserting or removing pages)
//! use [`archive::Archive`] directly.

pub mod archive;
pub mod assembler;
pub mod benchmark;
pub mod error;
pub mod extractor;
pub mod format;
pub mod generator;
pub mod page;
pub mod path_utils;
pub mod pool;
pub mod repack;
pub mod transform;
pub mod types;

// Publicly expose the main `RepackConfig` struct and its builder
pub use repack::RepackConfig;
pub use repack::RepackConfigBuilder;

// Re-export core types for direct access
pub use archive::Archive;
pub use benchmark::{BenchmarkReport, FormatTotal};
pub use format::Format;
pub use page::{CacheHandle, Page};
pub use pool::{CancelToken, PoolMode, WorkerPool};
pub use types::{
    BookMetadata, ConversionOptions, Direction, FileFormat, RepackSummary, TaskResult,
    TransformStep,
};

/// Prelude module for convenient imports.
///
/// This module re-exports the most commonly used types and traits, allowing you to
/// import everything you need with a single `use kaiso::prelude::*;` statement.
pub mod prelude {
    pub use super::{
        Archive, BenchmarkReport, BookMetadata, CacheHandle, CancelToken, ConversionOptions,
        Direction, FileFormat, Format, FormatTotal, Page, PoolMode, RepackConfig,
        RepackConfigBuilder, RepackSummary, TaskResult, TransformStep, WorkerPool, error,
        generator, types,
    };
    pub use std::path::{Path, PathBuf};
    pub use std::sync::Arc;
}
