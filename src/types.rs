//! Core data types, enums, and reports for kaiso.
//!
//! This module defines the fundamental data structures shared across the pipeline:
//! - The per-batch conversion snapshot (`ConversionOptions`)
//! - Per-page outcomes (`TaskResult`, `TransformStep`)
//! - Output settings (`FileFormat`, `Direction`, `BookMetadata`)
//! - Reporting types (`RepackSummary`)

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::format::Format;
use crate::page::Page;

/// Immutable snapshot of the page conversion settings, taken once per batch.
///
/// Workers only ever read this; it is shared behind an `Arc` for the duration of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConversionOptions {
    /// Target format, or `None` to keep each page's source format
    pub format: Option<Format>,
    /// Lossy encode quality, 0-100
    pub quality: u8,
    /// Target viewport (width, height). Zero in either dimension preserves the size
    pub size: (u32, u32),
    pub keep_ratio: bool,
    pub grayscale: bool,
    pub no_upscale: bool,
    pub no_downscale: bool,
    /// Skip unreadable pages instead of failing the batch
    pub ignore_page_errors: bool,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            format: None,
            quality: 80,
            size: (0, 0),
            keep_ratio: true,
            grayscale: false,
            no_upscale: false,
            no_downscale: false,
            ignore_page_errors: true,
        }
    }
}

impl ConversionOptions {
    /// Returns a copy targeting `format`.
    pub fn with_format(&self, format: Format) -> Self {
        Self {
            format: Some(format),
            ..self.clone()
        }
    }

    pub fn resizes(&self) -> bool {
        self.size.0 > 0 && self.size.1 > 0
    }
}

/// One step applied by the page transformer, kept for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformStep {
    Opened(PathBuf),
    FlattenedToRgb,
    Grayscale,
    Resized { from: (u32, u32), to: (u32, u32) },
    ResizeSkipped(&'static str),
    Converted { from: Format, to: Format },
    Wrote { path: PathBuf, elapsed: Duration },
}

impl fmt::Display for TransformStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformStep::Opened(path) => write!(f, "/open:  {}", path.display()),
            TransformStep::FlattenedToRgb => write!(f, "|trans: mode RGB"),
            TransformStep::Grayscale => write!(f, "|trans: mode L"),
            TransformStep::Resized { from, to } => {
                write!(f, "|trans: resize {}x{} -> {}x{}", from.0, from.1, to.0, to.1)
            }
            TransformStep::ResizeSkipped(reason) => write!(f, "|trans: resize skipped ({})", reason),
            TransformStep::Converted { from, to } => write!(f, "|trans: {} -> {}", from.name(), to.name()),
            TransformStep::Wrote { path, elapsed } => {
                write!(f, "\\write: {}: took {:.2}s", path.display(), elapsed.as_secs_f64())
            }
        }
    }
}

/// Outcome of converting a single page.
///
/// A skipped page is handed back untouched together with the reason, so one bad page never
/// aborts its siblings.
#[derive(Debug)]
pub enum TaskResult {
    Converted {
        page: Page,
        trace: Vec<TransformStep>,
    },
    Skipped {
        page: Page,
        reason: Error,
    },
}

impl TaskResult {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskResult::Converted { .. })
    }

    pub fn page(&self) -> &Page {
        match self {
            TaskResult::Converted { page, .. } | TaskResult::Skipped { page, .. } => page,
        }
    }

    pub fn into_page(self) -> Page {
        match self {
            TaskResult::Converted { page, .. } | TaskResult::Skipped { page, .. } => page,
        }
    }
}

/// Defines the output container format.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FileFormat {
    #[default]
    Cbz,
    Zip,
    Epub,
    /// Recognised, but not implemented
    Mobi,
}

impl FileFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            FileFormat::Cbz => "cbz",
            FileFormat::Zip => "zip",
            FileFormat::Epub => "epub",
            FileFormat::Mobi => "mobi",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "cbz" => Ok(FileFormat::Cbz),
            "zip" => Ok(FileFormat::Zip),
            "epub" => Ok(FileFormat::Epub),
            "mobi" => Ok(FileFormat::Mobi),
            other => Err(Error::Unsupported(format!("book format '{}'", other))),
        }
    }
}

/// Defines the reading direction for content within an EPUB file.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Direction {
    #[default]
    Ltr,
    Rtl,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Ltr => f.write_str("ltr"),
            Direction::Rtl => f.write_str("rtl"),
        }
    }
}

/// Metadata embedded in generated ebooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookMetadata {
    pub title: String,
    pub author: String,
    pub language: String,
}

impl BookMetadata {
    /// Derives title and author from an output file stem of the form `Title - Author`.
    pub fn from_stem(stem: &str) -> Self {
        let (title, author) = match stem.split_once(" - ") {
            Some((title, author)) => (title.trim(), author.trim()),
            None => (stem, "kaiso"),
        };
        Self {
            title: title.to_string(),
            author: author.to_string(),
            language: "en".to_string(),
        }
    }
}

/// Report of a finished repack.
#[derive(Debug, Clone)]
pub struct RepackSummary {
    pub output: PathBuf,
    pub source_bytes: u64,
    pub output_bytes: u64,
    pub elapsed: Duration,
    /// Pages that were skipped because they could not be read
    pub skipped: Vec<PathBuf>,
}

impl RepackSummary {
    /// One-line size comparison, e.g. `Original: 1.00MB ■ New: 800.00KB ■ -21.88% decrease`.
    pub fn summary(&self) -> String {
        let verb = if self.output_bytes > self.source_bytes {
            "INCREASE!"
        } else {
            "decrease"
        };
        format!(
            "Original: {} ■ New: {} ■ {} {}",
            human_bytes(self.source_bytes),
            human_bytes(self.output_bytes),
            pct_change(self.source_bytes, self.output_bytes),
            verb
        )
    }

    pub fn output_name(&self) -> String {
        self.output
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.output.display().to_string())
    }
}

/// Formats a byte count with binary prefixes and two decimals, e.g. `1.50KB`.
pub fn human_bytes(bytes: u64) -> String {
    const FACTOR: f64 = 1024.0;
    let mut value = bytes as f64;
    for unit in ["", "K", "M", "G", "T", "P", "E", "Z"] {
        if value < FACTOR {
            return format!("{:.2}{}B", value, unit);
        }
        value /= FACTOR;
    }
    format!("{:.2}YB", value)
}

/// Signed percentage change from `base` to `new`, e.g. `+20.00%` or `-10.00%`.
pub fn pct_change(base: u64, new: u64) -> String {
    if base == 0 {
        return "n/a".to_string();
    }
    let change = (new as f64 - base as f64) / base as f64 * 100.0;
    if change >= 0.0 {
        format!("+{:.2}%", change)
    } else {
        format!("{:.2}%", change)
    }
}

/// Sums the on-disk size of `paths`.
pub fn total_file_size<P: AsRef<Path>>(paths: impl IntoIterator<Item = P>) -> Result<u64> {
    let mut total = 0;
    for path in paths {
        total += std::fs::metadata(path.as_ref())?.len();
    }
    Ok(total)
}
