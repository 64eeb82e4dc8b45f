use std::path::{Path, PathBuf};
use std::time::Instant;

use log::{info, warn};

use crate::archive::Archive;
use crate::benchmark::BenchmarkReport;
use crate::error::{Error, Result};
use crate::format::Format;
use crate::pool::CancelToken;
use crate::types::{ConversionOptions, Direction, FileFormat, RepackSummary};

/// The repack configuration, built declaratively using the builder pattern.
///
/// This struct holds every setting of a repack or benchmark run: how pages are converted,
/// how many workers convert them, and how the resulting book is written. Once configured,
/// it executes work through its entry points:
///
/// - [`repack`](RepackConfig::repack): Convert every page and write a new book
/// - [`benchmark`](RepackConfig::benchmark): Compare output formats on a sample, write nothing
/// - [`auto_repack`](RepackConfig::auto_repack): Benchmark, then repack with the smallest format
///
/// ## Builder Pattern
///
/// Use [`RepackConfig::builder()`](RepackConfig::builder) to create a new configuration:
///
/// ```rust,no_run
/// # use kaiso::prelude::*;
/// let config = RepackConfig::builder()
///     .image_format(Format::WebpLossy)
///     .quality(75u8)
///     .size((1440u32, 1920u32))
///     .archive_format(FileFormat::Epub)
///     .build()
///     .expect("Invalid configuration");
/// ```
#[derive(Debug, Clone, derive_builder::Builder)]
#[builder(setter(into, strip_option), build_fn(validate = "Self::validate"))]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct RepackConfig {
    // --- Page Conversion ---
    /// Target page format. If unset, every page keeps its source format.
    #[builder(default)]
    pub image_format: Option<Format>,

    /// Quality of lossy encodes (0-100). Lossless formats ignore it.
    #[builder(default = "80")]
    pub quality: u8,

    /// Target viewport as (width, height). A zero in either dimension keeps page sizes.
    ///
    /// Landscape pages swap a portrait viewport so their orientation is kept.
    #[builder(default = "(0, 0)")]
    pub size: (u32, u32),

    /// Whether resized pages keep their aspect ratio inside the viewport.
    #[builder(default = "true")]
    pub keep_ratio: bool,

    /// Convert pages to single-channel grayscale.
    #[builder(default)]
    pub grayscale: bool,

    /// Never enlarge pages smaller than the viewport.
    #[builder(default)]
    pub no_upscale: bool,

    /// Never shrink pages larger than the viewport.
    #[builder(default)]
    pub no_downscale: bool,

    /// Skip unreadable pages instead of failing the whole run.
    #[builder(default = "true")]
    pub ignore_page_errors: bool,

    // --- Execution ---
    /// Number of pages benchmarked per format. The container needs at least twice as many.
    #[builder(default = "5")]
    pub samples_count: usize,

    /// Conversion worker count. `0` uses one less than the number of cores (at least two).
    #[builder(default)]
    pub workers: usize,

    /// Candidate formats for benchmarks, in tie-breaking order.
    #[builder(default = "Format::ALL.to_vec()")]
    pub benchmark_formats: Vec<Format>,

    /// Parent directory of the per-archive working caches. Defaults to the system temp dir.
    #[builder(default)]
    pub cache_root: Option<PathBuf>,

    // --- Output ---
    /// Output book format.
    ///
    /// - [`FileFormat::Cbz`] / [`FileFormat::Zip`]: zip container of the pages
    /// - [`FileFormat::Epub`]: EPUB 3 book, one page per image
    /// - [`FileFormat::Mobi`]: recognised, but not implemented
    #[builder(default = "FileFormat::Cbz")]
    pub archive_format: FileFormat,

    /// Deflate zip entries at maximum level instead of storing them.
    #[builder(default)]
    pub compress_zip: bool,

    /// Reading direction written into EPUB books.
    #[builder(default = "Direction::Ltr")]
    pub reading_direction: Direction,

    /// Directory for the output book. Defaults to the directory of the source.
    #[builder(default)]
    pub output_dir: Option<PathBuf>,
}

impl Default for RepackConfig {
    fn default() -> Self {
        Self {
            image_format: None,
            quality: 80,
            size: (0, 0),
            keep_ratio: true,
            grayscale: false,
            no_upscale: false,
            no_downscale: false,
            ignore_page_errors: true,
            samples_count: 5,
            workers: 0,
            benchmark_formats: Format::ALL.to_vec(),
            cache_root: None,
            archive_format: FileFormat::Cbz,
            compress_zip: false,
            reading_direction: Direction::Ltr,
            output_dir: None,
        }
    }
}

impl RepackConfig {
    /// Creates a new builder for configuring `RepackConfig`.
    pub fn builder() -> RepackConfigBuilder {
        RepackConfigBuilder::default()
    }

    /// Performs validation checks on the configuration for a given source container.
    ///
    /// This method validates without extracting anything. All entry points call it, so
    /// manual invocation is optional.
    ///
    /// # Arguments
    ///
    /// * `source` - The container that is about to be processed
    ///
    /// # Returns
    ///
    /// * `Ok(&self)` - Configuration is valid for `source`
    /// * `Err(Error)` - The source or output directory is unusable, or a value is out of range
    pub fn preflight_check(&self, source: &Path) -> Result<&Self> {
        if self.quality > 100 {
            return Err(Error::Other("Quality must be between 0 and 100.".to_string()));
        }
        if self.samples_count == 0 {
            return Err(Error::Other("Sample count must be at least 1.".to_string()));
        }
        if !source.exists() {
            return Err(Error::InvalidPath(
                source.to_path_buf(),
                "Source does not exist.".to_string(),
            ));
        }
        if !source.is_file() {
            return Err(Error::InvalidPath(
                source.to_path_buf(),
                "Source is not a file.".to_string(),
            ));
        }
        if let Some(dir) = &self.output_dir {
            if !dir.is_dir() {
                return Err(Error::InvalidPath(
                    dir.clone(),
                    "Output directory does not exist.".to_string(),
                ));
            }
        }
        Ok(self)
    }

    /// The immutable page conversion snapshot for one batch.
    pub fn conversion_options(&self) -> ConversionOptions {
        ConversionOptions {
            format: self.image_format,
            quality: self.quality,
            size: self.size,
            keep_ratio: self.keep_ratio,
            grayscale: self.grayscale,
            no_upscale: self.no_upscale,
            no_downscale: self.no_downscale,
            ignore_page_errors: self.ignore_page_errors,
        }
    }

    /// Converts every page of `source` and writes the result as a new book.
    ///
    /// The working cache is removed afterwards, also when the run fails or is cancelled.
    ///
    /// # Returns
    ///
    /// * `Ok(RepackSummary)` - Output path, sizes, duration and skipped pages
    /// * `Err(Error::Cancelled)` - `cancel` fired; no output book is left behind
    /// * `Err(Error)` - Any other failure
    pub async fn repack(&self, source: impl AsRef<Path>, cancel: CancelToken) -> Result<RepackSummary> {
        let source = source.as_ref();
        self.preflight_check(source)?;
        let started = Instant::now();
        let source_bytes = tokio::fs::metadata(source).await?.len();

        let mut archive = Archive::open(source, self, cancel)?;
        let written = self.repack_archive(&mut archive).await;
        if let Err(e) = archive.cleanup().await {
            warn!("couldn't clean {:?}: {}", archive.cache().root(), e);
        }
        let output = written?;

        let output_bytes = tokio::fs::metadata(&output).await?.len();
        Ok(RepackSummary {
            output,
            source_bytes,
            output_bytes,
            elapsed: started.elapsed(),
            skipped: archive.bad_files().to_vec(),
        })
    }

    async fn repack_archive(&self, archive: &mut Archive) -> Result<PathBuf> {
        archive.convert_pages().await?;
        archive
            .write_archive(self.archive_format, self.output_dir.as_deref())
            .await
    }

    /// Benchmarks every configured format on a sample of `source`. Nothing is written.
    ///
    /// # Returns
    ///
    /// * `Ok(BenchmarkReport)` - Format sizes, smallest first
    /// * `Err(Error::InsufficientSample)` - `source` has fewer than `2 * samples_count` pages
    pub async fn benchmark(&self, source: impl AsRef<Path>, cancel: CancelToken) -> Result<BenchmarkReport> {
        let source = source.as_ref();
        self.preflight_check(source)?;
        let archive = Archive::open(source, self, cancel)?;
        let report = archive.compute_format_sizes().await;
        if let Err(e) = archive.cleanup().await {
            warn!("couldn't clean {:?}: {}", archive.cache().root(), e);
        }
        report
    }

    /// Benchmarks `source`, then repacks it with the recommended page format.
    pub async fn auto_repack(
        &self,
        source: impl AsRef<Path>,
        cancel: CancelToken,
    ) -> Result<(BenchmarkReport, RepackSummary)> {
        let source = source.as_ref();
        let report = self.benchmark(source, cancel.clone()).await?;
        let mut config = self.clone();
        config.image_format = report.recommended().or(self.image_format);
        if let Some(format) = config.image_format {
            info!("Auto-selected page format: {}", format.description());
        }
        let summary = config.repack(source, cancel).await?;
        Ok((report, summary))
    }
}

impl RepackConfigBuilder {
    fn validate(&self) -> std::result::Result<(), String> {
        if let Some(quality) = self.quality {
            if quality > 100 {
                return Err("Quality must be between 0 and 100.".to_string());
            }
        }
        if let Some(0) = self.samples_count {
            return Err("Sample count must be at least 1.".to_string());
        }
        if let Some(formats) = &self.benchmark_formats {
            if formats.is_empty() {
                return Err("At least one benchmark format is required.".to_string());
            }
        }
        Ok(())
    }
}
