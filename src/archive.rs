//! A source container and its working cache.
//!
//! [`Archive`] owns one private cache directory, the ordered page index and the chapter
//! lengths partitioning it. Whenever both are non-empty the chapter lengths sum to the index
//! length; every mutation below keeps it that way.
//!
//! Blocking work (extraction, conversion batches) runs on tokio's blocking pool, so the
//! async methods can be awaited from any runtime thread.

use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, info, warn};
use tokio::fs;
use tokio::task::spawn_blocking;

use crate::assembler::{AssemblyEntry, CHAPTER_PREFIX, assemble};
use crate::benchmark::{BenchmarkEngine, BenchmarkReport};
use crate::error::{Error, Result};
use crate::extractor::Extractor;
use crate::format::Format;
use crate::generator::{Generator, GeneratorSettings, cbz::Cbz, epub::EPub};
use crate::page::{CacheHandle, Page};
use crate::path_utils::{file_name_lossy, file_stem_lossy, output_file_path};
use crate::pool::{CancelToken, PoolMode, WorkerPool};
use crate::repack::RepackConfig;
use crate::transform::{convert_page_as, output_stems};
use crate::types::{BookMetadata, ConversionOptions, Direction, FileFormat, TaskResult};

/// Prefix of every archive cache directory.
pub const CACHE_PREFIX: &str = "book_";

/// Cache subdirectories. Only `PAGES_DIR` feeds the page index.
const PAGES_DIR: &str = "pages";
const SAMPLE_DIR: &str = "sample";
const FORMATS_DIR: &str = "formats";

static NEXT_ARCHIVE_ID: AtomicU64 = AtomicU64::new(1);

/// Default parent of archive caches when none is configured.
pub fn default_cache_root() -> PathBuf {
    std::env::temp_dir().join("kaiso")
}

#[derive(Debug)]
pub struct Archive {
    source: PathBuf,
    cache: CacheHandle,
    options: ConversionOptions,
    workers: usize,
    samples: usize,
    formats: Vec<Format>,
    compress: bool,
    direction: Direction,
    cancel: CancelToken,
    extracted: bool,
    index: Vec<Page>,
    chapter_lengths: Vec<usize>,
    bad_files: Vec<PathBuf>,
}

impl Archive {
    /// Opens `path` with the settings of `config` and creates its private cache.
    ///
    /// Nothing is extracted yet; pages are unpacked on first access.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidPath`] when `path` is not an existing file
    /// * I/O errors when the cache directory can't be created
    pub fn open(path: impl AsRef<Path>, config: &RepackConfig, cancel: CancelToken) -> Result<Self> {
        let source = path.as_ref().to_path_buf();
        if !source.is_file() {
            return Err(Error::InvalidPath(source, "not an existing file".to_string()));
        }

        let root = config.cache_root.clone().unwrap_or_else(default_cache_root);
        std::fs::create_dir_all(&root)?;
        let dir = tempfile::Builder::new()
            .prefix(CACHE_PREFIX)
            .tempdir_in(&root)?
            .keep();
        let id = NEXT_ARCHIVE_ID.fetch_add(1, Ordering::SeqCst);
        debug!("archive {} for {:?} caches in {:?}", id, source, dir);

        Ok(Self {
            source,
            cache: CacheHandle::new(dir, id),
            options: config.conversion_options(),
            workers: config.workers,
            samples: config.samples_count,
            formats: config.benchmark_formats.clone(),
            compress: config.compress_zip,
            direction: config.reading_direction,
            cancel,
            extracted: false,
            index: Vec::new(),
            chapter_lengths: Vec::new(),
            bad_files: Vec::new(),
        })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn cache(&self) -> &CacheHandle {
        &self.cache
    }

    /// The part of the cache holding the page index, apart from benchmark scratch space.
    fn page_cache(&self) -> CacheHandle {
        self.cache.child(PAGES_DIR)
    }

    pub fn chapter_lengths(&self) -> &[usize] {
        &self.chapter_lengths
    }

    /// Source paths of the pages dropped by the last conversion.
    pub fn bad_files(&self) -> &[PathBuf] {
        &self.bad_files
    }

    fn pool(&self, mode: PoolMode) -> WorkerPool {
        WorkerPool::new(self.workers, mode, self.cancel.clone())
    }

    /// Pages in reading order, extracting the container on first call.
    pub async fn fetch_pages(&mut self) -> Result<&[Page]> {
        if !self.extracted {
            let source = self.source.clone();
            let cache = self.page_cache();
            let pages = spawn_blocking(move || Extractor::new(&source).extract(&cache, None)).await??;
            info!("{:?}: {} pages", self.source.file_name().unwrap_or_default(), pages.len());
            self.chapter_lengths = vec![pages.len()];
            self.index = pages;
            self.extracted = true;
        }
        Ok(&self.index)
    }

    /// Pages split into chapters. The pages are closed copies of the index.
    pub async fn fetch_chapters(&mut self) -> Result<Vec<Vec<Page>>> {
        self.fetch_pages().await?;
        let mut rest = self.index.as_slice();
        let mut chapters = Vec::with_capacity(self.chapter_lengths.len());
        for &length in &self.chapter_lengths {
            let (chapter, tail) = rest.split_at(length.min(rest.len()));
            chapters.push(chapter.to_vec());
            rest = tail;
        }
        Ok(chapters)
    }

    /// Appends the pages of `other` (optionally only `range` of them) as a new chapter.
    ///
    /// The pages stay in `other`'s cache, so `other` must not be cleaned up before this
    /// archive is written.
    pub async fn add_chapter(&mut self, other: &mut Archive, range: Option<Range<usize>>) -> Result<&[Page]> {
        let pages = other.fetch_pages().await?;
        let chapter = match range {
            Some(range) => pages.get(range.clone()).ok_or_else(|| {
                Error::Other(format!(
                    "chapter range {:?} out of bounds for {} pages",
                    range,
                    pages.len()
                ))
            })?,
            None => pages,
        };
        if chapter.is_empty() {
            return Err(Error::Other("cannot add an empty chapter".to_string()));
        }
        let chapter = chapter.to_vec();

        self.fetch_pages().await?;
        self.chapter_lengths.push(chapter.len());
        self.index.extend(chapter);
        Ok(&self.index)
    }

    /// Inserts the image at `path` at `index`, or at the end when `index` is `None`.
    ///
    /// The image is copied into the cache first, renamed if its name is taken. The page joins
    /// the chapter of the page before it, or the first chapter at index 0.
    ///
    /// # Errors
    ///
    /// * [`Error::UnreadableImage`] or [`Error::UnsupportedFormat`] when `path` is not a page
    pub async fn add_page(&mut self, path: impl AsRef<Path>, index: Option<usize>) -> Result<&[Page]> {
        self.fetch_pages().await?;
        let len = self.index.len();
        let index = index.unwrap_or(len);
        if index > len {
            return Err(Error::Other(format!("page index {} out of bounds ({})", index, len)));
        }

        let source = path.as_ref().to_path_buf();
        let cache = self.page_cache();
        let dest = unused_path(cache.root(), &source);
        let page = spawn_blocking(move || -> Result<Page> {
            let mut candidate = Page::new(source.clone(), &cache);
            candidate.format()?;
            std::fs::copy(&source, &dest)?;
            Ok(Page::new(dest, &cache))
        })
        .await??;

        let chapter = self.chapter_at(index.saturating_sub(1).min(len.saturating_sub(1)));
        match chapter {
            Some(chapter) => self.chapter_lengths[chapter] += 1,
            None => self.chapter_lengths.push(1),
        }
        self.index.insert(index, page);
        Ok(&self.index)
    }

    /// Removes and returns the page at `index`. A chapter left empty is dropped.
    pub async fn remove_page(&mut self, index: usize) -> Result<Page> {
        self.fetch_pages().await?;
        if index >= self.index.len() {
            return Err(Error::Other(format!(
                "page index {} out of bounds ({})",
                index,
                self.index.len()
            )));
        }
        if let Some(chapter) = self.chapter_at(index) {
            self.chapter_lengths[chapter] -= 1;
            if self.chapter_lengths[chapter] == 0 {
                self.chapter_lengths.remove(chapter);
            }
        }
        Ok(self.index.remove(index))
    }

    fn chapter_at(&self, index: usize) -> Option<usize> {
        let mut end = 0;
        for (chapter, length) in self.chapter_lengths.iter().enumerate() {
            end += length;
            if index < end {
                return Some(chapter);
            }
        }
        None
    }

    /// Converts every page in place with the archive's options.
    pub async fn convert_pages(&mut self) -> Result<&[Page]> {
        let options = self.options.clone();
        self.convert_pages_with(options).await
    }

    /// Converts every page in place with `options`.
    ///
    /// Pages that can't be read are dropped from the index and recorded in
    /// [`Archive::bad_files`]; chapters shrink accordingly.
    pub async fn convert_pages_with(&mut self, options: ConversionOptions) -> Result<&[Page]> {
        self.fetch_pages().await?;
        let pool = self.pool(PoolMode::Isolated);
        let pages = self.index.clone();
        let options = Arc::new(options);
        info!("Converting {} pages with {} workers", pages.len(), pool.effective_workers(pages.len()));
        let tasks: Vec<(Page, String)> = {
            let stems = output_stems(&pages, options.format, true);
            pages.into_iter().zip(stems).collect()
        };
        let results = spawn_blocking(move || {
            pool.map(tasks, |(page, stem)| convert_page_as(&page, &options, None, &stem))
        })
        .await??;

        let mut converted = Vec::with_capacity(results.len());
        let mut lengths = Vec::with_capacity(self.chapter_lengths.len());
        let mut bad_files = Vec::new();
        let mut results = results.into_iter();
        for &length in &self.chapter_lengths {
            let mut kept = 0;
            for result in results.by_ref().take(length) {
                match result {
                    TaskResult::Converted { page, .. } => {
                        converted.push(page);
                        kept += 1;
                    }
                    TaskResult::Skipped { page, reason } => {
                        warn!("dropping {:?}: {}", page.name(), reason);
                        bad_files.push(page.path().to_path_buf());
                    }
                }
            }
            if kept > 0 {
                lengths.push(kept);
            }
        }

        self.index = converted;
        self.chapter_lengths = lengths;
        self.bad_files = bad_files;
        Ok(&self.index)
    }

    /// Benchmarks the configured formats on a stratified sample of the container.
    ///
    /// The sample is extracted separately, so the page index is left untouched.
    pub async fn compute_format_sizes(&self) -> Result<BenchmarkReport> {
        let sample_cache = self.cache.child(SAMPLE_DIR);
        let work_dir = self.cache.root().join(FORMATS_DIR);
        for dir in [sample_cache.root(), work_dir.as_path()] {
            if fs::try_exists(dir).await? {
                fs::remove_dir_all(dir).await?;
            }
        }

        let source = self.source.clone();
        let samples = self.samples;
        let formats = self.formats.clone();
        let engine = BenchmarkEngine::new(self.options.clone(), self.workers, self.cancel.clone());
        spawn_blocking(move || {
            let sample = Extractor::new(&source).extract(&sample_cache, Some(samples))?;
            engine.run(&sample, &work_dir, &formats)
        })
        .await?
    }

    /// Writes the pages as a `book_format` book named after the source into `dir`, or next
    /// to the source. An existing book at that path is replaced.
    ///
    /// # Errors
    ///
    /// * [`Error::NotImplemented`] for [`FileFormat::Mobi`]
    /// * [`Error::InvalidPath`] when `dir` is not an existing directory
    /// * [`Error::Cancelled`] when cancellation was requested before writing started
    pub async fn write_archive(&mut self, book_format: FileFormat, dir: Option<&Path>) -> Result<PathBuf> {
        if book_format == FileFormat::Mobi {
            return Err(Error::NotImplemented("mobi output".to_string()));
        }
        if let Some(dir) = dir {
            if !dir.is_dir() {
                return Err(Error::InvalidPath(dir.to_path_buf(), "not a directory".to_string()));
            }
        }

        let chapters = self.fetch_chapters().await?;
        let entries = assemble(&chapters, CHAPTER_PREFIX);
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled {
                completed: 0,
                total: entries.len(),
            });
        }

        let output = output_file_path(&self.source, dir, book_format.extension());
        if fs::try_exists(&output).await? {
            warn!("{:?} exists, removing...", output);
            fs::remove_file(&output).await?;
        }
        info!("Write .{}: {:?}", book_format.extension(), output);

        let settings = GeneratorSettings {
            compress: self.compress,
            direction: self.direction,
            metadata: BookMetadata::from_stem(&file_stem_lossy(&self.source)),
        };
        match book_format {
            FileFormat::Epub => generate::<EPub>(&output, &settings, &entries).await,
            _ => generate::<Cbz>(&output, &settings, &entries).await,
        }
    }

    /// Deletes the working cache.
    pub async fn cleanup(&self) -> Result<()> {
        if fs::try_exists(self.cache.root()).await? {
            debug!("cleanup(): {:?}", self.cache.root());
            fs::remove_dir_all(self.cache.root()).await?;
        }
        Ok(())
    }
}

/// `dir/<file name of path>`, or `dir/<stem>_<n>.<ext>` when that is taken.
fn unused_path(dir: &Path, path: &Path) -> PathBuf {
    let stem = file_stem_lossy(path);
    let extension = path
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    let mut dest = dir.join(file_name_lossy(path));
    let mut n = 1;
    while dest.exists() {
        dest = dir.join(format!("{}_{}{}", stem, n, extension));
        n += 1;
    }
    dest
}

async fn generate<G: Generator + Send>(
    output: &Path,
    settings: &GeneratorSettings,
    entries: &[AssemblyEntry],
) -> Result<PathBuf> {
    let mut generator = G::new(output, settings)?;
    for chapter in entries.chunk_by(|a, b| a.chapter == b.chapter) {
        generator.add_chapter(chapter[0].chapter, chapter).await?;
    }
    generator.save().await
}
