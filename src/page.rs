//! Lazily opened page images.
//!
//! A [`Page`] is either *closed* (only its path is known, safe to hand to another worker) or
//! *open* (the decoded image is held in memory). Opening is idempotent and saving always closes.

use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Cursor, Write};
use std::path::{Path, PathBuf};

use image::{DynamicImage, GenericImageView, ImageReader};

use crate::error::{Error, Result};
use crate::format::{self, Detection, Format};
use crate::path_utils::{file_name_lossy, file_stem_lossy};

/// Handle to an archive's private working cache.
///
/// Pages record their location relative to `root`; the id identifies the owning archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheHandle {
    root: PathBuf,
    archive_id: u64,
}

impl CacheHandle {
    pub fn new(root: impl Into<PathBuf>, archive_id: u64) -> Self {
        Self {
            root: root.into(),
            archive_id,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn archive_id(&self) -> u64 {
        self.archive_id
    }

    /// A handle for a subdirectory of this cache, owned by the same archive.
    pub fn child(&self, name: &str) -> CacheHandle {
        CacheHandle::new(self.root.join(name), self.archive_id)
    }

    /// Path of `path` relative to this cache, or just its file name when it lives elsewhere.
    pub fn relative(&self, path: &Path) -> PathBuf {
        match path.strip_prefix(&self.root) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => PathBuf::from(file_name_lossy(path)),
        }
    }
}

enum PageState {
    Closed,
    Open(DynamicImage),
}

impl fmt::Debug for PageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageState::Closed => f.write_str("Closed"),
            PageState::Open(img) => write!(f, "Open({}x{})", img.width(), img.height()),
        }
    }
}

/// One page image inside a working cache.
#[derive(Debug)]
pub struct Page {
    path: PathBuf,
    rel_path: PathBuf,
    name: String,
    stem: String,
    cache: CacheHandle,
    assigned: Option<Format>,
    detected: Option<Detection>,
    state: PageState,
}

impl Page {
    pub fn new(path: impl Into<PathBuf>, cache: &CacheHandle) -> Self {
        let path = path.into();
        Self {
            rel_path: cache.relative(&path),
            name: file_name_lossy(&path),
            stem: file_stem_lossy(&path),
            path,
            cache: cache.clone(),
            assigned: None,
            detected: None,
            state: PageState::Closed,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Location relative to the owning cache, used to rebuild the destination layout.
    pub fn rel_path(&self) -> &Path {
        &self.rel_path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stem(&self) -> &str {
        &self.stem
    }

    pub fn cache(&self) -> &CacheHandle {
        &self.cache
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, PageState::Open(_))
    }

    /// Decodes the image if it isn't held yet.
    ///
    /// # Errors
    ///
    /// * [`Error::UnreadableImage`] when the file can't be read or decoded
    pub fn open(&mut self) -> Result<&DynamicImage> {
        if let PageState::Closed = self.state {
            let bytes = fs::read(&self.path)
                .map_err(|e| Error::UnreadableImage(self.path.clone(), e.to_string()))?;
            let detection = format::detect(&bytes);
            let img = ImageReader::new(Cursor::new(&bytes))
                .with_guessed_format()
                .map_err(|e| Error::UnreadableImage(self.path.clone(), e.to_string()))?
                .decode()
                .map_err(|e| Error::UnreadableImage(self.path.clone(), e.to_string()))?;
            self.detected = Some(detection);
            self.state = PageState::Open(img);
        }
        match &self.state {
            PageState::Open(img) => Ok(img),
            PageState::Closed => Err(Error::UnreadableImage(
                self.path.clone(),
                "image is not open".to_string(),
            )),
        }
    }

    /// The assigned format, or the detected one (opening the page if needed).
    ///
    /// # Errors
    ///
    /// * [`Error::UnreadableImage`] when the page can't be opened
    /// * [`Error::UnsupportedFormat`] when it decodes, but isn't PNG, JPEG or WebP
    pub fn format(&mut self) -> Result<Format> {
        if let Some(format) = self.assigned {
            return Ok(format);
        }
        self.open()?;
        match &self.detected {
            Some(Detection::Known(format)) => Ok(*format),
            Some(Detection::Unsupported(name)) => {
                Err(Error::UnsupportedFormat(self.path.clone(), name.clone()))
            }
            _ => Err(Error::UnsupportedFormat(
                self.path.clone(),
                "unknown".to_string(),
            )),
        }
    }

    /// Overrides the format used by [`Page::save`].
    pub fn set_format(&mut self, format: Format) {
        self.assigned = Some(format);
    }

    /// Replaces the held image, leaving the page open.
    pub fn set_image(&mut self, img: DynamicImage) {
        self.state = PageState::Open(img);
    }

    /// Moves the decoded image out, leaving the page closed.
    pub fn take_image(&mut self) -> Result<DynamicImage> {
        self.open()?;
        match std::mem::replace(&mut self.state, PageState::Closed) {
            PageState::Open(img) => Ok(img),
            PageState::Closed => Err(Error::UnreadableImage(
                self.path.clone(),
                "image is not open".to_string(),
            )),
        }
    }

    /// Drops the decoded image, if any.
    pub fn close(&mut self) {
        self.state = PageState::Closed;
    }

    pub fn dimensions(&mut self) -> Result<(u32, u32)> {
        Ok(self.open()?.dimensions())
    }

    pub fn is_landscape(&mut self) -> Result<bool> {
        let (width, height) = self.dimensions()?;
        Ok(width > height)
    }

    /// On-disk size of the backing file.
    pub fn file_size(&self) -> Result<u64> {
        Ok(fs::metadata(&self.path)?.len())
    }

    /// Encodes the held image with the page's format and quality into `dest`, then closes
    /// the page and points it at the new file.
    ///
    /// The data is written next to `dest` first and renamed into place, so a reader never
    /// sees a partially written page.
    pub fn save(&mut self, dest: &Path, quality: u8) -> Result<()> {
        let format = self.format()?;
        let img = self.take_image()?;

        let file_name = file_name_lossy(dest);
        let partial = dest.with_file_name(format!(".{}.part", file_name));
        let written = (|| -> Result<()> {
            let mut writer = BufWriter::new(File::create(&partial)?);
            format.encode(&img, format.params(quality), &mut writer)?;
            writer.flush()?;
            Ok(())
        })();
        if let Err(e) = written {
            let _ = fs::remove_file(&partial);
            return Err(e);
        }
        fs::rename(&partial, dest)?;

        self.path = dest.to_path_buf();
        self.rel_path = self.cache.relative(dest);
        self.name = file_name;
        self.stem = file_stem_lossy(dest);
        self.detected = Some(Detection::Known(format));
        self.state = PageState::Closed;
        Ok(())
    }
}

/// Cloning hands over the path only: the copy is always closed and decodes on its own.
impl Clone for Page {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            rel_path: self.rel_path.clone(),
            name: self.name.clone(),
            stem: self.stem.clone(),
            cache: self.cache.clone(),
            assigned: self.assigned,
            detected: None,
            state: PageState::Closed,
        }
    }
}

impl PartialEq for Page {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path && self.cache == other.cache
    }
}
