//! Container extraction and page-order recovery.
//!
//! Storage order inside a container (and directory enumeration order after extracting it) is
//! not reconstruction order, so pages are always re-sorted with a natural comparator on their
//! full cache-relative path: `p2` comes before `p10`, and directory components count too.

use std::cmp::Ordering;
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use log::{debug, info, warn};
use rayon::prelude::*;
use regex::Regex;
use walkdir::WalkDir;
use zip::ZipArchive;

use crate::error::{Error, Result};
use crate::page::{CacheHandle, Page};
use crate::path_utils::entry_name;

lazy_static! {
    /// Runs of ASCII digits; everything between them is compared as text.
    static ref DIGIT_RUN: Regex = Regex::new(r"[0-9]+").unwrap();
}

/// One run of a natural sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    /// Digits with leading zeros stripped, so `007` and `7` compare equal
    Number(String),
}

impl Ord for Segment {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Segment::Number(a), Segment::Number(b)) => {
                a.len().cmp(&b.len()).then_with(|| a.cmp(b))
            }
            (Segment::Text(a), Segment::Text(b)) => a.cmp(b),
            (Segment::Number(_), Segment::Text(_)) => Ordering::Less,
            (Segment::Text(_), Segment::Number(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for Segment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Splits `s` into alternating text and number runs. The key always starts with a (possibly
/// empty) text run, so keys of different strings line up run by run.
pub fn natural_key(s: &str) -> Vec<Segment> {
    let mut key = Vec::new();
    let mut last = 0;
    for run in DIGIT_RUN.find_iter(s) {
        key.push(Segment::Text(s[last..run.start()].to_string()));
        let digits = run.as_str().trim_start_matches('0');
        key.push(Segment::Number(if digits.is_empty() {
            "0".to_string()
        } else {
            digits.to_string()
        }));
        last = run.end();
    }
    key.push(Segment::Text(s[last..].to_string()));
    key
}

/// Compares two relative paths the way a human would order pages.
pub fn natural_cmp(a: &Path, b: &Path) -> Ordering {
    natural_key(&entry_name(a)).cmp(&natural_key(&entry_name(b)))
}

/// Sorts paths in place by [`natural_cmp`]. Equal keys keep their relative order.
pub fn human_sort(paths: &mut [PathBuf]) {
    paths.par_sort_by_cached_key(|path| natural_key(&entry_name(path)));
}

/// Picks `k` entries with stride 2 from the `2k` entries centred on the midpoint.
///
/// Returns `None` when there are fewer than `2k` entries.
pub fn stratified_sample<T: Clone>(entries: &[T], k: usize) -> Option<Vec<T>> {
    if k == 0 || k * 2 > entries.len() {
        return None;
    }
    let middle = entries.len() / 2;
    Some(
        entries[middle - k..middle + k]
            .iter()
            .step_by(2)
            .cloned()
            .collect(),
    )
}

/// Unpacks a zip-family container into a working cache.
#[derive(Debug)]
pub struct Extractor<'a> {
    source: &'a Path,
}

impl<'a> Extractor<'a> {
    pub fn new(source: &'a Path) -> Self {
        Self { source }
    }

    fn open_archive(&self) -> Result<ZipArchive<BufReader<File>>> {
        let file = File::open(self.source)
            .map_err(|e| Error::InvalidContainer(self.source.to_path_buf(), e.to_string()))?;
        ZipArchive::new(BufReader::new(file))
            .map_err(|e| Error::InvalidContainer(self.source.to_path_buf(), e.to_string()))
    }

    /// Lists the file entries of the container as `(name, index)`, naturally sorted by name.
    fn file_entries(&self, archive: &mut ZipArchive<BufReader<File>>) -> Result<Vec<(String, usize)>> {
        let mut entries = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            let entry = archive
                .by_index(index)
                .map_err(|e| Error::InvalidContainer(self.source.to_path_buf(), e.to_string()))?;
            if entry.is_dir() {
                continue;
            }
            entries.push((entry.name().to_string(), index));
        }
        entries.par_sort_by_cached_key(|(name, _)| natural_key(name));
        Ok(entries)
    }

    /// Number of file entries in the container.
    pub fn count_entries(&self) -> Result<usize> {
        let mut archive = self.open_archive()?;
        Ok(self.file_entries(&mut archive)?.len())
    }

    /// Extracts every entry, or a stratified sample of `sample` pages, into `cache` and returns
    /// the resulting pages in natural order.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidContainer`] when the source can't be read as a zip archive
    /// * [`Error::EmptyArchive`] when it holds no files
    /// * [`Error::InsufficientSample`] when it holds fewer than `2 * sample` files
    pub fn extract(&self, cache: &CacheHandle, sample: Option<usize>) -> Result<Vec<Page>> {
        let mut archive = self.open_archive()?;
        let mut entries = self.file_entries(&mut archive)?;
        if entries.is_empty() {
            return Err(Error::EmptyArchive(self.source.to_path_buf()));
        }

        if let Some(k) = sample.filter(|k| *k > 0) {
            let total = entries.len();
            entries = stratified_sample(&entries, k).ok_or_else(|| Error::InsufficientSample {
                path: self.source.to_path_buf(),
                entries: total,
                required: k * 2,
            })?;
            debug!("sampling {} of {} entries from {:?}", entries.len(), total, self.source);
        }

        info!("Extracting: {:?}", self.source);
        fs::create_dir_all(cache.root())?;
        for (name, index) in &entries {
            let mut entry = archive.by_index(*index)?;
            let Some(rel) = entry.enclosed_name() else {
                warn!("{:?}: skipping unsafe entry '{}'", self.source, name);
                continue;
            };
            let out = cache.root().join(rel);
            if let Some(parent) = out.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut file = File::create(&out)?;
            io::copy(&mut entry, &mut file)?;
        }

        let mut paths = Vec::new();
        for entry in WalkDir::new(cache.root()) {
            let entry = entry?;
            if entry.file_type().is_file() {
                paths.push(cache.relative(entry.path()));
            }
        }
        human_sort(&mut paths);

        Ok(paths
            .into_iter()
            .map(|rel| Page::new(cache.root().join(rel), cache))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_natural_order() {
        let mut paths = vec![
            PathBuf::from("p10"),
            PathBuf::from("p1"),
            PathBuf::from("p2"),
        ];
        human_sort(&mut paths);
        assert_eq!(
            paths,
            vec![PathBuf::from("p1"), PathBuf::from("p2"), PathBuf::from("p10")]
        );
    }

    #[test]
    fn test_natural_order_uses_directories() {
        let mut paths = vec![
            Path::new("ch10").join("001.jpg"),
            Path::new("ch2").join("010.jpg"),
            Path::new("ch2").join("9.jpg"),
            Path::new("ch1").join("a.jpg"),
        ];
        human_sort(&mut paths);
        assert_eq!(
            paths,
            vec![
                Path::new("ch1").join("a.jpg"),
                Path::new("ch2").join("9.jpg"),
                Path::new("ch2").join("010.jpg"),
                Path::new("ch10").join("001.jpg"),
            ]
        );
    }

    #[test]
    fn test_natural_cmp_leading_zeros_and_text() {
        assert_eq!(natural_cmp(Path::new("007"), Path::new("7")), Ordering::Equal);
        assert_eq!(natural_cmp(Path::new("page9"), Path::new("page09a")), Ordering::Less);
        assert_eq!(natural_cmp(Path::new("a2"), Path::new("b1")), Ordering::Less);
        assert_eq!(
            natural_cmp(Path::new("p99999999999999999999999"), Path::new("p100000000000000000000000")),
            Ordering::Less
        );
    }

    #[test]
    fn test_stratified_sample() {
        let entries: Vec<usize> = (0..20).collect();
        assert_eq!(stratified_sample(&entries, 3).unwrap(), vec![7, 9, 11]);
        assert_eq!(stratified_sample(&entries, 10).unwrap(), vec![0, 2, 4, 6, 8, 10, 12, 14, 16, 18]);
        assert!(stratified_sample(&entries, 11).is_none());
        assert!(stratified_sample(&entries, 0).is_none());

        let odd: Vec<usize> = (0..7).collect();
        assert_eq!(stratified_sample(&odd, 2).unwrap(), vec![1, 3]);
    }
}
