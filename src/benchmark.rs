//! Format benchmarking.
//!
//! A sample of pages is converted to every candidate format and the total on-disk size of
//! each result is compared against the untouched sample. The report is ranked smallest first.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use log::{debug, info};

use crate::error::Result;
use crate::format::Format;
use crate::page::Page;
use crate::pool::{CancelToken, PoolMode, WorkerPool};
use crate::transform::{convert_page_as, output_stems};
use crate::types::{ConversionOptions, human_bytes, pct_change, total_file_size};

/// Label of the untouched sample in reports.
pub const SOURCE_LABEL: &str = "Source";

/// Total size of the sample in one format. `format` is `None` for the untouched sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatTotal {
    pub label: String,
    pub format: Option<Format>,
    pub bytes: u64,
}

impl FormatTotal {
    pub fn is_baseline(&self) -> bool {
        self.format.is_none()
    }
}

/// Ranked benchmark results.
#[derive(Debug, Clone)]
pub struct BenchmarkReport {
    pub sample_size: usize,
    pub baseline_bytes: u64,
    /// Smallest first, the baseline included
    pub entries: Vec<FormatTotal>,
}

/// Sorts totals ascending by size. Ties keep their given order.
pub fn rank(mut totals: Vec<FormatTotal>) -> Vec<FormatTotal> {
    totals.sort_by_key(|total| total.bytes);
    totals
}

impl BenchmarkReport {
    pub fn new(sample_size: usize, baseline: FormatTotal, converted: Vec<FormatTotal>) -> Self {
        let baseline_bytes = baseline.bytes;
        let mut entries = Vec::with_capacity(converted.len() + 1);
        entries.push(baseline);
        entries.extend(converted);
        Self {
            sample_size,
            baseline_bytes,
            entries: rank(entries),
        }
    }

    /// Smallest converted format, even when the untouched sample is smaller still.
    pub fn recommended(&self) -> Option<Format> {
        self.entries.iter().find_map(|entry| entry.format)
    }

    /// Whether the untouched sample is smaller than every candidate.
    pub fn source_is_smallest(&self) -> bool {
        self.entries.first().is_some_and(FormatTotal::is_baseline)
    }

    /// Box-drawn table of every entry with its size and change against the baseline.
    pub fn summary(&self) -> String {
        let mut lines = vec![format!(
            "┌── Disk size ({} pages) with present settings",
            self.sample_size
        )];
        let last = self.entries.len().saturating_sub(1);
        for (i, entry) in self.entries.iter().enumerate() {
            let prefix = if i == last { "└─" } else { "├─" };
            let label = format!("{}■{} {}", prefix, i + 1, entry.label);
            lines.push(format!(
                "{:<25} {:>8} | {}",
                label,
                human_bytes(entry.bytes),
                pct_change(self.baseline_bytes, entry.bytes)
            ));
        }
        lines.join("\n")
    }
}

/// Runs the per-format conversions of a benchmark.
///
/// Formats are benchmarked concurrently on a lightweight outer pool; every format converts
/// its pages on its own isolated pool of `workers` threads.
#[derive(Debug, Clone)]
pub struct BenchmarkEngine {
    options: ConversionOptions,
    workers: usize,
    cancel: CancelToken,
}

impl BenchmarkEngine {
    pub fn new(options: ConversionOptions, workers: usize, cancel: CancelToken) -> Self {
        Self {
            options,
            workers,
            cancel,
        }
    }

    /// Converts `sample` to each of `formats` under `work_dir/<format name>` and ranks the
    /// resulting sizes.
    ///
    /// Pages that fail to convert are left out of their format's total.
    pub fn run(&self, sample: &[Page], work_dir: &Path, formats: &[Format]) -> Result<BenchmarkReport> {
        // header-sniffed format, not the extension
        let source_desc = sample
            .first()
            .cloned()
            .and_then(|mut page| page.format().ok())
            .map(|format| format.description())
            .unwrap_or("unknown");
        let baseline = FormatTotal {
            label: format!("{} ({})", SOURCE_LABEL, source_desc),
            format: None,
            bytes: total_file_size(sample.iter().map(Page::path))?,
        };
        info!(
            "Benchmarking {} formats on {} pages ({})",
            formats.len(),
            sample.len(),
            human_bytes(baseline.bytes)
        );

        let outer = WorkerPool::new(formats.len().max(1), PoolMode::Threaded, self.cancel.clone());
        let converted = outer.map(formats.to_vec(), |format| {
            let dir = work_dir.join(format.name());
            fs::create_dir_all(&dir)?;
            let options = Arc::new(self.options.with_format(format));
            let tasks: Vec<(Page, String)> = sample
                .iter()
                .cloned()
                .zip(output_stems(sample, Some(format), false))
                .collect();
            let inner = WorkerPool::new(self.workers, PoolMode::Isolated, self.cancel.clone());
            let results = inner.map(tasks, |(page, stem)| {
                convert_page_as(&page, &options, Some(&dir), &stem)
            })?;

            let written: Vec<_> = results
                .iter()
                .filter(|result| result.is_success())
                .map(|result| result.page().path().to_path_buf())
                .collect();
            let bytes = total_file_size(&written)?;
            debug!("{}: {} pages, {}", format.name(), written.len(), human_bytes(bytes));
            Ok(FormatTotal {
                label: format.name().to_string(),
                format: Some(format),
                bytes,
            })
        })?;

        Ok(BenchmarkReport::new(sample.len(), baseline, converted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn total(label: &str, format: Option<Format>, bytes: u64) -> FormatTotal {
        FormatTotal {
            label: label.to_string(),
            format,
            bytes,
        }
    }

    fn report() -> BenchmarkReport {
        BenchmarkReport::new(
            5,
            total("Source (PNG)", None, 1000),
            vec![
                total("jpeg", Some(Format::Jpeg), 800),
                total("png", Some(Format::Png), 1200),
                total("webp", Some(Format::WebpLossy), 900),
            ],
        )
    }

    #[test]
    fn test_ranking_includes_baseline() {
        let report = report();
        let sizes: Vec<u64> = report.entries.iter().map(|e| e.bytes).collect();
        assert_eq!(sizes, vec![800, 900, 1000, 1200]);
        assert_eq!(report.recommended(), Some(Format::Jpeg));
        assert!(report.entries[2].is_baseline());
    }

    #[test]
    fn test_rank_is_stable() {
        let ranked = rank(vec![
            total("a", None, 10),
            total("b", Some(Format::Png), 10),
            total("c", Some(Format::Jpeg), 5),
        ]);
        let labels: Vec<&str> = ranked.iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_baseline_can_win() {
        let small_source = BenchmarkReport::new(
            2,
            total("Source (JPEG)", None, 100),
            vec![
                total("png", Some(Format::Png), 400),
                total("webpll", Some(Format::WebpLossless), 300),
            ],
        );
        assert!(small_source.source_is_smallest());
        assert_eq!(small_source.recommended(), Some(Format::WebpLossless));
        assert!(!report().source_is_smallest());
    }

    #[test]
    fn test_summary_table() {
        let summary = report().summary();
        let lines: Vec<&str> = summary.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "┌── Disk size (5 pages) with present settings");
        assert!(lines[1].starts_with("├─■1 jpeg"));
        assert!(lines[1].ends_with("| -20.00%"));
        assert!(lines[2].ends_with("| -10.00%"));
        assert!(lines[3].contains("Source (PNG)"));
        assert!(lines[3].ends_with("| +0.00%"));
        assert!(lines[4].starts_with("└─■4 png"));
        assert!(lines[4].ends_with("| +20.00%"));
        assert!(lines[1].contains(" 800.00B |"));
    }
}
