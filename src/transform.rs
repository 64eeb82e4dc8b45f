//! Per-page conversion.
//!
//! [`convert_page`] is the task every worker runs: open, pick the target format, flatten for
//! JPEG, grayscale, resize, encode. It reads nothing but its arguments.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Instant;

use image::imageops::FilterType;
use image::{ColorType, DynamicImage, GenericImageView};
use log::{debug, warn};

use crate::error::Result;
use crate::format::Format;
use crate::page::Page;
use crate::types::{ConversionOptions, TaskResult, TransformStep};

/// What a resize request resolves to for a given source size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizePlan {
    Downscale(u32, u32),
    Upscale(u32, u32),
    /// The source already has the target size
    ExactFit,
    SkippedNoUpscale,
    SkippedNoDownscale,
}

impl ResizePlan {
    pub fn target(&self) -> Option<(u32, u32)> {
        match self {
            ResizePlan::Downscale(w, h) | ResizePlan::Upscale(w, h) => Some((*w, *h)),
            _ => None,
        }
    }

    fn skip_reason(&self) -> &'static str {
        match self {
            ResizePlan::ExactFit => "exact fit",
            ResizePlan::SkippedNoUpscale => "no upscale",
            ResizePlan::SkippedNoDownscale => "no downscale",
            ResizePlan::Downscale(..) | ResizePlan::Upscale(..) => "",
        }
    }
}

/// Largest size inside `viewport` with the aspect ratio of `source`.
///
/// The shrunk dimension is rounded down or up, whichever lands closer to the source aspect,
/// and never below one pixel.
pub fn fit_within(source: (u32, u32), viewport: (u32, u32)) -> (u32, u32) {
    let (width, height) = (source.0.max(1) as f64, source.1.max(1) as f64);
    let (mut x, mut y) = (viewport.0, viewport.1);
    let aspect = width / height;

    if x as f64 / y as f64 >= aspect {
        let ideal = y as f64 * aspect;
        x = round_aspect(ideal, |n| (aspect - n / y as f64).abs());
    } else {
        let ideal = x as f64 / aspect;
        y = round_aspect(ideal, |n| {
            if n == 0.0 {
                0.0
            } else {
                (aspect - x as f64 / n).abs()
            }
        });
    }
    (x, y)
}

fn round_aspect(number: f64, error: impl Fn(f64) -> f64) -> u32 {
    let (floor, ceil) = (number.floor(), number.ceil());
    let best = if error(ceil) < error(floor) { ceil } else { floor };
    (best as u32).max(1)
}

/// Decides whether and how a `source`-sized page is resized for `viewport`.
///
/// A landscape source with a portrait-first viewport gets the viewport swapped. Downscaling
/// happens only when both source dimensions exceed the viewport; otherwise the page is
/// resized to the viewport unless upscaling is disabled.
pub fn plan_resize(source: (u32, u32), viewport: (u32, u32), options: &ConversionOptions) -> ResizePlan {
    let (width, height) = source;
    let (mut view_w, mut view_h) = viewport;
    if width > height && view_w < view_h {
        std::mem::swap(&mut view_w, &mut view_h);
    }

    let target = if options.keep_ratio {
        fit_within(source, (view_w, view_h))
    } else {
        (view_w, view_h)
    };

    if width > view_w && height > view_h {
        if options.no_downscale {
            ResizePlan::SkippedNoDownscale
        } else {
            ResizePlan::Downscale(target.0, target.1)
        }
    } else if options.no_upscale {
        ResizePlan::SkippedNoUpscale
    } else if target == source {
        ResizePlan::ExactFit
    } else {
        ResizePlan::Upscale(target.0, target.1)
    }
}

/// Output stems for converting a batch to `target` (`None` keeps each page's format), so that
/// no two pages write the same file.
///
/// With `in_place` every page writes beside its source: a page converting onto its own file
/// keeps its name and no output replaces another page's source. Otherwise all outputs land in
/// one directory. A page whose name is taken becomes `<stem>_<n>` in reading order, skipping
/// stems other pages already have.
pub fn output_stems(pages: &[Page], target: Option<Format>, in_place: bool) -> Vec<String> {
    let dir_of = |page: &Page| -> PathBuf {
        if in_place {
            page.path().parent().map(Path::to_path_buf).unwrap_or_default()
        } else {
            PathBuf::new()
        }
    };
    let output_path = |page: &Page, stem: &str| -> PathBuf {
        let extension = target
            .or_else(|| Format::from_extension(page.path()))
            .map(|format| format.extension())
            .unwrap_or_default();
        dir_of(page).join(format!("{}{}", stem, extension))
    };
    let taken: HashSet<(PathBuf, String)> = pages
        .iter()
        .map(|page| (dir_of(page), page.stem().to_string()))
        .collect();
    let sources: HashSet<&Path> = if in_place {
        pages.iter().map(Page::path).collect()
    } else {
        HashSet::new()
    };

    let mut stems: Vec<Option<String>> = vec![None; pages.len()];
    let mut claimed = HashSet::with_capacity(pages.len());
    if in_place {
        for (stem, page) in stems.iter_mut().zip(pages) {
            let output = output_path(page, page.stem());
            if output.as_path() == page.path() && claimed.insert(output) {
                *stem = Some(page.stem().to_string());
            }
        }
    }
    for (stem, page) in stems.iter_mut().zip(pages) {
        if stem.is_some() {
            continue;
        }
        let dir = dir_of(page);
        let mut candidate = page.stem().to_string();
        let mut n = 1;
        loop {
            let output = output_path(page, &candidate);
            let renamed_onto_other = n > 1 && taken.contains(&(dir.clone(), candidate.clone()));
            if !renamed_onto_other && !sources.contains(output.as_path()) && claimed.insert(output) {
                break;
            }
            candidate = format!("{}_{}", page.stem(), n);
            n += 1;
        }
        *stem = Some(candidate);
    }
    stems.into_iter().flatten().collect()
}

fn open_with_format(page: &mut Page) -> Result<Format> {
    page.open()?;
    page.format()
}

/// Converts one page according to `options`, writing the result beside the source or into
/// `output_dir`.
///
/// The source page is never touched; a closed copy is opened and converted. Pages that can't
/// be opened come back as [`TaskResult::Skipped`] when `options.ignore_page_errors` is set and
/// as an error otherwise. Failing to write is always an error.
pub fn convert_page(
    source: &Page,
    options: &ConversionOptions,
    output_dir: Option<&Path>,
) -> Result<TaskResult> {
    convert_page_as(source, options, output_dir, source.stem())
}

/// [`convert_page`] writing to `stem` plus the target extension instead of the page's own
/// stem. See [`output_stems`].
pub fn convert_page_as(
    source: &Page,
    options: &ConversionOptions,
    output_dir: Option<&Path>,
    stem: &str,
) -> Result<TaskResult> {
    let started = Instant::now();
    let mut page = source.clone();
    let mut trace = vec![TransformStep::Opened(page.path().to_path_buf())];

    let source_format = match open_with_format(&mut page) {
        Ok(format) => format,
        Err(e) if e.is_page_local() && options.ignore_page_errors => {
            warn!("{}, ignoring...", e);
            page.close();
            return Ok(TaskResult::Skipped { page, reason: e });
        }
        Err(e) => return Err(e),
    };

    let target_format = options.format.unwrap_or(source_format);
    let mut img = page.take_image()?;
    page.set_format(target_format);

    if target_format == Format::Jpeg && img.color() != ColorType::Rgb8 {
        img = DynamicImage::ImageRgb8(img.to_rgb8());
        trace.push(TransformStep::FlattenedToRgb);
    }

    if options.grayscale {
        img = DynamicImage::ImageLuma8(img.to_luma8());
        trace.push(TransformStep::Grayscale);
    }

    if options.resizes() {
        let from = img.dimensions();
        let plan = plan_resize(from, options.size, options);
        match plan.target() {
            Some(to) => {
                img = img.resize_exact(to.0, to.1, FilterType::Lanczos3);
                trace.push(TransformStep::Resized { from, to });
            }
            None => trace.push(TransformStep::ResizeSkipped(plan.skip_reason())),
        }
    }

    let file_name = format!("{}{}", stem, target_format.extension());
    let dest = match output_dir {
        Some(dir) => dir.join(file_name),
        None => page.path().with_file_name(file_name),
    };
    trace.push(TransformStep::Converted {
        from: source_format,
        to: target_format,
    });

    page.set_image(img);
    page.save(&dest, options.quality)?;

    trace.push(TransformStep::Wrote {
        path: dest,
        elapsed: started.elapsed(),
    });
    debug!(
        "{}",
        trace
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    );
    Ok(TaskResult::Converted { page, trace })
}
