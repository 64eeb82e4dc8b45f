//! Unit tests for core kaiso functionality.
//!
//! Tests individual components in isolation without full pipeline execution.

use kaiso::benchmark::BenchmarkEngine;
use kaiso::error::{Error, Result};
use kaiso::extractor::Extractor;
use kaiso::prelude::*;
use kaiso::transform::{ResizePlan, convert_page, plan_resize};
use image::{ColorType, DynamicImage, ImageFormat, RgbImage};
use std::io::Cursor;

mod common;
use common::{create_book, png_bytes, rgba_png_bytes, setup_test_dirs};

fn write_page(dir: &Path, name: &str, bytes: &[u8]) -> Page {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    Page::new(path, &CacheHandle::new(dir, 1))
}

fn converted(result: TaskResult) -> (Page, Vec<TransformStep>) {
    match result {
        TaskResult::Converted { page, trace } => (page, trace),
        TaskResult::Skipped { page, reason } => panic!("{:?} skipped: {}", page.path(), reason),
    }
}

#[tokio::test]
async fn test_page_lazily_opens_and_detects() -> Result<()> {
    let test_dirs = setup_test_dirs("page_open").await;
    let mut page = write_page(&test_dirs.source_dir, "p1.png", &png_bytes(40, 20, 1));

    assert!(!page.is_open());
    assert_eq!(page.format()?, Format::Png);
    assert!(page.is_open());
    assert_eq!(page.dimensions()?, (40, 20));
    assert!(page.is_landscape()?);

    // clones never share the decoded image
    let copy = page.clone();
    assert!(!copy.is_open());
    assert_eq!(copy.rel_path(), Path::new("p1.png"));

    page.close();
    assert!(!page.is_open());
    Ok(())
}

#[tokio::test]
async fn test_page_save_switches_format() -> Result<()> {
    let test_dirs = setup_test_dirs("page_save").await;
    let mut page = write_page(&test_dirs.source_dir, "p1.png", &png_bytes(32, 32, 2));
    page.open()?;
    page.set_format(Format::WebpLossless);

    let dest = test_dirs.target_dir.join("p1.webp");
    page.save(&dest, 80)?;
    assert!(!page.is_open());
    assert_eq!(page.path(), dest.as_path());
    assert_eq!(page.name(), "p1.webp");

    let mut reopened = Page::new(&dest, page.cache());
    assert_eq!(reopened.format()?, Format::WebpLossless);
    assert_eq!(reopened.dimensions()?, (32, 32));
    Ok(())
}

#[tokio::test]
async fn test_benchmark_baseline_names_sniffed_format() -> Result<()> {
    let test_dirs = setup_test_dirs("benchmark_baseline").await;
    let mut page = write_page(&test_dirs.source_dir, "p1.png", &png_bytes(32, 32, 3));
    page.open()?;
    page.set_format(Format::WebpLossless);
    page.save(&test_dirs.source_dir.join("p1.webp"), 80)?;

    // the extension alone would read as lossy WebP
    assert_eq!(Format::from_extension(Path::new("p1.webp")), Some(Format::WebpLossy));
    let engine = BenchmarkEngine::new(ConversionOptions::default(), 1, CancelToken::new());
    let report = engine.run(&[page], &test_dirs.target_dir, &[Format::Png])?;
    let baseline = report.entries.iter().find(|entry| entry.is_baseline()).unwrap();
    assert_eq!(baseline.label, "Source (WebP Lossless)");
    assert_eq!(report.entries.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_unreadable_and_unsupported_pages() -> Result<()> {
    let test_dirs = setup_test_dirs("page_errors").await;
    let mut junk = write_page(&test_dirs.source_dir, "junk.png", b"junk");
    let err = junk.open().unwrap_err();
    assert!(matches!(err, Error::UnreadableImage(..)));
    assert!(err.is_page_local());

    let mut gif = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(RgbImage::new(4, 4)).write_to(&mut gif, ImageFormat::Gif)?;
    let mut page = write_page(&test_dirs.source_dir, "anim.gif", gif.get_ref());
    let err = page.format().unwrap_err();
    assert!(matches!(err, Error::UnsupportedFormat(..)));
    assert!(err.is_page_local());
    Ok(())
}

#[tokio::test]
async fn test_convert_page_keeps_source_format() -> Result<()> {
    let test_dirs = setup_test_dirs("convert_keep").await;
    let source = write_page(&test_dirs.source_dir, "p1.png", &png_bytes(30, 40, 3));

    let (page, trace) = converted(convert_page(
        &source,
        &ConversionOptions::default(),
        Some(&test_dirs.target_dir),
    )?);
    assert_eq!(page.path(), test_dirs.target_dir.join("p1.png").as_path());
    assert!(source.path().exists());
    assert!(trace.contains(&TransformStep::Converted {
        from: Format::Png,
        to: Format::Png
    }));
    assert!(matches!(trace.last(), Some(TransformStep::Wrote { .. })));
    Ok(())
}

#[tokio::test]
async fn test_convert_page_to_jpeg_flattens() -> Result<()> {
    let test_dirs = setup_test_dirs("convert_jpeg").await;
    let source = write_page(&test_dirs.source_dir, "alpha.png", &rgba_png_bytes(24, 24));
    let options = ConversionOptions {
        format: Some(Format::Jpeg),
        ..Default::default()
    };

    let (mut page, trace) = converted(convert_page(&source, &options, None)?);
    assert!(trace.contains(&TransformStep::FlattenedToRgb));
    assert_eq!(page.name(), "alpha.jpg");
    assert_eq!(page.format()?, Format::Jpeg);
    assert_eq!(page.open()?.color(), ColorType::Rgb8);
    Ok(())
}

#[tokio::test]
async fn test_convert_page_grayscale_and_resize() -> Result<()> {
    let test_dirs = setup_test_dirs("convert_resize").await;
    let source = write_page(&test_dirs.source_dir, "p1.png", &png_bytes(100, 200, 4));
    let options = ConversionOptions {
        size: (50, 50),
        grayscale: true,
        ..Default::default()
    };

    let (mut page, trace) = converted(convert_page(&source, &options, Some(&test_dirs.target_dir))?);
    assert!(trace.contains(&TransformStep::Grayscale));
    assert!(trace.contains(&TransformStep::Resized {
        from: (100, 200),
        to: (25, 50)
    }));
    assert_eq!(page.dimensions()?, (25, 50));
    assert_eq!(page.open()?.color(), ColorType::L8);

    let stretched = ConversionOptions {
        keep_ratio: false,
        ..options
    };
    let (mut page, _) = converted(convert_page(&source, &stretched, Some(&test_dirs.target_dir))?);
    assert_eq!(page.dimensions()?, (50, 50));
    Ok(())
}

#[tokio::test]
async fn test_convert_page_error_policy() -> Result<()> {
    let test_dirs = setup_test_dirs("convert_policy").await;
    let source = write_page(&test_dirs.source_dir, "bad.png", b"not a png");

    match convert_page(&source, &ConversionOptions::default(), None)? {
        TaskResult::Skipped { page, reason } => {
            assert_eq!(page.path(), source.path());
            assert!(matches!(reason, Error::UnreadableImage(..)));
        }
        TaskResult::Converted { .. } => panic!("a corrupted page converted"),
    }

    let strict = ConversionOptions {
        ignore_page_errors: false,
        ..Default::default()
    };
    assert!(matches!(
        convert_page(&source, &strict, None),
        Err(Error::UnreadableImage(..))
    ));
    Ok(())
}

#[test]
fn test_resize_plan_gating() {
    let options = ConversionOptions {
        size: (100, 100),
        ..Default::default()
    };
    assert_eq!(plan_resize((100, 100), (100, 100), &options), ResizePlan::ExactFit);
    assert_eq!(plan_resize((40, 80), (100, 100), &options), ResizePlan::Upscale(50, 100));
    // one side larger, the other smaller: not a downscale
    assert_eq!(plan_resize((200, 50), (100, 100), &options), ResizePlan::Upscale(100, 25));

    let both = ConversionOptions {
        no_upscale: true,
        no_downscale: true,
        ..options.clone()
    };
    assert_eq!(plan_resize((400, 800), (100, 100), &both), ResizePlan::SkippedNoDownscale);
    assert_eq!(plan_resize((50, 80), (100, 100), &both), ResizePlan::SkippedNoUpscale);
    assert_eq!(ResizePlan::SkippedNoUpscale.target(), None);
}

#[tokio::test]
async fn test_extract_orders_and_samples() -> Result<()> {
    let test_dirs = setup_test_dirs("extract").await;
    let source = test_dirs.source_dir.join("book.cbz");
    let names: Vec<String> = (1..=12).rev().map(|i| format!("p{}.png", i)).collect();
    let names: Vec<&str> = names.iter().map(String::as_str).collect();
    create_book(&source, &names, &[])?;

    let extractor = Extractor::new(&source);
    assert_eq!(extractor.count_entries()?, 12);

    let cache = CacheHandle::new(test_dirs.cache_dir.join("full"), 1);
    let pages = extractor.extract(&cache, None)?;
    let order: Vec<&str> = pages.iter().map(Page::name).collect();
    let expected: Vec<String> = (1..=12).map(|i| format!("p{}.png", i)).collect();
    assert_eq!(order, expected);
    assert!(pages.iter().all(|page| page.path().starts_with(cache.root())));

    // 2k entries around the middle, every other one
    let cache = CacheHandle::new(test_dirs.cache_dir.join("sample"), 1);
    let sample = extractor.extract(&cache, Some(3))?;
    let order: Vec<&str> = sample.iter().map(Page::name).collect();
    assert_eq!(order, vec!["p4.png", "p6.png", "p8.png"]);

    let cache = CacheHandle::new(test_dirs.cache_dir.join("too_big"), 1);
    assert!(matches!(
        extractor.extract(&cache, Some(7)),
        Err(Error::InsufficientSample { entries: 12, required: 14, .. })
    ));
    Ok(())
}

#[tokio::test]
async fn test_pool_converts_pages_in_order() -> Result<()> {
    let test_dirs = setup_test_dirs("pool_pages").await;
    let pages: Vec<Page> = (1..=6)
        .map(|i| {
            write_page(
                &test_dirs.source_dir,
                &format!("p{}.png", i),
                &png_bytes(16, 16, i as u8),
            )
        })
        .collect();
    let options = ConversionOptions {
        format: Some(Format::Jpeg),
        ..Default::default()
    };

    for mode in [PoolMode::Isolated, PoolMode::Threaded] {
        let pool = WorkerPool::new(3, mode, CancelToken::new());
        let results = pool.map(pages.clone(), |page| {
            convert_page(&page, &options, Some(&test_dirs.target_dir))
        })?;
        let names: Vec<&str> = results.iter().map(|result| result.page().name()).collect();
        assert_eq!(names, vec!["p1.jpg", "p2.jpg", "p3.jpg", "p4.jpg", "p5.jpg", "p6.jpg"]);
        assert!(results.iter().all(TaskResult::is_success));
    }
    Ok(())
}

#[test]
fn test_repack_config_flows_into_options() {
    let config = RepackConfig::builder()
        .image_format(Format::WebpLossy)
        .quality(55u8)
        .size((800u32, 1200u32))
        .no_downscale(true)
        .build()
        .unwrap();
    let options = config.conversion_options();
    assert_eq!(options.format, Some(Format::WebpLossy));
    assert_eq!(options.quality, 55);
    assert_eq!(options.size, (800, 1200));
    assert!(options.no_downscale);
    assert!(options.resizes());
}
