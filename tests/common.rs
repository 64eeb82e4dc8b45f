//! Common test utilities and constants for the kaiso crate.
//!
//! Provides functions for setting up unique test directories, building synthetic page
//! containers, and inspecting the books written by a run.

use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use kaiso::RepackConfigBuilder;
use kaiso::error::Result;
use rand::{Rng, distributions::Alphanumeric};
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

#[allow(dead_code)]
pub const TEST_TMP_DIR: &str = "tests/tmp";
#[allow(dead_code)]
pub const TEST_TIMEOUT: Duration = Duration::from_secs(30);
#[allow(dead_code)]
pub const LONG_TEST_TIMEOUT: Duration = Duration::from_secs(120); // For runs converting every format

/// Unique per-test directories.
#[allow(dead_code)]
pub struct TestDirs {
    pub base: PathBuf,
    pub source_dir: PathBuf,
    pub target_dir: PathBuf,
    pub cache_dir: PathBuf,
}

/// Creates clean source, target and cache directories under a random test directory.
#[allow(dead_code)]
pub async fn setup_test_dirs(sub_path: &str) -> TestDirs {
    let rand_string: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    let base = PathBuf::from(TEST_TMP_DIR).join(format!("{}-{}", sub_path, rand_string));
    if base.exists() {
        fs::remove_dir_all(&base).await.unwrap();
    }
    let dirs = TestDirs {
        source_dir: base.join("source"),
        target_dir: base.join("target"),
        cache_dir: base.join("cache"),
        base,
    };
    fs::create_dir_all(&dirs.source_dir).await.unwrap();
    fs::create_dir_all(&dirs.target_dir).await.unwrap();
    fs::create_dir_all(&dirs.cache_dir).await.unwrap();
    dirs
}

/// A config builder writing into `dirs` with two workers.
#[allow(dead_code)]
pub fn test_config(dirs: &TestDirs) -> RepackConfigBuilder {
    let mut builder = kaiso::RepackConfig::builder();
    builder
        .cache_root(dirs.cache_dir.clone())
        .output_dir(dirs.target_dir.clone())
        .workers(2usize);
    builder
}

/// Encodes a small gradient image, so pages of the same size still differ.
#[allow(dead_code)]
pub fn png_bytes(width: u32, height: u32, seed: u8) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            seed.wrapping_mul(37),
        ])
    });
    let mut bytes = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut bytes, ImageFormat::Png)
        .unwrap();
    bytes.into_inner()
}

/// Encodes a small gradient image as JPEG.
#[allow(dead_code)]
pub fn jpeg_bytes(width: u32, height: u32, seed: u8) -> Vec<u8> {
    let img = image::load_from_memory(&png_bytes(width, height, seed)).unwrap();
    let mut bytes = Cursor::new(Vec::new());
    img.write_to(&mut bytes, ImageFormat::Jpeg).unwrap();
    bytes.into_inner()
}

/// Encodes a half-transparent RGBA PNG.
#[allow(dead_code)]
pub fn rgba_png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_pixel(width, height, Rgba([200, 40, 90, 128]));
    let mut bytes = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img)
        .write_to(&mut bytes, ImageFormat::Png)
        .unwrap();
    bytes.into_inner()
}

/// Writes a stored zip with `entries` in the given storage order.
#[allow(dead_code)]
pub fn create_zip(path: &Path, entries: &[(&str, Vec<u8>)]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut zip = ZipWriter::new(std::fs::File::create(path)?);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    for (name, data) in entries {
        zip.start_file(*name, options)?;
        zip.write_all(data)?;
    }
    zip.finish()?;
    Ok(())
}

/// Writes a book of 64x48 PNG pages named `names`, plus `corrupted` entries holding junk.
#[allow(dead_code)]
pub fn create_book(path: &Path, names: &[&str], corrupted: &[&str]) -> Result<()> {
    let mut entries: Vec<(&str, Vec<u8>)> = names
        .iter()
        .enumerate()
        .map(|(i, name)| (*name, png_bytes(64, 48, i as u8)))
        .collect();
    for name in corrupted {
        entries.push((*name, b"this is not an image".to_vec()));
    }
    create_zip(path, &entries)
}

/// Entry names of a zip file in storage order, directories excluded.
#[allow(dead_code)]
pub fn zip_entry_names(path: &Path) -> Vec<String> {
    let mut zip = ZipArchive::new(std::fs::File::open(path).unwrap()).unwrap();
    let mut names = Vec::new();
    for i in 0..zip.len() {
        let entry = zip.by_index(i).unwrap();
        if !entry.is_dir() {
            names.push(entry.name().to_string());
        }
    }
    names
}

/// The archive comment of a zip file.
#[allow(dead_code)]
pub fn zip_comment(path: &Path) -> String {
    let zip = ZipArchive::new(std::fs::File::open(path).unwrap()).unwrap();
    String::from_utf8_lossy(zip.comment()).to_string()
}

/// Compression method of one entry of a zip file.
#[allow(dead_code)]
pub fn zip_entry_method(path: &Path, name: &str) -> CompressionMethod {
    let mut zip = ZipArchive::new(std::fs::File::open(path).unwrap()).unwrap();
    let entry = zip.by_name(name).unwrap();
    entry.compression()
}

/// Decodes one entry of a zip file as an image.
#[allow(dead_code)]
pub fn read_zip_image(path: &Path, name: &str) -> DynamicImage {
    let mut zip = ZipArchive::new(std::fs::File::open(path).unwrap()).unwrap();
    let mut entry = zip.by_name(name).unwrap();
    let mut bytes = Vec::new();
    entry.read_to_end(&mut bytes).unwrap();
    image::load_from_memory(&bytes).unwrap()
}

/// Number of entries left in a directory.
#[allow(dead_code)]
pub fn dir_entry_count(path: &Path) -> usize {
    std::fs::read_dir(path).map(|dir| dir.count()).unwrap_or(0)
}

/// Every file below `root` with the given extension. A missing `root` yields nothing.
#[allow(dead_code)]
pub fn files_with_extension(root: &Path, extension: &str) -> Vec<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == extension))
        .map(|entry| entry.into_path())
        .collect()
}
