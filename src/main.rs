use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{ArgAction, Parser};
use log::{error, info, warn};
use tracing_subscriber::EnvFilter;

use kaiso::error::Result;
use kaiso::prelude::*;

/// Exit code of a run stopped by Ctrl-C.
const EXIT_CANCELLED: u8 = 130;

#[derive(Parser, Debug)]
#[command(name = "kaiso")]
#[command(version, about = "Repack comic/manga archives with converted pages", long_about = None)]
struct Cli {
    /// Source containers (.cbz / .zip)
    #[arg(value_name = "INPUT", required = true)]
    inputs: Vec<PathBuf>,

    /// Compare page formats on a sample and write nothing
    #[arg(short, long, conflicts_with = "auto")]
    benchmark: bool,

    /// Benchmark first, then repack with the smallest format
    #[arg(short, long)]
    auto: bool,

    /// Page format: png, jpeg, webp or webpll. Keeps the source format if unset
    #[arg(short = 'F', long, value_parser = parse_format)]
    format: Option<Format>,

    /// Quality of lossy page formats
    #[arg(short = 'Q', long, default_value_t = 80, value_parser = clap::value_parser!(u8).range(0..=100))]
    quality: u8,

    /// Target viewport as WIDTHxHEIGHT, e.g. 1440x1920
    #[arg(short = 'S', long, value_parser = parse_size)]
    size: Option<(u32, u32)>,

    /// Stretch pages to the viewport instead of fitting them inside it
    #[arg(long)]
    no_keep_ratio: bool,

    /// Convert pages to grayscale
    #[arg(short, long)]
    grayscale: bool,

    /// Don't enlarge pages smaller than the viewport
    #[arg(long)]
    no_upscale: bool,

    /// Don't shrink pages larger than the viewport
    #[arg(long)]
    no_downscale: bool,

    /// Fail on the first unreadable page instead of skipping it
    #[arg(long)]
    strict: bool,

    /// Pages sampled per format when benchmarking
    #[arg(long, default_value_t = 5)]
    samples: usize,

    /// Worker threads, 0 for automatic
    #[arg(short, long, default_value_t = 0)]
    processes: usize,

    /// Output book format: cbz, zip, epub or mobi
    #[arg(short = 'A', long, default_value = "cbz", value_parser = parse_book_format)]
    archive_format: FileFormat,

    /// Deflate zip entries instead of storing them
    #[arg(short, long)]
    compress: bool,

    /// Right-to-left reading direction (EPUB)
    #[arg(long)]
    rtl: bool,

    /// Output directory, defaults to the directory of each input
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// More logging, repeat for debug output
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

fn parse_format(s: &str) -> std::result::Result<Format, String> {
    Format::from_name(s).map_err(|e| e.to_string())
}

fn parse_book_format(s: &str) -> std::result::Result<FileFormat, String> {
    FileFormat::from_name(s).map_err(|e| e.to_string())
}

fn parse_size(s: &str) -> std::result::Result<(u32, u32), String> {
    let (width, height) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", s))?;
    let width = width.trim().parse().map_err(|_| format!("invalid width '{}'", width))?;
    let height = height.trim().parse().map_err(|_| format!("invalid height '{}'", height))?;
    Ok((width, height))
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, _) => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn build_config(cli: &Cli) -> Result<RepackConfig> {
    let mut builder = RepackConfig::builder();
    builder
        .quality(cli.quality)
        .keep_ratio(!cli.no_keep_ratio)
        .grayscale(cli.grayscale)
        .no_upscale(cli.no_upscale)
        .no_downscale(cli.no_downscale)
        .ignore_page_errors(!cli.strict)
        .samples_count(cli.samples)
        .workers(cli.processes)
        .archive_format(cli.archive_format)
        .compress_zip(cli.compress)
        .reading_direction(if cli.rtl { Direction::Rtl } else { Direction::Ltr });
    if let Some(format) = cli.format {
        builder.image_format(format);
    }
    if let Some(size) = cli.size {
        builder.size(size);
    }
    if let Some(dir) = &cli.output_dir {
        builder.output_dir(dir.clone());
    }
    Ok(builder.build()?)
}

fn print_summary(summary: &RepackSummary) {
    println!(
        "{}: {} in {:.2}s",
        summary.output_name(),
        summary.summary(),
        summary.elapsed.as_secs_f64()
    );
    if !summary.skipped.is_empty() {
        println!("Skipped {} unreadable pages:", summary.skipped.len());
        for path in &summary.skipped {
            println!("  {}", path.display());
        }
    }
}

async fn run(cli: &Cli, config: &RepackConfig, input: &Path, cancel: CancelToken) -> Result<()> {
    if cli.benchmark {
        let report = config.benchmark(input, cancel).await?;
        println!("{}", report.summary());
    } else if cli.auto {
        let (report, summary) = config.auto_repack(input, cancel).await?;
        println!("{}", report.summary());
        print_summary(&summary);
    } else {
        let summary = config.repack(input, cancel).await?;
        print_summary(&summary);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let cancel = CancelToken::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if watcher.cancel() {
                warn!("Interrupted, waiting for pages in flight...");
            } else {
                warn!("Already cancelling, please wait");
            }
        }
    });

    let config = match build_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    for input in &cli.inputs {
        info!("Processing {:?}", input);
        match run(&cli, &config, input, cancel.clone()).await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => {
                warn!("{:?}: {}", input, e);
                return ExitCode::from(EXIT_CANCELLED);
            }
            Err(e) => {
                error!("{:?}: {}", input, e);
                return ExitCode::FAILURE;
            }
        }
    }
    ExitCode::SUCCESS
}
