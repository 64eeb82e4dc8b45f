use std::fs::File;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use crate::assembler::AssemblyEntry;
use crate::error::{Error, Result};
use crate::format::Format;
use crate::generator::{Generator, GeneratorSettings, map_page};
use crate::path_utils::path_to_string_lossy;
use async_trait::async_trait;
use epub_builder::{EpubBuilder, EpubContent, EpubVersion, ZipLibrary};

/// Directory holding page images inside the EPUB.
const IMAGE_DIR: &str = "images";

/// Generates XHTML content for an image to be included in the EPUB.
///
/// # Arguments
///
/// * `image_source` - Path to the image file relative to the EPUB content root
/// * `page_title` - Title of the page, also used as alt text
fn generate_xhtml(image_source: &str, page_title: &str) -> String {
    const TEMPLATE: &str = include_str!("../../templates/Epub.xhtml");
    TEMPLATE
        .replace("%title%", page_title)
        .replace("%src%", image_source)
        .replace("%alt%", page_title)
}

fn mime_of(entry: &AssemblyEntry) -> &'static str {
    entry
        .format
        .or_else(|| Format::from_extension(&entry.source))
        .map(|format| format.mime())
        .unwrap_or("application/octet-stream")
}

/// A generator for fixed-layout EPUB books, one XHTML page per image.
///
/// The first page doubles as the cover. Each chapter gets a table-of-contents entry on its
/// first page.
pub struct EPub {
    epub: EpubBuilder<ZipLibrary>,
    output_file: PathBuf,
    title: String,
    pages: usize,
    has_cover: bool,
}

impl EPub {
    async fn add_cover(&mut self, entry: &AssemblyEntry) -> Result<()> {
        let mmap = map_page(&entry.source).await?;
        let extension = entry
            .source
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        self.epub.add_cover_image(
            format!("{}/cover.{}", IMAGE_DIR, extension),
            Cursor::new(&mmap[..]),
            mime_of(entry),
        )?;
        self.has_cover = true;
        Ok(())
    }
}

#[async_trait]
impl Generator for EPub {
    fn new(output_file: &Path, settings: &GeneratorSettings) -> Result<Self> {
        let mut epub = EpubBuilder::new(ZipLibrary::new()?)?;
        epub.epub_version(EpubVersion::V30);
        epub.stylesheet(include_bytes!("../../templates/Epub.css").as_slice())?;

        let metadata = &settings.metadata;
        epub.metadata("title", &metadata.title)?;
        epub.metadata("creator", &metadata.author)?;
        epub.metadata("generator", "kaiso")?;
        epub.metadata("direction", settings.direction.to_string())?;
        epub.set_lang(&metadata.language);

        Ok(EPub {
            epub,
            output_file: output_file.to_path_buf(),
            title: metadata.title.clone(),
            pages: 0,
            has_cover: false,
        })
    }

    async fn add_chapter(&mut self, index: usize, entries: &[AssemblyEntry]) -> Result<&mut Self> {
        if !self.has_cover {
            if let Some(first) = entries.first() {
                self.add_cover(first).await?;
            }
        }

        for (i, entry) in entries.iter().enumerate() {
            self.pages += 1;
            let image_name = format!("{}/{}", IMAGE_DIR, entry.entry_name());
            let page_title = format!("Page {}", self.pages);
            let xhtml = generate_xhtml(&image_name, &page_title);

            let mmap = map_page(&entry.source).await?;
            self.epub
                .add_resource(&image_name, Cursor::new(&mmap[..]), mime_of(entry))?;

            let mut content =
                EpubContent::new(format!("page_{:04}.xhtml", self.pages), xhtml.as_bytes());
            if i == 0 {
                content = content.title(format!("{} - Chapter {}", self.title, index + 1));
            }
            self.epub.add_content(content)?;
        }
        Ok(self)
    }

    async fn save(mut self) -> Result<PathBuf> {
        let file = File::create(&self.output_file).map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!(
                    "Failed to create EPUB file '{}': {}",
                    path_to_string_lossy(&self.output_file),
                    e
                ),
            ))
        })?;

        self.epub.generate(file)?;
        Ok(self.output_file)
    }
}
