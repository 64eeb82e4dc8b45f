use crate::assembler::AssemblyEntry;
use crate::error::{Error, Result};
use crate::generator::{ARCHIVE_COMMENT, Generator, GeneratorSettings, map_page};
use async_trait::async_trait;
use log::debug;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::task::spawn_blocking;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Deflate level used when compression is requested.
const DEFLATE_LEVEL: i64 = 9;

/// A generator for zip-family books (CBZ and plain ZIP).
///
/// Pages are written under their assembled entry names, so the reading order survives any
/// reader that sorts entries by name.
pub struct Cbz {
    zip: Option<ZipWriter<File>>,
    options: SimpleFileOptions,
    output_file: PathBuf,
    pages: usize,
}

impl Cbz {
    fn writer(&mut self) -> Result<&mut ZipWriter<File>> {
        self.zip
            .as_mut()
            .ok_or_else(|| Error::Unsupported("Zip writer not available".to_string()))
    }
}

#[async_trait]
impl Generator for Cbz {
    fn new(output_file: &Path, settings: &GeneratorSettings) -> Result<Self> {
        let options = SimpleFileOptions::default().unix_permissions(0o644);
        let options = if settings.compress {
            options
                .compression_method(CompressionMethod::Deflated)
                .compression_level(Some(DEFLATE_LEVEL))
        } else {
            options.compression_method(CompressionMethod::Stored)
        };

        let file = File::create(output_file)?;
        let mut zip = ZipWriter::new(file);
        zip.set_comment(ARCHIVE_COMMENT);

        Ok(Cbz {
            zip: Some(zip),
            options,
            output_file: output_file.to_path_buf(),
            pages: 0,
        })
    }

    async fn add_chapter(&mut self, index: usize, entries: &[AssemblyEntry]) -> Result<&mut Self> {
        debug!("{:?}: chapter {} with {} pages", self.output_file, index + 1, entries.len());
        let options = self.options;
        for entry in entries {
            let mmap = map_page(&entry.source).await?;
            let zip = self.writer()?;
            zip.start_file(entry.entry_name(), options)?;
            zip.write_all(&mmap[..])?;
            self.pages += 1;
        }
        Ok(self)
    }

    async fn save(mut self) -> Result<PathBuf> {
        let zip = self
            .zip
            .take()
            .ok_or_else(|| Error::Unsupported("Zip writer not available".to_string()))?;

        spawn_blocking(move || zip.finish().map(|_| ()).map_err(Error::Zip)).await??;
        debug!("{:?}: wrote {} pages", self.output_file, self.pages);
        Ok(self.output_file)
    }
}
