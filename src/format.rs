//! Page image formats.
//!
//! [`Format`] is the closed set of formats a page can be written as. Each variant carries its
//! canonical name, extension, MIME type, lossy flag and encode parameters, and knows how to
//! encode a [`DynamicImage`] through the `image` codecs (or `webp` for lossy WebP).

use std::fmt;
use std::io::Write;
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::codecs::webp::WebPEncoder;
use image::{ColorType, DynamicImage, ImageFormat};

use crate::error::{Error, Result};

/// Number of leading bytes needed to tell lossless from lossy WebP.
pub const WEBP_SNIFF_LEN: usize = 16;

/// PNG is always written with maximum effort.
const PNG_COMPRESSION_LEVEL: u8 = 9;
/// Lossless WebP treats "quality" as compression effort.
const WEBP_LOSSLESS_EFFORT: u8 = 100;

/// Output format of a single page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Format {
    Png,
    Jpeg,
    WebpLossless,
    WebpLossy,
}

/// Parameters handed to the encoder.
///
/// `quality` drives lossy encoders. `compression_level` is the effort of lossless encoders;
/// the two are not comparable across formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeParams {
    pub quality: u8,
    pub compression_level: u8,
}

/// Result of sniffing a raw image file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
    Known(Format),
    /// The codec recognised the data, but it is not a page format we write
    Unsupported(String),
    Unknown,
}

impl Format {
    /// Every format, in declaration order. Benchmarks keep this order for ties.
    pub const ALL: [Format; 4] = [
        Format::Png,
        Format::Jpeg,
        Format::WebpLossless,
        Format::WebpLossy,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Format::Png => "png",
            Format::Jpeg => "jpeg",
            Format::WebpLossless => "webpll",
            Format::WebpLossy => "webp",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Format::Png => "PNG",
            Format::Jpeg => "JPEG",
            Format::WebpLossless => "WebP Lossless",
            Format::WebpLossy => "WebP",
        }
    }

    /// File extension including the leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Format::Png => ".png",
            Format::Jpeg => ".jpg",
            Format::WebpLossless | Format::WebpLossy => ".webp",
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            Format::Png => "image/png",
            Format::Jpeg => "image/jpeg",
            Format::WebpLossless | Format::WebpLossy => "image/webp",
        }
    }

    pub fn is_lossy(&self) -> bool {
        matches!(self, Format::Jpeg | Format::WebpLossy)
    }

    /// Encode parameters for this format given the configured lossy quality.
    pub fn params(&self, quality: u8) -> EncodeParams {
        let quality = quality.min(100);
        match self {
            Format::Png => EncodeParams {
                quality: 0,
                compression_level: PNG_COMPRESSION_LEVEL,
            },
            Format::Jpeg | Format::WebpLossy => EncodeParams {
                quality,
                compression_level: 0,
            },
            Format::WebpLossless => EncodeParams {
                quality: WEBP_LOSSLESS_EFFORT,
                compression_level: WEBP_LOSSLESS_EFFORT,
            },
        }
    }

    /// Parses a format name as accepted on the command line.
    pub fn from_name(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(Format::Png),
            "jpeg" | "jpg" => Ok(Format::Jpeg),
            "webpll" => Ok(Format::WebpLossless),
            "webp" => Ok(Format::WebpLossy),
            other => Err(Error::Unsupported(format!("image format '{}'", other))),
        }
    }

    /// Best guess from a file extension, used when a page was never opened.
    pub fn from_extension(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "png" => Some(Format::Png),
            "jpg" | "jpeg" => Some(Format::Jpeg),
            "webp" => Some(Format::WebpLossy),
            _ => None,
        }
    }

    /// Encodes `img` into `writer`.
    ///
    /// Colour layouts an encoder cannot take are converted first: JPEG gets 8-bit RGB or luma,
    /// WebP gets 8-bit RGB(A).
    pub fn encode<W: Write>(&self, img: &DynamicImage, params: EncodeParams, writer: W) -> Result<()> {
        match self {
            Format::Png => {
                let compression = match params.compression_level {
                    0..=3 => CompressionType::Fast,
                    4..=6 => CompressionType::Default,
                    _ => CompressionType::Best,
                };
                let encoder = PngEncoder::new_with_quality(writer, compression, FilterType::Adaptive);
                img.write_with_encoder(encoder)?;
            }
            Format::Jpeg => {
                let encoder = JpegEncoder::new_with_quality(writer, params.quality.max(1));
                match img.color() {
                    ColorType::L8 | ColorType::Rgb8 => img.write_with_encoder(encoder)?,
                    ColorType::L16 | ColorType::La8 | ColorType::La16 => {
                        DynamicImage::ImageLuma8(img.to_luma8()).write_with_encoder(encoder)?
                    }
                    _ => DynamicImage::ImageRgb8(img.to_rgb8()).write_with_encoder(encoder)?,
                }
            }
            Format::WebpLossless => {
                let encoder = WebPEncoder::new_lossless(writer);
                match img.color() {
                    ColorType::L8 | ColorType::La8 | ColorType::Rgb8 | ColorType::Rgba8 => {
                        img.write_with_encoder(encoder)?
                    }
                    color if color.has_alpha() => {
                        DynamicImage::ImageRgba8(img.to_rgba8()).write_with_encoder(encoder)?
                    }
                    _ => DynamicImage::ImageRgb8(img.to_rgb8()).write_with_encoder(encoder)?,
                }
            }
            Format::WebpLossy => encode_webp_lossy(img, params.quality, writer)?,
        }
        Ok(())
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

fn encode_webp_lossy<W: Write>(img: &DynamicImage, quality: u8, mut writer: W) -> Result<()> {
    let converted;
    let source = match img {
        DynamicImage::ImageRgb8(_) | DynamicImage::ImageRgba8(_) => img,
        other if other.color().has_alpha() => {
            converted = DynamicImage::ImageRgba8(other.to_rgba8());
            &converted
        }
        other => {
            converted = DynamicImage::ImageRgb8(other.to_rgb8());
            &converted
        }
    };
    let encoder = webp::Encoder::from_image(source).map_err(|e| Error::Encode(e.to_string()))?;
    let memory = encoder.encode(quality as f32);
    writer.write_all(&memory)?;
    Ok(())
}

/// Tells lossless from lossy WebP by the chunk tag in the file header.
///
/// Returns `None` when the header is not a WebP RIFF container.
pub fn sniff_webp(header: &[u8]) -> Option<Format> {
    if header.len() < WEBP_SNIFF_LEN || &header[0..4] != b"RIFF" || &header[8..12] != b"WEBP" {
        return None;
    }
    if header[WEBP_SNIFF_LEN - 1] == b'L' {
        Some(Format::WebpLossless)
    } else {
        Some(Format::WebpLossy)
    }
}

/// Detects the page format of raw file data. The WebP sniff takes precedence over the
/// generic codec guess.
pub fn detect(bytes: &[u8]) -> Detection {
    if let Some(format) = sniff_webp(bytes) {
        return Detection::Known(format);
    }
    match image::guess_format(bytes) {
        Ok(ImageFormat::Png) => Detection::Known(Format::Png),
        Ok(ImageFormat::Jpeg) => Detection::Known(Format::Jpeg),
        Ok(other) => Detection::Unsupported(format!("{:?}", other)),
        Err(_) => Detection::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn webp_header(tag: &[u8; 4]) -> Vec<u8> {
        let mut header = b"RIFF\x10\x00\x00\x00WEBP".to_vec();
        header.extend_from_slice(tag);
        header
    }

    #[test]
    fn test_sniff_webp_variants() {
        assert_eq!(sniff_webp(&webp_header(b"VP8L")), Some(Format::WebpLossless));
        assert_eq!(sniff_webp(&webp_header(b"VP8 ")), Some(Format::WebpLossy));
        assert_eq!(sniff_webp(b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR"), None);
        assert_eq!(sniff_webp(b"RIFF"), None);
    }

    #[test]
    fn test_detect_prefers_sniff() {
        assert_eq!(detect(&webp_header(b"VP8L")), Detection::Known(Format::WebpLossless));
        assert_eq!(detect(b"not an image at all"), Detection::Unknown);
        assert!(matches!(detect(b"GIF89a\x01\x00\x01\x00"), Detection::Unsupported(_)));
    }

    #[test]
    fn test_format_names_round_trip() {
        for format in Format::ALL {
            assert_eq!(Format::from_name(format.name()).unwrap(), format);
        }
        assert_eq!(Format::from_name("JPG").unwrap(), Format::Jpeg);
        assert!(Format::from_name("bmp").is_err());
    }

    #[test]
    fn test_params_meaning_differs_per_format() {
        assert_eq!(Format::Jpeg.params(75).quality, 75);
        assert_eq!(Format::Png.params(75).compression_level, 9);
        assert_eq!(Format::WebpLossless.params(10).quality, 100);
        assert!(Format::WebpLossy.is_lossy());
        assert!(!Format::Png.is_lossy());
    }
}
