//! Image and archive capabilities.
//!
//! The dispatcher hands these plain bytes and gets plain bytes back; none
//! of them touch a volume.

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};
use std::io::{Cursor, Write};
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

pub type MediaResult<T> = Result<T, MediaError>;

/// Content type for a file name, `application/octet-stream` when unknown.
pub fn mime_for(name: &str) -> String {
    mime_guess::from_path(name)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

pub fn is_image(name: &str) -> bool {
    mime_for(name).starts_with("image/")
}

/// Square PNG thumbnail.
pub fn thumbnail(data: &[u8], size: u32) -> MediaResult<Vec<u8>> {
    let img = image::load_from_memory(data)?;
    let thumb = img.resize_exact(size, size, FilterType::Triangle);
    encode(&thumb, ImageFormat::Png, None)
}

/// Pixel dimensions as (width, height).
pub fn dimensions(data: &[u8]) -> MediaResult<(u32, u32)> {
    Ok(image::load_from_memory(data)?.dimensions())
}

/// Edit applied by the `resize` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageOp {
    Resize { width: u32, height: u32 },
    Crop { x: u32, y: u32, width: u32, height: u32 },
    /// Clockwise, in multiples of 90 degrees.
    Rotate { degrees: i32 },
}

/// Apply `op` and re-encode in the format implied by `name`.
pub fn transform(data: &[u8], name: &str, op: ImageOp, quality: Option<u8>) -> MediaResult<Vec<u8>> {
    let format = ImageFormat::from_path(name)?;
    let img = image::load_from_memory(data)?;
    let edited = match op {
        ImageOp::Resize { width, height } => {
            if width == 0 || height == 0 {
                return Err(MediaError::Unsupported("zero-sized resize".into()));
            }
            img.resize_exact(width, height, FilterType::Lanczos3)
        }
        ImageOp::Crop { x, y, width, height } => {
            let (w, h) = img.dimensions();
            if width == 0 || height == 0 || x >= w || y >= h {
                return Err(MediaError::Unsupported("crop outside image".into()));
            }
            img.crop_imm(x, y, width.min(w - x), height.min(h - y))
        }
        ImageOp::Rotate { degrees } => match degrees.rem_euclid(360) {
            0 => img,
            90 => img.rotate90(),
            180 => img.rotate180(),
            270 => img.rotate270(),
            other => {
                return Err(MediaError::Unsupported(format!("rotation by {other} degrees")));
            }
        },
    };
    encode(&edited, format, quality)
}

fn encode(img: &DynamicImage, format: ImageFormat, quality: Option<u8>) -> MediaResult<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    if format == ImageFormat::Jpeg {
        // JPEG has no alpha channel
        let rgb = img.to_rgb8();
        let encoder = JpegEncoder::new_with_quality(&mut out, quality.unwrap_or(90).clamp(1, 100));
        rgb.write_with_encoder(encoder)?;
    } else {
        img.write_to(&mut out, format)?;
    }
    Ok(out.into_inner())
}

/// Zip archive of (path, bytes) entries. Paths ending in `/` become
/// directory entries.
pub fn zip_archive(entries: Vec<(String, Vec<u8>)>) -> MediaResult<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, data) in entries {
        if name.ends_with('/') {
            writer.add_directory(name, options)?;
        } else {
            writer.start_file(name, options)?;
            writer.write_all(&data)?;
        }
    }
    Ok(writer.finish()?.into_inner())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use std::io::Read;

    /// A small PNG for tests across the crate.
    pub(crate) fn sample_png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([200, 40, 40, 255]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn test_mime_for() {
        assert_eq!(mime_for("a.png"), "image/png");
        assert_eq!(mime_for("notes.txt"), "text/plain");
        assert_eq!(mime_for("blob"), "application/octet-stream");
        assert!(is_image("photo.JPG"));
    }

    #[test]
    fn test_thumbnail_is_square_png() {
        let thumb = thumbnail(&sample_png(120, 80), 48).unwrap();
        assert_eq!(image::guess_format(&thumb).unwrap(), ImageFormat::Png);
        assert_eq!(dimensions(&thumb).unwrap(), (48, 48));
    }

    #[test]
    fn test_transform_ops() {
        let png = sample_png(40, 20);
        let resized = transform(&png, "a.png", ImageOp::Resize { width: 10, height: 5 }, None).unwrap();
        assert_eq!(dimensions(&resized).unwrap(), (10, 5));

        let rotated = transform(&png, "a.png", ImageOp::Rotate { degrees: 90 }, None).unwrap();
        assert_eq!(dimensions(&rotated).unwrap(), (20, 40));

        let cropped = transform(
            &png,
            "a.jpg",
            ImageOp::Crop { x: 30, y: 0, width: 50, height: 10 },
            Some(80),
        )
        .unwrap();
        assert_eq!(image::guess_format(&cropped).unwrap(), ImageFormat::Jpeg);
        assert_eq!(dimensions(&cropped).unwrap(), (10, 10));

        assert!(matches!(
            transform(&png, "a.png", ImageOp::Rotate { degrees: 45 }, None),
            Err(MediaError::Unsupported(_))
        ));
    }

    #[test]
    fn test_zip_archive_contents() {
        let blob = zip_archive(vec![
            ("docs/".into(), Vec::new()),
            ("docs/a.txt".into(), b"alpha".to_vec()),
            ("b.txt".into(), b"beta".to_vec()),
        ])
        .unwrap();

        let mut archive = zip::ZipArchive::new(Cursor::new(blob)).unwrap();
        assert_eq!(archive.len(), 3);
        let mut content = String::new();
        archive
            .by_name("docs/a.txt")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "alpha");
    }
}
