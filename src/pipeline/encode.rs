//! Image encoding: save rendered pages to disk and wrap image files for
//! engines that take base64 payloads.
//!
//! Pages are saved as PNG by default. JPEG is available for deployments
//! where disk or upload size matters more than text edges; quality is never
//! allowed below 75 because compression ringing around glyphs hurts OCR.

use crate::config::RasterFormat;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};
use std::fs::File;
use std::io::{BufWriter, Cursor};
use std::path::Path;
use tracing::debug;

/// Write a rendered page to `path` in the configured format.
pub fn save_page_image(
    img: &DynamicImage,
    path: &Path,
    format: RasterFormat,
) -> Result<(), image::ImageError> {
    match format {
        RasterFormat::Png => img.save_with_format(path, ImageFormat::Png)?,
        RasterFormat::Jpeg { quality } => {
            let writer = BufWriter::new(File::create(path)?);
            let mut encoder = JpegEncoder::new_with_quality(writer, quality.clamp(75, 100));
            encoder.encode_image(&img.to_rgb8())?;
        }
    }
    debug!(
        "Saved {}x{} page image → {}",
        img.width(),
        img.height(),
        path.display()
    );
    Ok(())
}

/// Base64 of raw file bytes, as layout-parsing services expect.
pub fn base64_payload(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Wrap an image file's bytes for a vision-model request.
///
/// PNG and JPEG pass through untouched. Anything else (BMP uploads) is
/// re-encoded as PNG since most VLM APIs only accept the common web formats.
pub fn vlm_image_data(bytes: &[u8]) -> Result<ImageData, image::ImageError> {
    let (payload, mime) = match image::guess_format(bytes)? {
        ImageFormat::Png => (STANDARD.encode(bytes), "image/png"),
        ImageFormat::Jpeg => (STANDARD.encode(bytes), "image/jpeg"),
        _ => {
            let img = image::load_from_memory(bytes)?;
            let mut buf = Vec::new();
            img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
            (STANDARD.encode(&buf), "image/png")
        }
    };
    debug!("Encoded image → {} bytes base64 ({})", payload.len(), mime);

    Ok(ImageData::new(payload, mime).with_detail("high"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn sample() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 8, Rgb([200, 30, 30])))
    }

    fn encoded(img: &DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), format).unwrap();
        buf
    }

    #[test]
    fn saves_png_and_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let png = dir.path().join("a_page_1.png");
        let jpg = dir.path().join("a_page_1.jpg");

        save_page_image(&sample(), &png, RasterFormat::Png).unwrap();
        save_page_image(&sample(), &jpg, RasterFormat::Jpeg { quality: 10 }).unwrap();

        let png_bytes = std::fs::read(&png).unwrap();
        let jpg_bytes = std::fs::read(&jpg).unwrap();
        assert_eq!(image::guess_format(&png_bytes).unwrap(), ImageFormat::Png);
        assert_eq!(image::guess_format(&jpg_bytes).unwrap(), ImageFormat::Jpeg);
        assert_eq!(image::load_from_memory(&png_bytes).unwrap().width(), 16);
    }

    #[test]
    fn png_passes_through_for_vlm() {
        let bytes = encoded(&sample(), ImageFormat::Png);
        let data = vlm_image_data(&bytes).unwrap();
        assert_eq!(data.mime_type, "image/png");
        assert_eq!(STANDARD.decode(&data.data).unwrap(), bytes);
    }

    #[test]
    fn bmp_is_reencoded_as_png() {
        let bytes = encoded(&sample(), ImageFormat::Bmp);
        let data = vlm_image_data(&bytes).unwrap();
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).unwrap();
        assert_eq!(image::guess_format(&decoded).unwrap(), ImageFormat::Png);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(vlm_image_data(b"definitely not an image").is_err());
    }
}
