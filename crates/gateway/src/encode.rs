use anyhow::{Context, Result};
use image::ExtendedColorType;
use image::codecs::jpeg::JpegEncoder;
use schema::Frame;

pub const JPEG_QUALITY: u8 = 80;

/// Encode an RGB frame as JPEG.
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>> {
    let mut jpeg = Vec::with_capacity(frame.pixels().len() / 8);
    JpegEncoder::new_with_quality(&mut jpeg, quality)
        .encode(
            frame.pixels(),
            frame.width(),
            frame.height(),
            ExtendedColorType::Rgb8,
        )
        .with_context(|| format!("encode {}x{} frame", frame.width(), frame.height()))?;
    Ok(jpeg)
}
