use anyhow::{Context, Result, bail};
use common::span;
use image::ImageFormat;
use schema::{Frame, RGB_CHANNELS};

/// Decodes raw camera payloads into RGB frames.
pub trait FrameDecoder: Send {
    fn decode(&mut self, raw: &[u8], width: u32, height: u32, sequence: u64) -> Result<Frame>;
}

/// YUYV (YUV 4:2:2): 2 pixels in 4 bytes, `[Y0, U, Y1, V]`.
#[derive(Debug, Default)]
pub struct YuyvDecoder;

impl FrameDecoder for YuyvDecoder {
    fn decode(&mut self, raw: &[u8], width: u32, height: u32, sequence: u64) -> Result<Frame> {
        let _s = span!("decode_yuyv");

        if height == 0 {
            bail!("YUYV frame with zero height");
        }
        let bytes_per_row = width as usize * 2;
        let stride = raw.len() / height as usize;
        if stride < bytes_per_row {
            bail!(
                "YUYV buffer too small: {} bytes for {}x{}",
                raw.len(),
                width,
                height
            );
        }

        let mut rgb = Vec::with_capacity(width as usize * height as usize * RGB_CHANNELS);
        for row in 0..height as usize {
            let row_start = row * stride;
            for chunk in raw[row_start..row_start + bytes_per_row].chunks_exact(4) {
                let y0 = chunk[0] as i32;
                let u = chunk[1] as i32 - 128;
                let y1 = chunk[2] as i32;
                let v = chunk[3] as i32 - 128;

                // BT.601, 8-bit fixed point
                let rv = (359 * v) >> 8;
                let gu = (88 * u + 183 * v) >> 8;
                let bu = (454 * u) >> 8;

                for y in [y0, y1] {
                    rgb.push((y + rv).clamp(0, 255) as u8);
                    rgb.push((y - gu).clamp(0, 255) as u8);
                    rgb.push((y + bu).clamp(0, 255) as u8);
                }
            }
        }

        Ok(Frame::new(sequence, width, height, rgb)?)
    }
}

/// MJPEG frames; dimensions come from the JPEG header.
#[derive(Debug, Default)]
pub struct MjpegDecoder;

impl FrameDecoder for MjpegDecoder {
    fn decode(&mut self, raw: &[u8], _width: u32, _height: u32, sequence: u64) -> Result<Frame> {
        let _s = span!("decode_mjpeg");
        decode_jpeg(raw, sequence)
    }
}

pub fn decode_jpeg(bytes: &[u8], sequence: u64) -> Result<Frame> {
    let image = image::load_from_memory_with_format(bytes, ImageFormat::Jpeg).context("decode jpeg")?;
    let rgb = image.into_rgb8();
    let (width, height) = rgb.dimensions();
    Ok(Frame::new(sequence, width, height, rgb.into_raw())?)
}
