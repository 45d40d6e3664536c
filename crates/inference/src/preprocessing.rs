use common::span;
use fast_image_resize::{FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer, images::Image};
use ndarray::{Array, IxDyn};
use schema::{BoundingBox, Frame, RGB_CHANNELS};

const LETTERBOX_COLOR: u8 = 114;
const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// How a frame was fitted into the model input, so model-space boxes can be
/// mapped back onto the frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxTransform {
    pub scale: f32,
    pub offset_x: f32,
    pub offset_y: f32,
}

impl LetterboxTransform {
    pub const IDENTITY: Self = Self {
        scale: 1.0,
        offset_x: 0.0,
        offset_y: 0.0,
    };

    /// Map corner coordinates in model input space back to frame pixels.
    pub fn to_frame(&self, x1: f32, y1: f32, x2: f32, y2: f32) -> BoundingBox {
        BoundingBox::from_corners(
            (x1 - self.offset_x) / self.scale,
            (y1 - self.offset_y) / self.scale,
            (x2 - self.offset_x) / self.scale,
            (y2 - self.offset_y) / self.scale,
        )
    }
}

/// Resizes frames into a fixed model input and normalizes them into an NCHW
/// tensor. Buffers are reused between frames.
pub struct PreProcessor {
    pub input_size: (u32, u32),
    rgb_buffer: Vec<u8>,
    letterboxed_buffer: Vec<u8>,
}

impl PreProcessor {
    pub fn new(input_size: (u32, u32)) -> Self {
        Self {
            input_size,
            rgb_buffer: Vec::with_capacity(640 * 480 * RGB_CHANNELS),
            letterboxed_buffer: vec![
                LETTERBOX_COLOR;
                input_size.0 as usize * input_size.1 as usize * RGB_CHANNELS
            ],
        }
    }

    pub fn preprocess(
        &mut self,
        frame: &Frame,
    ) -> anyhow::Result<(Array<f32, IxDyn>, LetterboxTransform)> {
        let _s = span!("preprocess_frame");

        tracing::trace!(
            width = frame.width(),
            height = frame.height(),
            "Preprocessing frame"
        );

        self.rgb_buffer.clear();
        self.rgb_buffer.extend_from_slice(frame.pixels());

        let (transform, resized) = self.resize_and_letterbox(frame.width(), frame.height())?;
        let input = normalize(&resized)?;

        Ok((input, transform))
    }

    fn resize_and_letterbox(
        &mut self,
        width: u32,
        height: u32,
    ) -> anyhow::Result<(LetterboxTransform, Image<'_>)> {
        let (input_w, input_h) = self.input_size;
        let scale = (input_w as f32 / width as f32).min(input_h as f32 / height as f32);
        let new_width = ((width as f32 * scale) as u32).clamp(1, input_w);
        let new_height = ((height as f32 * scale) as u32).clamp(1, input_h);

        let offset_x = (input_w - new_width) / 2;
        let offset_y = (input_h - new_height) / 2;

        let src = Image::from_slice_u8(width, height, &mut self.rgb_buffer, PixelType::U8x3)?;
        let mut resized = Image::new(new_width, new_height, PixelType::U8x3);

        Resizer::new().resize(
            &src,
            &mut resized,
            &ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Bilinear)),
        )?;

        self.letterboxed_buffer.fill(LETTERBOX_COLOR);

        let resized_data = resized.buffer();
        let row_bytes = new_width as usize * RGB_CHANNELS;
        let stride = input_w as usize * RGB_CHANNELS;

        for y in 0..new_height as usize {
            let src_row = y * row_bytes;
            let dst_row = (y + offset_y as usize) * stride + offset_x as usize * RGB_CHANNELS;
            self.letterboxed_buffer[dst_row..dst_row + row_bytes]
                .copy_from_slice(&resized_data[src_row..src_row + row_bytes]);
        }

        let image = Image::from_slice_u8(
            input_w,
            input_h,
            &mut self.letterboxed_buffer,
            PixelType::U8x3,
        )?;

        Ok((
            LetterboxTransform {
                scale,
                offset_x: offset_x as f32,
                offset_y: offset_y as f32,
            },
            image,
        ))
    }
}

/// ImageNet mean/std normalization into `[1, 3, H, W]`.
fn normalize(image: &Image) -> anyhow::Result<Array<f32, IxDyn>> {
    let _s = span!("normalize");

    let width = image.width() as usize;
    let height = image.height() as usize;
    let spatial = width * height;

    let mut output = vec![0.0f32; 3 * spatial];
    for (i, px) in image.buffer().chunks_exact(3).enumerate() {
        for c in 0..3 {
            let v = px[c] as f32 / 255.0;
            output[i + c * spatial] = (v - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
        }
    }

    Ok(Array::from_shape_vec(IxDyn(&[1, 3, height, width]), output)?)
}
