use std::io::Cursor;

use anyhow::{bail, Context, Result};
use image::{imageops, DynamicImage, ImageFormat, Rgba, RgbaImage};
use vitrine_contracts::scene::{AspectRatio, ImageData};

/// Neutral gray the padded regions are filled with.
pub const OUTPAINT_FILL: Rgba<u8> = Rgba([128, 128, 128, 255]);

/// Longest side a padded canvas may have.
pub const MAX_CANVAS_SIDE: u32 = 8192;

/// Pads an image out to a target aspect ratio ahead of an outpainting call.
pub trait CanvasComposer: Send + Sync {
    fn compose_outpaint_canvas(&self, image: &ImageData, target: AspectRatio)
        -> Result<ImageData>;
}

/// Centers the source on a neutral canvas of the target ratio without
/// scaling it. Output is PNG.
#[derive(Debug, Clone, Copy)]
pub struct PaddedCanvasComposer {
    fill: Rgba<u8>,
}

impl Default for PaddedCanvasComposer {
    fn default() -> Self {
        Self {
            fill: OUTPAINT_FILL,
        }
    }
}

impl CanvasComposer for PaddedCanvasComposer {
    fn compose_outpaint_canvas(
        &self,
        image: &ImageData,
        target: AspectRatio,
    ) -> Result<ImageData> {
        let source = image::load_from_memory(image.as_bytes())
            .context("failed to decode base image for outpainting")?
            .to_rgba8();
        let (width, height) = padded_dims(source.width(), source.height(), target)?;
        let mut canvas = RgbaImage::from_pixel(width, height, self.fill);
        let x = (width - source.width()) / 2;
        let y = (height - source.height()) / 2;
        imageops::overlay(&mut canvas, &source, i64::from(x), i64::from(y));

        let mut encoded = Vec::new();
        DynamicImage::ImageRgba8(canvas)
            .write_to(&mut Cursor::new(&mut encoded), ImageFormat::Png)
            .context("failed to encode outpaint canvas")?;
        Ok(ImageData::new(encoded))
    }
}

/// Smallest canvas of the target ratio that contains `width x height`.
/// Fails when either side would exceed [`MAX_CANVAS_SIDE`].
fn padded_dims(width: u32, height: u32, target: AspectRatio) -> Result<(u32, u32)> {
    let tw = u64::from(target.width());
    let th = u64::from(target.height());
    let (w, h) = (u64::from(width), u64::from(height));
    let (padded_w, padded_h) = if w * th >= h * tw {
        (w, (w * th).div_ceil(tw))
    } else {
        ((h * tw).div_ceil(th), h)
    };
    let limit = u64::from(MAX_CANVAS_SIDE);
    if padded_w > limit || padded_h > limit {
        bail!(
            "padding {width}x{height} to {target} needs a {padded_w}x{padded_h} canvas (max side {MAX_CANVAS_SIDE})"
        );
    }
    Ok((padded_w as u32, padded_h as u32))
}
