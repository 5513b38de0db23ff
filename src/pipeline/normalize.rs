//! Image normalisation: force RGB and cap the dimensions sent to the VLM.
//!
//! Vision APIs downsample anything larger than roughly 2k px on their side
//! anyway, and alpha channels or palette/16-bit colour types either bloat
//! the PNG or trip provider-side decoders. Normalising here keeps request
//! sizes predictable.
//!
//! This stage is cosmetic: it never fails. A degenerate image is passed
//! through unchanged rather than blocking the page.

use image::imageops::FilterType;
use image::{ColorType, DynamicImage};
use tracing::{debug, warn};

/// Return an RGB image whose sides fit inside `max_size`, preserving aspect ratio.
///
/// Images are only ever shrunk, never upscaled.
pub fn normalize_image(image: DynamicImage, max_size: (u32, u32)) -> DynamicImage {
    let (width, height) = (image.width(), image.height());
    let (max_w, max_h) = max_size;

    if width == 0 || height == 0 || max_w == 0 || max_h == 0 {
        warn!(
            "Skipping normalisation of degenerate image {}x{} (bound {}x{})",
            width, height, max_w, max_h
        );
        return image;
    }

    let image = if image.color() == ColorType::Rgb8 {
        image
    } else {
        debug!("Converting {:?} image to RGB8", image.color());
        DynamicImage::ImageRgb8(image.to_rgb8())
    };

    if width <= max_w && height <= max_h {
        return image;
    }

    // `resize` fits the image inside the box while keeping the aspect ratio.
    let resized = image.resize(max_w, max_h, FilterType::Lanczos3);
    debug!(
        "Resized image from {}x{} to {}x{}",
        width,
        height,
        resized.width(),
        resized.height()
    );
    resized
}
