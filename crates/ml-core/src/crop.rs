//! Crop/pad an image to a target aspect ratio and map normalized regions
//! between the source and the reshaped image.
//!
//! The new size `(w, h)` solves `w / h = r` with `W - w == h - H`, so the
//! same number of pixels is removed on one axis as is added on the other.
//! Too-wide sources are cropped horizontally and padded vertically with
//! flipped edge strips; too-tall sources are cropped vertically and padded
//! horizontally with mirrored strips.

use image::{ImageError, RgbImage, codecs::jpeg::JpegEncoder, imageops};
use thiserror::Error;

use crate::{affine::AffineMap, result::BoundingBox};

#[derive(Debug, Error)]
pub enum CropError {
    #[error("aspect ratio must be a positive finite number, got {0}")]
    InvalidAspectRatio(f64),
    #[error("cannot reshape an empty image")]
    EmptyImage,
    #[error(transparent)]
    Image(#[from] ImageError),
}

/// Both directions of the change of basis produced by [`crop_to_aspect`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropMaps {
    /// Source-normalized → cropped-normalized.
    pub to_cropped: AffineMap,
    /// Cropped-normalized → source-normalized.
    pub to_source: AffineMap,
}

#[derive(Debug, Clone)]
pub struct Cropped {
    pub image: RgbImage,
    pub maps: CropMaps,
}

/// Integer size closest to the `w / h = r`, `W - w = h - H` solution.
///
/// Halves round to even so sizes agree with the reference numeric stack.
pub fn target_size(width: u32, height: u32, aspect_ratio: f64) -> (u32, u32) {
    let h = ((width as f64 + height as f64) / (aspect_ratio + 1.0)).round_ties_even();
    let w = (h * aspect_ratio).round_ties_even();
    (w.max(1.0) as u32, h.max(1.0) as u32)
}

/// Reshape `image` to `aspect_ratio`, returning the new image and the maps
/// between both normalized coordinate spaces.
pub fn crop_to_aspect(image: &RgbImage, aspect_ratio: f64) -> Result<Cropped, CropError> {
    if !aspect_ratio.is_finite() || aspect_ratio <= 0.0 {
        return Err(CropError::InvalidAspectRatio(aspect_ratio));
    }
    let (src_w, src_h) = image.dimensions();
    if src_w == 0 || src_h == 0 {
        return Err(CropError::EmptyImage);
    }

    let (w, h) = target_size(src_w, src_h, aspect_ratio);
    let current = src_w as f64 / src_h as f64;
    let (reshaped, (dx, dy)) = if current < aspect_ratio {
        crop_vertical_pad_horizontal(image, w, h)
    } else {
        crop_horizontal_pad_vertical(image, w, h)
    };

    let to_cropped = AffineMap::normalize(w, h)
        * AffineMap::translation(dx, dy)
        * AffineMap::denormalize(src_w, src_h);
    let to_source = AffineMap::normalize(src_w, src_h)
        * AffineMap::translation(-dx, -dy)
        * AffineMap::denormalize(w, h);

    Ok(Cropped {
        image: reshaped,
        maps: CropMaps {
            to_cropped,
            to_source,
        },
    })
}

fn crop_vertical_pad_horizontal(image: &RgbImage, w: u32, h: u32) -> (RgbImage, (f64, f64)) {
    let (src_w, src_h) = image.dimensions();
    let ymin = src_h.saturating_sub(h) / 2;
    let offset = w.saturating_sub(src_w) / 2;
    let rest = w.saturating_sub(src_w).saturating_sub(offset);

    let band = imageops::crop_imm(image, 0, ymin, src_w, h).to_image();
    let mut reshaped = RgbImage::new(w, h);

    let left = imageops::flip_horizontal(&imageops::crop_imm(&band, 0, 0, offset, h).to_image());
    imageops::replace(&mut reshaped, &left, 0, 0);
    imageops::replace(&mut reshaped, &band, offset as i64, 0);
    let right = imageops::flip_horizontal(
        &imageops::crop_imm(&band, src_w.saturating_sub(rest), 0, rest, h).to_image(),
    );
    imageops::replace(&mut reshaped, &right, (offset + src_w) as i64, 0);

    (reshaped, (offset as f64, -(ymin as f64)))
}

fn crop_horizontal_pad_vertical(image: &RgbImage, w: u32, h: u32) -> (RgbImage, (f64, f64)) {
    let (src_w, src_h) = image.dimensions();
    let xmin = src_w.saturating_sub(w) / 2;
    let offset = h.saturating_sub(src_h) / 2;
    let rest = h.saturating_sub(src_h).saturating_sub(offset);

    let band = imageops::crop_imm(image, xmin, 0, w, src_h).to_image();
    let mut reshaped = RgbImage::new(w, h);

    let top = imageops::flip_vertical(&imageops::crop_imm(&band, 0, 0, w, offset).to_image());
    imageops::replace(&mut reshaped, &top, 0, 0);
    imageops::replace(&mut reshaped, &band, 0, offset as i64);
    let bottom = imageops::flip_vertical(
        &imageops::crop_imm(&band, 0, src_h.saturating_sub(rest), w, rest).to_image(),
    );
    imageops::replace(&mut reshaped, &bottom, 0, (offset + src_h) as i64);

    (reshaped, (-(xmin as f64), offset as f64))
}

/// Send both corners of `bbox` through `map`, clipping every coordinate to `[0, 1]`.
pub fn normalize_roi(bbox: &BoundingBox, map: &AffineMap) -> BoundingBox {
    let (xmin, ymin) = map.apply(bbox.xmin, bbox.ymin);
    let (xmax, ymax) = map.apply(bbox.xmax, bbox.ymax);
    BoundingBox::new(clip(xmin), clip(ymin), clip(xmax), clip(ymax))
}

fn clip(c: f64) -> f64 {
    c.clamp(0.0, 1.0)
}

/// Decode, reshape to `aspect_ratio` and re-encode as JPEG.
pub fn crop_and_encode(
    encoded: &[u8],
    aspect_ratio: f64,
    quality: u8,
) -> Result<(Vec<u8>, CropMaps), CropError> {
    let image = image::load_from_memory(encoded)?.to_rgb8();
    let cropped = crop_to_aspect(&image, aspect_ratio)?;
    Ok((encode_jpeg(&cropped.image, quality)?, cropped.maps))
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, ImageError> {
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100)).encode_image(image)?;
    Ok(buffer)
}
