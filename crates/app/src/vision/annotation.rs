//! Overlay drawing: detection boxes and text tags on translucent backgrounds.
//!
//! All styling lives in an [`OverlayStyle`] built once at startup and shared by
//! reference; per-call choices (alignment, thresholds) come from
//! [`RenderOptions`].

use std::sync::Arc;

use ab_glyph::{FontVec, PxScale};
use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::{
    drawing::{draw_hollow_rect_mut, draw_text_mut, text_size},
    rect::Rect,
};
use ml_core::{InferenceResult, Prediction};

pub(crate) const DEFAULT_FONT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
pub(crate) const DEFAULT_BOX_COLOR: Rgb<u8> = Rgb([34, 165, 247]);
pub(crate) const BOX_THICKNESS: u32 = 5;
pub(crate) const SCORE_DECIMAL_PRECISION: usize = 4;

const TAG_TEXT_CORNER: (f32, f32) = (10.0, 10.0);
const TAG_TEXT_INTERSPACE: f32 = 5.0;
const DETECTION_LABEL_INSET: f32 = 10.0;
const BASE_FONT_SIZE: f32 = 48.0;
const CLASSIFICATION_FONT_RATIO: f32 = 1.0;
const DETECTION_FONT_RATIO: f32 = 0.6;
const BACKGROUND_DARKEN: f64 = 0.4;
const BACKGROUND_OPACITY: f32 = 0.8;
/// Classification tags in preview mode sit this far down the image.
const PREVIEW_BAND: f32 = 3.8 / 5.0;

/// Vertical placement of classification tags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum VerticalAlign {
    #[default]
    Top,
    Center,
    /// Lower band, readable on phone previews.
    Preview,
}

/// Immutable drawing style shared by every renderer.
pub(crate) struct OverlayStyle {
    pub(crate) font_color: Rgb<u8>,
    pub(crate) box_color: Rgb<u8>,
    pub(crate) background: Rgb<u8>,
    pub(crate) background_opacity: f32,
    pub(crate) font_scale_pct: u32,
    pub(crate) box_thickness: u32,
    font: Option<FontVec>,
}

impl OverlayStyle {
    /// Without a TrueType `font` labels use the built-in bitmap face.
    pub(crate) fn new(
        font_color: Rgb<u8>,
        box_color: Rgb<u8>,
        font_scale_pct: u32,
        font: Option<FontVec>,
    ) -> Self {
        Self {
            font_color,
            box_color,
            background: darken(box_color, BACKGROUND_DARKEN),
            background_opacity: BACKGROUND_OPACITY,
            font_scale_pct,
            box_thickness: BOX_THICKNESS,
            font,
        }
    }

    /// Pixel font size for classification tags or detection labels.
    pub(crate) fn font_size(&self, classification: bool) -> f32 {
        let ratio = if classification {
            CLASSIFICATION_FONT_RATIO
        } else {
            DETECTION_FONT_RATIO
        };
        (BASE_FONT_SIZE * ratio * self.font_scale_pct as f32 / 100.0)
            .trunc()
            .max(1.0)
    }

    fn measure(&self, text: &str, size: f32) -> (f32, f32) {
        let (w, h) = match &self.font {
            Some(font) => text_size(PxScale::from(size), font, text),
            None => bitmap::measure(text, bitmap::unit(size)),
        };
        (w as f32, h as f32)
    }

    fn draw_text(&self, image: &mut RgbImage, origin: (i32, i32), size: f32, text: &str) {
        match &self.font {
            Some(font) => draw_text_mut(
                image,
                self.font_color,
                origin.0,
                origin.1,
                PxScale::from(size),
                font,
                text,
            ),
            None => bitmap::draw(image, origin, bitmap::unit(size), text, self.font_color),
        }
    }
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self::new(DEFAULT_FONT_COLOR, DEFAULT_BOX_COLOR, 100, None)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct RenderOptions {
    pub(crate) draw_labels: bool,
    pub(crate) draw_scores: bool,
    /// Stop after the highest-scoring classification tag.
    pub(crate) only_first_tag: bool,
    pub(crate) hcenter: bool,
    pub(crate) valign: VerticalAlign,
    pub(crate) max_detections: usize,
    pub(crate) min_detection_score: f32,
    pub(crate) min_classification_score: f32,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            draw_labels: true,
            draw_scores: false,
            only_first_tag: true,
            hcenter: false,
            valign: VerticalAlign::Top,
            max_detections: 5,
            min_detection_score: 0.3,
            min_classification_score: 0.0,
        }
    }
}

impl RenderOptions {
    /// Centered single tag in the lower band, as shown on device previews.
    pub(crate) fn preview() -> Self {
        Self {
            hcenter: true,
            valign: VerticalAlign::Preview,
            ..Self::default()
        }
    }
}

/// What a single render call put on the image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct RenderSummary {
    pub(crate) tags: usize,
    pub(crate) boxes: usize,
}

/// Placed label: background rectangle and text origin, in pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct LabelBox {
    pub(crate) left: f32,
    pub(crate) top: f32,
    pub(crate) right: f32,
    pub(crate) bottom: f32,
    pub(crate) text_x: f32,
    pub(crate) text_y: f32,
}

/// Text margins `(horizontal, vertical)` for a label of the given text height.
fn margins(text_height: f32) -> (f32, f32) {
    let vertical = (0.1 * text_height).max(1.0);
    (vertical + 4.0, vertical)
}

/// Place a label whose ideal top-left corner is `anchor`.
///
/// A label overflowing the right or bottom edge is shifted left/up just
/// enough to fit; the result never has negative coordinates.
pub(crate) fn fit_label(anchor: (f32, f32), text: (f32, f32), image: (u32, u32)) -> LabelBox {
    let (margin_w, margin_h) = margins(text.1);
    let full_w = text.0 + 2.0 * margin_w;
    let full_h = text.1 + 2.0 * margin_h;

    let x_offset = (anchor.0 + full_w - image.0 as f32 + 1.0).max(0.0);
    let y_offset = (anchor.1 + full_h - image.1 as f32 + 1.0).max(0.0);
    let left = (anchor.0 - x_offset).max(0.0);
    let top = (anchor.1 - y_offset).max(0.0);

    LabelBox {
        left,
        top,
        right: left + full_w,
        bottom: top + full_h,
        text_x: left + margin_w,
        text_y: top + margin_h,
    }
}

/// Score rounded to at most `precision` decimals, trailing zeros dropped.
pub(crate) fn format_score(score: f32, precision: usize) -> String {
    let mut text = format!("{score:.precision$}");
    if text.contains('.') {
        while text.ends_with('0') {
            text.pop();
        }
        if text.ends_with('.') {
            text.push('0');
        }
    }
    text
}

pub(crate) struct AnnotationRenderer {
    style: Arc<OverlayStyle>,
    options: RenderOptions,
}

impl AnnotationRenderer {
    pub(crate) fn new(style: Arc<OverlayStyle>, options: RenderOptions) -> Self {
        Self { style, options }
    }

    /// Draw `result` onto `image` in place.
    ///
    /// Classification tags come first, highest score on top; detections follow
    /// in result order. An empty result leaves the image untouched.
    pub(crate) fn render(&self, image: &mut RgbImage, result: &InferenceResult) -> RenderSummary {
        let mut summary = RenderSummary::default();
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 || result.is_empty() {
            return summary;
        }

        for tag in result.classifications_by_score() {
            if tag.score() < self.options.min_classification_score {
                continue;
            }
            let Some(text) = self.label_text(tag) else {
                continue;
            };
            let size = self.style.font_size(true);
            let (tw, th) = self.style.measure(&text, size);
            let (margin_w, _) = margins(th);

            let left = if self.options.hcenter {
                (width as f32 - tw - 2.0 * margin_w) / 2.0
            } else {
                TAG_TEXT_CORNER.0
            };
            let top = match self.options.valign {
                VerticalAlign::Top => TAG_TEXT_CORNER.1,
                VerticalAlign::Center => (height as f32 - th) / 2.0,
                VerticalAlign::Preview => height as f32 * PREVIEW_BAND - th / 2.0,
            } + summary.tags as f32 * (th + TAG_TEXT_INTERSPACE);

            self.draw_label(image, (left, top), (tw, th), size, &text);
            summary.tags += 1;
            if self.options.only_first_tag {
                break;
            }
        }

        for detection in result.detections() {
            if summary.boxes >= self.options.max_detections {
                break;
            }
            if detection.score() < self.options.min_detection_score {
                continue;
            }
            let (Some(bbox), Some(text)) = (detection.bbox(), self.label_text(detection)) else {
                continue;
            };
            let (xmin, ymin, xmax, ymax) = bbox.to_pixels(width, height);
            draw_box_outline(
                image,
                (xmin, ymin, xmax, ymax),
                self.style.box_thickness,
                self.style.box_color,
            );
            summary.boxes += 1;

            let size = self.style.font_size(false);
            let (tw, th) = self.style.measure(&text, size);
            let (margin_w, _) = margins(th);
            let left = if self.options.hcenter {
                xmin as f32 + ((xmax - xmin) as f32 - tw - 2.0 * margin_w) / 2.0
            } else {
                xmin as f32 + DETECTION_LABEL_INSET
            };
            let top = ymin as f32 + self.style.box_thickness as f32 + DETECTION_LABEL_INSET;
            self.draw_label(image, (left, top), (tw, th), size, &text);
        }

        summary
    }

    /// Decode, annotate and re-encode a JPEG (or any supported image) payload.
    pub(crate) fn annotate_encoded(
        &self,
        encoded: &[u8],
        result: &InferenceResult,
        quality: u8,
    ) -> Result<Vec<u8>> {
        let mut image = image::load_from_memory(encoded)
            .context("failed to decode image payload")?
            .to_rgb8();
        self.render(&mut image, result);
        ml_core::crop::encode_jpeg(&image, quality).context("failed to encode annotated image")
    }

    fn label_text(&self, prediction: &Prediction) -> Option<String> {
        let mut text = String::new();
        if self.options.draw_labels {
            text.push_str(prediction.label());
        }
        if self.options.draw_labels && self.options.draw_scores {
            text.push(' ');
        }
        if self.options.draw_scores {
            text.push_str(&format_score(prediction.score(), SCORE_DECIMAL_PRECISION));
        }
        (!text.is_empty()).then_some(text)
    }

    fn draw_label(
        &self,
        image: &mut RgbImage,
        anchor: (f32, f32),
        text_dims: (f32, f32),
        size: f32,
        text: &str,
    ) {
        let placed = fit_label(anchor, text_dims, image.dimensions());
        blend_rect(
            image,
            &placed,
            self.style.background,
            self.style.background_opacity,
        );
        let origin = (placed.text_x.round() as i32, placed.text_y.round() as i32);
        self.style.draw_text(image, origin, size, text);
    }
}

/// Rectangle outline of `thickness` pixels growing inward from the corners.
fn draw_box_outline(
    image: &mut RgbImage,
    corners: (i32, i32, i32, i32),
    thickness: u32,
    color: Rgb<u8>,
) {
    let (x0, y0, x1, y1) = corners;
    let (left, right) = (x0.min(x1), x0.max(x1));
    let (top, bottom) = (y0.min(y1), y0.max(y1));
    for inset in 0..thickness as i32 {
        let (l, t, r, b) = (left + inset, top + inset, right - inset, bottom - inset);
        if r < l || b < t {
            break;
        }
        let rect = Rect::at(l, t).of_size((r - l + 1) as u32, (b - t + 1) as u32);
        draw_hollow_rect_mut(image, rect, color);
    }
}

fn blend_rect(image: &mut RgbImage, area: &LabelBox, color: Rgb<u8>, opacity: f32) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    let left = (area.left.round() as i32).clamp(0, width);
    let top = (area.top.round() as i32).clamp(0, height);
    let right = (area.right.round() as i32).clamp(0, width - 1);
    let bottom = (area.bottom.round() as i32).clamp(0, height - 1);

    for y in top..=bottom {
        for x in left..=right {
            let pixel = image.get_pixel_mut(x as u32, y as u32);
            for (channel, tint) in pixel.0.iter_mut().zip(color.0) {
                let mixed = tint as f32 * opacity + *channel as f32 * (1.0 - opacity);
                *channel = mixed.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}

fn darken(color: Rgb<u8>, factor: f64) -> Rgb<u8> {
    adjust_lightness(color, 1.0 - factor)
}

fn adjust_lightness(color: Rgb<u8>, factor: f64) -> Rgb<u8> {
    let [r, g, b] = color.0.map(|c| c as f64 / 255.0);
    let (h, l, s) = rgb_to_hls(r, g, b);
    let (r, g, b) = hls_to_rgb(h, (l * factor).clamp(0.0, 1.0), s);
    Rgb([(r * 255.0) as u8, (g * 255.0) as u8, (b * 255.0) as u8])
}

fn rgb_to_hls(r: f64, g: f64, b: f64) -> (f64, f64, f64) {
    let maxc = r.max(g).max(b);
    let minc = r.min(g).min(b);
    let sum = maxc + minc;
    let range = maxc - minc;
    let l = sum / 2.0;
    if range == 0.0 {
        return (0.0, l, 0.0);
    }
    let s = if l <= 0.5 {
        range / sum
    } else {
        range / (2.0 - sum)
    };
    let rc = (maxc - r) / range;
    let gc = (maxc - g) / range;
    let bc = (maxc - b) / range;
    let h = if r == maxc {
        bc - gc
    } else if g == maxc {
        2.0 + rc - bc
    } else {
        4.0 + gc - rc
    };
    ((h / 6.0).rem_euclid(1.0), l, s)
}

fn hls_to_rgb(h: f64, l: f64, s: f64) -> (f64, f64, f64) {
    if s == 0.0 {
        return (l, l, l);
    }
    let m2 = if l <= 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let m1 = 2.0 * l - m2;
    (
        hue_channel(m1, m2, h + 1.0 / 3.0),
        hue_channel(m1, m2, h),
        hue_channel(m1, m2, h - 1.0 / 3.0),
    )
}

fn hue_channel(m1: f64, m2: f64, hue: f64) -> f64 {
    let hue = hue.rem_euclid(1.0);
    if hue < 1.0 / 6.0 {
        m1 + (m2 - m1) * hue * 6.0
    } else if hue < 0.5 {
        m2
    } else if hue < 2.0 / 3.0 {
        m1 + (m2 - m1) * (2.0 / 3.0 - hue) * 6.0
    } else {
        m1
    }
}

/// Built-in 5×7 face used when no TrueType font is configured.
mod bitmap {
    use image::{Rgb, RgbImage};

    const GLYPH_WIDTH: u32 = 5;
    const GLYPH_HEIGHT: u32 = 7;
    const ADVANCE: u32 = GLYPH_WIDTH + 1;

    /// Side of one glyph dot for a requested pixel font size.
    pub(super) fn unit(size: f32) -> u32 {
        (size / (GLYPH_HEIGHT + 1) as f32).round().max(1.0) as u32
    }

    pub(super) fn measure(text: &str, unit: u32) -> (u32, u32) {
        let chars = text.chars().flat_map(char::to_uppercase).count() as u32;
        if chars == 0 {
            return (0, GLYPH_HEIGHT * unit);
        }
        ((chars * ADVANCE - 1) * unit, GLYPH_HEIGHT * unit)
    }

    pub(super) fn draw(
        image: &mut RgbImage,
        origin: (i32, i32),
        unit: u32,
        text: &str,
        color: Rgb<u8>,
    ) {
        let width = image.width() as i32;
        let height = image.height() as i32;
        let unit = unit as i32;
        let mut pen_x = origin.0;
        for ch in text.chars().flat_map(char::to_uppercase) {
            if let Some(glyph) = glyph_bits(ch) {
                for (row, pattern) in glyph.iter().enumerate() {
                    for col in 0..GLYPH_WIDTH {
                        if (pattern >> (GLYPH_WIDTH - 1 - col)) & 1 == 0 {
                            continue;
                        }
                        let x0 = pen_x + col as i32 * unit;
                        let y0 = origin.1 + row as i32 * unit;
                        for y in y0.max(0)..(y0 + unit).min(height) {
                            for x in x0.max(0)..(x0 + unit).min(width) {
                                image.put_pixel(x as u32, y as u32, color);
                            }
                        }
                    }
                }
            }
            pen_x += ADVANCE as i32 * unit;
        }
    }

    fn glyph_bits(ch: char) -> Option<[u8; 7]> {
        let rows = match ch {
            'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
            'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
            'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
            'D' => [0b11100, 0b10010, 0b10001, 0b10001, 0b10001, 0b10010, 0b11100],
            'E' => [0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b11111],
            'F' => [0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b10000],
            'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
            'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
            'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
            'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
            'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
            'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
            'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
            'N' => [0b10001, 0b11001, 0b10101, 0b10101, 0b10011, 0b10001, 0b10001],
            'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
            'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
            'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
            'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
            'S' => [0b01111, 0b10000, 0b01110, 0b00001, 0b00001, 0b10001, 0b01110],
            'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
            'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
            'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
            'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010],
            'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
            'Y' => [0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100],
            'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
            '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
            '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
            '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
            '3' => [0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110],
            '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
            '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
            '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
            '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
            '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
            '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
            '%' => [0b10001, 0b10010, 0b00100, 0b01000, 0b10010, 0b10001, 0b00000],
            '.' => [0, 0, 0, 0, 0, 0b00110, 0b00110],
            ',' => [0, 0, 0, 0, 0b01100, 0b00100, 0b01000],
            ':' => [0, 0b01100, 0b01100, 0, 0b01100, 0b01100, 0],
            '-' => [0, 0, 0, 0b11111, 0, 0, 0],
            '_' => [0, 0, 0, 0, 0, 0, 0b11111],
            '/' => [0, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0],
            '\'' => [0b01100, 0b00100, 0b01000, 0, 0, 0, 0],
            '(' => [0b00010, 0b00100, 0b01000, 0b01000, 0b01000, 0b00100, 0b00010],
            ')' => [0b01000, 0b00100, 0b00010, 0b00010, 0b00010, 0b00100, 0b01000],
            '#' => [0b01010, 0b01010, 0b11111, 0b01010, 0b11111, 0b01010, 0b01010],
            '?' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b00000, 0b00100],
            '!' => [0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00000, 0b00100],
            ' ' => [0; 7],
            _ => return None,
        };
        Some(rows)
    }
}

#[cfg(test)]
mod tests {
    use ml_core::BoundingBox;

    use super::*;

    fn renderer(options: RenderOptions) -> AnnotationRenderer {
        AnnotationRenderer::new(Arc::new(OverlayStyle::default()), options)
    }

    fn canvas() -> RgbImage {
        RgbImage::from_pixel(320, 180, Rgb([12, 40, 90]))
    }

    fn detection(label: &str, score: f32, bbox: BoundingBox) -> Prediction {
        Prediction::Detection {
            label: label.into(),
            score,
            bbox,
        }
    }

    fn tag(label: &str, score: f32) -> Prediction {
        Prediction::Classification {
            label: label.into(),
            score,
        }
    }

    #[test]
    fn empty_result_leaves_pixels_untouched() {
        let mut image = canvas();
        let summary = renderer(RenderOptions::default()).render(&mut image, &InferenceResult::empty());
        assert_eq!(summary, RenderSummary::default());
        assert_eq!(image, canvas());
    }

    #[test]
    fn low_confidence_detection_draws_nothing() {
        let mut image = canvas();
        let result = InferenceResult::new(vec![detection(
            "cat",
            0.1,
            BoundingBox::new(0.1, 0.1, 0.6, 0.6),
        )]);
        let summary = renderer(RenderOptions::default()).render(&mut image, &result);
        assert_eq!(summary.boxes, 0);
        assert_eq!(image, canvas());
    }

    #[test]
    fn detection_box_is_drawn_at_its_pixel_corners() {
        let mut image = canvas();
        let result = InferenceResult::new(vec![detection(
            "car",
            0.9,
            BoundingBox::new(0.25, 0.5, 0.75, 1.0),
        )]);
        let summary = renderer(RenderOptions::default()).render(&mut image, &result);
        assert_eq!(summary, RenderSummary { tags: 0, boxes: 1 });
        // xmin = 80, ymin = 90
        assert_eq!(*image.get_pixel(80, 90), DEFAULT_BOX_COLOR);
        assert_eq!(*image.get_pixel(84, 120), DEFAULT_BOX_COLOR);
        assert_eq!(*image.get_pixel(10, 10), Rgb([12, 40, 90]));
    }

    #[test]
    fn detections_are_capped() {
        let boxes = (0..8)
            .map(|i| {
                let x = i as f64 * 0.1;
                detection("obj", 0.8, BoundingBox::new(x, 0.0, x + 0.1, 0.2))
            })
            .collect();
        let mut image = canvas();
        let summary = renderer(RenderOptions::default())
            .render(&mut image, &InferenceResult::new(boxes));
        assert_eq!(summary.boxes, 5);
    }

    #[test]
    fn only_first_tag_keeps_the_best_classification() {
        let result = InferenceResult::new(vec![tag("dog", 0.2), tag("cat", 0.7), tag("cow", 0.5)]);
        let stacked = RenderOptions {
            only_first_tag: false,
            ..RenderOptions::default()
        };
        let mut image = canvas();
        let all = renderer(stacked).render(&mut image, &result);
        assert_eq!(all.tags, 3);

        let mut image = canvas();
        let first = renderer(RenderOptions::default()).render(&mut image, &result);
        assert_eq!(first.tags, 1);
        assert_ne!(image, canvas());

        let mut image = canvas();
        assert_eq!(renderer(RenderOptions::preview()).render(&mut image, &result).tags, 1);
    }

    #[test]
    fn labels_are_skipped_when_nothing_would_be_written() {
        let options = RenderOptions {
            draw_labels: false,
            draw_scores: false,
            ..RenderOptions::default()
        };
        let result = InferenceResult::new(vec![tag("cat", 0.9)]);
        let mut image = canvas();
        assert_eq!(renderer(options).render(&mut image, &result).tags, 0);
        assert_eq!(image, canvas());
    }

    #[test]
    fn labels_shift_inside_the_image() {
        let placed = fit_label((300.0, 170.0), (40.0, 20.0), (320, 180));
        assert!(placed.right <= 319.0);
        assert!(placed.bottom <= 179.0);
        assert!(placed.left >= 0.0 && placed.top >= 0.0);

        let wide = fit_label((-12.0, 4.0), (400.0, 20.0), (320, 180));
        assert_eq!(wide.left, 0.0);
        assert_eq!(wide.top, 4.0);
        assert_eq!(wide.text_x, wide.left + 6.0);
    }

    #[test]
    fn scores_print_like_rounded_floats() {
        assert_eq!(format_score(0.9, 4), "0.9");
        assert_eq!(format_score(0.123_46, 4), "0.1235");
        assert_eq!(format_score(1.0, 4), "1.0");
    }

    #[test]
    fn background_is_a_darker_box_color() {
        let style = OverlayStyle::default();
        let Rgb([r, g, b]) = style.background;
        assert!(r.abs_diff(5) <= 1, "{r}");
        assert!(g.abs_diff(102) <= 1, "{g}");
        assert!(b.abs_diff(162) <= 1, "{b}");
        assert_eq!(darken(Rgb([0, 0, 0]), 0.4), Rgb([0, 0, 0]));
    }

    #[test]
    fn font_size_follows_scale_and_kind() {
        let style = OverlayStyle::default();
        assert_eq!(style.font_size(true), 48.0);
        assert_eq!(style.font_size(false), 28.0);
        let half = OverlayStyle::new(DEFAULT_FONT_COLOR, DEFAULT_BOX_COLOR, 50, None);
        assert_eq!(half.font_size(true), 24.0);
    }

    #[test]
    fn bitmap_face_measures_per_character() {
        assert_eq!(bitmap::unit(48.0), 6);
        assert_eq!(bitmap::measure("cat", 1), (17, 7));
        assert_eq!(bitmap::measure("", 2), (0, 14));
    }

    #[test]
    fn encoded_payloads_keep_their_dimensions() {
        let encoded = ml_core::crop::encode_jpeg(&canvas(), 90).unwrap();
        let result = InferenceResult::new(vec![tag("cat", 0.9)]);
        let out = renderer(RenderOptions::preview())
            .annotate_encoded(&encoded, &result, 90)
            .unwrap();
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (320, 180));
    }
}
