//! Burns a caption onto a bitmap.
//!
//! Sizing follows a fixed policy:
//! - base size is 200 density-independent units;
//! - if the condition line is at least as wide as the canvas minus 4 px of
//!   padding at that size, the base shrinks to `width / 23` units;
//! - each following line is 0.7 times the size of the line above it;
//! - the first baseline sits at `height + 3 * (descent + ascent)` and lines
//!   step down by 200 units.

use std::{fmt::Debug, path::Path, sync::Arc};

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_text_mut, text_size};
use rusttype::{Font, Scale};

use crate::caption::{CAPTION_LINES, Caption, capitalize};

const BASE_TEXT_DP: u32 = 200;
const LINE_STEP_DP: u32 = 200;
const HORIZONTAL_PADDING_PX: f32 = 4.0;
const SHRINK_DIVISOR: u32 = 23;
const LEFT_MARGIN_DIVISOR: f32 = 30.0;
const LINE_SCALE: f32 = 0.7;
/// Index of the condition line, the only one measured for overflow.
const MEASURED_LINE: usize = 1;

/// Vertical font metrics relative to the baseline, y growing downward:
/// `ascent` is negative, `descent` positive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineMetrics {
    pub ascent: f32,
    pub descent: f32,
}

/// Glyph measuring and drawing at a given pixel size.
pub trait TextPainter: Send + Sync + Debug {
    fn measure_width(&self, text: &str, size: f32) -> f32;
    fn vertical_metrics(&self, size: f32) -> LineMetrics;
    /// Draws `text` with its baseline at `baseline_y`; pixels outside the canvas are clipped.
    fn draw(&self, canvas: &mut RgbImage, text: &str, x: f32, baseline_y: f32, size: f32);
}

/// [`TextPainter`] rendering white TrueType glyphs.
pub struct RusttypePainter {
    font: Font<'static>,
    color: Rgb<u8>,
}

impl Debug for RusttypePainter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RusttypePainter")
            .field("color", &self.color)
            .finish_non_exhaustive()
    }
}

impl RusttypePainter {
    pub fn from_bytes(data: Vec<u8>) -> anyhow::Result<Self> {
        let font = Font::try_from_vec(data).ok_or_else(|| anyhow::anyhow!("Invalid font data"))?;
        Ok(Self {
            font,
            color: Rgb([255, 255, 255]),
        })
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;
        let data = std::fs::read(path)
            .with_context(|| format!("Failed to read font file: {}", path.display()))?;
        Self::from_bytes(data).with_context(|| format!("Failed to load font: {}", path.display()))
    }
}

impl TextPainter for RusttypePainter {
    fn measure_width(&self, text: &str, size: f32) -> f32 {
        let (width, _) = text_size(Scale::uniform(size), &self.font, text);
        width as f32
    }

    fn vertical_metrics(&self, size: f32) -> LineMetrics {
        // rusttype reports ascent up-positive and descent down-negative.
        let v = self.font.v_metrics(Scale::uniform(size));
        LineMetrics {
            ascent: -v.ascent,
            descent: -v.descent,
        }
    }

    fn draw(&self, canvas: &mut RgbImage, text: &str, x: f32, baseline_y: f32, size: f32) {
        // imageproc positions text by the top of its line box.
        let top = baseline_y + self.vertical_metrics(size).ascent;
        draw_text_mut(
            canvas,
            self.color,
            x.round() as i32,
            top.round() as i32,
            Scale::uniform(size),
            &self.font,
            text,
        );
    }
}

/// One caption line as it is drawn.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedLine {
    pub text: String,
    pub x: f32,
    pub baseline_y: f32,
    pub size: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptionLayout {
    pub lines: Vec<PlacedLine>,
    /// Whether the condition line overflowed and the base size was reduced.
    pub shrunk: bool,
}

/// The annotated bitmap and how its caption was placed.
#[derive(Debug, Clone)]
pub struct RenderedImage {
    pub image: RgbImage,
    pub layout: CaptionLayout,
}

#[derive(Debug, Clone)]
pub struct ImageAnnotator {
    painter: Arc<dyn TextPainter>,
    density: f32,
}

impl ImageAnnotator {
    pub fn new(painter: Arc<dyn TextPainter>, density: f32) -> Self {
        Self { painter, density }
    }

    /// Density-independent units to whole pixels, rounded half up.
    pub fn dp_to_px(&self, dp: u32) -> f32 {
        (dp as f32 * self.density + 0.5).floor()
    }

    pub fn layout(&self, width: u32, height: u32, caption: &Caption) -> CaptionLayout {
        let lines = caption.lines();

        let base = self.dp_to_px(BASE_TEXT_DP);
        let measured = self.painter.measure_width(&lines[MEASURED_LINE], base);
        let shrunk = measured >= width as f32 - HORIZONTAL_PADDING_PX;
        let mut size = if shrunk {
            self.dp_to_px(width / SHRINK_DIVISOR)
        } else {
            base
        };

        let x = width as f32 / LEFT_MARGIN_DIVISOR;
        let metrics = self.painter.vertical_metrics(size);
        let first_baseline = height as f32 + (metrics.descent + metrics.ascent) * 3.0;
        let step = self.dp_to_px(LINE_STEP_DP);

        let mut placed = Vec::with_capacity(CAPTION_LINES);
        for (index, line) in lines.iter().enumerate() {
            if index > 0 {
                size *= LINE_SCALE;
            }
            placed.push(PlacedLine {
                text: capitalize(line),
                x,
                baseline_y: first_baseline + step * index as f32,
                size,
            });
        }

        CaptionLayout {
            lines: placed,
            shrunk,
        }
    }

    pub fn render(&self, mut bitmap: RgbImage, caption: &Caption) -> RenderedImage {
        let layout = self.layout(bitmap.width(), bitmap.height(), caption);
        tracing::debug!(
            width = bitmap.width(),
            height = bitmap.height(),
            shrunk = layout.shrunk,
            "rendering caption"
        );

        for line in &layout.lines {
            self.painter.draw(&mut bitmap, &line.text, line.x, line.baseline_y, line.size);
        }

        RenderedImage {
            image: bitmap,
            layout,
        }
    }
}
