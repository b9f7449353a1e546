//! Static layout planning in scene units.
//!
//! The frame is [`FRAME_HEIGHT_UNITS`] tall and `FRAME_HEIGHT_UNITS * aspect`
//! wide, origin top-left, y growing downward. A font size of one point is
//! 1/72 scene unit of em height.

use anyhow::{bail, Result};
use serde::Serialize;

use crate::error_codes::CodedError;
use crate::quality::FrameSpec;
use crate::schema::Orientation;

pub const FRAME_HEIGHT_UNITS: f32 = 8.0;
pub const MARGIN: f32 = 0.3;
/// Overflow up to this factor of the fitting line count shrinks lines instead
/// of paginating.
pub const MILD_OVERFLOW_RATIO: f32 = 1.5;
pub const GUTTER_GAP_COLUMNS: f32 = 2.0;
pub const POINTS_PER_UNIT: f32 = 72.0;
pub const DEFAULT_ADVANCE_EM: f32 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn offset(self, dx: f32, dy: f32) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Viewport {
    pub frame_width: f32,
    pub frame_height: f32,
    pub orientation: Orientation,
}

impl Viewport {
    pub fn for_frame(frame: FrameSpec, orientation: Orientation) -> Self {
        Self {
            frame_width: FRAME_HEIGHT_UNITS * frame.aspect(),
            frame_height: FRAME_HEIGHT_UNITS,
            orientation,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientationLimits {
    pub min_line_height: f32,
    pub max_line_height: f32,
    pub font_multiplier: f32,
    pub min_font: u32,
    pub max_font: u32,
}

pub fn limits_for(orientation: Orientation) -> OrientationLimits {
    match orientation {
        Orientation::Landscape => OrientationLimits {
            min_line_height: 0.35,
            max_line_height: 0.60,
            font_multiplier: 45.0,
            min_font: 16,
            max_font: 28,
        },
        Orientation::Portrait => OrientationLimits {
            min_line_height: 0.40,
            max_line_height: 0.70,
            font_multiplier: 50.0,
            min_font: 18,
            max_font: 32,
        },
    }
}

/// Monospace advance as a fraction of the em.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FontMetrics {
    pub advance_em: f32,
}

impl Default for FontMetrics {
    fn default() -> Self {
        Self {
            advance_em: DEFAULT_ADVANCE_EM,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutInput {
    pub line_count: usize,
    pub max_line_number: u32,
    /// Widest retained line in display columns, indentation included.
    pub max_line_columns: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LayoutPlan {
    pub font_size: u32,
    pub line_height: f32,
    pub gutter_width: f32,
    pub gutter_gap: f32,
    pub gutter_digits: usize,
    pub advance: f32,
    pub width_scale: f32,
    pub chunked: bool,
    pub chunk_capacity: usize,
    pub line_count: usize,
    pub available_width: f32,
    pub available_height: f32,
    pub frame_width: f32,
    pub frame_height: f32,
}

pub fn plan_layout(
    input: LayoutInput,
    viewport: Viewport,
    metrics: FontMetrics,
) -> Result<LayoutPlan> {
    if input.line_count == 0 {
        bail!(CodedError::empty_content(
            "cannot lay out zero lines of code"
        ));
    }
    let limits = limits_for(viewport.orientation);
    let available_width = viewport.frame_width - 2.0 * MARGIN;
    let available_height = viewport.frame_height - 2.0 * MARGIN;
    let count = input.line_count as f32;

    let ideal = available_height / count;
    let mut line_height = ideal.clamp(limits.min_line_height, limits.max_line_height);
    let mut font_size = font_for(line_height, &limits);
    let mut chunked = false;
    let mut chunk_capacity = input.line_count;

    if count * line_height > available_height {
        let lines_that_fit = ((available_height / limits.min_line_height).floor() as usize).max(1);
        if count > MILD_OVERFLOW_RATIO * lines_that_fit as f32 {
            chunked = true;
            line_height = limits.min_line_height;
            font_size = limits.min_font;
            chunk_capacity = lines_that_fit;
        } else {
            line_height = available_height / count;
            font_size = font_for(line_height, &limits);
        }
    }

    let em = font_size as f32 / POINTS_PER_UNIT;
    let advance = metrics.advance_em * em;
    let gutter_digits = digit_count(input.max_line_number);
    let gutter_width = advance * gutter_digits as f32;
    let gutter_gap = advance * GUTTER_GAP_COLUMNS;
    let widest = gutter_width + gutter_gap + advance * input.max_line_columns as f32;
    let width_scale = if widest > available_width {
        available_width / widest
    } else {
        1.0
    };

    Ok(LayoutPlan {
        font_size,
        line_height,
        gutter_width,
        gutter_gap,
        gutter_digits,
        advance,
        width_scale,
        chunked,
        chunk_capacity,
        line_count: input.line_count,
        available_width,
        available_height,
        frame_width: viewport.frame_width,
        frame_height: viewport.frame_height,
    })
}

fn font_for(line_height: f32, limits: &OrientationLimits) -> u32 {
    let raw = (line_height * limits.font_multiplier).round().max(0.0) as u32;
    raw.clamp(limits.min_font, limits.max_font)
}

fn digit_count(value: u32) -> usize {
    value.max(1).to_string().len()
}

impl LayoutPlan {
    /// Rows in the visible block: one page when chunked, every line otherwise.
    pub fn rows(&self) -> usize {
        if self.chunked {
            self.chunk_capacity
        } else {
            self.line_count
        }
    }

    pub fn em(&self) -> f32 {
        self.font_size as f32 / POINTS_PER_UNIT
    }

    pub fn block_top(&self) -> f32 {
        (self.frame_height - self.rows() as f32 * self.line_height) / 2.0
    }

    /// Vertical center of a slot row.
    pub fn slot_y(&self, slot: usize) -> f32 {
        self.block_top() + (slot as f32 + 0.5) * self.line_height
    }

    pub fn slot_for_index(&self, index: usize) -> usize {
        if self.chunked {
            index % self.chunk_capacity
        } else {
            index
        }
    }

    /// Upward travel that takes the bottom slot fully above the frame.
    pub fn scroll_distance(&self) -> f32 {
        self.block_top() + (self.rows() as f32 + 1.0) * self.line_height
    }

    pub fn line_left(&self) -> f32 {
        MARGIN
    }

    /// Gutter right edge relative to the line origin.
    pub fn gutter_right_offset(&self) -> f32 {
        self.gutter_width * self.width_scale
    }

    /// Content left edge relative to the line origin.
    pub fn content_offset(&self, leading_spaces: usize) -> f32 {
        let indent = self.advance * leading_spaces as f32;
        (self.gutter_width + self.gutter_gap + indent) * self.width_scale
    }

    pub fn scaled_advance(&self) -> f32 {
        self.advance * self.width_scale
    }
}
