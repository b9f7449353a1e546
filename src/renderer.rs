use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use fontdue::Font;
use tiny_skia::{Color, Pixmap};

use crate::layout::{LayoutPlan, Point, FRAME_HEIGHT_UNITS, POINTS_PER_UNIT};
use crate::line_visual::{Anchor, LineVisual, TextObject};
use crate::quality::FrameSpec;
use crate::schema::Rgb;
use crate::timeline::{LineState, Timeline};

pub const BACKGROUND: Rgb = Rgb::new(0, 0, 0);

/// Everything needed to draw any frame of one render.
#[derive(Clone, Copy)]
pub struct Scene<'a> {
    pub plan: &'a LayoutPlan,
    pub visuals: &'a [LineVisual],
    pub timeline: &'a Timeline,
}

#[derive(Debug, Clone)]
pub struct GlyphBitmap {
    pub width: usize,
    pub height: usize,
    pub xmin: i32,
    pub ymin: i32,
    pub bitmap: Vec<u8>,
}

pub struct FrameRenderer {
    font: Font,
    frame: FrameSpec,
    pixels_per_unit: f32,
    background: Rgb,
    glyph_cache: HashMap<(char, u32), GlyphBitmap>,
}

impl FrameRenderer {
    pub fn new(font: Font, frame: FrameSpec) -> Self {
        Self {
            font,
            frame,
            pixels_per_unit: frame.height as f32 / FRAME_HEIGHT_UNITS,
            background: BACKGROUND,
            glyph_cache: HashMap::new(),
        }
    }

    pub fn with_background(mut self, background: Rgb) -> Self {
        self.background = background;
        self
    }

    pub fn cached_glyphs(&self) -> usize {
        self.glyph_cache.len()
    }

    pub fn render_pixmap(&mut self, scene: Scene<'_>, t: f32) -> Result<Pixmap> {
        let mut pixmap = Pixmap::new(self.frame.width, self.frame.height)
            .ok_or_else(|| {
                anyhow!("invalid frame size {}x{}", self.frame.width, self.frame.height)
            })?;
        let bg = self.background;
        pixmap.fill(Color::from_rgba8(bg.r, bg.g, bg.b, 255));

        for visual in scene.visuals {
            let state = scene
                .timeline
                .sample(visual.index, t)
                .ok_or_else(|| anyhow!("no timeline track for line {}", visual.line_number))?;
            if state.opacity <= 0.0 || state.scale <= 0.0 {
                continue;
            }
            self.draw_line(&mut pixmap, scene.plan, visual, &state);
        }
        Ok(pixmap)
    }

    pub fn render_frame_rgba(&mut self, scene: Scene<'_>, t: f32) -> Result<Vec<u8>> {
        Ok(self.render_pixmap(scene, t)?.take())
    }

    fn draw_line(
        &mut self,
        pixmap: &mut Pixmap,
        plan: &LayoutPlan,
        visual: &LineVisual,
        state: &LineState,
    ) {
        let alpha = (state.opacity.clamp(0.0, 1.0) * 255.0).round() as u8;
        self.draw_text(
            pixmap,
            plan,
            &visual.gutter,
            state.gutter_position,
            state.scale,
            alpha,
            1.0,
        );
        if let Some(content) = &visual.content {
            self.draw_text(
                pixmap,
                plan,
                content,
                state.content_position,
                state.scale,
                alpha,
                state.revealed_fraction,
            );
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn draw_text(
        &mut self,
        pixmap: &mut Pixmap,
        plan: &LayoutPlan,
        text: &TextObject,
        origin: Point,
        scale: f32,
        alpha: u8,
        revealed_fraction: f32,
    ) {
        let ppu = self.pixels_per_unit;
        let size_px = text.font_size as f32 / POINTS_PER_UNIT * plan.width_scale * scale * ppu;
        if size_px < 1.0 {
            return;
        }
        let advance_px = plan.scaled_advance() * scale * ppu;
        let count = text.char_count();
        let fraction = revealed_fraction.clamp(0.0, 1.0);
        let visible = ((fraction * count as f32).floor() as usize).min(count);
        if visible == 0 {
            return;
        }

        let anchor_x = (origin.x + text.offset_x * scale) * ppu;
        let start_x = match text.anchor {
            Anchor::Left => anchor_x,
            Anchor::Right => anchor_x - count as f32 * advance_px,
        };
        let center_y = origin.y * ppu;
        if center_y + size_px < 0.0 || center_y - size_px > self.frame.height as f32 {
            return;
        }
        if start_x > self.frame.width as f32 || start_x + count as f32 * advance_px < 0.0 {
            return;
        }
        let (ascent, descent) = self
            .font
            .horizontal_line_metrics(size_px)
            .map_or((size_px * 0.8, -size_px * 0.2), |metrics| (metrics.ascent, metrics.descent));
        let baseline = center_y + (ascent + descent) / 2.0;

        let size_key = (size_px * 4.0).round() as u32;
        let (width, height) = (self.frame.width, self.frame.height);
        for (position, ch) in text.text.chars().take(visible).enumerate() {
            if ch == ' ' {
                continue;
            }
            let color = text.color_at(position);
            let glyph_char = if self.font.lookup_glyph_index(ch) == 0 { '?' } else { ch };
            let glyph = self.glyph(glyph_char, size_key);
            let pen_x = start_x + position as f32 * advance_px;
            let x = (pen_x + glyph.xmin as f32).round() as i32;
            let y = (baseline - glyph.ymin as f32 - glyph.height as f32).round() as i32;
            blend_glyph(pixmap.data_mut(), width, height, x, y, glyph, color.to_rgba(alpha));
        }
    }

    fn glyph(&mut self, ch: char, size_key: u32) -> &GlyphBitmap {
        let font = &self.font;
        self.glyph_cache.entry((ch, size_key)).or_insert_with(|| {
            let (metrics, bitmap) = font.rasterize(ch, size_key as f32 / 4.0);
            GlyphBitmap {
                width: metrics.width,
                height: metrics.height,
                xmin: metrics.xmin,
                ymin: metrics.ymin,
                bitmap,
            }
        })
    }
}

pub fn blend_glyph(
    frame: &mut [u8],
    frame_width: u32,
    frame_height: u32,
    x: i32,
    y: i32,
    glyph: &GlyphBitmap,
    color: [u8; 4],
) {
    for row in 0..glyph.height {
        let py = y + row as i32;
        if py < 0 || py >= frame_height as i32 {
            continue;
        }

        for col in 0..glyph.width {
            let px = x + col as i32;
            if px < 0 || px >= frame_width as i32 {
                continue;
            }

            let mask = glyph.bitmap[row * glyph.width + col];
            if mask == 0 {
                continue;
            }

            let alpha = ((u16::from(mask) * u16::from(color[3])) / 255) as u8;
            let idx = ((py as u32 * frame_width + px as u32) * 4) as usize;
            blend_pixel(frame, idx, [color[0], color[1], color[2], alpha]);
        }
    }
}

/// Source-over onto an opaque destination.
pub fn blend_pixel(frame: &mut [u8], idx: usize, src: [u8; 4]) {
    let alpha = u16::from(src[3]);
    if alpha == 0 {
        return;
    }

    let inv_alpha = 255_u16.saturating_sub(alpha);

    for channel in 0..3 {
        let dst = u16::from(frame[idx + channel]);
        let src_c = u16::from(src[channel]);
        frame[idx + channel] = ((src_c * alpha + dst * inv_alpha + 127) / 255) as u8;
    }
    frame[idx + 3] = 255;
}

pub fn write_png(pixmap: &Pixmap, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create '{}'", parent.display()))?;
        }
    }
    let image = image::RgbaImage::from_raw(pixmap.width(), pixmap.height(), pixmap.data().to_vec())
        .ok_or_else(|| {
            anyhow!("frame buffer does not match {}x{}", pixmap.width(), pixmap.height())
        })?;
    image
        .save_with_format(path, image::ImageFormat::Png)
        .with_context(|| format!("failed to write PNG '{}'", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn glyph() -> GlyphBitmap {
        GlyphBitmap {
            width: 2,
            height: 2,
            xmin: 0,
            ymin: 0,
            bitmap: vec![255, 0, 128, 255],
        }
    }

    #[test]
    fn full_coverage_replaces_destination() {
        let mut frame = vec![0_u8; 4 * 4 * 4];
        blend_glyph(&mut frame, 4, 4, 1, 1, &glyph(), [200, 100, 50, 255]);
        let idx = (4 + 1) * 4;
        assert_eq!(&frame[idx..idx + 4], &[200, 100, 50, 255]);
        let skipped = (4 + 2) * 4;
        assert_eq!(&frame[skipped..skipped + 4], &[0, 0, 0, 0]);
    }

    #[test]
    fn clipped_glyph_does_not_panic() {
        let mut frame = vec![0_u8; 2 * 2 * 4];
        blend_glyph(&mut frame, 2, 2, -1, 1, &glyph(), [255, 255, 255, 255]);
        blend_glyph(&mut frame, 2, 2, 5, 5, &glyph(), [255, 255, 255, 255]);
        assert!(frame.iter().all(|byte| *byte == 0));
    }

    #[test]
    fn partial_alpha_mixes() {
        let mut frame = vec![100_u8, 100, 100, 255];
        blend_pixel(&mut frame, 0, [200, 200, 200, 128]);
        assert!(frame[0] > 100 && frame[0] < 200);
    }

    #[test]
    fn png_export_writes_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut pixmap = Pixmap::new(4, 3).expect("pixmap");
        pixmap.fill(Color::from_rgba8(0, 0, 0, 255));
        let path = dir.path().join("nested").join("frame.png");
        write_png(&pixmap, &path).expect("png");
        let decoded = image::open(&path).expect("decode").to_rgba8();
        assert_eq!(decoded.dimensions(), (4, 3));
    }
}
