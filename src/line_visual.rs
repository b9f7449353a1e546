use anyhow::{Context, Result};
use serde::Serialize;

use crate::color_runs::{remap_to_content, ColorRun};
use crate::layout::{LayoutPlan, Point};
use crate::schema::{RevealStyle, Rgb};
use crate::source::SourceLine;

pub const GUTTER_COLOR: Rgb = Rgb::new(0x66, 0x66, 0x66);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Anchor {
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextObject {
    pub text: String,
    /// Colored spans in char offsets of `text`; gaps use `base_color`.
    pub spans: Vec<ColorRun>,
    pub base_color: Rgb,
    pub font_size: u32,
    pub anchor: Anchor,
    /// Anchor x relative to the line origin.
    pub offset_x: f32,
}

impl TextObject {
    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }

    /// Color of the char at `index`.
    pub fn color_at(&self, index: usize) -> Rgb {
        self.spans
            .iter()
            .find(|span| span.start <= index && index < span.end)
            .map_or(self.base_color, |span| span.color)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineVisual {
    pub line_number: u32,
    pub index: usize,
    pub gutter: TextObject,
    /// `None` when the line is blank after trimming indentation.
    pub content: Option<TextObject>,
    /// Line origin (left margin, row center) once revealed.
    pub final_position: Point,
    pub enter_start_position: Point,
    pub style: RevealStyle,
}

impl LineVisual {
    /// Translation from final to entry position, reused when the sequencer
    /// assigns the line a different slot.
    pub fn entry_offset(&self) -> Point {
        Point::new(
            self.enter_start_position.x - self.final_position.x,
            self.enter_start_position.y - self.final_position.y,
        )
    }

    /// Typewriter reveals keep content in place and grow it char by char.
    pub fn content_enters_in_place(&self) -> bool {
        matches!(
            self.style,
            RevealStyle::Typewriter | RevealStyle::FadeIn | RevealStyle::ScaleIn
        )
    }
}

pub fn entry_position(final_position: Point, style: RevealStyle, plan: &LayoutPlan) -> Point {
    match style {
        RevealStyle::SlideLeft | RevealStyle::Typewriter => {
            final_position.offset(-(plan.frame_width + 2.0), 0.0)
        }
        RevealStyle::DropIn => final_position.offset(0.0, -(plan.frame_height + 1.0)),
        RevealStyle::FadeIn | RevealStyle::ScaleIn => final_position,
    }
}

pub fn build_line_visual(
    line: &SourceLine,
    display_runs: &[ColorRun],
    plan: &LayoutPlan,
    index: usize,
    style: RevealStyle,
    default_color: Rgb,
) -> Result<LineVisual> {
    let gutter = TextObject {
        text: format!("{:>width$}", line.line_number, width = plan.gutter_digits),
        spans: Vec::new(),
        base_color: GUTTER_COLOR,
        font_size: plan.font_size,
        anchor: Anchor::Right,
        offset_x: plan.gutter_right_offset(),
    };

    let leading_spaces = line.leading_spaces();
    let content = if line.is_blank() {
        None
    } else {
        let text = line.text.trim_start_matches(' ').to_owned();
        let spans = remap_to_content(display_runs, leading_spaces, text.chars().count())
            .with_context(|| format!("failed to color line {}", line.line_number))?;
        Some(TextObject {
            text,
            spans,
            base_color: default_color,
            font_size: plan.font_size,
            anchor: Anchor::Left,
            offset_x: plan.content_offset(leading_spaces),
        })
    };

    let final_position = Point::new(plan.line_left(), plan.slot_y(plan.slot_for_index(index)));
    Ok(LineVisual {
        line_number: line.line_number,
        index,
        gutter,
        content,
        final_position,
        enter_start_position: entry_position(final_position, style, plan),
        style,
    })
}

/// One visual per retained line; `runs_by_line[i]` belongs to `lines[i]`.
pub fn build_line_visuals(
    lines: &[SourceLine],
    runs_by_line: &[Vec<ColorRun>],
    plan: &LayoutPlan,
    style: RevealStyle,
    default_color: Rgb,
) -> Result<Vec<LineVisual>> {
    lines
        .iter()
        .enumerate()
        .map(|(index, line)| {
            let runs = runs_by_line.get(index).map_or(&[][..], Vec::as_slice);
            build_line_visual(line, runs, plan, index, style, default_color)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{plan_layout, FontMetrics, LayoutInput, Viewport, FRAME_HEIGHT_UNITS};
    use crate::schema::Orientation;

    const WHITE: Rgb = Rgb::new(255, 255, 255);

    fn plan(lines: usize) -> LayoutPlan {
        plan_layout(
            LayoutInput {
                line_count: lines,
                max_line_number: 120,
                max_line_columns: 30,
            },
            Viewport {
                frame_width: FRAME_HEIGHT_UNITS * 16.0 / 9.0,
                frame_height: FRAME_HEIGHT_UNITS,
                orientation: Orientation::Landscape,
            },
            FontMetrics::default(),
        )
        .expect("plan")
    }

    fn line(number: u32, text: &str) -> SourceLine {
        SourceLine {
            line_number: number,
            text: text.to_owned(),
        }
    }

    #[test]
    fn gutter_is_right_aligned_to_widest_number() {
        let plan = plan(4);
        let visual =
            build_line_visual(&line(7, "x"), &[], &plan, 0, RevealStyle::SlideLeft, WHITE)
                .expect("visual");
        assert_eq!(visual.gutter.text, "  7");
        assert_eq!(visual.gutter.anchor, Anchor::Right);
    }

    #[test]
    fn indentation_becomes_offset_and_runs_shift() {
        let plan = plan(4);
        let red = Rgb::new(255, 0, 0);
        let runs = [ColorRun { start: 4, end: 10, color: red }];
        let source = line(1, "    return x");
        let visual = build_line_visual(&source, &runs, &plan, 0, RevealStyle::FadeIn, WHITE)
            .expect("visual");
        let content = visual.content.expect("content");
        assert_eq!(content.text, "return x");
        assert_eq!(content.spans, vec![ColorRun { start: 0, end: 6, color: red }]);
        assert!((content.offset_x - plan.content_offset(4)).abs() < 1e-6);
        assert_eq!(content.color_at(7), WHITE);
        assert_eq!(visual.enter_start_position, visual.final_position);
    }

    #[test]
    fn blank_lines_have_no_content() {
        let plan = plan(4);
        let visual =
            build_line_visual(&line(2, "    "), &[], &plan, 1, RevealStyle::SlideLeft, WHITE)
                .expect("visual");
        assert!(visual.content.is_none());
    }

    #[test]
    fn entry_positions_follow_style() {
        let plan = plan(4);
        let origin = Point::new(0.3, 2.0);
        assert_eq!(
            entry_position(origin, RevealStyle::SlideLeft, &plan).x,
            0.3 - (plan.frame_width + 2.0)
        );
        assert_eq!(
            entry_position(origin, RevealStyle::DropIn, &plan).y,
            2.0 - (plan.frame_height + 1.0)
        );
        assert_eq!(entry_position(origin, RevealStyle::ScaleIn, &plan), origin);
    }

    #[test]
    fn rows_are_evenly_spaced() {
        let plan = plan(4);
        let lines = [line(1, "a"), line(2, "b"), line(3, "c")];
        let visuals = build_line_visuals(&lines, &[], &plan, RevealStyle::SlideLeft, WHITE)
            .expect("visuals");
        let gap = visuals[1].final_position.y - visuals[0].final_position.y;
        assert!((gap - plan.line_height).abs() < 1e-6);
        assert!((visuals[2].final_position.y - visuals[1].final_position.y - gap).abs() < 1e-6);
    }
}
