use std::ops::Range;

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::layout::{LayoutPlan, Point};
use crate::line_visual::LineVisual;
use crate::schema::RevealStyle;
use crate::sequencer::{Sequence, TimelineOp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EasingCurve {
    #[default]
    Linear,
    EaseIn,
    EaseOut,
    EaseInOut,
}

impl EasingCurve {
    pub fn apply(self, t: f32) -> f32 {
        match self {
            Self::Linear => t,
            Self::EaseIn => t * t,
            Self::EaseOut => 1.0 - (1.0 - t) * (1.0 - t),
            Self::EaseInOut => {
                if t < 0.5 {
                    2.0 * t * t
                } else {
                    1.0 - ((-2.0 * t + 2.0).powi(2) / 2.0)
                }
            }
        }
    }
}

pub trait Interpolate {
    fn interpolate(from: &Self, to: &Self, t: f32) -> Self;
}

impl Interpolate for f32 {
    fn interpolate(from: &Self, to: &Self, t: f32) -> Self {
        *from + (*to - *from) * t
    }
}

impl Interpolate for Point {
    fn interpolate(from: &Self, to: &Self, t: f32) -> Self {
        Self {
            x: <f32 as Interpolate>::interpolate(&from.x, &to.x, t),
            y: <f32 as Interpolate>::interpolate(&from.y, &to.y, t),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Keyframe<T> {
    pub start: f32,
    pub end: f32,
    pub from: T,
    pub to: T,
    pub easing: EasingCurve,
}

impl<T: Copy + Interpolate> Keyframe<T> {
    pub fn sample(&self, t: f32) -> T {
        if t <= self.start {
            return self.from;
        }
        if t >= self.end {
            return self.to;
        }
        let span = self.end - self.start;
        let progress = (t - self.start) / span;
        let eased = self.easing.apply(progress.clamp(0.0, 1.0));
        T::interpolate(&self.from, &self.to, eased)
    }
}

/// Sequential, non-overlapping keyframes for one property.
#[derive(Debug, Clone, Serialize)]
pub struct Track<T> {
    pub initial: T,
    pub keys: Vec<Keyframe<T>>,
}

impl<T: Copy + Interpolate> Track<T> {
    fn new(initial: T) -> Self {
        Self {
            initial,
            keys: Vec::new(),
        }
    }

    fn current(&self) -> T {
        self.keys.last().map_or(self.initial, |key| key.to)
    }

    fn push(&mut self, start: f32, end: f32, to: T, easing: EasingCurve) {
        let from = self.current();
        self.keys.push(Keyframe {
            start,
            end,
            from,
            to,
            easing,
        });
    }

    fn push_from(&mut self, start: f32, end: f32, from: T, to: T, easing: EasingCurve) {
        self.keys.push(Keyframe {
            start,
            end,
            from,
            to,
            easing,
        });
    }

    pub fn sample(&self, t: f32) -> T {
        match self.keys.iter().rev().find(|key| key.start <= t) {
            Some(key) => key.sample(t),
            None => self.initial,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LineState {
    pub gutter_position: Point,
    pub content_position: Point,
    pub opacity: f32,
    pub scale: f32,
    pub revealed_fraction: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct LineTrack {
    pub gutter: Track<Point>,
    pub content: Track<Point>,
    pub opacity: Track<f32>,
    pub scale: Track<f32>,
    pub revealed: Track<f32>,
}

impl LineTrack {
    fn for_visual(visual: &LineVisual) -> Self {
        let entry = visual.enter_start_position;
        let content_entry = if visual.content_enters_in_place() {
            visual.final_position
        } else {
            entry
        };
        Self {
            gutter: Track::new(entry),
            content: Track::new(content_entry),
            opacity: Track::new(0.0),
            scale: Track::new(if visual.style == RevealStyle::ScaleIn { 0.0 } else { 1.0 }),
            revealed: Track::new(if visual.style == RevealStyle::Typewriter { 0.0 } else { 1.0 }),
        }
    }

    pub fn sample(&self, t: f32) -> LineState {
        LineState {
            gutter_position: self.gutter.sample(t),
            content_position: self.content.sample(t),
            opacity: self.opacity.sample(t),
            scale: self.scale.sample(t),
            revealed_fraction: self.revealed.sample(t),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduledOp {
    pub start: f32,
    pub end: f32,
    pub op: TimelineOp,
}

#[derive(Debug, Clone, Serialize)]
pub struct Timeline {
    pub ops: Vec<ScheduledOp>,
    pub tracks: Vec<LineTrack>,
    pub duration: f32,
}

impl Timeline {
    pub fn compile(sequence: &Sequence, visuals: &[LineVisual], plan: &LayoutPlan) -> Result<Self> {
        let mut tracks = visuals.iter().map(LineTrack::for_visual).collect::<Vec<_>>();
        let mut ops = Vec::with_capacity(sequence.ops.len());
        let mut clock = 0.0_f32;

        for op in &sequence.ops {
            let start = clock;
            let end = start + op.duration();
            match op {
                TimelineOp::Wait { .. } => {}
                TimelineOp::Reveal { targets, style, .. } => {
                    for target in targets {
                        let visual = visuals.get(target.line_index).ok_or_else(|| {
                            anyhow!("reveal references unknown line index {}", target.line_index)
                        })?;
                        let track = &mut tracks[target.line_index];
                        let destination = match target.slot {
                            Some(slot) => Point::new(visual.final_position.x, plan.slot_y(slot)),
                            None => visual.final_position,
                        };
                        let offset = visual.entry_offset();
                        let entry = destination.offset(offset.x, offset.y);
                        let content_entry = if visual.content_enters_in_place() {
                            destination
                        } else {
                            entry
                        };
                        let ease = EasingCurve::EaseInOut;
                        track.gutter.push_from(start, end, entry, destination, ease);
                        track.content.push_from(start, end, content_entry, destination, ease);
                        let opacity_from = if *style == RevealStyle::FadeIn { 0.0 } else { 1.0 };
                        track.opacity.push_from(start, end, opacity_from, 1.0, ease);
                        track.scale.push(start, end, 1.0, ease);
                        track.revealed.push(start, end, 1.0, EasingCurve::Linear);
                    }
                }
                TimelineOp::ScrollOff { lines, distance, .. } => {
                    for index in lines {
                        let track = tracks
                            .get_mut(*index)
                            .ok_or_else(|| {
                                anyhow!("scroll references unknown line index {index}")
                            })?;
                        let gutter = track.gutter.current().offset(0.0, -distance);
                        let content = track.content.current().offset(0.0, -distance);
                        track.gutter.push(start, end, gutter, EasingCurve::EaseInOut);
                        track.content.push(start, end, content, EasingCurve::EaseInOut);
                    }
                }
            }
            ops.push(ScheduledOp {
                start,
                end,
                op: op.clone(),
            });
            clock = end;
        }

        Ok(Self {
            ops,
            tracks,
            duration: clock,
        })
    }

    pub fn sample(&self, line_index: usize, t: f32) -> Option<LineState> {
        self.tracks.get(line_index).map(|track| track.sample(t))
    }

    /// `ceil(duration * fps)`, at least one. Float noise below a thousandth of
    /// a frame does not add a frame.
    pub fn frame_count(&self, fps: u32) -> u32 {
        (self.duration * fps as f32 - 1e-3).ceil().max(1.0) as u32
    }

    pub fn frame_time(frame: u32, fps: u32) -> f32 {
        frame as f32 / fps as f32
    }

    /// Frame ranges, one per op that spans at least one frame. The last range
    /// always ends at `frame_count`.
    pub fn section_frames(&self, fps: u32) -> Vec<Range<u32>> {
        let total = self.frame_count(fps);
        let mut sections = Vec::new();
        let mut cursor = 0;
        for (position, scheduled) in self.ops.iter().enumerate() {
            let end = if position + 1 == self.ops.len() {
                total
            } else {
                ((scheduled.end * fps as f32).round() as u32).min(total)
            };
            if end > cursor {
                sections.push(cursor..end);
                cursor = end;
            }
        }
        if cursor < total {
            sections.push(cursor..total);
        }
        sections
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{plan_layout, FontMetrics, LayoutInput, Viewport, FRAME_HEIGHT_UNITS};
    use crate::line_visual::build_line_visuals;
    use crate::schema::{AnimationTiming, Orientation, RevealGroup, Rgb};
    use crate::sequencer::{sequence_reveals, DuplicatePolicy, SequencerSettings};
    use crate::source::SourceLine;

    fn fixture(
        count: u32,
        style: RevealStyle,
        chunk: Option<usize>,
    ) -> (LayoutPlan, Vec<LineVisual>, Sequence) {
        let lines = (1..=count)
            .map(|line_number| SourceLine {
                line_number,
                text: format!("line {line_number}"),
            })
            .collect::<Vec<_>>();
        let mut plan = plan_layout(
            LayoutInput {
                line_count: lines.len(),
                max_line_number: count,
                max_line_columns: 12,
            },
            Viewport {
                frame_width: FRAME_HEIGHT_UNITS * 16.0 / 9.0,
                frame_height: FRAME_HEIGHT_UNITS,
                orientation: Orientation::Landscape,
            },
            FontMetrics::default(),
        )
        .expect("plan");
        if let Some(capacity) = chunk {
            plan.chunked = true;
            plan.chunk_capacity = capacity;
        }
        let visuals = build_line_visuals(&lines, &[], &plan, style, Rgb::new(255, 255, 255))
            .expect("visuals");
        let numbers = lines.iter().map(|line| line.line_number).collect::<Vec<_>>();
        let sequence = sequence_reveals(
            &numbers,
            &[RevealGroup::AllRemaining],
            SequencerSettings::from_plan(
                &plan,
                AnimationTiming::default(),
                style,
                DuplicatePolicy::Skip,
            ),
        )
        .expect("sequence");
        (plan, visuals, sequence)
    }

    #[test]
    fn easing_matches_endpoints() {
        let curves = [
            EasingCurve::Linear,
            EasingCurve::EaseIn,
            EasingCurve::EaseOut,
            EasingCurve::EaseInOut,
        ];
        for curve in curves {
            assert_eq!(curve.apply(0.0), 0.0);
            assert_eq!(curve.apply(1.0), 1.0);
        }
        assert_eq!(EasingCurve::EaseInOut.apply(0.5), 0.5);
    }

    #[test]
    fn lines_are_hidden_before_reveal_and_settle_after() {
        let (plan, visuals, sequence) = fixture(3, RevealStyle::SlideLeft, None);
        let timeline = Timeline::compile(&sequence, &visuals, &plan).expect("timeline");
        let before = timeline.sample(0, 0.5).expect("state");
        assert_eq!(before.opacity, 0.0);
        assert_eq!(before.gutter_position, visuals[0].enter_start_position);

        let after = timeline.sample(0, timeline.duration).expect("state");
        assert_eq!(after.opacity, 1.0);
        assert_eq!(after.gutter_position, visuals[0].final_position);
        assert_eq!(after.content_position, visuals[0].final_position);
    }

    #[test]
    fn duration_and_frames() {
        let (plan, visuals, sequence) = fixture(2, RevealStyle::FadeIn, None);
        let timeline = Timeline::compile(&sequence, &visuals, &plan).expect("timeline");
        // 1.0 initial + 0.8 reveal + 0.6 pause + 3.0 final
        assert!((timeline.duration - 5.4).abs() < 1e-5);
        assert_eq!(timeline.frame_count(60), 324);
        let sections = timeline.section_frames(60);
        assert_eq!(sections.first().map(|range| range.start), Some(0));
        assert_eq!(sections.last().map(|range| range.end), Some(324));
        assert_eq!(sections.len(), 4);
    }

    #[test]
    fn fade_in_stays_in_place() {
        let (plan, visuals, sequence) = fixture(1, RevealStyle::FadeIn, None);
        let timeline = Timeline::compile(&sequence, &visuals, &plan).expect("timeline");
        let mid = timeline.sample(0, 1.4).expect("state");
        assert_eq!(mid.gutter_position, visuals[0].final_position);
        assert!(mid.opacity > 0.0 && mid.opacity < 1.0);
    }

    #[test]
    fn typewriter_grows_content_in_place() {
        let (plan, visuals, sequence) = fixture(1, RevealStyle::Typewriter, None);
        let timeline = Timeline::compile(&sequence, &visuals, &plan).expect("timeline");
        let mid = timeline.sample(0, 1.4).expect("state");
        assert_eq!(mid.content_position, visuals[0].final_position);
        assert!((mid.revealed_fraction - 0.5).abs() < 1e-4);
        assert!(mid.gutter_position.x < visuals[0].final_position.x);
    }

    #[test]
    fn scrolled_lines_leave_the_frame() {
        let (plan, visuals, sequence) = fixture(4, RevealStyle::SlideLeft, Some(2));
        let timeline = Timeline::compile(&sequence, &visuals, &plan).expect("timeline");
        let end = timeline.sample(0, timeline.duration).expect("state");
        assert!(end.gutter_position.y + plan.line_height / 2.0 < 0.0);
        let third = timeline.sample(2, timeline.duration).expect("state");
        assert_eq!(third.gutter_position.y, plan.slot_y(0));
    }
}
