//! Reveal sequencing.
//!
//! Walks the ordered reveal groups against the retained lines and produces the
//! operations the timeline compiles. In chunked mode the visible block is a grid
//! of `chunk_capacity` slots; when a reveal would not fit, everything visible is
//! scrolled off first. A line number is revealed at most once.

use std::collections::{BTreeSet, HashMap};

use anyhow::{bail, Result};
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use crate::error_codes::{CodedError, CONFIG_DUPLICATE_LINE};
use crate::layout::LayoutPlan;
use crate::schema::{AnimationTiming, RevealGroup, RevealStyle};

pub const SCROLL_DURATION: f32 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SequencerPhase {
    Idle,
    Building,
    Sequencing,
    Draining,
    Complete,
}

impl SequencerPhase {
    fn next(self) -> Option<Self> {
        match self {
            Self::Idle => Some(Self::Building),
            Self::Building => Some(Self::Sequencing),
            Self::Sequencing => Some(Self::Draining),
            Self::Draining => Some(Self::Complete),
            Self::Complete => None,
        }
    }
}

/// What to do with line numbers a group repeats or that were already shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    #[default]
    Skip,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SequencerSettings {
    pub chunked: bool,
    pub chunk_capacity: usize,
    pub scroll_distance: f32,
    pub timing: AnimationTiming,
    pub style: RevealStyle,
    pub duplicates: DuplicatePolicy,
}

impl SequencerSettings {
    pub fn from_plan(
        plan: &LayoutPlan,
        timing: AnimationTiming,
        style: RevealStyle,
        duplicates: DuplicatePolicy,
    ) -> Self {
        Self {
            chunked: plan.chunked,
            chunk_capacity: plan.chunk_capacity.max(1),
            scroll_distance: plan.scroll_distance(),
            timing,
            style,
            duplicates,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RevealTarget {
    pub line_index: usize,
    pub line_number: u32,
    /// Slot row in chunked mode; `None` means the precomputed final position.
    pub slot: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TimelineOp {
    Wait {
        duration: f32,
    },
    Reveal {
        targets: Vec<RevealTarget>,
        duration: f32,
        style: RevealStyle,
    },
    ScrollOff {
        lines: Vec<usize>,
        distance: f32,
        duration: f32,
    },
}

impl TimelineOp {
    pub fn duration(&self) -> f32 {
        match self {
            Self::Wait { duration }
            | Self::Reveal { duration, .. }
            | Self::ScrollOff { duration, .. } => *duration,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SequenceEvent {
    Reveal { lines: Vec<u32>, slots: Vec<usize> },
    ScrollOff { lines: Vec<u32> },
    Wait { seconds: f32 },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SequencerState {
    pub shown: BTreeSet<u32>,
    /// Indices of lines currently on screen, in slot order.
    pub visible: Vec<usize>,
    pub occupied: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Sequence {
    pub ops: Vec<TimelineOp>,
    pub events: Vec<SequenceEvent>,
}

impl Sequence {
    pub fn duration(&self) -> f32 {
        self.ops.iter().map(TimelineOp::duration).sum()
    }

    /// Line numbers of every reveal event, in order.
    pub fn reveal_batches(&self) -> Vec<Vec<u32>> {
        self.events
            .iter()
            .filter_map(|event| match event {
                SequenceEvent::Reveal { lines, .. } => Some(lines.clone()),
                _ => None,
            })
            .collect()
    }
}

pub struct RevealSequencer {
    settings: SequencerSettings,
    phase: SequencerPhase,
    line_numbers: Vec<u32>,
    index_of: HashMap<u32, usize>,
    state: SequencerState,
    ops: Vec<TimelineOp>,
    events: Vec<SequenceEvent>,
}

impl RevealSequencer {
    pub fn new(settings: SequencerSettings) -> Self {
        Self {
            settings,
            phase: SequencerPhase::Idle,
            line_numbers: Vec::new(),
            index_of: HashMap::new(),
            state: SequencerState::default(),
            ops: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn phase(&self) -> SequencerPhase {
        self.phase
    }

    pub fn state(&self) -> &SequencerState {
        &self.state
    }

    fn transition(&mut self, to: SequencerPhase) -> Result<()> {
        if self.phase.next() != Some(to) {
            bail!("illegal sequencer transition {:?} -> {:?}", self.phase, to);
        }
        debug!(from = ?self.phase, to = ?to, "sequencer transition");
        self.phase = to;
        Ok(())
    }

    /// Indexes the retained line numbers (ascending, as extracted).
    pub fn build(&mut self, line_numbers: &[u32]) -> Result<()> {
        self.transition(SequencerPhase::Building)?;
        self.line_numbers = line_numbers.to_vec();
        self.index_of = line_numbers
            .iter()
            .enumerate()
            .map(|(index, line)| (*line, index))
            .collect();
        Ok(())
    }

    pub fn run(&mut self, groups: &[RevealGroup]) -> Result<()> {
        self.transition(SequencerPhase::Sequencing)?;
        self.wait(self.settings.timing.initial_delay);
        for group in groups {
            match group {
                RevealGroup::Explicit(lines) => self.explicit(lines)?,
                RevealGroup::AllRemaining => self.all_remaining(),
                RevealGroup::Split(target) => self.split(*target),
            }
        }
        Ok(())
    }

    pub fn drain(&mut self) -> Result<()> {
        self.transition(SequencerPhase::Draining)?;
        self.wait(self.settings.timing.final_pause);
        Ok(())
    }

    pub fn finish(mut self) -> Result<Sequence> {
        self.transition(SequencerPhase::Complete)?;
        Ok(Sequence {
            ops: self.ops,
            events: self.events,
        })
    }

    fn free_slots(&self) -> usize {
        self.settings.chunk_capacity.saturating_sub(self.state.occupied)
    }

    fn explicit(&mut self, requested: &[u32]) -> Result<()> {
        let mut seen = BTreeSet::new();
        let mut pending = Vec::with_capacity(requested.len());
        for line in requested {
            let Some(index) = self.index_of.get(line).copied() else {
                debug!(line, "skipping line outside the retained range");
                continue;
            };
            if self.state.shown.contains(line) || !seen.insert(*line) {
                if self.settings.duplicates == DuplicatePolicy::Reject {
                    bail!(CodedError::configuration(
                        CONFIG_DUPLICATE_LINE,
                        format!("line {line} appears in more than one reveal"),
                    )
                    .with_details(json!({ "line": line })));
                }
                debug!(line, "skipping line that is already shown");
                continue;
            }
            pending.push(index);
        }
        if pending.is_empty() {
            return Ok(());
        }

        if !self.settings.chunked {
            self.reveal(&pending);
            self.wait(self.settings.timing.pause_between_groups);
            return Ok(());
        }

        for page in pending.chunks(self.settings.chunk_capacity) {
            if page.len() > self.free_slots() {
                self.scroll_off();
            }
            self.reveal(page);
            self.wait(self.settings.timing.pause_between_groups);
        }
        Ok(())
    }

    fn all_remaining(&mut self) {
        let remaining = self
            .line_numbers
            .iter()
            .enumerate()
            .filter(|(_, line)| !self.state.shown.contains(*line))
            .map(|(index, _)| index)
            .collect::<Vec<_>>();
        if remaining.is_empty() {
            return;
        }

        if !self.settings.chunked {
            self.reveal(&remaining);
            self.wait(self.settings.timing.pause_between_groups);
            return;
        }

        let mut rest = remaining.as_slice();
        while !rest.is_empty() {
            if self.free_slots() == 0 {
                self.scroll_off();
            }
            let take = self.free_slots().min(rest.len());
            let (batch, tail) = rest.split_at(take);
            self.reveal(batch);
            self.wait(self.settings.timing.pause_between_groups);
            rest = tail;
        }
    }

    fn split(&mut self, target: u32) {
        if self.settings.chunked && !self.state.visible.is_empty() {
            self.scroll_off();
        }
        let Some(index) = self.index_of.get(&target).copied() else {
            debug!(line = target, "split target outside the retained range");
            return;
        };
        if self.state.shown.contains(&target) {
            return;
        }
        self.reveal(&[index]);
        self.wait(self.settings.timing.pause_between_groups);
    }

    fn reveal(&mut self, indices: &[usize]) {
        let mut targets = Vec::with_capacity(indices.len());
        let mut slots = Vec::new();
        for index in indices {
            let line_number = self.line_numbers[*index];
            let slot = if self.settings.chunked {
                let slot = self.state.occupied;
                self.state.occupied += 1;
                slots.push(slot);
                Some(slot)
            } else {
                None
            };
            self.state.visible.push(*index);
            self.state.shown.insert(line_number);
            targets.push(RevealTarget {
                line_index: *index,
                line_number,
                slot,
            });
        }
        debug_assert!(
            !self.settings.chunked || self.state.occupied <= self.settings.chunk_capacity
        );
        self.events.push(SequenceEvent::Reveal {
            lines: targets.iter().map(|target| target.line_number).collect(),
            slots,
        });
        self.ops.push(TimelineOp::Reveal {
            targets,
            duration: self.settings.timing.line_slide_in,
            style: self.settings.style,
        });
    }

    fn scroll_off(&mut self) {
        if self.state.visible.is_empty() {
            return;
        }
        let lines = std::mem::take(&mut self.state.visible);
        self.state.occupied = 0;
        self.events.push(SequenceEvent::ScrollOff {
            lines: lines.iter().map(|index| self.line_numbers[*index]).collect(),
        });
        self.ops.push(TimelineOp::ScrollOff {
            lines,
            distance: self.settings.scroll_distance,
            duration: SCROLL_DURATION,
        });
    }

    fn wait(&mut self, seconds: f32) {
        self.events.push(SequenceEvent::Wait { seconds });
        self.ops.push(TimelineOp::Wait { duration: seconds });
    }
}

/// Runs the full state machine over `groups`.
pub fn sequence_reveals(
    line_numbers: &[u32],
    groups: &[RevealGroup],
    settings: SequencerSettings,
) -> Result<Sequence> {
    let mut sequencer = RevealSequencer::new(settings);
    sequencer.build(line_numbers)?;
    sequencer.run(groups)?;
    sequencer.drain()?;
    sequencer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(chunked: bool, capacity: usize) -> SequencerSettings {
        SequencerSettings {
            chunked,
            chunk_capacity: capacity,
            scroll_distance: 10.0,
            timing: AnimationTiming::default(),
            style: RevealStyle::SlideLeft,
            duplicates: DuplicatePolicy::Skip,
        }
    }

    fn groups(tokens: &[&str]) -> Vec<RevealGroup> {
        tokens
            .iter()
            .map(|token| RevealGroup::parse(token).expect("group"))
            .collect()
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        let mut sequencer = RevealSequencer::new(settings(false, 5));
        assert!(sequencer.run(&[]).is_err());
        sequencer.build(&[1]).expect("build");
        assert!(sequencer.build(&[1]).is_err());
        assert_eq!(sequencer.phase(), SequencerPhase::Building);
    }

    #[test]
    fn output_is_bracketed_by_initial_and_final_waits() {
        let sequence =
            sequence_reveals(&[1, 2], &groups(&["1 2"]), settings(false, 2)).expect("sequence");
        assert_eq!(sequence.ops.first(), Some(&TimelineOp::Wait { duration: 1.0 }));
        assert_eq!(sequence.ops.last(), Some(&TimelineOp::Wait { duration: 3.0 }));
    }

    #[test]
    fn unknown_and_repeated_lines_are_skipped() {
        let sequence = sequence_reveals(
            &[1, 2, 3],
            &groups(&["2 2 9", "2 3", "1"]),
            settings(false, 3),
        )
        .expect("sequence");
        assert_eq!(sequence.reveal_batches(), vec![vec![2], vec![3], vec![1]]);
    }

    #[test]
    fn filtered_out_group_emits_nothing() {
        let reveal_groups = groups(&["1 2", "2", "ALL_REMAINING"]);
        let sequence =
            sequence_reveals(&[1, 2], &reveal_groups, settings(false, 2)).expect("sequence");
        // initial wait, reveal, pause, final wait
        assert_eq!(sequence.ops.len(), 4);
    }

    #[test]
    fn strict_policy_rejects_duplicates() {
        let mut strict = settings(false, 3);
        strict.duplicates = DuplicatePolicy::Reject;
        let error =
            sequence_reveals(&[1, 2, 3], &groups(&["1 2", "2"]), strict).expect_err("duplicate");
        let coded = crate::error_codes::find_coded_error(&error).expect("coded");
        assert_eq!(coded.code, CONFIG_DUPLICATE_LINE);
    }

    #[test]
    fn explicit_overflow_scrolls_first() {
        let lines = (1..=6).collect::<Vec<u32>>();
        let sequence = sequence_reveals(&lines, &groups(&["1 2", "3 4 5"]), settings(true, 3))
            .expect("sequence");
        let kinds = sequence
            .events
            .iter()
            .filter(|event| !matches!(event, SequenceEvent::Wait { .. }))
            .cloned()
            .collect::<Vec<_>>();
        assert_eq!(
            kinds,
            vec![
                SequenceEvent::Reveal { lines: vec![1, 2], slots: vec![0, 1] },
                SequenceEvent::ScrollOff { lines: vec![1, 2] },
                SequenceEvent::Reveal { lines: vec![3, 4, 5], slots: vec![0, 1, 2] },
            ]
        );
    }

    #[test]
    fn oversized_explicit_group_is_paged() {
        let lines = (1..=7).collect::<Vec<u32>>();
        let sequence =
            sequence_reveals(&lines, &groups(&["1-7"]), settings(true, 3)).expect("sequence");
        assert_eq!(
            sequence.reveal_batches(),
            vec![vec![1, 2, 3], vec![4, 5, 6], vec![7]]
        );
    }

    #[test]
    fn unchunked_split_never_scrolls() {
        let reveal_groups = groups(&["1", "SPLIT 3", "ALL_REMAINING"]);
        let sequence =
            sequence_reveals(&[1, 2, 3], &reveal_groups, settings(false, 3)).expect("sequence");
        assert!(!sequence
            .events
            .iter()
            .any(|event| matches!(event, SequenceEvent::ScrollOff { .. })));
        assert_eq!(sequence.reveal_batches(), vec![vec![1], vec![3], vec![2]]);
    }

    #[test]
    fn split_reveals_into_slot_zero() {
        let lines = (1..=4).collect::<Vec<u32>>();
        let sequence = sequence_reveals(&lines, &groups(&["1 2", "SPLIT 4"]), settings(true, 3))
            .expect("sequence");
        assert!(sequence.events.contains(&SequenceEvent::Reveal {
            lines: vec![4],
            slots: vec![0]
        }));
    }
}
