use anyhow::{bail, Result};
use serde::Serialize;

use crate::classifier::{ClassifierCache, TokenCategory, TokenClassifier};
use crate::lexer::Token;
use crate::schema::Rgb;

/// Colored span over display character offsets `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ColorRun {
    pub start: usize,
    pub end: usize,
    pub color: Rgb,
}

/// Splits a whole-file token stream into per-line token lists. Tokens spanning a
/// newline (block comments, doc strings) are cut at each `\n`, keeping their
/// category on every piece.
pub fn split_tokens_by_line(tokens: &[Token]) -> Vec<Vec<Token>> {
    let mut lines = vec![Vec::new()];
    for token in tokens {
        let mut pieces = token.text.split('\n').peekable();
        while let Some(piece) = pieces.next() {
            if !piece.is_empty() {
                if let Some(current) = lines.last_mut() {
                    current.push(Token::new(token.category, piece));
                }
            }
            if pieces.peek().is_some() {
                lines.push(Vec::new());
            }
        }
    }
    lines
}

/// Color runs for one line's tokens, in display offsets. Default-colored and
/// whitespace tokens produce no run; touching runs of one color are merged.
pub fn line_color_runs(
    tokens: &[Token],
    classifier: &TokenClassifier,
    cache: &mut ClassifierCache,
) -> Vec<ColorRun> {
    let mut runs: Vec<ColorRun> = Vec::new();
    let mut offset = 0;
    for token in tokens {
        let width = token.text.chars().count();
        let start = offset;
        offset += width;
        if width == 0 || token.category == TokenCategory::Whitespace {
            continue;
        }
        let color = classifier.classify(token.category, cache);
        if color == classifier.default_color() {
            continue;
        }
        match runs.last_mut() {
            Some(last) if last.end == start && last.color == color => last.end = offset,
            _ => runs.push(ColorRun {
                start,
                end: offset,
                color,
            }),
        }
    }
    runs
}

/// Moves runs from display offsets into content offsets (leading spaces
/// stripped). Parts that fall inside the indent are clipped away. A run that
/// reaches past the end of the line belongs to some other line and is an error.
pub fn remap_to_content(
    runs: &[ColorRun],
    leading_spaces: usize,
    content_len: usize,
) -> Result<Vec<ColorRun>> {
    let line_len = leading_spaces + content_len;
    let mut remapped = Vec::with_capacity(runs.len());
    for run in runs {
        if run.end > line_len {
            bail!(
                "color run {}..{} out of bounds for a line of {} chars",
                run.start,
                run.end,
                line_len
            );
        }
        let start = run.start.saturating_sub(leading_spaces);
        let end = run.end.saturating_sub(leading_spaces);
        if start >= end {
            continue;
        }
        remapped.push(ColorRun {
            start,
            end,
            color: run.color,
        });
    }
    Ok(remapped)
}
