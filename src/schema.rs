use std::fmt;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error_codes::{CodedError, CONFIG_INVALID};
use crate::quality::QualityPreset;

pub const DEFAULT_INITIAL_DELAY: f32 = 1.0;
pub const DEFAULT_LINE_SLIDE_IN: f32 = 0.8;
pub const DEFAULT_PAUSE_BETWEEN_GROUPS: f32 = 0.6;
pub const DEFAULT_FINAL_PAUSE: f32 = 3.0;

/// Keys that identify a JSON object as an animation timing block.
pub const TIMING_KEYS: [&str; 8] = [
    "initialDelay",
    "lineSlideIn",
    "pauseBetweenGroups",
    "finalPause",
    "initial_delay",
    "line_slide_in",
    "pause_between_groups",
    "final_pause",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RenderConfig {
    #[serde(alias = "scriptPath")]
    pub script_path: PathBuf,
    #[serde(alias = "startLine")]
    pub start_line: u32,
    #[serde(alias = "endLine")]
    pub end_line: u32,
    #[serde(default = "default_include_comments", alias = "includeComments")]
    pub include_comments: bool,
    #[serde(default, alias = "syntaxColors")]
    pub syntax_colors: SyntaxColors,
    #[serde(default)]
    pub orientation: Orientation,
    #[serde(default, alias = "animationTiming")]
    pub animation_timing: AnimationTiming,
    #[serde(default, alias = "animationType")]
    pub animation_type: RevealStyle,
    #[serde(default)]
    pub quality: QualityPreset,
    #[serde(default, alias = "lineGroups")]
    pub line_groups: Vec<RevealGroup>,
}

fn default_include_comments() -> bool {
    true
}

impl RenderConfig {
    pub fn new(script_path: impl Into<PathBuf>, start_line: u32, end_line: u32) -> Self {
        Self {
            script_path: script_path.into(),
            start_line,
            end_line,
            include_comments: true,
            syntax_colors: SyntaxColors::default(),
            orientation: Orientation::default(),
            animation_timing: AnimationTiming::default(),
            animation_type: RevealStyle::default(),
            quality: QualityPreset::default(),
            line_groups: Vec::new(),
        }
    }

    /// File-independent checks. Range-vs-file checks happen during source extraction.
    pub fn validate(&self) -> Result<()> {
        if self.script_path.as_os_str().is_empty() {
            bail!(CodedError::configuration(
                CONFIG_INVALID,
                "script_path cannot be empty"
            ));
        }
        if self.start_line == 0 {
            bail!(CodedError::configuration(
                crate::error_codes::CONFIG_RANGE,
                "start_line is 1-based and must be >= 1"
            )
            .with_details(json!({ "start_line": self.start_line })));
        }
        if self.start_line > self.end_line {
            bail!(CodedError::configuration(
                crate::error_codes::CONFIG_RANGE,
                format!(
                    "start_line ({}) must not exceed end_line ({})",
                    self.start_line, self.end_line
                ),
            )
            .with_details(json!({
                "start_line": self.start_line,
                "end_line": self.end_line
            })));
        }
        Ok(())
    }

    /// Groups to play. An empty list means "reveal everything at once".
    pub fn effective_groups(&self) -> Vec<RevealGroup> {
        if self.line_groups.is_empty() {
            vec![RevealGroup::AllRemaining]
        } else {
            self.line_groups.clone()
        }
    }

    /// `{base}_{start}-{end}`, without extension.
    pub fn output_stem(&self) -> String {
        let base = self
            .script_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "code".to_owned());
        format!("{base}_{}-{}", self.start_line, self.end_line)
    }

    pub fn output_file_name(&self) -> String {
        format!("{}.mp4", self.output_stem())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn parse_hex(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        let hex = trimmed
            .strip_prefix('#')
            .ok_or_else(|| anyhow!("color '{trimmed}' must start with '#'"))?;
        if hex.len() != 6 || !hex.chars().all(|ch| ch.is_ascii_hexdigit()) {
            bail!("color '{trimmed}' must have the form #RRGGBB");
        }
        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&hex[range], 16)
                .map_err(|error| anyhow!("color '{trimmed}': {error}"))
        };
        Ok(Self {
            r: channel(0..2)?,
            g: channel(2..4)?,
            b: channel(4..6)?,
        })
    }

    pub fn to_rgba(self, alpha: u8) -> [u8; 4] {
        [self.r, self.g, self.b, alpha]
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl TryFrom<String> for Rgb {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse_hex(&value)
    }
}

impl From<Rgb> for String {
    fn from(value: Rgb) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyntaxColors {
    pub keywords: Rgb,
    pub types: Rgb,
    pub functions: Rgb,
    pub strings: Rgb,
    pub numbers: Rgb,
    pub comments: Rgb,
    pub decorators: Rgb,
    pub default: Rgb,
}

impl Default for SyntaxColors {
    fn default() -> Self {
        Self {
            keywords: Rgb::new(0x9b, 0x59, 0xb6),
            types: Rgb::new(0x34, 0x98, 0xdb),
            functions: Rgb::new(0x34, 0x98, 0xdb),
            strings: Rgb::new(0x2e, 0xcc, 0x71),
            numbers: Rgb::new(0xe6, 0x7e, 0x22),
            comments: Rgb::new(0x7f, 0x8c, 0x8d),
            decorators: Rgb::new(0xf1, 0xc4, 0x0f),
            default: Rgb::new(0xff, 0xff, 0xff),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    #[default]
    Landscape,
    Portrait,
}

impl Orientation {
    pub fn from_keyword(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "landscape" => Some(Self::Landscape),
            "portrait" => Some(Self::Portrait),
            _ => None,
        }
    }

    pub fn keyword(self) -> &'static str {
        match self {
            Self::Landscape => "landscape",
            Self::Portrait => "portrait",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RawTiming")]
pub struct AnimationTiming {
    pub initial_delay: f32,
    pub line_slide_in: f32,
    pub pause_between_groups: f32,
    pub final_pause: f32,
}

impl Default for AnimationTiming {
    fn default() -> Self {
        Self {
            initial_delay: DEFAULT_INITIAL_DELAY,
            line_slide_in: DEFAULT_LINE_SLIDE_IN,
            pause_between_groups: DEFAULT_PAUSE_BETWEEN_GROUPS,
            final_pause: DEFAULT_FINAL_PAUSE,
        }
    }
}

/// Timing as submitted: numbers or numeric strings, any of which may be garbage.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTiming {
    #[serde(default, alias = "initial_delay")]
    initial_delay: Option<Value>,
    #[serde(default, alias = "line_slide_in")]
    line_slide_in: Option<Value>,
    #[serde(default, alias = "pause_between_groups")]
    pause_between_groups: Option<Value>,
    #[serde(default, alias = "final_pause")]
    final_pause: Option<Value>,
}

impl From<RawTiming> for AnimationTiming {
    fn from(raw: RawTiming) -> Self {
        Self {
            initial_delay: sanitize_seconds(raw.initial_delay.as_ref(), DEFAULT_INITIAL_DELAY),
            line_slide_in: sanitize_seconds(raw.line_slide_in.as_ref(), DEFAULT_LINE_SLIDE_IN),
            pause_between_groups: sanitize_seconds(
                raw.pause_between_groups.as_ref(),
                DEFAULT_PAUSE_BETWEEN_GROUPS,
            ),
            final_pause: sanitize_seconds(raw.final_pause.as_ref(), DEFAULT_FINAL_PAUSE),
        }
    }
}

/// Non-negative finite seconds, or `fallback`.
pub fn sanitize_seconds(value: Option<&Value>, fallback: f32) -> f32 {
    let parsed = match value {
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(text)) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(seconds) if seconds.is_finite() && seconds >= 0.0 => seconds as f32,
        _ => fallback,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevealStyle {
    #[default]
    SlideLeft,
    DropIn,
    FadeIn,
    ScaleIn,
    Typewriter,
}

impl RevealStyle {
    pub fn keyword(self) -> &'static str {
        match self {
            Self::SlideLeft => "slide_left",
            Self::DropIn => "drop_in",
            Self::FadeIn => "fade_in",
            Self::ScaleIn => "scale_in",
            Self::Typewriter => "typewriter",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawGroup", into = "String")]
pub enum RevealGroup {
    AllRemaining,
    Explicit(Vec<u32>),
    Split(u32),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawGroup {
    Text(String),
    Lines(Vec<u32>),
}

impl TryFrom<RawGroup> for RevealGroup {
    type Error = anyhow::Error;

    fn try_from(raw: RawGroup) -> Result<Self> {
        match raw {
            RawGroup::Text(text) => Self::parse(&text),
            RawGroup::Lines(lines) => {
                if lines.is_empty() {
                    bail!("line group array cannot be empty");
                }
                if lines.contains(&0) {
                    bail!("line numbers are 1-based; 0 is not a line");
                }
                Ok(Self::Explicit(lines))
            }
        }
    }
}

impl RevealGroup {
    pub const ALL_REMAINING: &'static str = "ALL_REMAINING";

    /// Parses `ALL_REMAINING`, `SPLIT <n>` or space-separated numbers / `a-b` ranges.
    pub fn parse(token: &str) -> Result<Self> {
        let trimmed = token.trim();
        if trimmed.eq_ignore_ascii_case(Self::ALL_REMAINING) {
            return Ok(Self::AllRemaining);
        }

        let mut words = trimmed.split_whitespace();
        if let Some(first) = words.next() {
            if first.eq_ignore_ascii_case("SPLIT") {
                let target = words.next().ok_or_else(|| invalid_group(trimmed))?;
                if words.next().is_some() {
                    return Err(invalid_group(trimmed));
                }
                let line = parse_line_number(target).ok_or_else(|| invalid_group(trimmed))?;
                return Ok(Self::Split(line));
            }
        }

        let mut lines = Vec::new();
        for word in trimmed.split_whitespace() {
            let expanded = parse_line_token(word).ok_or_else(|| invalid_group(trimmed))?;
            lines.extend(expanded);
        }
        if lines.is_empty() {
            return Err(invalid_group(trimmed));
        }
        Ok(Self::Explicit(lines))
    }
}

impl fmt::Display for RevealGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllRemaining => f.write_str(Self::ALL_REMAINING),
            Self::Split(line) => write!(f, "SPLIT {line}"),
            Self::Explicit(lines) => {
                let joined = lines
                    .iter()
                    .map(u32::to_string)
                    .collect::<Vec<_>>()
                    .join(" ");
                f.write_str(&joined)
            }
        }
    }
}

impl From<RevealGroup> for String {
    fn from(value: RevealGroup) -> Self {
        value.to_string()
    }
}

fn invalid_group(token: &str) -> anyhow::Error {
    anyhow!(CodedError::configuration(
        CONFIG_INVALID,
        format!("invalid line group '{token}'"),
    )
    .with_details(json!({
        "provided": token,
        "allowed": ["ALL_REMAINING", "SPLIT <line>", "<line> <line> ...", "<from>-<to>"]
    })))
}

fn parse_line_number(token: &str) -> Option<u32> {
    token.parse::<u32>().ok().filter(|line| *line > 0)
}

/// `"7"` -> `[7]`; `"3-5"` and `"5-3"` -> `[3, 4, 5]`.
fn parse_line_token(token: &str) -> Option<Vec<u32>> {
    if let Some((from, to)) = token.split_once('-') {
        let from = parse_line_number(from)?;
        let to = parse_line_number(to)?;
        let (low, high) = (from.min(to), from.max(to));
        return Some((low..=high).collect());
    }
    parse_line_number(token).map(|line| vec![line])
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn group_tokens_parse_all_forms() {
        assert_eq!(
            RevealGroup::parse("ALL_REMAINING").expect("parse"),
            RevealGroup::AllRemaining
        );
        assert_eq!(
            RevealGroup::parse("SPLIT 10").expect("parse"),
            RevealGroup::Split(10)
        );
        assert_eq!(
            RevealGroup::parse(" 4 2 9 ").expect("parse"),
            RevealGroup::Explicit(vec![4, 2, 9])
        );
        assert_eq!(
            RevealGroup::parse("1 5-3").expect("parse"),
            RevealGroup::Explicit(vec![1, 3, 4, 5])
        );
    }

    #[test]
    fn group_tokens_reject_garbage() {
        for bad in ["", "a-5", "SPLIT", "SPLIT x", "SPLIT 3 4", "0", "1 two"] {
            assert!(RevealGroup::parse(bad).is_err(), "'{bad}' should not parse");
        }
    }

    #[test]
    fn groups_deserialize_from_strings_and_arrays() {
        let groups: Vec<RevealGroup> =
            serde_json::from_value(json!(["1 2", [3], "SPLIT 4", "ALL_REMAINING"]))
                .expect("groups should parse");
        assert_eq!(
            groups,
            vec![
                RevealGroup::Explicit(vec![1, 2]),
                RevealGroup::Explicit(vec![3]),
                RevealGroup::Split(4),
                RevealGroup::AllRemaining,
            ]
        );
        let serialized = serde_json::to_value(&groups).expect("groups should serialize");
        assert_eq!(serialized, json!(["1 2", "3", "SPLIT 4", "ALL_REMAINING"]));
    }

    #[test]
    fn timing_sanitizes_bad_values() {
        let timing: AnimationTiming = serde_json::from_value(json!({
            "initialDelay": -1,
            "lineSlideIn": "0.25",
            "pause_between_groups": "soon",
        }))
        .expect("timing should parse");
        assert_eq!(timing.initial_delay, DEFAULT_INITIAL_DELAY);
        assert_eq!(timing.line_slide_in, 0.25);
        assert_eq!(timing.pause_between_groups, DEFAULT_PAUSE_BETWEEN_GROUPS);
        assert_eq!(timing.final_pause, DEFAULT_FINAL_PAUSE);
    }

    #[test]
    fn colors_parse_partially_and_round_trip() {
        let colors: SyntaxColors = serde_json::from_value(json!({ "keywords": "#FF0066" }))
            .expect("colors should parse");
        assert_eq!(colors.keywords, Rgb::new(0xff, 0x00, 0x66));
        assert_eq!(colors.strings, SyntaxColors::default().strings);
        assert_eq!(colors.keywords.to_string(), "#ff0066");
        assert!(Rgb::parse_hex("ff0066").is_err());
        assert!(Rgb::parse_hex("#ff00").is_err());
    }

    #[test]
    fn config_accepts_camel_case_request_shape() {
        let config: RenderConfig = serde_json::from_value(json!({
            "scriptPath": "demo.py",
            "startLine": 2,
            "endLine": 9,
            "includeComments": false,
            "lineGroups": ["2 3", "ALL_REMAINING"],
            "animationType": "drop_in",
            "quality": "fast",
            "orientation": "portrait",
        }))
        .expect("config should parse");
        assert_eq!(config.start_line, 2);
        assert!(!config.include_comments);
        assert_eq!(config.animation_type, RevealStyle::DropIn);
        assert_eq!(config.orientation, Orientation::Portrait);
        assert_eq!(config.quality, QualityPreset::Fast);
        assert_eq!(config.output_file_name(), "demo_2-9.mp4");
    }

    #[test]
    fn validate_rejects_inverted_range() {
        let config = RenderConfig::new("demo.rs", 9, 3);
        assert!(config.validate().is_err());
        assert!(RenderConfig::new("demo.rs", 0, 3).validate().is_err());
        assert!(RenderConfig::new("demo.rs", 3, 3).validate().is_ok());
    }
}
