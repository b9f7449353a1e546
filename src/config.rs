use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use serde_json::{json, Value};
use tracing::debug;

use crate::error_codes::{CodedError, CONFIG_INVALID, CONFIG_PARSE};
use crate::schema::{
    AnimationTiming, Orientation, RenderConfig, RevealGroup, SyntaxColors, TIMING_KEYS,
};

/// On-disk shape of a render configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Yaml,
    Legacy,
}

impl ConfigFormat {
    /// Extension first, then content sniffing; anything that is not an object is legacy text.
    pub fn detect(path: &Path, contents: &str) -> Self {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        match ext.as_str() {
            "json" => Self::Json,
            "yaml" | "yml" => Self::Yaml,
            _ if contents.trim_start().starts_with('{') => Self::Json,
            _ => Self::Legacy,
        }
    }
}

/// Loads any supported configuration format, resolves `script_path` against the
/// config's directory and validates it.
pub fn load_render_config(path: &Path) -> Result<RenderConfig> {
    let contents = fs::read_to_string(path).map_err(|error| {
        anyhow!(CodedError::configuration(
            CONFIG_PARSE,
            format!("failed to read configuration {}: {error}", path.display()),
        ))
    })?;
    let format = ConfigFormat::detect(path, &contents);
    debug!(path = %path.display(), ?format, "loading render configuration");

    let mut config = parse_render_config(&contents, format)
        .with_context(|| format!("failed to decode configuration {}", path.display()))?;

    let config_dir = path
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    config.script_path = resolve_script_path(&config_dir, &config.script_path)?;
    config.validate()?;
    Ok(config)
}

pub fn parse_render_config(contents: &str, format: ConfigFormat) -> Result<RenderConfig> {
    match format {
        ConfigFormat::Json => parse_structured_json(contents),
        ConfigFormat::Yaml => parse_structured_yaml(contents),
        ConfigFormat::Legacy => parse_legacy(contents),
    }
}

pub fn parse_structured_json(contents: &str) -> Result<RenderConfig> {
    serde_json::from_str(contents).map_err(|error| {
        anyhow!(CodedError::configuration(
            CONFIG_PARSE,
            format!("invalid configuration JSON: {error}"),
        )
        .with_details(json!({ "line": error.line(), "column": error.column() })))
    })
}

pub fn parse_structured_yaml(contents: &str) -> Result<RenderConfig> {
    serde_yaml::from_str(contents).map_err(|error| {
        let details = error
            .location()
            .map(|location| json!({ "line": location.line(), "column": location.column() }));
        let coded = CodedError::configuration(
            CONFIG_PARSE,
            format!("invalid configuration YAML: {error}"),
        );
        anyhow!(match details {
            Some(details) => coded.with_details(details),
            None => coded,
        })
    })
}

/// Structured JSON (pretty, snake_case keys) for a resolved configuration.
pub fn to_structured_json(config: &RenderConfig) -> Result<String> {
    serde_json::to_string_pretty(config).context("failed to serialize render configuration")
}

/// Fixed-position legacy text:
///
/// ```text
/// path
/// start
/// end
/// include-comments flag
/// [{colors json}]
/// [landscape|portrait]
/// [{timing json}]
/// group lines...
/// ```
pub fn parse_legacy(contents: &str) -> Result<RenderConfig> {
    let lines = contents.trim().lines().map(str::trim).collect::<Vec<_>>();
    if lines.len() < 4 {
        bail!(CodedError::configuration(
            CONFIG_PARSE,
            format!(
                "legacy configuration needs at least 4 lines \
                 (path, start, end, comments flag), got {}",
                lines.len()
            ),
        ));
    }

    let mut config = RenderConfig::new(
        lines[0],
        parse_legacy_number(lines[1], "start line")?,
        parse_legacy_number(lines[2], "end line")?,
    );
    config.include_comments = parse_legacy_flag(lines[3])?;

    let mut cursor = 4;
    let mut colors: Option<SyntaxColors> = None;
    let mut timing: Option<AnimationTiming> = None;

    if let Some(block) = lines.get(cursor).filter(|line| line.starts_with('{')) {
        let value = parse_legacy_json(block, cursor)?;
        if is_timing_block(&value) {
            timing = Some(decode_block(value, "animation timing")?);
        } else {
            colors = Some(decode_block(value, "syntax colors")?);
        }
        cursor += 1;
    }

    if let Some(orientation) = lines.get(cursor).and_then(|line| Orientation::from_keyword(line)) {
        config.orientation = orientation;
        cursor += 1;
    }

    if timing.is_none() {
        if let Some(block) = lines.get(cursor).filter(|line| line.starts_with('{')) {
            let value = parse_legacy_json(block, cursor)?;
            timing = Some(decode_block(value, "animation timing")?);
            cursor += 1;
        }
    }

    config.syntax_colors = colors.unwrap_or_default();
    config.animation_timing = timing.unwrap_or_default();
    config.line_groups = lines[cursor..]
        .iter()
        .filter(|line| !line.is_empty())
        .map(|line| RevealGroup::parse(line))
        .collect::<Result<Vec<_>>>()?;

    Ok(config)
}

/// Writes the legacy text form. Every optional block is emitted so nothing is lost.
pub fn to_legacy_text(config: &RenderConfig) -> Result<String> {
    let mut out = Vec::with_capacity(7 + config.line_groups.len());
    out.push(config.script_path.to_string_lossy().into_owned());
    out.push(config.start_line.to_string());
    out.push(config.end_line.to_string());
    out.push(if config.include_comments { "True" } else { "False" }.to_owned());
    out.push(
        serde_json::to_string(&config.syntax_colors).context("failed to serialize colors")?,
    );
    out.push(config.orientation.keyword().to_owned());
    out.push(
        serde_json::to_string(&config.animation_timing).context("failed to serialize timing")?,
    );
    out.extend(config.line_groups.iter().map(RevealGroup::to_string));

    let mut text = out.join("\n");
    text.push('\n');
    Ok(text)
}

fn resolve_script_path(config_dir: &Path, script_path: &Path) -> Result<PathBuf> {
    let resolved = if script_path.is_absolute() {
        script_path.to_path_buf()
    } else {
        config_dir.join(script_path)
    };

    if !resolved.is_file() {
        bail!(CodedError::configuration(
            CONFIG_INVALID,
            format!("script_path is not a readable file: {}", resolved.display()),
        )
        .with_details(json!({ "script_path": resolved.to_string_lossy() })));
    }
    Ok(resolved)
}

fn parse_legacy_number(value: &str, label: &str) -> Result<u32> {
    value.parse::<u32>().map_err(|_| {
        anyhow!(CodedError::configuration(
            CONFIG_PARSE,
            format!("legacy configuration {label} must be a positive integer, got '{value}'"),
        ))
    })
}

fn parse_legacy_flag(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "y" | "1" => Ok(true),
        "false" | "no" | "n" | "0" => Ok(false),
        _ => Err(anyhow!(CodedError::configuration(
            CONFIG_PARSE,
            format!("legacy include-comments flag must be true or false, got '{value}'"),
        ))),
    }
}

fn parse_legacy_json(block: &str, index: usize) -> Result<Value> {
    serde_json::from_str(block).map_err(|error| {
        anyhow!(CodedError::configuration(
            CONFIG_PARSE,
            format!("invalid JSON block on legacy line {}: {error}", index + 1),
        ))
    })
}

fn is_timing_block(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|object| object.keys().any(|key| TIMING_KEYS.contains(&key.as_str())))
}

fn decode_block<T: serde::de::DeserializeOwned>(value: Value, label: &str) -> Result<T> {
    serde_json::from_value(value).map_err(|error| {
        anyhow!(CodedError::configuration(
            CONFIG_PARSE,
            format!("invalid {label} block: {error}"),
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_codes::find_coded_error;
    use crate::schema::{Rgb, RevealStyle};

    const LEGACY: &str = concat!(
        "/tmp/demo.py\n3\n12\nFalse\n",
        "{\"keywords\": \"#ff0000\"}\n",
        "portrait\n",
        "{\"initialDelay\": 0.5}\n",
        "3 4\n\nSPLIT 8\nALL_REMAINING\n",
    );

    #[test]
    fn legacy_parses_every_block() {
        let config = parse_legacy(LEGACY).expect("legacy should parse");
        assert_eq!(config.script_path, PathBuf::from("/tmp/demo.py"));
        assert_eq!((config.start_line, config.end_line), (3, 12));
        assert!(!config.include_comments);
        assert_eq!(config.syntax_colors.keywords, Rgb::new(0xff, 0, 0));
        assert_eq!(config.orientation, Orientation::Portrait);
        assert_eq!(config.animation_timing.initial_delay, 0.5);
        assert_eq!(
            config.line_groups,
            vec![
                RevealGroup::Explicit(vec![3, 4]),
                RevealGroup::Split(8),
                RevealGroup::AllRemaining
            ]
        );
    }

    #[test]
    fn legacy_minimal_form_uses_defaults() {
        let config = parse_legacy("a.cpp\n1\n5\ntrue\n1 2\nALL_REMAINING").expect("parse");
        assert!(config.include_comments);
        assert_eq!(config.orientation, Orientation::Landscape);
        assert_eq!(config.syntax_colors, SyntaxColors::default());
        assert_eq!(config.animation_type, RevealStyle::SlideLeft);
        assert_eq!(config.line_groups.len(), 2);
    }

    #[test]
    fn legacy_timing_block_without_colors_is_recognized() {
        let config =
            parse_legacy("a.gd\n1\n5\ntrue\n{\"finalPause\": 1.25}\nALL_REMAINING").expect("parse");
        assert_eq!(config.animation_timing.final_pause, 1.25);
        assert_eq!(config.syntax_colors, SyntaxColors::default());
    }

    #[test]
    fn legacy_rejects_short_or_malformed_input() {
        let malformed = [
            "a.py\n1\n2",
            "a.py\none\n2\ntrue",
            "a.py\n1\n2\nmaybe",
            "a.py\n1\n2\ntrue\n{oops",
        ];
        for bad in malformed {
            let error = parse_legacy(bad).expect_err("should fail");
            let coded = find_coded_error(&error).expect("coded error");
            assert_eq!(coded.code, CONFIG_PARSE, "input: {bad:?}");
        }
    }

    #[test]
    fn legacy_writer_round_trips() {
        let config = parse_legacy(LEGACY).expect("parse");
        let text = to_legacy_text(&config).expect("write");
        let reparsed = parse_legacy(&text).expect("reparse");
        assert_eq!(reparsed.script_path, config.script_path);
        assert_eq!(reparsed.line_groups, config.line_groups);
        assert_eq!(reparsed.syntax_colors, config.syntax_colors);
        assert_eq!(reparsed.animation_timing, config.animation_timing);
        assert_eq!(reparsed.orientation, config.orientation);
    }

    #[test]
    fn json_errors_carry_location() {
        let error = parse_structured_json("{\n  \"script_path\": ").expect_err("should fail");
        let coded = find_coded_error(&error).expect("coded");
        assert_eq!(coded.code, CONFIG_PARSE);
        assert!(coded.details.as_ref().is_some_and(|details| details["line"] == 2));
    }

    #[test]
    fn yaml_config_parses() {
        let config = parse_structured_yaml(concat!(
            "script_path: demo.rs\nstart_line: 1\nend_line: 4\n",
            "line_groups:\n  - \"1 2\"\n  - ALL_REMAINING\n",
        ))
        .expect("yaml should parse");
        assert_eq!(config.line_groups.len(), 2);
    }

    #[test]
    fn format_detection_prefers_extension() {
        assert_eq!(ConfigFormat::detect(Path::new("a.json"), "x"), ConfigFormat::Json);
        assert_eq!(ConfigFormat::detect(Path::new("a.yml"), "{"), ConfigFormat::Yaml);
        let legacy_name = Path::new("anim_config.txt");
        assert_eq!(ConfigFormat::detect(legacy_name, " {\"a\":1}"), ConfigFormat::Json);
        assert_eq!(ConfigFormat::detect(legacy_name, "a.py\n1"), ConfigFormat::Legacy);
    }
}
