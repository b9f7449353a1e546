use std::fs;

use anyhow::{anyhow, bail, Result};
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use crate::error_codes::{CodedError, CONFIG_INVALID, CONFIG_RANGE};
use crate::lexer::Language;
use crate::schema::RenderConfig;

pub const TAB_WIDTH: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceLine {
    pub line_number: u32,
    /// Tab-expanded, right-trimmed display text.
    pub text: String,
}

impl SourceLine {
    pub fn leading_spaces(&self) -> usize {
        self.text.chars().take_while(|ch| *ch == ' ').count()
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// The whole file in display form plus the retained slice of it.
#[derive(Debug, Clone)]
pub struct SourceText {
    pub language: Language,
    /// Every line of the file, display form, index = line_number - 1.
    pub display_lines: Vec<String>,
    pub lines: Vec<SourceLine>,
}

impl SourceText {
    pub fn line(&self, line_number: u32) -> Option<&SourceLine> {
        self.lines
            .iter()
            .find(|line| line.line_number == line_number)
    }

    pub fn line_numbers(&self) -> Vec<u32> {
        self.lines.iter().map(|line| line.line_number).collect()
    }

    /// Full display text joined with `\n`, as handed to the lexer.
    pub fn display_text(&self) -> String {
        self.display_lines.join("\n")
    }
}

pub fn load_source(config: &RenderConfig) -> Result<SourceText> {
    let bytes = fs::read(&config.script_path).map_err(|error| {
        anyhow!(CodedError::configuration(
            CONFIG_INVALID,
            format!(
                "failed to read script {}: {error}",
                config.script_path.display()
            ),
        ))
    })?;
    let contents = String::from_utf8(bytes).map_err(|error| {
        anyhow!(CodedError::external_tool(format!(
            "script {} is not valid UTF-8 (byte offset {})",
            config.script_path.display(),
            error.utf8_error().valid_up_to()
        )))
    })?;
    let language = Language::from_path(&config.script_path);
    extract_lines(&contents, language, config)
}

pub fn extract_lines(
    contents: &str,
    language: Language,
    config: &RenderConfig,
) -> Result<SourceText> {
    config.validate()?;
    let display_lines = contents.lines().map(expand_display_line).collect::<Vec<_>>();
    let file_length = display_lines.len() as u32;

    if config.end_line > file_length {
        bail!(CodedError::configuration(
            CONFIG_RANGE,
            format!(
                "line range {}-{} is outside the file ({} lines)",
                config.start_line, config.end_line, file_length
            ),
        )
        .with_details(json!({
            "start_line": config.start_line,
            "end_line": config.end_line,
            "file_length": file_length
        })));
    }

    let mut lines = Vec::with_capacity((config.end_line - config.start_line + 1) as usize);
    for line_number in config.start_line..=config.end_line {
        let text = &display_lines[(line_number - 1) as usize];
        if !config.include_comments && language.is_comment_only(text) {
            continue;
        }
        lines.push(SourceLine {
            line_number,
            text: text.clone(),
        });
    }

    if lines.is_empty() {
        bail!(CodedError::empty_content(format!(
            "lines {}-{} of {} contain nothing to animate once comments are removed",
            config.start_line,
            config.end_line,
            config.script_path.display()
        )));
    }

    debug!(
        retained = lines.len(),
        ?language,
        "extracted source lines"
    );
    Ok(SourceText {
        language,
        display_lines,
        lines,
    })
}

pub fn expand_display_line(raw: &str) -> String {
    raw.trim_end().replace('\t', &" ".repeat(TAB_WIDTH))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_codes::{find_coded_error, EMPTY_CONTENT};

    const PY: &str = "import os\n# comment\n\tdef f():\n    # nested comment\n        return 1\n";

    fn config(start: u32, end: u32, include_comments: bool) -> RenderConfig {
        let mut config = RenderConfig::new("demo.py", start, end);
        config.include_comments = include_comments;
        config
    }

    #[test]
    fn retained_count_drops_comment_only_lines() {
        let with = extract_lines(PY, Language::Python, &config(1, 5, true)).expect("extract");
        assert_eq!(with.lines.len(), 5);
        let without = extract_lines(PY, Language::Python, &config(1, 5, false)).expect("extract");
        assert_eq!(without.line_numbers(), vec![1, 3, 5]);
    }

    #[test]
    fn tabs_expand_to_four_spaces() {
        let text = extract_lines(PY, Language::Python, &config(3, 3, true)).expect("extract");
        assert_eq!(text.lines[0].text, "    def f():");
        assert_eq!(text.lines[0].leading_spaces(), 4);
    }

    #[test]
    fn range_past_end_of_file_is_configuration_error() {
        let error = extract_lines(PY, Language::Python, &config(2, 9, true)).expect_err("range");
        assert_eq!(find_coded_error(&error).expect("coded").code, CONFIG_RANGE);
    }

    #[test]
    fn all_comment_range_is_empty_content() {
        let error = extract_lines(PY, Language::Python, &config(2, 2, false)).expect_err("empty");
        assert_eq!(find_coded_error(&error).expect("coded").code, EMPTY_CONTENT);
    }

    #[test]
    fn hash_lines_are_kept_for_c_preprocessor() {
        let cpp = "#include <vector>\n// note\nint x = 1;\n";
        let mut cfg = config(1, 3, false);
        cfg.script_path = "demo.cpp".into();
        let text = extract_lines(cpp, Language::Cpp, &cfg).expect("extract");
        assert_eq!(text.line_numbers(), vec![1, 3]);
    }
}
