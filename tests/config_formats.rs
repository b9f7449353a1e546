use std::fs;

use codereel::config::{
    load_render_config, parse_legacy, parse_structured_json, parse_structured_yaml,
    to_legacy_text, to_structured_json,
};
use codereel::error_codes::{find_coded_error, CONFIG_PARSE, CONFIG_RANGE};
use codereel::schema::{Orientation, RevealGroup, RevealStyle, DEFAULT_FINAL_PAUSE};

const LEGACY: &str = concat!(
    "demo.py\n2\n9\nfalse\n",
    "{\"strings\": \"#00ff00\"}\n",
    "portrait\n",
    "{\"lineSlideIn\": 0.4}\n",
    "2 3\n5-7\nSPLIT 8\nALL_REMAINING\n",
);

#[test]
fn legacy_structured_legacy_keeps_core_fields() {
    let legacy = parse_legacy(LEGACY).expect("legacy");
    let json = to_structured_json(&legacy).expect("json");
    let structured = parse_structured_json(&json).expect("reparse");
    let text = to_legacy_text(&structured).expect("legacy text");
    let back = parse_legacy(&text).expect("reparse legacy");

    for config in [&structured, &back] {
        assert_eq!(config.script_path, legacy.script_path);
        assert_eq!(config.start_line, 2);
        assert_eq!(config.end_line, 9);
        assert!(!config.include_comments);
        assert_eq!(config.line_groups, legacy.line_groups);
        assert_eq!(config.orientation, Orientation::Portrait);
    }
    assert_eq!(
        legacy.line_groups,
        vec![
            RevealGroup::Explicit(vec![2, 3]),
            RevealGroup::Explicit(vec![5, 6, 7]),
            RevealGroup::Split(8),
            RevealGroup::AllRemaining,
        ]
    );
    assert_eq!(back.animation_timing.line_slide_in, 0.4);
    assert_eq!(back.animation_timing.final_pause, DEFAULT_FINAL_PAUSE);
}

#[test]
fn camel_case_json_and_yaml_agree() {
    let json = parse_structured_json(
        r#"{"scriptPath": "a.rs", "startLine": 1, "endLine": 4, "animationType": "typewriter",
            "lineGroups": [[1, 2], "3-4"]}"#,
    )
    .expect("json");
    let yaml = parse_structured_yaml(concat!(
        "script_path: a.rs\nstart_line: 1\nend_line: 4\nanimation_type: typewriter\n",
        "line_groups:\n  - [1, 2]\n  - \"3-4\"\n",
    ))
    .expect("yaml");
    assert_eq!(json.line_groups, yaml.line_groups);
    assert_eq!(json.animation_type, RevealStyle::Typewriter);
    assert_eq!(yaml.animation_type, RevealStyle::Typewriter);
}

#[test]
fn loading_resolves_script_relative_to_config() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("demo.py"), "a = 1\nb = 2\nc = 3\n").expect("script");
    let config_path = dir.path().join("render.cfg");
    fs::write(&config_path, "demo.py\n1\n3\ntrue\nALL_REMAINING\n").expect("config");

    let config = load_render_config(&config_path).expect("load");
    assert_eq!(config.script_path, dir.path().join("demo.py"));
    assert_eq!(config.line_groups, vec![RevealGroup::AllRemaining]);
}

#[test]
fn bad_inputs_carry_configuration_codes() {
    let error = parse_structured_json("{not json").expect_err("parse");
    assert_eq!(find_coded_error(&error).expect("coded").code, CONFIG_PARSE);

    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("demo.py"), "a = 1\n").expect("script");
    let config_path = dir.path().join("render.json");
    fs::write(
        &config_path,
        r#"{"script_path": "demo.py", "start_line": 5, "end_line": 2}"#,
    )
    .expect("config");
    let error = load_render_config(&config_path).expect_err("range");
    assert_eq!(find_coded_error(&error).expect("coded").code, CONFIG_RANGE);
}
