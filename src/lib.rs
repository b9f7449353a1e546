pub mod cache;
pub mod classifier;
pub mod color_runs;
pub mod config;
pub mod encoding;
pub mod error_codes;
pub mod font;
pub mod job;
pub mod layout;
pub mod lexer;
pub mod line_visual;
pub mod pipeline;
pub mod progress;
pub mod quality;
pub mod renderer;
pub mod schema;
pub mod sequencer;
pub mod service;
pub mod source;
pub mod timeline;
