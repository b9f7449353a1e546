use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use fontdue::{Font, FontSettings};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error_codes::{CodedError, CONFIG_INVALID};
use crate::layout::{FontMetrics, DEFAULT_ADVANCE_EM};

pub const FONT_ENV_VAR: &str = "CODEREEL_FONT";

/// Monospace faces probed when no font is configured, in order.
pub const SYSTEM_MONOSPACE_CANDIDATES: [&str; 10] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSansMono.ttf",
    "/usr/share/fonts/dejavu/DejaVuSansMono.ttf",
    "/usr/share/fonts/TTF/DejaVuSansMono.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationMono-Regular.ttf",
    "/usr/share/fonts/liberation-mono/LiberationMono-Regular.ttf",
    "/usr/share/fonts/truetype/ubuntu/UbuntuMono-R.ttf",
    "/usr/share/fonts/noto/NotoSansMono-Regular.ttf",
    "/System/Library/Fonts/Menlo.ttc",
    "/System/Library/Fonts/Monaco.ttf",
    "C:\\Windows\\Fonts\\consola.ttf",
];

pub struct LoadedFont {
    pub font: Font,
    pub path: PathBuf,
    pub sha256: String,
}

impl std::fmt::Debug for LoadedFont {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedFont")
            .field("path", &self.path)
            .field("sha256", &self.sha256)
            .finish()
    }
}

impl LoadedFont {
    /// Advance of `'0'` as a fraction of the em.
    pub fn metrics(&self) -> FontMetrics {
        let probe_px = 1000.0;
        let advance = self.font.metrics('0', probe_px).advance_width;
        if advance > 0.0 {
            FontMetrics {
                advance_em: advance / probe_px,
            }
        } else {
            FontMetrics {
                advance_em: DEFAULT_ADVANCE_EM,
            }
        }
    }
}

/// Explicit path, then `CODEREEL_FONT`, then the first system candidate found.
pub fn resolve_font_path(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Ok(value) = env::var(FONT_ENV_VAR) {
        if !value.trim().is_empty() {
            return Ok(PathBuf::from(value));
        }
    }
    SYSTEM_MONOSPACE_CANDIDATES
        .iter()
        .map(PathBuf::from)
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| {
            anyhow!(CodedError::configuration(
                CONFIG_INVALID,
                format!(
                    "no monospace font found; pass --font or set {FONT_ENV_VAR}"
                ),
            ))
        })
}

pub fn load_font(path: &Path) -> Result<LoadedFont> {
    let bytes = fs::read(path).map_err(|error| {
        anyhow!(CodedError::configuration(
            CONFIG_INVALID,
            format!("failed to read font file '{}': {error}", path.display()),
        ))
    })?;
    let sha256 = sha256_hex(&bytes);
    let font = Font::from_bytes(bytes, FontSettings::default())
        .map_err(|error| anyhow!("failed to parse font '{}': {error}", path.display()))?;
    debug!(path = %path.display(), %sha256, "loaded font");
    Ok(LoadedFont {
        font,
        path: path.to_path_buf(),
        sha256,
    })
}

pub fn discover_font(explicit: Option<&Path>) -> Result<LoadedFont> {
    let path = resolve_font_path(explicit)?;
    load_font(&path).with_context(|| format!("font '{}' is unusable", path.display()))
}

/// Characters in `text` the font has no glyph for; they render as `?`.
pub fn missing_glyphs(font: &Font, text: &str) -> Vec<char> {
    let mut missing = Vec::new();
    for ch in text.chars() {
        if ch.is_whitespace() {
            continue;
        }
        if font.lookup_glyph_index(ch) == 0 && !missing.contains(&ch) {
            missing.push(ch);
        }
    }
    missing
}

pub fn warn_missing_glyphs(font: &LoadedFont, text: &str) {
    let missing = missing_glyphs(&font.font, text);
    if !missing.is_empty() {
        let listed = missing
            .iter()
            .map(|ch| format!("U+{:04X}", *ch as u32))
            .collect::<Vec<_>>()
            .join(", ");
        warn!(
            font = %font.path.display(),
            missing = %listed,
            "font lacks glyphs; substituting '?'"
        );
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
