//! Post-processing: deterministic cleanup of raw OCR text.
//!
//! ## Why is post-processing necessary?
//!
//! OCR engines return text that is *correct* as recognition output but
//! awkward as document content:
//!
//! - tesseract terminates every page with a form feed (`\x0c`)
//! - line endings and trailing spaces depend on the engine and platform
//! - typographic ligatures (`ﬁ`, `ﬂ`) survive from the rendered glyphs
//! - zero-width characters and BOMs leak in from embedded PDF text layers
//! - column gaps become long runs of blank lines
//!
//! Each rule here is a pure `&str → String` pass, applied in a fixed order,
//! so the same engine output always yields the same page text.
//!
//! ## Rule Order
//!
//! Line endings are normalised before anything splits on `\n`, and
//! whitespace trimming runs before blank-line collapsing so lines holding
//! only spaces count as blank.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all cleanup rules to one page of raw OCR output.
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF / CR → LF)
/// 2. Drop form feeds and other stray control characters
/// 3. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 4. Expand typographic ligatures
/// 5. Trim trailing whitespace per line
/// 6. Collapse runs of blank lines to a single blank line
/// 7. Trim leading and trailing blank lines
pub fn clean_ocr_text(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_control_chars(&s);
    let s = remove_invisible_chars(&s);
    let s = expand_ligatures(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    trim_blank_edges(&s)
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Control characters ───────────────────────────────────────────────

fn remove_control_chars(input: &str) -> String {
    input
        .chars()
        .filter(|&c| c == '\n' || c == '\t' || !c.is_control())
        .collect()
}

// ── Rule 3: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 4: Ligatures ────────────────────────────────────────────────────────

fn expand_ligatures(input: &str) -> String {
    if !input.chars().any(|c| ('\u{FB00}'..='\u{FB06}').contains(&c)) {
        return input.to_string();
    }
    let mut out = String::with_capacity(input.len() + 8);
    for c in input.chars() {
        match c {
            '\u{FB00}' => out.push_str("ff"),
            '\u{FB01}' => out.push_str("fi"),
            '\u{FB02}' => out.push_str("fl"),
            '\u{FB03}' => out.push_str("ffi"),
            '\u{FB04}' => out.push_str("ffl"),
            '\u{FB05}' | '\u{FB06}' => out.push_str("st"),
            other => out.push(other),
        }
    }
    out
}

// ── Rule 5: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 6: Collapse excessive blank lines ───────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

// ── Rule 7: Trim blank edges ─────────────────────────────────────────────────

fn trim_blank_edges(input: &str) -> String {
    input.trim_matches('\n').to_string()
}
