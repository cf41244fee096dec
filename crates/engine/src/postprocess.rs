//! Reply clean-up applied to upstream text before it is stored or returned.
//!
//! Order: literal `\uXXXX` escapes are decoded, the text is NFC-normalized,
//! chat-template artifacts and zero-width spaces are removed, and the result
//! is trimmed and clipped.

use regex_lite::Regex;
use std::sync::LazyLock;
use unicode_normalization::UnicodeNormalization;

static TEMPLATE_ARTIFACTS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)(</s>|\[/?INST\])\s*").ok());

const ZERO_WIDTH_SPACE: char = '\u{200b}';

/// Run the full clean-up pipeline and clip to `max_chars`.
pub fn clean_reply(raw: &str, max_chars: usize) -> String {
    let decoded = decode_unicode_escapes(raw);
    let normalized: String = decoded.nfc().collect();
    clip(&strip_artifacts(&normalized), max_chars)
}

/// Replace literal `\uXXXX` sequences with the characters they name.
///
/// Surrogate pairs written as two escapes are combined. Anything that does
/// not decode to a valid character is left as written.
pub fn decode_unicode_escapes(input: &str) -> String {
    if !input.contains("\\u") {
        return input.to_string();
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(pos) = rest.find("\\u") {
        out.push_str(&rest[..pos]);
        let escape = &rest[pos..];
        match decode_escape(escape) {
            Some((ch, consumed)) => {
                out.push(ch);
                rest = &escape[consumed..];
            }
            None => {
                out.push_str("\\u");
                rest = &escape[2..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Four hex digits following a `\u` at the start of `s`.
fn hex_unit(s: &str) -> Option<u32> {
    let digits = s.strip_prefix("\\u")?.get(..4)?;
    if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(digits, 16).ok()
}

/// Decode the escape at the start of `s`, returning the char and bytes used.
fn decode_escape(s: &str) -> Option<(char, usize)> {
    let unit = hex_unit(s)?;
    match unit {
        0xD800..=0xDBFF => {
            let low = hex_unit(s.get(6..)?)?;
            if !(0xDC00..=0xDFFF).contains(&low) {
                return None;
            }
            let code = 0x10000 + ((unit - 0xD800) << 10) + (low - 0xDC00);
            char::from_u32(code).map(|c| (c, 12))
        }
        0xDC00..=0xDFFF => None,
        _ => char::from_u32(unit).map(|c| (c, 6)),
    }
}

/// Remove `</s>`, `[INST]`, `[/INST]` (with trailing whitespace) and
/// zero-width spaces, then trim.
pub fn strip_artifacts(text: &str) -> String {
    let stripped = match TEMPLATE_ARTIFACTS.as_ref() {
        Some(re) => re.replace_all(text, "").into_owned(),
        None => text.to_string(),
    };
    stripped.replace(ZERO_WIDTH_SPACE, "").trim().to_string()
}

/// Clip to at most `max_chars` characters, ending in `...` when cut.
pub fn clip(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    clipped.push_str("...");
    clipped
}
