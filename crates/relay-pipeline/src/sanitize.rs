//! Filename and storage-key sanitization.
//!
//! Upstream Sintegre filenames arrive with MIME encoded-words, accented
//! characters, and a contingency-level suffix that must not leak into
//! storage keys. All cleanup lives here as pure functions so it can be
//! tested without network calls, and the blob store applies one uniform
//! policy to every key.

use base64::Engine as _;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Contingency-level suffix occasionally embedded in upstream filenames.
const CONTINGENCY_SUFFIX: &str = "_2° nível de contingência";

/// Characters left unescaped when percent-encoding a key segment.
const SEGMENT_KEEP: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.');

/// Normalizes an upstream filename for key construction.
///
/// Strips the contingency-level suffix and decodes RFC 2047 MIME
/// encoded-words. The result is still a display name; per-segment key
/// encoding happens in [`sanitize_key`].
pub fn clean_file_name(name: &str) -> String {
    decode_mime_words(&name.replace(CONTINGENCY_SUFFIX, ""))
}

/// Sanitizes a full storage key, segment by segment.
///
/// Each `/`-separated segment has MIME encoded-words decoded, accents folded
/// to ASCII, characters outside `[A-Za-z0-9 ._-]` dropped, and the result
/// percent-encoded. Applied uniformly to every uploaded key.
pub fn sanitize_key(key: &str) -> String {
    key.split('/')
        .map(sanitize_segment)
        .collect::<Vec<_>>()
        .join("/")
}

fn sanitize_segment(segment: &str) -> String {
    let decoded = decode_mime_words(segment);
    let folded: String = decoded.chars().map(fold_accent).collect();
    let kept: String = folded
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '.' | '_' | '-'))
        .collect();
    utf8_percent_encode(kept.trim(), SEGMENT_KEEP).to_string()
}

/// Decodes every RFC 2047 encoded-word (`=?charset?B?...?=`) in the input.
///
/// Only base64 ("B") encoding is handled; quoted-printable words and words
/// that fail to decode are left untouched, matching upstream behavior.
pub fn decode_mime_words(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("=?") {
        let Some(end) = rest[start..].find("?=") else { break };
        let word = &rest[start..start + end + 2];
        result.push_str(&rest[..start]);
        match decode_word(word) {
            Some(decoded) => result.push_str(&decoded),
            None => result.push_str(word),
        }
        rest = &rest[start + end + 2..];
    }
    result.push_str(rest);
    result
}

fn decode_word(word: &str) -> Option<String> {
    let inner = word.strip_prefix("=?")?.strip_suffix("?=")?;
    let mut parts = inner.splitn(3, '?');
    let _charset = parts.next()?;
    let encoding = parts.next()?;
    let text = parts.next()?;

    if !encoding.eq_ignore_ascii_case("b") {
        return None;
    }
    let bytes = base64::engine::general_purpose::STANDARD.decode(text).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

/// Folds common Latin accented characters to their ASCII base.
fn fold_accent(c: char) -> char {
    match c {
        'á' | 'à' | 'ã' | 'â' | 'ä' => 'a',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'ó' | 'ò' | 'õ' | 'ô' | 'ö' => 'o',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'ý' | 'ÿ' => 'y',
        'ñ' => 'n',
        'ç' => 'c',
        'Á' | 'À' | 'Ã' | 'Â' | 'Ä' => 'A',
        'É' | 'È' | 'Ê' | 'Ë' => 'E',
        'Í' | 'Ì' | 'Î' | 'Ï' => 'I',
        'Ó' | 'Ò' | 'Õ' | 'Ô' | 'Ö' => 'O',
        'Ú' | 'Ù' | 'Û' | 'Ü' => 'U',
        'Ý' => 'Y',
        'Ñ' => 'N',
        'Ç' => 'C',
        other => other,
    }
}
