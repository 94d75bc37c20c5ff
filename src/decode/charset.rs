//! Byte-to-text decoding for the charsets temp-mail senders actually use

use encoding_rs::{Encoding, ISO_8859_5, KOI8_R, WINDOWS_1251};
use std::borrow::Cow;
use thiserror::Error;

/// No decode table matched and the heuristic gave up.
///
/// Carries the untouched bytes so the caller can still show something.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unsupported encoding: {label}")]
pub struct UnsupportedEncoding {
    label: String,
    raw: Vec<u8>,
}

impl UnsupportedEncoding {
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// The original bytes as text, with invalid sequences replaced.
    #[must_use]
    pub fn into_lossy(self) -> String {
        match String::from_utf8(self.raw) {
            Ok(text) => text,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        }
    }
}

/// Decode `bytes` as text in the charset named by `label`.
///
/// `utf-8` and `us-ascii` pass through, `koi8-r`, `windows-1251`
/// (`cp1251`) and `iso-8859-5` use their tables. Labels are matched
/// case-insensitively. An empty or unknown label tries windows-1251,
/// then koi8-r, accepting the first decode that needs no replacement
/// characters. This guess is unreliable for short or mixed-script text.
///
/// # Errors
///
/// Returns [`UnsupportedEncoding`], carrying the original bytes, when
/// no table applies.
pub fn decode_charset(bytes: &[u8], label: &str) -> Result<String, UnsupportedEncoding> {
    let label = label.trim().to_ascii_lowercase();
    match label.as_str() {
        "utf-8" | "us-ascii" => Ok(String::from_utf8_lossy(bytes).into_owned()),
        "koi8-r" => Ok(with_table(KOI8_R, bytes)),
        "windows-1251" | "cp1251" => Ok(with_table(WINDOWS_1251, bytes)),
        "iso-8859-5" => Ok(with_table(ISO_8859_5, bytes)),
        _ => guess(bytes).ok_or_else(|| UnsupportedEncoding {
            label,
            raw: bytes.to_vec(),
        }),
    }
}

fn with_table(encoding: &'static Encoding, bytes: &[u8]) -> String {
    let (text, _) = encoding.decode_without_bom_handling(bytes);
    text.into_owned()
}

fn guess(bytes: &[u8]) -> Option<String> {
    [WINDOWS_1251, KOI8_R].into_iter().find_map(|encoding| {
        encoding
            .decode_without_bom_handling_and_without_replacement(bytes)
            .filter(|text| !text.contains(char::REPLACEMENT_CHARACTER))
            .map(Cow::into_owned)
    })
}
