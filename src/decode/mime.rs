//! Turning fetched records into [`Message`]s
//!
//! Decoding never fails outward. Every stage has a fallback: an
//! unparseable document is shown as guessed-charset text, a broken
//! transfer encoding leaves the bytes as they were, and an unknown
//! charset degrades to lossy UTF-8.

use super::charset::decode_charset;
use super::header::decode_header_bytes;
use super::html::html_to_text;
use crate::fetch::{RawAddress, RawRecord};
use crate::message::Message;
use base64::Engine as _;
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use mailparse::body::Body;
use mailparse::{MailHeaderMap, ParsedMail};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

/// Standard alphabet, padding optional, as mail clients emit it.
const BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// A `Content-Transfer-Encoding` that could not be undone.
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid quoted-printable: {0}")]
    QuotedPrintable(#[from] quoted_printable::QuotedPrintableError),
}

/// Undo a transfer encoding.
///
/// `base64` and `quoted-printable` (any case) are decoded; every other
/// value, including an empty one, returns the bytes unchanged. Line
/// breaks inside base64 are ignored.
///
/// # Errors
///
/// Returns [`TransferError`] when a base64 or quoted-printable body is
/// malformed.
pub fn decode_transfer(body: &[u8], encoding: &str) -> Result<Vec<u8>, TransferError> {
    match encoding.trim().to_ascii_lowercase().as_str() {
        "base64" => {
            let compact: Vec<u8> = body
                .iter()
                .copied()
                .filter(|b| !b.is_ascii_whitespace())
                .collect();
            Ok(BASE64.decode(compact)?)
        }
        "quoted-printable" => Ok(quoted_printable::decode(
            body,
            quoted_printable::ParseMode::Robust,
        )?),
        _ => Ok(body.to_vec()),
    }
}

/// Decode one fetched record into a [`Message`].
#[must_use]
pub fn decode_record(record: &RawRecord) -> Message {
    let mut message = Message {
        from: record.from.as_ref().map(sender).unwrap_or_default(),
        subject: record
            .subject
            .as_deref()
            .map(decode_header_bytes)
            .unwrap_or_default(),
        uid: record.uid,
        ..Message::default()
    };
    debug!(uid = record.uid, from = %message.from, subject = %message.subject, "Decoding message");

    for literal in &record.bodies {
        let body = decode_body(literal);
        if !body.plain.is_empty() {
            if !message.plain_content.is_empty() {
                message.plain_content.push_str("\n\n");
            }
            message.plain_content.push_str(&body.plain);
        }
        if message.html_content.is_empty() {
            message.html_content = body.html;
        }
    }

    message.plain_content = message.plain_content.replace('\0', "").trim().to_string();
    message.html_content = message.html_content.trim().to_string();
    message
}

fn sender(address: &RawAddress) -> String {
    if let Some(name) = address.personal_name.as_deref() {
        let name = decode_header_bytes(name);
        if !name.is_empty() {
            return name;
        }
    }
    let part = |p: Option<&[u8]>| -> String { p.map(String::from_utf8_lossy).unwrap_or_default().into_owned() };
    format!(
        "{}@{}",
        part(address.mailbox.as_deref()),
        part(address.host.as_deref())
    )
}

/// Text pulled out of one body literal.
#[derive(Debug, Default, PartialEq, Eq)]
struct DecodedBody {
    plain: String,
    html: String,
}

fn decode_body(raw: &[u8]) -> DecodedBody {
    let mail = match mailparse::parse_mail(raw) {
        Ok(mail) => mail,
        Err(e) => {
            debug!("Body is not a MIME document: {e}");
            return unstructured(raw);
        }
    };

    let Some((mimetype, params)) = content_type(&mail) else {
        debug!("Unparseable Content-Type, decoding body as plain text");
        return unstructured(raw);
    };

    let mut body = DecodedBody::default();
    if mimetype.starts_with("multipart/") {
        let mut walk = PartWalk::default();
        collect_parts(&mail, &mut walk);
        if !walk.recognised {
            debug!("No readable parts in multipart body, decoding it as plain text");
            return unstructured(&mail.get_body_raw().unwrap_or_else(|_| raw.to_vec()));
        }
        let plain = walk.plains.join("\n\n");
        body.plain = if plain.trim().is_empty() {
            html_to_text(&walk.html)
        } else {
            plain
        };
        body.html = walk.html;
    } else if mimetype == "text/plain" {
        body.plain = part_text(&mail, charset_param(&params, ""));
    } else if mimetype == "text/html" {
        body.html = part_text(&mail, charset_param(&params, ""));
        body.plain = html_to_text(&body.html);
    } else {
        debug!(%mimetype, "Ignoring non-text body");
    }
    body
}

/// Last resort for bytes that are not a usable MIME document.
fn unstructured(raw: &[u8]) -> DecodedBody {
    let plain = decode_charset(raw, "").unwrap_or_else(|_| decode_header_bytes(raw));
    DecodedBody {
        plain,
        html: String::new(),
    }
}

/// What a multipart walk found.
#[derive(Debug, Default)]
struct PartWalk {
    plains: Vec<String>,
    html: String,
    /// Whether any part had a usable Content-Type.
    recognised: bool,
}

/// Walk the sub-parts of a multipart entity in document order,
/// descending into nested multiparts.
fn collect_parts(mail: &ParsedMail<'_>, walk: &mut PartWalk) {
    for part in &mail.subparts {
        let Some((mimetype, params)) = content_type(part) else {
            debug!("Skipping part with unparseable Content-Type");
            continue;
        };

        if mimetype.starts_with("multipart/") {
            collect_parts(part, walk);
            continue;
        }
        walk.recognised = true;
        if mimetype == "text/plain" {
            walk.plains.push(leaf_text(part, &params));
        } else if mimetype == "text/html" {
            if walk.html.is_empty() {
                walk.html = leaf_text(part, &params);
            }
        } else {
            debug!(%mimetype, "Ignoring part");
        }
    }
}

/// The media type and parameters of an entity.
///
/// A missing header means `text/plain; charset=us-ascii`. A header
/// whose media type is not `type/subtype` gives `None`.
fn content_type(mail: &ParsedMail<'_>) -> Option<(String, BTreeMap<String, String>)> {
    let Some(header) = mail.headers.get_first_value("Content-Type") else {
        let params = BTreeMap::from([("charset".to_string(), "us-ascii".to_string())]);
        return Some(("text/plain".to_string(), params));
    };
    let parsed = mailparse::parse_content_type(&header);
    is_media_type(&parsed.mimetype).then_some((parsed.mimetype, parsed.params))
}

fn is_media_type(value: &str) -> bool {
    let is_token = |s: &str| {
        !s.is_empty()
            && s.bytes()
                .all(|b| b.is_ascii_graphic() && !b"()<>@,;:\\\"/[]?=".contains(&b))
    };
    value
        .split_once('/')
        .is_some_and(|(kind, sub)| is_token(kind) && is_token(sub))
}

/// Text of a multipart leaf, without the line break that belongs to the
/// following boundary.
fn leaf_text(part: &ParsedMail<'_>, params: &BTreeMap<String, String>) -> String {
    let mut text = part_text(part, charset_param(params, "utf-8"));
    text.truncate(text.trim_end_matches(['\r', '\n']).len());
    text
}

fn charset_param<'a>(params: &'a BTreeMap<String, String>, default: &'a str) -> &'a str {
    params
        .get("charset")
        .map(String::as_str)
        .filter(|c| !c.is_empty())
        .unwrap_or(default)
}

/// Transfer-decode then charset-decode the body of a leaf part.
fn part_text(part: &ParsedMail<'_>, charset: &str) -> String {
    let raw = encoded_body(part);
    let encoding = part
        .headers
        .get_first_value("Content-Transfer-Encoding")
        .unwrap_or_default();

    let bytes = decode_transfer(&raw, &encoding).unwrap_or_else(|e| {
        debug!(%encoding, "Keeping undecoded body: {e}");
        raw
    });

    decode_charset(&bytes, charset).unwrap_or_else(|e| {
        debug!("{e}, using lossy UTF-8");
        e.into_lossy()
    })
}

fn encoded_body(part: &ParsedMail<'_>) -> Vec<u8> {
    match part.get_body_encoded() {
        Body::Base64(body) | Body::QuotedPrintable(body) => body.get_raw().to_vec(),
        Body::SevenBit(body) | Body::EightBit(body) => body.get_raw().to_vec(),
        Body::Binary(body) => body.get_raw().to_vec(),
    }
}
