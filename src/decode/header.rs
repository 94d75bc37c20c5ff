//! RFC 2047 encoded-word decoding for header values

/// Decode encoded words such as `=?UTF-8?B?SGk=?=` in a header value.
///
/// Each word is decoded on its own, so raw UTF-8 text around it is kept
/// as-is. Whitespace between two adjacent encoded words is dropped.
/// Malformed words come back unchanged.
#[must_use]
pub fn decode_header(value: &str) -> String {
    if !value.contains("=?") {
        return value.to_string();
    }

    let unfolded: String = value.chars().filter(|c| !matches!(c, '\r' | '\n')).collect();
    let mut out = String::with_capacity(unfolded.len());
    let mut rest = unfolded.as_str();
    let mut after_word = false;

    while let Some(start) = rest.find("=?") {
        let (before, candidate) = rest.split_at(start);
        if let Some((len, decoded)) = encoded_word(candidate) {
            if !(after_word && before.chars().all(char::is_whitespace)) {
                out.push_str(before);
            }
            out.push_str(&decoded);
            rest = &candidate[len..];
            after_word = true;
        } else {
            out.push_str(before);
            out.push_str("=?");
            rest = &candidate[2..];
            after_word = false;
        }
    }
    out.push_str(rest);
    out
}

/// Decode the `=?charset?B|Q?text?=` word at the start of `s`, returning
/// its length and text.
fn encoded_word(s: &str) -> Option<(usize, String)> {
    let body = s.strip_prefix("=?")?;
    let charset_end = body.find('?')?;
    let tail = &body[charset_end + 1..];
    if !matches!(tail.as_bytes(), [b'B' | b'b' | b'Q' | b'q', b'?', ..]) {
        return None;
    }
    let text_end = tail[2..].find("?=")?;
    let len = 2 + charset_end + 1 + 2 + text_end + 2;
    let word = &s[..len];
    if charset_end == 0 || word.contains(char::is_whitespace) {
        return None;
    }

    // mailparse only decodes complete header lines.
    let line = format!("X: {word}\r\n");
    let (header, _) = mailparse::parse_header(line.as_bytes()).ok()?;
    let decoded = header.get_value();
    (decoded != word).then_some((len, decoded))
}

/// [`decode_header`] for raw envelope bytes of unknown encoding.
#[must_use]
pub fn decode_header_bytes(raw: &[u8]) -> String {
    decode_header(&String::from_utf8_lossy(raw))
}
