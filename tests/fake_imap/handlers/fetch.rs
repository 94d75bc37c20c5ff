//! FETCH / UID FETCH command handler.
//!
//! Every selected message is returned with its UID, an ENVELOPE built
//! from the stored headers and the full message as a `BODY[]` literal,
//! whatever data items the client asked for:
//!
//! ```text
//! * <seq> FETCH (UID <uid> ENVELOPE (...) BODY[] {<length>}
//! <exactly length bytes of raw RFC 5322 message>
//! )
//! ```
//!
//! With `fail_after` set, only that many messages are sent before the
//! command is answered with a tagged `NO`.

use crate::fake_imap::io::{nstring, write_bytes, write_line};
use crate::fake_imap::mailbox::Mailbox;
use crate::fake_imap::sequence::select_indices;
use imap_codec::imap_types::sequence::SequenceSet;
use mailparse::MailHeaderMap;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

pub async fn handle_fetch<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    sequence_set: &SequenceSet,
    by_uid: bool,
    mailbox: &Mailbox,
    selected_folder: Option<&str>,
    fail_after: Option<usize>,
    stream: &mut BufReader<S>,
) {
    let Some(folder) = selected_folder.and_then(|name| mailbox.get_folder(name)) else {
        let resp = format!("{tag} BAD No folder selected\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    };

    let indices = select_indices(sequence_set, folder, by_uid);
    let sent = fail_after.map_or(indices.len(), |n| n.min(indices.len()));
    for &idx in &indices[..sent] {
        let email = &folder.emails[idx];
        let mut response = format!("* {} FETCH (UID {} ENVELOPE ", idx + 1, email.uid).into_bytes();
        response.extend(envelope(&email.raw));
        response.extend(format!(" BODY[] {{{}}}\r\n", email.raw.len()).into_bytes());
        response.extend_from_slice(&email.raw);
        response.extend_from_slice(b")\r\n");

        if write_bytes(stream, &response).await.is_err() {
            return;
        }
    }

    let resp = if fail_after.is_some() {
        format!("{tag} NO FETCH failed\r\n")
    } else {
        format!("{tag} OK FETCH completed\r\n")
    };
    let _ = write_line(stream, &resp).await;
}

/// Build `(date subject from sender reply-to to cc bcc in-reply-to
/// message-id)` from the message headers. Header values are passed on
/// raw, encoded words included, like a real server does.
fn envelope(raw: &[u8]) -> Vec<u8> {
    let headers = mailparse::parse_headers(raw).map(|(h, _)| h).unwrap_or_default();
    let raw_value = |name: &str| headers.get_first_header(name).map(|h| h.get_value_raw().to_vec());

    let from = raw_value("From").map(|v| address(&v));
    let from = from.unwrap_or_else(|| b"NIL".to_vec());

    let mut out = b"(".to_vec();
    out.extend(nstring(raw_value("Date").as_deref()));
    out.push(b' ');
    out.extend(nstring(raw_value("Subject").as_deref()));
    for _ in 0..3 {
        // from, sender, reply-to
        out.push(b' ');
        out.extend_from_slice(&from);
    }
    out.extend_from_slice(b" NIL NIL NIL NIL ");
    out.extend(nstring(raw_value("Message-ID").as_deref()));
    out.push(b')');
    out
}

/// `((name NIL mailbox host))` for a `Name <mailbox@host>` or bare
/// `mailbox@host` header value.
fn address(value: &[u8]) -> Vec<u8> {
    let text = String::from_utf8_lossy(value);
    let (name, addr) = match (text.find('<'), text.rfind('>')) {
        (Some(open), Some(close)) if open < close => {
            let name = text[..open].trim().trim_matches('"').trim();
            (
                (!name.is_empty()).then(|| name.to_string()),
                text[open + 1..close].trim().to_string(),
            )
        }
        _ => (None, text.trim().to_string()),
    };
    let (mailbox, host) = addr.split_once('@').unwrap_or((addr.as_str(), ""));

    let mut out = b"((".to_vec();
    out.extend(nstring(name.as_deref().map(str::as_bytes)));
    out.extend_from_slice(b" NIL ");
    out.extend(nstring(Some(mailbox.as_bytes())));
    out.push(b' ');
    out.extend(nstring(Some(host.as_bytes())));
    out.extend_from_slice(b"))");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::mailbox::MailboxBuilder;
    use crate::fake_imap::sequence::{range, set, single};
    use tokio::io::BufReader;

    const RAW: &[u8] = b"From: Alice <alice@example.com>\r\nSubject: Test\r\n\r\nBody";

    async fn run_failing(
        sequence_set: &SequenceSet,
        by_uid: bool,
        mailbox: &Mailbox,
        selected: Option<&str>,
        fail_after: Option<usize>,
    ) -> String {
        let (client, server) = tokio::io::duplex(8192);
        let mut stream = BufReader::new(server);

        handle_fetch("A1", sequence_set, by_uid, mailbox, selected, fail_after, &mut stream).await;
        drop(stream);

        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut BufReader::new(client), &mut buf)
            .await
            .unwrap();
        String::from_utf8(buf).unwrap()
    }

    async fn run(sequence_set: &SequenceSet, by_uid: bool, mailbox: &Mailbox, selected: Option<&str>) -> String {
        run_failing(sequence_set, by_uid, mailbox, selected, None).await
    }

    #[tokio::test]
    async fn fetches_sequence_range_with_envelope() {
        let mailbox = MailboxBuilder::new()
            .folder("INBOX")
            .email(42, false, RAW)
            .email(43, false, RAW)
            .build();

        let output = run(&set(vec![range(1, 2)]), false, &mailbox, Some("INBOX")).await;

        assert!(output.contains("* 1 FETCH (UID 42 ENVELOPE (NIL \"Test\" ((\"Alice\" NIL \"alice\" \"example.com\"))"));
        assert!(output.contains("* 2 FETCH (UID 43 "));
        assert!(output.contains(&format!("BODY[] {{{}}}\r\n", RAW.len())));
        assert!(output.ends_with("A1 OK FETCH completed\r\n"));
    }

    #[tokio::test]
    async fn uid_fetch_of_unknown_uid_returns_only_ok() {
        let mailbox = MailboxBuilder::new().folder("INBOX").email(1, false, RAW).build();

        let output = run(&set(vec![single(99)]), true, &mailbox, Some("INBOX")).await;

        assert_eq!(output, "A1 OK FETCH completed\r\n");
    }

    #[tokio::test]
    async fn no_folder_selected_returns_bad() {
        let mailbox = MailboxBuilder::new().folder("INBOX").build();
        let output = run(&set(vec![single(1)]), false, &mailbox, None).await;
        assert!(output.contains("A1 BAD No folder selected"));
    }

    #[tokio::test]
    async fn failing_fetch_sends_some_then_no() {
        let mailbox = MailboxBuilder::new()
            .folder("INBOX")
            .email(1, false, RAW)
            .email(2, false, RAW)
            .email(3, false, RAW)
            .build();

        let output = run_failing(&set(vec![range(1, 3)]), false, &mailbox, Some("INBOX"), Some(2)).await;

        assert!(output.contains("* 2 FETCH (UID 2 "));
        assert!(!output.contains("* 3 FETCH"));
        assert!(output.ends_with("A1 NO FETCH failed\r\n"));
    }

    #[test]
    fn bare_address_has_no_name() {
        assert_eq!(address(b"bob@example.org"), b"((NIL NIL \"bob\" \"example.org\"))");
    }
}
