//! STORE / UID STORE command handler.
//!
//! Only `\Seen` and `\Deleted` are tracked. Unless the client asked for
//! `.SILENT`, every touched message is echoed back as
//! `* N FETCH (UID u FLAGS (...))`.

use crate::fake_imap::io::write_line;
use crate::fake_imap::mailbox::{Folder, Mailbox};
use crate::fake_imap::sequence::select_indices;
use imap_codec::imap_types::flag::{Flag, StoreResponse, StoreType};
use imap_codec::imap_types::sequence::SequenceSet;
use std::sync::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

pub struct StoreArgs<'a> {
    pub sequence_set: &'a SequenceSet,
    pub by_uid: bool,
    pub kind: &'a StoreType,
    pub response: &'a StoreResponse,
    pub flags: &'a [Flag<'a>],
}

pub async fn handle_store<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    args: &StoreArgs<'_>,
    mailbox: &Mutex<Mailbox>,
    selected_folder: Option<&str>,
    stream: &mut BufReader<S>,
) {
    let seen = args.flags.iter().any(|f| matches!(f, Flag::Seen));
    let deleted = args.flags.iter().any(|f| matches!(f, Flag::Deleted));

    // Mutate under the lock, write afterwards.
    let touched = {
        let mut mb = mailbox.lock().unwrap();
        selected_folder
            .and_then(|name| mb.get_folder_mut(name))
            .map(|folder| apply(folder, args, seen, deleted))
    };
    let Some(touched) = touched else {
        let resp = format!("{tag} BAD No folder selected\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    };

    if !matches!(args.response, StoreResponse::Silent) {
        for (seq, uid, flags) in &touched {
            let line = format!("* {seq} FETCH (UID {uid} FLAGS ({flags}))\r\n");
            if write_line(stream, &line).await.is_err() {
                return;
            }
        }
    }

    let resp = format!("{tag} OK STORE completed\r\n");
    let _ = write_line(stream, &resp).await;
}

/// Apply the flag change, returning `(seq, uid, flags)` per message.
fn apply(
    folder: &mut Folder,
    args: &StoreArgs<'_>,
    seen: bool,
    deleted: bool,
) -> Vec<(usize, u32, String)> {
    let indices = select_indices(args.sequence_set, folder, args.by_uid);
    let mut touched = Vec::new();
    for idx in indices {
        let email = &mut folder.emails[idx];
        match args.kind {
            StoreType::Add => {
                email.seen |= seen;
                email.deleted |= deleted;
            }
            StoreType::Remove => {
                email.seen &= !seen;
                email.deleted &= !deleted;
            }
            StoreType::Replace => {
                email.seen = seen;
                email.deleted = deleted;
            }
        }

        let mut flags = Vec::new();
        if email.seen {
            flags.push("\\Seen");
        }
        if email.deleted {
            flags.push("\\Deleted");
        }
        touched.push((idx + 1, email.uid, flags.join(" ")));
    }
    touched
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::mailbox::MailboxBuilder;
    use crate::fake_imap::sequence::{range, set, single};
    use tokio::io::BufReader;

    fn inbox() -> Mutex<Mailbox> {
        Mutex::new(
            MailboxBuilder::new()
                .folder("INBOX")
                .email(7, false, b"a")
                .email(8, false, b"b")
                .email(9, false, b"c")
                .build(),
        )
    }

    async fn run(args: &StoreArgs<'_>, mailbox: &Mutex<Mailbox>, selected: Option<&str>) -> String {
        let (client, server) = tokio::io::duplex(4096);
        let mut stream = BufReader::new(server);

        handle_store("A1", args, mailbox, selected, &mut stream).await;
        drop(stream);

        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut BufReader::new(client), &mut buf)
            .await
            .unwrap();
        String::from_utf8(buf).unwrap()
    }

    fn deleted_uids(mailbox: &Mutex<Mailbox>) -> Vec<u32> {
        let mb = mailbox.lock().unwrap();
        mb.get_folder("INBOX")
            .unwrap()
            .emails
            .iter()
            .filter(|e| e.deleted)
            .map(|e| e.uid)
            .collect()
    }

    #[tokio::test]
    async fn uid_store_flags_one_message_silently() {
        let mb = inbox();
        let seq = set(vec![single(8)]);
        let args = StoreArgs {
            sequence_set: &seq,
            by_uid: true,
            kind: &StoreType::Add,
            response: &StoreResponse::Silent,
            flags: &[Flag::Deleted],
        };

        let output = run(&args, &mb, Some("INBOX")).await;

        assert_eq!(output, "A1 OK STORE completed\r\n");
        assert_eq!(deleted_uids(&mb), vec![8]);
    }

    #[tokio::test]
    async fn sequence_store_flags_range_and_answers() {
        let mb = inbox();
        let seq = set(vec![range(1, 3)]);
        let args = StoreArgs {
            sequence_set: &seq,
            by_uid: false,
            kind: &StoreType::Add,
            response: &StoreResponse::Answer,
            flags: &[Flag::Deleted],
        };

        let output = run(&args, &mb, Some("INBOX")).await;

        assert!(output.contains("* 3 FETCH (UID 9 FLAGS (\\Deleted))"));
        assert_eq!(deleted_uids(&mb), vec![7, 8, 9]);
    }

    #[tokio::test]
    async fn no_folder_selected_returns_bad() {
        let mb = inbox();
        let seq = set(vec![single(1)]);
        let args = StoreArgs {
            sequence_set: &seq,
            by_uid: false,
            kind: &StoreType::Add,
            response: &StoreResponse::Answer,
            flags: &[Flag::Seen],
        };

        let output = run(&args, &mb, None).await;
        assert!(output.contains("A1 BAD No folder selected"));
    }
}
