//! Streaming FETCH of a whole mailbox
//!
//! A producer task owns the [`MailboxSession`] while it issues
//! `FETCH 1:N` and pushes one [`RawRecord`] per message into a bounded
//! channel. The consumer reads records with [`FetchStream::next`] and
//! must then call [`FetchStream::finish`], which waits for the producer,
//! logs the session out and returns the overall FETCH result.

use crate::error::{Error, Result};
use crate::session::MailboxSession;
use async_imap::types::Fetch;
use futures::{StreamExt, pin_mut};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Records buffered between producer and consumer.
pub const FETCH_CHANNEL_CAPACITY: usize = 10;

const FETCH_QUERY: &str = "(UID ENVELOPE BODYSTRUCTURE BODY.PEEK[])";

/// First `From` address of an envelope, as sent by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawAddress {
    pub personal_name: Option<Vec<u8>>,
    pub mailbox: Option<Vec<u8>>,
    pub host: Option<Vec<u8>>,
}

/// Undecoded data for one message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRecord {
    /// Sequence number at fetch time. Not durable.
    pub seq: u32,
    pub uid: u32,
    pub subject: Option<Vec<u8>>,
    pub from: Option<RawAddress>,
    /// Full RFC 5322 message literals, usually exactly one.
    pub bodies: Vec<Vec<u8>>,
}

impl From<&Fetch> for RawRecord {
    fn from(fetch: &Fetch) -> Self {
        let envelope = fetch.envelope();
        let subject = envelope
            .and_then(|e| e.subject.as_ref())
            .map(|s| s.to_vec());
        let from = envelope
            .and_then(|e| e.from.as_ref())
            .and_then(|addrs| addrs.first())
            .map(|addr| RawAddress {
                personal_name: addr.name.as_ref().map(|n| n.to_vec()),
                mailbox: addr.mailbox.as_ref().map(|m| m.to_vec()),
                host: addr.host.as_ref().map(|h| h.to_vec()),
            });

        let uid = fetch.uid.unwrap_or_else(|| {
            warn!(seq = fetch.message, "Server sent no UID");
            0
        });

        Self {
            seq: fetch.message,
            uid,
            subject,
            from,
            bodies: fetch.body().map(|b| vec![b.to_vec()]).unwrap_or_default(),
        }
    }
}

/// Receiving end of a running mailbox fetch.
pub struct FetchStream {
    records: mpsc::Receiver<RawRecord>,
    done: JoinHandle<(MailboxSession, Result<()>)>,
}

impl FetchStream {
    /// Start fetching every message of the session's selected mailbox.
    ///
    /// The session moves into the producer task and comes back through
    /// [`FetchStream::finish`].
    #[must_use]
    pub fn spawn(mut session: MailboxSession) -> Self {
        let (tx, records) = mpsc::channel(FETCH_CHANNEL_CAPACITY);
        let done = tokio::spawn(async move {
            let result = produce(&mut session, &tx).await;
            (session, result)
        });
        Self { records, done }
    }

    /// The next record, or `None` once the producer is finished.
    pub async fn next(&mut self) -> Option<RawRecord> {
        self.records.recv().await
    }

    /// Wait for the producer, log out and report the FETCH outcome.
    ///
    /// Records not yet consumed are discarded.
    ///
    /// # Errors
    ///
    /// Returns the FETCH failure or timeout hit by the producer, if any.
    pub async fn finish(mut self) -> Result<()> {
        self.records.close();
        while self.records.recv().await.is_some() {}

        let (session, result) = self
            .done
            .await
            .map_err(|e| Error::Protocol(format!("Fetch task failed: {e}")))?;
        session.close().await;
        result
    }
}

async fn produce(session: &mut MailboxSession, tx: &mpsc::Sender<RawRecord>) -> Result<()> {
    let count = session.message_count();
    if count == 0 {
        return Ok(());
    }

    let limit = session.timeouts().command;
    let range = format!("1:{count}");
    debug!(count, "Fetching {}", range);

    let imap = session.imap_mut();
    let stream = tokio::time::timeout(limit, imap.fetch(range, FETCH_QUERY))
        .await
        .map_err(|_| Error::Timeout { step: "fetch" })?
        .map_err(|e| Error::Protocol(format!("Fetch failed: {e}")))?;
    pin_mut!(stream);

    let mut sent = 0usize;
    loop {
        let item = tokio::time::timeout(limit, stream.next())
            .await
            .map_err(|_| Error::Timeout { step: "fetch" })?;
        let Some(item) = item else { break };
        let fetch = item.map_err(|e| Error::Protocol(format!("Fetch error: {e}")))?;

        if tx.send(RawRecord::from(&fetch)).await.is_err() {
            debug!("Fetch consumer went away after {} records", sent);
            return Ok(());
        }
        sent += 1;
    }

    debug!(count = sent, "Fetch complete");
    Ok(())
}
