//! Temporary mailbox IMAP client

use crate::config::ClientConfig;
use crate::decode::decode_record;
use crate::error::{Error, Result};
use crate::fetch::FetchStream;
use crate::message::Message;
use crate::retry::retry;
use crate::session::MailboxSession;
use tracing::{debug, info};

/// Checks and empties one temporary mailbox.
///
/// Holds no connection between calls. Every method opens a fresh
/// session per attempt and logs out before returning, so a client can
/// be shared freely between tasks.
#[derive(Debug, Clone)]
pub struct MailClient {
    config: ClientConfig,
}

impl MailClient {
    #[must_use]
    pub const fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Fetch and decode every message in INBOX, newest first.
    ///
    /// A message whose body cannot be decoded still appears, with
    /// whatever text could be recovered.
    ///
    /// # Errors
    ///
    /// Returns an error if connecting, LOGIN, SELECT or FETCH keeps
    /// failing after the configured retries.
    pub async fn check_mail(&self) -> Result<Vec<Message>> {
        retry(&self.config.retry, "check_mail", self.target(), || {
            self.fetch_all()
        })
        .await
    }

    /// Permanently delete the message with the given UID.
    ///
    /// Other messages are not touched. Deleting a UID that no longer
    /// exists succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for UID 0, otherwise an error if the
    /// session, STORE or EXPUNGE keeps failing after retries.
    pub async fn delete_mail(&self, uid: u32) -> Result<()> {
        if uid == 0 {
            return Err(Error::Config("UID 0 is not a valid message id".into()));
        }
        retry(&self.config.retry, "delete_mail", self.target(), || async move {
            let mut session = self.open().await?;
            let result = async {
                session.flag_uid_deleted(uid).await?;
                session.expunge().await
            }
            .await;
            session.close().await;
            result?;
            info!(uid, "Deleted message");
            Ok(())
        })
        .await
    }

    /// Permanently delete every message in INBOX.
    ///
    /// An empty mailbox succeeds without sending STORE or EXPUNGE.
    ///
    /// # Errors
    ///
    /// Returns an error if the session, STORE or EXPUNGE keeps failing
    /// after retries.
    pub async fn delete_all_mails(&self) -> Result<()> {
        retry(&self.config.retry, "delete_all_mails", self.target(), || async move {
            let mut session = self.open().await?;
            let count = session.message_count();
            if count == 0 {
                debug!("Mailbox already empty");
                session.close().await;
                return Ok(());
            }

            let result = async {
                session.flag_all_deleted().await?;
                session.expunge().await
            }
            .await;
            session.close().await;
            result?;
            info!(count, "Deleted all messages");
            Ok(())
        })
        .await
    }

    /// Log in once, select INBOX and log out.
    ///
    /// Not retried, so the caller sees the first failure as it happened.
    ///
    /// # Errors
    ///
    /// Returns the connection, TLS, authentication or SELECT error.
    pub async fn check_connection(&self) -> Result<u32> {
        let session = self.open().await?;
        let count = session.message_count();
        session.close().await;
        info!(count, server = self.target(), "Connection check succeeded");
        Ok(count)
    }

    // -- private helpers --

    fn target(&self) -> &str {
        &self.config.credentials.imap_server
    }

    async fn open(&self) -> Result<MailboxSession> {
        self.config.credentials.validate()?;
        MailboxSession::open(&self.config.credentials, &self.config.tls, self.config.timeouts).await
    }

    async fn fetch_all(&self) -> Result<Vec<Message>> {
        let session = self.open().await?;
        if session.message_count() == 0 {
            debug!("Mailbox is empty");
            session.close().await;
            return Ok(Vec::new());
        }

        let mut stream = FetchStream::spawn(session);
        let mut messages = Vec::new();
        while let Some(record) = stream.next().await {
            messages.push(decode_record(&record));
        }
        stream.finish().await?;

        messages.reverse();
        info!(count = messages.len(), "Fetched messages");
        Ok(messages)
    }
}
