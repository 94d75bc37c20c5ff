//! Temporary mailbox IMAP client library
//!
//! Checks and empties a single disposable IMAP inbox over implicit
//! TLS. Each operation opens its own short-lived session and is retried
//! with bounded exponential backoff.
//!
//! Messages come back as decoded [`Message`] records. Decoding is
//! best-effort: broken MIME, unknown charsets and bad transfer
//! encodings degrade to readable text instead of failing the fetch.
//!
//! [`Inbox`] keeps a periodically refreshed copy of the message list
//! and announces new arrivals.

mod client;
mod config;
pub mod decode;
mod error;
pub mod fetch;
mod inbox;
mod message;
mod retry;
pub mod session;

pub use client::MailClient;
pub use config::{
    ClientConfig, MAX_CHECK_INTERVAL, MIN_CHECK_INTERVAL, MailboxCredentials, Timeouts, TlsPolicy,
};
pub use error::{Error, Result};
pub use inbox::{FIRST_CHECK_DELAY, Inbox, InboxEvent, InboxHandle, InboxSnapshot, RefreshOutcome};
pub use message::Message;
pub use retry::{RetryPolicy, retry};
