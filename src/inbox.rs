//! Shared, periodically refreshed view of the mailbox
//!
//! One task owns the current message list. Manual actions arrive as
//! commands from any number of [`InboxHandle`]s and the periodic check
//! comes from a timer in the same loop, so the list is only ever
//! touched by one writer at a time.

use crate::client::MailClient;
use crate::error::{Error, Result};
use crate::message::Message;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

/// Delay before the first automatic check after spawning.
pub const FIRST_CHECK_DELAY: Duration = Duration::from_secs(2);

const COMMAND_CAPACITY: usize = 16;
const EVENT_CAPACITY: usize = 16;

/// Published whenever a refresh finds UIDs that were not listed before.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboxEvent {
    NewMessages { uids: Vec<u32> },
}

/// Result of one refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshOutcome {
    /// Messages now listed.
    pub total: usize,
    /// UIDs not present before this refresh, newest first.
    pub new_uids: Vec<u32>,
}

/// Copy of the list at one point in time.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InboxSnapshot {
    pub messages: Vec<Message>,
    /// `None` until the first successful refresh.
    pub last_checked: Option<DateTime<Utc>>,
}

enum Command {
    Refresh(oneshot::Sender<Result<RefreshOutcome>>),
    Delete(u32, oneshot::Sender<Result<()>>),
    DeleteAll(oneshot::Sender<Result<()>>),
    Snapshot(oneshot::Sender<InboxSnapshot>),
    SetAutoRefresh(bool, oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// The task that owns the message list.
pub struct Inbox {
    client: MailClient,
    messages: Vec<Message>,
    last_checked: Option<DateTime<Utc>>,
    auto_refresh: bool,
    events: broadcast::Sender<InboxEvent>,
}

impl Inbox {
    /// Start the inbox task and return a handle to it.
    ///
    /// The mailbox is checked [`FIRST_CHECK_DELAY`] after spawning and
    /// then every `check_interval` from the client's configuration.
    /// The task stops on [`InboxHandle::shutdown`] or when the last
    /// handle is dropped.
    #[must_use]
    pub fn spawn(client: MailClient) -> InboxHandle {
        let period = client.config().check_interval;
        let (commands, receiver) = mpsc::channel(COMMAND_CAPACITY);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let inbox = Self {
            client,
            messages: Vec::new(),
            last_checked: None,
            auto_refresh: true,
            events: events.clone(),
        };
        tokio::spawn(inbox.run(receiver, period));

        InboxHandle { commands, events }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>, period: Duration) {
        let mut ticker = interval_at(Instant::now() + FIRST_CHECK_DELAY, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown(reply)) => {
                        reply.send(()).ok();
                        break;
                    }
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                _ = ticker.tick(), if self.auto_refresh => {
                    if let Err(e) = self.refresh().await {
                        warn!("Periodic mail check failed: {e}");
                    }
                }
            }
        }
        debug!("Inbox task stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Refresh(reply) => {
                reply.send(self.refresh().await).ok();
            }
            Command::Delete(uid, reply) => {
                reply.send(self.delete(uid).await).ok();
            }
            Command::DeleteAll(reply) => {
                reply.send(self.delete_all().await).ok();
            }
            Command::Snapshot(reply) => {
                reply
                    .send(InboxSnapshot {
                        messages: self.messages.clone(),
                        last_checked: self.last_checked,
                    })
                    .ok();
            }
            Command::SetAutoRefresh(enabled, reply) => {
                debug!(enabled, "Automatic checks toggled");
                self.auto_refresh = enabled;
                reply.send(()).ok();
            }
            Command::Shutdown(_) => {}
        }
    }

    async fn refresh(&mut self) -> Result<RefreshOutcome> {
        let messages = self.client.check_mail().await?;

        let known: HashSet<u32> = self.messages.iter().map(|m| m.uid).collect();
        let new_uids: Vec<u32> = messages
            .iter()
            .map(|m| m.uid)
            .filter(|uid| !known.contains(uid))
            .collect();

        self.messages = messages;
        self.last_checked = Some(Utc::now());

        if !new_uids.is_empty() {
            info!(count = new_uids.len(), "New messages arrived");
            self.events
                .send(InboxEvent::NewMessages {
                    uids: new_uids.clone(),
                })
                .ok();
        }

        Ok(RefreshOutcome {
            total: self.messages.len(),
            new_uids,
        })
    }

    async fn delete(&mut self, uid: u32) -> Result<()> {
        self.client.delete_mail(uid).await?;
        self.messages.retain(|m| m.uid != uid);

        if let Err(e) = self.refresh().await {
            warn!(uid, "Refresh after delete failed: {e}");
        }
        Ok(())
    }

    async fn delete_all(&mut self) -> Result<()> {
        self.client.delete_all_mails().await?;
        self.messages.clear();
        self.last_checked = Some(Utc::now());
        Ok(())
    }
}

/// Cloneable handle to a running [`Inbox`].
#[derive(Debug, Clone)]
pub struct InboxHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<InboxEvent>,
}

impl InboxHandle {
    /// Check the mailbox now and replace the list.
    ///
    /// # Errors
    ///
    /// Returns the [`MailClient::check_mail`] error, or
    /// [`Error::InboxClosed`] if the task has stopped.
    pub async fn refresh(&self) -> Result<RefreshOutcome> {
        self.request(Command::Refresh).await?
    }

    /// Delete one message, then re-check the mailbox.
    ///
    /// # Errors
    ///
    /// Returns the [`MailClient::delete_mail`] error, or
    /// [`Error::InboxClosed`] if the task has stopped.
    pub async fn delete(&self, uid: u32) -> Result<()> {
        self.request(|reply| Command::Delete(uid, reply)).await?
    }

    /// Delete every message and clear the list.
    ///
    /// # Errors
    ///
    /// Returns the [`MailClient::delete_all_mails`] error, or
    /// [`Error::InboxClosed`] if the task has stopped.
    pub async fn delete_all(&self) -> Result<()> {
        self.request(Command::DeleteAll).await?
    }

    /// # Errors
    ///
    /// Returns [`Error::InboxClosed`] if the task has stopped.
    pub async fn snapshot(&self) -> Result<InboxSnapshot> {
        self.request(Command::Snapshot).await
    }

    /// Pause or resume the periodic check. Manual refreshes still work.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InboxClosed`] if the task has stopped.
    pub async fn set_auto_refresh(&self, enabled: bool) -> Result<()> {
        self.request(|reply| Command::SetAutoRefresh(enabled, reply))
            .await
    }

    /// Stop the task. Pending commands queued before this one still run.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InboxClosed`] if the task had already stopped.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(Command::Shutdown).await
    }

    /// Receive [`InboxEvent`]s published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<InboxEvent> {
        self.events.subscribe()
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| Error::InboxClosed)?;
        response.await.map_err(|_| Error::InboxClosed)
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Refresh(_) => f.write_str("Refresh"),
            Self::Delete(uid, _) => write!(f, "Delete({uid})"),
            Self::DeleteAll(_) => f.write_str("DeleteAll"),
            Self::Snapshot(_) => f.write_str("Snapshot"),
            Self::SetAutoRefresh(enabled, _) => write!(f, "SetAutoRefresh({enabled})"),
            Self::Shutdown(_) => f.write_str("Shutdown"),
        }
    }
}
