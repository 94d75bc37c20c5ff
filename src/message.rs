//! Decoded message records

use serde::{Deserialize, Serialize};

/// One message as shown to the user.
///
/// Produced fresh by every [`MailClient::check_mail`](crate::MailClient::check_mail)
/// call. `uid` is the only stable handle for deletion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Sender display name, or `mailbox@host` when there is none.
    pub from: String,
    pub subject: String,
    /// Text body. Derived from the HTML part when no plain part exists.
    pub plain_content: String,
    /// HTML body, empty when the message had no HTML part.
    pub html_content: String,
    pub uid: u32,
}

impl Message {
    #[must_use]
    pub const fn has_html(&self) -> bool {
        !self.html_content.is_empty()
    }
}
