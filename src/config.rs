//! Mailbox credentials and client configuration

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use rustls::pki_types::CertificateDer;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_IMAP_PORT: u16 = 993;

/// Shortest and longest allowed periodic check interval.
pub const MIN_CHECK_INTERVAL: Duration = Duration::from_secs(5);
pub const MAX_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Login material for one mailbox.
///
/// Issued by the account provisioning side and never mutated; a
/// recreated mailbox gets a new value.
#[derive(Clone, PartialEq, Eq)]
pub struct MailboxCredentials {
    pub username: String,
    pub password: String,
    pub domain: String,
    /// `host` or `host:port` of the IMAP server (implicit TLS).
    pub imap_server: String,
}

impl MailboxCredentials {
    #[must_use]
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        domain: impl Into<String>,
        imap_server: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            domain: domain.into(),
            imap_server: imap_server.into(),
        }
    }

    /// The full mailbox address, used as the IMAP login name.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}@{}", self.username, self.domain)
    }

    /// Split `imap_server` into host and port.
    ///
    /// The port defaults to 993 when absent. Bracketed IPv6 literals
    /// (`[::1]:993`) are accepted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an empty server or a bad port.
    pub fn server(&self) -> Result<(String, u16)> {
        let server = self.imap_server.trim();
        if server.is_empty() {
            return Err(Error::Config("IMAP server cannot be empty".into()));
        }

        if let Some(rest) = server.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| Error::Config(format!("Invalid IMAP server: {server}")))?;
            let port = match tail.strip_prefix(':') {
                Some(port) => parse_port(port)?,
                None if tail.is_empty() => DEFAULT_IMAP_PORT,
                None => return Err(Error::Config(format!("Invalid IMAP server: {server}"))),
            };
            return Ok((host.to_string(), port));
        }

        match server.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => Ok((host.to_string(), parse_port(port)?)),
            _ => Ok((server.to_string(), DEFAULT_IMAP_PORT)),
        }
    }

    /// Reject credentials that cannot possibly log in.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first empty or malformed
    /// field.
    pub fn validate(&self) -> Result<()> {
        if self.username.is_empty() {
            return Err(Error::Config("Username cannot be empty".into()));
        }
        if self.password.is_empty() {
            return Err(Error::Config("Password cannot be empty".into()));
        }
        if self.domain.is_empty() {
            return Err(Error::Config("Domain cannot be empty".into()));
        }
        if self.domain.contains('@') {
            return Err(Error::Config(format!("Invalid domain: {}", self.domain)));
        }
        self.server().map(|_| ())
    }
}

impl fmt::Debug for MailboxCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailboxCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("domain", &self.domain)
            .field("imap_server", &self.imap_server)
            .finish()
    }
}

fn parse_port(port: &str) -> Result<u16> {
    port.parse()
        .map_err(|e| Error::Config(format!("Invalid IMAP port '{port}': {e}")))
}

/// How the server certificate is verified.
#[derive(Debug, Clone, Default)]
pub enum TlsPolicy {
    /// Verify against the bundled Mozilla root store.
    #[default]
    WebPkiRoots,
    /// Verify against the given trust anchors only.
    CustomRoots(Vec<CertificateDer<'static>>),
    /// Skip verification entirely. Only for servers with self-signed
    /// certificates on a trusted network.
    AcceptInvalidCerts,
}

/// Deadlines applied to every step of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// TCP connect plus TLS handshake.
    pub connect: Duration,
    /// Any single IMAP command, and each streamed FETCH item.
    pub command: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(15),
            command: Duration::from_secs(60),
        }
    }
}

/// Everything a [`MailClient`](crate::MailClient) needs.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub credentials: MailboxCredentials,
    pub tls: TlsPolicy,
    pub timeouts: Timeouts,
    pub retry: RetryPolicy,
    /// Period of the background re-check in [`Inbox`](crate::Inbox).
    pub check_interval: Duration,
}

impl ClientConfig {
    /// Secure defaults around the given credentials.
    #[must_use]
    pub fn new(credentials: MailboxCredentials) -> Self {
        Self {
            credentials,
            tls: TlsPolicy::default(),
            timeouts: Timeouts::default(),
            retry: RetryPolicy::default(),
            check_interval: MIN_CHECK_INTERVAL,
        }
    }

    /// Load configuration from environment variables
    ///
    /// Reads from `.env` file if present. Required variables:
    /// - `MAILBOX_USERNAME`
    /// - `MAILBOX_PASSWORD`
    /// - `MAILBOX_DOMAIN`
    /// - `IMAP_SERVER` (`host` or `host:port`, port defaults to 993)
    ///
    /// Optional (with defaults):
    /// - `IMAP_ACCEPT_INVALID_CERTS` (default: `false`)
    /// - `IMAP_CONNECT_TIMEOUT_SECS` (default: `15`)
    /// - `IMAP_COMMAND_TIMEOUT_SECS` (default: `60`)
    /// - `RETRY_MAX_ATTEMPTS` (default: `3`)
    /// - `RETRY_INITIAL_INTERVAL_MS` (default: `1000`)
    /// - `RETRY_MAX_INTERVAL_MS` (default: `5000`)
    /// - `RETRY_AUTH_FAILURES` (default: `false`)
    /// - `CHECK_INTERVAL_SECS` (default: `5`, range 5..=60)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a required variable is missing or
    /// a value does not parse.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let credentials = MailboxCredentials {
            username: required("MAILBOX_USERNAME")?,
            password: required("MAILBOX_PASSWORD")?,
            domain: required("MAILBOX_DOMAIN")?,
            imap_server: required("IMAP_SERVER")?,
        };
        credentials.validate()?;

        let tls = if optional("IMAP_ACCEPT_INVALID_CERTS", false)? {
            TlsPolicy::AcceptInvalidCerts
        } else {
            TlsPolicy::WebPkiRoots
        };

        let timeouts = Timeouts {
            connect: Duration::from_secs(optional("IMAP_CONNECT_TIMEOUT_SECS", 15)?),
            command: Duration::from_secs(optional("IMAP_COMMAND_TIMEOUT_SECS", 60)?),
        };

        let retry = RetryPolicy::new(
            optional("RETRY_MAX_ATTEMPTS", 3)?,
            Duration::from_millis(optional("RETRY_INITIAL_INTERVAL_MS", 1000)?),
            Duration::from_millis(optional("RETRY_MAX_INTERVAL_MS", 5000)?),
        )?
        .with_auth_retry(optional("RETRY_AUTH_FAILURES", false)?);

        let check_interval = Duration::from_secs(optional("CHECK_INTERVAL_SECS", 5)?);
        if !(MIN_CHECK_INTERVAL..=MAX_CHECK_INTERVAL).contains(&check_interval) {
            return Err(Error::Config(format!(
                "CHECK_INTERVAL_SECS must be between {} and {}",
                MIN_CHECK_INTERVAL.as_secs(),
                MAX_CHECK_INTERVAL.as_secs()
            )));
        }

        Ok(Self {
            credentials,
            tls,
            timeouts,
            retry,
            check_interval,
        })
    }
}

fn required(name: &str) -> Result<String> {
    env::var(name).map_err(|_| Error::Config(format!("{name} not set")))
}

fn optional<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("Invalid {name}: {e}"))),
        Err(_) => Ok(default),
    }
}
