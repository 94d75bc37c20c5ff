//! One short-lived, authenticated IMAP session
//!
//! Every logical operation (and every retry of it) opens its own
//! session: TCP -> TLS -> LOGIN -> SELECT INBOX -> act -> LOGOUT.
//! Nothing is pooled or shared between operations. Each step runs
//! under a deadline from [`Timeouts`].

use crate::config::{MailboxCredentials, Timeouts, TlsPolicy};
use crate::error::{Error, Result};
use async_imap::Session;
use futures::{StreamExt, pin_mut};
use rustls::RootCertStore;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::WebPkiSupportedAlgorithms;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};
use tracing::{debug, info, warn};

/// A TLS-wrapped IMAP session.
pub type ImapSession = Session<Compat<tokio_rustls::client::TlsStream<TcpStream>>>;

/// The only folder this client works on.
pub const INBOX: &str = "INBOX";

/// An authenticated session with INBOX selected read-write.
///
/// Obtain one with [`MailboxSession::open`] and always finish it with
/// [`MailboxSession::close`], which logs out.
pub struct MailboxSession {
    imap: ImapSession,
    server: String,
    timeouts: Timeouts,
    exists: u32,
}

impl MailboxSession {
    /// Connect, authenticate as `username@domain` and select INBOX.
    ///
    /// If SELECT fails after a successful login the session is logged
    /// out before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] for TCP or TLS failures,
    /// [`Error::Auth`] when LOGIN is rejected, [`Error::Protocol`] when
    /// SELECT fails and [`Error::Timeout`] when a step overruns.
    pub async fn open(
        credentials: &MailboxCredentials,
        tls: &TlsPolicy,
        timeouts: Timeouts,
    ) -> Result<Self> {
        let (host, port) = credentials.server()?;
        let server = format!("{host}:{port}");
        let connector = tls_connector(tls)?;
        let server_name = ServerName::try_from(host.clone())
            .map_err(|e| Error::Config(format!("Invalid server name {host}: {e}")))?;

        debug!("Connecting to IMAP server at {}", server);
        let tls_stream = with_deadline(timeouts.connect, "connect", async {
            let tcp = TcpStream::connect((host.as_str(), port))
                .await
                .map_err(|e| Error::Connection(format!("Connect to {server} failed: {e}")))?;
            connector
                .connect(server_name, tcp)
                .await
                .map_err(|e| Error::Connection(format!("TLS handshake with {host} failed: {e}")))
        })
        .await?;

        let client = async_imap::Client::new(tls_stream.compat());
        let address = credentials.address();
        let imap = with_deadline(timeouts.command, "login", async {
            client
                .login(&address, &credentials.password)
                .await
                .map_err(|(e, _)| login_error(e))
        })
        .await?;
        info!(server = %server, user = %address, "Connected to IMAP server");

        let mut session = Self {
            imap,
            server,
            timeouts,
            exists: 0,
        };

        match session.select_inbox().await {
            Ok(exists) => {
                session.exists = exists;
                Ok(session)
            }
            Err(e) => {
                session.close().await;
                Err(e)
            }
        }
    }

    /// Number of messages in INBOX as reported by SELECT.
    #[must_use]
    pub const fn message_count(&self) -> u32 {
        self.exists
    }

    /// `host:port` this session is connected to.
    #[must_use]
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Set `\Deleted` on every message by sequence range `1:N`.
    ///
    /// Does nothing when the mailbox is empty.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if STORE fails.
    pub async fn flag_all_deleted(&mut self) -> Result<()> {
        if self.exists == 0 {
            return Ok(());
        }
        let range = format!("1:{}", self.exists);
        let imap = &mut self.imap;
        with_deadline(self.timeouts.command, "store", async {
            let updates = imap
                .store(&range, "+FLAGS.SILENT (\\Deleted)")
                .await
                .map_err(|e| Error::Protocol(format!("Marking mails for deletion failed: {e}")))?;
            drain(updates, "store").await
        })
        .await
    }

    /// Set `\Deleted` on one message addressed by UID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if UID STORE fails.
    pub async fn flag_uid_deleted(&mut self, uid: u32) -> Result<()> {
        let uid_set = uid.to_string();
        let imap = &mut self.imap;
        with_deadline(self.timeouts.command, "uid store", async {
            let updates = imap
                .uid_store(&uid_set, "+FLAGS.SILENT (\\Deleted)")
                .await
                .map_err(|e| {
                    Error::Protocol(format!("Marking UID {uid_set} for deletion failed: {e}"))
                })?;
            drain(updates, "uid store").await
        })
        .await
    }

    /// Permanently remove every message flagged `\Deleted`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if EXPUNGE fails.
    pub async fn expunge(&mut self) -> Result<()> {
        let imap = &mut self.imap;
        with_deadline(self.timeouts.command, "expunge", async {
            let removed = imap
                .expunge()
                .await
                .map_err(|e| Error::Protocol(format!("Expunge failed: {e}")))?;
            drain(removed, "expunge").await
        })
        .await
    }

    /// Log out. Failures are logged, not returned: the connection is
    /// dropped either way.
    pub async fn close(mut self) {
        match tokio::time::timeout(self.timeouts.command, self.imap.logout()).await {
            Ok(Ok(())) => debug!(server = %self.server, "Logged out"),
            Ok(Err(e)) => debug!(server = %self.server, "Logout failed: {e}"),
            Err(_) => debug!(server = %self.server, "Logout timed out"),
        }
    }

    pub(crate) fn imap_mut(&mut self) -> &mut ImapSession {
        &mut self.imap
    }

    pub(crate) const fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    async fn select_inbox(&mut self) -> Result<u32> {
        let imap = &mut self.imap;
        let mailbox = with_deadline(self.timeouts.command, "select", async {
            imap.select(INBOX)
                .await
                .map_err(|e| Error::Protocol(format!("Failed to select {INBOX}: {e}")))
        })
        .await?;
        debug!(server = %self.server, count = mailbox.exists, "Selected {}", INBOX);
        Ok(mailbox.exists)
    }
}

/// Bound `fut` by `limit`, reporting expiry as [`Error::Timeout`].
pub(crate) async fn with_deadline<T>(
    limit: Duration,
    step: &'static str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| Error::Timeout { step })?
}

/// Consume a response stream so the session is ready for the next
/// command, surfacing the first error.
async fn drain<T>(
    stream: impl futures::Stream<Item = async_imap::error::Result<T>>,
    step: &str,
) -> Result<()> {
    pin_mut!(stream);
    while let Some(item) = stream.next().await {
        item.map_err(|e| Error::Protocol(format!("{step} response error: {e}")))?;
    }
    Ok(())
}

/// NO/BAD to LOGIN is a credential rejection; anything else means the
/// connection itself broke.
fn login_error(err: async_imap::error::Error) -> Error {
    match err {
        async_imap::error::Error::No(msg) | async_imap::error::Error::Bad(msg) => Error::Auth(msg),
        other => Error::Connection(format!("Login failed: {other}")),
    }
}

/// Build a TLS connector for the given trust policy.
fn tls_connector(policy: &TlsPolicy) -> Result<TlsConnector> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let algorithms = provider.signature_verification_algorithms;
    let builder = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Config(format!("TLS setup failed: {e}")))?;

    let config = match policy {
        TlsPolicy::WebPkiRoots => {
            let mut roots = RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            builder.with_root_certificates(roots).with_no_client_auth()
        }
        TlsPolicy::CustomRoots(certs) => {
            let mut roots = RootCertStore::empty();
            for cert in certs {
                roots
                    .add(cert.clone())
                    .map_err(|e| Error::Config(format!("Invalid root certificate: {e}")))?;
            }
            builder.with_root_certificates(roots).with_no_client_auth()
        }
        TlsPolicy::AcceptInvalidCerts => {
            warn!("TLS certificate verification is disabled");
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyCert(algorithms)))
                .with_no_client_auth()
        }
    };
    Ok(TlsConnector::from(Arc::new(config)))
}

/// Certificate verifier that trusts any server certificate but still
/// checks handshake signatures against it.
#[derive(Debug)]
struct AcceptAnyCert(WebPkiSupportedAlgorithms);

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.0)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.0)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.supported_schemes()
    }
}
