//! IMAP session establishment
//!
//! Credentials come from the caller (CLI flags or environment). They are only
//! handed to the server's LOGIN command: never stored, never logged.

use std::fmt;
use tokio::net::TcpStream;
use tokio_util::compat::TokioAsyncReadCompatExt;

use crate::client::{CommandLimits, ImapSession, ImapStream, MailboxSession};
use crate::config::Config;
use crate::error::{Result, SearchError};

/// Address and app password for the mailbox
#[derive(Clone)]
pub struct Credentials {
    pub address: String,
    pub app_password: String,
}

impl Credentials {
    pub fn new(address: impl Into<String>, app_password: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            app_password: app_password.into(),
        }
    }

    /// Reject obviously unusable credentials before touching the network
    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() || !self.address.contains('@') {
            return Err(SearchError::AuthError(
                "A full email address is required".to_string(),
            ));
        }
        if self.app_password.trim().is_empty() {
            return Err(SearchError::AuthError(
                "An app password is required".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("address", &self.address)
            .field("app_password", &"<redacted>")
            .finish()
    }
}

fn timed_out(step: &str, after: std::time::Duration) -> SearchError {
    SearchError::AuthError(format!("Timed out after {:?} while {}", after, step))
}

/// Connect over TLS, log in and open the configured mailbox read-only
///
/// Every failure on the way (unreachable host, TLS, rejected login, missing
/// mailbox) is reported as [`SearchError::AuthError`].
pub async fn authenticate(config: &Config, credentials: &Credentials) -> Result<ImapSession> {
    credentials.validate()?;

    let host = config.imap.host.as_str();
    let port = config.imap.port;
    let limits = CommandLimits::from_config(config);

    tracing::info!("Connecting to {}:{} as {}", host, port, credentials.address);

    let tcp = tokio::time::timeout(limits.timeout, TcpStream::connect((host, port)))
        .await
        .map_err(|_| timed_out("connecting", limits.timeout))?
        .map_err(|e| {
            SearchError::AuthError(format!("Could not connect to {}:{}: {}", host, port, e))
        })?;

    let tls = async_native_tls::TlsConnector::new();
    let tls_stream = tokio::time::timeout(limits.timeout, tls.connect(host, tcp.compat()))
        .await
        .map_err(|_| timed_out("negotiating TLS", limits.timeout))?
        .map_err(|e| SearchError::AuthError(format!("TLS handshake with {} failed: {}", host, e)))?;

    let session = login(tls_stream, credentials, &config.imap.mailbox, limits).await?;
    tracing::info!("Authenticated, mailbox '{}' opened", session.mailbox());
    Ok(session)
}

/// Log in over an established stream and `EXAMINE` `mailbox`
pub async fn login<S: ImapStream>(
    stream: S,
    credentials: &Credentials,
    mailbox: &str,
    limits: CommandLimits,
) -> Result<ImapSession<S>> {
    let client = async_imap::Client::new(stream);
    let mut session = tokio::time::timeout(
        limits.timeout,
        client.login(&credentials.address, &credentials.app_password),
    )
    .await
    .map_err(|_| timed_out("logging in", limits.timeout))?
    .map_err(|(e, _)| SearchError::AuthError(format!("Login rejected: {}", e)))?;

    let selected = tokio::time::timeout(limits.timeout, session.examine(mailbox))
        .await
        .map_err(|_| timed_out("opening the mailbox", limits.timeout))?
        .map_err(|e| {
            SearchError::AuthError(format!("Cannot open mailbox '{}': {}", mailbox, e))
        })?;
    tracing::debug!("Opened {} read-only, {} messages", mailbox, selected.exists);

    Ok(ImapSession::new(session, mailbox.to_string(), limits))
}

/// Check that the credentials can open a session, then close it
pub async fn verify_credentials(config: &Config, credentials: &Credentials) -> Result<()> {
    let mut session = authenticate(config, credentials).await?;
    if let Err(e) = session.logout().await {
        tracing::warn!("Logout after credential check failed: {}", e);
    }
    Ok(())
}
