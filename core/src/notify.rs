//! Best-effort e-mail notification.

use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur while sending a notification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// Sender or recipient address could not be parsed
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// The message could not be assembled
    #[error("Failed to build email: {0}")]
    Build(String),

    /// The transport refused or failed to deliver
    #[error("Failed to send email: {0}")]
    Transport(String),
}

/// Outbound e-mail.
///
/// Failures are reported to the caller, which logs them; the ingestion
/// pipeline never rolls back or withholds an acknowledgment because of one.
pub trait Notifier: Send + Sync {
    /// Send a plain-text e-mail.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError`] if the message cannot be built or sent.
    fn send_email(
        &self,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + '_>>;
}
