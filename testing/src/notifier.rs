//! Notifier that records instead of sending.

use ketuk_core::notify::{NotifyError, Notifier};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

/// One captured e-mail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    /// Recipient address
    pub to: String,
    /// Subject line
    pub subject: String,
    /// Plain-text body
    pub body: String,
}

/// Captures every e-mail handed to it.
///
/// A failing notifier still records the attempt, so tests can assert that a
/// send was tried even when it was made to fail.
#[derive(Clone, Debug, Default)]
pub struct RecordingNotifier {
    sent: Arc<RwLock<Vec<SentEmail>>>,
    failure: Arc<RwLock<Option<NotifyError>>>,
}

impl RecordingNotifier {
    /// A notifier whose sends succeed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier whose sends fail with a transport error.
    #[must_use]
    pub fn failing() -> Self {
        let notifier = Self::new();
        notifier.set_failure(Some(NotifyError::Transport(
            "connection refused".to_string(),
        )));
        notifier
    }

    /// Fail subsequent sends with `failure` (or succeed with `None`).
    pub fn set_failure(&self, failure: Option<NotifyError>) {
        *self.failure.write().unwrap() = failure;
    }

    /// Every attempted send, in order.
    #[must_use]
    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.read().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn send_email(
        &self,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + '_>> {
        let email = SentEmail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        };
        Box::pin(async move {
            self.sent.write().unwrap().push(email);
            match self.failure.read().unwrap().clone() {
                Some(failure) => Err(failure),
                None => Ok(()),
            }
        })
    }
}
