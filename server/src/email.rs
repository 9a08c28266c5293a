//! SMTP notifier implementation using Lettre.

use crate::config::SmtpConfig;
use ketuk_core::notify::{NotifyError, Notifier};
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use std::future::Future;
use std::pin::Pin;

/// Sends plain-text mail through an authenticated STARTTLS relay.
///
/// The transport is synchronous, so each send runs on the blocking pool.
#[derive(Clone)]
pub struct SmtpNotifier {
    host: String,
    port: u16,
    credentials: Option<Credentials>,
    from_email: String,
    from_name: String,
}

impl SmtpNotifier {
    /// Create a notifier from the SMTP section of the configuration.
    #[must_use]
    pub fn new(config: &SmtpConfig) -> Self {
        let credentials = (!config.username.is_empty())
            .then(|| Credentials::new(config.username.clone(), config.password.clone()));

        Self {
            host: config.host.clone(),
            port: config.port,
            credentials,
            from_email: config.from_email.clone(),
            from_name: config.from_name.clone(),
        }
    }

    fn build_transport(&self) -> Result<SmtpTransport, NotifyError> {
        let mut builder = SmtpTransport::starttls_relay(&self.host)
            .map_err(|e| NotifyError::Transport(format!("SMTP relay error: {e}")))?
            .port(self.port);
        if let Some(credentials) = &self.credentials {
            builder = builder.credentials(credentials.clone());
        }
        Ok(builder.build())
    }

    fn from_header(&self) -> String {
        format!("{} <{}>", self.from_name, self.from_email)
    }

    fn build_message(&self, to: &str, subject: &str, body: &str) -> Result<Message, NotifyError> {
        Message::builder()
            .from(
                self.from_header()
                    .parse()
                    .map_err(|e| NotifyError::InvalidAddress(format!("from: {e}")))?,
            )
            .to(to
                .parse()
                .map_err(|e| NotifyError::InvalidAddress(format!("to: {e}")))?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| NotifyError::Build(e.to_string()))
    }
}

impl Notifier for SmtpNotifier {
    fn send_email(
        &self,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + '_>> {
        let message = self.build_message(to, subject, body);
        let to = to.to_string();

        Box::pin(async move {
            let email = message?;
            let mailer = self.build_transport()?;

            tokio::task::spawn_blocking(move || {
                mailer
                    .send(&email)
                    .map_err(|e| NotifyError::Transport(e.to_string()))
            })
            .await
            .map_err(|e| NotifyError::Transport(format!("Email task failed: {e}")))??;

            tracing::debug!(to = %to, "Email sent");
            Ok(())
        })
    }
}
