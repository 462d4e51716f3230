use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::fmt;
use tracing::info;

use super::{message, Notifier, NotifyError};
use crate::config::Email;
use crate::model::Listing;

/// SMTP delivery with STARTTLS, one multipart (plain + HTML) mail per listing.
pub struct EmailNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
    server: String,
}

impl fmt::Debug for EmailNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailNotifier")
            .field("server", &self.server)
            .field("to", &self.to.to_string())
            .finish_non_exhaustive()
    }
}

impl EmailNotifier {
    pub fn from_config(cfg: &Email) -> Result<Self, NotifyError> {
        let from: Mailbox = cfg.username.trim().parse()?;
        let to: Mailbox = cfg.to.trim().parse()?;
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(cfg.smtp_server.trim())?
            .port(cfg.smtp_port)
            .credentials(Credentials::new(cfg.username.clone(), cfg.password.clone()))
            .build();
        Ok(Self {
            transport,
            from,
            to,
            server: cfg.smtp_server.clone(),
        })
    }

    pub fn build_message(&self, listing: &Listing) -> Result<Message, NotifyError> {
        let msg = Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(message::subject(listing))
            .multipart(MultiPart::alternative_plain_html(
                message::text(listing),
                message::html(listing),
            ))?;
        Ok(msg)
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn send(&self, listing: &Listing) -> Result<(), NotifyError> {
        let msg = self.build_message(listing)?;
        self.transport.send(msg).await?;
        info!(listing_id = %listing.id, server = %self.server, "email notification sent");
        Ok(())
    }
}
