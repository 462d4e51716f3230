use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

use crate::config::Notify;
use crate::model::{Listing, NotificationMethod};

pub mod email;
pub mod message;
pub mod push;

pub use email::EmailNotifier;
pub use push::PushNotifier;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("push request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("push endpoint returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("invalid email address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("failed to build email: {0}")]
    Message(#[from] lettre::error::Error),
    #[error("SMTP delivery failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
    #[error("notifier misconfigured: {0}")]
    Config(&'static str),
}

/// Delivers one message per new listing.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, listing: &Listing) -> Result<(), NotifyError>;
}

/// The transport picked at startup. Fixed for the life of the process.
#[derive(Debug)]
pub enum Transport {
    Email(EmailNotifier),
    Push(PushNotifier),
}

impl Transport {
    pub fn from_config(cfg: &Notify) -> Result<Self, NotifyError> {
        match cfg.method {
            NotificationMethod::Email => {
                let email = cfg
                    .email
                    .as_ref()
                    .ok_or(NotifyError::Config("notify.email is required for method email"))?;
                EmailNotifier::from_config(email).map(Transport::Email)
            }
            NotificationMethod::Push => {
                let push = cfg
                    .push
                    .as_ref()
                    .ok_or(NotifyError::Config("notify.push is required for method push"))?;
                PushNotifier::from_config(push).map(Transport::Push)
            }
        }
    }

    pub fn method(&self) -> NotificationMethod {
        match self {
            Transport::Email(_) => NotificationMethod::Email,
            Transport::Push(_) => NotificationMethod::Push,
        }
    }
}

#[async_trait]
impl Notifier for Transport {
    async fn send(&self, listing: &Listing) -> Result<(), NotifyError> {
        match self {
            Transport::Email(n) => n.send(listing).await,
            Transport::Push(n) => n.send(listing).await,
        }
    }
}
