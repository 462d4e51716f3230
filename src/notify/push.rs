use async_trait::async_trait;
use reqwest::{Client, Url};
use std::fmt;
use std::time::Duration;
use tracing::{info, warn};

use super::{message, Notifier, NotifyError};
use crate::config::Push;
use crate::model::Listing;

const PUSH_TITLE: &str = "New apartment listing";

/// Posts the plain-text message to `<server>/<topic>` (ntfy protocol).
#[derive(Clone)]
pub struct PushNotifier {
    http: Client,
    endpoint: Url,
}

impl fmt::Debug for PushNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushNotifier")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl PushNotifier {
    pub fn from_config(cfg: &Push) -> Result<Self, NotifyError> {
        let server = Url::parse(&format!("{}/", cfg.server.trim_end_matches('/')))
            .map_err(|_| NotifyError::Config("notify.push.server must be an absolute URL"))?;
        let endpoint = server
            .join(cfg.topic.trim())
            .map_err(|_| NotifyError::Config("notify.push.topic is not a valid path segment"))?;
        let http = Client::builder()
            .user_agent(concat!("flat-watch/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self { http, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn build_request(&self, listing: &Listing) -> Result<reqwest::Request, NotifyError> {
        let mut req = self
            .http
            .post(self.endpoint.clone())
            .header("Title", PUSH_TITLE)
            .header("Priority", "high")
            .header("Tags", "house")
            .body(message::text(listing));
        // Header values must be visible ASCII; skip the click target otherwise.
        if let Some(url) = listing.url.as_deref().filter(|u| u.is_ascii()) {
            req = req.header("Click", url);
        }
        Ok(req.build()?)
    }
}

#[async_trait]
impl Notifier for PushNotifier {
    async fn send(&self, listing: &Listing) -> Result<(), NotifyError> {
        let request = self.build_request(listing)?;
        let res = self.http.execute(request).await?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            warn!(listing_id = %listing.id, %status, "push endpoint rejected notification");
            return Err(NotifyError::Status { status, body });
        }
        info!(listing_id = %listing.id, "push notification sent");
        Ok(())
    }
}
