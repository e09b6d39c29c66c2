use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::{
    config::Config,
    domain::{InboxItem, Recipient},
    ports::PlatformClient,
    retry::Retrier,
    Result,
};

pub const ALERT_SUBJECT: &str = "cb alert";

/// Outbound notifications to end users, the operator and the community's moderators.
///
/// Every send goes through the retry engine; an exhausted or fatal failure is
/// returned to the caller.
#[derive(Clone)]
pub struct Notifier {
    platform: Arc<dyn PlatformClient>,
    retrier: Retrier,
    cfg: Arc<Config>,
}

impl Notifier {
    pub fn new(platform: Arc<dyn PlatformClient>, retrier: Retrier, cfg: Arc<Config>) -> Self {
        Self {
            platform,
            retrier,
            cfg,
        }
    }

    pub async fn notify(&self, to: &Recipient, subject: &str, body: &str) -> Result<()> {
        self.retrier
            .run_unit("send message", || self.platform.send_message(to, subject, body))
            .await
    }

    /// Reply in place to an inbox item.
    pub async fn reply(&self, item: &InboxItem, body: &str) -> Result<()> {
        self.retrier
            .run_unit("reply", || self.platform.reply(item, body))
            .await
    }

    /// Message the operator.
    pub async fn alert(&self, body: &str) -> Result<()> {
        let to = Recipient::User(self.cfg.operator.clone());
        let body = format!("{body}\n\n---\n\n{}", Utc::now().to_rfc3339());
        self.notify(&to, ALERT_SUBJECT, &body).await
    }

    /// Log `body`; in alert mode, additionally message the operator.
    pub async fn log(&self, body: &str, alert: bool) -> Result<()> {
        if !alert {
            info!("{body}");
            return Ok(());
        }
        warn!(alert = true, "{body}");
        self.alert(body).await
    }

    /// Message the moderators of the configured community.
    pub async fn send_modmail(&self, subject: &str, body: &str) -> Result<()> {
        let community = self
            .retrier
            .run_required("fetch community", || {
                self.platform.fetch_community(&self.cfg.community)
            })
            .await?;
        self.notify(&Recipient::Community(community), subject, body)
            .await
    }
}
