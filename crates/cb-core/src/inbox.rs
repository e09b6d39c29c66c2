use std::sync::Arc;

use tracing::{debug, error};

use crate::{
    domain::InboxItem,
    notify::Notifier,
    ports::{ItemHandler, PlatformClient},
    retry::Retrier,
    Error, Result,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PollStats {
    pub fetched: usize,
    pub handled: usize,
    pub failed: usize,
}

/// Fetches the unread snapshot and hands each item to the handler, in order.
///
/// Each item is marked read right after its handler returns, whether or not
/// the handler succeeded, so an item is processed at most once. A handler
/// failure is reported to the operator and the next item is processed.
pub struct InboxProcessor {
    platform: Arc<dyn PlatformClient>,
    retrier: Retrier,
    handler: Arc<dyn ItemHandler>,
    notifier: Notifier,
}

impl InboxProcessor {
    pub fn new(
        platform: Arc<dyn PlatformClient>,
        retrier: Retrier,
        handler: Arc<dyn ItemHandler>,
        notifier: Notifier,
    ) -> Self {
        Self {
            platform,
            retrier,
            handler,
            notifier,
        }
    }

    /// One poll cycle.
    ///
    /// Errors only when the inbox cannot be fetched, an item cannot be marked
    /// read, or the operator alert for a failed item cannot be delivered.
    /// Items not reached stay unread for the next cycle.
    pub async fn poll(&self) -> Result<PollStats> {
        let items = self
            .retrier
            .run("fetch unread", || self.platform.fetch_unread())
            .await?
            .unwrap_or_default();

        let mut stats = PollStats {
            fetched: items.len(),
            ..Default::default()
        };

        for item in &items {
            debug!(item = %item.id, kind = ?item.kind, "handling inbox item");
            let outcome = self.handler.handle(item).await;

            let marked = self
                .retrier
                .run_unit("mark read", || self.platform.mark_read(item))
                .await;

            match outcome {
                Ok(()) => stats.handled += 1,
                Err(e) => {
                    stats.failed += 1;
                    error!(item = %item.id, error = %e, "failed to handle inbox item");
                    let mut body = failure_report(item, &e);
                    if let Err(mark_err) = &marked {
                        body.push_str(&format!("\n\nMarking it read also failed:\n\n    {mark_err}"));
                    }
                    self.notifier.alert(&body).await?;
                }
            }

            marked?;
        }

        Ok(stats)
    }
}

fn failure_report(item: &InboxItem, err: &Error) -> String {
    let author = item
        .author
        .as_ref()
        .map(|a| a.0.as_str())
        .unwrap_or("[deleted]");
    format!(
        "Error processing {} from /u/{author}:\n\n    {err}\n\nBody:\n\n{}",
        item.id, item.body
    )
}
