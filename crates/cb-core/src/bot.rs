//! Main loop: authenticate once, then poll the inbox until cancelled.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    config::Config,
    errors::Error,
    inbox::{InboxProcessor, PollStats},
    notify::Notifier,
    ports::{ExecutionService, ItemHandler, PlatformClient, Sleeper},
    retry::Retrier,
    router::CommandRouter,
    Result,
};

pub struct Bot {
    cfg: Arc<Config>,
    platform: Arc<dyn PlatformClient>,
    inbox: InboxProcessor,
    notifier: Notifier,
}

impl Bot {
    /// Wire the production command router over the given services.
    pub fn new(
        cfg: Arc<Config>,
        platform: Arc<dyn PlatformClient>,
        exec: Arc<dyn ExecutionService>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        let retrier = Retrier::new(cfg.retry.clone(), sleeper);
        let router = Arc::new(CommandRouter::new(
            cfg.clone(),
            platform.clone(),
            exec,
            retrier.clone(),
        ));
        Self::with_handler(cfg, platform, router, retrier)
    }

    pub fn with_handler(
        cfg: Arc<Config>,
        platform: Arc<dyn PlatformClient>,
        handler: Arc<dyn ItemHandler>,
        retrier: Retrier,
    ) -> Self {
        let notifier = Notifier::new(platform.clone(), retrier.clone(), cfg.clone());
        let inbox = InboxProcessor::new(platform.clone(), retrier, handler, notifier.clone());
        Self {
            cfg,
            platform,
            inbox,
            notifier,
        }
    }

    /// Log in with the configured credentials. Not retried: without a session
    /// nothing else can work.
    pub async fn authenticate(&self) -> Result<()> {
        let creds = &self.cfg.credentials;
        self.platform
            .authenticate(creds)
            .await
            .map_err(|e| Error::Auth(format!("{} could not log in: {e}", creds.username)))?;
        info!(user = %creds.username, "authenticated");
        Ok(())
    }

    /// Authenticate and run a single poll cycle.
    pub async fn run_once(&self) -> Result<PollStats> {
        self.authenticate().await?;
        Ok(self.cycle().await)
    }

    /// Authenticate, then poll every `poll_interval` until `cancel` fires.
    ///
    /// Only an authentication failure is returned; poll-cycle failures are
    /// reported and the loop continues. Cancellation is observed between
    /// cycles, so the in-flight item always completes.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        self.authenticate().await?;

        while !cancel.is_cancelled() {
            self.cycle().await;

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.cfg.poll_interval) => {}
            }
        }

        info!("shutting down");
        Ok(())
    }

    async fn cycle(&self) -> PollStats {
        match self.inbox.poll().await {
            Ok(stats) => {
                debug!(
                    fetched = stats.fetched,
                    handled = stats.handled,
                    failed = stats.failed,
                    "poll cycle complete"
                );
                stats
            }
            Err(e) => {
                error!(error = %e, "poll cycle failed");
                if let Err(alert_err) = self.notifier.alert(&format!("Poll cycle failed: {e}")).await {
                    // No channel left to escalate to.
                    error!(error = %alert_err, "operator alert failed");
                }
                PollStats::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::InboxItem,
        errors::RemoteError,
        testing::{message, test_config, test_retrier, Call, FakePlatform, RecordingHandler},
    };
    use async_trait::async_trait;

    fn bot(platform: Arc<FakePlatform>, handler: Arc<dyn ItemHandler>) -> Bot {
        Bot::with_handler(test_config(), platform, handler, test_retrier().0)
    }

    fn inbox() -> Vec<InboxItem> {
        vec![
            message("t4_a", "u1", "s", "one"),
            message("t4_b", "u2", "s", "two"),
            message("t4_c", "u3", "s", "three"),
        ]
    }

    #[tokio::test]
    async fn run_once_authenticates_and_processes_each_item_once() {
        let platform = Arc::new(FakePlatform::with_unread(inbox()));
        let handler = Arc::new(RecordingHandler::default());

        let stats = bot(platform.clone(), handler.clone()).run_once().await.unwrap();

        assert_eq!(stats.handled, 3);
        assert_eq!(
            platform.calls()[0],
            Call::Authenticate {
                username: "CompileBot".to_string(),
                password: "hunter2".to_string(),
            }
        );
        assert_eq!(*handler.seen.lock().unwrap(), vec!["t4_a", "t4_b", "t4_c"]);
        assert_eq!(platform.marked_read(), vec!["t4_a", "t4_b", "t4_c"]);
    }

    #[tokio::test]
    async fn authentication_failure_is_fatal() {
        let platform = Arc::new(FakePlatform::with_unread(inbox()));
        platform.fail_auth(RemoteError::http(Some(401), "bad password"));
        let handler = Arc::new(RecordingHandler::default());

        let err = bot(platform.clone(), handler.clone())
            .run(CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Auth(_)));
        assert_eq!(platform.calls().len(), 1);
        assert!(handler.seen.lock().unwrap().is_empty());
    }

    /// Cancels the loop once it has seen the last item.
    struct CancelAfter {
        inner: RecordingHandler,
        last: String,
        cancel: CancellationToken,
    }

    #[async_trait]
    impl ItemHandler for CancelAfter {
        async fn handle(&self, item: &InboxItem) -> Result<()> {
            let out = self.inner.handle(item).await;
            if item.id == self.last {
                self.cancel.cancel();
            }
            out
        }
    }

    #[tokio::test]
    async fn run_loop_survives_item_failures_and_stops_on_cancel() {
        let platform = Arc::new(FakePlatform::with_unread(inbox()));
        let cancel = CancellationToken::new();
        let handler = Arc::new(CancelAfter {
            inner: RecordingHandler {
                fail_on: vec!["t4_b".to_string()],
                ..Default::default()
            },
            last: "t4_c".to_string(),
            cancel: cancel.clone(),
        });

        bot(platform.clone(), handler.clone())
            .run(cancel)
            .await
            .unwrap();

        assert_eq!(
            *handler.inner.seen.lock().unwrap(),
            vec!["t4_a", "t4_b", "t4_c"]
        );
        assert_eq!(platform.marked_read(), vec!["t4_a", "t4_b", "t4_c"]);
        // One operator alert for the failed item.
        assert_eq!(platform.sends().len(), 1);
    }

    #[tokio::test]
    async fn poll_cycle_failure_does_not_escape() {
        let platform = Arc::new(FakePlatform::with_unread(inbox()));
        platform.fail_sends(vec![
            RemoteError::http(Some(403), "Forbidden"),
            RemoteError::http(Some(403), "Forbidden"),
        ]);
        let handler = Arc::new(RecordingHandler {
            fail_on: vec!["t4_a".to_string()],
            ..Default::default()
        });

        let stats = bot(platform.clone(), handler).run_once().await.unwrap();

        assert_eq!(stats, PollStats::default());
        // Item alert and cycle alert were both attempted.
        assert_eq!(platform.sends().len(), 2);
    }
}
