use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    config::Config,
    domain::{CompileRequest, CompileResult, ExecutionReport, InboxItem, ItemKind, Recipient},
    formatting::{footer, format_failure, format_rejection, format_reply, format_run_error},
    notify::Notifier,
    ports::ExecutionService,
    retry::{classify, FailureClass, Retrier},
    Result,
};

const ERROR_SUBJECT: &str = "There was an error running your code";

/// Submits compile requests and delivers the formatted outcome.
///
/// A failed compile is a normal outcome: it is turned into a reply and never
/// returned as an error. Only failures to deliver that reply propagate.
#[derive(Clone)]
pub struct CompileDispatcher {
    exec: Arc<dyn ExecutionService>,
    retrier: Retrier,
    notifier: Notifier,
    cfg: Arc<Config>,
    footer: String,
}

impl CompileDispatcher {
    pub fn new(
        exec: Arc<dyn ExecutionService>,
        retrier: Retrier,
        notifier: Notifier,
        cfg: Arc<Config>,
    ) -> Self {
        let footer = footer(&cfg.credentials.username);
        Self {
            exec,
            retrier,
            notifier,
            cfg,
            footer,
        }
    }

    pub async fn dispatch(&self, item: &InboxItem, req: CompileRequest) -> Result<()> {
        info!(item = %item.id, language = %req.language, "submitting compile job");

        let submitted = self
            .retrier
            .run("submit compile job", || self.exec.submit(&req))
            .await;

        match submitted {
            Ok(Some(CompileResult::Finished(report))) => {
                self.deliver_report(item, &req, &report).await
            }
            Ok(Some(CompileResult::Rejected { reason })) => {
                info!(item = %item.id, %reason, "compile request rejected");
                self.deliver_error(item, &format_rejection(&reason, &self.footer))
                    .await
            }
            Ok(None) => {
                warn!(item = %item.id, "execution service returned no result");
                let class = FailureClass::Application { benign: true };
                self.deliver_error(item, &format_failure(class, &self.footer))
                    .await
            }
            Err(e) => {
                let class = classify(&e, self.retrier.policy());
                warn!(item = %item.id, class = class.label(), error = %e, "compile job failed");
                if let FailureClass::PermanentClient(401 | 403) = class {
                    // Credentials problem: users cannot fix this, the operator can.
                    if let Err(alert_err) = self
                        .notifier
                        .alert(&format!("Execution service refused access: {e}"))
                        .await
                    {
                        warn!(error = %alert_err, "operator alert failed");
                    }
                }
                self.deliver_error(item, &format_failure(class, &self.footer))
                    .await
            }
        }
    }

    async fn deliver_report(
        &self,
        item: &InboxItem,
        req: &CompileRequest,
        report: &ExecutionReport,
    ) -> Result<()> {
        if !report.succeeded() && !req.options.include_errors {
            return self
                .deliver_error(item, &format_run_error(req, report, &self.footer))
                .await;
        }

        let reply = format_reply(req, report, &self.cfg.reply, &self.footer);
        self.notifier.reply(item, &reply.text).await?;

        if !reply.spam_reasons.is_empty() {
            let author = item
                .author
                .as_ref()
                .map(|a| a.0.as_str())
                .unwrap_or("[deleted]");
            let notice = format!(
                "Possible spam from /u/{author} in {}:\n\n{}",
                item.id,
                reply
                    .spam_reasons
                    .iter()
                    .map(|r| format!("* {r}"))
                    .collect::<Vec<_>>()
                    .join("\n")
            );
            self.notifier.log(&notice, true).await?;
            self.notifier
                .send_modmail("Possible spam", &notice)
                .await?;
        }
        Ok(())
    }

    /// Errors are replied to in place for private messages, but sent privately
    /// to the author for comments so threads are not cluttered.
    async fn deliver_error(&self, item: &InboxItem, text: &str) -> Result<()> {
        match (item.kind, &item.author) {
            (ItemKind::Message, _) => self.notifier.reply(item, text).await,
            (ItemKind::Comment, Some(author)) => {
                self.notifier
                    .notify(&Recipient::User(author.0.clone()), ERROR_SUBJECT, text)
                    .await
            }
            (ItemKind::Comment, None) => {
                info!(item = %item.id, "author deleted; dropping error reply");
                Ok(())
            }
        }
    }
}
