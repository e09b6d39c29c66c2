use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::{
    commands::{Command, CommandParser},
    config::Config,
    dispatch::CompileDispatcher,
    domain::InboxItem,
    formatting::{footer, format_malformed},
    moderation::Moderation,
    notify::Notifier,
    ports::{ExecutionService, ItemHandler, PlatformClient},
    retry::Retrier,
    Result,
};

/// Production [`ItemHandler`]: classifies an item and routes it to the
/// compile dispatcher, the moderation handler, or the help reply.
pub struct CommandRouter {
    parser: CommandParser,
    dispatcher: CompileDispatcher,
    moderation: Moderation,
    notifier: Notifier,
    cfg: Arc<Config>,
}

impl CommandRouter {
    pub fn new(
        cfg: Arc<Config>,
        platform: Arc<dyn PlatformClient>,
        exec: Arc<dyn ExecutionService>,
        retrier: Retrier,
    ) -> Self {
        let notifier = Notifier::new(platform.clone(), retrier.clone(), cfg.clone());
        Self {
            parser: CommandParser::new(&cfg.credentials.username, &cfg.operator),
            dispatcher: CompileDispatcher::new(
                exec,
                retrier.clone(),
                notifier.clone(),
                cfg.clone(),
            ),
            moderation: Moderation::new(platform, retrier, cfg.clone()),
            notifier,
            cfg,
        }
    }

    async fn author_is_banned(&self, item: &InboxItem) -> Result<bool> {
        match &item.author {
            Some(author) => self.moderation.is_banned(&author.0).await,
            None => Ok(false),
        }
    }
}

#[async_trait]
impl ItemHandler for CommandRouter {
    async fn handle(&self, item: &InboxItem) -> Result<()> {
        let cmd = self.parser.classify(item);
        if matches!(cmd, Command::Compile(_) | Command::Malformed { .. })
            && self.author_is_banned(item).await?
        {
            info!(item = %item.id, "ignoring request from banned user");
            return Ok(());
        }

        match cmd {
            Command::Compile(req) => self.dispatcher.dispatch(item, req).await,
            Command::Malformed { reason } => {
                info!(item = %item.id, %reason, "malformed compile request");
                let text = format_malformed(
                    &reason,
                    &self.cfg.help_text,
                    &footer(&self.cfg.credentials.username),
                );
                self.notifier.reply(item, &text).await
            }
            Command::Help => self.notifier.reply(item, &self.cfg.help_text).await,
            Command::Moderation(query) => {
                let text = self.moderation.answer(&query).await?;
                self.notifier.reply(item, &text).await
            }
            Command::Unrecognized => {
                debug!(item = %item.id, "no command recognized");
                Ok(())
            }
        }
    }
}
