use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use cb_core::{bot::Bot, config::Config, ports::TokioSleeper};
use cb_piston::PistonClient;
use cb_reddit::RedditClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cb_core::logging::init("cb")?;

    let cfg = Config::load()?;
    let once = std::env::args().skip(1).any(|a| a == "--once");

    let platform = Arc::new(RedditClient::new(&cfg.user_agent)?);
    let exec = Arc::new(PistonClient::new(&cfg.execution)?);
    let bot = Bot::new(cfg.clone(), platform, exec, Arc::new(TokioSleeper));

    info!(
        community = %cfg.community,
        operator = %cfg.operator,
        poll_secs = cfg.poll_interval.as_secs(),
        "cb starting"
    );

    if once {
        let stats = bot.run_once().await.context("single poll failed")?;
        info!(
            fetched = stats.fetched,
            handled = stats.handled,
            failed = stats.failed,
            "done"
        );
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received; finishing current cycle");
                on_signal.cancel();
            }
            Err(e) => error!(error = %e, "failed to listen for ctrl-c"),
        }
    });

    bot.run(cancel).await.context("bot stopped")?;
    Ok(())
}
