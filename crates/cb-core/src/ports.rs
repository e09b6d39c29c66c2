use std::time::Duration;

use async_trait::async_trait;

use crate::{
    config::Credentials,
    domain::{CommunityHandle, CompileRequest, CompileResult, InboxItem, Recipient},
    Result,
};

/// Hexagonal port for the messaging platform.
///
/// Implementations map failures into `Error::Remote` and must not retry; retry
/// policy lives in `crate::retry` only.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    async fn authenticate(&self, credentials: &Credentials) -> Result<()>;

    /// Finite snapshot of currently unread items, in platform order.
    async fn fetch_unread(&self) -> Result<Vec<InboxItem>>;
    async fn mark_read(&self, item: &InboxItem) -> Result<()>;

    async fn send_message(&self, to: &Recipient, subject: &str, body: &str) -> Result<()>;
    /// Reply in place (comment thread or message conversation).
    async fn reply(&self, item: &InboxItem, body: &str) -> Result<()>;

    async fn fetch_community(&self, name: &str) -> Result<CommunityHandle>;
    async fn fetch_banned_users(&self, community: &CommunityHandle) -> Result<Vec<String>>;
}

/// Hexagonal port for the remote code execution service.
#[async_trait]
pub trait ExecutionService: Send + Sync {
    async fn submit(&self, req: &CompileRequest) -> Result<CompileResult>;
}

/// Per-item handler invoked by the inbox processor.
#[async_trait]
pub trait ItemHandler: Send + Sync {
    async fn handle(&self, item: &InboxItem) -> Result<()>;
}

/// Suspension point used between retries; swapped out in tests.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, d: Duration);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, d: Duration) {
        tokio::time::sleep(d).await;
    }
}
