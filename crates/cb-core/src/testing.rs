//! In-memory fakes for the ports, shared by the unit tests.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    config::{Config, Credentials, ExecutionConfig, ReplyLimits},
    domain::{
        CommunityHandle, CompileRequest, CompileResult, InboxItem, ItemKind, Recipient, UserName,
    },
    errors::RemoteError,
    ports::{ExecutionService, ItemHandler, PlatformClient, Sleeper},
    retry::{Retrier, RetryPolicy},
    Error, Result,
};

#[derive(Default)]
pub struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, d: Duration) {
        self.sleeps.lock().unwrap().push(d);
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Authenticate { username: String, password: String },
    FetchUnread,
    MarkRead(String),
    Send { to: Recipient, subject: String, body: String },
    Reply { id: String, body: String },
    FetchCommunity(String),
    FetchBanned(String),
}

#[derive(Default)]
pub struct FakePlatform {
    calls: Mutex<Vec<Call>>,
    unread: Mutex<Vec<InboxItem>>,
    banned: Mutex<Vec<String>>,
    auth_error: Mutex<Option<RemoteError>>,
    send_errors: Mutex<VecDeque<RemoteError>>,
    reply_errors: Mutex<VecDeque<RemoteError>>,
    mark_read_errors: Mutex<VecDeque<RemoteError>>,
}

impl FakePlatform {
    pub fn with_unread(items: Vec<InboxItem>) -> Self {
        let p = Self::default();
        *p.unread.lock().unwrap() = items;
        p
    }

    pub fn set_banned(&self, names: &[&str]) {
        *self.banned.lock().unwrap() = names.iter().map(|s| s.to_string()).collect();
    }

    pub fn fail_auth(&self, err: RemoteError) {
        *self.auth_error.lock().unwrap() = Some(err);
    }

    /// Queue errors returned by subsequent `send_message` calls, one per call.
    pub fn fail_sends(&self, errs: Vec<RemoteError>) {
        self.send_errors.lock().unwrap().extend(errs);
    }

    pub fn fail_replies(&self, errs: Vec<RemoteError>) {
        self.reply_errors.lock().unwrap().extend(errs);
    }

    pub fn fail_mark_reads(&self, errs: Vec<RemoteError>) {
        self.mark_read_errors.lock().unwrap().extend(errs);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn sends(&self) -> Vec<(Recipient, String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Send { to, subject, body } => Some((to, subject, body)),
                _ => None,
            })
            .collect()
    }

    pub fn replies(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Reply { id, body } => Some((id, body)),
                _ => None,
            })
            .collect()
    }

    pub fn marked_read(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::MarkRead(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl PlatformClient for FakePlatform {
    async fn authenticate(&self, credentials: &Credentials) -> Result<()> {
        self.record(Call::Authenticate {
            username: credentials.username.clone(),
            password: credentials.password.clone(),
        });
        match self.auth_error.lock().unwrap().clone() {
            Some(e) => Err(Error::Remote(e)),
            None => Ok(()),
        }
    }

    async fn fetch_unread(&self) -> Result<Vec<InboxItem>> {
        self.record(Call::FetchUnread);
        // Items leave the unread snapshot once fetched, like a platform inbox after mark-read.
        Ok(std::mem::take(&mut *self.unread.lock().unwrap()))
    }

    async fn mark_read(&self, item: &InboxItem) -> Result<()> {
        self.record(Call::MarkRead(item.id.clone()));
        match self.mark_read_errors.lock().unwrap().pop_front() {
            Some(e) => Err(Error::Remote(e)),
            None => Ok(()),
        }
    }

    async fn send_message(&self, to: &Recipient, subject: &str, body: &str) -> Result<()> {
        self.record(Call::Send {
            to: to.clone(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        match self.send_errors.lock().unwrap().pop_front() {
            Some(e) => Err(Error::Remote(e)),
            None => Ok(()),
        }
    }

    async fn reply(&self, item: &InboxItem, body: &str) -> Result<()> {
        self.record(Call::Reply {
            id: item.id.clone(),
            body: body.to_string(),
        });
        match self.reply_errors.lock().unwrap().pop_front() {
            Some(e) => Err(Error::Remote(e)),
            None => Ok(()),
        }
    }

    async fn fetch_community(&self, name: &str) -> Result<CommunityHandle> {
        self.record(Call::FetchCommunity(name.to_string()));
        Ok(CommunityHandle {
            name: name.to_string(),
        })
    }

    async fn fetch_banned_users(&self, community: &CommunityHandle) -> Result<Vec<String>> {
        self.record(Call::FetchBanned(community.name.clone()));
        Ok(self.banned.lock().unwrap().clone())
    }
}

/// Execution service returning scripted results in order.
#[derive(Default)]
pub struct FakeExecution {
    results: Mutex<VecDeque<std::result::Result<CompileResult, RemoteError>>>,
    requests: Mutex<Vec<CompileRequest>>,
}

impl FakeExecution {
    pub fn new(results: Vec<std::result::Result<CompileResult, RemoteError>>) -> Self {
        Self {
            results: Mutex::new(results.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<CompileRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExecutionService for FakeExecution {
    async fn submit(&self, req: &CompileRequest) -> Result<CompileResult> {
        self.requests.lock().unwrap().push(req.clone());
        match self.results.lock().unwrap().pop_front() {
            Some(Ok(r)) => Ok(r),
            Some(Err(e)) => Err(Error::Remote(e)),
            None => Err(Error::External("no scripted result".to_string())),
        }
    }
}

/// Handler that records item ids and fails for the ids it is told to.
#[derive(Default)]
pub struct RecordingHandler {
    pub seen: Mutex<Vec<String>>,
    pub fail_on: Vec<String>,
}

#[async_trait]
impl ItemHandler for RecordingHandler {
    async fn handle(&self, item: &InboxItem) -> Result<()> {
        self.seen.lock().unwrap().push(item.id.clone());
        if self.fail_on.contains(&item.id) {
            return Err(Error::External(format!("handler failed on {}", item.id)));
        }
        Ok(())
    }
}

pub fn test_config() -> Arc<Config> {
    Arc::new(Config {
        credentials: Credentials {
            username: "CompileBot".to_string(),
            password: "hunter2".to_string(),
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
        },
        community: "MySub".to_string(),
        operator: "AdminUser".to_string(),
        user_agent: "cb-test".to_string(),
        execution: ExecutionConfig {
            base_url: "http://localhost".to_string(),
            token: None,
            request_timeout: Duration::from_secs(1),
        },
        poll_interval: Duration::from_secs(60),
        retry: RetryPolicy::default(),
        reply: ReplyLimits::default(),
        help_text: "help text".to_string(),
    })
}

pub fn test_retrier() -> (Retrier, Arc<RecordingSleeper>) {
    let sleeper = Arc::new(RecordingSleeper::default());
    (
        Retrier::new(RetryPolicy::default(), sleeper.clone()),
        sleeper,
    )
}

pub fn message(id: &str, author: &str, subject: &str, body: &str) -> InboxItem {
    InboxItem {
        id: id.to_string(),
        kind: ItemKind::Message,
        author: Some(UserName(author.to_string())),
        subject: subject.to_string(),
        body: body.to_string(),
    }
}

pub fn comment(id: &str, author: &str, body: &str) -> InboxItem {
    InboxItem {
        id: id.to_string(),
        kind: ItemKind::Comment,
        author: Some(UserName(author.to_string())),
        subject: "username mention".to_string(),
        body: body.to_string(),
    }
}
