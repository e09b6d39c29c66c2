//! Reddit adapter.
//!
//! Implements the `cb-core` `PlatformClient` port over Reddit's OAuth JSON API.
//! Failures are mapped into `RemoteError` kinds; this crate never retries.

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use reqwest::{header, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use cb_core::{
    config::Credentials,
    domain::{CommunityHandle, InboxItem, ItemKind, Recipient, UserName},
    errors::{Error, RemoteError},
    ports::PlatformClient,
    Result,
};

const AUTH_URL: &str = "https://www.reddit.com/api/v1/access_token";
const API_BASE: &str = "https://oauth.reddit.com";
const DEFAULT_RATE_LIMIT_WAIT: Duration = Duration::from_secs(60);
/// Refresh the token this long before Reddit says it expires.
const TOKEN_SLACK: Duration = Duration::from_secs(60);
const BANNED_PAGE_SIZE: u32 = 100;

struct Session {
    token: String,
    expires_at: Instant,
}

pub struct RedditClient {
    http: reqwest::Client,
    auth_url: String,
    api_base: String,
    credentials: Mutex<Option<Credentials>>,
    session: Mutex<Option<Session>>,
}

impl RedditClient {
    pub fn new(user_agent: &str) -> Result<Self> {
        Self::with_endpoints(user_agent, AUTH_URL, API_BASE)
    }

    pub fn with_endpoints(user_agent: &str, auth_url: &str, api_base: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Config(format!("reddit http client: {e}")))?;
        Ok(Self {
            http,
            auth_url: auth_url.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
            credentials: Mutex::new(None),
            session: Mutex::new(None),
        })
    }

    async fn login(&self, creds: &Credentials) -> Result<Session> {
        let resp = self
            .http
            .post(&self.auth_url)
            .basic_auth(&creds.client_id, Some(&creds.client_secret))
            .form(&[
                ("grant_type", "password"),
                ("username", creds.username.as_str()),
                ("password", creds.password.as_str()),
            ])
            .send()
            .await
            .map_err(map_transport)?;

        let body = check_status(resp).await?;
        let token: TokenResponse = serde_json::from_value(body)?;
        session_from_token(token, Instant::now())
    }

    /// Current bearer token, logging in again when the session has expired.
    async fn token(&self) -> Result<String> {
        let mut session = self.session.lock().await;
        if let Some(s) = session.as_ref() {
            if Instant::now() < s.expires_at {
                return Ok(s.token.clone());
            }
        }

        let creds = self
            .credentials
            .lock()
            .await
            .clone()
            .ok_or_else(|| Error::Auth("reddit client is not authenticated".to_string()))?;
        debug!("refreshing reddit access token");
        let fresh = self.login(&creds).await?;
        let token = fresh.token.clone();
        *session = Some(fresh);
        Ok(token)
    }

    /// Drops the session when Reddit rejects the bearer token, so the next
    /// call logs in again instead of reusing a revoked token until expiry.
    async fn forget_rejected_token(&self, outcome: Result<Value>) -> Result<Value> {
        if let Err(e) = &outcome {
            if is_token_rejection(e) {
                debug!("reddit rejected access token; dropping session");
                *self.session.lock().await = None;
            }
        }
        outcome
    }

    async fn get(&self, path: &str) -> Result<Value> {
        let token = self.token().await?;
        let resp = self
            .http
            .get(format!("{}{path}", self.api_base))
            .bearer_auth(token)
            .query(&[("raw_json", "1")])
            .send()
            .await
            .map_err(map_transport)?;
        let body = check_status(resp).await;
        self.forget_rejected_token(body).await
    }

    async fn post(&self, path: &str, form: &[(&str, &str)]) -> Result<Value> {
        let token = self.token().await?;
        let resp = self
            .http
            .post(format!("{}{path}", self.api_base))
            .bearer_auth(token)
            .form(form)
            .send()
            .await
            .map_err(map_transport)?;
        let body = self.forget_rejected_token(check_status(resp).await).await?;
        match api_error(&body) {
            Some(e) => Err(Error::Remote(e)),
            None => Ok(body),
        }
    }
}

#[async_trait]
impl PlatformClient for RedditClient {
    async fn authenticate(&self, credentials: &Credentials) -> Result<()> {
        let session = self.login(credentials).await?;
        *self.credentials.lock().await = Some(credentials.clone());
        *self.session.lock().await = Some(session);
        info!(user = %credentials.username, "reddit login ok");
        Ok(())
    }

    async fn fetch_unread(&self) -> Result<Vec<InboxItem>> {
        let body = self.get("/message/unread?limit=100").await?;
        parse_inbox(body)
    }

    async fn mark_read(&self, item: &InboxItem) -> Result<()> {
        self.post("/api/read_message", &[("id", item.id.as_str())])
            .await?;
        Ok(())
    }

    async fn send_message(&self, to: &Recipient, subject: &str, body: &str) -> Result<()> {
        let to = match to {
            Recipient::User(name) => name.clone(),
            Recipient::Community(c) => format!("/r/{}", c.name),
        };
        self.post(
            "/api/compose",
            &[
                ("api_type", "json"),
                ("to", to.as_str()),
                ("subject", subject),
                ("text", body),
            ],
        )
        .await?;
        Ok(())
    }

    async fn reply(&self, item: &InboxItem, body: &str) -> Result<()> {
        self.post(
            "/api/comment",
            &[
                ("api_type", "json"),
                ("thing_id", item.id.as_str()),
                ("text", body),
            ],
        )
        .await?;
        Ok(())
    }

    async fn fetch_community(&self, name: &str) -> Result<CommunityHandle> {
        let body = self.get(&format!("/r/{name}/about")).await?;
        let about: Thing<SubredditData> = serde_json::from_value(body)?;
        Ok(CommunityHandle {
            name: about.data.display_name,
        })
    }

    async fn fetch_banned_users(&self, community: &CommunityHandle) -> Result<Vec<String>> {
        let base = format!("/r/{}/about/banned?limit={BANNED_PAGE_SIZE}", community.name);
        collect_banned(|after| {
            let path = match after {
                Some(cursor) => format!("{base}&after={cursor}"),
                None => base.clone(),
            };
            async move { self.get(&path).await }
        })
        .await
    }
}

// ============== Wire types ==============

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct Listing<T> {
    data: ListingData<T>,
}

#[derive(Deserialize)]
struct ListingData<T> {
    children: Vec<T>,
    #[serde(default)]
    after: Option<String>,
}

#[derive(Deserialize)]
struct Thing<T> {
    kind: String,
    data: T,
}

#[derive(Deserialize)]
struct MessageData {
    name: String,
    author: Option<String>,
    #[serde(default)]
    subject: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    was_comment: bool,
}

#[derive(Deserialize)]
struct SubredditData {
    display_name: String,
}

#[derive(Deserialize)]
struct BannedUser {
    name: String,
}

// ============== Mapping ==============

fn session_from_token(token: TokenResponse, now: Instant) -> Result<Session> {
    if let Some(err) = token.error {
        return Err(Error::Auth(format!("reddit rejected login: {err}")));
    }
    let Some(access_token) = token.access_token else {
        return Err(Error::Auth("reddit returned no access token".to_string()));
    };
    let ttl = Duration::from_secs(token.expires_in.unwrap_or(3600)).saturating_sub(TOKEN_SLACK);
    Ok(Session {
        token: access_token,
        expires_at: now + ttl,
    })
}

fn parse_inbox(body: Value) -> Result<Vec<InboxItem>> {
    let listing: Listing<Thing<MessageData>> = serde_json::from_value(body)?;
    Ok(listing
        .data
        .children
        .into_iter()
        .map(|thing| {
            let kind = if thing.kind == "t1" || thing.data.was_comment {
                ItemKind::Comment
            } else {
                ItemKind::Message
            };
            InboxItem {
                id: thing.data.name,
                kind,
                author: thing
                    .data
                    .author
                    .filter(|a| a != "[deleted]")
                    .map(UserName),
                subject: thing.data.subject,
                body: thing.data.body,
            }
        })
        .collect())
}

/// Walks the banned-user listing page by page until Reddit stops returning
/// an `after` cursor.
async fn collect_banned<F, Fut>(mut fetch_page: F) -> Result<Vec<String>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Value>>,
{
    let mut names = Vec::new();
    let mut after: Option<String> = None;
    loop {
        let listing: Listing<BannedUser> = serde_json::from_value(fetch_page(after.clone()).await?)?;
        names.extend(listing.data.children.into_iter().map(|u| u.name));
        match listing.data.after {
            Some(next) if after.as_deref() != Some(next.as_str()) => after = Some(next),
            _ => return Ok(names),
        }
    }
}

fn is_token_rejection(e: &Error) -> bool {
    matches!(
        e,
        Error::Remote(RemoteError::Http {
            status: Some(401),
            ..
        })
    )
}

fn map_transport(e: reqwest::Error) -> Error {
    Error::Remote(RemoteError::http(
        e.status().map(|s| s.as_u16()),
        format!("reddit request error: {e}"),
    ))
}

async fn check_status(resp: Response) -> Result<Value> {
    let status = resp.status();
    if status.is_success() {
        return resp.json::<Value>().await.map_err(map_transport);
    }

    let retry_after = retry_after_header(resp.headers());
    let body = resp.text().await.unwrap_or_default();
    Err(Error::Remote(status_error(status, retry_after, &body)))
}

fn retry_after_header(headers: &header::HeaderMap) -> Option<Duration> {
    [header::RETRY_AFTER.as_str(), "x-ratelimit-reset"]
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.trim().parse::<f64>().ok())
        .map(|secs| Duration::from_secs_f64(secs.max(0.0).ceil()))
        .next()
}

fn status_error(status: StatusCode, retry_after: Option<Duration>, body: &str) -> RemoteError {
    let message = format!(
        "{status} {}",
        body.chars().take(200).collect::<String>().trim()
    );
    if status == StatusCode::TOO_MANY_REQUESTS {
        return RemoteError::RateLimited {
            retry_after: retry_after.unwrap_or(DEFAULT_RATE_LIMIT_WAIT),
            message,
        };
    }
    RemoteError::http(Some(status.as_u16()), message)
}

/// Application errors reported in a 200 response (`{"json": {"errors": [...]}}`).
fn api_error(body: &Value) -> Option<RemoteError> {
    let json = body.get("json")?;
    let first = json.get("errors")?.as_array()?.first()?.as_array()?;
    let reason = first.first()?.as_str()?.to_string();
    let message = first
        .get(1)
        .and_then(|m| m.as_str())
        .unwrap_or_default()
        .to_string();

    if reason == "RATELIMIT" {
        let retry_after = json
            .get("ratelimit")
            .and_then(|r| r.as_f64())
            .map(|secs| Duration::from_secs_f64(secs.max(0.0).ceil()))
            .unwrap_or(DEFAULT_RATE_LIMIT_WAIT);
        return Some(RemoteError::RateLimited {
            retry_after,
            message,
        });
    }

    Some(RemoteError::api(reason, message))
}
