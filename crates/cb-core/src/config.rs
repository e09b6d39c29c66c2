use std::{env, fs, path::Path, sync::Arc, time::Duration};

use crate::{errors::Error, retry::RetryPolicy, Result};

const DEFAULT_EXEC_URL: &str = "https://emkc.org/api/v2/piston";
const DEFAULT_HELP_TEXT: &str = "To compile code, mention the bot followed by a language \
and indent your code by four spaces:\n\n    +/u/CompileBot python\n\n        print('hello')\n\n\
Add an indented block after a line reading `Input:` to supply stdin.";

/// Platform login. Never logged.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug)]
pub struct ExecutionConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub request_timeout: Duration,
}

/// Size limits applied when formatting replies.
#[derive(Clone, Copy, Debug)]
pub struct ReplyLimits {
    /// Output with more lines than this is truncated (and may be flagged as spam).
    pub line_limit: usize,
    pub output_char_limit: usize,
    pub reply_char_limit: usize,
}

impl Default for ReplyLimits {
    fn default() -> Self {
        Self {
            line_limit: 70,
            output_char_limit: 8000,
            reply_char_limit: 9800,
        }
    }
}

/// Typed, read-only configuration for the bot.
///
/// Built once at startup and shared as `Arc<Config>`.
#[derive(Clone, Debug)]
pub struct Config {
    pub credentials: Credentials,
    /// Community (subreddit) the bot serves; its ban list and modmail are used.
    pub community: String,
    /// Operator account that receives alert-mode notifications.
    pub operator: String,
    pub user_agent: String,
    pub execution: ExecutionConfig,
    pub poll_interval: Duration,
    pub retry: RetryPolicy,
    pub reply: ReplyLimits,
    pub help_text: String,
}

impl Config {
    /// Load from the process environment, reading `.env` first if present.
    pub fn load() -> Result<Arc<Self>> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok()).map(Arc::new)
    }

    /// Build from an arbitrary key lookup (the environment in production).
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| -> Result<String> {
            get(key)
                .and_then(non_empty)
                .ok_or_else(|| Error::Config(format!("{key} environment variable is required")))
        };

        let credentials = Credentials {
            username: required("CB_REDDIT_USERNAME")?,
            password: required("CB_REDDIT_PASSWORD")?,
            client_id: required("CB_REDDIT_CLIENT_ID")?,
            client_secret: required("CB_REDDIT_CLIENT_SECRET")?,
        };
        let community = required("CB_COMMUNITY")?;
        let operator = required("CB_OPERATOR")?;

        let user_agent = get("CB_USER_AGENT").and_then(non_empty).unwrap_or_else(|| {
            format!(
                "cb/{} (by /u/{})",
                env!("CARGO_PKG_VERSION"),
                credentials.username
            )
        });

        let execution = ExecutionConfig {
            base_url: get("CB_EXEC_URL")
                .and_then(non_empty)
                .unwrap_or_else(|| DEFAULT_EXEC_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            token: get("CB_EXEC_TOKEN").and_then(non_empty),
            request_timeout: Duration::from_secs(parse_u64(&get, "CB_EXEC_TIMEOUT_SECS")?.unwrap_or(30)),
        };

        let poll_interval =
            Duration::from_secs(parse_u64(&get, "CB_POLL_INTERVAL_SECS")?.unwrap_or(60));

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: parse_u64(&get, "CB_MAX_ATTEMPTS")?
                .map(|n| n.max(1) as u32)
                .unwrap_or(defaults.max_attempts),
            server_error_delay: parse_u64(&get, "CB_SERVER_ERROR_DELAY_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.server_error_delay),
            benign_api_errors: get("CB_BENIGN_API_ERRORS")
                .map(|v| parse_csv_upper(&v))
                .unwrap_or(defaults.benign_api_errors),
        };

        let limits = ReplyLimits::default();
        let reply = ReplyLimits {
            line_limit: parse_u64(&get, "CB_LINE_LIMIT")?
                .map(|n| n as usize)
                .unwrap_or(limits.line_limit),
            output_char_limit: parse_u64(&get, "CB_OUTPUT_CHAR_LIMIT")?
                .map(|n| n as usize)
                .unwrap_or(limits.output_char_limit),
            reply_char_limit: parse_u64(&get, "CB_REPLY_CHAR_LIMIT")?
                .map(|n| n as usize)
                .unwrap_or(limits.reply_char_limit),
        };

        let help_text = get("CB_HELP_TEXT")
            .and_then(non_empty)
            .unwrap_or_else(|| DEFAULT_HELP_TEXT.to_string());

        Ok(Self {
            credentials,
            community,
            operator,
            user_agent,
            execution,
            poll_interval,
            retry,
            reply,
            help_text,
        })
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        out.push((key.to_string(), val));
    }
    out
}

fn parse_u64(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<u64>> {
    let Some(raw) = get(key).and_then(non_empty) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<u64>()
        .map(Some)
        .map_err(|_| Error::Config(format!("{key} must be a non-negative integer, got {raw:?}")))
}

fn parse_csv_upper(v: &str) -> Vec<String> {
    v.split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
