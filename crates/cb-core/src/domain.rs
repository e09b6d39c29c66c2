/// Platform user name (e.g. a Reddit account name, without the `u/` prefix).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct UserName(pub String);

impl UserName {
    /// Lowercased form used for comparisons; platform names are case-insensitive.
    pub fn normalized(&self) -> String {
        self.0.to_lowercase()
    }
}

/// Whether an inbox item arrived as a private message or as a comment mention/reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ItemKind {
    Message,
    Comment,
}

/// One pending inbox entry.
///
/// Owned by the platform; the bot only holds it for the duration of a poll cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboxItem {
    /// Platform-wide identifier (Reddit "fullname", e.g. `t4_abc`).
    pub id: String,
    pub kind: ItemKind,
    /// `None` when the author account was deleted.
    pub author: Option<UserName>,
    pub subject: String,
    pub body: String,
}

/// Resolved community (subreddit) reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommunityHandle {
    pub name: String,
}

/// Destination of an outbound message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Recipient {
    User(String),
    /// Messaging a community reaches its moderators (modmail).
    Community(CommunityHandle),
}

/// Extra sections a user may request on the summons line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReplyOptions {
    pub source: bool,
    pub input: bool,
    pub date: bool,
    pub memory: bool,
    pub time: bool,
    pub version: bool,
    pub include_errors: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompileRequest {
    pub language: String,
    pub source: String,
    pub stdin: String,
    pub options: ReplyOptions,
}

/// Outcome of a finished run as reported by the execution service.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub signal: Option<String>,
    /// Compile-stage output (warnings/errors), if the language has a compile step.
    pub compiler_info: Option<String>,
    /// `true` when the compile stage failed and the program never ran.
    pub compile_failed: bool,
    pub language_version: Option<String>,
    pub memory_bytes: Option<u64>,
    pub cpu_time_ms: Option<u64>,
}

impl ExecutionReport {
    /// A run that compiled and exited with status 0.
    pub fn succeeded(&self) -> bool {
        !self.compile_failed && self.signal.is_none() && self.exit_code.unwrap_or(0) == 0
    }

    /// Program output as shown to the user: stdout followed by stderr.
    pub fn combined_output(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CompileResult {
    Finished(ExecutionReport),
    /// Structured rejection by the service (unknown language, oversized source, ...).
    Rejected { reason: String },
}
