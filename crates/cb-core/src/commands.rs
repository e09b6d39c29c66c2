//! Classification of inbox items into bot commands.

use regex::Regex;

use crate::domain::{CompileRequest, InboxItem, ItemKind, ReplyOptions};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModerationQuery {
    ListBanned,
    CheckUser(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Compile(CompileRequest),
    /// The bot was summoned but the request could not be parsed.
    Malformed { reason: String },
    Help,
    Moderation(ModerationQuery),
    Unrecognized,
}

/// Classifies item bodies for one bot account.
#[derive(Clone, Debug)]
pub struct CommandParser {
    summons: Regex,
    stdin_header: Regex,
    operator: String,
}

impl CommandParser {
    pub fn new(bot_username: &str, operator: &str) -> Self {
        let summons = Regex::new(&format!(
            r"(?im)^[ \t]*\+/?u/{}\b[ \t]*(?P<args>[^\n]*)$",
            regex::escape(bot_username)
        ))
        .expect("summons pattern is valid");
        let stdin_header =
            Regex::new(r"(?i)^\s*(input|stdin)\s*:?\s*$").expect("stdin pattern is valid");

        Self {
            summons,
            stdin_header,
            operator: operator.to_lowercase(),
        }
    }

    pub fn classify(&self, item: &InboxItem) -> Command {
        if let Some(cmd) = self.parse_compile(&item.body) {
            return cmd;
        }

        if item.kind != ItemKind::Message {
            return Command::Unrecognized;
        }

        let subject = item.subject.trim().to_lowercase();
        if subject == "--help" || item.body.trim().eq_ignore_ascii_case("--help") {
            return Command::Help;
        }

        let from_operator = item
            .author
            .as_ref()
            .is_some_and(|a| a.normalized() == self.operator);
        if from_operator && subject == "banned" {
            let query = match item.body.split_whitespace().next() {
                Some(name) => {
                    let name = name
                        .trim_start_matches('/')
                        .trim_start_matches("u/")
                        .to_string();
                    ModerationQuery::CheckUser(name)
                }
                None => ModerationQuery::ListBanned,
            };
            return Command::Moderation(query);
        }

        Command::Unrecognized
    }

    fn parse_compile(&self, body: &str) -> Option<Command> {
        let caps = self.summons.captures(body)?;
        let args = caps.name("args").map(|m| m.as_str()).unwrap_or("");
        let after = &body[caps.get(0).map(|m| m.end()).unwrap_or(body.len())..];

        let (language, options) = parse_args(args);
        if language.is_empty() {
            return Some(Command::Malformed {
                reason: "no language given after the summons".to_string(),
            });
        }

        let mut lines = after.lines().skip(1).peekable();
        let source = take_code_block(&mut lines);
        if source.trim().is_empty() {
            return Some(Command::Malformed {
                reason: "no indented code block found after the summons".to_string(),
            });
        }

        while lines.peek().is_some_and(|l| l.trim().is_empty()) {
            lines.next();
        }
        let has_stdin = lines
            .peek()
            .is_some_and(|l| self.stdin_header.is_match(l));
        let stdin = if has_stdin {
            lines.next();
            take_code_block(&mut lines)
        } else {
            String::new()
        };

        Some(Command::Compile(CompileRequest {
            language,
            source,
            stdin,
            options,
        }))
    }
}

fn parse_args(args: &str) -> (String, ReplyOptions) {
    let mut options = ReplyOptions::default();
    let mut language = Vec::new();

    for tok in args.split_whitespace() {
        match tok.to_lowercase().as_str() {
            "--source" => options.source = true,
            "--input" => options.input = true,
            "--date" => options.date = true,
            "--memory" => options.memory = true,
            "--time" => options.time = true,
            "--version" => options.version = true,
            "--include-errors" => options.include_errors = true,
            flag if flag.starts_with("--") => tracing::debug!(flag, "ignoring unknown option"),
            _ => language.push(tok),
        }
    }

    (language.join(" "), options)
}

/// Consume a markdown code block (lines indented by four spaces or a tab),
/// skipping leading blank lines. Returns the block with the indent removed and
/// trailing blank lines dropped.
fn take_code_block<'a, I>(lines: &mut std::iter::Peekable<I>) -> String
where
    I: Iterator<Item = &'a str>,
{
    while lines.peek().is_some_and(|l| l.trim().is_empty()) {
        lines.next();
    }

    let mut block: Vec<&str> = Vec::new();
    while let Some(&line) = lines.peek() {
        let stripped = if let Some(rest) = line.strip_prefix("    ") {
            rest
        } else if let Some(rest) = line.strip_prefix('\t') {
            rest
        } else if line.trim().is_empty() {
            ""
        } else {
            break;
        };
        block.push(stripped);
        lines.next();
    }

    while block.last().is_some_and(|l| l.trim().is_empty()) {
        block.pop();
    }
    block.join("\n")
}
