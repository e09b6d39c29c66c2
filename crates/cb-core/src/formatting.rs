//! Reply text for finished runs, rejections and failures (Reddit markdown).

use std::collections::HashSet;

use chrono::Utc;

use crate::{
    config::ReplyLimits,
    domain::{CompileRequest, ExecutionReport},
    retry::FailureClass,
};

const TRUNCATION_MARK: &str = "\n...\n";
/// Lines kept from long output; fewer when the output is mostly repetition.
const LINES_KEPT: usize = 51;
const LINES_KEPT_REPETITIVE: usize = 2;
const MIN_DISTINCT_LINES: usize = 5;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FormattedReply {
    pub text: String,
    /// Non-empty when the output looks like spam; the operator should be told.
    pub spam_reasons: Vec<String>,
}

/// Indent every line by four spaces so it renders as a markdown code block.
pub fn code_block(text: &str) -> String {
    text.split('\n')
        .map(|l| format!("    {l}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// First `max` chars of `s`, never splitting a UTF-8 sequence.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

pub fn footer(bot_username: &str) -> String {
    format!("^(Send a message with the subject --help to /u/{bot_username} for usage.)")
}

/// Reasons the output of a run should be reported as possible spam.
pub fn detect_spam(output: &str, limits: &ReplyLimits) -> Vec<String> {
    let mut reasons = Vec::new();

    let line_breaks = output.matches('\n').count();
    if line_breaks > limits.line_limit && distinct_lines(output) < MIN_DISTINCT_LINES {
        reasons.push(format!("Excessive line breaks ({line_breaks})"));
    }

    let chars = output.chars().count();
    if chars > limits.output_char_limit {
        reasons.push(format!("Excessive character count ({chars})"));
    }

    reasons
}

fn distinct_lines(output: &str) -> usize {
    output.split('\n').collect::<HashSet<_>>().len()
}

/// Shorten program output to what fits in a reply.
pub fn truncate_output(output: &str, limits: &ReplyLimits) -> String {
    let mut out = output.to_string();

    if out.matches('\n').count() > limits.line_limit {
        let keep = if distinct_lines(&out) < MIN_DISTINCT_LINES {
            LINES_KEPT_REPETITIVE
        } else {
            LINES_KEPT
        };
        out = out.split('\n').take(keep).collect::<Vec<_>>().join("\n");
        out.push_str("\n...");
    }

    if out.chars().count() > limits.output_char_limit {
        out = format!("{}\n...", truncate_chars(&out, limits.output_char_limit));
    }

    out
}

pub fn format_reply(
    req: &CompileRequest,
    report: &ExecutionReport,
    limits: &ReplyLimits,
    footer: &str,
) -> FormattedReply {
    let opts = &req.options;
    let output = report.combined_output();
    let spam_reasons = detect_spam(&output, limits);

    let mut head = String::new();
    if opts.source {
        head.push_str(&format!("Source:\n\n{}\n\n", code_block(&req.source)));
    }
    if opts.input {
        head.push_str(&format!("Input:\n\n{}\n\n", code_block(&req.stdin)));
    }

    let mut body = format!(
        "Output:\n\n{}\n\n",
        code_block(&truncate_output(&output, limits))
    );
    if let Some(info) = report.compiler_info.as_deref().filter(|s| !s.trim().is_empty()) {
        body.push_str(&format!("Compiler Info:\n\n{}\n\n", code_block(info)));
    }
    if let Some(status) = abnormal_status(report) {
        body.push_str(&format!("{status}\n\n"));
    }

    let mut extra = String::new();
    if opts.date {
        extra.push_str(&format!(
            "Date: {}\n\n",
            Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
        ));
    }
    if opts.memory {
        if let Some(m) = report.memory_bytes {
            extra.push_str(&format!("Memory Usage: {m} bytes\n\n"));
        }
    }
    if opts.time {
        if let Some(ms) = report.cpu_time_ms {
            extra.push_str(&format!(
                "Execution Time: {:.3} seconds\n\n",
                ms as f64 / 1000.0
            ));
        }
    }
    if opts.version {
        if let Some(v) = &report.language_version {
            extra.push_str(&format!("Version: {} {v}\n\n", req.language));
        }
    }

    let text = fit_sections(&head, &body, &extra, footer, limits.reply_char_limit);
    FormattedReply { text, spam_reasons }
}

/// Summary sent instead of the full reply when a run failed and the user did
/// not ask for errors to be included.
pub fn format_run_error(req: &CompileRequest, report: &ExecutionReport, footer: &str) -> String {
    let mut text = format!(
        "There was an error running your {} code.\n\n",
        req.language
    );
    if let Some(status) = abnormal_status(report) {
        text.push_str(&format!("{status}\n\n"));
    }
    if let Some(info) = report.compiler_info.as_deref().filter(|s| !s.trim().is_empty()) {
        text.push_str(&format!("Compiler Info:\n\n{}\n\n", code_block(info)));
    }
    text.push_str("Add --include-errors after the language to post the output anyway.\n\n");
    text.push_str(footer);
    text
}

pub fn format_rejection(reason: &str, footer: &str) -> String {
    format!("Your code could not be run: {reason}\n\n{footer}")
}

pub fn format_malformed(reason: &str, help: &str, footer: &str) -> String {
    format!("I could not understand your request: {reason}.\n\n{help}\n\n{footer}")
}

pub fn format_failure(class: FailureClass, footer: &str) -> String {
    format!(
        "Sorry, your code could not be run right now ({}). Please try again later.\n\n{footer}",
        class.label()
    )
}

fn abnormal_status(report: &ExecutionReport) -> Option<String> {
    if report.compile_failed {
        return Some("Compilation failed.".to_string());
    }
    if let Some(sig) = &report.signal {
        return Some(format!("Killed by signal {sig}."));
    }
    match report.exit_code {
        Some(code) if code != 0 => Some(format!("Exit code: {code}")),
        _ => None,
    }
}

/// Assemble `head + body + extra + footer`, shortening sections so the total
/// stays within `limit` chars. The footer is kept first, then body, head, extra.
fn fit_sections(head: &str, body: &str, extra: &str, footer: &str, limit: usize) -> String {
    let mut budget = limit;
    let mut fit = |section: &str| -> String {
        let len = section.chars().count();
        if len <= budget {
            budget -= len;
            return section.to_string();
        }
        let mark = TRUNCATION_MARK.chars().count();
        if budget <= mark {
            budget = 0;
            return String::new();
        }
        let kept = truncate_chars(section, budget - mark);
        budget = 0;
        format!("{kept}{TRUNCATION_MARK}")
    };

    let footer = fit(footer);
    let body = fit(body);
    let head = fit(head);
    let extra = fit(extra);
    format!("{head}{body}{extra}{footer}")
}
