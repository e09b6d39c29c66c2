//! Piston adapter (code execution).
//!
//! Implements the `cb-core` `ExecutionService` port over the Piston
//! `POST /execute` endpoint. Failures are mapped into `RemoteError` kinds; this
//! crate never retries.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use cb_core::{
    config::ExecutionConfig,
    domain::{CompileRequest, CompileResult, ExecutionReport},
    errors::{Error, RemoteError},
    ports::ExecutionService,
    Result,
};

const DEFAULT_RATE_LIMIT_WAIT: Duration = Duration::from_secs(1);

#[derive(Clone, Debug)]
pub struct PistonClient {
    base_url: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl PistonClient {
    pub fn new(cfg: &ExecutionConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.request_timeout)
            .build()
            .map_err(|e| Error::Config(format!("piston http client: {e}")))?;
        Ok(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            token: cfg.token.clone(),
            http,
        })
    }
}

#[async_trait]
impl ExecutionService for PistonClient {
    async fn submit(&self, req: &CompileRequest) -> Result<CompileResult> {
        let payload = ExecuteRequest::from(req);
        let mut call = self
            .http
            .post(format!("{}/execute", self.base_url))
            .json(&payload);
        if let Some(token) = &self.token {
            call = call.header(reqwest::header::AUTHORIZATION, token);
        }

        let resp = call.send().await.map_err(|e| {
            Error::Remote(RemoteError::http(
                e.status().map(|s| s.as_u16()),
                format!("piston request error: {e}"),
            ))
        })?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| {
            Error::Remote(RemoteError::http(None, format!("piston read error: {e}")))
        })?;
        debug!(status = status.as_u16(), language = %req.language, "piston responded");

        interpret(status.as_u16(), &body)
    }
}

// ============== Wire types ==============

#[derive(Serialize)]
struct ExecuteRequest<'a> {
    language: &'a str,
    version: &'a str,
    files: Vec<SourceFile<'a>>,
    stdin: &'a str,
}

#[derive(Serialize)]
struct SourceFile<'a> {
    content: &'a str,
}

impl<'a> From<&'a CompileRequest> for ExecuteRequest<'a> {
    fn from(req: &'a CompileRequest) -> Self {
        Self {
            language: &req.language,
            version: "*",
            files: vec![SourceFile {
                content: &req.source,
            }],
            stdin: &req.stdin,
        }
    }
}

#[derive(Deserialize)]
struct ExecuteResponse {
    version: Option<String>,
    // Absent when the compile stage fails.
    #[serde(default)]
    run: Stage,
    compile: Option<Stage>,
}

#[derive(Deserialize, Default)]
struct Stage {
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
    #[serde(default)]
    output: String,
    code: Option<i32>,
    signal: Option<String>,
    cpu_time: Option<u64>,
    memory: Option<u64>,
}

impl Stage {
    fn failed(&self) -> bool {
        self.signal.is_some() || self.code.unwrap_or(0) != 0
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

// ============== Mapping ==============

fn interpret(status: u16, body: &str) -> Result<CompileResult> {
    match status {
        200..=299 => {
            let resp: ExecuteResponse = serde_json::from_str(body)?;
            Ok(CompileResult::Finished(report_from(resp)))
        }
        // Piston answers bad requests (unknown runtime, oversized source) with a message.
        400 => match serde_json::from_str::<ErrorBody>(body) {
            Ok(e) => Ok(CompileResult::Rejected { reason: e.message }),
            Err(_) => Err(Error::Remote(RemoteError::http(Some(400), snippet(body)))),
        },
        429 => Err(Error::Remote(RemoteError::RateLimited {
            retry_after: DEFAULT_RATE_LIMIT_WAIT,
            message: snippet(body),
        })),
        other => Err(Error::Remote(RemoteError::http(Some(other), snippet(body)))),
    }
}

fn report_from(resp: ExecuteResponse) -> ExecutionReport {
    let compile = resp.compile.unwrap_or_default();
    let compile_failed = compile.failed();
    let compiler_info = Some(compile.output).filter(|o| !o.trim().is_empty());

    ExecutionReport {
        stdout: resp.run.stdout,
        stderr: resp.run.stderr,
        exit_code: resp.run.code,
        signal: resp.run.signal,
        compiler_info,
        compile_failed,
        language_version: resp.version,
        memory_bytes: resp.run.memory,
        cpu_time_ms: resp.run.cpu_time,
    }
}

fn snippet(body: &str) -> String {
    body.chars().take(200).collect::<String>().trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cb_core::domain::ReplyOptions;

    #[test]
    fn builds_request_payload() {
        let req = CompileRequest {
            language: "python".to_string(),
            source: "print(input())".to_string(),
            stdin: "hi".to_string(),
            options: ReplyOptions::default(),
        };
        let v = serde_json::to_value(ExecuteRequest::from(&req)).unwrap();
        assert_eq!(
            v,
            serde_json::json!({
                "language": "python",
                "version": "*",
                "files": [{"content": "print(input())"}],
                "stdin": "hi"
            })
        );
    }

    #[test]
    fn maps_successful_run() {
        let body = r#"{"language":"python","version":"3.10.0","run":{"stdout":"hi\n","stderr":"","output":"hi\n","code":0,"signal":null,"cpu_time":12,"memory":8192000}}"#;
        let CompileResult::Finished(r) = interpret(200, body).unwrap() else {
            panic!("expected finished");
        };
        assert_eq!(r.stdout, "hi\n");
        assert!(r.succeeded());
        assert_eq!(r.language_version.as_deref(), Some("3.10.0"));
        assert_eq!(r.cpu_time_ms, Some(12));
        assert_eq!(r.compiler_info, None);
    }

    #[test]
    fn maps_compile_failure() {
        let body = r#"{"language":"c","version":"10.2.0","compile":{"stdout":"","stderr":"err","output":"main.c:1: error","code":1,"signal":null},"run":{"stdout":"","stderr":"","output":"","code":null,"signal":null}}"#;
        let CompileResult::Finished(r) = interpret(200, body).unwrap() else {
            panic!("expected finished");
        };
        assert!(r.compile_failed);
        assert!(!r.succeeded());
        assert_eq!(r.compiler_info.as_deref(), Some("main.c:1: error"));
    }

    #[test]
    fn maps_compile_failure_without_run_stage() {
        let body = r#"{"language":"c","version":"10.2.0","compile":{"stdout":"","stderr":"main.c:1: error","output":"main.c:1: error","code":1,"signal":null}}"#;
        let CompileResult::Finished(r) = interpret(200, body).unwrap() else {
            panic!("expected finished");
        };
        assert!(r.compile_failed);
        assert!(!r.succeeded());
        assert_eq!(r.compiler_info.as_deref(), Some("main.c:1: error"));
        assert_eq!(r.stdout, "");
        assert_eq!(r.exit_code, None);
    }

    #[test]
    fn maps_errors() {
        assert_eq!(
            interpret(400, r#"{"message":"cobol-* runtime is unknown"}"#).unwrap(),
            CompileResult::Rejected {
                reason: "cobol-* runtime is unknown".to_string()
            }
        );
        assert!(matches!(
            interpret(429, "slow down"),
            Err(Error::Remote(RemoteError::RateLimited { .. }))
        ));
        assert!(matches!(
            interpret(502, "bad gateway"),
            Err(Error::Remote(RemoteError::Http { status: Some(502), .. }))
        ));
        assert!(matches!(interpret(200, "not json"), Err(Error::Json(_))));
    }
}
