//! `actions.cmd.webhook`: post the current message to an HTTP endpoint.
//!
//! Parameters: `url` (required, templated), `method` (default `POST`),
//! `headers` (JSON object of strings), `timeout_secs` (default 30).
//! A non-2xx answer becomes a failure output, which fails the task.

use async_trait::async_trait;
use cellar_core::{CellarError, Result};
use cellar_jobs::{Action, ActionMessage, ActionOutput, Job};
use cellar_scheduler::{ActionEnv, ConcreteAction, RunContext};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::template::{Vars, render};

pub const ID: &str = "actions.cmd.webhook";

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_BODY: usize = 5000;

/// Body sent to the endpoint.
#[derive(Debug, Serialize)]
struct Payload<'a> {
    job_id: &'a str,
    task_id: &'a str,
    nodes: &'a [cellar_core::Node],
    users: &'a [cellar_core::User],
    #[serde(skip_serializing_if = "Option::is_none")]
    last_output: Option<&'a ActionOutput>,
}

pub struct WebhookAction {
    client: reqwest::Client,
    url: String,
    method: reqwest::Method,
    headers: BTreeMap<String, String>,
    timeout: Duration,
}

impl Default for WebhookAction {
    fn default() -> Self {
        Self {
            client: reqwest::Client::new(),
            url: String::new(),
            method: reqwest::Method::POST,
            headers: BTreeMap::new(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

fn parse_method(raw: &str) -> Result<reqwest::Method> {
    match raw.to_uppercase().as_str() {
        "GET" => Ok(reqwest::Method::GET),
        "POST" => Ok(reqwest::Method::POST),
        "PUT" => Ok(reqwest::Method::PUT),
        "PATCH" => Ok(reqwest::Method::PATCH),
        "DELETE" => Ok(reqwest::Method::DELETE),
        other => Err(CellarError::bad_request(format!("{ID}: unsupported method {other}"))),
    }
}

#[async_trait]
impl ConcreteAction for WebhookAction {
    fn name(&self) -> &str {
        ID
    }

    fn init(&mut self, _env: &ActionEnv, _job: &Job, action: &Action) -> Result<()> {
        self.url = crate::required(action, "url")?.to_string();
        if let Some(method) = action.param("method") {
            self.method = parse_method(method)?;
        }
        if let Some(raw) = action.param("headers") {
            self.headers = serde_json::from_str(raw)
                .map_err(|e| CellarError::bad_request(format!("{ID}: headers: {e}")))?;
        }
        self.timeout = Duration::from_secs(crate::number(action, "timeout_secs", DEFAULT_TIMEOUT_SECS)?);
        Ok(())
    }

    async fn run(&self, ctx: &RunContext, input: &ActionMessage) -> Result<ActionMessage> {
        let job_id = ctx.job().id.as_str();
        let url = render(
            &self.url,
            &Vars {
                job_id,
                task_id: ctx.task_id(),
                input,
            },
        );
        let payload = Payload {
            job_id,
            task_id: ctx.task_id(),
            nodes: &input.nodes,
            users: &input.users,
            last_output: input.last_output(),
        };

        let mut request = self
            .client
            .request(self.method.clone(), &url)
            .header("Content-Type", "application/json")
            .timeout(ctx.bounded(self.timeout));
        for (key, value) in &self.headers {
            request = request.header(key.as_str(), value.as_str());
        }
        if self.method != reqwest::Method::GET {
            request = request.json(&payload);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("🌐 Webhook {url} failed: {e}");
                return Ok(input.clone().with_error(&format!("webhook {url}: {e}")));
            }
        };
        let status = response.status();
        let mut body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!("🌐 Webhook {url} answered {status} with an unreadable body: {e}");
                return Ok(input.clone().with_error(&format!("webhook {url}: HTTP {status}: reading body: {e}")));
            }
        };
        truncate(&mut body, MAX_BODY);

        if !status.is_success() {
            tracing::warn!("🌐 Webhook {url} answered {status}");
            return Ok(input.clone().with_error(&format!("webhook {url}: HTTP {status}: {body}")));
        }
        tracing::debug!("🌐 Webhook {} {url} → {status}", self.method);
        Ok(input.clone().with_output(ActionOutput::success().with_string(body)))
    }
}

/// Cut `s` to at most `max` bytes on a char boundary.
pub(crate) fn truncate(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
    s.push_str("...[truncated]");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context, env};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// One-shot HTTP server answering `status` and returning the raw request.
    async fn serve_once(status: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        serve_raw(format!("HTTP/1.1 {status}\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok")).await
    }

    /// One-shot HTTP server writing `reply` verbatim, then closing.
    async fn serve_raw(reply: String) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 16 * 1024];
            let mut request = Vec::new();
            loop {
                let n = sock.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(split) = text.find("\r\n\r\n") {
                    let length = text
                        .lines()
                        .find_map(|l| l.to_ascii_lowercase().strip_prefix("content-length:").map(|v| v.trim().to_string()))
                        .and_then(|v| v.parse::<usize>().ok())
                        .unwrap_or(0);
                    if request.len() >= split + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            sock.write_all(reply.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&request).to_string()
        });
        (format!("http://{addr}"), handle)
    }

    #[test]
    fn test_init_requires_url() {
        let err = WebhookAction::default()
            .init(&env(), &Job::new("j", "J"), &Action::new(ID))
            .unwrap_err();
        assert_eq!(err.code(), 400);
    }

    #[test]
    fn test_init_rejects_bad_headers() {
        let action = Action::new(ID)
            .with_param("url", "http://localhost")
            .with_param("headers", "not json");
        assert!(WebhookAction::default().init(&env(), &Job::new("j", "J"), &action).is_err());
    }

    #[tokio::test]
    async fn test_webhook_posts_payload() {
        let (url, server) = serve_once("200 OK").await;
        let env = env();
        let job = Job::new("hooked", "Hooked");
        let action = Action::new(ID)
            .with_param("url", &format!("{url}/notify/{{{{job.id}}}}"))
            .with_param("headers", r#"{"x-cellar":"yes"}"#);
        let mut hook = WebhookAction::default();
        hook.init(&env, &job, &action).unwrap();

        let ctx = context(&env, job, None);
        let input = ActionMessage::default().with_node(cellar_core::Node::from_path("/in/a.txt"));
        let out = hook.run(&ctx, &input).await.unwrap();
        assert!(out.last_output().unwrap().success);

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /notify/hooked"));
        assert!(request.to_ascii_lowercase().contains("x-cellar: yes"));
        assert!(request.contains("\"job_id\":\"hooked\""));
        assert!(request.contains("/in/a.txt"));
    }

    #[tokio::test]
    async fn test_webhook_error_status_is_failure_output() {
        let (url, server) = serve_once("500 Internal Server Error").await;
        let env = env();
        let job = Job::new("hooked", "Hooked");
        let mut hook = WebhookAction::default();
        hook.init(&env, &job, &Action::new(ID).with_param("url", &url)).unwrap();

        let ctx = context(&env, job, None);
        let out = hook.run(&ctx, &ActionMessage::default()).await.unwrap();
        let last = out.last_output().unwrap();
        assert!(!last.success);
        assert!(last.error_string.contains("500"));
        server.await.unwrap();
    }

    #[test]
    fn test_truncate_on_char_boundary() {
        let mut s = "héllo".to_string();
        truncate(&mut s, 2);
        assert_eq!(s, "h...[truncated]");
    }

    #[tokio::test]
    async fn test_webhook_truncated_body_is_failure_output() {
        let reply = "HTTP/1.1 200 OK\r\ncontent-length: 100\r\nconnection: close\r\n\r\npartial".to_string();
        let (url, server) = serve_raw(reply).await;
        let env = env();
        let job = Job::new("hooked", "Hooked");
        let mut hook = WebhookAction::default();
        hook.init(&env, &job, &Action::new(ID).with_param("url", &url)).unwrap();

        let ctx = context(&env, job, None);
        let out = hook.run(&ctx, &ActionMessage::default()).await.unwrap();
        let last = out.last_output().unwrap();
        assert!(!last.success);
        assert!(last.error_string.contains("reading body"));
        server.await.unwrap();
    }
}
