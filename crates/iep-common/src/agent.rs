//! HTTP client for the hosted agent service.
//!
//! Every logical agent (intake, redaction, scoring, feedback) is the same endpoint with a
//! different `agent_id` and prompt. One call is one POST; the reply is an opaque JSON object
//! whose primary text lives under `response` or `message`.
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::ids;

pub const DEFAULT_BASE_URL: &str = "https://agent-prod.studio.lyzr.ai";
pub const DEFAULT_CHAT_PATH: &str = "/v3/inference/chat/";

/// The four logical agents of the review pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Intake,
    Redaction,
    Scoring,
    Feedback,
}

impl AgentKind {
    pub const ALL: [AgentKind; 4] = [
        AgentKind::Intake,
        AgentKind::Redaction,
        AgentKind::Scoring,
        AgentKind::Feedback,
    ];

    /// Human-readable stage name, also used as the processing step name.
    pub fn label(self) -> &'static str {
        match self {
            AgentKind::Intake => "IEP Intake",
            AgentKind::Redaction => "Redaction & QA",
            AgentKind::Scoring => "Rubric Scoring",
            AgentKind::Feedback => "Feedback & Routing",
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentKind::Intake => "intake",
            AgentKind::Redaction => "redaction",
            AgentKind::Scoring => "scoring",
            AgentKind::Feedback => "feedback",
        };
        f.write_str(s)
    }
}

/// Remote agent identifiers, one per logical agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentIds {
    pub intake: String,
    pub redaction: String,
    pub scoring: String,
    pub feedback: String,
}

impl AgentIds {
    /// All four logical agents routed to the scoring agent.
    pub fn collapsed(scoring: impl Into<String>) -> Self {
        let scoring = scoring.into();
        Self {
            intake: scoring.clone(),
            redaction: scoring.clone(),
            feedback: scoring.clone(),
            scoring,
        }
    }

    pub fn get(&self, kind: AgentKind) -> &str {
        match kind {
            AgentKind::Intake => &self.intake,
            AgentKind::Redaction => &self.redaction,
            AgentKind::Scoring => &self.scoring,
            AgentKind::Feedback => &self.feedback,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AgentClientConfig {
    pub base_url: String,
    pub chat_path: String,
    pub api_key: String,
    pub user_id: String,
    pub agent_ids: AgentIds,
    /// Timeout for prompt-only calls.
    pub default_timeout: Duration,
    /// Timeout for calls that carry the PDF as a base64 attachment.
    pub upload_timeout: Duration,
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_error_body_bytes: usize,
}

impl AgentClientConfig {
    /// Config with the service defaults: 60s/180s timeouts, no retries.
    pub fn new(base_url: &str, api_key: impl Into<String>, agent_ids: AgentIds) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            chat_path: DEFAULT_CHAT_PATH.to_string(),
            api_key: api_key.into(),
            user_id: "iep-review".to_string(),
            agent_ids,
            default_timeout: Duration::from_secs(60),
            upload_timeout: Duration::from_secs(180),
            max_retries: 0,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_millis(5_000),
            max_error_body_bytes: 8 * 1024,
        }
    }

    pub fn chat_url(&self) -> String {
        let path = if self.chat_path.starts_with('/') {
            self.chat_path.clone()
        } else {
            format!("/{}", self.chat_path)
        };
        format!("{}{}", self.base_url, path)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AgentClientError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("agent call aborted after {}ms timeout", .0.as_millis())]
    Timeout(Duration),

    #[error("invalid response JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("agent returned error: status={status} body={body}")]
    Upstream { status: StatusCode, body: String },
}

impl AgentClientError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, AgentClientError::Timeout(_))
    }
}

/// A PDF forwarded to the agent, base64-encoded once per workflow.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AgentFile {
    pub name: String,
    pub mime_type: String,
    pub data: String,
}

impl AgentFile {
    pub fn encode(name: &str, mime_type: &str, bytes: &[u8]) -> Self {
        Self {
            name: name.to_string(),
            mime_type: mime_type.to_string(),
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }
}

/// Wire body of one agent call.
#[derive(Debug, Clone, Serialize)]
pub struct AgentRequest {
    pub user_id: String,
    pub agent_id: String,
    pub session_id: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<AgentFile>>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AgentReply {
    /// Primary text payload (`response`, else `message`, else the whole payload).
    pub text: String,
    /// The reply exactly as decoded.
    pub raw: Value,
}

impl AgentReply {
    pub fn from_value(raw: Value) -> Self {
        Self {
            text: reply_text(&raw),
            raw,
        }
    }
}

/// Pick the primary text out of an agent reply.
pub fn reply_text(value: &Value) -> String {
    for key in ["response", "message"] {
        if let Some(text) = value.get(key).and_then(Value::as_str) {
            if !text.is_empty() {
                return text.to_string();
            }
        }
    }
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Clone)]
pub struct AgentClient {
    config: AgentClientConfig,
    http: reqwest::Client,
}

impl AgentClient {
    pub fn new(config: AgentClientConfig) -> Result<Self, AgentClientError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("iep-review/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &AgentClientConfig {
        &self.config
    }

    /// Build the wire body for one call with a fresh session id.
    pub fn request(
        &self,
        kind: AgentKind,
        document_id: &str,
        message: String,
        files: Option<Vec<AgentFile>>,
    ) -> AgentRequest {
        AgentRequest {
            user_id: self.config.user_id.clone(),
            agent_id: self.config.agent_ids.get(kind).to_string(),
            session_id: ids::session_id(document_id),
            message,
            files,
        }
    }

    /// POST one request, cancelling it once `timeout` elapses.
    pub async fn chat(
        &self,
        request: &AgentRequest,
        timeout: Duration,
    ) -> Result<AgentReply, AgentClientError> {
        let url = self.config.chat_url();
        let url = &url;
        let http = &self.http;
        let api_key = self.config.api_key.as_str();
        let max_error_body_bytes = self.config.max_error_body_bytes;

        self.request_with_retry(move || async move {
            let call = async {
                let resp = http
                    .post(url)
                    .header("x-api-key", api_key)
                    .json(request)
                    .send()
                    .await?;
                Self::parse_json_response(resp, max_error_body_bytes).await
            };
            let raw = match tokio::time::timeout(timeout, call).await {
                Ok(result) => result?,
                Err(_) => return Err(AgentClientError::Timeout(timeout)),
            };
            debug!(agent_id = %request.agent_id, session_id = %request.session_id, "agent reply received");
            Ok(AgentReply::from_value(raw))
        })
        .await
    }

    async fn parse_json_response(
        resp: reqwest::Response,
        max_error_body_bytes: usize,
    ) -> Result<Value, AgentClientError> {
        let status = resp.status();
        if status.is_success() {
            let body = resp.bytes().await?;
            return Ok(serde_json::from_slice(&body)?);
        }
        let body = read_limited_text(resp, max_error_body_bytes).await;
        Err(AgentClientError::Upstream { status, body })
    }

    async fn request_with_retry<T, Fut, F>(&self, mut f: F) -> Result<T, AgentClientError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, AgentClientError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match f().await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    if attempt > self.config.max_retries || !should_retry(&e) {
                        return Err(e);
                    }
                    let delay = backoff_delay(
                        self.config.initial_backoff,
                        self.config.max_backoff,
                        attempt - 1,
                    );
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "agent request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

fn should_retry(err: &AgentClientError) -> bool {
    match err {
        AgentClientError::Request(e) => e.is_timeout() || e.is_connect() || e.is_request(),
        AgentClientError::Timeout(_) => true,
        AgentClientError::Upstream { status, .. } => {
            *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
        }
        AgentClientError::InvalidJson(_) => false,
    }
}

fn backoff_delay(initial: Duration, max: Duration, exponent: u32) -> Duration {
    let mult = 1u128.checked_shl(exponent).unwrap_or(u128::MAX);
    let base_ms = initial.as_millis().saturating_mul(mult);
    let capped_ms = std::cmp::min(base_ms, max.as_millis()) as u64;
    let jitter_cap = std::cmp::max(1, capped_ms / 4);
    let jitter_ms = pseudo_jitter_ms(jitter_cap);
    Duration::from_millis(capped_ms.saturating_add(jitter_ms))
}

fn pseudo_jitter_ms(max_inclusive: u64) -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0));
    let nanos = now.subsec_nanos() as u64;
    nanos % (max_inclusive + 1)
}

async fn read_limited_text(resp: reqwest::Response, max_bytes: usize) -> String {
    match resp.bytes().await {
        Ok(mut b) => {
            if b.len() > max_bytes {
                b.truncate(max_bytes);
            }
            String::from_utf8_lossy(&b).to_string()
        }
        Err(e) => {
            warn!(error = %e, "failed to read agent error body");
            "<failed to read error body>".to_string()
        }
    }
}
