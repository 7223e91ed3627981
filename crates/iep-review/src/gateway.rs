//! The seam between the workflow and the agent service.
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::BoxFuture;
use iep_common::agent::{AgentClient, AgentClientError, AgentFile, AgentKind, AgentReply};
use iep_common::response_log::{ResponseLog, ResponseLogEntry};
use tracing::{info, warn};

use crate::rate_limit::{RateLimiter, Throttled};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Agent(#[from] AgentClientError),

    #[error("rate limited: {0}")]
    RateLimited(#[from] Throttled),
}

/// One logical agent call.
#[derive(Debug, Clone)]
pub struct AgentCall<'a> {
    pub kind: AgentKind,
    pub document_id: &'a str,
    pub message: String,
    /// The uploaded PDF, when the call should carry it.
    pub file: Option<&'a AgentFile>,
}

pub trait AgentGateway: Send + Sync {
    fn invoke<'a>(&'a self, call: AgentCall<'a>) -> BoxFuture<'a, Result<AgentReply, GatewayError>>;
}

/// Gateway backed by the real agent client. Every exchange is appended to the response log.
pub struct AgentService {
    client: AgentClient,
    log: Arc<ResponseLog>,
    limiter: Option<RateLimiter>,
}

impl AgentService {
    pub fn new(client: AgentClient, log: Arc<ResponseLog>, limiter: Option<RateLimiter>) -> Self {
        Self {
            client,
            log,
            limiter,
        }
    }

    async fn call(&self, call: AgentCall<'_>) -> Result<AgentReply, GatewayError> {
        if let Some(limiter) = &self.limiter {
            match limiter.acquire().await {
                Ok(waited) if !waited.is_zero() => info!(
                    document_id = %call.document_id,
                    stage = %call.kind,
                    waited_ms = waited.as_millis() as u64,
                    "agent call held back by rate limit"
                ),
                Ok(_) => {}
                Err(throttled) => {
                    warn!(
                        document_id = %call.document_id,
                        stage = %call.kind,
                        retry_after_ms = throttled.retry_after.as_millis() as u64,
                        "agent call refused by rate limit"
                    );
                    return Err(throttled.into());
                }
            }
        }

        let config = self.client.config();
        let timeout = if call.file.is_some() {
            config.upload_timeout
        } else {
            config.default_timeout
        };
        let files = call.file.map(|f| vec![f.clone()]);
        let request = self
            .client
            .request(call.kind, call.document_id, call.message, files);

        let started = Instant::now();
        let result = self.client.chat(&request, timeout).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let entry = ResponseLogEntry {
            timestamp: Utc::now(),
            document_id: call.document_id.to_string(),
            agent: call.kind.to_string(),
            agent_id: request.agent_id.clone(),
            session_id: request.session_id.clone(),
            ok: result.is_ok(),
            response: result.as_ref().ok().map(|reply| reply.raw.clone()),
            error: result.as_ref().err().map(ToString::to_string),
        };
        if let Err(e) = self.log.append(&entry).await {
            warn!(error = %e, path = %self.log.path().display(), "failed to append agent response log");
        }

        match &result {
            Ok(_) => info!(
                document_id = %call.document_id,
                stage = %call.kind,
                agent_id = %request.agent_id,
                duration_ms,
                "agent call completed"
            ),
            Err(e) => warn!(
                document_id = %call.document_id,
                stage = %call.kind,
                agent_id = %request.agent_id,
                duration_ms,
                error = %e,
                "agent call failed"
            ),
        }
        Ok(result?)
    }
}

impl AgentGateway for AgentService {
    fn invoke<'a>(&'a self, call: AgentCall<'a>) -> BoxFuture<'a, Result<AgentReply, GatewayError>> {
        Box::pin(self.call(call))
    }
}
