use std::path::PathBuf;
use std::time::Duration;

use iep_common::agent::{AgentClientConfig, AgentIds, DEFAULT_BASE_URL};
use iep_common::response_log::DEFAULT_LOG_PATH;

use crate::error::AppError;
use crate::orchestrator::{OrchestrationMode, WorkflowOptions};

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
pub const DEFAULT_RATE_LIMIT_MAX_WAIT: Duration = Duration::from_millis(1_000);

/// Service configuration, resolved once at startup and passed down explicitly.
#[derive(Debug, Clone)]
pub struct Config {
    pub agent: AgentClientConfig,
    pub workflow: WorkflowOptions,
    pub response_log_path: PathBuf,
    /// `None` keeps documents in memory only.
    pub redis_url: Option<String>,
    /// `None` disables outbound rate limiting.
    pub rate_limit_rps: Option<u32>,
    /// Longest a call may be held back for a rate-limit slot before it is refused.
    pub rate_limit_max_wait: Duration,
    pub bind_addr: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `AGENT_API_KEY`: key sent as `x-api-key`
    /// - `AGENT_ID_SCORING`: scoring agent id, also used for any stage without its own id
    ///
    /// Everything else is optional; see `from_lookup`.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &str| {
            var(key).ok_or_else(|| {
                AppError::Config(format!("{key} environment variable is required"))
            })
        };

        let api_key = required("AGENT_API_KEY")?;
        let scoring = required("AGENT_ID_SCORING")?;
        let agent_ids = AgentIds {
            intake: var("AGENT_ID_INTAKE").unwrap_or_else(|| scoring.clone()),
            redaction: var("AGENT_ID_REDACTION").unwrap_or_else(|| scoring.clone()),
            feedback: var("AGENT_ID_FEEDBACK").unwrap_or_else(|| scoring.clone()),
            scoring,
        };

        let base_url = var("AGENT_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let mut agent = AgentClientConfig::new(&base_url, api_key, agent_ids);
        if let Some(path) = var("AGENT_CHAT_PATH") {
            agent.chat_path = path;
        }
        if let Some(user_id) = var("AGENT_USER_ID") {
            agent.user_id = user_id;
        }
        if let Some(secs) = parse_num::<u64>(&var, "AGENT_TIMEOUT_SECS")? {
            agent.default_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_num::<u64>(&var, "AGENT_UPLOAD_TIMEOUT_SECS")? {
            agent.upload_timeout = Duration::from_secs(secs);
        }
        if let Some(n) = parse_num::<u32>(&var, "AGENT_MAX_RETRIES")? {
            agent.max_retries = n;
        }
        if let Some(ms) = parse_num::<u64>(&var, "AGENT_RETRY_INITIAL_MS")? {
            agent.initial_backoff = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_num::<u64>(&var, "AGENT_RETRY_MAX_MS")? {
            agent.max_backoff = Duration::from_millis(ms);
        }
        if let Some(n) = parse_num::<usize>(&var, "AGENT_MAX_ERROR_BODY_BYTES")? {
            agent.max_error_body_bytes = n;
        }

        let mut workflow = WorkflowOptions::default();
        if let Some(mode) = var("ORCHESTRATION_MODE") {
            workflow.mode = mode.parse::<OrchestrationMode>().map_err(AppError::Config)?;
        }
        if let Some(flag) = parse_flag(&var, "AGENT_FALLBACKS")? {
            workflow.fallbacks = flag;
        }
        if let Some(flag) = parse_flag(&var, "SAMPLE_RUBRIC_FALLBACK")? {
            workflow.sample_rubric_fallback = flag;
        }

        let rate_limit_rps = parse_num::<u32>(&var, "RATE_LIMIT_RPS")?.filter(|&n| n > 0);
        let rate_limit_max_wait = parse_num::<u64>(&var, "RATE_LIMIT_MAX_WAIT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_RATE_LIMIT_MAX_WAIT);

        Ok(Self {
            agent,
            workflow,
            response_log_path: var("AGENT_RESPONSE_LOG")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_PATH)),
            redis_url: var("REDIS_URL"),
            rate_limit_rps,
            rate_limit_max_wait,
            bind_addr: var("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
        })
    }
}

fn parse_num<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, AppError> {
    var(key)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|_| AppError::Config(format!("{key} must be a non-negative integer, got {raw:?}")))
        })
        .transpose()
}

fn parse_flag(var: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<bool>, AppError> {
    var(key)
        .map(|raw| match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(AppError::Config(format!("{key} must be true or false, got {raw:?}"))),
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn requires_key_and_scoring_agent() {
        let err = Config::from_lookup(lookup(&[("AGENT_ID_SCORING", "s")])).unwrap_err();
        assert!(err.to_string().contains("AGENT_API_KEY"));

        let err = Config::from_lookup(lookup(&[("AGENT_API_KEY", "k"), ("AGENT_ID_SCORING", " ")]))
            .unwrap_err();
        assert!(err.to_string().contains("AGENT_ID_SCORING"));
    }

    #[test]
    fn defaults_apply() {
        let config =
            Config::from_lookup(lookup(&[("AGENT_API_KEY", "k"), ("AGENT_ID_SCORING", "score")]))
                .unwrap();
        assert_eq!(config.agent.agent_ids, AgentIds::collapsed("score"));
        assert_eq!(config.agent.chat_url(), "https://agent-prod.studio.lyzr.ai/v3/inference/chat/");
        assert_eq!(config.agent.default_timeout, Duration::from_secs(60));
        assert_eq!(config.agent.upload_timeout, Duration::from_secs(180));
        assert_eq!(config.agent.max_retries, 0);
        assert_eq!(config.workflow.mode, OrchestrationMode::FourStage);
        assert!(config.workflow.fallbacks);
        assert!(config.workflow.sample_rubric_fallback);
        assert_eq!(config.response_log_path, PathBuf::from(DEFAULT_LOG_PATH));
        assert_eq!(config.redis_url, None);
        assert_eq!(config.rate_limit_rps, None);
        assert_eq!(config.rate_limit_max_wait, DEFAULT_RATE_LIMIT_MAX_WAIT);
        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR);
    }

    #[test]
    fn overrides_apply() {
        let config = Config::from_lookup(lookup(&[
            ("AGENT_API_KEY", "k"),
            ("AGENT_ID_SCORING", "score"),
            ("AGENT_ID_INTAKE", "intake"),
            ("AGENT_TIMEOUT_SECS", "5"),
            ("ORCHESTRATION_MODE", "single"),
            ("AGENT_FALLBACKS", "false"),
            ("RATE_LIMIT_RPS", "0"),
            ("RATE_LIMIT_MAX_WAIT_MS", "250"),
            ("REDIS_URL", "redis://127.0.0.1:6379"),
        ]))
        .unwrap();
        assert_eq!(config.agent.agent_ids.intake, "intake");
        assert_eq!(config.agent.agent_ids.redaction, "score");
        assert_eq!(config.agent.default_timeout, Duration::from_secs(5));
        assert_eq!(config.workflow.mode, OrchestrationMode::Single);
        assert!(!config.workflow.fallbacks);
        assert_eq!(config.rate_limit_rps, None);
        assert_eq!(config.rate_limit_max_wait, Duration::from_millis(250));
        assert_eq!(config.redis_url.as_deref(), Some("redis://127.0.0.1:6379"));
    }

    #[test]
    fn rejects_malformed_values() {
        let base = [("AGENT_API_KEY", "k"), ("AGENT_ID_SCORING", "s")];
        let mut pairs = base.to_vec();
        pairs.push(("AGENT_TIMEOUT_SECS", "soon"));
        assert!(Config::from_lookup(lookup(&pairs)).is_err());

        let mut pairs = base.to_vec();
        pairs.push(("ORCHESTRATION_MODE", "parallel"));
        assert!(Config::from_lookup(lookup(&pairs)).is_err());

        let mut pairs = base.to_vec();
        pairs.push(("AGENT_FALLBACKS", "maybe"));
        assert!(Config::from_lookup(lookup(&pairs)).is_err());

        let mut pairs = base.to_vec();
        pairs.push(("RATE_LIMIT_MAX_WAIT_MS", "-5"));
        assert!(Config::from_lookup(lookup(&pairs)).is_err());
    }
}
