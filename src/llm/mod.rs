//! LLM 层：规划器后端的客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）

pub mod deepseek;
pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;
use std::time::Duration;

pub use deepseek::{create_deepseek_client, DEEPSEEK_CHAT};
pub use mock::{MockLlmClient, ScriptedLlmClient};
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{LlmClient, LlmError};

use crate::config::LlmSection;
use crate::core::AgentError;

pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

/// 按 [llm] 配置创建规划器后端；provider 为 mock 时不需要 API Key，其余缺少 Key 即为配置错误
pub fn create_llm_from_config(cfg: &LlmSection) -> Result<Arc<dyn LlmClient>, AgentError> {
    let provider = cfg.provider.to_lowercase();
    if provider == "mock" {
        return Ok(Arc::new(MockLlmClient));
    }

    let key_var = cfg.api_key_var();
    let api_key = std::env::var(&key_var)
        .ok()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| {
            AgentError::ConfigError(format!(
                "environment variable {key_var} is not set (required by llm.provider = \"{}\")",
                cfg.provider
            ))
        })?;
    let timeout = Duration::from_secs(cfg.request_timeout_secs);

    let client = match provider.as_str() {
        "deepseek" => create_deepseek_client(cfg.base_url.as_deref(), cfg.model.as_deref(), &api_key),
        "openai" => OpenAiClient::new(
            cfg.base_url.as_deref(),
            cfg.model.as_deref().unwrap_or(DEFAULT_OPENAI_MODEL),
            &api_key,
        ),
        other => {
            return Err(AgentError::ConfigError(format!(
                "unknown llm.provider '{other}' (expected openai, deepseek or mock)"
            )))
        }
    };
    tracing::info!(provider = %provider, model = %client.model(), "planner backend ready");
    Ok(Arc::new(client.with_timeout(timeout)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_provider_needs_no_key() {
        let cfg = LlmSection {
            provider: "mock".to_string(),
            ..LlmSection::default()
        };
        assert!(create_llm_from_config(&cfg).is_ok());
    }

    #[test]
    fn test_missing_key_is_config_error() {
        let cfg = LlmSection {
            provider: "openai".to_string(),
            api_key_env: Some("WREN_TEST_KEY_THAT_IS_NEVER_SET".to_string()),
            ..LlmSection::default()
        };
        let err = create_llm_from_config(&cfg).err().unwrap();
        assert!(err.to_string().contains("WREN_TEST_KEY_THAT_IS_NEVER_SET"));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        std::env::set_var("WREN_TEST_KEY_FOR_UNKNOWN_PROVIDER", "sk-test");
        let cfg = LlmSection {
            provider: "carrier-pigeon".to_string(),
            api_key_env: Some("WREN_TEST_KEY_FOR_UNKNOWN_PROVIDER".to_string()),
            ..LlmSection::default()
        };
        assert!(matches!(create_llm_from_config(&cfg), Err(AgentError::ConfigError(_))));
    }
}
