//! Process-wide configuration, loaded entirely from the environment
//! (spec.md §6, "Configuration"). Every field has a typed default so a
//! bare `agentcore-server` with no environment still boots against a
//! local sqlite file and a throwaway sandbox directory.

use std::time::Duration;

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "yes"))
        .unwrap_or(default)
}

/// External auth collaborator's settings — the core only passes these
/// through, it never verifies a token itself (spec.md §1 Non-goals).
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub secret_key: String,
    pub token_algorithm: String,
    pub token_ttl_min: u64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub auth: AuthConfig,
    pub database_url: String,
    pub sandbox_base_dir: String,
    pub max_sandbox_size_mb: u64,
    pub max_file_size_mb: u64,
    pub enable_agent_loop: bool,
    pub enable_streaming_reasoning: bool,
    pub tool_execution_timeout: Duration,
    pub max_tool_calls_per_message: u32,
    pub max_user_input_length: usize,
    pub max_history_messages: usize,
    pub enable_message_truncation: bool,
    pub truncation_warning_message: String,
    pub provider_base_url: String,
    pub provider_api_key: String,
    pub reasoning_model: String,
    pub non_reasoning_model: String,
    pub sse_heartbeat: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        let auth = AuthConfig {
            secret_key: env_string("SECRET_KEY", "dev-secret-change-me"),
            token_algorithm: env_string("TOKEN_ALGORITHM", "HS256"),
            token_ttl_min: env_parse("TOKEN_TTL_MIN", 60),
        };

        Self {
            bind_addr: env_string("BIND_ADDR", "0.0.0.0:8080"),
            auth,
            database_url: env_string("DATABASE_URL", "agentcore.sqlite3"),
            sandbox_base_dir: env_string("SANDBOX_BASE_DIR", "./sandboxes"),
            max_sandbox_size_mb: env_parse("MAX_SANDBOX_SIZE_MB", 50),
            max_file_size_mb: env_parse("MAX_FILE_SIZE_MB", 5),
            enable_agent_loop: env_bool("ENABLE_AGENT_LOOP", true),
            enable_streaming_reasoning: env_bool("ENABLE_STREAMING_REASONING", true),
            tool_execution_timeout: Duration::from_secs(env_parse("TOOL_EXECUTION_TIMEOUT_SECS", 30)),
            max_tool_calls_per_message: env_parse("MAX_TOOL_CALLS_PER_MESSAGE", 16),
            max_user_input_length: env_parse("MAX_USER_INPUT_LENGTH", 8000),
            max_history_messages: env_parse("MAX_HISTORY_MESSAGES", 20),
            enable_message_truncation: env_bool("ENABLE_MESSAGE_TRUNCATION", true),
            truncation_warning_message: env_string(
                "TRUNCATION_WARNING_MESSAGE",
                "[earlier conversation truncated]",
            ),
            provider_base_url: env_string("PROVIDER_BASE_URL", "http://localhost:11434/v1"),
            provider_api_key: env_string("PROVIDER_API_KEY", ""),
            reasoning_model: env_string("REASONING_MODEL", "reasoning-model"),
            non_reasoning_model: env_string("NON_REASONING_MODEL", "default-model"),
            sse_heartbeat: Duration::from_secs(env_parse("SSE_HEARTBEAT_SECS", 15)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane_with_no_environment() {
        // Exercises the parse-or-default path without touching real env vars.
        let config = Config {
            bind_addr: env_string("AGENTCORE_TEST_UNSET_BIND", "0.0.0.0:8080"),
            auth: AuthConfig {
                secret_key: env_string("AGENTCORE_TEST_UNSET_SECRET", "dev-secret-change-me"),
                token_algorithm: env_string("AGENTCORE_TEST_UNSET_ALG", "HS256"),
                token_ttl_min: env_parse("AGENTCORE_TEST_UNSET_TTL", 60),
            },
            database_url: env_string("AGENTCORE_TEST_UNSET_DB", "agentcore.sqlite3"),
            sandbox_base_dir: env_string("AGENTCORE_TEST_UNSET_SANDBOX", "./sandboxes"),
            max_sandbox_size_mb: 50,
            max_file_size_mb: 5,
            enable_agent_loop: true,
            enable_streaming_reasoning: true,
            tool_execution_timeout: Duration::from_secs(30),
            max_tool_calls_per_message: 16,
            max_user_input_length: 8000,
            max_history_messages: 20,
            enable_message_truncation: true,
            truncation_warning_message: "[earlier conversation truncated]".to_string(),
            provider_base_url: "http://localhost:11434/v1".to_string(),
            provider_api_key: String::new(),
            reasoning_model: "reasoning-model".to_string(),
            non_reasoning_model: "default-model".to_string(),
            sse_heartbeat: Duration::from_secs(15),
        };
        assert!(config.enable_agent_loop);
        assert_eq!(config.max_history_messages, 20);
    }
}
