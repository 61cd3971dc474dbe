// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime configuration, sourced from CLI flags or environment variables.

/// Configuration for a `coop-message` runtime: one `MessageConnection`'s
/// tunables, plus the pub/sub and WebSocket server knobs needed to stand up
/// the demonstration binary.
#[derive(Debug, Clone, clap::Args)]
pub struct MessageConfig {
    /// Per-read deadline on a conversation's response queue, in milliseconds.
    #[arg(long, default_value_t = 5000, env = "COOP_MESSAGE_RESPONSE_TIMEOUT_MS")]
    pub response_timeout_ms: u64,

    /// NATS server URL for the pub/sub transport.
    #[arg(long, env = "COOP_MESSAGE_NATS_URL")]
    pub nats_url: Option<String>,

    /// Comma-separated NATS subjects to subscribe to.
    #[arg(long, value_delimiter = ',', env = "COOP_MESSAGE_NATS_SUBJECTS")]
    pub nats_subjects: Vec<String>,

    /// Maximum NATS connect attempts before giving up (`-1` = forever).
    #[arg(long, default_value_t = 1, env = "COOP_MESSAGE_NATS_MAX_CONNECT_ATTEMPTS")]
    pub nats_max_connect_attempts: i32,

    /// Delay between NATS connect attempts, in milliseconds.
    #[arg(long, default_value_t = 2000, env = "COOP_MESSAGE_NATS_CONNECT_WAIT_MS")]
    pub nats_connect_wait_ms: u64,

    /// Shared secret used to sign and verify messages. Signing is disabled
    /// if unset.
    #[arg(long, env = "COOP_MESSAGE_SIGN_SALT")]
    pub sign_salt: Option<String>,

    /// Comma-separated set of upgrade paths the WebSocket server accepts.
    #[arg(long, value_delimiter = ',', default_value = "/", env = "COOP_MESSAGE_WS_ALLOWED_PATHS")]
    pub ws_allowed_paths: Vec<String>,

    /// Log level, falls back to `RUST_LOG` and then `info`.
    #[arg(long, env = "COOP_MESSAGE_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// `json` for structured output, anything else for the default
    /// human-readable formatter.
    #[arg(long, default_value = "text", env = "COOP_MESSAGE_LOG_FORMAT")]
    pub log_format: String,
}

impl Default for MessageConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: 5000,
            nats_url: None,
            nats_subjects: Vec::new(),
            nats_max_connect_attempts: 1,
            nats_connect_wait_ms: 2000,
            sign_salt: None,
            ws_allowed_paths: vec!["/".to_owned()],
            log_level: None,
            log_format: "text".to_owned(),
        }
    }
}

impl MessageConfig {
    pub fn response_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.response_timeout_ms)
    }

    pub fn nats_connect_wait(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.nats_connect_wait_ms)
    }

    pub fn sign_salt_str(&self) -> &str {
        self.sign_salt.as_deref().unwrap_or("")
    }
}
