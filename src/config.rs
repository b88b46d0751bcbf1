//! Environment configuration

use crate::chat::SurfaceId;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_QUESTION_CHANNEL: &str = "questions";
pub const DEFAULT_CODE_LANGUAGE: &str = "lua";

/// Settings the conversation runtime needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowConfig {
    /// When set, `/ask` is only accepted in this channel
    pub ask_channel: Option<SurfaceId>,
    /// Parent of scratch surfaces and posted question threads
    pub question_channel: SurfaceId,
    pub reply_timeout: Duration,
    /// Fence language applied to stored codeblocks
    pub code_language: String,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            ask_channel: None,
            question_channel: SurfaceId::new(DEFAULT_QUESTION_CHANNEL),
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            code_language: DEFAULT_CODE_LANGUAGE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub db_path: PathBuf,
    pub flow: FlowConfig,
}

impl Config {
    /// Load from `QB_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Malformed or empty values fall back to defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let db_path = get("QB_DB_PATH").map_or_else(
            || {
                let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home)
                    .join(".question-builder")
                    .join("questions.db")
            },
            PathBuf::from,
        );

        let reply_timeout = get("QB_REPLY_TIMEOUT_SECS")
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map_or(DEFAULT_REPLY_TIMEOUT, Duration::from_secs);

        let flow = FlowConfig {
            ask_channel: get("QB_ASK_CHANNEL").map(SurfaceId::new),
            question_channel: get("QB_QUESTION_CHANNEL")
                .map_or_else(|| SurfaceId::new(DEFAULT_QUESTION_CHANNEL), SurfaceId::new),
            reply_timeout,
            code_language: get("QB_CODE_LANGUAGE")
                .unwrap_or_else(|| DEFAULT_CODE_LANGUAGE.to_string()),
        };

        Self { db_path, flow }
    }
}
