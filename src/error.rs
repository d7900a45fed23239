//! Upstream failures the pipeline absorbs.
//!
//! None of these cross the `/ask` boundary: the orchestrator logs them and
//! answers with [`APOLOGY`](crate::models::APOLOGY) instead.

use thiserror::Error;

/// Pipeline stage that issued a language-model or index call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Intent,
    Resolve,
    Retrieve,
    Ground,
    Synthesize,
    Chat,
    Sync,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Intent => "intent",
            Stage::Resolve => "resolve",
            Stage::Retrieve => "retrieve",
            Stage::Ground => "ground",
            Stage::Synthesize => "synthesize",
            Stage::Chat => "chat",
            Stage::Sync => "sync",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("{stage} call timed out after {secs}s")]
    Timeout { stage: Stage, secs: u64 },

    #[error("{stage} model call failed: {source}")]
    Model {
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },

    #[error("vault index {stage} failed: {source}")]
    Index {
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },
}

pub type AssistantResult<T> = std::result::Result<T, AssistantError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_stage() {
        let e = AssistantError::Timeout {
            stage: Stage::Ground,
            secs: 60,
        };
        assert_eq!(e.to_string(), "ground call timed out after 60s");

        let e = AssistantError::Model {
            stage: Stage::Synthesize,
            source: anyhow::anyhow!("connection refused"),
        };
        assert_eq!(e.to_string(), "synthesize model call failed: connection refused");

        let e = AssistantError::Index {
            stage: Stage::Sync,
            source: anyhow::anyhow!("permission denied"),
        };
        assert_eq!(e.to_string(), "vault index sync failed: permission denied");
    }
}
