//! Continuation resolution.
//!
//! A follow-up such as "Why shouldn't you rush it?" is useless as a
//! retrieval query on its own. A [`QueryResolver`] turns it into a
//! self-contained query using the session's previous question or active
//! subject. Factual and casual questions pass through unchanged.

use async_trait::async_trait;

use crate::context::SessionContext;
use crate::error::Stage;
use crate::llm::{BoundedModel, GenerateOptions};
use crate::models::{Intent, ScoredChunk};
use crate::text;

/// The query actually sent to retrieval, plus what it is about.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedQuery {
    pub query: String,
    /// Content words the retrieved text should mention.
    pub subject_tokens: Vec<String>,
    /// Active subject to retry with when `subject_tokens` find nothing.
    pub fallback_subject: Option<String>,
}

impl ResolvedQuery {
    /// The question as-is.
    pub fn passthrough(question: &str, fallback_subject: Option<String>) -> Self {
        Self {
            query: question.to_string(),
            subject_tokens: text::subject_tokens(question),
            fallback_subject,
        }
    }

    /// True when at least one retrieved chunk mentions a subject token.
    pub fn is_anchored_in(&self, chunks: &[ScoredChunk]) -> bool {
        chunks
            .iter()
            .any(|c| text::mentions_any(&c.chunk, &self.subject_tokens))
    }

    /// Re-anchor on the fallback subject, if there is one: the subject is
    /// put in front of the query and becomes the subject tokens. Returns
    /// whether the query changed.
    pub fn fall_back(&mut self) -> bool {
        match self.fallback_subject.take() {
            Some(subject) => {
                self.subject_tokens = text::subject_tokens(&subject);
                self.query = format!("{} {}", subject, self.query);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
pub trait QueryResolver: Send + Sync {
    fn name(&self) -> &'static str;

    /// Resolve `question`. Never fails; on trouble the question itself is
    /// used.
    async fn resolve(&self, question: &str, intent: Intent, context: &SessionContext)
        -> ResolvedQuery;
}

// ============ Rewrite ============

/// Asks the language model to substitute pronouns with the previous
/// question's topic.
pub struct RewriteResolver {
    model: BoundedModel,
}

impl RewriteResolver {
    pub fn new(model: BoundedModel) -> Self {
        Self { model }
    }
}

pub(crate) fn rewrite_prompt(conversation: &str, previous: &str, question: &str) -> String {
    format!(
        r#"Resolve the pronouns in the current question using the previous question's topic.

RECENT CONVERSATION:
{conversation}

PREVIOUS QUESTION: {previous}
CURRENT QUESTION: {question}

TASK:
Replace pronouns (it, that, this, them) in the current question with the actual topic from the previous question.

Examples:
Previous: "What is caramelization?"
Current: "Why shouldn't you rush it?"
Output: "Why shouldn't you rush caramelization?"

Previous: "What is mycelium?"
Current: "Tell me more"
Output: "Tell me more about mycelium"

Previous: "What is Stoicism?"
Current: "Explain it again"
Output: "Explain Stoicism again"

Output ONLY the resolved question, nothing else.

Resolved question:"#
    )
}

/// Trim the reply and any wrapping quotes; reject anything too short to be
/// a question.
fn accept_rewrite(reply: &str) -> Option<String> {
    let trimmed = reply.trim().trim_matches('"').trim();
    let first_line = trimmed.lines().next().unwrap_or("").trim();
    if first_line.chars().count() > 3 {
        Some(first_line.to_string())
    } else {
        None
    }
}

#[async_trait]
impl QueryResolver for RewriteResolver {
    fn name(&self) -> &'static str {
        "rewrite"
    }

    async fn resolve(
        &self,
        question: &str,
        intent: Intent,
        context: &SessionContext,
    ) -> ResolvedQuery {
        let fallback = context.active_subject.clone();
        let previous = match (intent, context.previous_question()) {
            (Intent::Continuation, Some(previous)) => previous,
            _ => return ResolvedQuery::passthrough(question, fallback),
        };

        let reply = self
            .model
            .generate(
                Stage::Resolve,
                &rewrite_prompt(&context.summary(), previous, question),
                &GenerateOptions::greedy(20),
            )
            .await;

        match reply {
            Ok(text) => match accept_rewrite(&text) {
                Some(rewritten) => {
                    tracing::debug!(query = %rewritten, "continuation rewritten");
                    ResolvedQuery::passthrough(&rewritten, fallback)
                }
                None => ResolvedQuery::passthrough(question, fallback),
            },
            Err(e) => {
                tracing::warn!(error = %e, "rewrite failed, querying with the question as asked");
                ResolvedQuery::passthrough(question, fallback)
            }
        }
    }
}

// ============ Anchor ============

/// Queries with the question's own content words and keeps the active
/// subject as the fallback. Makes no model calls.
pub struct AnchorResolver;

#[async_trait]
impl QueryResolver for AnchorResolver {
    fn name(&self) -> &'static str {
        "anchor"
    }

    async fn resolve(
        &self,
        question: &str,
        intent: Intent,
        context: &SessionContext,
    ) -> ResolvedQuery {
        let fallback = context.active_subject.clone();
        if intent != Intent::Continuation {
            return ResolvedQuery::passthrough(question, fallback);
        }

        let tokens = text::subject_tokens(question);
        if tokens.is_empty() {
            // "Tell me more": nothing to anchor on but the subject and the
            // question that introduced it.
            if let Some(subject) = fallback.clone() {
                let previous = context.previous_question().unwrap_or_default();
                return ResolvedQuery {
                    subject_tokens: text::subject_tokens(&subject),
                    query: format!("{} {}", subject, previous).trim().to_string(),
                    fallback_subject: None,
                };
            }
            return ResolvedQuery::passthrough(question, None);
        }

        // Carry the subject along so keyword scoring can still match on it.
        let query = match &fallback {
            Some(subject) => format!("{} {}", tokens.join(" "), subject),
            None => tokens.join(" "),
        };
        ResolvedQuery {
            query,
            subject_tokens: tokens,
            fallback_subject: fallback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextStore;
    use crate::llm::LanguageModel;
    use anyhow::Result;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct Recording {
        reply: &'static str,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LanguageModel for Recording {
        fn model_name(&self) -> &str {
            "recording"
        }
        async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String> {
            assert_eq!(options.max_tokens, 20);
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self.reply.to_string())
        }
    }

    fn recording(reply: &'static str) -> Arc<Recording> {
        Arc::new(Recording {
            reply,
            prompts: Mutex::new(Vec::new()),
        })
    }

    async fn context_after(question: &str, subject: &str) -> SessionContext {
        let store = ContextStore::new(3, Duration::from_secs(60));
        let mut ctx = store.lock("t").await;
        ctx.add_turn(question, Some("answer"));
        ctx.set_active_subject(subject);
        ctx.clone()
    }

    #[test]
    fn test_accept_rewrite() {
        assert_eq!(
            accept_rewrite(" \"Why shouldn't you rush caramelization?\"\n"),
            Some("Why shouldn't you rush caramelization?".to_string())
        );
        assert_eq!(accept_rewrite(" ok "), None);
        assert_eq!(accept_rewrite(""), None);
    }

    #[tokio::test]
    async fn test_rewrite_uses_previous_question() {
        let model = recording("Why shouldn't you rush caramelization?");
        let resolver = RewriteResolver::new(BoundedModel::new(
            model.clone(),
            Duration::from_secs(1),
        ));
        let ctx = context_after("What is caramelization?", "caramelization").await;

        let resolved = resolver
            .resolve("Why shouldn't you rush it?", Intent::Continuation, &ctx)
            .await;
        assert_eq!(resolved.query, "Why shouldn't you rush caramelization?");
        assert_eq!(resolved.subject_tokens, vec!["rush", "caramelization"]);
        assert_eq!(resolved.fallback_subject.as_deref(), Some("caramelization"));

        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[0].contains("PREVIOUS QUESTION: What is caramelization?"));
        assert!(prompts[0].contains("CURRENT QUESTION: Why shouldn't you rush it?"));
        assert!(prompts[0].contains("RECENT CONVERSATION:\nQ1: What is caramelization?\nA1: answer..."));
    }

    #[tokio::test]
    async fn test_rewrite_skips_model_for_factual() {
        let model = recording("unused");
        let resolver = RewriteResolver::new(BoundedModel::new(
            model.clone(),
            Duration::from_secs(1),
        ));
        let ctx = context_after("What is caramelization?", "caramelization").await;
        let resolved = resolver.resolve("What is mycelium?", Intent::Factual, &ctx).await;
        assert_eq!(resolved.query, "What is mycelium?");
        assert!(model.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_short_rewrite_keeps_question() {
        let resolver = RewriteResolver::new(BoundedModel::new(
            recording("it"),
            Duration::from_secs(1),
        ));
        let ctx = context_after("What is caramelization?", "caramelization").await;
        let resolved = resolver
            .resolve("Tell me more", Intent::Continuation, &ctx)
            .await;
        assert_eq!(resolved.query, "Tell me more");
    }

    #[tokio::test]
    async fn test_anchor_carries_active_subject() {
        let ctx = context_after("What is caramelization?", "caramelization").await;
        let resolved = AnchorResolver
            .resolve("Why shouldn't you rush it?", Intent::Continuation, &ctx)
            .await;
        assert_eq!(resolved.query, "rush caramelization");
        assert_eq!(resolved.subject_tokens, vec!["rush"]);
        assert_eq!(resolved.fallback_subject.as_deref(), Some("caramelization"));

        let resolved = AnchorResolver
            .resolve("Tell me more", Intent::Continuation, &ctx)
            .await;
        assert_eq!(resolved.query, "caramelization What is caramelization?");
        assert_eq!(resolved.subject_tokens, vec!["caramelization"]);
        assert!(resolved.fallback_subject.is_none());
    }

    #[test]
    fn test_fall_back_switches_subject() {
        let mut resolved = ResolvedQuery {
            query: "rush".to_string(),
            subject_tokens: vec!["rush".to_string()],
            fallback_subject: Some("caramelization".to_string()),
        };
        let chunks = vec![ScoredChunk {
            file: "sugar.md".to_string(),
            chunk: "Sugar melts slowly.".to_string(),
            score: 2.0,
        }];
        assert!(!resolved.is_anchored_in(&chunks));
        assert!(resolved.fall_back());
        assert_eq!(resolved.query, "caramelization rush");
        assert_eq!(resolved.subject_tokens, vec!["caramelization"]);
        assert!(!resolved.fall_back());
    }
}
